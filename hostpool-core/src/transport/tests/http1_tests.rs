use crate::config::ConnectionSettings;
use crate::pool::Destination;
use crate::transport::http1::{encode_head, parse_head};
use crate::transport::{Connection, TransportError, http1_connection};
use bytes::Bytes;
use http::header::CONTENT_TYPE;
use http::{Method, Request, StatusCode, Version};
use pretty_assertions::assert_eq;
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream, duplex};

fn connect() -> (Connection, DuplexStream) {
    connect_with(&ConnectionSettings::default())
}

fn connect_with(settings: &ConnectionSettings) -> (Connection, DuplexStream) {
    let (client, server) = duplex(64 * 1024);
    let destination = Destination::new("example.test", 8080);
    let connection = http1_connection(client, &destination, settings);
    (connection, server)
}

fn capped(max_response_body_size: usize) -> ConnectionSettings {
    ConnectionSettings {
        max_response_body_size,
        ..ConnectionSettings::default()
    }
}

fn get(path: &str) -> Request<Bytes> {
    Request::get(path).body(Bytes::new()).unwrap()
}

#[test]
fn encode_head_uses_origin_form_and_adds_host() {
    let request = get("http://example.test:8080/a/b?x=1");

    let head = encode_head(&request, "example.test:8080");

    assert_eq!(
        std::str::from_utf8(&head).unwrap(),
        "GET /a/b?x=1 HTTP/1.1\r\nhost: example.test:8080\r\n\r\n"
    );
}

#[test]
fn encode_head_keeps_caller_host_and_frames_body() {
    let request = Request::post("/submit")
        .header("host", "override.test")
        .header("content-length", "999")
        .header(CONTENT_TYPE, "text/plain")
        .body(Bytes::from_static(b"hello"))
        .unwrap();

    let head = encode_head(&request, "example.test:8080");

    assert_eq!(
        std::str::from_utf8(&head).unwrap(),
        "POST /submit HTTP/1.1\r\nhost: override.test\r\ncontent-type: text/plain\r\ncontent-length: 5\r\n\r\n"
    );
}

#[test]
fn encode_head_sends_zero_length_for_empty_post() {
    let request = Request::post("/").body(Bytes::new()).unwrap();

    let head = encode_head(&request, "example.test");

    assert!(
        std::str::from_utf8(&head)
            .unwrap()
            .contains("content-length: 0\r\n")
    );
}

#[test]
fn parse_head_reads_status_version_and_headers() {
    let head = b"HTTP/1.0 404 Not Found\r\nX-Trace: abc\r\nContent-Length: 0\r\n\r\n";

    let response = parse_head(head).unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(response.version(), Version::HTTP_10);
    assert_eq!(response.headers()["x-trace"], "abc");
}

#[test]
fn parse_head_rejects_garbage() {
    assert!(matches!(
        parse_head(b"SSH-2.0-OpenSSH\r\n\r\n"),
        Err(TransportError::Protocol(_))
    ));
    assert!(matches!(
        parse_head(b"HTTP/1.1 abc OK\r\n\r\n"),
        Err(TransportError::Protocol(_))
    ));
    assert!(matches!(
        parse_head(b"HTTP/1.1 200 OK\r\nno-colon-here\r\n\r\n"),
        Err(TransportError::Protocol(_))
    ));
}

#[tokio::test]
async fn writer_puts_request_on_the_wire() {
    // Arrange
    let (mut connection, mut server) = connect();
    let request = Request::put("/items/7")
        .body(Bytes::from_static(b"{}"))
        .unwrap();

    // Act
    connection.writer.send(&request).await.unwrap();
    drop(connection);
    let mut wire = String::new();
    server.read_to_string(&mut wire).await.unwrap();

    // Assert
    assert_eq!(
        wire,
        "PUT /items/7 HTTP/1.1\r\nhost: example.test:8080\r\ncontent-length: 2\r\n\r\n{}"
    );
}

#[tokio::test]
async fn reader_returns_pipelined_responses_in_send_order() {
    // Arrange
    let (mut connection, mut server) = connect();
    connection.writer.send(&get("/one")).await.unwrap();
    connection.writer.send(&get("/two")).await.unwrap();

    // Act
    server
        .write_all(
            b"HTTP/1.1 200 OK\r\ncontent-length: 3\r\n\r\none\
HTTP/1.1 201 Created\r\ntransfer-encoding: chunked\r\n\r\n3\r\ntwo\r\n4\r\n-two\r\n0\r\n\r\n",
        )
        .await
        .unwrap();
    let first = connection.reader.next_response().await.unwrap().unwrap();
    let second = connection.reader.next_response().await.unwrap().unwrap();

    // Assert
    assert_eq!(first.status(), StatusCode::OK);
    assert_eq!(first.body(), &Bytes::from_static(b"one"));
    assert_eq!(second.status(), StatusCode::CREATED);
    assert_eq!(second.body(), &Bytes::from_static(b"two-two"));
}

#[tokio::test]
async fn reader_frames_head_responses_without_body() {
    // Arrange
    let (mut connection, mut server) = connect();
    let head = Request::builder()
        .method(Method::HEAD)
        .uri("/")
        .body(Bytes::new())
        .unwrap();
    connection.writer.send(&head).await.unwrap();
    connection.writer.send(&get("/after")).await.unwrap();

    // Act
    server
        .write_all(
            b"HTTP/1.1 200 OK\r\ncontent-length: 42\r\n\r\nHTTP/1.1 200 OK\r\ncontent-length: 5\r\n\r\nafter",
        )
        .await
        .unwrap();
    let first = connection.reader.next_response().await.unwrap().unwrap();
    let second = connection.reader.next_response().await.unwrap().unwrap();

    // Assert
    assert!(first.body().is_empty());
    assert_eq!(second.body(), &Bytes::from_static(b"after"));
}

#[tokio::test]
async fn reader_skips_interim_responses() {
    // Arrange
    let (mut connection, mut server) = connect();
    connection.writer.send(&get("/")).await.unwrap();

    // Act
    server
        .write_all(b"HTTP/1.1 100 Continue\r\n\r\nHTTP/1.1 200 OK\r\ncontent-length: 2\r\n\r\nok")
        .await
        .unwrap();
    let response = connection.reader.next_response().await.unwrap().unwrap();

    // Assert
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.body(), &Bytes::from_static(b"ok"));
}

#[tokio::test]
async fn reader_reads_close_delimited_body() {
    // Arrange
    let (mut connection, mut server) = connect();
    connection.writer.send(&get("/")).await.unwrap();

    // Act
    server
        .write_all(b"HTTP/1.1 200 OK\r\nconnection: close\r\n\r\nuntil the end")
        .await
        .unwrap();
    drop(server);
    let response = connection.reader.next_response().await.unwrap().unwrap();
    let after = connection.reader.next_response().await.unwrap();

    // Assert
    assert_eq!(response.body(), &Bytes::from_static(b"until the end"));
    assert!(after.is_none());
}

#[tokio::test]
async fn reader_reports_truncated_body_as_mid_response() {
    // Arrange
    let (mut connection, mut server) = connect();
    connection.writer.send(&get("/")).await.unwrap();

    // Act
    server
        .write_all(b"HTTP/1.1 200 OK\r\ncontent-length: 10\r\n\r\nabcd")
        .await
        .unwrap();
    drop(server);
    let result = connection.reader.next_response().await;

    // Assert
    let err = result.unwrap_err();
    assert!(matches!(err, TransportError::Truncated(_)));
    assert!(err.is_mid_response());
}

#[tokio::test]
async fn reader_distinguishes_clean_eof_from_eof_mid_head() {
    // Arrange
    let (mut idle, idle_server) = connect();
    let (mut partial, mut partial_server) = connect();
    partial.writer.send(&get("/")).await.unwrap();

    // Act
    drop(idle_server);
    partial_server.write_all(b"HTTP/1.1 200").await.unwrap();
    drop(partial_server);
    let clean = idle.reader.next_response().await;
    let cut = partial.reader.next_response().await;

    // Assert
    assert!(matches!(clean, Ok(None)));
    let err = cut.unwrap_err();
    assert!(matches!(err, TransportError::Closed));
    assert!(!err.is_mid_response());
}

#[tokio::test]
async fn reader_rejects_unsolicited_response() {
    // Arrange
    let (mut connection, mut server) = connect();

    // Act
    server
        .write_all(b"HTTP/1.1 200 OK\r\ncontent-length: 0\r\n\r\n")
        .await
        .unwrap();
    let result = connection.reader.next_response().await;

    // Assert
    assert!(matches!(result, Err(TransportError::Protocol(_))));
}

#[tokio::test]
async fn reader_rejects_chunk_size_that_overflows() {
    // Arrange
    let (mut connection, mut server) = connect();
    connection.writer.send(&get("/")).await.unwrap();

    // Act
    server
        .write_all(b"HTTP/1.1 200 OK\r\ntransfer-encoding: chunked\r\n\r\nffffffffffffffff\r\nab")
        .await
        .unwrap();
    let result = connection.reader.next_response().await;

    // Assert
    let err = result.unwrap_err();
    assert!(matches!(err, TransportError::Truncated(_)));
    assert!(err.is_mid_response());
}

#[tokio::test]
async fn reader_rejects_chunks_beyond_the_body_limit() {
    // Arrange
    let (mut connection, mut server) = connect_with(&capped(8));
    connection.writer.send(&get("/")).await.unwrap();

    // Act
    server
        .write_all(
            b"HTTP/1.1 200 OK\r\ntransfer-encoding: chunked\r\n\r\n5\r\nhello\r\n5\r\nworld\r\n0\r\n\r\n",
        )
        .await
        .unwrap();
    let result = connection.reader.next_response().await;

    // Assert
    assert!(matches!(result, Err(TransportError::Truncated(_))));
}

#[tokio::test]
async fn reader_rejects_content_length_beyond_the_body_limit() {
    // Arrange
    let (mut connection, mut server) = connect_with(&capped(8));
    connection.writer.send(&get("/")).await.unwrap();

    // Act
    server
        .write_all(b"HTTP/1.1 200 OK\r\ncontent-length: 18446744073709551615\r\n\r\n")
        .await
        .unwrap();
    let result = connection.reader.next_response().await;

    // Assert
    assert!(matches!(result, Err(TransportError::Truncated(_))));
}

#[tokio::test]
async fn reader_rejects_close_delimited_body_beyond_the_body_limit() {
    // Arrange
    let (mut connection, mut server) = connect_with(&capped(8));
    connection.writer.send(&get("/")).await.unwrap();

    // Act
    server
        .write_all(b"HTTP/1.1 200 OK\r\nconnection: close\r\n\r\nfar more than eight bytes")
        .await
        .unwrap();
    drop(server);
    let result = connection.reader.next_response().await;

    // Assert
    assert!(matches!(result, Err(TransportError::Truncated(_))));
}

#[tokio::test]
async fn body_exactly_at_the_limit_is_accepted() {
    // Arrange
    let (mut connection, mut server) = connect_with(&capped(5));
    connection.writer.send(&get("/")).await.unwrap();

    // Act
    server
        .write_all(b"HTTP/1.1 200 OK\r\ntransfer-encoding: chunked\r\n\r\n5\r\nhello\r\n0\r\n\r\n")
        .await
        .unwrap();
    let response = connection.reader.next_response().await.unwrap().unwrap();

    // Assert
    assert_eq!(response.body(), &Bytes::from_static(b"hello"));
}
