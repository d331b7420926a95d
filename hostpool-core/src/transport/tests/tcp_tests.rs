use crate::config::ConnectionSettings;
use crate::pool::Destination;
use crate::transport::{TcpTransport, Transport, TransportError};
use bytes::Bytes;
use http::Request;
use pretty_assertions::assert_eq;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

#[tokio::test]
async fn tcp_transport_refuses_tls_destinations() {
    let destination = Destination::new("localhost", 443).with_tls(true);

    let result = TcpTransport
        .open(&destination, &ConnectionSettings::default())
        .await;

    assert!(matches!(result, Err(TransportError::Unsupported(_))));
}

#[tokio::test]
async fn tcp_transport_reports_refused_connections() {
    // Arrange
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    // Act
    let result = TcpTransport
        .open(
            &Destination::new("127.0.0.1", port),
            &ConnectionSettings::default(),
        )
        .await;

    // Assert
    assert!(matches!(result, Err(TransportError::Connect(_))));
}

#[tokio::test]
async fn tcp_transport_exchanges_a_request() {
    // Arrange
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let server = tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut buf = vec![0u8; 1024];
        let n = socket.read(&mut buf).await.unwrap();
        socket
            .write_all(b"HTTP/1.1 200 OK\r\ncontent-length: 4\r\n\r\npong")
            .await
            .unwrap();
        String::from_utf8_lossy(&buf[..n]).into_owned()
    });

    // Act
    let mut connection = TcpTransport
        .open(
            &Destination::new("127.0.0.1", port),
            &ConnectionSettings::default(),
        )
        .await
        .unwrap();
    connection
        .writer
        .send(&Request::get("/ping").body(Bytes::new()).unwrap())
        .await
        .unwrap();
    let response = connection.reader.next_response().await.unwrap().unwrap();
    let wire = server.await.unwrap();

    // Assert
    assert_eq!(response.body(), &Bytes::from_static(b"pong"));
    assert!(wire.starts_with("GET /ping HTTP/1.1\r\n"));
    assert!(wire.contains(&format!("host: 127.0.0.1:{port}\r\n")));
}
