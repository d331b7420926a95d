use crate::config::{ConnectionSettings, PoolSettings};
use crate::pool::Destination;
use crate::transport::{
    Connection, RequestWriter, ResponseReader, Transport, TransportError, http1_connection,
};
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use http::Request;
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream, duplex};

/// In-memory transport: every connection is a duplex stream served by a
/// small HTTP/1.1 echo server task.
///
/// The server echoes the request body and stamps `x-connection` with the
/// 1-based number of the connection. Request headers steer it:
/// `x-delay-ms` delays the response, `x-close` answers with
/// `connection: close` and hangs up, `x-truncate` sends half a body and hangs up.
/// `x-chunk-size` answers with a chunked body announcing that (hex) size.
#[derive(Debug, Default)]
pub struct MockTransport {
    attempts: AtomicUsize,
    opened: AtomicUsize,
    open_now: Arc<AtomicUsize>,
    max_open: Arc<AtomicUsize>,
    fail_first: AtomicUsize,
    open_delay_ms: AtomicUsize,
}

impl MockTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Refuse the next `n` connection attempts.
    pub fn failing_first(n: usize) -> Arc<Self> {
        let transport = Self::default();
        transport.fail_first.store(n, Ordering::SeqCst);
        Arc::new(transport)
    }

    /// Take this long to open every connection.
    pub fn slow_open(delay: Duration) -> Arc<Self> {
        let transport = Self::default();
        transport
            .open_delay_ms
            .store(delay.as_millis() as usize, Ordering::SeqCst);
        Arc::new(transport)
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    pub fn max_open(&self) -> usize {
        self.max_open.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn open(
        &self,
        destination: &Destination,
        settings: &ConnectionSettings,
    ) -> Result<Connection, TransportError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);

        let delay = self.open_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay as u64)).await;
        }

        let refused = self
            .fail_first
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if refused {
            return Err(TransportError::connect(io::Error::new(
                io::ErrorKind::ConnectionRefused,
                "induced failure",
            )));
        }

        let number = self.opened.fetch_add(1, Ordering::SeqCst) + 1;
        let now = self.open_now.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_open.fetch_max(now, Ordering::SeqCst);

        let (client, server) = duplex(64 * 1024);
        let guard = OpenGuard(Arc::clone(&self.open_now));
        tokio::spawn(serve(server, number, guard));

        Ok(http1_connection(client, destination, settings))
    }
}

struct OpenGuard(Arc<AtomicUsize>);

impl Drop for OpenGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

async fn serve(mut io: DuplexStream, connection: usize, _guard: OpenGuard) {
    let mut buf = BytesMut::new();

    while let Some((head, body)) = read_request(&mut io, &mut buf).await {
        if let Some(ms) = header(&head, "x-delay-ms").and_then(|v| v.parse::<u64>().ok()) {
            tokio::time::sleep(Duration::from_millis(ms)).await;
        }

        if header(&head, "x-truncate").is_some() {
            let _ = io
                .write_all(b"HTTP/1.1 200 OK\r\ncontent-length: 100\r\n\r\npartial")
                .await;
            return;
        }

        if let Some(size) = header(&head, "x-chunk-size") {
            let response =
                format!("HTTP/1.1 200 OK\r\ntransfer-encoding: chunked\r\n\r\n{size}\r\nab");
            if io.write_all(response.as_bytes()).await.is_err() {
                return;
            }
            continue;
        }

        let close = header(&head, "x-close").is_some();
        let mut response = format!(
            "HTTP/1.1 200 OK\r\nx-connection: {connection}\r\ncontent-length: {}\r\n",
            body.len()
        );
        if close {
            response.push_str("connection: close\r\n");
        }
        response.push_str("\r\n");

        if io.write_all(response.as_bytes()).await.is_err() || io.write_all(&body).await.is_err()
        {
            return;
        }

        if close {
            return;
        }
    }
}

async fn read_request(io: &mut DuplexStream, buf: &mut BytesMut) -> Option<(String, Bytes)> {
    let head_len = loop {
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
        if io.read_buf(buf).await.ok()? == 0 {
            return None;
        }
    };

    let head = String::from_utf8_lossy(&buf.split_to(head_len)).into_owned();
    let length = header(&head, "content-length")
        .and_then(|v| v.parse::<usize>().ok())
        .unwrap_or(0);

    while buf.len() < length {
        if io.read_buf(buf).await.ok()? == 0 {
            return None;
        }
    }

    Some((head, buf.split_to(length).freeze()))
}

fn header<'a>(head: &'a str, name: &str) -> Option<&'a str> {
    head.lines().skip(1).find_map(|line| {
        let (key, value) = line.split_once(':')?;
        key.trim()
            .eq_ignore_ascii_case(name)
            .then(|| value.trim())
    })
}

/// Transport whose connections panic while waiting for a response.
#[derive(Debug, Default)]
pub struct PanickingTransport {
    attempts: AtomicUsize,
}

impl PanickingTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for PanickingTransport {
    async fn open(
        &self,
        _destination: &Destination,
        _settings: &ConnectionSettings,
    ) -> Result<Connection, TransportError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Ok(Connection::new(Sink, Explodes))
    }
}

struct Sink;

#[async_trait]
impl RequestWriter for Sink {
    async fn send(&mut self, _request: &Request<Bytes>) -> Result<(), TransportError> {
        Ok(())
    }
}

struct Explodes;

#[async_trait]
impl ResponseReader for Explodes {
    async fn next_response(&mut self) -> Result<Option<http::Response<Bytes>>, TransportError> {
        tokio::time::sleep(Duration::from_millis(5)).await;
        panic!("reader failed hard");
    }
}

/// Settings tuned for tests: no idle shutdown, near-instant reconnects.
pub fn test_settings() -> PoolSettings {
    PoolSettings {
        idle_timeout_milliseconds: None,
        base_connection_backoff_milliseconds: 1,
        max_connection_backoff_milliseconds: 10,
        ..PoolSettings::default()
    }
}

pub fn destination() -> Destination {
    Destination::new("upstream.test", 8080)
}

pub fn get(path: &str) -> Request<Bytes> {
    Request::get(path).body(Bytes::new()).unwrap()
}

pub fn post(path: &str, body: impl Into<Bytes>) -> Request<Bytes> {
    Request::post(path).body(body.into()).unwrap()
}

pub fn with_header(mut request: Request<Bytes>, name: &'static str, value: &str) -> Request<Bytes> {
    request
        .headers_mut()
        .insert(name, value.parse().unwrap());
    request
}

pub fn connection_of(response: &http::Response<Bytes>) -> usize {
    response.headers()["x-connection"]
        .to_str()
        .unwrap()
        .parse()
        .unwrap()
}
