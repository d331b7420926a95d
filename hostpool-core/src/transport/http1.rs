use crate::config::ConnectionSettings;
use crate::pool::Destination;
use crate::transport::{Connection, RequestWriter, ResponseReader, TransportError};
use async_trait::async_trait;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use http::header::{CONTENT_LENGTH, HOST, TRANSFER_ENCODING};
use http::{HeaderMap, Method, Request, Response, StatusCode, Version};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;

const MAX_HEAD_SIZE: usize = 64 * 1024;
const MAX_HEADERS: usize = 100;

/// Wrap any byte stream in a minimal HTTP/1.1 codec.
///
/// The writer tells the reader which method each request used, in send order,
/// so responses to `HEAD` can be framed without a body.
pub fn http1_connection<S>(
    stream: S,
    destination: &Destination,
    settings: &ConnectionSettings,
) -> Connection
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let (read_half, write_half) = tokio::io::split(stream);
    let (methods_tx, methods_rx) = mpsc::unbounded_channel();

    Connection::new(
        Http1Writer::new(write_half, destination, methods_tx),
        Http1Reader::new(
            read_half,
            settings.read_buffer_size,
            settings.max_response_body_size,
            methods_rx,
        ),
    )
}

pub struct Http1Writer<W> {
    io: W,
    host: String,
    methods: mpsc::UnboundedSender<Method>,
}

impl<W> Http1Writer<W> {
    pub fn new(io: W, destination: &Destination, methods: mpsc::UnboundedSender<Method>) -> Self {
        Self {
            io,
            host: destination.authority(),
            methods,
        }
    }
}

#[async_trait]
impl<W> RequestWriter for Http1Writer<W>
where
    W: AsyncWrite + Unpin + Send,
{
    async fn send(&mut self, request: &Request<Bytes>) -> Result<(), TransportError> {
        let head = encode_head(request, &self.host);

        // Queue the method before any byte goes out, the response may race us.
        let _ = self.methods.send(request.method().clone());

        self.io
            .write_all(&head)
            .await
            .map_err(TransportError::reset)?;

        if !request.body().is_empty() {
            self.io
                .write_all(request.body())
                .await
                .map_err(TransportError::reset)?;
        }

        self.io.flush().await.map_err(TransportError::reset)
    }
}

/// Serialize the request line and headers in origin form.
pub(crate) fn encode_head(request: &Request<Bytes>, host: &str) -> BytesMut {
    let mut buf = BytesMut::with_capacity(256);

    let target = request
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");

    buf.put_slice(request.method().as_str().as_bytes());
    buf.put_u8(b' ');
    buf.put_slice(target.as_bytes());
    buf.put_slice(b" HTTP/1.1\r\n");

    if !request.headers().contains_key(HOST) {
        buf.put_slice(b"host: ");
        buf.put_slice(host.as_bytes());
        buf.put_slice(b"\r\n");
    }

    for (name, value) in request.headers() {
        // Framing is derived from the body below.
        if name == CONTENT_LENGTH || name == TRANSFER_ENCODING {
            continue;
        }
        buf.put_slice(name.as_str().as_bytes());
        buf.put_slice(b": ");
        buf.put_slice(value.as_bytes());
        buf.put_slice(b"\r\n");
    }

    let body_len = request.body().len();
    if body_len > 0 || method_carries_body(request.method()) {
        buf.put_slice(format!("content-length: {body_len}\r\n").as_bytes());
    }

    buf.put_slice(b"\r\n");
    buf
}

fn method_carries_body(method: &Method) -> bool {
    method == Method::POST || method == Method::PUT || method == Method::PATCH
}

pub struct Http1Reader<R> {
    io: R,
    buf: BytesMut,
    read_size: usize,
    max_body_size: usize,
    methods: mpsc::UnboundedReceiver<Method>,
}

impl<R> Http1Reader<R> {
    pub fn new(
        io: R,
        read_size: usize,
        max_body_size: usize,
        methods: mpsc::UnboundedReceiver<Method>,
    ) -> Self {
        Self {
            io,
            buf: BytesMut::with_capacity(read_size),
            read_size,
            max_body_size,
            methods,
        }
    }
}

#[async_trait]
impl<R> ResponseReader for Http1Reader<R>
where
    R: AsyncRead + Unpin + Send,
{
    async fn next_response(&mut self) -> Result<Option<Response<Bytes>>, TransportError> {
        loop {
            let Some(head_len) = self.read_head().await? else {
                return Ok(None);
            };

            let head = self.buf.split_to(head_len).freeze();
            let mut response = parse_head(&head)?;

            // Interim responses do not answer the request.
            if response.status().is_informational()
                && response.status() != StatusCode::SWITCHING_PROTOCOLS
            {
                continue;
            }

            let method = self.methods.try_recv().map_err(|_| {
                TransportError::Protocol("response received without a pending request".into())
            })?;

            let body = self.read_body(&method, &response).await?;
            *response.body_mut() = body;

            return Ok(Some(response));
        }
    }
}

impl<R> Http1Reader<R>
where
    R: AsyncRead + Unpin + Send,
{
    async fn fill(&mut self) -> Result<usize, TransportError> {
        self.buf.reserve(self.read_size);
        self.io
            .read_buf(&mut self.buf)
            .await
            .map_err(TransportError::reset)
    }

    /// Like `fill`, but any failure means a response was cut short.
    async fn fill_body(&mut self) -> Result<(), TransportError> {
        match self.fill().await {
            Ok(0) => Err(TransportError::Truncated(
                "connection closed before the body was complete".into(),
            )),
            Ok(_) => Ok(()),
            Err(e) => Err(TransportError::Truncated(e.to_string())),
        }
    }

    /// Length of the next head including its blank line, or `None` on a clean EOF.
    async fn read_head(&mut self) -> Result<Option<usize>, TransportError> {
        loop {
            if let Some(pos) = find(&self.buf, b"\r\n\r\n") {
                return Ok(Some(pos + 4));
            }

            if self.buf.len() > MAX_HEAD_SIZE {
                return Err(TransportError::Protocol(format!(
                    "response head exceeds {MAX_HEAD_SIZE} bytes"
                )));
            }

            if self.fill().await? == 0 {
                return if self.buf.is_empty() {
                    Ok(None)
                } else {
                    Err(TransportError::Closed)
                };
            }
        }
    }

    async fn read_body(
        &mut self,
        method: &Method,
        response: &Response<Bytes>,
    ) -> Result<Bytes, TransportError> {
        let status = response.status();
        if method == Method::HEAD
            || status == StatusCode::NO_CONTENT
            || status == StatusCode::NOT_MODIFIED
            || status.is_informational()
        {
            return Ok(Bytes::new());
        }

        let headers = response.headers();
        if is_chunked(headers) {
            return self.read_chunked().await;
        }

        match content_length(headers)? {
            Some(len) => self.read_exact_body(len).await,
            None => self.read_to_end().await,
        }
    }

    async fn read_exact_body(&mut self, len: usize) -> Result<Bytes, TransportError> {
        if len > self.max_body_size {
            return Err(self.too_large());
        }

        while self.buf.len() < len {
            self.fill_body().await?;
        }
        Ok(self.buf.split_to(len).freeze())
    }

    async fn read_line(&mut self) -> Result<Bytes, TransportError> {
        loop {
            if let Some(pos) = find(&self.buf, b"\r\n") {
                let line = self.buf.split_to(pos).freeze();
                self.buf.advance(2);
                return Ok(line);
            }

            if self.buf.len() > MAX_HEAD_SIZE {
                return Err(TransportError::Truncated("trailer line too long".into()));
            }

            self.fill_body().await?;
        }
    }

    async fn read_chunk_size(&mut self) -> Result<u64, TransportError> {
        loop {
            match httparse::parse_chunk_size(&self.buf) {
                Ok(httparse::Status::Complete((consumed, size))) => {
                    self.buf.advance(consumed);
                    return Ok(size);
                }
                Ok(httparse::Status::Partial) if self.buf.len() > MAX_HEAD_SIZE => {
                    return Err(TransportError::Truncated("chunk header too long".into()));
                }
                Ok(httparse::Status::Partial) => self.fill_body().await?,
                Err(_) => {
                    return Err(TransportError::Truncated("invalid chunk size".into()));
                }
            }
        }
    }

    async fn read_chunked(&mut self) -> Result<Bytes, TransportError> {
        let mut body = BytesMut::new();

        loop {
            let size = self.read_chunk_size().await?;
            if size == 0 {
                // Trailers are read and dropped.
                while !self.read_line().await?.is_empty() {}
                return Ok(body.freeze());
            }

            let size = usize::try_from(size)
                .ok()
                .filter(|size| {
                    body.len()
                        .checked_add(*size)
                        .is_some_and(|total| total <= self.max_body_size)
                })
                .ok_or_else(|| self.too_large())?;
            let framed = size.checked_add(2).ok_or_else(|| self.too_large())?;

            while self.buf.len() < framed {
                self.fill_body().await?;
            }

            body.extend_from_slice(&self.buf[..size]);
            if &self.buf[size..framed] != b"\r\n" {
                return Err(TransportError::Truncated(
                    "chunk is missing its terminator".into(),
                ));
            }
            self.buf.advance(framed);
        }
    }

    /// Close-delimited body: everything until the peer hangs up.
    async fn read_to_end(&mut self) -> Result<Bytes, TransportError> {
        loop {
            if self.buf.len() > self.max_body_size {
                return Err(self.too_large());
            }

            match self.fill().await {
                Ok(0) => break,
                Ok(_) => continue,
                Err(e) => return Err(TransportError::Truncated(e.to_string())),
            }
        }
        Ok(self.buf.split().freeze())
    }

    fn too_large(&self) -> TransportError {
        TransportError::Truncated(format!(
            "response body exceeds {} bytes",
            self.max_body_size
        ))
    }
}

pub(crate) fn parse_head(head: &[u8]) -> Result<Response<Bytes>, TransportError> {
    let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut parsed = httparse::Response::new(&mut headers);

    match parsed.parse(head) {
        Ok(httparse::Status::Complete(_)) => {}
        Ok(httparse::Status::Partial) => {
            return Err(TransportError::Protocol("incomplete response head".into()));
        }
        Err(e) => {
            return Err(TransportError::Protocol(format!("invalid response head: {e}")));
        }
    }

    let version = match parsed.version {
        Some(0) => Version::HTTP_10,
        Some(1) => Version::HTTP_11,
        _ => {
            return Err(TransportError::Protocol(
                "unsupported response version".into(),
            ));
        }
    };

    let status = parsed
        .code
        .and_then(|code| StatusCode::from_u16(code).ok())
        .ok_or_else(|| TransportError::Protocol("invalid status code".into()))?;

    let mut builder = Response::builder().status(status).version(version);
    for header in parsed.headers.iter() {
        builder = builder.header(header.name, header.value);
    }

    builder
        .body(Bytes::new())
        .map_err(|e| TransportError::Protocol(format!("invalid response head: {e}")))
}

fn is_chunked(headers: &HeaderMap) -> bool {
    headers.get_all(TRANSFER_ENCODING).iter().any(|value| {
        value
            .to_str()
            .map(|v| v.to_ascii_lowercase().contains("chunked"))
            .unwrap_or(false)
    })
}

fn content_length(headers: &HeaderMap) -> Result<Option<usize>, TransportError> {
    let Some(value) = headers.get(CONTENT_LENGTH) else {
        return Ok(None);
    };

    value
        .to_str()
        .ok()
        .and_then(|v| v.trim().parse::<usize>().ok())
        .map(Some)
        .ok_or_else(|| TransportError::Protocol("invalid content-length header".into()))
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}
