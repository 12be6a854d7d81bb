//! One-shot loopback listener for the OAuth redirect.
//!
//! Binds an OS-assigned port on 127.0.0.1 and reads plain HTTP/1.1 GET
//! requests until one carries either `code` or `error`. Anything else gets
//! the waiting page and the listener keeps accepting. Dropping the listener
//! releases the port.

use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinSet;

use super::pages::{self, Page};
use super::{AuthError, Result};

/// Upper bound on the request head we are willing to buffer.
const MAX_REQUEST_BYTES: usize = 16 * 1024;

/// How long an accepted connection may take to send its request head.
const REQUEST_READ_TIMEOUT: Duration = Duration::from_secs(10);

/// Terminal redirect parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Callback {
    Code(String),
    Error { code: String, description: String },
}

/// What a single request to the listener carried.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Request {
    Callback(Callback),
    /// Premature or unrelated request (favicon probe, bare `/`).
    Waiting,
}

/// A connection that delivered a terminal callback and still awaits its response page.
pub struct PendingResponse {
    stream: TcpStream,
}

impl PendingResponse {
    pub async fn respond(mut self, page: Page) {
        if let Err(e) = write_page(&mut self.stream, page).await {
            tracing::debug!("Failed to write callback response: {}", e);
        }
    }
}

pub struct CallbackListener {
    listener: TcpListener,
    port: u16,
}

impl CallbackListener {
    pub async fn bind() -> Result<Self> {
        let listener = TcpListener::bind(("127.0.0.1", 0))
            .await
            .map_err(|e| AuthError::ListenerFailed(format!("bind failed: {}", e)))?;
        let port = listener
            .local_addr()
            .map_err(|e| AuthError::ListenerFailed(format!("no local address: {}", e)))?
            .port();

        tracing::debug!("Callback listener bound on 127.0.0.1:{}", port);
        Ok(Self { listener, port })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn redirect_uri(&self) -> String {
        format!("http://localhost:{}", self.port)
    }

    /// Accept connections until one delivers a code or an error.
    ///
    /// Each connection is read on its own task, so an idle preconnect
    /// cannot hold up the real redirect. The returned [`PendingResponse`]
    /// lets the caller pick the page after it knows how the token exchange
    /// went. Connections still open when this returns are dropped.
    pub async fn next_callback(&self) -> Result<(PendingResponse, Callback)> {
        let mut reads = JoinSet::new();

        loop {
            tokio::select! {
                accepted = self.listener.accept() => {
                    let (stream, peer) = accepted
                        .map_err(|e| AuthError::ListenerFailed(format!("accept failed: {}", e)))?;
                    reads.spawn(serve_connection(stream, peer));
                }
                Some(joined) = reads.join_next() => {
                    match joined {
                        Ok(Some((stream, callback))) => {
                            return Ok((PendingResponse { stream }, callback));
                        }
                        Ok(None) => {}
                        Err(e) => tracing::debug!("Callback connection task failed: {}", e),
                    }
                }
            }
        }
    }
}

/// Read one request; answer non-terminal ones with the waiting page.
async fn serve_connection(
    mut stream: TcpStream,
    peer: SocketAddr,
) -> Option<(TcpStream, Callback)> {
    let head = match tokio::time::timeout(REQUEST_READ_TIMEOUT, read_request_head(&mut stream))
        .await
    {
        Ok(Ok(head)) => head,
        Ok(Err(e)) => {
            tracing::debug!("Dropping unreadable request from {}: {}", peer, e);
            return None;
        }
        Err(_) => {
            tracing::debug!("Dropping idle connection from {}", peer);
            return None;
        }
    };

    match parse_request(&head) {
        Request::Callback(callback) => Some((stream, callback)),
        Request::Waiting => {
            tracing::debug!("Non-terminal request on callback listener, still waiting");
            if let Err(e) = write_page(&mut stream, Page::Waiting).await {
                tracing::debug!("Failed to write waiting page: {}", e);
            }
            None
        }
    }
}

async fn read_request_head(stream: &mut TcpStream) -> std::io::Result<String> {
    let mut buf = Vec::with_capacity(1024);
    let mut chunk = [0u8; 1024];

    loop {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
        if buf.windows(4).any(|w| w == b"\r\n\r\n") || buf.len() >= MAX_REQUEST_BYTES {
            break;
        }
    }

    if buf.is_empty() {
        return Err(std::io::Error::new(
            std::io::ErrorKind::UnexpectedEof,
            "connection closed before request",
        ));
    }
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

/// Classify an HTTP request head by its request target.
fn parse_request(head: &str) -> Request {
    let target = head
        .lines()
        .next()
        .and_then(|line| line.split_whitespace().nth(1))
        .unwrap_or("/");

    let Ok(url) = url::Url::parse(&format!("http://localhost{}", target)) else {
        return Request::Waiting;
    };
    if url.path() != "/" {
        return Request::Waiting;
    }

    let mut code = None;
    let mut error = None;
    let mut description = None;
    for (key, value) in url.query_pairs() {
        match key.as_ref() {
            "code" => code = Some(value.into_owned()),
            "error" => error = Some(value.into_owned()),
            "error_description" => description = Some(value.into_owned()),
            _ => {}
        }
    }

    if let Some(code) = error {
        return Request::Callback(Callback::Error {
            code,
            description: description.unwrap_or_else(|| "no description provided".to_string()),
        });
    }
    match code {
        Some(code) if !code.is_empty() => Request::Callback(Callback::Code(code)),
        _ => Request::Waiting,
    }
}

async fn write_page(stream: &mut TcpStream, page: Page) -> std::io::Result<()> {
    let body = pages::render(&page);
    let response = format!(
        "HTTP/1.1 200 OK\r\n\
         Content-Type: text/html; charset=utf-8\r\n\
         Content-Length: {}\r\n\
         Cache-Control: no-store\r\n\
         Connection: close\r\n\r\n{}",
        body.len(),
        body
    );
    stream.write_all(response.as_bytes()).await?;
    stream.flush().await?;
    stream.shutdown().await
}
