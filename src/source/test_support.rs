//! Test helpers: a loopback HTTP server that replays canned responses

use crate::throttle::{RateLimiter, RetryPolicy, RetryingExecutor};
use serde_json::Value;
use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

/// Executor with millisecond backoff and an effectively unlimited rate.
pub fn fast_executor() -> RetryingExecutor {
    let policy = RetryPolicy {
        floor_ms: 10,
        ceiling_ms: 50,
        ..RetryPolicy::default()
    };
    RetryingExecutor::new(policy, Arc::new(RateLimiter::new(60_000)))
}

pub struct CannedResponse {
    status: u16,
    content_type: &'static str,
    body: String,
}

impl CannedResponse {
    fn render(&self) -> String {
        format!(
            "HTTP/1.1 {} Canned\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            self.status,
            self.content_type,
            self.body.len(),
            self.body
        )
    }
}

/// Serves queued responses in order, one per connection; 404 once drained.
pub struct CannedServer {
    addr: SocketAddr,
    requests: Arc<Mutex<Vec<String>>>,
}

impl CannedServer {
    pub async fn start(responses: Vec<CannedResponse>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let requests = Arc::new(Mutex::new(Vec::new()));
        let log = requests.clone();

        tokio::spawn(async move {
            let mut queue = VecDeque::from(responses);
            while let Ok((mut socket, _)) = listener.accept().await {
                let request = read_request(&mut socket).await;
                log.lock().unwrap().push(request);
                let response = queue.pop_front().unwrap_or_else(|| Self::status(404));
                let _ = socket.write_all(response.render().as_bytes()).await;
                let _ = socket.shutdown().await;
            }
        });

        Self { addr, requests }
    }

    pub fn status(status: u16) -> CannedResponse {
        CannedResponse {
            status,
            content_type: "text/plain",
            body: String::new(),
        }
    }

    pub fn json(body: Value) -> CannedResponse {
        CannedResponse {
            status: 200,
            content_type: "application/json",
            body: body.to_string(),
        }
    }

    pub fn html(body: &str) -> CannedResponse {
        CannedResponse {
            status: 200,
            content_type: "text/html",
            body: body.to_string(),
        }
    }

    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url(), path)
    }

    /// Raw requests received so far (head and body).
    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }
}

async fn read_request(socket: &mut TcpStream) -> String {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        let n = match socket.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(n) => n,
        };
        buf.extend_from_slice(&chunk[..n]);
        let text = String::from_utf8_lossy(&buf);
        if let Some(head_end) = text.find("\r\n\r\n") {
            let body_len = text[..head_end]
                .lines()
                .find_map(|line| {
                    let (name, value) = line.split_once(':')?;
                    name.eq_ignore_ascii_case("content-length")
                        .then(|| value.trim().parse::<usize>().ok())
                        .flatten()
                })
                .unwrap_or(0);
            if buf.len() >= head_end + 4 + body_len {
                break;
            }
        }
    }
    String::from_utf8_lossy(&buf).into_owned()
}
