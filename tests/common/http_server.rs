//! Raw HTTP/1.1 server for timing behavior wiremock cannot express:
//! bodies that stop mid-transfer or arrive in slow chunks

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

/// How the body is delivered
#[derive(Clone, Debug)]
pub enum BodyBehavior {
    /// Send `sent` bytes of a body declared as `declared` bytes, then go silent
    StallAfter {
        /// Content-Length header value
        declared: usize,
        /// Bytes actually sent before stalling
        sent: usize,
    },
    /// Send `sent` bytes of a body declared as `declared` bytes, then close
    Truncated {
        /// Content-Length header value
        declared: usize,
        /// Bytes actually sent before closing
        sent: usize,
    },
    /// Send the whole body in `chunks` pieces with `interval` between them
    Trickle {
        /// Total body length
        len: usize,
        /// Number of pieces
        chunks: usize,
        /// Pause between pieces
        interval: Duration,
    },
}

/// Handle to a running raw server
pub struct RawHttpServer {
    /// Listening port on 127.0.0.1
    pub port: u16,
    /// Requests served so far
    pub requests: Arc<AtomicUsize>,
}

impl RawHttpServer {
    /// Start an HTTP server answering every request with `behavior`
    pub async fn start(behavior: BodyBehavior) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let requests = Arc::new(AtomicUsize::new(0));

        let counter = requests.clone();
        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                counter.fetch_add(1, Ordering::SeqCst);
                let behavior = behavior.clone();
                tokio::spawn(async move {
                    // Read until the end of the request headers
                    let mut request = Vec::new();
                    let mut buf = [0u8; 1024];
                    while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                        match socket.read(&mut buf).await {
                            Ok(0) | Err(_) => return,
                            Ok(n) => request.extend_from_slice(&buf[..n]),
                        }
                    }

                    match behavior {
                        BodyBehavior::StallAfter { declared, sent } => {
                            let head = format!(
                                "HTTP/1.1 200 OK\r\nContent-Length: {declared}\r\nContent-Type: application/octet-stream\r\n\r\n"
                            );
                            let _ = socket.write_all(head.as_bytes()).await;
                            let _ = socket.write_all(&vec![1u8; sent]).await;
                            let _ = socket.flush().await;
                            // Hold the connection open until the client gives up
                            let _ = socket.read(&mut buf).await;
                        }
                        BodyBehavior::Truncated { declared, sent } => {
                            let head = format!(
                                "HTTP/1.1 200 OK\r\nContent-Length: {declared}\r\nContent-Type: application/octet-stream\r\n\r\n"
                            );
                            let _ = socket.write_all(head.as_bytes()).await;
                            let _ = socket.write_all(&vec![3u8; sent]).await;
                            let _ = socket.shutdown().await;
                        }
                        BodyBehavior::Trickle {
                            len,
                            chunks,
                            interval,
                        } => {
                            let head = format!(
                                "HTTP/1.1 200 OK\r\nContent-Length: {len}\r\nContent-Type: application/octet-stream\r\n\r\n"
                            );
                            let _ = socket.write_all(head.as_bytes()).await;
                            let piece = len.div_ceil(chunks);
                            let mut remaining = len;
                            while remaining > 0 {
                                tokio::time::sleep(interval).await;
                                let n = piece.min(remaining);
                                if socket.write_all(&vec![2u8; n]).await.is_err() {
                                    return;
                                }
                                let _ = socket.flush().await;
                                remaining -= n;
                            }
                        }
                    }
                });
            }
        });

        Self { port, requests }
    }

    /// URL for `path` on this server
    pub fn url(&self, path: &str) -> String {
        format!("http://127.0.0.1:{}/{}", self.port, path.trim_start_matches('/'))
    }

    /// Requests served so far
    pub fn request_count(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }
}
