use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use boring::ssl::SslAcceptor;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::time::timeout;

/// A request as the mock server saw it on the wire.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: String,
    pub target: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl RecordedRequest {
    /// First value of a header, case-insensitive.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn header_count(&self, name: &str) -> usize {
        self.headers
            .iter()
            .filter(|(k, _)| k.eq_ignore_ascii_case(name))
            .count()
    }
}

/// Shared view of what a running server has seen.
#[derive(Clone, Default)]
pub struct Recorder {
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
    connections: Arc<AtomicUsize>,
}

impl Recorder {
    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn last(&self) -> RecordedRequest {
        self.requests
            .lock()
            .unwrap()
            .last()
            .cloned()
            .expect("no request recorded")
    }

    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }
}

/// A raw-TCP HTTP/1.1 server that records requests and replays canned
/// responses. Responses are served in order; the last one repeats.
pub struct MockHttpServer {
    listener: TcpListener,
    port: u16,
    responses: Vec<Vec<u8>>,
    answers_per_connection: Option<usize>,
}

impl MockHttpServer {
    /// Create a new mock server bound to a random port.
    pub async fn new() -> std::io::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let port = listener.local_addr()?.port();
        Ok(Self {
            listener,
            port,
            responses: Vec::new(),
            answers_per_connection: None,
        })
    }

    /// Answer `n` requests per connection, then read the next one and
    /// close without a response.
    pub fn hang_up_after(mut self, n: usize) -> Self {
        self.answers_per_connection = Some(n);
        self
    }

    /// Queue a raw response (status line, headers and body).
    pub fn respond(mut self, raw: impl Into<Vec<u8>>) -> Self {
        self.responses.push(raw.into());
        self
    }

    /// Queue a `200 OK` with a plain-text body.
    pub fn respond_ok(self, body: &str) -> Self {
        self.respond(format!(
            "HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\nContent-Length: {}\r\n\r\n{}",
            body.len(),
            body
        ))
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn url(&self) -> String {
        format!("http://127.0.0.1:{}", self.port)
    }

    pub fn url_tls(&self) -> String {
        format!("https://127.0.0.1:{}", self.port)
    }

    /// Serve plain TCP in a background task.
    pub fn start(self) -> Recorder {
        self.run(None)
    }

    /// Serve TLS in a background task.
    pub fn start_tls(self, acceptor: SslAcceptor) -> Recorder {
        self.run(Some(Arc::new(acceptor)))
    }

    fn run(self, acceptor: Option<Arc<SslAcceptor>>) -> Recorder {
        let recorder = Recorder::default();
        let responses = Arc::new(if self.responses.is_empty() {
            vec![b"HTTP/1.1 200 OK\r\nContent-Length: 5\r\n\r\nHello".to_vec()]
        } else {
            self.responses
        });
        let served = Arc::new(AtomicUsize::new(0));
        let limit = self.answers_per_connection;
        let listener = self.listener;
        let shared = recorder.clone();

        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                shared.connections.fetch_add(1, Ordering::SeqCst);
                let recorder = shared.clone();
                let responses = responses.clone();
                let served = served.clone();
                let acceptor = acceptor.clone();
                tokio::spawn(async move {
                    match acceptor {
                        Some(acceptor) => match tokio_boring::accept(&acceptor, stream).await {
                            Ok(tls) => serve(tls, recorder, responses, served, limit).await,
                            Err(e) => tracing::debug!("mock TLS accept failed: {}", e),
                        },
                        None => serve(stream, recorder, responses, served, limit).await,
                    }
                });
            }
        });

        recorder
    }
}

/// Handle keep-alive requests on one connection until the peer goes away.
async fn serve<S>(
    mut stream: S,
    recorder: Recorder,
    responses: Arc<Vec<Vec<u8>>>,
    served: Arc<AtomicUsize>,
    limit: Option<usize>,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut buf = Vec::new();
    let mut answered = 0;
    loop {
        let request = match timeout(Duration::from_secs(10), read_request(&mut stream, &mut buf)).await {
            Ok(Some(request)) => request,
            _ => return,
        };
        recorder.requests.lock().unwrap().push(request);
        if limit.is_some_and(|n| answered >= n) {
            let _ = stream.shutdown().await;
            return;
        }
        answered += 1;

        let index = served.fetch_add(1, Ordering::SeqCst).min(responses.len() - 1);
        let response = &responses[index];
        if stream.write_all(response).await.is_err() || stream.flush().await.is_err() {
            return;
        }
        let closing = String::from_utf8_lossy(response)
            .to_ascii_lowercase()
            .contains("connection: close");
        if closing {
            let _ = stream.shutdown().await;
            return;
        }
    }
}

async fn read_request<S>(stream: &mut S, buf: &mut Vec<u8>) -> Option<RecordedRequest>
where
    S: AsyncRead + Unpin,
{
    let mut chunk = [0u8; 4096];
    loop {
        let mut headers = [httparse::EMPTY_HEADER; 64];
        let mut parsed = httparse::Request::new(&mut headers);
        if let Ok(httparse::Status::Complete(head_len)) = parsed.parse(buf) {
            let mut request = RecordedRequest {
                method: parsed.method.unwrap_or_default().to_string(),
                target: parsed.path.unwrap_or_default().to_string(),
                headers: parsed
                    .headers
                    .iter()
                    .map(|h| (h.name.to_string(), String::from_utf8_lossy(h.value).into_owned()))
                    .collect(),
                body: Vec::new(),
            };
            let body_len: usize = request
                .header("content-length")
                .and_then(|v| v.parse().ok())
                .unwrap_or(0);

            while buf.len() < head_len + body_len {
                let n = stream.read(&mut chunk).await.ok()?;
                if n == 0 {
                    return None;
                }
                buf.extend_from_slice(&chunk[..n]);
            }
            request.body = buf[head_len..head_len + body_len].to_vec();
            buf.drain(..head_len + body_len);
            return Some(request);
        }

        let n = stream.read(&mut chunk).await.ok()?;
        if n == 0 {
            return None;
        }
        buf.extend_from_slice(&chunk[..n]);
    }
}
