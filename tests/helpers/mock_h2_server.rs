use std::convert::Infallible;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use boring::ssl::SslAcceptor;
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper_util::rt::{TokioExecutor, TokioIo};
use tokio::net::TcpListener;

/// A request as the HTTP/2 server decoded it.
#[derive(Debug, Clone)]
pub struct RecordedH2Request {
    pub method: String,
    pub authority: String,
    pub path: String,
    pub headers: http::HeaderMap,
    pub body: Bytes,
}

/// hyper HTTP/2 server behind a boring TLS acceptor. Every request gets
/// `200 OK` with body `hello h2`.
pub struct MockH2Server {
    listener: TcpListener,
    port: u16,
    accepted: Arc<AtomicUsize>,
}

impl MockH2Server {
    pub async fn new() -> std::io::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let port = listener.local_addr()?.port();
        Ok(Self {
            listener,
            port,
            accepted: Arc::new(AtomicUsize::new(0)),
        })
    }

    pub fn url_tls(&self) -> String {
        format!("https://127.0.0.1:{}", self.port)
    }

    /// Counts accepted TCP connections once the server is started.
    pub fn accepted(&self) -> Arc<AtomicUsize> {
        self.accepted.clone()
    }

    /// Serve in the background; the returned list fills as requests arrive.
    pub fn start_tls(self, acceptor: SslAcceptor) -> Arc<Mutex<Vec<RecordedH2Request>>> {
        let recorded = Arc::new(Mutex::new(Vec::new()));
        let acceptor = Arc::new(acceptor);
        let listener = self.listener;
        let shared = recorded.clone();
        let accepted = self.accepted;

        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                accepted.fetch_add(1, Ordering::SeqCst);
                let acceptor = acceptor.clone();
                let recorded = shared.clone();
                tokio::spawn(async move {
                    let tls = match tokio_boring::accept(&acceptor, stream).await {
                        Ok(tls) => tls,
                        Err(e) => {
                            tracing::debug!("mock h2 TLS accept failed: {}", e);
                            return;
                        }
                    };
                    let service = service_fn(move |req: http::Request<Incoming>| {
                        let recorded = recorded.clone();
                        async move {
                            let (parts, body) = req.into_parts();
                            let body = body.collect().await.map(|b| b.to_bytes()).unwrap_or_default();
                            recorded.lock().unwrap().push(RecordedH2Request {
                                method: parts.method.to_string(),
                                authority: parts
                                    .uri
                                    .authority()
                                    .map(|a| a.to_string())
                                    .unwrap_or_default(),
                                path: parts
                                    .uri
                                    .path_and_query()
                                    .map(|pq| pq.to_string())
                                    .unwrap_or_default(),
                                headers: parts.headers,
                                body,
                            });
                            Ok::<_, Infallible>(http::Response::new(Full::new(Bytes::from_static(
                                b"hello h2",
                            ))))
                        }
                    });
                    if let Err(e) = hyper::server::conn::http2::Builder::new(TokioExecutor::new())
                        .serve_connection(TokioIo::new(tls), service)
                        .await
                    {
                        tracing::debug!("mock h2 connection ended: {}", e);
                    }
                });
            }
        });

        recorded
    }
}
