use std::sync::{Arc, Mutex};

use tokio::io::{copy_bidirectional, AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

/// Request line and headers of something sent to the proxy.
#[derive(Debug, Clone)]
pub struct ProxiedRequest {
    pub method: String,
    pub target: String,
    pub headers: Vec<(String, String)>,
}

impl ProxiedRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Forward proxy: `CONNECT` opens a real tunnel, any other method is
/// answered directly with `200 proxied`. With `reject_connect` every
/// `CONNECT` gets `407`.
pub struct MockProxy {
    listener: TcpListener,
    port: u16,
    reject_connect: bool,
}

impl MockProxy {
    pub async fn new() -> std::io::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let port = listener.local_addr()?.port();
        Ok(Self {
            listener,
            port,
            reject_connect: false,
        })
    }

    pub fn reject_connect(mut self) -> Self {
        self.reject_connect = true;
        self
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn start(self) -> Arc<Mutex<Vec<ProxiedRequest>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let shared = seen.clone();
        let reject = self.reject_connect;
        let listener = self.listener;

        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let seen = shared.clone();
                tokio::spawn(async move {
                    let _ = handle(stream, seen, reject).await;
                });
            }
        });

        seen
    }
}

async fn handle(
    mut client: TcpStream,
    seen: Arc<Mutex<Vec<ProxiedRequest>>>,
    reject_connect: bool,
) -> std::io::Result<()> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    let request = loop {
        let n = client.read(&mut chunk).await?;
        if n == 0 {
            return Ok(());
        }
        buf.extend_from_slice(&chunk[..n]);

        let mut headers = [httparse::EMPTY_HEADER; 64];
        let mut parsed = httparse::Request::new(&mut headers);
        if let Ok(httparse::Status::Complete(_)) = parsed.parse(&buf) {
            break ProxiedRequest {
                method: parsed.method.unwrap_or_default().to_string(),
                target: parsed.path.unwrap_or_default().to_string(),
                headers: parsed
                    .headers
                    .iter()
                    .map(|h| (h.name.to_string(), String::from_utf8_lossy(h.value).into_owned()))
                    .collect(),
            };
        }
    };
    seen.lock().unwrap().push(request.clone());

    if request.method != "CONNECT" {
        client
            .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 7\r\nConnection: close\r\n\r\nproxied")
            .await?;
        return client.shutdown().await;
    }

    if reject_connect {
        client
            .write_all(b"HTTP/1.1 407 Proxy Authentication Required\r\nContent-Length: 0\r\n\r\n")
            .await?;
        return client.shutdown().await;
    }

    let mut upstream = TcpStream::connect(request.target.as_str()).await?;
    client
        .write_all(b"HTTP/1.1 200 Connection established\r\n\r\n")
        .await?;
    copy_bidirectional(&mut client, &mut upstream).await?;
    Ok(())
}
