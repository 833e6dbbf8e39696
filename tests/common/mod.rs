//! Shared utilities for integration tests.
#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use audit_gateway::config::{GatewayConfig, ProxyMode};
use audit_gateway::gateway::Gateway;
use audit_gateway::http::HttpServer;
use audit_gateway::lifecycle::Shutdown;
use audit_gateway::net::Listener;
use audit_gateway::record::sink::MemorySink;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpListener;

/// What a mock server answers with.
#[derive(Debug, Clone)]
pub struct Reply {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl Reply {
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: body.into(),
        }
    }

    pub fn json(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self::new(status, body).header("Content-Type", "application/json")
    }

    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    fn to_bytes(&self) -> Vec<u8> {
        let reason = match self.status {
            200 => "OK",
            401 => "Unauthorized",
            403 => "Forbidden",
            500 => "Internal Server Error",
            _ => "Status",
        };
        let mut head = format!(
            "HTTP/1.1 {} {}\r\nContent-Length: {}\r\nConnection: close\r\n",
            self.status,
            reason,
            self.body.len()
        );
        for (name, value) in &self.headers {
            head.push_str(&format!("{name}: {value}\r\n"));
        }
        head.push_str("\r\n");
        let mut bytes = head.into_bytes();
        bytes.extend_from_slice(&self.body);
        bytes
    }
}

/// A raw-TCP HTTP/1.1 server answering every request with one reply.
#[derive(Clone)]
pub struct MockServer {
    pub addr: SocketAddr,
    hits: Arc<AtomicUsize>,
    requests: Arc<Mutex<Vec<String>>>,
}

impl MockServer {
    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }

    /// Raw request text (head and body) of every request seen.
    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }
}

/// Start a mock server on an ephemeral port.
pub async fn start_mock_server(reply: Reply) -> MockServer {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let server = MockServer {
        addr: listener.local_addr().unwrap(),
        hits: Arc::new(AtomicUsize::new(0)),
        requests: Arc::new(Mutex::new(Vec::new())),
    };

    let state = server.clone();
    tokio::spawn(async move {
        while let Ok((socket, _)) = listener.accept().await {
            let state = state.clone();
            let reply = reply.clone();
            tokio::spawn(async move { state.answer(socket, &reply).await });
        }
    });
    server
}

impl MockServer {
    pub async fn answer<S>(&self, mut socket: S, reply: &Reply)
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let Some(request) = read_request(&mut socket).await else {
            return;
        };
        self.hits.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(request);

        let _ = socket.write_all(&reply.to_bytes()).await;
        let _ = socket.shutdown().await;
    }
}

/// Read one request: the head, then `Content-Length` bytes of body.
pub async fn read_request<S: AsyncRead + Unpin>(socket: &mut S) -> Option<String> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    let head_end = loop {
        if let Some(pos) = find(&buf, b"\r\n\r\n") {
            break pos + 4;
        }
        let n = socket.read(&mut chunk).await.ok()?;
        if n == 0 {
            return None;
        }
        buf.extend_from_slice(&chunk[..n]);
    };

    let head = String::from_utf8_lossy(&buf[..head_end]).to_string();
    let length = head
        .lines()
        .filter_map(|line| line.split_once(':'))
        .find(|(name, _)| name.trim().eq_ignore_ascii_case("content-length"))
        .and_then(|(_, value)| value.trim().parse::<usize>().ok())
        .unwrap_or(0);

    while buf.len() < head_end + length {
        let n = socket.read(&mut chunk).await.ok()?;
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
    }
    Some(String::from_utf8_lossy(&buf).to_string())
}

/// Read a response head (status line and headers) from a raw stream.
pub async fn read_head<S: AsyncRead + Unpin>(socket: &mut S) -> String {
    let mut buf = Vec::new();
    let mut byte = [0u8; 1];
    while find(&buf, b"\r\n\r\n").is_none() {
        match socket.read(&mut byte).await {
            Ok(1) => buf.push(byte[0]),
            _ => break,
        }
    }
    String::from_utf8_lossy(&buf).to_string()
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

/// A gateway serving on an ephemeral port with an in-memory record sink.
pub struct TestGateway {
    pub addr: SocketAddr,
    pub sink: Arc<MemorySink>,
    pub gateway: Arc<Gateway>,
    pub shutdown: Shutdown,
}

impl TestGateway {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    /// Wait until at least `n` records were published.
    pub async fn records(&self, n: usize) -> Vec<serde_json::Value> {
        for _ in 0..250 {
            if self.sink.len() >= n {
                return self.sink.records();
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("expected {n} records, got {}", self.sink.len());
    }
}

impl Drop for TestGateway {
    fn drop(&mut self) {
        self.shutdown.trigger();
    }
}

pub fn reverse_config(upstream: &str) -> GatewayConfig {
    let mut config = GatewayConfig::default();
    config.gateway.upstream = upstream.to_string();
    config.timeouts.dial_ms = 2_000;
    config
}

pub fn forward_config() -> GatewayConfig {
    let mut config = GatewayConfig::default();
    config.gateway.mode = ProxyMode::Forward;
    config.gateway.insecure_skip_verify = true;
    config.timeouts.dial_ms = 2_000;
    config
}

pub async fn spawn_gateway(config: GatewayConfig) -> TestGateway {
    let sink = Arc::new(MemorySink::new());
    let gateway = Gateway::builder(config)
        .sink(sink.clone())
        .build()
        .expect("gateway builds");
    let server = HttpServer::with_gateway(gateway, None, Duration::from_secs(1));
    let gateway = server.gateway();

    let tcp = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = tcp.local_addr().unwrap();
    let listener = Listener::from_listener(tcp, 64).unwrap();

    let shutdown = Shutdown::new();
    let stop = shutdown.clone();
    tokio::spawn(async move {
        let _ = server.run(listener, stop).await;
    });

    TestGateway {
        addr,
        sink,
        gateway,
        shutdown,
    }
}

/// reqwest client that never uses an environment proxy.
pub fn http_client() -> reqwest::Client {
    reqwest::Client::builder()
        .no_proxy()
        .timeout(Duration::from_secs(10))
        .build()
        .unwrap()
}

/// Like [`start_mock_server`] but over TLS, presenting a self-signed leaf
/// for 127.0.0.1.
pub async fn start_tls_mock_server(reply: Reply) -> MockServer {
    use audit_gateway::certs::{CertProfiles, LeafSigner};
    use audit_gateway::net::tls::leaf_server_config;

    let signer = LeafSigner::new(CertProfiles::default(), "default", None);
    let config = leaf_server_config(signer.leaf("127.0.0.1").unwrap()).unwrap();
    let acceptor = tokio_rustls::TlsAcceptor::from(config);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let server = MockServer {
        addr: listener.local_addr().unwrap(),
        hits: Arc::new(AtomicUsize::new(0)),
        requests: Arc::new(Mutex::new(Vec::new())),
    };

    let state = server.clone();
    tokio::spawn(async move {
        while let Ok((socket, _)) = listener.accept().await {
            let state = state.clone();
            let reply = reply.clone();
            let acceptor = acceptor.clone();
            tokio::spawn(async move {
                if let Ok(tls) = acceptor.accept(socket).await {
                    state.answer(tls, &reply).await;
                }
            });
        }
    });
    server
}

/// A raw-TCP server running `handler` for every accepted connection, for
/// upstreams whose framing a fixed [`Reply`] cannot express.
pub async fn start_raw_server<F, Fut>(handler: F) -> SocketAddr
where
    F: Fn(tokio::net::TcpStream) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = ()> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        while let Ok((socket, _)) = listener.accept().await {
            tokio::spawn(handler(socket));
        }
    });
    addr
}
