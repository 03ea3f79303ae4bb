//! Shared utilities for integration testing.

#![allow(dead_code)]

use std::future::Future;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use fragment_gateway::config::GatewayConfig;
use fragment_gateway::lifecycle::{Gateway, Shutdown, StartupError};
use fragment_gateway::routing::Reloader;

/// Start a mock backend that returns a fixed JSON body on an ephemeral port.
pub async fn start_mock_backend(response: &'static str) -> SocketAddr {
    start_programmable_backend(move |_path| async move { (200, response.to_string()) }).await
}

/// Start a programmable mock backend. The handler sees the request path.
pub async fn start_programmable_backend<F, Fut>(f: F) -> SocketAddr
where
    F: Fn(String) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = (u16, String)> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let f = Arc::new(f);

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            let f = f.clone();
            tokio::spawn(async move {
                let mut buf = vec![0u8; 8192];
                let n = socket.read(&mut buf).await.unwrap_or(0);
                let head = String::from_utf8_lossy(&buf[..n]);
                let path = head
                    .lines()
                    .next()
                    .and_then(|line| line.split_whitespace().nth(1))
                    .unwrap_or("/")
                    .to_string();

                let (status, body) = f(path).await;
                let status_text = match status {
                    200 => "200 OK",
                    404 => "404 Not Found",
                    500 => "500 Internal Server Error",
                    502 => "502 Bad Gateway",
                    503 => "503 Service Unavailable",
                    _ => "200 OK",
                };

                let response = format!(
                    "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    status_text,
                    body.len(),
                    body
                );
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            });
        }
    });

    addr
}

/// A temporary fragment directory, removed on drop.
pub struct FragmentDir {
    path: PathBuf,
}

impl FragmentDir {
    pub fn new() -> Self {
        let path = std::env::temp_dir().join(format!("gateway-it-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&path).unwrap();
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn write(&self, name: &str, content: &str) {
        std::fs::write(self.path.join(name), content).unwrap();
    }

    pub fn remove(&self, name: &str) {
        std::fs::remove_file(self.path.join(name)).unwrap();
    }
}

impl Drop for FragmentDir {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.path);
    }
}

/// A gateway serving from a [`FragmentDir`] on an ephemeral port.
pub struct TestGateway {
    pub addr: SocketAddr,
    pub dir: FragmentDir,
    pub reloader: Arc<Reloader>,
    pub shutdown: Shutdown,
    handle: JoinHandle<Result<(), StartupError>>,
}

impl TestGateway {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub async fn stop(self) {
        self.shutdown.trigger();
        let _ = tokio::time::timeout(Duration::from_secs(5), self.handle).await;
    }
}

/// Write `fragments` into a fresh directory and start a gateway over it.
pub async fn start_gateway(fragments: &[(&str, &str)]) -> TestGateway {
    let dir = FragmentDir::new();
    for (name, content) in fragments {
        dir.write(name, content);
    }

    let mut config = GatewayConfig::default();
    config.fragments.directory = dir.path().to_string_lossy().into_owned();
    config.fragments.debounce_ms = 50;
    config.fragments.poll_interval_secs = 1;

    let gateway = Gateway::bootstrap(config).await.unwrap();
    let reloader = Arc::clone(gateway.reloader());
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let shutdown = Shutdown::new();
    let serve_shutdown = shutdown.clone();
    let handle = tokio::spawn(async move { gateway.serve(listener, &serve_shutdown).await });

    TestGateway {
        addr,
        dir,
        reloader,
        shutdown,
        handle,
    }
}

/// Poll `check` every 50ms until it holds or `limit` passes.
pub async fn eventually<F, Fut>(limit: Duration, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + limit;
    while tokio::time::Instant::now() < deadline {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    false
}
