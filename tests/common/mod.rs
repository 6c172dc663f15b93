//! Shared fixtures for crate-level integration tests: a static `Fetch`
//! source and a minimal raw-HTTP stub server, grounded in the teacher's own
//! low-tech integration-test style (`services/forwarder/tests/*.rs` talks
//! raw HTTP over a `tokio::net::TcpListener` rather than pulling in a mock
//! framework for every test).

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use sentinel::netmap::Netmap;
use sentinel::source::SourceError;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

/// A [`sentinel::source::Fetch`] that always returns a fixed [`Netmap`],
/// swappable between `poll` calls via an `Arc<Mutex<_>>` so a test can
/// simulate the overlay changing between cycles.
#[derive(Clone)]
pub struct StaticFetcher(pub Arc<Mutex<Netmap>>);

impl StaticFetcher {
    pub fn new(nm: Netmap) -> Self {
        StaticFetcher(Arc::new(Mutex::new(nm)))
    }

    pub fn set(&self, nm: Netmap) {
        *self.0.lock().unwrap() = nm;
    }
}

impl sentinel::source::Fetch for StaticFetcher {
    async fn fetch(&self, _cancel: &CancellationToken) -> Result<Netmap, SourceError> {
        Ok(self.0.lock().unwrap().clone())
    }
}

#[derive(Debug, Clone)]
pub struct CapturedRequest {
    pub path: String,
    pub headers: HashMap<String, String>,
    pub body: String,
}

/// Starts a one-shot-per-connection raw HTTP server on `127.0.0.1:0` that
/// always replies `204 No Content`, recording every request it receives.
/// Returns the bound address and the shared log.
pub async fn spawn_http_stub() -> (std::net::SocketAddr, Arc<Mutex<Vec<CapturedRequest>>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind stub listener");
    let addr = listener.local_addr().expect("local_addr");
    let log: Arc<Mutex<Vec<CapturedRequest>>> = Arc::new(Mutex::new(Vec::new()));
    let log_for_task = log.clone();

    tokio::spawn(async move {
        loop {
            let Ok((mut stream, _)) = listener.accept().await else { break };
            let log = log_for_task.clone();
            tokio::spawn(async move {
                let mut buf = vec![0u8; 8192];
                let Ok(n) = stream.read(&mut buf).await else { return };
                let text = String::from_utf8_lossy(&buf[..n]).to_string();
                let mut lines = text.split("\r\n");
                let request_line = lines.next().unwrap_or_default();
                let path = request_line.split_whitespace().nth(1).unwrap_or("/").to_string();

                let mut headers = HashMap::new();
                let mut body = String::new();
                let mut in_body = false;
                for line in lines {
                    if in_body {
                        body.push_str(line);
                        continue;
                    }
                    if line.is_empty() {
                        in_body = true;
                        continue;
                    }
                    if let Some((k, v)) = line.split_once(": ") {
                        headers.insert(k.to_ascii_lowercase(), v.to_string());
                    }
                }

                log.lock().unwrap().push(CapturedRequest { path, headers, body });

                let _ = stream.write_all(b"HTTP/1.1 204 No Content\r\nContent-Length: 0\r\nConnection: close\r\n\r\n").await;
            });
        }
    });

    (addr, log)
}
