//! Concrete local-daemon client: a `reqwest`-based one-shot status fetch
//! for poll mode, and a `tokio-tungstenite` bus subscription for realtime
//! mode. Stands in for the real overlay daemon's status/notify API behind
//! the same [`Fetch`]/[`Watcher`] contracts the generic source types use.

use std::time::Duration;

use futures_util::StreamExt;
use serde::Deserialize;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_util::sync::CancellationToken;

use crate::netmap::{Netmap, Tailnet};

use super::realtime::{NotifyFrame, Watcher, WatcherError, WatcherFactory};
use super::{NetmapFramePayload, SourceError};
use super::poll::Fetch;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Fetches `{base_url}/status` once per call and decodes it as a [`Netmap`].
pub struct LocalApiFetcher {
    base_url: String,
    client: reqwest::Client,
}

impl LocalApiFetcher {
    pub fn new(base_url: impl Into<String>) -> Self {
        LocalApiFetcher {
            base_url: base_url.into(),
            client: reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build().unwrap_or_default(),
        }
    }
}

impl Fetch for LocalApiFetcher {
    async fn fetch(&self, _cancel: &CancellationToken) -> Result<Netmap, SourceError> {
        let url = format!("{}/status", self.base_url.trim_end_matches('/'));
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| SourceError::Unavailable(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(SourceError::Unavailable(format!("status endpoint returned {}", resp.status())));
        }
        resp.json::<Netmap>().await.map_err(|e| SourceError::Unavailable(e.to_string()))
    }
}

#[derive(Debug, Deserialize)]
struct WireNotifyFrame {
    #[serde(default)]
    state: Option<String>,
    #[serde(default)]
    prefs: Option<crate::netmap::Prefs>,
    #[serde(default)]
    netmap: Option<WireNetmapPayload>,
    #[serde(default)]
    engine: Option<serde_json::Value>,
    #[serde(default)]
    error_message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireNetmapPayload {
    #[serde(default)]
    peers: Vec<crate::netmap::Peer>,
    #[serde(default)]
    tailnet: Tailnet,
}

impl From<WireNotifyFrame> for NotifyFrame {
    fn from(w: WireNotifyFrame) -> Self {
        NotifyFrame {
            state: w.state,
            prefs: w.prefs,
            netmap: w.netmap.map(|p| NetmapFramePayload { peers: p.peers, tailnet: p.tailnet }),
            engine_update: w.engine.is_some(),
            error_message: w.error_message,
        }
    }
}

/// Opens a WebSocket connection to `{ws_url}/watch` per subscription.
pub struct LocalApiWatcherFactory {
    ws_url: String,
}

impl LocalApiWatcherFactory {
    pub fn new(ws_url: impl Into<String>) -> Self {
        LocalApiWatcherFactory { ws_url: ws_url.into() }
    }
}

impl WatcherFactory for LocalApiWatcherFactory {
    type Watcher = LocalApiWatcher;

    async fn open(&self) -> Result<Self::Watcher, WatcherError> {
        let url = format!("{}/watch", self.ws_url.trim_end_matches('/'));
        let (ws, _response) = tokio_tungstenite::connect_async(url)
            .await
            .map_err(|e| WatcherError::Connect(e.to_string()))?;
        Ok(LocalApiWatcher { ws })
    }
}

type WsStream = tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

pub struct LocalApiWatcher {
    ws: WsStream,
}

impl Watcher for LocalApiWatcher {
    async fn next(&mut self, cancel: &CancellationToken) -> Result<NotifyFrame, WatcherError> {
        loop {
            let msg = tokio::select! {
                () = cancel.cancelled() => return Err(WatcherError::Cancelled),
                msg = self.ws.next() => msg,
            };
            match msg {
                None => return Err(WatcherError::Read("connection closed".into())),
                Some(Err(e)) => return Err(WatcherError::Read(e.to_string())),
                Some(Ok(Message::Text(text))) => {
                    let wire: WireNotifyFrame =
                        serde_json::from_str(&text).map_err(|e| WatcherError::Read(format!("decode: {e}")))?;
                    return Ok(wire.into());
                }
                Some(Ok(Message::Close(_))) => return Err(WatcherError::Read("connection closed".into())),
                Some(Ok(Message::Ping(_) | Message::Pong(_))) => continue,
                Some(Ok(_)) => continue,
            }
        }
    }
}
