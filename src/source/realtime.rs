//! Realtime source: a persistent subscription to the local daemon's
//! notification bus, reconciled into a per-instance cache.
//!
//! Mirrors the reconnect/backoff shape of a long-lived bus client (see
//! `forwarder::uplink::UplinkSession` in the teacher crate) but the
//! protocol here is Sentinel's own: a watcher yields [`NotifyFrame`]s with
//! independently-present fields, and only a frame that changes the cache
//! after at least one `netmap` frame has been seen causes `poll` to return.

use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::netmap::{Netmap, Prefs};

use super::{NetmapFramePayload, SourceError, interruptible_sleep};

#[derive(Debug, thiserror::Error)]
pub enum WatcherError {
    #[error("connect: {0}")]
    Connect(String),
    #[error("read: {0}")]
    Read(String),
    #[error("cancelled")]
    Cancelled,
}

/// One frame off the notification bus. Every field is independently
/// optional; a frame may carry any combination of them, or none at all.
#[derive(Debug, Clone, Default)]
pub struct NotifyFrame {
    pub state: Option<String>,
    pub prefs: Option<Prefs>,
    pub netmap: Option<NetmapFramePayload>,
    pub engine_update: bool,
    pub error_message: Option<String>,
}

/// A single open subscription to the bus. Exclusively owned by the
/// [`RealtimeSource`] that opened it; dropped and reopened on any read
/// failure.
pub trait Watcher: Send {
    fn next(
        &mut self,
        cancel: &CancellationToken,
    ) -> impl Future<Output = Result<NotifyFrame, WatcherError>> + Send;
}

/// Opens a new [`Watcher`], subscribing for initial state/prefs/netmap plus
/// ongoing engine updates.
pub trait WatcherFactory: Send + Sync {
    type Watcher: Watcher;

    fn open(&self) -> impl Future<Output = Result<Self::Watcher, WatcherError>> + Send;
}

#[derive(Debug, Clone)]
pub struct RealtimeConfig {
    pub reconnect_min: Duration,
    pub reconnect_max: Duration,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        RealtimeConfig { reconnect_min: Duration::from_millis(500), reconnect_max: Duration::from_secs(30) }
    }
}

/// Maintains the persistent cache and `ready` flag described in the source
/// contract, reconnecting the underlying watcher on read failure with
/// doubling backoff.
pub struct RealtimeSource<W: WatcherFactory> {
    factory: W,
    cfg: RealtimeConfig,
    watcher: Option<W::Watcher>,
    cache: Netmap,
    ready: bool,
    backoff: Duration,
}

impl<W: WatcherFactory> RealtimeSource<W> {
    pub fn new(factory: W, cfg: RealtimeConfig) -> Self {
        let backoff = cfg.reconnect_min;
        RealtimeSource { factory, cfg, watcher: None, cache: Netmap::default(), ready: false, backoff }
    }

    pub async fn poll(&mut self, cancel: &CancellationToken) -> Result<Netmap, SourceError> {
        loop {
            if cancel.is_cancelled() {
                return Err(SourceError::Cancelled);
            }

            if self.watcher.is_none() {
                match self.factory.open().await {
                    Ok(w) => self.watcher = Some(w),
                    Err(e) => {
                        warn!(error = %e, "realtime watcher open failed");
                        self.backoff_sleep(cancel).await?;
                        continue;
                    }
                }
            }

            let frame = {
                let watcher = self.watcher.as_mut().expect("watcher ensured above");
                watcher.next(cancel).await
            };

            let frame = match frame {
                Ok(f) => f,
                Err(WatcherError::Cancelled) => return Err(SourceError::Cancelled),
                Err(e) => {
                    warn!(error = %e, "realtime watcher read failed, reconnecting");
                    self.watcher = None;
                    self.backoff_sleep(cancel).await?;
                    continue;
                }
            };

            self.backoff = self.cfg.reconnect_min;

            debug!(
                has_state = frame.state.is_some(),
                has_prefs = frame.prefs.is_some(),
                has_netmap = frame.netmap.is_some(),
                has_engine = frame.engine_update,
                has_error_message = frame.error_message.is_some(),
                "notify frame received"
            );

            if self.apply(frame) && self.ready {
                return Ok(self.cache.clone());
            }
        }
    }

    async fn backoff_sleep(&mut self, cancel: &CancellationToken) -> Result<(), SourceError> {
        let wait = self.backoff;
        self.backoff = std::cmp::min(self.backoff * 2, self.cfg.reconnect_max);
        interruptible_sleep(wait, cancel).await
    }

    /// Merges one frame into the cache, returning whether anything changed.
    fn apply(&mut self, frame: NotifyFrame) -> bool {
        let mut changed = false;

        if let Some(state) = frame.state {
            if self.cache.daemon_state != state {
                changed = true;
            }
            self.cache.daemon_state = state;
        }

        if let Some(mut prefs) = frame.prefs {
            prefs.advertise_routes.sort();
            if self.cache.prefs != prefs {
                changed = true;
            }
            self.cache.prefs = prefs;
        }

        if let Some(error_message) = frame.error_message {
            if self.cache.last_error_text != error_message {
                changed = true;
            }
            self.cache.last_error_text = error_message;
        }

        if let Some(payload) = frame.netmap {
            if self.cache.peers != payload.peers || self.cache.tailnet != payload.tailnet {
                changed = true;
            }
            self.cache.peers = payload.peers;
            self.cache.tailnet = payload.tailnet;
            self.ready = true;
        }

        changed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::netmap::{Peer, Tailnet};
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Replays a fixed, ordered sequence of frames/errors. Each `open()`
    /// call hands out the next watcher's worth of scripted reads.
    struct ScriptedFactory {
        watchers: Mutex<VecDeque<VecDeque<Result<NotifyFrame, WatcherError>>>>,
        opens: std::sync::Arc<std::sync::atomic::AtomicUsize>,
    }

    struct ScriptedWatcher {
        reads: VecDeque<Result<NotifyFrame, WatcherError>>,
    }

    impl Watcher for ScriptedWatcher {
        async fn next(&mut self, _cancel: &CancellationToken) -> Result<NotifyFrame, WatcherError> {
            self.reads.pop_front().unwrap_or(Err(WatcherError::Read("exhausted".into())))
        }
    }

    impl WatcherFactory for ScriptedFactory {
        type Watcher = ScriptedWatcher;

        async fn open(&self) -> Result<Self::Watcher, WatcherError> {
            self.opens.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            let reads = self.watchers.lock().unwrap().pop_front().ok_or(WatcherError::Connect("no more watchers".into()))?;
            Ok(ScriptedWatcher { reads })
        }
    }

    fn netmap_frame(peer_id: &str, online: bool) -> NotifyFrame {
        NotifyFrame {
            netmap: Some(NetmapFramePayload {
                peers: vec![Peer {
                    id: peer_id.to_string(),
                    name: peer_id.to_string(),
                    online,
                    tags: vec![],
                    routes: vec![],
                    machine_authorized: false,
                    expired: false,
                    key_expiry: String::new(),
                    hostinfo_hash: String::new(),
                    metadata: Default::default(),
                }],
                tailnet: Tailnet::default(),
            }),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn non_netmap_frames_before_ready_do_not_return() {
        let factory = ScriptedFactory {
            opens: std::sync::Arc::new(0.into()),
            watchers: Mutex::new(VecDeque::from([VecDeque::from([
                Ok(NotifyFrame { state: Some("Running".into()), ..Default::default() }),
                Ok(netmap_frame("peer1", true)),
            ])])),
        };
        let mut source = RealtimeSource::new(factory, RealtimeConfig::default());
        let cancel = CancellationToken::new();
        let nm = source.poll(&cancel).await.unwrap();
        assert_eq!(nm.peers.len(), 1);
        assert_eq!(nm.peers[0].id, "peer1");
    }

    #[tokio::test]
    async fn frame_with_no_recognized_fields_is_skipped() {
        let factory = ScriptedFactory {
            opens: std::sync::Arc::new(0.into()),
            watchers: Mutex::new(VecDeque::from([VecDeque::from([
                Ok(NotifyFrame::default()),
                Ok(netmap_frame("peer1", true)),
            ])])),
        };
        let mut source = RealtimeSource::new(factory, RealtimeConfig::default());
        let cancel = CancellationToken::new();
        let nm = source.poll(&cancel).await.unwrap();
        assert_eq!(nm.peers[0].id, "peer1");
    }

    #[tokio::test]
    async fn reconnect_recovers_onto_a_second_watcher() {
        let opens = std::sync::Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let factory = ScriptedFactory {
            opens: opens.clone(),
            watchers: Mutex::new(VecDeque::from([
                VecDeque::from([Err(WatcherError::Read("reset".into()))]),
                VecDeque::from([Ok(netmap_frame("peer-recover", true))]),
            ])),
        };
        let mut source = RealtimeSource::new(factory, RealtimeConfig { reconnect_min: Duration::from_millis(1), reconnect_max: Duration::from_millis(5) });
        let cancel = CancellationToken::new();
        let nm = source.poll(&cancel).await.unwrap();
        assert_eq!(nm.peers[0].id, "peer-recover");
        assert_eq!(opens.load(std::sync::atomic::Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn returned_netmap_is_an_independent_copy() {
        let factory = ScriptedFactory {
            opens: std::sync::Arc::new(0.into()),
            watchers: Mutex::new(VecDeque::from([VecDeque::from([Ok(netmap_frame("peer1", true))])])),
        };
        let mut source = RealtimeSource::new(factory, RealtimeConfig::default());
        let cancel = CancellationToken::new();
        let mut nm = source.poll(&cancel).await.unwrap();
        nm.peers[0].online = false;
        assert!(source.cache.peers[0].online);
    }
}
