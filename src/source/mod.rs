//! Streaming observer of overlay-network state: produces a [`Netmap`] on
//! each call to `poll`. Two variants share one contract — a one-shot status
//! fetch (`poll`) and a persistent bus subscription (`realtime`) — so the
//! Runner can swap between them by configuration alone.

mod local_api;
mod poll;
mod realtime;

use tokio_util::sync::CancellationToken;

use crate::netmap::{Netmap, Tailnet};

pub use local_api::{LocalApiFetcher, LocalApiWatcherFactory};
pub use poll::{Fetch, PollSource};
pub use realtime::{NotifyFrame, RealtimeConfig, RealtimeSource, Watcher, WatcherError, WatcherFactory};

#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("cancelled")]
    Cancelled,
    #[error("source unavailable: {0}")]
    Unavailable(String),
}

/// The decoded payload of a bus `netmap` frame: enough to rebuild the peer
/// list and tailnet-wide fields of the cache.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NetmapFramePayload {
    pub peers: Vec<crate::netmap::Peer>,
    pub tailnet: Tailnet,
}

/// The two ways Sentinel can observe the overlay, behind one contract.
/// Modeled as a closed variant set (see [`crate::notify::Sink`]) rather than
/// a trait object, parameterized over the concrete fetcher/watcher-factory so
/// tests can swap in a fake without reaching for `dyn`. Deployment code never
/// names the type parameters: they default to the real local-API client.
pub enum AnySource<F: Fetch = LocalApiFetcher, W: WatcherFactory = LocalApiWatcherFactory> {
    Poll(PollSource<F>),
    Realtime(RealtimeSource<W>),
}

impl<F: Fetch, W: WatcherFactory> AnySource<F, W> {
    pub async fn poll(&mut self, cancel: &CancellationToken) -> Result<Netmap, SourceError> {
        match self {
            AnySource::Poll(s) => s.poll(cancel).await,
            AnySource::Realtime(s) => s.poll(cancel).await,
        }
    }
}

/// Sleeps for `dur`, returning early with [`SourceError::Cancelled`] if
/// `cancel` fires first. Shared by both source variants' backoff waits.
pub(crate) async fn interruptible_sleep(
    dur: std::time::Duration,
    cancel: &CancellationToken,
) -> Result<(), SourceError> {
    tokio::select! {
        () = cancel.cancelled() => Err(SourceError::Cancelled),
        () = tokio::time::sleep(dur) => Ok(()),
    }
}
