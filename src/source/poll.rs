//! One-shot polling source: fetches current overlay state and returns.

use tokio_util::sync::CancellationToken;

use crate::netmap::Netmap;

use super::SourceError;

/// A one-shot status fetch against the local daemon.
pub trait Fetch: Send + Sync {
    fn fetch(
        &self,
        cancel: &CancellationToken,
    ) -> impl Future<Output = Result<Netmap, SourceError>> + Send;
}

/// Wraps a [`Fetch`] implementation with the common `poll` contract. Holds
/// no state of its own — every call is an independent round trip.
pub struct PollSource<F: Fetch> {
    fetcher: F,
}

impl<F: Fetch> PollSource<F> {
    pub fn new(fetcher: F) -> Self {
        PollSource { fetcher }
    }

    pub async fn poll(&mut self, cancel: &CancellationToken) -> Result<Netmap, SourceError> {
        if cancel.is_cancelled() {
            return Err(SourceError::Cancelled);
        }
        self.fetcher.fetch(cancel).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct CountingFetcher {
        calls: Arc<AtomicUsize>,
    }

    impl Fetch for CountingFetcher {
        async fn fetch(&self, _cancel: &CancellationToken) -> Result<Netmap, SourceError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(Netmap::default())
        }
    }

    #[tokio::test]
    async fn poll_calls_fetch_once_per_invocation() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut source = PollSource::new(CountingFetcher { calls: calls.clone() });
        let cancel = CancellationToken::new();
        source.poll(&cancel).await.unwrap();
        source.poll(&cancel).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn poll_fails_fast_when_already_cancelled() {
        struct NeverCalled;
        impl Fetch for NeverCalled {
            async fn fetch(&self, _cancel: &CancellationToken) -> Result<Netmap, SourceError> {
                panic!("fetch should not be called once cancelled");
            }
        }
        let mut source = PollSource::new(NeverCalled);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = source.poll(&cancel).await.unwrap_err();
        assert!(matches!(err, SourceError::Cancelled));
    }
}
