//! The top-level orchestrator: cycles source→normalize→diff→policy→notify→
//! persist, handling cancellation, reconnect backoff, and single-cycle mode.

use std::time::Duration as StdDuration;

use chrono::Utc;
use rand::Rng;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::diff;
use crate::enrollment::{Enrollment, EnrollmentError};
use crate::event::Event;
use crate::metrics::Metrics;
use crate::notify::{self, Notifier};
use crate::policy;
use crate::snapshot;
use crate::source::{AnySource, Fetch, LocalApiFetcher, LocalApiWatcherFactory, SourceError, WatcherFactory};
use crate::state::{FileStore, StateError};

#[derive(Debug, Default, Clone)]
pub struct CycleResult {
    pub events: Vec<Event>,
    pub suppressed_count: usize,
    pub sent_count: u32,
    pub dry_run_count: u32,
}

#[derive(Debug, thiserror::Error)]
pub enum CycleError {
    #[error("cancelled")]
    Cancelled,
    #[error("enrollment: {0}")]
    Enrollment(#[from] EnrollmentError),
    #[error("poll source: {0}")]
    Source(#[from] SourceError),
    #[error("state: {0}")]
    State(#[from] StateError),
    #[error("diff: {0}")]
    Diff(#[from] diff::DiffError),
    #[error("notify: {0}")]
    Notify(#[from] notify::NotifyError),
}

/// The three ways a cycle can fail, distinguished so the outer loop knows
/// whether to stop cleanly, log at WARN instead of ERROR, or log at ERROR —
/// every non-cancellation kind still gets the same backoff-and-retry
/// treatment in loop mode (see [`Runner::run`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Cancellation,
    EnrollmentRetryable,
    Fatal,
}

impl CycleError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CycleError::Cancelled => ErrorKind::Cancellation,
            CycleError::Source(SourceError::Cancelled) => ErrorKind::Cancellation,
            CycleError::Enrollment(e) if e.is_retryable() => ErrorKind::EnrollmentRetryable,
            _ => ErrorKind::Fatal,
        }
    }
}

pub struct Runner<E: Enrollment, F: Fetch = LocalApiFetcher, W: WatcherFactory = LocalApiWatcherFactory> {
    cfg: Config,
    source: AnySource<F, W>,
    diff: diff::Engine,
    policy: policy::Engine,
    notifier: Notifier,
    enrollment: E,
    store: std::sync::Arc<FileStore>,
    metrics: std::sync::Arc<Metrics>,
}

impl<E: Enrollment, F: Fetch, W: WatcherFactory> Runner<E, F, W> {
    pub fn new(
        cfg: Config,
        source: AnySource<F, W>,
        diff: diff::Engine,
        policy: policy::Engine,
        notifier: Notifier,
        store: std::sync::Arc<FileStore>,
        enrollment: E,
        metrics: std::sync::Arc<Metrics>,
    ) -> Self {
        Runner { cfg, source, diff, policy, notifier, store, enrollment, metrics }
    }

    /// The outer scheduling loop: repeats [`Runner::run_once`] until
    /// cancelled (or, in `once` mode, after a single cycle), sleeping
    /// between cycles per the configured source mode and backing off on
    /// error.
    pub async fn run(&mut self, cancel: &CancellationToken, once: bool, dry_run: bool) -> Result<(), CycleError> {
        let mut backoff = if self.cfg.poll_backoff_min.is_zero() { StdDuration::from_millis(500) } else { self.cfg.poll_backoff_min };
        let realtime_mode = self.cfg.source.mode.trim().eq_ignore_ascii_case("realtime");

        loop {
            let result = self.run_once(cancel, dry_run).await;
            match result {
                Err(e) => {
                    if cancel.is_cancelled() || e.kind() == ErrorKind::Cancellation {
                        return Ok(());
                    }
                    if e.kind() == ErrorKind::EnrollmentRetryable {
                        warn!(error = %e, "poll cycle failed");
                    } else {
                        error!(error = %e, "poll cycle failed");
                    }
                    if once {
                        return Err(e);
                    }
                    if cancel.is_cancelled() {
                        return Ok(());
                    }
                    tokio::select! {
                        () = cancel.cancelled() => return Ok(()),
                        () = tokio::time::sleep(backoff) => {}
                    }
                    let max = if self.cfg.poll_backoff_max.is_zero() { backoff } else { self.cfg.poll_backoff_max };
                    backoff = std::cmp::min(backoff * 2, max);
                }
                Ok(_) => {
                    backoff = self.cfg.poll_backoff_min;
                    if once {
                        return Ok(());
                    }
                    if realtime_mode {
                        continue;
                    }
                    let wait = self.cfg.poll_interval + jitter(self.cfg.poll_jitter);
                    tokio::select! {
                        () = cancel.cancelled() => return Ok(()),
                        () = tokio::time::sleep(wait) => {}
                    }
                }
            }
        }
    }

    /// One pass of observe→diff→apply policy→deliver→persist, per the
    /// seven-step cycle contract.
    pub async fn run_once(&mut self, cancel: &CancellationToken, dry_run: bool) -> Result<CycleResult, CycleError> {
        let mut res = CycleResult::default();

        let previous_enrollment_status = self.enrollment.last_status();
        let enrollment_status = self.enrollment.ensure_joined().await.map_err(|e| {
            if e.is_retryable() {
                warn!(error = %e, "enrollment failed");
            } else {
                error!(error = %e, "enrollment failed");
            }
            CycleError::Enrollment(e)
        })?;
        if enrollment_status_changed(&previous_enrollment_status, &enrollment_status) {
            info!(
                status = ?enrollment_status.state,
                mode = %enrollment_status.mode,
                node_id = %enrollment_status.node_id,
                hostname = %enrollment_status.hostname,
                "enrollment status changed"
            );
        }

        let start = std::time::Instant::now();
        let nm = self.source.poll(cancel).await?;
        self.metrics.netmap_polls_total.inc();
        self.metrics.netmap_poll_duration_seconds.observe(start.elapsed().as_secs_f64());

        let now = Utc::now();
        let current = snapshot::normalize(&nm, now);
        let previous = match self.store.load_snapshot() {
            Ok(s) => s,
            Err(StateError::NoSnapshot) => crate::snapshot::Snapshot::default(),
            Err(e) => {
                self.metrics.state_store_errors_total.inc();
                return Err(CycleError::State(e));
            }
        };

        debug!(peer_count = current.peers.len(), current_hash = %current.hash, previous_hash = %previous.hash, "netmap snapshot polled");

        if !previous.hash.is_empty() && previous.hash == current.hash {
            debug!("no-op netmap update detected");
            return Ok(res);
        }

        let enabled = self.cfg.detectors.iter().map(|(name, d)| (name.clone(), d.enabled)).collect();
        let events = self.diff.diff(&previous, &current, &self.cfg.detector_order, &enabled, now)?;
        if events.is_empty() {
            debug!("no netmap diffs detected");
        } else {
            info!(events = events.len(), "netmap diffs detected");
            for evt in &events {
                info!(event_type = %evt.event_type, subject_id = %evt.subject_id, subject_type = ?evt.subject_type, "netmap event");
                self.metrics.diffs_detected_total.with_label_values(&[&evt.event_type]).inc();
                self.metrics.events_emitted_total.with_label_values(&[&evt.event_type]).inc();
            }
        }
        res.events = events.clone();

        let policy_result = self.policy.apply(events, now);
        debug!(
            events_in = res.events.len(),
            suppressed = policy_result.suppressed.len(),
            batches = policy_result.batches.len(),
            "policy evaluation complete"
        );
        for sup in &policy_result.suppressed {
            self.metrics.notifications_suppressed_total.with_label_values(&[sup.reason]).inc();
        }
        res.suppressed_count = policy_result.suppressed.len();

        for batch in policy_result.batches {
            let notify_result = self.notifier.notify(cancel, &batch, dry_run, now).await?;
            res.sent_count += notify_result.sent;
            res.dry_run_count += notify_result.dry_run;
            for (sink, count) in &notify_result.sent_by_sink {
                self.metrics.notifications_sent_total.with_label_values(&[sink]).inc_by(f64::from(*count));
            }
        }

        if let Err(e) = self.store.save_snapshot(current) {
            self.metrics.state_store_errors_total.inc();
            return Err(CycleError::State(e));
        }

        Ok(res)
    }
}

fn jitter(max: StdDuration) -> StdDuration {
    if max.is_zero() {
        return StdDuration::ZERO;
    }
    rand::rng().random_range(StdDuration::ZERO..max)
}

fn enrollment_status_changed(before: &crate::enrollment::Status, after: &crate::enrollment::Status) -> bool {
    before.state != after.state
        || before.mode != after.mode
        || before.node_id != after.node_id
        || before.hostname != after.hostname
        || before.login_url != after.login_url
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::enrollment::{AlreadyJoined, State};
    use crate::netmap::{Netmap, Peer as RawPeer};
    use crate::notify::{Route, StdoutSink};
    use crate::source::{Fetch, PollSource};
    use tempfile::tempdir;

    struct StaticFetcher(Netmap);

    impl Fetch for StaticFetcher {
        async fn fetch(&self, _cancel: &CancellationToken) -> Result<Netmap, SourceError> {
            Ok(self.0.clone())
        }
    }

    fn netmap_with_peer(id: &str, online: bool) -> Netmap {
        Netmap {
            peers: vec![RawPeer {
                id: id.to_string(),
                name: id.to_string(),
                online,
                tags: vec![],
                routes: vec![],
                machine_authorized: false,
                expired: false,
                key_expiry: String::new(),
                hostinfo_hash: String::new(),
                metadata: Default::default(),
            }],
            ..Default::default()
        }
    }

    fn test_runner(dir: &tempfile::TempDir, nm: Netmap) -> Runner<AlreadyJoined, StaticFetcher> {
        let mut cfg = crate::config::load_config_from_str("").unwrap();
        cfg.state.path = dir.path().join("state.json").to_string_lossy().to_string();
        // Presence-only so a single online transition yields a single event
        // instead of also tripping `peer_changes`' `peer.added`.
        cfg.detector_order = vec!["presence".to_string()];
        let store = std::sync::Arc::new(FileStore::new(dir.path().join("state.json")));
        let route = Route { event_types: vec!["*".to_string()], severities: vec![], sinks: vec!["stdout".to_string()] };
        let notifier = Notifier::new(
            notify::Config { routes: vec![route], idempotency_key_ttl: chrono::Duration::hours(24) },
            store.clone(),
            vec![notify::Sink::Stdout(StdoutSink::new("stdout"))],
        );
        Runner::new(
            cfg,
            AnySource::Poll(PollSource::new(StaticFetcher(nm))),
            diff::Engine::standard(),
            policy::Engine::new(policy::Config::default()),
            notifier,
            store,
            AlreadyJoined::new("node-1", "host-1"),
            std::sync::Arc::new(Metrics::new().unwrap()),
        )
    }

    #[tokio::test]
    async fn online_transition_emits_one_event() {
        let dir = tempdir().unwrap();
        let mut runner = test_runner(&dir, netmap_with_peer("peer1", true));
        let cancel = CancellationToken::new();
        let res = runner.run_once(&cancel, false).await.unwrap();
        assert_eq!(res.events.len(), 1);
        assert_eq!(res.events[0].event_type, crate::event::types::PEER_ONLINE);
        assert_eq!(res.sent_count, 1);
    }

    #[tokio::test]
    async fn second_cycle_with_identical_netmap_is_a_no_op() {
        let dir = tempdir().unwrap();
        let mut runner = test_runner(&dir, netmap_with_peer("peer1", true));
        let cancel = CancellationToken::new();
        let r1 = runner.run_once(&cancel, false).await.unwrap();
        assert_eq!(r1.events.len(), 1);
        let r2 = runner.run_once(&cancel, false).await.unwrap();
        assert!(r2.events.is_empty());
        assert_eq!(r2.sent_count, 0);
    }

    #[tokio::test]
    async fn enrollment_status_changed_detects_field_diffs() {
        let before = crate::enrollment::Status { state: State::Joining, mode: "m".into(), node_id: "n".into(), hostname: "h".into(), login_url: None };
        let after = crate::enrollment::Status { state: State::Joined, ..before.clone() };
        assert!(enrollment_status_changed(&before, &after));
        assert!(!enrollment_status_changed(&before, &before.clone()));
    }
}
