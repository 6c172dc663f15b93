//! Prometheus collectors for the change-detection pipeline. Registration
//! only — exposing `/metrics` over HTTP is a deployment concern, not part
//! of Sentinel's core.

use prometheus::{Counter, CounterVec, Histogram, HistogramOpts, Opts, Registry};

pub struct Metrics {
    registry: Registry,
    pub netmap_polls_total: Counter,
    pub netmap_poll_duration_seconds: Histogram,
    pub diffs_detected_total: CounterVec,
    pub events_emitted_total: CounterVec,
    pub notifications_sent_total: CounterVec,
    pub notifications_suppressed_total: CounterVec,
    pub state_store_errors_total: Counter,
}

impl Metrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let netmap_polls_total =
            Counter::with_opts(Opts::new("sentinel_netmap_polls_total", "Total number of source poll attempts"))?;
        let netmap_poll_duration_seconds = Histogram::with_opts(HistogramOpts::new(
            "sentinel_netmap_poll_duration_seconds",
            "Duration of a single source poll",
        ))?;
        let diffs_detected_total = CounterVec::new(
            Opts::new("sentinel_diffs_detected_total", "Total number of events produced by the detector engine"),
            &["type"],
        )?;
        let events_emitted_total = CounterVec::new(
            Opts::new("sentinel_events_emitted_total", "Total number of events accepted by policy"),
            &["type"],
        )?;
        let notifications_sent_total = CounterVec::new(
            Opts::new("sentinel_notifications_sent_total", "Total number of notifications delivered"),
            &["sink"],
        )?;
        let notifications_suppressed_total = CounterVec::new(
            Opts::new("sentinel_notifications_suppressed_total", "Total number of notifications suppressed"),
            &["reason"],
        )?;
        let state_store_errors_total =
            Counter::with_opts(Opts::new("sentinel_state_store_errors_total", "Total number of state store I/O errors"))?;

        registry.register(Box::new(netmap_polls_total.clone()))?;
        registry.register(Box::new(netmap_poll_duration_seconds.clone()))?;
        registry.register(Box::new(diffs_detected_total.clone()))?;
        registry.register(Box::new(events_emitted_total.clone()))?;
        registry.register(Box::new(notifications_sent_total.clone()))?;
        registry.register(Box::new(notifications_suppressed_total.clone()))?;
        registry.register(Box::new(state_store_errors_total.clone()))?;

        Ok(Metrics {
            registry,
            netmap_polls_total,
            netmap_poll_duration_seconds,
            diffs_detected_total,
            events_emitted_total,
            notifications_sent_total,
            notifications_suppressed_total,
            state_store_errors_total,
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}
