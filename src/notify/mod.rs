//! Routed, idempotent delivery of accepted events to named sinks.

mod discord_sink;
mod stdout_sink;
mod webhook_sink;

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Duration;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::event::{self, Event};
use crate::state::FileStore;

pub use discord_sink::DiscordSink;
pub use stdout_sink::StdoutSink;
pub use webhook_sink::WebhookSink;

#[derive(Debug, Clone)]
pub struct Route {
    pub event_types: Vec<String>,
    pub severities: Vec<String>,
    pub sinks: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub routes: Vec<Route>,
    pub idempotency_key_ttl: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Config { routes: Vec::new(), idempotency_key_ttl: Duration::hours(24) }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Notification {
    pub event: Event,
    pub idempotency_key: String,
}

#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("serialize: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("cancelled")]
    Cancelled,
    #[error("sink failed after retries: {0}")]
    ExhaustedRetries(String),
}

/// The three built-in delivery endpoints, dispatched by name. Modeled as a
/// closed variant set rather than a trait object — the sink catalogue is
/// fixed and small, and this keeps `Send` async dispatch out of a `dyn`
/// boundary entirely.
pub enum Sink {
    Stdout(StdoutSink),
    Webhook(WebhookSink),
    Discord(DiscordSink),
}

impl Sink {
    pub fn name(&self) -> &str {
        match self {
            Sink::Stdout(s) => s.name(),
            Sink::Webhook(s) => s.name(),
            Sink::Discord(s) => s.name(),
        }
    }

    pub async fn send(
        &self,
        cancel: &CancellationToken,
        note: &Notification,
    ) -> Result<(), SinkError> {
        match self {
            Sink::Stdout(s) => s.send(note),
            Sink::Webhook(s) => s.send(cancel, note).await,
            Sink::Discord(s) => s.send(cancel, note).await,
        }
    }
}

#[derive(Debug, Default, Clone)]
pub struct NotifyResult {
    pub sent: u32,
    pub suppressed: u32,
    pub dry_run: u32,
    /// Successful sends per sink name, for `notifications_sent_total{sink}`.
    pub sent_by_sink: HashMap<String, u32>,
}

#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("state: {0}")]
    State(#[from] crate::state::StateError),
    #[error("sink {sink:?}: {source}")]
    Sink {
        sink: String,
        #[source]
        source: SinkError,
    },
}

pub struct Notifier {
    cfg: Config,
    store: Arc<FileStore>,
    sinks: HashMap<String, Sink>,
}

impl Notifier {
    pub fn new(cfg: Config, store: Arc<FileStore>, sinks: Vec<Sink>) -> Self {
        let map = sinks.into_iter().map(|s| (s.name().to_string(), s)).collect();
        Notifier { cfg, store, sinks: map }
    }

    pub async fn notify(
        &self,
        cancel: &CancellationToken,
        events: &[Event],
        dry_run: bool,
        now: chrono::DateTime<chrono::Utc>,
    ) -> Result<NotifyResult, NotifyError> {
        let mut result = NotifyResult::default();

        for evt in events {
            let targets = self.targets_for(evt);
            if targets.is_empty() {
                continue;
            }

            let key = event::derive_idempotency_key(evt);
            if self.store.seen_idempotency_key(&key, now)? {
                result.suppressed += 1;
                continue;
            }

            let note = Notification { event: evt.clone(), idempotency_key: key.clone() };

            if dry_run {
                result.dry_run += targets.len() as u32;
                self.store.record_idempotency_key(&key, self.cfg.idempotency_key_ttl, now)?;
                continue;
            }

            for target in &targets {
                let Some(sink) = self.sinks.get(target) else { continue };
                sink.send(cancel, &note).await.map_err(|source| NotifyError::Sink {
                    sink: target.clone(),
                    source,
                })?;
                result.sent += 1;
                *result.sent_by_sink.entry(target.clone()).or_insert(0) += 1;
            }
            self.store.record_idempotency_key(&key, self.cfg.idempotency_key_ttl, now)?;
        }

        Ok(result)
    }

    fn targets_for(&self, evt: &Event) -> Vec<String> {
        let mut out = Vec::new();
        for route in &self.cfg.routes {
            if !route.event_types.is_empty() && !matches_event_type(&route.event_types, &evt.event_type) {
                continue;
            }
            if !route.severities.is_empty() && !route.severities.iter().any(|s| s == &evt.severity) {
                continue;
            }
            out.extend(route.sinks.iter().cloned());
        }
        uniq(out)
    }
}

fn matches_event_type(items: &[String], target: &str) -> bool {
    items.iter().any(|item| item == "*" || item == target)
}

fn uniq(items: Vec<String>) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    let mut out = Vec::with_capacity(items.len());
    for item in items {
        if item.is_empty() || !seen.insert(item.clone()) {
            continue;
        }
        out.push(item);
    }
    out
}
