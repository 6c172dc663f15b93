//! Debounce / suppression / rate-limit / batching applied to a cycle's
//! accepted events before they reach the notifier.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};

use crate::event::Event;

#[derive(Debug, Clone)]
pub struct Config {
    pub debounce_window: Duration,
    pub suppression_window: Duration,
    pub rate_limit_per_min: i64,
    pub batch_size: usize,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            debounce_window: Duration::zero(),
            suppression_window: Duration::zero(),
            rate_limit_per_min: 0,
            batch_size: 1,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Suppressed {
    pub event: Event,
    pub reason: &'static str,
}

#[derive(Debug, Default)]
pub struct PolicyResult {
    pub batches: Vec<Vec<Event>>,
    pub suppressed: Vec<Suppressed>,
}

/// Holds per-key last-seen timestamps and the rolling rate-limit window.
/// Touched only from the Runner's single cycle loop — no internal locking.
pub struct Engine {
    cfg: Config,
    last_seen: HashMap<String, DateTime<Utc>>,
    rate_window_start: Option<DateTime<Utc>>,
    rate_consumed: i64,
}

impl Engine {
    pub fn new(mut cfg: Config) -> Self {
        if cfg.batch_size == 0 {
            cfg.batch_size = 1;
        }
        Engine {
            cfg,
            last_seen: HashMap::new(),
            rate_window_start: None,
            rate_consumed: 0,
        }
    }

    pub fn apply(&mut self, events: Vec<Event>, now: DateTime<Utc>) -> PolicyResult {
        let mut result = PolicyResult::default();
        let mut accepted = Vec::with_capacity(events.len());

        for evt in events {
            let key = format!("{}|{}", evt.event_type, evt.subject_id);

            if let Some(&prev) = self.last_seen.get(&key) {
                if self.cfg.debounce_window > Duration::zero() && now - prev < self.cfg.debounce_window {
                    result.suppressed.push(Suppressed { event: evt, reason: "debounce" });
                    continue;
                }
                if self.cfg.suppression_window > Duration::zero() && now - prev < self.cfg.suppression_window {
                    result.suppressed.push(Suppressed { event: evt, reason: "suppression" });
                    continue;
                }
            }

            if self.cfg.rate_limit_per_min > 0 {
                let window_expired = match self.rate_window_start {
                    None => true,
                    Some(start) => now - start >= Duration::minutes(1),
                };
                if window_expired {
                    self.rate_window_start = Some(now);
                    self.rate_consumed = 0;
                }
                if self.rate_consumed >= self.cfg.rate_limit_per_min {
                    result.suppressed.push(Suppressed { event: evt, reason: "rate_limit" });
                    continue;
                }
                self.rate_consumed += 1;
            }

            self.last_seen.insert(key, now);
            accepted.push(evt);
        }

        for chunk in accepted.chunks(self.cfg.batch_size) {
            result.batches.push(chunk.to_vec());
        }
        result
    }
}
