//! The detector ensemble: an ordered registry of pure `(before, after) ->
//! events` functions invoked by name.

mod peer_changes;
mod presence;
mod runtime;

use std::collections::HashMap;

use chrono::{DateTime, Utc};

use crate::event::Event;
use crate::snapshot::Snapshot;

pub use peer_changes::PeerChangesDetector;
pub use presence::PresenceDetector;
pub use runtime::RuntimeDetector;

#[derive(Debug, thiserror::Error)]
pub enum DiffError {
    #[error("detector {0:?} not registered")]
    UnknownDetector(String),
    #[error("detector {name:?} failed: {source}")]
    DetectorFailure {
        name: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

/// A pure diff function over two snapshots, addressed by a stable name.
///
/// Detectors never fail in this implementation (all three ship here are
/// total functions over their inputs), but the signature keeps room for one
/// that validates input it doesn't control without forcing panics.
pub trait Detector: Send + Sync {
    fn name(&self) -> &'static str;
    fn detect(
        &self,
        before: &Snapshot,
        after: &Snapshot,
        now: DateTime<Utc>,
    ) -> Result<Vec<Event>, DetectorError>;
}

#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct DetectorError(pub String);

/// Holds the registry of known detectors and runs them in caller-specified
/// order, honoring an enable/disable map.
pub struct Engine {
    detectors: HashMap<&'static str, Box<dyn Detector>>,
}

impl Engine {
    pub fn new(detectors: Vec<Box<dyn Detector>>) -> Self {
        let map = detectors.into_iter().map(|d| (d.name(), d)).collect();
        Engine { detectors: map }
    }

    /// Builds an engine wired with the three built-in detectors in the
    /// standard order (`presence`, `peer_changes`, `runtime`).
    pub fn standard() -> Self {
        Engine::new(vec![
            Box::new(PresenceDetector),
            Box::new(PeerChangesDetector),
            Box::new(RuntimeDetector),
        ])
    }

    pub fn diff(
        &self,
        before: &Snapshot,
        after: &Snapshot,
        order: &[String],
        enabled: &HashMap<String, bool>,
        now: DateTime<Utc>,
    ) -> Result<Vec<Event>, DiffError> {
        let mut out = Vec::new();
        for name in order {
            let detector = self
                .detectors
                .get(name.as_str())
                .ok_or_else(|| DiffError::UnknownDetector(name.clone()))?;
            if let Some(false) = enabled.get(name.as_str()).copied() {
                continue;
            }
            let events = detector
                .detect(before, after, now)
                .map_err(|e| DiffError::DetectorFailure {
                    name: name.clone(),
                    source: Box::new(e),
                })?;
            out.extend(events);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::netmap::{Netmap, Peer as RawPeer};
    use chrono::Utc;

    fn snap_with_peer(id: &str, online: bool) -> Snapshot {
        let nm = Netmap {
            peers: vec![RawPeer {
                id: id.to_string(),
                name: id.to_string(),
                online,
                ..RawPeer {
                    id: String::new(),
                    name: String::new(),
                    online: false,
                    tags: vec![],
                    routes: vec![],
                    machine_authorized: false,
                    expired: false,
                    key_expiry: String::new(),
                    hostinfo_hash: String::new(),
                    metadata: Default::default(),
                }
            }],
            ..Default::default()
        };
        crate::snapshot::normalize(&nm, Utc::now())
    }

    #[test]
    fn diffing_identical_snapshots_yields_no_events() {
        let engine = Engine::standard();
        let s = snap_with_peer("peer1", true);
        let order = vec!["presence".into(), "peer_changes".into(), "runtime".into()];
        let events = engine.diff(&s, &s, &order, &HashMap::new(), Utc::now()).unwrap();
        assert!(events.is_empty());
    }

    #[test]
    fn unknown_detector_name_fails() {
        let engine = Engine::standard();
        let s = snap_with_peer("peer1", true);
        let order = vec!["nonexistent".into()];
        let err = engine.diff(&s, &s, &order, &HashMap::new(), Utc::now()).unwrap_err();
        assert!(matches!(err, DiffError::UnknownDetector(name) if name == "nonexistent"));
    }

    #[test]
    fn disabled_detector_is_skipped() {
        let engine = Engine::standard();
        let before = Snapshot::default();
        let after = snap_with_peer("peer1", true);
        let order = vec!["presence".into()];
        let mut enabled = HashMap::new();
        enabled.insert("presence".to_string(), false);
        let events = engine.diff(&before, &after, &order, &enabled, Utc::now()).unwrap();
        assert!(events.is_empty());
    }
}
