use chrono::{DateTime, Utc};
use serde_json::json;

use super::{Detector, DetectorError};
use crate::event::{self, Event, SubjectType, types};
use crate::snapshot::{self, Snapshot};

/// Detects peer additions, removals, and field-level changes (routes,
/// tags, authorization, key expiry, hostinfo).
pub struct PeerChangesDetector;

impl Detector for PeerChangesDetector {
    fn name(&self) -> &'static str {
        "peer_changes"
    }

    fn detect(
        &self,
        before: &Snapshot,
        after: &Snapshot,
        now: DateTime<Utc>,
    ) -> Result<Vec<Event>, DetectorError> {
        let prev = snapshot::index_by_peer_id(before);
        let next = snapshot::index_by_peer_id(after);
        let mut out = Vec::new();

        let mut next_ids: Vec<&str> = next.keys().copied().collect();
        next_ids.sort_unstable();
        for id in next_ids {
            let p = next[id];
            let Some(old) = prev.get(id) else {
                out.push(event::new_event(
                    types::PEER_ADDED,
                    id,
                    SubjectType::Peer,
                    &before.hash,
                    &after.hash,
                    Some(json!({
                        "name": p.name,
                        "online": p.online,
                        "tags": p.tags,
                        "routes": p.routes,
                    })),
                    now,
                ));
                continue;
            };

            if old.routes != p.routes {
                out.push(event::new_event(
                    types::PEER_ROUTES_CHANGED,
                    id,
                    SubjectType::Peer,
                    &before.hash,
                    &after.hash,
                    Some(json!({
                        "name": p.name,
                        "before_routes": old.routes,
                        "after_routes": p.routes,
                    })),
                    now,
                ));
            }
            if old.tags != p.tags {
                out.push(event::new_event(
                    types::PEER_TAGS_CHANGED,
                    id,
                    SubjectType::Peer,
                    &before.hash,
                    &after.hash,
                    Some(json!({
                        "name": p.name,
                        "before_tags": old.tags,
                        "after_tags": p.tags,
                    })),
                    now,
                ));
            }
            if old.machine_authorized != p.machine_authorized {
                out.push(event::new_event(
                    types::PEER_MACHINE_AUTHORIZED_CHANGED,
                    id,
                    SubjectType::Peer,
                    &before.hash,
                    &after.hash,
                    Some(json!({
                        "name": p.name,
                        "before_authorized": old.machine_authorized,
                        "after_authorized": p.machine_authorized,
                        "machine_authorized": p.machine_authorized,
                    })),
                    now,
                ));
            }
            if old.key_expiry != p.key_expiry {
                out.push(event::new_event(
                    types::PEER_KEY_EXPIRY_CHANGED,
                    id,
                    SubjectType::Peer,
                    &before.hash,
                    &after.hash,
                    Some(json!({
                        "name": p.name,
                        "before_key_expiry": old.key_expiry,
                        "after_key_expiry": p.key_expiry,
                    })),
                    now,
                ));
            }
            if !old.expired && p.expired {
                out.push(event::new_event(
                    types::PEER_KEY_EXPIRED,
                    id,
                    SubjectType::Peer,
                    &before.hash,
                    &after.hash,
                    Some(json!({"name": p.name, "key_expiry": p.key_expiry})),
                    now,
                ));
            }
            if !old.hostinfo_hash.is_empty()
                && !p.hostinfo_hash.is_empty()
                && old.hostinfo_hash != p.hostinfo_hash
            {
                out.push(event::new_event(
                    types::PEER_HOSTINFO_CHANGED,
                    id,
                    SubjectType::Peer,
                    &before.hash,
                    &after.hash,
                    Some(json!({
                        "name": p.name,
                        "before_hostinfo_hash": old.hostinfo_hash,
                        "after_hostinfo_hash": p.hostinfo_hash,
                    })),
                    now,
                ));
            }
        }

        let mut prev_ids: Vec<&str> = prev.keys().copied().collect();
        prev_ids.sort_unstable();
        for id in prev_ids {
            if next.contains_key(id) {
                continue;
            }
            let old = prev[id];
            out.push(event::new_event(
                types::PEER_REMOVED,
                id,
                SubjectType::Peer,
                &before.hash,
                &after.hash,
                Some(json!({"name": old.name, "reason": "missing_from_netmap"})),
                now,
            ));
        }

        Ok(out)
    }
}
