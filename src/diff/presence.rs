use chrono::{DateTime, Utc};
use serde_json::json;

use super::{Detector, DetectorError};
use crate::event::{self, Event, SubjectType, types};
use crate::snapshot::{self, Snapshot};

/// Detects online/offline transitions, including peers that vanish from
/// the netmap entirely while still marked online.
pub struct PresenceDetector;

impl Detector for PresenceDetector {
    fn name(&self) -> &'static str {
        "presence"
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
            match prev.get(id) {
                None => {
                    if p.online {
                        out.push(event::new_event(
                            types::PEER_ONLINE,
                            id,
                            SubjectType::Peer,
                            &before.hash,
                            &after.hash,
                            Some(json!({"name": p.name})),
                            now,
                        ));
                    }
                }
                Some(old) => {
                    if old.online != p.online {
                        let event_type = if p.online { types::PEER_ONLINE } else { types::PEER_OFFLINE };
                        out.push(event::new_event(
                            event_type,
                            id,
                            SubjectType::Peer,
                            &before.hash,
                            &after.hash,
                            Some(json!({"name": p.name})),
                            now,
                        ));
                    }
                }
            }
        }

        let mut prev_ids: Vec<&str> = prev.keys().copied().collect();
        prev_ids.sort_unstable();
        for id in prev_ids {
            let old = prev[id];
            if next.contains_key(id) || !old.online {
                continue;
            }
            out.push(event::new_event(
                types::PEER_OFFLINE,
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::netmap::{Netmap, Peer as RawPeer};

    fn raw_peer(id: &str, online: bool) -> RawPeer {
        RawPeer {
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
        }
    }

    fn snap(peers: Vec<RawPeer>) -> Snapshot {
        let nm = Netmap { peers, ..Default::default() };
        snapshot::normalize(&nm, Utc::now())
    }

    #[test]
    fn new_online_peer_emits_peer_online() {
        let before = Snapshot::default();
        let after = snap(vec![raw_peer("peer1", true)]);
        let events = PresenceDetector.detect(&before, &after, Utc::now()).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, types::PEER_ONLINE);
        assert_eq!(events[0].subject_id, "peer1");
    }

    #[test]
    fn new_offline_peer_emits_nothing() {
        let before = Snapshot::default();
        let after = snap(vec![raw_peer("peer1", false)]);
        let events = PresenceDetector.detect(&before, &after, Utc::now()).unwrap();
        assert!(events.is_empty());
    }

    #[test]
    fn missing_online_peer_emits_offline_with_reason() {
        let before = snap(vec![raw_peer("peer1", true)]);
        let after = Snapshot::default();
        let events = PresenceDetector.detect(&before, &after, Utc::now()).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, types::PEER_OFFLINE);
        assert_eq!(
            events[0].payload.as_ref().unwrap().get("reason").unwrap(),
            "missing_from_netmap"
        );
    }

    #[test]
    fn missing_offline_peer_emits_nothing() {
        let before = snap(vec![raw_peer("peer1", false)]);
        let after = Snapshot::default();
        let events = PresenceDetector.detect(&before, &after, Utc::now()).unwrap();
        assert!(events.is_empty());
    }

    #[test]
    fn transition_offline_to_online() {
        let before = snap(vec![raw_peer("peer1", false)]);
        let after = snap(vec![raw_peer("peer1", true)]);
        let events = PresenceDetector.detect(&before, &after, Utc::now()).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, types::PEER_ONLINE);
    }
}
