//! Canonical, content-hashed view of a [`crate::netmap::Netmap`].
//!
//! `normalize` is a pure function: sort everything that has no meaningful
//! order, drop volatile metadata, and compute a hash over everything except
//! the capture timestamp so that repeated observations of unchanged state
//! hash identically.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};

use crate::netmap::{self, Netmap, Prefs, Tailnet};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Peer {
    pub id: String,
    pub name: String,
    pub online: bool,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub routes: Vec<String>,
    #[serde(default)]
    pub machine_authorized: bool,
    #[serde(default)]
    pub expired: bool,
    #[serde(default)]
    pub key_expiry: String,
    #[serde(default)]
    pub hostinfo_hash: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub metadata: Option<BTreeMap<String, String>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Snapshot {
    pub captured_at: DateTime<Utc>,
    pub peers: Vec<Peer>,
    pub daemon_state: String,
    pub prefs: Prefs,
    pub tailnet: Tailnet,
    pub last_error_text: String,
    pub hash: String,
}

/// The subset of a [`Snapshot`] that feeds the content hash. `captured_at`
/// is deliberately excluded so identical-content observations hash equal.
#[derive(Serialize)]
struct Hashable<'a> {
    peers: &'a [Peer],
    daemon_state: &'a str,
    prefs: &'a Prefs,
    tailnet: &'a Tailnet,
    last_error_text: &'a str,
}

/// Converts a raw netmap observation into its canonical, hashed form.
pub fn normalize(nm: &Netmap, now: DateTime<Utc>) -> Snapshot {
    let mut peers: Vec<Peer> = nm
        .peers
        .iter()
        .map(|p| {
            let mut tags = p.tags.clone();
            tags.sort();
            let mut routes = p.routes.clone();
            routes.sort();
            Peer {
                id: p.id.clone(),
                name: p.name.clone(),
                online: p.online,
                tags,
                routes,
                machine_authorized: p.machine_authorized,
                expired: p.expired,
                key_expiry: p.key_expiry.clone(),
                hostinfo_hash: p.hostinfo_hash.clone(),
                metadata: redact_volatile_metadata(&p.metadata),
            }
        })
        .collect();
    peers.sort_by(|a, b| a.id.cmp(&b.id));

    let mut prefs = nm.prefs.clone();
    prefs.advertise_routes.sort();

    let mut snapshot = Snapshot {
        captured_at: now,
        peers,
        daemon_state: nm.daemon_state.clone(),
        prefs,
        tailnet: nm.tailnet.clone(),
        last_error_text: nm.last_error_text.clone(),
        hash: String::new(),
    };
    snapshot.hash = hash(&snapshot);
    snapshot
}

/// Recomputes the content hash of a snapshot (used by tests and by the
/// state store when rehydrating from disk).
pub fn hash(s: &Snapshot) -> String {
    let hashable = Hashable {
        peers: &s.peers,
        daemon_state: &s.daemon_state,
        prefs: &s.prefs,
        tailnet: &s.tailnet,
        last_error_text: &s.last_error_text,
    };
    // serde_json's map/struct field order is insertion order, which is
    // stable across calls for a fixed Rust type — this makes the
    // serialization itself deterministic.
    let bytes = serde_json::to_vec(&hashable).unwrap_or_default();
    let digest = Sha256::digest(&bytes);
    hex::encode(digest)
}

/// Indexes a snapshot's peers by id for detector lookups.
pub fn index_by_peer_id(s: &Snapshot) -> HashMap<&str, &Peer> {
    s.peers.iter().map(|p| (p.id.as_str(), p)).collect()
}

fn redact_volatile_metadata(in_meta: &HashMap<String, String>) -> Option<BTreeMap<String, String>> {
    if in_meta.is_empty() {
        return None;
    }
    let out: BTreeMap<String, String> = in_meta
        .iter()
        .filter(|(k, _)| !netmap::VOLATILE_METADATA_KEYS.contains(&k.as_str()))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    if out.is_empty() { None } else { Some(out) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::netmap::Peer as RawPeer;
    use chrono::TimeZone;

    fn sample_netmap() -> Netmap {
        Netmap {
            polled_at: None,
            peers: vec![RawPeer {
                id: "peer1".into(),
                name: "peer-one".into(),
                online: true,
                tags: vec!["b".into(), "a".into()],
                routes: vec!["10.0.2.0/24".into(), "10.0.1.0/24".into()],
                machine_authorized: true,
                expired: false,
                key_expiry: String::new(),
                hostinfo_hash: String::new(),
                metadata: [("endpoint".to_string(), "1.2.3.4:41641".to_string())]
                    .into_iter()
                    .collect(),
            }],
            daemon_state: "Running".into(),
            prefs: Prefs::default(),
            tailnet: Tailnet::default(),
            last_error_text: String::new(),
        }
    }

    #[test]
    fn normalize_sorts_tags_and_routes() {
        let nm = sample_netmap();
        let snap = normalize(&nm, Utc::now());
        assert_eq!(snap.peers[0].tags, vec!["a", "b"]);
        assert_eq!(snap.peers[0].routes, vec!["10.0.1.0/24", "10.0.2.0/24"]);
    }

    #[test]
    fn normalize_drops_volatile_metadata() {
        let nm = sample_netmap();
        let snap = normalize(&nm, Utc::now());
        assert!(snap.peers[0].metadata.is_none());
    }

    #[test]
    fn hash_is_independent_of_captured_at() {
        let nm = sample_netmap();
        let t1 = Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap();
        let t2 = Utc.with_ymd_and_hms(2024, 6, 1, 12, 30, 0).unwrap();
        let s1 = normalize(&nm, t1);
        let s2 = normalize(&nm, t2);
        assert_eq!(s1.hash, s2.hash);
    }

    #[test]
    fn hash_changes_when_peer_set_changes() {
        let nm1 = sample_netmap();
        let mut nm2 = sample_netmap();
        nm2.peers[0].online = false;
        let s1 = normalize(&nm1, Utc::now());
        let s2 = normalize(&nm2, Utc::now());
        assert_ne!(s1.hash, s2.hash);
    }

    #[test]
    fn peer_ids_are_sorted_ascending() {
        let mut nm = sample_netmap();
        nm.peers.push(RawPeer {
            id: "peer0".into(),
            ..nm.peers[0].clone()
        });
        let snap = normalize(&nm, Utc::now());
        assert_eq!(snap.peers[0].id, "peer0");
        assert_eq!(snap.peers[1].id, "peer1");
    }
}
