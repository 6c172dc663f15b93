//! Typed events emitted by the detector engine and carried through policy
//! and notification.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

pub const SCHEMA_VERSION: &str = "v1";

pub mod types {
    pub const PEER_ONLINE: &str = "peer.online";
    pub const PEER_OFFLINE: &str = "peer.offline";
    pub const PEER_ADDED: &str = "peer.added";
    pub const PEER_REMOVED: &str = "peer.removed";
    pub const PEER_ROUTES_CHANGED: &str = "peer.routes.changed";
    pub const PEER_TAGS_CHANGED: &str = "peer.tags.changed";
    pub const PEER_MACHINE_AUTHORIZED_CHANGED: &str = "peer.machine_authorized.changed";
    pub const PEER_KEY_EXPIRY_CHANGED: &str = "peer.key_expiry.changed";
    pub const PEER_KEY_EXPIRED: &str = "peer.key_expired";
    pub const PEER_HOSTINFO_CHANGED: &str = "peer.hostinfo.changed";
    pub const DAEMON_STATE_CHANGED: &str = "daemon.state.changed";
    pub const PREFS_ADVERTISE_ROUTES_CHANGED: &str = "prefs.advertise_routes.changed";
    pub const PREFS_EXIT_NODE_CHANGED: &str = "prefs.exit_node.changed";
    pub const PREFS_RUN_SSH_CHANGED: &str = "prefs.run_ssh.changed";
    pub const PREFS_SHIELDS_UP_CHANGED: &str = "prefs.shields_up.changed";
    pub const TAILNET_DOMAIN_CHANGED: &str = "tailnet.domain.changed";
    pub const TAILNET_TKA_ENABLED_CHANGED: &str = "tailnet.tka_enabled.changed";

    pub const ALL: [&str; 17] = [
        PEER_ONLINE,
        PEER_OFFLINE,
        PEER_ADDED,
        PEER_REMOVED,
        PEER_ROUTES_CHANGED,
        PEER_TAGS_CHANGED,
        PEER_MACHINE_AUTHORIZED_CHANGED,
        PEER_KEY_EXPIRY_CHANGED,
        PEER_KEY_EXPIRED,
        PEER_HOSTINFO_CHANGED,
        DAEMON_STATE_CHANGED,
        PREFS_ADVERTISE_ROUTES_CHANGED,
        PREFS_EXIT_NODE_CHANGED,
        PREFS_RUN_SSH_CHANGED,
        PREFS_SHIELDS_UP_CHANGED,
        TAILNET_DOMAIN_CHANGED,
        TAILNET_TKA_ENABLED_CHANGED,
    ];

    /// Whether `t` is a recognized event type or the routing wildcard.
    pub fn is_known(t: &str) -> bool {
        t == "*" || ALL.contains(&t)
    }
}

pub const SEVERITY_INFO: &str = "info";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubjectType {
    Peer,
    Daemon,
    Prefs,
    Tailnet,
}

impl SubjectType {
    fn as_str(self) -> &'static str {
        match self {
            SubjectType::Peer => "peer",
            SubjectType::Daemon => "daemon",
            SubjectType::Prefs => "prefs",
            SubjectType::Tailnet => "tailnet",
        }
    }
}

impl Serialize for SubjectType {
    fn serialize<S: serde::Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for SubjectType {
    fn deserialize<D: serde::Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let s = String::deserialize(d)?;
        match s.as_str() {
            "peer" => Ok(SubjectType::Peer),
            "daemon" => Ok(SubjectType::Daemon),
            "prefs" => Ok(SubjectType::Prefs),
            "tailnet" => Ok(SubjectType::Tailnet),
            other => Err(serde::de::Error::custom(format!("unknown subject_type {other}"))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub schema_version: String,
    pub event_id: String,
    pub event_type: String,
    pub severity: String,
    pub timestamp: DateTime<Utc>,
    pub subject_id: String,
    pub subject_type: SubjectType,
    pub before_hash: String,
    pub after_hash: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
}

/// Builds a new event and derives its `event_id` content fingerprint.
pub fn new_event(
    event_type: &str,
    subject_id: &str,
    subject_type: SubjectType,
    before_hash: &str,
    after_hash: &str,
    payload: Option<Value>,
    now: DateTime<Utc>,
) -> Event {
    let mut e = Event {
        schema_version: SCHEMA_VERSION.to_string(),
        event_id: String::new(),
        event_type: event_type.to_string(),
        severity: SEVERITY_INFO.to_string(),
        timestamp: now,
        subject_id: subject_id.to_string(),
        subject_type,
        before_hash: before_hash.to_string(),
        after_hash: after_hash.to_string(),
        payload,
    };
    e.event_id = derive_event_id(&e);
    e
}

/// 16-byte hex content fingerprint of the transition, independent of
/// payload detail and timestamp — used to recognize "the same kind of
/// change happened again", not for delivery deduplication.
pub fn derive_event_id(e: &Event) -> String {
    let msg = format!(
        "{}|{}|{}|{}|{}",
        e.schema_version, e.event_type, e.subject_id, e.before_hash, e.after_hash
    );
    let digest = Sha256::digest(msg.as_bytes());
    hex::encode(&digest[..16])
}

/// Full SHA-256 hex fingerprint of one delivery attempt, incorporating
/// payload and timestamp so distinct recurrences dedup independently.
pub fn derive_idempotency_key(e: &Event) -> String {
    let payload_json = serde_json::to_string(&e.payload).unwrap_or_else(|_| "null".to_string());
    let msg = format!(
        "{}|{}|{}|{}|{}|{}",
        e.event_type,
        e.subject_id,
        e.before_hash,
        e.after_hash,
        payload_json,
        e.timestamp.to_rfc3339_opts(chrono::SecondsFormat::Nanos, true),
    );
    let digest = Sha256::digest(msg.as_bytes());
    hex::encode(digest)
}
