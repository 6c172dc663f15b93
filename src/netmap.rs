//! Raw observation types produced by a [`crate::source`] poll.
//!
//! These mirror the shape of a single IPN-bus netmap frame before any
//! normalization: peers in arbitrary order, tags/routes unsorted, volatile
//! metadata keys still present. [`crate::snapshot::normalize`] is the only
//! place that imposes canonical ordering.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single member of the overlay as observed in one netmap frame.
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
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

/// Local daemon preferences as of the observation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Prefs {
    #[serde(default)]
    pub advertise_routes: Vec<String>,
    #[serde(default)]
    pub exit_node_id: String,
    #[serde(default)]
    pub run_ssh: bool,
    #[serde(default)]
    pub shields_up: bool,
}

/// Tailnet-wide configuration as of the observation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tailnet {
    #[serde(default)]
    pub domain: String,
    #[serde(default)]
    pub tka_enabled: bool,
}

/// A single raw observation of the overlay network and local daemon state.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Netmap {
    pub polled_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub peers: Vec<Peer>,
    #[serde(default)]
    pub daemon_state: String,
    #[serde(default)]
    pub prefs: Prefs,
    #[serde(default)]
    pub tailnet: Tailnet,
    #[serde(default)]
    pub last_error_text: String,
}

/// Volatile metadata keys dropped during normalization because their churn
/// carries no semantic change (connectivity path details, not topology).
pub const VOLATILE_METADATA_KEYS: [&str; 3] = ["endpoint", "derp", "relay_path"];
