use chrono::{DateTime, Utc};
use serde_json::json;

use super::{Detector, DetectorError};
use crate::event::{self, Event, SubjectType, types};
use crate::snapshot::Snapshot;

const LOCAL_SUBJECT_ID: &str = "local";

/// Detects daemon/prefs/tailnet-level changes. Suppresses the startup
/// baseline by requiring a non-empty `before.hash` (an empty hash means
/// "no previous snapshot exists yet", not "nothing changed").
pub struct RuntimeDetector;

impl Detector for RuntimeDetector {
    fn name(&self) -> &'static str {
        "runtime"
    }

    fn detect(
        &self,
        before: &Snapshot,
        after: &Snapshot,
        now: DateTime<Utc>,
    ) -> Result<Vec<Event>, DetectorError> {
        if before.hash.is_empty() {
            return Ok(Vec::new());
        }

        let mut out = Vec::new();

        if !before.daemon_state.is_empty()
            && !after.daemon_state.is_empty()
            && before.daemon_state != after.daemon_state
        {
            out.push(event::new_event(
                types::DAEMON_STATE_CHANGED,
                LOCAL_SUBJECT_ID,
                SubjectType::Daemon,
                &before.hash,
                &after.hash,
                Some(json!({
                    "before_state": before.daemon_state,
                    "after_state": after.daemon_state,
                })),
                now,
            ));
        }

        if before.prefs.advertise_routes != after.prefs.advertise_routes {
            out.push(event::new_event(
                types::PREFS_ADVERTISE_ROUTES_CHANGED,
                LOCAL_SUBJECT_ID,
                SubjectType::Prefs,
                &before.hash,
                &after.hash,
                Some(json!({
                    "before_routes": before.prefs.advertise_routes,
                    "after_routes": after.prefs.advertise_routes,
                })),
                now,
            ));
        }
        if before.prefs.exit_node_id != after.prefs.exit_node_id {
            out.push(event::new_event(
                types::PREFS_EXIT_NODE_CHANGED,
                LOCAL_SUBJECT_ID,
                SubjectType::Prefs,
                &before.hash,
                &after.hash,
                Some(json!({
                    "before_exit_node_id": before.prefs.exit_node_id,
                    "after_exit_node_id": after.prefs.exit_node_id,
                })),
                now,
            ));
        }
        if before.prefs.run_ssh != after.prefs.run_ssh {
            out.push(event::new_event(
                types::PREFS_RUN_SSH_CHANGED,
                LOCAL_SUBJECT_ID,
                SubjectType::Prefs,
                &before.hash,
                &after.hash,
                Some(json!({
                    "before_run_ssh": before.prefs.run_ssh,
                    "after_run_ssh": after.prefs.run_ssh,
                })),
                now,
            ));
        }
        if before.prefs.shields_up != after.prefs.shields_up {
            out.push(event::new_event(
                types::PREFS_SHIELDS_UP_CHANGED,
                LOCAL_SUBJECT_ID,
                SubjectType::Prefs,
                &before.hash,
                &after.hash,
                Some(json!({
                    "before_shields_up": before.prefs.shields_up,
                    "after_shields_up": after.prefs.shields_up,
                })),
                now,
            ));
        }

        if before.tailnet.domain != after.tailnet.domain {
            out.push(event::new_event(
                types::TAILNET_DOMAIN_CHANGED,
                &tailnet_subject(&after.tailnet.domain),
                SubjectType::Tailnet,
                &before.hash,
                &after.hash,
                Some(json!({
                    "before_domain": before.tailnet.domain,
                    "after_domain": after.tailnet.domain,
                })),
                now,
            ));
        }
        if before.tailnet.tka_enabled != after.tailnet.tka_enabled {
            out.push(event::new_event(
                types::TAILNET_TKA_ENABLED_CHANGED,
                &tailnet_subject(&after.tailnet.domain),
                SubjectType::Tailnet,
                &before.hash,
                &after.hash,
                Some(json!({
                    "before_tka_enabled": before.tailnet.tka_enabled,
                    "after_tka_enabled": after.tailnet.tka_enabled,
                })),
                now,
            ));
        }

        Ok(out)
    }
}

fn tailnet_subject(domain: &str) -> String {
    if domain.is_empty() { LOCAL_SUBJECT_ID.to_string() } else { domain.to_string() }
}
