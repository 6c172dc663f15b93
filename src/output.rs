//! Human-readable rendering of a diff event list for the `sentinel diff` and
//! `sentinel dump-netmap` subcommands. The stdout sink (§4.5) emits JSON for
//! machine consumption; this module is for a human staring at a terminal.
//!
//! Colors are applied with plain ANSI escape codes rather than a crate —
//! the original's `lipgloss` has no direct Rust equivalent in this stack,
//! and the palette here is small enough not to need one. Honors `no_color`
//! (config) and the `NO_COLOR` environment variable convention.

use crate::event::Event;

const RESET: &str = "\x1b[0m";
const GREEN: &str = "\x1b[32m";
const RED: &str = "\x1b[31m";
const YELLOW: &str = "\x1b[33m";
const CYAN: &str = "\x1b[36m";
const DIM: &str = "\x1b[2m";

/// Whether color escapes should be suppressed: either the caller asked for
/// it explicitly, or the `NO_COLOR` environment variable is set (non-empty),
/// per the https://no-color.org convention.
pub fn color_disabled(no_color: bool) -> bool {
    no_color || std::env::var_os("NO_COLOR").is_some_and(|v| !v.is_empty())
}

fn colorize(text: &str, color: &str, disabled: bool) -> String {
    if disabled {
        text.to_string()
    } else {
        format!("{color}{text}{RESET}")
    }
}

/// Coarse color bucket for an event type: additions/online in green,
/// removals/offline in red, field-level changes in yellow, everything else
/// (daemon/prefs/tailnet) in cyan.
fn event_color(event_type: &str) -> &'static str {
    if event_type.ends_with(".online") || event_type.ends_with(".added") {
        GREEN
    } else if event_type.ends_with(".offline") || event_type.ends_with(".removed") || event_type.ends_with(".expired")
    {
        RED
    } else if event_type.ends_with(".changed") {
        YELLOW
    } else {
        CYAN
    }
}

/// Renders a list of diff events as one line per event:
/// `<timestamp> <event_type> subject=<id> (<subject_type>)`.
/// An empty list renders as a single dimmed "no changes detected" line.
pub fn render_diff(events: &[Event], no_color: bool) -> String {
    let disabled = color_disabled(no_color);
    if events.is_empty() {
        return colorize("no changes detected", DIM, disabled);
    }

    let mut out = String::new();
    for evt in events {
        let ts = evt.timestamp.to_rfc3339_opts(chrono::SecondsFormat::Secs, true);
        let type_colored = colorize(&evt.event_type, event_color(&evt.event_type), disabled);
        out.push_str(&format!(
            "{ts} {type_colored} subject={} ({:?})\n",
            evt.subject_id, evt.subject_type
        ));
    }
    out.pop();
    out
}
