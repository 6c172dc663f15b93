use std::time::Duration as StdDuration;

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::{Notification, SinkError};

const EMBED_TITLE_LIMIT: usize = 256;
const EMBED_DESCRIPTION_LIMIT: usize = 4096;
const EMBED_FIELD_LIMIT: usize = 1024;
const PAYLOAD_SUMMARY_TRIM: usize = 860;

const COLOR_INFO: u32 = 0x3498DB;
const COLOR_WARN: u32 = 0xF39C12;
const COLOR_ERROR: u32 = 0xE74C3C;

const DEFAULT_MAX_RETRIES: u32 = 3;
const DEFAULT_BACKOFF: StdDuration = StdDuration::from_millis(200);
const REQUEST_TIMEOUT: StdDuration = StdDuration::from_secs(10);

#[derive(Serialize)]
struct DiscordPayload {
    embeds: Vec<DiscordEmbed>,
}

#[derive(Serialize)]
struct DiscordEmbed {
    #[serde(skip_serializing_if = "Option::is_none")]
    title: Option<String>,
    url: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    description: Option<String>,
    color: u32,
    timestamp: String,
    fields: Vec<DiscordEmbedField>,
}

#[derive(Serialize)]
struct DiscordEmbedField {
    name: &'static str,
    value: String,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    inline: bool,
}

/// Builds a single-embed Discord webhook payload per notification. Retry
/// and header semantics are identical to [`super::WebhookSink`].
pub struct DiscordSink {
    name: String,
    url: String,
    client: reqwest::Client,
    max_retries: u32,
    backoff: StdDuration,
}

impl DiscordSink {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        DiscordSink {
            name: name.into(),
            url: url.into(),
            client: reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build().unwrap_or_default(),
            max_retries: DEFAULT_MAX_RETRIES,
            backoff: DEFAULT_BACKOFF,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn send(&self, cancel: &CancellationToken, note: &Notification) -> Result<(), SinkError> {
        let payload = serde_json::to_vec(&embed_for_event(note))?;

        let mut last_err: Option<String> = None;
        for attempt in 0..=self.max_retries {
            let request = self
                .client
                .post(&self.url)
                .header("Content-Type", "application/json")
                .header("Idempotency-Key", &note.idempotency_key)
                .body(payload.clone());

            match request.send().await {
                Ok(resp) if resp.status().is_success() => {
                    info!(sink = %self.name, status = %resp.status(), "discord send succeeded");
                    return Ok(());
                }
                Ok(resp) => {
                    let status = resp.status();
                    last_err = Some(format!("unexpected status {status}"));
                    warn!(sink = %self.name, status_code = %status, attempt = attempt + 1, "discord send failed");
                }
                Err(e) => {
                    last_err = Some(e.to_string());
                    warn!(sink = %self.name, error = %e, attempt = attempt + 1, "discord send failed");
                }
            }

            if attempt < self.max_retries {
                let wait = self.backoff * (attempt + 1);
                tokio::select! {
                    () = cancel.cancelled() => {
                        warn!(sink = %self.name, "discord send canceled");
                        return Err(SinkError::Cancelled);
                    }
                    () = tokio::time::sleep(wait) => {}
                }
            }
        }

        Err(SinkError::ExhaustedRetries(last_err.unwrap_or_else(|| "unknown error".to_string())))
    }
}

fn embed_for_event(note: &Notification) -> DiscordPayload {
    let evt = &note.event;
    let title = truncate(&format!("Sentinel {}", evt.event_type), EMBED_TITLE_LIMIT);
    let description = truncate(
        &format!(
            "**Subject** `{:?}/{}`\n**Severity** `{}`",
            evt.subject_type, evt.subject_id, evt.severity
        ),
        EMBED_DESCRIPTION_LIMIT,
    );

    DiscordPayload {
        embeds: vec![DiscordEmbed {
            title: Some(title),
            url: "https://login.tailscale.com/admin/machines",
            description: Some(description),
            color: severity_color(&evt.severity),
            timestamp: evt.timestamp.to_rfc3339_opts(chrono::SecondsFormat::Nanos, true),
            fields: vec![
                DiscordEmbedField {
                    name: "Event Type",
                    value: format!("`{}`", evt.event_type),
                    inline: true,
                },
                DiscordEmbedField {
                    name: "Subject",
                    value: format!("`{:?}/{}`", evt.subject_type, evt.subject_id),
                    inline: true,
                },
                DiscordEmbedField { name: "Payload", value: payload_field_value(&evt.payload), inline: false },
            ],
        }],
    }
}

fn payload_field_value(payload: &Option<serde_json::Value>) -> String {
    let value = match payload {
        Some(v) if !v.is_null() => serde_json::to_string_pretty(v).unwrap_or_else(|_| "{}".to_string()),
        _ => "{}".to_string(),
    };
    let value = value.trim();
    let value = if value.len() > PAYLOAD_SUMMARY_TRIM {
        let cut = floor_char_boundary(value, PAYLOAD_SUMMARY_TRIM);
        format!("{}...", &value[..cut])
    } else {
        value.to_string()
    };
    let wrapped = format!("```json\n{value}\n```");
    truncate(&wrapped, EMBED_FIELD_LIMIT)
}

/// Largest byte index `<= index` that lands on a UTF-8 char boundary of
/// `s`. Peer-controlled strings (names, tags, routes) may contain
/// multibyte characters, so a raw byte slice at a fixed offset can split
/// one — this keeps every truncation panic-free.
fn floor_char_boundary(s: &str, index: usize) -> usize {
    if index >= s.len() {
        return s.len();
    }
    let mut idx = index;
    while idx > 0 && !s.is_char_boundary(idx) {
        idx -= 1;
    }
    idx
}

fn truncate(input: &str, limit: usize) -> String {
    if limit == 0 || input.len() <= limit {
        return input.to_string();
    }
    if limit <= 3 {
        let cut = floor_char_boundary(input, limit);
        return input[..cut].to_string();
    }
    let cut = floor_char_boundary(input, limit - 3);
    format!("{}...", &input[..cut])
}

fn severity_color(severity: &str) -> u32 {
    match severity.to_lowercase().trim() {
        "error" => COLOR_ERROR,
        "warn" | "warning" => COLOR_WARN,
        _ => COLOR_INFO,
    }
}
