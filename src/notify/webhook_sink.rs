use std::time::Duration as StdDuration;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::{Notification, SinkError};

const DEFAULT_MAX_RETRIES: u32 = 3;
const DEFAULT_BACKOFF: StdDuration = StdDuration::from_millis(200);
const REQUEST_TIMEOUT: StdDuration = StdDuration::from_secs(10);

/// POSTs notifications as JSON, retrying with linear backoff on non-2xx
/// responses or transport errors.
pub struct WebhookSink {
    name: String,
    url: String,
    client: reqwest::Client,
    max_retries: u32,
    backoff: StdDuration,
}

impl WebhookSink {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        WebhookSink {
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
        let payload = serde_json::to_vec(note)?;

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
                    info!(sink = %self.name, status = %resp.status(), "webhook send succeeded");
                    return Ok(());
                }
                Ok(resp) => {
                    let status = resp.status();
                    last_err = Some(format!("unexpected status {status}"));
                    warn!(
                        sink = %self.name,
                        status_code = %status,
                        attempt = attempt + 1,
                        max_attempts = self.max_retries + 1,
                        "webhook send failed"
                    );
                }
                Err(e) => {
                    last_err = Some(e.to_string());
                    warn!(
                        sink = %self.name,
                        error = %e,
                        attempt = attempt + 1,
                        max_attempts = self.max_retries + 1,
                        "webhook send failed"
                    );
                }
            }

            if attempt < self.max_retries {
                let wait = self.backoff * (attempt + 1);
                tokio::select! {
                    () = cancel.cancelled() => {
                        warn!(sink = %self.name, "webhook send canceled");
                        return Err(SinkError::Cancelled);
                    }
                    () = tokio::time::sleep(wait) => {}
                }
            }
        }

        Err(SinkError::ExhaustedRetries(last_err.unwrap_or_else(|| "unknown error".to_string())))
    }
}
