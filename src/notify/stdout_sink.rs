use std::io::Write;
use std::sync::Mutex;

use serde::Serialize;

use super::{Notification, SinkError};

const LOG_SOURCE_SINK: &str = "sink";

#[derive(Serialize)]
struct StdoutLine<'a> {
    log_source: &'static str,
    sink: &'a str,
    #[serde(flatten)]
    notification: &'a Notification,
}

/// Writes one JSON line per notification to stdout, serialized under an
/// internal lock so concurrent dispatch can't interleave a line.
pub struct StdoutSink {
    name: String,
    out: Mutex<Box<dyn Write + Send>>,
}

impl StdoutSink {
    pub fn new(name: impl Into<String>) -> Self {
        StdoutSink { name: name.into(), out: Mutex::new(Box::new(std::io::stdout())) }
    }

    #[cfg(test)]
    pub fn with_writer(name: impl Into<String>, writer: Box<dyn Write + Send>) -> Self {
        StdoutSink { name: name.into(), out: Mutex::new(writer) }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn send(&self, note: &Notification) -> Result<(), SinkError> {
        let line = StdoutLine { log_source: LOG_SOURCE_SINK, sink: &self.name, notification: note };
        let mut payload = serde_json::to_vec(&line)?;
        payload.push(b'\n');
        let mut guard = self.out.lock().unwrap_or_else(|e| e.into_inner());
        guard.write_all(&payload)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{SubjectType, types};
    use chrono::Utc;
    use std::sync::Arc;

    #[derive(Clone)]
    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().write(buf)
        }
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn send_writes_one_json_line_with_sink_and_log_source() {
        let buf = Arc::new(Mutex::new(Vec::new()));
        let sink = StdoutSink::with_writer("stdout", Box::new(SharedBuf(buf.clone())));
        let evt = crate::event::new_event(types::PEER_ONLINE, "p1", SubjectType::Peer, "", "h", None, Utc::now());
        let note = Notification { event: evt, idempotency_key: "k".into() };
        sink.send(&note).unwrap();
        let written = buf.lock().unwrap().clone();
        let text = String::from_utf8(written).unwrap();
        assert!(text.ends_with('\n'));
        let parsed: serde_json::Value = serde_json::from_str(text.trim_end()).unwrap();
        assert_eq!(parsed["log_source"], "sink");
        assert_eq!(parsed["sink"], "stdout");
        assert_eq!(parsed["idempotency_key"], "k");
        assert_eq!(parsed["event"]["event_type"], types::PEER_ONLINE);
    }
}
