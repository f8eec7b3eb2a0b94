/*!
JSON-lines capture files

One message per line: `{"printer_id": ..., "topic": ..., "payload": ...}`,
with an optional RFC 3339 `received_at`. Blank lines and lines starting with
`#` are skipped, so captures can be annotated by hand.
*/

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::io::Write;
use std::path::Path;
use time::OffsetDateTime;
use tracing::info;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapturedMessage {
    pub printer_id: String,
    pub topic: String,
    #[serde(default, with = "time::serde::rfc3339::option", skip_serializing_if = "Option::is_none")]
    pub received_at: Option<OffsetDateTime>,
    pub payload: Value,
}

impl CapturedMessage {
    pub fn new(printer_id: &str, payload: Value) -> Self {
        Self {
            printer_id: printer_id.to_string(),
            topic: crate::payloads::report_topic(printer_id),
            received_at: None,
            payload,
        }
    }

    pub fn at(mut self, received_at: OffsetDateTime) -> Self {
        self.received_at = Some(received_at);
        self
    }
}

pub fn load_capture<P: AsRef<Path>>(path: P) -> Result<Vec<CapturedMessage>> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("reading capture {}", path.display()))?;

    let mut messages = Vec::new();
    for (index, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let message: CapturedMessage = serde_json::from_str(line)
            .with_context(|| format!("{}:{}: invalid capture line", path.display(), index + 1))?;
        messages.push(message);
    }
    info!(path = %path.display(), count = messages.len(), "capture loaded");
    Ok(messages)
}

pub fn write_capture<P: AsRef<Path>>(path: P, messages: &[CapturedMessage]) -> Result<()> {
    let path = path.as_ref();
    let mut file = std::fs::File::create(path)
        .with_context(|| format!("creating capture {}", path.display()))?;
    for message in messages {
        serde_json::to_writer(&mut file, message)?;
        file.write_all(b"\n")?;
    }
    Ok(())
}
