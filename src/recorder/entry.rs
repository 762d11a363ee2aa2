//! Trace line format.
//!
//! One JSON object per line:
//!
//! ```text
//! {"ts":"2026-03-01T12:00:00.120Z","dir":"RX","topic":"telemetry","payload":{...},"raw_len":412}
//! ```

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Direction {
    /// Outbound (command)
    Tx,
    /// Inbound (telemetry, replies)
    Rx,
    /// Recorder markers
    Meta,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceEntry {
    pub ts: DateTime<Utc>,
    pub dir: Direction,
    pub topic: String,
    pub payload: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_len: Option<u64>,
}

impl TraceEntry {
    /// Serialize as one newline-terminated line
    pub fn to_line(&self) -> serde_json::Result<Vec<u8>> {
        let mut line = serde_json::to_vec(self)?;
        line.push(b'\n');
        Ok(line)
    }
}

/// Payload as observed on the wire
#[derive(Debug, Clone, PartialEq)]
pub enum TracePayload {
    Json(Value),
    Text(String),
    Bytes(Bytes),
}

impl TracePayload {
    /// Render for the trace: structured when it decodes as JSON, otherwise a
    /// plain string (text) or hex string (bytes).
    pub fn into_value(self) -> Value {
        match self {
            TracePayload::Json(value) => value,
            TracePayload::Text(text) => serde_json::from_str(&text).unwrap_or(Value::String(text)),
            TracePayload::Bytes(bytes) => {
                serde_json::from_slice(&bytes).unwrap_or_else(|_| Value::String(hex::encode(&bytes)))
            }
        }
    }

    /// Wire length, known only for byte payloads
    pub fn raw_len(&self) -> Option<u64> {
        match self {
            TracePayload::Bytes(bytes) => Some(bytes.len() as u64),
            _ => None,
        }
    }
}

impl From<Value> for TracePayload {
    fn from(value: Value) -> Self {
        TracePayload::Json(value)
    }
}
