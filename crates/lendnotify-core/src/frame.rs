//! Wire framing.
//!
//! Inbound frames are loose JSON objects:
//! `{ type, notificationType?, subject?|title?, content?, timestamp?, id? }`,
//! plus the heartbeat acknowledgement `{ type: "pong", timestamp }`.
//! Outbound frames are `{ type, ...payload }`.

use crate::message::{Message, NotificationType, Priority};
use chrono::{DateTime, Local, NaiveDate, NaiveDateTime, TimeZone};
use serde::Deserialize;
use serde_json::{Map, Value};

const DEFAULT_TITLE: &str = "New message";

/// An inbound frame after adaptation.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// Heartbeat acknowledgement. Never delivered to message listeners.
    Pong { timestamp: i64 },
    Message(Message),
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("malformed frame: {0}")]
    Json(#[from] serde_json::Error),
    #[error("frame is not a JSON object")]
    NotAnObject,
}

/// Typed view of the known fields. Each stays a raw value so one field of an
/// unexpected shape does not cost the whole notification.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InboundFrame {
    #[serde(rename = "type")]
    kind: Option<Value>,
    notification_type: Option<Value>,
    subject: Option<Value>,
    title: Option<Value>,
    content: Option<Value>,
    id: Option<Value>,
}

/// Scalars render as text; empty strings, null and containers count as absent.
fn text_field(value: Option<Value>) -> Option<String> {
    match value? {
        Value::String(s) if s.is_empty() => None,
        Value::String(s) => Some(s),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Null | Value::Array(_) | Value::Object(_) => None,
    }
}

/// Parse and adapt one raw text frame. `now` (epoch millis) backs missing
/// ids and unparsable timestamps.
pub fn parse_frame(text: &str, now: i64) -> Result<Frame, FrameError> {
    let value: Value = serde_json::from_str(text)?;
    adapt(value, now)
}

fn adapt(value: Value, now: i64) -> Result<Frame, FrameError> {
    if !value.is_object() {
        return Err(FrameError::NotAnObject);
    }
    let raw = InboundFrame::deserialize(&value)?;
    let timestamp = value
        .get("timestamp")
        .map(|t| parse_timestamp(t, now))
        .unwrap_or(now);

    let kind = text_field(raw.kind);
    if kind.as_deref() == Some("pong") {
        return Ok(Frame::Pong { timestamp });
    }

    let sub_type = text_field(raw.notification_type);
    let priority = infer_priority(sub_type.as_deref());
    let kind = infer_type(kind.as_deref(), sub_type.as_deref());

    let id = text_field(raw.id).unwrap_or_else(|| format!("msg_{now}"));
    let title = text_field(raw.subject)
        .or_else(|| text_field(raw.title))
        .unwrap_or_else(|| DEFAULT_TITLE.to_string());

    Ok(Frame::Message(Message {
        id,
        kind,
        title,
        content: text_field(raw.content).unwrap_or_default(),
        timestamp,
        priority,
        read: false,
        data: value,
    }))
}

fn infer_type(kind: Option<&str>, sub_type: Option<&str>) -> NotificationType {
    match (kind, sub_type) {
        (Some("notification"), Some(tag)) => {
            NotificationType::from_server_tag(tag).unwrap_or(NotificationType::Notification)
        }
        (Some("system"), _) => NotificationType::System,
        _ => NotificationType::Notification,
    }
}

fn infer_priority(sub_type: Option<&str>) -> Priority {
    match sub_type {
        Some("SECURITY_ALERT") => Priority::Urgent,
        Some("SYSTEM_MAINTENANCE") => Priority::High,
        _ => Priority::Normal,
    }
}

/// Accepts an epoch-millis number or a date-time string. A space between
/// date and time is read as `T`. Date-times without an offset are local
/// time; a bare date is midnight UTC. Anything else falls back to `now`.
pub fn parse_timestamp(value: &Value, now: i64) -> i64 {
    match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f as i64))
            .unwrap_or(now),
        Value::String(text) => parse_text_timestamp(text).unwrap_or(now),
        _ => now,
    }
}

fn parse_text_timestamp(text: &str) -> Option<i64> {
    let normalized = text.trim().replacen(' ', "T", 1);
    if let Ok(dt) = DateTime::parse_from_rfc3339(&normalized) {
        return Some(dt.timestamp_millis());
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(&normalized, format) {
            return Local
                .from_local_datetime(&naive)
                .earliest()
                .map(|dt| dt.timestamp_millis());
        }
    }
    NaiveDate::parse_from_str(&normalized, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc().timestamp_millis())
}

/// Serialize an outbound frame. Object payload fields are merged next to
/// `type`; `type` itself always carries `event_type`. Non-object payloads
/// go under `data`.
pub fn encode_outbound(event_type: &str, payload: Value) -> Result<String, FrameError> {
    let mut frame = Map::new();
    frame.insert("type".to_string(), Value::String(event_type.to_string()));
    match payload {
        Value::Object(fields) => {
            for (key, value) in fields {
                if key != "type" {
                    frame.insert(key, value);
                }
            }
        }
        Value::Null => {}
        other => {
            frame.insert("data".to_string(), other);
        }
    }
    Ok(serde_json::to_string(&Value::Object(frame))?)
}

/// The heartbeat frame sent while connected.
pub fn ping_frame() -> String {
    r#"{"type":"ping"}"#.to_string()
}
