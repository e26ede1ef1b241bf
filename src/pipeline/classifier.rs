//! Event classification from raw record payloads

use super::errors::ParseError;
use super::types::{VisitEvent, VisitKind};
use serde::Deserialize;
use serde_json::Value;

/// Inbound document shape; unknown fields are ignored
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InboundPayload {
    #[serde(default)]
    event_name: Option<Value>,
    #[serde(default)]
    user_session_id: Option<Value>,
    #[serde(default)]
    user_id: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification {
    /// A visit that feeds the frequency tracker
    Visit(VisitEvent),
    /// Recognised document with an event name we do not handle
    Ignored { event_name: String },
    /// No `eventName` field at all
    Unnamed,
}

/// Classify a raw payload
///
/// Only decoding failures are errors. Documents without an event name and
/// events of other kinds are valid input that this agent simply skips.
pub fn classify(data: &[u8]) -> Result<Classification, ParseError> {
    let text = std::str::from_utf8(data)?;
    let document: Value = serde_json::from_str(text)?;
    if !document.is_object() {
        return Err(ParseError::NotAnObject);
    }
    let payload: InboundPayload = serde_json::from_value(document)?;

    let event_name = match payload.event_name.as_ref().and_then(value_text) {
        Some(name) => name,
        None => return Ok(Classification::Unnamed),
    };

    let kind = VisitKind::from_event_name(&event_name);
    if !kind.is_visit() {
        return Ok(Classification::Ignored { event_name });
    }

    Ok(Classification::Visit(VisitEvent::new(
        kind,
        payload.user_session_id.as_ref().and_then(value_text),
        payload.user_id.as_ref().and_then(value_text),
    )))
}

/// Text rendering of a scalar JSON value
fn value_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Null | Value::Array(_) | Value::Object(_) => None,
    }
}
