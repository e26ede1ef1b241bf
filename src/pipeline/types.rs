//! Core data structures shared by the classification pipeline

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Event name of the derived tagging event
pub const TAG_EVENT_NAME: &str = "userTag";

/// Tag value attached to frequent visitors
pub const IS_FREQUENT_VISITOR_TAG: &str = "isFrequentVisitor";

/// Time source for window and checkpoint bookkeeping
///
/// Production code uses [`system_clock`]; tests inject a fixed or stepped
/// clock so interval keys and checkpoint deadlines are deterministic.
pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

pub fn system_clock() -> Clock {
    Arc::new(Utc::now)
}

/// A raw record as delivered by the stream substrate
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamRecord {
    /// Position of the record within its shard (monotonic)
    pub sequence_number: u64,
    pub partition_key: String,
    pub data: Vec<u8>,
}

impl StreamRecord {
    pub fn new(sequence_number: u64, partition_key: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        Self {
            sequence_number,
            partition_key: partition_key.into(),
            data: data.into(),
        }
    }
}

impl std::fmt::Display for StreamRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "seq={} key={} bytes={}",
            self.sequence_number,
            self.partition_key,
            self.data.len()
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VisitKind {
    /// `userSessionBecomesActive`
    SessionActive,
    /// `userVisitsStore`
    StoreVisit,
    Other,
}

impl VisitKind {
    pub fn from_event_name(name: &str) -> Self {
        match name {
            "userSessionBecomesActive" => VisitKind::SessionActive,
            "userVisitsStore" => VisitKind::StoreVisit,
            _ => VisitKind::Other,
        }
    }

    pub fn is_visit(&self) -> bool {
        !matches!(self, VisitKind::Other)
    }
}

/// Parsed inbound visit event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VisitEvent {
    pub kind: VisitKind,
    pub session_id: Option<String>,
    pub user_id: Option<String>,
}

impl VisitEvent {
    pub fn new(kind: VisitKind, session_id: Option<String>, user_id: Option<String>) -> Self {
        Self {
            kind,
            session_id: session_id.and_then(normalize_identifier),
            user_id: user_id.and_then(normalize_identifier),
        }
    }

    /// Resolution key for this visit, `None` when neither identifier is known
    pub fn identity(&self) -> Option<Identity> {
        match (&self.user_id, &self.session_id) {
            (Some(user), _) => Some(Identity::User(user.clone())),
            (None, Some(session)) => Some(Identity::Session(session.clone())),
            (None, None) => None,
        }
    }
}

/// Empty identifiers mean "absent"
pub fn normalize_identifier(raw: String) -> Option<String> {
    if raw.is_empty() {
        None
    } else {
        Some(raw)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Identity {
    /// Authenticated user id (canonical once known)
    User(String),
    /// Anonymous session id
    Session(String),
}

impl std::fmt::Display for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Identity::User(id) => write!(f, "user:{}", id),
            Identity::Session(id) => write!(f, "session:{}", id),
        }
    }
}

/// Outbound tagging event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TagEvent {
    pub event_name: String,
    pub event_source: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_session_id: Option<String>,
    pub tag: String,
}

impl TagEvent {
    pub fn frequent_visitor(agent_name: &str, session_id: Option<&str>, user_id: Option<&str>) -> Self {
        Self {
            event_name: TAG_EVENT_NAME.to_string(),
            event_source: agent_name.to_string(),
            user_id: user_id.map(str::to_string),
            user_session_id: session_id.map(str::to_string),
            tag: IS_FREQUENT_VISITOR_TAG.to_string(),
        }
    }

    /// Session id routes follow-up tags for a session to the same downstream shard
    pub fn partition_key(&self) -> &str {
        self.user_session_id.as_deref().unwrap_or(&self.event_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_identifiers_are_absent() {
        let event = VisitEvent::new(
            VisitKind::StoreVisit,
            Some(String::new()),
            Some(String::new()),
        );
        assert_eq!(event.session_id, None);
        assert_eq!(event.user_id, None);
        assert_eq!(event.identity(), None);
    }

    #[test]
    fn test_user_id_wins_identity() {
        let event = VisitEvent::new(
            VisitKind::SessionActive,
            Some("s1".to_string()),
            Some("u1".to_string()),
        );
        assert_eq!(event.identity(), Some(Identity::User("u1".to_string())));

        let anon = VisitEvent::new(VisitKind::SessionActive, Some("s1".to_string()), None);
        assert_eq!(anon.identity(), Some(Identity::Session("s1".to_string())));
    }

    #[test]
    fn test_event_name_mapping() {
        assert_eq!(VisitKind::from_event_name("userVisitsStore"), VisitKind::StoreVisit);
        assert_eq!(
            VisitKind::from_event_name("userSessionBecomesActive"),
            VisitKind::SessionActive
        );
        assert_eq!(VisitKind::from_event_name("userTag"), VisitKind::Other);
        assert!(!VisitKind::Other.is_visit());
    }

    #[test]
    fn test_tag_event_wire_format() {
        let tag = TagEvent::frequent_visitor("Agent", Some("s1"), None);
        let json: serde_json::Value = serde_json::to_value(&tag).unwrap();

        assert_eq!(json["eventName"], "userTag");
        assert_eq!(json["eventSource"], "Agent");
        assert_eq!(json["userSessionId"], "s1");
        assert_eq!(json["tag"], "isFrequentVisitor");
        assert!(json.get("userId").is_none());
        assert_eq!(tag.partition_key(), "s1");
    }

    #[test]
    fn test_partition_key_falls_back_to_event_name() {
        let tag = TagEvent::frequent_visitor("Agent", None, Some("u1"));
        assert_eq!(tag.partition_key(), TAG_EVENT_NAME);
    }
}
