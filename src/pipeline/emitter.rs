//! Tag event emission back onto the stream

use super::errors::{ProcessingError, PublishError};
use super::types::TagEvent;
use async_trait::async_trait;
use std::sync::Arc;

/// Publishing side of the stream substrate
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Put one record onto the stream under `partition_key`
    async fn publish(&self, partition_key: &str, payload: &[u8]) -> Result<(), PublishError>;

    /// Get publisher type for logging
    fn publisher_type(&self) -> &'static str;
}

/// Builds and publishes `userTag` events for frequent visitors
///
/// Publish failures are returned to the caller; the dispatcher's retry loop
/// owns retrying them.
#[derive(Clone)]
pub struct TagEmitter {
    publisher: Arc<dyn EventPublisher>,
    agent_name: String,
}

impl TagEmitter {
    pub fn new(publisher: Arc<dyn EventPublisher>, agent_name: impl Into<String>) -> Self {
        Self {
            publisher,
            agent_name: agent_name.into(),
        }
    }

    pub fn agent_name(&self) -> &str {
        &self.agent_name
    }

    pub async fn emit(
        &self,
        session_id: Option<&str>,
        user_id: Option<&str>,
    ) -> Result<TagEvent, ProcessingError> {
        let event = TagEvent::frequent_visitor(&self.agent_name, session_id, user_id);
        let payload = serde_json::to_vec(&event)?;

        self.publisher
            .publish(event.partition_key(), &payload)
            .await?;

        log::info!(
            "🏷️  Tagged frequent visitor via {}: {}",
            self.publisher.publisher_type(),
            String::from_utf8_lossy(&payload)
        );
        Ok(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct CapturingPublisher {
        published: Mutex<Vec<(String, Vec<u8>)>>,
    }

    #[async_trait]
    impl EventPublisher for CapturingPublisher {
        async fn publish(&self, partition_key: &str, payload: &[u8]) -> Result<(), PublishError> {
            self.published
                .lock()
                .unwrap()
                .push((partition_key.to_string(), payload.to_vec()));
            Ok(())
        }

        fn publisher_type(&self) -> &'static str {
            "capture"
        }
    }

    struct RejectingPublisher;

    #[async_trait]
    impl EventPublisher for RejectingPublisher {
        async fn publish(&self, _partition_key: &str, _payload: &[u8]) -> Result<(), PublishError> {
            Err(PublishError::Rejected {
                stream: "test-stream".to_string(),
                message: "throughput exceeded".to_string(),
            })
        }

        fn publisher_type(&self) -> &'static str {
            "reject"
        }
    }

    #[tokio::test]
    async fn test_emit_uses_session_partition_key() {
        let publisher = Arc::new(CapturingPublisher::default());
        let emitter = TagEmitter::new(publisher.clone(), "TestAgent");

        let event = emitter.emit(Some("s1"), Some("u1")).await.unwrap();
        assert_eq!(event.user_id.as_deref(), Some("u1"));

        let published = publisher.published.lock().unwrap();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].0, "s1");

        let json: serde_json::Value = serde_json::from_slice(&published[0].1).unwrap();
        assert_eq!(json["eventName"], "userTag");
        assert_eq!(json["eventSource"], "TestAgent");
        assert_eq!(json["userId"], "u1");
        assert_eq!(json["userSessionId"], "s1");
        assert_eq!(json["tag"], "isFrequentVisitor");
    }

    #[tokio::test]
    async fn test_emit_omits_unknown_user() {
        let publisher = Arc::new(CapturingPublisher::default());
        let emitter = TagEmitter::new(publisher.clone(), "TestAgent");

        emitter.emit(Some("s1"), None).await.unwrap();

        let published = publisher.published.lock().unwrap();
        let json: serde_json::Value = serde_json::from_slice(&published[0].1).unwrap();
        assert!(json.get("userId").is_none());
    }

    #[tokio::test]
    async fn test_publish_failure_propagates() {
        let emitter = TagEmitter::new(Arc::new(RejectingPublisher), "TestAgent");
        let result = emitter.emit(Some("s1"), None).await;
        assert!(matches!(
            result,
            Err(ProcessingError::Publish(PublishError::Rejected { .. }))
        ));
    }
}
