//! External push sinks.
//!
//! The dispatcher hands every processed event to each registered sink without
//! waiting on it. Sinks typically bridge to a push transport such as the
//! WebSocket endpoint.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use super::types::EventType;
use crate::errors::SinkError;

#[async_trait]
pub trait PushSink: Send + Sync {
    /// Used in log lines.
    fn name(&self) -> &str;

    async fn send_to_user(
        &self,
        user_id: &str,
        event_type: EventType,
        payload: &serde_json::Value,
    ) -> Result<(), SinkError>;

    async fn send_to_project(
        &self,
        project_id: &str,
        event_type: EventType,
        payload: &serde_json::Value,
    ) -> Result<(), SinkError>;

    async fn broadcast_to_all(
        &self,
        event_type: EventType,
        payload: &serde_json::Value,
    ) -> Result<(), SinkError>;

    fn active_connection_count(&self) -> usize;
}

/// Who a pushed envelope is addressed to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum PushScope {
    User(String),
    Project(String),
    All,
}

impl PushScope {
    /// Whether a connection identified by `user_id` and watching
    /// `project_id` should receive an envelope with this scope.
    pub fn reaches(&self, user_id: Option<&str>, project_id: Option<&str>) -> bool {
        match self {
            Self::All => true,
            Self::User(id) => user_id == Some(id.as_str()),
            Self::Project(id) => project_id == Some(id.as_str()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushEnvelope {
    pub scope: PushScope,
    pub event_type: EventType,
    pub payload: serde_json::Value,
}

/// Push sink over a broadcast channel of serialized [`PushEnvelope`]s.
///
/// Each WebSocket connection subscribes and filters by scope on its side.
#[derive(Clone)]
pub struct BroadcastSink {
    tx: broadcast::Sender<String>,
}

impl BroadcastSink {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<String> {
        self.tx.subscribe()
    }

    fn publish(
        &self,
        scope: PushScope,
        event_type: EventType,
        payload: &serde_json::Value,
    ) -> Result<(), SinkError> {
        let envelope = PushEnvelope {
            scope,
            event_type,
            payload: payload.clone(),
        };
        let json = serde_json::to_string(&envelope)?;
        self.tx.send(json).map_err(|_| SinkError::NoReceivers)?;
        Ok(())
    }
}

#[async_trait]
impl PushSink for BroadcastSink {
    fn name(&self) -> &str {
        "broadcast"
    }

    async fn send_to_user(
        &self,
        user_id: &str,
        event_type: EventType,
        payload: &serde_json::Value,
    ) -> Result<(), SinkError> {
        self.publish(PushScope::User(user_id.to_string()), event_type, payload)
    }

    async fn send_to_project(
        &self,
        project_id: &str,
        event_type: EventType,
        payload: &serde_json::Value,
    ) -> Result<(), SinkError> {
        self.publish(
            PushScope::Project(project_id.to_string()),
            event_type,
            payload,
        )
    }

    async fn broadcast_to_all(
        &self,
        event_type: EventType,
        payload: &serde_json::Value,
    ) -> Result<(), SinkError> {
        self.publish(PushScope::All, event_type, payload)
    }

    fn active_connection_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_broadcast_sink_without_receivers() {
        let sink = BroadcastSink::new(8);
        let err = sink
            .broadcast_to_all(EventType::Moved, &json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, SinkError::NoReceivers));
        assert_eq!(sink.active_connection_count(), 0);
    }

    #[tokio::test]
    async fn test_project_envelope_shape() {
        let sink = BroadcastSink::new(8);
        let mut rx = sink.subscribe();
        assert_eq!(sink.active_connection_count(), 1);

        sink.send_to_project("p1", EventType::Moved, &json!({"task_id": "t1"}))
            .await
            .unwrap();
        let raw = rx.recv().await.unwrap();
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(value["scope"]["kind"], "project");
        assert_eq!(value["scope"]["id"], "p1");
        assert_eq!(value["event_type"], "moved");
        assert_eq!(value["payload"]["task_id"], "t1");
    }

    #[test]
    fn test_scope_reach() {
        let project = PushScope::Project("p1".into());
        assert!(project.reaches(Some("alice"), Some("p1")));
        assert!(project.reaches(None, Some("p1")));
        assert!(!project.reaches(Some("alice"), None));
        assert!(!project.reaches(Some("alice"), Some("p2")));

        let user = PushScope::User("alice".into());
        assert!(user.reaches(Some("alice"), None));
        assert!(!user.reaches(Some("bob"), None));
        assert!(!user.reaches(None, None));

        assert!(PushScope::All.reaches(None, None));
    }
}
