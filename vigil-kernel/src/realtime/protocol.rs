//! Messages du canal temps réel.
//!
//! Serveur → client : `{type, payload, timestamp, room?}`. Client → serveur :
//! `{type, payload?}`. Les deux sens sont des unions fermées, validées une
//! seule fois à la frontière (désérialisation / sérialisation).

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::bus::{GuestStatusChange, HostStatusChange, PipelineEvent};
use crate::metrics::{MetricSample, StoredSample};
use crate::models::{ClusterTopology, EventRecord, GuestSnapshot, HostSnapshot};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SnapshotPayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hosts: Option<Vec<HostSnapshot>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub guests: Option<Vec<GuestSnapshot>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metrics: Option<Vec<MetricSample>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConnectedPayload {
    pub client_id: String,
    pub topology: ClusterTopology,
    #[serde(flatten)]
    pub snapshot: SnapshotPayload,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistoryPayload {
    pub entity_id: String,
    pub samples: Vec<StoredSample>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServerConfigPayload {
    pub cluster: ClusterTopology,
    pub hosts: Vec<String>,
    pub poll_interval_secs: u64,
    pub event_interval_secs: u64,
    pub retention_minutes: u64,
    pub history_bound: usize,
    pub min_update_interval_ms: u64,
    pub dev_mode: bool,
    pub mock_data: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorPayload {
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "payload", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ServerMessage {
    Connected(ConnectedPayload),
    NodeStatusUpdate(HostStatusChange),
    GuestStatusUpdate(GuestStatusChange),
    MetricsUpdate(MetricSample),
    Event(EventRecord),
    Error(ErrorPayload),
    Snapshot(SnapshotPayload),
    History(HistoryPayload),
    Pong,
    ServerConfig(ServerConfigPayload),
}

impl From<PipelineEvent> for ServerMessage {
    fn from(event: PipelineEvent) -> Self {
        match event {
            PipelineEvent::HostStatus(c) => ServerMessage::NodeStatusUpdate(c),
            PipelineEvent::GuestStatus(c) => ServerMessage::GuestStatusUpdate(c),
            PipelineEvent::Metrics(s) => ServerMessage::MetricsUpdate(s),
            PipelineEvent::Event(e) => ServerMessage::Event(e),
        }
    }
}

impl ServerMessage {
    pub fn error(message: impl Into<String>) -> Self {
        ServerMessage::Error(ErrorPayload { message: message.into() })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Envelope {
    #[serde(flatten)]
    pub message: ServerMessage,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub room: Option<String>,
}

impl Envelope {
    pub fn new(message: ServerMessage) -> Self {
        Self { message, timestamp: OffsetDateTime::now_utc(), room: None }
    }

    pub fn in_room(mut self, room: impl Into<String>) -> Self {
        self.room = Some(room.into());
        self
    }

    pub fn to_text(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TargetId {
    pub id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClientRequest {
    JoinNode(TargetId),
    LeaveNode(TargetId),
    JoinGuest(TargetId),
    LeaveGuest(TargetId),
    RefreshNodes,
    RefreshGuests,
    RefreshMetrics,
    RequestHistory(TargetId),
    Ping,
    RequestConfig,
}

impl ClientRequest {
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

pub fn node_room(id: &str) -> String {
    format!("node:{id}")
}

pub fn guest_room(id: &str) -> String {
    format!("guest:{id}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::HostStatus;
    use serde_json::Value;

    #[test]
    fn test_envelope_shape() {
        let env = Envelope::new(ServerMessage::NodeStatusUpdate(HostStatusChange {
            host_id: "pve1".into(),
            previous: Some(HostStatus::Online),
            current: HostStatus::Offline,
        }))
        .in_room("node:pve1");
        let v: Value = serde_json::from_str(&env.to_text().unwrap()).unwrap();
        assert_eq!(v["type"], "NODE_STATUS_UPDATE");
        assert_eq!(v["payload"]["current"], "offline");
        assert_eq!(v["room"], "node:pve1");
        assert!(v["timestamp"].is_string());

        let v: Value = serde_json::to_value(Envelope::new(ServerMessage::Pong)).unwrap();
        assert_eq!(v["type"], "PONG");
        assert!(v.get("room").is_none());
    }

    #[test]
    fn test_client_requests_parse() {
        assert_eq!(
            ClientRequest::parse(r#"{"type":"JOIN_GUEST","payload":{"id":"lab-vm-101"}}"#).unwrap(),
            ClientRequest::JoinGuest(TargetId { id: "lab-vm-101".into() })
        );
        assert_eq!(ClientRequest::parse(r#"{"type":"PING"}"#).unwrap(), ClientRequest::Ping);
        assert!(ClientRequest::parse(r#"{"type":"DROP_TABLES"}"#).is_err());
        assert!(ClientRequest::parse("not json").is_err());
    }
}
