//! Bus d'événements du pipeline.
//!
//! Un seul type de message (`PipelineEvent`) circule entre le réconciliateur,
//! le normaliseur et les consommateurs (diffusion temps réel, alerting).
//! Le bus est créé par le kernel et injecté dans chaque service.

use serde::Serialize;
use tokio::sync::broadcast;
use tracing::trace;

use crate::metrics::MetricSample;
use crate::models::{EventRecord, GuestKind, GuestStatus, HostStatus};

const DEFAULT_CAPACITY: usize = 1024;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HostStatusChange {
    pub host_id: String,
    pub previous: Option<HostStatus>,
    pub current: HostStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GuestStatusChange {
    pub guest_id: String,
    pub host_id: String,
    pub kind: GuestKind,
    pub name: String,
    pub previous: Option<GuestStatus>,
    pub current: GuestStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum PipelineEvent {
    HostStatus(HostStatusChange),
    GuestStatus(GuestStatusChange),
    Metrics(MetricSample),
    Event(EventRecord),
}

impl PipelineEvent {
    /// Rooms ciblées par l'événement (`node:<id>`, `guest:<id>`).
    /// Une tâche d'invité résolu vise aussi la room de l'invité.
    pub fn rooms(&self) -> Vec<String> {
        match self {
            PipelineEvent::HostStatus(c) => vec![format!("node:{}", c.host_id)],
            PipelineEvent::GuestStatus(c) => vec![format!("guest:{}", c.guest_id)],
            PipelineEvent::Metrics(s) => vec![s.room()],
            PipelineEvent::Event(e) => {
                let mut rooms = vec![format!("node:{}", e.host_id)];
                rooms.extend(e.guest_id.as_ref().map(|g| format!("guest:{g}")));
                rooms
            }
        }
    }
}

#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<PipelineEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.tx.subscribe()
    }

    /// Publie sans bloquer ; sans abonné l'événement est simplement perdu
    pub fn publish(&self, event: PipelineEvent) {
        if self.tx.send(event).is_err() {
            trace!("pipeline event dropped, no subscriber");
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
