mod normalizer;
mod rate;
mod storage;

pub use normalizer::MetricsNormalizer;
pub use rate::{counter_rate, RateSmoother};
pub use storage::{ByteSize, ByteUnit, StoredSample};

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::models::{GuestKind, IoCounters, Usage};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Host,
    Vm,
    Container,
}

impl From<GuestKind> for EntityKind {
    fn from(kind: GuestKind) -> Self {
        match kind {
            GuestKind::Vm => EntityKind::Vm,
            GuestKind::Container => EntityKind::Container,
        }
    }
}

impl EntityKind {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.to_ascii_lowercase().as_str() {
            "host" | "node" => Some(EntityKind::Host),
            "vm" | "qemu" => Some(EntityKind::Vm),
            "container" | "ct" | "lxc" => Some(EntityKind::Container),
            _ => None,
        }
    }
}

/// Échantillon normalisé d'une entité (hôte ou invité)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSample {
    pub entity_id: String,
    pub kind: EntityKind,
    pub host_id: String,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    pub cpu_percent: f64,
    pub memory_percent: f64,
    pub memory: Usage,
    pub disk: Usage,
    pub net_in_rate: f64,
    pub net_out_rate: f64,
    pub disk_read_rate: f64,
    pub disk_write_rate: f64,
    /// Compteurs bruts conservés pour la continuité du calcul de débit
    pub counters: IoCounters,
}

impl MetricSample {
    pub fn room(&self) -> String {
        match self.kind {
            EntityKind::Host => format!("node:{}", self.entity_id),
            EntityKind::Vm | EntityKind::Container => format!("guest:{}", self.entity_id),
        }
    }

    pub fn is_guest(&self) -> bool {
        self.kind != EntityKind::Host
    }
}
