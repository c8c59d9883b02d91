use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use time::OffsetDateTime;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HostStatus {
    Online,
    Offline,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GuestKind {
    Vm,
    Container,
}

impl GuestKind {
    /// Segment utilisé dans les identifiants d'invités
    pub fn as_str(&self) -> &'static str {
        match self {
            GuestKind::Vm => "vm",
            GuestKind::Container => "container",
        }
    }

    /// Segment de chemin côté API amont
    pub fn api_path(&self) -> &'static str {
        match self {
            GuestKind::Vm => "qemu",
            GuestKind::Container => "lxc",
        }
    }
}

impl fmt::Display for GuestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GuestStatus {
    Running,
    Stopped,
    Paused,
    Unknown,
}

impl GuestStatus {
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "running" => GuestStatus::Running,
            "stopped" => GuestStatus::Stopped,
            "paused" | "suspended" | "prelaunch" => GuestStatus::Paused,
            _ => GuestStatus::Unknown,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Usage {
    pub used: u64,
    pub total: u64,
}

impl Usage {
    pub fn percent(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.used as f64 / self.total as f64 * 100.0
        }
    }
}

/// Photo d'un hôte, remplacée intégralement à chaque poll
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostSnapshot {
    pub id: String,
    pub name: String,
    pub canonical_name: Option<String>,
    pub status: HostStatus,
    /// Fraction 0.0..=1.0 comme renvoyée par l'API
    pub cpu: f64,
    pub memory: Usage,
    pub disk: Usage,
    pub swap: Usage,
    pub load_avg: [f64; 3],
    pub uptime: u64,
    #[serde(with = "time::serde::rfc3339")]
    pub polled_at: OffsetDateTime,
}

impl HostSnapshot {
    pub fn offline(id: &str, name: &str, canonical_name: Option<String>) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            canonical_name,
            status: HostStatus::Offline,
            cpu: 0.0,
            memory: Usage::default(),
            disk: Usage::default(),
            swap: Usage::default(),
            load_avg: [0.0; 3],
            uptime: 0,
            polled_at: OffsetDateTime::now_utc(),
        }
    }

    pub fn is_online(&self) -> bool {
        self.status == HostStatus::Online
    }
}

/// Compteurs cumulés d'un invité (octets depuis le démarrage)
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct IoCounters {
    pub net_in: u64,
    pub net_out: u64,
    pub disk_read: u64,
    pub disk_write: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GuestSnapshot {
    pub id: String,
    pub vmid: u32,
    pub name: String,
    pub kind: GuestKind,
    pub host_id: String,
    pub status: GuestStatus,
    pub cpu: f64,
    pub cpus: u32,
    pub memory: Usage,
    pub disk: Usage,
    pub counters: IoCounters,
    pub uptime: u64,
    #[serde(with = "time::serde::rfc3339")]
    pub polled_at: OffsetDateTime,
}

impl GuestSnapshot {
    /// Vue d'un hôte non primaire : arrêté, métriques à zéro
    pub fn demoted(mut self) -> Self {
        self.status = GuestStatus::Stopped;
        self.cpu = 0.0;
        self.memory.used = 0;
        self.disk.used = 0;
        self.counters = IoCounters::default();
        self.uptime = 0;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ClusterTopology {
    pub is_cluster: bool,
    pub cluster_name: String,
}

impl ClusterTopology {
    pub fn standalone() -> Self {
        Self::default()
    }

    pub fn cluster(name: impl Into<String>) -> Self {
        Self { is_cluster: true, cluster_name: name.into() }
    }
}

/// Entrée du journal de tâches d'un hôte
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    pub host_id: String,
    pub upid: String,
    pub task_type: String,
    /// vmid de l'invité concerné, None pour un événement niveau hôte
    pub guest_vmid: Option<u32>,
    /// Identifiant résolu de l'invité s'il est connu de l'inventaire
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guest_id: Option<String>,
    pub user: Option<String>,
    pub status: Option<String>,
    /// Horodatage unix (secondes) du début de la tâche
    pub started_at: i64,
}

pub type HostsMap = HashMap<String, HostSnapshot>;
pub type GuestsMap = HashMap<String, GuestSnapshot>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_guest_status_parse() {
        assert_eq!(GuestStatus::parse("running"), GuestStatus::Running);
        assert_eq!(GuestStatus::parse(" Stopped "), GuestStatus::Stopped);
        assert_eq!(GuestStatus::parse("suspended"), GuestStatus::Paused);
        assert_eq!(GuestStatus::parse("weird"), GuestStatus::Unknown);
    }

    #[test]
    fn test_usage_percent() {
        assert_eq!(Usage { used: 0, total: 0 }.percent(), 0.0);
        assert_eq!(Usage { used: 50, total: 200 }.percent(), 25.0);
    }
}
