//! Surface REST de l'API de gestion des hyperviseurs.
//!
//! `ManagementApi` est la seule couture entre le pipeline et le réseau :
//! `PveClient` l'implémente en HTTP, le devkit en mémoire pour les tests.

mod client;

pub use client::{PveClient, PveConnector};

use async_trait::async_trait;
use serde::{Deserialize, Deserializer, Serialize};
use std::sync::Arc;

use crate::config::HostConnection;
use crate::error::Result;
use crate::models::GuestKind;

#[async_trait]
pub trait ManagementApi: Send + Sync {
    /// GET /nodes
    async fn list_nodes(&self) -> Result<Vec<NodeListItem>>;
    /// GET /nodes/{node}/status
    async fn node_status(&self, node: &str) -> Result<NodeStatus>;
    /// GET /nodes/{node}/qemu ou /nodes/{node}/lxc
    async fn list_guests(&self, node: &str, kind: GuestKind) -> Result<Vec<GuestListItem>>;
    /// GET /nodes/{node}/{qemu|lxc}/{vmid}/status/current
    async fn guest_status(&self, node: &str, kind: GuestKind, vmid: u32) -> Result<GuestListItem>;
    /// GET /nodes/{node}/tasks, entrées démarrées après `since` si fourni
    async fn tasks(&self, node: &str, since: Option<i64>) -> Result<Vec<TaskEntry>>;
    /// GET /cluster/status
    async fn cluster_status(&self) -> Result<Vec<ClusterStatusEntry>>;
}

/// Fabrique un client par hôte configuré
pub trait ApiConnector: Send + Sync {
    fn connect(&self, conn: &HostConnection) -> Result<Arc<dyn ManagementApi>>;
}

/// Enveloppe standard des réponses amont : `{"data": ...}`
#[derive(Debug, Deserialize)]
pub struct ApiEnvelope<T> {
    pub data: T,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeListItem {
    pub node: String,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub ip: Option<String>,
    #[serde(default)]
    pub cpu: Option<f64>,
    #[serde(default)]
    pub maxcpu: Option<u32>,
    #[serde(default)]
    pub mem: Option<u64>,
    #[serde(default)]
    pub maxmem: Option<u64>,
    #[serde(default)]
    pub uptime: Option<u64>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct MemoryInfo {
    #[serde(default)]
    pub total: u64,
    #[serde(default)]
    pub used: u64,
    #[serde(default)]
    pub free: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeStatus {
    #[serde(default)]
    pub cpu: f64,
    #[serde(default)]
    pub memory: MemoryInfo,
    #[serde(default)]
    pub swap: Option<MemoryInfo>,
    #[serde(default)]
    pub rootfs: Option<MemoryInfo>,
    /// L'API renvoie la charge sous forme de chaînes ("0.42")
    #[serde(default, deserialize_with = "de_loadavg")]
    pub loadavg: [f64; 3],
    #[serde(default)]
    pub uptime: u64,
}

/// Élément de liste d'invités ; sert aussi pour status/current
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GuestListItem {
    #[serde(deserialize_with = "de_lenient_u32")]
    pub vmid: u32,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub cpu: Option<f64>,
    #[serde(default, alias = "maxcpu")]
    pub cpus: Option<f64>,
    #[serde(default)]
    pub mem: Option<u64>,
    #[serde(default)]
    pub maxmem: Option<u64>,
    #[serde(default)]
    pub disk: Option<u64>,
    #[serde(default)]
    pub maxdisk: Option<u64>,
    #[serde(default)]
    pub netin: Option<u64>,
    #[serde(default)]
    pub netout: Option<u64>,
    #[serde(default)]
    pub diskread: Option<u64>,
    #[serde(default)]
    pub diskwrite: Option<u64>,
    #[serde(default)]
    pub uptime: Option<u64>,
    #[serde(default)]
    pub template: Option<u8>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskEntry {
    pub upid: String,
    #[serde(default)]
    pub node: String,
    #[serde(rename = "type")]
    pub task_type: String,
    /// vmid de l'invité concerné (chaîne côté API), absent pour une tâche hôte
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub user: Option<String>,
    pub starttime: i64,
    #[serde(default)]
    pub endtime: Option<i64>,
    #[serde(default)]
    pub status: Option<String>,
}

impl TaskEntry {
    pub fn guest_vmid(&self) -> Option<u32> {
        self.id.as_deref().and_then(|id| id.trim().parse().ok())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterStatusEntry {
    #[serde(rename = "type")]
    pub entry_type: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub ip: Option<String>,
    #[serde(default)]
    pub online: Option<u8>,
    #[serde(default)]
    pub local: Option<u8>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum NumOrText {
    Num(f64),
    Text(String),
}

impl NumOrText {
    fn as_f64(&self) -> Option<f64> {
        match self {
            NumOrText::Num(n) => Some(*n),
            NumOrText::Text(s) => s.trim().parse().ok(),
        }
    }
}

fn de_loadavg<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<[f64; 3], D::Error> {
    let raw: Option<Vec<NumOrText>> = Option::deserialize(d)?;
    let mut out = [0.0; 3];
    for (slot, v) in out.iter_mut().zip(raw.unwrap_or_default().iter()) {
        *slot = v.as_f64().unwrap_or(0.0);
    }
    Ok(out)
}

fn de_lenient_u32<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<u32, D::Error> {
    let v = NumOrText::deserialize(d)?;
    v.as_f64()
        .filter(|n| *n >= 0.0 && *n <= u32::MAX as f64)
        .map(|n| n as u32)
        .ok_or_else(|| serde::de::Error::custom("invalid vmid"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_status_decodes_string_loadavg() {
        let raw = r#"{"data":{"cpu":0.12,"memory":{"total":100,"used":40,"free":60},
            "loadavg":["0.50","1.25","2"],"uptime":3600}}"#;
        let env: ApiEnvelope<NodeStatus> = serde_json::from_str(raw).unwrap();
        assert_eq!(env.data.loadavg, [0.5, 1.25, 2.0]);
        assert_eq!(env.data.memory.used, 40);
        assert!(env.data.swap.is_none());
    }

    #[test]
    fn test_guest_list_accepts_string_vmid() {
        let raw = r#"[{"vmid":"101","status":"running","maxcpu":2,"netin":10},
                      {"vmid":100,"status":"stopped"}]"#;
        let items: Vec<GuestListItem> = serde_json::from_str(raw).unwrap();
        assert_eq!(items[0].vmid, 101);
        assert_eq!(items[0].cpus, Some(2.0));
        assert_eq!(items[1].vmid, 100);
        assert_eq!(items[1].netin, None);
    }

    #[test]
    fn test_task_guest_vmid() {
        let raw = r#"{"upid":"UPID:pve1:1","type":"qmigrate","id":"105","starttime":10}"#;
        let t: TaskEntry = serde_json::from_str(raw).unwrap();
        assert_eq!(t.guest_vmid(), Some(105));
        let raw = r#"{"upid":"UPID:pve1:2","type":"aptupdate","starttime":11}"#;
        let t: TaskEntry = serde_json::from_str(raw).unwrap();
        assert_eq!(t.guest_vmid(), None);
    }
}
