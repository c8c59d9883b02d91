/**
 * IDENTITÉ CLUSTER - Identifiants stables des invités et élection du primaire
 *
 * RÔLE : Détecte l'appartenance à un cluster et calcule l'identifiant logique
 * d'un invité. En mode cluster, un invité vu par plusieurs hôtes (stockage
 * partagé, migration en cours) n'a qu'une identité et un seul hôte primaire.
 *
 * FONCTIONNEMENT : logique pure, sauf detect_cluster qui interroge l'API.
 * Aucune erreur ne remonte : échec de détection = mode standalone.
 */

use std::collections::{BTreeSet, HashMap};
use tracing::{info, warn};

use crate::api::ManagementApi;
use crate::config::ClusterConf;
use crate::models::{ClusterTopology, GuestKind};

/// Interroge /cluster/status ; toute erreur ou absence d'entrée "cluster" → standalone
pub async fn detect_cluster(api: &dyn ManagementApi) -> ClusterTopology {
    match api.cluster_status().await {
        Ok(entries) => entries
            .into_iter()
            .find(|e| e.entry_type == "cluster" && !e.name.is_empty())
            .map(|e| ClusterTopology::cluster(e.name))
            .unwrap_or_else(ClusterTopology::standalone),
        Err(e) => {
            warn!(error = %e, "cluster detection failed, assuming standalone");
            ClusterTopology::standalone()
        }
    }
}

/// Applique la configuration : un nom explicite l'emporte sur la détection
pub async fn resolve_topology(conf: &ClusterConf, api: Option<&dyn ManagementApi>) -> ClusterTopology {
    if let Some(name) = conf.name.as_deref().filter(|n| !n.trim().is_empty()) {
        info!(cluster = name, "cluster name set by configuration");
        return ClusterTopology::cluster(name.trim());
    }
    if !conf.auto_detect {
        return ClusterTopology::standalone();
    }
    let Some(api) = api else { return ClusterTopology::standalone(); };
    let topology = detect_cluster(api).await;
    if topology.is_cluster {
        info!(cluster = %topology.cluster_name, "cluster detected");
    }
    topology
}

pub fn guest_id(kind: GuestKind, vmid: u32, host_id: &str, topology: &ClusterTopology) -> String {
    if topology.is_cluster {
        format!("{}-{}-{}", topology.cluster_name, kind, vmid)
    } else {
        format!("{}-{}-{}", host_id, kind, vmid)
    }
}

/// Plus petit identifiant d'hôte dans l'ordre lexicographique
pub fn elect_primary<'a, I>(candidates: I) -> Option<&'a str>
where
    I: IntoIterator<Item = &'a str>,
{
    candidates.into_iter().min()
}

/// Registre des observations (invité → hôtes qui le listent) en mode cluster
#[derive(Debug, Default)]
pub struct PrimaryRegistry {
    sightings: HashMap<String, BTreeSet<String>>,
}

impl PrimaryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remplace l'ensemble des invités vus par `host_id` lors de ce cycle
    pub fn record<'a, I>(&mut self, host_id: &str, guest_ids: I)
    where
        I: IntoIterator<Item = &'a str>,
    {
        self.forget_host(host_id);
        for gid in guest_ids {
            self.sightings
                .entry(gid.to_string())
                .or_default()
                .insert(host_id.to_string());
        }
    }

    pub fn forget_host(&mut self, host_id: &str) {
        self.sightings.retain(|_, hosts| {
            hosts.remove(host_id);
            !hosts.is_empty()
        });
    }

    pub fn primary_for(&self, guest_id: &str) -> Option<&str> {
        self.sightings
            .get(guest_id)
            .and_then(|hosts| elect_primary(hosts.iter().map(String::as_str)))
    }

    pub fn is_primary(&self, guest_id: &str, host_id: &str) -> bool {
        self.primary_for(guest_id).map_or(true, |p| p == host_id)
    }

    pub fn candidates(&self, guest_id: &str) -> Vec<String> {
        self.sightings
            .get(guest_id)
            .map(|h| h.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn clear(&mut self) {
        self.sightings.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_guest_id_standalone_is_stable() {
        let topo = ClusterTopology::standalone();
        let a = guest_id(GuestKind::Vm, 101, "pve1", &topo);
        let b = guest_id(GuestKind::Vm, 101, "pve1", &topo);
        assert_eq!(a, "pve1-vm-101");
        assert_eq!(a, b);
        assert_ne!(a, guest_id(GuestKind::Vm, 101, "pve2", &topo));
        assert_eq!(guest_id(GuestKind::Container, 200, "pve1", &topo), "pve1-container-200");
    }

    #[test]
    fn test_guest_id_cluster_ignores_host() {
        let topo = ClusterTopology::cluster("lab");
        assert_eq!(
            guest_id(GuestKind::Vm, 101, "pve1", &topo),
            guest_id(GuestKind::Vm, 101, "pve2", &topo)
        );
        assert_eq!(guest_id(GuestKind::Vm, 101, "pve2", &topo), "lab-vm-101");
    }

    #[test]
    fn test_elect_primary_is_order_independent() {
        assert_eq!(elect_primary(["pve3", "pve1", "pve2"]), Some("pve1"));
        assert_eq!(elect_primary(["pve2", "pve3", "pve1"]), Some("pve1"));
        assert_eq!(elect_primary(Vec::<&str>::new()), None);
    }

    #[test]
    fn test_registry_tracks_handoff() {
        let mut reg = PrimaryRegistry::new();
        reg.record("pve2", ["lab-vm-101"]);
        assert!(reg.is_primary("lab-vm-101", "pve2"));

        reg.record("pve1", ["lab-vm-101"]);
        assert_eq!(reg.primary_for("lab-vm-101"), Some("pve1"));
        assert!(!reg.is_primary("lab-vm-101", "pve2"));
        assert_eq!(reg.candidates("lab-vm-101"), vec!["pve1", "pve2"]);

        // pve1 ne le liste plus : pve2 redevient primaire
        reg.record("pve1", Vec::<&str>::new());
        assert_eq!(reg.primary_for("lab-vm-101"), Some("pve2"));

        reg.forget_host("pve2");
        assert_eq!(reg.primary_for("lab-vm-101"), None);
        assert!(reg.is_primary("lab-vm-101", "anyone"));
    }
}
