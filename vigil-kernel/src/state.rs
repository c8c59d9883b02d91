use parking_lot::Mutex;
use std::sync::Arc;

use crate::identity::PrimaryRegistry;
use crate::models::{ClusterTopology, GuestKind, GuestSnapshot, GuestsMap, HostsMap};

pub type Shared<T> = Arc<Mutex<T>>;

pub fn new_state<T>(value: T) -> Shared<T> {
    Arc::new(Mutex::new(value))
}

/// Inventaire canonique, muté uniquement pendant un cycle de poll
#[derive(Debug, Default)]
pub struct InventoryState {
    pub topology: Option<ClusterTopology>,
    pub hosts: HostsMap,
    pub vms: GuestsMap,
    pub containers: GuestsMap,
    pub primaries: PrimaryRegistry,
}

impl InventoryState {
    pub fn guests_mut(&mut self, kind: GuestKind) -> &mut GuestsMap {
        match kind {
            GuestKind::Vm => &mut self.vms,
            GuestKind::Container => &mut self.containers,
        }
    }

    pub fn guest(&self, id: &str) -> Option<&GuestSnapshot> {
        self.vms.get(id).or_else(|| self.containers.get(id))
    }

    pub fn all_guests(&self) -> Vec<GuestSnapshot> {
        let mut all: Vec<GuestSnapshot> = self.vms.values().chain(self.containers.values()).cloned().collect();
        all.sort_by(|a, b| a.id.cmp(&b.id));
        all
    }

    /// Invités dont l'hôte propriétaire est `host_id`
    pub fn guest_ids_owned_by(&self, host_id: &str) -> Vec<(GuestKind, String)> {
        self.vms
            .values()
            .chain(self.containers.values())
            .filter(|g| g.host_id == host_id)
            .map(|g| (g.kind, g.id.clone()))
            .collect()
    }

    /// Invité visé par une tâche : sur cet hôte, ou sur tout hôte en mode cluster
    pub fn locate_guest(&self, host_id: &str, vmid: u32) -> Option<String> {
        let cluster = self.topology.as_ref().is_some_and(|t| t.is_cluster);
        self.vms
            .values()
            .chain(self.containers.values())
            .find(|g| g.vmid == vmid && (cluster || g.host_id == host_id))
            .map(|g| g.id.clone())
    }

    pub fn online_hosts(&self) -> usize {
        self.hosts.values().filter(|h| h.is_online()).count()
    }
}
