use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;

use crate::realtime::RealtimeHub;
use crate::reconciler::InventoryReconciler;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineHealth {
    pub uptime_seconds: u64,
    pub cluster: Option<String>,
    pub hosts_tracked: usize,
    pub hosts_online: usize,
    pub guests_tracked: usize,
    pub metrics_tracked: usize,
    pub clients_connected: usize,
    pub connections_rejected: u64,
    pub bus_subscribers: usize,
}

#[derive(Clone)]
pub struct HealthTracker {
    start_time: Instant,
}

impl HealthTracker {
    pub fn new() -> Self {
        Self { start_time: Instant::now() }
    }

    pub fn get_health(&self, reconciler: &InventoryReconciler, hub: &Arc<RealtimeHub>) -> PipelineHealth {
        let topology = reconciler.topology();
        PipelineHealth {
            uptime_seconds: self.start_time.elapsed().as_secs(),
            cluster: topology.is_cluster.then_some(topology.cluster_name),
            hosts_tracked: reconciler.host_count(),
            hosts_online: reconciler.online_host_count(),
            guests_tracked: reconciler.guest_count(),
            metrics_tracked: reconciler.normalizer().tracked(),
            clients_connected: hub.client_count(),
            connections_rejected: hub.rejected_connections(),
            bus_subscribers: reconciler.bus().subscriber_count(),
        }
    }
}

impl Default for HealthTracker {
    fn default() -> Self {
        Self::new()
    }
}
