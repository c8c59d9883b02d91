use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::info;

use crate::api::ApiConnector;
use crate::bus::EventBus;
use crate::config::KernelConfig;
use crate::error::Result;
use crate::health::HealthTracker;
use crate::http::AppState;
use crate::metrics::MetricsNormalizer;
use crate::realtime::RealtimeHub;
use crate::reconciler::InventoryReconciler;

/// Assemblage bus → réconciliateur → normaliseur → hub, partagé par le binaire et le devkit
pub struct Pipeline {
    pub bus: EventBus,
    pub reconciler: InventoryReconciler,
    pub hub: Arc<RealtimeHub>,
    pub health_tracker: HealthTracker,
    hub_task: Option<JoinHandle<()>>,
}

impl Pipeline {
    pub fn new(config: KernelConfig, connector: Arc<dyn ApiConnector>) -> Self {
        let bus = EventBus::new();
        let normalizer = Arc::new(MetricsNormalizer::new(&config.metrics, config.polling.interval_secs));
        let reconciler = InventoryReconciler::new(config, connector, bus.clone(), normalizer);
        let hub = Arc::new(RealtimeHub::new(reconciler.clone()));
        Self { bus, reconciler, hub, health_tracker: HealthTracker::new(), hub_task: None }
    }

    /// Le hub s'abonne au bus avant le premier cycle pour ne rien manquer
    pub async fn start(&mut self) -> Result<()> {
        if self.hub_task.is_none() {
            self.hub_task = Some(self.hub.spawn());
        }
        self.reconciler.start().await?;
        info!(cluster = ?self.reconciler.topology(), "pipeline started");
        Ok(())
    }

    pub fn app_state(&self) -> AppState {
        AppState {
            reconciler: self.reconciler.clone(),
            hub: self.hub.clone(),
            health_tracker: self.health_tracker.clone(),
        }
    }

    pub fn shutdown(&mut self) {
        self.reconciler.shutdown();
        if let Some(task) = self.hub_task.take() {
            task.abort();
        }
    }
}
