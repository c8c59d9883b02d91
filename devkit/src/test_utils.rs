/*!
Test Harness du pipeline Vigil

Câble un `Pipeline` complet (réconciliateur, normaliseur, hub) sur des
endpoints simulés et fournit des attentes avec timeout sur le bus
d'événements et sur les files des clients temps réel.
*/

use anyhow::{anyhow, Result};
use serde_json::Value;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::time::timeout;

use vigil_kernel::bus::PipelineEvent;
use vigil_kernel::config::KernelConfig;
use vigil_kernel::realtime::ClientId;
use vigil_kernel::Pipeline;

use crate::mock_api::{MockConnector, MockManagementApi};

pub const DEFAULT_WAIT: Duration = Duration::from_secs(30);

pub struct TestHarness {
    pub connector: MockConnector,
    pub pipeline: Pipeline,
    events: broadcast::Receiver<PipelineEvent>,
}

impl TestHarness {
    pub fn new(config: KernelConfig, connector: MockConnector) -> Self {
        tracing_subscriber::fmt().with_test_writer().try_init().ok();
        let pipeline = Pipeline::new(config, Arc::new(connector.clone()));
        let events = pipeline.bus.subscribe();
        Self { connector, pipeline, events }
    }

    /// Démarre le pipeline puis laisse les watchers s'initialiser
    pub async fn start(&mut self) -> Result<()> {
        self.pipeline.start().await?;
        self.settle().await;
        tracing::info!(hosts = self.pipeline.reconciler.host_count(), "test pipeline started");
        Ok(())
    }

    /// Laisse tourner les tâches de fond prêtes
    pub async fn settle(&self) {
        for _ in 0..5 {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    }

    pub fn api(&self, host_id: &str) -> Result<MockManagementApi> {
        self.connector.api(host_id).ok_or_else(|| anyhow!("no mock for host {host_id}"))
    }

    /// Vide les événements déjà publiés
    pub fn drain_events(&mut self) -> Vec<PipelineEvent> {
        let mut out = Vec::new();
        loop {
            match self.events.try_recv() {
                Ok(ev) => out.push(ev),
                Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
                Err(_) => break,
            }
        }
        out
    }

    pub async fn next_event(&mut self, wait: Duration) -> Result<PipelineEvent> {
        timeout(wait, self.events.recv())
            .await
            .map_err(|_| anyhow!("timeout waiting for pipeline event"))?
            .map_err(|e| anyhow!("bus closed: {e}"))
    }

    /// Attend le premier événement satisfaisant `pred`, les autres sont écartés
    pub async fn wait_for<F>(&mut self, wait: Duration, mut pred: F) -> Result<PipelineEvent>
    where
        F: FnMut(&PipelineEvent) -> bool,
    {
        let deadline = tokio::time::Instant::now() + wait;
        loop {
            let left = deadline.saturating_duration_since(tokio::time::Instant::now());
            let ev = self.next_event(left).await?;
            if pred(&ev) {
                return Ok(ev);
            }
        }
    }

    /// Client temps réel branché directement sur le hub (sans socket)
    pub fn connect_client(&self, addr: &str) -> Result<(ClientId, mpsc::Receiver<Arc<str>>)> {
        let addr: SocketAddr = addr.parse()?;
        Ok(self.pipeline.hub.connect(addr))
    }

    pub async fn shutdown(mut self) {
        self.pipeline.shutdown();
    }
}

/// Prochain message JSON d'un client
pub async fn recv_json(rx: &mut mpsc::Receiver<Arc<str>>, wait: Duration) -> Result<Value> {
    let text = timeout(wait, rx.recv())
        .await
        .map_err(|_| anyhow!("timeout waiting for client message"))?
        .ok_or_else(|| anyhow!("client queue closed"))?;
    Ok(serde_json::from_str(&text)?)
}

/// Messages déjà en file pour un client
pub fn drain_json(rx: &mut mpsc::Receiver<Arc<str>>) -> Vec<Value> {
    let mut out = Vec::new();
    while let Ok(text) = rx.try_recv() {
        if let Ok(v) = serde_json::from_str(&text) {
            out.push(v);
        }
    }
    out
}

/// Attend un message client satisfaisant `pred`
pub async fn wait_for_json<F>(rx: &mut mpsc::Receiver<Arc<str>>, wait: Duration, mut pred: F) -> Result<Value>
where
    F: FnMut(&Value) -> bool,
{
    let deadline = tokio::time::Instant::now() + wait;
    loop {
        let left = deadline.saturating_duration_since(tokio::time::Instant::now());
        let msg = recv_json(rx, left).await?;
        if pred(&msg) {
            return Ok(msg);
        }
    }
}
