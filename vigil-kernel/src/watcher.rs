/**
 * EVENT WATCHER - Surveillance adaptative du journal de tâches d'un hôte
 *
 * RÔLE : Remonte chaque nouvelle tâche (démarrage, migration, ...) vers un
 * callback, avec une cadence qui s'accélère quand l'hôte est actif.
 *
 * FONCTIONNEMENT :
 * - watermark initial = plus récente tâche existante (pas de rejeu au démarrage),
 *   lu avant que start() ne rende la main
 * - nouvelles tâches → callback, watermark avancé, re-poll après burst_delay
 * - activité dans la fenêtre récente → intervalle actif, sinon intervalle de base
 * - échec de lecture : ignoré, on réessaie au prochain tick
 */

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::api::{ManagementApi, TaskEntry};
use crate::config::PollingConf;
use crate::models::EventRecord;
use crate::poller::EventSink;

#[derive(Debug, Clone, PartialEq)]
pub struct WatchConf {
    pub baseline: Duration,
    pub burst_delay: Duration,
    pub active_interval: Duration,
    pub recent_window: Duration,
}

impl From<&PollingConf> for WatchConf {
    fn from(p: &PollingConf) -> Self {
        Self {
            baseline: Duration::from_secs(p.event_interval_secs.max(1)),
            burst_delay: Duration::from_millis(p.event_burst_delay_ms),
            active_interval: Duration::from_millis(p.event_active_interval_ms.max(1)),
            recent_window: Duration::from_secs(p.event_recent_window_secs),
        }
    }
}

/// Poignée de désabonnement ; abandonne la tâche de surveillance
pub struct WatchHandle {
    node: String,
    task: Option<JoinHandle<()>>,
}

impl WatchHandle {
    /// Nœud dont le journal est surveillé
    pub fn node(&self) -> &str {
        &self.node
    }

    pub fn unsubscribe(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }

    pub fn is_active(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }
}

impl Drop for WatchHandle {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

/// Position dans le journal : dernier horodatage vu + UPIDs déjà livrés à cet horodatage
#[derive(Debug, Default, Clone)]
pub struct Watermark {
    pub since: i64,
    seen: HashSet<String>,
}

impl Watermark {
    pub fn at(since: i64) -> Self {
        Self { since, seen: HashSet::new() }
    }

    /// Filtre les tâches nouvelles (triées par début) et avance le watermark
    pub fn advance(&mut self, entries: Vec<TaskEntry>) -> Vec<TaskEntry> {
        let mut fresh: Vec<TaskEntry> = entries
            .into_iter()
            .filter(|t| t.starttime > self.since || (t.starttime == self.since && !self.seen.contains(&t.upid)))
            .collect();
        fresh.sort_by_key(|t| t.starttime);
        fresh.dedup_by(|a, b| a.upid == b.upid);

        if let Some(latest) = fresh.last().map(|t| t.starttime) {
            if latest > self.since {
                self.since = latest;
                self.seen.clear();
            }
            self.seen
                .extend(fresh.iter().filter(|t| t.starttime == latest).map(|t| t.upid.clone()));
        }
        fresh
    }
}

pub struct EventWatcher {
    host_id: String,
    node: String,
    api: Arc<dyn ManagementApi>,
    conf: WatchConf,
}

impl EventWatcher {
    pub fn new(host_id: String, node: String, api: Arc<dyn ManagementApi>, conf: WatchConf) -> Self {
        Self { host_id, node, api, conf }
    }

    /// Lit le journal une première fois (watermark) puis lance la boucle
    pub async fn start(self, sink: EventSink) -> WatchHandle {
        let watermark = self.bootstrap().await;
        let node = self.node.clone();
        WatchHandle { node, task: Some(tokio::spawn(self.run(watermark, sink))) }
    }

    async fn bootstrap(&self) -> Watermark {
        match self.api.tasks(&self.node, None).await {
            Ok(entries) => {
                let mut wm = Watermark::at(entries.iter().map(|t| t.starttime).max().unwrap_or(0));
                wm.advance(entries);
                wm
            }
            Err(e) => {
                debug!(host = %self.host_id, error = %e, "task log bootstrap failed, starting from now");
                Watermark::at(time::OffsetDateTime::now_utc().unix_timestamp())
            }
        }
    }

    async fn run(self, mut watermark: Watermark, sink: EventSink) {
        let mut last_activity: Option<Instant> = None;
        let mut delay = self.conf.baseline;
        info!(host = %self.host_id, node = %self.node, since = watermark.since, "event watcher started");

        loop {
            tokio::time::sleep(delay).await;

            match self.api.tasks(&self.node, Some(watermark.since)).await {
                Ok(entries) => {
                    let fresh = watermark.advance(entries);
                    if !fresh.is_empty() {
                        debug!(host = %self.host_id, count = fresh.len(), "new task log entries");
                        for task in fresh {
                            sink(self.record(task));
                        }
                        last_activity = Some(Instant::now());
                        delay = self.conf.burst_delay;
                        continue;
                    }
                }
                Err(e) => debug!(host = %self.host_id, error = %e, "task log poll failed"),
            }

            let recently_active = last_activity.is_some_and(|t| t.elapsed() < self.conf.recent_window);
            delay = if recently_active { self.conf.active_interval } else { self.conf.baseline };
        }
    }

    fn record(&self, task: TaskEntry) -> EventRecord {
        EventRecord {
            host_id: self.host_id.clone(),
            guest_vmid: task.guest_vmid(),
            guest_id: None,
            upid: task.upid,
            task_type: task.task_type,
            user: task.user,
            status: task.status,
            started_at: task.starttime,
        }
    }
}
