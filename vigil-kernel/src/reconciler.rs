/**
 * RÉCONCILIATEUR D'INVENTAIRE - Maps canoniques hôtes / VMs / conteneurs
 *
 * RÔLE : Orchestre un NodePoller par hôte, assigne les identifiants d'invités,
 * détecte les transitions d'état et alimente le normaliseur de métriques.
 *
 * FONCTIONNEMENT :
 * - cycle périodique (polling.interval_secs) sur tous les hôtes en parallèle
 * - tâche significative remontée par le watcher → re-poll immédiat de l'hôte
 * - hôte offline : invités non interrogés, dernier état connu conservé
 * - ordre de publication par cycle : statut hôte → statuts invités → métriques
 * - en mode cluster seul l'hôte primaire d'un invité le rapporte vivant
 */

use futures::future::join_all;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use time::OffsetDateTime;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::api::ApiConnector;
use crate::bus::{EventBus, GuestStatusChange, HostStatusChange, PipelineEvent};
use crate::config::{HostConnection, KernelConfig};
use crate::error::{KernelError, Result};
use crate::identity::{guest_id, resolve_topology};
use crate::metrics::{MetricSample, MetricsNormalizer};
use crate::models::{
    ClusterTopology, EventRecord, GuestSnapshot, GuestStatus, HostSnapshot, IoCounters, Usage,
};
use crate::poller::{EventSink, HostSource, NodePoller, RawGuest};
use crate::state::{new_state, InventoryState, Shared};
use crate::watcher::WatchHandle;

/// Mots-clés de type de tâche déclenchant un rafraîchissement immédiat
const SIGNIFICANT_TASKS: &[&str] = &[
    "start", "stop", "shutdown", "reset", "resume", "suspend", "create", "delete", "destroy",
    "migrate", "clone",
];

/// Tâche niveau hôte, ou tâche d'invité dont le type contient un mot-clé significatif
pub fn is_significant(event: &EventRecord) -> bool {
    if event.guest_vmid.is_none() {
        return true;
    }
    let kind = event.task_type.to_ascii_lowercase();
    SIGNIFICANT_TASKS.iter().any(|k| kind.contains(k))
}

pub fn resolve_guest(raw: RawGuest, host_id: &str, topology: &ClusterTopology, at: OffsetDateTime) -> GuestSnapshot {
    let RawGuest { kind, item } = raw;
    GuestSnapshot {
        id: guest_id(kind, item.vmid, host_id, topology),
        vmid: item.vmid,
        name: item.name.unwrap_or_else(|| format!("{}-{}", kind, item.vmid)),
        kind,
        host_id: host_id.to_string(),
        status: GuestStatus::parse(&item.status),
        cpu: item.cpu.unwrap_or(0.0),
        cpus: item.cpus.map(|c| c.round().max(0.0) as u32).unwrap_or(0),
        memory: Usage { used: item.mem.unwrap_or(0), total: item.maxmem.unwrap_or(0) },
        disk: Usage { used: item.disk.unwrap_or(0), total: item.maxdisk.unwrap_or(0) },
        counters: IoCounters {
            net_in: item.netin.unwrap_or(0),
            net_out: item.netout.unwrap_or(0),
            disk_read: item.diskread.unwrap_or(0),
            disk_write: item.diskwrite.unwrap_or(0),
        },
        uptime: item.uptime.unwrap_or(0),
        polled_at: at,
    }
}

struct HostEntry {
    source: Arc<dyn HostSource>,
    /// Sérialise cycle périodique et rafraîchissements d'un même hôte
    cycle: Arc<tokio::sync::Mutex<()>>,
    watch: Option<WatchHandle>,
}

struct Inner {
    config: KernelConfig,
    connector: Arc<dyn ApiConnector>,
    bus: EventBus,
    normalizer: Arc<MetricsNormalizer>,
    state: Shared<InventoryState>,
    sources: Mutex<HashMap<String, HostEntry>>,
    refresh_tx: mpsc::UnboundedSender<String>,
    refresh_rx: Mutex<Option<mpsc::UnboundedReceiver<String>>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    shut_down: AtomicBool,
}

#[derive(Clone)]
pub struct InventoryReconciler {
    inner: Arc<Inner>,
}

impl InventoryReconciler {
    pub fn new(
        config: KernelConfig,
        connector: Arc<dyn ApiConnector>,
        bus: EventBus,
        normalizer: Arc<MetricsNormalizer>,
    ) -> Self {
        let (refresh_tx, refresh_rx) = mpsc::unbounded_channel();
        Self {
            inner: Arc::new(Inner {
                config,
                connector,
                bus,
                normalizer,
                state: new_state(InventoryState::default()),
                sources: Mutex::new(HashMap::new()),
                refresh_tx,
                refresh_rx: Mutex::new(Some(refresh_rx)),
                tasks: Mutex::new(Vec::new()),
                shut_down: AtomicBool::new(false),
            }),
        }
    }

    /// Enregistre les hôtes configurés, lance un premier cycle puis les boucles de fond
    pub async fn start(&self) -> Result<()> {
        if self.is_shut_down() {
            return Err(KernelError::ShutDown);
        }
        for conn in self.inner.config.hosts.clone() {
            if let Err(e) = self.register(conn.clone(), false).await {
                warn!(host = %conn.id, error = %e, "host not registered");
            }
        }
        self.tick().await;

        let periodic = {
            let this = self.clone();
            let every = self.inner.config.polling.interval();
            tokio::spawn(async move {
                let mut interval = tokio::time::interval(every);
                interval.tick().await;
                loop {
                    interval.tick().await;
                    this.tick().await;
                }
            })
        };

        let mut tasks = vec![periodic];
        let refresh_rx = self.inner.refresh_rx.lock().take();
        if let Some(mut rx) = refresh_rx {
            let this = self.clone();
            tasks.push(tokio::spawn(async move {
                while let Some(host_id) = rx.recv().await {
                    debug!(host = %host_id, "event-driven refresh");
                    this.poll_host(&host_id).await;
                }
            }));
        }
        self.inner.tasks.lock().extend(tasks);
        info!(hosts = self.host_count(), "inventory reconciler started");
        Ok(())
    }

    /// Un cycle complet sur tous les hôtes, en parallèle
    pub async fn tick(&self) {
        let ids: Vec<String> = self.inner.sources.lock().keys().cloned().collect();
        join_all(ids.iter().map(|id| self.poll_host(id))).await;
    }

    /// Ajoute un hôte à chaud ; la connexion est testée avant tout enregistrement
    pub async fn add_host(&self, conn: HostConnection) -> Result<()> {
        if self.is_shut_down() {
            return Err(KernelError::ShutDown);
        }
        self.register(conn.clone(), true).await?;
        self.poll_host(&conn.id).await;
        Ok(())
    }

    async fn register(&self, conn: HostConnection, require_connection: bool) -> Result<()> {
        if self.inner.sources.lock().contains_key(&conn.id) {
            return Err(KernelError::DuplicateHost(conn.id));
        }
        let api = self.inner.connector.connect(&conn)?;
        let poller = Arc::new(NodePoller::new(
            conn.clone(),
            api.clone(),
            self.inner.config.retry.clone(),
            &self.inner.config.polling,
        ));

        if require_connection {
            if !poller.test_connection().await {
                return Err(KernelError::ConnectionFailed(conn.id));
            }
        } else {
            poller.discover_canonical_name().await;
        }

        let needs_topology = self.inner.state.lock().topology.is_none();
        if needs_topology {
            let topology = resolve_topology(&self.inner.config.cluster, Some(api.as_ref())).await;
            self.inner.state.lock().topology.get_or_insert(topology);
        }

        let source: Arc<dyn HostSource> = poller;
        let watch = source.subscribe_to_events(self.event_sink(&conn.id)).await;
        let mut sources = self.inner.sources.lock();
        if sources.contains_key(&conn.id) {
            return Err(KernelError::DuplicateHost(conn.id));
        }
        sources.insert(
            conn.id.clone(),
            HostEntry { source, cycle: Arc::new(tokio::sync::Mutex::new(())), watch: Some(watch) },
        );
        info!(host = %conn.id, "host registered");
        Ok(())
    }

    /// Chaque tâche est publiée ; les significatives déclenchent un re-poll de l'hôte
    fn event_sink(&self, host_id: &str) -> EventSink {
        let bus = self.inner.bus.clone();
        let refresh = self.inner.refresh_tx.clone();
        let state = self.inner.state.clone();
        let host_id = host_id.to_string();
        Arc::new(move |mut event: EventRecord| {
            if let Some(vmid) = event.guest_vmid {
                event.guest_id = state.lock().locate_guest(&host_id, vmid);
            }
            let significant = is_significant(&event);
            bus.publish(PipelineEvent::Event(event));
            if significant && refresh.send(host_id.clone()).is_err() {
                debug!(host = %host_id, "refresh channel closed");
            }
        })
    }

    /// Arrête poller et watcher de l'hôte puis purge ses invités et métriques
    pub fn remove_host(&self, host_id: &str) -> Result<()> {
        let entry = self
            .inner
            .sources
            .lock()
            .remove(host_id)
            .ok_or_else(|| KernelError::UnknownHost(host_id.to_string()))?;
        drop(entry);

        let purged = {
            let mut st = self.inner.state.lock();
            st.hosts.remove(host_id);
            st.primaries.forget_host(host_id);
            let owned = st.guest_ids_owned_by(host_id);
            for (kind, id) in &owned {
                st.guests_mut(*kind).remove(id);
            }
            owned
        };
        self.inner.normalizer.forget(host_id);
        for (_, id) in &purged {
            self.inner.normalizer.forget(id);
        }
        info!(host = host_id, guests = purged.len(), "host removed");
        Ok(())
    }

    /// Un cycle pour un hôte : statut, puis inventaire si en ligne
    pub async fn poll_host(&self, host_id: &str) {
        if self.is_shut_down() {
            return;
        }
        let Some((source, cycle)) = self
            .inner
            .sources
            .lock()
            .get(host_id)
            .map(|e| (e.source.clone(), e.cycle.clone()))
        else {
            return;
        };
        let _guard = cycle.lock().await;

        let snapshot = source.get_status().await;
        if let Some(node) = snapshot.canonical_name.as_deref() {
            self.follow_node(host_id, &source, node).await;
        }
        let online = snapshot.is_online();
        let inventory = if online {
            match source.get_inventory().await {
                Ok(raw) => Some(raw),
                Err(e) => {
                    warn!(host = host_id, error = %e, "inventory fetch failed, keeping last known guests");
                    None
                }
            }
        } else {
            None
        };

        // hôte retiré pendant les appels amont
        if !self.inner.sources.lock().contains_key(host_id) {
            return;
        }
        self.apply(host_id, snapshot, inventory);
    }

    /// Relance le watcher si le nom canonique découvert diffère du nœud surveillé
    async fn follow_node(&self, host_id: &str, source: &Arc<dyn HostSource>, node: &str) {
        let watched = self
            .inner
            .sources
            .lock()
            .get(host_id)
            .and_then(|e| e.watch.as_ref().map(|w| w.node().to_string()));
        let Some(watched) = watched.filter(|w| w != node) else {
            return;
        };
        let watch = source.subscribe_to_events(self.event_sink(host_id)).await;
        if let Some(entry) = self.inner.sources.lock().get_mut(host_id) {
            info!(host = host_id, from = %watched, to = node, "node name changed, event watcher restarted");
            entry.watch = Some(watch);
        }
    }

    fn apply(&self, host_id: &str, snapshot: HostSnapshot, inventory: Option<Vec<RawGuest>>) {
        let mut status_events = Vec::new();
        let mut fresh_guests = Vec::new();
        let mut purged = Vec::new();
        let mut handed_over = Vec::new();

        {
            let mut st = self.inner.state.lock();
            let previous = st.hosts.get(host_id).map(|h| h.status);
            if previous != Some(snapshot.status) {
                status_events.push(PipelineEvent::HostStatus(HostStatusChange {
                    host_id: host_id.to_string(),
                    previous,
                    current: snapshot.status,
                }));
                if snapshot.is_online() {
                    info!(host = host_id, "host online");
                } else {
                    warn!(host = host_id, "host offline");
                }
            }
            st.hosts.insert(host_id.to_string(), snapshot.clone());

            if let Some(raw) = inventory {
                let topology = st.topology.clone().unwrap_or_default();
                let at = snapshot.polled_at;
                let resolved: Vec<GuestSnapshot> =
                    raw.into_iter().map(|r| resolve_guest(r, host_id, &topology, at)).collect();
                let listed: HashSet<String> = resolved.iter().map(|g| g.id.clone()).collect();

                if topology.is_cluster {
                    st.primaries.record(host_id, listed.iter().map(String::as_str));
                }

                for guest in resolved {
                    let primary = !topology.is_cluster || st.primaries.is_primary(&guest.id, host_id);
                    let previous = st.guest(&guest.id).map(|g| g.status);
                    let guest = if primary {
                        guest
                    } else {
                        // vue secondaire : jamais au-dessus de celle du primaire
                        if previous.is_some() {
                            debug!(host = host_id, guest = %guest.id, "secondary sighting ignored");
                            continue;
                        }
                        guest.demoted()
                    };

                    if previous != Some(guest.status) {
                        status_events.push(PipelineEvent::GuestStatus(GuestStatusChange {
                            guest_id: guest.id.clone(),
                            host_id: host_id.to_string(),
                            kind: guest.kind,
                            name: guest.name.clone(),
                            previous,
                            current: guest.status,
                        }));
                    }
                    st.guests_mut(guest.kind).insert(guest.id.clone(), guest.clone());
                    if primary {
                        fresh_guests.push(guest);
                    }
                }

                for (kind, id) in st.guest_ids_owned_by(host_id) {
                    if listed.contains(&id) {
                        continue;
                    }
                    // encore vu par un autre hôte du cluster : même identité, historique conservé
                    if let Some(next) = st.primaries.primary_for(&id).map(str::to_string) {
                        if let Some(g) = st.guests_mut(kind).get_mut(&id) {
                            g.host_id = next.clone();
                        }
                        handed_over.push((id, next));
                        continue;
                    }
                    st.guests_mut(kind).remove(&id);
                    purged.push(id);
                }
            }
        }

        for (id, next) in &handed_over {
            info!(guest = %id, from = host_id, to = %next, "guest ownership handed over");
        }
        for id in &purged {
            info!(host = host_id, guest = %id, "guest no longer listed, purged");
            self.inner.normalizer.forget(id);
        }

        for event in status_events {
            self.inner.bus.publish(event);
        }

        let mut samples: Vec<MetricSample> = Vec::with_capacity(fresh_guests.len() + 1);
        if snapshot.is_online() {
            samples.push(self.inner.normalizer.ingest_host(&snapshot));
        }
        samples.extend(fresh_guests.iter().map(|g| self.inner.normalizer.ingest_guest(g)));
        for sample in samples {
            self.inner.bus.publish(PipelineEvent::Metrics(sample));
        }
    }

    /// Idempotent : annule boucles, watchers et abonnements
    pub fn shutdown(&self) {
        if self.inner.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }
        for task in self.inner.tasks.lock().drain(..) {
            task.abort();
        }
        let mut sources = self.inner.sources.lock();
        for entry in sources.values_mut() {
            if let Some(mut watch) = entry.watch.take() {
                watch.unsubscribe();
            }
        }
        sources.clear();
        info!("inventory reconciler shut down");
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.shut_down.load(Ordering::SeqCst)
    }

    // --- accès en lecture ---

    pub fn bus(&self) -> &EventBus {
        &self.inner.bus
    }

    pub fn normalizer(&self) -> Arc<MetricsNormalizer> {
        self.inner.normalizer.clone()
    }

    pub fn config(&self) -> &KernelConfig {
        &self.inner.config
    }

    pub fn topology(&self) -> ClusterTopology {
        self.inner.state.lock().topology.clone().unwrap_or_default()
    }

    pub fn host_count(&self) -> usize {
        self.inner.sources.lock().len()
    }

    pub fn online_host_count(&self) -> usize {
        self.inner.state.lock().online_hosts()
    }

    pub fn hosts(&self) -> Vec<HostSnapshot> {
        let mut hosts: Vec<HostSnapshot> = self.inner.state.lock().hosts.values().cloned().collect();
        hosts.sort_by(|a, b| a.id.cmp(&b.id));
        hosts
    }

    pub fn host(&self, id: &str) -> Option<HostSnapshot> {
        self.inner.state.lock().hosts.get(id).cloned()
    }

    pub fn guests(&self) -> Vec<GuestSnapshot> {
        self.inner.state.lock().all_guests()
    }

    pub fn guest(&self, id: &str) -> Option<GuestSnapshot> {
        self.inner.state.lock().guest(id).cloned()
    }

    pub fn vms(&self) -> Vec<GuestSnapshot> {
        self.inner.state.lock().vms.values().cloned().collect()
    }

    pub fn containers(&self) -> Vec<GuestSnapshot> {
        self.inner.state.lock().containers.values().cloned().collect()
    }

    pub fn guest_count(&self) -> usize {
        let st = self.inner.state.lock();
        st.vms.len() + st.containers.len()
    }

    /// Hôte primaire courant d'un invité (mode cluster)
    pub fn primary_for(&self, guest_id: &str) -> Option<String> {
        self.inner.state.lock().primaries.primary_for(guest_id).map(str::to_string)
    }
}
