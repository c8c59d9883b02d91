/**
 * NODE POLLER - Un poller par hôte configuré
 *
 * RÔLE : Découvre le nom canonique du nœud, interroge son statut avec retry,
 * liste ses invités et délègue la surveillance du journal de tâches au watcher.
 *
 * FONCTIONNEMENT :
 * - nom canonique : IP → id/nom configuré → sonde de chaque candidat → "pve"
 *   (mémorisé dès la première découverte réussie)
 * - poll() ne renvoie jamais d'erreur : retries épuisés = snapshot offline
 * - un détail d'invité en échec retombe sur les champs de la liste
 */

use async_trait::async_trait;
use futures::future::join_all;
use parking_lot::Mutex;
use std::sync::Arc;
use time::OffsetDateTime;
use tracing::{debug, info, warn};

use crate::api::{GuestListItem, ManagementApi, NodeStatus};
use crate::config::{HostConnection, PollingConf, RetryConf};
use crate::error::Result;
use crate::models::{EventRecord, GuestKind, HostSnapshot, HostStatus, Usage};
use crate::watcher::{EventWatcher, WatchConf, WatchHandle};

/// Nom de nœud historique des installations mono-hôte
pub const LEGACY_NODE_NAME: &str = "pve";

pub type EventSink = Arc<dyn Fn(EventRecord) + Send + Sync>;

/// Invité tel que listé par l'hôte, avant résolution d'identité
#[derive(Debug, Clone, PartialEq)]
pub struct RawGuest {
    pub kind: GuestKind,
    pub item: GuestListItem,
}

/// Capacités d'une source d'hôte consommées par le réconciliateur
#[async_trait]
pub trait HostSource: Send + Sync {
    fn host_id(&self) -> &str;
    async fn discover_identity(&self) -> String;
    async fn get_status(&self) -> HostSnapshot;
    async fn get_inventory(&self) -> Result<Vec<RawGuest>>;
    async fn subscribe_to_events(&self, sink: EventSink) -> WatchHandle;
    async fn test_connection(&self) -> bool;
}

pub struct NodePoller {
    conn: HostConnection,
    api: Arc<dyn ManagementApi>,
    retry: RetryConf,
    watch: WatchConf,
    canonical: Mutex<Option<String>>,
}

impl NodePoller {
    pub fn new(
        conn: HostConnection,
        api: Arc<dyn ManagementApi>,
        retry: RetryConf,
        polling: &PollingConf,
    ) -> Self {
        Self {
            conn,
            api,
            retry,
            watch: WatchConf::from(polling),
            canonical: Mutex::new(None),
        }
    }

    pub fn connection(&self) -> &HostConnection {
        &self.conn
    }

    pub fn api(&self) -> Arc<dyn ManagementApi> {
        self.api.clone()
    }

    pub fn canonical_name(&self) -> Option<String> {
        self.canonical.lock().clone()
    }

    fn remember(&self, name: &str, how: &str) -> String {
        info!(host = %self.conn.id, node = name, via = how, "canonical node name discovered");
        *self.canonical.lock() = Some(name.to_string());
        name.to_string()
    }

    pub async fn discover_canonical_name(&self) -> String {
        if let Some(name) = self.canonical_name() {
            return name;
        }

        let nodes = match self.api.list_nodes().await {
            Ok(nodes) => nodes,
            Err(e) => {
                warn!(host = %self.conn.id, error = %e, "node list unavailable, using legacy name");
                return LEGACY_NODE_NAME.to_string();
            }
        };

        // a) correspondance par IP (liste des nœuds, sinon statut cluster)
        if let Some(addr) = self.conn.address() {
            if let Some(n) = nodes.iter().find(|n| n.ip.as_deref() == Some(addr.as_str())) {
                return self.remember(&n.node, "ip");
            }
            if let Ok(entries) = self.api.cluster_status().await {
                let hit = entries
                    .iter()
                    .find(|e| e.entry_type == "node" && e.ip.as_deref() == Some(addr.as_str()));
                if let Some(e) = hit {
                    if nodes.iter().any(|n| n.node == e.name) {
                        return self.remember(&e.name, "cluster-ip");
                    }
                }
            }
        }

        // b) correspondance par id / nom configuré / nom d'hôte de l'URL
        let wanted: Vec<String> = [Some(self.conn.id.clone()), self.conn.name.clone(), self.conn.address()]
            .into_iter()
            .flatten()
            .map(|s| s.to_ascii_lowercase())
            .collect();
        if let Some(n) = nodes.iter().find(|n| wanted.contains(&n.node.to_ascii_lowercase())) {
            return self.remember(&n.node, "name");
        }

        // c) sonde de chaque candidat jusqu'à une réponse
        for n in &nodes {
            if self.api.node_status(&n.node).await.is_ok() {
                return self.remember(&n.node, "probe");
            }
        }

        // d) défaut historique, non mémorisé pour retenter au prochain cycle
        warn!(host = %self.conn.id, "no node matched, falling back to legacy name");
        LEGACY_NODE_NAME.to_string()
    }

    /// Statut de l'hôte avec retry ; jamais d'erreur, au pire un snapshot offline
    pub async fn poll(&self) -> HostSnapshot {
        let node = self.discover_canonical_name().await;
        let attempts = self.retry.attempts.max(1);
        for attempt in 1..=attempts {
            match self.api.node_status(&node).await {
                Ok(status) => return self.snapshot(&node, status),
                Err(e) => {
                    warn!(host = %self.conn.id, attempt, attempts, error = %e, "status probe failed");
                    if attempt < attempts {
                        tokio::time::sleep(self.retry.delay()).await;
                    }
                }
            }
        }
        HostSnapshot::offline(&self.conn.id, self.conn.display_name(), self.canonical_name())
    }

    fn snapshot(&self, node: &str, st: NodeStatus) -> HostSnapshot {
        let rootfs = st.rootfs.unwrap_or_default();
        let swap = st.swap.unwrap_or_default();
        HostSnapshot {
            id: self.conn.id.clone(),
            name: self.conn.display_name().to_string(),
            canonical_name: Some(node.to_string()),
            status: HostStatus::Online,
            cpu: st.cpu,
            memory: Usage { used: st.memory.used, total: st.memory.total },
            disk: Usage { used: rootfs.used, total: rootfs.total },
            swap: Usage { used: swap.used, total: swap.total },
            load_avg: st.loadavg,
            uptime: st.uptime,
            polled_at: OffsetDateTime::now_utc(),
        }
    }

    /// Liste VMs et conteneurs, enrichis par le détail courant des invités actifs
    pub async fn inventory(&self) -> Result<Vec<RawGuest>> {
        let node = self.discover_canonical_name().await;
        let mut listed = Vec::new();
        for kind in [GuestKind::Vm, GuestKind::Container] {
            let items = self.api.list_guests(&node, kind).await?;
            listed.extend(
                items
                    .into_iter()
                    .filter(|i| i.template.unwrap_or(0) == 0)
                    .map(|item| RawGuest { kind, item }),
            );
        }

        let details = listed.iter().map(|g| {
            let node = node.clone();
            async move {
                if g.item.status != "running" {
                    return g.clone();
                }
                match self.api.guest_status(&node, g.kind, g.item.vmid).await {
                    Ok(detail) => RawGuest { kind: g.kind, item: merge_detail(&g.item, detail) },
                    Err(e) => {
                        debug!(host = %self.conn.id, vmid = g.item.vmid, error = %e,
                               "guest detail failed, keeping list fields");
                        g.clone()
                    }
                }
            }
        });
        Ok(join_all(details).await)
    }

    /// Découverte puis une seule sonde de statut
    pub async fn test_connection(&self) -> bool {
        let node = self.discover_canonical_name().await;
        match self.api.node_status(&node).await {
            Ok(_) => true,
            Err(e) => {
                warn!(host = %self.conn.id, node = %node, error = %e, "connection test failed");
                false
            }
        }
    }

    /// Surveille le journal du nœud tel que connu à cet instant
    pub async fn watch_events(&self, sink: EventSink) -> WatchHandle {
        let node = self.canonical_name().unwrap_or_else(|| LEGACY_NODE_NAME.to_string());
        EventWatcher::new(self.conn.id.clone(), node, self.api.clone(), self.watch.clone())
            .start(sink)
            .await
    }
}

/// Le détail courant prime, les champs absents retombent sur la liste
fn merge_detail(list: &GuestListItem, detail: GuestListItem) -> GuestListItem {
    GuestListItem {
        vmid: list.vmid,
        name: detail.name.or_else(|| list.name.clone()),
        status: if detail.status.is_empty() { list.status.clone() } else { detail.status },
        cpu: detail.cpu.or(list.cpu),
        cpus: detail.cpus.or(list.cpus),
        mem: detail.mem.or(list.mem),
        maxmem: detail.maxmem.or(list.maxmem),
        disk: detail.disk.or(list.disk),
        maxdisk: detail.maxdisk.or(list.maxdisk),
        netin: detail.netin.or(list.netin),
        netout: detail.netout.or(list.netout),
        diskread: detail.diskread.or(list.diskread),
        diskwrite: detail.diskwrite.or(list.diskwrite),
        uptime: detail.uptime.or(list.uptime),
        template: list.template,
    }
}

#[async_trait]
impl HostSource for NodePoller {
    fn host_id(&self) -> &str {
        &self.conn.id
    }

    async fn discover_identity(&self) -> String {
        self.discover_canonical_name().await
    }

    async fn get_status(&self) -> HostSnapshot {
        self.poll().await
    }

    async fn get_inventory(&self) -> Result<Vec<RawGuest>> {
        self.inventory().await
    }

    async fn subscribe_to_events(&self, sink: EventSink) -> WatchHandle {
        self.watch_events(sink).await
    }

    async fn test_connection(&self) -> bool {
        NodePoller::test_connection(self).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_detail_prefers_detail_fields() {
        let list = GuestListItem {
            vmid: 101,
            name: Some("web".into()),
            status: "running".into(),
            cpu: Some(0.1),
            netin: Some(10),
            maxmem: Some(2048),
            ..GuestListItem::default()
        };
        let detail = GuestListItem {
            vmid: 101,
            status: "running".into(),
            cpu: Some(0.4),
            netin: Some(500),
            ..GuestListItem::default()
        };
        let merged = merge_detail(&list, detail);
        assert_eq!(merged.cpu, Some(0.4));
        assert_eq!(merged.netin, Some(500));
        assert_eq!(merged.maxmem, Some(2048));
        assert_eq!(merged.name.as_deref(), Some("web"));
    }
}
