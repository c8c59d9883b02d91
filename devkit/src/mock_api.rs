/*!
Mock de l'API de gestion des hyperviseurs

Implémente `ManagementApi` en mémoire : nœuds, statuts, invités, journal de
tâches et statut cluster programmables, avec injection de pannes et
compteurs d'appels par endpoint.
*/

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use vigil_kernel::api::{
    ApiConnector, ClusterStatusEntry, GuestListItem, ManagementApi, NodeListItem, NodeStatus,
    TaskEntry,
};
use vigil_kernel::config::HostConnection;
use vigil_kernel::error::{KernelError, Result};
use vigil_kernel::models::GuestKind;

#[derive(Default)]
struct MockState {
    nodes: Vec<NodeListItem>,
    status: HashMap<String, NodeStatus>,
    guests: HashMap<(String, GuestKind), Vec<GuestListItem>>,
    details: HashMap<(String, GuestKind, u32), GuestListItem>,
    tasks: HashMap<String, Vec<TaskEntry>>,
    cluster: Option<Vec<ClusterStatusEntry>>,
    node_list_down: bool,
    status_down: bool,
    status_failures: u32,
    inventory_down: bool,
    tasks_down: bool,
    failing_details: HashSet<u32>,
    calls: HashMap<&'static str, usize>,
}

/// Endpoint d'API simulé, partagé entre le test et le pipeline (clonable)
#[derive(Clone, Default)]
pub struct MockManagementApi {
    state: Arc<Mutex<MockState>>,
}

fn unavailable(path: impl Into<String>) -> KernelError {
    KernelError::Status { status: 503, path: path.into() }
}

impl MockManagementApi {
    pub fn new() -> Self {
        let api = Self::default();
        api.state.lock().cluster = Some(Vec::new());
        api
    }

    /// Ajoute un nœud répondant à /status avec un statut par défaut
    pub fn with_node(self, name: &str, ip: Option<&str>) -> Self {
        {
            let mut st = self.state.lock();
            st.nodes.push(NodeListItem {
                node: name.to_string(),
                status: Some("online".into()),
                ip: ip.map(str::to_string),
                cpu: None,
                maxcpu: None,
                mem: None,
                maxmem: None,
                uptime: None,
            });
            st.status.insert(name.to_string(), crate::fixtures::node_status(0.1, 4, 16));
        }
        self
    }

    /// Entrées /cluster/status : une entrée "cluster" puis une entrée "node" par membre
    pub fn with_cluster(self, name: &str, members: &[(&str, &str)]) -> Self {
        let mut entries = vec![ClusterStatusEntry {
            entry_type: "cluster".into(),
            name: name.to_string(),
            ip: None,
            online: None,
            local: None,
        }];
        entries.extend(members.iter().map(|(node, ip)| ClusterStatusEntry {
            entry_type: "node".into(),
            name: node.to_string(),
            ip: Some(ip.to_string()),
            online: Some(1),
            local: None,
        }));
        self.state.lock().cluster = Some(entries);
        self
    }

    pub fn set_node_status(&self, node: &str, status: NodeStatus) {
        self.state.lock().status.insert(node.to_string(), status);
    }

    pub fn set_guests(&self, node: &str, kind: GuestKind, guests: Vec<GuestListItem>) {
        self.state.lock().guests.insert((node.to_string(), kind), guests);
    }

    /// Modifie le statut d'un invité déjà listé
    pub fn set_guest_status(&self, node: &str, kind: GuestKind, vmid: u32, status: &str) {
        let mut st = self.state.lock();
        if let Some(list) = st.guests.get_mut(&(node.to_string(), kind)) {
            for g in list.iter_mut().filter(|g| g.vmid == vmid) {
                g.status = status.to_string();
            }
        }
        if let Some(d) = st.details.get_mut(&(node.to_string(), kind, vmid)) {
            d.status = status.to_string();
        }
    }

    pub fn remove_guest(&self, node: &str, kind: GuestKind, vmid: u32) {
        let mut st = self.state.lock();
        if let Some(list) = st.guests.get_mut(&(node.to_string(), kind)) {
            list.retain(|g| g.vmid != vmid);
        }
        st.details.remove(&(node.to_string(), kind, vmid));
    }

    pub fn set_guest_detail(&self, node: &str, kind: GuestKind, detail: GuestListItem) {
        self.state.lock().details.insert((node.to_string(), kind, detail.vmid), detail);
    }

    pub fn push_task(&self, node: &str, task: TaskEntry) {
        self.state.lock().tasks.entry(node.to_string()).or_default().push(task);
    }

    /// /cluster/status en erreur
    pub fn fail_cluster_status(&self) {
        self.state.lock().cluster = None;
    }

    pub fn set_node_list_down(&self, down: bool) {
        self.state.lock().node_list_down = down;
    }

    /// Toutes les sondes /status échouent tant que `down`
    pub fn set_status_down(&self, down: bool) {
        self.state.lock().status_down = down;
    }

    /// Les `n` prochaines sondes /status échouent
    pub fn fail_next_status(&self, n: u32) {
        self.state.lock().status_failures = n;
    }

    pub fn set_inventory_down(&self, down: bool) {
        self.state.lock().inventory_down = down;
    }

    pub fn set_tasks_down(&self, down: bool) {
        self.state.lock().tasks_down = down;
    }

    pub fn fail_detail(&self, vmid: u32) {
        self.state.lock().failing_details.insert(vmid);
    }

    pub fn calls(&self, endpoint: &str) -> usize {
        self.state.lock().calls.get(endpoint).copied().unwrap_or(0)
    }

    pub fn reset_calls(&self) {
        self.state.lock().calls.clear();
    }

    fn hit(&self, endpoint: &'static str) -> parking_lot::MutexGuard<'_, MockState> {
        let mut st = self.state.lock();
        *st.calls.entry(endpoint).or_default() += 1;
        st
    }
}

#[async_trait]
impl ManagementApi for MockManagementApi {
    async fn list_nodes(&self) -> Result<Vec<NodeListItem>> {
        let st = self.hit("nodes");
        if st.node_list_down {
            return Err(unavailable("/nodes"));
        }
        Ok(st.nodes.clone())
    }

    async fn node_status(&self, node: &str) -> Result<NodeStatus> {
        let mut st = self.hit("status");
        if st.status_down {
            return Err(unavailable(format!("/nodes/{node}/status")));
        }
        if st.status_failures > 0 {
            st.status_failures -= 1;
            return Err(unavailable(format!("/nodes/{node}/status")));
        }
        st.status
            .get(node)
            .cloned()
            .ok_or_else(|| KernelError::Status { status: 404, path: format!("/nodes/{node}/status") })
    }

    async fn list_guests(&self, node: &str, kind: GuestKind) -> Result<Vec<GuestListItem>> {
        let st = self.hit("guests");
        if st.inventory_down {
            return Err(unavailable(format!("/nodes/{node}/{}", kind.api_path())));
        }
        Ok(st.guests.get(&(node.to_string(), kind)).cloned().unwrap_or_default())
    }

    async fn guest_status(&self, node: &str, kind: GuestKind, vmid: u32) -> Result<GuestListItem> {
        let st = self.hit("guest_status");
        let path = format!("/nodes/{node}/{}/{vmid}/status/current", kind.api_path());
        if st.failing_details.contains(&vmid) {
            return Err(unavailable(path));
        }
        if let Some(d) = st.details.get(&(node.to_string(), kind, vmid)) {
            return Ok(d.clone());
        }
        st.guests
            .get(&(node.to_string(), kind))
            .and_then(|l| l.iter().find(|g| g.vmid == vmid).cloned())
            .ok_or(KernelError::Status { status: 404, path })
    }

    async fn tasks(&self, node: &str, since: Option<i64>) -> Result<Vec<TaskEntry>> {
        let st = self.hit("tasks");
        if st.tasks_down {
            return Err(unavailable(format!("/nodes/{node}/tasks")));
        }
        let all = st.tasks.get(node).cloned().unwrap_or_default();
        Ok(match since {
            Some(ts) => all.into_iter().filter(|t| t.starttime >= ts).collect(),
            None => all,
        })
    }

    async fn cluster_status(&self) -> Result<Vec<ClusterStatusEntry>> {
        let st = self.hit("cluster");
        st.cluster.clone().ok_or_else(|| unavailable("/cluster/status"))
    }
}

/// Connecteur de test : un endpoint simulé par id d'hôte configuré
#[derive(Clone, Default)]
pub struct MockConnector {
    apis: Arc<Mutex<HashMap<String, MockManagementApi>>>,
}

impl MockConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_host(self, host_id: &str, api: MockManagementApi) -> Self {
        self.apis.lock().insert(host_id.to_string(), api);
        self
    }

    pub fn insert(&self, host_id: &str, api: MockManagementApi) {
        self.apis.lock().insert(host_id.to_string(), api);
    }

    pub fn api(&self, host_id: &str) -> Option<MockManagementApi> {
        self.apis.lock().get(host_id).cloned()
    }
}

impl ApiConnector for MockConnector {
    fn connect(&self, conn: &HostConnection) -> Result<Arc<dyn ManagementApi>> {
        let api = self
            .apis
            .lock()
            .get(&conn.id)
            .cloned()
            .ok_or_else(|| KernelError::UnknownHost(conn.id.clone()))?;
        Ok(Arc::new(api))
    }
}
