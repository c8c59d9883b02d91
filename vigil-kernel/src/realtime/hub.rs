/**
 * HUB TEMPS RÉEL - Fan-out des événements du pipeline vers les dashboards
 *
 * RÔLE : Tient le registre des clients connectés et de leurs rooms, pousse
 * un snapshot complet à la connexion puis chaque événement du bus.
 *
 * FONCTIONNEMENT :
 * - chaque client a une file bornée ; file pleine = message perdu pour ce
 *   client seulement, file fermée = client retiré
 * - un événement part en global puis est ré-émis dans ses rooms (champ room)
 * - mode cluster : METRICS_UPDATE d'un invité limité par UpdateThrottle
 * - la déconnexion libère immédiatement les rooms du client et le compteur
 *   de son adresse dès que sa fenêtre est écoulée
 */

use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::protocol::{
    guest_room, node_room, ClientRequest, ConnectedPayload, Envelope, HistoryPayload,
    ServerConfigPayload, ServerMessage, SnapshotPayload,
};
use super::throttle::{ConnectionThrottle, UpdateThrottle};
use crate::bus::PipelineEvent;
use crate::error::RealtimeError;
use crate::reconciler::InventoryReconciler;

pub type ClientId = Uuid;

struct ClientHandle {
    addr: SocketAddr,
    tx: mpsc::Sender<Arc<str>>,
    rooms: HashSet<String>,
}

#[derive(Default)]
struct Registry {
    clients: HashMap<ClientId, ClientHandle>,
    rooms: HashMap<String, HashSet<ClientId>>,
}

impl Registry {
    fn leave_all(&mut self, id: &ClientId) -> Option<ClientHandle> {
        let client = self.clients.remove(id)?;
        for room in &client.rooms {
            if let Some(members) = self.rooms.get_mut(room) {
                members.remove(id);
                if members.is_empty() {
                    self.rooms.remove(room);
                }
            }
        }
        Some(client)
    }
}

pub struct RealtimeHub {
    reconciler: InventoryReconciler,
    registry: Mutex<Registry>,
    connections: ConnectionThrottle,
    updates: UpdateThrottle,
    client_buffer: usize,
}

impl RealtimeHub {
    pub fn new(reconciler: InventoryReconciler) -> Self {
        let conf = reconciler.config().realtime.clone();
        Self {
            connections: ConnectionThrottle::new(
                conf.max_connections_per_window,
                Duration::from_secs(conf.window_secs),
                !conf.dev_mode,
            ),
            updates: UpdateThrottle::new(Duration::from_millis(conf.min_update_interval_ms)),
            client_buffer: conf.client_buffer.max(1),
            registry: Mutex::new(Registry::default()),
            reconciler,
        }
    }

    /// Contrôle anti-tempête, avant toute logique applicative
    pub fn admit(&self, ip: IpAddr) -> Result<(), RealtimeError> {
        self.connections.check(ip)
    }

    /// Enregistre le client et met en file le message CONNECTED avec le snapshot complet
    pub fn connect(&self, addr: SocketAddr) -> (ClientId, mpsc::Receiver<Arc<str>>) {
        let id = Uuid::new_v4();
        let (tx, rx) = mpsc::channel(self.client_buffer);
        self.registry
            .lock()
            .clients
            .insert(id, ClientHandle { addr, tx, rooms: HashSet::new() });

        let hello = ServerMessage::Connected(ConnectedPayload {
            client_id: id.to_string(),
            topology: self.reconciler.topology(),
            snapshot: self.snapshot(true, true, true),
        });
        self.send_to(&id, &Envelope::new(hello));
        info!(client = %id, %addr, "client connected");
        (id, rx)
    }

    pub fn disconnect(&self, id: &ClientId) {
        let client = self.registry.lock().leave_all(id);
        if let Some(client) = client {
            self.connections.release(client.addr.ip());
            info!(client = %id, addr = %client.addr, rooms = client.rooms.len(), "client disconnected");
        }
    }

    pub fn join(&self, id: &ClientId, room: String) -> Result<(), RealtimeError> {
        let mut reg = self.registry.lock();
        let client = reg
            .clients
            .get_mut(id)
            .ok_or_else(|| RealtimeError::UnknownClient(id.to_string()))?;
        client.rooms.insert(room.clone());
        debug!(client = %id, %room, "room joined");
        reg.rooms.entry(room).or_default().insert(*id);
        Ok(())
    }

    pub fn leave(&self, id: &ClientId, room: &str) -> Result<(), RealtimeError> {
        let mut reg = self.registry.lock();
        let client = reg
            .clients
            .get_mut(id)
            .ok_or_else(|| RealtimeError::UnknownClient(id.to_string()))?;
        client.rooms.remove(room);
        if let Some(members) = reg.rooms.get_mut(room) {
            members.remove(id);
            if members.is_empty() {
                reg.rooms.remove(room);
            }
        }
        Ok(())
    }

    pub fn rooms_of(&self, id: &ClientId) -> Vec<String> {
        let reg = self.registry.lock();
        let mut rooms: Vec<String> = reg
            .clients
            .get(id)
            .map(|c| c.rooms.iter().cloned().collect())
            .unwrap_or_default();
        rooms.sort();
        rooms
    }

    pub fn room_size(&self, room: &str) -> usize {
        self.registry.lock().rooms.get(room).map_or(0, HashSet::len)
    }

    pub fn client_count(&self) -> usize {
        self.registry.lock().clients.len()
    }

    pub fn rejected_connections(&self) -> u64 {
        self.connections.rejected()
    }

    fn snapshot(&self, hosts: bool, guests: bool, metrics: bool) -> SnapshotPayload {
        SnapshotPayload {
            hosts: hosts.then(|| self.reconciler.hosts()),
            guests: guests.then(|| self.reconciler.guests()),
            metrics: metrics.then(|| self.reconciler.normalizer().all_current()),
        }
    }

    /// Message texte reçu d'un client ; une requête invalide lui renvoie ERROR
    pub fn handle_text(&self, id: &ClientId, text: &str) {
        match ClientRequest::parse(text) {
            Ok(request) => {
                if let Err(e) = self.handle_request(id, request) {
                    self.send_to(id, &Envelope::new(ServerMessage::error(e.to_string())));
                }
            }
            Err(e) => {
                let err = RealtimeError::BadRequest(e.to_string());
                debug!(client = %id, error = %err, "rejected client message");
                self.send_to(id, &Envelope::new(ServerMessage::error(err.to_string())));
            }
        }
    }

    pub fn handle_request(&self, id: &ClientId, request: ClientRequest) -> Result<(), RealtimeError> {
        let reply = match request {
            ClientRequest::JoinNode(t) => return self.join(id, node_room(&t.id)),
            ClientRequest::LeaveNode(t) => return self.leave(id, &node_room(&t.id)),
            ClientRequest::JoinGuest(t) => return self.join(id, guest_room(&t.id)),
            ClientRequest::LeaveGuest(t) => return self.leave(id, &guest_room(&t.id)),
            ClientRequest::RefreshNodes => ServerMessage::Snapshot(self.snapshot(true, false, false)),
            ClientRequest::RefreshGuests => ServerMessage::Snapshot(self.snapshot(false, true, false)),
            ClientRequest::RefreshMetrics => ServerMessage::Snapshot(self.snapshot(false, false, true)),
            ClientRequest::RequestHistory(t) => ServerMessage::History(HistoryPayload {
                samples: self.reconciler.normalizer().history(&t.id),
                entity_id: t.id,
            }),
            ClientRequest::Ping => ServerMessage::Pong,
            ClientRequest::RequestConfig => ServerMessage::ServerConfig(self.server_config()),
        };
        self.send_to(id, &Envelope::new(reply));
        Ok(())
    }

    fn server_config(&self) -> ServerConfigPayload {
        let cfg = self.reconciler.config();
        ServerConfigPayload {
            cluster: self.reconciler.topology(),
            hosts: cfg.hosts.iter().map(|h| h.id.clone()).collect(),
            poll_interval_secs: cfg.polling.interval_secs,
            event_interval_secs: cfg.polling.event_interval_secs,
            retention_minutes: cfg.metrics.retention_minutes,
            history_bound: self.reconciler.normalizer().history_bound(),
            min_update_interval_ms: cfg.realtime.min_update_interval_ms,
            dev_mode: cfg.realtime.dev_mode,
            mock_data: cfg.mock_data,
        }
    }

    /// Diffusion globale puis ré-émission dans chaque room de l'événement
    pub fn dispatch(&self, event: PipelineEvent) {
        if let PipelineEvent::Metrics(sample) = &event {
            if sample.is_guest()
                && self.reconciler.topology().is_cluster
                && !self.updates.allow(&sample.entity_id)
            {
                debug!(guest = %sample.entity_id, "metrics update throttled");
                return;
            }
        }

        let rooms = event.rooms();
        let envelope = Envelope::new(ServerMessage::from(event));
        let global = match envelope.to_text() {
            Ok(text) => Arc::<str>::from(text),
            Err(e) => {
                warn!(error = %e, "event serialization failed");
                return;
            }
        };
        let everyone: Vec<ClientId> = self.registry.lock().clients.keys().copied().collect();
        for id in &everyone {
            self.push(id, global.clone());
        }

        for room in rooms {
            let members: Vec<ClientId> = match self.registry.lock().rooms.get(&room) {
                Some(m) => m.iter().copied().collect(),
                None => continue,
            };
            let scoped = match envelope.clone().in_room(room).to_text() {
                Ok(text) => Arc::<str>::from(text),
                Err(e) => {
                    warn!(error = %e, "event serialization failed");
                    return;
                }
            };
            for id in &members {
                self.push(id, scoped.clone());
            }
        }
    }

    fn send_to(&self, id: &ClientId, envelope: &Envelope) {
        match envelope.to_text() {
            Ok(text) => self.push(id, Arc::from(text)),
            Err(e) => warn!(client = %id, error = %e, "message serialization failed"),
        }
    }

    /// Isolé par client : une file pleine ne touche que ce client
    fn push(&self, id: &ClientId, text: Arc<str>) {
        let tx = match self.registry.lock().clients.get(id) {
            Some(c) => c.tx.clone(),
            None => return,
        };
        match tx.try_send(text) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(client = %id, "client queue full, message dropped");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => self.disconnect(id),
        }
    }

    /// Consomme le bus jusqu'à sa fermeture
    pub fn spawn(self: &Arc<Self>) -> JoinHandle<()> {
        let hub = self.clone();
        let mut rx = hub.reconciler.bus().subscribe();
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => hub.dispatch(event),
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(skipped = n, "realtime hub lagging behind the bus");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }
}
