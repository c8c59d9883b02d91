/**
 * NORMALISEUR DE MÉTRIQUES - Débits lissés et historique borné
 *
 * RÔLE : Transforme les compteurs cumulés (réseau, disque) en débits lissés,
 * calcule les pourcentages CPU/mémoire et conserve un historique circulaire
 * par entité.
 *
 * FONCTIONNEMENT :
 * - un état de débit par entité : derniers compteurs + 4 lisseurs
 *   (net entrée/sortie, disque lecture/écriture)
 * - valeur courante = précision complète ; historique = format compact
 * - borne d'historique = rétention (minutes) * 60 / intervalle de poll
 */

use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use time::OffsetDateTime;
use tracing::debug;

use super::rate::{counter_rate, RateSmoother};
use super::storage::StoredSample;
use super::{EntityKind, MetricSample};
use crate::config::{MetricsConf, SmoothingConf};
use crate::models::{GuestSnapshot, HostSnapshot, IoCounters};

struct RateState {
    counters: IoCounters,
    at: OffsetDateTime,
    net_in: RateSmoother,
    net_out: RateSmoother,
    disk_read: RateSmoother,
    disk_write: RateSmoother,
}

impl RateState {
    fn new(conf: SmoothingConf, counters: IoCounters, at: OffsetDateTime) -> Self {
        Self {
            counters,
            at,
            net_in: RateSmoother::new(conf),
            net_out: RateSmoother::new(conf),
            disk_read: RateSmoother::new(conf),
            disk_write: RateSmoother::new(conf),
        }
    }

    /// Renvoie (net_in, net_out, disk_read, disk_write) lissés
    fn advance(&mut self, counters: IoCounters, at: OffsetDateTime) -> [f64; 4] {
        let dt = (at - self.at).as_seconds_f64();
        let prev = self.counters;
        let rates = [
            self.net_in.push(counter_rate(counters.net_in, prev.net_in, dt)),
            self.net_out.push(counter_rate(counters.net_out, prev.net_out, dt)),
            self.disk_read.push(counter_rate(counters.disk_read, prev.disk_read, dt)),
            self.disk_write.push(counter_rate(counters.disk_write, prev.disk_write, dt)),
        ];
        self.counters = counters;
        self.at = at;
        rates
    }
}

#[derive(Default)]
struct NormalizerState {
    rates: HashMap<String, RateState>,
    current: HashMap<String, MetricSample>,
    history: HashMap<String, VecDeque<StoredSample>>,
}

pub struct MetricsNormalizer {
    smoothing: SmoothingConf,
    history_bound: usize,
    byte_threshold: u64,
    state: Mutex<NormalizerState>,
}

impl MetricsNormalizer {
    pub fn new(conf: &MetricsConf, poll_interval_secs: u64) -> Self {
        Self {
            smoothing: conf.smoothing,
            history_bound: conf.history_bound(poll_interval_secs),
            byte_threshold: conf.byte_threshold_mb.saturating_mul(1024 * 1024),
            state: Mutex::new(NormalizerState::default()),
        }
    }

    pub fn history_bound(&self) -> usize {
        self.history_bound
    }

    pub fn ingest_host(&self, snap: &HostSnapshot) -> MetricSample {
        let sample = MetricSample {
            entity_id: snap.id.clone(),
            kind: EntityKind::Host,
            host_id: snap.id.clone(),
            timestamp: snap.polled_at,
            cpu_percent: snap.cpu * 100.0,
            memory_percent: snap.memory.percent(),
            memory: snap.memory,
            disk: snap.disk,
            net_in_rate: 0.0,
            net_out_rate: 0.0,
            disk_read_rate: 0.0,
            disk_write_rate: 0.0,
            counters: IoCounters::default(),
        };
        self.record(sample.clone());
        sample
    }

    pub fn ingest_guest(&self, snap: &GuestSnapshot) -> MetricSample {
        let rates = {
            let mut guard = self.state.lock();
            let st = &mut *guard;
            match st.rates.get_mut(&snap.id) {
                Some(rs) => rs.advance(snap.counters, snap.polled_at),
                None => {
                    // premier relevé : pas encore de débit
                    st.rates.insert(
                        snap.id.clone(),
                        RateState::new(self.smoothing, snap.counters, snap.polled_at),
                    );
                    [0.0; 4]
                }
            }
        };

        let sample = MetricSample {
            entity_id: snap.id.clone(),
            kind: snap.kind.into(),
            host_id: snap.host_id.clone(),
            timestamp: snap.polled_at,
            cpu_percent: snap.cpu * 100.0,
            memory_percent: snap.memory.percent(),
            memory: snap.memory,
            disk: snap.disk,
            net_in_rate: rates[0],
            net_out_rate: rates[1],
            disk_read_rate: rates[2],
            disk_write_rate: rates[3],
            counters: snap.counters,
        };
        self.record(sample.clone());
        sample
    }

    /// Enregistre la valeur courante et l'ajoute (compactée) à l'historique
    pub fn record(&self, sample: MetricSample) {
        let stored = StoredSample::from_sample(&sample, self.byte_threshold);
        let mut st = self.state.lock();
        let hist = st
            .history
            .entry(sample.entity_id.clone())
            .or_insert_with(|| VecDeque::with_capacity(self.history_bound.min(1024)));
        hist.push_back(stored);
        while hist.len() > self.history_bound {
            hist.pop_front();
        }
        st.current.insert(sample.entity_id.clone(), sample);
    }

    pub fn current_metrics(&self, id: &str) -> Option<MetricSample> {
        self.state.lock().current.get(id).cloned()
    }

    pub fn history(&self, id: &str) -> Vec<StoredSample> {
        self.state
            .lock()
            .history
            .get(id)
            .map(|h| h.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn all_current(&self) -> Vec<MetricSample> {
        let mut all: Vec<MetricSample> = self.state.lock().current.values().cloned().collect();
        all.sort_by(|a, b| a.entity_id.cmp(&b.entity_id));
        all
    }

    pub fn current_by_kind(&self, kind: EntityKind) -> Vec<MetricSample> {
        self.all_current().into_iter().filter(|s| s.kind == kind).collect()
    }

    pub fn current_for_host(&self, host_id: &str) -> Vec<MetricSample> {
        self.all_current().into_iter().filter(|s| s.host_id == host_id).collect()
    }

    /// Oublie une entité (invité supprimé, hôte retiré)
    pub fn forget(&self, id: &str) {
        let mut st = self.state.lock();
        st.rates.remove(id);
        st.current.remove(id);
        st.history.remove(id);
        debug!(entity = id, "metrics forgotten");
    }

    pub fn clear(&self) {
        let mut st = self.state.lock();
        st.rates.clear();
        st.current.clear();
        st.history.clear();
    }

    pub fn tracked(&self) -> usize {
        self.state.lock().current.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{GuestKind, GuestStatus, HostStatus, Usage};
    use time::Duration;

    fn guest(id: &str, net_in: u64, at: OffsetDateTime) -> GuestSnapshot {
        GuestSnapshot {
            id: id.into(),
            vmid: 101,
            name: "web".into(),
            kind: GuestKind::Vm,
            host_id: "pve1".into(),
            status: GuestStatus::Running,
            cpu: 0.25,
            cpus: 2,
            memory: Usage { used: 512, total: 2048 },
            disk: Usage::default(),
            counters: IoCounters { net_in, ..IoCounters::default() },
            uptime: 10,
            polled_at: at,
        }
    }

    fn normalizer(retention_minutes: u64, poll_secs: u64) -> MetricsNormalizer {
        let conf = MetricsConf { retention_minutes, ..MetricsConf::default() };
        MetricsNormalizer::new(&conf, poll_secs)
    }

    #[test]
    fn test_counter_reset_never_negative() {
        let n = normalizer(60, 10);
        let t0 = OffsetDateTime::UNIX_EPOCH;
        n.ingest_guest(&guest("g", 100, t0));
        let s1 = n.ingest_guest(&guest("g", 150, t0 + Duration::seconds(1)));
        assert!((s1.net_in_rate - 50.0).abs() < 1e-9);
        let s2 = n.ingest_guest(&guest("g", 90, t0 + Duration::seconds(2)));
        assert!(s2.net_in_rate >= 0.0);
        // fenêtre [50, 0] : publiée = (50*1 + 0*2) / 3
        assert!((s2.net_in_rate - 50.0 / 3.0).abs() < 1e-9);
        assert_eq!(s2.counters.net_in, 90);
    }

    #[test]
    fn test_percentages_and_current_value_full_precision() {
        let n = normalizer(60, 10);
        let s = n.ingest_guest(&guest("g", 0, OffsetDateTime::UNIX_EPOCH));
        assert_eq!(s.cpu_percent, 25.0);
        assert_eq!(s.memory_percent, 25.0);
        assert_eq!(n.current_metrics("g").unwrap(), s);
        assert_eq!(n.history("g")[0].cpu, 25);
    }

    #[test]
    fn test_history_never_exceeds_bound() {
        let n = normalizer(1, 10);
        let bound = n.history_bound();
        assert_eq!(bound, 6);
        let t0 = OffsetDateTime::UNIX_EPOCH;
        for i in 0..(bound + 5) {
            n.ingest_guest(&guest("g", i as u64 * 10, t0 + Duration::seconds(i as i64 * 10)));
            assert!(n.history("g").len() <= bound);
        }
        let hist = n.history("g");
        assert_eq!(hist.len(), bound);
        // les plus anciens ont été évincés
        assert_eq!(hist[0].ts, (t0 + Duration::seconds(50)).unix_timestamp());
    }

    #[test]
    fn test_views_forget_and_clear() {
        let n = normalizer(60, 10);
        let t0 = OffsetDateTime::UNIX_EPOCH;
        n.ingest_guest(&guest("g1", 0, t0));
        let mut ct = guest("c1", 0, t0);
        ct.kind = GuestKind::Container;
        n.ingest_guest(&ct);
        let mut host = HostSnapshot::offline("pve1", "pve1", None);
        host.status = HostStatus::Online;
        host.cpu = 0.5;
        n.ingest_host(&host);

        assert_eq!(n.all_current().len(), 3);
        assert_eq!(n.current_by_kind(EntityKind::Container).len(), 1);
        assert_eq!(n.current_by_kind(EntityKind::Host)[0].cpu_percent, 50.0);
        assert_eq!(n.current_for_host("pve1").len(), 3);

        n.forget("g1");
        assert!(n.current_metrics("g1").is_none());
        assert!(n.history("g1").is_empty());

        n.clear();
        assert_eq!(n.tracked(), 0);
    }
}
