use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::net::IpAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::error::RealtimeError;

struct Attempts {
    by_addr: HashMap<IpAddr, VecDeque<Instant>>,
    swept: Instant,
}

/// Fenêtre glissante de tentatives de connexion par adresse.
/// Les tentatives rejetées ne prolongent pas la fenêtre.
pub struct ConnectionThrottle {
    max_attempts: usize,
    window: Duration,
    enabled: bool,
    attempts: Mutex<Attempts>,
    rejected: AtomicU64,
}

impl ConnectionThrottle {
    pub fn new(max_attempts: usize, window: Duration, enabled: bool) -> Self {
        Self {
            max_attempts,
            window,
            enabled,
            attempts: Mutex::new(Attempts { by_addr: HashMap::new(), swept: Instant::now() }),
            rejected: AtomicU64::new(0),
        }
    }

    fn expired(&self, now: Instant, seen: &VecDeque<Instant>) -> bool {
        seen.back().map_or(true, |t| now.duration_since(*t) >= self.window)
    }

    pub fn check(&self, ip: IpAddr) -> Result<(), RealtimeError> {
        if !self.enabled {
            return Ok(());
        }
        let now = Instant::now();
        let mut attempts = self.attempts.lock();
        // au plus un balayage complet par fenêtre
        if now.duration_since(attempts.swept) >= self.window {
            attempts.by_addr.retain(|_, seen| !self.expired(now, seen));
            attempts.swept = now;
        }
        let seen = attempts.by_addr.entry(ip).or_default();
        while seen.front().is_some_and(|t| now.duration_since(*t) >= self.window) {
            seen.pop_front();
        }
        if seen.len() >= self.max_attempts {
            self.rejected.fetch_add(1, Ordering::Relaxed);
            warn!(%ip, attempts = seen.len(), "connection throttled");
            return Err(RealtimeError::Throttled(ip));
        }
        seen.push_back(now);
        Ok(())
    }

    /// Libère le compteur d'une adresse à la déconnexion. Les tentatives encore
    /// dans la fenêtre restent comptées, sinon une boucle connexion/fermeture
    /// contournerait la limite.
    pub fn release(&self, ip: IpAddr) {
        let now = Instant::now();
        let mut attempts = self.attempts.lock();
        if attempts.by_addr.get(&ip).is_some_and(|seen| self.expired(now, seen)) {
            attempts.by_addr.remove(&ip);
            debug!(%ip, "connection counter released");
        }
    }

    pub fn rejected(&self) -> u64 {
        self.rejected.load(Ordering::Relaxed)
    }

    pub fn tracked_addresses(&self) -> usize {
        self.attempts.lock().by_addr.len()
    }
}

struct Emissions {
    last: HashMap<String, Instant>,
    swept: Instant,
}

/// Intervalle minimal entre deux émissions de métriques d'un même invité.
/// Une entrée plus vieille que l'intervalle n'a plus d'effet et est balayée.
pub struct UpdateThrottle {
    min_interval: Duration,
    emissions: Mutex<Emissions>,
}

impl UpdateThrottle {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            emissions: Mutex::new(Emissions { last: HashMap::new(), swept: Instant::now() }),
        }
    }

    pub fn allow(&self, key: &str) -> bool {
        let now = Instant::now();
        let mut em = self.emissions.lock();
        if now.duration_since(em.swept) >= self.min_interval {
            let min = self.min_interval;
            em.last.retain(|_, t| now.duration_since(*t) < min);
            em.swept = now;
        }
        match em.last.get(key) {
            Some(prev) if now.duration_since(*prev) < self.min_interval => false,
            _ => {
                em.last.insert(key.to_string(), now);
                true
            }
        }
    }

    pub fn tracked(&self) -> usize {
        self.emissions.lock().last.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn ip(last: u8) -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(10, 0, 0, last))
    }

    #[tokio::test(start_paused = true)]
    async fn test_eleventh_attempt_rejected_until_window_elapses() {
        let t = ConnectionThrottle::new(10, Duration::from_secs(60), true);
        for _ in 0..10 {
            assert!(t.check(ip(1)).is_ok());
        }
        assert_eq!(t.check(ip(1)), Err(RealtimeError::Throttled(ip(1))));
        assert!(t.check(ip(1)).is_err());
        // une autre adresse n'est pas concernée
        assert!(t.check(ip(2)).is_ok());
        assert_eq!(t.rejected(), 2);

        tokio::time::advance(Duration::from_secs(61)).await;
        assert!(t.check(ip(1)).is_ok());
        assert_eq!(t.tracked_addresses(), 1);
    }

    #[test]
    fn test_disabled_throttle_accepts_everything() {
        let t = ConnectionThrottle::new(1, Duration::from_secs(60), false);
        for _ in 0..50 {
            assert!(t.check(ip(1)).is_ok());
        }
        assert_eq!(t.rejected(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_update_throttle_min_interval() {
        let t = UpdateThrottle::new(Duration::from_millis(2000));
        assert!(t.allow("lab-vm-101"));
        assert!(!t.allow("lab-vm-101"));
        assert!(t.allow("lab-vm-102"));
        tokio::time::advance(Duration::from_millis(2001)).await;
        assert!(t.allow("lab-vm-101"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_addresses_swept_on_next_check() {
        let t = ConnectionThrottle::new(10, Duration::from_secs(60), true);
        for last in 1..=50 {
            assert!(t.check(ip(last)).is_ok());
        }
        assert_eq!(t.tracked_addresses(), 50);

        tokio::time::advance(Duration::from_secs(61)).await;
        assert!(t.check(ip(200)).is_ok());
        assert_eq!(t.tracked_addresses(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_release_keeps_attempts_inside_window() {
        let t = ConnectionThrottle::new(2, Duration::from_secs(60), true);
        assert!(t.check(ip(1)).is_ok());
        assert!(t.check(ip(1)).is_ok());
        t.release(ip(1));
        // fermer puis rouvrir ne remet pas le compteur à zéro
        assert!(t.check(ip(1)).is_err());

        tokio::time::advance(Duration::from_secs(61)).await;
        t.release(ip(1));
        assert_eq!(t.tracked_addresses(), 0);
        assert!(t.check(ip(1)).is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_update_throttle_forgets_quiet_guests() {
        let t = UpdateThrottle::new(Duration::from_millis(2000));
        for vmid in 100..120 {
            assert!(t.allow(&format!("lab-vm-{vmid}")));
        }
        assert_eq!(t.tracked(), 20);

        tokio::time::advance(Duration::from_millis(2001)).await;
        assert!(t.allow("lab-vm-500"));
        assert_eq!(t.tracked(), 1);
    }
}
