/**
 * CONFIGURATION KERNEL - Chargement de kernel.yaml
 *
 * RÔLE : Décrit les hôtes à superviser et tous les réglages du pipeline
 * (polling, retry, rétention, cluster, diffusion temps réel).
 *
 * FONCTIONNEMENT : fichier YAML pointé par VIGIL_KERNEL_CONFIG (défaut
 * kernel.yaml). Fichier absent, vide ou invalide → configuration par défaut,
 * jamais fatal. Quelques variables d'environnement surchargent le fichier.
 */

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tokio::fs;
use tracing::{info, warn};

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct KernelConfig {
    pub listen: String,
    pub hosts: Vec<HostConnection>,
    pub polling: PollingConf,
    pub retry: RetryConf,
    pub metrics: MetricsConf,
    pub cluster: ClusterConf,
    pub realtime: RealtimeConf,
    /// Uniquement rapporté aux clients (SERVER_CONFIG), le kernel ne génère rien
    pub mock_data: bool,
}

/// Descripteur de connexion vers l'API de gestion d'un hôte
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct HostConnection {
    pub id: String,
    pub name: Option<String>,
    pub base_url: String,
    pub token_id: String,
    pub token_secret: String,
    #[serde(default = "default_true")]
    pub verify_tls: bool,
}

impl HostConnection {
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.id)
    }

    /// Hôte (IP ou nom) extrait de base_url, ex: "https://10.0.0.5:8006" -> "10.0.0.5"
    pub fn address(&self) -> Option<String> {
        let rest = self.base_url.split("://").nth(1).unwrap_or(&self.base_url);
        let authority = rest.split('/').next()?;
        let host = if authority.starts_with('[') {
            authority.split(']').next()?.trim_start_matches('[')
        } else {
            authority.split(':').next()?
        };
        if host.is_empty() { None } else { Some(host.to_string()) }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct PollingConf {
    pub interval_secs: u64,
    pub event_interval_secs: u64,
    pub event_burst_delay_ms: u64,
    pub event_active_interval_ms: u64,
    pub event_recent_window_secs: u64,
    pub request_timeout_secs: u64,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct RetryConf {
    pub attempts: u32,
    pub delay_ms: u64,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct MetricsConf {
    pub retention_minutes: u64,
    pub smoothing: SmoothingConf,
    /// Au-delà de ce seuil les octets sont stockés en MB/GB dans l'historique
    pub byte_threshold_mb: u64,
}

/// Constantes empiriques du lissage, surchargeables
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq)]
#[serde(default)]
pub struct SmoothingConf {
    pub window: usize,
    pub spike_factor: f64,
    pub rise_bias: f64,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(default)]
pub struct ClusterConf {
    pub auto_detect: bool,
    pub name: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct RealtimeConf {
    pub max_connections_per_window: usize,
    pub window_secs: u64,
    pub min_update_interval_ms: u64,
    pub dev_mode: bool,
    pub client_buffer: usize,
}

fn default_true() -> bool {
    true
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            listen: "0.0.0.0:8080".into(),
            hosts: Vec::new(),
            polling: PollingConf::default(),
            retry: RetryConf::default(),
            metrics: MetricsConf::default(),
            cluster: ClusterConf { auto_detect: true, name: None },
            realtime: RealtimeConf::default(),
            mock_data: false,
        }
    }
}

impl Default for PollingConf {
    fn default() -> Self {
        Self {
            interval_secs: 10,
            event_interval_secs: 5,
            event_burst_delay_ms: 500,
            event_active_interval_ms: 1000,
            event_recent_window_secs: 30,
            request_timeout_secs: 10,
        }
    }
}

impl Default for RetryConf {
    fn default() -> Self {
        Self { attempts: 3, delay_ms: 1000 }
    }
}

impl Default for MetricsConf {
    fn default() -> Self {
        Self {
            retention_minutes: 60,
            smoothing: SmoothingConf::default(),
            byte_threshold_mb: 1,
        }
    }
}

impl Default for SmoothingConf {
    fn default() -> Self {
        Self { window: 3, spike_factor: 2.0, rise_bias: 0.7 }
    }
}

impl Default for RealtimeConf {
    fn default() -> Self {
        Self {
            max_connections_per_window: 10,
            window_secs: 60,
            min_update_interval_ms: 2000,
            dev_mode: false,
            client_buffer: 256,
        }
    }
}

impl PollingConf {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs.max(1))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }
}

impl RetryConf {
    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }
}

impl MetricsConf {
    /// Nombre d'échantillons conservés par entité : rétention / intervalle de poll
    pub fn history_bound(&self, poll_interval_secs: u64) -> usize {
        let bound = self.retention_minutes * 60 / poll_interval_secs.max(1);
        (bound as usize).max(1)
    }
}

impl KernelConfig {
    fn apply_env_overrides(&mut self) {
        if let Ok(listen) = std::env::var("VIGIL_LISTEN") {
            if !listen.trim().is_empty() {
                self.listen = listen;
            }
        }
        if let Ok(dev) = std::env::var("VIGIL_DEV_MODE") {
            self.realtime.dev_mode = matches!(dev.trim(), "1" | "true" | "yes");
        }
    }

    pub fn host(&self, id: &str) -> Option<&HostConnection> {
        self.hosts.iter().find(|h| h.id == id)
    }
}

pub async fn load_config() -> KernelConfig {
    let path = std::env::var("VIGIL_KERNEL_CONFIG").unwrap_or_else(|_| "kernel.yaml".into());
    let mut cfg = load_config_from(&path).await;
    cfg.apply_env_overrides();
    cfg
}

pub async fn load_config_from<P: AsRef<Path>>(path: P) -> KernelConfig {
    let path = path.as_ref();
    if !path.exists() {
        warn!(path = %path.display(), "no config file, using defaults");
        return KernelConfig::default();
    }
    let txt = fs::read_to_string(path).await.unwrap_or_default();
    if txt.trim().is_empty() {
        return KernelConfig::default();
    }
    match serde_yaml::from_str::<KernelConfig>(&txt) {
        Ok(cfg) => {
            info!(path = %path.display(), hosts = cfg.hosts.len(), "config loaded");
            cfg
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "invalid config, using defaults");
            KernelConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_history_bound() {
        let m = MetricsConf { retention_minutes: 10, ..MetricsConf::default() };
        assert_eq!(m.history_bound(10), 60);
        assert_eq!(m.history_bound(0), 600);
        let tiny = MetricsConf { retention_minutes: 0, ..MetricsConf::default() };
        assert_eq!(tiny.history_bound(10), 1);
    }

    #[test]
    fn test_host_address() {
        let mut h = HostConnection {
            id: "pve1".into(),
            name: None,
            base_url: "https://10.0.0.5:8006".into(),
            token_id: "root@pam!vigil".into(),
            token_secret: "s".into(),
            verify_tls: false,
        };
        assert_eq!(h.address().as_deref(), Some("10.0.0.5"));
        assert_eq!(h.display_name(), "pve1");
        h.base_url = "https://pve-a.lan/api2/json".into();
        assert_eq!(h.address().as_deref(), Some("pve-a.lan"));
        h.base_url = "https://[fd00::1]:8006".into();
        assert_eq!(h.address().as_deref(), Some("fd00::1"));
    }

    #[tokio::test]
    async fn test_load_config_from_yaml() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
listen: "127.0.0.1:9000"
hosts:
  - id: pve1
    base_url: https://10.0.0.5:8006
    token_id: root@pam!vigil
    token_secret: secret
polling:
  interval_secs: 5
metrics:
  retention_minutes: 30
  smoothing:
    rise_bias: 0.5
cluster:
  auto_detect: false
  name: lab
"#
        )
        .unwrap();

        let cfg = load_config_from(file.path()).await;
        assert_eq!(cfg.listen, "127.0.0.1:9000");
        assert_eq!(cfg.hosts.len(), 1);
        assert!(cfg.hosts[0].verify_tls);
        assert_eq!(cfg.polling.interval_secs, 5);
        assert_eq!(cfg.polling.event_interval_secs, 5);
        assert_eq!(cfg.metrics.smoothing.window, 3);
        assert_eq!(cfg.metrics.smoothing.rise_bias, 0.5);
        assert_eq!(cfg.cluster.name.as_deref(), Some("lab"));
        assert_eq!(cfg.retry.attempts, 3);
    }

    #[tokio::test]
    async fn test_invalid_or_missing_config_falls_back() {
        let cfg = load_config_from("/nonexistent/kernel.yaml").await;
        assert!(cfg.hosts.is_empty());
        assert!(cfg.cluster.auto_detect);

        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "hosts: [ this is : not yaml").unwrap();
        let cfg = load_config_from(file.path()).await;
        assert_eq!(cfg.listen, "0.0.0.0:8080");
    }
}
