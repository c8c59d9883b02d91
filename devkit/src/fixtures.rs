/*!
Fixtures : connexions d'hôtes, statuts, invités, tâches et configurations
rapides pour les tests du pipeline.
*/

use vigil_kernel::api::{GuestListItem, MemoryInfo, NodeStatus, TaskEntry};
use vigil_kernel::config::{ClusterConf, HostConnection, KernelConfig, PollingConf, RetryConf};

const GIB: u64 = 1024 * 1024 * 1024;

pub fn host_conn(id: &str, ip: &str) -> HostConnection {
    HostConnection {
        id: id.to_string(),
        name: None,
        base_url: format!("https://{ip}:8006"),
        token_id: "root@pam!vigil".into(),
        token_secret: "test-secret".into(),
        verify_tls: false,
    }
}

pub fn node_status(cpu: f64, mem_used_gib: u64, mem_total_gib: u64) -> NodeStatus {
    NodeStatus {
        cpu,
        memory: MemoryInfo {
            total: mem_total_gib * GIB,
            used: mem_used_gib * GIB,
            free: mem_total_gib.saturating_sub(mem_used_gib) * GIB,
        },
        swap: None,
        rootfs: Some(MemoryInfo { total: 100 * GIB, used: 20 * GIB, free: 80 * GIB }),
        loadavg: [0.5, 0.4, 0.3],
        uptime: 86_400,
    }
}

pub fn guest(vmid: u32, name: &str, status: &str) -> GuestListItem {
    GuestListItem {
        vmid,
        name: Some(name.to_string()),
        status: status.to_string(),
        cpu: Some(0.2),
        cpus: Some(2.0),
        mem: Some(GIB),
        maxmem: Some(4 * GIB),
        disk: Some(0),
        maxdisk: Some(32 * GIB),
        netin: Some(1_000),
        netout: Some(500),
        diskread: Some(0),
        diskwrite: Some(0),
        uptime: Some(3_600),
        template: None,
    }
}

pub fn task(upid: &str, task_type: &str, vmid: Option<u32>, starttime: i64) -> TaskEntry {
    TaskEntry {
        upid: upid.to_string(),
        node: String::new(),
        task_type: task_type.to_string(),
        id: vmid.map(|v| v.to_string()),
        user: Some("root@pam".into()),
        starttime,
        endtime: None,
        status: None,
    }
}

/// Configuration de test : retries courts, cycle périodique long pour que
/// seuls les rafraîchissements explicites ou événementiels comptent
pub fn fast_config(hosts: Vec<HostConnection>) -> KernelConfig {
    KernelConfig {
        hosts,
        polling: PollingConf {
            interval_secs: 300,
            event_interval_secs: 5,
            event_burst_delay_ms: 200,
            event_active_interval_ms: 1000,
            event_recent_window_secs: 30,
            request_timeout_secs: 2,
        },
        retry: RetryConf { attempts: 3, delay_ms: 100 },
        cluster: ClusterConf { auto_detect: true, name: None },
        ..KernelConfig::default()
    }
}
