use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use super::{
    ApiConnector, ApiEnvelope, ClusterStatusEntry, GuestListItem, ManagementApi, NodeListItem,
    NodeStatus, TaskEntry,
};
use crate::config::HostConnection;
use crate::error::{KernelError, Result};
use crate::models::GuestKind;

/// Client HTTP authentifié par jeton d'API (`PVEAPIToken=<id>=<secret>`)
pub struct PveClient {
    http: reqwest::Client,
    base: String,
}

impl PveClient {
    pub fn new(conn: &HostConnection, timeout: Duration) -> Result<Self> {
        let token = format!("PVEAPIToken={}={}", conn.token_id, conn.token_secret);
        let mut headers = HeaderMap::new();
        let mut auth = HeaderValue::from_str(&token)
            .map_err(|_| KernelError::Config(format!("invalid API token for host {}", conn.id)))?;
        auth.set_sensitive(true);
        headers.insert(AUTHORIZATION, auth);

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .danger_accept_invalid_certs(!conn.verify_tls)
            .build()?;

        Ok(Self { http, base: api_base(&conn.base_url) })
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = format!("{}{}", self.base, path);
        debug!(%url, "upstream GET");
        let resp = self.http.get(&url).send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(KernelError::Status { status: status.as_u16(), path: path.to_string() });
        }
        let body = resp.bytes().await?;
        let env: ApiEnvelope<T> = serde_json::from_slice(&body)?;
        Ok(env.data)
    }
}

/// Normalise l'URL configurée vers la racine `/api2/json`
fn api_base(base_url: &str) -> String {
    let trimmed = base_url.trim_end_matches('/');
    if trimmed.ends_with("/api2/json") {
        trimmed.to_string()
    } else {
        format!("{trimmed}/api2/json")
    }
}

#[async_trait]
impl ManagementApi for PveClient {
    async fn list_nodes(&self) -> Result<Vec<NodeListItem>> {
        self.get("/nodes").await
    }

    async fn node_status(&self, node: &str) -> Result<NodeStatus> {
        self.get(&format!("/nodes/{node}/status")).await
    }

    async fn list_guests(&self, node: &str, kind: GuestKind) -> Result<Vec<GuestListItem>> {
        self.get(&format!("/nodes/{node}/{}", kind.api_path())).await
    }

    async fn guest_status(&self, node: &str, kind: GuestKind, vmid: u32) -> Result<GuestListItem> {
        self.get(&format!("/nodes/{node}/{}/{vmid}/status/current", kind.api_path()))
            .await
    }

    async fn tasks(&self, node: &str, since: Option<i64>) -> Result<Vec<TaskEntry>> {
        match since {
            Some(ts) => self.get(&format!("/nodes/{node}/tasks?since={ts}&limit=50")).await,
            None => self.get(&format!("/nodes/{node}/tasks?limit=50")).await,
        }
    }

    async fn cluster_status(&self) -> Result<Vec<ClusterStatusEntry>> {
        self.get("/cluster/status").await
    }
}

/// Connecteur de production : un `PveClient` par hôte
pub struct PveConnector {
    timeout: Duration,
}

impl PveConnector {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl ApiConnector for PveConnector {
    fn connect(&self, conn: &HostConnection) -> Result<Arc<dyn ManagementApi>> {
        Ok(Arc::new(PveClient::new(conn, self.timeout)?))
    }
}
