/**
 * VIGIL KERNEL - Point d'entrée du serveur de supervision
 *
 * RÔLE : Orchestration : config, pipeline (pollers, réconciliateur,
 * normaliseur, hub temps réel), HTTP et arrêt propre sur Ctrl-C.
 *
 * ARCHITECTURE : un bus d'événements typé relie le réconciliateur aux
 * consommateurs (hub WebSocket, alerting externe).
 */

use anyhow::Context;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use vigil_kernel::api::PveConnector;
use vigil_kernel::config::load_config;
use vigil_kernel::{http, Pipeline};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Charger les variables d'environnement depuis .env (si présent)
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("vigil_kernel=info")),
        )
        .init();

    let cfg = load_config().await;
    if cfg.hosts.is_empty() {
        warn!("no host configured, the pipeline will stay idle");
    }
    let listen = cfg.listen.clone();
    let connector = Arc::new(PveConnector::new(cfg.polling.request_timeout()));

    // bus + réconciliateur + hub
    let mut pipeline = Pipeline::new(cfg, connector);
    pipeline.start().await.context("pipeline start")?;

    let app = http::build_router(pipeline.app_state());
    let reconciler = pipeline.reconciler.clone();
    let listener = TcpListener::bind(&listen)
        .await
        .with_context(|| format!("cannot bind {listen}"))?;
    info!("listening on http://{listen}");

    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "cannot listen for Ctrl-C");
            }
            info!("shutdown requested");
            reconciler.shutdown();
        })
        .await
        .context("http server")?;

    pipeline.shutdown();
    info!("kernel stopped");
    Ok(())
}
