/**
 * API LECTURE VIGIL - Accès HTTP à l'inventaire et aux métriques
 *
 * RÔLE : Expose en lecture seule l'état du pipeline (hôtes, invités,
 * métriques courantes, historique) et le point d'upgrade WebSocket.
 *
 * FONCTIONNEMENT :
 * - toutes les réponses utilisent l'enveloppe {success, data, error, timestamp}
 * - identifiant inconnu → 404 avec success=false
 * - /ws délègue au hub temps réel (throttling avant upgrade)
 */

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use std::sync::Arc;
use time::OffsetDateTime;

use crate::health::{HealthTracker, PipelineHealth};
use crate::metrics::{EntityKind, MetricSample, StoredSample};
use crate::models::{GuestSnapshot, HostSnapshot};
use crate::realtime::{ws_handler, RealtimeHub};
use crate::reconciler::InventoryReconciler;

#[derive(Clone)]
pub struct AppState {
    pub reconciler: InventoryReconciler,
    pub hub: Arc<RealtimeHub>,
    pub health_tracker: HealthTracker,
}

#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
}

type Reply<T> = (StatusCode, Json<ApiResponse<T>>);

fn ok<T: Serialize>(data: T) -> Reply<T> {
    (
        StatusCode::OK,
        Json(ApiResponse { success: true, data: Some(data), error: None, timestamp: OffsetDateTime::now_utc() }),
    )
}

fn fail<T: Serialize>(code: StatusCode, error: impl Into<String>) -> Reply<T> {
    (
        code,
        Json(ApiResponse { success: false, data: None, error: Some(error.into()), timestamp: OffsetDateTime::now_utc() }),
    )
}

fn found<T: Serialize>(value: Option<T>, what: &str, id: &str) -> Reply<T> {
    match value {
        Some(v) => ok(v),
        None => fail(StatusCode::NOT_FOUND, format!("{what} not found: {id}")),
    }
}

pub fn build_router(app_state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/api/health", get(get_health))
        .route("/api/nodes", get(get_nodes))
        .route("/api/nodes/{id}", get(get_node))
        .route("/api/guests", get(get_guests))
        .route("/api/guests/{id}", get(get_guest))
        .route("/api/metrics", get(get_metrics))
        .route("/api/metrics/kind/{kind}", get(get_metrics_by_kind))
        .route("/api/metrics/{id}", get(get_metric))
        .route("/api/metrics/{id}/history", get(get_history))
        .route("/ws", get(ws_handler))
        .with_state(app_state)
}

// GET /api/health
async fn get_health(State(app): State<AppState>) -> Reply<PipelineHealth> {
    ok(app.health_tracker.get_health(&app.reconciler, &app.hub))
}

// GET /api/nodes
async fn get_nodes(State(app): State<AppState>) -> Reply<Vec<HostSnapshot>> {
    ok(app.reconciler.hosts())
}

// GET /api/nodes/{id}
async fn get_node(State(app): State<AppState>, Path(id): Path<String>) -> Reply<HostSnapshot> {
    found(app.reconciler.host(&id), "node", &id)
}

// GET /api/guests
async fn get_guests(State(app): State<AppState>) -> Reply<Vec<GuestSnapshot>> {
    ok(app.reconciler.guests())
}

// GET /api/guests/{id}
async fn get_guest(State(app): State<AppState>, Path(id): Path<String>) -> Reply<GuestSnapshot> {
    found(app.reconciler.guest(&id), "guest", &id)
}

// GET /api/metrics
async fn get_metrics(State(app): State<AppState>) -> Reply<Vec<MetricSample>> {
    ok(app.reconciler.normalizer().all_current())
}

// GET /api/metrics/{id}
async fn get_metric(State(app): State<AppState>, Path(id): Path<String>) -> Reply<MetricSample> {
    found(app.reconciler.normalizer().current_metrics(&id), "metrics", &id)
}

// GET /api/metrics/{id}/history
async fn get_history(State(app): State<AppState>, Path(id): Path<String>) -> Reply<Vec<StoredSample>> {
    let normalizer = app.reconciler.normalizer();
    if normalizer.current_metrics(&id).is_none() {
        return fail(StatusCode::NOT_FOUND, format!("metrics not found: {id}"));
    }
    ok(normalizer.history(&id))
}

// GET /api/metrics/kind/{kind} (host | vm | container)
async fn get_metrics_by_kind(
    State(app): State<AppState>,
    Path(kind): Path<String>,
) -> Reply<Vec<MetricSample>> {
    match EntityKind::parse(&kind) {
        Some(k) => ok(app.reconciler.normalizer().current_by_kind(k)),
        None => fail(StatusCode::BAD_REQUEST, format!("unknown entity kind: {kind}")),
    }
}
