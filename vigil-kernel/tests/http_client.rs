use axum::extract::Path;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::get;
use axum::{Json, Router};
use serde_json::{json, Value};
use std::time::Duration;
use tokio::net::TcpListener;

use vigil_kernel::api::{ManagementApi, PveClient};
use vigil_kernel::config::HostConnection;
use vigil_kernel::error::KernelError;
use vigil_kernel::models::GuestKind;

const TOKEN: &str = "PVEAPIToken=root@pam!vigil=s3cret";

fn authorized(headers: &HeaderMap) -> bool {
    headers.get("authorization").and_then(|v| v.to_str().ok()) == Some(TOKEN)
}

async fn stub_server() -> String {
    let app = Router::new()
        .route(
            "/api2/json/nodes",
            get(|headers: HeaderMap| async move {
                if !authorized(&headers) {
                    return Err(StatusCode::UNAUTHORIZED);
                }
                Ok(Json(json!({"data": [{"node": "pve1", "status": "online", "ip": "10.0.0.1"}]})))
            }),
        )
        .route(
            "/api2/json/nodes/{node}/status",
            get(|Path(node): Path<String>| async move {
                if node != "pve1" {
                    return Err(StatusCode::INTERNAL_SERVER_ERROR);
                }
                Ok(Json(json!({"data": {
                    "cpu": 0.25,
                    "memory": {"total": 1000, "used": 250, "free": 750},
                    "loadavg": ["0.10", "0.20", "0.30"],
                    "uptime": 42
                }})))
            }),
        )
        .route(
            "/api2/json/nodes/{node}/qemu",
            get(|| async { Json(json!({"data": [{"vmid": 101, "name": "web", "status": "running"}]})) }),
        )
        .route(
            "/api2/json/nodes/{node}/tasks",
            get(|| async {
                Json(json!({"data": [{"upid": "UPID:pve1:1", "type": "qmstart", "id": "101", "starttime": 100}]}))
            }),
        )
        .route("/api2/json/cluster/status", get(|| async { Json(Value::from("not a list")) }));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.ok();
    });
    format!("http://{addr}")
}

fn client(base: &str, secret: &str) -> PveClient {
    let conn = HostConnection {
        id: "pve1".into(),
        name: None,
        base_url: base.to_string(),
        token_id: "root@pam!vigil".into(),
        token_secret: secret.into(),
        verify_tls: true,
    };
    PveClient::new(&conn, Duration::from_secs(5)).unwrap()
}

#[tokio::test]
async fn test_client_decodes_envelopes() {
    let base = stub_server().await;
    let api = client(&base, "s3cret");

    let nodes = api.list_nodes().await.unwrap();
    assert_eq!(nodes[0].node, "pve1");
    assert_eq!(nodes[0].ip.as_deref(), Some("10.0.0.1"));

    let status = api.node_status("pve1").await.unwrap();
    assert_eq!(status.memory.used, 250);
    assert_eq!(status.loadavg, [0.1, 0.2, 0.3]);

    let vms = api.list_guests("pve1", GuestKind::Vm).await.unwrap();
    assert_eq!(vms[0].vmid, 101);

    let tasks = api.tasks("pve1", Some(50)).await.unwrap();
    assert_eq!(tasks[0].guest_vmid(), Some(101));
}

#[tokio::test]
async fn test_client_maps_failures() {
    let base = stub_server().await;

    let bad_token = client(&base, "wrong");
    match bad_token.list_nodes().await {
        Err(KernelError::Status { status, .. }) => assert_eq!(status, 401),
        other => panic!("expected HTTP 401, got {other:?}"),
    }

    let api = client(&base, "s3cret");
    match api.node_status("ghost").await {
        Err(KernelError::Status { status, path }) => {
            assert_eq!(status, 500);
            assert_eq!(path, "/nodes/ghost/status");
        }
        other => panic!("expected HTTP 500, got {other:?}"),
    }
    assert!(matches!(api.cluster_status().await, Err(KernelError::Decode(_))));

    let unreachable = client("http://127.0.0.1:1", "s3cret");
    assert!(matches!(unreachable.list_nodes().await, Err(KernelError::Transport(_))));
}
