use serde_json::Value;
use std::net::SocketAddr;
use tokio::net::TcpListener;

use vigil_devkit::fixtures::{fast_config, guest, host_conn};
use vigil_devkit::{MockConnector, MockManagementApi, TestHarness};
use vigil_kernel::http::build_router;
use vigil_kernel::models::GuestKind;

async fn serve(h: &TestHarness) -> String {
    let app = build_router(h.pipeline.app_state());
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
            .await
            .ok();
    });
    format!("http://{addr}")
}

async fn get(base: &str, path: &str) -> (u16, Value) {
    let resp = reqwest::get(format!("{base}{path}")).await.unwrap();
    let status = resp.status().as_u16();
    (status, resp.json().await.unwrap())
}

#[tokio::test]
async fn test_read_accessor_envelope() {
    let api = MockManagementApi::new().with_node("pve1", Some("10.0.0.1"));
    api.set_guests("pve1", GuestKind::Vm, vec![guest(101, "web", "running")]);
    api.set_guests("pve1", GuestKind::Container, vec![guest(200, "dns", "stopped")]);
    let connector = MockConnector::new().with_host("pve1", api);
    let mut h = TestHarness::new(fast_config(vec![host_conn("pve1", "10.0.0.1")]), connector);
    h.start().await.unwrap();
    let base = serve(&h).await;

    let (code, body) = get(&base, "/api/nodes").await;
    assert_eq!(code, 200);
    assert_eq!(body["success"], true);
    assert_eq!(body["data"][0]["id"], "pve1");
    assert!(body["timestamp"].is_string());

    let (code, body) = get(&base, "/api/guests/pve1-vm-101").await;
    assert_eq!(code, 200);
    assert_eq!(body["data"]["name"], "web");

    let (code, body) = get(&base, "/api/guests/nope").await;
    assert_eq!(code, 404);
    assert_eq!(body["success"], false);
    assert!(body["error"].as_str().unwrap().contains("nope"));
    assert!(body.get("data").is_none());

    let (_, body) = get(&base, "/api/metrics/pve1-vm-101/history").await;
    assert_eq!(body["data"].as_array().unwrap().len(), 1);

    let (_, body) = get(&base, "/api/metrics/kind/container").await;
    assert_eq!(body["data"].as_array().unwrap().len(), 1);
    let (code, _) = get(&base, "/api/metrics/kind/toaster").await;
    assert_eq!(code, 400);

    let (_, body) = get(&base, "/api/health").await;
    assert_eq!(body["data"]["hosts_tracked"], 1);
    assert_eq!(body["data"]["hosts_online"], 1);
    assert_eq!(body["data"]["guests_tracked"], 2);

    let ok = reqwest::get(format!("{base}/health")).await.unwrap().text().await.unwrap();
    assert_eq!(ok, "ok");
    h.shutdown().await;
}
