use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{ConnectInfo, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use futures::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::debug;

use super::hub::RealtimeHub;
use crate::http::AppState;

// GET /ws (upgrade ; une adresse trop insistante reçoit 429 sans toucher au hub)
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    State(app): State<AppState>,
) -> Response {
    if let Err(e) = app.hub.admit(addr.ip()) {
        return (StatusCode::TOO_MANY_REQUESTS, e.to_string()).into_response();
    }
    let hub = app.hub.clone();
    ws.on_upgrade(move |socket| serve_socket(hub, socket, addr))
}

async fn serve_socket(hub: Arc<RealtimeHub>, socket: WebSocket, addr: SocketAddr) {
    let (id, mut outbox) = hub.connect(addr);
    let (mut sink, mut stream) = socket.split();

    let writer = tokio::spawn(async move {
        while let Some(text) = outbox.recv().await {
            if sink.send(Message::Text((&*text).into())).await.is_err() {
                break;
            }
        }
    });

    while let Some(msg) = stream.next().await {
        match msg {
            Ok(Message::Text(text)) => hub.handle_text(&id, text.as_str()),
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                debug!(client = %id, error = %e, "socket error");
                break;
            }
        }
    }

    writer.abort();
    hub.disconnect(&id);
}
