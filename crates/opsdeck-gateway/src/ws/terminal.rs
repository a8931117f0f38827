//! Websocket viewer transport for terminal sessions.
//!
//! One connection maps to one viewer on one session. The connection's
//! route decides the session kind and parameters; the session registry
//! resolves or creates the session; output chunks flow out as binary
//! frames while inbound JSON frames carry input, resize, restart, and
//! heartbeat. Malformed inbound frames are silently ignored -- the
//! connection stays open.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt};
use opsdeck_core::config::{MAX_PAYLOAD_BYTES, VIEWER_QUEUE_DEPTH};
use opsdeck_terminal::{PtySession, ViewerHandle, SYSTEM_KIND};
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::app::AppState;

/// Axum handler -- GET /ws/shell/system, the built-in host shell.
pub async fn system_shell_handler(
    upgrade: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    upgrade.on_upgrade(|socket| run_viewer(socket, state, SYSTEM_KIND.to_string(), BTreeMap::new()))
}

/// Upgrade for a module-declared shell route; path captures become the
/// session parameters.
pub fn shell_upgrade(
    upgrade: WebSocketUpgrade,
    state: Arc<AppState>,
    kind: String,
    params: HashMap<String, String>,
) -> axum::response::Response {
    upgrade.on_upgrade(move |socket| {
        run_viewer(socket, state, kind, params.into_iter().collect())
    })
}

/// Messages a viewer may send. One field per frame; an unrecognized shape
/// deserializes to all-None and is ignored.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ClientMsg {
    input: Option<String>,
    resize: Option<ResizeMsg>,
    restart: Option<bool>,
    heartbeat: Option<bool>,
}

#[derive(Debug, serde::Deserialize)]
struct ResizeMsg {
    rows: u16,
    cols: u16,
}

/// Per-connection event loop -- lives for the entire WS session.
async fn run_viewer(
    mut socket: WebSocket,
    state: Arc<AppState>,
    kind: String,
    params: BTreeMap<String, String>,
) {
    let conn_id = uuid::Uuid::new_v4().to_string();

    let Some(session) = state.sessions.get_or_create(&kind, &params).await else {
        info!(conn_id, kind, "session unavailable -- closing connection");
        let _ = socket.send(Message::Close(None)).await;
        return;
    };

    info!(conn_id = %conn_id, key = %session.key(), "viewer connected");
    state
        .ws_clients
        .insert(conn_id.clone(), session.key().to_string());

    let (chunk_tx, mut chunk_rx) = mpsc::channel::<Vec<u8>>(VIEWER_QUEUE_DEPTH);
    session.register_viewer(ViewerHandle::new(conn_id.clone(), chunk_tx));

    let (mut tx, mut rx) = socket.split();

    loop {
        tokio::select! {
            chunk = chunk_rx.recv() => {
                match chunk {
                    Some(bytes) => {
                        if tx.send(Message::Binary(bytes.into())).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }

            msg = rx.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        if text.len() > MAX_PAYLOAD_BYTES {
                            warn!(conn_id, size = text.len(), "payload too large -- ignored");
                            continue;
                        }
                        handle_client_frame(&text, &session, &state);
                    }
                    Some(Ok(Message::Ping(data))) => {
                        let _ = tx.send(Message::Pong(data)).await;
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(_)) => break,
                    _ => {}
                }
            }
        }
    }

    // Disconnecting detaches the viewer only; the session (and its
    // process) lives on for the next connection.
    session.unregister_viewer(&conn_id);
    state.ws_clients.remove(&conn_id);
    info!(conn_id, "viewer disconnected");
}

/// Apply one inbound frame.
fn handle_client_frame(text: &str, session: &Arc<PtySession>, state: &Arc<AppState>) {
    let Ok(msg) = serde_json::from_str::<ClientMsg>(text) else {
        return;
    };
    if let Some(input) = msg.input {
        session.send_input(input.as_bytes());
    } else if let Some(resize) = msg.resize {
        session.resize(resize.rows, resize.cols);
    } else if msg.restart == Some(true) {
        // Fire-and-forget: the restart marker in the output stream is the
        // viewer's confirmation.
        state.sessions.restart(session.key());
    } else if msg.heartbeat.is_some() {
        // keep-alive only
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn input_frame_parses() {
        let msg: ClientMsg = serde_json::from_str(r#"{"input": "ls\n"}"#).unwrap();
        assert_eq!(msg.input.as_deref(), Some("ls\n"));
        assert!(msg.resize.is_none());
    }

    #[test]
    fn resize_frame_parses() {
        let msg: ClientMsg =
            serde_json::from_str(r#"{"resize": {"rows": 40, "cols": 120}}"#).unwrap();
        let resize = msg.resize.unwrap();
        assert_eq!((resize.rows, resize.cols), (40, 120));
    }

    #[test]
    fn restart_and_heartbeat_frames_parse() {
        let msg: ClientMsg = serde_json::from_str(r#"{"restart": true}"#).unwrap();
        assert_eq!(msg.restart, Some(true));

        let msg: ClientMsg = serde_json::from_str(r#"{"heartbeat": true}"#).unwrap();
        assert_eq!(msg.heartbeat, Some(true));
    }

    #[test]
    fn unknown_shape_parses_to_noop() {
        // Unknown fields deserialize to all-None; the frame is ignored
        // without dropping the connection.
        let msg: ClientMsg = serde_json::from_str(r#"{"telemetry": [1, 2, 3]}"#).unwrap();
        assert!(msg.input.is_none());
        assert!(msg.resize.is_none());
        assert!(msg.restart.is_none());
        assert!(msg.heartbeat.is_none());
    }

    #[test]
    fn non_json_is_an_error_for_the_caller_to_swallow() {
        assert!(serde_json::from_str::<ClientMsg>("definitely not json").is_err());
    }
}
