//! WebSocket transport for remote signer clients.

use std::sync::Arc;

use axum::{
    extract::{
        State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    response::IntoResponse,
};
use futures::{SinkExt, StreamExt};
use hw_signer_core::{FeatureGate, PreferenceStore};
use hw_signer_session::SessionManager;
use tokio::sync::mpsc;

use crate::{
    dispatch::dispatch,
    protocol::{ClientMessage, ServerMessage},
};

/// WebSocket handler state.
pub struct WsState<P, G>
where
    P: PreferenceStore,
    G: FeatureGate,
{
    /// Shared session manager.
    pub manager: Arc<SessionManager<P, G>>,
}

impl<P, G> Clone for WsState<P, G>
where
    P: PreferenceStore,
    G: FeatureGate,
{
    fn clone(&self) -> Self {
        Self {
            manager: Arc::clone(&self.manager),
        }
    }
}

impl<P, G> WsState<P, G>
where
    P: PreferenceStore,
    G: FeatureGate,
{
    /// Create new WebSocket state.
    #[must_use]
    pub fn new(manager: Arc<SessionManager<P, G>>) -> Self {
        Self { manager }
    }
}

/// WebSocket upgrade handler.
///
/// Use this as an Axum route handler.
pub async fn ws_handler<P, G>(
    ws: WebSocketUpgrade,
    State(state): State<WsState<P, G>>,
) -> impl IntoResponse
where
    P: PreferenceStore + 'static,
    G: FeatureGate + 'static,
{
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

async fn handle_socket<P, G>(socket: WebSocket, state: WsState<P, G>)
where
    P: PreferenceStore + 'static,
    G: FeatureGate + 'static,
{
    let (mut sender, mut receiver) = socket.split();

    // Channel for sending messages to the client
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerMessage>();

    // Spawn task to forward messages to WebSocket
    let send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let json = match serde_json::to_string(&msg) {
                Ok(j) => j,
                Err(e) => {
                    tracing::error!("Failed to serialize message: {e}");
                    continue;
                }
            };
            if sender.send(Message::Text(json.into())).await.is_err() {
                break;
            }
        }
    });

    // Replay event history, then follow live events
    let mut events = state.manager.events().history_plus_stream();
    let event_tx = tx.clone();
    let event_task = tokio::spawn(async move {
        while let Some(event) = events.next().await {
            if event_tx.send(ServerMessage::Event { event }).is_err() {
                break;
            }
        }
    });

    // Handle incoming messages
    while let Some(msg) = receiver.next().await {
        let msg = match msg {
            Ok(Message::Text(text)) => text.as_str().to_owned(),
            Ok(Message::Binary(data)) => match String::from_utf8(data.to_vec()) {
                Ok(s) => s,
                Err(_) => continue,
            },
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                tracing::error!("WebSocket error: {e}");
                break;
            }
        };

        let client_msg: ClientMessage = match serde_json::from_str(&msg) {
            Ok(m) => m,
            Err(e) => {
                tracing::warn!("Invalid client message: {e}");
                let _ = tx.send(ServerMessage::error(
                    "invalid_message",
                    format!("Invalid message: {e}"),
                ));
                continue;
            }
        };

        let reply = dispatch(&state.manager, client_msg).await;
        if tx.send(reply).is_err() {
            break;
        }
    }

    event_task.abort();
    send_task.abort();
}

/// Create WebSocket router.
///
/// # Example
/// ```ignore
/// let app = Router::new()
///     .merge(create_ws_router(Arc::new(manager)));
/// ```
#[must_use]
pub fn create_ws_router<P, G>(manager: Arc<SessionManager<P, G>>) -> axum::Router
where
    P: PreferenceStore + 'static,
    G: FeatureGate + 'static,
{
    axum::Router::new()
        .route("/ws", axum::routing::get(ws_handler::<P, G>))
        .with_state(WsState::new(manager))
}
