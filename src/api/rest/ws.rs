use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use futures::SinkExt;
use futures::StreamExt;
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{info, warn};
use uuid::Uuid;

use crate::api::rest::auth::actor_from_headers;
use crate::error::AppError;
use crate::fanout::{EmitError, Emitter, Envelope, Subscriber};
use crate::models::actor::{Actor, Role};
use crate::state::AppState;

/// Browsers cannot set headers on the upgrade request, so identity may also
/// come as query parameters.
#[derive(Deserialize)]
pub struct WsQuery {
    pub user_id: Option<Uuid>,
    pub role: Option<Role>,
}

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<WsQuery>,
) -> Result<impl IntoResponse, AppError> {
    let actor = match (actor_from_headers(&headers), query.user_id) {
        (Ok(actor), _) => actor,
        (Err(_), Some(user_id)) => Actor {
            id: user_id,
            role: query.role.unwrap_or(Role::Customer),
        },
        (Err(err), None) => return Err(err),
    };

    Ok(ws.on_upgrade(move |socket| handle_socket(socket, state, actor)))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>, actor: Actor) {
    let (mut sender, mut receiver) = socket.split();
    let (tx, rx) = mpsc::unbounded_channel::<Envelope>();

    let emitter: Emitter = Arc::new(move |envelope: &Envelope| -> Result<(), EmitError> {
        tx.send(envelope.clone())
            .map_err(|_| EmitError("connection closed".to_string()))
    });
    let subscriber = Subscriber {
        user_id: actor.id,
        role: actor.role,
    };
    let connection_id = state
        .bus
        .register_client(Uuid::new_v4().to_string(), subscriber, emitter);

    info!(connection_id = %connection_id, user_id = %actor.id, "websocket client connected");

    let send_task = tokio::spawn(async move {
        let mut events = UnboundedReceiverStream::new(rx);
        while let Some(envelope) = events.next().await {
            let json = match serde_json::to_string(&envelope) {
                Ok(json) => json,
                Err(err) => {
                    warn!(error = %err, "failed to serialize event for ws");
                    continue;
                }
            };

            if sender.send(Message::Text(json)).await.is_err() {
                break;
            }
        }
    });

    let recv_task = tokio::spawn(async move {
        while let Some(Ok(message)) = receiver.next().await {
            if let Message::Close(_) = message {
                break;
            }
        }
    });

    tokio::select! {
        _ = send_task => {},
        _ = recv_task => {},
    }

    state.bus.unregister_client(&connection_id);
    info!(connection_id = %connection_id, "websocket client disconnected");
}
