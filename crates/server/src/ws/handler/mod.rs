mod chat;
mod lifecycle;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        Query, State, WebSocketUpgrade,
    },
    response::IntoResponse,
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{interval_at, Instant};

use crate::error::{AppError, AppResult};
use crate::models::AuthUser;
use crate::ws::events::{ClientEvent, ServerEvent};
use crate::ws::gateway::ClientId;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct GatewayQuery {
    pub token: Option<String>,
}

/// WebSocket upgrade handler. The token is checked once, before upgrading.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Query(query): Query<GatewayQuery>,
) -> AppResult<impl IntoResponse> {
    let token = query
        .token
        .filter(|t| !t.is_empty())
        .ok_or(AppError::Unauthorized)?;
    let user_id = state.tokens.validate(&token)?;

    if !state.users().is_active(&user_id).await? {
        return Err(AppError::Unauthorized);
    }

    let user = AuthUser { id: user_id };
    Ok(ws.on_upgrade(move |socket| handle_socket(socket, state, user)))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>, user: AuthUser) {
    let client_id = state.gateway.next_client_id();
    let (mut ws_tx, mut ws_rx) = socket.split();

    let (tx, mut rx) = mpsc::channel::<String>(state.config.ws_send_queue);
    state.gateway.register(client_id, user.id.clone(), tx);
    lifecycle::handle_connect(&state, client_id, &user);

    let ping_every = Duration::from_secs(state.config.ws_ping_interval_secs);

    // Outbound pump: queued frames plus periodic liveness pings
    let mut send_task = tokio::spawn(async move {
        let mut heartbeat = interval_at(Instant::now() + ping_every, ping_every);
        loop {
            tokio::select! {
                frame = rx.recv() => {
                    // None: the hub dropped this client
                    let Some(text) = frame else { break };
                    if ws_tx.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                _ = heartbeat.tick() => {
                    if ws_tx.send(Message::Ping(Default::default())).await.is_err() {
                        break;
                    }
                }
            }
        }
        let _ = ws_tx.close().await;
    });

    // Inbound pump
    let state_clone = state.clone();
    let user_clone = user.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = ws_rx.next().await {
            match msg {
                Message::Text(text) => {
                    let text_str: &str = &text;
                    match serde_json::from_str::<ClientEvent>(text_str) {
                        Ok(event) => {
                            handle_client_event(&state_clone, client_id, &user_clone, event).await
                        }
                        Err(e) => state_clone.gateway.send_to(
                            client_id,
                            &ServerEvent::Error {
                                message: format!("Invalid event: {e}"),
                            },
                        ),
                    }
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    lifecycle::handle_disconnect(&state, client_id, &user).await;
}

async fn handle_client_event(
    state: &AppState,
    client_id: ClientId,
    user: &AuthUser,
    event: ClientEvent,
) {
    let result = match event {
        ClientEvent::NewMessage {
            conversation_id,
            content,
            message_type,
            reply_to_id,
            media,
        } => {
            chat::handle_new_message(
                state,
                user,
                conversation_id,
                content,
                message_type,
                reply_to_id,
                media,
            )
            .await
        }
        ClientEvent::MessageUpdated {
            message_id,
            content,
        } => chat::handle_edit_message(state, user, message_id, content).await,
        ClientEvent::MessageDeleted { message_id } => {
            chat::handle_delete_message(state, user, message_id).await
        }
        ClientEvent::MessageRead { conversation_id } => {
            chat::handle_mark_read(state, user, conversation_id).await
        }
        ClientEvent::TypingStart { conversation_id } => {
            chat::handle_typing(state, client_id, user, conversation_id, true).await
        }
        ClientEvent::TypingStop { conversation_id } => {
            chat::handle_typing(state, client_id, user, conversation_id, false).await
        }
        ClientEvent::Ping => {
            state.gateway.send_to(client_id, &ServerEvent::Pong);
            Ok(())
        }
    };

    if let Err(e) = result {
        if e.status_code().is_server_error() {
            tracing::error!(user_id = %user.id, error = %e, "Live event failed");
        }
        state.gateway.send_to(
            client_id,
            &ServerEvent::Error {
                message: e.public_message(),
            },
        );
    }
}
