//! Persistent session protocol over WebSocket at `/api/radio/ws`.
//!
//! One flume channel per connection carries serialized broadcast frames from
//! the session into the socket; incoming frames are dispatched through the
//! typed [`IncomingMessage`] enum. Malformed frames are logged and ignored.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use tracing::{info, warn};

use crate::common::ListenerId;
use crate::protocol::messages::{IncomingMessage, OutgoingMessage};
use crate::transport::AppState;

pub async fn websocket_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(mut socket: WebSocket, state: Arc<AppState>) {
    let (tx, rx) = flume::unbounded::<String>();
    let mut listener_id: Option<ListenerId> = None;

    loop {
        tokio::select! {
            Ok(json) = rx.recv_async() => {
                if let Err(e) = socket.send(Message::Text(json.into())).await {
                    warn!("Socket send error: listener={:?} err={}", listener_id, e);
                    break;
                }
            }
            msg = socket.recv() => {
                let msg = match msg {
                    Some(Ok(msg)) => msg,
                    Some(Err(e)) => {
                        warn!("WebSocket error: listener={:?} err={}", listener_id, e);
                        break;
                    }
                    None => break,
                };

                match msg {
                    Message::Text(text) => {
                        match serde_json::from_str::<IncomingMessage>(&text) {
                            Ok(incoming) => {
                                handle_message(incoming, &state, &mut listener_id, &tx);
                            }
                            Err(e) => {
                                warn!("Bad WS frame: listener={:?} err={}", listener_id, e);
                            }
                        }
                    }
                    Message::Close(_) => break,
                    _ => {}
                }
            }
        }
    }

    if let Some(id) = listener_id {
        info!("WebSocket closed: listener={}", id);
        state.manager.leave(&id);
    }
}

fn reply(tx: &flume::Sender<String>, msg: &OutgoingMessage) {
    if let Ok(json) = serde_json::to_string(msg) {
        let _ = tx.send(json);
    }
}

fn handle_message(
    incoming: IncomingMessage,
    state: &Arc<AppState>,
    listener_id: &mut Option<ListenerId>,
    tx: &flume::Sender<String>,
) {
    let manager = &state.manager;
    match incoming {
        IncomingMessage::Join { name } => {
            // One listener identity per socket; a repeated join echoes the
            // existing id instead of registering a second roster entry.
            if let Some(id) = listener_id {
                reply(
                    tx,
                    &OutgoingMessage::Joined {
                        listener_id: id.clone(),
                    },
                );
                return;
            }
            let id = manager.join(name.as_deref().unwrap_or("Anonymous"), tx.clone());
            reply(
                tx,
                &OutgoingMessage::Joined {
                    listener_id: id.clone(),
                },
            );
            *listener_id = Some(id);
        }
        IncomingMessage::SkipVote => {
            if let Some(id) = listener_id {
                let (voted, skipped) = manager.vote_skip(id);
                reply(tx, &OutgoingMessage::SkipVoteResult { voted, skipped });
            }
        }
        IncomingMessage::OwnerSkip => {
            if let Some(id) = listener_id {
                let success = manager.owner_skip(id);
                reply(tx, &OutgoingMessage::OwnerSkipResult { success });
            }
        }
        IncomingMessage::ClaimOwner { secret } => {
            if let Some(id) = listener_id {
                let success = manager.claim_owner(id, &secret);
                reply(
                    tx,
                    &OutgoingMessage::ClaimOwnerResult {
                        success,
                        is_owner: success,
                    },
                );
            }
        }
        IncomingMessage::UpdateSettings { settings } => {
            let authorized = listener_id.as_ref().is_some_and(|id| manager.is_owner(id));
            if authorized {
                manager.update_settings(settings);
                reply(
                    tx,
                    &OutgoingMessage::UpdateSettingsResult {
                        success: true,
                        error: None,
                    },
                );
            } else {
                reply(
                    tx,
                    &OutgoingMessage::UpdateSettingsResult {
                        success: false,
                        error: Some("Not authorized".to_string()),
                    },
                );
            }
        }
        IncomingMessage::GetState => {
            reply(tx, &OutgoingMessage::State(manager.get_public_state()));
        }
        IncomingMessage::ChatMessage { message } => {
            if let Some(id) = listener_id {
                manager.broadcast_chat(id, &message);
            }
        }
        IncomingMessage::RequeueSong { song_id } => {
            if let Some(id) = listener_id {
                let success = manager.requeue_from_history(&song_id.clone().into(), id);
                reply(tx, &OutgoingMessage::RequeueResult { success, song_id });
            }
        }
        IncomingMessage::DjStyleVote { style } => {
            if let Some(id) = listener_id {
                let voted = manager.vote_dj_style(id, style);
                reply(tx, &OutgoingMessage::DjStyleVoteResult { voted, style });
            }
        }
    }
}
