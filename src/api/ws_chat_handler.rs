//! WebSocket chat stream: `GET /chat/ws/{session_id}?token=<jwt>`
//!
//! One select loop per connection multiplexes client frames, frames produced
//! by the generation task, and a 30 s ping. Each user message spawns a
//! generation task that writes [`ServerFrame`]s into an mpsc channel; if the
//! client goes away the task still finishes and persists the reply.

use super::handlers::{AppError, SharedState};
use super::ws_auth::{ws_authenticate, WsAuthResult};
use crate::auth::AuthUser;
use crate::chat::proxy::GENERIC_ERROR_MESSAGE;
use crate::chat::types::{ClientFrame, ServerFrame};
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, Query, State,
    },
    http::HeaderMap,
    response::{IntoResponse, Response},
};
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration};
use tracing::{debug, info, warn};
use uuid::Uuid;

const PING_INTERVAL: Duration = Duration::from_secs(30);
const FRAME_BUFFER: usize = 256;

#[derive(Debug, Deserialize)]
pub struct WsChatQuery {
    #[serde(default)]
    pub token: Option<String>,
}

/// Authenticate and check session ownership before upgrading.
pub async fn ws_chat(
    ws: WebSocketUpgrade,
    State(state): State<SharedState>,
    Path(session_id): Path<Uuid>,
    Query(query): Query<WsChatQuery>,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    let claims = match ws_authenticate(
        query.token.as_deref(),
        &headers,
        state.auth_config.as_ref(),
    ) {
        WsAuthResult::Authenticated(claims) => claims,
        WsAuthResult::Missing => {
            return Err(AppError::Unauthorized("Missing access token".to_string()))
        }
        WsAuthResult::Invalid(_) => {
            return Err(AppError::Unauthorized("Invalid or expired token".to_string()))
        }
    };
    let user = AuthUser::from_claims(&claims)?;
    state.proxy.owned_session(user.user_id, session_id).await?;

    Ok(ws
        .on_upgrade(move |socket| handle_ws_chat(socket, state, session_id))
        .into_response())
}

type WsSender = SplitSink<WebSocket, Message>;

/// Serialize and send a frame. Returns false once the client is gone.
async fn send_frame(sender: &mut WsSender, frame: &ServerFrame) -> bool {
    match serde_json::to_string(frame) {
        Ok(json) => sender.send(Message::Text(json.into())).await.is_ok(),
        Err(e) => {
            warn!(error = %e, "Failed to serialize server frame");
            true
        }
    }
}

async fn handle_ws_chat(socket: WebSocket, state: SharedState, session_id: Uuid) {
    info!(session_id = %session_id, "Chat WebSocket connected");
    let (mut ws_sender, mut ws_receiver) = socket.split();
    let (frame_tx, mut frame_rx) = mpsc::channel::<ServerFrame>(FRAME_BUFFER);
    let mut generation: Option<JoinHandle<()>> = None;

    let mut ping_interval = interval(PING_INTERVAL);
    ping_interval.tick().await; // skip first immediate tick

    loop {
        tokio::select! {
            Some(frame) = frame_rx.recv() => {
                if !send_frame(&mut ws_sender, &frame).await {
                    debug!(session_id = %session_id, "Client gone while streaming");
                    break;
                }
            }

            _ = ping_interval.tick() => {
                if ws_sender.send(Message::Ping(Vec::new().into())).await.is_err() {
                    debug!(session_id = %session_id, "Ping failed, client disconnected");
                    break;
                }
            }

            msg = ws_receiver.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        let reply = match serde_json::from_str::<ClientFrame>(text.as_str()) {
                            Ok(ClientFrame::Message { content }) => {
                                let busy = generation.as_ref().is_some_and(|h| !h.is_finished());
                                match start_reply(&state, session_id, content, busy, &frame_tx).await {
                                    Ok(handle) => {
                                        generation = Some(handle);
                                        None
                                    }
                                    Err(frame) => Some(frame),
                                }
                            }
                            Err(e) => {
                                warn!(session_id = %session_id, error = %e, "Unparseable client frame");
                                Some(ServerFrame::error(format!("Invalid message format: {}", e)))
                            }
                        };
                        if let Some(frame) = reply {
                            if !send_frame(&mut ws_sender, &frame).await {
                                break;
                            }
                        }
                    }

                    Some(Ok(Message::Close(_))) | None => {
                        debug!(session_id = %session_id, "Chat WebSocket client disconnected");
                        break;
                    }

                    Some(Err(e)) => {
                        debug!(session_id = %session_id, error = %e, "Chat WebSocket error");
                        break;
                    }

                    // Pong, binary and client pings
                    _ => {}
                }
            }
        }
    }

    info!(session_id = %session_id, "Chat WebSocket connection closed");
}

/// Spawn a generation for `content`, or return the error frame to send instead.
async fn start_reply(
    state: &SharedState,
    session_id: Uuid,
    content: String,
    busy: bool,
    frame_tx: &mpsc::Sender<ServerFrame>,
) -> Result<JoinHandle<()>, ServerFrame> {
    if busy {
        return Err(ServerFrame::error(
            "A reply is still being generated for this session",
        ));
    }
    if content.trim().is_empty() {
        return Err(ServerFrame::error("Message cannot be empty"));
    }

    // Reload so the history window sees the latest message_count
    let session = match state.store.get_chat_session(session_id).await {
        Ok(Some(session)) => session,
        Ok(None) => return Err(ServerFrame::error("Chat session no longer exists")),
        Err(e) => {
            warn!(session_id = %session_id, error = %e, "Failed to load chat session");
            return Err(ServerFrame::error(GENERIC_ERROR_MESSAGE));
        }
    };

    let proxy = state.proxy.clone();
    let tx = frame_tx.clone();
    Ok(tokio::spawn(async move {
        // Failures are already reported to the client as an error frame
        let _ = proxy.stream_reply(&session, &content, tx).await;
    }))
}
