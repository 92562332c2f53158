//! Streaming chat session client.
//!
//! Loads the transcript over REST, opens the WebSocket stream and folds
//! every server frame into a shared [`SessionState`]. Observers subscribe to
//! [`SessionUpdate`] events. A dropped connection is final: callers create a
//! new client to reconnect.

use super::api::{ApiClient, ClientError, Result};
use super::state::{SendRejection, SessionState};
use crate::chat::types::{ChatMessage, ClientFrame, ServerFrame};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::{broadcast, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::{self, Message as WsMessage};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};
use uuid::Uuid;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsWriter = SplitSink<WsStream, WsMessage>;

const UPDATE_BUFFER: usize = 256;

/// Change notifications for observers of a session
#[derive(Debug, Clone, PartialEq)]
pub enum SessionUpdate {
    /// A server frame was applied to the state
    Frame(ServerFrame),
    /// A local message was sent
    Sent(ChatMessage),
    /// The stream closed, with the reason if it was not a clean close
    Disconnected(Option<String>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    Sent,
    RejectedEmpty,
    NotConnected,
}

pub struct ChatSessionClient {
    session_id: Uuid,
    state: Arc<RwLock<SessionState>>,
    writer: Mutex<WsWriter>,
    updates: broadcast::Sender<SessionUpdate>,
    reader: JoinHandle<()>,
}

impl ChatSessionClient {
    /// Load the history, then open the stream.
    ///
    /// A rejected handshake is retried once after a token refresh.
    pub async fn connect(api: &ApiClient, session_id: Uuid) -> Result<Self> {
        let mut state = SessionState::new();
        state.load_history(api.load_transcript(session_id).await?);

        let stream = match Self::open_stream(api, session_id).await {
            Err(ClientError::WebSocket(e)) if is_unauthorized(&e) => {
                let stale = api.credentials().await.map(|c| c.access_token);
                api.refresh_after_rejection(stale.as_deref()).await?;
                match Self::open_stream(api, session_id).await {
                    Err(ClientError::WebSocket(e)) if is_unauthorized(&e) => {
                        warn!(
                            session_id = %session_id,
                            "Stream rejected after refresh, logging out"
                        );
                        api.clear_credentials().await;
                        return Err(ClientError::SessionExpired);
                    }
                    other => other?,
                }
            }
            other => other?,
        };
        state.mark_open();
        info!(session_id = %session_id, "Chat stream connected");

        let (writer, reader) = stream.split();
        let state = Arc::new(RwLock::new(state));
        let (updates, _) = broadcast::channel(UPDATE_BUFFER);
        let reader = tokio::spawn(read_frames(
            session_id,
            reader,
            state.clone(),
            updates.clone(),
        ));

        Ok(Self {
            session_id,
            state,
            writer: Mutex::new(writer),
            updates,
            reader,
        })
    }

    async fn open_stream(api: &ApiClient, session_id: Uuid) -> Result<WsStream> {
        let url = api.ws_url(session_id).await?;
        let (stream, _) = connect_async(url.as_str()).await?;
        Ok(stream)
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionUpdate> {
        self.updates.subscribe()
    }

    pub async fn messages(&self) -> Vec<ChatMessage> {
        self.state.read().await.messages().to_vec()
    }

    pub async fn is_connected(&self) -> bool {
        self.state.read().await.is_connected()
    }

    pub async fn is_loading(&self) -> bool {
        self.state.read().await.is_loading()
    }

    pub async fn last_error(&self) -> Option<String> {
        self.state.read().await.last_error().map(str::to_string)
    }

    /// Append the message locally and send it over the stream.
    ///
    /// Empty text and sends on a closed stream are refused without touching
    /// the state.
    pub async fn send_message(&self, text: &str) -> Result<SendOutcome> {
        let message = {
            let mut state = self.state.write().await;
            match state.begin_send(text) {
                Ok(message) => message.clone(),
                Err(SendRejection::Empty) => return Ok(SendOutcome::RejectedEmpty),
                Err(SendRejection::NotConnected) => return Ok(SendOutcome::NotConnected),
            }
        };

        let frame = ClientFrame::Message {
            content: message.content.clone(),
        };
        let json = serde_json::to_string(&frame)?;
        if let Err(e) = self.writer.lock().await.send(WsMessage::Text(json.into())).await {
            warn!(session_id = %self.session_id, "Failed to send chat message: {}", e);
            self.state
                .write()
                .await
                .connection_lost(Some(format!("Connection lost: {}", e)));
            let _ = self
                .updates
                .send(SessionUpdate::Disconnected(Some(e.to_string())));
            return Err(e.into());
        }

        let _ = self.updates.send(SessionUpdate::Sent(message));
        Ok(SendOutcome::Sent)
    }

    /// Close the stream. A reply still being generated is persisted server-side.
    pub async fn disconnect(&self) {
        if let Err(e) = self.writer.lock().await.send(WsMessage::Close(None)).await {
            debug!("Close frame not sent: {}", e);
        }
        self.reader.abort();
        self.state.write().await.connection_lost(None);
        let _ = self.updates.send(SessionUpdate::Disconnected(None));
    }
}

impl Drop for ChatSessionClient {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

fn is_unauthorized(e: &tungstenite::Error) -> bool {
    matches!(e, tungstenite::Error::Http(response) if response.status() == 401)
}

async fn read_frames(
    session_id: Uuid,
    mut reader: SplitStream<WsStream>,
    state: Arc<RwLock<SessionState>>,
    updates: broadcast::Sender<SessionUpdate>,
) {
    let mut reason = None;

    while let Some(msg) = reader.next().await {
        let text = match msg {
            Ok(WsMessage::Text(text)) => text,
            Ok(WsMessage::Close(frame)) => {
                debug!(session_id = %session_id, ?frame, "Server closed chat stream");
                break;
            }
            Ok(_) => continue,
            Err(e) => {
                warn!(session_id = %session_id, "Chat stream error: {}", e);
                reason = Some(format!("Connection lost: {}", e));
                break;
            }
        };

        let frame: ServerFrame = match serde_json::from_str(text.as_str()) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(session_id = %session_id, "Ignoring malformed frame: {}", e);
                continue;
            }
        };
        state.write().await.apply_frame(&frame);
        let _ = updates.send(SessionUpdate::Frame(frame));
    }

    state.write().await.connection_lost(reason.clone());
    let _ = updates.send(SessionUpdate::Disconnected(reason));
    info!(session_id = %session_id, "Chat stream closed");
}
