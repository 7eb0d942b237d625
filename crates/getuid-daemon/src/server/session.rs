//! Per-connection WebSocket session.
//!
//! The session keeps reading so the connection stays alive (ping/pong is
//! answered by the read loop). Each valid message becomes a [`Request`]
//! pushed to the broker from a background task, so a busy broker never
//! blocks reading. Anything other than the version literal closes the
//! connection with "unsupported data".

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade, close_code};
use axum::extract::State;
use axum::response::Response;
use futures::stream::{SplitSink, StreamExt};
use futures::SinkExt;
use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use getuid_core::CloseStatus;
use getuid_core::protocol::{self, Frame, SUBPROTOCOL};

use super::AppState;
use crate::broker::{ReplyError, ReplySink, Request};

/// `GET <path>` — upgrade to a WebSocket session.
pub async fn upgrade(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.protocols([SUBPROTOCOL])
        .on_failed_upgrade(|e| warn!(error = %e, "WebSocket upgrade failed"))
        .on_upgrade(move |socket| run_session(socket, state.inbound))
}

/// Write half of a session, shared with the broker's delivery tasks.
pub struct WsReply {
    sink: Mutex<SplitSink<WebSocket, Message>>,
    closed_by_server: AtomicBool,
}

impl WsReply {
    pub fn new(sink: SplitSink<WebSocket, Message>) -> Self {
        Self {
            sink: Mutex::new(sink),
            closed_by_server: AtomicBool::new(false),
        }
    }

    /// Whether this side already sent a close frame.
    pub fn closed_by_server(&self) -> bool {
        self.closed_by_server.load(Ordering::Acquire)
    }
}

#[async_trait]
impl ReplySink for WsReply {
    async fn send_token(&self, token: &str) -> Result<(), ReplyError> {
        self.sink
            .lock()
            .await
            .send(Message::Text(token.into()))
            .await
            .map_err(|e| ReplyError::Send(e.to_string()))
    }

    async fn close(&self, status: CloseStatus, reason: &str) -> Result<(), ReplyError> {
        self.closed_by_server.store(true, Ordering::Release);
        let frame = CloseFrame {
            code: status.code(),
            reason: reason.into(),
        };
        self.sink
            .lock()
            .await
            .send(Message::Close(Some(frame)))
            .await
            .map_err(|e| ReplyError::Send(e.to_string()))
    }
}

async fn run_session(socket: WebSocket, inbound: mpsc::Sender<Request>) {
    let (sink, mut stream) = socket.split();
    let ws_reply = Arc::new(WsReply::new(sink));
    let reply: Arc<dyn ReplySink> = ws_reply.clone();
    let cancel = CancellationToken::new();
    // Requests still in flight see the connection as gone once we return.
    let _cancel_on_exit = cancel.clone().drop_guard();

    debug!("WebSocket session opened");
    while let Some(message) = stream.next().await {
        let message = match message {
            Ok(message) => message,
            Err(e) => {
                warn!(error = %e, "WebSocket read failed");
                return;
            }
        };

        let frame = match &message {
            Message::Text(text) => Frame::Text(text.as_str()),
            Message::Binary(_) => Frame::Binary,
            Message::Ping(_) | Message::Pong(_) => continue,
            Message::Close(frame) => {
                log_client_close(frame.as_ref(), ws_reply.closed_by_server());
                return;
            }
        };

        if let Err(violation) = protocol::check_request(frame) {
            debug!(%violation, "Rejecting client message");
            if let Err(e) = reply
                .close(violation.close_status(), &violation.reason())
                .await
            {
                debug!(error = %e, "Could not close client connection");
            }
            return;
        }

        let inbound = inbound.clone();
        let reply = Arc::clone(&reply);
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if inbound.send(Request::new(reply, cancel)).await.is_err() {
                debug!("Broker is gone, dropping request");
            }
        });
    }
    debug!("WebSocket session ended");
}

fn log_client_close(frame: Option<&CloseFrame>, closed_by_server: bool) {
    match frame {
        Some(frame) if is_abnormal_close(frame.code, closed_by_server) => {
            warn!(
                code = frame.code,
                reason = frame.reason.as_str(),
                "Client closed the connection abnormally"
            );
        }
        Some(frame) => debug!(code = frame.code, "Client closed the connection"),
        None => debug!("Client closed the connection"),
    }
}

/// A client close is abnormal unless it is 1000/1001 or echoes our own close.
fn is_abnormal_close(code: u16, closed_by_server: bool) -> bool {
    !closed_by_server && code != close_code::NORMAL && code != close_code::AWAY
}
