//! WebSocket transport for the signaling protocol
//!
//! Each text frame carries one JSON envelope. Inbound frames feed the
//! gateway through [`SignalStream`]; outbound envelopes are queued on a
//! bounded channel drained by a writer task.

use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::IntoResponse,
};
use futures::{stream::SplitStream, SinkExt, StreamExt};
use roomcast_core::protocol::Envelope;
use tokio::sync::mpsc;
use tracing::{debug, error};

use crate::gateway::{FrameError, SignalStream};
use crate::http::AppState;

/// Adapts the receiving half of an axum WebSocket to [`SignalStream`]
struct WebSocketStream {
    receiver: SplitStream<WebSocket>,
}

#[async_trait::async_trait]
impl SignalStream for WebSocketStream {
    async fn recv(&mut self) -> Option<Result<Envelope, FrameError>> {
        loop {
            match self.receiver.next().await {
                Some(Ok(Message::Text(text))) => {
                    return Some(
                        Envelope::from_text(text.as_str())
                            .map_err(|e| FrameError::Malformed(e.to_string())),
                    );
                }
                Some(Ok(Message::Binary(bytes))) => {
                    return Some(
                        serde_json::from_slice(&bytes)
                            .map_err(|e| FrameError::Malformed(e.to_string())),
                    );
                }
                Some(Ok(Message::Close(_))) | None => return None,
                Some(Err(e)) => return Some(Err(FrameError::Transport(e.to_string()))),
                Some(Ok(_)) => {
                    // Ping/pong are answered by axum
                }
            }
        }
    }
}

/// Upgrade to a signaling connection
pub async fn websocket_handler(
    State(state): State<AppState>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.max_message_size(state.config.server.max_message_size)
        .on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (tx, mut rx) = mpsc::channel::<Envelope>(state.config.signaling.outbound_buffer);
    let (mut sink, receiver) = socket.split();

    // Server envelopes -> WebSocket. Ends once every sender is gone.
    tokio::spawn(async move {
        while let Some(envelope) = rx.recv().await {
            let text = match envelope.to_text() {
                Ok(text) => text,
                Err(e) => {
                    error!(event = %envelope.event, error = %e, "Failed to encode envelope");
                    continue;
                }
            };
            if let Err(e) = sink.send(Message::Text(text.into())).await {
                debug!(error = %e, "WebSocket write failed");
                break;
            }
        }
        let _ = sink.close().await;
    });

    let mut stream = WebSocketStream { receiver };
    state.gateway.run(&mut stream, tx).await;
}
