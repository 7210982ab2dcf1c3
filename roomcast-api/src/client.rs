//! Signaling client over WebSocket
//!
//! Wraps a `tokio-tungstenite` connection in the request/response
//! correlation layer and exposes typed helpers for each signaling request.
//! Server broadcasts (`peerJoined`, `newProducer`, ...) are delivered through
//! [`SignalingClient::next_event`].

use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use roomcast_core::correlation::{Correlator, EventSink, Resolution, DEFAULT_REQUEST_TIMEOUT};
use roomcast_core::models::{ClientId, MediaKind, ProducerId, RoomId, TransportDirection, TransportId};
use roomcast_core::protocol::{
    ConnectTransportRequest, ConsumeRequest, Consumed, CreateTransportRequest, Envelope,
    ExitRequest, JoinRequest, JoinResponse, ProduceRequest, Produced, RequestKind, ServerEvent,
    TransportConnected, TransportCreated,
};
use roomcast_core::{Error, Result};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, warn};

type Outbound = mpsc::UnboundedSender<Envelope>;

pub struct SignalingClient {
    client_id: ClientId,
    correlator: Arc<Correlator<Outbound>>,
    events: mpsc::UnboundedReceiver<ServerEvent>,
    shutdown: Option<oneshot::Sender<()>>,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

fn to_payload<T: Serialize>(request: &T) -> Result<Value> {
    serde_json::to_value(request).map_err(|e| Error::Transport(format!("failed to encode request: {e}")))
}

fn from_payload<T: DeserializeOwned>(value: Value) -> Result<T> {
    serde_json::from_value(value).map_err(|e| Error::Transport(format!("unexpected response: {e}")))
}

impl SignalingClient {
    pub async fn connect(url: &str) -> Result<Self> {
        Self::connect_with_timeout(url, DEFAULT_REQUEST_TIMEOUT).await
    }

    /// Connect and wait for the server to announce this client's id
    pub async fn connect_with_timeout(url: &str, timeout: Duration) -> Result<Self> {
        let (socket, _) = tokio_tungstenite::connect_async(url)
            .await
            .map_err(|e| Error::Transport(e.to_string()))?;
        let (mut sink, mut stream) = socket.split();

        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Envelope>();
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();
        let writer = tokio::spawn(async move {
            loop {
                tokio::select! {
                    envelope = out_rx.recv() => {
                        let Some(envelope) = envelope else { break };
                        let text = match envelope.to_text() {
                            Ok(text) => text,
                            Err(e) => {
                                warn!(event = %envelope.event, error = %e, "Failed to encode envelope");
                                continue;
                            }
                        };
                        if sink.send(Message::Text(text.into())).await.is_err() {
                            break;
                        }
                    }
                    _ = &mut shutdown_rx => break,
                }
            }
            let _ = sink.close().await;
        });

        let correlator = Arc::new(Correlator::with_timeout(out_tx, timeout));
        let (event_tx, events) = mpsc::unbounded_channel();
        let (hello_tx, hello_rx) = oneshot::channel();

        let reader_correlator = Arc::clone(&correlator);
        let reader = tokio::spawn(async move {
            let mut hello = Some(hello_tx);
            while let Some(frame) = stream.next().await {
                let text = match frame {
                    Ok(Message::Text(text)) => text,
                    Ok(Message::Close(_)) => break,
                    Ok(_) => continue,
                    Err(e) => {
                        debug!(error = %e, "Signaling connection failed");
                        break;
                    }
                };
                let envelope = match Envelope::from_text(text.as_str()) {
                    Ok(envelope) => envelope,
                    Err(e) => {
                        warn!(error = %e, "Dropping malformed frame from server");
                        continue;
                    }
                };

                if reader_correlator.resolve(&envelope) != Resolution::Unrelated {
                    continue;
                }
                match ServerEvent::from_envelope(&envelope) {
                    Some(ServerEvent::Connected(me)) => {
                        if let Some(tx) = hello.take() {
                            let _ = tx.send(me.client_id);
                        }
                    }
                    Some(event) => {
                        let _ = event_tx.send(event);
                    }
                    None => debug!(event = %envelope.event, "Ignoring unknown server event"),
                }
            }
            reader_correlator.close();
        });

        let client_id = match tokio::time::timeout(timeout, hello_rx).await {
            Ok(Ok(client_id)) => client_id,
            Ok(Err(_)) => return Err(Error::ConnectionClosed),
            Err(_) => return Err(Error::timeout("connected", timeout)),
        };

        Ok(Self {
            client_id,
            correlator,
            events,
            shutdown: Some(shutdown_tx),
            reader,
            writer,
        })
    }

    #[must_use]
    pub const fn client_id(&self) -> &ClientId {
        &self.client_id
    }

    /// Raw correlated request
    pub async fn request(&self, event: &str, payload: Value) -> Result<Value> {
        self.correlator.request(event, payload).await
    }

    async fn call<Req: Serialize, Resp: DeserializeOwned>(
        &self,
        kind: RequestKind,
        request: &Req,
    ) -> Result<Resp> {
        let value = self.request(kind.as_str(), to_payload(request)?).await?;
        from_payload(value)
    }

    pub async fn join(&self, room_id: &RoomId) -> Result<JoinResponse> {
        self.call(
            RequestKind::Join,
            &JoinRequest {
                room_id: room_id.clone(),
            },
        )
        .await
    }

    pub async fn get_capabilities(&self) -> Result<Value> {
        self.request(RequestKind::GetCapabilities.as_str(), Value::Null)
            .await
    }

    pub async fn create_transport(
        &self,
        room_id: &RoomId,
        direction: TransportDirection,
    ) -> Result<TransportCreated> {
        self.call(
            RequestKind::CreateTransport,
            &CreateTransportRequest {
                room_id: room_id.clone(),
                direction,
            },
        )
        .await
    }

    pub async fn connect_transport(
        &self,
        room_id: &RoomId,
        transport_id: &TransportId,
        dtls_parameters: Value,
    ) -> Result<TransportConnected> {
        self.call(
            RequestKind::ConnectTransport,
            &ConnectTransportRequest {
                room_id: room_id.clone(),
                transport_id: transport_id.clone(),
                dtls_parameters,
            },
        )
        .await
    }

    pub async fn produce(
        &self,
        room_id: &RoomId,
        transport_id: &TransportId,
        kind: MediaKind,
        rtp_parameters: Value,
    ) -> Result<Produced> {
        self.call(
            RequestKind::Produce,
            &ProduceRequest {
                room_id: room_id.clone(),
                transport_id: transport_id.clone(),
                kind,
                rtp_parameters,
            },
        )
        .await
    }

    pub async fn consume(
        &self,
        room_id: &RoomId,
        transport_id: &TransportId,
        producer_id: &ProducerId,
        rtp_capabilities: Value,
    ) -> Result<Consumed> {
        self.call(
            RequestKind::Consume,
            &ConsumeRequest {
                room_id: room_id.clone(),
                transport_id: transport_id.clone(),
                producer_id: producer_id.clone(),
                rtp_capabilities,
            },
        )
        .await
    }

    /// Leave the room. Fire-and-forget: the server sends no reply.
    pub fn exit(&self, room_id: &RoomId) -> Result<()> {
        let payload = to_payload(&ExitRequest {
            room_id: Some(room_id.clone()),
        })?;
        self.correlator
            .sink()
            .emit(Envelope::new(RequestKind::Exit.as_str(), payload))
    }

    /// Next server broadcast; `None` once the connection is gone
    pub async fn next_event(&mut self) -> Option<ServerEvent> {
        self.events.recv().await
    }

    /// Close the WebSocket cleanly
    pub async fn close(mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        let _ = tokio::time::timeout(Duration::from_secs(1), &mut self.writer).await;
    }
}

impl Drop for SignalingClient {
    fn drop(&mut self) {
        self.correlator.close();
        self.reader.abort();
        self.writer.abort();
    }
}
