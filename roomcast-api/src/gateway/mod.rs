//! Connection gateway
//!
//! Transport-agnostic signaling handler. A transport (WebSocket, or plain
//! channels in tests) supplies a [`SignalStream`] for inbound events and an
//! outbound queue; [`Gateway::run`] drives one connection from open to
//! disconnect, processing its events strictly in arrival order.

mod connection;
mod handlers;

use std::sync::Arc;

use roomcast_core::config::SignalingConfig;
use roomcast_core::engine::MediaEngine;
use roomcast_core::models::{ClientId, RoomId};
use roomcast_core::protocol::{ClientRef, Envelope, ServerEvent};
use roomcast_sfu::{LifecycleManager, RoomHub, RoomStats, SessionRegistry};
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::observability::metrics;
use connection::Connection;

/// Why an inbound frame could not be turned into an event
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// Frame was not a valid envelope; the connection stays open
    #[error("malformed frame: {0}")]
    Malformed(String),
    /// The underlying transport failed; the connection is over
    #[error("transport failure: {0}")]
    Transport(String),
}

/// Inbound half of a signaling connection
#[async_trait::async_trait]
pub trait SignalStream: Send {
    /// Next inbound event. `None` once the peer has gone away.
    async fn recv(&mut self) -> Option<Result<Envelope, FrameError>>;
}

#[async_trait::async_trait]
impl SignalStream for mpsc::Receiver<Envelope> {
    async fn recv(&mut self) -> Option<Result<Envelope, FrameError>> {
        mpsc::Receiver::recv(self).await.map(Ok)
    }
}

/// Room snapshot for the introspection API
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomSummary {
    #[serde(flatten)]
    pub stats: RoomStats,
    pub members: Vec<ClientId>,
}

pub struct Gateway {
    registry: Arc<SessionRegistry>,
    lifecycle: LifecycleManager,
    hub: RoomHub,
    engine: Arc<dyn MediaEngine>,
    config: SignalingConfig,
}

impl Gateway {
    pub fn new(engine: Arc<dyn MediaEngine>, config: SignalingConfig) -> Self {
        let registry = Arc::new(SessionRegistry::new());
        Self {
            lifecycle: LifecycleManager::new(Arc::clone(&registry), Arc::clone(&engine)),
            registry,
            hub: RoomHub::new(),
            engine,
            config,
        }
    }

    #[must_use]
    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    #[must_use]
    pub const fn hub(&self) -> &RoomHub {
        &self.hub
    }

    #[must_use]
    pub const fn config(&self) -> &SignalingConfig {
        &self.config
    }

    pub async fn room_summary(&self, room_id: &RoomId) -> Option<RoomSummary> {
        let stats = self.registry.room_stats(room_id).await?;
        Some(RoomSummary {
            stats,
            members: self.hub.members(room_id),
        })
    }

    /// Serve one connection until the peer goes away, then release
    /// everything it held. Returns the id the connection was known by.
    pub async fn run<S: SignalStream>(
        &self,
        stream: &mut S,
        outbound: mpsc::Sender<Envelope>,
    ) -> ClientId {
        let client_id = ClientId::new();
        metrics::CONNECTIONS_TOTAL.inc();
        metrics::CONNECTIONS_ACTIVE.inc();
        info!(client_id = %client_id, "Signaling connection opened");

        let mut conn = Connection::new(self, client_id.clone(), outbound);
        let hello = ServerEvent::Connected(ClientRef {
            client_id: client_id.clone(),
        });

        if conn.emit(hello.into_envelope()).await.is_ok() {
            loop {
                match stream.recv().await {
                    Some(Ok(envelope)) => {
                        if conn.dispatch(envelope).await.is_err() {
                            debug!(client_id = %client_id, "Outbound queue closed");
                            break;
                        }
                    }
                    Some(Err(FrameError::Malformed(e))) => {
                        warn!(client_id = %client_id, error = %e, "Dropping malformed frame");
                    }
                    Some(Err(e @ FrameError::Transport(_))) => {
                        warn!(client_id = %client_id, error = %e, "Connection failed");
                        break;
                    }
                    None => break,
                }
            }
        }

        conn.disconnect().await;
        metrics::CONNECTIONS_ACTIVE.dec();
        info!(client_id = %client_id, "Signaling connection closed");
        client_id
    }
}
