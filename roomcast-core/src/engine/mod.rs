//! Media engine adapter boundary.
//!
//! The signaling layer never inspects codec, ICE or DTLS blobs; they are
//! carried as opaque JSON values between clients and the engine.

mod local;

pub use local::LocalEngine;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::models::{ClientId, ConsumerId, MediaKind, ProducerId, TransportDirection, TransportId};

/// Failure reported by the media engine. The message reaches clients verbatim.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct EngineError(pub String);

impl EngineError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

pub type EngineResult<T> = std::result::Result<T, EngineError>;

/// Parameters a client needs to set up its side of a transport
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransportParameters {
    pub id: TransportId,
    pub ice_parameters: Value,
    pub ice_candidates: Vec<Value>,
    pub dtls_parameters: Value,
}

/// A consumer created by the engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsumerParameters {
    pub id: ConsumerId,
    pub producer_id: ProducerId,
    pub kind: MediaKind,
    pub rtp_parameters: Value,
}

/// Engine-side resource handle passed to [`MediaEngine::close`]
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EngineResource {
    Transport(TransportId),
    Producer(ProducerId),
    Consumer(ConsumerId),
}

impl std::fmt::Display for EngineResource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Transport(id) => write!(f, "transport {id}"),
            Self::Producer(id) => write!(f, "producer {id}"),
            Self::Consumer(id) => write!(f, "consumer {id}"),
        }
    }
}

#[async_trait]
pub trait MediaEngine: Send + Sync {
    /// Router RTP capabilities offered to clients
    async fn rtp_capabilities(&self) -> EngineResult<Value>;

    async fn create_transport(
        &self,
        direction: TransportDirection,
        owner: &ClientId,
    ) -> EngineResult<TransportParameters>;

    async fn connect_transport(
        &self,
        transport_id: &TransportId,
        dtls_parameters: Value,
    ) -> EngineResult<()>;

    async fn create_producer(
        &self,
        transport_id: &TransportId,
        kind: MediaKind,
        rtp_parameters: Value,
    ) -> EngineResult<ProducerId>;

    /// Consumers are created paused
    async fn create_consumer(
        &self,
        transport_id: &TransportId,
        producer_id: &ProducerId,
        rtp_capabilities: Value,
    ) -> EngineResult<ConsumerParameters>;

    async fn resume_consumer(&self, consumer_id: &ConsumerId) -> EngineResult<()>;

    /// Closing an unknown resource succeeds
    async fn close(&self, resource: EngineResource) -> EngineResult<()>;
}
