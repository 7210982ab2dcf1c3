//! Room resource sets

use chrono::{DateTime, Utc};
use roomcast_core::models::{ClientId, MediaKind, ProducerId, RoomId, TransportDirection, TransportId};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{Mutex, MutexGuard};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransportRecord {
    pub id: TransportId,
    pub owner: ClientId,
    pub direction: TransportDirection,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProducerRecord {
    pub id: ProducerId,
    pub owner: ClientId,
    pub kind: MediaKind,
    pub transport_id: TransportId,
}

#[derive(Debug, Default)]
pub(crate) struct RoomState {
    pub transports: HashMap<TransportId, TransportRecord>,
    pub producers: HashMap<ProducerId, ProducerRecord>,
}

impl RoomState {
    pub fn is_empty(&self) -> bool {
        self.transports.is_empty() && self.producers.is_empty()
    }
}

/// A room and the media resources created in it.
///
/// All mutations go through the room's lock. Once `closed` is set (under the
/// lock) the room is never written to again; the registry swaps in a fresh
/// room for the same id on the next join.
pub struct Room {
    id: RoomId,
    created_at: DateTime<Utc>,
    closed: AtomicBool,
    state: Mutex<RoomState>,
}

impl Room {
    pub(crate) fn new(id: RoomId) -> Self {
        Self {
            id,
            created_at: Utc::now(),
            closed: AtomicBool::new(false),
            state: Mutex::new(RoomState::default()),
        }
    }

    #[must_use]
    pub const fn id(&self) -> &RoomId {
        &self.id
    }

    #[must_use]
    pub const fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Must be called with the state lock held
    pub(crate) fn mark_closed(&self) {
        self.closed.store(true, Ordering::Release);
    }

    pub(crate) async fn lock(&self) -> MutexGuard<'_, RoomState> {
        self.state.lock().await
    }

    pub async fn transport(&self, transport_id: &TransportId) -> Option<TransportRecord> {
        self.state.lock().await.transports.get(transport_id).cloned()
    }

    pub async fn producer(&self, producer_id: &ProducerId) -> Option<ProducerRecord> {
        self.state.lock().await.producers.get(producer_id).cloned()
    }

    pub async fn producers(&self) -> Vec<ProducerRecord> {
        self.state.lock().await.producers.values().cloned().collect()
    }

    pub async fn stats(&self) -> RoomStats {
        let state = self.state.lock().await;
        RoomStats {
            room_id: self.id.clone(),
            transports: state.transports.len(),
            producers: state.producers.len(),
            created_at: self.created_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomStats {
    pub room_id: RoomId,
    pub transports: usize,
    pub producers: usize,
    pub created_at: DateTime<Utc>,
}
