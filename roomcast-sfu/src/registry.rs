//! Session registry - authoritative store of rooms and their resources
//!
//! Rooms live in a sharded map, each behind its own async lock, so traffic
//! in one room never blocks another. The map itself is never handed out for
//! iteration; callers get snapshots.

use crate::room::{ProducerRecord, Room, RoomStats, TransportRecord};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use roomcast_core::models::{ClientId, ProducerId, RoomId, TransportId};
use roomcast_core::{Error, Result};
use std::sync::Arc;
use tracing::{debug, info};

/// Resources taken out of a room for one client
#[derive(Debug, Default)]
pub struct RemovedResources {
    pub transports: Vec<TransportRecord>,
    pub producers: Vec<ProducerRecord>,
    pub room_deleted: bool,
}

#[derive(Default)]
pub struct SessionRegistry {
    rooms: DashMap<RoomId, Arc<Room>>,
}

impl SessionRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the live room for `room_id`, creating it if absent.
    /// A room closed by a concurrent cleanup is replaced, never returned.
    pub fn create_room(&self, room_id: &RoomId) -> Arc<Room> {
        match self.rooms.entry(room_id.clone()) {
            Entry::Occupied(entry) if !entry.get().is_closed() => Arc::clone(entry.get()),
            Entry::Occupied(mut entry) => {
                let room = Arc::new(Room::new(room_id.clone()));
                entry.insert(Arc::clone(&room));
                debug!(room_id = %room_id, "Replaced closed room");
                room
            }
            Entry::Vacant(entry) => {
                let room = Arc::new(Room::new(room_id.clone()));
                entry.insert(Arc::clone(&room));
                info!(room_id = %room_id, "Created new room");
                room
            }
        }
    }

    #[must_use]
    pub fn get_room(&self, room_id: &RoomId) -> Option<Arc<Room>> {
        self.rooms
            .get(room_id)
            .map(|room| Arc::clone(room.value()))
            .filter(|room| !room.is_closed())
    }

    pub async fn get_transport(
        &self,
        room_id: &RoomId,
        transport_id: &TransportId,
    ) -> Option<TransportRecord> {
        self.get_room(room_id)?.transport(transport_id).await
    }

    pub async fn get_producer(
        &self,
        room_id: &RoomId,
        producer_id: &ProducerId,
    ) -> Option<ProducerRecord> {
        self.get_room(room_id)?.producer(producer_id).await
    }

    pub async fn list_producers(&self, room_id: &RoomId) -> Result<Vec<ProducerRecord>> {
        let room = self
            .get_room(room_id)
            .ok_or_else(|| Error::room_not_found(room_id))?;
        Ok(room.producers().await)
    }

    /// Insert a transport; an existing record with the same id is overwritten
    pub async fn add_transport(&self, room_id: &RoomId, transport: TransportRecord) -> Result<()> {
        let room = self
            .get_room(room_id)
            .ok_or_else(|| Error::room_not_found(room_id))?;
        let mut state = room.lock().await;
        if room.is_closed() {
            return Err(Error::room_not_found(room_id));
        }
        state.transports.insert(transport.id.clone(), transport);
        Ok(())
    }

    /// Insert a producer; an existing record with the same id is overwritten
    pub async fn add_producer(&self, room_id: &RoomId, producer: ProducerRecord) -> Result<()> {
        let room = self
            .get_room(room_id)
            .ok_or_else(|| Error::room_not_found(room_id))?;
        let mut state = room.lock().await;
        if room.is_closed() {
            return Err(Error::room_not_found(room_id));
        }
        state.producers.insert(producer.id.clone(), producer);
        Ok(())
    }

    /// Take every resource owned by `client_id` out of the room, deleting the
    /// room when nothing is left. `None` if the room does not exist.
    pub async fn remove_owned_by(
        &self,
        room_id: &RoomId,
        client_id: &ClientId,
    ) -> Option<RemovedResources> {
        let room = self.get_room(room_id)?;

        let mut removed = RemovedResources::default();
        {
            let mut state = room.lock().await;
            if room.is_closed() {
                return None;
            }

            let owned: Vec<ProducerId> = state
                .producers
                .values()
                .filter(|p| &p.owner == client_id)
                .map(|p| p.id.clone())
                .collect();
            removed.producers = owned
                .iter()
                .filter_map(|id| state.producers.remove(id))
                .collect();

            let owned: Vec<TransportId> = state
                .transports
                .values()
                .filter(|t| &t.owner == client_id)
                .map(|t| t.id.clone())
                .collect();
            removed.transports = owned
                .iter()
                .filter_map(|id| state.transports.remove(id))
                .collect();

            if state.is_empty() {
                room.mark_closed();
                removed.room_deleted = true;
            }
        }

        if removed.room_deleted {
            self.rooms
                .remove_if(room_id, |_, current| Arc::ptr_eq(current, &room));
            info!(room_id = %room_id, "Room is empty, removed");
        }

        Some(removed)
    }

    #[must_use]
    pub fn room_ids(&self) -> Vec<RoomId> {
        self.rooms
            .iter()
            .filter(|room| !room.is_closed())
            .map(|room| room.key().clone())
            .collect()
    }

    #[must_use]
    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    pub async fn room_stats(&self, room_id: &RoomId) -> Option<RoomStats> {
        Some(self.get_room(room_id)?.stats().await)
    }
}
