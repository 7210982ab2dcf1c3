use parking_lot::RwLock;
use roomcast_core::models::{ClientId, RoomId};
use roomcast_core::protocol::Envelope;
use std::collections::HashMap;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Outbound queue of one client connection
pub type MessageSender = mpsc::Sender<Envelope>;

#[derive(Debug, Clone)]
struct Subscriber {
    client_id: ClientId,
    sender: MessageSender,
}

#[derive(Debug, Default)]
struct HubState {
    /// room_id -> subscribers
    rooms: HashMap<RoomId, Vec<Subscriber>>,
    /// client_id -> room_id
    clients: HashMap<ClientId, RoomId>,
}

/// Delivery counts for one broadcast
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastOutcome {
    pub delivered: usize,
    pub dropped: usize,
}

/// Broadcast groups plus the `client -> room` index.
///
/// Both maps sit behind one lock so membership and the index never
/// disagree.
#[derive(Debug, Default)]
pub struct RoomHub {
    state: RwLock<HubState>,
}

impl RoomHub {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe a client to a room. A client is in at most one room, so any
    /// previous membership is dropped; the previous room id is returned.
    pub fn join(&self, room_id: RoomId, client_id: ClientId, sender: MessageSender) -> Option<RoomId> {
        let mut state = self.state.write();
        let previous = Self::detach(&mut state, &client_id);

        state
            .rooms
            .entry(room_id.clone())
            .or_default()
            .push(Subscriber {
                client_id: client_id.clone(),
                sender,
            });
        state.clients.insert(client_id.clone(), room_id.clone());

        info!(
            room_id = %room_id,
            client_id = %client_id,
            "Client subscribed to room"
        );
        previous
    }

    /// Unsubscribe a client; returns the room it was in
    pub fn leave(&self, client_id: &ClientId) -> Option<RoomId> {
        let mut state = self.state.write();
        let room_id = Self::detach(&mut state, client_id);
        match &room_id {
            Some(room_id) => info!(
                room_id = %room_id,
                client_id = %client_id,
                "Client unsubscribed from room"
            ),
            None => debug!(client_id = %client_id, "Client was not in any room"),
        }
        room_id
    }

    fn detach(state: &mut HubState, client_id: &ClientId) -> Option<RoomId> {
        let room_id = state.clients.remove(client_id)?;
        if let Some(subscribers) = state.rooms.get_mut(&room_id) {
            subscribers.retain(|sub| &sub.client_id != client_id);
            if subscribers.is_empty() {
                state.rooms.remove(&room_id);
                debug!(room_id = %room_id, "Room has no more subscribers, removed");
            }
        }
        Some(room_id)
    }

    #[must_use]
    pub fn room_of(&self, client_id: &ClientId) -> Option<RoomId> {
        self.state.read().clients.get(client_id).cloned()
    }

    #[must_use]
    pub fn members(&self, room_id: &RoomId) -> Vec<ClientId> {
        self.state
            .read()
            .rooms
            .get(room_id)
            .map(|subs| subs.iter().map(|s| s.client_id.clone()).collect())
            .unwrap_or_default()
    }

    #[must_use]
    pub fn member_count(&self, room_id: &RoomId) -> usize {
        self.state.read().rooms.get(room_id).map_or(0, Vec::len)
    }

    /// Send an event to every member of a room except `exclude`.
    ///
    /// Never waits: a subscriber whose queue is full or closed misses the
    /// event. Closed subscribers are removed by their own disconnect path.
    pub fn broadcast(
        &self,
        room_id: &RoomId,
        exclude: Option<&ClientId>,
        envelope: &Envelope,
    ) -> BroadcastOutcome {
        let mut outcome = BroadcastOutcome::default();
        let state = self.state.read();
        let Some(subscribers) = state.rooms.get(room_id) else {
            return outcome;
        };

        for subscriber in subscribers {
            if exclude == Some(&subscriber.client_id) {
                continue;
            }
            match subscriber.sender.try_send(envelope.clone()) {
                Ok(()) => {
                    outcome.delivered += 1;
                    debug!(
                        room_id = %room_id,
                        client_id = %subscriber.client_id,
                        event = %envelope.event,
                        "Event sent to client"
                    );
                }
                Err(err) => {
                    outcome.dropped += 1;
                    warn!(
                        room_id = %room_id,
                        client_id = %subscriber.client_id,
                        event = %envelope.event,
                        error = %err,
                        "Failed to send event to client"
                    );
                }
            }
        }
        outcome
    }
}
