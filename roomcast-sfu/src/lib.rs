//! Roomcast session state
//!
//! Provides the authoritative in-memory room state for the signaling server:
//! - Session registry (rooms, transports, producers and their owners)
//! - Lifecycle manager (cascading cleanup on leave/disconnect)
//! - Room hub (broadcast groups and the client-to-room index)

pub mod hub;
pub mod lifecycle;
pub mod registry;
pub mod room;

pub use hub::{BroadcastOutcome, MessageSender, RoomHub};
pub use lifecycle::{CleanupReport, LifecycleManager};
pub use registry::{RemovedResources, SessionRegistry};
pub use room::{ProducerRecord, Room, RoomStats, TransportRecord};
