pub mod id;
pub mod media;

pub use id::{generate_id, ClientId, ConsumerId, ProducerId, RoomId, TransportId};
pub use media::{MediaKind, TransportDirection};
