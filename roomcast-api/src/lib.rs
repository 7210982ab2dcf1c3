//! Roomcast signaling API
//!
//! Connection gateway, WebSocket/HTTP surface, metrics and a signaling
//! client for the same protocol.

pub mod client;
pub mod gateway;
pub mod http;
pub mod observability;

pub use client::SignalingClient;
pub use gateway::{Gateway, SignalStream};
pub use http::{create_router, AppState};
