pub mod models;
pub mod config;
pub mod error;
pub mod logging;
pub mod bootstrap;
pub mod protocol;
pub mod correlation;
pub mod engine;

pub use config::Config;
pub use error::{Error, ErrorCode, ErrorPayload, Result};
pub use correlation::{Correlator, EventSink, Resolution};
pub use engine::{LocalEngine, MediaEngine};
