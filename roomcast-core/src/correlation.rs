//! Request/response correlation over a fire-and-forget event connection.
//!
//! A request named `x` waits for exactly one of `xSuccess` / `xError`.
//! Pending entries are keyed by event name, so at most one request per name
//! may be outstanding on a connection at a time.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use crate::error::{Error, ErrorPayload, Result};
use crate::protocol::{Envelope, Outcome};

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_millis(5000);

/// Outbound half of a connection
pub trait EventSink: Send + Sync {
    fn emit(&self, envelope: Envelope) -> Result<()>;
}

impl EventSink for mpsc::UnboundedSender<Envelope> {
    fn emit(&self, envelope: Envelope) -> Result<()> {
        self.send(envelope).map_err(|_| Error::ConnectionClosed)
    }
}

type Completion = std::result::Result<Value, ErrorPayload>;

struct Pending {
    ticket: u64,
    tx: oneshot::Sender<Completion>,
}

/// What [`Correlator::resolve`] did with an inbound envelope
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// Completed a pending request
    Resolved,
    /// A response with no pending request (late or unsolicited); dropped
    Discarded,
    /// Not a response event; belongs to the broadcast listener
    Unrelated,
}

pub struct Correlator<S> {
    sink: S,
    pending: Mutex<HashMap<String, Pending>>,
    next_ticket: AtomicU64,
    closed: AtomicBool,
    default_timeout: Duration,
}

impl<S: EventSink> Correlator<S> {
    pub fn new(sink: S) -> Self {
        Self::with_timeout(sink, DEFAULT_REQUEST_TIMEOUT)
    }

    pub fn with_timeout(sink: S, default_timeout: Duration) -> Self {
        Self {
            sink,
            pending: Mutex::new(HashMap::new()),
            next_ticket: AtomicU64::new(0),
            closed: AtomicBool::new(false),
            default_timeout,
        }
    }

    pub async fn request(&self, event: &str, payload: Value) -> Result<Value> {
        self.request_with_timeout(event, payload, self.default_timeout)
            .await
    }

    pub async fn request_with_timeout(
        &self,
        event: &str,
        payload: Value,
        timeout: Duration,
    ) -> Result<Value> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::ConnectionClosed);
        }

        let ticket = self.next_ticket.fetch_add(1, Ordering::Relaxed);
        let rx = {
            let mut pending = self.pending.lock();
            if pending.contains_key(event) {
                return Err(Error::DuplicateRequest(event.to_string()));
            }
            let (tx, rx) = oneshot::channel();
            pending.insert(event.to_string(), Pending { ticket, tx });
            rx
        };

        // Registered before emitting so an immediate reply is never missed
        if let Err(e) = self.sink.emit(Envelope::new(event, payload)) {
            self.retire(event, ticket);
            return Err(e);
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(Ok(value))) => Ok(value),
            Ok(Ok(Err(payload))) => Err(Error::from_payload(payload)),
            Ok(Err(_)) => Err(Error::ConnectionClosed),
            Err(_) => {
                self.retire(event, ticket);
                debug!(event = %event, "request timed out");
                Err(Error::timeout(event, timeout))
            }
        }
    }

    /// Route an inbound envelope to its pending request, if any
    pub fn resolve(&self, envelope: &Envelope) -> Resolution {
        let Some((base, outcome)) = envelope.outcome() else {
            return Resolution::Unrelated;
        };

        let Some(pending) = self.pending.lock().remove(base) else {
            debug!(event = %envelope.event, "discarding response with no pending request");
            return Resolution::Discarded;
        };

        let completion = match outcome {
            Outcome::Success => Ok(envelope.data.clone()),
            Outcome::Error => Err(ErrorPayload::from_value(envelope.data.clone())),
        };
        // The waiter may already have given up
        let _ = pending.tx.send(completion);
        Resolution::Resolved
    }

    /// Fail every pending request with `ConnectionClosed` and refuse new ones
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.pending.lock().clear();
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    #[must_use]
    pub const fn sink(&self) -> &S {
        &self.sink
    }

    fn retire(&self, event: &str, ticket: u64) {
        let mut pending = self.pending.lock();
        if pending.get(event).is_some_and(|p| p.ticket == ticket) {
            pending.remove(event);
        }
    }
}
