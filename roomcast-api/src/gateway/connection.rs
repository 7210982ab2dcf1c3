use std::time::Instant;

use roomcast_core::models::{ClientId, RoomId};
use roomcast_core::protocol::{ClientRef, Envelope, Request, RequestKind, ServerEvent};
use roomcast_core::{Error, Result};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::Gateway;
use crate::observability::metrics;

/// Per-connection protocol state
pub(super) struct Connection<'g> {
    pub(super) gateway: &'g Gateway,
    pub(super) client_id: ClientId,
    /// Room this connection has joined, if any
    pub(super) room: Option<RoomId>,
    pub(super) outbound: mpsc::Sender<Envelope>,
}

fn encode<T: Serialize>(value: &T) -> Result<Value> {
    serde_json::to_value(value)
        .map_err(|e| Error::EngineFailure(format!("failed to encode response: {e}")))
}

impl<'g> Connection<'g> {
    pub(super) const fn new(
        gateway: &'g Gateway,
        client_id: ClientId,
        outbound: mpsc::Sender<Envelope>,
    ) -> Self {
        Self {
            gateway,
            client_id,
            room: None,
            outbound,
        }
    }

    /// Queue a frame for this connection, waiting for space
    pub(super) async fn emit(&self, envelope: Envelope) -> Result<()> {
        self.outbound
            .send(envelope)
            .await
            .map_err(|_| Error::ConnectionClosed)
    }

    /// Handle one inbound event and emit its single terminal outcome.
    /// Fails only when the outcome could not be queued.
    pub(super) async fn dispatch(&mut self, envelope: Envelope) -> Result<()> {
        let started = Instant::now();

        let request = match Request::parse(&envelope) {
            Ok(request) => request,
            Err(err) => {
                let kind = RequestKind::from_event(&envelope.event);
                if kind.is_some_and(|k| !k.expects_reply()) {
                    warn!(client_id = %self.client_id, error = %err, "Ignoring malformed {}", envelope.event);
                    return Ok(());
                }
                let label = kind.map_or("unknown", RequestKind::as_str);
                metrics::record_request(label, false, started.elapsed());
                debug!(client_id = %self.client_id, event = %envelope.event, error = %err, "Rejected request");
                return self.emit(Envelope::failure(&envelope.event, &err)).await;
            }
        };

        let kind = request.kind();
        let outcome = match request {
            Request::Exit(req) => {
                self.exit(req).await;
                return Ok(());
            }
            Request::Join(req) => self.join(req).await.and_then(|r| encode(&r)),
            Request::GetCapabilities => self.get_capabilities().await,
            Request::CreateTransport(req) => self.create_transport(req).await.and_then(|r| encode(&r)),
            Request::ConnectTransport(req) => self.connect_transport(req).await.and_then(|r| encode(&r)),
            Request::Produce(req) => self.produce(req).await.and_then(|r| encode(&r)),
            Request::Consume(req) => self.consume(req).await.and_then(|r| encode(&r)),
        };

        metrics::record_request(kind.as_str(), outcome.is_ok(), started.elapsed());
        let reply = match outcome {
            Ok(data) => Envelope::success(kind, data),
            Err(err) => {
                debug!(
                    client_id = %self.client_id,
                    event = %kind,
                    error = %err,
                    "Request failed"
                );
                Envelope::failure(kind.as_str(), &err)
            }
        };
        self.emit(reply).await
    }

    /// Fan an event out to the rest of a room without waiting on anyone
    pub(super) fn broadcast(&self, room_id: &RoomId, event: ServerEvent) {
        let outcome = self
            .gateway
            .hub
            .broadcast(room_id, Some(&self.client_id), &event.into_envelope());
        metrics::record_broadcast(outcome.delivered, outcome.dropped);
    }

    /// Leave the current room: release resources, then tell the others.
    /// Peers that see the notice can no longer reach this client's producers.
    pub(super) async fn leave_room(&mut self, notice: fn(ClientRef) -> ServerEvent) {
        let Some(room_id) = self.room.take() else {
            warn!(client_id = %self.client_id, "Leaving without having joined a room");
            return;
        };

        self.gateway.hub.leave(&self.client_id);
        self.gateway
            .lifecycle
            .cleanup_client_resources(&room_id, &self.client_id)
            .await;
        self.broadcast(
            &room_id,
            notice(ClientRef {
                client_id: self.client_id.clone(),
            }),
        );
        self.refresh_room_gauge();
    }

    pub(super) fn refresh_room_gauge(&self) {
        let rooms = i64::try_from(self.gateway.registry.room_count()).unwrap_or(i64::MAX);
        metrics::ROOMS_ACTIVE.set(rooms);
    }

    pub(super) async fn disconnect(mut self) {
        self.leave_room(ServerEvent::ClientDisconnected).await;
    }
}
