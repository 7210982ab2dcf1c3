use roomcast_core::engine::EngineResource;
use roomcast_core::models::{RoomId, TransportDirection, TransportId};
use roomcast_core::protocol::{
    ClientRef, ConnectTransportRequest, ConsumeRequest, Consumed, CreateTransportRequest,
    ExitRequest, JoinRequest, JoinResponse, ProduceRequest, Produced, ProducerSummary,
    ServerEvent, TransportConnected, TransportCreated,
};
use roomcast_core::{Error, Result};
use roomcast_sfu::{ProducerRecord, TransportRecord};
use serde_json::Value;
use tracing::{info, warn};

use super::connection::Connection;

impl Connection<'_> {
    /// The joined room, provided it is the one the request names
    fn joined(&self, room_id: &RoomId) -> Result<RoomId> {
        match &self.room {
            Some(current) if current == room_id => Ok(current.clone()),
            _ => Err(Error::validation(format!("not joined to room {room_id}"))),
        }
    }

    /// Transport in the joined room, owned by this client, facing `direction`
    async fn own_transport(
        &self,
        room_id: &RoomId,
        transport_id: &TransportId,
        direction: Option<TransportDirection>,
    ) -> Result<TransportRecord> {
        let transport = self
            .gateway
            .registry
            .get_transport(room_id, transport_id)
            .await
            .ok_or_else(|| Error::transport_not_found(transport_id))?;

        if transport.owner != self.client_id {
            return Err(Error::validation(format!(
                "transport {transport_id} belongs to another client"
            )));
        }
        if let Some(expected) = direction {
            if transport.direction != expected {
                return Err(Error::validation(format!(
                    "transport {transport_id} is a {} transport, expected {expected}",
                    transport.direction
                )));
            }
        }
        Ok(transport)
    }

    async fn close_orphan(&self, resource: EngineResource) {
        if let Err(e) = self.gateway.engine.close(resource.clone()).await {
            warn!(%resource, error = %e, "Failed to close orphaned engine resource");
        }
    }

    pub(super) async fn join(&mut self, req: JoinRequest) -> Result<JoinResponse> {
        let room_id = req.room_id;
        if room_id.as_str().len() > self.gateway.config.max_room_id_len {
            return Err(Error::validation(format!(
                "roomId exceeds {} characters",
                self.gateway.config.max_room_id_len
            )));
        }

        let switching = self.room.as_ref().is_some_and(|current| current != &room_id);
        if switching {
            self.leave_room(ServerEvent::PeerLeft).await;
        }
        let first_join = self.room.is_none();

        let room = self.gateway.registry.create_room(&room_id);
        self.gateway
            .hub
            .join(room_id.clone(), self.client_id.clone(), self.outbound.clone());
        self.room = Some(room_id.clone());
        self.refresh_room_gauge();

        if first_join {
            info!(room_id = %room_id, client_id = %self.client_id, "Client joined room");
            self.broadcast(
                &room_id,
                ServerEvent::PeerJoined(ClientRef {
                    client_id: self.client_id.clone(),
                }),
            );
        }

        let producers = room
            .producers()
            .await
            .into_iter()
            .map(|p| ProducerSummary {
                producer_id: p.id,
                kind: p.kind,
                client_id: p.owner,
            })
            .collect();

        Ok(JoinResponse { room_id, producers })
    }

    pub(super) async fn exit(&mut self, req: ExitRequest) {
        if let Some(room_id) = &req.room_id {
            if self.room.as_ref() != Some(room_id) {
                warn!(
                    room_id = %room_id,
                    client_id = %self.client_id,
                    "Exit for a room this client is not in"
                );
                return;
            }
        }
        self.leave_room(ServerEvent::PeerLeft).await;
    }

    pub(super) async fn get_capabilities(&self) -> Result<Value> {
        Ok(self.gateway.engine.rtp_capabilities().await?)
    }

    pub(super) async fn create_transport(
        &self,
        req: CreateTransportRequest,
    ) -> Result<TransportCreated> {
        let room_id = self.joined(&req.room_id)?;
        // Cleanup may have deleted the room since join; the client re-joins
        if self.gateway.registry.get_room(&room_id).is_none() {
            return Err(Error::room_not_found(&room_id));
        }

        let params = self
            .gateway
            .engine
            .create_transport(req.direction, &self.client_id)
            .await?;

        let record = TransportRecord {
            id: params.id.clone(),
            owner: self.client_id.clone(),
            direction: req.direction,
        };
        if let Err(e) = self.gateway.registry.add_transport(&room_id, record).await {
            self.close_orphan(EngineResource::Transport(params.id.clone()))
                .await;
            return Err(e);
        }

        info!(
            room_id = %room_id,
            client_id = %self.client_id,
            transport_id = %params.id,
            direction = %req.direction,
            "Transport created"
        );
        Ok(params)
    }

    pub(super) async fn connect_transport(
        &self,
        req: ConnectTransportRequest,
    ) -> Result<TransportConnected> {
        let room_id = self.joined(&req.room_id)?;
        let transport = self.own_transport(&room_id, &req.transport_id, None).await?;

        self.gateway
            .engine
            .connect_transport(&transport.id, req.dtls_parameters)
            .await?;

        Ok(TransportConnected {
            transport_id: transport.id,
        })
    }

    pub(super) async fn produce(&self, req: ProduceRequest) -> Result<Produced> {
        let room_id = self.joined(&req.room_id)?;
        let transport = self
            .own_transport(&room_id, &req.transport_id, Some(TransportDirection::Send))
            .await?;

        let producer_id = self
            .gateway
            .engine
            .create_producer(&transport.id, req.kind, req.rtp_parameters)
            .await?;

        let record = ProducerRecord {
            id: producer_id.clone(),
            owner: transport.owner.clone(),
            kind: req.kind,
            transport_id: transport.id,
        };
        if let Err(e) = self.gateway.registry.add_producer(&room_id, record).await {
            self.close_orphan(EngineResource::Producer(producer_id)).await;
            return Err(e);
        }

        info!(
            room_id = %room_id,
            client_id = %self.client_id,
            producer_id = %producer_id,
            kind = %req.kind,
            "Producer created"
        );
        self.broadcast(
            &room_id,
            ServerEvent::NewProducer(ProducerSummary {
                producer_id: producer_id.clone(),
                kind: req.kind,
                client_id: transport.owner,
            }),
        );

        Ok(Produced { producer_id })
    }

    pub(super) async fn consume(&self, req: ConsumeRequest) -> Result<Consumed> {
        let room_id = self.joined(&req.room_id)?;
        let registry = &self.gateway.registry;

        let (transport, producer) = tokio::join!(
            self.own_transport(&room_id, &req.transport_id, Some(TransportDirection::Recv)),
            registry.get_producer(&room_id, &req.producer_id),
        );
        let transport = transport?;
        let producer = producer.ok_or_else(|| Error::producer_not_found(&req.producer_id))?;

        let engine = &self.gateway.engine;
        let consumer = engine
            .create_consumer(&transport.id, &producer.id, req.rtp_capabilities)
            .await?;

        // Consumers start paused; resume before the client learns about it
        if let Err(e) = engine.resume_consumer(&consumer.id).await {
            self.close_orphan(EngineResource::Consumer(consumer.id)).await;
            return Err(e.into());
        }

        Ok(Consumed {
            consumer_id: consumer.id,
            producer_id: consumer.producer_id,
            kind: consumer.kind,
            rtp_parameters: consumer.rtp_parameters,
        })
    }
}
