//! Cascading teardown of a client's media resources

use crate::registry::SessionRegistry;
use roomcast_core::engine::{EngineResource, MediaEngine};
use roomcast_core::models::{ClientId, RoomId};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CleanupReport {
    pub transports_closed: usize,
    pub producers_closed: usize,
    pub room_deleted: bool,
}

pub struct LifecycleManager {
    registry: Arc<SessionRegistry>,
    engine: Arc<dyn MediaEngine>,
}

impl LifecycleManager {
    pub fn new(registry: Arc<SessionRegistry>, engine: Arc<dyn MediaEngine>) -> Self {
        Self { registry, engine }
    }

    /// Release everything `client_id` owns in `room_id`.
    ///
    /// Registry removal happens first, under the room lock; engine closes run
    /// afterwards so a slow engine never holds up the room. Engine failures
    /// are logged and otherwise ignored. Safe to call repeatedly.
    pub async fn cleanup_client_resources(
        &self,
        room_id: &RoomId,
        client_id: &ClientId,
    ) -> CleanupReport {
        let Some(removed) = self.registry.remove_owned_by(room_id, client_id).await else {
            debug!(room_id = %room_id, client_id = %client_id, "No room to clean up");
            return CleanupReport::default();
        };

        let mut report = CleanupReport {
            room_deleted: removed.room_deleted,
            ..CleanupReport::default()
        };

        for producer in removed.producers {
            match self.engine.close(EngineResource::Producer(producer.id.clone())).await {
                Ok(()) => report.producers_closed += 1,
                Err(e) => warn!(
                    room_id = %room_id,
                    producer_id = %producer.id,
                    error = %e,
                    "Failed to close producer"
                ),
            }
        }

        for transport in removed.transports {
            match self.engine.close(EngineResource::Transport(transport.id.clone())).await {
                Ok(()) => report.transports_closed += 1,
                Err(e) => warn!(
                    room_id = %room_id,
                    transport_id = %transport.id,
                    error = %e,
                    "Failed to close transport"
                ),
            }
        }

        info!(
            room_id = %room_id,
            client_id = %client_id,
            transports = report.transports_closed,
            producers = report.producers_closed,
            room_deleted = report.room_deleted,
            "Cleaned up client resources"
        );

        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::room::{ProducerRecord, TransportRecord};
    use async_trait::async_trait;
    use mockall::{mock, Sequence};
    use roomcast_core::engine::{ConsumerParameters, EngineError, EngineResult, TransportParameters};
    use roomcast_core::models::{ConsumerId, MediaKind, ProducerId, TransportDirection, TransportId};
    use serde_json::Value;

    mock! {
        pub Engine {}

        #[async_trait]
        impl MediaEngine for Engine {
            async fn rtp_capabilities(&self) -> EngineResult<Value>;
            async fn create_transport(
                &self,
                direction: TransportDirection,
                owner: &ClientId,
            ) -> EngineResult<TransportParameters>;
            async fn connect_transport(
                &self,
                transport_id: &TransportId,
                dtls_parameters: Value,
            ) -> EngineResult<()>;
            async fn create_producer(
                &self,
                transport_id: &TransportId,
                kind: MediaKind,
                rtp_parameters: Value,
            ) -> EngineResult<ProducerId>;
            async fn create_consumer(
                &self,
                transport_id: &TransportId,
                producer_id: &ProducerId,
                rtp_capabilities: Value,
            ) -> EngineResult<ConsumerParameters>;
            async fn resume_consumer(&self, consumer_id: &ConsumerId) -> EngineResult<()>;
            async fn close(&self, resource: EngineResource) -> EngineResult<()>;
        }
    }

    async fn seeded_registry(room_id: &RoomId) -> Arc<SessionRegistry> {
        let registry = Arc::new(SessionRegistry::new());
        registry.create_room(room_id);
        registry
            .add_transport(
                room_id,
                TransportRecord {
                    id: TransportId::from("ta"),
                    owner: ClientId::from("a"),
                    direction: TransportDirection::Send,
                },
            )
            .await
            .unwrap();
        registry
            .add_producer(
                room_id,
                ProducerRecord {
                    id: ProducerId::from("pa"),
                    owner: ClientId::from("a"),
                    kind: MediaKind::Audio,
                    transport_id: TransportId::from("ta"),
                },
            )
            .await
            .unwrap();
        registry
    }

    #[tokio::test]
    async fn test_closes_producers_before_transports() {
        let room_id = RoomId::from("r1");
        let registry = seeded_registry(&room_id).await;

        let mut engine = MockEngine::new();
        let mut seq = Sequence::new();
        engine
            .expect_close()
            .withf(|r| matches!(r, EngineResource::Producer(id) if id.as_str() == "pa"))
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(()));
        engine
            .expect_close()
            .withf(|r| matches!(r, EngineResource::Transport(id) if id.as_str() == "ta"))
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(()));

        let lifecycle = LifecycleManager::new(Arc::clone(&registry), Arc::new(engine));
        let report = lifecycle
            .cleanup_client_resources(&room_id, &ClientId::from("a"))
            .await;

        assert_eq!(
            report,
            CleanupReport {
                transports_closed: 1,
                producers_closed: 1,
                room_deleted: true,
            }
        );
        assert!(registry.get_room(&room_id).is_none());
    }

    #[tokio::test]
    async fn test_cleanup_is_idempotent() {
        let room_id = RoomId::from("r1");
        let registry = seeded_registry(&room_id).await;

        let mut engine = MockEngine::new();
        engine.expect_close().times(2).returning(|_| Ok(()));

        let lifecycle = LifecycleManager::new(registry, Arc::new(engine));
        let client = ClientId::from("a");
        lifecycle.cleanup_client_resources(&room_id, &client).await;
        let second = lifecycle.cleanup_client_resources(&room_id, &client).await;
        assert_eq!(second, CleanupReport::default());
    }

    #[tokio::test]
    async fn test_engine_failure_does_not_block_cleanup() {
        let room_id = RoomId::from("r1");
        let registry = seeded_registry(&room_id).await;

        let mut engine = MockEngine::new();
        engine
            .expect_close()
            .returning(|_| Err(EngineError::new("worker died")));

        let lifecycle = LifecycleManager::new(Arc::clone(&registry), Arc::new(engine));
        let report = lifecycle
            .cleanup_client_resources(&room_id, &ClientId::from("a"))
            .await;

        assert_eq!(report.producers_closed, 0);
        assert_eq!(report.transports_closed, 0);
        assert!(report.room_deleted);
        assert_eq!(registry.room_count(), 0);
    }

    #[tokio::test]
    async fn test_other_clients_untouched() {
        let room_id = RoomId::from("r1");
        let registry = seeded_registry(&room_id).await;

        // b owns nothing, so the engine must not be called
        let engine = MockEngine::new();
        let lifecycle = LifecycleManager::new(Arc::clone(&registry), Arc::new(engine));
        let report = lifecycle
            .cleanup_client_resources(&room_id, &ClientId::from("b"))
            .await;

        assert!(!report.room_deleted);
        assert_eq!(registry.list_producers(&room_id).await.unwrap().len(), 1);
    }
}
