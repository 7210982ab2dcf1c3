//! In-process media engine.
//!
//! Keeps transport/producer/consumer bookkeeping and negotiates parameters
//! the way a real SFU worker would, without moving any RTP. Used by the
//! `serve` binary for development and by the test suites.

use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::{json, Map, Value};
use sha2::{Digest, Sha256};
use tracing::debug;
use uuid::Uuid;

use super::{
    ConsumerParameters, EngineError, EngineResource, EngineResult, MediaEngine,
    TransportParameters,
};
use crate::config::{EngineConfig, ListenIpConfig};
use crate::models::{ClientId, ConsumerId, MediaKind, ProducerId, TransportDirection, TransportId};

const FIRST_DYNAMIC_PAYLOAD_TYPE: u8 = 100;
const UDP_PRIORITY: u32 = 1_076_302_079;
const TCP_PRIORITY: u32 = 1_076_276_479;

#[derive(Debug, Clone)]
struct RouterCodec {
    kind: MediaKind,
    mime_type: String,
    clock_rate: u32,
    channels: Option<u8>,
    payload_type: u8,
}

impl RouterCodec {
    fn to_capability(&self) -> Value {
        let mut codec = Map::new();
        codec.insert("kind".into(), json!(self.kind));
        codec.insert("mimeType".into(), json!(self.mime_type));
        codec.insert("clockRate".into(), json!(self.clock_rate));
        if let Some(channels) = self.channels {
            codec.insert("channels".into(), json!(channels));
        }
        codec.insert("preferredPayloadType".into(), json!(self.payload_type));
        Value::Object(codec)
    }
}

#[derive(Debug)]
struct TransportState {
    owner: ClientId,
    direction: TransportDirection,
    connected: bool,
}

#[derive(Debug)]
struct ProducerState {
    transport_id: TransportId,
    kind: MediaKind,
    codec: RouterCodec,
}

#[derive(Debug)]
struct ConsumerState {
    transport_id: TransportId,
    producer_id: ProducerId,
    paused: bool,
}

pub struct LocalEngine {
    codecs: Vec<RouterCodec>,
    listen_ips: Vec<ListenIpConfig>,
    enable_udp: bool,
    enable_tcp: bool,
    min_port: u16,
    max_port: u16,
    next_port: AtomicU32,
    next_mid: AtomicU32,
    transports: DashMap<TransportId, TransportState>,
    producers: DashMap<ProducerId, ProducerState>,
    consumers: DashMap<ConsumerId, ConsumerState>,
}

impl LocalEngine {
    #[must_use]
    pub fn new(config: &EngineConfig) -> Self {
        let codecs = config
            .media_codecs
            .iter()
            .zip(FIRST_DYNAMIC_PAYLOAD_TYPE..)
            .map(|(codec, payload_type)| RouterCodec {
                kind: codec.kind,
                mime_type: codec.mime_type.clone(),
                clock_rate: codec.clock_rate,
                channels: codec.channels,
                payload_type,
            })
            .collect();

        Self {
            codecs,
            listen_ips: config.listen_ips.clone(),
            enable_udp: config.enable_udp,
            enable_tcp: config.enable_tcp,
            min_port: config.min_port,
            max_port: config.max_port.max(config.min_port),
            next_port: AtomicU32::new(0),
            next_mid: AtomicU32::new(0),
            transports: DashMap::new(),
            producers: DashMap::new(),
            consumers: DashMap::new(),
        }
    }

    #[must_use]
    pub fn transport_count(&self) -> usize {
        self.transports.len()
    }

    #[must_use]
    pub fn producer_count(&self) -> usize {
        self.producers.len()
    }

    #[must_use]
    pub fn consumer_count(&self) -> usize {
        self.consumers.len()
    }

    #[must_use]
    pub fn transport_owner(&self, transport_id: &TransportId) -> Option<ClientId> {
        self.transports.get(transport_id).map(|t| t.owner.clone())
    }

    #[must_use]
    pub fn is_consumer_paused(&self, consumer_id: &ConsumerId) -> Option<bool> {
        self.consumers.get(consumer_id).map(|c| c.paused)
    }

    fn allocate_port(&self) -> u16 {
        let span = u32::from(self.max_port - self.min_port) + 1;
        let offset = self.next_port.fetch_add(1, Ordering::Relaxed) % span;
        u16::try_from(u32::from(self.min_port) + offset).unwrap_or(self.max_port)
    }

    fn ice_candidates(&self, port: u16) -> Vec<Value> {
        let mut candidates = Vec::new();
        for (index, listen) in self.listen_ips.iter().enumerate() {
            let address = listen.announced_ip.as_deref().unwrap_or(&listen.ip);
            if self.enable_udp {
                candidates.push(json!({
                    "foundation": format!("udpcandidate{index}"),
                    "priority": UDP_PRIORITY,
                    "ip": address,
                    "address": address,
                    "protocol": "udp",
                    "port": port,
                    "type": "host",
                }));
            }
            if self.enable_tcp {
                candidates.push(json!({
                    "foundation": format!("tcpcandidate{index}"),
                    "priority": TCP_PRIORITY,
                    "ip": address,
                    "address": address,
                    "protocol": "tcp",
                    "port": port,
                    "type": "host",
                    "tcpType": "passive",
                }));
            }
        }
        candidates
    }

    fn producer_codec(&self, kind: MediaKind, rtp_parameters: &Value) -> EngineResult<RouterCodec> {
        let first = rtp_parameters
            .get("codecs")
            .and_then(Value::as_array)
            .and_then(|codecs| codecs.first())
            .ok_or_else(|| EngineError::new("rtpParameters.codecs must be a non-empty array"))?;

        let mime_type = first
            .get("mimeType")
            .and_then(Value::as_str)
            .ok_or_else(|| EngineError::new("rtpParameters codec is missing mimeType"))?;

        if !kind.matches_mime_type(mime_type) {
            return Err(EngineError::new(format!(
                "codec {mime_type} does not match producer kind {kind}"
            )));
        }

        let clock_rate = first.get("clockRate").and_then(Value::as_u64);
        self.codecs
            .iter()
            .find(|codec| {
                codec.kind == kind
                    && codec.mime_type.eq_ignore_ascii_case(mime_type)
                    && clock_rate.map_or(true, |rate| rate == u64::from(codec.clock_rate))
            })
            .cloned()
            .ok_or_else(|| EngineError::new(format!("unsupported codec [mimeType:{mime_type}]")))
    }
}

fn dtls_fingerprint(seed: &Uuid) -> String {
    Sha256::digest(seed.as_bytes())
        .iter()
        .map(|b| format!("{b:02X}"))
        .collect::<Vec<_>>()
        .join(":")
}

fn validate_dtls(dtls_parameters: &Value) -> EngineResult<()> {
    let fingerprints = dtls_parameters
        .get("fingerprints")
        .and_then(Value::as_array)
        .filter(|f| !f.is_empty())
        .ok_or_else(|| EngineError::new("dtlsParameters.fingerprints must be a non-empty array"))?;

    for fingerprint in fingerprints {
        let valid = fingerprint.get("algorithm").and_then(Value::as_str).is_some()
            && fingerprint.get("value").and_then(Value::as_str).is_some();
        if !valid {
            return Err(EngineError::new("invalid DTLS fingerprint"));
        }
    }

    match dtls_parameters.get("role").and_then(Value::as_str) {
        None | Some("auto" | "client" | "server") => Ok(()),
        Some(role) => Err(EngineError::new(format!("invalid DTLS role: {role}"))),
    }
}

fn ssrc_from(id: &Uuid) -> u32 {
    let b = id.as_bytes();
    u32::from_be_bytes([b[0], b[1], b[2], b[3]])
}

#[async_trait]
impl MediaEngine for LocalEngine {
    async fn rtp_capabilities(&self) -> EngineResult<Value> {
        let codecs: Vec<Value> = self.codecs.iter().map(RouterCodec::to_capability).collect();
        Ok(json!({ "codecs": codecs, "headerExtensions": [] }))
    }

    async fn create_transport(
        &self,
        direction: TransportDirection,
        owner: &ClientId,
    ) -> EngineResult<TransportParameters> {
        let uuid = Uuid::new_v4();
        let id = TransportId::from(uuid.to_string());
        let secret = Uuid::new_v4().simple().to_string();
        let port = self.allocate_port();

        let params = TransportParameters {
            id: id.clone(),
            ice_parameters: json!({
                "usernameFragment": &secret[..16],
                "password": &secret,
                "iceLite": true,
            }),
            ice_candidates: self.ice_candidates(port),
            dtls_parameters: json!({
                "role": "auto",
                "fingerprints": [
                    { "algorithm": "sha-256", "value": dtls_fingerprint(&uuid) }
                ],
            }),
        };

        self.transports.insert(
            id,
            TransportState {
                owner: owner.clone(),
                direction,
                connected: false,
            },
        );
        debug!(transport_id = %params.id, client_id = %owner, %direction, "transport created");
        Ok(params)
    }

    async fn connect_transport(
        &self,
        transport_id: &TransportId,
        dtls_parameters: Value,
    ) -> EngineResult<()> {
        validate_dtls(&dtls_parameters)?;

        let mut transport = self
            .transports
            .get_mut(transport_id)
            .ok_or_else(|| EngineError::new(format!("transport {transport_id} not found")))?;
        if transport.connected {
            return Err(EngineError::new("connect() already called"));
        }
        transport.connected = true;
        Ok(())
    }

    async fn create_producer(
        &self,
        transport_id: &TransportId,
        kind: MediaKind,
        rtp_parameters: Value,
    ) -> EngineResult<ProducerId> {
        let direction = self
            .transports
            .get(transport_id)
            .map(|t| t.direction)
            .ok_or_else(|| EngineError::new(format!("transport {transport_id} not found")))?;
        if direction != TransportDirection::Send {
            return Err(EngineError::new(format!(
                "transport {transport_id} is not a send transport"
            )));
        }

        let codec = self.producer_codec(kind, &rtp_parameters)?;
        let id = ProducerId::from(Uuid::new_v4().to_string());
        self.producers.insert(
            id.clone(),
            ProducerState {
                transport_id: transport_id.clone(),
                kind,
                codec,
            },
        );
        Ok(id)
    }

    async fn create_consumer(
        &self,
        transport_id: &TransportId,
        producer_id: &ProducerId,
        rtp_capabilities: Value,
    ) -> EngineResult<ConsumerParameters> {
        let direction = self
            .transports
            .get(transport_id)
            .map(|t| t.direction)
            .ok_or_else(|| EngineError::new(format!("transport {transport_id} not found")))?;
        if direction != TransportDirection::Recv {
            return Err(EngineError::new(format!(
                "transport {transport_id} is not a receive transport"
            )));
        }

        let (kind, codec) = self
            .producers
            .get(producer_id)
            .map(|p| (p.kind, p.codec.clone()))
            .ok_or_else(|| EngineError::new(format!("producer {producer_id} not found")))?;

        let matching = rtp_capabilities
            .get("codecs")
            .and_then(Value::as_array)
            .and_then(|codecs| {
                codecs.iter().find(|c| {
                    c.get("mimeType")
                        .and_then(Value::as_str)
                        .is_some_and(|m| m.eq_ignore_ascii_case(&codec.mime_type))
                        && c.get("clockRate").and_then(Value::as_u64)
                            == Some(u64::from(codec.clock_rate))
                })
            })
            .ok_or_else(|| {
                EngineError::new(format!(
                    "cannot consume producer {producer_id} with the given RTP capabilities"
                ))
            })?;

        let payload_type = matching
            .get("preferredPayloadType")
            .and_then(Value::as_u64)
            .unwrap_or(u64::from(codec.payload_type));

        let uuid = Uuid::new_v4();
        let id = ConsumerId::from(uuid.to_string());
        let mid = self.next_mid.fetch_add(1, Ordering::Relaxed);

        let mut consumer_codec = Map::new();
        consumer_codec.insert("mimeType".into(), json!(codec.mime_type));
        consumer_codec.insert("clockRate".into(), json!(codec.clock_rate));
        if let Some(channels) = codec.channels {
            consumer_codec.insert("channels".into(), json!(channels));
        }
        consumer_codec.insert("payloadType".into(), json!(payload_type));

        let rtp_parameters = json!({
            "mid": mid.to_string(),
            "codecs": [Value::Object(consumer_codec)],
            "encodings": [{ "ssrc": ssrc_from(&uuid) }],
            "rtcp": { "cname": format!("roomcast-{producer_id}"), "reducedSize": true },
        });

        self.consumers.insert(
            id.clone(),
            ConsumerState {
                transport_id: transport_id.clone(),
                producer_id: producer_id.clone(),
                paused: true,
            },
        );

        Ok(ConsumerParameters {
            id,
            producer_id: producer_id.clone(),
            kind,
            rtp_parameters,
        })
    }

    async fn resume_consumer(&self, consumer_id: &ConsumerId) -> EngineResult<()> {
        let mut consumer = self
            .consumers
            .get_mut(consumer_id)
            .ok_or_else(|| EngineError::new(format!("consumer {consumer_id} not found")))?;
        consumer.paused = false;
        Ok(())
    }

    async fn close(&self, resource: EngineResource) -> EngineResult<()> {
        match &resource {
            EngineResource::Transport(id) => {
                if self.transports.remove(id).is_none() {
                    return Ok(());
                }
                let hosted: Vec<ProducerId> = self
                    .producers
                    .iter()
                    .filter(|p| &p.transport_id == id)
                    .map(|p| p.key().clone())
                    .collect();
                for producer_id in &hosted {
                    self.producers.remove(producer_id);
                }
                self.consumers.retain(|_, c| {
                    &c.transport_id != id && !hosted.contains(&c.producer_id)
                });
            }
            EngineResource::Producer(id) => {
                if self.producers.remove(id).is_some() {
                    self.consumers.retain(|_, c| &c.producer_id != id);
                }
            }
            EngineResource::Consumer(id) => {
                self.consumers.remove(id);
            }
        }
        debug!(%resource, "engine resource closed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine() -> LocalEngine {
        LocalEngine::new(&EngineConfig::default())
    }

    fn dtls() -> Value {
        json!({
            "role": "client",
            "fingerprints": [{ "algorithm": "sha-256", "value": "AB:CD:EF" }]
        })
    }

    fn vp8() -> Value {
        json!({
            "codecs": [{ "mimeType": "video/VP8", "clockRate": 90000, "payloadType": 96 }],
            "encodings": [{ "ssrc": 1111 }]
        })
    }

    #[tokio::test]
    async fn test_capabilities_follow_config() {
        let caps = engine().rtp_capabilities().await.unwrap();
        let codecs = caps["codecs"].as_array().unwrap();
        assert_eq!(codecs.len(), 2);
        assert_eq!(codecs[0]["mimeType"], "audio/opus");
        assert_eq!(codecs[0]["channels"], 2);
        assert_eq!(codecs[1]["mimeType"], "video/VP8");
        assert!(codecs[1].get("channels").is_none());
    }

    #[tokio::test]
    async fn test_transport_parameters() {
        let engine = engine();
        let owner = ClientId::from("c1");
        let params = engine
            .create_transport(TransportDirection::Send, &owner)
            .await
            .unwrap();

        assert_eq!(params.ice_parameters["iceLite"], true);
        assert_eq!(params.ice_parameters["usernameFragment"].as_str().unwrap().len(), 16);
        // one UDP + one TCP candidate for the single default listen ip
        assert_eq!(params.ice_candidates.len(), 2);
        let port = params.ice_candidates[0]["port"].as_u64().unwrap();
        assert!((40000..=49999).contains(&port));

        let fingerprint = params.dtls_parameters["fingerprints"][0]["value"]
            .as_str()
            .unwrap();
        assert_eq!(fingerprint.split(':').count(), 32);
        assert_eq!(engine.transport_owner(&params.id), Some(owner));
    }

    #[tokio::test]
    async fn test_connect_only_once() {
        let engine = engine();
        let params = engine
            .create_transport(TransportDirection::Send, &ClientId::from("c1"))
            .await
            .unwrap();

        assert!(engine.connect_transport(&params.id, json!({})).await.is_err());
        engine.connect_transport(&params.id, dtls()).await.unwrap();
        let err = engine.connect_transport(&params.id, dtls()).await.unwrap_err();
        assert!(err.0.contains("already"));
    }

    #[tokio::test]
    async fn test_produce_consume_and_resume() {
        let engine = engine();
        let send = engine
            .create_transport(TransportDirection::Send, &ClientId::from("a"))
            .await
            .unwrap();
        let recv = engine
            .create_transport(TransportDirection::Recv, &ClientId::from("b"))
            .await
            .unwrap();

        let producer_id = engine
            .create_producer(&send.id, MediaKind::Video, vp8())
            .await
            .unwrap();

        let caps = engine.rtp_capabilities().await.unwrap();
        let consumer = engine
            .create_consumer(&recv.id, &producer_id, caps)
            .await
            .unwrap();

        assert_eq!(consumer.kind, MediaKind::Video);
        assert_eq!(consumer.producer_id, producer_id);
        assert_eq!(consumer.rtp_parameters["codecs"][0]["payloadType"], 101);
        assert_eq!(engine.is_consumer_paused(&consumer.id), Some(true));

        engine.resume_consumer(&consumer.id).await.unwrap();
        assert_eq!(engine.is_consumer_paused(&consumer.id), Some(false));
    }

    #[tokio::test]
    async fn test_producer_codec_validation() {
        let engine = engine();
        let send = engine
            .create_transport(TransportDirection::Send, &ClientId::from("a"))
            .await
            .unwrap();

        let h264 = json!({ "codecs": [{ "mimeType": "video/H264", "clockRate": 90000 }] });
        let err = engine
            .create_producer(&send.id, MediaKind::Video, h264)
            .await
            .unwrap_err();
        assert_eq!(err.0, "unsupported codec [mimeType:video/H264]");

        let err = engine
            .create_producer(&send.id, MediaKind::Audio, vp8())
            .await
            .unwrap_err();
        assert!(err.0.contains("does not match"));
    }

    #[tokio::test]
    async fn test_incompatible_capabilities() {
        let engine = engine();
        let send = engine
            .create_transport(TransportDirection::Send, &ClientId::from("a"))
            .await
            .unwrap();
        let recv = engine
            .create_transport(TransportDirection::Recv, &ClientId::from("b"))
            .await
            .unwrap();
        let producer_id = engine
            .create_producer(&send.id, MediaKind::Video, vp8())
            .await
            .unwrap();

        let audio_only = json!({ "codecs": [{ "mimeType": "audio/opus", "clockRate": 48000 }] });
        let err = engine
            .create_consumer(&recv.id, &producer_id, audio_only)
            .await
            .unwrap_err();
        assert!(err.0.starts_with("cannot consume"));
    }

    #[tokio::test]
    async fn test_close_cascades() {
        let engine = engine();
        let send = engine
            .create_transport(TransportDirection::Send, &ClientId::from("a"))
            .await
            .unwrap();
        let recv = engine
            .create_transport(TransportDirection::Recv, &ClientId::from("b"))
            .await
            .unwrap();
        let producer_id = engine
            .create_producer(&send.id, MediaKind::Video, vp8())
            .await
            .unwrap();
        let caps = engine.rtp_capabilities().await.unwrap();
        engine
            .create_consumer(&recv.id, &producer_id, caps)
            .await
            .unwrap();
        assert_eq!(engine.consumer_count(), 1);

        engine
            .close(EngineResource::Transport(send.id.clone()))
            .await
            .unwrap();
        assert_eq!(engine.producer_count(), 0);
        assert_eq!(engine.consumer_count(), 0);
        assert_eq!(engine.transport_count(), 1);

        // unknown and repeated ids are fine
        engine.close(EngineResource::Transport(send.id)).await.unwrap();
        engine
            .close(EngineResource::Consumer(ConsumerId::from("nope")))
            .await
            .unwrap();
    }
}
