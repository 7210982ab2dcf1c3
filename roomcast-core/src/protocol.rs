//! Signaling wire protocol.
//!
//! Every frame is a JSON text message `{"event": <name>, "data": <payload>}`.
//! A request named `x` is answered by exactly one of `xSuccess` or `xError`.

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::{Error, Result};
use crate::models::{ClientId, MediaKind, ProducerId, RoomId, TransportDirection, TransportId};

pub const SUCCESS_SUFFIX: &str = "Success";
pub const ERROR_SUFFIX: &str = "Error";

/// One named event with its payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub event: String,
    #[serde(default)]
    pub data: Value,
}

/// Terminal outcome carried by a response event name
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Error,
}

impl Envelope {
    pub fn new(event: impl Into<String>, data: Value) -> Self {
        Self {
            event: event.into(),
            data,
        }
    }

    #[must_use]
    pub fn success(kind: RequestKind, data: Value) -> Self {
        Self::new(kind.success_event(), data)
    }

    /// `<event>Error` for any event name, including unknown ones
    #[must_use]
    pub fn failure(event: &str, error: &Error) -> Self {
        Self::new(
            format!("{event}{ERROR_SUFFIX}"),
            json!(error.to_payload()),
        )
    }

    pub fn from_text(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }

    pub fn to_text(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    /// Split a response event name into its request name and outcome.
    /// Returns `None` for anything that is not `<name>Success`/`<name>Error`.
    #[must_use]
    pub fn outcome(&self) -> Option<(&str, Outcome)> {
        if let Some(base) = self.event.strip_suffix(SUCCESS_SUFFIX) {
            (!base.is_empty()).then_some((base, Outcome::Success))
        } else if let Some(base) = self.event.strip_suffix(ERROR_SUFFIX) {
            (!base.is_empty()).then_some((base, Outcome::Error))
        } else {
            None
        }
    }
}

/// Closed set of client-to-server events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestKind {
    Join,
    Exit,
    GetCapabilities,
    CreateTransport,
    ConnectTransport,
    Produce,
    Consume,
}

impl RequestKind {
    pub const ALL: [Self; 7] = [
        Self::Join,
        Self::Exit,
        Self::GetCapabilities,
        Self::CreateTransport,
        Self::ConnectTransport,
        Self::Produce,
        Self::Consume,
    ];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Join => "join",
            Self::Exit => "exit",
            Self::GetCapabilities => "getCapabilities",
            Self::CreateTransport => "createTransport",
            Self::ConnectTransport => "connectTransport",
            Self::Produce => "produce",
            Self::Consume => "consume",
        }
    }

    #[must_use]
    pub fn from_event(event: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == event)
    }

    #[must_use]
    pub fn success_event(self) -> String {
        format!("{}{SUCCESS_SUFFIX}", self.as_str())
    }

    /// `exit` is fire-and-forget; everything else gets one terminal event
    #[must_use]
    pub const fn expects_reply(self) -> bool {
        !matches!(self, Self::Exit)
    }
}

impl std::fmt::Display for RequestKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// Request payloads

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinRequest {
    pub room_id: RoomId,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExitRequest {
    #[serde(default)]
    pub room_id: Option<RoomId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTransportRequest {
    pub room_id: RoomId,
    pub direction: TransportDirection,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectTransportRequest {
    pub room_id: RoomId,
    pub transport_id: TransportId,
    pub dtls_parameters: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProduceRequest {
    pub room_id: RoomId,
    pub transport_id: TransportId,
    pub kind: MediaKind,
    pub rtp_parameters: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsumeRequest {
    pub room_id: RoomId,
    pub transport_id: TransportId,
    pub producer_id: ProducerId,
    pub rtp_capabilities: Value,
}

// Success payloads

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProducerSummary {
    pub producer_id: ProducerId,
    pub kind: MediaKind,
    pub client_id: ClientId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinResponse {
    pub room_id: RoomId,
    pub producers: Vec<ProducerSummary>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransportConnected {
    pub transport_id: TransportId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Produced {
    pub producer_id: ProducerId,
}

pub use crate::engine::TransportParameters as TransportCreated;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Consumed {
    pub consumer_id: crate::models::ConsumerId,
    pub producer_id: ProducerId,
    pub kind: MediaKind,
    pub rtp_parameters: Value,
}

/// A decoded client request
#[derive(Debug, Clone, PartialEq)]
pub enum Request {
    Join(JoinRequest),
    Exit(ExitRequest),
    GetCapabilities,
    CreateTransport(CreateTransportRequest),
    ConnectTransport(ConnectTransportRequest),
    Produce(ProduceRequest),
    Consume(ConsumeRequest),
}

fn decode<T: DeserializeOwned>(kind: RequestKind, data: &Value) -> Result<T> {
    serde_json::from_value(data.clone())
        .map_err(|e| Error::validation(format!("invalid {kind} payload: {e}")))
}

fn require_room(kind: RequestKind, room_id: &RoomId) -> Result<()> {
    if room_id.is_empty() {
        return Err(Error::validation(format!("{kind}: roomId must not be empty")));
    }
    Ok(())
}

impl Request {
    /// Decode an inbound envelope. Unknown event names and malformed payloads
    /// are validation errors.
    pub fn parse(envelope: &Envelope) -> Result<Self> {
        let kind = RequestKind::from_event(&envelope.event)
            .ok_or_else(|| Error::validation(format!("unknown event: {}", envelope.event)))?;
        let data = &envelope.data;

        let request = match kind {
            RequestKind::Join => Self::Join(decode(kind, data)?),
            RequestKind::Exit => {
                if data.is_null() {
                    Self::Exit(ExitRequest::default())
                } else {
                    Self::Exit(decode(kind, data)?)
                }
            }
            RequestKind::GetCapabilities => Self::GetCapabilities,
            RequestKind::CreateTransport => Self::CreateTransport(decode(kind, data)?),
            RequestKind::ConnectTransport => Self::ConnectTransport(decode(kind, data)?),
            RequestKind::Produce => Self::Produce(decode(kind, data)?),
            RequestKind::Consume => Self::Consume(decode(kind, data)?),
        };

        if let Some(room_id) = request.room_id() {
            require_room(kind, room_id)?;
        }
        Ok(request)
    }

    #[must_use]
    pub const fn kind(&self) -> RequestKind {
        match self {
            Self::Join(_) => RequestKind::Join,
            Self::Exit(_) => RequestKind::Exit,
            Self::GetCapabilities => RequestKind::GetCapabilities,
            Self::CreateTransport(_) => RequestKind::CreateTransport,
            Self::ConnectTransport(_) => RequestKind::ConnectTransport,
            Self::Produce(_) => RequestKind::Produce,
            Self::Consume(_) => RequestKind::Consume,
        }
    }

    #[must_use]
    pub fn room_id(&self) -> Option<&RoomId> {
        match self {
            Self::Join(r) => Some(&r.room_id),
            Self::Exit(r) => r.room_id.as_ref(),
            Self::GetCapabilities => None,
            Self::CreateTransport(r) => Some(&r.room_id),
            Self::ConnectTransport(r) => Some(&r.room_id),
            Self::Produce(r) => Some(&r.room_id),
            Self::Consume(r) => Some(&r.room_id),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientRef {
    pub client_id: ClientId,
}

/// Server-initiated events that are not responses to a request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum ServerEvent {
    /// Sent once to a new connection
    Connected(ClientRef),
    PeerJoined(ClientRef),
    NewProducer(ProducerSummary),
    PeerLeft(ClientRef),
    ClientDisconnected(ClientRef),
}

impl ServerEvent {
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Connected(_) => "connected",
            Self::PeerJoined(_) => "peerJoined",
            Self::NewProducer(_) => "newProducer",
            Self::PeerLeft(_) => "peerLeft",
            Self::ClientDisconnected(_) => "clientDisconnected",
        }
    }

    #[must_use]
    pub fn into_envelope(self) -> Envelope {
        let name = self.name();
        let data = match self {
            Self::Connected(r)
            | Self::PeerJoined(r)
            | Self::PeerLeft(r)
            | Self::ClientDisconnected(r) => json!({ "clientId": r.client_id }),
            Self::NewProducer(p) => json!({
                "producerId": p.producer_id,
                "kind": p.kind,
                "clientId": p.client_id,
            }),
        };
        Envelope::new(name, data)
    }

    /// Decode a broadcast envelope, `None` if it is not a known server event
    #[must_use]
    pub fn from_envelope(envelope: &Envelope) -> Option<Self> {
        serde_json::from_value(json!({ "event": envelope.event, "data": envelope.data })).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_produce() {
        let envelope = Envelope::new(
            "produce",
            json!({
                "roomId": "r1",
                "transportId": "t1",
                "kind": "video",
                "rtpParameters": {"codecs": []}
            }),
        );
        let request = Request::parse(&envelope).unwrap();
        assert_eq!(request.kind(), RequestKind::Produce);
        assert_eq!(request.room_id().map(RoomId::as_str), Some("r1"));
        match request {
            Request::Produce(p) => {
                assert_eq!(p.kind, MediaKind::Video);
                assert_eq!(p.rtp_parameters, json!({"codecs": []}));
            }
            other => panic!("unexpected request: {other:?}"),
        }
    }

    #[test]
    fn test_unknown_event_is_validation_error() {
        let err = Request::parse(&Envelope::new("teleport", Value::Null)).unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn test_missing_field_is_validation_error() {
        let envelope = Envelope::new("createTransport", json!({"roomId": "r1"}));
        let err = Request::parse(&envelope).unwrap_err();
        assert!(matches!(err, Error::Validation(ref m) if m.contains("createTransport")));
    }

    #[test]
    fn test_empty_room_rejected() {
        let envelope = Envelope::new("join", json!({"roomId": ""}));
        assert!(matches!(Request::parse(&envelope), Err(Error::Validation(_))));
    }

    #[test]
    fn test_exit_without_payload() {
        let request = Request::parse(&Envelope::new("exit", Value::Null)).unwrap();
        assert_eq!(request, Request::Exit(ExitRequest::default()));
        assert!(!request.kind().expects_reply());
    }

    #[test]
    fn test_outcome_split() {
        let env = Envelope::new("joinSuccess", Value::Null);
        assert_eq!(env.outcome(), Some(("join", Outcome::Success)));

        let env = Envelope::new("consumeError", Value::Null);
        assert_eq!(env.outcome(), Some(("consume", Outcome::Error)));

        assert_eq!(Envelope::new("newProducer", Value::Null).outcome(), None);
        assert_eq!(Envelope::new("Error", Value::Null).outcome(), None);
    }

    #[test]
    fn test_server_event_envelope_shape() {
        let event = ServerEvent::NewProducer(ProducerSummary {
            producer_id: ProducerId::from("p1"),
            kind: MediaKind::Audio,
            client_id: ClientId::from("c1"),
        });
        let envelope = event.clone().into_envelope();
        assert_eq!(envelope.event, "newProducer");
        assert_eq!(
            envelope.data,
            json!({"producerId": "p1", "kind": "audio", "clientId": "c1"})
        );
        assert_eq!(ServerEvent::from_envelope(&envelope), Some(event));
    }

    #[test]
    fn test_failure_envelope() {
        let env = Envelope::failure("consume", &Error::producer_not_found(&ProducerId::from("p1")));
        assert_eq!(env.event, "consumeError");
        assert_eq!(env.data["code"], "producerNotFound");
    }
}
