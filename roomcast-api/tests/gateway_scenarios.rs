//! Gateway scenarios driven over in-process channels

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use roomcast_api::Gateway;
use roomcast_core::config::{EngineConfig, SignalingConfig};
use roomcast_core::models::{ClientId, ConsumerId, RoomId};
use roomcast_core::protocol::Envelope;
use roomcast_core::LocalEngine;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

const TIMEOUT: Duration = Duration::from_secs(2);

struct TestPeer {
    client_id: String,
    inbound: mpsc::Sender<Envelope>,
    outbound: mpsc::Receiver<Envelope>,
    backlog: VecDeque<Envelope>,
    task: JoinHandle<ClientId>,
}

impl TestPeer {
    async fn connect(gateway: &Arc<Gateway>) -> Self {
        let (in_tx, mut in_rx) = mpsc::channel::<Envelope>(32);
        let (out_tx, mut out_rx) = mpsc::channel::<Envelope>(64);
        let gw = Arc::clone(gateway);
        let task = tokio::spawn(async move { gw.run(&mut in_rx, out_tx).await });

        let hello = tokio::time::timeout(TIMEOUT, out_rx.recv())
            .await
            .expect("timed out waiting for connected")
            .expect("connection closed");
        assert_eq!(hello.event, "connected");
        let client_id = hello.data["clientId"].as_str().unwrap().to_string();

        Self {
            client_id,
            inbound: in_tx,
            outbound: out_rx,
            backlog: VecDeque::new(),
            task,
        }
    }

    async fn send(&self, event: &str, data: Value) {
        self.inbound.send(Envelope::new(event, data)).await.unwrap();
    }

    async fn read(&mut self) -> Envelope {
        tokio::time::timeout(TIMEOUT, self.outbound.recv())
            .await
            .expect("timed out waiting for a frame")
            .expect("connection closed")
    }

    /// Send a request and return its terminal outcome, keeping broadcasts
    async fn request(&mut self, event: &str, data: Value) -> Envelope {
        self.send(event, data).await;
        let success = format!("{event}Success");
        let error = format!("{event}Error");
        loop {
            let frame = self.read().await;
            if frame.event == success || frame.event == error {
                return frame;
            }
            self.backlog.push_back(frame);
        }
    }

    async fn ok(&mut self, event: &str, data: Value) -> Value {
        let reply = self.request(event, data).await;
        assert_eq!(reply.event, format!("{event}Success"), "payload: {}", reply.data);
        reply.data
    }

    async fn expect_event(&mut self, event: &str) -> Value {
        if let Some(pos) = self.backlog.iter().position(|e| e.event == event) {
            return self.backlog.remove(pos).unwrap().data;
        }
        loop {
            let frame = self.read().await;
            if frame.event == event {
                return frame.data;
            }
            self.backlog.push_back(frame);
        }
    }

    async fn disconnect(self) {
        drop(self.inbound);
        self.task.await.unwrap();
    }
}

fn setup() -> (Arc<Gateway>, Arc<LocalEngine>) {
    let engine = Arc::new(LocalEngine::new(&EngineConfig::default()));
    let gateway = Arc::new(Gateway::new(engine.clone(), SignalingConfig::default()));
    (gateway, engine)
}

fn dtls() -> Value {
    json!({ "role": "client", "fingerprints": [{ "algorithm": "sha-256", "value": "AA:BB" }] })
}

fn vp8() -> Value {
    json!({
        "codecs": [{ "mimeType": "video/VP8", "clockRate": 90000, "payloadType": 96 }],
        "encodings": [{ "ssrc": 2222 }]
    })
}

/// Join, create+connect a send transport and produce video
async fn publish(peer: &mut TestPeer, room: &str) -> (String, String) {
    let transport = peer
        .ok("createTransport", json!({ "roomId": room, "direction": "send" }))
        .await;
    let transport_id = transport["id"].as_str().unwrap().to_string();
    peer.ok(
        "connectTransport",
        json!({ "roomId": room, "transportId": transport_id, "dtlsParameters": dtls() }),
    )
    .await;
    let produced = peer
        .ok(
            "produce",
            json!({ "roomId": room, "transportId": transport_id, "kind": "video", "rtpParameters": vp8() }),
        )
        .await;
    (transport_id, produced["producerId"].as_str().unwrap().to_string())
}

#[tokio::test]
async fn test_join_produce_consume() {
    let (gateway, engine) = setup();
    let mut a = TestPeer::connect(&gateway).await;
    let mut b = TestPeer::connect(&gateway).await;

    let joined = a.ok("join", json!({ "roomId": "r1" })).await;
    assert_eq!(joined, json!({ "roomId": "r1", "producers": [] }));
    b.ok("join", json!({ "roomId": "r1" })).await;
    assert_eq!(a.expect_event("peerJoined").await["clientId"], b.client_id.as_str());

    let (_, producer_id) = publish(&mut a, "r1").await;

    let announced = b.expect_event("newProducer").await;
    assert_eq!(
        announced,
        json!({ "producerId": producer_id, "kind": "video", "clientId": a.client_id })
    );

    let caps = b.ok("getCapabilities", json!({})).await;
    let recv = b
        .ok("createTransport", json!({ "roomId": "r1", "direction": "recv" }))
        .await;
    let consumed = b
        .ok(
            "consume",
            json!({
                "roomId": "r1",
                "transportId": recv["id"],
                "producerId": producer_id,
                "rtpCapabilities": caps,
            }),
        )
        .await;

    assert_eq!(consumed["producerId"], producer_id.as_str());
    assert_eq!(consumed["kind"], "video");
    let consumer_id = ConsumerId::from(consumed["consumerId"].as_str().unwrap());
    assert_eq!(engine.is_consumer_paused(&consumer_id), Some(false));

    // the producer never hears its own announcement
    assert!(a.backlog.iter().all(|e| e.event != "newProducer"));
}

#[tokio::test]
async fn test_disconnect_cleans_up_and_notifies() {
    let (gateway, engine) = setup();
    let mut a = TestPeer::connect(&gateway).await;
    let mut b = TestPeer::connect(&gateway).await;
    a.ok("join", json!({ "roomId": "r1" })).await;
    b.ok("join", json!({ "roomId": "r1" })).await;

    let (_, producer_id) = publish(&mut a, "r1").await;
    let recv = b
        .ok("createTransport", json!({ "roomId": "r1", "direction": "recv" }))
        .await;

    let a_id = a.client_id.clone();
    a.disconnect().await;

    assert_eq!(b.expect_event("clientDisconnected").await["clientId"], a_id.as_str());
    assert_eq!(engine.producer_count(), 0);

    let caps = b.ok("getCapabilities", json!({})).await;
    let reply = b
        .request(
            "consume",
            json!({
                "roomId": "r1",
                "transportId": recv["id"],
                "producerId": producer_id,
                "rtpCapabilities": caps,
            }),
        )
        .await;
    assert_eq!(reply.event, "consumeError");
    assert_eq!(reply.data["code"], "producerNotFound");

    // b's transport keeps the room alive until b goes too
    let room = RoomId::from("r1");
    assert!(gateway.registry().get_room(&room).is_some());
    b.disconnect().await;
    assert!(gateway.registry().get_room(&room).is_none());
    assert_eq!(engine.transport_count(), 0);
}

#[tokio::test]
async fn test_exit_has_no_reply_and_notifies_room() {
    let (gateway, _engine) = setup();
    let mut a = TestPeer::connect(&gateway).await;
    let mut b = TestPeer::connect(&gateway).await;
    a.ok("join", json!({ "roomId": "r1" })).await;
    b.ok("join", json!({ "roomId": "r1" })).await;
    a.expect_event("peerJoined").await;
    assert!(a.backlog.is_empty());

    a.send("exit", json!({ "roomId": "r1" })).await;
    assert_eq!(b.expect_event("peerLeft").await["clientId"], a.client_id.as_str());

    // events are handled in order, so the next frame answers this request
    a.send("getCapabilities", json!({})).await;
    let next = a.read().await;
    assert_eq!(next.event, "getCapabilitiesSuccess");

    let reply = a
        .request("createTransport", json!({ "roomId": "r1", "direction": "send" }))
        .await;
    assert_eq!(reply.event, "createTransportError");
    assert_eq!(reply.data["code"], "validationError");
}

#[tokio::test]
async fn test_late_joiner_sees_existing_producers() {
    let (gateway, _engine) = setup();
    let mut a = TestPeer::connect(&gateway).await;
    a.ok("join", json!({ "roomId": "r1" })).await;
    let (_, producer_id) = publish(&mut a, "r1").await;

    let mut c = TestPeer::connect(&gateway).await;
    let joined = c.ok("join", json!({ "roomId": "r1" })).await;
    assert_eq!(
        joined["producers"],
        json!([{ "producerId": producer_id, "kind": "video", "clientId": a.client_id }])
    );
}

#[tokio::test]
async fn test_switching_rooms_leaves_the_old_one() {
    let (gateway, _engine) = setup();
    let mut a = TestPeer::connect(&gateway).await;
    let mut b = TestPeer::connect(&gateway).await;
    a.ok("join", json!({ "roomId": "r1" })).await;
    b.ok("join", json!({ "roomId": "r1" })).await;
    publish(&mut a, "r1").await;

    a.ok("join", json!({ "roomId": "r2" })).await;
    assert_eq!(b.expect_event("peerLeft").await["clientId"], a.client_id.as_str());

    let a_id = ClientId::from(a.client_id.as_str());
    assert_eq!(gateway.hub().room_of(&a_id), Some(RoomId::from("r2")));
    assert!(gateway
        .registry()
        .list_producers(&RoomId::from("r1"))
        .await
        .map(|p| p.is_empty())
        .unwrap_or(true));

    // rejoining the current room is idempotent
    a.ok("join", json!({ "roomId": "r2" })).await;
    assert_eq!(gateway.hub().member_count(&RoomId::from("r2")), 1);
}

#[tokio::test]
async fn test_request_errors() {
    let (gateway, _engine) = setup();
    let mut a = TestPeer::connect(&gateway).await;
    let mut b = TestPeer::connect(&gateway).await;

    let reply = a.request("teleport", json!({})).await;
    assert_eq!(reply.data["code"], "validationError");

    let reply = a
        .request("createTransport", json!({ "roomId": "r1", "direction": "send" }))
        .await;
    assert_eq!(reply.data["code"], "validationError");

    a.ok("join", json!({ "roomId": "r1" })).await;
    b.ok("join", json!({ "roomId": "r1" })).await;

    let reply = a
        .request(
            "connectTransport",
            json!({ "roomId": "r1", "transportId": "nope", "dtlsParameters": dtls() }),
        )
        .await;
    assert_eq!(reply.data["code"], "transportNotFound");

    let reply = a.request("produce", json!({ "roomId": "r1" })).await;
    assert_eq!(reply.event, "produceError");
    assert_eq!(reply.data["code"], "validationError");

    // produce on a receive transport
    let recv = a
        .ok("createTransport", json!({ "roomId": "r1", "direction": "recv" }))
        .await;
    let reply = a
        .request(
            "produce",
            json!({ "roomId": "r1", "transportId": recv["id"], "kind": "video", "rtpParameters": vp8() }),
        )
        .await;
    assert_eq!(reply.data["code"], "validationError");

    // someone else's transport
    let reply = b
        .request(
            "connectTransport",
            json!({ "roomId": "r1", "transportId": recv["id"], "dtlsParameters": dtls() }),
        )
        .await;
    assert_eq!(reply.data["code"], "validationError");

    // engine rejections come back verbatim
    let send = a
        .ok("createTransport", json!({ "roomId": "r1", "direction": "send" }))
        .await;
    let h264 = json!({ "codecs": [{ "mimeType": "video/H264", "clockRate": 90000 }] });
    let reply = a
        .request(
            "produce",
            json!({ "roomId": "r1", "transportId": send["id"], "kind": "video", "rtpParameters": h264 }),
        )
        .await;
    assert_eq!(reply.data["code"], "engineFailure");
    assert_eq!(reply.data["message"], "unsupported codec [mimeType:video/H264]");

    // wrong room
    let reply = a
        .request("createTransport", json!({ "roomId": "r2", "direction": "send" }))
        .await;
    assert_eq!(reply.data["code"], "validationError");
}

#[tokio::test]
async fn test_disconnect_without_join_is_harmless() {
    let (gateway, _engine) = setup();
    let a = TestPeer::connect(&gateway).await;
    a.disconnect().await;
    assert_eq!(gateway.registry().room_count(), 0);
}

#[tokio::test]
async fn test_create_transport_in_deleted_room_needs_rejoin() {
    let (gateway, engine) = setup();
    let mut a = TestPeer::connect(&gateway).await;
    let mut b = TestPeer::connect(&gateway).await;
    a.ok("join", json!({ "roomId": "r1" })).await;
    b.ok("join", json!({ "roomId": "r1" })).await;

    // nobody holds resources, so b's cleanup deletes the room under a
    b.disconnect().await;
    let room = RoomId::from("r1");
    assert!(gateway.registry().get_room(&room).is_none());

    let reply = a
        .request("createTransport", json!({ "roomId": "r1", "direction": "send" }))
        .await;
    assert_eq!(reply.event, "createTransportError");
    assert_eq!(reply.data["code"], "roomNotFound");
    assert_eq!(engine.transport_count(), 0);
    assert!(gateway.registry().get_room(&room).is_none());

    // re-issuing join recreates the room
    a.ok("join", json!({ "roomId": "r1" })).await;
    a.ok("createTransport", json!({ "roomId": "r1", "direction": "send" }))
        .await;
    assert_eq!(gateway.registry().room_stats(&room).await.unwrap().transports, 1);
}

#[tokio::test]
async fn test_malformed_exit_gets_no_reply() {
    let (gateway, _engine) = setup();
    let mut a = TestPeer::connect(&gateway).await;
    a.ok("join", json!({ "roomId": "r1" })).await;

    a.send("exit", json!("not-an-object")).await;
    a.send("getCapabilities", json!({})).await;
    assert_eq!(a.read().await.event, "getCapabilitiesSuccess");

    // still a member: the malformed exit was dropped
    let a_id = ClientId::from(a.client_id.as_str());
    assert_eq!(gateway.hub().room_of(&a_id), Some(RoomId::from("r1")));

    // a malformed request that expects a reply still gets one
    let reply = a.request("join", json!("not-an-object")).await;
    assert_eq!(reply.event, "joinError");
    assert_eq!(reply.data["code"], "validationError");
}
