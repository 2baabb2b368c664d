use async_trait::async_trait;
use bytes::Bytes;
use common::domain::{DomainResult, MessageValidator, QosLevel};
use common::mqtt::{BrokerPublisher, ConsumeOutcome, InboundPublish};
use futures::{SinkExt, StreamExt};
use ingress_bridge::{
    BridgeServiceConfig, CommandRelayService, ConnectionRegistry, IngressBridgeService,
    SessionSettings, WebSocketListener,
};
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Default)]
struct RecordingPublisher {
    published: Mutex<Vec<(String, QosLevel, Bytes)>>,
}

#[async_trait]
impl BrokerPublisher for RecordingPublisher {
    async fn publish(&self, topic: String, qos: QosLevel, payload: Bytes) -> DomainResult<()> {
        self.published.lock().unwrap().push((topic, qos, payload));
        Ok(())
    }
}

struct TestBridge {
    url: String,
    registry: Arc<ConnectionRegistry>,
    publisher: Arc<RecordingPublisher>,
    ctx: CancellationToken,
}

async fn start_bridge() -> TestBridge {
    let publisher = Arc::new(RecordingPublisher::default());
    let registry = Arc::new(ConnectionRegistry::new());
    let service = Arc::new(IngressBridgeService::new(
        registry.clone(),
        MessageValidator::new(1024),
        publisher.clone(),
        BridgeServiceConfig {
            bridge_id: "dmz-it".to_string(),
            ..BridgeServiceConfig::default()
        },
    ));
    let settings = SessionSettings {
        heartbeat_interval: Duration::from_secs(3600),
        max_frame_bytes: 4096,
    };
    let listener = WebSocketListener::bind("127.0.0.1:0", service, settings)
        .await
        .unwrap();
    let url = format!("ws://{}", listener.local_addr().unwrap());

    let ctx = CancellationToken::new();
    let accept_ctx = ctx.clone();
    tokio::spawn(async move {
        listener.accept_until(&accept_ctx).await;
        listener.drain_sessions().await;
    });

    TestBridge {
        url,
        registry,
        publisher,
        ctx,
    }
}

async fn next_json(client: &mut Client) -> Value {
    loop {
        let frame = tokio::time::timeout(Duration::from_secs(5), client.next())
            .await
            .expect("timed out waiting for frame")
            .expect("stream ended")
            .expect("websocket error");
        if let Message::Text(text) = frame {
            return serde_json::from_str(&text).unwrap();
        }
    }
}

async fn connect(bridge: &TestBridge) -> (Client, u64) {
    let (mut client, _) = connect_async(bridge.url.as_str()).await.unwrap();
    let welcome = next_json(&mut client).await;
    assert_eq!(welcome["type"], "welcome");
    let id = welcome["connectionId"].as_u64().unwrap();
    (client, id)
}

#[tokio::test]
async fn test_timeseries_message_flows_to_broker() {
    let bridge = start_bridge().await;
    let (mut client, connection_id) = connect(&bridge).await;

    client
        .send(Message::Text(
            json!({"deviceId": "d1", "messageId": "m-1", "payload": {"temp": 22.4}}).to_string(),
        ))
        .await
        .unwrap();

    let ack = next_json(&mut client).await;
    assert_eq!(ack["type"], "ack");
    assert_eq!(ack["messageId"], "m-1");
    assert_eq!(ack["topic"], "sensors/d1/data");

    let published = bridge.publisher.published.lock().unwrap().clone();
    assert_eq!(published.len(), 1);
    let (topic, qos, payload) = &published[0];
    assert_eq!(topic, "sensors/d1/data");
    assert_eq!(*qos, QosLevel::AtLeastOnce);

    let wire: Value = serde_json::from_slice(payload).unwrap();
    assert_eq!(wire["payload"]["temp"], 22.4);
    assert_eq!(wire["metadata"]["bridgeId"], "dmz-it");
    assert_eq!(wire["metadata"]["connectionId"], connection_id);
    assert_eq!(wire["metadata"]["clientIp"], "127.0.0.1");

    bridge.ctx.cancel();
}

#[tokio::test]
async fn test_rejected_message_keeps_connection_open() {
    let bridge = start_bridge().await;
    let (mut client, _) = connect(&bridge).await;

    client.send(Message::Text("[1,2,3]".to_string())).await.unwrap();
    let error = next_json(&mut client).await;
    assert_eq!(error, json!({"type": "error", "error": "Invalid message format"}));

    let oversized = json!({"deviceId": "d1", "payload": {"blob": "x".repeat(2000)}}).to_string();
    client.send(Message::Text(oversized)).await.unwrap();
    let error = next_json(&mut client).await;
    assert_eq!(error["error"], "Message too large");

    client
        .send(Message::Text(json!({"deviceId": "d1", "payload": {"temp": 1}}).to_string()))
        .await
        .unwrap();
    assert_eq!(next_json(&mut client).await["type"], "ack");
    assert!(bridge.publisher.published.lock().unwrap().len() == 1);

    bridge.ctx.cancel();
}

#[tokio::test]
async fn test_command_relayed_to_bound_device() {
    let bridge = start_bridge().await;
    let (mut client, _) = connect(&bridge).await;

    client
        .send(Message::Text(json!({"deviceId": "d1", "payload": {"temp": 1}}).to_string()))
        .await
        .unwrap();
    assert_eq!(next_json(&mut client).await["type"], "ack");

    let relay = CommandRelayService::new(bridge.registry.clone());
    let outcome = relay
        .clone()
        .oneshot(InboundPublish::new(
            "commands/d1/request",
            Bytes::from(json!({"action": "reboot"}).to_string()),
        ))
        .await
        .unwrap();
    assert_eq!(outcome, ConsumeOutcome::Handled);

    let command = next_json(&mut client).await;
    assert_eq!(command, json!({"type": "command", "payload": {"action": "reboot"}}));

    let outcome = relay
        .oneshot(InboundPublish::new("commands/offline/request", Bytes::from_static(b"{}")))
        .await
        .unwrap();
    assert!(!outcome.is_handled());

    bridge.ctx.cancel();
}

#[tokio::test]
async fn test_shutdown_sends_going_away_close() {
    let bridge = start_bridge().await;
    let (mut client, _) = connect(&bridge).await;

    assert_eq!(bridge.registry.close_all().await, 1);

    let close = loop {
        match tokio::time::timeout(Duration::from_secs(5), client.next()).await {
            Ok(Some(Ok(Message::Close(frame)))) => break frame,
            Ok(Some(Ok(_))) => continue,
            other => panic!("expected close frame, got {:?}", other),
        }
    };
    let frame = close.expect("close frame without payload");
    assert_eq!(frame.code, CloseCode::Away);
    assert_eq!(frame.reason, "Server shutdown");

    bridge.ctx.cancel();
}

#[tokio::test]
async fn test_disconnect_unregisters_connection() {
    let bridge = start_bridge().await;
    let (mut client, _) = connect(&bridge).await;
    assert_eq!(bridge.registry.stats().await.connections, 1);

    client.close(None).await.unwrap();

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while bridge.registry.stats().await.connections > 0 {
        assert!(tokio::time::Instant::now() < deadline, "connection never unregistered");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    bridge.ctx.cancel();
}
