use crate::domain::{
    BindOutcome, ConnectionId, ConnectionLink, ConnectionRegistry, OutboundSender, RegistryError,
    ServerMessage,
};
use bytes::Bytes;
use chrono::Utc;
use common::domain::{
    classify, BrokerEnvelope, DomainError, Envelope, MessageValidator, Provenance, ValidationError,
};
use common::mqtt::BrokerPublisher;
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

pub const DEFAULT_ABUSE_PENALTY: u64 = 10;
pub const DEFAULT_ABUSE_THRESHOLD: u64 = 1000;

/// Provenance `source` stamped on every message this bridge publishes.
pub const PROVENANCE_SOURCE: &str = "websocket";

#[derive(Debug, Clone)]
pub struct BridgeServiceConfig {
    pub bridge_id: String,
    /// Added to a connection's message counter on every processing failure.
    pub abuse_penalty: u64,
    /// A connection whose counter exceeds this after a failure is terminated.
    pub abuse_threshold: u64,
}

impl Default for BridgeServiceConfig {
    fn default() -> Self {
        Self {
            bridge_id: "dmz-bridge".to_string(),
            abuse_penalty: DEFAULT_ABUSE_PENALTY,
            abuse_threshold: DEFAULT_ABUSE_THRESHOLD,
        }
    }
}

/// What became of one inbound device message.
#[derive(Debug, Clone, PartialEq)]
pub enum MessageOutcome {
    /// Published; the device was sent an ack for `topic`.
    Published { topic: String },
    /// Rejected before publishing; the device was sent an error.
    Rejected(ValidationError),
    /// The device tried to switch identity mid-connection.
    IdentityConflict,
    /// The broker did not take the message. It is lost.
    PublishFailed,
    /// The connection crossed the abuse threshold and was terminated.
    Terminated,
    /// The connection was already gone.
    UnknownConnection,
}

/// The ingress message pipeline: validate, bind, classify, publish, reply.
pub struct IngressBridgeService {
    registry: Arc<ConnectionRegistry>,
    validator: MessageValidator,
    publisher: Arc<dyn BrokerPublisher>,
    config: BridgeServiceConfig,
}

impl IngressBridgeService {
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        validator: MessageValidator,
        publisher: Arc<dyn BrokerPublisher>,
        config: BridgeServiceConfig,
    ) -> Self {
        Self {
            registry,
            validator,
            publisher,
            config,
        }
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Register a freshly accepted connection and greet it.
    pub async fn open_connection(&self, remote_addr: &str, sender: OutboundSender) -> ConnectionLink {
        let link = self.registry.register(remote_addr, sender).await;
        link.send(ServerMessage::welcome(link.id().value(), Utc::now()));
        info!(connection_id = %link.id(), client_ip = %remote_addr, "device connected");
        link
    }

    pub async fn close_connection(&self, id: ConnectionId) {
        if let Some(connection) = self.registry.unregister(id).await {
            info!(
                connection_id = %id,
                device_id = connection.device_id.as_deref().unwrap_or("unbound"),
                messages = connection.message_count,
                "device disconnected"
            );
        }
    }

    /// Process one inbound frame from connection `id`.
    #[instrument(skip(self, raw), fields(connection_id = %id, size = raw.len()))]
    pub async fn handle_message(&self, id: ConnectionId, raw: &[u8]) -> MessageOutcome {
        if self.registry.record_activity(id).await.is_err() {
            debug!("message for unregistered connection ignored");
            return MessageOutcome::UnknownConnection;
        }
        let Some(link) = self.registry.get(id).await else {
            return MessageOutcome::UnknownConnection;
        };

        let envelope = match self.validator.validate(raw, Utc::now()) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(kind = e.kind(), error = ?e, "rejected device message");
                link.send(ServerMessage::error(e.to_string()));
                return self
                    .penalize(&link)
                    .await
                    .unwrap_or(MessageOutcome::Rejected(e));
            }
        };

        match self.registry.bind(id, &envelope.device_id).await {
            Ok(BindOutcome::Bound) => {
                info!(device_id = %envelope.device_id, "device bound to connection");
            }
            Ok(_) => {}
            Err(RegistryError::UnknownConnection(_)) => return MessageOutcome::UnknownConnection,
            Err(e @ RegistryError::DeviceIdentityChanged { .. }) => {
                warn!(error = %e, "device identity change refused");
                link.send(ServerMessage::error("Device identity cannot change"));
                return self
                    .penalize(&link)
                    .await
                    .unwrap_or(MessageOutcome::IdentityConflict);
            }
        }

        self.publish(&link, &envelope, raw).await
    }

    async fn publish(&self, link: &ConnectionLink, envelope: &Envelope, raw: &[u8]) -> MessageOutcome {
        let classification = classify(envelope);
        let topic = classification.topic.to_string();

        let provenance = Provenance {
            source: PROVENANCE_SOURCE.to_string(),
            bridge_id: self.config.bridge_id.clone(),
            connection_id: link.id().value(),
            client_ip: link.remote_addr().to_string(),
        };
        let wire = BrokerEnvelope::from_envelope(envelope, provenance);

        let payload = match serde_json::to_vec(&wire) {
            Ok(bytes) => Bytes::from(bytes),
            Err(e) => {
                error!(error = %e, "failed to serialize broker envelope");
                link.send(ServerMessage::error("Failed to process message"));
                return self
                    .penalize(link)
                    .await
                    .unwrap_or(MessageOutcome::PublishFailed);
            }
        };

        debug!(
            device_id = %envelope.device_id,
            category = %classification.category,
            auto_detected = classification.auto_detected,
            topic = %topic,
            qos = classification.qos.level(),
            inbound_bytes = raw.len(),
            "publishing device message"
        );

        match self
            .publisher
            .publish(topic.clone(), classification.qos, payload)
            .await
        {
            Ok(()) => {
                link.send(ServerMessage::ack(envelope.message_id.clone(), topic.clone(), Utc::now()));
                MessageOutcome::Published { topic }
            }
            Err(e) => {
                error!(device_id = %envelope.device_id, topic = %topic, error = %e, "failed to publish to broker");
                link.send(ServerMessage::error("Failed to publish message"));
                MessageOutcome::PublishFailed
            }
        }
    }

    /// Charge a processing failure to the connection. Returns `Some` when the
    /// connection was terminated for crossing the abuse threshold.
    async fn penalize(&self, link: &ConnectionLink) -> Option<MessageOutcome> {
        let count = self
            .registry
            .add_penalty(link.id(), self.config.abuse_penalty)
            .await
            .ok()?;

        if count <= self.config.abuse_threshold {
            return None;
        }

        let err = DomainError::AbuseThresholdExceeded {
            connection_id: link.id().value(),
            score: count,
            threshold: self.config.abuse_threshold,
        };
        warn!(error = %err, "terminating abusive connection");
        self.registry.unregister(link.id()).await;
        Some(MessageOutcome::Terminated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Outbound, OutboundReceiver};
    use common::domain::QosLevel;
    use common::MockBrokerPublisher;
    use serde_json::Value;
    use tokio::sync::mpsc;

    fn service(publisher: MockBrokerPublisher, config: BridgeServiceConfig) -> IngressBridgeService {
        IngressBridgeService::new(
            Arc::new(ConnectionRegistry::new()),
            MessageValidator::default(),
            Arc::new(publisher),
            config,
        )
    }

    async fn connect(service: &IngressBridgeService) -> (ConnectionLink, OutboundReceiver) {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let link = service.open_connection("10.1.2.3", tx).await;
        // welcome
        assert!(matches!(
            rx.try_recv(),
            Ok(Outbound::Message(ServerMessage::Welcome { .. }))
        ));
        (link, rx)
    }

    fn next_message(rx: &mut OutboundReceiver) -> ServerMessage {
        match rx.try_recv() {
            Ok(Outbound::Message(message)) => message,
            other => panic!("expected a message, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_open_connection_sends_welcome_with_id() {
        let svc = service(MockBrokerPublisher::new(), BridgeServiceConfig::default());
        let (tx, mut rx) = mpsc::unbounded_channel();
        let link = svc.open_connection("10.1.2.3", tx).await;

        match next_message(&mut rx) {
            ServerMessage::Welcome { connection_id, .. } => assert_eq!(connection_id, link.id().value()),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_timeseries_message_published_and_acked() {
        let mut publisher = MockBrokerPublisher::new();
        publisher
            .expect_publish()
            .withf(|topic, qos, payload| {
                let wire: Value = serde_json::from_slice(payload).unwrap();
                topic == "sensors/d1/data"
                    && *qos == QosLevel::AtLeastOnce
                    && wire["deviceId"] == "d1"
                    && wire["dataType"] == "auto-detected"
                    && wire["payload"]["temp"] == 22.4
                    && wire["metadata"]["source"] == "websocket"
                    && wire["metadata"]["bridgeId"] == "dmz-test"
                    && wire["metadata"]["clientIp"] == "10.1.2.3"
            })
            .times(1)
            .returning(|_, _, _| Ok(()));

        let svc = service(
            publisher,
            BridgeServiceConfig {
                bridge_id: "dmz-test".to_string(),
                ..BridgeServiceConfig::default()
            },
        );
        let (link, mut rx) = connect(&svc).await;

        let outcome = svc
            .handle_message(link.id(), br#"{"deviceId":"d1","messageId":"m1","payload":{"temp":22.4}}"#)
            .await;

        assert_eq!(
            outcome,
            MessageOutcome::Published {
                topic: "sensors/d1/data".to_string()
            }
        );
        match next_message(&mut rx) {
            ServerMessage::Ack { message_id, topic, .. } => {
                assert_eq!(message_id, Some(serde_json::json!("m1")));
                assert_eq!(topic, "sensors/d1/data");
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(
            svc.registry().lookup_by_device("d1").await.map(|l| l.id()),
            Some(link.id())
        );
    }

    #[tokio::test]
    async fn test_file_message_uses_exactly_once() {
        let mut publisher = MockBrokerPublisher::new();
        publisher
            .expect_publish()
            .withf(|topic, qos, _| topic == "files/cam-7/data" && *qos == QosLevel::ExactlyOnce)
            .times(1)
            .returning(|_, _, _| Ok(()));

        let svc = service(publisher, BridgeServiceConfig::default());
        let (link, _rx) = connect(&svc).await;

        let outcome = svc
            .handle_message(
                link.id(),
                br#"{"deviceId":"cam-7","dataType":"file","payload":{"filename":"a.bin","data":"AAEC"}}"#,
            )
            .await;
        assert!(matches!(outcome, MessageOutcome::Published { .. }));
    }

    #[tokio::test]
    async fn test_tenant_message_uses_tenant_topic() {
        let mut publisher = MockBrokerPublisher::new();
        publisher
            .expect_publish()
            .withf(|topic, _, _| topic == "tenants/acme/devices/d1/events/data")
            .times(1)
            .returning(|_, _, _| Ok(()));

        let svc = service(publisher, BridgeServiceConfig::default());
        let (link, _rx) = connect(&svc).await;

        let outcome = svc
            .handle_message(
                link.id(),
                br#"{"deviceId":"d1","tenantId":"acme","payload":{"eventType":"door_open"}}"#,
            )
            .await;
        assert!(matches!(outcome, MessageOutcome::Published { .. }));
    }

    #[tokio::test]
    async fn test_invalid_message_gets_error_and_connection_survives() {
        let mut publisher = MockBrokerPublisher::new();
        publisher.expect_publish().never();

        let svc = service(publisher, BridgeServiceConfig::default());
        let (link, mut rx) = connect(&svc).await;

        let outcome = svc.handle_message(link.id(), b"not json").await;
        assert!(matches!(
            outcome,
            MessageOutcome::Rejected(ValidationError::MalformedEncoding(_))
        ));
        assert_eq!(next_message(&mut rx), ServerMessage::error("Invalid message format"));

        let outcome = svc.handle_message(link.id(), br#"{"payload":{}}"#).await;
        assert_eq!(outcome, MessageOutcome::Rejected(ValidationError::MissingDeviceId));
        assert_eq!(next_message(&mut rx), ServerMessage::error("Missing or invalid deviceId"));

        assert!(!link.is_closed());
    }

    #[tokio::test]
    async fn test_publish_failure_reported_to_device() {
        let mut publisher = MockBrokerPublisher::new();
        publisher
            .expect_publish()
            .times(1)
            .returning(|_, _, _| Err(DomainError::Publish("broker not connected".to_string())));

        let svc = service(publisher, BridgeServiceConfig::default());
        let (link, mut rx) = connect(&svc).await;

        let outcome = svc
            .handle_message(link.id(), br#"{"deviceId":"d1","payload":{"temp":1}}"#)
            .await;
        assert_eq!(outcome, MessageOutcome::PublishFailed);
        assert_eq!(next_message(&mut rx), ServerMessage::error("Failed to publish message"));
        assert!(!link.is_closed());
    }

    #[tokio::test]
    async fn test_identity_change_refused() {
        let mut publisher = MockBrokerPublisher::new();
        publisher.expect_publish().times(1).returning(|_, _, _| Ok(()));

        let svc = service(publisher, BridgeServiceConfig::default());
        let (link, mut rx) = connect(&svc).await;

        svc.handle_message(link.id(), br#"{"deviceId":"d1","payload":{"temp":1}}"#)
            .await;
        let _ack = next_message(&mut rx);

        let outcome = svc
            .handle_message(link.id(), br#"{"deviceId":"d2","payload":{"temp":1}}"#)
            .await;
        assert_eq!(outcome, MessageOutcome::IdentityConflict);
        assert_eq!(next_message(&mut rx), ServerMessage::error("Device identity cannot change"));
    }

    #[tokio::test]
    async fn test_repeated_failures_terminate_connection() {
        let svc = service(
            MockBrokerPublisher::new(),
            BridgeServiceConfig {
                abuse_penalty: 10,
                abuse_threshold: 50,
                ..BridgeServiceConfig::default()
            },
        );
        let (link, _rx) = connect(&svc).await;

        // Each failure counts 1 for the message plus the penalty.
        for _ in 0..4 {
            let outcome = svc.handle_message(link.id(), b"{").await;
            assert!(matches!(outcome, MessageOutcome::Rejected(_)));
        }
        // 5th failure: 5 * 11 = 55 > 50
        assert_eq!(svc.handle_message(link.id(), b"{").await, MessageOutcome::Terminated);
        assert!(link.is_closed());
        assert!(svc.registry().get(link.id()).await.is_none());

        assert_eq!(
            svc.handle_message(link.id(), b"{").await,
            MessageOutcome::UnknownConnection
        );
    }

    #[tokio::test]
    async fn test_close_connection_unregisters() {
        let svc = service(MockBrokerPublisher::new(), BridgeServiceConfig::default());
        let (link, _rx) = connect(&svc).await;

        svc.close_connection(link.id()).await;
        assert!(svc.registry().get(link.id()).await.is_none());
        assert!(link.is_closed());
    }
}
