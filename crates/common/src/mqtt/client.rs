use crate::domain::{DomainError, DomainResult, QosLevel};
use crate::mqtt::{
    BrokerPublisher, ConsumeOutcome, InboundPublish, MqttConfig, MqttSubscriber, PublishAcks,
    SubscriptionFilter,
};
use anyhow::{Context, Result};
use async_trait::async_trait;
use bytes::Bytes;
use rumqttc::{AsyncClient, EventLoop, MqttOptions, QoS, TlsConfiguration, Transport};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tower::Service;
use tracing::{debug, info, instrument};

/// Shared view of whether the broker session is currently up.
///
/// Written by the event loop driver on ConnAck and on connection errors,
/// read by publishers to fail fast while the broker is unreachable.
#[derive(Clone, Debug, Default)]
pub struct BrokerStatus {
    connected: Arc<AtomicBool>,
}

impl BrokerStatus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }
}

pub fn to_mqtt_qos(qos: QosLevel) -> QoS {
    match qos {
        QosLevel::AtMostOnce => QoS::AtMostOnce,
        QosLevel::AtLeastOnce => QoS::AtLeastOnce,
        QosLevel::ExactlyOnce => QoS::ExactlyOnce,
    }
}

/// Build client options, loading TLS material from disk.
///
/// A missing or unreadable certificate is a startup failure.
pub fn build_mqtt_options(config: &MqttConfig) -> Result<MqttOptions> {
    let mut options = MqttOptions::new(&config.client_id, &config.host, config.port);
    options.set_keep_alive(config.keep_alive);
    options.set_clean_session(true);
    options.set_max_packet_size(config.max_packet_bytes, config.max_packet_bytes);

    if let Some((username, password)) = &config.credentials {
        options.set_credentials(username, password);
    }

    if let Some(tls) = &config.tls {
        let ca = std::fs::read(&tls.ca_path)
            .with_context(|| format!("failed to read CA bundle {}", tls.ca_path.display()))?;
        let cert = std::fs::read(&tls.cert_path).with_context(|| {
            format!("failed to read client certificate {}", tls.cert_path.display())
        })?;
        let key = std::fs::read(&tls.key_path)
            .with_context(|| format!("failed to read client key {}", tls.key_path.display()))?;

        options.set_transport(Transport::Tls(TlsConfiguration::Simple {
            ca,
            alpn: None,
            client_auth: Some((cert, key)),
        }));
    }

    Ok(options)
}

/// A broker session: the client handle plus the event loop that drives it.
pub struct MqttConnection {
    client: AsyncClient,
    eventloop: EventLoop,
    status: BrokerStatus,
    acks: PublishAcks,
    config: MqttConfig,
}

impl MqttConnection {
    pub fn new(config: MqttConfig) -> Result<Self> {
        info!(
            host = %config.host,
            port = config.port,
            client_id = %config.client_id,
            tls = config.tls.is_some(),
            "creating MQTT connection"
        );

        let options = build_mqtt_options(&config)?;
        let (client, eventloop) = AsyncClient::new(options, config.request_capacity);

        Ok(Self {
            client,
            eventloop,
            status: BrokerStatus::new(),
            acks: PublishAcks::new(),
            config,
        })
    }

    pub fn publisher(&self) -> MqttPublisher {
        MqttPublisher::new(
            self.client.clone(),
            self.status.clone(),
            self.acks.clone(),
            self.config.ack_timeout,
        )
    }

    pub fn status(&self) -> BrokerStatus {
        self.status.clone()
    }

    /// Hand the event loop to a subscriber that routes matching messages to
    /// `service`. Nothing moves on this connection, publishes included, until
    /// the subscriber runs.
    pub fn into_subscriber<S>(self, filters: Vec<SubscriptionFilter>, service: S) -> MqttSubscriber<S>
    where
        S: Service<InboundPublish, Response = ConsumeOutcome, Error = anyhow::Error> + Send + 'static,
        S::Future: Send + 'static,
    {
        MqttSubscriber::new(
            self.client,
            self.eventloop,
            self.status,
            self.acks,
            filters,
            self.config.reconnect_delay,
            service,
        )
    }
}

/// [`BrokerPublisher`] over a rumqttc client.
///
/// A publish resolves once the broker acknowledges it: on PUBACK for QoS 1,
/// on PUBCOMP for QoS 2, once written for QoS 0. It fails when the session
/// drops first or no acknowledgement arrives within the ack timeout.
#[derive(Clone)]
pub struct MqttPublisher {
    client: AsyncClient,
    status: BrokerStatus,
    acks: PublishAcks,
    ack_timeout: Duration,
}

impl MqttPublisher {
    pub fn new(client: AsyncClient, status: BrokerStatus, acks: PublishAcks, ack_timeout: Duration) -> Self {
        Self {
            client,
            status,
            acks,
            ack_timeout,
        }
    }
}

#[async_trait]
impl BrokerPublisher for MqttPublisher {
    #[instrument(skip(self, payload), fields(topic = %topic, qos = qos.level(), payload_size = payload.len()))]
    async fn publish(&self, topic: String, qos: QosLevel, payload: Bytes) -> DomainResult<()> {
        let ack = self.acks.register(|| {
            if !self.status.is_connected() {
                return Err(DomainError::Publish("broker not connected".to_string()));
            }
            self.client
                .try_publish(topic, to_mqtt_qos(qos), false, payload.to_vec())
                .map_err(|e| DomainError::Publish(e.to_string()))
        })?;

        match tokio::time::timeout(self.ack_timeout, ack).await {
            Ok(Ok(result)) => {
                debug!("publish acknowledged by broker");
                result
            }
            Ok(Err(_)) => Err(DomainError::Publish("MQTT client dropped the publish".to_string())),
            Err(_) => Err(DomainError::Publish(format!(
                "no acknowledgement from broker within {}ms",
                self.ack_timeout.as_millis()
            ))),
        }
    }
}
