use crate::domain::QosLevel;
use crate::mqtt::{to_mqtt_qos, BrokerStatus, ConsumeOutcome, InboundPublish, PublishAcks};
use anyhow::Result;
use rumqttc::{AsyncClient, Event, EventLoop, Outgoing, Packet, Request};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tower::{Service, ServiceExt};
use tracing::{debug, error, info, info_span, warn, Instrument, Span};

/// How long shutdown waits for the DISCONNECT packet to be written.
const DISCONNECT_TIMEOUT: Duration = Duration::from_secs(2);

/// A topic filter to subscribe to, with the requested QoS.
#[derive(Debug, Clone, PartialEq)]
pub struct SubscriptionFilter {
    pub filter: String,
    pub qos: QosLevel,
}

impl SubscriptionFilter {
    pub fn new(filter: impl Into<String>, qos: QosLevel) -> Self {
        Self {
            filter: filter.into(),
            qos,
        }
    }
}

/// Drives an MQTT event loop and feeds every received publish through a
/// Tower service, one message at a time.
///
/// Subscriptions are (re)issued on every ConnAck, so they survive broker
/// reconnects. A failing message never stops the loop.
///
/// The subscriber also reports packet ids and acknowledgements of outgoing
/// publishes to [`PublishAcks`]. When the session drops, every outstanding
/// publish fails and its queued retransmission is discarded.
pub struct MqttSubscriber<S> {
    client: AsyncClient,
    eventloop: EventLoop,
    status: BrokerStatus,
    acks: PublishAcks,
    filters: Vec<SubscriptionFilter>,
    reconnect_delay: Duration,
    service: S,
}

impl<S> MqttSubscriber<S>
where
    S: Service<InboundPublish, Response = ConsumeOutcome, Error = anyhow::Error> + Send + 'static,
    S::Future: Send + 'static,
{
    pub fn new(
        client: AsyncClient,
        eventloop: EventLoop,
        status: BrokerStatus,
        acks: PublishAcks,
        filters: Vec<SubscriptionFilter>,
        reconnect_delay: Duration,
        service: S,
    ) -> Self {
        Self {
            client,
            eventloop,
            status,
            acks,
            filters,
            reconnect_delay,
            service,
        }
    }

    /// Run until `ctx` is cancelled.
    pub async fn run(mut self, ctx: CancellationToken) -> Result<()> {
        info!(filters = ?self.filter_names(), "starting MQTT subscriber");

        loop {
            tokio::select! {
                _ = ctx.cancelled() => {
                    info!("received shutdown signal, stopping MQTT subscriber");
                    self.disconnect().await;
                    break;
                }
                event = self.eventloop.poll() => {
                    match event {
                        Ok(Event::Incoming(Packet::ConnAck(_))) => {
                            info!("connected to MQTT broker");
                            self.status.set_connected(true);
                            self.subscribe_all();
                        }
                        Ok(Event::Incoming(Packet::Publish(publish))) => {
                            let request = InboundPublish::new(publish.topic, publish.payload);
                            self.dispatch(request).await;
                        }
                        Ok(Event::Incoming(Packet::SubAck(suback))) => {
                            debug!(pkid = suback.pkid, "subscription acknowledged");
                        }
                        Ok(Event::Outgoing(Outgoing::Publish(pkid))) => self.acks.on_publish_sent(pkid),
                        Ok(Event::Outgoing(Outgoing::AwaitAck(pkid))) => self.acks.on_publish_parked(pkid),
                        Ok(Event::Incoming(Packet::PubAck(ack))) => self.acks.on_acked(ack.pkid),
                        Ok(Event::Incoming(Packet::PubComp(comp))) => self.acks.on_acked(comp.pkid),
                        Ok(_) => {}
                        Err(e) => {
                            self.status.set_connected(false);
                            error!(error = %e, "MQTT connection error");
                            self.abandon_publishes("broker connection lost");

                            tokio::select! {
                                _ = ctx.cancelled() => break,
                                _ = tokio::time::sleep(self.reconnect_delay) => {}
                            }
                            warn!("retrying MQTT connection");
                        }
                    }
                }
            }
        }

        self.status.set_connected(false);
        self.abandon_publishes("MQTT client shut down");
        info!("MQTT subscriber stopped");
        Ok(())
    }

    /// Queue a DISCONNECT and poll the event loop until it is on the wire.
    async fn disconnect(&mut self) {
        if !self.status.is_connected() {
            return;
        }
        if let Err(e) = self.client.try_disconnect() {
            warn!(error = %e, "could not queue MQTT disconnect");
            return;
        }

        let eventloop = &mut self.eventloop;
        let flush = async {
            loop {
                match eventloop.poll().await {
                    Ok(Event::Outgoing(Outgoing::Disconnect)) | Err(_) => break,
                    Ok(_) => {}
                }
            }
        };
        match tokio::time::timeout(DISCONNECT_TIMEOUT, flush).await {
            Ok(()) => info!("disconnected from MQTT broker"),
            Err(_) => warn!("timed out sending MQTT disconnect"),
        }
    }

    /// Fail outstanding publishes and drop their pending retransmissions, so a
    /// publish reported lost is never delivered later.
    fn abandon_publishes(&mut self, reason: &str) {
        let eventloop = &mut self.eventloop;
        let failed = self.acks.fail_all(reason, || {
            // Pull requests still sitting in the client channel into `pending`.
            eventloop.clean();
            eventloop
                .pending
                .retain(|request| !matches!(request, Request::Publish(_) | Request::PubRel(_)));
        });
        if failed > 0 {
            warn!(publishes = failed, reason, "outstanding publishes failed");
        }
    }

    fn filter_names(&self) -> Vec<&str> {
        self.filters.iter().map(|f| f.filter.as_str()).collect()
    }

    fn subscribe_all(&self) {
        for filter in &self.filters {
            match self
                .client
                .try_subscribe(filter.filter.clone(), to_mqtt_qos(filter.qos))
            {
                Ok(()) => info!(topic = %filter.filter, "subscribed to MQTT topic"),
                Err(e) => error!(topic = %filter.filter, error = %e, "failed to subscribe"),
            }
        }
    }

    /// Hand one message to the service under its own root span.
    async fn dispatch(&mut self, request: InboundPublish) {
        let span = info_span!(
            parent: Span::none(),
            "mqtt_message",
            topic = %request.topic,
            payload_size = request.payload.len(),
        );

        async {
            let topic = request.topic.clone();
            let result = match self.service.ready().await {
                Ok(service) => service.call(request).await,
                Err(e) => Err(e),
            };

            if let Err(e) = result {
                error!(topic = %topic, error = %e, "service error processing message");
            }
        }
        .instrument(span)
        .await
    }
}
