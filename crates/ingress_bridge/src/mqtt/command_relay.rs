use crate::domain::{ConnectionRegistry, ServerMessage};
use common::domain::{Category, QosLevel, Topic};
use common::mqtt::{ConsumeOutcome, InboundPublish, SubscriptionFilter};
use futures::future::BoxFuture;
use serde_json::Value;
use std::sync::Arc;
use std::task::{Context, Poll};
use tower::Service;
use tracing::{debug, info, warn};

/// Broker filters for commands addressed to devices, legacy and tenant scoped.
pub fn command_subscriptions() -> Vec<SubscriptionFilter> {
    vec![
        SubscriptionFilter::new(Topic::legacy_filter(Category::Command), QosLevel::AtLeastOnce),
        SubscriptionFilter::new(Topic::tenant_filter(Category::Command), QosLevel::AtLeastOnce),
    ]
}

/// Tower service forwarding broker commands to the device's live connection.
///
/// Delivery is best effort and at most once: a command for a device with no
/// open connection is dropped.
#[derive(Clone)]
pub struct CommandRelayService {
    registry: Arc<ConnectionRegistry>,
}

impl CommandRelayService {
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self { registry }
    }
}

impl Service<InboundPublish> for CommandRelayService {
    type Response = ConsumeOutcome;
    type Error = anyhow::Error;
    type Future = BoxFuture<'static, Result<ConsumeOutcome, anyhow::Error>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: InboundPublish) -> Self::Future {
        let registry = self.registry.clone();

        Box::pin(async move {
            let topic = match Topic::parse(&req.topic) {
                Ok(topic) if topic.category == Category::Command => topic,
                Ok(_) => {
                    debug!(topic = %req.topic, "ignoring non-command topic");
                    return Ok(ConsumeOutcome::dropped("not a command topic"));
                }
                Err(e) => {
                    warn!(topic = %req.topic, error = %e, "unparseable command topic");
                    return Ok(ConsumeOutcome::dropped(e.to_string()));
                }
            };

            let command: Value = match serde_json::from_slice(&req.payload) {
                Ok(command) => command,
                Err(e) => {
                    warn!(topic = %req.topic, error = %e, "command payload is not valid JSON");
                    return Ok(ConsumeOutcome::dropped(format!("invalid command payload: {}", e)));
                }
            };

            let Some(link) = registry.lookup_by_device(&topic.device_id).await else {
                warn!(device_id = %topic.device_id, "no active connection for device, command dropped");
                return Ok(ConsumeOutcome::dropped("device not connected"));
            };

            if !link.send(ServerMessage::command(command)) {
                warn!(device_id = %topic.device_id, "connection closed before command could be sent");
                return Ok(ConsumeOutcome::dropped("connection closed"));
            }

            info!(
                device_id = %topic.device_id,
                connection_id = %link.id(),
                "command forwarded to device"
            );
            Ok(ConsumeOutcome::handled())
        })
    }
}
