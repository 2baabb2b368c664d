use crate::domain::{Dispatcher, SinkOutcome};
use common::domain::{Category, QosLevel, Topic};
use common::mqtt::{ConsumeOutcome, InboundPublish, SubscriptionFilter};
use futures::future::BoxFuture;
use std::sync::Arc;
use std::task::{Context, Poll};
use tower::Service;
use tracing::{error, warn};

/// Legacy and tenant scoped filters for every category, all at QoS 1.
pub fn distributor_subscriptions() -> Vec<SubscriptionFilter> {
    Category::ALL
        .iter()
        .flat_map(|category| {
            [
                SubscriptionFilter::new(Topic::legacy_filter(*category), QosLevel::AtLeastOnce),
                SubscriptionFilter::new(Topic::tenant_filter(*category), QosLevel::AtLeastOnce),
            ]
        })
        .collect()
}

/// Tower service feeding broker messages into the [`Dispatcher`].
///
/// Every failure is contained here: it is logged and reported as a dropped
/// message, so one bad message never affects the next.
#[derive(Clone)]
pub struct DistributorService {
    dispatcher: Arc<Dispatcher>,
}

impl DistributorService {
    pub fn new(dispatcher: Arc<Dispatcher>) -> Self {
        Self { dispatcher }
    }
}

impl Service<InboundPublish> for DistributorService {
    type Response = ConsumeOutcome;
    type Error = anyhow::Error;
    type Future = BoxFuture<'static, Result<ConsumeOutcome, anyhow::Error>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: InboundPublish) -> Self::Future {
        let dispatcher = self.dispatcher.clone();

        Box::pin(async move {
            match dispatcher.dispatch(&req.topic, &req.payload).await {
                Ok(dispatched) => match dispatched.outcome {
                    SinkOutcome::Written(_) => Ok(ConsumeOutcome::handled()),
                    SinkOutcome::Skipped(reason) => Ok(ConsumeOutcome::dropped(reason)),
                },
                Err(e) => {
                    error!(topic = %req.topic, error = %e, "failed to process message");
                    Ok(ConsumeOutcome::dropped(e.to_string()))
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::MockTelemetryStore;
    use bytes::Bytes;
    use common::domain::DomainError;
    use tower::ServiceExt;

    #[test]
    fn test_subscriptions_cover_both_scopes() {
        let filters: Vec<String> = distributor_subscriptions()
            .into_iter()
            .map(|f| f.filter)
            .collect();

        assert_eq!(filters.len(), 10);
        for expected in [
            "sensors/+/data",
            "files/+/data",
            "events/+/data",
            "commands/+/response",
            "tenants/+/devices/+/sensors/data",
            "tenants/+/devices/+/files/data",
            "tenants/+/devices/+/events/data",
            "tenants/+/devices/+/commands/response",
        ] {
            assert!(filters.iter().any(|f| f == expected), "missing {}", expected);
        }
    }

    #[tokio::test]
    async fn test_failure_does_not_stop_next_message() {
        let mut store = MockTelemetryStore::new();
        let mut calls = 0;
        store.expect_write_event().times(2).returning(move |_| {
            calls += 1;
            if calls == 1 {
                Err(DomainError::SinkWrite("timeout".to_string()))
            } else {
                Ok(())
            }
        });

        let dir = tempfile::tempdir().unwrap();
        let mut service = DistributorService::new(Arc::new(Dispatcher::new(
            Some(Arc::new(store)),
            dir.path(),
        )));

        let first = service
            .ready()
            .await
            .unwrap()
            .call(InboundPublish::new("events/d1/data", Bytes::from_static(br#"{"payload":{}}"#)))
            .await
            .unwrap();
        assert!(!first.is_handled());

        let garbage = service
            .ready()
            .await
            .unwrap()
            .call(InboundPublish::new("events/d1/data", Bytes::from_static(b"\xff\xfe")))
            .await
            .unwrap();
        assert!(!garbage.is_handled());

        let second = service
            .ready()
            .await
            .unwrap()
            .call(InboundPublish::new("events/d1/data", Bytes::from_static(br#"{"payload":{}}"#)))
            .await
            .unwrap();
        assert!(second.is_handled());
    }

    #[tokio::test]
    async fn test_missing_store_reports_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let outcome = DistributorService::new(Arc::new(Dispatcher::new(None, dir.path())))
            .oneshot(InboundPublish::new(
                "sensors/d1/data",
                Bytes::from_static(br#"{"payload":{"temp":1}}"#),
            ))
            .await
            .unwrap();
        assert!(!outcome.is_handled());
    }
}
