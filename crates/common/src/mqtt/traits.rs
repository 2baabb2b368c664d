use crate::domain::{DomainResult, QosLevel};
use async_trait::async_trait;
use bytes::Bytes;

/// Publishes messages to the broker.
///
/// Each publish resolves to a typed outcome; callers decide whether and how
/// to report a failure. There is no retry and no local queue behind this
/// trait: a failed publish is a lost message.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait BrokerPublisher: Send + Sync {
    async fn publish(&self, topic: String, qos: QosLevel, payload: Bytes) -> DomainResult<()>;
}
