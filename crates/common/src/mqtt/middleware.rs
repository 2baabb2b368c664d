use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Instant;

use crate::mqtt::{ConsumeOutcome, InboundPublish};
use tower::{Layer, Service};
use tracing::{error, info, warn, Instrument, Span};

/// Tower layer that logs every consumed broker message with its outcome
/// and processing time.
#[derive(Clone, Default)]
pub struct MqttConsumeLoggingLayer;

impl MqttConsumeLoggingLayer {
    pub fn new() -> Self {
        Self
    }
}

impl<S> Layer<S> for MqttConsumeLoggingLayer {
    type Service = MqttConsumeLoggingService<S>;

    fn layer(&self, service: S) -> Self::Service {
        MqttConsumeLoggingService { inner: service }
    }
}

#[derive(Clone)]
pub struct MqttConsumeLoggingService<S> {
    inner: S,
}

impl<S> Service<InboundPublish> for MqttConsumeLoggingService<S>
where
    S: Service<InboundPublish, Response = ConsumeOutcome> + Clone + Send + 'static,
    S::Error: std::fmt::Display + Send,
    S::Future: Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: InboundPublish) -> Self::Future {
        let topic = req.topic.clone();
        let payload_size = req.payload.len();
        let start = Instant::now();
        // Take the service that was driven to readiness, leave a fresh clone behind.
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);

        let span = Span::current();

        Box::pin(
            async move {
                let result = inner.call(req).await;
                let duration_ms = start.elapsed().as_millis();

                match &result {
                    Ok(ConsumeOutcome::Handled) => {
                        info!(
                            topic = %topic,
                            payload_bytes = payload_size,
                            outcome = "handled",
                            duration_ms = %duration_ms,
                            "consumed from {topic} in {duration_ms}ms [handled]"
                        );
                    }
                    Ok(ConsumeOutcome::Dropped(reason)) => {
                        warn!(
                            topic = %topic,
                            payload_bytes = payload_size,
                            outcome = "dropped",
                            reason = %reason,
                            duration_ms = %duration_ms,
                            "consumed from {topic} in {duration_ms}ms [dropped]"
                        );
                    }
                    Err(e) => {
                        error!(
                            topic = %topic,
                            payload_bytes = payload_size,
                            duration_ms = %duration_ms,
                            error = %e,
                            "failed to consume from {topic} in {duration_ms}ms: {e}"
                        );
                    }
                }

                result
            }
            .instrument(span),
        )
    }
}
