use crate::domain::{BridgeServiceConfig, ConnectionRegistry, IngressBridgeService, Reaper, SchedulerConfig};
use crate::mqtt::{command_subscriptions, CommandRelayService};
use crate::websocket::{SessionSettings, WebSocketListener};
use anyhow::Result;
use common::domain::MessageValidator;
use common::mqtt::{
    BrokerPublisher, MqttConfig, MqttConnection, MqttConsumeLoggingLayer, MqttConsumeLoggingService,
    MqttSubscriber,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tower::ServiceBuilder;
use tracing::{debug, info, warn};

pub struct IngressBridgeConfig {
    pub listen_addr: String,
    pub service: BridgeServiceConfig,
    pub scheduler: SchedulerConfig,
    pub max_message_bytes: usize,
    /// How long open sessions get to finish their close handshake on shutdown.
    pub shutdown_grace: Duration,
}

type CommandSubscriber = MqttSubscriber<MqttConsumeLoggingService<CommandRelayService>>;

/// The assembled DMZ bridge: WebSocket listener, message pipeline, command
/// relay and connection reaper around one broker session.
pub struct IngressBridge {
    listener: WebSocketListener,
    subscriber: CommandSubscriber,
    registry: Arc<ConnectionRegistry>,
    reaper: Reaper,
    shutdown_grace: Duration,
}

impl IngressBridge {
    pub async fn new(config: IngressBridgeConfig, mqtt_config: MqttConfig) -> Result<Self> {
        debug!("initializing ingress bridge");
        config.scheduler.validate()?;

        let connection = MqttConnection::new(mqtt_config)?;
        let publisher: Arc<dyn BrokerPublisher> = Arc::new(connection.publisher());

        let registry = Arc::new(ConnectionRegistry::new());
        let service = Arc::new(IngressBridgeService::new(
            registry.clone(),
            MessageValidator::new(config.max_message_bytes),
            publisher,
            config.service,
        ));

        let relay = ServiceBuilder::new()
            .layer(MqttConsumeLoggingLayer::new())
            .service(CommandRelayService::new(registry.clone()));
        let subscriber = connection.into_subscriber(command_subscriptions(), relay);

        let settings = SessionSettings {
            heartbeat_interval: config.scheduler.heartbeat_interval,
            max_frame_bytes: config.max_message_bytes.saturating_mul(2),
        };
        let listener = WebSocketListener::bind(&config.listen_addr, service, settings).await?;

        let reaper = Reaper::new(
            registry.clone(),
            config.scheduler.reaper_interval,
            config.scheduler.idle_timeout,
        );

        Ok(Self {
            listener,
            subscriber,
            registry,
            reaper,
            shutdown_grace: config.shutdown_grace,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Serve until `ctx` is cancelled, then shut down in order: close
    /// notifications to devices, broker disconnect, listener teardown.
    pub async fn run(self, ctx: CancellationToken) -> Result<()> {
        let Self {
            listener,
            subscriber,
            registry,
            reaper,
            shutdown_grace,
        } = self;

        let broker_ctx = CancellationToken::new();
        let subscriber = tokio::spawn(subscriber.run(broker_ctx.clone()));
        let reaper = tokio::spawn(reaper.run(ctx.child_token()));

        info!("ingress bridge running");
        listener.accept_until(&ctx).await;

        let notified = registry.close_all().await;
        info!(connections = notified, "sent shutdown close to open connections");
        if tokio::time::timeout(shutdown_grace, listener.drain_sessions())
            .await
            .is_err()
        {
            warn!(
                grace_secs = shutdown_grace.as_secs(),
                "sessions still open after shutdown grace period"
            );
        }

        broker_ctx.cancel();
        match subscriber.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(error = %e, "command subscriber ended with error"),
            Err(e) => warn!(error = %e, "command subscriber task failed"),
        }
        if let Err(e) = reaper.await {
            warn!(error = %e, "reaper task failed");
        }

        drop(listener);
        info!("ingress bridge stopped");
        Ok(())
    }

    #[allow(clippy::type_complexity)]
    pub fn into_runner_process(
        self,
    ) -> Box<
        dyn FnOnce(
                CancellationToken,
            ) -> std::pin::Pin<Box<dyn std::future::Future<Output = anyhow::Result<()>> + Send>>
            + Send,
    > {
        Box::new(move |ctx| Box::pin(async move { self.run(ctx).await }))
    }
}
