use crate::clickhouse::ClickHouseTelemetryStore;
use crate::domain::{Dispatcher, TelemetryStore};
use crate::mqtt::{distributor_subscriptions, DistributorService};
use anyhow::{Context, Result};
use common::clickhouse::{ClickHouseClient, ClickHouseConfig};
use common::mqtt::{MqttConfig, MqttConnection, MqttConsumeLoggingLayer, MqttConsumeLoggingService, MqttSubscriber};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower::ServiceBuilder;
use tracing::{debug, info, warn};

pub struct DistributorConfig {
    pub file_storage_path: PathBuf,
    /// `None` disables every store write except file bytes.
    pub clickhouse: Option<ClickHouseConfig>,
}

/// The internal-network consumer: broker subscription in front of the
/// dispatcher and its sinks.
pub struct Distributor {
    subscriber: MqttSubscriber<MqttConsumeLoggingService<DistributorService>>,
}

impl Distributor {
    pub async fn new(config: DistributorConfig, mqtt_config: MqttConfig) -> Result<Self> {
        debug!("initializing distributor");

        tokio::fs::create_dir_all(&config.file_storage_path)
            .await
            .with_context(|| {
                format!(
                    "file storage path {} is not usable",
                    config.file_storage_path.display()
                )
            })?;

        let store = match &config.clickhouse {
            Some(clickhouse) => Some(connect_store(clickhouse).await),
            None => {
                warn!("no ClickHouse configured, time-series, event and response writes are disabled");
                None
            }
        };

        let dispatcher = Arc::new(Dispatcher::new(store, config.file_storage_path.clone()));
        let service = ServiceBuilder::new()
            .layer(MqttConsumeLoggingLayer::new())
            .service(DistributorService::new(dispatcher));

        let connection = MqttConnection::new(mqtt_config)?;
        let subscriber = connection.into_subscriber(distributor_subscriptions(), service);

        info!(
            file_storage_path = %config.file_storage_path.display(),
            "distributor initialized"
        );
        Ok(Self { subscriber })
    }

    pub async fn run(self, ctx: CancellationToken) -> Result<()> {
        self.subscriber.run(ctx).await
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

/// Build the store. An unreachable server is not fatal: writes fail per
/// message until it comes back.
async fn connect_store(config: &ClickHouseConfig) -> Arc<dyn TelemetryStore> {
    let store = ClickHouseTelemetryStore::new(ClickHouseClient::new(config));
    if let Err(e) = store.ensure_schema().await {
        warn!(url = %config.url, error = %format!("{:#}", e), "could not prepare ClickHouse schema");
    }
    Arc::new(store)
}
