mod config;

use common::telemetry::{init_telemetry, shutdown_telemetry, TelemetryProviders};
use config::ServiceConfig;
use distributor::Distributor;
use fieldstream_runner::Runner;
use tracing::{debug, error, info};

#[tokio::main]
async fn main() {
    let config = match ServiceConfig::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };

    let telemetry_providers: Option<TelemetryProviders> =
        match init_telemetry(&config.telemetry_config()) {
            Ok(providers) => providers,
            Err(e) => {
                eprintln!("Failed to initialize telemetry: {}", e);
                std::process::exit(1);
            }
        };

    info!(
        mqtt_host = %config.mqtt_host,
        mqtt_port = config.mqtt_port,
        file_storage_path = %config.file_storage_path,
        clickhouse_enabled = config.clickhouse_url.is_some(),
        "Starting fieldstream data distributor"
    );
    debug!("Configuration: {:?}", config);

    let distributor =
        match Distributor::new(config.distributor_config(), config.mqtt_config()).await {
            Ok(distributor) => distributor,
            Err(e) => {
                error!(error = %format!("{:#}", e), "Failed to initialize distributor");
                shutdown_telemetry(telemetry_providers);
                std::process::exit(1);
            }
        };

    let status = Runner::new()
        .with_boxed_process(distributor.into_runner_process())
        .with_closer("telemetry", move || async move {
            shutdown_telemetry(telemetry_providers);
            anyhow::Ok(())
        })
        .with_closer_timeout(config.shutdown_timeout())
        .run()
        .await;

    std::process::exit(status.exit_code());
}
