mod config;

use common::telemetry::{init_telemetry, shutdown_telemetry, TelemetryProviders};
use config::ServiceConfig;
use fieldstream_runner::Runner;
use ingress_bridge::IngressBridge;
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
        listen_addr = %config.listen_addr(),
        bridge_id = %config.bridge_id,
        mqtt_host = %config.mqtt_host,
        mqtt_port = config.mqtt_port,
        "Starting fieldstream DMZ bridge"
    );
    debug!("Configuration: {:?}", config);

    let bridge = match IngressBridge::new(config.bridge_config(), config.mqtt_config()).await {
        Ok(bridge) => bridge,
        Err(e) => {
            error!(error = %format!("{:#}", e), "Failed to initialize ingress bridge");
            shutdown_telemetry(telemetry_providers);
            std::process::exit(1);
        }
    };

    let status = Runner::new()
        .with_boxed_process(bridge.into_runner_process())
        .with_closer("telemetry", move || async move {
            shutdown_telemetry(telemetry_providers);
            anyhow::Ok(())
        })
        .with_closer_timeout(config.shutdown_timeout())
        .run()
        .await;

    std::process::exit(status.exit_code());
}
