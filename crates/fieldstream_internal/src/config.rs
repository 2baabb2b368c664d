use common::clickhouse::ClickHouseConfig;
use common::domain::DEFAULT_MAX_MESSAGE_BYTES;
use common::mqtt::{MqttConfig, MqttTlsConfig};
use common::telemetry::{LogFormat, TelemetryConfig};
use config::{Config, ConfigError, Environment};
use distributor::DistributorConfig;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ServiceConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Log output format (json, pretty)
    #[serde(default = "default_log_format")]
    pub log_format: String,

    // OpenTelemetry configuration
    #[serde(default = "default_otel_service_name")]
    pub otel_service_name: String,

    #[serde(default = "default_otel_endpoint")]
    pub otel_endpoint: String,

    #[serde(default)]
    pub otel_enabled: bool,

    // Broker configuration
    #[serde(default = "default_mqtt_host")]
    pub mqtt_host: String,

    #[serde(default = "default_mqtt_port")]
    pub mqtt_port: u16,

    #[serde(default = "default_mqtt_client_id")]
    pub mqtt_client_id: String,

    #[serde(default)]
    pub mqtt_username: Option<String>,

    #[serde(default)]
    pub mqtt_password: Option<String>,

    #[serde(default = "default_true")]
    pub mqtt_tls_enabled: bool,

    #[serde(default = "default_mqtt_ca_path")]
    pub mqtt_ca_path: String,

    #[serde(default = "default_mqtt_cert_path")]
    pub mqtt_cert_path: String,

    #[serde(default = "default_mqtt_key_path")]
    pub mqtt_key_path: String,

    #[serde(default = "default_mqtt_keep_alive_secs")]
    pub mqtt_keep_alive_secs: u64,

    #[serde(default = "default_mqtt_reconnect_delay_ms")]
    pub mqtt_reconnect_delay_ms: u64,

    /// Largest device message the DMZ bridge forwards, in bytes. Keep in
    /// step with the bridge so its envelopes fit the packet limit.
    #[serde(default = "default_max_message_bytes")]
    pub max_message_bytes: usize,

    // Sinks
    /// Root directory for uploaded files, one subdirectory per device
    #[serde(default = "default_file_storage_path")]
    pub file_storage_path: String,

    /// ClickHouse HTTP URL; unset disables the record store
    #[serde(default)]
    pub clickhouse_url: Option<String>,

    #[serde(default = "default_clickhouse_database")]
    pub clickhouse_database: String,

    #[serde(default = "default_clickhouse_username")]
    pub clickhouse_username: String,

    #[serde(default)]
    pub clickhouse_password: String,

    #[serde(default = "default_shutdown_timeout_secs")]
    pub shutdown_timeout_secs: u64,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

fn default_otel_service_name() -> String {
    "fieldstream-internal".to_string()
}

fn default_otel_endpoint() -> String {
    "http://localhost:4317".to_string()
}

fn default_mqtt_host() -> String {
    "internal-mqtt-broker".to_string()
}

fn default_mqtt_port() -> u16 {
    8883
}

fn default_mqtt_client_id() -> String {
    "data-distributor".to_string()
}

fn default_true() -> bool {
    true
}

fn default_mqtt_ca_path() -> String {
    "/certs/ca.crt".to_string()
}

fn default_mqtt_cert_path() -> String {
    "/certs/data-distributor.crt".to_string()
}

fn default_mqtt_key_path() -> String {
    "/certs/data-distributor.key".to_string()
}

fn default_mqtt_keep_alive_secs() -> u64 {
    60
}

fn default_mqtt_reconnect_delay_ms() -> u64 {
    1000
}

fn default_max_message_bytes() -> usize {
    DEFAULT_MAX_MESSAGE_BYTES
}

fn default_file_storage_path() -> String {
    "/data/files".to_string()
}

fn default_clickhouse_database() -> String {
    "fieldstream".to_string()
}

fn default_clickhouse_username() -> String {
    "default".to_string()
}

fn default_shutdown_timeout_secs() -> u64 {
    10
}

impl ServiceConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(Environment::with_prefix("FIELDSTREAM"))
            .build()?;

        config.try_deserialize()
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }

    pub fn telemetry_config(&self) -> TelemetryConfig {
        TelemetryConfig {
            service_name: self.otel_service_name.clone(),
            otel_endpoint: self.otel_endpoint.clone(),
            otel_enabled: self.otel_enabled,
            log_level: self.log_level.clone(),
            log_format: LogFormat::parse(&self.log_format),
        }
    }

    pub fn mqtt_config(&self) -> MqttConfig {
        let credentials = self
            .mqtt_username
            .as_ref()
            .map(|username| (username.clone(), self.mqtt_password.clone().unwrap_or_default()));
        let tls = self.mqtt_tls_enabled.then(|| MqttTlsConfig {
            ca_path: PathBuf::from(&self.mqtt_ca_path),
            cert_path: PathBuf::from(&self.mqtt_cert_path),
            key_path: PathBuf::from(&self.mqtt_key_path),
        });
        let defaults = MqttConfig::default();

        MqttConfig {
            host: self.mqtt_host.clone(),
            port: self.mqtt_port,
            client_id: self.mqtt_client_id.clone(),
            credentials,
            tls,
            keep_alive: Duration::from_secs(self.mqtt_keep_alive_secs),
            reconnect_delay: Duration::from_millis(self.mqtt_reconnect_delay_ms),
            // Broker envelopes wrap the device message, so leave headroom.
            max_packet_bytes: self
                .max_message_bytes
                .saturating_add(1024 * 1024)
                .max(defaults.max_packet_bytes),
            ..defaults
        }
    }

    pub fn distributor_config(&self) -> DistributorConfig {
        let clickhouse = self
            .clickhouse_url
            .as_ref()
            .filter(|url| !url.is_empty())
            .map(|url| ClickHouseConfig {
                url: url.clone(),
                database: self.clickhouse_database.clone(),
                username: self.clickhouse_username.clone(),
                password: self.clickhouse_password.clone(),
            });

        DistributorConfig {
            file_storage_path: PathBuf::from(&self.file_storage_path),
            clickhouse,
        }
    }
}
