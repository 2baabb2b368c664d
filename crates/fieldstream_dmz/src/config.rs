use common::domain::DEFAULT_MAX_MESSAGE_BYTES;
use common::mqtt::{MqttConfig, MqttTlsConfig};
use common::telemetry::{LogFormat, TelemetryConfig};
use config::{Config, ConfigError, Environment};
use ingress_bridge::{BridgeServiceConfig, IngressBridgeConfig, SchedulerConfig};
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

    // WebSocket listener
    #[serde(default = "default_listen_host")]
    pub listen_host: String,

    #[serde(default = "default_listen_port")]
    pub listen_port: u16,

    /// Identifier stamped into the metadata of every published message
    #[serde(default = "default_bridge_id")]
    pub bridge_id: String,

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

    /// Connect with mutual TLS using the three certificate paths below
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

    /// How long a device ack waits for the broker's PUBACK
    #[serde(default = "default_mqtt_ack_timeout_ms")]
    pub mqtt_ack_timeout_ms: u64,

    // Message pipeline
    /// Largest accepted device message, in bytes
    #[serde(default = "default_max_message_bytes")]
    pub max_message_bytes: usize,

    #[serde(default = "default_heartbeat_interval_secs")]
    pub heartbeat_interval_secs: u64,

    #[serde(default = "default_reaper_interval_secs")]
    pub reaper_interval_secs: u64,

    /// Connections silent for longer than this are closed by the reaper
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,

    /// Count added to a connection's message count per rejected message
    #[serde(default = "default_abuse_penalty")]
    pub abuse_penalty: u64,

    /// Message count above which a connection is terminated
    #[serde(default = "default_abuse_threshold")]
    pub abuse_threshold: u64,

    /// Upper bound for shutdown: session drain and each cleanup step
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
    "fieldstream-dmz".to_string()
}

fn default_otel_endpoint() -> String {
    "http://localhost:4317".to_string()
}

fn default_listen_host() -> String {
    "0.0.0.0".to_string()
}

fn default_listen_port() -> u16 {
    8080
}

fn default_bridge_id() -> String {
    "dmz-bridge".to_string()
}

fn default_mqtt_host() -> String {
    "mqtt-broker".to_string()
}

fn default_mqtt_port() -> u16 {
    8883
}

fn default_mqtt_client_id() -> String {
    "dmz-websocket-bridge".to_string()
}

fn default_true() -> bool {
    true
}

fn default_mqtt_ca_path() -> String {
    "/certs/ca.crt".to_string()
}

fn default_mqtt_cert_path() -> String {
    "/certs/dmz-server.crt".to_string()
}

fn default_mqtt_key_path() -> String {
    "/certs/dmz-server.key".to_string()
}

fn default_mqtt_keep_alive_secs() -> u64 {
    60
}

fn default_mqtt_reconnect_delay_ms() -> u64 {
    1000
}

fn default_mqtt_ack_timeout_ms() -> u64 {
    10_000
}

fn default_max_message_bytes() -> usize {
    DEFAULT_MAX_MESSAGE_BYTES
}

fn default_heartbeat_interval_secs() -> u64 {
    30
}

fn default_reaper_interval_secs() -> u64 {
    60
}

fn default_idle_timeout_secs() -> u64 {
    300
}

fn default_abuse_penalty() -> u64 {
    10
}

fn default_abuse_threshold() -> u64 {
    1000
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

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.listen_host, self.listen_port)
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
            // Published envelopes wrap the device message, so leave headroom.
            max_packet_bytes: self
                .max_message_bytes
                .saturating_add(1024 * 1024)
                .max(defaults.max_packet_bytes),
            request_capacity: defaults.request_capacity,
            ack_timeout: Duration::from_millis(self.mqtt_ack_timeout_ms),
        }
    }

    pub fn bridge_config(&self) -> IngressBridgeConfig {
        IngressBridgeConfig {
            listen_addr: self.listen_addr(),
            service: BridgeServiceConfig {
                bridge_id: self.bridge_id.clone(),
                abuse_penalty: self.abuse_penalty,
                abuse_threshold: self.abuse_threshold,
            },
            scheduler: SchedulerConfig {
                heartbeat_interval: Duration::from_secs(self.heartbeat_interval_secs),
                reaper_interval: Duration::from_secs(self.reaper_interval_secs),
                idle_timeout: Duration::from_secs(self.idle_timeout_secs),
            },
            max_message_bytes: self.max_message_bytes,
            shutdown_grace: self.shutdown_timeout(),
        }
    }
}
