use std::path::PathBuf;
use std::time::Duration;

/// Client certificate material for mutual TLS with the broker.
#[derive(Debug, Clone)]
pub struct MqttTlsConfig {
    pub ca_path: PathBuf,
    pub cert_path: PathBuf,
    pub key_path: PathBuf,
}

#[derive(Debug, Clone)]
pub struct MqttConfig {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub credentials: Option<(String, String)>,
    pub tls: Option<MqttTlsConfig>,
    pub keep_alive: Duration,
    pub reconnect_delay: Duration,
    /// Largest packet accepted or sent, in bytes.
    pub max_packet_bytes: usize,
    /// Capacity of the client request channel. A publish is refused while
    /// the channel is full.
    pub request_capacity: usize,
    /// How long a publish waits for PUBACK/PUBCOMP before it is reported lost.
    pub ack_timeout: Duration,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 1883,
            client_id: "fieldstream".to_string(),
            credentials: None,
            tls: None,
            keep_alive: Duration::from_secs(60),
            reconnect_delay: Duration::from_secs(1),
            max_packet_bytes: 11 * 1024 * 1024,
            request_capacity: 1024,
            ack_timeout: Duration::from_secs(10),
        }
    }
}
