use crate::domain::{ConnectionLink, ConnectionRegistry, ServerMessage};
use chrono::Utc;
use common::domain::{DomainError, DomainResult};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
pub const DEFAULT_REAPER_INTERVAL: Duration = Duration::from_secs(60);
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(300);

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub heartbeat_interval: Duration,
    pub reaper_interval: Duration,
    pub idle_timeout: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            reaper_interval: DEFAULT_REAPER_INTERVAL,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
        }
    }
}

impl SchedulerConfig {
    /// Zero periods would spin the timers, so they are rejected at startup.
    pub fn validate(&self) -> DomainResult<()> {
        let periods = [
            ("heartbeat_interval", self.heartbeat_interval),
            ("reaper_interval", self.reaper_interval),
            ("idle_timeout", self.idle_timeout),
        ];
        for (name, period) in periods {
            if period.is_zero() {
                return Err(DomainError::Configuration(format!("{} must be non-zero", name)));
            }
        }
        Ok(())
    }
}

/// Ping one connection every `interval` until it closes.
///
/// The task is tied to the connection's close token, so terminating or
/// unregistering the connection stops it.
pub fn spawn_heartbeat(link: ConnectionLink, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let closed = link.closed_token();
        let mut ticker = interval_at(Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = closed.cancelled() => break,
                _ = ticker.tick() => {
                    if !link.send(ServerMessage::ping(Utc::now())) {
                        break;
                    }
                }
            }
        }
        debug!(connection_id = %link.id(), "heartbeat stopped");
    })
}

/// Periodically evicts idle connections and reports bridge health.
pub struct Reaper {
    registry: Arc<ConnectionRegistry>,
    interval: Duration,
    idle_timeout: Duration,
}

impl Reaper {
    pub fn new(registry: Arc<ConnectionRegistry>, interval: Duration, idle_timeout: Duration) -> Self {
        Self {
            registry,
            interval,
            idle_timeout,
        }
    }

    pub async fn run(self, ctx: CancellationToken) -> anyhow::Result<()> {
        info!(
            interval_secs = self.interval.as_secs(),
            idle_timeout_secs = self.idle_timeout.as_secs(),
            "starting connection reaper"
        );

        let mut ticker = interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ctx.cancelled() => break,
                _ = ticker.tick() => {
                    self.reap_once().await;
                }
            }
        }

        info!("connection reaper stopped");
        Ok(())
    }

    /// One pass: close every idle connection, then log health. Returns the
    /// number of connections reaped.
    pub async fn reap_once(&self) -> usize {
        let reaped = self.registry.reap_idle(self.idle_timeout).await;

        for connection in &reaped {
            info!(
                connection_id = %connection.id(),
                device_id = connection.device_id.as_deref().unwrap_or("unbound"),
                connected_at = %connection.connected_at,
                "closed idle connection"
            );
        }

        let stats = self.registry.stats().await;
        info!(
            active_connections = stats.connections,
            unique_devices = stats.devices,
            reaped = reaped.len(),
            "bridge health"
        );

        reaped.len()
    }
}
