use crate::domain::{Connection, ConnectionId, ConnectionLink, ConnectionState, Outbound, OutboundSender};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::{debug, warn};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("connection {0} is not registered")]
    UnknownConnection(ConnectionId),

    #[error("device identity cannot change from '{bound}' to '{requested}'")]
    DeviceIdentityChanged { bound: String, requested: String },
}

/// Result of binding a device identifier to a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindOutcome {
    /// First binding for this device.
    Bound,
    /// The device index already pointed at this connection.
    Unchanged,
    /// Another connection held the device; it stays registered but is no
    /// longer reachable by device lookup.
    Displaced(ConnectionId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RegistryStats {
    pub connections: usize,
    pub devices: usize,
}

#[derive(Default)]
struct RegistryState {
    connections: HashMap<ConnectionId, Connection>,
    devices: HashMap<String, ConnectionId>,
}

impl RegistryState {
    /// Remove a connection from both indices in one step.
    fn remove(&mut self, id: ConnectionId) -> Option<Connection> {
        let mut connection = self.connections.remove(&id)?;
        if let Some(device_id) = &connection.device_id {
            if self.devices.get(device_id) == Some(&id) {
                self.devices.remove(device_id);
            }
        }
        connection.state = ConnectionState::Closed;
        connection.link.terminate();
        Some(connection)
    }
}

/// Owns every live ingress connection, indexed by connection identity and by
/// bound device identifier.
///
/// Both indices sit behind one lock, so every mutation updates them together.
pub struct ConnectionRegistry {
    state: RwLock<RegistryState>,
    next_id: AtomicU64,
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(RegistryState::default()),
            next_id: AtomicU64::new(1),
        }
    }

    pub async fn register(&self, remote_addr: impl Into<String>, sender: OutboundSender) -> ConnectionLink {
        let id = ConnectionId::new(self.next_id.fetch_add(1, Ordering::Relaxed));
        let link = ConnectionLink::new(id, remote_addr, sender);
        let connection = Connection::new(link.clone());

        let mut state = self.state.write().await;
        state.connections.insert(id, connection);
        link
    }

    /// Bind `device_id` to connection `id`. The most recent binding wins the
    /// device index; a connection can never switch to a different device.
    pub async fn bind(&self, id: ConnectionId, device_id: &str) -> Result<BindOutcome, RegistryError> {
        let mut state = self.state.write().await;

        let connection = state
            .connections
            .get_mut(&id)
            .ok_or(RegistryError::UnknownConnection(id))?;

        match &connection.device_id {
            Some(bound) if bound != device_id => {
                return Err(RegistryError::DeviceIdentityChanged {
                    bound: bound.clone(),
                    requested: device_id.to_string(),
                });
            }
            Some(_) => {}
            None => connection.device_id = Some(device_id.to_string()),
        }

        let outcome = match state.devices.insert(device_id.to_string(), id) {
            None => BindOutcome::Bound,
            Some(previous) if previous == id => BindOutcome::Unchanged,
            Some(previous) => BindOutcome::Displaced(previous),
        };

        if let BindOutcome::Displaced(previous) = outcome {
            warn!(
                device_id = %device_id,
                connection_id = %id,
                displaced_connection_id = %previous,
                "device bound to a newer connection, previous connection left unreachable"
            );
        }
        Ok(outcome)
    }

    pub async fn lookup_by_device(&self, device_id: &str) -> Option<ConnectionLink> {
        let state = self.state.read().await;
        let id = state.devices.get(device_id)?;
        state
            .connections
            .get(id)
            .filter(|connection| connection.is_open())
            .map(|connection| connection.link.clone())
    }

    pub async fn get(&self, id: ConnectionId) -> Option<ConnectionLink> {
        let state = self.state.read().await;
        state.connections.get(&id).map(|c| c.link.clone())
    }

    /// Remove a connection from both indices and stop its session and
    /// heartbeat. Returns `None` if it was already gone.
    pub async fn unregister(&self, id: ConnectionId) -> Option<Connection> {
        let mut state = self.state.write().await;
        let removed = state.remove(id);
        if removed.is_some() {
            debug!(connection_id = %id, "connection unregistered");
        }
        removed
    }

    /// Visit every open connection while holding the read lock.
    pub async fn for_each_open<F>(&self, mut f: F)
    where
        F: FnMut(&Connection),
    {
        let state = self.state.read().await;
        state
            .connections
            .values()
            .filter(|connection| connection.is_open())
            .for_each(|connection| f(connection));
    }

    /// Touch the activity timestamp and count one message. Returns the new
    /// message counter.
    pub async fn record_activity(&self, id: ConnectionId) -> Result<u64, RegistryError> {
        let mut state = self.state.write().await;
        let connection = state
            .connections
            .get_mut(&id)
            .ok_or(RegistryError::UnknownConnection(id))?;
        connection.last_activity = Instant::now();
        connection.message_count += 1;
        Ok(connection.message_count)
    }

    /// Add an abuse penalty to the message counter. Returns the new counter.
    pub async fn add_penalty(&self, id: ConnectionId, penalty: u64) -> Result<u64, RegistryError> {
        let mut state = self.state.write().await;
        let connection = state
            .connections
            .get_mut(&id)
            .ok_or(RegistryError::UnknownConnection(id))?;
        connection.message_count = connection.message_count.saturating_add(penalty);
        Ok(connection.message_count)
    }

    /// Remove every connection idle for longer than `idle_timeout`.
    ///
    /// Removal happens under the write lock, so a connection is reaped at
    /// most once even if passes overlap.
    pub async fn reap_idle(&self, idle_timeout: Duration) -> Vec<Connection> {
        let now = Instant::now();
        let mut state = self.state.write().await;

        let idle: Vec<ConnectionId> = state
            .connections
            .values()
            .filter(|connection| now.duration_since(connection.last_activity) > idle_timeout)
            .map(|connection| connection.id())
            .collect();

        idle.into_iter().filter_map(|id| state.remove(id)).collect()
    }

    /// Send a shutdown close frame to every open connection. Returns how
    /// many were notified.
    pub async fn close_all(&self) -> usize {
        let mut notified = 0;
        self.for_each_open(|connection| {
            if connection.link.send(Outbound::shutdown()) {
                notified += 1;
            }
        })
        .await;
        notified
    }

    pub async fn stats(&self) -> RegistryStats {
        let state = self.state.read().await;
        RegistryStats {
            connections: state.connections.len(),
            devices: state.devices.len(),
        }
    }
}
