use crate::domain::Outbound;
use chrono::{DateTime, Utc};
use std::fmt;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Opaque identity of one accepted device connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn value(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Open,
    Closed,
}

pub type OutboundSender = mpsc::UnboundedSender<Outbound>;
pub type OutboundReceiver = mpsc::UnboundedReceiver<Outbound>;

/// Handle for talking to a live connection from outside its session task.
///
/// Sending goes through the session's writer queue; once the session is
/// gone, sends are silently discarded.
#[derive(Debug, Clone)]
pub struct ConnectionLink {
    id: ConnectionId,
    remote_addr: String,
    sender: OutboundSender,
    closed: CancellationToken,
}

impl ConnectionLink {
    pub fn new(id: ConnectionId, remote_addr: impl Into<String>, sender: OutboundSender) -> Self {
        Self {
            id,
            remote_addr: remote_addr.into(),
            sender,
            closed: CancellationToken::new(),
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn remote_addr(&self) -> &str {
        &self.remote_addr
    }

    /// Queue a frame. Returns false when the connection is already closed.
    pub fn send(&self, outbound: impl Into<Outbound>) -> bool {
        if self.closed.is_cancelled() {
            return false;
        }
        self.sender.send(outbound.into()).is_ok()
    }

    /// Force the session to stop without a close handshake.
    pub fn terminate(&self) {
        self.closed.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled() || self.sender.is_closed()
    }

    /// Resolves once the connection has been terminated or unregistered.
    pub fn closed_token(&self) -> CancellationToken {
        self.closed.clone()
    }
}

/// Registry-side record of one connection.
#[derive(Debug)]
pub struct Connection {
    pub link: ConnectionLink,
    pub device_id: Option<String>,
    pub connected_at: DateTime<Utc>,
    pub last_activity: Instant,
    pub message_count: u64,
    pub state: ConnectionState,
}

impl Connection {
    pub fn new(link: ConnectionLink) -> Self {
        Self {
            link,
            device_id: None,
            connected_at: Utc::now(),
            last_activity: Instant::now(),
            message_count: 0,
            state: ConnectionState::Open,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.link.id()
    }

    pub fn remote_addr(&self) -> &str {
        self.link.remote_addr()
    }

    pub fn is_open(&self) -> bool {
        self.state == ConnectionState::Open && !self.link.is_closed()
    }
}
