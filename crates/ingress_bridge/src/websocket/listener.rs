use crate::domain::IngressBridgeService;
use crate::websocket::{serve_connection, SessionSettings};
use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{error, info};

/// Accepts device WebSocket connections and spawns one session per socket.
pub struct WebSocketListener {
    listener: TcpListener,
    service: Arc<IngressBridgeService>,
    settings: SessionSettings,
    sessions: TaskTracker,
}

impl WebSocketListener {
    pub async fn bind(
        addr: &str,
        service: Arc<IngressBridgeService>,
        settings: SessionSettings,
    ) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("failed to bind WebSocket listener on {}", addr))?;
        info!(addr = %addr, "WebSocket listener bound");

        Ok(Self {
            listener,
            service,
            settings,
            sessions: TaskTracker::new(),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept connections until `ctx` is cancelled. The socket itself stays
    /// bound until the listener is dropped.
    pub async fn accept_until(&self, ctx: &CancellationToken) {
        loop {
            tokio::select! {
                _ = ctx.cancelled() => break,
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, remote)) => {
                        let service = self.service.clone();
                        let settings = self.settings.clone();
                        self.sessions.spawn(serve_connection(stream, remote, service, settings));
                    }
                    Err(e) => error!(error = %e, "failed to accept connection"),
                }
            }
        }
    }

    /// Wait for every session spawned so far to finish.
    pub async fn drain_sessions(&self) {
        self.sessions.close();
        self.sessions.wait().await;
    }
}
