use crate::domain::{spawn_heartbeat, IngressBridgeService, Outbound, OutboundReceiver};
use common::domain::DomainError;
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::{CloseFrame, WebSocketConfig};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, instrument, warn};

/// How long a finished session waits for queued frames to drain.
const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub heartbeat_interval: Duration,
    /// Transport-level frame limit. Kept above the validator's cap so that
    /// oversized messages get a proper error reply instead of a dropped socket.
    pub max_frame_bytes: usize,
}

impl SessionSettings {
    pub fn websocket_config(&self) -> WebSocketConfig {
        WebSocketConfig {
            max_message_size: Some(self.max_frame_bytes),
            max_frame_size: Some(self.max_frame_bytes),
            ..WebSocketConfig::default()
        }
    }
}

/// Serve one accepted device socket until it closes.
///
/// The session owns the transport. Other tasks reach the device only through
/// the registry's [`crate::domain::ConnectionLink`], whose frames are drained
/// here by a dedicated writer task.
#[instrument(skip_all, fields(remote = %remote))]
pub async fn serve_connection<T>(
    stream: T,
    remote: SocketAddr,
    service: Arc<IngressBridgeService>,
    settings: SessionSettings,
) where
    T: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let ws = match tokio_tungstenite::accept_async_with_config(stream, Some(settings.websocket_config())).await {
        Ok(ws) => ws,
        Err(e) => {
            warn!(error = %e, "websocket handshake failed");
            return;
        }
    };

    let (sink, mut source) = ws.split();
    let (tx, rx) = mpsc::unbounded_channel();
    let writer = tokio::spawn(write_frames(sink, rx));

    let link = service.open_connection(&remote.ip().to_string(), tx).await;
    let heartbeat = spawn_heartbeat(link.clone(), settings.heartbeat_interval);
    let closed = link.closed_token();

    loop {
        tokio::select! {
            _ = closed.cancelled() => {
                debug!(connection_id = %link.id(), "connection terminated by bridge");
                break;
            }
            frame = source.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    service.handle_message(link.id(), text.as_bytes()).await;
                }
                Some(Ok(Message::Binary(bytes))) => {
                    service.handle_message(link.id(), &bytes).await;
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    let fault = DomainError::Connection(e.to_string());
                    warn!(connection_id = %link.id(), error = %fault, "closing connection");
                    break;
                }
            }
        }
    }

    let terminated = closed.is_cancelled();
    service.close_connection(link.id()).await;
    heartbeat.abort();
    drop(link);

    if terminated {
        writer.abort();
    } else if tokio::time::timeout(WRITER_DRAIN_TIMEOUT, writer).await.is_err() {
        debug!("writer did not drain in time");
    }
}

type FrameSink<T> = SplitSink<WebSocketStream<T>, Message>;

/// Drain the outbound queue onto the socket. Ends on a close request, when
/// every sender is gone, or on the first write error.
async fn write_frames<T>(mut sink: FrameSink<T>, mut rx: OutboundReceiver)
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    while let Some(outbound) = rx.recv().await {
        let frame = match outbound {
            Outbound::Message(message) => match serde_json::to_string(&message) {
                Ok(text) => Message::Text(text),
                Err(e) => {
                    warn!(error = %e, kind = message.type_name(), "failed to serialize frame");
                    continue;
                }
            },
            Outbound::Close { code, reason } => {
                let close = CloseFrame {
                    code: CloseCode::from(code),
                    reason: reason.into(),
                };
                let _ = sink.send(Message::Close(Some(close))).await;
                break;
            }
        };

        if let Err(e) = sink.send(frame).await {
            debug!(error = %e, "write to closed socket discarded");
            break;
        }
    }
    let _ = sink.close().await;
}
