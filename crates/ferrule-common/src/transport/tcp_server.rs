use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;

use crate::protocol::error::{FerruleError, Result};
use crate::transport::channel::{Channel, ChannelConfig, FrameHandler};

/// Pause after a failed `accept` (e.g. file descriptor exhaustion).
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Accepting side of the transport.
///
/// Every accepted connection becomes a [`Channel`] whose frames go to the
/// shared handler.
pub struct TcpAcceptor {
    listener: TcpListener,
    config: ChannelConfig,
}

impl TcpAcceptor {
    /// Binds to `bind_addr` (e.g. "0.0.0.0:18090").
    pub async fn bind(bind_addr: &str, config: ChannelConfig) -> Result<Self> {
        let listener = TcpListener::bind(bind_addr)
            .await
            .map_err(|e| FerruleError::Connection(format!("Failed to bind to {}: {}", bind_addr, e)))?;

        Ok(Self { listener, config })
    }

    /// Gets the actual bound address.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.listener
            .local_addr()
            .map_err(|e| FerruleError::Connection(format!("Failed to get local addr: {}", e)))
    }

    /// Accepts connections until the task is dropped.
    pub async fn run(&self, handler: Arc<dyn FrameHandler>) -> Result<()> {
        loop {
            let (stream, peer_addr) = match self.listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    tracing::warn!("accept failed: {}", e);
                    tokio::time::sleep(ACCEPT_BACKOFF).await;
                    continue;
                }
            };

            match Channel::spawn(stream, &self.config, handler.clone()) {
                Ok(channel) => {
                    tracing::info!(channel = channel.id(), remote = %peer_addr, "connection accepted")
                }
                Err(e) => tracing::warn!(remote = %peer_addr, "failed to set up connection: {}", e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::message::{MessageCode, SerializerType};
    use crate::protocol::{Address, WireMessage};
    use crate::transport::TcpConnector;

    /// Replies to every frame with an ACK carrying the same id.
    struct AckEverything;

    impl FrameHandler for AckEverything {
        fn on_frame(&self, channel: &Channel, message: WireMessage) {
            let ack = WireMessage::new(MessageCode::Ack, SerializerType::Json, message.id, Vec::new());
            let _ = channel.write(ack);
        }
    }

    struct Collect(tokio::sync::mpsc::UnboundedSender<WireMessage>);

    impl FrameHandler for Collect {
        fn on_frame(&self, _channel: &Channel, message: WireMessage) {
            let _ = self.0.send(message);
        }
    }

    #[tokio::test]
    async fn test_bind_reports_local_addr() {
        let acceptor = TcpAcceptor::bind("127.0.0.1:0", ChannelConfig::server()).await.unwrap();
        assert_ne!(acceptor.local_addr().unwrap().port(), 0);
    }

    #[tokio::test]
    async fn test_bind_conflict_is_connection_error() {
        let first = TcpAcceptor::bind("127.0.0.1:0", ChannelConfig::server()).await.unwrap();
        let addr = first.local_addr().unwrap().to_string();
        assert!(matches!(
            TcpAcceptor::bind(&addr, ChannelConfig::server()).await,
            Err(FerruleError::Connection(_))
        ));
    }

    #[tokio::test]
    async fn test_accepted_channels_reply() {
        let acceptor = TcpAcceptor::bind("127.0.0.1:0", ChannelConfig::server()).await.unwrap();
        let addr = acceptor.local_addr().unwrap();
        let server = tokio::spawn(async move { acceptor.run(Arc::new(AckEverything)).await });

        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let channel = TcpConnector::default()
            .connect(&Address::from(addr), Arc::new(Collect(tx)))
            .await
            .unwrap();
        channel
            .write(WireMessage::new(MessageCode::Request, SerializerType::Json, 99, &b"{}"[..]))
            .unwrap();

        let reply = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(reply.code, MessageCode::Ack);
        assert_eq!(reply.id, 99);

        server.abort();
    }
}
