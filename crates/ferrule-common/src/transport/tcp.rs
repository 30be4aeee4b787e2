use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpStream;

use crate::protocol::error::{FerruleError, Result};
use crate::protocol::Address;
use crate::transport::channel::{Channel, ChannelConfig, FrameHandler};

/// Default timeout for establishing a connection (5 seconds)
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Client-side connector producing framed [`Channel`]s.
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
/// use ferrule_common::protocol::{Address, WireMessage};
/// use ferrule_common::transport::{Channel, ChannelConfig, FrameHandler, TcpConnector};
///
/// struct Print;
///
/// impl FrameHandler for Print {
///     fn on_frame(&self, channel: &Channel, message: WireMessage) {
///         println!("channel {} got {:?}", channel.id(), message);
///     }
/// }
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let connector = TcpConnector::new(ChannelConfig::client());
/// let channel = connector.connect(&Address::new("127.0.0.1", 18090), Arc::new(Print)).await?;
/// channel.write(WireMessage::heartbeat())?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct TcpConnector {
    config: ChannelConfig,
    connect_timeout: Duration,
}

impl TcpConnector {
    pub fn new(config: ChannelConfig) -> Self {
        Self {
            config,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn config(&self) -> &ChannelConfig {
        &self.config
    }

    /// Connects to `address` and starts the channel's I/O tasks.
    ///
    /// The host may resolve to several socket addresses; each is tried in
    /// turn until one accepts.
    pub async fn connect(&self, address: &Address, handler: Arc<dyn FrameHandler>) -> Result<Channel> {
        let target = address.to_string();
        let socket_addrs = tokio::net::lookup_host(&target)
            .await
            .map_err(|e| FerruleError::Connection(format!("Invalid address '{}': {}", target, e)))?;

        let mut last_err = None;
        for socket_addr in socket_addrs {
            match tokio::time::timeout(self.connect_timeout, TcpStream::connect(socket_addr)).await {
                Ok(Ok(stream)) => {
                    let channel = Channel::spawn(stream, &self.config, handler)?;
                    tracing::info!(channel = channel.id(), remote = %socket_addr, "connected");
                    return Ok(channel);
                }
                Ok(Err(e)) => last_err = Some(map_io_error(e, &target)),
                Err(_) => {
                    last_err = Some(FerruleError::Connection(format!(
                        "connect to {} timed out after {:?}",
                        socket_addr, self.connect_timeout
                    )))
                }
            }
        }

        Err(last_err.unwrap_or_else(|| {
            FerruleError::Connection(format!("'{}' resolved to no addresses", target))
        }))
    }
}

impl Default for TcpConnector {
    fn default() -> Self {
        Self::new(ChannelConfig::client())
    }
}

/// Maps connect failures to the error taxonomy.
fn map_io_error(err: std::io::Error, target: &str) -> FerruleError {
    match err.kind() {
        std::io::ErrorKind::ConnectionRefused
        | std::io::ErrorKind::ConnectionReset
        | std::io::ErrorKind::ConnectionAborted
        | std::io::ErrorKind::NotConnected => {
            FerruleError::Connection(format!("Failed to connect to {}: {}", target, err))
        }
        _ => FerruleError::from(err),
    }
}
