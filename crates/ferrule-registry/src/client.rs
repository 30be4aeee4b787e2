use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock, Weak};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use ferrule_common::protocol::{Address, Directory, FerruleError, MessageCode, Result, WireMessage};
use ferrule_common::transport::{Channel, ChannelConfig, Codec, FrameHandler, TcpConnector};

use crate::ack::{AckTracker, DEFAULT_ACK_GRACE};
use crate::message::{Payload, RegisterMeta, RegistryMessage};
use crate::version::VersionGuard;

/// A registry push that passed the version guard.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryEvent {
    Published(RegisterMeta),
    Cancelled(RegisterMeta),
    Offline(Address),
}

/// Receives registry pushes. Called on the channel's reader task; must not
/// block.
pub trait NotifyListener: Send + Sync {
    fn on_event(&self, event: RegistryEvent);
}

#[derive(Debug, Clone)]
pub struct RegistryClientConfig {
    pub channel: ChannelConfig,
    /// How long a message may stay un-acked before it is sent again.
    pub ack_grace: Duration,
    /// How often un-acked messages are checked.
    pub resend_interval: Duration,
}

impl Default for RegistryClientConfig {
    fn default() -> Self {
        Self {
            channel: ChannelConfig::client(),
            ack_grace: DEFAULT_ACK_GRACE,
            resend_interval: Duration::from_secs(1),
        }
    }
}

struct Inner {
    channel: OnceLock<Channel>,
    codec: Codec,
    next_sequence: AtomicU64,
    versions: Mutex<HashMap<Directory, u64>>,
    acks: Mutex<AckTracker>,
    guard: Mutex<VersionGuard>,
    listener: Arc<dyn NotifyListener>,
}

impl Inner {
    fn channel(&self) -> Result<&Channel> {
        self.channel
            .get()
            .ok_or_else(|| FerruleError::Connection("registry channel not connected".to_string()))
    }

    fn write(&self, message: &RegistryMessage) -> Result<()> {
        self.channel()?.write(message.to_wire(&self.codec)?)
    }

    /// Sends a versioned message and tracks it until acknowledged.
    fn send(&self, payload: Payload) -> Result<u64> {
        let sequence = self.next_sequence.fetch_add(1, Ordering::Relaxed);
        let version = match payload.directory() {
            Some(directory) => {
                let mut versions = self.versions.lock();
                let version = versions.entry(directory.clone()).or_insert(0);
                *version += 1;
                *version
            }
            None => 0,
        };
        let message = RegistryMessage::new(sequence, version, payload);
        self.acks.lock().track(message.clone(), Instant::now());
        self.write(&message)?;
        tracing::debug!(sequence, version, code = ?message.payload.code(), "registry message sent");
        Ok(sequence)
    }

    fn on_message(&self, message: RegistryMessage) {
        let event = match message.payload {
            Payload::Ack { sequence } => {
                if !self.acks.lock().on_ack(sequence) {
                    tracing::debug!(sequence, "ack for unknown sequence");
                }
                return;
            }
            Payload::Subscribe(directory) => {
                tracing::debug!(directory = %directory, "ignoring subscribe on client side");
                return;
            }
            Payload::Publish(meta) => RegistryEvent::Published(meta),
            Payload::PublishCancel(meta) => RegistryEvent::Cancelled(meta),
            Payload::Offline(address) => RegistryEvent::Offline(address),
        };

        // Every push is acknowledged, including stale ones, so the registry
        // stops re-sending them.
        if let Err(err) = self.write(&RegistryMessage::ack(message.sequence)) {
            tracing::warn!(sequence = message.sequence, "failed to ack registry push: {}", err);
        }

        let accepted = match &event {
            RegistryEvent::Published(meta) | RegistryEvent::Cancelled(meta) => {
                self.guard.lock().accept(&meta.directory, message.version)
            }
            RegistryEvent::Offline(_) => true,
        };
        if !accepted {
            tracing::debug!(sequence = message.sequence, version = message.version, "dropping stale registry push");
            return;
        }
        self.listener.on_event(event);
    }

    fn resend_due(&self) -> usize {
        let due = self.acks.lock().due(Instant::now());
        for message in &due {
            tracing::warn!(sequence = message.sequence, "registry message not acked, re-sending");
            if let Err(err) = self.write(message) {
                tracing::warn!(sequence = message.sequence, "re-send failed: {}", err);
            }
        }
        due.len()
    }
}

struct RegistryHandler {
    inner: Weak<Inner>,
}

impl FrameHandler for RegistryHandler {
    fn on_frame(&self, channel: &Channel, message: WireMessage) {
        if message.code == MessageCode::Heartbeat {
            return;
        }
        let Some(inner) = self.inner.upgrade() else {
            return;
        };
        match RegistryMessage::from_wire(&message) {
            Ok(decoded) => inner.on_message(decoded),
            Err(err) => {
                tracing::error!(channel = channel.id(), "malformed registry message: {}", err);
            }
        }
    }

    fn on_closed(&self, channel: &Channel) {
        tracing::info!(channel = channel.id(), "registry channel closed");
    }
}

/// Talks to a registry server over one [`Channel`].
///
/// Providers [`register`](Self::register) and [`unregister`](Self::unregister);
/// consumers [`subscribe`](Self::subscribe) and receive pushes through their
/// [`NotifyListener`]. Every outgoing message is re-sent until the registry
/// acknowledges it.
pub struct RegistryClient {
    inner: Arc<Inner>,
    resend_task: tokio::task::JoinHandle<()>,
}

impl RegistryClient {
    pub async fn connect(
        address: &Address,
        config: RegistryClientConfig,
        listener: Arc<dyn NotifyListener>,
    ) -> Result<Self> {
        let inner = Arc::new(Inner {
            channel: OnceLock::new(),
            codec: Codec::new(),
            next_sequence: AtomicU64::new(1),
            versions: Mutex::new(HashMap::new()),
            acks: Mutex::new(AckTracker::new(config.ack_grace)),
            guard: Mutex::new(VersionGuard::new()),
            listener,
        });

        let handler = Arc::new(RegistryHandler {
            inner: Arc::downgrade(&inner),
        });
        let channel = TcpConnector::new(config.channel.clone())
            .connect(address, handler)
            .await?;
        tracing::info!(registry = %address, channel = channel.id(), "connected to registry");
        let _ = inner.channel.set(channel);

        let resend_task = tokio::spawn(resend_loop(Arc::downgrade(&inner), config.resend_interval));
        Ok(Self { inner, resend_task })
    }

    /// Publishes a provider. Returns the message sequence.
    pub fn register(&self, meta: RegisterMeta) -> Result<u64> {
        self.inner.send(Payload::Publish(meta))
    }

    pub fn unregister(&self, meta: RegisterMeta) -> Result<u64> {
        self.inner.send(Payload::PublishCancel(meta))
    }

    pub fn subscribe(&self, directory: Directory) -> Result<u64> {
        self.inner.send(Payload::Subscribe(directory))
    }

    /// Messages still waiting for an ACK.
    pub fn unacked(&self) -> usize {
        self.inner.acks.lock().len()
    }

    pub fn is_connected(&self) -> bool {
        self.inner.channel.get().is_some_and(Channel::is_active)
    }

    pub fn close(&self) {
        self.resend_task.abort();
        if let Some(channel) = self.inner.channel.get() {
            channel.close();
        }
    }
}

impl Drop for RegistryClient {
    fn drop(&mut self) {
        self.close();
    }
}

async fn resend_loop(inner: Weak<Inner>, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        let Some(inner) = inner.upgrade() else {
            return;
        };
        if !inner.channel.get().is_some_and(Channel::is_active) {
            return;
        }
        inner.resend_due();
    }
}
