//! One framed TCP connection.
//!
//! A [`Channel`] owns two tasks:
//!
//! - a **writer** task, the single consumer of the channel's outbound
//!   [`BoundedMpscQueue`](crate::queue::BoundedMpscQueue). Any thread may call
//!   [`Channel::write`]; the writer drains in batches, encodes and flushes.
//!   Frames written with [`Channel::write_tracked`] have their flag raised
//!   only once the batch carrying them reached the socket.
//!   When heartbeats are enabled it emits a HEARTBEAT frame after
//!   `heartbeat_interval` without outbound traffic.
//! - a **reader** task, which runs the resumable [`FrameDecoder`] and hands
//!   every complete frame to the channel's [`FrameHandler`]. A protocol
//!   violation, EOF, I/O error or read-idle timeout closes the channel.
//!
//! [`FrameHandler::on_closed`] fires exactly once per channel, whoever
//! closes it.

use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use crossbeam_utils::Backoff;
use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{watch, Notify};

use crate::protocol::error::{FerruleError, Result};
use crate::protocol::WireMessage;
use crate::queue::{self, Consumer, Producer};
use crate::transport::frame::{encode_frame, FrameDecoder, DEFAULT_MAX_BODY_SIZE};

/// Frames drained from the outbound queue per flush.
const WRITE_BATCH: usize = 128;

const READ_BUFFER_SIZE: usize = 16 * 1024;

static NEXT_CHANNEL_ID: AtomicU64 = AtomicU64::new(1);

/// A queued frame and the flag to raise once it is flushed.
struct Outbound {
    message: WireMessage,
    written: Option<Arc<AtomicBool>>,
}

/// Per-connection settings.
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// Outbound queue capacity, rounded up to a power of two.
    pub queue_capacity: usize,
    pub max_body_size: usize,
    /// Send a HEARTBEAT after this long without outbound frames.
    pub heartbeat_interval: Option<Duration>,
    /// Close the channel after this long without inbound frames.
    pub read_idle_timeout: Option<Duration>,
    /// How many times `write` retries a full outbound queue before giving up.
    pub full_queue_spins: usize,
}

impl ChannelConfig {
    /// Consumer side: heartbeats on, no idle reaping.
    pub fn client() -> Self {
        Self {
            queue_capacity: 1024,
            max_body_size: DEFAULT_MAX_BODY_SIZE,
            heartbeat_interval: Some(Duration::from_secs(30)),
            read_idle_timeout: None,
            full_queue_spins: 64,
        }
    }

    /// Provider side: no heartbeats, reap connections idle for 90 s.
    pub fn server() -> Self {
        Self {
            heartbeat_interval: None,
            read_idle_timeout: Some(Duration::from_secs(90)),
            ..Self::client()
        }
    }

    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    pub fn with_max_body_size(mut self, max_body_size: usize) -> Self {
        self.max_body_size = max_body_size;
        self
    }

    pub fn with_heartbeat_interval(mut self, interval: Option<Duration>) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    pub fn with_read_idle_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.read_idle_timeout = timeout;
        self
    }

    pub fn with_full_queue_spins(mut self, spins: usize) -> Self {
        self.full_queue_spins = spins;
        self
    }
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self::client()
    }
}

/// Receives inbound frames and the close notification of a channel.
///
/// Both methods run on the channel's reader task and must not block.
pub trait FrameHandler: Send + Sync + 'static {
    fn on_frame(&self, channel: &Channel, message: WireMessage);

    fn on_closed(&self, _channel: &Channel) {}
}

struct ChannelInner {
    id: u64,
    remote_addr: SocketAddr,
    local_addr: SocketAddr,
    outbound: Producer<Outbound>,
    writable: Notify,
    closed: AtomicBool,
    closed_tx: watch::Sender<bool>,
    handler: Mutex<Option<Arc<dyn FrameHandler>>>,
    full_queue_spins: usize,
}

/// Cloneable handle to a live (or closed) connection.
#[derive(Clone)]
pub struct Channel {
    inner: Arc<ChannelInner>,
}

impl Channel {
    /// Takes ownership of `stream` and spawns its reader and writer tasks.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn(stream: TcpStream, config: &ChannelConfig, handler: Arc<dyn FrameHandler>) -> Result<Self> {
        let remote_addr = stream.peer_addr()?;
        let local_addr = stream.local_addr()?;
        stream.set_nodelay(true)?;

        let (producer, consumer) = queue::bounded(config.queue_capacity);
        let (closed_tx, _) = watch::channel(false);
        let channel = Channel {
            inner: Arc::new(ChannelInner {
                id: NEXT_CHANNEL_ID.fetch_add(1, Ordering::Relaxed),
                remote_addr,
                local_addr,
                outbound: producer,
                writable: Notify::new(),
                closed: AtomicBool::new(false),
                closed_tx,
                handler: Mutex::new(Some(handler.clone())),
                full_queue_spins: config.full_queue_spins,
            }),
        };

        let (reader, writer) = stream.into_split();
        tokio::spawn(write_loop(
            channel.clone(),
            consumer,
            writer,
            config.heartbeat_interval,
        ));
        tokio::spawn(read_loop(
            channel.clone(),
            reader,
            handler,
            FrameDecoder::with_max_body_size(config.max_body_size),
            config.read_idle_timeout,
        ));

        tracing::debug!(channel = channel.id(), remote = %remote_addr, "channel opened");
        Ok(channel)
    }

    /// Process-unique id. Never reused, even after the channel closes.
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.inner.remote_addr
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.inner.local_addr
    }

    pub fn is_active(&self) -> bool {
        !self.inner.closed.load(Ordering::Acquire)
    }

    /// Frames queued but not yet handed to the socket.
    pub fn pending_writes(&self) -> usize {
        self.inner.outbound.size()
    }

    /// Enqueues a frame for the writer task.
    ///
    /// On a plain thread a full queue is retried with backoff up to
    /// `full_queue_spins` times. Inside a tokio runtime the writer may need
    /// the very thread we would spin on, so a full queue fails at once.
    /// Either way the rejection is [`FerruleError::ChannelBusy`].
    pub fn write(&self, message: WireMessage) -> Result<()> {
        self.enqueue(Outbound { message, written: None })
    }

    /// Like [`write`](Self::write), and raises `written` once the frame has
    /// been flushed to the socket. The flag stays down if the flush fails or
    /// never happens.
    pub fn write_tracked(&self, message: WireMessage, written: Arc<AtomicBool>) -> Result<()> {
        self.enqueue(Outbound {
            message,
            written: Some(written),
        })
    }

    fn enqueue(&self, item: Outbound) -> Result<()> {
        if !self.is_active() {
            return Err(FerruleError::Closed(self.id()));
        }

        let spins = if tokio::runtime::Handle::try_current().is_ok() {
            0
        } else {
            self.inner.full_queue_spins
        };
        let backoff = Backoff::new();
        let mut item = item;
        for attempt in 0..=spins {
            match self.inner.outbound.offer(item) {
                Ok(()) => {
                    self.inner.writable.notify_one();
                    return Ok(());
                }
                Err(rejected) => {
                    item = rejected;
                    self.inner.writable.notify_one();
                    if attempt < spins {
                        backoff.snooze();
                    }
                }
            }
        }

        tracing::warn!(
            channel = self.id(),
            capacity = self.inner.outbound.capacity(),
            "outbound queue full, rejecting frame"
        );
        Err(FerruleError::ChannelBusy(self.id()))
    }

    /// Closes the channel. Idempotent.
    pub fn close(&self) {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.inner.closed_tx.send_replace(true);
        self.inner.writable.notify_one();

        tracing::info!(channel = self.id(), remote = %self.remote_addr(), "channel closed");
        let handler = self.inner.handler.lock().take();
        if let Some(handler) = handler {
            handler.on_closed(self);
        }
    }

    /// Resolves once the channel is closed.
    pub async fn closed(&self) {
        let mut rx = self.inner.closed_tx.subscribe();
        let _ = rx.wait_for(|closed| *closed).await;
    }
}

impl fmt::Debug for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel")
            .field("id", &self.inner.id)
            .field("remote", &self.inner.remote_addr)
            .field("active", &self.is_active())
            .finish()
    }
}

impl PartialEq for Channel {
    fn eq(&self, other: &Self) -> bool {
        self.inner.id == other.inner.id
    }
}

impl Eq for Channel {}

async fn write_loop(
    channel: Channel,
    mut outbound: Consumer<Outbound>,
    mut writer: OwnedWriteHalf,
    heartbeat_interval: Option<Duration>,
) {
    let mut closed_rx = channel.inner.closed_tx.subscribe();
    let mut buf = BytesMut::with_capacity(READ_BUFFER_SIZE);
    let mut written: Vec<Arc<AtomicBool>> = Vec::new();

    loop {
        outbound.drain(WRITE_BATCH, |item| {
            if let Err(e) = encode_frame(&item.message, &mut buf) {
                tracing::error!(channel = channel.id(), id = item.message.id, "dropping unencodable frame: {}", e);
                return;
            }
            written.extend(item.written);
        });

        if !buf.is_empty() {
            if let Err(e) = flush(&mut writer, &mut buf).await {
                tracing::debug!(channel = channel.id(), "write failed: {}", e);
                break;
            }
            for flag in written.drain(..) {
                flag.store(true, Ordering::Release);
            }
            continue;
        }

        if *closed_rx.borrow() {
            break;
        }

        let notified = channel.inner.writable.notified();
        tokio::select! {
            _ = notified => {}
            _ = closed_rx.changed() => {}
            _ = idle(heartbeat_interval) => {
                tracing::trace!(channel = channel.id(), "sending heartbeat");
                if let Err(e) = encode_frame(&WireMessage::heartbeat(), &mut buf) {
                    tracing::error!(channel = channel.id(), "heartbeat encode failed: {}", e);
                }
            }
        }
    }

    let _ = writer.shutdown().await;
    channel.close();
}

async fn flush(writer: &mut OwnedWriteHalf, buf: &mut BytesMut) -> std::io::Result<()> {
    writer.write_all(buf).await?;
    writer.flush().await?;
    buf.clear();
    Ok(())
}

async fn idle(interval: Option<Duration>) {
    match interval {
        Some(interval) => tokio::time::sleep(interval).await,
        None => std::future::pending().await,
    }
}

async fn read_loop(
    channel: Channel,
    mut reader: OwnedReadHalf,
    handler: Arc<dyn FrameHandler>,
    mut decoder: FrameDecoder,
    read_idle_timeout: Option<Duration>,
) {
    let mut closed_rx = channel.inner.closed_tx.subscribe();
    let mut buf = BytesMut::with_capacity(READ_BUFFER_SIZE);

    loop {
        let read = async {
            match read_idle_timeout {
                Some(limit) => tokio::time::timeout(limit, reader.read_buf(&mut buf))
                    .await
                    .map_err(|_| FerruleError::Connection(format!("no inbound frame for {:?}", limit)))?
                    .map_err(FerruleError::from),
                None => reader.read_buf(&mut buf).await.map_err(FerruleError::from),
            }
        };

        let n = tokio::select! {
            _ = closed_rx.wait_for(|closed| *closed) => break,
            n = read => n,
        };

        match n {
            Ok(0) => {
                tracing::debug!(channel = channel.id(), "peer closed connection");
                break;
            }
            Ok(_) => {}
            Err(e) => {
                tracing::debug!(channel = channel.id(), "read failed: {}", e);
                break;
            }
        }

        loop {
            match decoder.decode(&mut buf) {
                Ok(Some(message)) => handler.on_frame(&channel, message),
                Ok(None) => break,
                Err(e) => {
                    tracing::error!(channel = channel.id(), remote = %channel.remote_addr(), "{}", e);
                    channel.close();
                    return;
                }
            }
        }
    }

    channel.close();
}
