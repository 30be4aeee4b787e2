use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use ferrule_common::protocol::{FerruleError, RequestId, Response, Status};
use ferrule_common::{InvokeFuture, RpcResult};

/// How a request was fanned out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchMode {
    /// One target; keyed by correlation id alone.
    Unicast,
    /// Every target shares one correlation id; keyed by `(channel, id)`.
    Broadcast,
}

/// Book-keeping for one outstanding call on one channel.
#[derive(Debug)]
pub struct PendingInvocation {
    id: RequestId,
    channel_id: u64,
    mode: DispatchMode,
    created_at: Instant,
    timeout: Duration,
    sent: Arc<AtomicBool>,
    future: InvokeFuture<RpcResult>,
}

impl PendingInvocation {
    pub fn new(id: RequestId, channel_id: u64, mode: DispatchMode, timeout: Duration) -> Self {
        Self {
            id,
            channel_id,
            mode,
            created_at: Instant::now(),
            timeout,
            sent: Arc::new(AtomicBool::new(false)),
            future: InvokeFuture::new(),
        }
    }

    pub fn id(&self) -> RequestId {
        self.id
    }

    pub fn channel_id(&self) -> u64 {
        self.channel_id
    }

    pub fn mode(&self) -> DispatchMode {
        self.mode
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    pub fn future(&self) -> InvokeFuture<RpcResult> {
        self.future.clone()
    }

    /// Flag raised once the request frame has been flushed to the socket.
    ///
    /// Decides between a client timeout (never left the process) and a
    /// server timeout.
    pub fn sent_flag(&self) -> Arc<AtomicBool> {
        self.sent.clone()
    }

    pub fn is_sent(&self) -> bool {
        self.sent.load(Ordering::Acquire)
    }

    pub fn is_expired(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.created_at) > self.timeout
    }

    /// The response the timeout scanner feeds back for this invocation.
    pub fn timeout_response(&self) -> Response {
        let status = if self.is_sent() {
            Status::ServerTimeout
        } else {
            Status::ClientTimeout
        };
        Response::error(
            self.id,
            status,
            format!("no response within {}ms", self.timeout.as_millis()),
        )
    }

    /// Completes the caller-facing future. Returns `false` if it was already done.
    pub(crate) fn complete(self, outcome: Result<RpcResult, FerruleError>) -> bool {
        self.future.set(outcome)
    }
}
