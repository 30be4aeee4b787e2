//! Correlation of in-flight requests with their futures.
//!
//! Three parties race on every [`PendingInvocation`]: the response path
//! (network reader task), the [`TimeoutScanner`] thread and the channel-close
//! sweep. Each of them goes through [`InvocationRegistry::take`], a
//! remove-if-present under the map lock, so exactly one wins and the others
//! see the entry gone. The winner completes the future after the lock is
//! released, so listener callbacks never run under it.

use std::collections::HashMap;
use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use ferrule_common::protocol::{FerruleError, RequestId, Response};
use ferrule_common::RpcResult;

use crate::invocation::{DispatchMode, PendingInvocation};

/// Timeout scanner settings.
#[derive(Debug, Clone)]
pub struct ScannerConfig {
    /// How often pending invocations are checked for expiry.
    pub interval: Duration,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(30),
        }
    }
}

/// Tracks every outstanding call of a client.
#[derive(Debug, Default)]
pub struct InvocationRegistry {
    unicast: Mutex<HashMap<RequestId, PendingInvocation>>,
    broadcast: Mutex<HashMap<(u64, RequestId), PendingInvocation>>,
}

impl InvocationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts tracking `invocation`. Call before the request is written.
    pub fn register(&self, invocation: PendingInvocation) {
        match invocation.mode() {
            DispatchMode::Unicast => {
                self.unicast.lock().insert(invocation.id(), invocation);
            }
            DispatchMode::Broadcast => {
                let key = (invocation.channel_id(), invocation.id());
                self.broadcast.lock().insert(key, invocation);
            }
        }
    }

    /// Delivers a response received on `channel_id`.
    ///
    /// Returns `false` for responses nobody waits for any more (late replies
    /// after a timeout, duplicates); those are logged and dropped.
    pub fn on_response(&self, channel_id: u64, response: Response) -> bool {
        let id = response.id;
        match self.take(channel_id, id) {
            Some(invocation) => {
                let timeout_ms = invocation.timeout().as_millis() as u64;
                tracing::debug!(id, channel = channel_id, status = ?response.status, "response matched");
                invocation.complete(response.into_result(timeout_ms))
            }
            None => {
                tracing::warn!(id, channel = channel_id, "no pending invocation for response, discarding");
                false
            }
        }
    }

    /// Fails one invocation through the same exactly-once path as responses.
    pub fn fail(&self, channel_id: u64, id: RequestId, error: FerruleError) -> bool {
        self.complete(channel_id, id, Err(error))
    }

    fn complete(&self, channel_id: u64, id: RequestId, outcome: Result<RpcResult, FerruleError>) -> bool {
        match self.take(channel_id, id) {
            Some(invocation) => invocation.complete(outcome),
            None => false,
        }
    }

    /// Stops tracking an invocation whose request was never sent, without
    /// completing its future.
    pub fn remove(&self, channel_id: u64, id: RequestId) -> bool {
        self.take(channel_id, id).is_some()
    }

    /// Removes the matching invocation: unicast by id first, then broadcast
    /// by `(channel, id)`.
    fn take(&self, channel_id: u64, id: RequestId) -> Option<PendingInvocation> {
        if let Some(invocation) = self.unicast.lock().remove(&id) {
            return Some(invocation);
        }
        self.broadcast.lock().remove(&(channel_id, id))
    }

    /// Fails every invocation bound to a closed channel. Returns how many.
    pub fn fail_channel(&self, channel_id: u64) -> usize {
        let ids: Vec<RequestId> = {
            let unicast = self.unicast.lock();
            let broadcast = self.broadcast.lock();
            unicast
                .values()
                .filter(|inv| inv.channel_id() == channel_id)
                .map(|inv| inv.id())
                .chain(
                    broadcast
                        .keys()
                        .filter(|(channel, _)| *channel == channel_id)
                        .map(|(_, id)| *id),
                )
                .collect()
        };

        let failed = ids
            .into_iter()
            .filter(|id| self.fail(channel_id, *id, FerruleError::Closed(channel_id)))
            .count();
        if failed > 0 {
            tracing::info!(channel = channel_id, failed, "failed pending invocations of closed channel");
        }
        failed
    }

    /// Completes every invocation older than its timeout with a synthesized
    /// timeout response. Returns how many timed out.
    pub fn scan_timeouts(&self, now: Instant) -> usize {
        let expired: Vec<(u64, Response)> = {
            let unicast = self.unicast.lock();
            let broadcast = self.broadcast.lock();
            unicast
                .values()
                .chain(broadcast.values())
                .filter(|inv| inv.is_expired(now))
                .map(|inv| (inv.channel_id(), inv.timeout_response()))
                .collect()
        };

        let mut timed_out = 0;
        for (channel_id, response) in expired {
            let id = response.id;
            if let Some(invocation) = self.take(channel_id, id) {
                tracing::debug!(id, channel = channel_id, status = ?response.status, "invocation timed out");
                let timeout_ms = invocation.timeout().as_millis() as u64;
                invocation.complete(response.into_result(timeout_ms));
                timed_out += 1;
            }
        }
        timed_out
    }

    pub fn len(&self) -> usize {
        self.unicast.lock().len() + self.broadcast.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

struct StopSignal {
    stopped: Mutex<bool>,
    cond: Condvar,
}

/// Background thread running [`InvocationRegistry::scan_timeouts`].
///
/// Stopped (and joined) on drop.
pub struct TimeoutScanner {
    signal: Arc<StopSignal>,
    handle: Option<JoinHandle<()>>,
}

impl TimeoutScanner {
    pub fn start(registry: Arc<InvocationRegistry>, config: ScannerConfig) -> io::Result<Self> {
        let signal = Arc::new(StopSignal {
            stopped: Mutex::new(false),
            cond: Condvar::new(),
        });

        let thread_signal = signal.clone();
        let handle = thread::Builder::new()
            .name("ferrule-timeout-scanner".to_string())
            .spawn(move || {
                tracing::debug!(interval = ?config.interval, "timeout scanner started");
                let mut stopped = thread_signal.stopped.lock();
                while !*stopped {
                    thread_signal.cond.wait_for(&mut stopped, config.interval);
                    if *stopped {
                        break;
                    }
                    drop(stopped);
                    registry.scan_timeouts(Instant::now());
                    stopped = thread_signal.stopped.lock();
                }
                tracing::debug!("timeout scanner stopped");
            })?;

        Ok(Self {
            signal,
            handle: Some(handle),
        })
    }

    pub fn stop(&mut self) {
        *self.signal.stopped.lock() = true;
        self.signal.cond.notify_all();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                tracing::error!("timeout scanner thread panicked");
            }
        }
    }
}

impl Drop for TimeoutScanner {
    fn drop(&mut self) {
        self.stop();
    }
}
