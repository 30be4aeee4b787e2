use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, MutexGuard};

use ferrule_common::protocol::{Address, FerruleError, Request, Result, RpcResult};
use ferrule_common::transport::Channel;
use ferrule_common::{FnListener, InvokeFuture};
use ferrule_metrics::CallOutcome;

use crate::balancer::{LoadBalancer, LoadBalancerType, SelectScratch};
use crate::client::ClientCore;
use crate::cluster::{Dispatched, Dispatcher};
use crate::group::{ChannelGroup, GroupList};
use crate::invocation::{DispatchMode, PendingInvocation};

/// Scratch states shared by the callers of one dispatcher.
const SCRATCH_SHARDS: usize = 8;

/// Dispatches the requests of one directory over the client's channels.
///
/// Each dispatcher owns its balancer, so round-robin positions are never
/// shared between services.
pub struct DefaultDispatcher {
    core: Arc<ClientCore>,
    groups: Arc<GroupList>,
    balancer: Box<dyn LoadBalancer>,
    scratch: Box<[Mutex<SelectScratch>]>,
    next_scratch: AtomicUsize,
}

impl DefaultDispatcher {
    pub(crate) fn new(core: Arc<ClientCore>, groups: Arc<GroupList>, balancer: LoadBalancerType) -> Self {
        Self {
            core,
            groups,
            balancer: balancer.create(),
            scratch: (0..SCRATCH_SHARDS).map(|_| Mutex::new(SelectScratch::new())).collect(),
            next_scratch: AtomicUsize::new(0),
        }
    }

    pub fn groups(&self) -> &Arc<GroupList> {
        &self.groups
    }

    fn scratch(&self) -> MutexGuard<'_, SelectScratch> {
        let start = self.next_scratch.fetch_add(1, Ordering::Relaxed);
        let n = self.scratch.len();
        (0..n)
            .find_map(|offset| self.scratch[(start + offset) % n].try_lock())
            .unwrap_or_else(|| self.scratch[start % n].lock())
    }

    /// Picks a group, preferring available groups outside `excluded`.
    ///
    /// Excluded groups are only considered when nothing else is available.
    fn select(&self, excluded: &HashSet<Address>) -> Option<Arc<ChannelGroup>> {
        let snapshot = self.groups.snapshot();
        let preferred = |g: &ChannelGroup| g.is_available() && !excluded.contains(g.address());

        let narrowed;
        let candidates = if snapshot.groups().iter().all(|g| preferred(g)) {
            &*snapshot
        } else {
            let view = snapshot.filter(preferred);
            narrowed = if view.is_empty() {
                snapshot.filter(ChannelGroup::is_available)
            } else {
                view
            };
            &narrowed
        };

        let index = self.balancer.select(candidates, &mut self.scratch())?;
        candidates.groups().get(index).cloned()
    }

    fn timeout_of(&self, request: &Request) -> Duration {
        request
            .timeout_ms
            .map(Duration::from_millis)
            .unwrap_or(self.core.config.default_timeout)
    }

    /// Registers and writes one invocation on `channel`.
    fn send(
        &self,
        request: &Request,
        target: &Address,
        channel: &Channel,
        mode: DispatchMode,
    ) -> Result<InvokeFuture<RpcResult>> {
        let message = self.core.codec.encode_request(request)?;
        let invocation = PendingInvocation::new(request.id, channel.id(), mode, self.timeout_of(request));
        let future = invocation.future();
        let sent = invocation.sent_flag();
        self.core.registry.register(invocation);

        // The writer task raises `sent` once the frame is on the socket.
        if let Err(err) = channel.write_tracked(message, sent) {
            self.core.registry.remove(channel.id(), request.id);
            return Err(err);
        }
        tracing::debug!(id = request.id, channel = channel.id(), method = %request.method, "request queued");

        self.core.metrics.record_provider_request(&target.to_string());
        self.observe(request, &future);
        Ok(future)
    }

    /// Records the call's outcome and latency once it completes.
    fn observe(&self, request: &Request, future: &InvokeFuture<RpcResult>) {
        let metrics = self.core.metrics.clone();
        let key = format!("{}#{}", request.directory, request.method);
        let started = Instant::now();
        future.add_listener(FnListener(move |outcome: &Result<RpcResult>| {
            let call_outcome = match outcome {
                Ok(_) => CallOutcome::Success,
                Err(err) if err.is_timeout() => CallOutcome::Timeout,
                Err(_) => CallOutcome::Failure,
            };
            metrics.record_method_call(&key, started.elapsed().as_micros() as u64, call_outcome);
        }));
    }

    /// Sends `request` to every available group under one correlation id.
    ///
    /// Returns one future per group; a group whose write failed gets an
    /// already-failed future.
    pub fn broadcast(&self, request: &Request) -> Result<Vec<Dispatched>> {
        let snapshot = self.groups.snapshot();
        let dispatched: Vec<Dispatched> = snapshot
            .groups()
            .iter()
            .filter_map(|group| group.next_channel().map(|channel| (group, channel)))
            .map(|(group, channel)| {
                let target = group.address().clone();
                let future = self
                    .send(request, &target, &channel, DispatchMode::Broadcast)
                    .unwrap_or_else(InvokeFuture::failed);
                Dispatched { target, future }
            })
            .collect();

        if dispatched.is_empty() {
            return Err(FerruleError::NoAvailableProvider(request.directory.to_string()));
        }
        Ok(dispatched)
    }
}

impl Dispatcher for DefaultDispatcher {
    fn dispatch(&self, request: &Request, excluded: &HashSet<Address>) -> Result<Dispatched> {
        let no_provider = || FerruleError::NoAvailableProvider(request.directory.to_string());

        let group = self.select(excluded).ok_or_else(no_provider)?;
        let channel = group.next_channel().ok_or_else(no_provider)?;
        let target = group.address().clone();
        let future = match self.send(request, &target, &channel, DispatchMode::Unicast) {
            Ok(future) => future,
            // The provider was chosen, so report it; retries must skip it.
            Err(err @ (FerruleError::ChannelBusy(_) | FerruleError::Closed(_))) => {
                tracing::debug!(id = request.id, target = %target, "write refused: {}", err);
                InvokeFuture::failed(err)
            }
            Err(err) => return Err(err),
        };
        Ok(Dispatched { target, future })
    }
}
