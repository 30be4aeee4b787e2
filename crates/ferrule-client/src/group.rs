//! Provider connections grouped by address, and per-directory candidate lists.
//!
//! Both [`ChannelGroup::channels`] and [`GroupList::snapshot`] are
//! copy-on-write: readers load an `Arc` and iterate without locking, writers
//! build a new vector and publish it with a single store.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

use arc_swap::ArcSwap;
use parking_lot::{Mutex, RwLock};

use ferrule_common::protocol::{Address, Directory};
use ferrule_common::transport::Channel;

use crate::balancer::Weights;

/// Weight a directory gets on a group when none was configured.
pub const DEFAULT_WEIGHT: u32 = 50;

/// Every channel opened to one provider address.
///
/// A group is shared by all directories served from that address; each
/// directory carries its own weight.
#[derive(Debug)]
pub struct ChannelGroup {
    address: Address,
    channels: ArcSwap<Vec<Channel>>,
    index: AtomicUsize,
    weights: RwLock<HashMap<Directory, u32>>,
    warm_up: RwLock<Duration>,
    connected_at: Mutex<Option<Instant>>,
}

impl ChannelGroup {
    pub fn new(address: Address, warm_up: Duration) -> Self {
        Self {
            address,
            channels: ArcSwap::from_pointee(Vec::new()),
            index: AtomicUsize::new(0),
            weights: RwLock::new(HashMap::new()),
            warm_up: RwLock::new(warm_up),
            connected_at: Mutex::new(None),
        }
    }

    pub fn address(&self) -> &Address {
        &self.address
    }

    pub fn channels(&self) -> Arc<Vec<Channel>> {
        self.channels.load_full()
    }

    /// Adds a channel; the warm-up clock starts when the group goes from
    /// empty to non-empty.
    pub fn add_channel(&self, channel: Channel) {
        let mut connected_at = self.connected_at.lock();
        self.channels.rcu(|current| {
            let mut next = Vec::clone(current);
            next.push(channel.clone());
            next
        });
        if connected_at.is_none() {
            *connected_at = Some(Instant::now());
        }
    }

    /// Removes a channel by id. Returns `true` if the group is now empty.
    pub fn remove_channel(&self, channel_id: u64) -> bool {
        let mut connected_at = self.connected_at.lock();
        let previous = self.channels.rcu(|current| {
            current
                .iter()
                .filter(|c| c.id() != channel_id)
                .cloned()
                .collect::<Vec<_>>()
        });
        let empty = previous.iter().all(|c| c.id() == channel_id);
        if empty {
            *connected_at = None;
        }
        empty
    }

    /// Closes every channel and empties the group.
    pub fn close_all(&self) {
        let channels = self.channels.swap(Arc::new(Vec::new()));
        *self.connected_at.lock() = None;
        for channel in channels.iter() {
            channel.close();
        }
    }

    /// Next active channel, round-robin.
    pub fn next_channel(&self) -> Option<Channel> {
        let channels = self.channels.load();
        let n = channels.len();
        if n == 0 {
            return None;
        }
        let start = self.index.fetch_add(1, Ordering::Relaxed);
        (0..n)
            .map(|i| &channels[(start.wrapping_add(i)) % n])
            .find(|c| c.is_active())
            .cloned()
    }

    pub fn is_available(&self) -> bool {
        self.channels.load().iter().any(Channel::is_active)
    }

    pub fn put_weight(&self, directory: Directory, weight: u32) {
        self.weights.write().insert(directory, weight);
    }

    pub fn remove_weight(&self, directory: &Directory) {
        self.weights.write().remove(directory);
    }

    pub fn weight(&self, directory: &Directory) -> u32 {
        self.weights
            .read()
            .get(directory)
            .copied()
            .unwrap_or(DEFAULT_WEIGHT)
    }

    pub fn warm_up(&self) -> Duration {
        *self.warm_up.read()
    }

    pub fn set_warm_up(&self, warm_up: Duration) {
        *self.warm_up.write() = warm_up;
    }

    pub fn connected_at(&self) -> Option<Instant> {
        *self.connected_at.lock()
    }

    /// Overrides the warm-up start; used to simulate elapsed time.
    pub fn set_connected_at(&self, at: Option<Instant>) {
        *self.connected_at.lock() = at;
    }

    pub fn is_warm_up_complete(&self, now: Instant) -> bool {
        match self.connected_at() {
            Some(since) => now.saturating_duration_since(since) >= self.warm_up(),
            None => false,
        }
    }

    /// Configured weight scaled down linearly while warming up.
    ///
    /// Zero if the group never connected or the configured weight is zero;
    /// at least one once warm-up has started.
    pub fn effective_weight(&self, directory: &Directory, now: Instant) -> u32 {
        let configured = self.weight(directory);
        let Some(since) = self.connected_at() else {
            return 0;
        };
        if configured == 0 {
            return 0;
        }

        let warm_up = self.warm_up().as_millis() as u64;
        let elapsed = now.saturating_duration_since(since).as_millis() as u64;
        if elapsed >= warm_up {
            return configured;
        }
        if elapsed == 0 {
            return 0;
        }
        let scaled = configured as u64 * elapsed / warm_up;
        scaled.max(1) as u32
    }
}

/// Immutable view of one directory's candidates.
#[derive(Debug)]
pub struct GroupSnapshot {
    directory: Directory,
    groups: Vec<Arc<ChannelGroup>>,
    weight_cache: OnceLock<Weights>,
}

impl GroupSnapshot {
    pub fn new(directory: Directory, groups: Vec<Arc<ChannelGroup>>) -> Self {
        Self {
            directory,
            groups,
            weight_cache: OnceLock::new(),
        }
    }

    pub fn directory(&self) -> &Directory {
        &self.directory
    }

    pub fn groups(&self) -> &[Arc<ChannelGroup>] {
        &self.groups
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Weights of the candidates at `now`.
    ///
    /// While any group is warming up the weights are computed into `scratch`;
    /// once every group is warm the result is cached on the snapshot and
    /// shared by all callers until a new snapshot replaces this one.
    pub fn weights<'a>(&'a self, now: Instant, scratch: &'a mut Weights) -> &'a Weights {
        if let Some(cached) = self.weight_cache.get() {
            return cached;
        }
        let all_warm = scratch.fill(&self.directory, &self.groups, now);
        if all_warm {
            return self.weight_cache.get_or_init(|| scratch.clone());
        }
        scratch
    }

    /// Copy restricted to the groups matching `keep`.
    pub fn filter(&self, keep: impl Fn(&ChannelGroup) -> bool) -> GroupSnapshot {
        let groups = self.groups.iter().filter(|g| keep(g)).cloned().collect();
        GroupSnapshot::new(self.directory.clone(), groups)
    }
}

/// The candidate groups of one directory.
#[derive(Debug)]
pub struct GroupList {
    directory: Directory,
    snapshot: ArcSwap<GroupSnapshot>,
    write: Mutex<()>,
}

impl GroupList {
    pub fn new(directory: Directory) -> Self {
        Self {
            snapshot: ArcSwap::from_pointee(GroupSnapshot::new(directory.clone(), Vec::new())),
            directory,
            write: Mutex::new(()),
        }
    }

    pub fn directory(&self) -> &Directory {
        &self.directory
    }

    pub fn snapshot(&self) -> Arc<GroupSnapshot> {
        self.snapshot.load_full()
    }

    /// Adds `group` unless a group for the same address is already listed.
    pub fn add(&self, group: Arc<ChannelGroup>) -> bool {
        let _guard = self.write.lock();
        let current = self.snapshot.load();
        if current.groups.iter().any(|g| g.address() == group.address()) {
            return false;
        }
        let mut groups = current.groups.clone();
        groups.push(group);
        self.snapshot
            .store(Arc::new(GroupSnapshot::new(self.directory.clone(), groups)));
        true
    }

    pub fn remove(&self, address: &Address) -> Option<Arc<ChannelGroup>> {
        let _guard = self.write.lock();
        let current = self.snapshot.load();
        let position = current.groups.iter().position(|g| g.address() == address)?;
        let mut groups = current.groups.clone();
        let removed = groups.remove(position);
        self.snapshot
            .store(Arc::new(GroupSnapshot::new(self.directory.clone(), groups)));
        Some(removed)
    }

    /// Republishes the same groups, dropping any cached weights.
    pub fn refresh(&self) {
        let _guard = self.write.lock();
        let groups = self.snapshot.load().groups.clone();
        self.snapshot
            .store(Arc::new(GroupSnapshot::new(self.directory.clone(), groups)));
    }

    pub fn len(&self) -> usize {
        self.snapshot.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
