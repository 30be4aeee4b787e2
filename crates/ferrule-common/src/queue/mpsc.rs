use std::cell::UnsafeCell;
use std::fmt;
use std::mem::{self, MaybeUninit};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use crossbeam_utils::{Backoff, CachePadded};

/// Bytes of dead slots placed before and after the ring so that the first and
/// last live slots never share a cache line (or an adjacent-line prefetch pair)
/// with unrelated heap objects.
const PADDING_BYTES: usize = 128;

/// Largest capacity accepted by [`BoundedMpscQueue::with_capacity`].
pub const MAX_CAPACITY: usize = 1 << 30;

/// One ring slot.
///
/// `ready` is the publication flag: a producer writes `value` and then sets
/// `ready` with release ordering; the consumer observes `ready` with acquire
/// ordering before touching `value`.
struct Slot<T> {
    ready: AtomicBool,
    value: UnsafeCell<MaybeUninit<T>>,
}

impl<T> Slot<T> {
    fn empty() -> Self {
        Self {
            ready: AtomicBool::new(false),
            value: UnsafeCell::new(MaybeUninit::uninit()),
        }
    }
}

/// Lock-free, fixed-capacity ring buffer for many producers and one consumer.
///
/// # Layout
///
/// The three hot indices each live on their own cache line (`CachePadded`):
///
/// - `producer_index`: claimed by producers with a CAS
/// - `consumer_index_cache`: producers' shared, possibly stale copy of
///   `consumer_index`, refreshed only when it suggests the ring is full
/// - `consumer_index`: written only by the consumer
///
/// The occupied range is `[consumer_index, producer_index)` and
/// `producer_index - consumer_index <= capacity` holds at all times.
///
/// # Concurrency contract
///
/// [`offer`](Self::offer) may be called from any number of threads. `poll` and
/// `peek` must only ever be called from one consumer at a time; they are
/// `unsafe` here and exposed safely through [`Consumer`](super::Consumer),
/// which is not `Clone`.
pub struct BoundedMpscQueue<T> {
    producer_index: CachePadded<AtomicU64>,
    consumer_index_cache: CachePadded<AtomicU64>,
    consumer_index: CachePadded<AtomicU64>,
    buffer: Box<[Slot<T>]>,
    offset: usize,
    mask: u64,
    capacity: u64,
}

unsafe impl<T: Send> Send for BoundedMpscQueue<T> {}
unsafe impl<T: Send> Sync for BoundedMpscQueue<T> {}

impl<T> BoundedMpscQueue<T> {
    /// Creates a queue holding at least `capacity` elements.
    ///
    /// The capacity is rounded up to the next power of two so the index to
    /// slot mapping is a mask: `with_capacity(5)` holds 8 elements.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` exceeds [`MAX_CAPACITY`].
    pub fn with_capacity(capacity: usize) -> Self {
        assert!(
            capacity <= MAX_CAPACITY,
            "queue capacity {} exceeds maximum {}",
            capacity,
            MAX_CAPACITY
        );
        let capacity = capacity.max(1).next_power_of_two();
        let padding = PADDING_BYTES.div_ceil(mem::size_of::<Slot<T>>());

        let buffer: Box<[Slot<T>]> = (0..capacity + 2 * padding).map(|_| Slot::empty()).collect();

        Self {
            producer_index: CachePadded::new(AtomicU64::new(0)),
            consumer_index_cache: CachePadded::new(AtomicU64::new(0)),
            consumer_index: CachePadded::new(AtomicU64::new(0)),
            buffer,
            offset: padding,
            mask: capacity as u64 - 1,
            capacity: capacity as u64,
        }
    }

    /// Usable capacity (always a power of two).
    pub fn capacity(&self) -> usize {
        self.capacity as usize
    }

    #[inline]
    fn slot(&self, index: u64) -> &Slot<T> {
        &self.buffer[self.offset + (index & self.mask) as usize]
    }

    /// Enqueues `item`, or hands it back if the queue is full.
    ///
    /// `Err(item)` is returned only after the true consumer index has been
    /// re-read, so a stale cache never produces a spurious "full". A failed
    /// offer leaves the queue untouched. Ownership goes back to the caller,
    /// who decides whether to retry, drop or reject upstream.
    pub fn offer(&self, item: T) -> Result<(), T> {
        let mut consumer_cache = self.consumer_index_cache.load(Ordering::Acquire);
        let mut current = self.producer_index.load(Ordering::Relaxed);

        loop {
            // Indices are compared with saturating_sub: a concurrently refreshed
            // consumer index may already be ahead of our stale `current`.
            if current.saturating_sub(consumer_cache) >= self.capacity {
                let consumer = self.consumer_index.load(Ordering::Acquire);
                if current.saturating_sub(consumer) >= self.capacity {
                    return Err(item);
                }
                consumer_cache = consumer;
                self.consumer_index_cache.store(consumer, Ordering::Release);
            }

            match self.producer_index.compare_exchange_weak(
                current,
                current + 1,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(actual) => current = actual,
            }
        }

        let slot = self.slot(current);
        // SAFETY: winning the CAS for `current` grants exclusive write access
        // to this slot until the consumer clears `ready` and moves past it.
        unsafe { (*slot.value.get()).write(item) };
        slot.ready.store(true, Ordering::Release);
        Ok(())
    }

    /// Waits for the slot at `consumer` to be published.
    ///
    /// Returns `false` only when the ring is empty. If a producer has claimed
    /// the index but not written the value yet, this spins: the producer is
    /// one store away.
    fn await_slot(&self, slot: &Slot<T>, consumer: u64) -> bool {
        if slot.ready.load(Ordering::Acquire) {
            return true;
        }
        if self.producer_index.load(Ordering::Acquire) == consumer {
            return false;
        }
        let backoff = Backoff::new();
        while !slot.ready.load(Ordering::Acquire) {
            backoff.snooze();
        }
        true
    }

    /// Dequeues the oldest element.
    ///
    /// # Safety
    ///
    /// Must not be called concurrently with another `poll` or `peek` on the
    /// same queue. Use [`Consumer::poll`](super::Consumer::poll) for a safe API.
    pub unsafe fn poll(&self) -> Option<T> {
        let consumer = self.consumer_index.load(Ordering::Relaxed);
        let slot = self.slot(consumer);
        if !self.await_slot(slot, consumer) {
            return None;
        }

        let value = (*slot.value.get()).assume_init_read();
        // Consumer-only data: the release store of the index below orders it.
        slot.ready.store(false, Ordering::Relaxed);
        self.consumer_index.store(consumer + 1, Ordering::Release);
        Some(value)
    }

    /// Borrows the oldest element without dequeuing it.
    ///
    /// # Safety
    ///
    /// Same contract as [`poll`](Self::poll); additionally no `poll` may run
    /// while the returned reference is alive.
    pub unsafe fn peek(&self) -> Option<&T> {
        let consumer = self.consumer_index.load(Ordering::Relaxed);
        let slot = self.slot(consumer);
        if !self.await_slot(slot, consumer) {
            return None;
        }
        Some((*slot.value.get()).assume_init_ref())
    }

    /// Best-effort element count.
    ///
    /// Reads the consumer index on both sides of the producer index and
    /// retries until they agree, so the result was exact at some instant.
    pub fn size(&self) -> usize {
        let mut after = self.consumer_index.load(Ordering::Acquire);
        loop {
            let before = after;
            let producer = self.producer_index.load(Ordering::Acquire);
            after = self.consumer_index.load(Ordering::Acquire);
            if before == after {
                return producer.saturating_sub(after).min(self.capacity) as usize;
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.consumer_index.load(Ordering::Acquire) == self.producer_index.load(Ordering::Acquire)
    }
}

impl<T> Drop for BoundedMpscQueue<T> {
    fn drop(&mut self) {
        if !mem::needs_drop::<T>() {
            return;
        }
        for slot in self.buffer.iter_mut() {
            if *slot.ready.get_mut() {
                // SAFETY: `ready` is only set after the value was written and
                // cleared after it was moved out.
                unsafe { slot.value.get_mut().assume_init_drop() };
            }
        }
    }
}

impl<T> fmt::Debug for BoundedMpscQueue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoundedMpscQueue")
            .field("capacity", &self.capacity)
            .field("size", &self.size())
            .finish()
    }
}
