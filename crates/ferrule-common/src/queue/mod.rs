//! Inter-thread handoff queue.
//!
//! [`BoundedMpscQueue`] is the one lock-free structure in Ferrule. It sits at
//! the channel I/O boundary (many callers enqueue outbound frames, one writer
//! task drains them) and in the provider worker pool (I/O tasks enqueue
//! requests, one worker thread per queue executes them).
//!
//! Most code should use [`bounded`], which splits the queue into a cloneable
//! [`Producer`] and a unique [`Consumer`] so the single-consumer rule is
//! checked by the compiler.
//!
//! # Example
//!
//! ```
//! use ferrule_common::queue;
//!
//! let (producer, mut consumer) = queue::bounded::<u32>(5);
//! assert_eq!(producer.capacity(), 8);
//!
//! producer.offer(1).unwrap();
//! producer.offer(2).unwrap();
//! assert_eq!(consumer.poll(), Some(1));
//! assert_eq!(consumer.peek(), Some(&2));
//! ```

mod mpsc;

pub use mpsc::{BoundedMpscQueue, MAX_CAPACITY};

use std::fmt;
use std::sync::Arc;

/// Creates a bounded MPSC queue and returns its two ends.
pub fn bounded<T>(capacity: usize) -> (Producer<T>, Consumer<T>) {
    let queue = Arc::new(BoundedMpscQueue::with_capacity(capacity));
    (
        Producer {
            queue: queue.clone(),
        },
        Consumer { queue },
    )
}

/// Sending end of a bounded MPSC queue. Cheap to clone.
pub struct Producer<T> {
    queue: Arc<BoundedMpscQueue<T>>,
}

impl<T> Producer<T> {
    /// See [`BoundedMpscQueue::offer`].
    pub fn offer(&self, item: T) -> Result<(), T> {
        self.queue.offer(item)
    }

    pub fn size(&self) -> usize {
        self.queue.size()
    }

    pub fn capacity(&self) -> usize {
        self.queue.capacity()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

impl<T> Clone for Producer<T> {
    fn clone(&self) -> Self {
        Self {
            queue: self.queue.clone(),
        }
    }
}

impl<T> fmt::Debug for Producer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Producer").field(&self.queue).finish()
    }
}

/// Receiving end of a bounded MPSC queue.
///
/// There is exactly one `Consumer` per queue and it cannot be cloned, which
/// is what makes [`poll`](Self::poll) and [`peek`](Self::peek) safe.
pub struct Consumer<T> {
    queue: Arc<BoundedMpscQueue<T>>,
}

impl<T> Consumer<T> {
    /// Dequeues the oldest element, or `None` if the queue is empty.
    pub fn poll(&mut self) -> Option<T> {
        // SAFETY: `Consumer` is unique and `&mut self` excludes a live `peek`.
        unsafe { self.queue.poll() }
    }

    /// Borrows the oldest element without dequeuing it.
    pub fn peek(&self) -> Option<&T> {
        // SAFETY: `Consumer` is unique; `poll` needs `&mut self` so it cannot
        // run while the returned borrow is alive.
        unsafe { self.queue.peek() }
    }

    /// Polls up to `limit` elements into `f`, returning how many were taken.
    pub fn drain<F>(&mut self, limit: usize, mut f: F) -> usize
    where
        F: FnMut(T),
    {
        let mut taken = 0;
        while taken < limit {
            match self.poll() {
                Some(item) => {
                    f(item);
                    taken += 1;
                }
                None => break,
            }
        }
        taken
    }

    pub fn size(&self) -> usize {
        self.queue.size()
    }

    pub fn capacity(&self) -> usize {
        self.queue.capacity()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

impl<T> fmt::Debug for Consumer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Consumer").field(&self.queue).finish()
    }
}
