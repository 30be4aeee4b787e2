//! Fixed-size worker pool fed by lock-free queues.
//!
//! Each worker thread owns the consumer end of its own bounded MPSC queue,
//! so no two threads ever poll the same queue. Submitting threads (the
//! channel reader tasks) pick a worker round-robin and fall through to the
//! next one when its queue is full. When every queue is full the job is
//! handed back to the caller.
//!
//! An idle worker parks with a timeout; `submit` unparks the worker it
//! enqueued to.
//!
//! On shutdown a worker exits only once no `submit` is mid-offer and its
//! queue is empty, so every accepted job runs.

use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle, Thread};
use std::time::Duration;

use parking_lot::Mutex;

use ferrule_common::queue::{self, Consumer, Producer};

/// Jobs taken from the queue before checking the shutdown flag again.
const DRAIN_BATCH: usize = 64;

/// Upper bound on how long an idle worker sleeps between queue checks.
const IDLE_PARK: Duration = Duration::from_millis(10);

struct Worker<J> {
    producer: Producer<J>,
    thread: Thread,
}

pub struct WorkerPool<J> {
    workers: Vec<Worker<J>>,
    handles: Mutex<Vec<JoinHandle<()>>>,
    next: AtomicUsize,
    shutdown: Arc<AtomicBool>,
    submitting: Arc<AtomicUsize>,
}

impl<J: Send + 'static> WorkerPool<J> {
    /// Starts `workers` threads (at least one), each with a queue of
    /// `queue_capacity` slots, all running `execute`.
    ///
    /// Threads are named `{name}-{index}`.
    pub fn start<F>(name: &str, workers: usize, queue_capacity: usize, execute: F) -> io::Result<Self>
    where
        F: Fn(J) + Send + Sync + 'static,
    {
        let execute = Arc::new(execute);
        let shutdown = Arc::new(AtomicBool::new(false));
        let submitting = Arc::new(AtomicUsize::new(0));
        let count = workers.max(1);

        let mut pool_workers = Vec::with_capacity(count);
        let mut handles: Vec<JoinHandle<()>> = Vec::with_capacity(count);
        for index in 0..count {
            let (producer, consumer) = queue::bounded(queue_capacity);
            let execute = execute.clone();
            let shutdown_flag = shutdown.clone();
            let submitters = submitting.clone();

            let spawned = thread::Builder::new()
                .name(format!("{}-{}", name, index))
                .spawn(move || work(consumer, shutdown_flag, submitters, execute));

            let handle = match spawned {
                Ok(handle) => handle,
                Err(e) => {
                    // Stop the threads already running before reporting.
                    shutdown.store(true, Ordering::SeqCst);
                    for handle in handles {
                        handle.thread().unpark();
                        let _ = handle.join();
                    }
                    return Err(e);
                }
            };

            pool_workers.push(Worker {
                producer,
                thread: handle.thread().clone(),
            });
            handles.push(handle);
        }

        tracing::debug!(workers = count, queue_capacity, "worker pool started");

        Ok(Self {
            workers: pool_workers,
            handles: Mutex::new(handles),
            next: AtomicUsize::new(0),
            shutdown,
            submitting,
        })
    }

    /// Hands `job` to a worker.
    ///
    /// # Returns
    /// `Err(job)` if every worker's queue is full or the pool is shut down.
    pub fn submit(&self, job: J) -> Result<(), J> {
        self.submitting.fetch_add(1, Ordering::SeqCst);
        let result = self.offer(job);
        self.submitting.fetch_sub(1, Ordering::SeqCst);
        result
    }

    fn offer(&self, job: J) -> Result<(), J> {
        if self.shutdown.load(Ordering::SeqCst) {
            return Err(job);
        }

        let count = self.workers.len();
        let start = self.next.fetch_add(1, Ordering::Relaxed);
        let mut job = job;
        for offset in 0..count {
            let worker = &self.workers[(start + offset) % count];
            match worker.producer.offer(job) {
                Ok(()) => {
                    worker.thread.unpark();
                    return Ok(());
                }
                Err(rejected) => job = rejected,
            }
        }

        tracing::warn!(workers = count, "every worker queue is full");
        Err(job)
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    /// Jobs waiting across all queues.
    pub fn queued(&self) -> usize {
        self.workers.iter().map(|w| w.producer.size()).sum()
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    /// Stops accepting jobs, lets workers finish what is queued, and joins
    /// them. Idempotent.
    pub fn shutdown(&self) {
        if self.shutdown.swap(true, Ordering::SeqCst) {
            return;
        }
        for worker in &self.workers {
            worker.thread.unpark();
        }

        let handles = std::mem::take(&mut *self.handles.lock());
        for handle in handles {
            if handle.thread().id() == thread::current().id() {
                continue;
            }
            if handle.join().is_err() {
                tracing::error!("worker thread panicked");
            }
        }
        tracing::debug!("worker pool stopped");
    }
}

impl<J> Drop for WorkerPool<J> {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        for worker in &self.workers {
            worker.thread.unpark();
        }
        for handle in std::mem::take(&mut *self.handles.lock()) {
            if handle.thread().id() != thread::current().id() {
                let _ = handle.join();
            }
        }
    }
}

fn work<J, F>(mut consumer: Consumer<J>, shutdown: Arc<AtomicBool>, submitting: Arc<AtomicUsize>, execute: Arc<F>)
where
    F: Fn(J),
{
    loop {
        let taken = consumer.drain(DRAIN_BATCH, |job| execute(job));
        if taken == 0 {
            // A submitter that saw the flag unset may still be offering;
            // its job lands before the count drops back.
            if shutdown.load(Ordering::SeqCst) && submitting.load(Ordering::SeqCst) == 0 && consumer.is_empty() {
                break;
            }
            thread::park_timeout(IDLE_PARK);
        }
    }
}
