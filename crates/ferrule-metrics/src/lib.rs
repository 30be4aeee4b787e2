//! Ferrule Metrics Collection
//!
//! Per-method call counters and latency percentiles for both ends of an
//! invocation:
//!
//! - the **consumer** side records every proxied call when its future
//!   completes, plus how many requests were routed to each provider address
//! - the **provider** side records every handler execution
//!
//! # Components
//!
//! - [`MetricsRegistry`]: thread-safe storage with lock-free counters
//! - [`LatencyHistogram`]: constant-memory logarithmic histogram (P50/P95/P99)
//! - [`MetricsSnapshot`]: serializable point-in-time copy
//!
//! # Usage Example
//!
//! ```rust
//! use ferrule_metrics::{CallOutcome, MetricsRegistry};
//! use std::time::Instant;
//!
//! let metrics = MetricsRegistry::provider();
//!
//! let start = Instant::now();
//! // ... execute handler ...
//! metrics.record_method_call("Default-Echo-1.0.0#echo", start.elapsed().as_micros() as u64, CallOutcome::Success);
//!
//! let snapshot = metrics.snapshot();
//! println!("Total requests: {}", snapshot.total_requests);
//! ```

mod histogram;
mod registry;
mod snapshot;

pub use histogram::{LatencyHistogram, NUM_BINS};
pub use registry::{CallOutcome, MetricsConfig, MetricsRegistry};
pub use snapshot::{MethodMetrics, MetricsSnapshot, ProviderMetrics, Side};
