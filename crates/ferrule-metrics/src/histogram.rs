// Copyright 2025 Ferrule Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::sync::atomic::{AtomicU64, Ordering};

/// Number of power-of-ten decades covered (1μs up to 10^10 μs).
const DECADES: usize = 10;

/// Total number of bins, ten per decade.
pub const NUM_BINS: usize = DECADES * 10;

/// Lock-free logarithmic latency histogram.
///
/// Each decade `[10^d, 10^(d+1))` μs is split into nine bins by leading
/// digit, so bin `d * 10 + k` holds samples in `[k * 10^d, (k + 1) * 10^d)`.
/// Bin 0 holds zero-latency samples and the last bin absorbs overflow.
///
/// Recording is three relaxed `fetch_add`s. Percentiles are estimated by a
/// linear scan with interpolation inside the matching bin, which is accurate
/// to within one bin width.
#[derive(Debug)]
pub struct LatencyHistogram {
    bins: [AtomicU64; NUM_BINS],
    total_latency: AtomicU64,
    sample_count: AtomicU64,
}

impl LatencyHistogram {
    pub fn new() -> Self {
        Self {
            bins: std::array::from_fn(|_| AtomicU64::new(0)),
            total_latency: AtomicU64::new(0),
            sample_count: AtomicU64::new(0),
        }
    }

    /// Records one sample, in microseconds.
    pub fn record(&self, latency_us: u64) {
        self.bins[Self::bin_for(latency_us)].fetch_add(1, Ordering::Relaxed);
        self.total_latency.fetch_add(latency_us, Ordering::Relaxed);
        self.sample_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn count(&self) -> u64 {
        self.sample_count.load(Ordering::Relaxed)
    }

    fn bin_for(latency_us: u64) -> usize {
        if latency_us == 0 {
            return 0;
        }
        let decade = latency_us.ilog10() as usize;
        if decade >= DECADES {
            return NUM_BINS - 1;
        }
        let digit = (latency_us / 10u64.pow(decade as u32)) as usize;
        decade * 10 + digit
    }

    /// `[lower, upper)` bounds of a bin in microseconds.
    fn bin_bounds(bin: usize) -> (u64, u64) {
        if bin == 0 {
            return (0, 1);
        }
        let decade = (bin / 10) as u32;
        let digit = (bin % 10) as u64;
        let unit = 10u64.pow(decade);
        (digit * unit, (digit + 1) * unit)
    }

    /// Estimated latency at `percentile` (0-100), or 0 without samples.
    pub fn percentile(&self, percentile: u64) -> u64 {
        let total = self.count();
        if total == 0 {
            return 0;
        }

        let target = ((total * percentile.min(100)) as f64 / 100.0).ceil().max(1.0) as u64;
        let mut cumulative = 0;
        for (bin, counter) in self.bins.iter().enumerate() {
            let count = counter.load(Ordering::Relaxed);
            if count == 0 {
                continue;
            }
            if cumulative + count >= target {
                let (lower, upper) = Self::bin_bounds(bin);
                let fraction = (target - cumulative) as f64 / count as f64;
                return lower + (fraction * (upper - lower) as f64) as u64;
            }
            cumulative += count;
        }

        Self::bin_bounds(NUM_BINS - 1).1
    }

    /// `(avg, p50, p95, p99)` in microseconds; all zero without samples.
    pub fn summary(&self) -> (u64, u64, u64, u64) {
        let total = self.count();
        if total == 0 {
            return (0, 0, 0, 0);
        }
        let avg = self.total_latency.load(Ordering::Relaxed) / total;
        (avg, self.percentile(50), self.percentile(95), self.percentile(99))
    }
}

impl Default for LatencyHistogram {
    fn default() -> Self {
        Self::new()
    }
}
