use std::sync::atomic::{AtomicUsize, Ordering};

use rand::rngs::SmallRng;

use super::{LoadBalancer, Weights};

/// Weighted round-robin.
///
/// The cycle has `total / gcd` slots. Slots are handed out in rounds: in
/// round `r` every candidate whose reduced weight exceeds `r` takes one slot,
/// so heavier candidates are interleaved rather than bunched.
///
/// A pick binary-searches the round holding its slot, so it costs
/// `O(n log max)` whatever the ratio between weights.
#[derive(Debug, Default)]
pub struct RoundRobinLoadBalancer {
    index: AtomicUsize,
}

impl RoundRobinLoadBalancer {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LoadBalancer for RoundRobinLoadBalancer {
    fn select_weighted(&self, weights: &Weights, _rng: &mut SmallRng) -> usize {
        let index = self.index.fetch_add(1, Ordering::Relaxed);
        let total = weights.total();
        if weights.all_same() || total == 0 {
            return index % weights.len();
        }

        let gcd = weights.gcd();
        let slot = index as u64 % (total / gcd);
        let reduced = |weight: u32| weight as u64 / gcd;
        // Slots handed out in the rounds before `round`.
        let before = |round: u64| -> u64 { weights.values().iter().map(|&w| reduced(w).min(round)).sum() };

        // before(low) <= slot < before(high)
        let (mut low, mut high) = (0, weights.max() / gcd);
        while high - low > 1 {
            let mid = low + (high - low) / 2;
            if before(mid) <= slot {
                low = mid;
            } else {
                high = mid;
            }
        }

        let mut offset = slot - before(low);
        for (candidate, &weight) in weights.values().iter().enumerate() {
            if reduced(weight) > low {
                if offset == 0 {
                    return candidate;
                }
                offset -= 1;
            }
        }
        // Unreachable: round `low` holds `before(low + 1) - before(low)` slots.
        index % weights.len()
    }
}
