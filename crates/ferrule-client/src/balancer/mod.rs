//! Weighted selection of a [`ChannelGroup`](crate::group::ChannelGroup) among
//! the candidates of a directory.
//!
//! Weights come from [`GroupSnapshot::weights`]: each group's configured
//! weight for the directory, scaled down while the group warms up. Balancers
//! never share mutable state across services; create one per proxy.

mod random;
mod round_robin;
mod weight;

pub use random::RandomLoadBalancer;
pub use round_robin::RoundRobinLoadBalancer;
pub use weight::Weights;

use std::time::Instant;

use rand::rngs::SmallRng;
use rand::SeedableRng;

use crate::group::GroupSnapshot;

/// Per-caller scratch state: RNG and weight buffer.
///
/// Owned by whoever calls [`LoadBalancer::select`] so neither needs to be
/// global or thread-local.
#[derive(Debug, Clone)]
pub struct SelectScratch {
    pub(crate) rng: SmallRng,
    pub(crate) weights: Weights,
}

impl SelectScratch {
    pub fn new() -> Self {
        Self {
            rng: SmallRng::from_entropy(),
            weights: Weights::default(),
        }
    }

    pub fn with_seed(seed: u64) -> Self {
        Self {
            rng: SmallRng::seed_from_u64(seed),
            weights: Weights::default(),
        }
    }
}

impl Default for SelectScratch {
    fn default() -> Self {
        Self::new()
    }
}

/// Picks the index of one candidate in a snapshot.
pub trait LoadBalancer: Send + Sync {
    /// `None` only when the snapshot is empty.
    fn select(&self, snapshot: &GroupSnapshot, scratch: &mut SelectScratch) -> Option<usize> {
        match snapshot.len() {
            0 => None,
            1 => Some(0),
            _ => {
                let SelectScratch { rng, weights } = scratch;
                let weights = snapshot.weights(Instant::now(), weights);
                Some(self.select_weighted(weights, rng))
            }
        }
    }

    /// Selection among two or more candidates.
    fn select_weighted(&self, weights: &Weights, rng: &mut SmallRng) -> usize;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoadBalancerType {
    #[default]
    Random,
    RoundRobin,
}

impl LoadBalancerType {
    /// A fresh balancer instance.
    pub fn create(self) -> Box<dyn LoadBalancer> {
        match self {
            LoadBalancerType::Random => Box::new(RandomLoadBalancer),
            LoadBalancerType::RoundRobin => Box::new(RoundRobinLoadBalancer::new()),
        }
    }
}
