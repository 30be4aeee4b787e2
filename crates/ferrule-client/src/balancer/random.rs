use rand::rngs::SmallRng;
use rand::Rng;

use super::{LoadBalancer, Weights};

/// Weighted random selection over the prefix sums.
#[derive(Debug, Default, Clone, Copy)]
pub struct RandomLoadBalancer;

impl LoadBalancer for RandomLoadBalancer {
    fn select_weighted(&self, weights: &Weights, rng: &mut SmallRng) -> usize {
        let total = weights.total();
        if weights.all_same() || total == 0 {
            return rng.gen_range(0..weights.len());
        }

        let draw = rng.gen_range(1..=total);
        weights.prefix().partition_point(|&sum| sum < draw)
    }
}
