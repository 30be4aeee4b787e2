use std::sync::Arc;
use std::time::Instant;

use ferrule_common::protocol::Directory;

use crate::group::ChannelGroup;

/// Effective weights of one candidate set, with the derived values the
/// balancers select with.
#[derive(Debug, Clone, Default)]
pub struct Weights {
    values: Vec<u32>,
    prefix: Vec<u64>,
    total: u64,
    gcd: u64,
    max: u64,
    all_same: bool,
}

impl Weights {
    /// Builds weights from explicit values; every candidate counts as warm.
    pub fn from_values(values: &[u32]) -> Self {
        let mut weights = Weights::default();
        weights.rebuild(values.iter().copied());
        weights
    }

    /// Recomputes in place for `groups` at `now`, reusing the buffers.
    ///
    /// Returns `true` if every group has finished warming up, i.e. the
    /// result stays valid for as long as the candidate set is unchanged.
    pub fn fill(&mut self, directory: &Directory, groups: &[Arc<ChannelGroup>], now: Instant) -> bool {
        let mut all_warm = true;
        self.rebuild(groups.iter().map(|group| {
            all_warm &= group.is_warm_up_complete(now);
            group.effective_weight(directory, now)
        }));
        all_warm
    }

    fn rebuild(&mut self, values: impl Iterator<Item = u32>) {
        self.values.clear();
        self.prefix.clear();
        self.total = 0;
        self.gcd = 0;
        self.max = 0;

        for value in values {
            let value64 = value as u64;
            self.values.push(value);
            self.total += value64;
            self.prefix.push(self.total);
            self.max = self.max.max(value64);
            if value64 > 0 {
                self.gcd = gcd(self.gcd, value64);
            }
        }

        self.all_same = self.values.windows(2).all(|pair| pair[0] == pair[1]);
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn values(&self) -> &[u32] {
        &self.values
    }

    /// Cumulative sums: `prefix()[i]` is the total weight of candidates `0..=i`.
    pub fn prefix(&self) -> &[u64] {
        &self.prefix
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    /// Greatest common divisor of the non-zero weights (0 if there are none).
    pub fn gcd(&self) -> u64 {
        self.gcd
    }

    pub fn max(&self) -> u64 {
        self.max
    }

    /// Every candidate has the same weight; selection can ignore weights.
    pub fn all_same(&self) -> bool {
        self.all_same
    }
}

pub(crate) fn gcd(mut a: u64, mut b: u64) -> u64 {
    while b != 0 {
        let t = a % b;
        a = b;
        b = t;
    }
    a
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gcd() {
        assert_eq!(gcd(0, 6), 6);
        assert_eq!(gcd(12, 18), 6);
        assert_eq!(gcd(7, 5), 1);
    }

    #[test]
    fn test_derived_values() {
        let w = Weights::from_values(&[4, 0, 6, 2]);
        assert_eq!(w.prefix(), &[4, 4, 10, 12]);
        assert_eq!(w.total(), 12);
        assert_eq!(w.gcd(), 2);
        assert_eq!(w.max(), 6);
        assert!(!w.all_same());
    }

    #[test]
    fn test_all_same() {
        assert!(Weights::from_values(&[5, 5, 5]).all_same());
        assert!(Weights::from_values(&[5]).all_same());
    }

    #[test]
    fn test_rebuild_clears_previous() {
        let mut w = Weights::from_values(&[1, 2, 3]);
        w.rebuild([9].into_iter());
        assert_eq!(w.values(), &[9]);
        assert_eq!(w.total(), 9);
        assert_eq!(w.gcd(), 9);
    }
}
