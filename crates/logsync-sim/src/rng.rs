use serde::{Deserialize, Serialize};

/// Seeded linear congruential generator.
///
/// Every random choice in a simulation run comes from one of these, so a
/// seed replays bit-for-bit on any platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeterministicRng {
    state: u64,
}

impl DeterministicRng {
    #[must_use]
    pub const fn new(seed: u64) -> Self {
        Self {
            state: seed ^ 0x9E37_79B9_7F4A_7C15,
        }
    }

    pub const fn next_u64(&mut self) -> u64 {
        self.state = self
            .state
            .wrapping_mul(6_364_136_223_846_793_005)
            .wrapping_add(1_442_695_040_888_963_407);
        // The low bits of an LCG cycle quickly; hand out the high half mixed
        // back in.
        self.state ^ (self.state >> 33)
    }

    /// Next value in `[0, upper_exclusive)`, or 0 for an empty range.
    pub const fn next_bounded(&mut self, upper_exclusive: u64) -> u64 {
        if upper_exclusive == 0 {
            return 0;
        }
        self.next_u64() % upper_exclusive
    }

    /// Uniform index into a collection of `len` items.
    pub fn next_index(&mut self, len: usize) -> usize {
        let bounded = self.next_bounded(u64::try_from(len).unwrap_or(u64::MAX));
        usize::try_from(bounded).unwrap_or(0)
    }

    /// Bernoulli trial with an integer percent.
    pub fn hit_rate_percent(&mut self, percent: u8) -> bool {
        if percent == 0 {
            return false;
        }
        if percent >= 100 {
            return true;
        }
        self.next_bounded(100) < u64::from(percent)
    }

    /// A uniformly chosen element, or `None` when `items` is empty.
    pub fn pick<'a, T>(&mut self, items: &'a [T]) -> Option<&'a T> {
        if items.is_empty() {
            return None;
        }
        items.get(self.next_index(items.len()))
    }
}
