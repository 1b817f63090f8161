use std::fmt;

use serde::{Deserialize, Serialize};

/// Monotonic write counter.
///
/// Every `notify` advances the store's epoch by exactly one. Epochs totally
/// order writes over a store's lifetime, and invalidation stamps are compared
/// against them to decide staleness.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Epoch(u64);

impl Epoch {
    /// The epoch of a freshly constructed store, before any write.
    pub const ZERO: Epoch = Epoch(0);

    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// The epoch immediately after this one.
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }

    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Debug for Epoch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Epoch({})", self.0)
    }
}

impl fmt::Display for Epoch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "e{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn next_is_strictly_after() {
        let e = Epoch::new(4);
        assert!(e.next() > e);
        assert_eq!(e.next().get(), 5);
    }

    #[test]
    fn zero_is_default() {
        assert_eq!(Epoch::default(), Epoch::ZERO);
    }

    #[test]
    fn serializes_as_plain_number() {
        assert_eq!(serde_json::to_string(&Epoch::new(7)).unwrap(), "7");
    }
}
