//! Virtual time for the simulation clock.
//!
//! Represents a logical timestamp with no dependency on wall-clock time.
//! The clock only moves when the dispatcher pops the next activation.

use std::cmp::Ordering;

/// A point on the simulated time axis.
///
/// Wraps a finite, non-negative `f64`. Construction rejects anything else,
/// which is what makes the manual `Eq`/`Ord` impls total.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(
    feature = "serialize",
    derive(serde::Serialize, serde::Deserialize),
    serde(try_from = "f64", into = "f64")
)]
pub struct VirtualTime(f64);

/// A raw value that is not a valid point in virtual time.
#[derive(Debug, Clone, Copy, PartialEq, thiserror::Error)]
#[error("virtual time must be finite and non-negative, got {0}")]
pub struct InvalidTime(pub f64);

impl VirtualTime {
    /// The zero-point of simulation time.
    pub const ZERO: VirtualTime = VirtualTime(0.0);

    /// Create a new `VirtualTime`.
    ///
    /// # Panics
    /// Panics if `t` is negative, NaN or infinite.
    #[inline]
    pub fn new(t: f64) -> Self {
        Self::try_new(t).unwrap_or_else(|e| panic!("{e}"))
    }

    /// Fallible form of [`new`](Self::new).
    pub fn try_new(t: f64) -> Result<Self, InvalidTime> {
        if !(t.is_finite() && t >= 0.0) {
            return Err(InvalidTime(t));
        }
        // Folds -0.0 into 0.0.
        Ok(VirtualTime(t + 0.0))
    }

    /// Return the raw time value.
    #[inline]
    pub fn as_f64(self) -> f64 {
        self.0
    }

    /// Advance time by `delta`.
    /// Returns `None` if `delta` is negative or the result is not finite.
    #[inline]
    pub fn advance(self, delta: f64) -> Option<VirtualTime> {
        if !(delta >= 0.0) {
            return None;
        }
        let t = self.0 + delta;
        t.is_finite().then_some(VirtualTime(t))
    }

    /// Returns `true` if `self` is strictly before `other`.
    #[inline]
    pub fn is_before(self, other: VirtualTime) -> bool {
        self.0 < other.0
    }

    /// Returns the distance between two points in time.
    /// Returns `None` if `other` is after `self`.
    #[inline]
    pub fn duration_since(self, other: VirtualTime) -> Option<f64> {
        (self.0 >= other.0).then(|| self.0 - other.0)
    }
}

impl TryFrom<f64> for VirtualTime {
    type Error = InvalidTime;

    fn try_from(t: f64) -> Result<Self, Self::Error> {
        Self::try_new(t)
    }
}

impl From<VirtualTime> for f64 {
    fn from(t: VirtualTime) -> f64 {
        t.0
    }
}

impl Eq for VirtualTime {}

impl Ord for VirtualTime {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.total_cmp(&other.0)
    }
}

impl PartialOrd for VirtualTime {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl std::fmt::Display for VirtualTime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "T={}", self.0)
    }
}
