//! Domain types providing compile-time safety and self-documentation
//!
//! These newtype wrappers keep thread ids, session generations and sampling
//! intervals from being mixed up with each other or with raw integers.

use std::fmt;
use std::time::Duration;

use serde::Serialize;

/// OS thread ID
///
/// The kernel TID on Linux, the thread id returned by `GetCurrentThreadId`
/// on Windows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct Tid(pub u32);

impl fmt::Display for Tid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TID:{}", self.0)
    }
}

/// Activity generation
///
/// Epoch counter distinguishing successive profiling sessions. A sampler
/// thread bound to one generation exits as soon as the live generation
/// differs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize)]
#[serde(transparent)]
pub struct Generation(pub u32);

impl Generation {
    /// The generation after this one (wraps on overflow)
    #[must_use]
    pub fn next(self) -> Self {
        Generation(self.0.wrapping_add(1))
    }
}

impl fmt::Display for Generation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "gen#{}", self.0)
    }
}

/// Sampling interval in whole milliseconds (at least 1)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct SamplingInterval(u32);

impl SamplingInterval {
    /// Scheduler tick granularity below which the timer resolution is raised
    pub const COARSE_TIMER_THRESHOLD_MS: u32 = 10;

    /// Round a fractional millisecond request to the nearest whole
    /// millisecond, with a floor of 1ms
    ///
    /// Non-finite and negative requests also map to 1ms.
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn from_millis_f64(requested: f64) -> Self {
        let rounded = (requested + 0.5).floor();
        if !rounded.is_finite() || rounded < 1.0 {
            return SamplingInterval(1);
        }
        SamplingInterval(rounded.min(f64::from(u32::MAX)) as u32)
    }

    #[must_use]
    pub fn as_millis(self) -> u32 {
        self.0
    }

    #[must_use]
    pub fn as_duration(self) -> Duration {
        Duration::from_millis(u64::from(self.0))
    }

    /// Whether this interval is finer than the default scheduler tick
    #[must_use]
    pub fn needs_fine_timer(self) -> bool {
        self.0 < Self::COARSE_TIMER_THRESHOLD_MS
    }
}

impl fmt::Display for SamplingInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}ms", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interval_floor_is_one_ms() {
        assert_eq!(SamplingInterval::from_millis_f64(0.4).as_millis(), 1);
        assert_eq!(SamplingInterval::from_millis_f64(0.0).as_millis(), 1);
        assert_eq!(SamplingInterval::from_millis_f64(-3.0).as_millis(), 1);
        assert_eq!(SamplingInterval::from_millis_f64(f64::NAN).as_millis(), 1);
    }

    #[test]
    fn test_interval_rounds_to_nearest() {
        assert_eq!(SamplingInterval::from_millis_f64(1.4).as_millis(), 1);
        assert_eq!(SamplingInterval::from_millis_f64(2.5).as_millis(), 3);
        assert_eq!(SamplingInterval::from_millis_f64(9.6).as_millis(), 10);
    }

    #[test]
    fn test_fine_timer_threshold() {
        assert!(SamplingInterval::from_millis_f64(5.0).needs_fine_timer());
        assert!(SamplingInterval::from_millis_f64(9.4).needs_fine_timer());
        assert!(!SamplingInterval::from_millis_f64(10.0).needs_fine_timer());
    }

    #[test]
    fn test_generation_next_wraps() {
        assert_eq!(Generation(1).next(), Generation(2));
        assert_eq!(Generation(u32::MAX).next(), Generation(0));
    }

    #[test]
    fn test_display() {
        assert_eq!(Tid(42).to_string(), "TID:42");
        assert_eq!(SamplingInterval::from_millis_f64(4.0).to_string(), "4ms");
    }
}
