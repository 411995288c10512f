//! Timing utilities used by the `erpgate` family of crates
//!
//! Token lifetimes are tracked at one-second resolution, which is what
//! authorization servers report in `expires_in`. The [`Clock`] trait lets the
//! token manager be driven by a [`TestClock`] in tests, where time is advanced
//! explicitly instead of waiting on the wall clock.

#![warn(
    missing_docs,
    unused_import_braces,
    unused_imports,
    unused_qualifications
)]
#![deny(
    missing_debug_implementations,
    trivial_casts,
    trivial_numeric_casts,
    unused_must_use
)]
#![forbid(unsafe_code)]
#![cfg_attr(docsrs, feature(doc_cfg))]

use std::{
    fmt, ops,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::{Duration, SystemTime},
};

#[cfg(feature = "serde")]
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Unix time
///
/// Unix time as represented by the number of seconds elapsed since the
/// beginning of the Unix epoch on 1970/01/01 at 00:00:00 UTC.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Ord, PartialOrd, Hash)]
#[repr(transparent)]
pub struct UnixTime(pub u64);

/// A duration in whole seconds
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Ord, PartialOrd, Hash)]
#[repr(transparent)]
pub struct DurationSecs(pub u64);

impl From<SystemTime> for UnixTime {
    #[inline]
    fn from(t: SystemTime) -> Self {
        // A system clock set before the epoch is treated as the epoch itself.
        let time = t
            .duration_since(SystemTime::UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default();

        UnixTime(time)
    }
}

impl fmt::Display for UnixTime {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl fmt::Display for DurationSecs {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}s", self.0)
    }
}

impl ops::Add<DurationSecs> for UnixTime {
    type Output = UnixTime;

    #[inline]
    fn add(self, rhs: DurationSecs) -> Self::Output {
        UnixTime(self.0.saturating_add(rhs.0))
    }
}

impl ops::AddAssign<DurationSecs> for UnixTime {
    #[inline]
    fn add_assign(&mut self, rhs: DurationSecs) {
        *self = *self + rhs;
    }
}

impl ops::Sub<DurationSecs> for UnixTime {
    type Output = UnixTime;

    #[inline]
    fn sub(self, rhs: DurationSecs) -> Self::Output {
        UnixTime(self.0.saturating_sub(rhs.0))
    }
}

impl ops::Sub for UnixTime {
    type Output = DurationSecs;

    /// The elapsed time between two instants, saturating at zero
    #[inline]
    fn sub(self, rhs: UnixTime) -> Self::Output {
        DurationSecs(self.0.saturating_sub(rhs.0))
    }
}

impl ops::Add for DurationSecs {
    type Output = DurationSecs;

    #[inline]
    fn add(self, rhs: DurationSecs) -> Self::Output {
        DurationSecs(self.0.saturating_add(rhs.0))
    }
}

impl ops::Sub for DurationSecs {
    type Output = DurationSecs;

    #[inline]
    fn sub(self, rhs: DurationSecs) -> Self::Output {
        DurationSecs(self.0.saturating_sub(rhs.0))
    }
}

impl From<DurationSecs> for Duration {
    #[inline]
    fn from(d: DurationSecs) -> Self {
        Duration::from_secs(d.0)
    }
}

impl From<Duration> for DurationSecs {
    /// Converts a duration, truncating any sub-second component
    #[inline]
    fn from(d: Duration) -> Self {
        DurationSecs(d.as_secs())
    }
}

#[cfg(feature = "serde")]
#[cfg_attr(docsrs, doc(cfg(feature = "serde")))]
impl Serialize for UnixTime {
    #[inline]
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.0.serialize(serializer)
    }
}

#[cfg(feature = "serde")]
#[cfg_attr(docsrs, doc(cfg(feature = "serde")))]
impl<'de> Deserialize<'de> for UnixTime {
    #[inline]
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = u64::deserialize(deserializer)?;
        Ok(Self(s))
    }
}

#[cfg(feature = "serde")]
#[cfg_attr(docsrs, doc(cfg(feature = "serde")))]
impl Serialize for DurationSecs {
    #[inline]
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.0.serialize(serializer)
    }
}

#[cfg(feature = "serde")]
#[cfg_attr(docsrs, doc(cfg(feature = "serde")))]
impl<'de> Deserialize<'de> for DurationSecs {
    #[inline]
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = u64::deserialize(deserializer)?;
        Ok(Self(s))
    }
}

/// Represents a clock, which can tell the current time
pub trait Clock {
    /// Gets the current time according to this clock
    fn now(&self) -> UnixTime;
}

/// The system clock as provided by `std::time::SystemTime`
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct System;

impl Clock for System {
    #[inline]
    fn now(&self) -> UnixTime {
        UnixTime::from(SystemTime::now())
    }
}

/// A manually driven clock for tests
///
/// Clones share the same instant, so a clone handed to a component under
/// test observes every [`set`][TestClock::set] or [`advance`][TestClock::advance]
/// made through the original.
#[derive(Clone, Debug, Default)]
pub struct TestClock(Arc<AtomicU64>);

impl Clock for TestClock {
    #[inline]
    fn now(&self) -> UnixTime {
        UnixTime(self.0.load(Ordering::Acquire))
    }
}

impl TestClock {
    /// Creates a new test clock with the specified time
    pub fn new(time: UnixTime) -> Self {
        Self(Arc::new(AtomicU64::new(time.0)))
    }

    /// Updates the clock's current time to `val`
    pub fn set(&self, val: UnixTime) {
        self.0.store(val.0, Ordering::Release);
    }

    /// Moves the clock forward by `inc`
    pub fn advance(&self, inc: DurationSecs) {
        self.0.fetch_add(inc.0, Ordering::AcqRel);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subtraction_saturates_at_zero() {
        assert_eq!(UnixTime(10) - DurationSecs(60), UnixTime(0));
        assert_eq!(UnixTime(10) - UnixTime(70), DurationSecs(0));
        assert_eq!(UnixTime(70) - UnixTime(10), DurationSecs(60));
    }

    #[test]
    fn test_clock_clones_share_time() {
        let clock = TestClock::new(UnixTime(1_000));
        let seen_by_component = clock.clone();

        clock.advance(DurationSecs(30));
        assert_eq!(seen_by_component.now(), UnixTime(1_030));

        seen_by_component.set(UnixTime(5));
        assert_eq!(clock.now(), UnixTime(5));
    }

    #[test]
    fn pre_epoch_system_time_maps_to_epoch() {
        let before = SystemTime::UNIX_EPOCH - Duration::from_secs(5);
        assert_eq!(UnixTime::from(before), UnixTime(0));
    }

    #[test]
    fn durations_convert_to_std() {
        let d: Duration = DurationSecs(90).into();
        assert_eq!(d, Duration::from_secs(90));
        assert_eq!(DurationSecs::from(Duration::from_millis(2_500)), DurationSecs(2));
    }
}
