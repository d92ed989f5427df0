//! # Rational Media Time
//!
//! Timestamps are stored as `ticks / base` so that durations derived from a
//! sample rate (e.g. 4800 frames at 48 kHz) stay exact. Mixing bases promotes
//! both operands to the least common multiple of the two bases; every
//! arithmetic operation is checked and reports [`MediaError::Overflow`].

use std::cmp::Ordering;
use std::fmt;

use crate::error::{MediaError, Result};

/// Microsecond base used by [`TimeUnit::from_micros`].
pub const MICROSECONDS: i64 = 1_000_000;

/// An exact point or span on a media timeline.
#[derive(Debug, Clone, Copy)]
pub struct TimeUnit {
    ticks: i64,
    base: i64,
}

fn gcd(mut a: i128, mut b: i128) -> i128 {
    while b != 0 {
        let t = a % b;
        a = b;
        b = t;
    }
    a.abs()
}

impl TimeUnit {
    /// Value from a known-good base. Use [`try_new`](Self::try_new) for bases
    /// read from a container.
    pub const fn new(ticks: i64, base: i64) -> Self {
        debug_assert!(base > 0, "time base must be positive");
        Self { ticks, base }
    }

    /// Value from an untrusted base; `base` must be positive.
    pub fn try_new(ticks: i64, base: i64) -> Result<Self> {
        if base <= 0 {
            return Err(MediaError::invalid(format!("Invalid time base {}", base)));
        }
        Ok(Self { ticks, base })
    }

    /// Zero in the microsecond base.
    pub const fn zero() -> Self {
        Self::new(0, MICROSECONDS)
    }

    pub const fn from_micros(us: i64) -> Self {
        Self::new(us, MICROSECONDS)
    }

    pub fn from_millis(ms: i64) -> Self {
        Self::new(ms, 1_000)
    }

    /// Numerator.
    pub fn ticks(&self) -> i64 {
        self.ticks
    }

    /// Ticks per second.
    pub fn base(&self) -> i64 {
        self.base
    }

    pub fn is_zero(&self) -> bool {
        self.ticks == 0
    }

    pub fn is_negative(&self) -> bool {
        self.ticks < 0
    }

    /// True when this value is expressed in `rate` ticks per second.
    pub fn is_base(&self, rate: i64) -> bool {
        self.base == rate
    }

    /// Truncated microsecond value, saturating at the `i64` range.
    pub fn to_micros(&self) -> i64 {
        let v = self.ticks as i128 * MICROSECONDS as i128 / self.base as i128;
        v.clamp(i64::MIN as i128, i64::MAX as i128) as i64
    }

    /// Lossy floating-point seconds.
    pub fn to_seconds(&self) -> f64 {
        self.ticks as f64 / self.base as f64
    }

    /// Number of whole ticks at `rate` contained in this value (truncating).
    pub fn to_ticks_at_rate(&self, rate: i64) -> Result<i64> {
        if rate <= 0 || self.base <= 0 {
            return Err(MediaError::invalid("rate and base must be positive"));
        }
        if self.base == rate {
            return Ok(self.ticks);
        }
        let v = self.ticks as i128 * rate as i128 / self.base as i128;
        i64::try_from(v).map_err(|_| MediaError::overflow("tick conversion out of range"))
    }

    /// Express both values in a shared base.
    fn common(&self, other: &TimeUnit) -> Result<(i64, i64, i64)> {
        if self.base == other.base {
            return Ok((self.ticks, other.ticks, self.base));
        }
        let (a, b) = (self.base as i128, other.base as i128);
        let lcm = a / gcd(a, b) * b;
        let base = i64::try_from(lcm).map_err(|_| MediaError::overflow("time base too large"))?;
        let lhs = i64::try_from(self.ticks as i128 * (lcm / a))
            .map_err(|_| MediaError::overflow("time value out of range"))?;
        let rhs = i64::try_from(other.ticks as i128 * (lcm / b))
            .map_err(|_| MediaError::overflow("time value out of range"))?;
        Ok((lhs, rhs, base))
    }

    pub fn checked_add(&self, other: &TimeUnit) -> Result<TimeUnit> {
        let (lhs, rhs, base) = self.common(other)?;
        lhs.checked_add(rhs)
            .map(|ticks| TimeUnit::new(ticks, base))
            .ok_or_else(|| MediaError::overflow("time addition"))
    }

    pub fn checked_sub(&self, other: &TimeUnit) -> Result<TimeUnit> {
        let (lhs, rhs, base) = self.common(other)?;
        lhs.checked_sub(rhs)
            .map(|ticks| TimeUnit::new(ticks, base))
            .ok_or_else(|| MediaError::overflow("time subtraction"))
    }
}

impl Default for TimeUnit {
    fn default() -> Self {
        Self::zero()
    }
}

impl PartialEq for TimeUnit {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for TimeUnit {}

impl PartialOrd for TimeUnit {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TimeUnit {
    fn cmp(&self, other: &Self) -> Ordering {
        // Bases are positive, so cross multiplication preserves order.
        let lhs = self.ticks as i128 * other.base as i128;
        let rhs = other.ticks as i128 * self.base as i128;
        lhs.cmp(&rhs)
    }
}

impl fmt::Display for TimeUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.6}s", self.to_seconds())
    }
}

/// Half-open `[start, end)` range on a media timeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeInterval {
    pub start: TimeUnit,
    pub end: TimeUnit,
}

impl TimeInterval {
    pub fn new(start: TimeUnit, end: TimeUnit) -> Self {
        Self { start, end }
    }

    pub fn length(&self) -> Result<TimeUnit> {
        self.end.checked_sub(&self.start)
    }

    /// True when `other` lies entirely within this interval.
    pub fn contains_interval(&self, other: &TimeInterval) -> bool {
        other.start >= self.start && other.end <= self.end
    }

    /// Shift both ends earlier by `offset`.
    pub fn shifted_back(&self, offset: &TimeUnit) -> Result<TimeInterval> {
        Ok(TimeInterval {
            start: self.start.checked_sub(offset)?,
            end: self.end.checked_sub(offset)?,
        })
    }
}

impl fmt::Display for TimeInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.start, self.end)
    }
}
