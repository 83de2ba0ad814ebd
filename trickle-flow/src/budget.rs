//! Cumulative emission budget.
//!
//! Unlike a token bucket, the budget never caps accumulated credit: the number
//! of bytes allowed at any instant is `round(rate * elapsed)` measured from the
//! first emission attempt. A stream that idles may therefore burst up to the
//! credit it accumulated while idle, but its lifetime average never exceeds
//! the configured rate.
//!
//! All time-dependent operations take the current instant as a parameter so
//! the arithmetic can be tested without a runtime.

use std::time::Duration;

use tokio::time::Instant;

use crate::config::ThrottleConfig;

const MICROS_PER_SEC: u128 = 1_000_000;

/// Result of asking the budget to admit a chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// The whole chunk fits the budget and has been charged.
    Whole,

    /// Only a prefix fits. The prefix has been charged; the caller must hold
    /// the rest back for `wait`.
    Partial {
        /// Length of the prefix that may be emitted now (possibly 0).
        consumed: usize,
        /// How long to sleep before trying again, clamped to the wait ceiling.
        wait: Duration,
    },
}

/// Lifetime byte budget for one stream.
#[derive(Debug)]
pub struct EmissionBudget {
    /// Bytes per second.
    rate_bytes_per_sec: u64,

    /// Ceiling on any single sleep.
    max_wait: Duration,

    /// Set on the first admission and never changed afterwards.
    start: Option<Instant>,

    /// Bytes charged so far.
    total_bytes_emitted: u64,
}

impl EmissionBudget {
    /// Creates an empty budget.
    #[must_use]
    pub const fn new(config: &ThrottleConfig) -> Self {
        Self {
            rate_bytes_per_sec: config.rate_bytes_per_sec,
            max_wait: config.max_wait,
            start: None,
            total_bytes_emitted: 0,
        }
    }

    /// Returns the total number of bytes charged against the budget.
    #[must_use]
    pub const fn total_bytes_emitted(&self) -> u64 {
        self.total_bytes_emitted
    }

    /// Returns the instant of the first admission, if any.
    #[must_use]
    pub const fn start(&self) -> Option<Instant> {
        self.start
    }

    /// Returns the cumulative number of bytes allowed at `now`.
    ///
    /// Zero before the first admission.
    #[must_use]
    pub fn allowed_bytes(&self, now: Instant) -> u64 {
        let Some(start) = self.start else {
            return 0;
        };
        let elapsed_us = now.saturating_duration_since(start).as_micros();
        // round(rate * elapsed_s), half away from zero.
        let allowed = (u128::from(self.rate_bytes_per_sec) * elapsed_us + MICROS_PER_SEC / 2)
            / MICROS_PER_SEC;
        u64::try_from(allowed).unwrap_or(u64::MAX)
    }

    /// Charges as much of a `len`-byte chunk as the budget allows at `now`.
    ///
    /// The first call records the start instant, so the first chunk of a
    /// stream always sees an allowance of zero and is held back for at least
    /// one sleep.
    pub fn admit(&mut self, len: usize, now: Instant) -> Admission {
        if self.start.is_none() {
            self.start = Some(now);
        }

        let allowed = self.allowed_bytes(now);
        let len_bytes = len as u64;
        let prospective = self.total_bytes_emitted.saturating_add(len_bytes);

        if prospective <= allowed {
            self.total_bytes_emitted = prospective;
            return Admission::Whole;
        }

        let overflow = prospective - allowed;
        #[allow(clippy::cast_possible_truncation)] // Bounded by len.
        let consumed = len_bytes.saturating_sub(overflow) as usize;
        self.total_bytes_emitted += consumed as u64;

        Admission::Partial {
            consumed,
            wait: self.wait_for(overflow),
        }
    }

    /// Time for `overflow` bytes of credit to accrue, clamped to the ceiling.
    ///
    /// Rounded up to the next microsecond and never zero, so the wake-up
    /// always finds the credit it waited for. A zero rate never accrues
    /// credit; it sleeps for the full ceiling.
    fn wait_for(&self, overflow: u64) -> Duration {
        if self.rate_bytes_per_sec == 0 {
            return self.max_wait;
        }

        let wait_us = (u128::from(overflow) * MICROS_PER_SEC)
            .div_ceil(u128::from(self.rate_bytes_per_sec))
            .max(1);

        match u64::try_from(wait_us) {
            Ok(us) => Duration::from_micros(us).min(self.max_wait),
            Err(_) => self.max_wait,
        }
    }
}
