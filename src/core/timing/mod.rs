// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 itsakeyfut
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Time sources and the periodic deadline timer
//!
//! The storm device schedules itself against a [`Clock`] measured in
//! nanoseconds. Two clocks are provided:
//!
//! - [`VirtualClock`]: advanced explicitly by the driver. Deterministic, used
//!   by tests and by the virtual-time stepping mode.
//! - [`HostClock`]: monotonic wall time since creation.
//!
//! ## Drift Correction
//!
//! [`PeriodicTimer`] keeps an absolute deadline and advances it by whole
//! periods. When a fire is handled late, the deadline jumps over every
//! missed period in a single step instead of replaying them:
//!
//! ```text
//! deadline D, period P, fire handled at D + 3.7P
//!
//!   D+P ≤ now         -> missed = floor((now - (D+P)) / P) + 1 = 3
//!   next deadline     =  D + P + 3P = D + 4P
//! ```
//!
//! Fires that would have landed inside the stall are not synthesized.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Nanoseconds per microsecond
pub const NS_PER_US: u64 = 1_000;

/// Monotonic time source in nanoseconds
pub trait Clock: Send + Sync {
    /// Current time in nanoseconds
    fn now_ns(&self) -> u64;
}

/// Explicitly advanced clock
///
/// # Example
///
/// ```
/// use irqstorm::core::timing::{Clock, VirtualClock};
///
/// let clock = VirtualClock::new();
/// clock.advance_us(10);
/// assert_eq!(clock.now_ns(), 10_000);
/// ```
#[derive(Debug, Default)]
pub struct VirtualClock {
    now: AtomicU64,
}

impl VirtualClock {
    /// Create a clock at time zero
    pub fn new() -> Self {
        Self {
            now: AtomicU64::new(0),
        }
    }

    /// Set the absolute time
    ///
    /// Time never moves backwards; earlier values are ignored.
    pub fn set_ns(&self, ns: u64) {
        self.now.fetch_max(ns, Ordering::AcqRel);
    }

    /// Advance by a number of nanoseconds
    pub fn advance_ns(&self, ns: u64) {
        self.now.fetch_add(ns, Ordering::AcqRel);
    }

    /// Advance by a number of microseconds
    pub fn advance_us(&self, us: u64) {
        self.advance_ns(us * NS_PER_US);
    }
}

impl Clock for VirtualClock {
    fn now_ns(&self) -> u64 {
        self.now.load(Ordering::Acquire)
    }
}

/// Wall clock measured from construction
#[derive(Debug)]
pub struct HostClock {
    origin: Instant,
}

impl HostClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for HostClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for HostClock {
    fn now_ns(&self) -> u64 {
        self.origin.elapsed().as_nanos() as u64
    }
}

/// Absolute-deadline periodic timer with catch-up rescheduling
#[derive(Debug, Clone, Default)]
pub struct PeriodicTimer {
    /// Next fire time, `None` while disarmed
    deadline: Option<u64>,
}

impl PeriodicTimer {
    /// Create a disarmed timer
    pub fn new() -> Self {
        Self { deadline: None }
    }

    /// Arm relative to `now`, discarding any previous schedule
    ///
    /// # Example
    ///
    /// ```
    /// use irqstorm::core::timing::PeriodicTimer;
    ///
    /// let mut timer = PeriodicTimer::new();
    /// timer.arm_from(1_000, 500);
    /// assert_eq!(timer.deadline(), Some(1_500));
    /// ```
    pub fn arm_from(&mut self, now: u64, period_ns: u64) -> u64 {
        let deadline = now.saturating_add(period_ns);
        self.deadline = Some(deadline);
        deadline
    }

    /// Advance the deadline after a fire handled at `now`
    ///
    /// Returns the number of periods skipped beyond the regular one. The
    /// deadline always ends up strictly after `now`. A disarmed timer stays
    /// disarmed and reports zero.
    ///
    /// # Example
    ///
    /// ```
    /// use irqstorm::core::timing::PeriodicTimer;
    ///
    /// let mut timer = PeriodicTimer::new();
    /// timer.arm_from(0, 100);
    ///
    /// // Fire handled 3.7 periods late
    /// let skipped = timer.reschedule(100 + 370, 100);
    /// assert_eq!(skipped, 3);
    /// assert_eq!(timer.deadline(), Some(100 + 400));
    /// ```
    pub fn reschedule(&mut self, now: u64, period_ns: u64) -> u64 {
        let Some(deadline) = self.deadline else {
            return 0;
        };
        let period_ns = period_ns.max(1);

        let mut next = deadline.saturating_add(period_ns);
        let mut missed = 0;
        if next <= now {
            missed = (now - next) / period_ns + 1;
            next = next.saturating_add(missed.saturating_mul(period_ns));
        }
        self.deadline = Some(next);
        missed
    }

    /// Disarm the timer
    pub fn cancel(&mut self) {
        self.deadline = None;
    }

    /// Next deadline, if armed
    #[inline(always)]
    pub fn deadline(&self) -> Option<u64> {
        self.deadline
    }

    /// True when armed and the deadline is at or before `now`
    #[inline(always)]
    pub fn is_due(&self, now: u64) -> bool {
        matches!(self.deadline, Some(deadline) if deadline <= now)
    }
}
