// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 itsakeyfut

//! Split 64-bit counters
//!
//! A 64-bit counter on a 32-bit register bus is exposed as a LO/HI register
//! pair. Each register access is atomic on its own, but nothing holds the
//! pair together, so a reader can see LO from after a carry and HI from
//! before it.
//!
//! ## Stable Read
//!
//! ```text
//! hi0 = read(HI)
//! lo  = read(LO)
//! hi1 = read(HI)
//! hi0 == hi1 ? accept (hi1 << 32 | lo) : retry
//! ```
//!
//! This is sufficient without locks because the counters only ever grow: if
//! HI did not change across the LO sample, no carry into HI happened between
//! the two HI samples and the LO value belongs to that HI.

use crate::core::error::Result;

/// A monotonically increasing 64-bit counter exposed as two 32-bit halves
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SplitCounter(u64);

impl SplitCounter {
    pub fn new() -> Self {
        Self(0)
    }

    /// Add `n`, saturating at `u64::MAX`
    #[inline(always)]
    pub fn add(&mut self, n: u64) {
        self.0 = self.0.saturating_add(n);
    }

    #[inline(always)]
    pub fn increment(&mut self) {
        self.add(1);
    }

    #[inline(always)]
    pub fn get(&self) -> u64 {
        self.0
    }

    /// Low 32 bits (the LO register)
    #[inline(always)]
    pub fn lo(&self) -> u32 {
        self.0 as u32
    }

    /// High 32 bits (the HI register)
    #[inline(always)]
    pub fn hi(&self) -> u32 {
        (self.0 >> 32) as u32
    }
}

/// Outcome of a stable read
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StableValue {
    /// The consistent 64-bit value
    pub value: u64,

    /// Number of torn samples discarded before acceptance
    pub retries: u32,
}

/// Read a split counter with the HI/LO/HI retry protocol
///
/// `read_hi` and `read_lo` each perform exactly one register access.
///
/// # Example
///
/// ```
/// use irqstorm::core::counter::stable_read;
///
/// let v = stable_read(|| Ok(0x1), || Ok(0x2)).unwrap();
/// assert_eq!(v.value, 0x1_0000_0002);
/// assert_eq!(v.retries, 0);
/// ```
pub fn stable_read<H, L>(mut read_hi: H, mut read_lo: L) -> Result<StableValue>
where
    H: FnMut() -> Result<u32>,
    L: FnMut() -> Result<u32>,
{
    let mut retries = 0;
    loop {
        let hi0 = read_hi()?;
        let lo = read_lo()?;
        let hi1 = read_hi()?;
        if hi0 == hi1 {
            return Ok(StableValue {
                value: ((hi1 as u64) << 32) | lo as u64,
                retries,
            });
        }
        retries += 1;
        log::trace!(
            "Torn counter sample hi0=0x{:08X} hi1=0x{:08X}, retrying",
            hi0,
            hi1
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::cell::Cell;

    #[test]
    fn test_split_halves() {
        let mut c = SplitCounter::new();
        c.add(0x1_FFFF_FFFF);
        assert_eq!(c.lo(), 0xFFFF_FFFF);
        assert_eq!(c.hi(), 1);

        c.increment();
        assert_eq!(c.lo(), 0);
        assert_eq!(c.hi(), 2);
    }

    #[test]
    fn test_saturates() {
        let mut c = SplitCounter::new();
        c.add(u64::MAX);
        c.increment();
        assert_eq!(c.get(), u64::MAX);
    }

    #[test]
    fn test_stable_read_retries_across_carry() {
        // The counter crosses a 32-bit boundary between the LO sample and
        // the second HI sample on the first attempt.
        let value = Cell::new(0x0_FFFF_FFFEu64);
        let lo_reads = Cell::new(0);

        let result = stable_read(
            || Ok((value.get() >> 32) as u32),
            || {
                let lo = value.get() as u32;
                if lo_reads.get() == 0 {
                    value.set(value.get() + 5);
                }
                lo_reads.set(lo_reads.get() + 1);
                Ok(lo)
            },
        )
        .unwrap();

        assert_eq!(result.retries, 1);
        assert_eq!(result.value, 0x1_0000_0003);
    }

    #[test]
    fn test_stable_read_propagates_errors() {
        use crate::core::error::StormError;

        let result = stable_read(
            || Err(StormError::UnmappedPort { port: 0x56C }),
            || Ok(0),
        );
        assert!(result.is_err());
    }

    proptest! {
        /// A racing writer advances the counter between any two register
        /// accesses. Every accepted value must be one the counter actually
        /// held at some point during the read.
        #[test]
        fn prop_stable_read_never_accepts_torn_value(
            start in 0u64..=(u64::MAX / 2),
            steps in proptest::collection::vec(0u64..=0x2_0000_0000, 1..12),
        ) {
            let value = Cell::new(start);
            let history = std::cell::RefCell::new(vec![start]);
            let step = Cell::new(0usize);

            let race = || {
                let i = step.get();
                step.set(i + 1);
                if let Some(delta) = steps.get(i) {
                    value.set(value.get() + delta);
                    history.borrow_mut().push(value.get());
                }
            };

            let result = stable_read(
                || {
                    race();
                    Ok((value.get() >> 32) as u32)
                },
                || {
                    race();
                    Ok(value.get() as u32)
                },
            )
            .unwrap();

            prop_assert!(history.borrow().contains(&result.value));
        }
    }

    #[test]
    fn test_stable_read_against_racing_writer() {
        use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
        use std::thread;

        // Every step changes both halves, so any torn HI/LO pair is not a
        // multiple of STEP.
        const STEP: u64 = 0x1_0000_0001;
        let counter = AtomicU64::new(0);
        let done = AtomicBool::new(false);

        thread::scope(|s| {
            s.spawn(|| {
                for _ in 0..200_000 {
                    counter.fetch_add(STEP, Ordering::SeqCst);
                }
                done.store(true, Ordering::SeqCst);
            });

            let mut last = 0;
            while !done.load(Ordering::SeqCst) {
                let v = stable_read(
                    || Ok((counter.load(Ordering::SeqCst) >> 32) as u32),
                    || Ok(counter.load(Ordering::SeqCst) as u32),
                )
                .unwrap();
                assert_eq!(v.value % STEP, 0, "torn value 0x{:016X}", v.value);
                assert!(v.value >= last);
                last = v.value;
            }
        });
    }
}
