// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 itsakeyfut

//! Telemetry snapshots and reports

use crate::core::storm::registers::Control;
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Device telemetry as read over the bus at one point in time
///
/// `pulses` is the full 64-bit counter; the other three counters are only
/// exposed as their low 32 bits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TelemetrySnapshot {
    pub pulses: u64,
    pub timer_fires: u32,
    pub config_writes: u32,
    pub enable_toggles: u32,
    pub control: u8,
    pub burst: u32,
    pub period_us: u32,
}

impl TelemetrySnapshot {
    /// Counter growth from `baseline` to `self`
    ///
    /// The 32-bit counters wrap, so their deltas use wrapping arithmetic and
    /// stay correct across one wrap between reports.
    ///
    /// # Example
    ///
    /// ```
    /// use irqstorm::core::consumer::TelemetrySnapshot;
    ///
    /// let before = TelemetrySnapshot { timer_fires: u32::MAX - 1, ..Default::default() };
    /// let after = TelemetrySnapshot { timer_fires: 3, ..Default::default() };
    /// assert_eq!(after.delta_since(&before).timer_fires, 5);
    /// ```
    pub fn delta_since(&self, baseline: &TelemetrySnapshot) -> TelemetryDelta {
        TelemetryDelta {
            pulses: self.pulses.wrapping_sub(baseline.pulses),
            timer_fires: self.timer_fires.wrapping_sub(baseline.timer_fires) as u64,
            config_writes: self.config_writes.wrapping_sub(baseline.config_writes) as u64,
            enable_toggles: self.enable_toggles.wrapping_sub(baseline.enable_toggles) as u64,
        }
    }

    pub fn control(&self) -> Control {
        Control::from_bits_truncate(self.control)
    }
}

/// Counter growth between two snapshots
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TelemetryDelta {
    pub pulses: u64,
    pub timer_fires: u64,
    pub config_writes: u64,
    pub enable_toggles: u64,
}

/// One telemetry record emitted by the service loop
#[derive(Debug, Clone, Serialize)]
pub struct TelemetryReport {
    /// Report sequence number, starting at 1
    pub seq: u64,

    /// Wall-clock time the report was taken
    pub at: DateTime<Utc>,

    /// Interrupts serviced so far
    pub handled: u64,

    /// Controller acknowledgments that failed so far
    pub ack_failures: u64,

    /// Torn PULSES samples discarded while taking this snapshot
    pub pulse_retries: u32,

    pub snapshot: TelemetrySnapshot,
    pub delta: TelemetryDelta,
}
