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

//! Interrupt Service Loop
//!
//! The consumer side of the storm device contract.
//!
//! ```text
//!            wake(badge)                   every report_interval services
//! ┌─────────┐ ─────────▶ ┌───────────┐ ─────────────────────────▶ ┌───────────┐
//! │ Waiting │            │ Servicing │                            │ Reporting │
//! └─────────┘ ◀───────── └───────────┘ ◀───────────────────────── └───────────┘
//!      │ shutdown
//!      ▼
//!    return
//! ```
//!
//! ## Servicing Order
//!
//! 1. Read STATUS
//! 2. If LEVEL and ASSERT are both set, write ACK on the device
//! 3. Acknowledge at the interrupt controller
//!
//! Step 2 must precede step 3. The controller redelivers a line that is
//! still high when it is acknowledged, so acknowledging the controller
//! first would immediately wake the loop again for the same assertion.
//!
//! A failed controller acknowledge is logged and counted; the loop keeps
//! going. The line may then stay masked until a later acknowledge succeeds.
//!
//! ## Reporting
//!
//! Reports are read-only against the device: a stable read of PULSES, single
//! reads of the 32-bit counters and configuration registers, then deltas
//! against the previous report's snapshot.

mod report;

pub use report::{TelemetryDelta, TelemetryReport, TelemetrySnapshot};

use crate::core::config::ConsumerConfig;
use crate::core::counter::stable_read;
use crate::core::error::Result;
use crate::core::interrupt::{Badge, IrqAck, Notification, Wake};
use crate::core::memory::PortAccess;
use crate::core::storm::registers::{self, Control, Status};
use chrono::Utc;
use std::sync::Arc;

/// Service loop phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Waiting,
    Servicing,
    Reporting,
}

/// State owned by the service loop
#[derive(Debug, Clone, Default)]
pub struct ConsumerState {
    /// Interrupts serviced
    pub handled: u64,

    /// STATUS read while servicing the last interrupt
    pub last_status: u8,

    /// Badge of the last wake
    pub last_badge: Badge,

    /// Reports emitted
    pub reports: u64,

    /// Controller acknowledgments that failed
    pub ack_failures: u64,

    /// Snapshot taken at the previous report (or at bring-up)
    pub baseline: TelemetrySnapshot,
}

/// Interrupt service loop for one storm device
///
/// Generic over the register access and acknowledge seams so it can run
/// against the in-process bus or a test double.
pub struct Consumer<P, A> {
    io: P,
    irq: A,
    notification: Arc<Notification>,
    base: u16,
    config: ConsumerConfig,
    phase: Phase,
    state: ConsumerState,
}

impl<P: PortAccess, A: IrqAck> Consumer<P, A> {
    /// Create a service loop over already-bound capabilities
    ///
    /// `base` is the first port of the device's register file.
    pub fn new(
        io: P,
        irq: A,
        notification: Arc<Notification>,
        base: u16,
        config: ConsumerConfig,
    ) -> Self {
        Self {
            io,
            irq,
            notification,
            base,
            config,
            phase: Phase::Waiting,
            state: ConsumerState::default(),
        }
    }

    /// Counters and baseline accumulated so far
    pub fn state(&self) -> &ConsumerState {
        &self.state
    }

    /// Current loop phase
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Notification this loop blocks on
    pub fn notification(&self) -> Arc<Notification> {
        self.notification.clone()
    }

    fn in8(&self, offset: u16) -> Result<u8> {
        self.io.in8(self.base + offset)
    }

    fn in32(&self, offset: u16) -> Result<u32> {
        self.io.in32(self.base + offset)
    }

    fn out8(&self, offset: u16, value: u8) -> Result<()> {
        self.io.out8(self.base + offset, value)
    }

    fn out32(&self, offset: u16, value: u32) -> Result<()> {
        self.io.out32(self.base + offset, value)
    }

    /// Enable the device and take the initial baseline
    ///
    /// Keeps the device's current LEVEL bit unless the configuration forces
    /// one.
    pub fn bring_up(&mut self) -> Result<()> {
        let irq_line = self.in8(registers::IRQ)?;
        log::info!("Storm device reports IRQ line: {}", irq_line);

        let current = Control::from_bits_truncate(self.in8(registers::CTRL)?);
        let level = self
            .config
            .level
            .unwrap_or(current.contains(Control::LEVEL));
        let mut control = Control::ENABLE;
        control.set(Control::LEVEL, level);
        self.out8(registers::CTRL, control.bits())?;

        log::info!(
            "Initial burst={} status=0x{:02X} period-us={}",
            self.in8(registers::BURST)?,
            self.in8(registers::STATUS)?,
            self.in32(registers::PERIOD_US)?
        );

        self.state.baseline = self.snapshot()?.0;
        Ok(())
    }

    /// Read all telemetry registers
    ///
    /// Returns the snapshot and the number of torn PULSES samples discarded.
    pub fn snapshot(&self) -> Result<(TelemetrySnapshot, u32)> {
        let pulses = stable_read(
            || self.in32(registers::PULSES_HI),
            || self.in32(registers::PULSES_LO),
        )?;

        let snapshot = TelemetrySnapshot {
            pulses: pulses.value,
            timer_fires: self.in32(registers::TIMER_CB)?,
            config_writes: self.in32(registers::CFG_WRITES)?,
            enable_toggles: self.in32(registers::EN_TOGGLES)?,
            control: self.in8(registers::CTRL)?,
            burst: self.in32(registers::BURST)?,
            period_us: self.in32(registers::PERIOD_US)?,
        };
        Ok((snapshot, pulses.retries))
    }

    /// Service one wake
    ///
    /// Returns a report when this service completes a reporting interval.
    pub fn service(&mut self, badge: Badge) -> Result<Option<TelemetryReport>> {
        self.phase = Phase::Servicing;
        self.state.last_badge = badge;

        let status = Status::from_bits_truncate(self.in8(registers::STATUS)?);
        self.state.last_status = status.bits();

        if status.contains(Status::LEVEL | Status::ASSERT) {
            self.out32(registers::ACK, 1)?;
        }

        if let Err(e) = self.irq.ack() {
            self.state.ack_failures += 1;
            log::warn!("IRQHandler ack error: {}", e);
        }

        self.state.handled += 1;
        log::trace!(
            "IRQ storm: handled={} status=0x{:02X} badge=0x{:X}",
            self.state.handled,
            status.bits(),
            badge
        );

        let interval = self.config.report_interval.max(1);
        let report = if self.state.handled % interval == 0 {
            Some(self.report()?)
        } else {
            None
        };

        self.phase = Phase::Waiting;
        Ok(report)
    }

    /// Take a snapshot, emit deltas against the baseline, rebase
    pub fn report(&mut self) -> Result<TelemetryReport> {
        self.phase = Phase::Reporting;

        let (snapshot, retries) = self.snapshot()?;
        let delta = snapshot.delta_since(&self.state.baseline);
        self.state.baseline = snapshot;
        self.state.reports += 1;

        let report = TelemetryReport {
            seq: self.state.reports,
            at: Utc::now(),
            handled: self.state.handled,
            ack_failures: self.state.ack_failures,
            pulse_retries: retries,
            snapshot,
            delta,
        };

        log::info!(
            "Report #{}: handled={} pulses={} (+{}) fires=+{} cfg=+{} toggles=+{} ctrl=0x{:02X} burst={} period-us={}",
            report.seq,
            report.handled,
            snapshot.pulses,
            delta.pulses,
            delta.timer_fires,
            delta.config_writes,
            delta.enable_toggles,
            snapshot.control,
            snapshot.burst,
            snapshot.period_us
        );

        Ok(report)
    }

    /// Run until the notification is cancelled
    ///
    /// Every report is handed to `sink`. Bus errors end the loop; failed
    /// controller acknowledges do not.
    pub fn run<F>(mut self, mut sink: F) -> Result<ConsumerState>
    where
        F: FnMut(&TelemetryReport),
    {
        log::info!("Consumer: entering service loop");
        loop {
            self.phase = Phase::Waiting;
            match self.notification.wait() {
                Wake::Signal(badge) => {
                    if let Some(report) = self.service(badge)? {
                        sink(&report);
                    }
                }
                Wake::Shutdown => {
                    log::info!(
                        "Consumer: shutdown after {} interrupts, {} reports",
                        self.state.handled,
                        self.state.reports
                    );
                    return Ok(self.state);
                }
            }
        }
    }
}
