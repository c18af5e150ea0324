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

//! Interrupt Storm Generator
//!
//! An ISA-style port device that raises interrupts from a periodic timer.
//! Two modes are supported:
//!
//! - **Edge** (LEVEL clear): every fire emits `BURST` back-to-back edge
//!   pulses, clamped to `1..=MAX_BURST`.
//! - **Level** (LEVEL set): a fire raises the line and holds it until the
//!   driver writes a non-zero value to ACK. Fires while the line is still
//!   held are counted but change nothing on the line.
//!
//! ## Scheduling
//!
//! The fire schedule is kept on an absolute grid by [`PeriodicTimer`]. Late
//! fires keep the grid's phase; fires more than one period late skip the
//! missed slots in one step rather than replaying them, so the cost of a
//! fire is independent of how long the device was starved.
//!
//! ## Counters
//!
//! `pulses_emitted`, `timer_fires`, `config_writes` and `enable_toggles`
//! never decrease and are never reset after construction. Only
//! `pulses_emitted` is exposed in full, through the PULSES_LO/HI pair.
//!
//! ## Configuration Writes
//!
//! Writes that do not change a value are not counted in `config_writes`.
//! CTRL is masked to its two defined bits before comparison.

pub mod registers;


use crate::core::config::DeviceConfig;
use crate::core::counter::SplitCounter;
use crate::core::error::{Result, StormError};
use crate::core::interrupt::InterruptLine;
use crate::core::memory::{AccessWidth, IODevice};
use crate::core::timing::{Clock, PeriodicTimer, NS_PER_US};
use registers::{Control, Register, Status};
use std::sync::Arc;

/// Upper bound on pulses emitted by a single fire, whatever BURST says
pub const MAX_BURST: u32 = 100_000;

/// What one fire did to the line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FireKind {
    /// Level mode: the line was raised
    Raised,

    /// Level mode: the line was already held, nothing emitted
    Held,

    /// Edge mode: this many pulses were emitted
    Burst(u32),
}

/// Result of one timer fire
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fire {
    pub kind: FireKind,

    /// Whole periods skipped when rescheduling
    pub skipped: u64,
}

/// Snapshot of the device's lifetime counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeviceCounters {
    pub pulses_emitted: u64,
    pub timer_fires: u64,
    pub config_writes: u64,
    pub enable_toggles: u64,
}

/// The interrupt storm device
pub struct IrqStorm {
    /// IO window start
    iobase: u16,

    /// IO window size; up to the whole port space
    iosize: u32,

    /// Output line
    line: Box<dyn InterruptLine>,

    /// Time source for scheduling
    clock: Arc<dyn Clock>,

    /// Fire schedule
    timer: PeriodicTimer,

    /// CTRL register
    control: Control,

    /// Line held high by this device (level mode only)
    asserted: bool,

    /// BURST register
    burst: u32,

    /// PERIOD_US register
    period_us: u32,

    pulses_emitted: SplitCounter,
    timer_fires: u64,
    config_writes: u64,
    enable_toggles: u64,
}

impl IrqStorm {
    /// Build and realize a device
    ///
    /// The configuration is validated before anything else happens; on error
    /// nothing has been scheduled or driven on the line.
    ///
    /// # Errors
    ///
    /// - [`StormError::InvalidIrqLine`] / [`StormError::IoWindowTooSmall`] /
    ///   [`StormError::IoWindowOverflow`] from [`DeviceConfig::validate`]
    /// - [`StormError::Config`] if `line` is not the configured line
    pub fn new(
        config: &DeviceConfig,
        line: Box<dyn InterruptLine>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        config.validate()?;
        if line.line() as u32 != config.irq {
            return Err(StormError::Config(format!(
                "device configured for irq {} but wired to irq {}",
                config.irq,
                line.line()
            )));
        }

        let mut control = Control::empty();
        control.set(Control::LEVEL, config.level_triggered);
        control.set(Control::ENABLE, config.start_enabled);

        let mut device = Self {
            iobase: config.iobase as u16,
            iosize: config.iosize,
            line,
            clock,
            timer: PeriodicTimer::new(),
            control,
            asserted: false,
            burst: config.burst,
            period_us: config.period_us,
            pulses_emitted: SplitCounter::new(),
            timer_fires: 0,
            config_writes: 0,
            enable_toggles: 0,
        };

        if device.control.contains(Control::ENABLE) {
            device.schedule_from_now();
        }

        log::info!(
            "IrqStorm: realized at 0x{:04X} irq={} burst={} period={}us ctrl={:?}",
            device.iobase,
            device.line.line(),
            device.burst,
            device.period_us,
            device.control
        );

        Ok(device)
    }

    /// Effective period in nanoseconds; a zero period behaves as 1us
    fn period_ns(&self) -> u64 {
        self.period_us.max(1) as u64 * NS_PER_US
    }

    fn deassert(&mut self) {
        if self.asserted {
            self.line.lower();
            self.asserted = false;
            log::trace!("IrqStorm: line {} deasserted", self.line.line());
        }
    }

    fn schedule_from_now(&mut self) {
        if !self.control.contains(Control::ENABLE) {
            return;
        }
        let now = self.clock.now_ns();
        let deadline = self.timer.arm_from(now, self.period_ns());
        log::trace!("IrqStorm: armed, deadline={}ns", deadline);
    }

    /// Timer callback
    ///
    /// Returns `None` if the device is disabled.
    pub fn fire(&mut self) -> Option<Fire> {
        if !self.control.contains(Control::ENABLE) {
            return None;
        }

        self.timer_fires += 1;

        // State is committed before the line changes, and the caller holds
        // the device lock across the whole fire, so a woken consumer always
        // reads a STATUS that includes this fire.
        let kind = if self.control.contains(Control::LEVEL) {
            if self.asserted {
                FireKind::Held
            } else {
                self.asserted = true;
                self.pulses_emitted.increment();
                self.line.raise();
                FireKind::Raised
            }
        } else {
            let pulses = self.burst.clamp(1, MAX_BURST);
            self.pulses_emitted.add(pulses as u64);
            for _ in 0..pulses {
                self.line.pulse();
            }
            FireKind::Burst(pulses)
        };

        let skipped = self.timer.reschedule(self.clock.now_ns(), self.period_ns());
        if skipped > 0 {
            log::debug!("IrqStorm: fire late, skipped {} periods", skipped);
        }
        log::trace!(
            "IrqStorm: fire #{} {:?}, next deadline {:?}",
            self.timer_fires,
            kind,
            self.timer.deadline()
        );

        Some(Fire { kind, skipped })
    }

    /// Fire once if the deadline has passed
    pub fn poll_timer(&mut self) -> Option<Fire> {
        if self.timer.is_due(self.clock.now_ns()) {
            self.fire()
        } else {
            None
        }
    }

    /// Next scheduled fire, if enabled
    pub fn next_deadline(&self) -> Option<u64> {
        self.timer.deadline()
    }

    /// CTRL as last written, masked to its defined bits
    pub fn control(&self) -> Control {
        self.control
    }

    /// Whether this device is holding the line high
    pub fn is_asserted(&self) -> bool {
        self.asserted
    }

    /// BURST as written, before clamping
    pub fn burst(&self) -> u32 {
        self.burst
    }

    /// PERIOD_US as written; zero schedules as 1us
    pub fn period_us(&self) -> u32 {
        self.period_us
    }

    /// Interrupt line the device drives
    pub fn irq(&self) -> u8 {
        self.line.line()
    }

    /// STATUS, derived from current state
    pub fn status(&self) -> Status {
        let mut status = Status::empty();
        status.set(Status::ENABLED, self.control.contains(Control::ENABLE));
        status.set(Status::ASSERT, self.asserted);
        status.set(Status::LEVEL, self.control.contains(Control::LEVEL));
        status
    }

    /// Full-width lifetime counters
    pub fn counters(&self) -> DeviceCounters {
        DeviceCounters {
            pulses_emitted: self.pulses_emitted.get(),
            timer_fires: self.timer_fires,
            config_writes: self.config_writes,
            enable_toggles: self.enable_toggles,
        }
    }

    /// Register read by offset
    pub fn read_register(&self, offset: u16) -> u32 {
        let Some(reg) = Register::decode(offset).filter(|r| r.is_readable()) else {
            return 0;
        };
        match reg {
            Register::Ctrl => self.control.bits() as u32,
            Register::Irq => self.line.line() as u32,
            Register::Burst => self.burst,
            Register::Status => self.status().bits() as u32,
            Register::PeriodUs => self.period_us,
            Register::PulsesLo => self.pulses_emitted.lo(),
            Register::PulsesHi => self.pulses_emitted.hi(),
            Register::TimerCb => self.timer_fires as u32,
            Register::CfgWrites => self.config_writes as u32,
            Register::EnToggles => self.enable_toggles as u32,
            // write-only
            Register::Ack => 0,
        }
    }

    /// Register write by offset
    pub fn write_register(&mut self, offset: u16, value: u32) {
        let Some(reg) = Register::decode(offset) else {
            log::trace!("IrqStorm: write to undefined offset 0x{:02X} ignored", offset);
            return;
        };
        if !reg.is_writable() {
            log::trace!(
                "IrqStorm: write to read-only {} (0x{:02X}) ignored",
                reg.name(),
                reg.offset()
            );
            return;
        }

        match reg {
            Register::Ctrl => self.write_control(value),
            Register::Burst => {
                if value != self.burst {
                    self.burst = value;
                    self.config_writes += 1;
                    log::debug!("IrqStorm: BURST = {}", value);
                }
            }
            Register::PeriodUs => {
                if value != self.period_us {
                    self.period_us = value;
                    self.config_writes += 1;
                    log::debug!("IrqStorm: PERIOD_US = {}", value);
                    // New period counts from now, not from the old grid
                    self.schedule_from_now();
                }
            }
            Register::Ack => {
                if value != 0 {
                    self.deassert();
                }
            }
            Register::Irq
            | Register::Status
            | Register::PulsesLo
            | Register::PulsesHi
            | Register::TimerCb
            | Register::CfgWrites
            | Register::EnToggles => {}
        }
    }

    fn write_control(&mut self, value: u32) {
        let old = self.control;
        let new = Control::from_bits_truncate(value as u8);

        if new != old {
            self.config_writes += 1;
            self.control = new;
            log::debug!("IrqStorm: CTRL {:?} -> {:?}", old, new);
        }

        if old.contains(Control::LEVEL) && !new.contains(Control::LEVEL) {
            self.deassert();
        }

        let was_enabled = old.contains(Control::ENABLE);
        let is_enabled = new.contains(Control::ENABLE);
        if was_enabled != is_enabled {
            self.enable_toggles += 1;
        }

        if is_enabled {
            if !was_enabled {
                self.schedule_from_now();
            }
        } else {
            self.timer.cancel();
            self.deassert();
        }
    }
}

impl IODevice for IrqStorm {
    fn port_range(&self) -> (u16, u16) {
        // validate() bounds base + size by the port space, so the last port fits
        let last = self.iobase as u32 + self.iosize - 1;
        (self.iobase, last as u16)
    }

    fn read(&self, offset: u16, width: AccessWidth) -> u32 {
        width.truncate(self.read_register(offset))
    }

    fn write(&mut self, offset: u16, width: AccessWidth, value: u32) {
        self.write_register(offset, width.truncate(value));
    }

    fn name(&self) -> &str {
        "isa-irq-storm"
    }
}
