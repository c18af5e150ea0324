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

//! System integration module
//!
//! Wires one storm device to the port bus and the interrupt controller, and
//! drives its timer on either host time or a virtual clock.
//!
//! # Example
//!
//! ```no_run
//! use irqstorm::core::config::StormConfig;
//! use irqstorm::core::system::System;
//!
//! let system = System::new(&StormConfig::default())?;
//! let mut provisioner = system.provisioner(32)?;
//! let consumer = system.consumer(&mut provisioner)?;
//! let summary = system.run(consumer, 1_000_000, |report| println!("{:?}", report))?;
//! println!("handled {}", summary.consumer.handled);
//! # Ok::<(), irqstorm::core::error::StormError>(())
//! ```

use super::config::StormConfig;
use super::consumer::{Consumer, ConsumerState, TelemetryReport};
use super::error::{Result, StormError};
use super::exclusive;
use super::interrupt::{InterruptController, IrqHandler, IrqLine, ShutdownToken};
use super::memory::{IoBus, PortIo, SharedDevice};
use super::provision::{Provisioner, Slot, SlotWindow};
use super::storm::{DeviceCounters, Fire, IrqStorm};
use super::timing::{Clock, HostClock, VirtualClock, NS_PER_US};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

/// First slot not used by the bootstrap capabilities
pub const FIRST_FREE_SLOT: Slot = 16;

/// One past the last slot of the capability space
pub const SLOT_SPACE_END: Slot = 4096;

/// Longest the host driver sleeps before re-checking for shutdown
const MAX_HOST_SLEEP_NS: u64 = 1_000 * NS_PER_US;

/// Time source driving the device timer
#[derive(Clone)]
pub enum Timebase {
    /// Wall time; the driver sleeps until each deadline
    Host(Arc<HostClock>),

    /// Simulated time; the driver jumps straight to each deadline
    Virtual(Arc<VirtualClock>),
}

impl Timebase {
    fn clock(&self) -> Arc<dyn Clock> {
        match self {
            Timebase::Host(clock) => clock.clone(),
            Timebase::Virtual(clock) => clock.clone(),
        }
    }
}

/// Outcome of [`System::run`]
#[derive(Debug, Clone)]
pub struct RunSummary {
    /// Final consumer state
    pub consumer: ConsumerState,

    /// Device counters after the consumer stopped
    pub counters: DeviceCounters,

    /// Signals the controller delivered on the device's line
    pub deliveries: u64,

    /// Fires performed by the driver during the run
    pub fires: u64,
}

/// Storm device attached to a bus and an interrupt controller
pub struct System {
    config: StormConfig,
    timebase: Timebase,
    controller: Arc<InterruptController>,
    device: Arc<Mutex<IrqStorm>>,
    bus: Arc<IoBus>,
}

impl System {
    /// Build a system using the timebase selected by `config.run.virtual_time`
    pub fn new(config: &StormConfig) -> Result<Self> {
        let timebase = if config.run.virtual_time {
            Timebase::Virtual(Arc::new(VirtualClock::new()))
        } else {
            Timebase::Host(Arc::new(HostClock::new()))
        };
        Self::with_timebase(config, timebase)
    }

    /// Build a system on an explicit timebase
    ///
    /// Fails without attaching anything if the device configuration is
    /// rejected.
    pub fn with_timebase(config: &StormConfig, timebase: Timebase) -> Result<Self> {
        config.device.validate()?;

        let controller = Arc::new(InterruptController::new());
        let line = IrqLine::new(controller.clone(), config.device.irq as u8);
        let device = Arc::new(Mutex::new(IrqStorm::new(
            &config.device,
            Box::new(line),
            timebase.clock(),
        )?));

        let mut bus = IoBus::new();
        let shared: SharedDevice = device.clone();
        bus.map(shared)?;

        Ok(Self {
            config: config.clone(),
            timebase,
            controller,
            device,
            bus: Arc::new(bus),
        })
    }

    /// Configuration the system was built from
    pub fn config(&self) -> &StormConfig {
        &self.config
    }

    /// Port bus the device is mapped on
    pub fn bus(&self) -> Arc<IoBus> {
        self.bus.clone()
    }

    /// Interrupt controller the device's line is wired to
    pub fn controller(&self) -> Arc<InterruptController> {
        self.controller.clone()
    }

    /// The device behind its register-file lock
    pub fn device(&self) -> Arc<Mutex<IrqStorm>> {
        self.device.clone()
    }

    /// Reserve `slots` capability slots for a consumer
    pub fn provisioner(&self, slots: u32) -> Result<Provisioner> {
        let window = SlotWindow::reserve_from_end(FIRST_FREE_SLOT, SLOT_SPACE_END, slots)?;
        Ok(Provisioner::new(
            window,
            self.bus.clone(),
            self.controller.clone(),
        ))
    }

    /// Provision a consumer for the device and bring it up
    pub fn consumer(&self, provisioner: &mut Provisioner) -> Result<Consumer<PortIo, IrqHandler>> {
        let caps = provisioner.consumer_caps(&self.config.device)?;
        let mut consumer = Consumer::new(
            caps.io,
            caps.irq,
            caps.notification,
            self.config.device.iobase as u16,
            self.config.consumer.clone(),
        );
        consumer.bring_up()?;
        Ok(consumer)
    }

    /// Device counters, read under the device lock
    pub fn counters(&self) -> DeviceCounters {
        exclusive(&self.device).counters()
    }

    /// Fire once if the device deadline has passed
    pub fn step(&self) -> Option<Fire> {
        exclusive(&self.device).poll_timer()
    }

    /// Perform every fire due up to `until_ns`, advancing `clock` to each
    /// deadline in turn
    ///
    /// The device lock is held across the deadline check and the fire, and
    /// released between fires so the consumer can make progress. Returns the
    /// number of fires.
    pub fn run_virtual_until(
        &self,
        clock: &VirtualClock,
        until_ns: u64,
        token: &ShutdownToken,
    ) -> u64 {
        let mut fires = 0;
        while !token.is_cancelled() {
            let mut device = exclusive(&self.device);
            match device.next_deadline() {
                Some(deadline) if deadline <= until_ns => {
                    clock.set_ns(deadline);
                    if device.fire().is_some() {
                        fires += 1;
                    }
                }
                _ => {
                    clock.set_ns(until_ns);
                    break;
                }
            }
            drop(device);
            thread::yield_now();
        }
        fires
    }

    /// Drive the timer on wall time for `duration_ns`
    pub fn run_host_for(&self, clock: &HostClock, duration_ns: u64, token: &ShutdownToken) -> u64 {
        let end = clock.now_ns().saturating_add(duration_ns);
        let mut fires = 0;

        while !token.is_cancelled() {
            let now = clock.now_ns();
            if now >= end {
                break;
            }

            let wait = {
                let mut device = exclusive(&self.device);
                match device.next_deadline() {
                    Some(deadline) if deadline <= now => {
                        if device.fire().is_some() {
                            fires += 1;
                        }
                        continue;
                    }
                    Some(deadline) => (deadline - now).min(end - now),
                    None => end - now,
                }
            };
            thread::sleep(Duration::from_nanos(wait.min(MAX_HOST_SLEEP_NS)));
        }
        fires
    }

    /// Drive the timer for `duration_ns` on this system's timebase
    pub fn drive(&self, duration_ns: u64, token: &ShutdownToken) -> u64 {
        match &self.timebase {
            Timebase::Host(clock) => self.run_host_for(clock, duration_ns, token),
            Timebase::Virtual(clock) => {
                let until = clock.now_ns().saturating_add(duration_ns);
                self.run_virtual_until(clock, until, token)
            }
        }
    }

    /// Run `consumer` on its own thread while this thread drives the device
    ///
    /// After `duration_ns` the consumer's wait is cancelled and its final
    /// state collected. Reports go to `sink` on the consumer thread.
    pub fn run<F>(
        &self,
        consumer: Consumer<PortIo, IrqHandler>,
        duration_ns: u64,
        sink: F,
    ) -> Result<RunSummary>
    where
        F: FnMut(&TelemetryReport) + Send,
    {
        let token = ShutdownToken::new();
        token.watch(consumer.notification());

        log::info!("System: running for {}us", duration_ns / NS_PER_US);

        let (fires, state) = thread::scope(|scope| {
            let worker = thread::Builder::new()
                .name("irq-consumer".to_string())
                .spawn_scoped(scope, move || consumer.run(sink))?;

            let fires = self.drive(duration_ns, &token);
            token.cancel();

            let state = match worker.join() {
                Ok(state) => state?,
                Err(panic) => std::panic::resume_unwind(panic),
            };
            Ok::<_, StormError>((fires, state))
        })?;

        let summary = RunSummary {
            consumer: state,
            counters: self.counters(),
            deliveries: self.controller.deliveries(self.config.device.irq as u8),
            fires,
        };

        log::info!(
            "System: {} fires, {} pulses, {} deliveries, {} handled",
            summary.fires,
            summary.counters.pulses_emitted,
            summary.deliveries,
            summary.consumer.handled
        );

        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::memory::{AccessWidth, IODevice, PortAccess};
    use crate::core::storm::registers::{self, Control, Status};
    use crate::core::storm::FireKind;

    fn virtual_system(edit: impl FnOnce(&mut StormConfig)) -> (System, Arc<VirtualClock>) {
        let mut config = StormConfig::default();
        edit(&mut config);
        let clock = Arc::new(VirtualClock::new());
        let system = System::with_timebase(&config, Timebase::Virtual(clock.clone())).unwrap();
        (system, clock)
    }

    #[test]
    fn test_invalid_config_attaches_nothing() {
        let mut config = StormConfig::default();
        config.device.irq = 16;
        assert!(matches!(
            System::new(&config),
            Err(StormError::InvalidIrqLine { line: 16 })
        ));
    }

    #[test]
    fn test_registers_visible_on_bus() {
        let (system, _) = virtual_system(|_| {});
        let bus = system.bus();
        assert_eq!(bus.read(0x560 + registers::IRQ, AccessWidth::Byte).unwrap(), 5);
        assert_eq!(bus.read(0x560 + registers::BURST, AccessWidth::Dword).unwrap(), 128);
        assert!(matches!(
            bus.read(0x600, AccessWidth::Byte),
            Err(StormError::UnmappedPort { port: 0x600 })
        ));
    }

    #[test]
    fn test_virtual_drive_end_to_end() {
        let (system, clock) = virtual_system(|c| {
            c.device.burst = 1;
            c.device.period_us = 10;
            c.device.start_enabled = false;
        });
        let token = ShutdownToken::new();
        let bus = system.bus();

        bus.write(0x560 + registers::CTRL, AccessWidth::Byte, 1).unwrap();
        let fires = system.run_virtual_until(&clock, 1_000 * NS_PER_US, &token);
        assert_eq!(fires, 100);

        let counters = system.counters();
        assert_eq!(counters.timer_fires, 100);
        assert_eq!(counters.pulses_emitted, 100);

        bus.write(0x560 + registers::CTRL, AccessWidth::Byte, 0).unwrap();
        assert_eq!(system.run_virtual_until(&clock, 2_000 * NS_PER_US, &token), 0);
        assert_eq!(system.counters().timer_fires, 100);
        assert!(!system.controller().level(5));
    }

    #[test]
    fn test_step_only_fires_when_due() {
        let (system, clock) = virtual_system(|c| c.device.period_us = 100);
        assert!(system.step().is_none());
        clock.advance_us(100);
        assert!(system.step().is_some());
        assert!(system.step().is_none());
    }

    #[test]
    fn test_cancelled_token_stops_driver() {
        let (system, clock) = virtual_system(|_| {});
        let token = ShutdownToken::new();
        token.cancel();
        assert_eq!(system.run_virtual_until(&clock, 1_000_000, &token), 0);
    }

    #[test]
    fn test_provisioner_exhaustion() {
        let (system, _) = virtual_system(|_| {});
        let mut provisioner = system.provisioner(2).unwrap();
        assert!(matches!(
            system.consumer(&mut provisioner),
            Err(StormError::ResourceExhausted(_))
        ));
        assert!(system.provisioner(SLOT_SPACE_END).is_err());
    }

    #[test]
    fn test_consumer_bring_up_enables_device() {
        let (system, _) = virtual_system(|c| {
            c.device.start_enabled = false;
            c.consumer.level = Some(true);
        });
        let mut provisioner = system.provisioner(8).unwrap();
        let _consumer = system.consumer(&mut provisioner).unwrap();

        let status = exclusive(&system.device).status();
        assert_eq!(status, Status::ENABLED | Status::LEVEL);
    }

    #[test]
    fn test_run_edge_mode_threaded() {
        let (system, _) = virtual_system(|c| {
            c.device.burst = 4;
            c.device.period_us = 10;
            c.consumer.report_interval = 8;
        });
        let mut provisioner = system.provisioner(8).unwrap();
        let consumer = system.consumer(&mut provisioner).unwrap();

        let mut reports = Vec::new();
        let summary = system
            .run(consumer, 2_000 * NS_PER_US, |r| reports.push(r.clone()))
            .unwrap();

        assert_eq!(summary.fires, 200);
        assert_eq!(summary.counters.timer_fires, 200);
        assert_eq!(summary.counters.pulses_emitted, 800);
        assert!(summary.deliveries <= summary.counters.pulses_emitted);
        assert!(summary.consumer.handled <= summary.deliveries);
        assert_eq!(summary.consumer.ack_failures, 0);
        assert_eq!(reports.len() as u64, summary.consumer.reports);
        assert_eq!(summary.consumer.handled / 8, summary.consumer.reports);
        for pair in reports.windows(2) {
            assert!(pair[1].snapshot.pulses >= pair[0].snapshot.pulses);
        }
    }

    #[test]
    fn test_run_level_mode_threaded() {
        let (system, _) = virtual_system(|c| {
            c.device.period_us = 10;
            c.consumer.level = Some(true);
            c.consumer.report_interval = 1;
        });
        let mut provisioner = system.provisioner(8).unwrap();
        let consumer = system.consumer(&mut provisioner).unwrap();

        let summary = system.run(consumer, 1_000 * NS_PER_US, |_| {}).unwrap();

        // Every assertion is one pulse, and the line is only ever raised
        // again after the consumer acknowledged the previous one.
        assert_eq!(summary.counters.timer_fires, 100);
        assert!(summary.counters.pulses_emitted >= 1);
        assert!(summary.counters.pulses_emitted <= summary.consumer.handled + 1);
        assert!(summary.consumer.handled <= summary.deliveries);
        assert_eq!(summary.consumer.reports, summary.consumer.handled);
    }

    #[test]
    fn test_woken_consumer_sees_fire_in_status() {
        let (system, clock) = virtual_system(|c| {
            c.device.period_us = 10;
            c.device.start_enabled = false;
            c.consumer.level = Some(true);
        });
        let mut provisioner = system.provisioner(8).unwrap();
        let mut consumer = system.consumer(&mut provisioner).unwrap();
        let notification = consumer.notification();
        let bus = system.bus();
        let controller = system.controller();
        assert_eq!(notification.poll(), None);

        clock.advance_us(10);
        assert_eq!(system.step().map(|f| f.kind), Some(FireKind::Raised));

        // The wake and the committed STATUS come from the same fire
        let badge = notification.poll().unwrap();
        assert_eq!(badge, 1 << 5);
        let status = bus.read(0x560 + registers::STATUS, AccessWidth::Byte).unwrap();
        assert_eq!(
            status,
            (Status::ENABLED | Status::ASSERT | Status::LEVEL).bits() as u32
        );

        consumer.service(badge).unwrap();
        assert_eq!(consumer.state().last_status, status as u8);
        assert!(!exclusive(&system.device).is_asserted());
        assert!(!controller.level(5));
        // Line low at controller ack: nothing redelivered
        assert_eq!(notification.poll(), None);

        clock.advance_us(10);
        assert_eq!(system.step().map(|f| f.kind), Some(FireKind::Raised));
        assert_eq!(system.counters().pulses_emitted, 2);
        assert_eq!(notification.poll(), Some(1 << 5));
    }

    #[test]
    fn test_window_at_top_of_port_space() {
        let (system, _) = virtual_system(|c| c.device.iobase = 0xFFE0);
        let mut provisioner = system.provisioner(8).unwrap();
        let consumer = system.consumer(&mut provisioner).unwrap();

        let bus = system.bus();
        assert_eq!(bus.read(0xFFE0 + registers::IRQ, AccessWidth::Byte).unwrap(), 5);
        assert_eq!(
            bus.read(0xFFE0 + registers::CTRL, AccessWidth::Byte).unwrap(),
            Control::ENABLE.bits() as u32
        );
        assert_eq!(consumer.snapshot().unwrap().0.burst, 128);
    }

    #[test]
    fn test_window_covering_whole_port_space() {
        let (system, _) = virtual_system(|c| {
            c.device.iobase = 0;
            c.device.iosize = 0x1_0000;
        });
        let device = system.device();
        assert_eq!(exclusive(&device).port_range(), (0, 0xFFFF));

        let mut provisioner = system.provisioner(8).unwrap();
        let consumer = system.consumer(&mut provisioner).unwrap();
        assert_eq!(system.bus().read(registers::IRQ, AccessWidth::Byte).unwrap(), 5);
        // Beyond the register file but inside the window
        assert_eq!(system.bus().read(0xFFFF, AccessWidth::Byte).unwrap(), 0);
        assert_eq!(consumer.snapshot().unwrap().0.period_us, 100);
    }

    #[test]
    fn test_consumer_port_window() {
        let (system, _) = virtual_system(|_| {});
        let mut provisioner = system.provisioner(8).unwrap();
        let caps = provisioner.consumer_caps(&system.config().device).unwrap();
        assert_eq!(caps.io.in8(0x560 + registers::IRQ).unwrap(), 5);
        assert!(matches!(
            caps.io.in8(0x580),
            Err(StormError::PortOutOfRange { .. })
        ));
    }
}
