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

//! Capability provisioning
//!
//! Before its service loop starts, the consumer needs three capabilities:
//! a notification to block on, an IRQ handler bound to that notification,
//! and an I/O port range covering the device's register file. Each one
//! occupies a slot from a fixed window reserved up front. Running out of
//! slots is unrecoverable for the consumer process.

use crate::core::config::DeviceConfig;
use crate::core::error::{Result, StormError};
use crate::core::interrupt::{Badge, InterruptController, IrqAck, IrqHandler, Notification};
use crate::core::memory::{IoBus, PortIo};
use std::sync::Arc;

/// Capability slot index
pub type Slot = u32;

/// Contiguous range of free slots handed out in order
#[derive(Debug, Clone)]
pub struct SlotWindow {
    cur: Slot,
    end: Slot,
}

impl SlotWindow {
    /// Reserve `count` slots ending at `end`
    ///
    /// # Errors
    ///
    /// [`StormError::ResourceExhausted`] if `count` is zero or larger than
    /// the free range `[first_free, end)`.
    pub fn reserve_from_end(first_free: Slot, end: Slot, count: u32) -> Result<Self> {
        if count == 0 {
            return Err(StormError::ResourceExhausted(
                "requested an empty slot window".to_string(),
            ));
        }
        let available = end.saturating_sub(first_free);
        if count > available {
            return Err(StormError::ResourceExhausted(format!(
                "need {} slots, only {} free",
                count, available
            )));
        }
        Ok(Self {
            cur: end - count,
            end,
        })
    }

    /// Take the next slot
    pub fn alloc(&mut self) -> Result<Slot> {
        if self.cur >= self.end {
            return Err(StormError::ResourceExhausted("slot window exhausted".to_string()));
        }
        let slot = self.cur;
        self.cur += 1;
        Ok(slot)
    }

    pub fn remaining(&self) -> u32 {
        self.end - self.cur
    }
}

/// Capabilities the consumer's service loop runs on
pub struct ConsumerCaps {
    pub io: PortIo,
    pub irq: IrqHandler,
    pub notification: Arc<Notification>,
}

/// Issues capabilities out of a slot window
pub struct Provisioner {
    window: SlotWindow,
    bus: Arc<IoBus>,
    controller: Arc<InterruptController>,
}

impl Provisioner {
    pub fn new(window: SlotWindow, bus: Arc<IoBus>, controller: Arc<InterruptController>) -> Self {
        Self {
            window,
            bus,
            controller,
        }
    }

    pub fn remaining(&self) -> u32 {
        self.window.remaining()
    }

    /// Create a notification object
    pub fn notification(&mut self) -> Result<Arc<Notification>> {
        let slot = self.window.alloc()?;
        log::debug!("Provision: notification in slot {}", slot);
        Ok(Arc::new(Notification::new()))
    }

    /// Claim the handler for an interrupt line
    pub fn irq_handler(&mut self, line: u8) -> Result<IrqHandler> {
        let slot = self.window.alloc()?;
        let handler = IrqHandler::issue(self.controller.clone(), line)?;
        log::debug!("Provision: irq {} handler in slot {}", line, slot);
        Ok(handler)
    }

    /// Grant access to `size` ports from `base`
    pub fn io_port(&mut self, base: u16, size: u32) -> Result<PortIo> {
        let slot = self.window.alloc()?;
        let io = PortIo::new(self.bus.clone(), base, size)?;
        log::debug!(
            "Provision: ioport 0x{:04X}..0x{:04X} in slot {}",
            base,
            base as u32 + size,
            slot
        );
        Ok(io)
    }

    /// Issue and wire everything a consumer of `device` needs
    ///
    /// The handler is bound to the notification with badge `1 << irq` and
    /// acknowledged once so the line is open when this returns.
    pub fn consumer_caps(&mut self, device: &DeviceConfig) -> Result<ConsumerCaps> {
        device.validate()?;
        let line = device.irq as u8;

        let notification = self.notification()?;
        let irq = self.irq_handler(line)?;
        let io = self.io_port(device.iobase as u16, device.iosize)?;

        let badge: Badge = 1 << line;
        irq.set_notification(notification.clone(), badge)?;
        irq.ack()?;

        log::info!("Provision: bound IRQ {} to notification", line);
        Ok(ConsumerCaps {
            io,
            irq,
            notification,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provisioner(slots: u32) -> Provisioner {
        Provisioner::new(
            SlotWindow::reserve_from_end(16, 64, slots).unwrap(),
            Arc::new(IoBus::new()),
            Arc::new(InterruptController::new()),
        )
    }

    #[test]
    fn test_window_reserved_from_end() {
        let mut window = SlotWindow::reserve_from_end(16, 64, 4).unwrap();
        assert_eq!(window.remaining(), 4);
        assert_eq!(window.alloc().unwrap(), 60);
        assert_eq!(window.alloc().unwrap(), 61);
        assert_eq!(window.remaining(), 2);
    }

    #[test]
    fn test_window_too_large() {
        assert!(matches!(
            SlotWindow::reserve_from_end(60, 64, 5),
            Err(StormError::ResourceExhausted(_))
        ));
        assert!(SlotWindow::reserve_from_end(60, 64, 0).is_err());
    }

    #[test]
    fn test_window_exhaustion() {
        let mut window = SlotWindow::reserve_from_end(0, 2, 2).unwrap();
        window.alloc().unwrap();
        window.alloc().unwrap();
        assert!(matches!(
            window.alloc(),
            Err(StormError::ResourceExhausted(_))
        ));
    }

    #[test]
    fn test_consumer_caps_uses_three_slots() {
        let mut p = provisioner(4);
        let caps = p.consumer_caps(&DeviceConfig::default()).unwrap();
        assert_eq!(p.remaining(), 1);
        assert_eq!(caps.irq.line(), 5);
        assert_eq!(caps.io.base(), 0x560);
    }

    #[test]
    fn test_consumer_caps_exhausted() {
        let mut p = provisioner(2);
        assert!(matches!(
            p.consumer_caps(&DeviceConfig::default()),
            Err(StormError::ResourceExhausted(_))
        ));
    }

    #[test]
    fn test_second_handler_for_line_rejected() {
        let mut p = provisioner(8);
        p.consumer_caps(&DeviceConfig::default()).unwrap();
        assert!(matches!(
            p.consumer_caps(&DeviceConfig::default()),
            Err(StormError::IrqInUse { line: 5 })
        ));
    }
}
