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

//! Port I/O bus
//!
//! The [`IoBus`] routes port accesses to mapped [`IODevice`]s. Each device
//! sits behind its own `Mutex`, and the bus takes that lock once per access.
//! That lock is the register file's exclusive-access guard: a single access
//! is atomic against every other access and against the device's own timer
//! handler, and nothing stronger is promised.
//!
//! Consumers do not talk to the bus directly. They hold a [`PortIo`]
//! capability covering a port window, the same way a driver is granted an
//! I/O port range by its kernel.
//!
//! ```text
//! ┌──────────┐   in8/in32/out8/out32    ┌────────┐   lock + read/write  ┌──────────┐
//! │ Consumer │ ───────────────────────▶ │ PortIo │ ───────────────────▶ │ IrqStorm │
//! └──────────┘   (range checked)        └────────┘   (one access)       └──────────┘
//! ```
//!
//! # Example
//!
//! ```
//! use irqstorm::core::memory::{AccessWidth, IoBus};
//!
//! let bus = IoBus::new();
//! // Unmapped ports are an error at bus level
//! assert!(bus.read(0x560, AccessWidth::Byte).is_err());
//! ```

use crate::core::error::{Result, StormError};
use crate::core::exclusive;
use std::sync::{Arc, Mutex};

mod io_device;

pub use io_device::{AccessWidth, IODevice};

/// A device shared between the bus and its owner
pub type SharedDevice = Arc<Mutex<dyn IODevice>>;

/// Port bus dispatching accesses to mapped devices
#[derive(Default)]
pub struct IoBus {
    devices: Vec<SharedDevice>,
}

impl IoBus {
    /// Create an empty bus
    pub fn new() -> Self {
        Self {
            devices: Vec::new(),
        }
    }

    /// Map a device
    ///
    /// # Errors
    ///
    /// Returns [`StormError::Config`] if the device's window overlaps a
    /// device that is already mapped.
    pub fn map(&mut self, device: SharedDevice) -> Result<()> {
        let (start, end, name) = {
            let dev = exclusive(&device);
            let (start, end) = dev.port_range();
            (start, end, dev.name().to_string())
        };

        for existing in &self.devices {
            let dev = exclusive(existing);
            let (s, e) = dev.port_range();
            if start <= e && s <= end {
                return Err(StormError::Config(format!(
                    "{} at 0x{:04X}..=0x{:04X} overlaps {}",
                    name,
                    start,
                    end,
                    dev.name()
                )));
            }
        }

        log::info!("Bus: mapped {} at 0x{:04X}..=0x{:04X}", name, start, end);
        self.devices.push(device);
        Ok(())
    }

    /// Number of mapped devices
    pub fn device_count(&self) -> usize {
        self.devices.len()
    }

    /// Read from a port
    pub fn read(&self, port: u16, width: AccessWidth) -> Result<u32> {
        for device in &self.devices {
            let dev = exclusive(device);
            if dev.contains(port) {
                let offset = port - dev.port_range().0;
                let value = width.truncate(dev.read(offset, width));
                log::trace!(
                    "{} read{} [0x{:02X}] = 0x{:08X}",
                    dev.name(),
                    width.bytes() * 8,
                    offset,
                    value
                );
                return Ok(value);
            }
        }
        Err(StormError::UnmappedPort { port })
    }

    /// Write to a port
    pub fn write(&self, port: u16, width: AccessWidth, value: u32) -> Result<()> {
        for device in &self.devices {
            let mut dev = exclusive(device);
            if dev.contains(port) {
                let offset = port - dev.port_range().0;
                let value = width.truncate(value);
                log::trace!(
                    "{} write{} [0x{:02X}] <- 0x{:08X}",
                    dev.name(),
                    width.bytes() * 8,
                    offset,
                    value
                );
                dev.write(offset, width, value);
                return Ok(());
            }
        }
        Err(StormError::UnmappedPort { port })
    }
}

/// Register access seam used by the consumer
///
/// Each call is exactly one bus access.
pub trait PortAccess {
    fn in8(&self, port: u16) -> Result<u8>;
    fn in32(&self, port: u16) -> Result<u32>;
    fn out8(&self, port: u16, value: u8) -> Result<()>;
    fn out32(&self, port: u16, value: u32) -> Result<()>;
}

/// Size of the 16-bit port space
pub const PORT_SPACE_SIZE: u32 = 0x1_0000;

/// I/O port capability over `[base, base + size)`
///
/// The end is kept as `u32` so a window may reach the last port, 0xFFFF.
#[derive(Clone)]
pub struct PortIo {
    bus: Arc<IoBus>,
    base: u16,
    end: u32,
}

impl PortIo {
    /// Grant access to `size` ports starting at `base`
    ///
    /// # Errors
    ///
    /// [`StormError::IoWindowOverflow`] if the window runs past port 0xFFFF.
    pub fn new(bus: Arc<IoBus>, base: u16, size: u32) -> Result<Self> {
        let end = base as u32 + size;
        if end > PORT_SPACE_SIZE {
            return Err(StormError::IoWindowOverflow {
                base: base as u32,
                size,
            });
        }
        Ok(Self { bus, base, end })
    }

    /// First port of the window
    pub fn base(&self) -> u16 {
        self.base
    }

    fn check(&self, port: u16, width: AccessWidth) -> Result<()> {
        let last = port as u32 + width.bytes() as u32;
        if port < self.base || last > self.end {
            return Err(StormError::PortOutOfRange {
                port,
                base: self.base,
                end: self.end,
            });
        }
        Ok(())
    }

    fn read(&self, port: u16, width: AccessWidth) -> Result<u32> {
        self.check(port, width)?;
        self.bus.read(port, width)
    }

    fn write(&self, port: u16, width: AccessWidth, value: u32) -> Result<()> {
        self.check(port, width)?;
        self.bus.write(port, width, value)
    }
}

impl PortAccess for PortIo {
    fn in8(&self, port: u16) -> Result<u8> {
        Ok(self.read(port, AccessWidth::Byte)? as u8)
    }

    fn in32(&self, port: u16) -> Result<u32> {
        self.read(port, AccessWidth::Dword)
    }

    fn out8(&self, port: u16, value: u8) -> Result<()> {
        self.write(port, AccessWidth::Byte, value as u32)
    }

    fn out32(&self, port: u16, value: u32) -> Result<()> {
        self.write(port, AccessWidth::Dword, value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Latch {
        base: u16,
        value: u32,
    }

    impl IODevice for Latch {
        fn port_range(&self) -> (u16, u16) {
            (self.base, self.base + 3)
        }

        fn read(&self, offset: u16, _width: AccessWidth) -> u32 {
            if offset == 0 {
                self.value
            } else {
                0
            }
        }

        fn write(&mut self, offset: u16, _width: AccessWidth, value: u32) {
            if offset == 0 {
                self.value = value;
            }
        }

        fn name(&self) -> &str {
            "Latch"
        }
    }

    fn latch(base: u16) -> SharedDevice {
        Arc::new(Mutex::new(Latch { base, value: 0 }))
    }

    #[test]
    fn test_routes_by_port() {
        let mut bus = IoBus::new();
        bus.map(latch(0x100)).unwrap();
        bus.map(latch(0x200)).unwrap();
        assert_eq!(bus.device_count(), 2);

        bus.write(0x200, AccessWidth::Dword, 0xDEAD_BEEF).unwrap();
        assert_eq!(bus.read(0x200, AccessWidth::Dword).unwrap(), 0xDEAD_BEEF);
        assert_eq!(bus.read(0x100, AccessWidth::Dword).unwrap(), 0);
    }

    #[test]
    fn test_bus_truncates_to_width() {
        let mut bus = IoBus::new();
        bus.map(latch(0x100)).unwrap();

        bus.write(0x100, AccessWidth::Byte, 0x1234).unwrap();
        assert_eq!(bus.read(0x100, AccessWidth::Dword).unwrap(), 0x34);

        bus.write(0x100, AccessWidth::Dword, 0x1234_5678).unwrap();
        assert_eq!(bus.read(0x100, AccessWidth::Word).unwrap(), 0x5678);
    }

    #[test]
    fn test_unmapped_port() {
        let bus = IoBus::new();
        assert!(matches!(
            bus.read(0x300, AccessWidth::Byte),
            Err(StormError::UnmappedPort { port: 0x300 })
        ));
        assert!(bus.write(0x300, AccessWidth::Byte, 1).is_err());
    }

    #[test]
    fn test_overlap_rejected() {
        let mut bus = IoBus::new();
        bus.map(latch(0x100)).unwrap();
        assert!(matches!(
            bus.map(latch(0x102)),
            Err(StormError::Config(_))
        ));
        assert_eq!(bus.device_count(), 1);
    }

    #[test]
    fn test_port_io_range_check() {
        let mut bus = IoBus::new();
        bus.map(latch(0x100)).unwrap();
        let io = PortIo::new(Arc::new(bus), 0x100, 4).unwrap();

        io.out32(0x100, 7).unwrap();
        assert_eq!(io.in32(0x100).unwrap(), 7);
        assert_eq!(io.in8(0x100).unwrap(), 7);
        assert_eq!(io.base(), 0x100);

        // Straddles the end of the window
        assert!(matches!(
            io.in32(0x102),
            Err(StormError::PortOutOfRange { .. })
        ));
        assert!(io.out8(0x104, 0).is_err());
        assert!(io.in8(0x0FF).is_err());
    }

    #[test]
    fn test_port_io_window_overflow() {
        let bus = Arc::new(IoBus::new());
        assert!(matches!(
            PortIo::new(bus, 0xFFF0, 0x20),
            Err(StormError::IoWindowOverflow { .. })
        ));
    }

    #[test]
    fn test_port_io_reaches_last_port() {
        let mut bus = IoBus::new();
        bus.map(latch(0xFFFC)).unwrap();
        let io = PortIo::new(Arc::new(bus), 0xFFFC, 4).unwrap();

        io.out32(0xFFFC, 0x55).unwrap();
        assert_eq!(io.in32(0xFFFC).unwrap(), 0x55);
        assert!(io.in8(0xFFFB).is_err());

        let bus = Arc::new(IoBus::new());
        assert!(PortIo::new(bus.clone(), 0, 0x1_0000).is_ok());
        assert!(PortIo::new(bus, 1, 0x1_0000).is_err());
    }
}
