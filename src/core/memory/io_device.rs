// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 itsakeyfut

//! I/O Device Trait
//!
//! This module defines the trait implemented by port-mapped devices. A
//! device declares the port window it decodes and handles accesses by
//! window-relative offset, so the [`IoBus`](super::IoBus) needs no knowledge
//! of individual device types.
//!
//! # Access Model
//!
//! Accesses are 1, 2 or 4 bytes wide and are decoded by their exact start
//! offset. There is no byte-lane composition: a 4-byte read at offset 0x00
//! returns the register at 0x00 only, truncated to 4 bytes, not a merge of
//! the registers at 0x00..0x03. This matches ISA port I/O, where each
//! access is a single bus cycle addressed at one port.
//!
//! # Example
//!
//! ```
//! use irqstorm::core::memory::{AccessWidth, IODevice};
//!
//! struct Scratch {
//!     base: u16,
//!     value: u32,
//! }
//!
//! impl IODevice for Scratch {
//!     fn port_range(&self) -> (u16, u16) {
//!         (self.base, self.base + 3)
//!     }
//!
//!     fn read(&self, offset: u16, width: AccessWidth) -> u32 {
//!         if offset == 0 { width.truncate(self.value) } else { 0 }
//!     }
//!
//!     fn write(&mut self, offset: u16, width: AccessWidth, value: u32) {
//!         if offset == 0 {
//!             self.value = width.truncate(value);
//!         }
//!     }
//! }
//! ```

/// Width of a single bus access
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AccessWidth {
    Byte,
    Word,
    Dword,
}

impl AccessWidth {
    /// Size in bytes
    #[inline(always)]
    pub fn bytes(self) -> u16 {
        match self {
            AccessWidth::Byte => 1,
            AccessWidth::Word => 2,
            AccessWidth::Dword => 4,
        }
    }

    /// Mask selecting the bits carried by an access of this width
    #[inline(always)]
    pub fn mask(self) -> u32 {
        match self {
            AccessWidth::Byte => 0xFF,
            AccessWidth::Word => 0xFFFF,
            AccessWidth::Dword => 0xFFFF_FFFF,
        }
    }

    /// Truncate a value to this width
    #[inline(always)]
    pub fn truncate(self, value: u32) -> u32 {
        value & self.mask()
    }
}

/// Trait for port-mapped I/O devices
///
/// # Atomicity
///
/// The bus holds a device's lock for exactly one `read` or `write` call.
/// Devices may rely on each call being atomic with respect to every other
/// call and to their own internal event handlers, but never on two calls
/// being atomic together.
pub trait IODevice: Send {
    /// Port window this device decodes
    ///
    /// Returns `(start, end)` inclusive.
    fn port_range(&self) -> (u16, u16);

    /// Check if this device decodes the given port
    fn contains(&self, port: u16) -> bool {
        let (start, end) = self.port_range();
        port >= start && port <= end
    }

    /// Read the register at `offset`
    ///
    /// Undefined offsets read as 0.
    fn read(&self, offset: u16, width: AccessWidth) -> u32;

    /// Write the register at `offset`
    ///
    /// `value` arrives already truncated to `width` by the bus. Undefined
    /// offsets ignore the write.
    fn write(&mut self, offset: u16, width: AccessWidth, value: u32);

    /// Device name for logging
    fn name(&self) -> &str {
        "Unknown Device"
    }
}
