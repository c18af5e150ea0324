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

//! Error types
//!
//! Every fallible operation in the crate returns [`Result<T>`], an alias for
//! `Result<T, StormError>`.
//!
//! The variants fall into three groups:
//!
//! - **Configuration**: rejected at construction or load time. The device is
//!   never partially attached when one of these is returned.
//! - **Resources**: the provisioning layer could not hand out a capability.
//!   The binary treats these as fatal.
//! - **Runtime**: bus and acknowledgment failures reported to the caller.

use thiserror::Error;

/// Result type alias using [`StormError`]
pub type Result<T> = std::result::Result<T, StormError>;

/// Errors produced by the storm device, its collaborators and the consumer
#[derive(Error, Debug)]
pub enum StormError {
    /// Interrupt line outside the 16 ISA lines
    #[error("irq must be in range [0..15], got {line}")]
    InvalidIrqLine { line: u32 },

    /// IO window does not cover the register file
    #[error("iosize must be at least 0x{required:02X}, got 0x{size:02X}")]
    IoWindowTooSmall { size: u32, required: u32 },

    /// IO window does not fit in the 16-bit port space
    #[error("io window 0x{base:04X}+0x{size:X} exceeds the port space")]
    IoWindowOverflow { base: u32, size: u32 },

    /// Malformed configuration file
    #[error("configuration error: {0}")]
    Config(String),

    /// Provisioning layer ran out of slots
    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),

    /// An IRQ handler was already issued for this line
    #[error("irq {line} already has a handler")]
    IrqInUse { line: u8 },

    /// Port access outside the window granted to a capability
    #[error("port 0x{port:04X} outside granted range 0x{base:04X}..0x{end:04X}")]
    PortOutOfRange { port: u16, base: u16, end: u32 },

    /// No device is mapped at the port
    #[error("no device mapped at port 0x{port:04X}")]
    UnmappedPort { port: u16 },

    /// Interrupt-controller acknowledgment failed
    #[error("irq {line} acknowledge failed: {reason}")]
    AckFailed { line: u8, reason: String },

    /// I/O error while reading or writing files
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
