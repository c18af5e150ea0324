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

//! Storm device register map
//!
//! ```text
//! Offset | Name        | Width | Access | Contents
//! -------|-------------|-------|--------|-------------------------------------
//! 0x00   | CTRL        | 1     | R/W    | bit0 ENABLE, bit1 LEVEL
//! 0x01   | IRQ         | 1     | R      | configured line number
//! 0x02   | BURST       | 1-4   | R/W    | pulses per fire (edge mode)
//! 0x03   | STATUS      | 1     | R      | bit0 enabled, bit1 asserted, bit2 level
//! 0x04   | PERIOD_US   | 4     | R/W    | inter-fire interval in microseconds
//! 0x08   | PULSES_LO   | 4     | R      | pulses_emitted[31:0]
//! 0x0C   | PULSES_HI   | 4     | R      | pulses_emitted[63:32]
//! 0x10   | TIMER_CB    | 4     | R      | timer_fires[31:0]
//! 0x14   | CFG_WRITES  | 4     | R      | config_writes[31:0]
//! 0x18   | EN_TOGGLES  | 4     | R      | enable_toggles[31:0]
//! 0x1C   | ACK         | 4     | W      | non-zero deasserts a held level IRQ
//! ```
//!
//! All registers are little-endian. Offsets not listed read as 0 and ignore
//! writes.

use bitflags::bitflags;

/// CTRL (0x00)
pub const CTRL: u16 = 0x00;

/// IRQ (0x01)
pub const IRQ: u16 = 0x01;

/// BURST (0x02)
pub const BURST: u16 = 0x02;

/// STATUS (0x03)
pub const STATUS: u16 = 0x03;

/// PERIOD_US (0x04)
pub const PERIOD_US: u16 = 0x04;

/// PULSES_LO (0x08)
pub const PULSES_LO: u16 = 0x08;

/// PULSES_HI (0x0C)
pub const PULSES_HI: u16 = 0x0C;

/// TIMER_CB (0x10)
pub const TIMER_CB: u16 = 0x10;

/// CFG_WRITES (0x14)
pub const CFG_WRITES: u16 = 0x14;

/// EN_TOGGLES (0x18)
pub const EN_TOGGLES: u16 = 0x18;

/// ACK (0x1C)
pub const ACK: u16 = 0x1C;

/// Bytes covered by the register file
pub const REGISTER_FILE_SIZE: u16 = ACK + 4;

bitflags! {
    /// CTRL register bits
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct Control: u8 {
        /// Scheduler running
        const ENABLE = 1 << 0;
        /// Level-triggered mode (edge mode when clear)
        const LEVEL = 1 << 1;
    }
}

bitflags! {
    /// STATUS register bits
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct Status: u8 {
        const ENABLED = 1 << 0;
        /// Line currently held high by the device
        const ASSERT = 1 << 1;
        const LEVEL = 1 << 2;
    }
}

/// Decoded register
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Register {
    Ctrl,
    Irq,
    Burst,
    Status,
    PeriodUs,
    PulsesLo,
    PulsesHi,
    TimerCb,
    CfgWrites,
    EnToggles,
    Ack,
}

impl Register {
    /// Decode an access by its start offset
    ///
    /// # Example
    ///
    /// ```
    /// use irqstorm::core::storm::registers::Register;
    ///
    /// assert_eq!(Register::decode(0x0C), Some(Register::PulsesHi));
    /// assert_eq!(Register::decode(0x05), None);
    /// ```
    pub fn decode(offset: u16) -> Option<Self> {
        match offset {
            CTRL => Some(Register::Ctrl),
            IRQ => Some(Register::Irq),
            BURST => Some(Register::Burst),
            STATUS => Some(Register::Status),
            PERIOD_US => Some(Register::PeriodUs),
            PULSES_LO => Some(Register::PulsesLo),
            PULSES_HI => Some(Register::PulsesHi),
            TIMER_CB => Some(Register::TimerCb),
            CFG_WRITES => Some(Register::CfgWrites),
            EN_TOGGLES => Some(Register::EnToggles),
            ACK => Some(Register::Ack),
            _ => None,
        }
    }

    /// Offset of the register within the window
    pub fn offset(self) -> u16 {
        match self {
            Register::Ctrl => CTRL,
            Register::Irq => IRQ,
            Register::Burst => BURST,
            Register::Status => STATUS,
            Register::PeriodUs => PERIOD_US,
            Register::PulsesLo => PULSES_LO,
            Register::PulsesHi => PULSES_HI,
            Register::TimerCb => TIMER_CB,
            Register::CfgWrites => CFG_WRITES,
            Register::EnToggles => EN_TOGGLES,
            Register::Ack => ACK,
        }
    }

    /// Register name as used in logs
    pub fn name(self) -> &'static str {
        match self {
            Register::Ctrl => "CTRL",
            Register::Irq => "IRQ",
            Register::Burst => "BURST",
            Register::Status => "STATUS",
            Register::PeriodUs => "PERIOD_US",
            Register::PulsesLo => "PULSES_LO",
            Register::PulsesHi => "PULSES_HI",
            Register::TimerCb => "TIMER_CB",
            Register::CfgWrites => "CFG_WRITES",
            Register::EnToggles => "EN_TOGGLES",
            Register::Ack => "ACK",
        }
    }

    /// Whether writes have any effect
    pub fn is_writable(self) -> bool {
        matches!(
            self,
            Register::Ctrl | Register::Burst | Register::PeriodUs | Register::Ack
        )
    }

    /// Whether reads return state (ACK always reads 0)
    pub fn is_readable(self) -> bool {
        self != Register::Ack
    }
}
