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

//! Configuration
//!
//! A run is described by a TOML file with three tables. Every key is
//! optional; missing keys take the defaults shown here.
//!
//! ```toml
//! [device]
//! iobase = 0x560
//! iosize = 0x20
//! irq = 5
//! burst = 128
//! period-us = 100
//! start-enabled = true
//! level-triggered = false
//!
//! [consumer]
//! report-interval = 65536
//! # level = true       # force LEVEL on/off at bring-up; omit to keep the device's mode
//!
//! [run]
//! duration-ms = 1000
//! virtual-time = false
//! slots = 32
//! ```

use crate::core::error::{Result, StormError};
use crate::core::storm::registers::REGISTER_FILE_SIZE;
use crate::core::interrupt::IRQ_LINES;
use crate::core::memory::PORT_SPACE_SIZE;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Device construction parameters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct DeviceConfig {
    /// First port of the IO window
    pub iobase: u32,

    /// Size of the IO window in ports
    pub iosize: u32,

    /// Interrupt line (0-15)
    pub irq: u32,

    /// Initial BURST
    pub burst: u32,

    /// Initial PERIOD_US
    pub period_us: u32,

    /// Enable the scheduler at attach time
    pub start_enabled: bool,

    /// Start in level mode
    pub level_triggered: bool,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            iobase: 0x560,
            iosize: REGISTER_FILE_SIZE as u32,
            irq: 5,
            burst: 128,
            period_us: 100,
            start_enabled: true,
            level_triggered: false,
        }
    }
}

impl DeviceConfig {
    /// Check the construction invariants
    ///
    /// # Errors
    ///
    /// - [`StormError::InvalidIrqLine`] if `irq > 15`
    /// - [`StormError::IoWindowTooSmall`] if the window cannot hold the
    ///   register file
    /// - [`StormError::IoWindowOverflow`] if the window runs past port 0xFFFF
    ///
    /// # Example
    ///
    /// ```
    /// use irqstorm::core::config::DeviceConfig;
    ///
    /// let config = DeviceConfig { irq: 16, ..DeviceConfig::default() };
    /// assert!(config.validate().is_err());
    /// ```
    pub fn validate(&self) -> Result<()> {
        if self.irq as usize >= IRQ_LINES {
            return Err(StormError::InvalidIrqLine { line: self.irq });
        }
        if self.iosize < REGISTER_FILE_SIZE as u32 {
            return Err(StormError::IoWindowTooSmall {
                size: self.iosize,
                required: REGISTER_FILE_SIZE as u32,
            });
        }
        if self.iobase as u64 + self.iosize as u64 > PORT_SPACE_SIZE as u64 {
            return Err(StormError::IoWindowOverflow {
                base: self.iobase,
                size: self.iosize,
            });
        }
        Ok(())
    }
}

/// Service loop parameters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct ConsumerConfig {
    /// Services between telemetry reports
    pub report_interval: u64,

    /// LEVEL bit written together with ENABLE at bring-up
    ///
    /// `None` keeps whatever mode the device is in.
    pub level: Option<bool>,
}

/// Default services between reports
pub const REPORT_INTERVAL: u64 = 1 << 16;

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            report_interval: REPORT_INTERVAL,
            level: None,
        }
    }
}

/// Run parameters for the binary
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct RunConfig {
    /// How long to run before shutting down
    pub duration_ms: u64,

    /// Step a virtual clock instead of following wall time
    pub virtual_time: bool,

    /// Capability slots available to the consumer
    pub slots: u32,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            duration_ms: 1000,
            virtual_time: false,
            slots: 32,
        }
    }
}

/// Complete configuration file
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StormConfig {
    pub device: DeviceConfig,
    pub consumer: ConsumerConfig,
    pub run: RunConfig,
}

impl StormConfig {
    /// Parse from TOML text
    pub fn from_toml(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text)
            .map_err(|e| StormError::Config(format!("Failed to parse config: {}", e)))?;
        config.device.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }

    /// Save configuration to a TOML file
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let contents = toml::to_string_pretty(self)
            .map_err(|e| StormError::Config(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(path, contents)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn test_defaults_match_device_properties() {
        let config = DeviceConfig::default();
        assert_eq!(config.iobase, 0x560);
        assert_eq!(config.iosize, 0x20);
        assert_eq!(config.irq, 5);
        assert_eq!(config.burst, 128);
        assert_eq!(config.period_us, 100);
        assert!(config.start_enabled);
        assert!(!config.level_triggered);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_irq_range() {
        let config = DeviceConfig {
            irq: 15,
            ..DeviceConfig::default()
        };
        assert!(config.validate().is_ok());

        let config = DeviceConfig {
            irq: 16,
            ..DeviceConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(StormError::InvalidIrqLine { line: 16 })
        ));
    }

    #[test]
    fn test_validate_window_size() {
        // 0x10 ports stop short of PULSES_HI and everything after it
        let config = DeviceConfig {
            iosize: 0x10,
            ..DeviceConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(StormError::IoWindowTooSmall {
                size: 0x10,
                required: 0x20
            })
        ));
    }

    #[test]
    fn test_validate_window_overflow() {
        let config = DeviceConfig {
            iobase: 0xFFF0,
            ..DeviceConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(StormError::IoWindowOverflow { .. })
        ));
    }

    #[test]
    fn test_validate_window_at_top_of_port_space() {
        // Last register ends exactly at port 0xFFFF
        let config = DeviceConfig {
            iobase: 0xFFE0,
            ..DeviceConfig::default()
        };
        assert!(config.validate().is_ok());

        let config = DeviceConfig {
            iobase: 0,
            iosize: 0x1_0000,
            ..DeviceConfig::default()
        };
        assert!(config.validate().is_ok());

        let config = DeviceConfig {
            iobase: 1,
            iosize: 0x1_0000,
            ..DeviceConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(StormError::IoWindowOverflow { base: 1, size: 0x1_0000 })
        ));
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config = StormConfig::from_toml(
            r#"
            [device]
            irq = 7
            level-triggered = true

            [consumer]
            report-interval = 16
            "#,
        )
        .unwrap();

        assert_eq!(config.device.irq, 7);
        assert!(config.device.level_triggered);
        assert_eq!(config.device.burst, 128);
        assert_eq!(config.consumer.report_interval, 16);
        assert_eq!(config.consumer.level, None);
        assert_eq!(config.run, RunConfig::default());
    }

    #[test]
    fn test_invalid_toml_rejected() {
        assert!(matches!(
            StormConfig::from_toml("[device]\nirq = \"five\""),
            Err(StormError::Config(_))
        ));
        assert!(matches!(
            StormConfig::from_toml("[device]\nirq = 20"),
            Err(StormError::InvalidIrqLine { line: 20 })
        ));
    }

    #[test]
    fn test_save_and_load() {
        let mut config = StormConfig::default();
        config.device.period_us = 10;
        config.consumer.level = Some(true);
        config.run.virtual_time = true;

        let file = NamedTempFile::new().unwrap();
        config.save(file.path()).unwrap();
        let loaded = StormConfig::load(file.path()).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_load_missing_file() {
        assert!(matches!(
            StormConfig::load("/nonexistent/irqstorm.toml"),
            Err(StormError::Io(_))
        ));
    }
}
