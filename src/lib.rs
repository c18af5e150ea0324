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

//! irqstorm: an interrupt storm generator and its service loop
//!
//! This crate models an ISA-style peripheral that raises interrupts at a
//! programmable rate, in edge-burst or level-held mode, together with the
//! interrupt service loop that consumes them.
//!
//! # Architecture
//!
//! - [`core::storm`]: the generator device (register file, scheduler, fire handler)
//! - [`core::consumer`]: the service loop (wait, status, acknowledge, report)
//! - [`core::interrupt`]: interrupt controller, lines and notifications
//! - [`core::memory`]: port bus and I/O port capabilities
//! - [`core::system`]: wiring and the device-side drivers
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
//! system.run(consumer, 10_000_000, |_| {})?;
//! # Ok::<(), irqstorm::core::error::StormError>(())
//! ```
//!
//! # Error Handling
//!
//! All fallible operations return [`core::error::Result<T>`] which is an alias for
//! `Result<T, StormError>`.

pub mod core;

// Re-export commonly used types
pub use core::error::{Result, StormError};
