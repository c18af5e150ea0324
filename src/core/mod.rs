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

//! Core components
//!
//! - [`storm`]: the interrupt-storm generator device
//! - [`consumer`]: the interrupt service loop
//! - [`counter`]: split 64-bit counters and the stable read protocol
//! - [`interrupt`]: interrupt controller, lines and notifications
//! - [`memory`]: port bus and I/O device trait
//! - [`timing`]: clocks and the drift-corrected periodic timer
//! - [`provision`]: capability slot allocation
//! - [`system`]: wiring and device-side drivers
//! - [`config`]: configuration files
//! - [`error`]: error types

pub mod config;
pub mod consumer;
pub mod counter;
pub mod error;
pub mod interrupt;
pub mod memory;
pub mod provision;
pub mod storm;
pub mod system;
pub mod timing;

use std::sync::{Mutex, MutexGuard, PoisonError};

/// Take a lock, recovering the guard if a previous holder panicked
///
/// Every guarded value in the crate is left consistent between statements,
/// so a poisoned lock carries no torn state.
pub(crate) fn exclusive<T: ?Sized>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
