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

//! Interrupt Controller and Signaling
//!
//! This module models the path from a device's interrupt line to a blocked
//! service loop:
//!
//! ```text
//!  device             controller                    consumer
//! ┌────────┐ raise  ┌─────────────────────┐ signal ┌──────────────┐
//! │IrqLine │──────▶ │ line N: level/mask  │──────▶ │ Notification │ wait()
//! └────────┘ pulse  │ bound notification  │ badge  └──────────────┘
//!            lower  └─────────────────────┘
//!                        ▲ ack (IrqHandler)
//! ```
//!
//! ## Line Model
//!
//! Each of the 16 lines carries:
//!
//! - **level**: the current electrical state driven by the device
//! - **masked**: set on every delivery, cleared by [`IrqHandler::ack`]. Lines
//!   start masked; the owner acknowledges once to open them.
//! - **pending**: one latched edge that arrived while masked
//!
//! On acknowledge, a line whose level is still high, or which latched an
//! edge, is delivered again immediately. This is why a level-triggered
//! device must be quiesced (device-level ACK) before the controller-level
//! acknowledge.
//!
//! ## Lock Order
//!
//! Device lock, then controller lock, then notification lock. The consumer's
//! acknowledge takes only the controller lock.

use crate::core::error::{Result, StormError};
use crate::core::exclusive;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};

/// Number of interrupt lines
pub const IRQ_LINES: usize = 16;

/// Opaque wake-reason tag delivered with a signal
pub type Badge = u64;

/// Result of waiting on a [`Notification`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wake {
    /// One or more signals arrived; badges are OR-combined
    Signal(Badge),

    /// The wait was cancelled by a [`ShutdownToken`]
    Shutdown,
}

#[derive(Debug, Default)]
struct NotifyState {
    word: Badge,
    cancelled: bool,
}

/// Binary-semaphore style signaling object
///
/// Signals OR their badge into a word; a wait returns the accumulated word
/// and clears it.
#[derive(Debug, Default)]
pub struct Notification {
    state: Mutex<NotifyState>,
    cond: Condvar,
}

impl Notification {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver a badge and wake a waiter
    pub fn signal(&self, badge: Badge) {
        let mut state = exclusive(&self.state);
        state.word |= badge;
        self.cond.notify_one();
    }

    /// Block until signaled or cancelled
    ///
    /// Cancellation wins over pending signals.
    pub fn wait(&self) -> Wake {
        let mut state = exclusive(&self.state);
        loop {
            if state.cancelled {
                return Wake::Shutdown;
            }
            if state.word != 0 {
                let badge = std::mem::take(&mut state.word);
                return Wake::Signal(badge);
            }
            state = self
                .cond
                .wait(state)
                .unwrap_or_else(std::sync::PoisonError::into_inner);
        }
    }

    /// Take pending signals without blocking
    pub fn poll(&self) -> Option<Badge> {
        let mut state = exclusive(&self.state);
        match std::mem::take(&mut state.word) {
            0 => None,
            badge => Some(badge),
        }
    }

    /// Permanently cancel all current and future waits
    pub fn cancel(&self) {
        let mut state = exclusive(&self.state);
        state.cancelled = true;
        self.cond.notify_all();
    }
}

/// Cancellation handle shared by the consumer loop and the device driver
#[derive(Debug, Clone, Default)]
pub struct ShutdownToken {
    cancelled: Arc<AtomicBool>,
    watched: Arc<Mutex<Vec<Arc<Notification>>>>,
}

impl ShutdownToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancel `notification` when this token is cancelled
    pub fn watch(&self, notification: Arc<Notification>) {
        if self.is_cancelled() {
            notification.cancel();
        }
        exclusive(&self.watched).push(notification);
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
        for notification in exclusive(&self.watched).iter() {
            notification.cancel();
        }
        log::debug!("Shutdown requested");
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

#[derive(Debug, Default)]
struct LineState {
    level: bool,
    masked: bool,
    pending: bool,
    handler_issued: bool,
    binding: Option<(Arc<Notification>, Badge)>,
    deliveries: u64,
}

impl LineState {
    fn new() -> Self {
        Self {
            masked: true,
            ..Self::default()
        }
    }

    /// Signal the bound notification if the line is open
    fn deliver(&mut self, line: usize) -> bool {
        let Some((notification, badge)) = &self.binding else {
            return false;
        };
        if self.masked {
            return false;
        }
        self.masked = true;
        self.pending = false;
        self.deliveries += 1;
        notification.signal(*badge);
        log::trace!("IRQ {} delivered, badge=0x{:X}", line, badge);
        true
    }
}

/// 16-line interrupt controller with mask-until-acknowledge delivery
#[derive(Debug)]
pub struct InterruptController {
    lines: Mutex<Vec<LineState>>,
}

impl InterruptController {
    /// Create a controller with every line masked and unbound
    pub fn new() -> Self {
        Self {
            lines: Mutex::new((0..IRQ_LINES).map(|_| LineState::new()).collect()),
        }
    }

    fn check_line(line: u8) -> Result<usize> {
        let index = line as usize;
        if index >= IRQ_LINES {
            return Err(StormError::InvalidIrqLine { line: line as u32 });
        }
        Ok(index)
    }

    /// Device side: drive the line high
    pub fn raise(&self, line: u8) {
        let Ok(index) = Self::check_line(line) else {
            return;
        };
        let mut lines = exclusive(&self.lines);
        let state = &mut lines[index];
        if !state.level {
            state.level = true;
            state.deliver(index);
        }
    }

    /// Device side: drive the line low
    pub fn lower(&self, line: u8) {
        let Ok(index) = Self::check_line(line) else {
            return;
        };
        exclusive(&self.lines)[index].level = false;
    }

    /// Device side: one transient edge
    pub fn pulse(&self, line: u8) {
        let Ok(index) = Self::check_line(line) else {
            return;
        };
        let mut lines = exclusive(&self.lines);
        let state = &mut lines[index];
        if !state.deliver(index) && state.binding.is_some() {
            state.pending = true;
        }
    }

    /// Current electrical level of a line
    pub fn level(&self, line: u8) -> bool {
        Self::check_line(line)
            .map(|index| exclusive(&self.lines)[index].level)
            .unwrap_or(false)
    }

    /// Number of signals delivered on a line
    pub fn deliveries(&self, line: u8) -> u64 {
        Self::check_line(line)
            .map(|index| exclusive(&self.lines)[index].deliveries)
            .unwrap_or(0)
    }

    /// Claim a line for an IRQ handler
    fn claim(&self, line: u8) -> Result<()> {
        let index = Self::check_line(line)?;
        let mut lines = exclusive(&self.lines);
        if lines[index].handler_issued {
            return Err(StormError::IrqInUse { line });
        }
        lines[index].handler_issued = true;
        Ok(())
    }

    fn bind(&self, line: u8, notification: Arc<Notification>, badge: Badge) -> Result<()> {
        let index = Self::check_line(line)?;
        exclusive(&self.lines)[index].binding = Some((notification, badge));
        log::debug!("IRQ {} bound to notification, badge=0x{:X}", line, badge);
        Ok(())
    }

    fn ack(&self, line: u8) -> Result<()> {
        let index = Self::check_line(line)?;
        let mut lines = exclusive(&self.lines);
        let state = &mut lines[index];
        if state.binding.is_none() {
            return Err(StormError::AckFailed {
                line,
                reason: "no notification bound".to_string(),
            });
        }
        state.masked = false;
        if state.level || state.pending {
            state.deliver(index);
        }
        Ok(())
    }
}

impl Default for InterruptController {
    fn default() -> Self {
        Self::new()
    }
}

/// Device-facing interrupt output
pub trait InterruptLine: Send {
    /// Line number
    fn line(&self) -> u8;

    /// Hold the line high
    fn raise(&self);

    /// Release the line
    fn lower(&self);

    /// One edge: assert then deassert
    fn pulse(&self);
}

/// An [`InterruptLine`] wired to an [`InterruptController`] input
#[derive(Debug, Clone)]
pub struct IrqLine {
    controller: Arc<InterruptController>,
    line: u8,
}

impl IrqLine {
    pub fn new(controller: Arc<InterruptController>, line: u8) -> Self {
        Self { controller, line }
    }
}

impl InterruptLine for IrqLine {
    fn line(&self) -> u8 {
        self.line
    }

    fn raise(&self) {
        self.controller.raise(self.line);
    }

    fn lower(&self) {
        self.controller.lower(self.line);
    }

    fn pulse(&self) {
        // A pulse leaves the level untouched: low before, low after
        self.controller.pulse(self.line);
    }
}

/// Controller-level acknowledge seam used by the consumer
pub trait IrqAck {
    fn ack(&self) -> Result<()>;
}

/// Capability to bind and acknowledge one controller line
#[derive(Debug)]
pub struct IrqHandler {
    controller: Arc<InterruptController>,
    line: u8,
}

impl IrqHandler {
    /// Claim `line` on `controller`
    ///
    /// # Errors
    ///
    /// [`StormError::IrqInUse`] if a handler already exists for the line.
    pub fn issue(controller: Arc<InterruptController>, line: u8) -> Result<Self> {
        controller.claim(line)?;
        Ok(Self { controller, line })
    }

    pub fn line(&self) -> u8 {
        self.line
    }

    /// Route deliveries on this line to `notification`
    pub fn set_notification(&self, notification: Arc<Notification>, badge: Badge) -> Result<()> {
        self.controller.bind(self.line, notification, badge)
    }
}

impl IrqAck for IrqHandler {
    fn ack(&self) -> Result<()> {
        self.controller.ack(self.line)
    }
}
