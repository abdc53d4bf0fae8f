//! Per-session device settings written by the setup protocol.

use crate::timer::MAX_SPAN;

/// Debounce window a fresh session starts with, in microseconds.
pub const DEFAULT_DEBOUNCE_US: u32 = 1000;

/// Settings shared by the setup protocol and the scan engine.
///
/// Only mutated while configuring; read-only once streaming starts.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DeviceConfig {
    /// Minimum quiet time after a reported change, in microseconds.
    pub debounce_us: u32,
    /// Restart the window on every observed flicker (anchor to the last
    /// change) instead of only on a reported change (anchor to the first).
    pub reset_on_every_change: bool,
    /// Attach change interrupts so transitions are scanned without waiting
    /// for the next poll.
    pub interrupt_assist: bool,
}

impl DeviceConfig {
    pub const fn new() -> Self {
        Self {
            debounce_us: DEFAULT_DEBOUNCE_US,
            reset_on_every_change: true,
            interrupt_assist: false,
        }
    }

    /// Set the debounce window, clamping it to what the wrapping clock can
    /// represent. Returns false if the value had to be clamped.
    pub fn set_debounce(&mut self, micros: u32) -> bool {
        self.debounce_us = micros.min(MAX_SPAN);
        micros <= MAX_SPAN
    }

    pub fn policy_name(&self) -> &'static str {
        if self.reset_on_every_change {
            "last-change"
        } else {
            "first-change"
        }
    }
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self::new()
    }
}
