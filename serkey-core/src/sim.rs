//! Simulated ports for running the core on a host.
//!
//! Host bytes and input changes are scheduled against a shared clock. Reading
//! from the link when nothing more is scheduled fails with
//! [`SimError::Exhausted`], which ends a replay instead of blocking forever.

use std::cell::Cell;
use std::collections::VecDeque;
use std::fmt;
use std::rc::Rc;

use crate::channel::Pin;
use crate::ports::{Clock, Inputs, SerialLink};
use crate::timer;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SimError {
    /// No more host bytes will ever arrive.
    Exhausted,
}

impl fmt::Display for SimError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SimError::Exhausted => write!(f, "host input exhausted"),
        }
    }
}

impl std::error::Error for SimError {}

/// Shared microsecond clock. Every read advances it by `step`, so polling
/// loops make progress.
#[derive(Clone, Debug, Default)]
pub struct SimClock {
    now: Rc<Cell<u32>>,
    step: u32,
}

impl SimClock {
    pub fn new(start: u32) -> Self {
        Self {
            now: Rc::new(Cell::new(start)),
            step: 0,
        }
    }

    pub fn with_step(start: u32, step: u32) -> Self {
        Self {
            now: Rc::new(Cell::new(start)),
            step,
        }
    }

    pub fn now(&self) -> u32 {
        self.now.get()
    }

    pub fn set(&self, now: u32) {
        self.now.set(now);
    }

    pub fn advance(&self, micros: u32) {
        self.now.set(self.now.get().wrapping_add(micros));
    }
}

impl Clock for SimClock {
    fn micros(&self) -> u32 {
        let now = self.now.get();
        self.now.set(now.wrapping_add(self.step));
        now
    }
}

/// Scripted host connection.
///
/// Input bytes carry an arrival time; with a clock attached, `poll_byte` only
/// yields bytes that have arrived and `read_byte` jumps the clock forward to
/// the next arrival. Output bytes are recorded with the time they were sent.
#[derive(Debug, Default)]
pub struct SimLink {
    input: VecDeque<(u32, u8)>,
    output: Vec<(u32, u8)>,
    clock: Option<SimClock>,
}

impl SimLink {
    pub fn new() -> Self {
        Self::default()
    }

    /// A link with `bytes` already waiting.
    pub fn with_input(bytes: &[u8]) -> Self {
        let mut link = Self::new();
        link.send(0, bytes);
        link
    }

    pub fn with_clock(clock: SimClock) -> Self {
        Self {
            clock: Some(clock),
            ..Self::default()
        }
    }

    /// Queue host bytes arriving at `at`.
    pub fn send(&mut self, at: u32, bytes: &[u8]) {
        self.input.extend(bytes.iter().map(|&b| (at, b)));
    }

    pub fn pending_input(&self) -> usize {
        self.input.len()
    }

    pub fn output(&self) -> &[(u32, u8)] {
        &self.output
    }

    /// Drain recorded output bytes, dropping their timestamps.
    pub fn take_output(&mut self) -> Vec<u8> {
        self.output.drain(..).map(|(_, b)| b).collect()
    }

    /// Drain recorded output bytes with the time each was written.
    pub fn take_timed_output(&mut self) -> Vec<(u32, u8)> {
        core::mem::take(&mut self.output)
    }

    fn now(&self) -> u32 {
        self.clock.as_ref().map_or(0, SimClock::now)
    }
}

impl SerialLink for SimLink {
    type Error = SimError;

    fn read_byte(&mut self) -> Result<u8, SimError> {
        let (at, byte) = self.input.pop_front().ok_or(SimError::Exhausted)?;
        if let Some(clock) = &self.clock {
            if !timer::reached(clock.now(), at) {
                clock.set(at);
            }
        }
        Ok(byte)
    }

    fn poll_byte(&mut self) -> Result<Option<u8>, SimError> {
        match self.input.front() {
            Some(&(at, _)) if self.clock.is_none() || timer::reached(self.now(), at) => {
                Ok(self.input.pop_front().map(|(_, b)| b))
            }
            _ => Ok(None),
        }
    }

    fn write_byte(&mut self, byte: u8) -> Result<(), SimError> {
        let now = self.now();
        self.output.push((now, byte));
        Ok(())
    }
}

/// Hardware call recorded by [`SimInputs`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PinOp {
    Configure(Pin),
    Release(Pin),
    Attach(Pin),
    Detach(Pin),
}

/// Inputs driven by a schedule of raw level changes.
#[derive(Debug)]
pub struct SimInputs {
    clock: SimClock,
    changes: Vec<(u32, Pin, bool)>,
    ops: Vec<PinOp>,
    /// Pins that have a change interrupt. `None` means all of them.
    interrupt_pins: Option<Vec<Pin>>,
    reserved_pins: Vec<Pin>,
}

impl SimInputs {
    pub fn new(clock: SimClock) -> Self {
        Self {
            clock,
            changes: Vec::new(),
            ops: Vec::new(),
            interrupt_pins: None,
            reserved_pins: Vec::new(),
        }
    }

    pub fn clock(&self) -> &SimClock {
        &self.clock
    }

    /// Restrict change interrupts to `pins`.
    pub fn set_interrupt_pins(&mut self, pins: &[Pin]) {
        self.interrupt_pins = Some(pins.to_vec());
    }

    /// Mark `pins` as used by the board.
    pub fn set_reserved_pins(&mut self, pins: &[Pin]) {
        self.reserved_pins = pins.to_vec();
    }

    /// Set `pin` to `active` from time `at` on. Later calls win over earlier
    /// ones once their time is reached.
    pub fn schedule(&mut self, at: u32, pin: Pin, active: bool) {
        self.changes.push((at, pin, active));
    }

    pub fn ops(&self) -> &[PinOp] {
        &self.ops
    }

    pub fn take_ops(&mut self) -> Vec<PinOp> {
        core::mem::take(&mut self.ops)
    }
}

impl Inputs for SimInputs {
    fn is_active(&mut self, pin: Pin) -> bool {
        if self.is_reserved(pin) {
            return false;
        }
        let now = self.clock.now();
        self.changes
            .iter()
            .rev()
            .find(|&&(at, p, _)| p == pin && timer::reached(now, at))
            .is_some_and(|&(_, _, active)| active)
    }

    fn is_reserved(&self, pin: Pin) -> bool {
        self.reserved_pins.contains(&pin)
    }

    fn configure_input(&mut self, pin: Pin) {
        self.ops.push(PinOp::Configure(pin));
    }

    fn release(&mut self, pin: Pin) {
        self.ops.push(PinOp::Release(pin));
    }

    fn attach_change_interrupt(&mut self, pin: Pin) -> bool {
        let supported = !self.is_reserved(pin)
            && self
                .interrupt_pins
                .as_ref()
                .is_none_or(|pins| pins.contains(&pin));
        if supported {
            self.ops.push(PinOp::Attach(pin));
        }
        supported
    }

    fn detach_change_interrupt(&mut self, pin: Pin) {
        self.ops.push(PinOp::Detach(pin));
    }
}
