//! Collaborator interfaces the core is driven through.
//!
//! The core never touches hardware directly. Firmware implements these on
//! real registers; the `sim` module implements them for replay and tests.

use crate::channel::Pin;

/// Byte-oriented link to the host.
pub trait SerialLink {
    type Error;

    /// Block until a byte arrives.
    fn read_byte(&mut self) -> Result<u8, Self::Error>;

    /// Return a received byte if one is waiting, without blocking.
    fn poll_byte(&mut self) -> Result<Option<u8>, Self::Error>;

    fn write_byte(&mut self, byte: u8) -> Result<(), Self::Error>;

    fn write_all(&mut self, bytes: &[u8]) -> Result<(), Self::Error> {
        for &byte in bytes {
            self.write_byte(byte)?;
        }
        Ok(())
    }
}

/// Raw digital inputs addressed by host-supplied identifiers.
pub trait Inputs {
    /// Instantaneous state: true = active (pressed). Always false for a
    /// reserved pin.
    fn is_active(&mut self, pin: Pin) -> bool;

    /// True for pins the board uses for something else (such as the host
    /// link). Reserved pins are never set up and never read as active.
    fn is_reserved(&self, _pin: Pin) -> bool {
        false
    }

    /// Configure as a pulled-up digital input.
    fn configure_input(&mut self, pin: Pin);

    /// Return the pin to a neutral, non-driven state.
    fn release(&mut self, pin: Pin);

    /// Enable a change interrupt that runs the scan engine. Returns false if
    /// the pin has no change interrupt.
    fn attach_change_interrupt(&mut self, pin: Pin) -> bool;

    fn detach_change_interrupt(&mut self, pin: Pin);
}

/// Free-running microsecond clock, wrapping modulo 2^32.
pub trait Clock {
    fn micros(&self) -> u32;
}
