//! Core of the SerKey serial key reporter.
//!
//! A host configures which inputs to watch over a small framed setup
//! protocol, after which the device streams one byte per debounced state
//! change until the host resets it. Everything here is hardware-agnostic:
//! the firmware plugs in its serial port, GPIO and clock through the traits
//! in [`ports`], and the `sim` feature provides host-side stand-ins.
//!
//! This crate is `no_std` so it can be used by both the AVR firmware and
//! the native replay tool. Tests run with `std`:
//! ```bash
//! cargo test -p serkey-core
//! ```

#![cfg_attr(not(any(test, feature = "sim")), no_std)]

pub mod channel;
pub mod config;
pub mod device;
pub mod event;
mod log;
pub mod ports;
pub mod protocol;
pub mod scan;
pub mod timer;

#[cfg(any(test, feature = "sim"))]
pub mod sim;

pub use channel::{Channel, Pin, Registry, MAX_CHANNELS};
pub use config::DeviceConfig;
pub use device::{Device, Poll, Session, Setup};
pub use event::Event;
pub use ports::{Clock, Inputs, SerialLink};
pub use protocol::{Command, MAGIC, RESET_BYTE};
pub use scan::{Busy, ScanEngine, ScanGuard, SharedScanner};
pub use timer::DebounceTimer;
