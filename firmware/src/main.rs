//! SerKey firmware for ATmega32U4 (Teensy 2.0).
//!
//! Reports debounced switch changes to a host over USART1:
//! - Handshake and setup commands configure which pins to watch
//! - Pins are polled from the main loop and, optionally, scanned from
//!   pin-change interrupts
//! - A reset byte from the host ends the session and waits for a new one

#![no_std]
#![no_main]
#![feature(abi_avr_interrupt)]

mod clock;
mod pins;
mod serial;

use avr_device::atmega32u4::Peripherals;
use serkey_core::{Device, SharedScanner};

use clock::Micros;
use pins::AvrPins;
use serial::Usart1;

/// Scan engine of the running session, shared with the change interrupts.
static SCANNER: SharedScanner = SharedScanner::new();

/// Nothing to report to on a panic; halt.
#[panic_handler]
fn panic(_info: &core::panic::PanicInfo) -> ! {
    loop {}
}

/// Main entry point.
#[no_mangle]
pub extern "C" fn main() -> ! {
    let dp = unsafe { Peripherals::steal() };

    // Disable clock prescaler (CLKPR) so the CPU runs at 16MHz
    dp.CPU.clkpr.write(|w| w.clkpce().set_bit());
    dp.CPU.clkpr.write(|w| unsafe { w.bits(0) });

    // On-board LED (PD6) on to indicate firmware is running
    dp.PORTD.ddrd.modify(|r, w| unsafe { w.bits(r.bits() | 0x40) });
    dp.PORTD.portd.modify(|r, w| unsafe { w.bits(r.bits() | 0x40) });

    clock::init(&dp.TC0);
    serial::init(&dp.USART1);

    unsafe { avr_device::interrupt::enable() };

    let mut device = Device::new(Usart1, AvrPins, Micros);
    device.run(&SCANNER)
}

/// Scan from a change interrupt. Events are queued for the main loop to
/// send; the guard turns this into a no-op while a polled pass is running or
/// just finished.
fn scan_from_interrupt() {
    SCANNER.scan_deferred(&Micros, &mut AvrPins);
}

#[avr_device::interrupt(atmega32u4)]
fn PCINT0() {
    scan_from_interrupt();
}

#[avr_device::interrupt(atmega32u4)]
fn INT0() {
    scan_from_interrupt();
}

#[avr_device::interrupt(atmega32u4)]
fn INT1() {
    scan_from_interrupt();
}

#[avr_device::interrupt(atmega32u4)]
fn INT6() {
    scan_from_interrupt();
}
