//! Microsecond clock from Timer0.
//!
//! Timer0 runs free at CPU/64 (4us per tick at 16MHz) and overflows every
//! 1024us. The overflow count and the live counter together give a `u32`
//! microsecond value that wraps cleanly modulo 2^32.

use core::cell::Cell;

use avr_device::atmega32u4::{Peripherals, TC0};
use critical_section::Mutex;
use serkey_core::Clock;

const MICROS_PER_TICK: u32 = 4;

// TCCR0B: clock select CPU/64
const CS0_DIV64: u8 = 0b0000_0011;
// TIMSK0 / TIFR0
const TOV0: u8 = 1 << 0;

static OVERFLOWS: Mutex<Cell<u32>> = Mutex::new(Cell::new(0));

/// Start Timer0 in normal mode with the overflow interrupt enabled.
pub fn init(tc0: &TC0) {
    tc0.tccr0a.write(|w| unsafe { w.bits(0) });
    tc0.tccr0b.write(|w| unsafe { w.bits(CS0_DIV64) });
    tc0.tcnt0.write(|w| unsafe { w.bits(0) });
    tc0.timsk0.write(|w| unsafe { w.bits(TOV0) });
}

#[avr_device::interrupt(atmega32u4)]
fn TIMER0_OVF() {
    critical_section::with(|cs| {
        let overflows = OVERFLOWS.borrow(cs);
        overflows.set(overflows.get().wrapping_add(1));
    });
}

/// Reads Timer0; requires [`init`] to have run.
pub struct Micros;

impl Clock for Micros {
    fn micros(&self) -> u32 {
        let tc0 = unsafe { Peripherals::steal() }.TC0;
        critical_section::with(|cs| {
            let mut overflows = OVERFLOWS.borrow(cs).get();
            let ticks = tc0.tcnt0.read().bits();
            // An overflow that happened inside this critical section has not
            // been counted yet.
            if tc0.tifr0.read().bits() & TOV0 != 0 && ticks < u8::MAX {
                overflows = overflows.wrapping_add(1);
            }
            ((overflows << 8) | u32::from(ticks)).wrapping_mul(MICROS_PER_TICK)
        })
    }
}
