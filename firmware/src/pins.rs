//! GPIO access by raw pin identifier.
//!
//! Identifiers number the ATmega32U4 ports in order, eight per port:
//!
//! ```text
//!   0..=7   PB0-PB7      (pin-change interrupt PCINT0-7)
//!   8..=15  PC0-PC7      (only PC6, PC7 bonded out)
//!  16..=23  PD0-PD7      (PD0 = INT0, PD1 = INT1, PD2/PD3 = USART1)
//!  24..=31  PE0-PE7      (PE6 = INT6)
//!  32..=39  PF0-PF7
//! ```
//!
//! Inputs are active low: a switch pulls its pulled-up pin to ground.

use avr_device::atmega32u4::Peripherals;
use serkey_core::{Inputs, Pin};

/// PD2/PD3 belong to the host link and are never reconfigured.
const USART_PINS: [Pin; 2] = [18, 19];

// PCICR
const PCIE0: u8 = 1 << 0;
// EICRA/EICRB sense control "any logical change"
const ISC_ANY_CHANGE: u8 = 0b01;

#[derive(Clone, Copy, PartialEq, Eq)]
enum Port {
    B,
    C,
    D,
    E,
    F,
}

/// Port and bit mask for a pin identifier.
fn locate(pin: Pin) -> Option<(Port, u8)> {
    let port = match pin / 8 {
        0 => Port::B,
        1 => Port::C,
        2 => Port::D,
        3 => Port::E,
        4 => Port::F,
        _ => return None,
    };
    Some((port, 1 << (pin % 8)))
}

/// External interrupt line for pins wired to INTn.
fn external_interrupt(pin: Pin) -> Option<u8> {
    match pin {
        16 => Some(0),
        17 => Some(1),
        30 => Some(6),
        _ => None,
    }
}

fn read_port(dp: &Peripherals, port: Port) -> u8 {
    match port {
        Port::B => dp.PORTB.pinb.read().bits(),
        Port::C => dp.PORTC.pinc.read().bits(),
        Port::D => dp.PORTD.pind.read().bits(),
        Port::E => dp.PORTE.pine.read().bits(),
        Port::F => dp.PORTF.pinf.read().bits(),
    }
}

fn modify_ddr(dp: &Peripherals, port: Port, f: impl Fn(u8) -> u8) {
    match port {
        Port::B => dp.PORTB.ddrb.modify(|r, w| unsafe { w.bits(f(r.bits())) }),
        Port::C => dp.PORTC.ddrc.modify(|r, w| unsafe { w.bits(f(r.bits())) }),
        Port::D => dp.PORTD.ddrd.modify(|r, w| unsafe { w.bits(f(r.bits())) }),
        Port::E => dp.PORTE.ddre.modify(|r, w| unsafe { w.bits(f(r.bits())) }),
        Port::F => dp.PORTF.ddrf.modify(|r, w| unsafe { w.bits(f(r.bits())) }),
    }
}

fn modify_port(dp: &Peripherals, port: Port, f: impl Fn(u8) -> u8) {
    match port {
        Port::B => dp.PORTB.portb.modify(|r, w| unsafe { w.bits(f(r.bits())) }),
        Port::C => dp.PORTC.portc.modify(|r, w| unsafe { w.bits(f(r.bits())) }),
        Port::D => dp.PORTD.portd.modify(|r, w| unsafe { w.bits(f(r.bits())) }),
        Port::E => dp.PORTE.porte.modify(|r, w| unsafe { w.bits(f(r.bits())) }),
        Port::F => dp.PORTF.portf.modify(|r, w| unsafe { w.bits(f(r.bits())) }),
    }
}

/// Handle to the GPIO ports and interrupt controller.
pub struct AvrPins;

impl AvrPins {
    fn regs() -> Peripherals {
        unsafe { Peripherals::steal() }
    }
}

impl Inputs for AvrPins {
    fn is_active(&mut self, pin: Pin) -> bool {
        // The link toggles these while sending events.
        if self.is_reserved(pin) {
            return false;
        }
        match locate(pin) {
            Some((port, mask)) => read_port(&Self::regs(), port) & mask == 0,
            None => false,
        }
    }

    fn is_reserved(&self, pin: Pin) -> bool {
        USART_PINS.contains(&pin)
    }

    fn configure_input(&mut self, pin: Pin) {
        if self.is_reserved(pin) {
            return;
        }
        if let Some((port, mask)) = locate(pin) {
            let dp = Self::regs();
            modify_ddr(&dp, port, |bits| bits & !mask);
            modify_port(&dp, port, |bits| bits | mask);
        }
    }

    fn release(&mut self, pin: Pin) {
        if self.is_reserved(pin) {
            return;
        }
        if let Some((port, mask)) = locate(pin) {
            let dp = Self::regs();
            modify_ddr(&dp, port, |bits| bits & !mask);
            modify_port(&dp, port, |bits| bits & !mask);
        }
    }

    fn attach_change_interrupt(&mut self, pin: Pin) -> bool {
        if self.is_reserved(pin) {
            return false;
        }
        let exint = Self::regs().EXINT;
        if pin < 8 {
            let mask = 1 << pin;
            exint.pcmsk0.modify(|r, w| unsafe { w.bits(r.bits() | mask) });
            exint.pcicr.modify(|r, w| unsafe { w.bits(r.bits() | PCIE0) });
            return true;
        }
        let Some(line) = external_interrupt(pin) else {
            return false;
        };
        let mask = 1 << line;
        if line < 4 {
            let shift = line * 2;
            exint.eicra.modify(|r, w| unsafe {
                w.bits((r.bits() & !(0b11 << shift)) | (ISC_ANY_CHANGE << shift))
            });
        } else {
            let shift = (line - 4) * 2;
            exint.eicrb.modify(|r, w| unsafe {
                w.bits((r.bits() & !(0b11 << shift)) | (ISC_ANY_CHANGE << shift))
            });
        }
        // Changing the sense mode can raise a stale flag; clear it first.
        exint.eifr.write(|w| unsafe { w.bits(mask) });
        exint.eimsk.modify(|r, w| unsafe { w.bits(r.bits() | mask) });
        true
    }

    fn detach_change_interrupt(&mut self, pin: Pin) {
        let exint = Self::regs().EXINT;
        if pin < 8 {
            let mask = 1 << pin;
            exint.pcmsk0.modify(|r, w| unsafe { w.bits(r.bits() & !mask) });
            if exint.pcmsk0.read().bits() == 0 {
                exint.pcicr.modify(|r, w| unsafe { w.bits(r.bits() & !PCIE0) });
            }
        } else if let Some(line) = external_interrupt(pin) {
            exint.eimsk.modify(|r, w| unsafe { w.bits(r.bits() & !(1 << line)) });
        }
    }
}
