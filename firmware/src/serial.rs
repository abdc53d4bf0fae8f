//! USART1 host link (PD2 = RX, PD3 = TX on the Teensy 2.0).
//!
//! Polled, register-level access. Reads spin on RXC1; the device has nothing
//! else to do while it waits for setup bytes.

use core::convert::Infallible;

use avr_device::atmega32u4::{Peripherals, USART1};
use serkey_core::SerialLink;

/// CPU clock (set by the Teensy fuses, prescaler cleared in `main`).
const CPU_HZ: u32 = 16_000_000;

/// Host link speed.
pub const BAUD: u32 = 115_200;

/// Baud divisor in double-speed mode: CPU_HZ / (8 * BAUD) - 1 (2.1% error at
/// 115200).
const UBRR_VALUE: u16 = (CPU_HZ / (8 * BAUD) - 1) as u16;

// UCSR1A
const RXC1: u8 = 1 << 7;
const UDRE1: u8 = 1 << 5;
const U2X1: u8 = 1 << 1;
// UCSR1B
const RXEN1: u8 = 1 << 4;
const TXEN1: u8 = 1 << 3;
// UCSR1C: 8 data bits, no parity, 1 stop bit
const UCSZ_8N1: u8 = 0b0000_0110;

/// Configure USART1 for 8N1 at [`BAUD`].
pub fn init(usart: &USART1) {
    usart.ucsr1a.write(|w| unsafe { w.bits(U2X1) });
    usart.ubrr1.write(|w| unsafe { w.bits(UBRR_VALUE) });
    usart.ucsr1c.write(|w| unsafe { w.bits(UCSZ_8N1) });
    usart.ucsr1b.write(|w| unsafe { w.bits(RXEN1 | TXEN1) });
}

/// Handle to the already-initialized USART1.
pub struct Usart1;

impl Usart1 {
    fn regs() -> USART1 {
        unsafe { Peripherals::steal() }.USART1
    }
}

impl SerialLink for Usart1 {
    type Error = Infallible;

    fn read_byte(&mut self) -> Result<u8, Infallible> {
        let usart = Self::regs();
        while usart.ucsr1a.read().bits() & RXC1 == 0 {}
        Ok(usart.udr1.read().bits())
    }

    fn poll_byte(&mut self) -> Result<Option<u8>, Infallible> {
        let usart = Self::regs();
        if usart.ucsr1a.read().bits() & RXC1 == 0 {
            return Ok(None);
        }
        Ok(Some(usart.udr1.read().bits()))
    }

    fn write_byte(&mut self, byte: u8) -> Result<(), Infallible> {
        let usart = Self::regs();
        while usart.ucsr1a.read().bits() & UDRE1 == 0 {}
        usart.udr1.write(|w| unsafe { w.bits(byte) });
        Ok(())
    }
}
