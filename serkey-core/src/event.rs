//! Single-byte state-change events streamed to the host.
//!
//! Bit 7 carries the new state (1 = down), bits 6..0 the channel index.

const STATE_BIT: u8 = 0x80;
const INDEX_MASK: u8 = 0x7F;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Event {
    pub index: u8,
    pub active: bool,
}

impl Event {
    pub const fn new(index: u8, active: bool) -> Self {
        Self { index, active }
    }

    pub const fn to_byte(self) -> u8 {
        (self.index & INDEX_MASK) | if self.active { STATE_BIT } else { 0 }
    }

    pub const fn from_byte(byte: u8) -> Self {
        Self {
            index: byte & INDEX_MASK,
            active: byte & STATE_BIT != 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encoding() {
        assert_eq!(Event::new(0, true).to_byte(), 0x80);
        assert_eq!(Event::new(0, false).to_byte(), 0x00);
        assert_eq!(Event::new(5, true).to_byte(), 0x85);
        assert_eq!(Event::new(127, false).to_byte(), 0x7F);
    }

    #[test]
    fn test_decoding() {
        assert_eq!(Event::from_byte(0xFF), Event::new(127, true));
        assert_eq!(Event::from_byte(0x03), Event::new(3, false));
    }
}
