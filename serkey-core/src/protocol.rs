//! Wire format of the setup protocol.
//!
//! A session opens with the host sending the 8-byte magic sequence, which the
//! device echoes. Setup commands follow, each framed as
//!
//! ```text
//! [command: u8][payload length: u16 big-endian][payload...]
//! ```
//!
//! until `FINISH` switches the device to streaming single-byte events.

use crate::ports::SerialLink;

/// Handshake literal.
pub const MAGIC: [u8; 8] = *b"SerKey01";

/// Byte that ends a streaming session.
pub const RESET_BYTE: u8 = Command::Reset.code();

/// Setup commands understood by the device.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Command {
    /// Leave setup and start streaming.
    Finish,
    /// Register a channel. Payload: raw pin identifier (1 byte).
    AddChannel,
    /// Debounce window in microseconds. Payload: u32 big-endian.
    SetDebounce,
    /// Report policy. Payload: 1 byte, non-zero restarts the window on
    /// every change.
    SetReportPolicy,
    /// Abort setup and wait for a new handshake.
    Reset,
    /// Payload: 1 byte, non-zero attaches change interrupts.
    EnableInterrupts,
}

impl Command {
    pub const fn code(self) -> u8 {
        match self {
            Command::Finish => 0x0F,
            Command::AddChannel => 0xAD,
            Command::SetDebounce => 0xDB,
            Command::SetReportPolicy => 0xAE,
            Command::Reset => 0xEE,
            Command::EnableInterrupts => 0xEA,
        }
    }

    pub const fn from_code(code: u8) -> Option<Self> {
        Some(match code {
            0x0F => Command::Finish,
            0xAD => Command::AddChannel,
            0xDB => Command::SetDebounce,
            0xAE => Command::SetReportPolicy,
            0xEE => Command::Reset,
            0xEA => Command::EnableInterrupts,
            _ => return None,
        })
    }

    /// Payload bytes the command needs to take effect.
    pub const fn payload_len(self) -> u16 {
        match self {
            Command::Finish | Command::Reset => 0,
            Command::AddChannel | Command::SetReportPolicy | Command::EnableInterrupts => 1,
            Command::SetDebounce => 4,
        }
    }

    /// Encode a full frame header for `self` with `len` payload bytes.
    pub const fn header(self, len: u16) -> [u8; 3] {
        let [hi, lo] = len.to_be_bytes();
        [self.code(), hi, lo]
    }
}

/// Sliding-window search for the magic sequence.
///
/// Matches as soon as the last eight bytes seen equal [`MAGIC`], so a stray
/// prefix byte that also starts the magic does not cause a miss.
#[derive(Clone, Debug, Default)]
pub struct Resync {
    window: [u8; MAGIC.len()],
    seen: u32,
}

impl Resync {
    pub const fn new() -> Self {
        Self {
            window: [0; MAGIC.len()],
            seen: 0,
        }
    }

    /// Feed one byte. Returns true once the magic sequence has been seen.
    pub fn push(&mut self, byte: u8) -> bool {
        self.window.copy_within(1.., 0);
        self.window[MAGIC.len() - 1] = byte;
        self.seen = self.seen.saturating_add(1);
        self.seen >= MAGIC.len() as u32 && self.window == MAGIC
    }

    /// Bytes consumed that were not part of the magic sequence.
    pub fn garbage(&self) -> u32 {
        self.seen.saturating_sub(MAGIC.len() as u32)
    }
}

/// Command byte and declared payload length.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameHeader {
    pub code: u8,
    pub len: u16,
}

impl FrameHeader {
    pub fn read<L: SerialLink>(link: &mut L) -> Result<Self, L::Error> {
        let code = link.read_byte()?;
        let hi = link.read_byte()?;
        let lo = link.read_byte()?;
        Ok(Self {
            code,
            len: u16::from_be_bytes([hi, lo]),
        })
    }

    pub fn command(&self) -> Option<Command> {
        Command::from_code(self.code)
    }
}

/// Reader bounded by a frame's declared payload length.
///
/// Whatever a handler leaves unread is discarded by [`Payload::drain`], which
/// keeps the stream aligned on the next command byte.
pub struct Payload<'a, L: SerialLink> {
    link: &'a mut L,
    remaining: u16,
}

impl<'a, L: SerialLink> Payload<'a, L> {
    pub fn new(link: &'a mut L, len: u16) -> Self {
        Self {
            link,
            remaining: len,
        }
    }

    pub fn remaining(&self) -> u16 {
        self.remaining
    }

    /// Read one payload byte, or `None` if the payload is used up.
    pub fn read_u8(&mut self) -> Result<Option<u8>, L::Error> {
        if self.remaining == 0 {
            return Ok(None);
        }
        self.remaining -= 1;
        self.link.read_byte().map(Some)
    }

    /// Read a big-endian u32, or `None` if fewer than four bytes remain (in
    /// which case nothing is consumed).
    pub fn read_u32(&mut self) -> Result<Option<u32>, L::Error> {
        if self.remaining < 4 {
            return Ok(None);
        }
        let mut bytes = [0; 4];
        for byte in bytes.iter_mut() {
            *byte = self.link.read_byte()?;
        }
        self.remaining -= 4;
        Ok(Some(u32::from_be_bytes(bytes)))
    }

    /// Read and discard the rest of the payload. Returns how many bytes were
    /// dropped.
    pub fn drain(mut self) -> Result<u16, L::Error> {
        let dropped = self.remaining;
        while self.remaining > 0 {
            self.link.read_byte()?;
            self.remaining -= 1;
        }
        Ok(dropped)
    }
}
