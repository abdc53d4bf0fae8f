//! Setup log written as text lines over the serial link.
//!
//! Lines go to the same link as protocol bytes, so they are only written
//! while the host is reading setup output (never while streaming). Writing
//! is best-effort; errors are dropped.

use ufmt::uWrite;

use crate::ports::SerialLink;

/// `uWrite` adapter over a serial link.
pub struct LogWriter<'a, L: SerialLink> {
    link: &'a mut L,
}

impl<'a, L: SerialLink> LogWriter<'a, L> {
    pub fn new(link: &'a mut L) -> Self {
        Self { link }
    }
}

impl<L: SerialLink> uWrite for LogWriter<'_, L> {
    type Error = L::Error;

    fn write_str(&mut self, s: &str) -> Result<(), Self::Error> {
        self.link.write_all(s.as_bytes())
    }
}

/// Write one log line to a `SerialLink`, ignoring errors.
macro_rules! log_line {
    ($link:expr) => {{
        let _ = $crate::ports::SerialLink::write_byte($link, b'\n');
    }};
    ($link:expr, $($arg:tt)*) => {{
        let _ = ufmt::uwriteln!(&mut $crate::log::LogWriter::new($link), $($arg)*);
    }};
}

pub(crate) use log_line;
