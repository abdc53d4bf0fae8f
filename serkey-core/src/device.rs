//! Session lifecycle: handshake, setup, streaming and teardown.
//!
//! ```text
//! RESYNC --magic--> CONFIGURING --FINISH--> STREAMING
//!    ^                  |                       |
//!    +------RESET-------+-------reset byte------+
//! ```
//!
//! Every pass through RESYNC starts a fresh [`Session`]; nothing configured
//! in a previous session survives.

use crate::channel::Registry;
use crate::config::DeviceConfig;
use crate::log::log_line;
use crate::ports::{Clock, Inputs, SerialLink};
use crate::protocol::{Command, FrameHeader, Payload, Resync, MAGIC, RESET_BYTE};
use crate::scan::{ScanEngine, SharedScanner};

/// Settings and channels collected during setup.
#[derive(Clone, Debug, Default)]
pub struct Session {
    pub config: DeviceConfig,
    pub channels: Registry,
}

impl Session {
    pub const fn new() -> Self {
        Self {
            config: DeviceConfig::new(),
            channels: Registry::new(),
        }
    }
}

/// How setup ended.
#[derive(Debug)]
pub enum Setup {
    /// `FINISH` received; start streaming with this session.
    Finished(Session),
    /// `RESET` received; go back to the handshake.
    Reset,
}

/// Result of one streaming poll.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Poll {
    Streaming,
    Reset,
}

enum Step {
    Continue,
    Finish,
    Reset,
}

/// The device side of the protocol, driven through its ports.
pub struct Device<L, I, C> {
    link: L,
    inputs: I,
    clock: C,
}

impl<L, I, C> Device<L, I, C>
where
    L: SerialLink,
    I: Inputs,
    C: Clock,
{
    pub fn new(link: L, inputs: I, clock: C) -> Self {
        Self {
            link,
            inputs,
            clock,
        }
    }

    pub fn link(&self) -> &L {
        &self.link
    }

    pub fn link_mut(&mut self) -> &mut L {
        &mut self.link
    }

    pub fn inputs(&self) -> &I {
        &self.inputs
    }

    pub fn inputs_mut(&mut self) -> &mut I {
        &mut self.inputs
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    /// Serve sessions forever.
    pub fn run(&mut self, shared: &SharedScanner) -> ! {
        loop {
            let _ = self.run_session(shared);
        }
    }

    /// One full session, from handshake until a reset.
    pub fn run_session(&mut self, shared: &SharedScanner) -> Result<(), L::Error> {
        self.handshake()?;
        let session = match self.configure()? {
            Setup::Finished(session) => session,
            Setup::Reset => return Ok(()),
        };
        let engine = self.activate(session);
        // Only a running scan pass can refuse, and none runs outside streaming.
        let _ = shared.install(engine);
        let result = self.stream(shared);
        self.teardown(shared);
        result
    }

    /// Skip bytes until the magic sequence, echo it, and report how much was
    /// skipped.
    pub fn handshake(&mut self) -> Result<u32, L::Error> {
        let mut resync = Resync::new();
        while !resync.push(self.link.read_byte()?) {}
        self.link.write_all(&MAGIC)?;
        let garbage = resync.garbage();
        log_line!(
            &mut self.link,
            "received magic number after {} bytes of garbage",
            garbage
        );
        Ok(garbage)
    }

    /// Read setup commands into a fresh session until `FINISH` or `RESET`.
    pub fn configure(&mut self) -> Result<Setup, L::Error> {
        let mut session = Session::new();
        loop {
            let header = FrameHeader::read(&mut self.link)?;
            match self.apply(&mut session, header)? {
                Step::Continue => {}
                Step::Finish => return Ok(Setup::Finished(session)),
                Step::Reset => return Ok(Setup::Reset),
            }
        }
    }

    fn apply(&mut self, session: &mut Session, header: FrameHeader) -> Result<Step, L::Error> {
        let Some(command) = header.command() else {
            Payload::new(&mut self.link, header.len).drain()?;
            log_line!(
                &mut self.link,
                "unknown command {} with {} payload bytes",
                header.code,
                header.len
            );
            return Ok(Step::Continue);
        };

        if header.len < command.payload_len() {
            Payload::new(&mut self.link, header.len).drain()?;
            log_line!(
                &mut self.link,
                "command {} expects at least {} payload bytes, got {}",
                header.code,
                command.payload_len(),
                header.len
            );
            return Ok(Step::Continue);
        }

        let mut payload = Payload::new(&mut self.link, header.len);
        let arg = match command {
            Command::Finish | Command::Reset => 0,
            Command::SetDebounce => payload.read_u32()?.unwrap_or_default(),
            Command::AddChannel | Command::SetReportPolicy | Command::EnableInterrupts => {
                payload.read_u8()?.map(u32::from).unwrap_or_default()
            }
        };
        payload.drain()?;

        let config = &mut session.config;
        match command {
            Command::Finish => return Ok(Step::Finish),
            Command::Reset => {
                log_line!(&mut self.link, "setup reset");
                return Ok(Step::Reset);
            }
            Command::AddChannel => {
                let pin = arg as u8;
                if session.channels.add(pin).is_none() {
                    log_line!(&mut self.link, "key capacity exceeded, dropping pin {}", pin);
                }
            }
            Command::SetDebounce => {
                if !config.set_debounce(arg) {
                    log_line!(&mut self.link, "debounce clamped to {} us", config.debounce_us);
                }
            }
            Command::SetReportPolicy => config.reset_on_every_change = arg != 0,
            Command::EnableInterrupts => config.interrupt_assist = arg != 0,
        }
        Ok(Step::Continue)
    }

    /// Set up the hardware for every channel and build the scan engine.
    ///
    /// Pins registered more than once are only set up on their first channel.
    /// Reserved pins are left alone and their channels never report.
    /// Ends the setup log with an empty line.
    pub fn activate(&mut self, session: Session) -> ScanEngine {
        let Session { config, channels } = session;

        for (index, channel) in channels.iter().enumerate() {
            let pin = channel.pin;
            if !channels.is_first_use(index) {
                log_line!(&mut self.link, "key {}: pin {} (shared)", index, pin);
                continue;
            }
            if self.inputs.is_reserved(pin) {
                log_line!(&mut self.link, "key {}: pin {} (reserved)", index, pin);
                continue;
            }
            self.inputs.configure_input(pin);
            if config.interrupt_assist && !self.inputs.attach_change_interrupt(pin) {
                log_line!(&mut self.link, "key {}: pin {} (polled)", index, pin);
            } else {
                log_line!(&mut self.link, "key {}: pin {}", index, pin);
            }
        }

        log_line!(
            &mut self.link,
            "debounce {} us, report policy {}, interrupts {}",
            config.debounce_us,
            config.policy_name(),
            if config.interrupt_assist { "on" } else { "off" }
        );
        log_line!(&mut self.link);

        ScanEngine::new(config, channels)
    }

    /// Check for a reset byte, then run a gated scan pass.
    ///
    /// Bytes other than the reset byte are discarded.
    pub fn poll(&mut self, shared: &SharedScanner) -> Result<Poll, L::Error> {
        if self.link.poll_byte()? == Some(RESET_BYTE) {
            return Ok(Poll::Reset);
        }
        shared.scan(&self.clock, &mut self.inputs, &mut self.link)?;
        Ok(Poll::Streaming)
    }

    /// Poll until a reset byte arrives.
    pub fn stream(&mut self, shared: &SharedScanner) -> Result<(), L::Error> {
        while self.poll(shared)? == Poll::Streaming {}
        Ok(())
    }

    /// Remove the engine and return its pins to a neutral state.
    pub fn teardown(&mut self, shared: &SharedScanner) {
        let Some(engine) = shared.take() else {
            return;
        };
        for pin in engine.channels().distinct_pins() {
            if self.inputs.is_reserved(pin) {
                continue;
            }
            self.inputs.detach_change_interrupt(pin);
            self.inputs.release(pin);
        }
    }
}
