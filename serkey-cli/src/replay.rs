//! Run a script against the device core on simulated ports.

use anyhow::{bail, Result};
use serkey_core::sim::{SimClock, SimError, SimInputs, SimLink};
use serkey_core::{timer, Device, Event, Pin, Poll, Setup, SharedScanner, MAGIC};

use crate::script::Script;

/// Pins with a change interrupt on the Teensy 2.0 build (PB0-7, INT0, INT1,
/// INT6).
const INTERRUPT_PINS: [Pin; 11] = [0, 1, 2, 3, 4, 5, 6, 7, 16, 17, 30];

/// USART1 RX/TX on the same build.
const RESERVED_PINS: [Pin; 2] = [18, 19];

type SimDevice = Device<SimLink, SimInputs, SimClock>;

/// Why a session stopped.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Ending {
    /// Setup `RESET` or the streaming reset byte.
    Reset,
    /// Streaming reached the script's end time.
    Until,
    /// Host input ran out before setup finished.
    InputEnded,
}

/// What the device wrote during one session.
#[derive(Debug)]
pub struct SessionLog {
    /// Setup log text, without the echoed magic.
    pub setup: String,
    pub events: Vec<(u32, Event)>,
    pub ending: Ending,
}

/// Replay `script`, advancing the clock by `step` microseconds per read.
pub fn replay(script: &Script, step: u32) -> Result<Vec<SessionLog>> {
    let clock = SimClock::with_step(0, step);

    let mut link = SimLink::with_clock(clock.clone());
    let mut sends = script.sends.clone();
    sends.sort_by_key(|(at, _)| *at);
    for (at, bytes) in &sends {
        link.send(*at, bytes);
    }

    let mut inputs = SimInputs::new(clock.clone());
    inputs.set_interrupt_pins(&INTERRUPT_PINS);
    inputs.set_reserved_pins(&RESERVED_PINS);
    let mut changes = script.changes.clone();
    changes.sort_by_key(|(at, _, _)| *at);
    for (at, pin, active) in changes {
        inputs.schedule(at, pin, active);
    }

    let mut device = Device::new(link, inputs, clock);
    let shared = SharedScanner::new();
    let end = script.end();
    let mut sessions = Vec::new();

    loop {
        match device.handshake() {
            Ok(_) => {}
            Err(SimError::Exhausted) => break,
        }

        let session = match device.configure() {
            Ok(Setup::Finished(session)) => session,
            Ok(Setup::Reset) => {
                sessions.push(SessionLog {
                    setup: setup_text(&mut device)?,
                    events: Vec::new(),
                    ending: Ending::Reset,
                });
                continue;
            }
            Err(SimError::Exhausted) => {
                sessions.push(SessionLog {
                    setup: setup_text(&mut device)?,
                    events: Vec::new(),
                    ending: Ending::InputEnded,
                });
                break;
            }
        };

        let engine = device.activate(session);
        if shared.install(engine).is_err() {
            bail!("scan engine is busy");
        }
        let setup = setup_text(&mut device)?;

        let ending = loop {
            if timer::reached(device.clock().now(), end) {
                break Ending::Until;
            }
            if device.poll(&shared)? == Poll::Reset {
                break Ending::Reset;
            }
        };
        device.teardown(&shared);

        let events = device
            .link_mut()
            .take_timed_output()
            .into_iter()
            .map(|(at, byte)| (at, Event::from_byte(byte)))
            .collect();
        sessions.push(SessionLog {
            setup,
            events,
            ending,
        });

        if ending == Ending::Until {
            break;
        }
    }

    Ok(sessions)
}

fn setup_text(device: &mut SimDevice) -> Result<String> {
    let bytes = device.link_mut().take_output();
    let Some(log) = bytes.strip_prefix(&MAGIC[..]) else {
        bail!("device did not echo the magic sequence");
    };
    Ok(String::from_utf8_lossy(log).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::parse_script;

    #[test]
    fn test_replay_press_and_release() {
        let script = parse_script(
            "at 0 send 00 11 magic\n\
             at 0 send AD 00 01 05\n\
             at 0 send DB 00 04 00 00 07 D0\n\
             at 0 send 0F 00 00\n\
             at 1000 press 5\n\
             at 6000 release 5\n\
             until 12000\n",
        )
        .unwrap();

        let sessions = replay(&script, 10).unwrap();
        assert_eq!(sessions.len(), 1);
        let session = &sessions[0];
        assert!(session
            .setup
            .starts_with("received magic number after 2 bytes of garbage\n"));
        assert!(session.setup.contains("key 0: pin 5\n"));
        assert!(session.setup.contains("debounce 2000 us"));
        assert!(session.setup.ends_with("\n\n"));
        assert_eq!(session.ending, Ending::Until);

        let events: Vec<Event> = session.events.iter().map(|&(_, e)| e).collect();
        assert_eq!(events, [Event::new(0, true), Event::new(0, false)]);
        assert!(session.events[0].0 >= 1000);
        assert!(session.events[1].0 >= 6000);
    }

    #[test]
    fn test_replay_across_resets() {
        let script = parse_script(
            "at 0 send magic AD 00 01 03 EE 00 00\n\
             at 100 send magic AD 00 01 04 0F 00 00\n\
             at 2000 press 4\n\
             at 5000 send EE\n\
             at 5000 send magic\n",
        )
        .unwrap();

        let sessions = replay(&script, 10).unwrap();
        assert_eq!(sessions.len(), 3);

        assert!(sessions[0].setup.contains("setup reset"));
        assert_eq!(sessions[0].ending, Ending::Reset);

        assert!(sessions[1].setup.contains("key 0: pin 4\n"));
        assert_eq!(sessions[1].ending, Ending::Reset);
        assert_eq!(sessions[1].events.len(), 1);
        assert_eq!(sessions[1].events[0].1, Event::new(0, true));

        assert_eq!(sessions[2].ending, Ending::InputEnded);
        assert!(sessions[2].events.is_empty());
    }

    #[test]
    fn test_replay_without_magic_is_empty() {
        let script = parse_script("at 0 send 01 02 03\n").unwrap();
        assert!(replay(&script, 10).unwrap().is_empty());
    }
}
