use anyhow::{bail, Context, Result};
use serkey_core::MAGIC;

/// A scripted host session: bytes the host sends, switch changes on the
/// device's inputs, and when to stop.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Script {
    /// Host bytes and their arrival time (µs).
    pub sends: Vec<(u32, Vec<u8>)>,
    /// Raw input changes: (time, pin, active).
    pub changes: Vec<(u32, u8, bool)>,
    /// Stop streaming at this time.
    pub until: Option<u32>,
}

/// How long to keep streaming past the last scheduled item when the script
/// has no `until` line.
pub const DEFAULT_TAIL_US: u32 = 100_000;

impl Script {
    /// Time to stop the replay.
    pub fn end(&self) -> u32 {
        self.until.unwrap_or_else(|| {
            let last_send = self.sends.iter().map(|(t, _)| *t);
            let last_change = self.changes.iter().map(|(t, _, _)| *t);
            last_send
                .chain(last_change)
                .max()
                .unwrap_or(0)
                .saturating_add(DEFAULT_TAIL_US)
        })
    }
}

/// Parse a replay script.
///
/// ```text
/// # comment
/// at 0 send magic
/// at 0 send AD 00 01 05
/// at 1500 press 5
/// at 9000 release 5
/// until 20000
/// ```
pub fn parse_script(input: &str) -> Result<Script> {
    let mut script = Script::default();

    for (line_num, line) in input.lines().enumerate() {
        let line = line.split('#').next().unwrap_or("").trim();
        if line.is_empty() {
            continue;
        }
        parse_line(&mut script, line).with_context(|| format!("line {}", line_num + 1))?;
    }

    Ok(script)
}

fn parse_line(script: &mut Script, line: &str) -> Result<()> {
    let mut words = line.split_whitespace();
    match words.next() {
        Some("until") => {
            let time = parse_time(words.next())?;
            if let Some(extra) = words.next() {
                bail!("unexpected '{}' after until", extra);
            }
            script.until = Some(time);
        }
        Some("at") => {
            let time = parse_time(words.next())?;
            match words.next() {
                Some("send") => {
                    let bytes = parse_payload(words)?;
                    if bytes.is_empty() {
                        bail!("send needs at least one byte");
                    }
                    script.sends.push((time, bytes));
                }
                Some(action @ ("press" | "release")) => {
                    let pin = words.next().context("missing pin")?;
                    let pin: u8 = pin.parse().with_context(|| format!("invalid pin '{}'", pin))?;
                    if let Some(extra) = words.next() {
                        bail!("unexpected '{}' after pin", extra);
                    }
                    script.changes.push((time, pin, action == "press"));
                }
                Some(other) => bail!("unknown action '{}'", other),
                None => bail!("missing action after time"),
            }
        }
        Some(other) => bail!("unknown directive '{}'", other),
        None => {}
    }
    Ok(())
}

fn parse_time(word: Option<&str>) -> Result<u32> {
    let word = word.context("missing time")?;
    word.parse()
        .with_context(|| format!("invalid time '{}' (microseconds)", word))
}

fn parse_payload<'a>(words: impl Iterator<Item = &'a str>) -> Result<Vec<u8>> {
    let mut bytes = Vec::new();
    for word in words {
        if word == "magic" {
            bytes.extend_from_slice(&MAGIC);
        } else {
            bytes.push(parse_hex_byte(word)?);
        }
    }
    Ok(bytes)
}

/// Parse one byte written as two hex digits, with or without `0x`.
pub fn parse_hex_byte(word: &str) -> Result<u8> {
    let digits = word.strip_prefix("0x").unwrap_or(word);
    if digits.is_empty() || digits.len() > 2 {
        bail!("invalid byte '{}'", word);
    }
    u8::from_str_radix(digits, 16).with_context(|| format!("invalid hex byte '{}'", word))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_script() {
        let script = parse_script(
            "# setup\n\
             at 0 send magic\n\
             at 0 send AD 00 01 0x05   # add pin 5\n\
             \n\
             at 1500 press 5\n\
             at 9000 release 5\n\
             until 20000\n",
        )
        .unwrap();

        assert_eq!(script.sends.len(), 2);
        assert_eq!(script.sends[0], (0, MAGIC.to_vec()));
        assert_eq!(script.sends[1], (0, vec![0xAD, 0x00, 0x01, 0x05]));
        assert_eq!(script.changes, vec![(1500, 5, true), (9000, 5, false)]);
        assert_eq!(script.until, Some(20000));
        assert_eq!(script.end(), 20000);
    }

    #[test]
    fn test_default_end() {
        let script = parse_script("at 10 send 0F 00 00\nat 700 press 1\n").unwrap();
        assert_eq!(script.end(), 700 + DEFAULT_TAIL_US);
        assert_eq!(Script::default().end(), DEFAULT_TAIL_US);
    }

    #[test]
    fn test_errors_name_the_line() {
        let err = parse_script("at 0 send magic\nat x press 1\n").unwrap_err();
        assert_eq!(err.to_string(), "line 2");
        assert!(format!("{:#}", err).contains("invalid time 'x'"));

        assert!(parse_script("at 0 send\n").is_err());
        assert!(parse_script("at 0 send 123\n").is_err());
        assert!(parse_script("at 0 press 300\n").is_err());
        assert!(parse_script("at 0 wiggle 3\n").is_err());
        assert!(parse_script("later 5\n").is_err());
    }

    #[test]
    fn test_parse_hex_byte() {
        assert_eq!(parse_hex_byte("ff").unwrap(), 0xFF);
        assert_eq!(parse_hex_byte("0x8").unwrap(), 0x08);
        assert!(parse_hex_byte("0x").is_err());
        assert!(parse_hex_byte("zz").is_err());
    }
}
