mod replay;
mod script;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serkey_core::Event;
use std::fs;

use replay::Ending;

#[derive(Parser)]
#[command(name = "serkey-cli")]
#[command(about = "Host-side tools for the SerKey key reporter")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Replay a scripted host session against the device core
    Replay {
        /// Path to the replay script
        script: String,
        /// Microseconds the simulated clock advances per read
        #[arg(long, default_value_t = 10)]
        step: u32,
    },
    /// Decode event bytes (hex) into key changes
    Decode {
        /// Event bytes, e.g. `80 03 0x85`
        #[arg(required = true)]
        bytes: Vec<String>,
    },
}

fn describe(event: Event) -> String {
    format!(
        "key {} {}  (0x{:02X})",
        event.index,
        if event.active { "down" } else { "up" },
        event.to_byte()
    )
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Replay { script: path, step } => {
            let contents =
                fs::read_to_string(&path).with_context(|| format!("reading {}", path))?;
            let parsed = script::parse_script(&contents).context("parsing replay script")?;

            let sessions = replay::replay(&parsed, step)?;
            if sessions.is_empty() {
                println!("Device never saw the magic sequence.");
            }
            for (number, session) in sessions.iter().enumerate() {
                println!("== session {} ==", number + 1);
                print!("{}", session.setup);
                for (at, event) in &session.events {
                    println!("{:>10}  {}", at, describe(*event));
                }
                match session.ending {
                    Ending::Reset => println!("-- reset"),
                    Ending::Until => println!("-- end of script"),
                    Ending::InputEnded => println!("-- host input ended during setup"),
                }
            }
        }
        Command::Decode { bytes } => {
            for word in &bytes {
                let byte = script::parse_hex_byte(word)?;
                println!("{}", describe(Event::from_byte(byte)));
            }
        }
    }

    Ok(())
}
