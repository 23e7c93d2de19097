//! Command-line arguments.

#![allow(clippy::unwrap_used)] // Tests use unwrap for brevity

use anyhow::{anyhow, bail, Context, Result};
use std::path::PathBuf;

pub const USAGE: &str = "\
Usage: cadence <FILE> [OPTIONS]

Options:
  --speed <FACTOR>   Playback speed, 0.5 to 100 (default from config)
  --seek <MS>        Jump to a position once playback has started
  --config <PATH>    Read settings from this JSON file
  -h, --help         Show this help";

/// Parsed command line.
#[derive(Debug, Clone, PartialEq)]
pub struct Options {
    pub file: PathBuf,
    pub speed: Option<f64>,
    pub seek_ms: Option<i64>,
    pub config: Option<PathBuf>,
}

/// What the user asked for.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Play(Options),
    Help,
}

/// Parse arguments, excluding the program name.
pub fn parse<I>(args: I) -> Result<Command>
where
    I: IntoIterator<Item = String>,
{
    let mut args = args.into_iter();
    let mut file = None;
    let mut speed = None;
    let mut seek_ms = None;
    let mut config = None;

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "-h" | "--help" => return Ok(Command::Help),
            "--speed" => {
                let value = value_of(&mut args, "--speed")?;
                speed = Some(
                    value
                        .parse::<f64>()
                        .with_context(|| format!("invalid speed '{value}'"))?,
                );
            }
            "--seek" => {
                let value = value_of(&mut args, "--seek")?;
                seek_ms = Some(
                    value
                        .parse::<i64>()
                        .with_context(|| format!("invalid seek position '{value}'"))?,
                );
            }
            "--config" => config = Some(PathBuf::from(value_of(&mut args, "--config")?)),
            flag if flag.starts_with("--") => bail!("unknown option '{flag}'"),
            path => {
                if file.replace(PathBuf::from(path)).is_some() {
                    bail!("only one file can be played at a time");
                }
            }
        }
    }

    let file = file.ok_or_else(|| anyhow!("no file given"))?;
    Ok(Command::Play(Options {
        file,
        speed,
        seek_ms,
        config,
    }))
}

fn value_of(args: &mut impl Iterator<Item = String>, flag: &str) -> Result<String> {
    args.next()
        .ok_or_else(|| anyhow!("{flag} needs a value"))
}
