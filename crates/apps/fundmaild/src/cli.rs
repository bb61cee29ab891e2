//! Command-line parsing

use anyhow::{Context, Result, bail};
use chrono::NaiveDate;
use std::path::PathBuf;

pub const USAGE: &str = "\
Usage: fundmaild [--config <path>] [command]

Commands:
  run                        Ingest on a fixed interval until a cycle fails (default)
  once                       Run a single checkpointed cycle
  day [--date YYYY-MM-DD]    Ingest one local day (default today); checkpoint untouched
  replicate --date YYYY-MM-DD
                             Copy one day's database and attachments to the replica
  help                       Show this message
";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Run,
    Once,
    Day(Option<NaiveDate>),
    Replicate(NaiveDate),
    Help,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cli {
    pub config: Option<PathBuf>,
    pub command: Command,
}

/// Parse arguments (without the program name)
pub fn parse<I>(args: I) -> Result<Cli>
where
    I: IntoIterator<Item = String>,
{
    let mut config = None;
    let mut date = None;
    let mut command = None;

    let mut args = args.into_iter();
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" | "-c" => {
                let path = args.next().context("--config needs a path")?;
                config = Some(PathBuf::from(path));
            }
            "--date" | "-d" => {
                let value = args.next().context("--date needs a value")?;
                date = Some(parse_date(&value)?);
            }
            "--help" | "-h" => command = Some("help".to_string()),
            other if other.starts_with('-') => bail!("Unknown option: {}", other),
            other => {
                if let Some(previous) = &command {
                    bail!("Unexpected argument {} after command {}", other, previous);
                }
                command = Some(other.to_string());
            }
        }
    }

    let command = match command.as_deref().unwrap_or("run") {
        "run" => Command::Run,
        "once" => Command::Once,
        "day" => Command::Day(date),
        "replicate" => Command::Replicate(date.context("replicate needs --date YYYY-MM-DD")?),
        "help" => Command::Help,
        other => bail!("Unknown command: {}", other),
    };

    if date.is_some() && !matches!(command, Command::Day(_) | Command::Replicate(_)) {
        bail!("--date only applies to the day and replicate commands");
    }

    Ok(Cli { config, command })
}

fn parse_date(value: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .with_context(|| format!("Invalid date {:?}, expected YYYY-MM-DD", value))
}
