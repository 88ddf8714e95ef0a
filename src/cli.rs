//! Command-line flags

use std::path::PathBuf;

use thiserror::Error;

use crate::settings::DEFAULT_SETTINGS_PATH;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CliError {
    #[error("missing value for {0}")]
    MissingValue(String),

    #[error("unknown argument: {0}")]
    Unknown(String),
}

/// Parsed command line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Args {
    /// HTTP listen address, overrides `listen_address` from the settings
    pub listen: Option<String>,
    /// Stream key for this run only; never written back to the settings file
    pub stream_key: Option<String>,
    pub settings_path: PathBuf,
    pub help: bool,
}

impl Default for Args {
    fn default() -> Self {
        Self {
            listen: None,
            stream_key: None,
            settings_path: PathBuf::from(DEFAULT_SETTINGS_PATH),
            help: false,
        }
    }
}

impl Args {
    /// Parse the process arguments, skipping the program name
    pub fn from_env() -> Result<Self, CliError> {
        Self::parse(std::env::args().skip(1))
    }

    pub fn parse<I, S>(args: I) -> Result<Self, CliError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut parsed = Args::default();
        let mut args = args.into_iter().map(Into::into);

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "-h" | "--help" => parsed.help = true,
                "-l" | "--listen" => parsed.listen = Some(value(&arg, args.next())?),
                "-k" | "--key" => parsed.stream_key = Some(value(&arg, args.next())?),
                "-s" | "--settings" => {
                    parsed.settings_path = PathBuf::from(value(&arg, args.next())?)
                }
                _ => return Err(CliError::Unknown(arg)),
            }
        }

        Ok(parsed)
    }
}

fn value(flag: &str, next: Option<String>) -> Result<String, CliError> {
    match next {
        Some(v) if !v.starts_with('-') || v == "-" => Ok(v),
        _ => Err(CliError::MissingValue(flag.to_string())),
    }
}

pub fn usage() -> String {
    format!(
        "Usage: livegate [OPTIONS]

Options:
  -l, --listen <ADDR>     HTTP listen address, e.g. :8089 or 127.0.0.1:8089
  -k, --key <KEY>         Stream key for this run only (not saved)
  -s, --settings <PATH>   Settings file [default: {DEFAULT_SETTINGS_PATH}]
  -h, --help              Print this help

Publish with OBS or ffmpeg to rtmp://<host>/live/<stream key>.
Set RUST_LOG to override the log level from the settings file."
    )
}
