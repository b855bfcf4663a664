//! Defines the bridge's CLI through clap types.

mod serve;

use std::str::FromStr;

use clap::Parser;
use thiserror::Error;

pub use self::serve::ServeCommand;

/// Command line options that extedit accepts, defined using the clap crate.
#[derive(Debug, Parser)]
#[clap(name = "extedit", version, about)]
pub struct Options {
    #[clap(flatten)]
    pub global: GlobalOptions,

    /// Subcommand to run in this invocation.
    #[clap(subcommand)]
    pub subcommand: Subcommand,
}

impl Options {
    pub fn run(self) -> anyhow::Result<()> {
        match self.subcommand {
            Subcommand::Serve(subcommand) => subcommand.run(),
        }
    }
}

#[derive(Debug, Parser)]
pub struct GlobalOptions {
    /// Sets verbosity level. Can be specified multiple times.
    #[clap(long("verbose"), short, global(true), action = clap::ArgAction::Count)]
    pub verbosity: u8,

    /// Set color behavior. Valid values are auto, always, and never.
    #[clap(long("color"), global(true), default_value("auto"))]
    pub color: ColorChoice,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColorChoice {
    Auto,
    Always,
    Never,
}

impl FromStr for ColorChoice {
    type Err = ColorChoiceParseError;

    fn from_str(source: &str) -> Result<Self, Self::Err> {
        match source {
            "auto" => Ok(ColorChoice::Auto),
            "always" => Ok(ColorChoice::Always),
            "never" => Ok(ColorChoice::Never),
            _ => Err(ColorChoiceParseError {
                attempted: source.to_owned(),
            }),
        }
    }
}

#[derive(Debug, Error)]
#[error("Invalid color choice '{attempted}'. Valid values are: auto, always, never")]
pub struct ColorChoiceParseError {
    attempted: String,
}

#[derive(Debug, Parser)]
pub enum Subcommand {
    Serve(ServeCommand),
}

impl Subcommand {
    pub fn command_name(&self) -> &'static str {
        match self {
            Subcommand::Serve(_) => "serve",
        }
    }

    /// Directory to write log files to, if this invocation asked for one.
    pub fn log_dir(&self) -> Option<&std::path::Path> {
        match self {
            Subcommand::Serve(cmd) => cmd.log_dir.as_deref(),
        }
    }
}
