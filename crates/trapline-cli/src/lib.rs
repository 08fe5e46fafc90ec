//! Crate implementing the CLI commands.

mod cli;
mod command;
mod config;
mod info;
mod run;

pub use self::cli::{CliAction, CliOpts};
pub use self::command::{BreakLocation, Command, CommandError, parse_address};
pub use self::config::{BreakConfig, DebugConfig};
pub use self::info::evaluate_info;
pub use self::run::evaluate_run;
