//! Command trait and report rendering for the islet CLI.
//!
//! Every subcommand builds a report. `run` prints it either as text or,
//! with `--json`, as a single JSON document on stdout.

use serde::Serialize;

use crate::config::Config;
use crate::error::Result;

/// Standard command trait that all islet commands implement.
pub trait Command: Sized {
    /// The arguments type for this command.
    type Args;

    /// The report printed when the command succeeds.
    type Output: Report;

    /// Create a new command instance from its arguments and the configuration.
    fn new(args: Self::Args, config: &Config) -> Result<Self>;

    /// Execute the command.
    fn execute(&self) -> Result<Self::Output>;

    /// Get the command name.
    fn name() -> &'static str;
}

/// Output of a command
pub trait Report: Serialize {
    /// Human-readable form, one item per line
    fn render(&self) -> String;
}

/// Build, execute and print command `C`
pub fn run<C: Command>(args: C::Args, config: &Config, json: bool) -> Result<()> {
    let command = C::new(args, config)?;
    tracing::debug!("running {}", C::name());
    let report = command.execute()?;
    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("{}", report.render());
    }
    Ok(())
}
