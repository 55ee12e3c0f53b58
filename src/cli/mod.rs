//! Command-line maintenance surface
//!
//! Provides:
//! - track: run one comparison cycle from two snapshot files
//! - query / report / related: read stored history
//! - health / maintain / validate: storage upkeep for an external scheduler

mod args;
mod commands;
mod errors;
mod io;

pub use args::{Cli, Command, ConfigArg};
pub use commands::{run_command, track};
pub use errors::{CliError, CliResult};
pub use io::{error_envelope, success_envelope, write_error, write_response};

/// Parses arguments, runs the command and prints its JSON envelope.
///
/// On failure the error envelope is printed and the error returned, so the
/// caller can exit non-zero.
pub async fn run() -> CliResult<()> {
    let cli = Cli::parse_args();
    match run_command(cli.command).await {
        Ok(data) => write_response(&data),
        Err(err) => {
            write_error(err.code(), &err.to_string())?;
            Err(err)
        }
    }
}
