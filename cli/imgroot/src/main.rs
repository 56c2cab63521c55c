//! imgroot - resolve container images into plain directory trees.

use std::process::ExitCode;

use clap::Parser;

mod commands;
mod error;
mod logging;

use commands::Cli;

fn main() -> ExitCode {
    let cli = Cli::parse();

    logging::init(cli.log_level(), cli.log_format());

    match cli.run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error::print_error(&e);
            ExitCode::FAILURE
        }
    }
}
