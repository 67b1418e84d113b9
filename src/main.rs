#![allow(clippy::too_many_arguments)]

use std::process::ExitCode;

use clap::Parser;
use latentdrag::cli;

fn main() -> ExitCode {
    // cli::run opens the session log itself so --log can redirect it.
    let args = cli::CliArgs::parse();
    cli::run(args)
}
