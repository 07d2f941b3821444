//! Command line entry point of the `powercounter` application.

use clap::Parser;
use std::process::ExitCode;

mod capture;
mod cli;
mod logging;
mod mqtt;
mod print;
mod publish;
mod serial;

use cli::{Cli, Command};

fn main() -> ExitCode {
    let cli = Cli::parse();
    logging::init(&cli);

    let result = match &cli.command {
        Command::Capture(cmd) => capture::run(&cli, cmd),
        Command::Print => print::run(&cli),
        Command::Publish(cmd) => publish::run(&cli, cmd),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}
