//! The `print` subcommand: decoded values on stdout.

use anyhow::{Context, Result};
use powercounter::process;

use crate::cli::Cli;
use crate::serial;

pub fn run(cli: &Cli) -> Result<()> {
    let (input, finite) = serial::open_input(cli)?;
    let verbose = cli.verbose;

    process(
        input,
        finite,
        |file_data, sml_file| {
            if verbose {
                println!("INFO: Extracted a new file of {} bytes:", file_data.len());
                println!("      Extracted {} messages:", sml_file.messages.len());
                for message in &sml_file.messages {
                    println!("{}", message);
                }
            }
        },
        |obis, value, unit| println!("{}: {:.3} {}", obis, value, unit),
    )
    .context("processing the input stream failed")
}
