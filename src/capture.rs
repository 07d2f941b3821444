//! The `capture` subcommand: raw serial data into a file.

use std::fs::File;
use std::io::{ErrorKind, Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};

use crate::cli::{CaptureCmd, Cli};
use crate::serial;

pub fn run(cli: &Cli, cmd: &CaptureCmd) -> Result<()> {
    println!(
        "Saving data into file {}. Press Ctrl-C to stop.",
        cmd.output_file.display()
    );

    let mut port = serial::open_serial(&cli.device)?;
    let mut output = File::create(&cmd.output_file)
        .with_context(|| format!("can't create output file {}", cmd.output_file.display()))?;

    let stop = Arc::new(AtomicBool::new(false));
    let handler_stop = Arc::clone(&stop);
    ctrlc::set_handler(move || handler_stop.store(true, Ordering::SeqCst))
        .context("can't install the Ctrl-C handler")?;

    let mut num_bytes = 0usize;
    let mut chunk = [0u8; 64];
    while !stop.load(Ordering::SeqCst) {
        let num_read = match port.read(&mut chunk) {
            Ok(n) => n,
            Err(e) if matches!(e.kind(), ErrorKind::TimedOut | ErrorKind::Interrupted) => continue,
            Err(e) => return Err(e).context("reading from the serial port failed"),
        };
        output
            .write_all(&chunk[..num_read])
            .context("writing the capture file failed")?;
        num_bytes += num_read;
        print!("Read {} bytes...\r", num_bytes);
        let _ = std::io::stdout().flush();
    }

    println!("\n\nFinishing capture.");
    Ok(())
}
