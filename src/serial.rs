//! Serial port handling and input stream selection.

use std::fs::File;
use std::io::Read;
use std::time::Duration;

use anyhow::{Context, Result};
use serialport::{ClearBuffer, DataBits, Parity, SerialPort, StopBits};

use crate::cli::Cli;

/// Read timeout of the serial port. The processing loops treat timed-out
/// reads as empty reads, so this only bounds how often they wake up.
const READ_TIMEOUT: Duration = Duration::from_millis(500);

/// Opens the serial port at 9600 baud, 8N1, with flushed buffers.
pub fn open_serial(device: &str) -> Result<Box<dyn SerialPort>> {
    log::debug!("Opening serial port {} at baud rate 9600 and 8N1.", device);
    let port = serialport::new(device, 9600)
        .data_bits(DataBits::Eight)
        .parity(Parity::None)
        .stop_bits(StopBits::One)
        .timeout(READ_TIMEOUT)
        .open()
        .with_context(|| format!("can't open serial device {}", device))?;
    port.clear(ClearBuffer::All)
        .with_context(|| format!("can't flush the buffers of serial device {}", device))?;
    log::debug!("Serial port opened.");
    Ok(port)
}

/// Returns the configured input file or, if none was given, the serial
/// port. The second value tells whether the stream is finite.
pub fn open_input(cli: &Cli) -> Result<(Box<dyn Read>, bool)> {
    match &cli.input_file {
        Some(path) => {
            log::debug!("Opening specified input file {}.", path.display());
            let file = File::open(path)
                .with_context(|| format!("can't open input file {}", path.display()))?;
            Ok((Box::new(file), true))
        }
        None => {
            let port = open_serial(&cli.device)?;
            Ok((Box::new(port), false))
        }
    }
}
