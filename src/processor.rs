//! Stream processing: file extraction, parsing and value callbacks.

use std::io::{ErrorKind, Read};

use crate::file::SmlFile;
use crate::parser::message::SmlMessage;
use crate::transport::FileExtractor;

/// Number of bytes requested from the input per read.
const CHUNK_SIZE: usize = 128;

/// Reads the SML data stream from `input` and processes all files in it.
///
/// `on_file` is invoked once per extracted file with the raw bytes and the
/// parsed [`SmlFile`], regardless of the checksum outcome. `on_obis` is
/// invoked for every list entry carrying an active power (`W`) or energy
/// (`Wh`) value, with the OBIS identifier, the scaled value and the unit.
///
/// With `stop_at_eof` set, an empty read ends the loop (reading from a
/// capture file); without it, empty and timed-out reads are retried
/// (reading from a serial port, which never reports an end of input).
/// Interrupted and timed-out reads are never treated as errors.
pub fn process<R, F, O>(
    mut input: R,
    stop_at_eof: bool,
    mut on_file: F,
    mut on_obis: O,
) -> std::io::Result<()>
where
    R: Read,
    F: FnMut(&[u8], &SmlFile),
    O: FnMut(&str, f64, &str),
{
    log::debug!("Starting to process the SML data stream.");
    let mut extractor = FileExtractor::new();
    let mut chunk = [0u8; CHUNK_SIZE];

    loop {
        let num_read = match input.read(&mut chunk) {
            Ok(0) if stop_at_eof => break,
            Ok(n) => n,
            Err(e) if matches!(e.kind(), ErrorKind::TimedOut | ErrorKind::Interrupted) => continue,
            Err(e) => return Err(e),
        };
        for file_data in extractor.add_bytes(&chunk[..num_read]) {
            process_file(&file_data, &mut on_file, &mut on_obis);
        }
    }
    Ok(())
}

/// Parses a single framed file and invokes the callbacks for it.
pub fn process_file<F, O>(file_data: &[u8], on_file: &mut F, on_obis: &mut O)
where
    F: FnMut(&[u8], &SmlFile),
    O: FnMut(&str, f64, &str),
{
    let sml_file = SmlFile::new(file_data);
    on_file(file_data, &sml_file);

    for message in &sml_file.messages {
        let SmlMessage::GetListResponse(response) = message else {
            continue;
        };
        for entry in &response.list_entries {
            let Some(unit) = entry.unit() else { continue };
            if unit != "W" && unit != "Wh" {
                continue;
            }
            let Some(value) = entry.value.as_f64() else {
                continue;
            };
            let scaled = value * 10f64.powi(entry.scaler.unwrap_or(0) as i32);
            on_obis(&entry.obj_name, scaled, &unit);
        }
    }
}
