//! Decoder for SML (Smart Message Language) power meter telegrams.
//!
//! Electricity meters with an infrared interface send a continuous byte
//! stream over a serial link. This crate reconstructs the SML files
//! contained in that stream, parses them into typed messages and hands the
//! OBIS-coded measurement values to callbacks.
//!
//! The pipeline consists of three stages:
//!
//! - [`transport::FileExtractor`] recovers complete SML files from an
//!   arbitrarily chunked byte stream, handling the start/end sequences and
//!   doubled escape sequences.
//! - [`file::SmlFile`] collapses the escape sequences, verifies the file
//!   and per-message checksums and binds the contained messages to
//!   [`parser::message::SmlMessage`] values.
//! - [`processor::process`] drives both stages from a `std::io::Read`
//!   source and invokes the file and OBIS value callbacks.
//!
//! # Examples
//!
//! ```no_run
//! use std::fs::File;
//!
//! let input = File::open("capture.dat")?;
//! powercounter::process(
//!     input,
//!     true,
//!     |_file_data, _sml_file| {},
//!     |obis, value, unit| println!("{}: {:.3} {}", obis, value, unit),
//! )?;
//! # Ok::<(), std::io::Error>(())
//! ```

pub mod file;
pub mod parser;
pub mod processor;
pub mod transport;
pub mod util;

pub use file::SmlFile;
pub use parser::message::SmlMessage;
pub use processor::process;
pub use transport::FileExtractor;
