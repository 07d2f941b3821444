//! SML transport protocol (version 1).
//!
//! Version 1 of the SML transport protocol encodes binary SML files using
//! escape sequences. A transmission consists of the following parts
//! (numbers in hex):
//!
//! - **Start sequence**: `1b1b1b1b 01010101`
//! - **Escaped data**: the file content. If the escape sequence
//!   (`1b1b1b1b`) occurs in the data, it is escaped by another escape
//!   sequence. For example, the data `001b1b1b 1b010203` is transmitted as
//!   `001b1b1b 1b1b1b1b 1b010203`.
//! - **Padding**: the data is zero-padded to the next multiple of four.
//! - **End sequence**: `1b1b1b1b 1aXXYYZZ` where `XX` is the number of
//!   padding bytes and `YYZZ` is the CRC-16/X-25 checksum (big-endian) of
//!   everything before it.
//!
//! The [`FileExtractor`] recovers complete transmissions (start sequence up
//! to and including the end sequence) from an arbitrarily chunked byte
//! stream. Fields inside a file are serialized in groups of four bytes, so
//! every escape sequence belonging to the framing is aligned to a four-byte
//! boundary relative to the start sequence. The extractor uses this to tell
//! framing sequences apart from `1b` runs that happen to appear inside
//! field payloads.

const ESCAPE_SEQUENCE: [u8; 4] = [0x1b, 0x1b, 0x1b, 0x1b];
const START_SEQUENCE: [u8; 8] = [0x1b, 0x1b, 0x1b, 0x1b, 0x01, 0x01, 0x01, 0x01];
const DOUBLED_ESCAPE: [u8; 8] = [0x1b; 8];
const END_MARKER: u8 = 0x1a;

/// Upper bound for buffered bytes while no start sequence is in sight.
///
/// Without a bound, a stream that never contains a start sequence would
/// grow the buffer indefinitely. When the bound is exceeded, only the last
/// seven bytes (a possible start sequence prefix) are kept.
const MAX_PRESTART_BYTES: usize = 64 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    WaitStart,
    WaitEnd,
}

/// Extracts complete SML files from a chunked byte stream.
///
/// Bytes are fed in via [`add_bytes`](FileExtractor::add_bytes), which
/// returns all files completed by the new data. The extractor keeps
/// incomplete data buffered across calls, so the chunking of the input has
/// no influence on the extracted files.
///
/// # Examples
///
/// ```
/// use powercounter::transport::FileExtractor;
///
/// let mut extractor = FileExtractor::new();
/// assert!(extractor.add_bytes(&[0x1b, 0x1b, 0x1b, 0x1b]).is_empty());
/// assert!(extractor.add_bytes(&[0x01, 0x01, 0x01, 0x01]).is_empty());
/// assert!(extractor.add_bytes(&[0x76, 0x01, 0x01, 0x01]).is_empty());
/// let files = extractor.add_bytes(&[0x1b, 0x1b, 0x1b, 0x1b, 0x1a, 0x01, 0x02, 0x03]);
/// assert_eq!(files.len(), 1);
/// assert_eq!(files[0].len(), 20);
/// ```
pub struct FileExtractor {
    state: State,
    buffer: Vec<u8>,
    alignment: usize,
}

impl Default for FileExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl FileExtractor {
    /// Creates an extractor using the regular four-byte alignment for end
    /// sequence scanning.
    #[must_use]
    pub fn new() -> FileExtractor {
        Self::with_alignment(4)
    }

    /// Creates an extractor with a custom scan alignment.
    ///
    /// A small number of devices violate the four-byte group rule; an
    /// alignment of 1 scans every offset.
    #[must_use]
    pub fn with_alignment(alignment: usize) -> FileExtractor {
        log::debug!("Initialize file extractor with alignment {}.", alignment);
        FileExtractor {
            state: State::WaitStart,
            buffer: Vec::new(),
            alignment: alignment.max(1),
        }
    }

    /// Adds the given bytes to the internal buffer and returns all SML
    /// files completed by them. The returned byte ranges include the start
    /// and end sequences.
    pub fn add_bytes(&mut self, new_bytes: &[u8]) -> Vec<Vec<u8>> {
        log::debug!("Adding {} bytes to the internal buffer.", new_bytes.len());
        self.buffer.extend_from_slice(new_bytes);
        let mut files = Vec::new();
        let mut extracted = true;

        while extracted {
            extracted = false;

            if self.state == State::WaitStart {
                match find(&self.buffer, &START_SEQUENCE, 0) {
                    Some(idx) => {
                        log::debug!(
                            "Found start of a file at index {}. Shrinking buffer to start with the start sequence.",
                            idx
                        );
                        self.buffer.drain(..idx);
                        self.state = State::WaitEnd;
                    }
                    None => {
                        if self.buffer.len() > MAX_PRESTART_BYTES {
                            let keep = START_SEQUENCE.len() - 1;
                            let discard = self.buffer.len() - keep;
                            log::debug!("Discarding {} buffered bytes without a start sequence.", discard);
                            self.buffer.drain(..discard);
                        }
                    }
                }
            }

            if self.state == State::WaitEnd {
                let mut candidate = self.find_aligned(8);
                while let Some(idx) = candidate {
                    // the end sequence is eight bytes; wait for more data
                    // if it isn't complete yet
                    if idx + 8 > self.buffer.len() {
                        break;
                    }
                    let tail = &self.buffer[idx..];

                    if tail.starts_with(&DOUBLED_ESCAPE) {
                        log::debug!("Skipping doubled escape sequence at index {}.", idx);
                        candidate = self.find_aligned(idx + 8);
                        continue;
                    }
                    if tail[4] == END_MARKER {
                        log::debug!("End sequence found at index {}. Extracting file of {} bytes.", idx, idx + 8);
                        let file: Vec<u8> = self.buffer.drain(..idx + 8).collect();
                        files.push(file);
                        self.state = State::WaitStart;
                        extracted = true;
                        break;
                    }
                    if tail.starts_with(&START_SEQUENCE) {
                        log::error!("Expected end sequence but found start sequence at index {}!", idx);
                        self.buffer.drain(..idx);
                        candidate = self.find_aligned(8);
                        continue;
                    }

                    log::error!(
                        "Found escape sequence at index {} that is not followed by another escape sequence, an end marker or a start sequence!",
                        idx
                    );
                    candidate = self.find_aligned(idx + 4);
                }
            }
        }

        log::debug!(
            "Returning {} extracted files. {} bytes remain in the internal buffer.",
            files.len(),
            self.buffer.len()
        );
        files
    }

    /// Finds the next escape sequence at or after `from` whose offset is a
    /// multiple of the scan alignment.
    fn find_aligned(&self, from: usize) -> Option<usize> {
        let mut idx = find(&self.buffer, &ESCAPE_SEQUENCE, from)?;
        loop {
            let offset = idx % self.alignment;
            if offset == 0 {
                return Some(idx);
            }
            idx = find(&self.buffer, &ESCAPE_SEQUENCE, idx + (self.alignment - offset))?;
        }
    }
}

fn find(haystack: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    if from > haystack.len() {
        return None;
    }
    haystack[from..]
        .windows(needle.len())
        .position(|w| w == needle)
        .map(|pos| from + pos)
}
