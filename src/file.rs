//! SML file representation.

use crate::parser::decode_field;
use crate::parser::message::{RawMessage, SmlMessage};
use crate::util::crc16;

const ESCAPE_SEQUENCE: [u8; 4] = [0x1b, 0x1b, 0x1b, 0x1b];
const DOUBLED_ESCAPE: [u8; 8] = [0x1b; 8];

/// Minimum size of a file: start sequence plus end sequence.
const MIN_FILE_LEN: usize = 16;

/// A complete SML file as extracted by
/// [`FileExtractor`](crate::transport::FileExtractor).
///
/// Constructing an `SmlFile` collapses the doubled escape sequences,
/// verifies the file checksum and, if it matches, extracts and verifies
/// the contained messages. A file with an invalid checksum is kept (with
/// [`valid_crc`](SmlFile::valid_crc) set to `false`) but carries no
/// messages.
#[derive(Debug, Clone)]
pub struct SmlFile {
    /// the file bytes with doubled escape sequences collapsed
    pub data: Vec<u8>,
    /// whether the trailing checksum matched the file content
    pub valid_crc: bool,
    /// the typed messages of the file, in transmission order
    pub messages: Vec<SmlMessage>,
}

impl SmlFile {
    /// Parses a framed SML file (start sequence up to and including the
    /// end sequence).
    pub fn new(raw: &[u8]) -> SmlFile {
        log::debug!("Parsing an SML file of {} raw bytes.", raw.len());
        let data = collapse_escapes(raw);
        let mut file = SmlFile {
            data,
            valid_crc: false,
            messages: Vec::new(),
        };
        file.check_crc();
        if file.valid_crc {
            file.extract_messages();
        }
        file
    }

    /// Checks the trailing file checksum: the big-endian CRC-16/X-25 of
    /// everything before it.
    fn check_crc(&mut self) {
        if self.data.len() < MIN_FILE_LEN {
            log::error!("SML file of {} bytes is too short!", self.data.len());
            return;
        }
        let crc_index = self.data.len() - 2;
        let calculated = crc16(&self.data[..crc_index]);
        let provided = u16::from_be_bytes([self.data[crc_index], self.data[crc_index + 1]]);
        self.valid_crc = calculated == provided;

        if !self.valid_crc {
            log::error!(
                "SML file has invalid CRC! Calculated: 0x{:04x}, provided: 0x{:04x}!",
                calculated,
                provided
            );
        }
    }

    /// Decodes the messages between the start and end sequences.
    ///
    /// Messages failing their checksum or the six-field shape are dropped
    /// individually; a field that cannot be decoded at all ends the
    /// extraction (the following byte offsets would be meaningless).
    fn extract_messages(&mut self) {
        let end_index = self.data.len() - 8;
        let mut read_index = 8; // skip escape and version sequence

        while read_index < end_index {
            let start_index = read_index;
            let field = match decode_field(&self.data, read_index) {
                Ok((next, field)) => {
                    read_index = next;
                    field
                }
                Err(e) => {
                    log::error!(
                        "Can't decode field at index {}: {}! Skipping the rest of the file.",
                        read_index,
                        e
                    );
                    break;
                }
            };
            let Some(raw_message) = RawMessage::from_field(&field) else {
                continue;
            };
            match raw_message.crc16 {
                Some(provided) => {
                    // the last four bytes hold the checksum field and the
                    // end-of-message marker and are not covered themselves
                    let crc_end = read_index - 4;
                    let calculated = crc16(&self.data[start_index..crc_end]);
                    if calculated != provided {
                        log::error!(
                            "Calculated message CRC is 0x{:04x}, but provided is 0x{:04x}!",
                            calculated,
                            provided
                        );
                        continue;
                    }
                }
                None => log::warn!("No message CRC provided!"),
            }
            if let Some(message) = SmlMessage::from_raw(&raw_message) {
                self.messages.push(message);
            }
        }
    }
}

/// Replaces every doubled escape sequence by a single one.
fn collapse_escapes(raw: &[u8]) -> Vec<u8> {
    let mut data = Vec::with_capacity(raw.len());
    let mut idx = 0;
    while idx < raw.len() {
        if raw[idx..].starts_with(&DOUBLED_ESCAPE) {
            data.extend_from_slice(&ESCAPE_SEQUENCE);
            idx += DOUBLED_ESCAPE.len();
        } else {
            data.push(raw[idx]);
            idx += 1;
        }
    }
    data
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::message::{EntryValue, SmlTime};
    use hex_literal::hex;

    /// Appends checksum field and end-of-message marker to encoded
    /// message fields.
    fn finish_message(mut msg: Vec<u8>) -> Vec<u8> {
        let crc = crc16(&msg);
        msg.push(0x63);
        msg.extend_from_slice(&crc.to_be_bytes());
        msg.push(0x00);
        msg
    }

    /// Wraps encoded messages into a framed file with padding and
    /// checksum.
    fn wrap_file(body: &[u8]) -> Vec<u8> {
        let mut raw = hex!("1b1b1b1b 01010101").to_vec();
        raw.extend_from_slice(body);
        let padding = (4 - raw.len() % 4) % 4;
        raw.resize(raw.len() + padding, 0x00);
        raw.extend_from_slice(&[0x1b, 0x1b, 0x1b, 0x1b, 0x1a, padding as u8]);
        let crc = crc16(&raw);
        raw.extend_from_slice(&crc.to_be_bytes());
        raw
    }

    fn close_response_message() -> Vec<u8> {
        let mut msg = vec![0x76];
        msg.extend_from_slice(&hex!("04 DD4344")); // transaction id
        msg.extend_from_slice(&hex!("6200")); // group number
        msg.extend_from_slice(&hex!("6200")); // abort on error
        msg.extend_from_slice(&hex!("72 63 0201 71 01")); // body: CloseResponse
        finish_message(msg)
    }

    fn get_list_response_message() -> Vec<u8> {
        let mut msg = vec![0x76];
        msg.extend_from_slice(&hex!("04 DD4345"));
        msg.extend_from_slice(&hex!("6200"));
        msg.extend_from_slice(&hex!("6200"));
        msg.extend_from_slice(&hex!("72 63 0701")); // body: GetListResponse
        msg.extend_from_slice(&hex!("77")); // seven response fields
        msg.push(0x01); // client id
        msg.extend_from_slice(&hex!("03 0A01")); // server id
        msg.push(0x01); // list name
        msg.push(0x01); // act sensor time
        msg.extend_from_slice(&hex!("71")); // one list entry
        msg.extend_from_slice(&hex!("77")); // seven entry fields
        msg.extend_from_slice(&hex!("07 0100010800FF")); // obj name
        msg.push(0x01); // status
        msg.push(0x01); // val time
        msg.extend_from_slice(&hex!("62 1E")); // unit: Wh
        msg.extend_from_slice(&hex!("52 FF")); // scaler: -1
        msg.extend_from_slice(&hex!("63 3039")); // value: 12345
        msg.push(0x01); // value signature
        msg.push(0x01); // list signature
        msg.push(0x01); // act gateway time
        finish_message(msg)
    }

    #[test]
    fn close_response_file() {
        let file = SmlFile::new(&wrap_file(&close_response_message()));
        assert!(file.valid_crc);
        assert_eq!(file.messages.len(), 1);
        assert!(matches!(file.messages[0], SmlMessage::CloseResponse(_)));
    }

    #[test]
    fn get_list_response_file() {
        let file = SmlFile::new(&wrap_file(&get_list_response_message()));
        assert!(file.valid_crc);
        assert_eq!(file.messages.len(), 1);
        let SmlMessage::GetListResponse(msg) = &file.messages[0] else {
            panic!("expected a GetListResponse, got {:?}", file.messages[0]);
        };
        assert_eq!(msg.server_id, vec![0x0A, 0x01]);
        assert_eq!(msg.list_entries.len(), 1);
        let entry = &msg.list_entries[0];
        assert_eq!(entry.obj_name, "1-0:1.8.0*255");
        assert_eq!(entry.unit(), Some(String::from("Wh")));
        assert_eq!(entry.scaler, Some(-1));
        assert_eq!(entry.value, EntryValue::Uint(12345));
    }

    #[test]
    fn multiple_messages_in_one_file() {
        let mut body = close_response_message();
        body.extend_from_slice(&get_list_response_message());
        let file = SmlFile::new(&wrap_file(&body));
        assert!(file.valid_crc);
        assert_eq!(file.messages.len(), 2);
        assert!(matches!(file.messages[0], SmlMessage::CloseResponse(_)));
        assert!(matches!(file.messages[1], SmlMessage::GetListResponse(_)));
    }

    #[test]
    fn invalid_file_crc_drops_all_messages() {
        let mut raw = wrap_file(&close_response_message());
        let last = raw.len() - 1;
        raw[last] ^= 0xFF;
        let file = SmlFile::new(&raw);
        assert!(!file.valid_crc);
        assert!(file.messages.is_empty());
    }

    #[test]
    fn invalid_message_crc_drops_that_message() {
        let mut bad = close_response_message();
        // flip a bit in the transaction id, leaving the message checksum stale
        bad[2] ^= 0x01;
        let mut body = bad;
        body.extend_from_slice(&get_list_response_message());
        let file = SmlFile::new(&wrap_file(&body));
        assert!(file.valid_crc);
        assert_eq!(file.messages.len(), 1);
        assert!(matches!(file.messages[0], SmlMessage::GetListResponse(_)));
    }

    #[test]
    fn missing_message_crc_is_accepted() {
        let mut msg = vec![0x76];
        msg.extend_from_slice(&hex!("04 DD4344"));
        msg.extend_from_slice(&hex!("6200"));
        msg.extend_from_slice(&hex!("6200"));
        msg.extend_from_slice(&hex!("72 63 0201 71 01"));
        msg.push(0x01); // no checksum provided
        msg.push(0x00); // end of message
        let file = SmlFile::new(&wrap_file(&msg));
        assert!(file.valid_crc);
        assert_eq!(file.messages.len(), 1);
    }

    #[test]
    fn doubled_escape_sequences_are_collapsed() {
        assert_eq!(
            collapse_escapes(&hex!("00 1b1b1b1b 1b1b1b1b 1a010203")),
            hex!("00 1b1b1b1b 1a010203")
        );
        // only complete doubles are collapsed
        assert_eq!(
            collapse_escapes(&hex!("1b1b1b1b 1a010203")),
            hex!("1b1b1b1b 1a010203")
        );
    }

    #[test]
    fn escaped_file_content_round_trips() {
        // message whose transaction id contains a literal escape sequence
        let mut msg = vec![0x76];
        msg.extend_from_slice(&hex!("05 1b1b1b1b")); // transaction id
        msg.extend_from_slice(&hex!("6200"));
        msg.extend_from_slice(&hex!("6200"));
        msg.extend_from_slice(&hex!("72 63 0201 71 01"));
        let msg = finish_message(msg);

        // build the collapsed form first (checksums cover collapsed data),
        // then expand the in-body escape sequence for transmission
        let collapsed = wrap_file(&msg);
        let mut raw = collapsed[..9].to_vec(); // start sequence + list header
        raw.extend_from_slice(&hex!("05 1b1b1b1b 1b1b1b1b"));
        raw.extend_from_slice(&collapsed[14..]);

        let file = SmlFile::new(&raw);
        assert_eq!(file.data, collapsed);
        assert!(file.valid_crc);
        assert_eq!(file.messages.len(), 1);
    }

    #[test]
    fn short_input_is_rejected() {
        let file = SmlFile::new(&hex!("1b1b1b1b 0101"));
        assert!(!file.valid_crc);
        assert!(file.messages.is_empty());
    }

    #[test]
    fn open_response_round_trip() {
        let mut msg = vec![0x76];
        msg.extend_from_slice(&hex!("04 DD4343"));
        msg.extend_from_slice(&hex!("6200"));
        msg.extend_from_slice(&hex!("6200"));
        msg.extend_from_slice(&hex!("72 63 0101")); // body: OpenResponse
        msg.extend_from_slice(&hex!("76")); // six response fields
        msg.push(0x01); // codepage
        msg.push(0x01); // client id
        msg.extend_from_slice(&hex!("05 0021171B")); // req file id
        msg.extend_from_slice(&hex!("03 4953")); // server id
        msg.extend_from_slice(&hex!("72 6201 65 0021155A")); // ref time
        msg.extend_from_slice(&hex!("6201")); // version 1
        let file = SmlFile::new(&wrap_file(&finish_message(msg)));
        assert!(file.valid_crc);
        let SmlMessage::OpenResponse(msg) = &file.messages[0] else {
            panic!("expected an OpenResponse, got {:?}", file.messages[0]);
        };
        assert_eq!(msg.codepage, "iso-8859-15");
        assert_eq!(msg.req_file_id, hex!("0021171B"));
        assert_eq!(msg.server_id, hex!("4953"));
        assert_eq!(msg.ref_time, Some(SmlTime::SecIndex(0x0021155A)));
        assert_eq!(msg.sml_version, 1);
    }
}
