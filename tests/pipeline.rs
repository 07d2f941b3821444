//! End-to-end tests: generated transmissions through the full pipeline.

use std::io::{self, Read};

use hex_literal::hex;
use powercounter::parser::message::SmlMessage;
use powercounter::util::crc16;
use powercounter::{process, SmlFile};

/// Appends checksum field and end-of-message marker to encoded message
/// fields.
fn finish_message(mut msg: Vec<u8>) -> Vec<u8> {
    let crc = crc16(&msg);
    msg.push(0x63);
    msg.extend_from_slice(&crc.to_be_bytes());
    msg.push(0x00);
    msg
}

/// Wraps encoded messages into a framed transmission with padding and
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

fn open_response_message(transaction: u8) -> Vec<u8> {
    let mut msg = vec![0x76];
    msg.extend_from_slice(&[0x04, 0x00, 0x63, transaction]);
    msg.extend_from_slice(&hex!("6200 6200"));
    msg.extend_from_slice(&hex!("72 63 0101"));
    msg.extend_from_slice(&hex!("76"));
    msg.push(0x01); // codepage
    msg.push(0x01); // client id
    msg.extend_from_slice(&hex!("05 0021171B")); // req file id
    msg.extend_from_slice(&hex!("03 4953")); // server id
    msg.extend_from_slice(&hex!("72 6201 65 0021155A")); // ref time
    msg.extend_from_slice(&hex!("6201")); // version
    finish_message(msg)
}

fn get_list_response_message(transaction: u8, value: &[u8], unit: u8, scaler: i8) -> Vec<u8> {
    let mut msg = vec![0x76];
    msg.extend_from_slice(&[0x04, 0x00, 0x63, transaction]);
    msg.extend_from_slice(&hex!("6200 6200"));
    msg.extend_from_slice(&hex!("72 63 0701"));
    msg.extend_from_slice(&hex!("77"));
    msg.push(0x01); // client id
    msg.extend_from_slice(&hex!("03 4953")); // server id
    msg.push(0x01); // list name
    msg.push(0x01); // act sensor time
    msg.extend_from_slice(&hex!("71 77")); // one entry with seven fields
    msg.extend_from_slice(&hex!("07 0100010800FF")); // obj name
    msg.push(0x01); // status
    msg.push(0x01); // val time
    msg.extend_from_slice(&[0x62, unit]);
    msg.extend_from_slice(&[0x52, scaler as u8]);
    msg.push(0x60 | (1 + value.len() as u8)); // unsigned value header
    msg.extend_from_slice(value);
    msg.push(0x01); // value signature
    msg.push(0x01); // list signature
    msg.push(0x01); // act gateway time
    finish_message(msg)
}

fn close_response_message(transaction: u8) -> Vec<u8> {
    let mut msg = vec![0x76];
    msg.extend_from_slice(&[0x04, 0x00, 0x63, transaction]);
    msg.extend_from_slice(&hex!("6200 6200"));
    msg.extend_from_slice(&hex!("72 63 0201 71 01"));
    finish_message(msg)
}

fn full_transmission() -> Vec<u8> {
    let mut body = open_response_message(0x51);
    body.extend_from_slice(&get_list_response_message(0x52, &hex!("3039"), 30, -1));
    body.extend_from_slice(&close_response_message(0x53));
    wrap_file(&body)
}

/// Reader handing out at most `chunk` bytes per call, to exercise the
/// buffering across reads.
struct ChunkedReader {
    data: Vec<u8>,
    pos: usize,
    chunk: usize,
}

impl Read for ChunkedReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.chunk.min(buf.len()).min(self.data.len() - self.pos);
        buf[..n].copy_from_slice(&self.data[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}

fn run_pipeline(data: Vec<u8>, chunk: usize) -> (Vec<(usize, bool, usize)>, Vec<(String, f64, String)>) {
    let reader = ChunkedReader { data, pos: 0, chunk };
    let mut files = Vec::new();
    let mut values = Vec::new();
    process(
        reader,
        true,
        |file_data, sml_file: &SmlFile| {
            files.push((file_data.len(), sml_file.valid_crc, sml_file.messages.len()));
        },
        |obis, value, unit| values.push((obis.to_string(), value, unit.to_string())),
    )
    .expect("processing failed");
    (files, values)
}

#[test]
fn single_transmission_yields_scaled_obis_value() {
    let (files, values) = run_pipeline(full_transmission(), 128);
    assert_eq!(files.len(), 1);
    assert_eq!(files[0].1, true);
    assert_eq!(files[0].2, 3);
    assert_eq!(
        values,
        vec![(String::from("1-0:1.8.0*255"), 1234.5, String::from("Wh"))]
    );
}

#[test]
fn chunk_size_does_not_change_the_result() {
    let mut stream = b"garbage before the transmission".to_vec();
    stream.extend_from_slice(&full_transmission());
    stream.extend_from_slice(&get_list_response_message(0x60, &hex!("01"), 27, 0));
    stream.extend_from_slice(&wrap_file(&get_list_response_message(
        0x61,
        &hex!("0862"),
        27,
        0,
    )));

    let expected = run_pipeline(stream.clone(), usize::MAX);
    assert_eq!(expected.0.len(), 2);
    for chunk in [1, 3, 17, 128] {
        assert_eq!(run_pipeline(stream.clone(), chunk), expected, "chunk {}", chunk);
    }
}

#[test]
fn active_power_entries_are_reported_in_watts() {
    let stream = wrap_file(&get_list_response_message(0x70, &hex!("0860"), 27, 0));
    let (_, values) = run_pipeline(stream, 128);
    assert_eq!(
        values,
        vec![(String::from("1-0:1.8.0*255"), 2144.0, String::from("W"))]
    );
}

#[test]
fn unrelated_units_are_not_reported() {
    // unit 33 (ampere) is not interpreted
    let stream = wrap_file(&get_list_response_message(0x71, &hex!("10"), 33, 0));
    let (files, values) = run_pipeline(stream, 128);
    assert_eq!(files.len(), 1);
    assert!(values.is_empty());
}

#[test]
fn corrupted_transmission_is_reported_without_messages() {
    let mut first = full_transmission();
    let len = first.len();
    first[len - 1] ^= 0xFF;
    let mut stream = first;
    stream.extend_from_slice(&full_transmission());

    let (files, values) = run_pipeline(stream, 128);
    assert_eq!(files.len(), 2);
    assert_eq!(files[0], (files[1].0, false, 0));
    assert_eq!(files[1].1, true);
    assert_eq!(files[1].2, 3);
    // only the intact transmission produces a value
    assert_eq!(values.len(), 1);
}

#[test]
fn decoded_messages_round_trip() {
    let raw = full_transmission();
    let file = SmlFile::new(&raw);
    assert!(file.valid_crc);
    assert_eq!(file.messages.len(), 3);
    assert!(matches!(file.messages[0], SmlMessage::OpenResponse(_)));
    assert!(matches!(file.messages[1], SmlMessage::GetListResponse(_)));
    assert!(matches!(file.messages[2], SmlMessage::CloseResponse(_)));

    let SmlMessage::OpenResponse(open) = &file.messages[0] else {
        unreachable!()
    };
    assert_eq!(open.codepage, "iso-8859-15");
    assert_eq!(open.sml_version, 1);
    assert!(!open.codepage.is_empty());
}

#[test]
fn interrupted_reads_are_retried() {
    struct FlakyReader {
        inner: ChunkedReader,
        hiccup: bool,
    }
    impl Read for FlakyReader {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if !self.hiccup {
                self.hiccup = true;
                return Err(io::Error::new(io::ErrorKind::Interrupted, "signal"));
            }
            self.hiccup = false;
            self.inner.read(buf)
        }
    }

    let reader = FlakyReader {
        inner: ChunkedReader {
            data: full_transmission(),
            pos: 0,
            chunk: 16,
        },
        hiccup: false,
    };
    let mut num_files = 0;
    process(reader, true, |_, _| num_files += 1, |_, _, _| {}).expect("processing failed");
    assert_eq!(num_files, 1);
}
