//! SML messages and their binding from decoded field trees.
//!
//! Messages arrive as a six-field list (transaction id, group number,
//! abort-on-error, message body, checksum, end marker). The message body
//! is a two-element list of message type code and payload. Three message
//! types are bound to typed values; all others are ignored.
//!
//! Binding is deliberately tolerant: real-world meters deviate from the
//! written format in a number of places (see the individual shape tables),
//! and a malformed list entry or message must not take down the rest of
//! the file.

use core::fmt;

use super::{Field, FieldKind};

const MSG_OPEN_RESPONSE: u64 = 0x0000_0101;
const MSG_CLOSE_RESPONSE: u64 = 0x0000_0201;
const MSG_GET_LIST_RESPONSE: u64 = 0x0000_0701;

/// Allowed field kinds for one slot of a message, by name.
struct FieldSpec {
    name: &'static str,
    allowed: &'static [FieldKind],
}

const BYTES: &[FieldKind] = &[FieldKind::Bytes];
const LIST: &[FieldKind] = &[FieldKind::List];
const NUMBER: &[FieldKind] = &[FieldKind::Int, FieldKind::Uint];
// optional numbers and values may arrive as the octet string none marker
const NUMBER_OR_BYTES: &[FieldKind] = &[FieldKind::Int, FieldKind::Uint, FieldKind::Bytes];
// SML time is a two-element list, but some meters send a bare integer
const TIME: &[FieldKind] = &[
    FieldKind::Int,
    FieldKind::Uint,
    FieldKind::List,
    FieldKind::Bytes,
];
const ANY: &[FieldKind] = &[
    FieldKind::Bytes,
    FieldKind::Bool,
    FieldKind::Int,
    FieldKind::Uint,
    FieldKind::List,
    FieldKind::Null,
];

/// Checks `field` against the shape table of a message type. All
/// mismatches are logged; the caller drops the offending unit.
fn check_shape(name: &str, shape: &[FieldSpec], field: &Field) -> bool {
    let items = match field {
        Field::List(items) => items,
        other => {
            log::error!(
                "Data for {} must be of type list, but the given input type was {}.",
                name,
                other.kind()
            );
            return false;
        }
    };
    if items.len() != shape.len() {
        log::error!(
            "Data for {} must be encoded as a list of {} elements, but data consists of {} elements.",
            name,
            shape.len(),
            items.len()
        );
        return false;
    }
    let mut matches = true;
    for (spec, item) in shape.iter().zip(items) {
        if !spec.allowed.contains(&item.kind()) {
            log::error!(
                "Data field {} of {} has type {} but one of {:?} is expected.",
                spec.name,
                name,
                item.kind(),
                spec.allowed
            );
            matches = false;
        }
    }
    matches
}

fn optional_bytes(field: &Field) -> Option<Vec<u8>> {
    match field {
        Field::Bytes(bytes) if !bytes.is_empty() => Some(bytes.clone()),
        _ => None,
    }
}

fn bytes_as_u64(bytes: &[u8]) -> u64 {
    bytes.iter().fold(0u64, |acc, &b| (acc << 8) | u64::from(b))
}

/// Decodes ISO-8859-15, the default character set of SML octet strings.
///
/// The encoding is Latin-1 with eight code points remapped.
fn decode_iso_8859_15(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|&b| match b {
            0xA4 => '\u{20AC}', // euro sign
            0xA6 => 'Š',
            0xA8 => 'š',
            0xB4 => 'Ž',
            0xB8 => 'ž',
            0xBC => 'Œ',
            0xBD => 'œ',
            0xBE => 'Ÿ',
            other => other as char,
        })
        .collect()
}

/// SML time information.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SmlTime {
    /// seconds since the meter was powered on
    SecIndex(u64),
    /// Unix timestamp in seconds
    Timestamp(u64),
}

impl fmt::Display for SmlTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SmlTime::SecIndex(n) => write!(f, "SecIndex({})", n),
            SmlTime::Timestamp(n) => write!(f, "Timestamp({})", n),
        }
    }
}

/// Converts an `SML_Time` field.
///
/// The field is a two-element list of time type and payload. Type 1 is a
/// seconds index, type 2 a Unix timestamp and type 3 a local timestamp
/// (a three-element list starting with the Unix timestamp). A bare
/// integer where the list is expected is accepted as a seconds index.
/// Returns `None` (with a log entry) if the data cannot be interpreted.
fn convert_time(field: &Field) -> Option<SmlTime> {
    match field {
        Field::List(items) if items.len() == 2 => {
            let Some(time_type) = items[0].as_u64() else {
                log::error!(
                    "Can't convert time field with time type of type {} (expected a number)!",
                    items[0].kind()
                );
                return None;
            };
            match (time_type, &items[1]) {
                (1, payload) => payload.as_u64().map(SmlTime::SecIndex),
                (2, payload) => payload.as_u64().map(SmlTime::Timestamp),
                (3, Field::List(local)) if local.len() == 3 => {
                    local[0].as_u64().map(SmlTime::Timestamp)
                }
                _ => {
                    log::error!("Can't convert time field with time type nr {}!", time_type);
                    None
                }
            }
        }
        field => match field.as_u64() {
            Some(seconds) => Some(SmlTime::SecIndex(seconds)),
            None => {
                log::error!("Can't convert time field of type {}!", field.kind());
                None
            }
        },
    }
}

fn optional_time(field: &Field) -> Option<SmlTime> {
    if field.is_none_marker() {
        None
    } else {
        convert_time(field)
    }
}

const RAW_MESSAGE_SHAPE: &[FieldSpec] = &[
    FieldSpec { name: "transaction_id", allowed: BYTES },
    FieldSpec { name: "group_number", allowed: NUMBER },
    FieldSpec { name: "abort_on_error", allowed: NUMBER },
    FieldSpec { name: "message_body", allowed: LIST },
    FieldSpec { name: "crc16", allowed: NUMBER_OR_BYTES },
    // the written format wants an empty octet string here, but meters have
    // been observed to send other types
    FieldSpec { name: "end_of_sml_msg", allowed: ANY },
];

/// Raw message data extracted from an SML file.
///
/// The first binding stage: the six-field message container with the
/// message body left as an uninterpreted field tree.
#[derive(Debug, Clone, PartialEq)]
pub struct RawMessage {
    pub transaction_id: Vec<u8>,
    pub group_number: u64,
    pub abort_on_error: u64,
    /// two-element list of message type code and payload
    pub message_body: Vec<Field>,
    /// message checksum; `None` if the field was empty or zero
    pub crc16: Option<u16>,
}

impl RawMessage {
    /// Binds a decoded field tree to a raw message.
    ///
    /// Returns `None` (with logged details) if the tree does not have the
    /// expected six-field shape or the message body is not a two-element
    /// list of type code and payload list.
    pub fn from_field(field: &Field) -> Option<RawMessage> {
        if !check_shape("RawMessage", RAW_MESSAGE_SHAPE, field) {
            return None;
        }
        let Field::List(items) = field else {
            return None;
        };
        let Field::List(body) = &items[3] else {
            return None;
        };
        if body.len() != 2 || body[0].as_u64().is_none() || !matches!(body[1], Field::List(_)) {
            log::error!("Message body must be a list of message type code and payload list!");
            return None;
        }
        let Field::Bytes(transaction_id) = &items[0] else {
            return None;
        };
        Some(RawMessage {
            transaction_id: transaction_id.clone(),
            group_number: items[1].as_u64().unwrap_or_default(),
            abort_on_error: items[2].as_u64().unwrap_or_default(),
            message_body: body.clone(),
            crc16: crc_field_value(&items[4]),
        })
    }
}

/// Extracts the checksum from the crc16 field. Zero and the none marker
/// both mean "no checksum provided".
fn crc_field_value(field: &Field) -> Option<u16> {
    let value = match field {
        Field::Uint(n) => *n,
        Field::Int(n) => *n as u64,
        Field::Bytes(bytes) => bytes_as_u64(bytes),
        _ => 0,
    };
    (value != 0).then_some(value as u16)
}

const OPEN_RESPONSE_SHAPE: &[FieldSpec] = &[
    FieldSpec { name: "codepage", allowed: BYTES },
    FieldSpec { name: "client_id", allowed: BYTES },
    FieldSpec { name: "req_file_id", allowed: BYTES },
    FieldSpec { name: "server_id", allowed: BYTES },
    FieldSpec { name: "ref_time", allowed: TIME },
    // the written format wants an unsigned here, but octet strings have
    // been observed
    FieldSpec { name: "sml_version", allowed: NUMBER_OR_BYTES },
];

/// `SML_PublicOpen.Res` message
#[derive(Debug, Clone, PartialEq)]
pub struct OpenResponse {
    /// character set of the file's octet strings. Defaults to `iso-8859-15`
    pub codepage: String,
    /// identification of the client
    pub client_id: Option<Vec<u8>>,
    /// identification of the request/response pair
    pub req_file_id: Vec<u8>,
    /// identification of the server
    pub server_id: Vec<u8>,
    /// reference time
    pub ref_time: Option<SmlTime>,
    /// version of the SML protocol. Defaults to `1`
    pub sml_version: u64,
}

impl OpenResponse {
    fn from_body(body: &Field) -> Option<OpenResponse> {
        if !check_shape("OpenResponse", OPEN_RESPONSE_SHAPE, body) {
            return None;
        }
        let Field::List(fields) = body else {
            return None;
        };
        let codepage = match &fields[0] {
            Field::Bytes(bytes) if !bytes.is_empty() => decode_iso_8859_15(bytes),
            _ => String::from("iso-8859-15"),
        };
        let sml_version = match &fields[5] {
            Field::Uint(n) => *n,
            Field::Int(n) => *n as u64,
            Field::Bytes(bytes) if !bytes.is_empty() => bytes_as_u64(bytes),
            _ => 1,
        };
        Some(OpenResponse {
            codepage,
            client_id: optional_bytes(&fields[1]),
            req_file_id: match &fields[2] {
                Field::Bytes(bytes) => bytes.clone(),
                _ => return None,
            },
            server_id: match &fields[3] {
                Field::Bytes(bytes) => bytes.clone(),
                _ => return None,
            },
            ref_time: optional_time(&fields[4]),
            sml_version,
        })
    }
}

impl fmt::Display for OpenResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SML-Message OpenResponse: Codepage={}, ", self.codepage)?;
        if let Some(client_id) = &self.client_id {
            write!(f, "ClientId={:?}, ", client_id)?;
        }
        write!(f, "ReqFileId={:?}, ", self.req_file_id)?;
        write!(f, "ServerId={:?}, ", self.server_id)?;
        if let Some(ref_time) = &self.ref_time {
            write!(f, "RefTime={}, ", ref_time)?;
        }
        write!(f, "SmlVersion={}", self.sml_version)
    }
}

const CLOSE_RESPONSE_SHAPE: &[FieldSpec] =
    &[FieldSpec { name: "global_signature", allowed: BYTES }];

/// `SML_PublicClose.Res` message
#[derive(Debug, Clone, PartialEq)]
pub struct CloseResponse {
    /// optional signature
    pub global_signature: Option<Vec<u8>>,
}

impl CloseResponse {
    fn from_body(body: &Field) -> Option<CloseResponse> {
        if !check_shape("CloseResponse", CLOSE_RESPONSE_SHAPE, body) {
            return None;
        }
        let Field::List(fields) = body else {
            return None;
        };
        Some(CloseResponse {
            global_signature: optional_bytes(&fields[0]),
        })
    }
}

impl fmt::Display for CloseResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SML-Message CloseResponse: ")?;
        if let Some(signature) = &self.global_signature {
            write!(f, "GlobalSignature={:?}", signature)?;
        }
        Ok(())
    }
}

/// Value carried by a [`ListEntry`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryValue {
    Int(i64),
    Uint(u64),
    Bytes(Vec<u8>),
}

impl EntryValue {
    /// Returns the value as a float for scaling; `None` for byte values.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            EntryValue::Int(n) => Some(*n as f64),
            EntryValue::Uint(n) => Some(*n as f64),
            EntryValue::Bytes(_) => None,
        }
    }
}

impl fmt::Display for EntryValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntryValue::Int(n) => write!(f, "{}", n),
            EntryValue::Uint(n) => write!(f, "{}", n),
            EntryValue::Bytes(bytes) => write!(f, "{:?}", bytes),
        }
    }
}

const LIST_ENTRY_SHAPE: &[FieldSpec] = &[
    FieldSpec { name: "obj_name", allowed: BYTES },
    FieldSpec { name: "status", allowed: NUMBER_OR_BYTES },
    FieldSpec { name: "val_time", allowed: TIME },
    FieldSpec { name: "unit", allowed: NUMBER_OR_BYTES },
    FieldSpec { name: "scaler", allowed: NUMBER_OR_BYTES },
    FieldSpec { name: "value", allowed: NUMBER_OR_BYTES },
    FieldSpec { name: "value_signature", allowed: BYTES },
];

/// Element of a [`GetListResponse`] message.
#[derive(Debug, Clone, PartialEq)]
pub struct ListEntry {
    /// OBIS identifier, rendered as `a-b:c.d.e*f` for six-byte names
    pub obj_name: String,
    /// status of the entry, content is not specified by SML
    pub status: Option<u64>,
    /// time when the value was obtained
    pub val_time: Option<SmlTime>,
    /// raw code of the value's unit according to the DLMS unit list
    pub unit_raw: Option<u64>,
    /// decimal exponent: `value × 10^scaler` yields the SI magnitude
    pub scaler: Option<i64>,
    /// the raw value, see `scaler` and `unit` for its interpretation
    pub value: EntryValue,
    /// optional signature of the value
    pub value_signature: Option<Vec<u8>>,
}

impl ListEntry {
    /// Returns the unit as a string: `Wh` and `W` for the two codes this
    /// application interprets, the decimal code otherwise.
    pub fn unit(&self) -> Option<String> {
        self.unit_raw.map(|raw| match raw {
            30 => String::from("Wh"),
            27 => String::from("W"),
            other => other.to_string(),
        })
    }

    /// Binds one element of the value list. Returns `None` (with logged
    /// details) if the element does not have the seven-field entry shape.
    pub fn from_field(field: &Field) -> Option<ListEntry> {
        if !check_shape("ListEntry", LIST_ENTRY_SHAPE, field) {
            return None;
        }
        let Field::List(fields) = field else {
            return None;
        };
        let obj_name = match &fields[0] {
            Field::Bytes(bytes) if bytes.len() == 6 => format!(
                "{}-{}:{}.{}.{}*{}",
                bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5]
            ),
            Field::Bytes(bytes) => format!("{:?}", bytes),
            _ => return None,
        };
        let value = match &fields[5] {
            Field::Int(n) => EntryValue::Int(*n),
            Field::Uint(n) => EntryValue::Uint(*n),
            Field::Bytes(bytes) => EntryValue::Bytes(bytes.clone()),
            _ => return None,
        };
        Some(ListEntry {
            obj_name,
            status: if fields[1].is_none_marker() { None } else { fields[1].as_u64() },
            val_time: optional_time(&fields[2]),
            unit_raw: if fields[3].is_none_marker() { None } else { fields[3].as_u64() },
            scaler: if fields[4].is_none_marker() { None } else { fields[4].as_i64() },
            value,
            value_signature: optional_bytes(&fields[6]),
        })
    }
}

impl fmt::Display for ListEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjName={}, ", self.obj_name)?;
        if let Some(status) = self.status {
            write!(f, "Status=0x{:x}, ", status)?;
        }
        if let Some(val_time) = &self.val_time {
            write!(f, "ValTime={}, ", val_time)?;
        }
        if let Some(unit) = self.unit() {
            write!(f, "Unit={}, ", unit)?;
        }
        if let Some(scaler) = self.scaler {
            write!(f, "Scaler={}, ", scaler)?;
        }
        write!(f, "Value={}", self.value)?;
        if let Some(signature) = &self.value_signature {
            write!(f, ", ValueSignature={:?}", signature)?;
        }
        Ok(())
    }
}

const GET_LIST_RESPONSE_SHAPE: &[FieldSpec] = &[
    FieldSpec { name: "client_id", allowed: BYTES },
    FieldSpec { name: "server_id", allowed: BYTES },
    FieldSpec { name: "list_name", allowed: BYTES },
    FieldSpec { name: "act_sensor_time", allowed: TIME },
    FieldSpec { name: "list_entries", allowed: LIST },
    FieldSpec { name: "list_signature", allowed: BYTES },
    FieldSpec { name: "act_gateway_time", allowed: TIME },
];

/// `SML_GetList.Res` message
#[derive(Debug, Clone, PartialEq)]
pub struct GetListResponse {
    /// identification of the client
    pub client_id: Option<Vec<u8>>,
    /// identification of the server
    pub server_id: Vec<u8>,
    /// name of the list
    pub list_name: Option<Vec<u8>>,
    /// optional sensor time information
    pub act_sensor_time: Option<SmlTime>,
    /// the data values. Entries that fail the shape check are skipped
    pub list_entries: Vec<ListEntry>,
    /// optional signature of the list
    pub list_signature: Option<Vec<u8>>,
    /// optional gateway time information
    pub act_gateway_time: Option<SmlTime>,
}

impl GetListResponse {
    fn from_body(body: &Field) -> Option<GetListResponse> {
        if !check_shape("GetListResponse", GET_LIST_RESPONSE_SHAPE, body) {
            return None;
        }
        let Field::List(fields) = body else {
            return None;
        };
        let Field::List(items) = &fields[4] else {
            return None;
        };
        let list_entries = items.iter().filter_map(ListEntry::from_field).collect();
        Some(GetListResponse {
            client_id: optional_bytes(&fields[0]),
            server_id: match &fields[1] {
                Field::Bytes(bytes) => bytes.clone(),
                _ => return None,
            },
            list_name: optional_bytes(&fields[2]),
            act_sensor_time: optional_time(&fields[3]),
            list_entries,
            list_signature: optional_bytes(&fields[5]),
            act_gateway_time: optional_time(&fields[6]),
        })
    }
}

impl fmt::Display for GetListResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SML-Message GetListResponse: ")?;
        if let Some(client_id) = &self.client_id {
            write!(f, "ClientId={:?}, ", client_id)?;
        }
        write!(f, "ServerId={:?}", self.server_id)?;
        if let Some(list_name) = &self.list_name {
            write!(f, ", ListName={:?}", list_name)?;
        }
        if let Some(act_sensor_time) = &self.act_sensor_time {
            write!(f, ", ActSensorTime={}", act_sensor_time)?;
        }
        if let Some(list_signature) = &self.list_signature {
            write!(f, ", ListSignature={:?}", list_signature)?;
        }
        if let Some(act_gateway_time) = &self.act_gateway_time {
            write!(f, ", ActGatewayTime={}", act_gateway_time)?;
        }
        for entry in &self.list_entries {
            write!(f, "\n{}", entry)?;
        }
        Ok(())
    }
}

/// A typed SML message.
///
/// Only the message types sent by real-world power meters are covered;
/// [`SmlMessage::from_raw`] returns `None` for all other type codes.
#[derive(Debug, Clone, PartialEq)]
pub enum SmlMessage {
    /// `SML_PublicOpen.Res` message
    OpenResponse(OpenResponse),
    /// `SML_PublicClose.Res` message
    CloseResponse(CloseResponse),
    /// `SML_GetList.Res` message
    GetListResponse(GetListResponse),
}

impl SmlMessage {
    /// Binds a raw message to a typed message. Unknown message type codes
    /// yield `None` without further diagnostics; a payload that does not
    /// match the shape of its type code is logged and also yields `None`.
    pub fn from_raw(raw: &RawMessage) -> Option<SmlMessage> {
        let type_code = raw.message_body.first()?.as_u64()?;
        let body = raw.message_body.get(1)?;
        match type_code {
            MSG_OPEN_RESPONSE => OpenResponse::from_body(body).map(SmlMessage::OpenResponse),
            MSG_CLOSE_RESPONSE => CloseResponse::from_body(body).map(SmlMessage::CloseResponse),
            MSG_GET_LIST_RESPONSE => {
                GetListResponse::from_body(body).map(SmlMessage::GetListResponse)
            }
            _ => None,
        }
    }
}

impl fmt::Display for SmlMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SmlMessage::OpenResponse(msg) => msg.fmt(f),
            SmlMessage::CloseResponse(msg) => msg.fmt(f),
            SmlMessage::GetListResponse(msg) => msg.fmt(f),
        }
    }
}
