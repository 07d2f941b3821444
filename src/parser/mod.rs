//! Parsers for the contents of SML files.
//!
//! An SML file is a sequence of fields, each encoded as a type-length
//! header followed by a payload. Fields are decoded into the dynamically
//! typed [`Field`] tree first ([`decode_field`]); the [`message`] module
//! then binds field trees to typed SML messages.

use core::fmt;

pub mod message;
mod tlv;

pub use tlv::decode_field;

/// Error type used by the parser
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ParseError {
    /// The parser expected additional bytes but encountered the end of the buffer
    UnexpectedEof,
    /// An Integer or Unsigned field declared a payload size outside of 1..=8 bytes
    InvalidNumberLength(usize),
    /// A Boolean field declared no payload byte
    EmptyBoolean,
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseError::UnexpectedEof => write!(f, "unexpected end of data"),
            ParseError::InvalidNumberLength(n) => {
                write!(f, "invalid number payload length ({} bytes)", n)
            }
            ParseError::EmptyBoolean => write!(f, "boolean field without payload"),
        }
    }
}

impl std::error::Error for ParseError {}

/// A decoded SML field.
///
/// Fields form a tree: a [`List`](Field::List) contains further fields.
/// An empty [`Bytes`](Field::Bytes) value is the wire marker for an
/// omitted optional field (serialized as the single byte `0x01`), see
/// [`is_none_marker`](Field::is_none_marker).
#[derive(Clone, PartialEq, Eq)]
pub enum Field {
    /// Octet string (sequence of bytes)
    Bytes(Vec<u8>),
    /// Boolean
    Bool(bool),
    /// Signed integer, up to 8 payload bytes
    Int(i64),
    /// Unsigned integer, up to 8 payload bytes
    Uint(u64),
    /// Sequence of fields
    List(Vec<Field>),
    /// Placeholder for a field with an unknown type nibble
    Null,
}

impl Field {
    /// Returns whether this field is the marker for an omitted optional field.
    pub fn is_none_marker(&self) -> bool {
        matches!(self, Field::Bytes(bytes) if bytes.is_empty())
    }

    /// Returns the numeric value of `Uint` and non-negative `Int` fields.
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Field::Uint(n) => Some(*n),
            Field::Int(n) if *n >= 0 => Some(*n as u64),
            _ => None,
        }
    }

    /// Returns the numeric value of `Int` and fitting `Uint` fields.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Field::Int(n) => Some(*n),
            Field::Uint(n) => i64::try_from(*n).ok(),
            _ => None,
        }
    }

    pub(crate) fn kind(&self) -> FieldKind {
        match self {
            Field::Bytes(_) => FieldKind::Bytes,
            Field::Bool(_) => FieldKind::Bool,
            Field::Int(_) => FieldKind::Int,
            Field::Uint(_) => FieldKind::Uint,
            Field::List(_) => FieldKind::List,
            Field::Null => FieldKind::Null,
        }
    }
}

impl fmt::Debug for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Field::Bytes(bytes) => write!(f, "Bytes({:?})", BytesFormatter(bytes)),
            Field::Bool(b) => write!(f, "Bool({:?})", b),
            Field::Int(n) => write!(f, "Int({})", n),
            Field::Uint(n) => write!(f, "Uint({})", n),
            Field::List(items) => f.debug_tuple("List").field(items).finish(),
            Field::Null => write!(f, "Null"),
        }
    }
}

/// The type of a [`Field`], used for shape checking decoded messages.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum FieldKind {
    Bytes,
    Bool,
    Int,
    Uint,
    List,
    Null,
}

impl fmt::Display for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FieldKind::Bytes => "octet string",
            FieldKind::Bool => "boolean",
            FieldKind::Int => "integer",
            FieldKind::Uint => "unsigned",
            FieldKind::List => "list",
            FieldKind::Null => "null",
        };
        write!(f, "{}", name)
    }
}

pub(crate) struct BytesFormatter<'i>(pub(crate) &'i [u8]);

// formats a byte slice using the compact single-line output even when the
// parent element is formatted using "{:#?}"
impl fmt::Debug for BytesFormatter<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.0)
    }
}
