//! Compact binary codec for cluster traffic.
//!
//! A MessagePack dialect: the usual fixint/fixstr/fixarray/fixmap small-size
//! forms, smallest-width integers, float64 for all floats, and a fixext8
//! extension (type 0) carrying dates as milliseconds since the epoch.
//!
//! Each call encodes or decodes exactly one self-contained value tree.
//! [`decode_payload`] additionally accepts JSON text, recognised by a leading
//! `{`, which is how some peers send requests and responses.

mod decode;
mod encode;
mod value;

pub use decode::{decode, MAX_DEPTH};
pub use encode::encode;
pub use value::Value;

/// Errors raised while encoding a value.
#[derive(Debug, thiserror::Error)]
pub enum EncodeError {
    #[error("{kind} too large to encode: {len} elements")]
    TooLarge { kind: &'static str, len: usize },
}

/// Errors raised while decoding a payload.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("unexpected end of input at offset {offset}: {needed} more bytes needed")]
    UnexpectedEof { offset: usize, needed: usize },

    #[error("{0} trailing bytes")]
    TrailingBytes(usize),

    #[error("could not parse type marker 0x{marker:02x} at offset {offset}")]
    InvalidMarker { marker: u8, offset: usize },

    #[error("invalid UTF-8 in string at offset {offset}")]
    InvalidUtf8 { offset: usize },

    #[error("unsupported map key type: {0}")]
    InvalidMapKey(&'static str),

    #[error("date out of range: {0} ms")]
    InvalidDate(i64),

    #[error("nesting deeper than {0} levels")]
    TooDeep(usize),

    #[error("malformed JSON payload: {0}")]
    Json(#[from] serde_json::Error),

    #[error("empty payload")]
    Empty,
}

/// Decode a payload that is either codec-encoded or JSON text.
///
/// The two are told apart by the first byte alone: `{` means JSON.
pub fn decode_payload(payload: &[u8]) -> Result<Value, DecodeError> {
    match payload.first() {
        None => Err(DecodeError::Empty),
        Some(b'{') => {
            let json: serde_json::Value = serde_json::from_slice(payload)?;
            Ok(Value::from(json))
        }
        Some(_) => decode(payload),
    }
}

/// Type markers.
pub(crate) mod marker {
    pub const FIXMAP: u8 = 0x80;
    pub const FIXARRAY: u8 = 0x90;
    pub const FIXSTR: u8 = 0xa0;

    pub const NIL: u8 = 0xc0;
    pub const FALSE: u8 = 0xc2;
    pub const TRUE: u8 = 0xc3;

    pub const BIN8: u8 = 0xc4;
    pub const BIN16: u8 = 0xc5;
    pub const BIN32: u8 = 0xc6;

    pub const EXT8: u8 = 0xc7;
    pub const EXT16: u8 = 0xc8;
    pub const EXT32: u8 = 0xc9;

    pub const FLOAT32: u8 = 0xca;
    pub const FLOAT64: u8 = 0xcb;

    pub const UINT8: u8 = 0xcc;
    pub const UINT16: u8 = 0xcd;
    pub const UINT32: u8 = 0xce;
    pub const UINT64: u8 = 0xcf;

    pub const INT8: u8 = 0xd0;
    pub const INT16: u8 = 0xd1;
    pub const INT32: u8 = 0xd2;
    pub const INT64: u8 = 0xd3;

    pub const FIXEXT1: u8 = 0xd4;
    pub const FIXEXT2: u8 = 0xd5;
    pub const FIXEXT4: u8 = 0xd6;
    pub const FIXEXT8: u8 = 0xd7;
    pub const FIXEXT16: u8 = 0xd8;

    pub const STR8: u8 = 0xd9;
    pub const STR16: u8 = 0xda;
    pub const STR32: u8 = 0xdb;

    pub const ARRAY16: u8 = 0xdc;
    pub const ARRAY32: u8 = 0xdd;

    pub const MAP16: u8 = 0xde;
    pub const MAP32: u8 = 0xdf;

    /// Extension type shared by dates (fixext8) and undefined (fixext1).
    pub const DATE_EXT_TYPE: i8 = 0;
}
