//! Value → bytes.

use bytes::{BufMut, Bytes, BytesMut};

use super::{marker, EncodeError, Value};

/// Encode one value tree into a self-contained buffer.
pub fn encode(value: &Value) -> Result<Bytes, EncodeError> {
    let mut buf = BytesMut::with_capacity(64);
    write_value(&mut buf, value)?;
    Ok(buf.freeze())
}

fn write_value(buf: &mut BytesMut, value: &Value) -> Result<(), EncodeError> {
    match value {
        Value::Nil => buf.put_u8(marker::NIL),
        Value::Bool(b) => buf.put_u8(if *b { marker::TRUE } else { marker::FALSE }),
        Value::Int(n) => write_int(buf, *n),
        Value::UInt(n) => write_uint(buf, *n),
        Value::Float(f) => {
            buf.put_u8(marker::FLOAT64);
            buf.put_f64(*f);
        }
        Value::Str(s) => write_str(buf, s)?,
        Value::Bin(bytes) => {
            let len = wire_len("binary", bytes.len())?;
            if len <= u8::MAX as u32 {
                buf.put_u8(marker::BIN8);
                buf.put_u8(len as u8);
            } else if len <= u16::MAX as u32 {
                buf.put_u8(marker::BIN16);
                buf.put_u16(len as u16);
            } else {
                buf.put_u8(marker::BIN32);
                buf.put_u32(len);
            }
            buf.put_slice(bytes);
        }
        Value::Date(date) => {
            buf.put_u8(marker::FIXEXT8);
            buf.put_i8(marker::DATE_EXT_TYPE);
            buf.put_i64(date.timestamp_millis());
        }
        Value::Array(items) => {
            let len = wire_len("array", items.len())?;
            if len < 16 {
                buf.put_u8(marker::FIXARRAY | len as u8);
            } else if len <= u16::MAX as u32 {
                buf.put_u8(marker::ARRAY16);
                buf.put_u16(len as u16);
            } else {
                buf.put_u8(marker::ARRAY32);
                buf.put_u32(len);
            }
            for item in items {
                write_value(buf, item)?;
            }
        }
        Value::Map(entries) => {
            let len = wire_len("map", entries.len())?;
            if len < 16 {
                buf.put_u8(marker::FIXMAP | len as u8);
            } else if len <= u16::MAX as u32 {
                buf.put_u8(marker::MAP16);
                buf.put_u16(len as u16);
            } else {
                buf.put_u8(marker::MAP32);
                buf.put_u32(len);
            }
            for (key, value) in entries {
                write_str(buf, key)?;
                write_value(buf, value)?;
            }
        }
        Value::Ext(ty, data) => write_ext(buf, *ty, data)?,
    }
    Ok(())
}

fn write_int(buf: &mut BytesMut, n: i64) {
    if n >= 0 {
        write_uint(buf, n as u64);
    } else if n >= -32 {
        buf.put_i8(n as i8);
    } else if n >= i8::MIN as i64 {
        buf.put_u8(marker::INT8);
        buf.put_i8(n as i8);
    } else if n >= i16::MIN as i64 {
        buf.put_u8(marker::INT16);
        buf.put_i16(n as i16);
    } else if n >= i32::MIN as i64 {
        buf.put_u8(marker::INT32);
        buf.put_i32(n as i32);
    } else {
        buf.put_u8(marker::INT64);
        buf.put_i64(n);
    }
}

fn write_uint(buf: &mut BytesMut, n: u64) {
    if n < 0x80 {
        buf.put_u8(n as u8);
    } else if n <= u8::MAX as u64 {
        buf.put_u8(marker::UINT8);
        buf.put_u8(n as u8);
    } else if n <= u16::MAX as u64 {
        buf.put_u8(marker::UINT16);
        buf.put_u16(n as u16);
    } else if n <= u32::MAX as u64 {
        buf.put_u8(marker::UINT32);
        buf.put_u32(n as u32);
    } else {
        buf.put_u8(marker::UINT64);
        buf.put_u64(n);
    }
}

fn write_str(buf: &mut BytesMut, s: &str) -> Result<(), EncodeError> {
    let len = wire_len("string", s.len())?;
    if len < 32 {
        buf.put_u8(marker::FIXSTR | len as u8);
    } else if len <= u8::MAX as u32 {
        buf.put_u8(marker::STR8);
        buf.put_u8(len as u8);
    } else if len <= u16::MAX as u32 {
        buf.put_u8(marker::STR16);
        buf.put_u16(len as u16);
    } else {
        buf.put_u8(marker::STR32);
        buf.put_u32(len);
    }
    buf.put_slice(s.as_bytes());
    Ok(())
}

fn write_ext(buf: &mut BytesMut, ty: i8, data: &[u8]) -> Result<(), EncodeError> {
    let len = wire_len("extension", data.len())?;
    // Type 0 in fixext1/fixext8 is reserved for undefined and dates.
    let reserved = ty == marker::DATE_EXT_TYPE && (len == 1 || len == 8);
    let fixed = match len {
        1 => Some(marker::FIXEXT1),
        2 => Some(marker::FIXEXT2),
        4 => Some(marker::FIXEXT4),
        8 => Some(marker::FIXEXT8),
        16 => Some(marker::FIXEXT16),
        _ => None,
    };
    match fixed {
        Some(m) if !reserved => buf.put_u8(m),
        _ if len <= u8::MAX as u32 => {
            buf.put_u8(marker::EXT8);
            buf.put_u8(len as u8);
        }
        _ if len <= u16::MAX as u32 => {
            buf.put_u8(marker::EXT16);
            buf.put_u16(len as u16);
        }
        _ => {
            buf.put_u8(marker::EXT32);
            buf.put_u32(len);
        }
    }
    buf.put_i8(ty);
    buf.put_slice(data);
    Ok(())
}

fn wire_len(kind: &'static str, len: usize) -> Result<u32, EncodeError> {
    u32::try_from(len).map_err(|_| EncodeError::TooLarge { kind, len })
}
