//! Bytes → Value.

use std::collections::HashMap;

use bytes::Buf;

use super::{marker, DecodeError, Value};

/// Nested arrays/maps deeper than this are rejected instead of recursing.
pub const MAX_DEPTH: usize = 512;

/// Decode exactly one value; any bytes left over are an error.
pub fn decode(input: &[u8]) -> Result<Value, DecodeError> {
    let mut decoder = Decoder {
        input,
        total: input.len(),
    };
    let value = decoder.parse(0)?;
    if !decoder.input.is_empty() {
        return Err(DecodeError::TrailingBytes(decoder.input.len()));
    }
    Ok(value)
}

struct Decoder<'a> {
    input: &'a [u8],
    total: usize,
}

impl<'a> Decoder<'a> {
    fn offset(&self) -> usize {
        self.total - self.input.len()
    }

    fn need(&self, n: usize) -> Result<(), DecodeError> {
        if self.input.len() < n {
            return Err(DecodeError::UnexpectedEof {
                offset: self.offset(),
                needed: n - self.input.len(),
            });
        }
        Ok(())
    }

    fn u8(&mut self) -> Result<u8, DecodeError> {
        self.need(1)?;
        Ok(self.input.get_u8())
    }

    fn i8(&mut self) -> Result<i8, DecodeError> {
        self.need(1)?;
        Ok(self.input.get_i8())
    }

    fn u16(&mut self) -> Result<u16, DecodeError> {
        self.need(2)?;
        Ok(self.input.get_u16())
    }

    fn i16(&mut self) -> Result<i16, DecodeError> {
        self.need(2)?;
        Ok(self.input.get_i16())
    }

    fn u32(&mut self) -> Result<u32, DecodeError> {
        self.need(4)?;
        Ok(self.input.get_u32())
    }

    fn i32(&mut self) -> Result<i32, DecodeError> {
        self.need(4)?;
        Ok(self.input.get_i32())
    }

    fn u64(&mut self) -> Result<u64, DecodeError> {
        self.need(8)?;
        Ok(self.input.get_u64())
    }

    fn i64(&mut self) -> Result<i64, DecodeError> {
        self.need(8)?;
        Ok(self.input.get_i64())
    }

    fn bytes(&mut self, len: usize) -> Result<&'a [u8], DecodeError> {
        self.need(len)?;
        let (head, tail) = self.input.split_at(len);
        self.input = tail;
        Ok(head)
    }

    fn parse(&mut self, depth: usize) -> Result<Value, DecodeError> {
        if depth > MAX_DEPTH {
            return Err(DecodeError::TooDeep(MAX_DEPTH));
        }
        let at = self.offset();
        let prefix = self.u8()?;

        match prefix {
            0x00..=0x7f => return Ok(Value::Int(prefix as i64)),
            0x80..=0x8f => return self.map((prefix & 0x0f) as usize, depth),
            0x90..=0x9f => return self.array((prefix & 0x0f) as usize, depth),
            0xa0..=0xbf => return self.str((prefix & 0x1f) as usize),
            0xe0..=0xff => return Ok(Value::Int(prefix as i8 as i64)),
            _ => {}
        }

        match prefix {
            marker::NIL => Ok(Value::Nil),
            marker::FALSE => Ok(Value::Bool(false)),
            marker::TRUE => Ok(Value::Bool(true)),

            marker::BIN8 => {
                let len = self.u8()? as usize;
                Ok(Value::Bin(self.bytes(len)?.to_vec()))
            }
            marker::BIN16 => {
                let len = self.u16()? as usize;
                Ok(Value::Bin(self.bytes(len)?.to_vec()))
            }
            marker::BIN32 => {
                let len = self.u32()? as usize;
                Ok(Value::Bin(self.bytes(len)?.to_vec()))
            }

            marker::EXT8 => {
                let len = self.u8()? as usize;
                self.ext(len)
            }
            marker::EXT16 => {
                let len = self.u16()? as usize;
                self.ext(len)
            }
            marker::EXT32 => {
                let len = self.u32()? as usize;
                self.ext(len)
            }

            marker::FLOAT32 => {
                self.need(4)?;
                Ok(Value::Float(self.input.get_f32() as f64))
            }
            marker::FLOAT64 => {
                self.need(8)?;
                Ok(Value::Float(self.input.get_f64()))
            }

            marker::UINT8 => Ok(Value::Int(self.u8()? as i64)),
            marker::UINT16 => Ok(Value::Int(self.u16()? as i64)),
            marker::UINT32 => Ok(Value::Int(self.u32()? as i64)),
            marker::UINT64 => Ok(Value::from(self.u64()?)),

            marker::INT8 => Ok(Value::Int(self.i8()? as i64)),
            marker::INT16 => Ok(Value::Int(self.i16()? as i64)),
            marker::INT32 => Ok(Value::Int(self.i32()? as i64)),
            marker::INT64 => Ok(Value::Int(self.i64()?)),

            marker::FIXEXT1 => {
                let ty = self.i8()?;
                let data = self.bytes(1)?;
                if ty == marker::DATE_EXT_TYPE {
                    // undefined
                    return Ok(Value::Nil);
                }
                Ok(Value::Ext(ty, data.to_vec()))
            }
            marker::FIXEXT2 => self.ext(2),
            marker::FIXEXT4 => self.ext(4),
            marker::FIXEXT8 => {
                let ty = self.i8()?;
                if ty == marker::DATE_EXT_TYPE {
                    let millis = self.i64()?;
                    return Value::date_millis(millis).ok_or(DecodeError::InvalidDate(millis));
                }
                Ok(Value::Ext(ty, self.bytes(8)?.to_vec()))
            }
            marker::FIXEXT16 => self.ext(16),

            marker::STR8 => {
                let len = self.u8()? as usize;
                self.str(len)
            }
            marker::STR16 => {
                let len = self.u16()? as usize;
                self.str(len)
            }
            marker::STR32 => {
                let len = self.u32()? as usize;
                self.str(len)
            }

            marker::ARRAY16 => {
                let len = self.u16()? as usize;
                self.array(len, depth)
            }
            marker::ARRAY32 => {
                let len = self.u32()? as usize;
                self.array(len, depth)
            }

            marker::MAP16 => {
                let len = self.u16()? as usize;
                self.map(len, depth)
            }
            marker::MAP32 => {
                let len = self.u32()? as usize;
                self.map(len, depth)
            }

            other => Err(DecodeError::InvalidMarker {
                marker: other,
                offset: at,
            }),
        }
    }

    fn str(&mut self, len: usize) -> Result<Value, DecodeError> {
        let offset = self.offset();
        let raw = self.bytes(len)?;
        let s = std::str::from_utf8(raw).map_err(|_| DecodeError::InvalidUtf8 { offset })?;
        Ok(Value::Str(s.to_string()))
    }

    fn ext(&mut self, len: usize) -> Result<Value, DecodeError> {
        let ty = self.i8()?;
        Ok(Value::Ext(ty, self.bytes(len)?.to_vec()))
    }

    fn array(&mut self, len: usize, depth: usize) -> Result<Value, DecodeError> {
        // Every element takes at least one byte, so a declared length larger
        // than the remaining input cannot be honest.
        let mut items = Vec::with_capacity(len.min(self.input.len()));
        for _ in 0..len {
            items.push(self.parse(depth + 1)?);
        }
        Ok(Value::Array(items))
    }

    fn map(&mut self, len: usize, depth: usize) -> Result<Value, DecodeError> {
        let capacity = len.min(self.input.len() / 2);
        let mut entries: Vec<(String, Value)> = Vec::with_capacity(capacity);
        let mut index: HashMap<String, usize> = HashMap::with_capacity(capacity);
        for _ in 0..len {
            let key = self.parse(depth + 1)?;
            let key = key
                .to_key_string()
                .ok_or(DecodeError::InvalidMapKey(key.type_name()))?;
            let value = self.parse(depth + 1)?;
            // Later duplicates win, as they would in an object literal.
            match index.get(&key) {
                Some(&i) => entries[i].1 = value,
                None => {
                    index.insert(key.clone(), entries.len());
                    entries.push((key, value));
                }
            }
        }
        Ok(Value::Map(entries))
    }
}
