//! Protobuf wire-format reader.
//!
//! Only what the profile schema needs: varints, length-delimited payloads,
//! and skipping of fixed-width fields the schema does not use. Every error
//! names the record section being decoded so a truncated message points at
//! the place it broke.
//!
//! See <https://protobuf.dev/programming-guides/encoding/>.

use crate::{LensError, LensResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum WireType {
    Varint = 0,
    Fixed64 = 1,
    LengthDelimited = 2,
    StartGroup = 3,
    EndGroup = 4,
    Fixed32 = 5,
}

impl WireType {
    fn from_bits(bits: u64) -> Option<Self> {
        Some(match bits {
            0 => Self::Varint,
            1 => Self::Fixed64,
            2 => Self::LengthDelimited,
            3 => Self::StartGroup,
            4 => Self::EndGroup,
            5 => Self::Fixed32,
            _ => return None,
        })
    }
}

/// A decoded field payload, tagged by its wire type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldValue<'a> {
    Varint(u64),
    Fixed64(u64),
    Bytes(&'a [u8]),
    Fixed32(u32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Field<'a> {
    pub number: u32,
    pub value: FieldValue<'a>,
}

impl<'a> Field<'a> {
    pub fn as_u64(&self, section: &'static str) -> LensResult<u64> {
        match self.value {
            FieldValue::Varint(v) => Ok(v),
            _ => Err(self.unexpected(section, "varint")),
        }
    }

    /// int64 fields are two's complement varints on the wire.
    pub fn as_i64(&self, section: &'static str) -> LensResult<i64> {
        self.as_u64(section).map(|v| v as i64)
    }

    pub fn as_bool(&self, section: &'static str) -> LensResult<bool> {
        self.as_u64(section).map(|v| v != 0)
    }

    pub fn as_bytes(&self, section: &'static str) -> LensResult<&'a [u8]> {
        match self.value {
            FieldValue::Bytes(b) => Ok(b),
            _ => Err(self.unexpected(section, "length-delimited")),
        }
    }

    pub fn as_str(&self, section: &'static str) -> LensResult<&'a str> {
        let bytes = self.as_bytes(section)?;
        std::str::from_utf8(bytes).map_err(|e| {
            LensError::decode(section, format!("field {} is not utf-8: {e}", self.number))
        })
    }

    /// Appends a repeated uint64 field, accepting packed and unpacked encodings.
    pub fn extend_u64(&self, section: &'static str, out: &mut Vec<u64>) -> LensResult<()> {
        match self.value {
            FieldValue::Varint(v) => out.push(v),
            FieldValue::Bytes(packed) => {
                let mut reader = WireReader::new(packed, section);
                while !reader.is_empty() {
                    out.push(reader.read_varint()?);
                }
            }
            _ => return Err(self.unexpected(section, "varint or packed varints")),
        }
        Ok(())
    }

    pub fn extend_i64(&self, section: &'static str, out: &mut Vec<i64>) -> LensResult<()> {
        let mut raw = Vec::new();
        self.extend_u64(section, &mut raw)?;
        out.extend(raw.into_iter().map(|v| v as i64));
        Ok(())
    }

    fn unexpected(&self, section: &'static str, expected: &str) -> LensError {
        LensError::decode(
            section,
            format!("field {} has wire type {:?}, expected {expected}", self.number, self.value),
        )
    }
}

/// Cursor over one message's bytes. Iterating yields its fields in order.
#[derive(Debug, Clone)]
pub struct WireReader<'a> {
    buf: &'a [u8],
    pos: usize,
    section: &'static str,
}

impl<'a> WireReader<'a> {
    pub fn new(buf: &'a [u8], section: &'static str) -> Self {
        Self { buf, pos: 0, section }
    }

    pub fn is_empty(&self) -> bool {
        self.pos >= self.buf.len()
    }

    pub fn read_varint(&mut self) -> LensResult<u64> {
        let mut value = 0u64;
        for shift in (0..64).step_by(7) {
            let Some(&byte) = self.buf.get(self.pos) else {
                return Err(self.error("truncated varint"));
            };
            self.pos += 1;
            value |= u64::from(byte & 0x7f) << shift;
            if byte & 0x80 == 0 {
                return Ok(value);
            }
        }
        Err(self.error("varint longer than 10 bytes"))
    }

    fn take(&mut self, len: usize) -> LensResult<&'a [u8]> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= self.buf.len())
            .ok_or_else(|| {
                self.error(&format!(
                    "length {len} at offset {} overruns {} byte message",
                    self.pos,
                    self.buf.len()
                ))
            })?;
        let buf: &'a [u8] = self.buf;
        let out = &buf[self.pos..end];
        self.pos = end;
        Ok(out)
    }

    pub fn read_field(&mut self) -> LensResult<Field<'a>> {
        let key = self.read_varint()?;
        let number = u32::try_from(key >> 3).map_err(|_| self.error("field number overflow"))?;
        if number == 0 {
            return Err(self.error("field number 0 is reserved"));
        }
        let wire_type = WireType::from_bits(key & 0x7)
            .ok_or_else(|| self.error(&format!("unknown wire type {}", key & 0x7)))?;
        let value = match wire_type {
            WireType::Varint => FieldValue::Varint(self.read_varint()?),
            WireType::Fixed64 => {
                let raw = self.take(8)?;
                let mut le = [0u8; 8];
                le.copy_from_slice(raw);
                FieldValue::Fixed64(u64::from_le_bytes(le))
            }
            WireType::LengthDelimited => {
                let len = self.read_varint()?;
                let len = usize::try_from(len).map_err(|_| self.error("length overflow"))?;
                FieldValue::Bytes(self.take(len)?)
            }
            WireType::Fixed32 => {
                let raw = self.take(4)?;
                let mut le = [0u8; 4];
                le.copy_from_slice(raw);
                FieldValue::Fixed32(u32::from_le_bytes(le))
            }
            WireType::StartGroup | WireType::EndGroup => {
                return Err(self.error(&format!("field {number} uses unsupported group encoding")));
            }
        };
        Ok(Field { number, value })
    }

    fn error(&self, message: &str) -> LensError {
        LensError::decode(self.section, message.to_string())
    }
}

impl<'a> Iterator for WireReader<'a> {
    type Item = LensResult<Field<'a>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.is_empty() {
            return None;
        }
        let field = self.read_field();
        if field.is_err() {
            // Stop after the first error; the rest of the buffer is unaligned.
            self.pos = self.buf.len();
        }
        Some(field)
    }
}
