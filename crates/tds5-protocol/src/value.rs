//! TDS 5.0 datatypes and value encoding/decoding.
//!
//! Only the common fixed and variable-length scalar types are modeled;
//! anything else fails with [`ProtocolError::UnknownDatatype`] at format
//! decode time.

use bytes::{Buf, BufMut, Bytes};

use crate::codec::ensure;
use crate::error::ProtocolError;
use crate::token::ColumnFormat;

/// TDS 5.0 datatype byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum DataType {
    /// 1-byte boolean.
    Bit = 0x32,
    /// Unsigned 1-byte integer.
    Int1 = 0x30,
    /// Signed 2-byte integer.
    Int2 = 0x34,
    /// Signed 4-byte integer.
    Int4 = 0x38,
    /// Signed 8-byte integer.
    Int8 = 0xBF,
    /// Nullable integer, 1-byte length prefix of 0, 1, 2, 4 or 8.
    IntN = 0x26,
    /// 4-byte float.
    Flt4 = 0x3B,
    /// 8-byte float.
    Flt8 = 0x3E,
    /// Nullable float, 1-byte length prefix of 0, 4 or 8.
    FltN = 0x6D,
    /// Fixed character data, 1-byte length prefix.
    Char = 0x2F,
    /// Variable character data, 1-byte length prefix.
    VarChar = 0x27,
    /// Fixed binary data, 1-byte length prefix.
    Binary = 0x2D,
    /// Variable binary data, 1-byte length prefix.
    VarBinary = 0x25,
}

impl DataType {
    /// Create a datatype from a raw byte value.
    pub fn from_u8(value: u8) -> Result<Self, ProtocolError> {
        match value {
            0x32 => Ok(Self::Bit),
            0x30 => Ok(Self::Int1),
            0x34 => Ok(Self::Int2),
            0x38 => Ok(Self::Int4),
            0xBF => Ok(Self::Int8),
            0x26 => Ok(Self::IntN),
            0x3B => Ok(Self::Flt4),
            0x3E => Ok(Self::Flt8),
            0x6D => Ok(Self::FltN),
            0x2F => Ok(Self::Char),
            0x27 => Ok(Self::VarChar),
            0x2D => Ok(Self::Binary),
            0x25 => Ok(Self::VarBinary),
            _ => Err(ProtocolError::UnknownDatatype(value)),
        }
    }

    /// Whether the format entry for this datatype carries a 1-byte
    /// maximum-length field.
    #[must_use]
    pub const fn has_length_field(self) -> bool {
        matches!(
            self,
            Self::IntN
                | Self::FltN
                | Self::Char
                | Self::VarChar
                | Self::Binary
                | Self::VarBinary
        )
    }
}

/// A decoded column or parameter value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// SQL NULL.
    Null,
    /// Boolean (BIT).
    Bit(bool),
    /// Any integer type, widened to 64 bits.
    Int(i64),
    /// Any float type, widened to 64 bits.
    Float(f64),
    /// Character data.
    String(String),
    /// Binary data.
    Binary(Bytes),
}

impl Value {
    /// Check whether this value is SQL NULL.
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Self::Int(i64::from(v))
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

fn read_int(src: &mut impl Buf, datatype: u8, len: usize) -> Result<Value, ProtocolError> {
    ensure(src, len)?;
    let v = match len {
        1 => i64::from(src.get_u8()),
        2 => i64::from(src.get_i16_le()),
        4 => i64::from(src.get_i32_le()),
        8 => src.get_i64_le(),
        _ => {
            return Err(ProtocolError::InvalidValueLength {
                datatype,
                length: len,
            });
        }
    };
    Ok(Value::Int(v))
}

fn read_float(src: &mut impl Buf, datatype: u8, len: usize) -> Result<Value, ProtocolError> {
    ensure(src, len)?;
    let v = match len {
        4 => f64::from(src.get_f32_le()),
        8 => src.get_f64_le(),
        _ => {
            return Err(ProtocolError::InvalidValueLength {
                datatype,
                length: len,
            });
        }
    };
    Ok(Value::Float(v))
}

/// Decode one value as described by a column or parameter format entry.
pub fn decode_value(src: &mut impl Buf, fmt: &ColumnFormat) -> Result<Value, ProtocolError> {
    let datatype = fmt.datatype;
    match datatype {
        DataType::Bit => {
            ensure(src, 1)?;
            Ok(Value::Bit(src.get_u8() != 0))
        }
        DataType::Int1 => read_int(src, datatype as u8, 1),
        DataType::Int2 => read_int(src, datatype as u8, 2),
        DataType::Int4 => read_int(src, datatype as u8, 4),
        DataType::Int8 => read_int(src, datatype as u8, 8),
        DataType::Flt4 => read_float(src, datatype as u8, 4),
        DataType::Flt8 => read_float(src, datatype as u8, 8),
        DataType::IntN => {
            ensure(src, 1)?;
            let len = src.get_u8() as usize;
            if len == 0 {
                Ok(Value::Null)
            } else {
                read_int(src, datatype as u8, len)
            }
        }
        DataType::FltN => {
            ensure(src, 1)?;
            let len = src.get_u8() as usize;
            if len == 0 {
                Ok(Value::Null)
            } else {
                read_float(src, datatype as u8, len)
            }
        }
        DataType::Char | DataType::VarChar => {
            ensure(src, 1)?;
            let len = src.get_u8() as usize;
            if len == 0 {
                return Ok(Value::Null);
            }
            ensure(src, len)?;
            let mut bytes = vec![0u8; len];
            src.copy_to_slice(&mut bytes);
            String::from_utf8(bytes)
                .map(Value::String)
                .map_err(|_| ProtocolError::InvalidUtf8)
        }
        DataType::Binary | DataType::VarBinary => {
            ensure(src, 1)?;
            let len = src.get_u8() as usize;
            if len == 0 {
                return Ok(Value::Null);
            }
            ensure(src, len)?;
            let mut bytes = vec![0u8; len];
            src.copy_to_slice(&mut bytes);
            Ok(Value::Binary(Bytes::from(bytes)))
        }
    }
}

fn put_int(dst: &mut impl BufMut, v: i64, len: usize) {
    match len {
        1 => dst.put_u8(v as u8),
        2 => dst.put_i16_le(v as i16),
        4 => dst.put_i32_le(v as i32),
        _ => dst.put_i64_le(v),
    }
}

/// Encode one value in the wire datatype requested by a parameter
/// format entry.
pub fn encode_value(
    dst: &mut impl BufMut,
    fmt: &ColumnFormat,
    value: &Value,
) -> Result<(), ProtocolError> {
    let datatype = fmt.datatype;
    match (datatype, value) {
        (DataType::Bit, Value::Bit(b)) => dst.put_u8(u8::from(*b)),
        (DataType::Int1, Value::Int(v)) => dst.put_u8(*v as u8),
        (DataType::Int2, Value::Int(v)) => dst.put_i16_le(*v as i16),
        (DataType::Int4, Value::Int(v)) => dst.put_i32_le(*v as i32),
        (DataType::Int8, Value::Int(v)) => dst.put_i64_le(*v),
        (DataType::Flt4, Value::Float(v)) => dst.put_f32_le(*v as f32),
        (DataType::Flt8, Value::Float(v)) => dst.put_f64_le(*v),
        (DataType::IntN, Value::Null) | (DataType::FltN, Value::Null) => dst.put_u8(0),
        (DataType::IntN, Value::Int(v)) => {
            let len = match fmt.max_length {
                1 | 2 | 4 | 8 => fmt.max_length as usize,
                _ => 8,
            };
            dst.put_u8(len as u8);
            put_int(dst, *v, len);
        }
        (DataType::FltN, Value::Float(v)) => {
            if fmt.max_length == 4 {
                dst.put_u8(4);
                dst.put_f32_le(*v as f32);
            } else {
                dst.put_u8(8);
                dst.put_f64_le(*v);
            }
        }
        (DataType::Char | DataType::VarChar, Value::Null)
        | (DataType::Binary | DataType::VarBinary, Value::Null) => dst.put_u8(0),
        (DataType::Char | DataType::VarChar, Value::String(s)) => {
            if s.len() > 255 {
                return Err(ProtocolError::Unencodable(datatype));
            }
            dst.put_u8(s.len() as u8);
            dst.put_slice(s.as_bytes());
        }
        (DataType::Binary | DataType::VarBinary, Value::Binary(b)) => {
            if b.len() > 255 {
                return Err(ProtocolError::Unencodable(datatype));
            }
            dst.put_u8(b.len() as u8);
            dst.put_slice(b);
        }
        _ => return Err(ProtocolError::Unencodable(datatype)),
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use bytes::BytesMut;

    fn fmt(datatype: DataType, max_length: u32) -> ColumnFormat {
        ColumnFormat {
            label_name: String::new(),
            column_name: "c".to_string(),
            status: 0,
            user_type: 0,
            datatype,
            max_length,
            locale: String::new(),
        }
    }

    fn roundtrip(datatype: DataType, max_length: u32, value: Value) {
        let fmt = fmt(datatype, max_length);
        let mut buf = BytesMut::new();
        encode_value(&mut buf, &fmt, &value).unwrap();
        let mut cursor = &buf[..];
        assert_eq!(decode_value(&mut cursor, &fmt).unwrap(), value);
        assert!(cursor.is_empty());
    }

    #[test]
    fn fixed_int_roundtrip() {
        roundtrip(DataType::Int4, 0, Value::Int(-42));
        roundtrip(DataType::Int2, 0, Value::Int(1000));
        roundtrip(DataType::Int8, 0, Value::Int(i64::MAX));
    }

    #[test]
    fn nullable_int_roundtrip() {
        roundtrip(DataType::IntN, 4, Value::Int(7));
        roundtrip(DataType::IntN, 4, Value::Null);
    }

    #[test]
    fn float_roundtrip() {
        roundtrip(DataType::Flt8, 0, Value::Float(3.5));
        roundtrip(DataType::FltN, 8, Value::Float(-0.25));
        roundtrip(DataType::FltN, 8, Value::Null);
    }

    #[test]
    fn varchar_roundtrip() {
        roundtrip(DataType::VarChar, 30, Value::String("au_lname".to_string()));
        roundtrip(DataType::VarChar, 30, Value::Null);
    }

    #[test]
    fn varbinary_roundtrip() {
        roundtrip(
            DataType::VarBinary,
            16,
            Value::Binary(Bytes::from_static(&[1, 2, 3])),
        );
    }

    #[test]
    fn bit_roundtrip() {
        roundtrip(DataType::Bit, 0, Value::Bit(true));
        roundtrip(DataType::Bit, 0, Value::Bit(false));
    }

    #[test]
    fn intn_rejects_bad_length() {
        let fmt = fmt(DataType::IntN, 4);
        let mut cursor = &[3u8, 0, 0, 0][..];
        assert!(matches!(
            decode_value(&mut cursor, &fmt),
            Err(ProtocolError::InvalidValueLength { .. })
        ));
    }

    #[test]
    fn mismatched_value_is_unencodable() {
        let fmt = fmt(DataType::Int4, 0);
        let mut buf = BytesMut::new();
        assert_eq!(
            encode_value(&mut buf, &fmt, &Value::String("x".into())).unwrap_err(),
            ProtocolError::Unencodable(DataType::Int4)
        );
    }
}
