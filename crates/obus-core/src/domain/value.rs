//! Typed field values and their wire encoding.

use std::fmt;

use crate::domain::descriptor::{FieldDesc, FieldType, FIELD_ARRAY_FLAG};
use crate::protocol::codec::{Buffer, ProtocolError};

/// A single field value.
///
/// Enum values are held as their integer representation; the field's
/// [`EnumDriver`](crate::domain::descriptor::EnumDriver) maps them to names.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Bool(bool),
    U8(u8),
    I8(i8),
    U16(u16),
    I16(i16),
    U32(u32),
    I32(i32),
    U64(u64),
    I64(i64),
    Enum(i32),
    String(Option<String>),
    F32(f32),
    F64(f64),
    Array(Vec<Value>),
}

impl Value {
    /// Base type of a scalar value; `None` for arrays.
    pub fn field_type(&self) -> Option<FieldType> {
        Some(match self {
            Self::Bool(_) => FieldType::Bool,
            Self::U8(_) => FieldType::U8,
            Self::I8(_) => FieldType::I8,
            Self::U16(_) => FieldType::U16,
            Self::I16(_) => FieldType::I16,
            Self::U32(_) => FieldType::U32,
            Self::I32(_) => FieldType::I32,
            Self::U64(_) => FieldType::U64,
            Self::I64(_) => FieldType::I64,
            Self::Enum(_) => FieldType::Enum,
            Self::String(_) => FieldType::String,
            Self::F32(_) => FieldType::F32,
            Self::F64(_) => FieldType::F64,
            Self::Array(_) => return None,
        })
    }

    /// Returns `true` when this value can be stored in a field described by `desc`.
    ///
    /// Enum values must also be items of the field's driver.
    pub fn matches(&self, desc: &FieldDesc) -> bool {
        match self {
            Self::Array(items) => desc.is_array && items.iter().all(|v| v.matches_scalar(desc)),
            _ => !desc.is_array && self.matches_scalar(desc),
        }
    }

    fn matches_scalar(&self, desc: &FieldDesc) -> bool {
        match (self, &desc.driver) {
            (Self::Enum(v), Some(driver)) => driver.has_value(*v),
            (Self::Enum(_), None) => false,
            (other, _) => other.field_type() == Some(desc.field_type),
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        Some(match *self {
            Self::U8(v) => v.into(),
            Self::I8(v) => v.into(),
            Self::U16(v) => v.into(),
            Self::I16(v) => v.into(),
            Self::U32(v) => v.into(),
            Self::I32(v) | Self::Enum(v) => v.into(),
            Self::I64(v) => v,
            Self::U64(v) => return i64::try_from(v).ok(),
            _ => return None,
        })
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => s.as_deref(),
            _ => None,
        }
    }

    // ── Wire encoding ─────────────────────────────────────────────────────────

    /// Writes the value payload (without uid and type tag) for field `desc`.
    pub fn encode(&self, desc: &FieldDesc, buf: &mut Buffer) -> Result<(), ProtocolError> {
        if !self.matches(desc) {
            return Err(ProtocolError::Encode(format!(
                "value {self:?} does not fit field '{}'",
                desc.name
            )));
        }
        match self {
            Self::Array(items) => {
                let count = u32::try_from(items.len()).map_err(|_| {
                    ProtocolError::Encode(format!("array '{}' is too long", desc.name))
                })?;
                buf.write_u32(count);
                items.iter().try_for_each(|v| v.encode_scalar(buf))
            }
            scalar => scalar.encode_scalar(buf),
        }
    }

    fn encode_scalar(&self, buf: &mut Buffer) -> Result<(), ProtocolError> {
        match self {
            Self::Bool(v) => buf.write_u8(u8::from(*v)),
            Self::U8(v) => buf.write_u8(*v),
            Self::I8(v) => buf.write_i8(*v),
            Self::U16(v) => buf.write_u16(*v),
            Self::I16(v) => buf.write_i16(*v),
            Self::U32(v) => buf.write_u32(*v),
            Self::I32(v) | Self::Enum(v) => buf.write_i32(*v),
            Self::U64(v) => buf.write_u64(*v),
            Self::I64(v) => buf.write_i64(*v),
            Self::String(v) => buf.write_string(v.as_deref())?,
            Self::F32(v) => buf.write_f32(*v),
            Self::F64(v) => buf.write_f64(*v),
            Self::Array(_) => {
                return Err(ProtocolError::Encode("nested arrays are not supported".into()))
            }
        }
        Ok(())
    }

    /// Reads a value payload for field `desc`.
    ///
    /// Enum integers unknown to the field's driver are a decode error.
    pub fn decode(desc: &FieldDesc, buf: &mut Buffer) -> Result<Self, ProtocolError> {
        if desc.is_array {
            let count = buf.read_u32()?;
            let mut items = Vec::new();
            for _ in 0..count {
                items.push(Self::decode_scalar(desc, buf)?);
            }
            Ok(Self::Array(items))
        } else {
            Self::decode_scalar(desc, buf)
        }
    }

    fn decode_scalar(desc: &FieldDesc, buf: &mut Buffer) -> Result<Self, ProtocolError> {
        Ok(match desc.field_type {
            FieldType::Bool => Self::Bool(buf.read_u8()? == 1),
            FieldType::U8 => Self::U8(buf.read_u8()?),
            FieldType::I8 => Self::I8(buf.read_i8()?),
            FieldType::U16 => Self::U16(buf.read_u16()?),
            FieldType::I16 => Self::I16(buf.read_i16()?),
            FieldType::U32 => Self::U32(buf.read_u32()?),
            FieldType::I32 => Self::I32(buf.read_i32()?),
            FieldType::U64 => Self::U64(buf.read_u64()?),
            FieldType::I64 => Self::I64(buf.read_i64()?),
            FieldType::String => Self::String(buf.read_string()?),
            FieldType::F32 => Self::F32(buf.read_f32()?),
            FieldType::F64 => Self::F64(buf.read_f64()?),
            FieldType::Enum => {
                let raw = buf.read_i32()?;
                let known = desc.driver.as_ref().is_some_and(|d| d.has_value(raw));
                if !known {
                    return Err(ProtocolError::MalformedPayload(format!(
                        "invalid value {raw} for enum field '{}'",
                        desc.name
                    )));
                }
                Self::Enum(raw)
            }
        })
    }

    /// Skips a field payload using only its wire type tag.
    pub fn skip(tag: u8, buf: &mut Buffer) -> Result<(), ProtocolError> {
        let base = FieldType::from_tag(tag).ok_or_else(|| {
            ProtocolError::MalformedPayload(format!("unknown field type tag {tag:#04x}"))
        })?;
        let count = if tag & FIELD_ARRAY_FLAG != 0 {
            buf.read_u32()?
        } else {
            1
        };
        for _ in 0..count {
            match base {
                FieldType::String => {
                    buf.read_string()?;
                }
                FieldType::U8 | FieldType::I8 | FieldType::Bool => {
                    buf.read_bytes(1)?;
                }
                FieldType::U16 | FieldType::I16 => {
                    buf.read_bytes(2)?;
                }
                FieldType::U32 | FieldType::I32 | FieldType::Enum | FieldType::F32 => {
                    buf.read_bytes(4)?;
                }
                FieldType::U64 | FieldType::I64 | FieldType::F64 => {
                    buf.read_bytes(8)?;
                }
            }
        }
        Ok(())
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(v) => write!(f, "{v}"),
            Self::U8(v) => write!(f, "{v}"),
            Self::I8(v) => write!(f, "{v}"),
            Self::U16(v) => write!(f, "{v}"),
            Self::I16(v) => write!(f, "{v}"),
            Self::U32(v) => write!(f, "{v}"),
            Self::I32(v) | Self::Enum(v) => write!(f, "{v}"),
            Self::U64(v) => write!(f, "{v}"),
            Self::I64(v) => write!(f, "{v}"),
            Self::String(Some(s)) => write!(f, "'{s}'"),
            Self::String(None) => f.write_str("None"),
            Self::F32(v) => write!(f, "{v}"),
            Self::F64(v) => write!(f, "{v}"),
            Self::Array(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str("]")
            }
        }
    }
}
