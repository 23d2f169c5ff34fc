//! Sparse, presence-tracked field maps.
//!
//! A [`Struct`] only holds the fields that were reported.  An absent field is
//! not the same as a zero or null value: it means "not part of this update",
//! which is what lets an event carry a partial diff of an object.
//!
//! Wire layout:
//!
//! ```text
//! [count:u16] ([uid:u16][type:u8][payload])*count
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use thiserror::Error;
use tracing::warn;

use crate::domain::descriptor::{FieldDesc, StructDesc};
use crate::domain::value::Value;
use crate::protocol::codec::{Buffer, ProtocolError};

/// Errors raised when setting a field through the generic accessors.
#[derive(Debug, Error, PartialEq)]
pub enum FieldError {
    #[error("no field named '{0}'")]
    UnknownField(String),

    #[error("field uid {0} is not part of this struct")]
    UnknownUid(u16),

    #[error("invalid value {value} for field '{field}'")]
    InvalidValue { field: String, value: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Struct {
    desc: Arc<StructDesc>,
    fields: BTreeMap<u16, Value>,
}

impl Struct {
    /// Creates an empty struct: no field present.
    pub fn new(desc: Arc<StructDesc>) -> Self {
        Self {
            desc,
            fields: BTreeMap::new(),
        }
    }

    pub fn desc(&self) -> &Arc<StructDesc> {
        &self.desc
    }

    pub fn has(&self, field: &FieldDesc) -> bool {
        self.fields.contains_key(&field.uid)
    }

    pub fn get(&self, field: &FieldDesc) -> Option<&Value> {
        self.fields.get(&field.uid)
    }

    pub fn get_uid(&self, uid: u16) -> Option<&Value> {
        self.fields.get(&uid)
    }

    pub fn get_by_name(&self, name: &str) -> Option<&Value> {
        let field = self.desc.find_field(name)?;
        self.fields.get(&field.uid)
    }

    /// Sets a field, checking that the value fits the descriptor.
    pub fn set(&mut self, field: &FieldDesc, value: Value) -> Result<(), FieldError> {
        if self.desc.field(field.uid).map(|f| f.as_ref()) != Some(field) {
            return Err(FieldError::UnknownUid(field.uid));
        }
        if !value.matches(field) {
            return Err(FieldError::InvalidValue {
                field: field.name.clone(),
                value: value.to_string(),
            });
        }
        self.fields.insert(field.uid, value);
        Ok(())
    }

    pub fn set_by_name(&mut self, name: &str, value: Value) -> Result<(), FieldError> {
        let field = self
            .desc
            .find_field(name)
            .cloned()
            .ok_or_else(|| FieldError::UnknownField(name.to_string()))?;
        self.set(&field, value)
    }

    /// Marks a field as absent again.
    pub fn clear(&mut self, field: &FieldDesc) -> Option<Value> {
        self.fields.remove(&field.uid)
    }

    /// Present fields as `(descriptor, value)` pairs in uid order.
    pub fn iter(&self) -> impl Iterator<Item = (&Arc<FieldDesc>, &Value)> {
        self.fields
            .iter()
            .filter_map(|(uid, v)| self.desc.field(*uid).map(|f| (f, v)))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Copies every field present in `other` over this struct.
    ///
    /// Idempotent: merging the same struct twice gives the same result as once.
    pub fn merge(&mut self, other: &Struct) {
        for (uid, value) in &other.fields {
            self.fields.insert(*uid, value.clone());
        }
    }

    // ── Wire encoding ─────────────────────────────────────────────────────────

    pub fn encode(&self, buf: &mut Buffer) -> Result<(), ProtocolError> {
        let count = u16::try_from(self.fields.len())
            .map_err(|_| ProtocolError::Encode("too many fields in struct".into()))?;
        buf.write_u16(count);
        for (field, value) in self.iter() {
            buf.write_u16(field.uid);
            buf.write_u8(field.wire_tag());
            value.encode(field, buf)?;
        }
        Ok(())
    }

    /// Decodes a struct.  Fields with an unknown uid, or whose wire type tag
    /// disagrees with the descriptor, are logged and skipped.
    pub fn decode(desc: &Arc<StructDesc>, buf: &mut Buffer) -> Result<Self, ProtocolError> {
        let mut out = Self::new(Arc::clone(desc));
        let count = buf.read_u16()?;
        for _ in 0..count {
            let uid = buf.read_u16()?;
            let tag = buf.read_u8()?;
            match desc.field(uid) {
                None => {
                    warn!(uid, tag, "cannot decode field: descriptor not found");
                    Value::skip(tag, buf)?;
                }
                Some(field) if field.wire_tag() != tag => {
                    warn!(
                        uid,
                        expected = field.wire_tag(),
                        decoded = tag,
                        "cannot decode field: type mismatch"
                    );
                    Value::skip(tag, buf)?;
                }
                Some(field) => {
                    let value = Value::decode(field, buf)?;
                    out.fields.insert(uid, value);
                }
            }
        }
        Ok(out)
    }
}

/// Formats present fields as `{name=value, ...}`.
impl fmt::Display for Struct {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for (i, (field, value)) in self.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}={value}", field.name)?;
        }
        f.write_str("}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::descriptor::{EnumDriver, FieldRole, FieldType};

    fn desc() -> Arc<StructDesc> {
        let mut d = StructDesc::new();
        d.add_field(FieldDesc::new("count", 1, FieldType::U32, FieldRole::Property))
            .unwrap();
        d.add_field(FieldDesc::new("label", 2, FieldType::String, FieldRole::Property))
            .unwrap();
        d.add_field(FieldDesc::new("ratio", 3, FieldType::F64, FieldRole::Property))
            .unwrap();
        d.add_field(
            FieldDesc::new("tags", 4, FieldType::I16, FieldRole::Property).array(),
        )
        .unwrap();
        d.add_field(FieldDesc::new_enum(
            "method_state_reset",
            5,
            FieldRole::Method,
            Arc::new(EnumDriver::method_state()),
        ))
        .unwrap();
        d.add_field(FieldDesc::new("on", 6, FieldType::Bool, FieldRole::Property))
            .unwrap();
        Arc::new(d)
    }

    fn full(desc: &Arc<StructDesc>) -> Struct {
        let mut s = Struct::new(Arc::clone(desc));
        s.set_by_name("count", Value::U32(7)).unwrap();
        s.set_by_name("label", Value::String(Some("hello".into()))).unwrap();
        s.set_by_name("ratio", Value::F64(0.5)).unwrap();
        s.set_by_name("tags", Value::Array(vec![Value::I16(-1), Value::I16(2)]))
            .unwrap();
        s.set_by_name("method_state_reset", Value::Enum(1)).unwrap();
        s.set_by_name("on", Value::Bool(true)).unwrap();
        s
    }

    #[test]
    fn test_fully_populated_struct_survives_encode_decode() {
        // Arrange
        let d = desc();
        let original = full(&d);
        let mut buf = Buffer::new();

        // Act
        original.encode(&mut buf).unwrap();
        buf.rewind();
        let decoded = Struct::decode(&d, &mut buf).unwrap();

        // Assert
        assert_eq!(decoded, original);
        assert_eq!(buf.remaining(), 0);
    }

    #[test]
    fn test_only_present_fields_are_encoded() {
        let d = desc();
        let mut s = Struct::new(Arc::clone(&d));
        s.set_by_name("count", Value::U32(1)).unwrap();
        let mut buf = Buffer::new();
        s.encode(&mut buf).unwrap();
        // count=1, uid=1, tag=U32, value
        assert_eq!(buf.as_bytes(), &[0, 1, 0, 1, 4, 0, 0, 0, 1]);
    }

    #[test]
    fn test_unknown_uid_and_type_mismatch_are_skipped() {
        // Arrange – field 99 unknown, field 1 sent as U16 instead of U32, field 2 valid
        let d = desc();
        let mut buf = Buffer::new();
        buf.write_u16(3);
        buf.write_u16(99);
        buf.write_u8(FieldType::String.tag());
        buf.write_string(Some("ignored")).unwrap();
        buf.write_u16(1);
        buf.write_u8(FieldType::U16.tag());
        buf.write_u16(5);
        buf.write_u16(2);
        buf.write_u8(FieldType::String.tag());
        buf.write_string(Some("kept")).unwrap();
        buf.rewind();

        // Act
        let s = Struct::decode(&d, &mut buf).unwrap();

        // Assert
        assert_eq!(s.len(), 1);
        assert_eq!(s.get_by_name("label").and_then(Value::as_str), Some("kept"));
        assert_eq!(buf.remaining(), 0);
    }

    #[test]
    fn test_merge_is_idempotent() {
        // Arrange
        let d = desc();
        let mut base = full(&d);
        let mut diff = Struct::new(Arc::clone(&d));
        diff.set_by_name("count", Value::U32(42)).unwrap();

        // Act
        base.merge(&diff);
        let once = base.clone();
        base.merge(&diff);

        // Assert
        assert_eq!(base, once);
        assert_eq!(base.get_by_name("count"), Some(&Value::U32(42)));
        assert_eq!(base.get_by_name("ratio"), Some(&Value::F64(0.5)));
    }

    #[test]
    fn test_set_rejects_wrong_type_and_unknown_name() {
        let d = desc();
        let mut s = Struct::new(Arc::clone(&d));
        assert!(matches!(
            s.set_by_name("count", Value::String(None)),
            Err(FieldError::InvalidValue { .. })
        ));
        assert_eq!(
            s.set_by_name("nope", Value::U8(0)),
            Err(FieldError::UnknownField("nope".into()))
        );
        assert!(s.is_empty());
    }

    #[test]
    fn test_set_rejects_field_from_another_struct() {
        let d = desc();
        let mut s = Struct::new(Arc::clone(&d));
        let foreign = FieldDesc::new("count", 1, FieldType::U8, FieldRole::Argument);
        assert_eq!(s.set(&foreign, Value::U8(1)), Err(FieldError::UnknownUid(1)));
    }

    #[test]
    fn test_truncated_struct_is_an_error() {
        let d = desc();
        let mut buf = Buffer::from_bytes(vec![0, 2, 0, 1, 4, 0]);
        assert!(Struct::decode(&d, &mut buf).is_err());
    }

    #[test]
    fn test_display_lists_present_fields_in_uid_order() {
        let mut s = Struct::new(desc());
        s.set_by_name("label", Value::String(Some("x".into()))).unwrap();
        s.set_by_name("count", Value::U32(3)).unwrap();
        assert_eq!(s.to_string(), "{count=3, label='x'}");
    }
}
