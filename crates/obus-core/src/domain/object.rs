//! Objects: a handle-identified struct described by an [`ObjectDesc`].
//!
//! Wire layout:
//!
//! ```text
//! [uid:u16][handle:u16][size:u32][struct]
//! ```
//!
//! The size prefix lets a receiver skip an object whose type it does not know.

use std::sync::Arc;

use tracing::error;

use crate::domain::descriptor::{BusDesc, MethodDesc, ObjectDesc};
use crate::domain::call::MethodState;
use crate::domain::structure::Struct;
use crate::domain::value::Value;
use crate::protocol::codec::{Buffer, ProtocolError};

/// Handle value of an object that has not been registered yet.
pub const INVALID_HANDLE: u16 = 0;

/// Non-owning reference to an object in a bus registry.
///
/// Events and calls point at their object through this instead of holding it,
/// so that the registry stays the single owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObjectRef {
    pub uid: u16,
    pub handle: u16,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Object {
    desc: Arc<ObjectDesc>,
    handle: u16,
    pub(crate) fields: Struct,
}

impl Object {
    /// Creates an object with an empty struct.
    pub fn new(desc: Arc<ObjectDesc>, handle: u16) -> Self {
        let fields = Struct::new(Arc::clone(&desc.struct_desc));
        Self::with_struct(desc, handle, fields)
    }

    pub fn with_struct(desc: Arc<ObjectDesc>, handle: u16, fields: Struct) -> Self {
        Self {
            desc,
            handle,
            fields,
        }
    }

    pub fn desc(&self) -> &Arc<ObjectDesc> {
        &self.desc
    }

    pub fn uid(&self) -> u16 {
        self.desc.uid
    }

    pub fn handle(&self) -> u16 {
        self.handle
    }

    pub fn is_registered(&self) -> bool {
        self.handle != INVALID_HANDLE
    }

    pub fn object_ref(&self) -> ObjectRef {
        ObjectRef {
            uid: self.desc.uid,
            handle: self.handle,
        }
    }

    pub fn fields(&self) -> &Struct {
        &self.fields
    }

    pub fn fields_mut(&mut self) -> &mut Struct {
        &mut self.fields
    }

    pub fn field_by_name(&self, name: &str) -> Option<&Value> {
        self.fields.get_by_name(name)
    }

    /// Current state of `method`, or `None` if the server never reported it.
    pub fn method_state(&self, method: &MethodDesc) -> Option<MethodState> {
        match self.fields.get_uid(method.uid)? {
            Value::Enum(v) => MethodState::from_i32(*v),
            _ => None,
        }
    }

    pub fn encode(&self, buf: &mut Buffer) -> Result<(), ProtocolError> {
        buf.write_u16(self.desc.uid);
        buf.write_u16(self.handle);
        let marker = buf.prepare_size_marker();
        self.fields.encode(buf)?;
        buf.write_size_marker(marker);
        Ok(())
    }

    /// Decodes one object.
    ///
    /// Returns `Ok(None)` when the object uid is unknown or its struct cannot
    /// be decoded: the error is logged and the record is skipped using its
    /// size prefix.  Truncation of the fixed header is a hard error.
    pub fn decode(bus: &BusDesc, buf: &mut Buffer) -> Result<Option<Self>, ProtocolError> {
        let uid = buf.read_u16()?;
        let handle = buf.read_u16()?;
        let size = buf.read_u32()? as usize;
        let start = buf.pos();

        let Some(desc) = bus.object(uid) else {
            error!(uid, handle, "cannot decode object: unknown uid");
            buf.set_pos(start + size);
            return Ok(None);
        };

        match Struct::decode(&desc.struct_desc, buf) {
            Ok(fields) => Ok(Some(Self::with_struct(Arc::clone(desc), handle, fields))),
            Err(e) => {
                error!(uid, handle, error = %e, "cannot decode object struct");
                buf.set_pos(start + size);
                Ok(None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::descriptor::{FieldDesc, FieldRole, FieldType, ObjectDescBuilder, StructDesc};

    fn bus() -> BusDesc {
        let mut bus = BusDesc::new("test", 1);
        let desc = ObjectDescBuilder::new(3, "lamp")
            .property(FieldDesc::new("level", 1, FieldType::U8, FieldRole::Property))
            .unwrap()
            .method(MethodDesc::new(2, "toggle", StructDesc::new()))
            .unwrap()
            .build()
            .unwrap();
        bus.add_object(desc).unwrap();
        bus
    }

    #[test]
    fn test_object_wire_layout() {
        // Arrange
        let bus = bus();
        let mut obj = Object::new(Arc::clone(bus.object(3).unwrap()), 0x0102);
        obj.fields_mut().set_by_name("level", Value::U8(9)).unwrap();
        let mut buf = Buffer::new();

        // Act
        obj.encode(&mut buf).unwrap();

        // Assert – uid, handle, size=6, struct{count=1, uid=1, tag=U8, 9}
        assert_eq!(
            buf.as_bytes(),
            &[0, 3, 1, 2, 0, 0, 0, 6, 0, 1, 0, 1, 0, 9]
        );
    }

    #[test]
    fn test_decode_round_trip_keeps_handle_and_fields() {
        let bus = bus();
        let mut obj = Object::new(Arc::clone(bus.object(3).unwrap()), 7);
        obj.fields_mut()
            .set_by_name("method_state_toggle", Value::Enum(MethodState::Enabled as i32))
            .unwrap();
        let mut buf = Buffer::new();
        obj.encode(&mut buf).unwrap();
        buf.rewind();

        let decoded = Object::decode(&bus, &mut buf).unwrap().unwrap();

        assert_eq!(decoded, obj);
        let method = decoded.desc().find_method("toggle").unwrap();
        assert_eq!(decoded.method_state(method), Some(MethodState::Enabled));
    }

    #[test]
    fn test_unknown_uid_is_skipped_by_size() {
        // Arrange – unknown object followed by a sentinel
        let bus = bus();
        let mut buf = Buffer::new();
        buf.write_u16(99);
        buf.write_u16(1);
        let marker = buf.prepare_size_marker();
        buf.write_bytes(&[1, 2, 3]);
        buf.write_size_marker(marker);
        buf.write_u8(0xAB);
        buf.rewind();

        // Act
        let result = Object::decode(&bus, &mut buf).unwrap();

        // Assert
        assert!(result.is_none());
        assert_eq!(buf.read_u8().unwrap(), 0xAB);
    }

    #[test]
    fn test_unregistered_object_has_invalid_handle() {
        let bus = bus();
        let obj = Object::new(Arc::clone(bus.object(3).unwrap()), INVALID_HANDLE);
        assert!(!obj.is_registered());
        assert_eq!(obj.object_ref(), ObjectRef { uid: 3, handle: 0 });
    }
}
