//! Object events: a partial struct update tagged with an event type.
//!
//! Wire layout:
//!
//! ```text
//! [obj uid:u16][obj handle:u16][event uid:u16][size:u32][diff struct]
//! ```

use std::sync::Arc;

use tracing::{error, warn};

use crate::domain::bus::Bus;
use crate::domain::descriptor::EventDesc;
use crate::domain::object::{Object, ObjectRef};
use crate::domain::structure::Struct;
use crate::protocol::codec::{Buffer, ProtocolError};

#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    desc: Arc<EventDesc>,
    obj: ObjectRef,
    fields: Struct,
    committed: bool,
}

impl Event {
    /// Creates an empty event for `obj`.  The diff uses the object's struct descriptor.
    pub fn new(desc: Arc<EventDesc>, obj: &Object) -> Self {
        let fields = Struct::new(Arc::clone(&obj.desc().struct_desc));
        Self::with_struct(desc, obj.object_ref(), fields)
    }

    pub fn with_struct(desc: Arc<EventDesc>, obj: ObjectRef, fields: Struct) -> Self {
        Self {
            desc,
            obj,
            fields,
            committed: false,
        }
    }

    pub fn desc(&self) -> &Arc<EventDesc> {
        &self.desc
    }

    pub fn uid(&self) -> u16 {
        self.desc.uid
    }

    pub fn obj(&self) -> ObjectRef {
        self.obj
    }

    pub fn fields(&self) -> &Struct {
        &self.fields
    }

    pub fn fields_mut(&mut self) -> &mut Struct {
        &mut self.fields
    }

    pub fn is_committed(&self) -> bool {
        self.committed
    }

    /// Merges the diff into `obj`.  Only the first commit has an effect.
    pub fn commit(&mut self, obj: &mut Object) {
        if !self.committed {
            obj.fields.merge(&self.fields);
        }
        self.committed = true;
    }

    pub fn encode(&self, buf: &mut Buffer) -> Result<(), ProtocolError> {
        buf.write_u16(self.obj.uid);
        buf.write_u16(self.obj.handle);
        buf.write_u16(self.desc.uid);
        let marker = buf.prepare_size_marker();
        self.fields.encode(buf)?;
        buf.write_size_marker(marker);
        Ok(())
    }

    /// Decodes an event against the live objects of `bus`.
    ///
    /// An unregistered object, an object uid mismatch or an unknown event uid
    /// is logged and the record skipped (`Ok(None)`).  Fields updated but not
    /// declared by the event descriptor are accepted with a warning.
    pub fn decode(bus: &Bus, buf: &mut Buffer) -> Result<Option<Self>, ProtocolError> {
        let obj_uid = buf.read_u16()?;
        let obj_handle = buf.read_u16()?;
        let evt_uid = buf.read_u16()?;
        let size = buf.read_u32()? as usize;
        let start = buf.pos();

        let decoded = bus.resolve(obj_uid, obj_handle).and_then(|obj| {
            let desc = obj.desc().event(evt_uid).cloned().ok_or_else(|| {
                ProtocolError::MalformedPayload(format!(
                    "object uid={} has no event uid={evt_uid}",
                    obj.uid()
                ))
            })?;
            let fields = Struct::decode(&obj.desc().struct_desc, buf)?;
            for (field, _) in fields.iter() {
                if !desc.updates(field.uid) {
                    warn!(
                        object = %obj.desc().name,
                        handle = obj_handle,
                        event = %desc.name,
                        "event updates undeclared {} '{}'",
                        field.role,
                        field.name
                    );
                }
            }
            Ok(Self::with_struct(desc, obj.object_ref(), fields))
        });

        match decoded {
            Ok(evt) => Ok(Some(evt)),
            Err(e) => {
                error!(error = %e, "cannot decode event");
                buf.set_pos(start + size);
                Ok(None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::descriptor::{BusDesc, FieldDesc, FieldRole, FieldType, ObjectDescBuilder};
    use crate::domain::value::Value;

    fn bus() -> Bus {
        let mut desc = BusDesc::new("test", 0);
        let obj_desc = desc
            .add_object(
                ObjectDescBuilder::new(2, "sensor")
                    .property(FieldDesc::new("temp", 1, FieldType::I16, FieldRole::Property))
                    .unwrap()
                    .property(FieldDesc::new("unit", 2, FieldType::String, FieldRole::Property))
                    .unwrap()
                    .event(5, "changed", &["temp"])
                    .unwrap()
                    .build()
                    .unwrap(),
            )
            .unwrap();
        let mut bus = Bus::new(Arc::new(desc));
        let mut obj = Object::new(obj_desc, 40);
        obj.fields_mut().set_by_name("temp", Value::I16(20)).unwrap();
        obj.fields_mut()
            .set_by_name("unit", Value::String(Some("C".into())))
            .unwrap();
        bus.register(obj).unwrap();
        bus
    }

    fn changed(bus: &Bus, temp: i16) -> Event {
        let obj = bus.find(40).unwrap();
        let desc = Arc::clone(obj.desc().find_event("changed").unwrap());
        let mut evt = Event::new(desc, obj);
        evt.fields_mut().set_by_name("temp", Value::I16(temp)).unwrap();
        evt
    }

    #[test]
    fn test_commit_merges_diff_into_object() {
        // Arrange
        let mut bus = bus();
        let mut evt = changed(&bus, 25);

        // Act
        let obj = bus.find_mut(40).unwrap();
        evt.commit(obj);

        // Assert
        assert!(evt.is_committed());
        assert_eq!(obj.field_by_name("temp"), Some(&Value::I16(25)));
        assert_eq!(obj.field_by_name("unit").and_then(Value::as_str), Some("C"));
    }

    #[test]
    fn test_commit_twice_equals_commit_once() {
        // Arrange
        let mut bus = bus();
        let mut evt = changed(&bus, 25);
        let obj = bus.find_mut(40).unwrap();
        evt.commit(obj);
        let after_once = obj.clone();

        // Act – a later local change must not be overwritten by a re-commit
        obj.fields_mut().set_by_name("temp", Value::I16(30)).unwrap();
        evt.commit(obj);
        obj.fields_mut().set_by_name("temp", Value::I16(25)).unwrap();

        // Assert
        assert_eq!(*obj, after_once);
    }

    #[test]
    fn test_decode_resolves_object_and_accepts_undeclared_field() {
        // Arrange – "unit" is not declared by the event but still accepted
        let bus = bus();
        let mut evt = changed(&bus, -3);
        evt.fields_mut()
            .set_by_name("unit", Value::String(Some("F".into())))
            .unwrap();
        let mut buf = Buffer::new();
        evt.encode(&mut buf).unwrap();
        buf.rewind();

        // Act
        let decoded = Event::decode(&bus, &mut buf).unwrap().unwrap();

        // Assert
        assert_eq!(decoded, evt);
        assert_eq!(decoded.obj(), ObjectRef { uid: 2, handle: 40 });
    }

    #[test]
    fn test_decode_with_uid_mismatch_is_skipped() {
        let bus = bus();
        let evt = changed(&bus, 1);
        let mut buf = Buffer::new();
        evt.encode(&mut buf).unwrap();
        // corrupt the object uid
        let mut bytes = buf.into_bytes();
        bytes[1] = 7;
        bytes.push(0x55);
        let mut buf = Buffer::from_bytes(bytes);

        assert!(Event::decode(&bus, &mut buf).unwrap().is_none());
        assert_eq!(buf.read_u8().unwrap(), 0x55);
    }
}
