//! Bus events: batches of registrations, unregistrations and object events
//! applied as one unit.
//!
//! Base bus events (connected, disconnected, ...) are synthesized by the
//! client or wrap a single ADD / REMOVE / EVENT packet.  Bus-specific events
//! described by a [`BusEventDesc`] arrive whole in a BUS_EVENT packet:
//!
//! ```text
//! [uid:u16][adds:u32][removes:u32][events:u32]
//! [object]*adds  ([uid:u16][handle:u16])*removes  [event]*events
//! ```

use std::fmt;
use std::sync::Arc;

use tracing::error;

use crate::domain::bus::Bus;
use crate::domain::descriptor::BusEventDesc;
use crate::domain::event::Event;
use crate::domain::object::Object;
use crate::protocol::codec::{Buffer, ProtocolError};

/// Bus event types shared by every bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BaseBusEvent {
    Connected,
    Disconnected,
    ConnectionRefused,
    ObjectRegistered,
    ObjectUnregistered,
    ObjectEvent,
}

impl BaseBusEvent {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Connected => "CONNECTED",
            Self::Disconnected => "DISCONNECTED",
            Self::ConnectionRefused => "CONNECTION_REFUSED",
            Self::ObjectRegistered => "OBJECT_REGISTERED",
            Self::ObjectUnregistered => "OBJECT_UNREGISTERED",
            Self::ObjectEvent => "OBJECT_EVENT",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum BusEventKind {
    Base(BaseBusEvent),
    Bus(Arc<BusEventDesc>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct BusEvent {
    kind: BusEventKind,
    add_list: Vec<Object>,
    remove_list: Vec<Object>,
    event_list: Vec<Event>,
    dispatched: bool,
}

impl BusEvent {
    fn base(kind: BaseBusEvent) -> Self {
        Self {
            kind: BusEventKind::Base(kind),
            add_list: Vec::new(),
            remove_list: Vec::new(),
            event_list: Vec::new(),
            dispatched: false,
        }
    }

    /// Creates an empty bus-specific event.
    pub fn new(desc: Arc<BusEventDesc>) -> Self {
        Self {
            kind: BusEventKind::Bus(desc),
            ..Self::base(BaseBusEvent::ObjectEvent)
        }
    }

    /// Connection accepted: every object of the server snapshot is added.
    pub fn connected(objects: Vec<Object>) -> Self {
        Self {
            add_list: objects,
            ..Self::base(BaseBusEvent::Connected)
        }
    }

    /// Connection lost: every registered object is removed.
    pub fn disconnected(objects: Vec<Object>) -> Self {
        Self {
            remove_list: objects,
            ..Self::base(BaseBusEvent::Disconnected)
        }
    }

    pub fn connection_refused() -> Self {
        Self::base(BaseBusEvent::ConnectionRefused)
    }

    pub fn object_registered(obj: Object) -> Self {
        Self {
            add_list: vec![obj],
            ..Self::base(BaseBusEvent::ObjectRegistered)
        }
    }

    pub fn object_unregistered(obj: Object) -> Self {
        Self {
            remove_list: vec![obj],
            ..Self::base(BaseBusEvent::ObjectUnregistered)
        }
    }

    pub fn object_event(evt: Event) -> Self {
        Self {
            event_list: vec![evt],
            ..Self::base(BaseBusEvent::ObjectEvent)
        }
    }

    pub fn kind(&self) -> &BusEventKind {
        &self.kind
    }

    /// The base type, or `None` for a bus-specific event.
    pub fn base_type(&self) -> Option<BaseBusEvent> {
        match self.kind {
            BusEventKind::Base(b) => Some(b),
            BusEventKind::Bus(_) => None,
        }
    }

    pub fn is_base_event(&self) -> bool {
        self.base_type().is_some()
    }

    pub fn name(&self) -> &str {
        match &self.kind {
            BusEventKind::Base(b) => b.as_str(),
            BusEventKind::Bus(desc) => &desc.name,
        }
    }

    pub fn add_list(&self) -> &[Object] {
        &self.add_list
    }

    pub fn remove_list(&self) -> &[Object] {
        &self.remove_list
    }

    pub fn event_list(&self) -> &[Event] {
        &self.event_list
    }

    pub fn event_list_mut(&mut self) -> &mut [Event] {
        &mut self.event_list
    }

    pub fn push_add(&mut self, obj: Object) {
        self.add_list.push(obj);
    }

    pub fn push_remove(&mut self, obj: Object) {
        self.remove_list.push(obj);
    }

    pub fn push_event(&mut self, evt: Event) {
        self.event_list.push(evt);
    }

    pub fn is_dispatched(&self) -> bool {
        self.dispatched
    }

    /// Marks the event dispatched and returns whether it already was.
    pub fn mark_dispatched(&mut self) -> bool {
        std::mem::replace(&mut self.dispatched, true)
    }

    /// Encodes a bus-specific event.  Base events never travel as BUS_EVENT.
    pub fn encode(&self, buf: &mut Buffer) -> Result<(), ProtocolError> {
        let BusEventKind::Bus(desc) = &self.kind else {
            return Err(ProtocolError::Encode(format!(
                "base bus event {} cannot be encoded",
                self.name()
            )));
        };
        let count = |n: usize| {
            u32::try_from(n).map_err(|_| ProtocolError::Encode("bus event list too long".into()))
        };
        buf.write_u16(desc.uid);
        buf.write_u32(count(self.add_list.len())?);
        buf.write_u32(count(self.remove_list.len())?);
        buf.write_u32(count(self.event_list.len())?);
        for obj in &self.add_list {
            obj.encode(buf)?;
        }
        for obj in &self.remove_list {
            buf.write_u16(obj.uid());
            buf.write_u16(obj.handle());
        }
        for evt in &self.event_list {
            evt.encode(buf)?;
        }
        Ok(())
    }

    /// Decodes a BUS_EVENT body.  An unknown bus event uid fails the whole
    /// packet; individual items that cannot be resolved are logged and dropped.
    pub fn decode(bus: &Bus, buf: &mut Buffer) -> Result<Self, ProtocolError> {
        let uid = buf.read_u16()?;
        let desc = bus.desc().event(uid).cloned().ok_or_else(|| {
            ProtocolError::MalformedPayload(format!("unknown bus event uid={uid}"))
        })?;
        let mut out = Self::new(desc);

        let add_count = buf.read_u32()?;
        let remove_count = buf.read_u32()?;
        let event_count = buf.read_u32()?;

        for _ in 0..add_count {
            if let Some(obj) = Object::decode(bus.desc(), buf)? {
                out.add_list.push(obj);
            }
        }
        for _ in 0..remove_count {
            let obj_uid = buf.read_u16()?;
            let handle = buf.read_u16()?;
            match bus.resolve(obj_uid, handle) {
                Ok(obj) => out.remove_list.push(obj.clone()),
                Err(e) => error!(error = %e, "dropping bus event remove item"),
            }
        }
        for _ in 0..event_count {
            if let Some(evt) = Event::decode(bus, buf)? {
                out.event_list.push(evt);
            }
        }
        Ok(out)
    }
}

impl fmt::Display for BusEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{{name={}, add={}, remove={}, event={}}}",
            self.name(),
            self.add_list.len(),
            self.remove_list.len(),
            self.event_list.len()
        )
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
                ObjectDescBuilder::new(1, "item")
                    .property(FieldDesc::new("n", 1, FieldType::U32, FieldRole::Property))
                    .unwrap()
                    .event(1, "bumped", &["n"])
                    .unwrap()
                    .build()
                    .unwrap(),
            )
            .unwrap();
        desc.add_event(BusEventDesc::new(3, "refresh")).unwrap();
        let mut bus = Bus::new(Arc::new(desc));
        bus.register(Object::new(Arc::clone(&obj_desc), 10)).unwrap();
        bus.register(Object::new(obj_desc, 11)).unwrap();
        bus
    }

    #[test]
    fn test_bus_event_encode_decode_keeps_all_lists() {
        // Arrange
        let bus = bus();
        let mut evt = BusEvent::new(Arc::clone(bus.desc().event(3).unwrap()));
        let mut added = Object::new(Arc::clone(bus.desc().object(1).unwrap()), 12);
        added.fields_mut().set_by_name("n", Value::U32(1)).unwrap();
        evt.push_add(added);
        evt.push_remove(bus.find(11).unwrap().clone());
        let target = bus.find(10).unwrap();
        let mut bump = Event::new(Arc::clone(target.desc().event(1).unwrap()), target);
        bump.fields_mut().set_by_name("n", Value::U32(5)).unwrap();
        evt.push_event(bump);
        let mut buf = Buffer::new();

        // Act
        evt.encode(&mut buf).unwrap();
        buf.rewind();
        let decoded = BusEvent::decode(&bus, &mut buf).unwrap();

        // Assert
        assert_eq!(decoded, evt);
        assert_eq!(decoded.to_string(), "{name=refresh, add=1, remove=1, event=1}");
    }

    #[test]
    fn test_unresolvable_remove_item_is_dropped() {
        let bus = bus();
        let mut buf = Buffer::new();
        buf.write_u16(3);
        buf.write_u32(0);
        buf.write_u32(2);
        buf.write_u32(0);
        buf.write_u16(1);
        buf.write_u16(99);
        buf.write_u16(1);
        buf.write_u16(10);
        buf.rewind();

        let decoded = BusEvent::decode(&bus, &mut buf).unwrap();

        assert_eq!(decoded.remove_list().len(), 1);
        assert_eq!(decoded.remove_list()[0].handle(), 10);
    }

    #[test]
    fn test_unknown_bus_event_uid_fails_packet() {
        let bus = bus();
        let mut buf = Buffer::from_bytes(vec![0, 9, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0]);
        assert!(BusEvent::decode(&bus, &mut buf).is_err());
    }

    #[test]
    fn test_base_events_are_not_encodable() {
        let mut buf = Buffer::new();
        assert!(BusEvent::connection_refused().encode(&mut buf).is_err());
    }

    #[test]
    fn test_mark_dispatched_reports_previous_state() {
        let mut evt = BusEvent::connected(Vec::new());
        assert!(!evt.mark_dispatched());
        assert!(evt.mark_dispatched());
        assert_eq!(evt.base_type(), Some(BaseBusEvent::Connected));
    }
}
