//! Descriptor tables: immutable metadata describing the shape of a bus.
//!
//! A [`BusDesc`] is produced once per bus (by a bus definition loader or a
//! code generator) and then shared read-only, usually behind an [`Arc`], for
//! the lifetime of the process.  Every runtime entity ([`Object`], [`Event`],
//! [`Call`], [`Struct`]) points back at the descriptor it was built from.
//!
//! ```text
//! BusDesc
//! ├── objects: uid → ObjectDesc
//! │   ├── struct_desc: uid → FieldDesc   (properties + method_state_* fields)
//! │   ├── events:      uid → EventDesc   (set of field uids each event may update)
//! │   └── methods:     uid → MethodDesc  (argument StructDesc)
//! └── events:  uid → BusEventDesc
//! ```
//!
//! [`Object`]: crate::domain::object::Object
//! [`Event`]: crate::domain::event::Event
//! [`Call`]: crate::domain::call::Call
//! [`Struct`]: crate::domain::structure::Struct

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use thiserror::Error;

use crate::domain::call::MethodState;

/// Wire flag marking a field as an array of its base type.
pub const FIELD_ARRAY_FLAG: u8 = 0x80;

/// Mask extracting the base type from a wire type tag.
pub const FIELD_TYPE_MASK: u8 = 0x7F;

/// Prefix of the enum field every method contributes to its object's struct.
pub const METHOD_STATE_PREFIX: &str = "method_state_";

/// Errors raised while building descriptor tables.
#[derive(Debug, Error, PartialEq)]
pub enum DescriptorError {
    #[error("duplicate field uid {uid} ('{name}')")]
    DuplicateField { uid: u16, name: String },

    #[error("duplicate event uid {0}")]
    DuplicateEvent(u16),

    #[error("duplicate method uid {0}")]
    DuplicateMethod(u16),

    #[error("duplicate object uid {0}")]
    DuplicateObject(u16),

    #[error("duplicate bus event uid {0}")]
    DuplicateBusEvent(u16),

    #[error("enum field '{0}' has no enum driver")]
    MissingDriver(String),

    #[error("event '{event}' updates unknown field '{field}'")]
    UnknownUpdate { event: String, field: String },
}

// ── Field types ───────────────────────────────────────────────────────────────

/// Base type of a field, with its wire tag as discriminant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FieldType {
    U8 = 0,
    I8 = 1,
    U16 = 2,
    I16 = 3,
    U32 = 4,
    I32 = 5,
    U64 = 6,
    I64 = 7,
    Enum = 8,
    String = 9,
    Bool = 10,
    F32 = 11,
    F64 = 12,
}

impl FieldType {
    /// Decodes the base type from a wire tag, ignoring the array flag.
    ///
    /// Returns `None` for base types this implementation does not know; such
    /// fields cannot be skipped because their payload size is unknown.
    pub fn from_tag(tag: u8) -> Option<Self> {
        Some(match tag & FIELD_TYPE_MASK {
            0 => Self::U8,
            1 => Self::I8,
            2 => Self::U16,
            3 => Self::I16,
            4 => Self::U32,
            5 => Self::I32,
            6 => Self::U64,
            7 => Self::I64,
            8 => Self::Enum,
            9 => Self::String,
            10 => Self::Bool,
            11 => Self::F32,
            12 => Self::F64,
            _ => return None,
        })
    }

    pub fn tag(self) -> u8 {
        self as u8
    }

    /// Parses a raw bus-definition type name (`uint8`, `string`, `enum`, ...).
    pub fn from_idl_name(name: &str) -> Option<Self> {
        Some(match name {
            "bool" => Self::Bool,
            "uint8" => Self::U8,
            "int8" => Self::I8,
            "uint16" | "handle" => Self::U16,
            "int16" => Self::I16,
            "uint32" => Self::U32,
            "int32" => Self::I32,
            "uint64" => Self::U64,
            "int64" => Self::I64,
            "string" => Self::String,
            "float" => Self::F32,
            "double" => Self::F64,
            "enum" => Self::Enum,
            _ => return None,
        })
    }
}

/// What a field represents inside its owning struct.  Not part of the wire format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldRole {
    Property,
    Method,
    Argument,
}

impl fmt::Display for FieldRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Property => "property",
            Self::Method => "method",
            Self::Argument => "argument",
        })
    }
}

// ── Enum drivers ──────────────────────────────────────────────────────────────

/// Name/integer mapping table for one enum type, with its default item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnumDriver {
    name: String,
    items: Vec<(String, i32)>,
    default: i32,
}

impl EnumDriver {
    pub fn new(name: impl Into<String>, items: Vec<(String, i32)>, default: i32) -> Self {
        Self {
            name: name.into(),
            items,
            default,
        }
    }

    /// Driver used by every `method_state_*` field.
    pub fn method_state() -> Self {
        let items = [
            MethodState::NotSupported,
            MethodState::Enabled,
            MethodState::Disabled,
        ]
        .iter()
        .map(|s| (s.as_str().to_string(), *s as i32))
        .collect();
        Self::new("method_state", items, MethodState::NotSupported as i32)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn default_value(&self) -> i32 {
        self.default
    }

    pub fn items(&self) -> impl Iterator<Item = (&str, i32)> {
        self.items.iter().map(|(n, v)| (n.as_str(), *v))
    }

    pub fn has_value(&self, value: i32) -> bool {
        self.items.iter().any(|(_, v)| *v == value)
    }

    pub fn value_of(&self, item: &str) -> Option<i32> {
        self.items
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(item))
            .map(|(_, v)| *v)
    }

    pub fn name_of(&self, value: i32) -> Option<&str> {
        self.items
            .iter()
            .find(|(_, v)| *v == value)
            .map(|(n, _)| n.as_str())
    }
}

// ── Field and struct descriptors ──────────────────────────────────────────────

/// Descriptor of a single struct field.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldDesc {
    pub name: String,
    pub uid: u16,
    pub field_type: FieldType,
    pub is_array: bool,
    pub role: FieldRole,
    /// Present iff `field_type` is [`FieldType::Enum`].
    pub driver: Option<Arc<EnumDriver>>,
}

impl FieldDesc {
    /// Creates a non-enum scalar field descriptor.
    pub fn new(name: impl Into<String>, uid: u16, field_type: FieldType, role: FieldRole) -> Self {
        Self {
            name: name.into(),
            uid,
            field_type,
            is_array: false,
            role,
            driver: None,
        }
    }

    /// Creates an enum field descriptor backed by `driver`.
    pub fn new_enum(
        name: impl Into<String>,
        uid: u16,
        role: FieldRole,
        driver: Arc<EnumDriver>,
    ) -> Self {
        Self {
            driver: Some(driver),
            ..Self::new(name, uid, FieldType::Enum, role)
        }
    }

    /// Turns this descriptor into an array of its base type.
    pub fn array(mut self) -> Self {
        self.is_array = true;
        self
    }

    /// Full wire type tag, including the array flag.
    pub fn wire_tag(&self) -> u8 {
        let tag = self.field_type.tag();
        if self.is_array {
            tag | FIELD_ARRAY_FLAG
        } else {
            tag
        }
    }

    pub fn is_enum(&self) -> bool {
        self.field_type == FieldType::Enum
    }
}

/// Ordered set of field descriptors keyed by uid.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StructDesc {
    fields: BTreeMap<u16, Arc<FieldDesc>>,
}

impl StructDesc {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_field(&mut self, field: FieldDesc) -> Result<(), DescriptorError> {
        if field.is_enum() && field.driver.is_none() {
            return Err(DescriptorError::MissingDriver(field.name));
        }
        if self.fields.contains_key(&field.uid) {
            return Err(DescriptorError::DuplicateField {
                uid: field.uid,
                name: field.name,
            });
        }
        self.fields.insert(field.uid, Arc::new(field));
        Ok(())
    }

    pub fn field(&self, uid: u16) -> Option<&Arc<FieldDesc>> {
        self.fields.get(&uid)
    }

    pub fn find_field(&self, name: &str) -> Option<&Arc<FieldDesc>> {
        self.fields.values().find(|f| f.name == name)
    }

    /// Fields in ascending uid order.
    pub fn fields(&self) -> impl Iterator<Item = &Arc<FieldDesc>> {
        self.fields.values()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

// ── Event / method / object descriptors ───────────────────────────────────────

/// Descriptor of an object event: which fields it is declared to update.
#[derive(Debug, Clone, PartialEq)]
pub struct EventDesc {
    pub uid: u16,
    pub name: String,
    updates: BTreeSet<u16>,
}

impl EventDesc {
    pub fn new(uid: u16, name: impl Into<String>) -> Self {
        Self {
            uid,
            name: name.into(),
            updates: BTreeSet::new(),
        }
    }

    /// Declares that this event may update field `uid`.
    pub fn add_update(&mut self, uid: u16) {
        self.updates.insert(uid);
    }

    pub fn updates(&self, uid: u16) -> bool {
        self.updates.contains(&uid)
    }

    pub fn update_uids(&self) -> impl Iterator<Item = u16> + '_ {
        self.updates.iter().copied()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MethodDesc {
    pub uid: u16,
    pub name: String,
    pub args: Arc<StructDesc>,
}

impl MethodDesc {
    pub fn new(uid: u16, name: impl Into<String>, args: StructDesc) -> Self {
        Self {
            uid,
            name: name.into(),
            args: Arc::new(args),
        }
    }

    /// Name of the enum field carrying this method's state in the object struct.
    pub fn state_field_name(&self) -> String {
        format!("{METHOD_STATE_PREFIX}{}", self.name)
    }
}

/// Descriptor of an object type.
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectDesc {
    pub uid: u16,
    pub name: String,
    pub struct_desc: Arc<StructDesc>,
    events: BTreeMap<u16, Arc<EventDesc>>,
    methods: BTreeMap<u16, Arc<MethodDesc>>,
}

impl ObjectDesc {
    pub fn event(&self, uid: u16) -> Option<&Arc<EventDesc>> {
        self.events.get(&uid)
    }

    pub fn method(&self, uid: u16) -> Option<&Arc<MethodDesc>> {
        self.methods.get(&uid)
    }

    pub fn find_event(&self, name: &str) -> Option<&Arc<EventDesc>> {
        self.events.values().find(|e| e.name == name)
    }

    pub fn find_method(&self, name: &str) -> Option<&Arc<MethodDesc>> {
        self.methods.values().find(|m| m.name == name)
    }

    pub fn events(&self) -> impl Iterator<Item = &Arc<EventDesc>> {
        self.events.values()
    }

    pub fn methods(&self) -> impl Iterator<Item = &Arc<MethodDesc>> {
        self.methods.values()
    }
}

/// Incremental builder for [`ObjectDesc`].
///
/// Adding a method also adds its `method_state_<name>` enum field (same uid
/// as the method) to the object struct.  Event update lists are resolved by
/// field name against the final struct, so methods and properties may be
/// added in any order.
#[derive(Debug)]
pub struct ObjectDescBuilder {
    uid: u16,
    name: String,
    struct_desc: StructDesc,
    events: BTreeMap<u16, (EventDesc, Vec<String>)>,
    methods: BTreeMap<u16, Arc<MethodDesc>>,
    method_state: Arc<EnumDriver>,
}

impl ObjectDescBuilder {
    pub fn new(uid: u16, name: impl Into<String>) -> Self {
        Self {
            uid,
            name: name.into(),
            struct_desc: StructDesc::new(),
            events: BTreeMap::new(),
            methods: BTreeMap::new(),
            method_state: Arc::new(EnumDriver::method_state()),
        }
    }

    pub fn property(mut self, field: FieldDesc) -> Result<Self, DescriptorError> {
        self.struct_desc.add_field(FieldDesc {
            role: FieldRole::Property,
            ..field
        })?;
        Ok(self)
    }

    pub fn method(mut self, method: MethodDesc) -> Result<Self, DescriptorError> {
        if self.methods.contains_key(&method.uid) {
            return Err(DescriptorError::DuplicateMethod(method.uid));
        }
        self.struct_desc.add_field(FieldDesc::new_enum(
            method.state_field_name(),
            method.uid,
            FieldRole::Method,
            Arc::clone(&self.method_state),
        ))?;
        self.methods.insert(method.uid, Arc::new(method));
        Ok(self)
    }

    /// Adds an event updating the named fields (properties or `method_state_*`).
    pub fn event(
        mut self,
        uid: u16,
        name: impl Into<String>,
        updates: &[&str],
    ) -> Result<Self, DescriptorError> {
        if self.events.contains_key(&uid) {
            return Err(DescriptorError::DuplicateEvent(uid));
        }
        let updates = updates.iter().map(|s| s.to_string()).collect();
        self.events.insert(uid, (EventDesc::new(uid, name), updates));
        Ok(self)
    }

    pub fn build(self) -> Result<ObjectDesc, DescriptorError> {
        let mut events = BTreeMap::new();
        for (uid, (mut desc, updates)) in self.events {
            for field_name in updates {
                let field = self.struct_desc.find_field(&field_name).ok_or_else(|| {
                    DescriptorError::UnknownUpdate {
                        event: desc.name.clone(),
                        field: field_name.clone(),
                    }
                })?;
                desc.add_update(field.uid);
            }
            events.insert(uid, Arc::new(desc));
        }
        Ok(ObjectDesc {
            uid: self.uid,
            name: self.name,
            struct_desc: Arc::new(self.struct_desc),
            events,
            methods: self.methods,
        })
    }
}

// ── Bus descriptors ───────────────────────────────────────────────────────────

/// Descriptor of a bus-level (aggregated) event type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusEventDesc {
    pub uid: u16,
    pub name: String,
}

impl BusEventDesc {
    pub fn new(uid: u16, name: impl Into<String>) -> Self {
        Self {
            uid,
            name: name.into(),
        }
    }
}

/// Root descriptor of a bus.
#[derive(Debug, Clone, PartialEq)]
pub struct BusDesc {
    pub name: String,
    pub crc: u32,
    objects: BTreeMap<u16, Arc<ObjectDesc>>,
    events: BTreeMap<u16, Arc<BusEventDesc>>,
}

impl BusDesc {
    pub fn new(name: impl Into<String>, crc: u32) -> Self {
        Self {
            name: name.into(),
            crc,
            objects: BTreeMap::new(),
            events: BTreeMap::new(),
        }
    }

    pub fn add_object(&mut self, desc: ObjectDesc) -> Result<Arc<ObjectDesc>, DescriptorError> {
        if self.objects.contains_key(&desc.uid) {
            return Err(DescriptorError::DuplicateObject(desc.uid));
        }
        let desc = Arc::new(desc);
        self.objects.insert(desc.uid, Arc::clone(&desc));
        Ok(desc)
    }

    pub fn add_event(&mut self, desc: BusEventDesc) -> Result<Arc<BusEventDesc>, DescriptorError> {
        if self.events.contains_key(&desc.uid) {
            return Err(DescriptorError::DuplicateBusEvent(desc.uid));
        }
        let desc = Arc::new(desc);
        self.events.insert(desc.uid, Arc::clone(&desc));
        Ok(desc)
    }

    pub fn object(&self, uid: u16) -> Option<&Arc<ObjectDesc>> {
        self.objects.get(&uid)
    }

    pub fn event(&self, uid: u16) -> Option<&Arc<BusEventDesc>> {
        self.events.get(&uid)
    }

    pub fn find_object(&self, name: &str) -> Option<&Arc<ObjectDesc>> {
        self.objects.values().find(|o| o.name == name)
    }

    pub fn find_event(&self, name: &str) -> Option<&Arc<BusEventDesc>> {
        self.events.values().find(|e| e.name == name)
    }

    pub fn objects(&self) -> impl Iterator<Item = &Arc<ObjectDesc>> {
        self.objects.values()
    }

    pub fn events(&self) -> impl Iterator<Item = &Arc<BusEventDesc>> {
        self.events.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn player_desc() -> ObjectDesc {
        let state = Arc::new(EnumDriver::new(
            "state",
            vec![("IDLE".into(), 0), ("PLAYING".into(), 1)],
            0,
        ));
        let mut args = StructDesc::new();
        args.add_field(FieldDesc::new("uri", 1, FieldType::String, FieldRole::Argument))
            .unwrap();
        ObjectDescBuilder::new(1, "player")
            .property(FieldDesc::new("name", 1, FieldType::String, FieldRole::Property))
            .unwrap()
            .property(FieldDesc::new_enum("state", 2, FieldRole::Property, state))
            .unwrap()
            .method(MethodDesc::new(10, "play", args))
            .unwrap()
            .event(1, "state_changed", &["state", "method_state_play"])
            .unwrap()
            .build()
            .unwrap()
    }

    #[test]
    fn test_from_tag_ignores_array_flag() {
        assert_eq!(FieldType::from_tag(0x89), Some(FieldType::String));
        assert_eq!(FieldType::from_tag(12), Some(FieldType::F64));
        assert_eq!(FieldType::from_tag(13), None);
    }

    #[test]
    fn test_wire_tag_sets_array_flag() {
        let f = FieldDesc::new("ids", 3, FieldType::U32, FieldRole::Property).array();
        assert_eq!(f.wire_tag(), 0x84);
    }

    #[test]
    fn test_method_adds_method_state_field_with_method_uid() {
        // Act
        let desc = player_desc();

        // Assert
        let field = desc.struct_desc.find_field("method_state_play").unwrap();
        assert_eq!(field.uid, 10);
        assert_eq!(field.role, FieldRole::Method);
        assert_eq!(field.field_type, FieldType::Enum);
        assert_eq!(field.driver.as_ref().unwrap().name(), "method_state");
    }

    #[test]
    fn test_event_updates_are_resolved_to_field_uids() {
        let desc = player_desc();
        let evt = desc.find_event("state_changed").unwrap();
        let uids: Vec<u16> = evt.update_uids().collect();
        assert_eq!(uids, vec![2, 10]);
        assert!(!evt.updates(1));
    }

    #[test]
    fn test_duplicate_field_uid_is_rejected() {
        let mut s = StructDesc::new();
        s.add_field(FieldDesc::new("a", 1, FieldType::U8, FieldRole::Property))
            .unwrap();
        let err = s
            .add_field(FieldDesc::new("b", 1, FieldType::U8, FieldRole::Property))
            .unwrap_err();
        assert_eq!(
            err,
            DescriptorError::DuplicateField {
                uid: 1,
                name: "b".into()
            }
        );
    }

    #[test]
    fn test_method_uid_colliding_with_property_is_rejected() {
        let result = ObjectDescBuilder::new(1, "x")
            .property(FieldDesc::new("a", 5, FieldType::U8, FieldRole::Property))
            .unwrap()
            .method(MethodDesc::new(5, "m", StructDesc::new()));
        assert!(matches!(result, Err(DescriptorError::DuplicateField { uid: 5, .. })));
    }

    #[test]
    fn test_event_with_unknown_update_fails_build() {
        let result = ObjectDescBuilder::new(1, "x")
            .event(1, "e", &["missing"])
            .unwrap()
            .build();
        assert!(matches!(result, Err(DescriptorError::UnknownUpdate { .. })));
    }

    #[test]
    fn test_enum_field_without_driver_is_rejected() {
        let mut s = StructDesc::new();
        let f = FieldDesc::new("e", 1, FieldType::Enum, FieldRole::Property);
        assert_eq!(
            s.add_field(f),
            Err(DescriptorError::MissingDriver("e".into()))
        );
    }

    #[test]
    fn test_bus_desc_rejects_duplicate_object_uid() {
        let mut bus = BusDesc::new("media", 0x1234);
        bus.add_object(player_desc()).unwrap();
        assert_eq!(
            bus.add_object(player_desc()),
            Err(DescriptorError::DuplicateObject(1))
        );
        assert_eq!(bus.find_object("player").unwrap().uid, 1);
    }

    #[test]
    fn test_enum_driver_lookups() {
        let drv = EnumDriver::method_state();
        assert_eq!(drv.value_of("enabled"), Some(1));
        assert_eq!(drv.name_of(2), Some("DISABLED"));
        assert!(!drv.has_value(7));
        assert_eq!(drv.default_value(), 0);
    }
}
