//! Data model: descriptors, runtime entities and the bus registry.

pub mod bus;
pub mod bus_event;
pub mod call;
pub mod descriptor;
pub mod event;
pub mod object;
pub mod structure;
pub mod value;

pub use bus::{Bus, RegistryError};
pub use bus_event::{BaseBusEvent, BusEvent, BusEventKind};
pub use call::{Call, CallAck, MethodState, INVALID_CALL_HANDLE};
pub use descriptor::{
    BusDesc, BusEventDesc, DescriptorError, EnumDriver, EventDesc, FieldDesc, FieldRole,
    FieldType, MethodDesc, ObjectDesc, ObjectDescBuilder, StructDesc,
};
pub use event::Event;
pub use object::{Object, ObjectRef, INVALID_HANDLE};
pub use structure::{FieldError, Struct};
pub use value::Value;
