//! # obus-core
//!
//! Shared library for obus clients containing the wire codec, packet framing,
//! descriptor tables and the typed data model.
//!
//! It has no dependency on sockets or on an async runtime.
//!
//! # Architecture overview (for beginners)
//!
//! obus is a bus-style object publishing protocol: a server exposes typed
//! *objects* (property bags with methods and events) and clients mirror them.
//! A client connects, receives the current object set, then tracks additions,
//! removals and property updates, and calls methods whose result comes back
//! asynchronously as an acknowledgement.
//!
//! - **`protocol`** – How bytes travel over the network.  Primitive big-endian
//!   encoding ([`Buffer`]), the incremental framing state machine
//!   ([`PacketDecoder`]) and the eight packet types ([`Packet`]).
//!
//! - **`domain`** – The data model.  Immutable descriptors ([`BusDesc`] and
//!   friends) describe the shape of a bus; [`Object`], [`Event`], [`Call`]
//!   and [`BusEvent`] are runtime values built from them, and [`Bus`] is the
//!   registry of live objects keyed by handle.

pub mod domain;
pub mod protocol;

pub use domain::{
    BaseBusEvent, Bus, BusDesc, BusEvent, BusEventDesc, BusEventKind, Call, CallAck,
    DescriptorError, EnumDriver, Event, EventDesc, FieldDesc, FieldError, FieldRole, FieldType,
    MethodDesc, MethodState, Object, ObjectDesc, ObjectDescBuilder, ObjectRef, RegistryError,
    Struct, StructDesc, Value,
};
pub use protocol::{Buffer, CallHandleCounter, Packet, PacketDecoder, ProtocolError, RawPacket};
