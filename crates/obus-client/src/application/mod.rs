//! Application layer of the obus client.
//!
//! # What lives here?
//!
//! - **`client`** – The connection state machine.  Owns the registry, turns
//!   transport messages into typed packets and bus events, and correlates
//!   method calls with their acks.
//!
//! - **`dispatch`** – Applies bus events to the registry exactly once and
//!   invokes the per-object-type [`dispatch::ObjectCallback`]s.
//!
//! - **`monitor`** – Observers that log everything, used by the binary.

pub mod client;
pub mod dispatch;
pub mod monitor;
