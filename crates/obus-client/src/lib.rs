//! obus-client library entry point.
//!
//! Re-exports all public modules so that integration tests in `tests/`
//! and the binary entry point in `main.rs` share the same module tree.
//!
//! # What does obus-client do? (for beginners)
//!
//! The client mirrors the objects published on one obus bus:
//!
//! 1. Connects to the server over TCP and sends a connection request naming
//!    the bus and its checksum.
//! 2. Receives the current object set and registers it locally.
//! 3. Tracks object additions, removals and property updates, notifying
//!    registered observers.
//! 4. Sends method calls and reports their acknowledgements.
//! 5. Reconnects automatically when the connection drops, reporting every
//!    object as removed in the meantime.

/// Application layer: client state machine and bus-event dispatch.
pub mod application;

/// Infrastructure layer: looper, transport and configuration.
pub mod infrastructure;

pub use application::client::{Client, ClientError, ClientState};
pub use application::dispatch::{BusDispatcher, BusEventCallback, CallbackError, ObjectCallback};
