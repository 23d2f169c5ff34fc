//! Infrastructure layer for the obus client.
//!
//! **Dependency rule**: this layer may depend on `obus_core`, but MUST NOT be
//! imported by the `obus_core` domain layer.
//!
//! # Sub-modules
//!
//! - **`looper`** – In-order, single-consumer message channel used to hand
//!   results from background tasks to the client's owner.
//!
//! - **`transport`** – TCP reader and writer tasks with connect timeout,
//!   fixed-delay reconnection and packet framing.
//!
//! - **`config`** – TOML configuration and the declarative bus definition.

pub mod config;
pub mod looper;
pub mod transport;
