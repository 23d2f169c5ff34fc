//! Protocol module: primitive codec, packet framing and typed packets.

pub mod codec;
pub mod decoder;
pub mod messages;
pub mod sequence;

pub use codec::{Buffer, ProtocolError};
pub use decoder::PacketDecoder;
pub use messages::*;
pub use sequence::CallHandleCounter;
