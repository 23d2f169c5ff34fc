//! All obus packet types.
//!
//! Every packet starts with a 9-byte header:
//!
//! ```text
//! [magic:u32 = "obus"][size:u32 total, header included][type:u8]
//! ```
//!
//! Framing (finding headers in a byte stream) is handled by
//! [`PacketDecoder`](super::decoder::PacketDecoder) and never needs the bus.
//! Turning a [`RawPacket`] payload into a typed [`Packet`] does: events, calls
//! and removals refer to live objects by handle.

use std::fmt;

use crate::domain::bus::Bus;
use crate::domain::bus_event::BusEvent;
use crate::domain::call::{Call, CallAck};
use crate::domain::event::Event;
use crate::domain::object::Object;
use crate::protocol::codec::{Buffer, ProtocolError};

// ── Protocol constants ────────────────────────────────────────────────────────

/// Magic bytes at the start of every packet: ASCII "obus".
pub const MAGIC: u32 = 0x6F62_7573;

/// Size of the packet header in bytes.
pub const HEADER_SIZE: usize = 9;

/// Protocol version sent in CONREQ.
pub const PROTOCOL_VERSION: u8 = 2;

// ── Packet type codes ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PacketType {
    ConReq = 0,
    ConResp = 1,
    Add = 2,
    Remove = 3,
    BusEvent = 4,
    Event = 5,
    Call = 6,
    Ack = 7,
}

impl TryFrom<u8> for PacketType {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Ok(match value {
            0 => Self::ConReq,
            1 => Self::ConResp,
            2 => Self::Add,
            3 => Self::Remove,
            4 => Self::BusEvent,
            5 => Self::Event,
            6 => Self::Call,
            7 => Self::Ack,
            other => return Err(ProtocolError::UnknownPacketType(other)),
        })
    }
}

impl fmt::Display for PacketType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::ConReq => "CONREQ",
            Self::ConResp => "CONRESP",
            Self::Add => "ADD",
            Self::Remove => "REMOVE",
            Self::BusEvent => "BUS_EVENT",
            Self::Event => "EVENT",
            Self::Call => "CALL",
            Self::Ack => "ACK",
        })
    }
}

/// Status carried by a CONRESP packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnStatus {
    Accepted = 0,
    Refused = 1,
}

impl TryFrom<u8> for ConnStatus {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Accepted),
            1 => Ok(Self::Refused),
            other => Err(ProtocolError::MalformedPayload(format!(
                "invalid connection status {other}"
            ))),
        }
    }
}

// ── Header and raw packet ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    /// Total packet size, header included.
    pub size: u32,
    pub packet_type: PacketType,
}

impl PacketHeader {
    /// Parses the 9 header bytes.  The magic is checked by the caller.
    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let mut buf = Buffer::from_bytes(bytes.to_vec());
        let _magic = buf.read_u32()?;
        let size = buf.read_u32()?;
        let packet_type = PacketType::try_from(buf.read_u8()?)?;
        if (size as usize) < HEADER_SIZE {
            return Err(ProtocolError::BadPacketSize(size));
        }
        Ok(Self { size, packet_type })
    }

    pub fn payload_len(&self) -> usize {
        self.size as usize - HEADER_SIZE
    }
}

/// A framed packet whose payload has not been interpreted yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawPacket {
    pub header: PacketHeader,
    pub payload: Vec<u8>,
}

impl RawPacket {
    pub fn packet_type(&self) -> PacketType {
        self.header.packet_type
    }

    /// Interprets the payload against the bus descriptors and live objects.
    pub fn decode(&self, bus: &Bus) -> Result<Packet, ProtocolError> {
        let mut buf = Buffer::from_bytes(self.payload.clone());
        Packet::decode_payload(self.header.packet_type, bus, &mut buf)
    }
}

// ── Typed packets ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum Packet {
    ConReq {
        version: u8,
        bus_name: Option<String>,
        crc: u32,
        client_name: Option<String>,
    },
    ConResp {
        status: ConnStatus,
        objects: Vec<Object>,
    },
    Add(Object),
    /// Removal of a live object.  Only its uid and handle travel on the wire.
    Remove(Object),
    BusEvent(BusEvent),
    Event(Event),
    Call(Call),
    Ack {
        handle: u16,
        ack: CallAck,
    },
}

impl Packet {
    pub fn packet_type(&self) -> PacketType {
        match self {
            Self::ConReq { .. } => PacketType::ConReq,
            Self::ConResp { .. } => PacketType::ConResp,
            Self::Add(_) => PacketType::Add,
            Self::Remove(_) => PacketType::Remove,
            Self::BusEvent(_) => PacketType::BusEvent,
            Self::Event(_) => PacketType::Event,
            Self::Call(_) => PacketType::Call,
            Self::Ack { .. } => PacketType::Ack,
        }
    }

    /// Encodes the packet, header included.
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        let mut buf = Buffer::new();
        buf.write_u32(MAGIC);
        buf.write_u32(0);
        buf.write_u8(self.packet_type() as u8);
        self.encode_payload(&mut buf)?;

        let size = u32::try_from(buf.len())
            .map_err(|_| ProtocolError::Encode("packet too large".into()))?;
        buf.set_pos(4);
        buf.write_u32(size);
        Ok(buf.into_bytes())
    }

    fn encode_payload(&self, buf: &mut Buffer) -> Result<(), ProtocolError> {
        match self {
            Self::ConReq {
                version,
                bus_name,
                crc,
                client_name,
            } => {
                buf.write_u8(*version);
                buf.write_string(bus_name.as_deref())?;
                buf.write_u32(*crc);
                buf.write_string(client_name.as_deref())?;
            }
            Self::ConResp { status, objects } => {
                buf.write_u8(*status as u8);
                let count = u32::try_from(objects.len())
                    .map_err(|_| ProtocolError::Encode("too many objects".into()))?;
                buf.write_u32(count);
                for obj in objects {
                    obj.encode(buf)?;
                }
            }
            Self::Add(obj) => obj.encode(buf)?,
            Self::Remove(obj) => {
                buf.write_u16(obj.uid());
                buf.write_u16(obj.handle());
            }
            Self::BusEvent(evt) => evt.encode(buf)?,
            Self::Event(evt) => evt.encode(buf)?,
            Self::Call(call) => call.encode(buf)?,
            Self::Ack { handle, ack } => {
                buf.write_u16(*handle);
                buf.write_u8(*ack as u8);
            }
        }
        Ok(())
    }

    fn decode_payload(
        packet_type: PacketType,
        bus: &Bus,
        buf: &mut Buffer,
    ) -> Result<Self, ProtocolError> {
        let skipped =
            |what: &str| ProtocolError::MalformedPayload(format!("{what} could not be decoded"));
        Ok(match packet_type {
            PacketType::ConReq => Self::ConReq {
                version: buf.read_u8()?,
                bus_name: buf.read_string()?,
                crc: buf.read_u32()?,
                client_name: buf.read_string()?,
            },
            PacketType::ConResp => {
                let status = ConnStatus::try_from(buf.read_u8()?)?;
                let count = buf.read_u32()?;
                let mut objects = Vec::new();
                for _ in 0..count {
                    if let Some(obj) = Object::decode(bus.desc(), buf)? {
                        objects.push(obj);
                    }
                }
                Self::ConResp { status, objects }
            }
            PacketType::Add => {
                Self::Add(Object::decode(bus.desc(), buf)?.ok_or_else(|| skipped("object"))?)
            }
            PacketType::Remove => {
                let uid = buf.read_u16()?;
                let handle = buf.read_u16()?;
                Self::Remove(bus.resolve(uid, handle)?.clone())
            }
            PacketType::BusEvent => Self::BusEvent(BusEvent::decode(bus, buf)?),
            PacketType::Event => {
                Self::Event(Event::decode(bus, buf)?.ok_or_else(|| skipped("event"))?)
            }
            PacketType::Call => {
                Self::Call(Call::decode(bus, buf)?.ok_or_else(|| skipped("call"))?)
            }
            PacketType::Ack => Self::Ack {
                handle: buf.read_u16()?,
                ack: CallAck::try_from(buf.read_u8()?)?,
            },
        })
    }
}
