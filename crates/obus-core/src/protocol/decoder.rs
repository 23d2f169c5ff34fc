//! Incremental packet framing.
//!
//! # How framing works (for beginners)
//!
//! TCP delivers a byte *stream*, not messages: one `recv` may return half a
//! packet, or the end of one packet and the start of the next.  The
//! [`PacketDecoder`] keeps enough state between calls to rebuild packets no
//! matter how the bytes are split:
//!
//! ```text
//! Idle ─► Magic0 ─► Magic1 ─► Magic2 ─► Magic3 ─► Header ─► Payload ─► (emit) ─► Idle
//!           ▲          │         │         │         │
//!           └──────────┴─────────┴─────────┴─────────┘  mismatch / bad header
//! ```
//!
//! A byte that does not match the expected magic byte drops the partial
//! header and matching restarts at the *next* byte, so garbage in front of a
//! valid packet is silently discarded.

use tracing::error;

use crate::protocol::messages::{PacketHeader, RawPacket, HEADER_SIZE, MAGIC};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Idle,
    Magic0,
    Magic1,
    Magic2,
    Magic3,
    Header,
    Payload,
}

/// Byte-stream to [`RawPacket`] state machine.
#[derive(Debug)]
pub struct PacketDecoder {
    state: State,
    header_buf: Vec<u8>,
    header: Option<PacketHeader>,
    payload: Vec<u8>,
}

impl Default for PacketDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl PacketDecoder {
    pub fn new() -> Self {
        Self {
            state: State::Idle,
            header_buf: Vec::with_capacity(HEADER_SIZE),
            header: None,
            payload: Vec::new(),
        }
    }

    /// Drops any partial packet.
    pub fn reset(&mut self) {
        self.state = State::Idle;
        self.header_buf.clear();
        self.header = None;
        self.payload.clear();
    }

    /// Feeds a chunk of bytes and returns every packet it completes, in order.
    pub fn feed(&mut self, mut data: &[u8]) -> Vec<RawPacket> {
        let mut packets = Vec::new();
        while !data.is_empty() {
            let (used, packet) = self.decode(data);
            packets.extend(packet);
            data = &data[used..];
        }
        packets
    }

    /// Consumes bytes from `data` until one packet completes or the input
    /// runs out.  Returns the number of bytes consumed and the packet, if any.
    pub fn decode(&mut self, data: &[u8]) -> (usize, Option<RawPacket>) {
        let mut pos = 0;
        while pos < data.len() {
            match self.state {
                State::Idle => self.state = State::Magic0,
                State::Magic0 | State::Magic1 | State::Magic2 | State::Magic3 => {
                    pos += self.decode_magic(data[pos]);
                }
                State::Header => {
                    let want = HEADER_SIZE - self.header_buf.len();
                    let take = want.min(data.len() - pos);
                    self.header_buf.extend_from_slice(&data[pos..pos + take]);
                    pos += take;
                    if self.header_buf.len() == HEADER_SIZE {
                        self.decode_header();
                    }
                }
                State::Payload => {
                    let need = self.header.map_or(0, |h| h.payload_len()) - self.payload.len();
                    let take = need.min(data.len() - pos);
                    self.payload.extend_from_slice(&data[pos..pos + take]);
                    pos += take;
                }
            }

            if let Some(packet) = self.take_complete() {
                return (pos, Some(packet));
            }
        }
        (pos, self.take_complete())
    }

    fn decode_magic(&mut self, byte: u8) -> usize {
        let (index, next) = match self.state {
            State::Magic0 => (0, State::Magic1),
            State::Magic1 => (1, State::Magic2),
            State::Magic2 => (2, State::Magic3),
            _ => (3, State::Header),
        };
        let magic = MAGIC.to_be_bytes();
        if byte == magic[index] {
            self.header_buf.push(byte);
            self.state = next;
        } else {
            self.header_buf.clear();
            if byte == magic[0] {
                // the mismatching byte may itself start a header
                self.header_buf.push(byte);
                self.state = State::Magic1;
            } else {
                self.state = State::Magic0;
            }
        }
        1
    }

    fn decode_header(&mut self) {
        match PacketHeader::decode(&self.header_buf) {
            Ok(header) => {
                self.header = Some(header);
                self.payload = Vec::with_capacity(header.payload_len());
                self.state = State::Payload;
            }
            Err(e) => {
                error!(error = %e, "bad packet header");
                self.header_buf.clear();
                self.state = State::Magic0;
            }
        }
    }

    fn take_complete(&mut self) -> Option<RawPacket> {
        if self.state != State::Payload {
            return None;
        }
        let header = self.header?;
        if self.payload.len() < header.payload_len() {
            return None;
        }
        let payload = std::mem::take(&mut self.payload);
        self.reset();
        Some(RawPacket { header, payload })
    }
}
