//! Method calls and their acknowledgement status.
//!
//! Wire layout:
//!
//! ```text
//! [obj uid:u16][obj handle:u16][method uid:u16][call handle:u16][size:u32][args struct]
//! ```

use std::fmt;
use std::sync::Arc;

use tracing::error;

use crate::domain::bus::Bus;
use crate::domain::descriptor::MethodDesc;
use crate::domain::object::{Object, ObjectRef};
use crate::domain::structure::Struct;
use crate::protocol::codec::{Buffer, ProtocolError};

/// Call handle meaning "not sent yet".
pub const INVALID_CALL_HANDLE: u16 = 0;

/// Status carried by an ACK packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum CallAck {
    Invalid = 0,
    Acked = 1,
    Aborted = 2,
    MethodDisabled = 3,
    MethodNotSupported = 4,
    InvalidArguments = 5,
    Refused = 6,
}

impl TryFrom<u8> for CallAck {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Ok(match value {
            0 => Self::Invalid,
            1 => Self::Acked,
            2 => Self::Aborted,
            3 => Self::MethodDisabled,
            4 => Self::MethodNotSupported,
            5 => Self::InvalidArguments,
            6 => Self::Refused,
            other => {
                return Err(ProtocolError::MalformedPayload(format!(
                    "invalid call ack {other}"
                )))
            }
        })
    }
}

impl fmt::Display for CallAck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Invalid => "INVALID",
            Self::Acked => "ACKED",
            Self::Aborted => "ABORTED",
            Self::MethodDisabled => "METHOD_DISABLED",
            Self::MethodNotSupported => "METHOD_NOT_SUPPORTED",
            Self::InvalidArguments => "INVALID_ARGUMENTS",
            Self::Refused => "REFUSED",
        })
    }
}

/// State of a method, published by the server in the `method_state_*` fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum MethodState {
    NotSupported = 0,
    Enabled = 1,
    Disabled = 2,
}

impl MethodState {
    pub fn from_i32(value: i32) -> Option<Self> {
        match value {
            0 => Some(Self::NotSupported),
            1 => Some(Self::Enabled),
            2 => Some(Self::Disabled),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::NotSupported => "NOT_SUPPORTED",
            Self::Enabled => "ENABLED",
            Self::Disabled => "DISABLED",
        }
    }
}

/// A method invocation on an object.
#[derive(Debug, Clone, PartialEq)]
pub struct Call {
    desc: Arc<MethodDesc>,
    obj: ObjectRef,
    args: Struct,
    handle: u16,
    ack: CallAck,
}

impl Call {
    /// Creates an unsent call with no argument set.
    pub fn new(desc: Arc<MethodDesc>, obj: &Object) -> Self {
        let args = Struct::new(Arc::clone(&desc.args));
        Self::with_args(desc, obj.object_ref(), args)
    }

    pub fn with_args(desc: Arc<MethodDesc>, obj: ObjectRef, args: Struct) -> Self {
        Self {
            desc,
            obj,
            args,
            handle: INVALID_CALL_HANDLE,
            ack: CallAck::Invalid,
        }
    }

    pub fn desc(&self) -> &Arc<MethodDesc> {
        &self.desc
    }

    pub fn uid(&self) -> u16 {
        self.desc.uid
    }

    pub fn obj(&self) -> ObjectRef {
        self.obj
    }

    pub fn args(&self) -> &Struct {
        &self.args
    }

    pub fn args_mut(&mut self) -> &mut Struct {
        &mut self.args
    }

    pub fn handle(&self) -> u16 {
        self.handle
    }

    pub fn set_handle(&mut self, handle: u16) {
        self.handle = handle;
    }

    pub fn ack(&self) -> CallAck {
        self.ack
    }

    pub fn set_ack(&mut self, ack: CallAck) {
        self.ack = ack;
    }

    pub fn encode(&self, buf: &mut Buffer) -> Result<(), ProtocolError> {
        buf.write_u16(self.obj.uid);
        buf.write_u16(self.obj.handle);
        buf.write_u16(self.desc.uid);
        buf.write_u16(self.handle);
        let marker = buf.prepare_size_marker();
        self.args.encode(buf)?;
        buf.write_size_marker(marker);
        Ok(())
    }

    /// Decodes a call against the live objects of `bus`.
    ///
    /// An unregistered object, an object uid mismatch or an unknown method is
    /// logged and the record skipped (`Ok(None)`).
    pub fn decode(bus: &Bus, buf: &mut Buffer) -> Result<Option<Self>, ProtocolError> {
        let obj_uid = buf.read_u16()?;
        let obj_handle = buf.read_u16()?;
        let method_uid = buf.read_u16()?;
        let call_handle = buf.read_u16()?;
        let size = buf.read_u32()? as usize;
        let start = buf.pos();

        let decoded = resolve_method(bus, obj_uid, obj_handle, method_uid).and_then(|desc| {
            let args = Struct::decode(&desc.args, buf)?;
            let mut call = Self::with_args(
                desc,
                ObjectRef {
                    uid: obj_uid,
                    handle: obj_handle,
                },
                args,
            );
            call.handle = call_handle;
            Ok(call)
        });

        match decoded {
            Ok(call) => Ok(Some(call)),
            Err(e) => {
                error!(error = %e, "cannot decode call");
                buf.set_pos(start + size);
                Ok(None)
            }
        }
    }
}

fn resolve_method(
    bus: &Bus,
    obj_uid: u16,
    obj_handle: u16,
    method_uid: u16,
) -> Result<Arc<MethodDesc>, ProtocolError> {
    let obj = bus.resolve(obj_uid, obj_handle)?;
    obj.desc().method(method_uid).cloned().ok_or_else(|| {
        ProtocolError::MalformedPayload(format!(
            "object uid={} has no method uid={method_uid}",
            obj.uid()
        ))
    })
}
