//! Client connection state machine.
//!
//! # Lifecycle (for beginners)
//!
//! ```text
//!  start()            socket up, CONREQ sent        CONRESP(ACCEPTED)
//! IDLE ──────► CONNECTING ───────────────────────────────────► CONNECTED
//!   ▲              ▲   │ CONRESP(REFUSED)                         │
//!   │              │   └──────────► REFUSED                       │ socket lost
//!   │              │                                              ▼
//!   │              └────────────────────────────────────── DISCONNECTING
//!   └──── stop() from any state
//! ```
//!
//! The [`Client`] is the single owner of the bus registry.  Transport tasks
//! only post [`TransportEvent`]s into the client's looper; the owner drains
//! them with [`Client::process_next`] and every registry change and callback
//! happens there, one message at a time.
//!
//! Connection changes reach observers through the same bus-event channel as
//! server updates: CONNECTED carries the initial object snapshot as its add
//! list, DISCONNECTED carries every registered object as its remove list.

use std::fmt;
use std::sync::Arc;

use obus_core::protocol::{ConnStatus, PROTOCOL_VERSION};
use obus_core::{
    Bus, BusDesc, BusEvent, Call, CallHandleCounter, FieldError, Object, ObjectDesc, Packet,
    ProtocolError, RawPacket, Value,
};
use thiserror::Error;
use tokio::runtime::TryCurrentError;
use tracing::{debug, error, info, warn};

use crate::application::dispatch::{BusDispatcher, BusEventCallback, CallbackError, ObjectCallback};
use crate::infrastructure::looper::{Handler, Looper};
use crate::infrastructure::transport::{Transport, TransportEvent, WriterMessage};

/// Connection state of a [`Client`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClientState {
    Idle,
    Connecting,
    Connected,
    Disconnecting,
    Refused,
}

impl ClientState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "IDLE",
            Self::Connecting => "CONNECTING",
            Self::Connected => "CONNECTED",
            Self::Disconnecting => "DISCONNECTING",
            Self::Refused => "REFUSED",
        }
    }
}

impl fmt::Display for ClientState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors returned to callers of [`Client`] operations.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("client is {0}, expected IDLE")]
    InvalidState(ClientState),

    #[error("client is not started")]
    NotStarted,

    #[error("no tokio runtime available: {0}")]
    NoRuntime(#[from] TryCurrentError),

    #[error(transparent)]
    Callback(#[from] CallbackError),

    #[error("object '{object}' has no method '{method}'")]
    UnknownMethod { object: String, method: String },

    #[error("invalid call argument: {0}")]
    Argument(#[from] FieldError),

    #[error("failed to encode packet: {0}")]
    Encode(#[from] ProtocolError),
}

/// An obus client mirroring the objects of one bus.
pub struct Client {
    name: String,
    state: ClientState,
    dispatcher: BusDispatcher,
    bus_callback: Option<Box<dyn BusEventCallback>>,
    call_handles: CallHandleCounter,
    looper: Looper<TransportEvent>,
    transport: Option<Transport>,
    writer: Option<Handler<WriterMessage>>,
    autoreconnect: bool,
}

impl Client {
    /// Creates an idle client for the bus described by `desc`.
    pub fn new(name: impl Into<String>, desc: Arc<BusDesc>) -> Self {
        Self {
            name: name.into(),
            state: ClientState::Idle,
            dispatcher: BusDispatcher::new(Bus::new(desc)),
            bus_callback: None,
            call_handles: CallHandleCounter::new(),
            looper: Looper::new(),
            transport: None,
            writer: None,
            autoreconnect: true,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> ClientState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == ClientState::Connected
    }

    /// `true` between [`Client::start`] and [`Client::stop`].
    pub fn is_started(&self) -> bool {
        self.writer.is_some()
    }

    /// Sets the observer that sees every bus event before it is applied.
    pub fn set_bus_event_callback(&mut self, callback: Box<dyn BusEventCallback>) {
        self.bus_callback = Some(callback);
    }

    pub fn set_object_log(&mut self, enabled: bool) {
        self.dispatcher.set_object_log(enabled);
    }

    /// Takes effect immediately on a running transport.
    pub fn set_autoreconnect(&mut self, enabled: bool) {
        self.autoreconnect = enabled;
        if let Some(transport) = &self.transport {
            transport.set_reconnect(enabled);
        }
    }

    pub fn autoreconnect(&self) -> bool {
        self.autoreconnect
    }

    // ── Lifecycle ─────────────────────────────────────────────────────────────

    /// Starts connecting to `addr` (`host:port`).  Must be called from within
    /// a tokio runtime.
    pub fn start(&mut self, addr: impl Into<String>) -> Result<(), ClientError> {
        if self.state != ClientState::Idle {
            return Err(ClientError::InvalidState(self.state));
        }
        let addr = addr.into();
        let transport = Transport::start(addr.clone(), self.looper.handler(), self.autoreconnect)?;
        info!(client = %self.name, %addr, "client started");
        self.writer = Some(transport.writer());
        self.transport = Some(transport);
        self.state = ClientState::Connecting;
        Ok(())
    }

    /// Stops the transport, reports every object as removed if connected and
    /// returns to IDLE.  Does nothing when already idle.
    pub async fn stop(&mut self) {
        if self.state == ClientState::Idle {
            return;
        }
        if let Some(transport) = self.transport.take() {
            transport.stop().await;
        }
        self.writer = None;
        let dropped = self.looper.drain();
        if dropped > 0 {
            debug!(dropped, "discarded transport messages after stop");
        }
        self.disconnect();
        self.state = ClientState::Idle;
        info!(client = %self.name, "client stopped");
    }

    /// Waits for the next transport message and processes it.
    pub async fn process_next(&mut self) {
        if let Some(msg) = self.looper.recv().await {
            self.process_message(msg);
        }
    }

    /// Processes every message already queued, without waiting.
    pub fn process_pending(&mut self) -> usize {
        let mut count = 0;
        while let Some(msg) = self.looper.try_recv() {
            self.process_message(msg);
            count += 1;
        }
        count
    }

    pub fn process_message(&mut self, msg: TransportEvent) {
        if self.state == ClientState::Idle {
            debug!(?msg, "client idle, ignoring transport message");
            return;
        }
        match msg {
            TransportEvent::Connected => self.on_connected(),
            TransportEvent::Disconnected => self.disconnect(),
            TransportEvent::Packet(raw) => self.on_packet(raw),
        }
    }

    // ── Registry access ───────────────────────────────────────────────────────

    pub fn bus(&self) -> &Bus {
        self.dispatcher.bus()
    }

    /// Snapshot of the registry.
    pub fn clone_bus(&self) -> Bus {
        self.dispatcher.bus().clone()
    }

    pub fn find_object(&self, handle: u16) -> Option<&Object> {
        self.dispatcher.bus().find(handle)
    }

    pub fn get_all_objects(&self) -> Vec<&Object> {
        self.dispatcher.bus().get_all()
    }

    pub fn get_objects(&self, desc: &ObjectDesc) -> Vec<&Object> {
        self.dispatcher.bus().get_objects(desc)
    }

    pub fn dispatcher(&self) -> &BusDispatcher {
        &self.dispatcher
    }

    pub fn dispatcher_mut(&mut self) -> &mut BusDispatcher {
        &mut self.dispatcher
    }

    pub fn register_object_callback(
        &mut self,
        desc: &ObjectDesc,
        callback: Box<dyn ObjectCallback>,
    ) -> Result<(), ClientError> {
        Ok(self.dispatcher.register_object_callback(desc, callback)?)
    }

    pub fn unregister_object_callback(
        &mut self,
        desc: &ObjectDesc,
    ) -> Result<Box<dyn ObjectCallback>, ClientError> {
        Ok(self.dispatcher.unregister_object_callback(desc)?)
    }

    // ── Method calls ──────────────────────────────────────────────────────────

    /// Builds a call of `method` on `obj` from argument name/value pairs.
    ///
    /// Unknown argument names and invalid values are errors; arguments left
    /// out are only logged.
    pub fn create_call<'a>(
        &self,
        obj: &Object,
        method: &str,
        args: impl IntoIterator<Item = (&'a str, Value)>,
    ) -> Result<Call, ClientError> {
        let desc = obj
            .desc()
            .find_method(method)
            .ok_or_else(|| ClientError::UnknownMethod {
                object: obj.desc().name.clone(),
                method: method.to_string(),
            })?;
        let mut call = Call::new(Arc::clone(desc), obj);
        for (name, value) in args {
            call.args_mut().set_by_name(name, value)?;
        }
        for field in desc.args.fields() {
            if !call.args().has(field) {
                warn!(method, arg = %field.name, "missing call argument");
            }
        }
        Ok(call)
    }

    /// Assigns the next call handle, records the call as pending and queues
    /// it for sending.  Returns the handle.
    pub fn send_method_call(&mut self, mut call: Call) -> Result<u16, ClientError> {
        let writer = self.writer.clone().ok_or(ClientError::NotStarted)?;
        let handle = self.call_handles.next();
        call.set_handle(handle);
        self.dispatcher.add_pending_call(call.clone());

        let bytes = match Packet::Call(call).encode() {
            Ok(bytes) => bytes,
            Err(e) => {
                self.dispatcher.take_pending_call(handle);
                return Err(e.into());
            }
        };
        writer.post(WriterMessage::Send(bytes));
        Ok(handle)
    }

    /// [`Client::create_call`] followed by [`Client::send_method_call`].
    pub fn call_method<'a>(
        &mut self,
        obj: &Object,
        method: &str,
        args: impl IntoIterator<Item = (&'a str, Value)>,
    ) -> Result<u16, ClientError> {
        let call = self.create_call(obj, method, args)?;
        self.send_method_call(call)
    }

    // ── Transport messages ────────────────────────────────────────────────────

    fn on_connected(&mut self) {
        let desc = self.dispatcher.bus().desc();
        info!(client = %self.name, bus = %desc.name, "socket connected, sending CONREQ");
        let conreq = Packet::ConReq {
            version: PROTOCOL_VERSION,
            bus_name: Some(desc.name.clone()),
            crc: desc.crc,
            client_name: Some(self.name.clone()),
        };
        self.send_packet(&conreq);
    }

    fn on_packet(&mut self, raw: RawPacket) {
        let packet = match raw.decode(self.dispatcher.bus()) {
            Ok(packet) => packet,
            Err(e) => {
                error!(packet_type = %raw.packet_type(), error = %e, "cannot decode packet");
                return;
            }
        };
        match packet {
            Packet::ConResp { status, objects } => self.on_connection_response(status, objects),
            Packet::Add(obj) => self.notify_bus_event(BusEvent::object_registered(obj)),
            Packet::Remove(obj) => self.notify_bus_event(BusEvent::object_unregistered(obj)),
            Packet::Event(evt) => self.notify_bus_event(BusEvent::object_event(evt)),
            Packet::BusEvent(evt) => self.notify_bus_event(evt),
            Packet::Ack { handle, ack } => self.dispatcher.ack_call(handle, ack),
            other => warn!(packet_type = %other.packet_type(), "unhandled packet type"),
        }
    }

    fn on_connection_response(&mut self, status: ConnStatus, objects: Vec<Object>) {
        if self.state != ClientState::Connecting {
            warn!(state = %self.state, "unexpected connection response");
            return;
        }
        match status {
            ConnStatus::Refused => {
                warn!(client = %self.name, "connection refused by server");
                self.state = ClientState::Refused;
                self.notify_bus_event(BusEvent::connection_refused());
            }
            ConnStatus::Accepted => {
                info!(client = %self.name, objects = objects.len(), "connection accepted");
                self.state = ClientState::Connected;
                self.notify_bus_event(BusEvent::connected(objects));
            }
        }
    }

    fn disconnect(&mut self) {
        let previous = std::mem::replace(&mut self.state, ClientState::Disconnecting);
        if previous == ClientState::Connected {
            let objects: Vec<Object> = self
                .dispatcher
                .bus()
                .get_all()
                .into_iter()
                .cloned()
                .collect();
            info!(client = %self.name, objects = objects.len(), "disconnected");
            self.notify_bus_event(BusEvent::disconnected(objects));
        }
        self.state = ClientState::Connecting;
    }

    /// Observer first, then the registry unless the observer already
    /// dispatched.
    fn notify_bus_event(&mut self, mut bus_event: BusEvent) {
        if let Some(cb) = self.bus_callback.as_mut() {
            cb.on_bus_event(&mut bus_event, &mut self.dispatcher);
        }
        if !bus_event.is_dispatched() {
            self.dispatcher.dispatch_bus_event(&mut bus_event);
        }
    }

    fn send_packet(&self, packet: &Packet) {
        let Some(writer) = &self.writer else {
            warn!(packet_type = %packet.packet_type(), "Tx packet lost");
            return;
        };
        match packet.encode() {
            Ok(bytes) => {
                writer.post(WriterMessage::Send(bytes));
            }
            Err(e) => error!(packet_type = %packet.packet_type(), error = %e, "cannot encode packet"),
        }
    }

    /// Replaces the transport with a bare writer handle.
    #[cfg(test)]
    fn attach_writer(&mut self, writer: Handler<WriterMessage>) {
        self.writer = Some(writer);
        self.state = ClientState::Connecting;
    }
}
