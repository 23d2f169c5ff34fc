//! Applies bus events to the local registry and fans them out to observers.
//!
//! # Dispatch order (for beginners)
//!
//! A [`BusEvent`] bundles added objects, removed objects and property events.
//! [`BusDispatcher::dispatch_bus_event`] applies them in a fixed order:
//!
//! 1. **adds** – clone each object into the registry, then `on_object_add`;
//! 2. **events** – `on_object_event` sees the object *before* the update,
//!    then the event is committed into the registry object;
//! 3. **removes** – `on_object_remove`, then every pending call on that object
//!    is acked with [`CallAck::Aborted`], then the object leaves the registry.
//!
//! The `dispatched` flag on the bus event makes the whole operation
//! idempotent: a bus-event observer may dispatch explicitly, and the client
//! will not dispatch a second time.

use std::collections::{BTreeMap, HashMap};

use obus_core::{Bus, BusEvent, Call, CallAck, Event, Object, ObjectDesc, ObjectRef};
use thiserror::Error;
use tracing::{error, info, warn};

/// Per-object-type observer.
///
/// Every method has an empty default so observers implement only what they
/// need.
pub trait ObjectCallback: Send {
    /// Called after `obj` has been added to the registry.
    fn on_object_add(&mut self, _obj: &Object, _bus_event: &BusEvent) {}

    /// Called while `obj` is still in the registry, just before removal.
    fn on_object_remove(&mut self, _obj: &Object, _bus_event: &BusEvent) {}

    /// Called before `event` is committed into `obj`.
    fn on_object_event(&mut self, _event: &Event, _obj: &Object, _bus_event: &BusEvent) {}

    /// Called when the ack of a call on this object type arrives, or when the
    /// call is aborted because its object was removed.
    fn on_object_call_ack(&mut self, _call: &Call) {}
}

/// Bus-wide observer, invoked before a bus event touches the registry.
///
/// It may call [`BusDispatcher::dispatch_bus_event`] itself to apply the event
/// at a chosen point; otherwise the client applies it right after this
/// returns.
pub trait BusEventCallback: Send {
    fn on_bus_event(&mut self, bus_event: &mut BusEvent, dispatcher: &mut BusDispatcher);
}

/// Errors from object-callback registration.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CallbackError {
    #[error("a callback is already registered for object '{name}' (uid={uid})")]
    AlreadyRegistered { uid: u16, name: String },
    #[error("no callback registered for object '{name}' (uid={uid})")]
    NotRegistered { uid: u16, name: String },
}

/// Owner of the bus registry, the pending-calls table and object callbacks.
pub struct BusDispatcher {
    bus: Bus,
    object_callbacks: HashMap<u16, Box<dyn ObjectCallback>>,
    pending_calls: BTreeMap<u16, Call>,
    object_log: bool,
}

impl BusDispatcher {
    pub fn new(bus: Bus) -> Self {
        Self {
            bus,
            object_callbacks: HashMap::new(),
            pending_calls: BTreeMap::new(),
            object_log: false,
        }
    }

    pub fn bus(&self) -> &Bus {
        &self.bus
    }

    /// Enables `info` logging of every add, remove, event and ack.
    pub fn set_object_log(&mut self, enabled: bool) {
        self.object_log = enabled;
    }

    pub fn object_log(&self) -> bool {
        self.object_log
    }

    // ── Callbacks ─────────────────────────────────────────────────────────────

    pub fn register_object_callback(
        &mut self,
        desc: &ObjectDesc,
        callback: Box<dyn ObjectCallback>,
    ) -> Result<(), CallbackError> {
        if self.object_callbacks.contains_key(&desc.uid) {
            return Err(CallbackError::AlreadyRegistered {
                uid: desc.uid,
                name: desc.name.clone(),
            });
        }
        self.object_callbacks.insert(desc.uid, callback);
        Ok(())
    }

    pub fn unregister_object_callback(
        &mut self,
        desc: &ObjectDesc,
    ) -> Result<Box<dyn ObjectCallback>, CallbackError> {
        self.object_callbacks
            .remove(&desc.uid)
            .ok_or_else(|| CallbackError::NotRegistered {
                uid: desc.uid,
                name: desc.name.clone(),
            })
    }

    // ── Pending calls ─────────────────────────────────────────────────────────

    /// Stores a sent call.  A call already pending under the same handle (only
    /// possible after the handle counter wrapped) is replaced.
    pub fn add_pending_call(&mut self, call: Call) {
        let handle = call.handle();
        if let Some(old) = self.pending_calls.insert(handle, call) {
            warn!(
                handle,
                method = %old.desc().name,
                "call handle reused while still pending, dropping older call"
            );
        }
    }

    pub fn take_pending_call(&mut self, handle: u16) -> Option<Call> {
        self.pending_calls.remove(&handle)
    }

    pub fn pending_call(&self, handle: u16) -> Option<&Call> {
        self.pending_calls.get(&handle)
    }

    pub fn pending_call_count(&self) -> usize {
        self.pending_calls.len()
    }

    /// Resolves a pending call with the ack received from the server.
    pub fn ack_call(&mut self, handle: u16, ack: CallAck) {
        let Some(mut call) = self.pending_calls.remove(&handle) else {
            warn!(handle, %ack, "ack for unknown call handle");
            return;
        };
        call.set_ack(ack);
        self.notify_call_ack(&call);
    }

    fn notify_call_ack(&mut self, call: &Call) {
        if self.object_log {
            info!(
                handle = call.handle(),
                method = %call.desc().name,
                object = call.obj().handle,
                ack = %call.ack(),
                "call acked"
            );
        }
        if let Some(cb) = self.object_callbacks.get_mut(&call.obj().uid) {
            cb.on_object_call_ack(call);
        }
    }

    /// Aborts every pending call targeting `obj`.
    fn abort_pending_calls(&mut self, obj: ObjectRef) {
        let handles: Vec<u16> = self
            .pending_calls
            .iter()
            .filter(|(_, call)| call.obj() == obj)
            .map(|(handle, _)| *handle)
            .collect();
        for handle in handles {
            if let Some(mut call) = self.pending_calls.remove(&handle) {
                warn!(
                    uid = obj.uid,
                    object = obj.handle,
                    call = handle,
                    "object removed with pending call"
                );
                call.set_ack(CallAck::Aborted);
                self.notify_call_ack(&call);
            }
        }
    }

    // ── Bus events ────────────────────────────────────────────────────────────

    /// Applies `bus_event` to the registry and invokes object callbacks.
    /// Does nothing if the event was already dispatched.
    pub fn dispatch_bus_event(&mut self, bus_event: &mut BusEvent) {
        if bus_event.mark_dispatched() {
            return;
        }
        self.dispatch_adds(bus_event);
        self.dispatch_events(bus_event);
        self.dispatch_removes(bus_event);
    }

    fn dispatch_adds(&mut self, bus_event: &BusEvent) {
        for obj in bus_event.add_list() {
            if self.object_log {
                info!(
                    object = %obj.desc().name,
                    handle = obj.handle(),
                    fields = %obj.fields(),
                    "object added"
                );
            }
            if let Err(e) = self.bus.register(obj.clone()) {
                error!(error = %e, "cannot register object");
                continue;
            }
            if let Some(cb) = self.object_callbacks.get_mut(&obj.uid()) {
                cb.on_object_add(obj, bus_event);
            }
        }
    }

    fn dispatch_events(&mut self, bus_event: &mut BusEvent) {
        for i in 0..bus_event.event_list().len() {
            let target = bus_event.event_list()[i].obj();
            let Some(obj) = self.bus.find(target.handle) else {
                error!(
                    uid = target.uid,
                    handle = target.handle,
                    "event for object not in registry"
                );
                continue;
            };

            let event = &bus_event.event_list()[i];
            if let Some(cb) = self.object_callbacks.get_mut(&obj.uid()) {
                cb.on_object_event(event, obj, bus_event);
            }

            if let Some(obj) = self.bus.find_mut(target.handle) {
                let event = &mut bus_event.event_list_mut()[i];
                event.commit(obj);
                if self.object_log {
                    info!(
                        object = %obj.desc().name,
                        handle = obj.handle(),
                        event = %event.desc().name,
                        fields = %event.fields(),
                        "object updated"
                    );
                }
            }
        }
    }

    fn dispatch_removes(&mut self, bus_event: &BusEvent) {
        for removed in bus_event.remove_list() {
            let handle = removed.handle();
            let Some(obj) = self.bus.find(handle) else {
                error!(
                    object = %removed.desc().name,
                    handle,
                    "cannot remove object not in registry"
                );
                continue;
            };
            if self.object_log {
                info!(object = %obj.desc().name, handle, "object removed");
            }
            if let Some(cb) = self.object_callbacks.get_mut(&obj.uid()) {
                cb.on_object_remove(obj, bus_event);
            }

            self.abort_pending_calls(removed.object_ref());
            if let Err(e) = self.bus.unregister(handle) {
                error!(error = %e, "cannot unregister object");
            }
        }
    }
}
