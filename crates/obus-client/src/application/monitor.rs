//! Logging observers used by the `obus-client` binary.

use obus_core::{BusEvent, Call, Event, Object};
use tracing::info;

use crate::application::dispatch::{BusDispatcher, BusEventCallback, ObjectCallback};

/// Logs every bus event, then lets the client apply it.
#[derive(Debug, Default)]
pub struct LogBusEvents;

impl BusEventCallback for LogBusEvents {
    fn on_bus_event(&mut self, bus_event: &mut BusEvent, dispatcher: &mut BusDispatcher) {
        info!(event = %bus_event, objects = dispatcher.bus().len(), "bus event");
    }
}

/// Logs the lifecycle of every object of one type.
#[derive(Debug, Clone)]
pub struct LogObjects {
    type_name: String,
}

impl LogObjects {
    pub fn new(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
        }
    }
}

impl ObjectCallback for LogObjects {
    fn on_object_add(&mut self, obj: &Object, _bus_event: &BusEvent) {
        info!(object = %self.type_name, handle = obj.handle(), fields = %obj.fields(), "add");
    }

    fn on_object_remove(&mut self, obj: &Object, _bus_event: &BusEvent) {
        info!(object = %self.type_name, handle = obj.handle(), "remove");
    }

    fn on_object_event(&mut self, event: &Event, obj: &Object, _bus_event: &BusEvent) {
        info!(
            object = %self.type_name,
            handle = obj.handle(),
            event = %event.desc().name,
            fields = %event.fields(),
            "event"
        );
    }

    fn on_object_call_ack(&mut self, call: &Call) {
        info!(
            object = %self.type_name,
            handle = call.obj().handle,
            method = %call.desc().name,
            call = call.handle(),
            ack = %call.ack(),
            "call ack"
        );
    }
}
