//! Bus registry: the live object set keyed by handle.
//!
//! An object is in the registry iff it has a non-zero handle, was registered
//! and has not been unregistered since.  Handles are unique at all times.

use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;

use crate::domain::descriptor::{BusDesc, ObjectDesc};
use crate::domain::object::{Object, INVALID_HANDLE};
use crate::protocol::codec::ProtocolError;

/// Errors raised by registry mutations.
#[derive(Debug, Error, PartialEq)]
pub enum RegistryError {
    #[error("object uid={uid} has no handle")]
    InvalidHandle { uid: u16 },

    #[error("object handle={0} already registered")]
    DuplicateHandle(u16),

    #[error("object handle={0} not registered")]
    NotRegistered(u16),
}

/// Registry of live objects for one bus.
#[derive(Debug, Clone)]
pub struct Bus {
    desc: Arc<BusDesc>,
    objects: HashMap<u16, Object>,
}

impl Bus {
    pub fn new(desc: Arc<BusDesc>) -> Self {
        Self {
            desc,
            objects: HashMap::new(),
        }
    }

    pub fn desc(&self) -> &Arc<BusDesc> {
        &self.desc
    }

    pub fn register(&mut self, obj: Object) -> Result<(), RegistryError> {
        if obj.handle() == INVALID_HANDLE {
            return Err(RegistryError::InvalidHandle { uid: obj.uid() });
        }
        if self.objects.contains_key(&obj.handle()) {
            return Err(RegistryError::DuplicateHandle(obj.handle()));
        }
        self.objects.insert(obj.handle(), obj);
        Ok(())
    }

    /// Removes and returns the object registered under `handle`.
    pub fn unregister(&mut self, handle: u16) -> Result<Object, RegistryError> {
        self.objects
            .remove(&handle)
            .ok_or(RegistryError::NotRegistered(handle))
    }

    pub fn find(&self, handle: u16) -> Option<&Object> {
        self.objects.get(&handle)
    }

    pub fn find_mut(&mut self, handle: u16) -> Option<&mut Object> {
        self.objects.get_mut(&handle)
    }

    /// Finds the object registered under `handle` and checks its type uid.
    pub fn resolve(&self, uid: u16, handle: u16) -> Result<&Object, ProtocolError> {
        let obj = self.find(handle).ok_or_else(|| {
            ProtocolError::MalformedPayload(format!(
                "object uid={uid} handle={handle} not registered"
            ))
        })?;
        if obj.uid() != uid {
            return Err(ProtocolError::MalformedPayload(format!(
                "object uid={uid} handle={handle} bad internal uid={}",
                obj.uid()
            )));
        }
        Ok(obj)
    }

    /// All live objects, ordered by handle.
    pub fn get_all(&self) -> Vec<&Object> {
        let mut all: Vec<&Object> = self.objects.values().collect();
        all.sort_by_key(|o| o.handle());
        all
    }

    /// Live objects of one type, ordered by handle.
    pub fn get_objects(&self, desc: &ObjectDesc) -> Vec<&Object> {
        let mut all: Vec<&Object> = self
            .objects
            .values()
            .filter(|o| o.uid() == desc.uid)
            .collect();
        all.sort_by_key(|o| o.handle());
        all
    }

    pub fn handles(&self) -> Vec<u16> {
        let mut handles: Vec<u16> = self.objects.keys().copied().collect();
        handles.sort_unstable();
        handles
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    pub fn clear(&mut self) {
        self.objects.clear();
    }
}
