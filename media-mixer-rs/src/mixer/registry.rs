//! Endpoint catalog and default-device pointers.

use crate::audio::{AudioBackend, AudioError, DeviceRole, Direction, EndpointInfo};
use crate::schema::DEFAULT_DEVICE;
use parking_lot::RwLock;
use std::sync::Arc;

/// Current default endpoint per direction, for the default and the
/// communications roles.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DefaultDevicePointers {
    pub output: Option<String>,
    pub output_communications: Option<String>,
    pub input: Option<String>,
    pub input_communications: Option<String>,
}

impl DefaultDevicePointers {
    pub fn get(&self, direction: Direction, communications: bool) -> Option<&str> {
        self.slot(direction, communications).as_deref()
    }

    /// Update the slot a role maps to. Console and Multimedia share a slot.
    pub fn set(&mut self, direction: Direction, role: DeviceRole, device_id: Option<String>) {
        *self.slot_mut(direction, role.is_communications()) = device_id;
    }

    /// Directions for which `device_id` is the default (non-communications)
    /// endpoint.
    pub fn default_directions(&self, device_id: &str) -> Vec<Direction> {
        Direction::ALL
            .into_iter()
            .filter(|d| self.get(*d, false) == Some(device_id))
            .collect()
    }

    fn slot(&self, direction: Direction, communications: bool) -> &Option<String> {
        match (direction, communications) {
            (Direction::Output, false) => &self.output,
            (Direction::Output, true) => &self.output_communications,
            (Direction::Input, false) => &self.input,
            (Direction::Input, true) => &self.input_communications,
        }
    }

    fn slot_mut(&mut self, direction: Direction, communications: bool) -> &mut Option<String> {
        match (direction, communications) {
            (Direction::Output, false) => &mut self.output,
            (Direction::Output, true) => &mut self.output_communications,
            (Direction::Input, false) => &mut self.input,
            (Direction::Input, true) => &mut self.input_communications,
        }
    }
}

#[derive(Default)]
struct Catalog {
    output: Vec<EndpointInfo>,
    input: Vec<EndpointInfo>,
    defaults: DefaultDevicePointers,
}

impl Catalog {
    fn list(&self, direction: Direction) -> &Vec<EndpointInfo> {
        match direction {
            Direction::Output => &self.output,
            Direction::Input => &self.input,
        }
    }

    fn list_mut(&mut self, direction: Direction) -> &mut Vec<EndpointInfo> {
        match direction {
            Direction::Output => &mut self.output,
            Direction::Input => &mut self.input,
        }
    }
}

/// Catalog of active endpoints by direction, plus the default pointers.
pub struct EndpointRegistry {
    backend: Arc<dyn AudioBackend>,
    catalog: RwLock<Catalog>,
}

impl EndpointRegistry {
    pub fn new(backend: Arc<dyn AudioBackend>) -> Self {
        Self {
            backend,
            catalog: RwLock::new(Catalog::default()),
        }
    }

    /// Enumerate active endpoints for `direction` as (name, id) pairs, in OS
    /// order. Failure yields an empty list and a warning.
    pub fn enumerate(&self, direction: Direction) -> Vec<(String, String)> {
        let endpoints = self.load(direction);
        endpoints.into_iter().map(|e| (e.name, e.id)).collect()
    }

    /// Friendly names of active endpoints for `direction`.
    pub fn names(&self, direction: Direction) -> Vec<String> {
        self.enumerate(direction)
            .into_iter()
            .map(|(name, _)| name)
            .collect()
    }

    /// Re-enumerate both directions and snapshot every default slot.
    ///
    /// Returns all active endpoints.
    pub fn refresh(&self) -> Vec<EndpointInfo> {
        let mut all = Vec::new();
        for direction in Direction::ALL {
            all.extend(self.load(direction));
        }

        let mut defaults = DefaultDevicePointers::default();
        for direction in Direction::ALL {
            for role in [DeviceRole::Multimedia, DeviceRole::Communications] {
                match self.backend.default_endpoint(direction, role) {
                    Ok(id) => defaults.set(direction, role, id),
                    Err(e) => tracing::warn!("Failed to read default {} device: {}", direction, e),
                }
            }
        }
        tracing::debug!("Default devices: {:?}", defaults);
        self.catalog.write().defaults = defaults;

        all
    }

    /// Resolve a friendly name (or "Default") to a device id.
    ///
    /// "Default" reads the cached pointers. Names miss the cache only when a
    /// device appeared since the last enumeration, so one re-enumeration is
    /// attempted before giving up.
    pub fn resolve(&self, name: &str, direction: Direction) -> Result<String, AudioError> {
        if name == DEFAULT_DEVICE {
            return self
                .catalog
                .read()
                .defaults
                .get(direction, false)
                .map(str::to_string)
                .ok_or(AudioError::NoDefaultDevice);
        }

        if let Some(id) = self.lookup(name, direction) {
            return Ok(id);
        }
        self.load(direction);
        self.lookup(name, direction)
            .ok_or_else(|| AudioError::DeviceNotFound {
                device_id: name.to_string(),
            })
    }

    /// Cached endpoint info for a device id.
    pub fn describe(&self, device_id: &str) -> Option<EndpointInfo> {
        let catalog = self.catalog.read();
        Direction::ALL
            .into_iter()
            .flat_map(|d| catalog.list(d).iter())
            .find(|e| e.id == device_id)
            .cloned()
    }

    pub fn friendly_name(&self, device_id: &str) -> Option<String> {
        self.describe(device_id).map(|e| e.name)
    }

    /// Snapshot of the default pointers.
    pub fn defaults(&self) -> DefaultDevicePointers {
        self.catalog.read().defaults.clone()
    }

    pub fn set_default(&self, direction: Direction, role: DeviceRole, device_id: Option<String>) {
        self.catalog.write().defaults.set(direction, role, device_id);
    }

    fn lookup(&self, name: &str, direction: Direction) -> Option<String> {
        self.catalog
            .read()
            .list(direction)
            .iter()
            .find(|e| e.name == name)
            .map(|e| e.id.clone())
    }

    fn load(&self, direction: Direction) -> Vec<EndpointInfo> {
        match self.backend.endpoints(direction) {
            Ok(endpoints) => {
                *self.catalog.write().list_mut(direction) = endpoints.clone();
                endpoints
            }
            Err(e) => {
                tracing::warn!("Failed to enumerate {} devices: {}", direction, e);
                Vec::new()
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
