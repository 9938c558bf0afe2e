//! Device registry keyed by instance id.
//!
//! Populated once during startup and read-only afterwards. Keys are
//! unique; inserting a duplicate is a wiring error and fails loudly.
//! Lookups return `None` rather than a dangling handle.

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::DeviceError;

/// Owning map from instance id to device handle.
pub struct DeviceRegistry<T: ?Sized> {
    devices: HashMap<String, Arc<T>>,
}

impl<T: ?Sized> DeviceRegistry<T> {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            devices: HashMap::new(),
        }
    }

    /// Register a device under a unique id.
    pub fn insert(&mut self, id: impl Into<String>, device: Arc<T>) -> Result<(), DeviceError> {
        let id = id.into();
        if self.devices.contains_key(&id) {
            return Err(DeviceError::Duplicate(id));
        }
        self.devices.insert(id, device);
        Ok(())
    }

    /// Handle for the given id, if registered.
    pub fn get(&self, id: &str) -> Option<Arc<T>> {
        self.devices.get(id).cloned()
    }

    /// Handle for the given id, or a `NotFound` error.
    pub fn require(&self, id: &str) -> Result<Arc<T>, DeviceError> {
        self.get(id).ok_or_else(|| DeviceError::NotFound(id.into()))
    }

    pub fn contains(&self, id: &str) -> bool {
        self.devices.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }
}

impl<T: ?Sized> Default for DeviceRegistry<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DeviceError;
    use crate::gpio::{DigitalInput, Level};

    struct FixedInput(bool);

    impl DigitalInput for FixedInput {
        fn read_bool(&self) -> Option<bool> {
            Some(self.0)
        }
    }

    #[test]
    fn insert_and_lookup() {
        let mut registry: DeviceRegistry<dyn DigitalInput> = DeviceRegistry::new();
        registry
            .insert("limit-switch-x", Arc::new(FixedInput(true)))
            .expect("first insert");

        let device = registry.get("limit-switch-x").expect("registered");
        assert!(device.is_active());
        assert!(registry.get("limit-switch-y").is_none());
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let mut registry: DeviceRegistry<dyn DigitalInput> = DeviceRegistry::new();
        registry
            .insert("e-stop", Arc::new(FixedInput(false)))
            .expect("first insert");

        let err = registry
            .insert("e-stop", Arc::new(FixedInput(false)))
            .unwrap_err();
        assert!(matches!(err, DeviceError::Duplicate(id) if id == "e-stop"));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn require_reports_missing_id() {
        let registry: DeviceRegistry<dyn DigitalInput> = DeviceRegistry::new();
        let err = match registry.require("reset") {
            Err(e) => e,
            Ok(_) => panic!("expected require(\"reset\") to fail"),
        };
        assert!(matches!(err, DeviceError::NotFound(id) if id == "reset"));
    }

    #[test]
    fn level_from_bool() {
        assert_eq!(Level::from_bool(true), Level::High);
        assert_eq!(Level::from_bool(false), Level::Low);
        assert!(Level::High.is_high());
    }
}
