//! The shared global-variable store and the resolution states of imported
//! globals.

use crate::error::{LinkError, LinkResult};
use crate::types::Value;
use std::sync::Mutex;

/// How far the resolution of a module's global variable has progressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GlobalResolution {
    /// The global is declared by the module itself and readily initialized.
    Declared,
    /// The global is imported and connected to its exporter's storage.
    Imported,
    /// The global is imported, but its exporter is not yet available.
    UnresolvedImport,
}

impl GlobalResolution {
    /// Returns true when the global has storage behind it.
    pub fn is_resolved(self) -> bool {
        matches!(self, Self::Declared | Self::Imported)
    }
}

/// The context-wide store of global variables, addressed by integer
/// global addresses handed out at declaration time.
#[derive(Debug, Default)]
pub struct GlobalStore {
    values: Mutex<Vec<Value>>,
}

impl GlobalStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a new slot holding `value` and return its address.
    pub fn allocate(&self, value: Value) -> u32 {
        let mut values = self.values.lock().unwrap();
        values.push(value);
        (values.len() - 1) as u32
    }

    /// Read the value stored at `address`.
    pub fn load(&self, address: u32) -> LinkResult<Value> {
        let values = self.values.lock().unwrap();
        values
            .get(address as usize)
            .copied()
            .ok_or(LinkError::InvalidGlobalAddress {
                address: address as i32,
            })
    }

    /// Read the value stored at `address` as a 32-bit integer.
    ///
    /// Used by table initialization, where element offsets are produced by
    /// integer-typed globals.
    pub fn load_as_i32(&self, address: u32) -> LinkResult<i32> {
        match self.load(address)? {
            Value::I32(value) => Ok(value),
            Value::I64(value) => Ok(value as i32),
            Value::F32(_) | Value::F64(_) => Err(LinkError::NonIntegerGlobal {
                address: address as i32,
            }),
        }
    }

    /// Overwrite the value stored at `address`.
    pub fn store(&self, address: u32, value: Value) -> LinkResult<()> {
        let mut values = self.values.lock().unwrap();
        let slot = values
            .get_mut(address as usize)
            .ok_or(LinkError::InvalidGlobalAddress {
                address: address as i32,
            })?;
        *slot = value;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn addresses_are_handed_out_in_order() {
        let store = GlobalStore::new();
        assert_eq!(store.allocate(Value::I32(1)), 0);
        assert_eq!(store.allocate(Value::I64(2)), 1);
        assert_eq!(store.load(0).unwrap(), Value::I32(1));
        assert_eq!(store.load(1).unwrap(), Value::I64(2));
        assert!(store.load(2).is_err());
    }

    #[test]
    fn integer_loads_reject_float_globals() {
        let store = GlobalStore::new();
        let a = store.allocate(Value::I32(42));
        let b = store.allocate(Value::F32(1.5));
        assert_eq!(store.load_as_i32(a).unwrap(), 42);
        assert!(store.load_as_i32(b).is_err());
    }

    #[test]
    fn stores_overwrite_in_place() {
        let store = GlobalStore::new();
        let address = store.allocate(Value::I32(1));
        store.store(address, Value::I32(7)).unwrap();
        assert_eq!(store.load(address).unwrap(), Value::I32(7));
        assert!(store.store(9, Value::I32(0)).is_err());
    }

    #[test]
    fn resolution_states() {
        assert!(GlobalResolution::Declared.is_resolved());
        assert!(GlobalResolution::Imported.is_resolved());
        assert!(!GlobalResolution::UnresolvedImport.is_resolved());
    }
}
