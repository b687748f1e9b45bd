//! The execution context owning the modules and the shared global store.

use crate::error::{LinkError, LinkResult};
use crate::global::GlobalStore;
use crate::module::Module;
use indexmap::IndexMap;
use std::sync::{Arc, Mutex};

/// The process-wide registry of modules, keyed by unique module name, plus
/// the store of global variables the modules share.
///
/// Iteration order over the modules is their registration order; the linker
/// relies on this for deterministic start-function invocation.
#[derive(Debug, Default)]
pub struct Context {
    modules: Mutex<IndexMap<String, Arc<Module>>>,
    globals: GlobalStore,
}

impl Context {
    /// Create an empty context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `module` and return its shared handle. Module names are
    /// unique within a context.
    pub fn register(&self, module: Module) -> LinkResult<Arc<Module>> {
        let mut modules = self.modules.lock().unwrap();
        if modules.contains_key(module.name()) {
            return Err(LinkError::DuplicateModule {
                name: module.name().to_string(),
            });
        }
        let module = Arc::new(module);
        modules.insert(module.name().to_string(), Arc::clone(&module));
        Ok(module)
    }

    /// The module registered under `name`, if any.
    pub fn module(&self, name: &str) -> Option<Arc<Module>> {
        self.modules.lock().unwrap().get(name).cloned()
    }

    /// A snapshot of all registered modules, in registration order.
    pub fn modules(&self) -> Vec<Arc<Module>> {
        self.modules.lock().unwrap().values().cloned().collect()
    }

    /// The shared global-variable store.
    pub fn globals(&self) -> &GlobalStore {
        &self.globals
    }
}
