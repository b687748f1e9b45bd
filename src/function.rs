//! Functions, their call targets, and the code blocks whose call-sites are
//! patched during linking.

use crate::error::{LinkError, LinkResult};
use crate::types::{ImportDescriptor, Value};
use std::fmt;
use std::sync::{Arc, Mutex};

/// An executable handle produced by the execution engine.
///
/// Call targets are compared by identity: an imported function resolves to
/// *the same* target as its export, never to a copy. Cloning a `CallTarget`
/// clones the handle, not the underlying callable.
#[derive(Clone)]
pub struct CallTarget(Arc<dyn Fn(&[Value]) + Send + Sync>);

impl CallTarget {
    /// Wrap a callable into a call target.
    pub fn new(callable: impl Fn(&[Value]) + Send + Sync + 'static) -> Self {
        Self(Arc::new(callable))
    }

    /// Invoke the target with `arguments`.
    pub fn call(&self, arguments: &[Value]) {
        (self.0)(arguments)
    }

    /// Returns true when both handles refer to the same underlying callable.
    pub fn same(a: &Self, b: &Self) -> bool {
        Arc::ptr_eq(&a.0, &b.0)
    }
}

impl fmt::Debug for CallTarget {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "CallTarget({:p})", Arc::as_ptr(&self.0))
    }
}

/// A function of a module: either declared locally with a materialized call
/// target, or imported and patched to its exporter's target during linking.
#[derive(Debug)]
pub struct Function {
    index: u32,
    import_descriptor: Option<ImportDescriptor>,
    call_target: Mutex<Option<CallTarget>>,
}

impl Function {
    pub(crate) fn new_local(index: u32, call_target: CallTarget) -> Self {
        Self {
            index,
            import_descriptor: None,
            call_target: Mutex::new(Some(call_target)),
        }
    }

    pub(crate) fn new_imported(index: u32, import_descriptor: ImportDescriptor) -> Self {
        Self {
            index,
            import_descriptor: Some(import_descriptor),
            call_target: Mutex::new(None),
        }
    }

    /// The index of the function in its module's function space.
    pub fn index(&self) -> u32 {
        self.index
    }

    /// Returns true when the function is imported from another module.
    pub fn is_imported(&self) -> bool {
        self.import_descriptor.is_some()
    }

    /// The import descriptor of an imported function.
    pub fn import_descriptor(&self) -> Option<&ImportDescriptor> {
        self.import_descriptor.as_ref()
    }

    /// The name of the module an imported function comes from.
    pub fn imported_module_name(&self) -> Option<&str> {
        self.import_descriptor
            .as_ref()
            .map(|descriptor| descriptor.module_name.as_str())
    }

    /// The name under which an imported function is exported by its module.
    pub fn imported_function_name(&self) -> Option<&str> {
        self.import_descriptor
            .as_ref()
            .map(|descriptor| descriptor.member_name.as_str())
    }

    /// Install the call target of the function.
    pub fn set_call_target(&self, target: CallTarget) {
        *self.call_target.lock().unwrap() = Some(target);
    }

    /// The call target of the function.
    ///
    /// For local functions the target is materialized at declaration time;
    /// for imported functions it becomes available once the link completes.
    pub fn resolve_call_target(&self) -> LinkResult<CallTarget> {
        self.call_target
            .lock()
            .unwrap()
            .clone()
            .ok_or(LinkError::UnresolvedCallTarget { index: self.index })
    }
}

/// A structured block of code containing call-sites that refer to their
/// callees through the control table.
///
/// The linker instructs the block to resolve a call node only once the
/// callee's target is known; the block records which control-table offsets
/// have been resolved so the engine (and the tests) can observe it.
#[derive(Debug)]
pub struct CodeBlock {
    start_offset: u32,
    resolved_calls: Mutex<Vec<u32>>,
}

impl CodeBlock {
    /// Create a block starting at `start_offset` in the module's code
    /// section.
    pub fn new(start_offset: u32) -> Self {
        Self {
            start_offset,
            resolved_calls: Mutex::new(Vec::new()),
        }
    }

    /// The instruction offset at which the block starts.
    pub fn start_offset(&self) -> u32 {
        self.start_offset
    }

    /// Resolve the call node at `control_table_offset`.
    pub fn resolve_call_node(&self, control_table_offset: u32) {
        self.resolved_calls.lock().unwrap().push(control_table_offset);
    }

    /// The control-table offsets resolved so far, in resolution order.
    pub fn resolved_calls(&self) -> Vec<u32> {
        self.resolved_calls.lock().unwrap().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn call_targets_compare_by_identity() {
        let a = CallTarget::new(|_| {});
        let b = a.clone();
        let c = CallTarget::new(|_| {});
        assert!(CallTarget::same(&a, &b));
        assert!(!CallTarget::same(&a, &c));
    }

    #[test]
    fn imported_functions_resolve_after_patching() {
        let function = Function::new_imported(0, ImportDescriptor::new("env", "print"));
        assert!(function.is_imported());
        assert_eq!(function.imported_module_name(), Some("env"));
        assert_eq!(function.imported_function_name(), Some("print"));
        assert!(function.resolve_call_target().is_err());

        let target = CallTarget::new(|_| {});
        function.set_call_target(target.clone());
        let resolved = function.resolve_call_target().unwrap();
        assert!(CallTarget::same(&resolved, &target));
    }

    #[test]
    fn blocks_record_resolved_call_nodes() {
        let block = CodeBlock::new(42);
        assert_eq!(block.start_offset(), 42);
        block.resolve_call_node(3);
        block.resolve_call_node(1);
        assert_eq!(block.resolved_calls(), vec![3, 1]);
    }
}
