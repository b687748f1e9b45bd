//! Modules and their symbol tables.
//!
//! A [`Module`] is a parsed WebAssembly compilation unit registered in a
//! [`Context`](crate::Context) under a unique name. The parser populates the
//! module's [`SymbolTable`] while walking the binary; the linker reads and
//! completes it. All mutation goes through `&self` methods guarded by an
//! internal lock, so modules can be captured by deferred resolution actions
//! as plain `Arc<Module>` handles.

use crate::error::{LinkError, LinkResult};
use crate::function::{CallTarget, Function};
use crate::global::{GlobalResolution, GlobalStore};
use crate::memory::LinearMemory;
use crate::table::Table;
use crate::types::{GlobalType, ImportDescriptor, Mutability, Type, Value};
use indexmap::IndexMap;
use std::sync::{Arc, Mutex};

/// A slice of bytes written into linear memory at a fixed base address
/// during linking, and re-written when a module's state is reset.
#[derive(Debug, Clone)]
pub struct DataSegment {
    /// The id of the data section, unique and ascending within a module.
    pub id: u32,
    /// The first byte address written by the segment.
    pub base_address: u64,
    /// The bytes of the segment.
    pub bytes: Vec<u8>,
}

#[derive(Debug)]
struct GlobalEntry {
    ty: GlobalType,
    resolution: GlobalResolution,
    // Address into the context's global store; -1 while unresolved.
    address: i32,
    // The declared initial value, kept for state resets. Imported globals
    // have no initial value of their own.
    initial: Option<Value>,
}

#[derive(Debug, Default)]
struct SymbolTableInner {
    functions: Vec<Arc<Function>>,
    exported_functions: IndexMap<String, u32>,
    memory: Option<Arc<LinearMemory>>,
    imported_memory: Option<ImportDescriptor>,
    exported_memory: Option<String>,
    table: Option<Arc<Table>>,
    imported_table: Option<ImportDescriptor>,
    exported_table: Option<String>,
    globals: Vec<GlobalEntry>,
    exported_globals: IndexMap<String, u32>,
    data_segments: Vec<DataSegment>,
    start_function: Option<u32>,
    linked: bool,
}

/// The symbol table of a module: its functions, memory, table, globals,
/// exports, data segments and start function.
#[derive(Debug)]
pub struct SymbolTable {
    module_name: String,
    inner: Mutex<SymbolTableInner>,
}

impl SymbolTable {
    fn new(module_name: String) -> Self {
        Self {
            module_name,
            inner: Mutex::new(SymbolTableInner::default()),
        }
    }

    fn unknown_global(&self, index: u32) -> LinkError {
        LinkError::UnknownGlobal {
            index,
            module: self.module_name.clone(),
        }
    }

    /// Declare a local function with a materialized call target and return
    /// its handle. Indices are assigned in declaration order.
    pub fn declare_function(&self, call_target: CallTarget) -> Arc<Function> {
        let mut inner = self.inner.lock().unwrap();
        let index = inner.functions.len() as u32;
        let function = Arc::new(Function::new_local(index, call_target));
        inner.functions.push(Arc::clone(&function));
        function
    }

    /// Declare an imported function and return its handle. The call target
    /// is patched in during linking.
    pub fn declare_imported_function(
        &self,
        module_name: impl Into<String>,
        member_name: impl Into<String>,
    ) -> Arc<Function> {
        let mut inner = self.inner.lock().unwrap();
        let index = inner.functions.len() as u32;
        let function = Arc::new(Function::new_imported(
            index,
            ImportDescriptor::new(module_name, member_name),
        ));
        inner.functions.push(Arc::clone(&function));
        function
    }

    /// The function at `index`, if declared.
    pub fn function(&self, index: u32) -> Option<Arc<Function>> {
        self.inner.lock().unwrap().functions.get(index as usize).cloned()
    }

    /// Export the function at `index` under `name`.
    pub fn export_function(&self, index: u32, name: impl Into<String>) -> LinkResult<()> {
        let mut inner = self.inner.lock().unwrap();
        if index as usize >= inner.functions.len() {
            return Err(LinkError::UnknownFunction {
                index,
                module: self.module_name.clone(),
            });
        }
        inner.exported_functions.insert(name.into(), index);
        Ok(())
    }

    /// The exported function names and indices, in export order.
    pub fn exported_functions(&self) -> Vec<(String, u32)> {
        let inner = self.inner.lock().unwrap();
        inner
            .exported_functions
            .iter()
            .map(|(name, index)| (name.clone(), *index))
            .collect()
    }

    pub(crate) fn exported_function(&self, name: &str) -> Option<Arc<Function>> {
        let inner = self.inner.lock().unwrap();
        let index = *inner.exported_functions.get(name)?;
        inner.functions.get(index as usize).cloned()
    }

    /// Attach the module's linear memory.
    pub fn set_memory(&self, memory: Arc<LinearMemory>) {
        self.inner.lock().unwrap().memory = Some(memory);
    }

    /// The module's linear memory, declared or imported, once attached.
    pub fn memory(&self) -> Option<Arc<LinearMemory>> {
        self.inner.lock().unwrap().memory.clone()
    }

    /// Record that the module's memory is imported under `descriptor`.
    pub fn set_imported_memory(&self, descriptor: ImportDescriptor) {
        self.inner.lock().unwrap().imported_memory = Some(descriptor);
    }

    /// The import descriptor of the module's memory, when imported.
    pub fn imported_memory(&self) -> Option<ImportDescriptor> {
        self.inner.lock().unwrap().imported_memory.clone()
    }

    /// Export the module's memory under `name`. A module has at most one
    /// memory, so a repeated export replaces the name.
    pub fn set_exported_memory(&self, name: impl Into<String>) {
        self.inner.lock().unwrap().exported_memory = Some(name.into());
    }

    /// The name under which the module's memory is exported, if any.
    pub fn exported_memory(&self) -> Option<String> {
        self.inner.lock().unwrap().exported_memory.clone()
    }

    /// Attach the module's table.
    pub fn set_table(&self, table: Arc<Table>) {
        self.inner.lock().unwrap().table = Some(table);
    }

    /// The module's table, declared or imported, once attached.
    pub fn table(&self) -> Option<Arc<Table>> {
        self.inner.lock().unwrap().table.clone()
    }

    /// Record that the module's table is imported under `descriptor`.
    pub fn set_imported_table(&self, descriptor: ImportDescriptor) {
        self.inner.lock().unwrap().imported_table = Some(descriptor);
    }

    /// The import descriptor of the module's table, when imported.
    pub fn imported_table(&self) -> Option<ImportDescriptor> {
        self.inner.lock().unwrap().imported_table.clone()
    }

    /// Export the module's table under `name`.
    pub fn set_exported_table(&self, name: impl Into<String>) {
        self.inner.lock().unwrap().exported_table = Some(name.into());
    }

    /// The name under which the module's table is exported, if any.
    pub fn exported_table(&self) -> Option<String> {
        self.inner.lock().unwrap().exported_table.clone()
    }

    /// Declare a global with an initial value, allocate its storage in the
    /// context's global store, and return its index.
    pub fn declare_global(
        &self,
        store: &GlobalStore,
        ty: Type,
        mutability: Mutability,
        initial: Value,
    ) -> u32 {
        let address = store.allocate(initial) as i32;
        let mut inner = self.inner.lock().unwrap();
        let index = inner.globals.len() as u32;
        inner.globals.push(GlobalEntry {
            ty: GlobalType::new(ty, mutability),
            resolution: GlobalResolution::Declared,
            address,
            initial: Some(initial),
        });
        index
    }

    /// Record an imported global at `index` with the given resolution state
    /// and address (-1 while unresolved).
    pub fn import_global(
        &self,
        index: u32,
        ty: Type,
        mutability: Mutability,
        resolution: GlobalResolution,
        address: i32,
    ) -> LinkResult<()> {
        let mut inner = self.inner.lock().unwrap();
        let entry = GlobalEntry {
            ty: GlobalType::new(ty, mutability),
            resolution,
            address,
            initial: None,
        };
        if (index as usize) < inner.globals.len() {
            inner.globals[index as usize] = entry;
            Ok(())
        } else if index as usize == inner.globals.len() {
            inner.globals.push(entry);
            Ok(())
        } else {
            Err(self.unknown_global(index))
        }
    }

    /// Export the global at `index` under `name`.
    pub fn export_global(&self, index: u32, name: impl Into<String>) -> LinkResult<()> {
        let mut inner = self.inner.lock().unwrap();
        if index as usize >= inner.globals.len() {
            return Err(self.unknown_global(index));
        }
        inner.exported_globals.insert(name.into(), index);
        Ok(())
    }

    /// The index of the global exported under `name`, if any.
    pub fn exported_global_index(&self, name: &str) -> Option<u32> {
        self.inner.lock().unwrap().exported_globals.get(name).copied()
    }

    /// The resolution state of the global at `index`.
    pub fn global_resolution(&self, index: u32) -> LinkResult<GlobalResolution> {
        let inner = self.inner.lock().unwrap();
        inner
            .globals
            .get(index as usize)
            .map(|entry| entry.resolution)
            .ok_or_else(|| self.unknown_global(index))
    }

    /// The value type of the global at `index`.
    pub fn global_value_type(&self, index: u32) -> LinkResult<Type> {
        let inner = self.inner.lock().unwrap();
        inner
            .globals
            .get(index as usize)
            .map(|entry| entry.ty.ty)
            .ok_or_else(|| self.unknown_global(index))
    }

    /// The mutability of the global at `index`.
    pub fn global_mutability(&self, index: u32) -> LinkResult<Mutability> {
        let inner = self.inner.lock().unwrap();
        inner
            .globals
            .get(index as usize)
            .map(|entry| entry.ty.mutability)
            .ok_or_else(|| self.unknown_global(index))
    }

    /// The global-store address of the global at `index`, or -1 while the
    /// global is unresolved.
    pub fn global_address(&self, index: u32) -> LinkResult<i32> {
        let inner = self.inner.lock().unwrap();
        inner
            .globals
            .get(index as usize)
            .map(|entry| entry.address)
            .ok_or_else(|| self.unknown_global(index))
    }

    /// Record a data segment for linking and later state resets.
    pub fn declare_data_segment(&self, id: u32, base_address: u64, bytes: Vec<u8>) {
        let mut inner = self.inner.lock().unwrap();
        inner.data_segments.push(DataSegment {
            id,
            base_address,
            bytes,
        });
    }

    /// The declared data segments, in declaration order.
    pub fn data_segments(&self) -> Vec<DataSegment> {
        self.inner.lock().unwrap().data_segments.clone()
    }

    /// Designate the function at `index` as the module's start function.
    pub fn set_start_function(&self, index: u32) -> LinkResult<()> {
        let mut inner = self.inner.lock().unwrap();
        if index as usize >= inner.functions.len() {
            return Err(LinkError::UnknownFunction {
                index,
                module: self.module_name.clone(),
            });
        }
        inner.start_function = Some(index);
        Ok(())
    }

    /// The module's start function, if one was designated.
    pub fn start_function(&self) -> Option<Arc<Function>> {
        let inner = self.inner.lock().unwrap();
        let index = inner.start_function?;
        inner.functions.get(index as usize).cloned()
    }

    /// Fill the module's table with the call targets of the functions named
    /// by `contents`, starting at element `offset`.
    pub fn initialize_table_with_functions(
        &self,
        offset: u32,
        contents: &[u32],
    ) -> LinkResult<()> {
        let (table, targets) = {
            let inner = self.inner.lock().unwrap();
            let table = inner.table.clone().ok_or_else(|| LinkError::MissingTable {
                module: self.module_name.clone(),
            })?;
            let mut targets = Vec::with_capacity(contents.len());
            for &index in contents {
                let function = inner.functions.get(index as usize).ok_or_else(|| {
                    LinkError::UnknownFunction {
                        index,
                        module: self.module_name.clone(),
                    }
                })?;
                targets.push(function.resolve_call_target()?);
            }
            (table, targets)
        };
        table.initialize(offset, targets)
    }

    /// Re-initialize every declared global to its declared initial value.
    pub fn reset_globals(&self, store: &GlobalStore) -> LinkResult<()> {
        let inner = self.inner.lock().unwrap();
        for entry in &inner.globals {
            if let Some(initial) = entry.initial {
                store.store(entry.address as u32, initial)?;
            }
        }
        Ok(())
    }

    /// Mark the module as linked.
    pub fn set_linked(&self) {
        self.inner.lock().unwrap().linked = true;
    }

    /// Returns true once the module has been linked.
    pub fn is_linked(&self) -> bool {
        self.inner.lock().unwrap().linked
    }
}

/// A named, parsed WebAssembly compilation unit.
#[derive(Debug)]
pub struct Module {
    name: String,
    symbol_table: SymbolTable,
}

impl Module {
    /// Create an empty module named `name`.
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        let symbol_table = SymbolTable::new(name.clone());
        Self { name, symbol_table }
    }

    /// The name of the module, unique within its context.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The symbol table of the module.
    pub fn symbol_table(&self) -> &SymbolTable {
        &self.symbol_table
    }

    /// Look up an exported function by name. Returns `None` for unknown
    /// identifiers.
    pub fn read_member(&self, name: &str) -> Option<Arc<Function>> {
        self.symbol_table.exported_function(name)
    }

    /// Mark the module as linked.
    pub fn set_linked(&self) {
        self.symbol_table.set_linked();
    }

    /// Returns true once the module has been linked.
    pub fn is_linked(&self) -> bool {
        self.symbol_table.is_linked()
    }
}
