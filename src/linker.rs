//! The linker facade: the entry points the parser calls while walking a
//! module, and the one-shot state machine that drives the link.
//!
//! Cross-module references cannot be resolved while a module is being
//! parsed, because the modules they point into may not have been parsed yet
//! (or even registered). Each entry point therefore either performs an eager
//! compatibility check (globals, tables) or registers a deferred resolution
//! in the [`ResolutionDag`]. The first call to [`Linker::try_link`]
//! topologically sorts the registered resolutions, runs them, marks every
//! module linked, invokes the start functions, and retires the graph.
//!
//! All entry points must be called from one logical executor. The link state
//! is kept in an atomic so a stray concurrent `try_link` observes
//! `InProgress` and backs off instead of linking twice, but the linker does
//! not otherwise synchronize: the single-threaded discipline is a contract.

use crate::context::Context;
use crate::dag::{ResolutionDag, ResolveAction};
use crate::error::{LinkError, LinkResult};
use crate::function::{CodeBlock, Function};
use crate::global::GlobalResolution;
use crate::memory::LinearMemory;
use crate::module::Module;
use crate::symbol::Sym;
use crate::table::Table;
use crate::types::{ImportDescriptor, Mutability, Type};
use crate::units::Pages;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex};

/// The lifecycle of a [`Linker`]. States only ever advance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum LinkState {
    /// No link has been attempted yet.
    NotLinked = 0,
    /// A link is running.
    InProgress = 1,
    /// The context has been linked.
    Linked = 2,
}

impl LinkState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::NotLinked,
            1 => Self::InProgress,
            _ => Self::Linked,
        }
    }
}

/// Resolves all cross-module references of the modules in a context.
#[derive(Debug, Default)]
pub struct Linker {
    state: AtomicU8,
    dag: Mutex<ResolutionDag>,
}

impl Linker {
    /// Create a linker with an empty resolution graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// The current state of the link state machine.
    pub fn link_state(&self) -> LinkState {
        LinkState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Returns true once a link has completed successfully.
    pub fn is_linked(&self) -> bool {
        self.link_state() == LinkState::Linked
    }

    /// The number of resolutions registered and not yet retired.
    pub fn pending_resolutions(&self) -> usize {
        self.dag.lock().unwrap().len()
    }

    /// Link the modules of `context`, once.
    ///
    /// The first call runs the full link procedure; calls made while a link
    /// is in progress or after it completed return immediately. A failure
    /// in any resolution aborts the link and propagates; no partial state is
    /// rolled back, and the linker stays in the `InProgress` state.
    pub fn try_link(&self, context: &Arc<Context>) -> LinkResult<()> {
        // Fast path: by the time call targets execute, the context is
        // usually linked already.
        if self.state.load(Ordering::Acquire) != LinkState::NotLinked as u8 {
            return Ok(());
        }
        if self
            .state
            .compare_exchange(
                LinkState::NotLinked as u8,
                LinkState::InProgress as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_err()
        {
            return Ok(());
        }

        let mut dag = self.dag.lock().unwrap();
        let order = dag.toposort()?;
        let modules = context.modules();
        tracing::debug!(
            modules = modules.len(),
            resolutions = order.len(),
            "linking context"
        );
        for sym in &order {
            tracing::trace!(symbol = %sym, "resolving");
            dag.run_action(sym)?;
        }
        // Every module is marked linked before any start function runs.
        for module in &modules {
            module.set_linked();
        }
        for module in &modules {
            if let Some(start) = module.symbol_table().start_function() {
                tracing::trace!(module = module.name(), "invoking start function");
                start.resolve_call_target()?.call(&[]);
            }
        }
        dag.clear();
        self.state.store(LinkState::Linked as u8, Ordering::Release);
        tracing::debug!("link complete");
        Ok(())
    }

    /// Eagerly resolve a global imported into `module` at `index` from the
    /// export `imported_global_name` of `imported_module_name`.
    ///
    /// Returns the address of the global in the context's global store, or
    /// -1 when the exporting module is not registered yet (the import is
    /// then recorded as unresolved). Value-type and mutability mismatches
    /// fail immediately.
    #[allow(clippy::too_many_arguments)]
    pub fn import_global(
        &self,
        context: &Context,
        module: &Arc<Module>,
        index: u32,
        imported_module_name: &str,
        imported_global_name: &str,
        value_type: Type,
        mutability: Mutability,
    ) -> LinkResult<i32> {
        let mut resolution = GlobalResolution::UnresolvedImport;
        let mut address = -1;

        if let Some(imported_module) = context.module(imported_module_name) {
            let exporter = imported_module.symbol_table();
            let exported_index = exporter
                .exported_global_index(imported_global_name)
                .ok_or_else(|| LinkError::ImportedGlobalMissing {
                    imported_global: imported_global_name.to_string(),
                    importing_module: module.name().to_string(),
                    imported_module: imported_module_name.to_string(),
                })?;
            let exported_type = exporter.global_value_type(exported_index)?;
            if exported_type != value_type {
                return Err(LinkError::GlobalTypeMismatch {
                    imported_global: imported_global_name.to_string(),
                    importing_module: module.name().to_string(),
                    imported_type: value_type,
                    imported_module: imported_module_name.to_string(),
                    exported_type,
                });
            }
            let exported_mutability = exporter.global_mutability(exported_index)?;
            if exported_mutability != mutability {
                return Err(LinkError::GlobalMutabilityMismatch {
                    imported_global: imported_global_name.to_string(),
                    importing_module: module.name().to_string(),
                    imported_mutability: mutability,
                    imported_module: imported_module_name.to_string(),
                    exported_mutability,
                });
            }
            if exporter.global_resolution(exported_index)?.is_resolved() {
                resolution = GlobalResolution::Imported;
                address = exporter.global_address(exported_index)?;
            }
        }

        module
            .symbol_table()
            .import_global(index, value_type, mutability, resolution, address)?;
        Ok(address)
    }

    /// Eagerly resolve a table imported into `module` from the export
    /// `imported_table_name` of `imported_module_name`.
    ///
    /// The shared table is grown to at least `init_size` elements and
    /// attached to the importing module. The exporting module must already
    /// be registered; deferred table resolution is not implemented.
    pub fn import_table(
        &self,
        context: &Context,
        module: &Arc<Module>,
        imported_module_name: &str,
        imported_table_name: &str,
        init_size: u32,
        max_size: Option<u32>,
    ) -> LinkResult<Arc<Table>> {
        let imported_module = context
            .module(imported_module_name)
            .ok_or(LinkError::PostponedTableResolution)?;
        let exporter = imported_module.symbol_table();
        let exported_table_name =
            exporter
                .exported_table()
                .ok_or_else(|| LinkError::NoExportedTable {
                    imported_module: imported_module_name.to_string(),
                    imported_table: imported_table_name.to_string(),
                    importing_module: module.name().to_string(),
                })?;
        if exported_table_name != imported_table_name {
            return Err(LinkError::TableNameMismatch {
                imported_module: imported_module_name.to_string(),
                exported_table: exported_table_name,
                importing_module: module.name().to_string(),
                imported_table: imported_table_name.to_string(),
            });
        }
        let table = exporter.table().ok_or_else(|| LinkError::MissingTable {
            module: imported_module_name.to_string(),
        })?;
        if let Some(declared_max_size) = table.maximum() {
            if init_size > declared_max_size
                || max_size.map_or(false, |requested| requested > declared_max_size)
            {
                return Err(LinkError::TableSizeOverflow {
                    imported_table: imported_table_name.to_string(),
                    imported_module: imported_module_name.to_string(),
                    declared_max_size,
                    importing_module: module.name().to_string(),
                    imported_max_size: max_size.map(i64::from).unwrap_or(-1),
                });
            }
        }
        table.ensure_size_at_least(init_size)?;
        module.symbol_table().set_imported_table(ImportDescriptor::new(
            imported_module_name,
            imported_table_name,
        ));
        module.symbol_table().set_table(Arc::clone(&table));
        Ok(table)
    }

    /// Register the deferred resolution of `function`, imported into
    /// `module`: once the exporter's export has been resolved, the import's
    /// call target becomes the exporter's call target.
    pub fn resolve_function_import(
        &self,
        context: &Arc<Context>,
        module: &Arc<Module>,
        function: &Arc<Function>,
    ) -> LinkResult<()> {
        let descriptor = function
            .import_descriptor()
            .cloned()
            .ok_or_else(|| LinkError::NotAnImport {
                index: function.index(),
                module: module.name().to_string(),
            })?;
        let action: ResolveAction = {
            let context = Arc::clone(context);
            let module = Arc::clone(module);
            let function = Arc::clone(function);
            let descriptor = descriptor.clone();
            Box::new(move || {
                let imported_module = context.module(&descriptor.module_name).ok_or_else(|| {
                    LinkError::ImportedModuleMissing {
                        imported_module: descriptor.module_name.clone(),
                        imported_function: descriptor.member_name.clone(),
                        importing_module: module.name().to_string(),
                    }
                })?;
                let imported_function = imported_module
                    .read_member(&descriptor.member_name)
                    .ok_or_else(|| LinkError::ImportedFunctionMissing {
                        imported_function: descriptor.member_name.clone(),
                        importing_module: module.name().to_string(),
                        imported_module: descriptor.module_name.clone(),
                    })?;
                function.set_call_target(imported_function.resolve_call_target()?);
                Ok(())
            })
        };
        let dependencies = vec![Sym::ExportFunction {
            module: descriptor.module_name.clone(),
            name: descriptor.member_name.clone(),
        }];
        self.dag.lock().unwrap().resolve_later(
            Sym::ImportFunction {
                module: module.name().to_string(),
                descriptor,
            },
            dependencies,
            action,
        );
        Ok(())
    }

    /// Record the export of the function at `function_index` under
    /// `exported_function_name` and register its ordering edge.
    ///
    /// The resolution itself has nothing to do; the registration exists so
    /// that importers of the export are ordered behind the function's own
    /// import, when it has one.
    pub fn resolve_function_export(
        &self,
        module: &Arc<Module>,
        function_index: u32,
        exported_function_name: &str,
    ) -> LinkResult<()> {
        let function = module.symbol_table().function(function_index).ok_or_else(|| {
            LinkError::UnknownFunction {
                index: function_index,
                module: module.name().to_string(),
            }
        })?;
        module
            .symbol_table()
            .export_function(function_index, exported_function_name)?;
        let dependencies = match function.import_descriptor() {
            Some(descriptor) => vec![Sym::ImportFunction {
                module: module.name().to_string(),
                descriptor: descriptor.clone(),
            }],
            None => Vec::new(),
        };
        self.dag.lock().unwrap().resolve_later(
            Sym::ExportFunction {
                module: module.name().to_string(),
                name: exported_function_name.to_string(),
            },
            dependencies,
            Box::new(|| Ok(())),
        );
        Ok(())
    }

    /// Register the deferred resolution of a call-site in `block` that calls
    /// `function`: the block patches its call node once the callee is known.
    pub fn resolve_callsite(
        &self,
        module: &Arc<Module>,
        block: &Arc<CodeBlock>,
        control_table_offset: u32,
        function: &Arc<Function>,
    ) {
        let dependency = match function.import_descriptor() {
            Some(descriptor) => Sym::ImportFunction {
                module: module.name().to_string(),
                descriptor: descriptor.clone(),
            },
            None => Sym::CodeEntry {
                module: module.name().to_string(),
                function_index: function.index(),
            },
        };
        let action: ResolveAction = {
            let block = Arc::clone(block);
            Box::new(move || {
                block.resolve_call_node(control_table_offset);
                Ok(())
            })
        };
        self.dag.lock().unwrap().resolve_later(
            Sym::Callsite {
                module: module.name().to_string(),
                instruction_offset: block.start_offset(),
                control_table_offset,
            },
            vec![dependency],
            action,
        );
    }

    /// Register the code entry of the local function at `function_index`.
    ///
    /// Nothing is resolved; the registration is a dependency target for the
    /// call-sites of the function.
    pub fn resolve_code_entry(&self, module: &Arc<Module>, function_index: u32) {
        self.dag.lock().unwrap().resolve_later(
            Sym::CodeEntry {
                module: module.name().to_string(),
                function_index,
            },
            Vec::new(),
            Box::new(|| Ok(())),
        );
    }

    /// Register the deferred resolution of a memory imported into `module`
    /// under `descriptor`.
    ///
    /// Once the exporter's memory export is resolved, the shared memory is
    /// validated against the requested sizes, grown to at least `init_size`
    /// pages, and handed to `set_memory`.
    pub fn resolve_memory_import(
        &self,
        context: &Arc<Context>,
        module: &Arc<Module>,
        descriptor: ImportDescriptor,
        init_size: Pages,
        max_size: Option<Pages>,
        set_memory: impl FnMut(Arc<LinearMemory>) + Send + 'static,
    ) {
        module.symbol_table().set_imported_memory(descriptor.clone());
        let dependencies = vec![Sym::ExportMemory {
            module: descriptor.module_name.clone(),
            name: descriptor.member_name.clone(),
        }];
        let action: ResolveAction = {
            let context = Arc::clone(context);
            let module = Arc::clone(module);
            let descriptor = descriptor.clone();
            let mut set_memory = set_memory;
            Box::new(move || {
                let imported_module_name = &descriptor.module_name;
                let imported_memory_name = &descriptor.member_name;
                let imported_module = context.module(imported_module_name).ok_or_else(|| {
                    LinkError::MemoryModuleMissing {
                        imported_module: imported_module_name.clone(),
                        imported_memory: imported_memory_name.clone(),
                        importing_module: module.name().to_string(),
                    }
                })?;
                let exported_memory_name = imported_module
                    .symbol_table()
                    .exported_memory()
                    .ok_or_else(|| LinkError::NoExportedMemory {
                        imported_module: imported_module_name.clone(),
                        imported_memory: imported_memory_name.clone(),
                        importing_module: module.name().to_string(),
                    })?;
                if exported_memory_name != *imported_memory_name {
                    return Err(LinkError::MemoryNameMismatch {
                        imported_module: imported_module_name.clone(),
                        exported_memory: exported_memory_name,
                        importing_module: module.name().to_string(),
                    });
                }
                let memory = imported_module.symbol_table().memory().ok_or_else(|| {
                    LinkError::MissingMemory {
                        module: imported_module_name.clone(),
                    }
                })?;
                if let Some(declared_max_size) = memory.maximum() {
                    if init_size > declared_max_size
                        || max_size.map_or(false, |requested| requested > declared_max_size)
                    {
                        return Err(LinkError::MemorySizeOverflow {
                            imported_memory: imported_memory_name.clone(),
                            imported_module: imported_module_name.clone(),
                            declared_max_size: declared_max_size.0,
                            importing_module: module.name().to_string(),
                            imported_max_size: max_size.map(|pages| pages.0 as i64).unwrap_or(-1),
                        });
                    }
                }
                let current = memory.size();
                if current < init_size {
                    memory.grow(Pages(init_size.0 - current.0))?;
                }
                set_memory(Arc::clone(&memory));
                Ok(())
            })
        };
        self.dag.lock().unwrap().resolve_later(
            Sym::ImportMemory {
                module: module.name().to_string(),
                descriptor,
            },
            dependencies,
            action,
        );
    }

    /// Record the export of the module's memory under
    /// `exported_memory_name` and register its ordering edge.
    ///
    /// Like function exports, memory exports resolve to nothing themselves;
    /// the registration orders importers behind the module's own memory
    /// import, when the exported memory is itself imported.
    pub fn resolve_memory_export(&self, module: &Arc<Module>, exported_memory_name: &str) {
        module.symbol_table().set_exported_memory(exported_memory_name);
        let dependencies = match module.symbol_table().imported_memory() {
            Some(descriptor) => vec![Sym::ImportMemory {
                module: module.name().to_string(),
                descriptor,
            }],
            None => Vec::new(),
        };
        self.dag.lock().unwrap().resolve_later(
            Sym::ExportMemory {
                module: module.name().to_string(),
                name: exported_memory_name.to_string(),
            },
            dependencies,
            Box::new(|| Ok(())),
        );
    }

    /// Register the deferred initialization of the data section
    /// `data_section_id`, which writes `bytes` at `base_address` of the
    /// module's memory.
    ///
    /// The write is ordered behind the module's memory import and, unless
    /// `prior_data_sections_resolved` is set, behind the previous data
    /// section, so section writes land in ascending id order. The module
    /// must declare or import a memory.
    pub fn resolve_data_section(
        &self,
        module: &Arc<Module>,
        data_section_id: u32,
        base_address: u64,
        bytes: Vec<u8>,
        prior_data_sections_resolved: bool,
    ) -> LinkResult<()> {
        let symbol_table = module.symbol_table();
        if symbol_table.memory().is_none() && symbol_table.imported_memory().is_none() {
            return Err(LinkError::MissingMemory {
                module: module.name().to_string(),
            });
        }
        symbol_table.declare_data_segment(data_section_id, base_address, bytes.clone());

        let mut dependencies = Vec::new();
        if let Some(descriptor) = symbol_table.imported_memory() {
            dependencies.push(Sym::ImportMemory {
                module: module.name().to_string(),
                descriptor,
            });
        }
        if !prior_data_sections_resolved && data_section_id > 0 {
            dependencies.push(Sym::Data {
                module: module.name().to_string(),
                data_section_id: data_section_id - 1,
            });
        }
        let action: ResolveAction = {
            let module = Arc::clone(module);
            Box::new(move || {
                let memory = module.symbol_table().memory().ok_or_else(|| {
                    LinkError::MissingMemory {
                        module: module.name().to_string(),
                    }
                })?;
                memory.validate_address(base_address, bytes.len() as u64)?;
                memory.write(base_address, &bytes)?;
                Ok(())
            })
        };
        self.dag.lock().unwrap().resolve_later(
            Sym::Data {
                module: module.name().to_string(),
                data_section_id,
            },
            dependencies,
            action,
        );
        Ok(())
    }

    /// Initialize the module's table with the call targets of the functions
    /// named by `contents`, starting at the element offset produced by the
    /// global at `global_index`.
    ///
    /// The offset global must already be resolved; deferred element
    /// initialization is not implemented.
    pub fn initialize_table_elements(
        &self,
        context: &Context,
        module: &Arc<Module>,
        global_index: u32,
        contents: &[u32],
    ) -> LinkResult<()> {
        let symbol_table = module.symbol_table();
        if !symbol_table.global_resolution(global_index)?.is_resolved() {
            return Err(LinkError::PostponedTableInitialization);
        }
        let address = symbol_table.global_address(global_index)?;
        let offset = context.globals().load_as_i32(address as u32)?;
        symbol_table.initialize_table_with_functions(offset as u32, contents)
    }

    /// Re-initialize the module's mutable state: declared globals are reset
    /// to their declared initial values and data segments are re-written.
    /// The module's memory is zeroed first iff `zero_memory` is set.
    ///
    /// This is meant for reuse of a context by test and benchmark harnesses
    /// and runs outside of the link state machine.
    pub fn reset_module_state(
        &self,
        context: &Context,
        module: &Arc<Module>,
        zero_memory: bool,
    ) -> LinkResult<()> {
        let symbol_table = module.symbol_table();
        symbol_table.reset_globals(context.globals())?;
        let memory = symbol_table.memory();
        if zero_memory {
            if let Some(memory) = &memory {
                memory.zero();
            }
        }
        let segments = symbol_table.data_segments();
        if !segments.is_empty() {
            let memory = memory.ok_or_else(|| LinkError::MissingMemory {
                module: module.name().to_string(),
            })?;
            for segment in &segments {
                memory.write(segment.base_address, &segment.bytes)?;
            }
        }
        Ok(())
    }
}
