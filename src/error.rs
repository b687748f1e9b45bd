//! The error type produced when a link cannot be completed.

use crate::types::{Mutability, Type};
use thiserror::Error;

/// Result of an attempt to link the modules of a context.
///
/// Aliases the standard `Result` with [`LinkError`] as the default error type.
pub type LinkResult<T> = std::result::Result<T, LinkError>;

/// This is returned when the linker is unable to connect the modules of a
/// context, or when one of its collaborating objects (memories, tables, the
/// global store) is driven outside of its bounds.
///
/// Every variant renders as a single human-readable line; the rendered text
/// is part of the crate's observable behavior and is asserted by the test
/// suite.
#[derive(Error, Debug)]
pub enum LinkError {
    /// A function import names a module that is not part of the context.
    #[error("The module '{imported_module}', referenced by the import '{imported_function}' in the module '{importing_module}', does not exist.")]
    ImportedModuleMissing {
        /// The name of the module that could not be found.
        imported_module: String,
        /// The name of the function whose import referenced the module.
        imported_function: String,
        /// The module containing the import.
        importing_module: String,
    },

    /// A function import names a member its exporter does not provide.
    #[error("The imported function '{imported_function}', referenced in the module '{importing_module}', does not exist in the imported module '{imported_module}'.")]
    ImportedFunctionMissing {
        /// The name of the function that could not be found.
        imported_function: String,
        /// The module containing the import.
        importing_module: String,
        /// The module that was expected to export the function.
        imported_module: String,
    },

    /// A global import names a member its exporter does not provide.
    #[error("Global variable '{imported_global}', imported into module '{importing_module}', was not exported in the module '{imported_module}'.")]
    ImportedGlobalMissing {
        /// The name of the global that could not be found.
        imported_global: String,
        /// The module containing the import.
        importing_module: String,
        /// The module that was expected to export the global.
        imported_module: String,
    },

    /// The value types of an imported global and its export disagree.
    #[error("Global variable '{imported_global}' is imported into module '{importing_module}' with the type {imported_type}, but it was exported in the module '{imported_module}' with the type {exported_type}.")]
    GlobalTypeMismatch {
        /// The name of the global.
        imported_global: String,
        /// The module containing the import.
        importing_module: String,
        /// The value type requested by the importer.
        imported_type: Type,
        /// The module exporting the global.
        imported_module: String,
        /// The value type declared by the exporter.
        exported_type: Type,
    },

    /// The mutability modifiers of an imported global and its export disagree.
    #[error("Global variable '{imported_global}' is imported into module '{importing_module}' with the modifier {imported_mutability}, but it was exported in the module '{imported_module}' with the modifier {exported_mutability}.")]
    GlobalMutabilityMismatch {
        /// The name of the global.
        imported_global: String,
        /// The module containing the import.
        importing_module: String,
        /// The modifier requested by the importer.
        imported_mutability: Mutability,
        /// The module exporting the global.
        imported_module: String,
        /// The modifier declared by the exporter.
        exported_mutability: Mutability,
    },

    /// A table import references a module that is not yet in the context.
    ///
    /// Table imports are resolved eagerly, so the exporting module must have
    /// been registered first. This is a documented limitation.
    #[error("Postponed table resolution not implemented.")]
    PostponedTableResolution,

    /// A table import references a module that exports no table.
    #[error("The imported module '{imported_module}' does not export any tables, so cannot resolve table '{imported_table}' imported in module '{importing_module}'.")]
    NoExportedTable {
        /// The module that was expected to export a table.
        imported_module: String,
        /// The name of the table that could not be resolved.
        imported_table: String,
        /// The module containing the import.
        importing_module: String,
    },

    /// The name of an imported table and the exporter's table disagree.
    #[error("The imported module '{imported_module}' exports a table '{exported_table}', but module '{importing_module}' imports a table '{imported_table}'.")]
    TableNameMismatch {
        /// The module exporting the table.
        imported_module: String,
        /// The name under which the exporter's table is exported.
        exported_table: String,
        /// The module containing the import.
        importing_module: String,
        /// The name requested by the importer.
        imported_table: String,
    },

    /// The sizes requested by a table import exceed the exporter's limit.
    #[error("The table '{imported_table}' in the imported module '{imported_module}' has maximum size {declared_max_size}, but module '{importing_module}' imports it with maximum size '{imported_max_size}'")]
    TableSizeOverflow {
        /// The name of the table.
        imported_table: String,
        /// The module exporting the table.
        imported_module: String,
        /// The exporter's declared maximum size.
        declared_max_size: u32,
        /// The module containing the import.
        importing_module: String,
        /// The maximum size requested by the importer (-1 when unlimited).
        imported_max_size: i64,
    },

    /// A memory import names a module that is not part of the context.
    #[error("The module '{imported_module}', referenced in the import of memory '{imported_memory}' in module '{importing_module}', does not exist")]
    MemoryModuleMissing {
        /// The name of the module that could not be found.
        imported_module: String,
        /// The name of the memory whose import referenced the module.
        imported_memory: String,
        /// The module containing the import.
        importing_module: String,
    },

    /// A memory import references a module that exports no memory.
    #[error("The imported module '{imported_module}' does not export any memories, so cannot resolve memory '{imported_memory}' imported in module '{importing_module}'.")]
    NoExportedMemory {
        /// The module that was expected to export a memory.
        imported_module: String,
        /// The name of the memory that could not be resolved.
        imported_memory: String,
        /// The module containing the import.
        importing_module: String,
    },

    /// The name of an imported memory and the exporter's memory disagree.
    ///
    /// The trailing position of this message renders the imported module
    /// name; embedders parse these messages, so the historical wording is
    /// kept as is.
    #[error("The imported module '{imported_module}' exports a memory '{exported_memory}', but module '{importing_module}' imports a memory '{imported_module}'.")]
    MemoryNameMismatch {
        /// The module exporting the memory.
        imported_module: String,
        /// The name under which the exporter's memory is exported.
        exported_memory: String,
        /// The module containing the import.
        importing_module: String,
    },

    /// The sizes requested by a memory import exceed the exporter's limit.
    #[error("The memory '{imported_memory}' in the imported module '{imported_module}' has maximum size {declared_max_size}, but module '{importing_module}' imports it with maximum size '{imported_max_size}'")]
    MemorySizeOverflow {
        /// The name of the memory.
        imported_memory: String,
        /// The module exporting the memory.
        imported_module: String,
        /// The exporter's declared maximum size in pages.
        declared_max_size: u32,
        /// The module containing the import.
        importing_module: String,
        /// The maximum page count requested by the importer (-1 when unlimited).
        imported_max_size: i64,
    },

    /// A data section was declared in a module without a memory.
    #[error("No memory declared or imported in the module '{module}'")]
    MissingMemory {
        /// The module missing a memory.
        module: String,
    },

    /// A table operation was requested in a module without a table.
    #[error("No table declared or imported in the module '{module}'")]
    MissingTable {
        /// The module missing a table.
        module: String,
    },

    /// The import dependencies of the registered modules form a cycle.
    #[error("Detected a cycle in the import dependencies: {cycle}")]
    DependencyCycle {
        /// The cycle, rendered as symbols joined by `" -> "`; the chain
        /// starts and ends at the same symbol.
        cycle: String,
    },

    /// An element segment's offset global is not yet resolved.
    ///
    /// This is a documented limitation.
    #[error("Postponed table initialization not implemented.")]
    PostponedTableInitialization,

    /// A memory access fell outside of the current bounds of a memory.
    #[error("The memory access at offset {offset} with length {length} exceeds the memory size of {size} bytes.")]
    MemoryOutOfBounds {
        /// The first byte offset of the access.
        offset: u64,
        /// The length of the access in bytes.
        length: u64,
        /// The current size of the memory in bytes.
        size: usize,
    },

    /// A memory could not grow to the requested number of pages.
    #[error("The memory could not grow: current size {current} pages, requested increase: {delta} pages.")]
    MemoryCouldNotGrow {
        /// The current size in pages.
        current: u32,
        /// The requested increase in pages.
        delta: u32,
    },

    /// A memory plan was invalid at construction time.
    #[error("The memory plan is invalid: {reason}")]
    InvalidMemory {
        /// Why the plan was rejected.
        reason: String,
    },

    /// A table could not grow to the requested number of elements.
    #[error("The table could not grow: current size {current} elements, requested size: {requested} elements.")]
    TableCouldNotGrow {
        /// The current size in elements.
        current: u32,
        /// The requested total size in elements.
        requested: u32,
    },

    /// A table plan was invalid at construction time.
    #[error("The table plan is invalid: {reason}")]
    InvalidTable {
        /// Why the plan was rejected.
        reason: String,
    },

    /// An element write fell outside of the current bounds of a table.
    #[error("The table element write at offset {offset} with length {length} exceeds the table size of {size} elements.")]
    TableOutOfBounds {
        /// The first element offset of the write.
        offset: u32,
        /// The number of elements written.
        length: u32,
        /// The current size of the table in elements.
        size: u32,
    },

    /// A module was registered under a name that is already taken.
    #[error("A module with the name '{name}' is already registered.")]
    DuplicateModule {
        /// The contested module name.
        name: String,
    },

    /// A function that is not an import was passed to an import operation.
    #[error("The function at index {index} in the module '{module}' is not an import.")]
    NotAnImport {
        /// The index of the function.
        index: u32,
        /// The module declaring the function.
        module: String,
    },

    /// A function index does not name a function of its module.
    #[error("The function at index {index} does not exist in the module '{module}'.")]
    UnknownFunction {
        /// The out-of-range index.
        index: u32,
        /// The module that was queried.
        module: String,
    },

    /// A function's call target was requested before it was materialized.
    #[error("The function at index {index} has no resolved call target.")]
    UnresolvedCallTarget {
        /// The index of the function.
        index: u32,
    },

    /// A global index does not name a global of its module.
    #[error("The global variable at index {index} does not exist in the module '{module}'.")]
    UnknownGlobal {
        /// The out-of-range index.
        index: u32,
        /// The module that was queried.
        module: String,
    },

    /// A global address does not name a slot of the global store.
    #[error("The global address {address} is out of bounds.")]
    InvalidGlobalAddress {
        /// The out-of-range address.
        address: i32,
    },

    /// A global was read as an integer but holds a float value.
    #[error("The global variable at address {address} does not hold an integer value.")]
    NonIntegerGlobal {
        /// The address of the global.
        address: i32,
    },
}
