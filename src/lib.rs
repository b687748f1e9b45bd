//! Cross-module import and export resolution for parsed WebAssembly
//! modules.
//!
//! This crate links the modules of a shared execution [`Context`]: it
//! resolves imported functions, memories, tables and globals against their
//! exporters, patches call-sites, grows shared memories, copies data
//! segments and invokes each module's start function.
//!
//! The parser drives the [`Linker`] while it walks a module. Global and
//! table imports are checked eagerly; everything else is registered as a
//! deferred resolution in a dependency graph (the [`ResolutionDag`]), since
//! the referenced modules may not have been parsed yet. The first call to
//! [`Linker::try_link`] sorts the graph topologically, runs every
//! resolution, and retires the graph; linking happens exactly once per
//! context.
//!
//! ```
//! use std::sync::Arc;
//! use wasm_linker::{CallTarget, Context, Linker, Module};
//!
//! let context = Arc::new(Context::new());
//! let env = context.register(Module::new("env")).unwrap();
//! let main = context.register(Module::new("main")).unwrap();
//!
//! let linker = Linker::new();
//! env.symbol_table().declare_function(CallTarget::new(|_| println!("hello")));
//! linker.resolve_function_export(&env, 0, "print").unwrap();
//! let print = main.symbol_table().declare_imported_function("env", "print");
//! linker.resolve_function_import(&context, &main, &print).unwrap();
//!
//! linker.try_link(&context).unwrap();
//! print.resolve_call_target().unwrap().call(&[]);
//! ```

#![deny(missing_docs, trivial_numeric_casts, unused_extern_crates)]
#![warn(unused_import_braces)]

mod context;
mod dag;
mod error;
mod function;
mod global;
mod linker;
mod memory;
mod module;
mod symbol;
mod table;
mod types;
mod units;

pub use crate::context::Context;
pub use crate::dag::{ResolutionDag, ResolveAction, Resolver};
pub use crate::error::{LinkError, LinkResult};
pub use crate::function::{CallTarget, CodeBlock, Function};
pub use crate::global::{GlobalResolution, GlobalStore};
pub use crate::linker::{LinkState, Linker};
pub use crate::memory::LinearMemory;
pub use crate::module::{DataSegment, Module, SymbolTable};
pub use crate::symbol::Sym;
pub use crate::table::Table;
pub use crate::types::{GlobalType, ImportDescriptor, Mutability, Type, Value};
pub use crate::units::{Pages, WASM_MAX_PAGES, WASM_PAGE_SIZE};

/// Version number of this crate.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
