//! The symbolic identities of linkable entities.

use crate::types::ImportDescriptor;
use std::fmt;

/// The identity of a linkable entity in the resolution DAG.
///
/// Two symbols are equal iff their variant and all fields are equal; the
/// hash is consistent with equality, so symbols key the DAG's resolver map.
/// The `Display` rendering is stable and human-readable; it is what cycle
/// diagnostics are made of.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Sym {
    /// A function imported into `module` under `descriptor`.
    ImportFunction {
        /// The importing module.
        module: String,
        /// The names under which the function is imported.
        descriptor: ImportDescriptor,
    },
    /// A function exported from `module` under `name`.
    ExportFunction {
        /// The exporting module.
        module: String,
        /// The exported name.
        name: String,
    },
    /// A call-site inside `module`, identified by the offset of its
    /// enclosing block and its control-table offset.
    Callsite {
        /// The module containing the call-site.
        module: String,
        /// The instruction offset of the enclosing block.
        instruction_offset: u32,
        /// The offset of the call node in the control table.
        control_table_offset: u32,
    },
    /// The code entry of the local function at `function_index` in `module`.
    CodeEntry {
        /// The module declaring the function.
        module: String,
        /// The index of the function.
        function_index: u32,
    },
    /// A memory imported into `module` under `descriptor`.
    ImportMemory {
        /// The importing module.
        module: String,
        /// The names under which the memory is imported.
        descriptor: ImportDescriptor,
    },
    /// A memory exported from `module` under `name`.
    ExportMemory {
        /// The exporting module.
        module: String,
        /// The exported name.
        name: String,
    },
    /// The data section with id `data_section_id` in `module`.
    Data {
        /// The module declaring the data section.
        module: String,
        /// The id of the data section.
        data_section_id: u32,
    },
}

impl fmt::Display for Sym {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::ImportFunction { module, descriptor } => write!(
                f,
                "(import func {} from {} into {})",
                descriptor.member_name, descriptor.module_name, module
            ),
            Self::ExportFunction { module, name } => {
                write!(f, "(export func {} from {})", name, module)
            }
            Self::Callsite {
                module,
                instruction_offset,
                ..
            } => write!(f, "(callsite at {} in {})", instruction_offset, module),
            Self::CodeEntry {
                module,
                function_index,
            } => write!(f, "(code entry at {} in {})", function_index, module),
            Self::ImportMemory { module, descriptor } => write!(
                f,
                "(import memory {} from {} into {})",
                descriptor.member_name, descriptor.module_name, module
            ),
            Self::ExportMemory { module, name } => {
                write!(f, "(export memory {} from {})", name, module)
            }
            Self::Data {
                module,
                data_section_id,
            } => write!(f, "(data {} in {})", data_section_id, module),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn renderings_are_stable() {
        let sym = Sym::ImportFunction {
            module: "main".to_string(),
            descriptor: ImportDescriptor::new("env", "printf"),
        };
        assert_eq!(sym.to_string(), "(import func printf from env into main)");

        let sym = Sym::ExportFunction {
            module: "env".to_string(),
            name: "printf".to_string(),
        };
        assert_eq!(sym.to_string(), "(export func printf from env)");

        let sym = Sym::Callsite {
            module: "main".to_string(),
            instruction_offset: 42,
            control_table_offset: 3,
        };
        assert_eq!(sym.to_string(), "(callsite at 42 in main)");

        let sym = Sym::CodeEntry {
            module: "main".to_string(),
            function_index: 0,
        };
        assert_eq!(sym.to_string(), "(code entry at 0 in main)");

        let sym = Sym::ExportMemory {
            module: "env".to_string(),
            name: "memory".to_string(),
        };
        assert_eq!(sym.to_string(), "(export memory memory from env)");

        let sym = Sym::ImportMemory {
            module: "main".to_string(),
            descriptor: ImportDescriptor::new("env", "memory"),
        };
        assert_eq!(sym.to_string(), "(import memory memory from env into main)");

        let sym = Sym::Data {
            module: "main".to_string(),
            data_section_id: 3,
        };
        assert_eq!(sym.to_string(), "(data 3 in main)");
    }

    #[test]
    fn equality_covers_all_fields() {
        let a = Sym::Callsite {
            module: "main".to_string(),
            instruction_offset: 42,
            control_table_offset: 0,
        };
        let b = Sym::Callsite {
            module: "main".to_string(),
            instruction_offset: 42,
            control_table_offset: 1,
        };
        assert_ne!(a, b);

        let export_fn = Sym::ExportFunction {
            module: "env".to_string(),
            name: "x".to_string(),
        };
        let export_mem = Sym::ExportMemory {
            module: "env".to_string(),
            name: "x".to_string(),
        };
        assert_ne!(export_fn, export_mem);
    }

    #[test]
    fn symbols_key_hash_maps() {
        let mut map = HashMap::new();
        let sym = Sym::CodeEntry {
            module: "main".to_string(),
            function_index: 1,
        };
        map.insert(sym.clone(), "entry");
        assert_eq!(map.get(&sym), Some(&"entry"));
    }
}
