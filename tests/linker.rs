//! End-to-end linking scenarios driving the public linker API the way a
//! parser would.

use more_asserts::assert_ge;
use std::sync::{Arc, Mutex};
use wasm_linker::{
    CallTarget, CodeBlock, Context, ImportDescriptor, LinearMemory, LinkState, Linker, Module,
    Mutability, Pages, Type, Value,
};

fn noop_target() -> CallTarget {
    CallTarget::new(|_| {})
}

#[test]
fn links_a_single_module_with_a_local_callsite() {
    let context = Arc::new(Context::new());
    let main = context.register(Module::new("main")).unwrap();
    let linker = Linker::new();

    let f = main.symbol_table().declare_function(noop_target());
    linker.resolve_code_entry(&main, f.index());
    let block = Arc::new(CodeBlock::new(0));
    linker.resolve_callsite(&main, &block, 0, &f);

    linker.try_link(&context).unwrap();
    assert!(main.is_linked());
    assert!(linker.is_linked());
    assert_eq!(block.resolved_calls(), vec![0]);
    assert_eq!(linker.pending_resolutions(), 0);
}

#[test]
fn imported_functions_share_their_exporters_call_target() {
    let context = Arc::new(Context::new());
    let env = context.register(Module::new("env")).unwrap();
    let main = context.register(Module::new("main")).unwrap();
    let linker = Linker::new();

    let print_target = noop_target();
    let env_print = env.symbol_table().declare_function(print_target.clone());
    linker
        .resolve_function_export(&env, env_print.index(), "print")
        .unwrap();

    let main_print = main.symbol_table().declare_imported_function("env", "print");
    linker
        .resolve_function_import(&context, &main, &main_print)
        .unwrap();
    let block = Arc::new(CodeBlock::new(12));
    linker.resolve_callsite(&main, &block, 3, &main_print);

    linker.try_link(&context).unwrap();
    let resolved = main_print.resolve_call_target().unwrap();
    assert!(CallTarget::same(&resolved, &print_target));
    assert_eq!(block.resolved_calls(), vec![3]);
}

#[test]
fn missing_function_exports_are_reported_by_name() {
    let context = Arc::new(Context::new());
    let _env = context.register(Module::new("env")).unwrap();
    let main = context.register(Module::new("main")).unwrap();
    let linker = Linker::new();

    let main_print = main.symbol_table().declare_imported_function("env", "print");
    linker
        .resolve_function_import(&context, &main, &main_print)
        .unwrap();

    let err = linker.try_link(&context).unwrap_err();
    assert_eq!(
        err.to_string(),
        "The imported function 'print', referenced in the module 'main', \
         does not exist in the imported module 'env'."
    );
    // The failed link left the state machine in progress; further calls
    // do not attempt to link again.
    assert_eq!(linker.link_state(), LinkState::InProgress);
    linker.try_link(&context).unwrap();
}

#[test]
fn missing_modules_are_reported_by_name() {
    let context = Arc::new(Context::new());
    let main = context.register(Module::new("main")).unwrap();
    let linker = Linker::new();

    let f = main.symbol_table().declare_imported_function("sys", "x");
    linker.resolve_function_import(&context, &main, &f).unwrap();

    let err = linker.try_link(&context).unwrap_err();
    assert_eq!(
        err.to_string(),
        "The module 'sys', referenced by the import 'x' in the module 'main', does not exist."
    );
}

#[test]
fn import_cycles_are_detected_and_rendered() {
    let context = Arc::new(Context::new());
    let a = context.register(Module::new("a")).unwrap();
    let b = context.register(Module::new("b")).unwrap();
    let linker = Linker::new();

    // `a` exports `f`, which is imported from `b.g`; `b` exports `g`,
    // which is imported from `a.f`.
    let a_f = a.symbol_table().declare_imported_function("b", "g");
    linker.resolve_function_import(&context, &a, &a_f).unwrap();
    linker.resolve_function_export(&a, a_f.index(), "f").unwrap();

    let b_g = b.symbol_table().declare_imported_function("a", "f");
    linker.resolve_function_import(&context, &b, &b_g).unwrap();
    linker.resolve_function_export(&b, b_g.index(), "g").unwrap();

    let err = linker.try_link(&context).unwrap_err();
    let message = err.to_string();
    let prefix = "Detected a cycle in the import dependencies: ";
    assert!(message.starts_with(prefix), "unexpected message: {message}");
    assert!(message.contains("(import func g from b into a)"));
    assert!(message.contains("(import func f from a into b)"));

    let chain: Vec<_> = message[prefix.len()..].split(" -> ").collect();
    assert_ge!(chain.len(), 3);
    assert_eq!(chain.first(), chain.last());
}

#[test]
fn imported_memories_alias_the_exporters_memory() {
    let context = Arc::new(Context::new());
    let env = context.register(Module::new("env")).unwrap();
    let main = context.register(Module::new("main")).unwrap();
    let linker = Linker::new();

    let env_memory = Arc::new(LinearMemory::new(Pages(1), Some(Pages(10))).unwrap());
    env.symbol_table().set_memory(Arc::clone(&env_memory));
    linker.resolve_memory_export(&env, "memory");

    let main_handle = Arc::clone(&main);
    linker.resolve_memory_import(
        &context,
        &main,
        ImportDescriptor::new("env", "memory"),
        Pages(4),
        Some(Pages(10)),
        move |memory| main_handle.symbol_table().set_memory(memory),
    );

    linker.try_link(&context).unwrap();

    // The shared memory grew to the importer's initial size.
    assert_eq!(env_memory.size(), Pages(4));
    let main_memory = main.symbol_table().memory().unwrap();
    assert!(Arc::ptr_eq(&main_memory, &env_memory));

    // Writes through one handle are visible through the other.
    main_memory.write(0, &[0xab]).unwrap();
    assert_eq!(env_memory.read_u8(0).unwrap(), 0xab);
}

#[test]
fn memory_name_mismatches_keep_the_historical_wording() {
    let context = Arc::new(Context::new());
    let env = context.register(Module::new("env")).unwrap();
    let main = context.register(Module::new("main")).unwrap();
    let linker = Linker::new();

    env.symbol_table()
        .set_memory(Arc::new(LinearMemory::new(Pages(1), None).unwrap()));
    linker.resolve_memory_export(&env, "mem");

    linker.resolve_memory_import(
        &context,
        &main,
        ImportDescriptor::new("env", "memory"),
        Pages(1),
        None,
        |_| {},
    );

    let err = linker.try_link(&context).unwrap_err();
    assert_eq!(
        err.to_string(),
        "The imported module 'env' exports a memory 'mem', \
         but module 'main' imports a memory 'env'."
    );
}

#[test]
fn memory_imports_from_unknown_modules_fail_during_the_link() {
    let context = Arc::new(Context::new());
    let main = context.register(Module::new("main")).unwrap();
    let linker = Linker::new();

    linker.resolve_memory_import(
        &context,
        &main,
        ImportDescriptor::new("sys", "memory"),
        Pages(1),
        None,
        |_| {},
    );

    let err = linker.try_link(&context).unwrap_err();
    assert_eq!(
        err.to_string(),
        "The module 'sys', referenced in the import of memory 'memory' in module 'main', \
         does not exist"
    );
}

#[test]
fn memory_imports_check_the_exporters_maximum() {
    let context = Arc::new(Context::new());
    let env = context.register(Module::new("env")).unwrap();
    let main = context.register(Module::new("main")).unwrap();
    let linker = Linker::new();

    env.symbol_table()
        .set_memory(Arc::new(LinearMemory::new(Pages(1), Some(Pages(2))).unwrap()));
    linker.resolve_memory_export(&env, "memory");

    linker.resolve_memory_import(
        &context,
        &main,
        ImportDescriptor::new("env", "memory"),
        Pages(4),
        Some(Pages(4)),
        |_| {},
    );

    let err = linker.try_link(&context).unwrap_err();
    assert_eq!(
        err.to_string(),
        "The memory 'memory' in the imported module 'env' has maximum size 2, \
         but module 'main' imports it with maximum size '4'"
    );
}

#[test]
fn data_sections_write_in_ascending_id_order() {
    let context = Arc::new(Context::new());
    let env = context.register(Module::new("env")).unwrap();
    let main = context.register(Module::new("main")).unwrap();
    let linker = Linker::new();

    let env_memory = Arc::new(LinearMemory::new(Pages(1), None).unwrap());
    env.symbol_table().set_memory(Arc::clone(&env_memory));
    linker.resolve_memory_export(&env, "memory");

    let main_handle = Arc::clone(&main);
    linker.resolve_memory_import(
        &context,
        &main,
        ImportDescriptor::new("env", "memory"),
        Pages(1),
        None,
        move |memory| main_handle.symbol_table().set_memory(memory),
    );

    // Registered in descending order: the dependency edges, not the
    // registration order, put section 0 before section 1.
    linker
        .resolve_data_section(&main, 1, 0, vec![0x22], false)
        .unwrap();
    linker
        .resolve_data_section(&main, 0, 0, vec![0x11], false)
        .unwrap();

    linker.try_link(&context).unwrap();
    assert_eq!(env_memory.read_u8(0).unwrap(), 0x22);
}

#[test]
fn start_functions_run_in_registration_order_after_linking() {
    let context = Arc::new(Context::new());
    let env = context.register(Module::new("env")).unwrap();
    let main = context.register(Module::new("main")).unwrap();
    let linker = Linker::new();

    let order = Arc::new(Mutex::new(Vec::new()));
    for module in [&env, &main] {
        let order = Arc::clone(&order);
        let name = module.name().to_string();
        let env_handle = Arc::clone(&env);
        let main_handle = Arc::clone(&main);
        let start = module.symbol_table().declare_function(CallTarget::new(
            move |_| {
                // Every module is linked before any start function runs.
                assert!(env_handle.is_linked());
                assert!(main_handle.is_linked());
                order.lock().unwrap().push(name.clone());
            },
        ));
        module.symbol_table().set_start_function(start.index()).unwrap();
    }

    linker.try_link(&context).unwrap();
    assert_eq!(*order.lock().unwrap(), vec!["env", "main"]);

    // Linking is idempotent: a second call neither fails nor re-runs the
    // start functions.
    linker.try_link(&context).unwrap();
    assert_eq!(order.lock().unwrap().len(), 2);
    assert_eq!(linker.link_state(), LinkState::Linked);
}

#[test]
fn function_exports_of_imports_chain_through_both_modules() {
    // `main` imports `env.print`, which `env` itself re-exports from an
    // imported function of `host`.
    let context = Arc::new(Context::new());
    let host = context.register(Module::new("host")).unwrap();
    let env = context.register(Module::new("env")).unwrap();
    let main = context.register(Module::new("main")).unwrap();
    let linker = Linker::new();

    let host_target = noop_target();
    let host_print = host.symbol_table().declare_function(host_target.clone());
    linker
        .resolve_function_export(&host, host_print.index(), "print")
        .unwrap();

    let env_print = env.symbol_table().declare_imported_function("host", "print");
    linker
        .resolve_function_import(&context, &env, &env_print)
        .unwrap();
    linker
        .resolve_function_export(&env, env_print.index(), "print")
        .unwrap();

    let main_print = main.symbol_table().declare_imported_function("env", "print");
    linker
        .resolve_function_import(&context, &main, &main_print)
        .unwrap();

    linker.try_link(&context).unwrap();
    let resolved = main_print.resolve_call_target().unwrap();
    assert!(CallTarget::same(&resolved, &host_target));
}

#[test]
fn reset_restores_globals_and_data_segments() {
    let context = Arc::new(Context::new());
    let main = context.register(Module::new("main")).unwrap();
    let linker = Linker::new();

    let memory = Arc::new(LinearMemory::new(Pages(1), None).unwrap());
    main.symbol_table().set_memory(Arc::clone(&memory));
    let global = main.symbol_table().declare_global(
        context.globals(),
        Type::I32,
        Mutability::Var,
        Value::I32(7),
    );
    linker
        .resolve_data_section(&main, 0, 5, vec![0x11, 0x22], true)
        .unwrap();

    linker.try_link(&context).unwrap();
    assert_eq!(memory.read_u8(5).unwrap(), 0x11);

    // Scribble over the module state.
    let address = main.symbol_table().global_address(global).unwrap() as u32;
    context.globals().store(address, Value::I32(99)).unwrap();
    memory.write(100, &[0xff]).unwrap();

    linker.reset_module_state(&context, &main, true).unwrap();
    assert_eq!(context.globals().load(address).unwrap(), Value::I32(7));
    assert_eq!(memory.read_u8(100).unwrap(), 0);
    assert_eq!(memory.read_u8(5).unwrap(), 0x11);
    assert_eq!(memory.read_u8(6).unwrap(), 0x22);
}

#[test]
fn data_sections_validate_their_target_range() {
    let context = Arc::new(Context::new());
    let main = context.register(Module::new("main")).unwrap();
    let linker = Linker::new();

    let memory = Arc::new(LinearMemory::new(Pages(1), None).unwrap());
    main.symbol_table().set_memory(memory);
    let page = wasm_linker::WASM_PAGE_SIZE as u64;
    linker
        .resolve_data_section(&main, 0, page - 1, vec![0x11, 0x22], true)
        .unwrap();

    let err = linker.try_link(&context).unwrap_err();
    assert_eq!(
        err.to_string(),
        format!(
            "The memory access at offset {} with length 2 exceeds the memory size of {} bytes.",
            page - 1,
            page
        )
    );
}
