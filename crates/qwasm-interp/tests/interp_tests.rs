//! Host-side behaviour of the interpreter hook.

use qwasm_dsl::{wasm_insist, wasm_throw, ExceptionKind, Function, Module, ModuleConfig, PrimitiveExpr, PtrExpr};
use qwasm_interp::{memory_export, read_messages, Instance, InterpError};

fn build(generate: impl FnOnce(&mut Module)) -> Vec<u8> {
    let config = ModuleConfig {
        debug_checks: true,
        ..ModuleConfig::default()
    };
    let mut m = Module::with_config(config).expect("module already active");
    generate(&mut m);
    let wasm = m.binary().expect("serialization failed");
    m.dispose();
    wasm
}

#[test]
fn message_table_is_embedded() {
    let wasm = build(|m| {
        Function::<(i32,), ()>::build(m, "check", |m, f| {
            let (x,) = f.parameters();
            wasm_insist!(m, x.val().ne(0), "zero");
            wasm_insist!(m, x.val().ne(1));
        })
        .export(m);
    });
    let messages = read_messages(&wasm).expect("unreadable message table");
    assert_eq!(messages.len(), 2);
    assert_eq!(messages.get(0).and_then(|e| e.message.as_deref()), Some("zero"));
    assert_eq!(messages.get(1).and_then(|e| e.message.as_deref()), None);
}

#[test]
fn module_without_checks_has_no_messages() {
    let wasm = build(|m| {
        Function::<(), i32>::build(m, "one", |m, f| f.emit_return(m, 1)).export(m);
    });
    assert!(read_messages(&wasm).expect("unreadable message table").is_empty());
    let mut instance = Instance::new(&wasm).expect("instantiation failed");
    let one: i32 = instance.call("one", ()).expect("one trapped");
    assert_eq!(one, 1);
}

#[test]
fn reports_are_cleared_after_each_call() {
    let wasm = build(|m| {
        Function::<(i32,), i32>::build(m, "check", |m, f| {
            let (x,) = f.parameters();
            wasm_insist!(m, x.val().ne(0), "zero");
            f.emit_return(m, x.val());
        })
        .export(m);
    });
    let mut instance = Instance::new(&wasm).expect("instantiation failed");
    assert!(matches!(instance.call::<i32, i32>("check", 0), Err(InterpError::Insist { .. })));
    let ok: i32 = instance.call("check", 4).expect("check trapped");
    assert_eq!(ok, 4);
}

#[test]
fn every_exception_kind_is_reported() {
    let wasm = build(|m| {
        for kind in ExceptionKind::ALL {
            let name = format!("throw_{}", kind.code());
            Function::<(), ()>::build(m, name, |m, _| wasm_throw!(m, kind)).export(m);
        }
    });
    let mut instance = Instance::new(&wasm).expect("instantiation failed");
    for kind in ExceptionKind::ALL {
        match instance.call::<(), ()>(&format!("throw_{}", kind.code()), ()) {
            Err(InterpError::Exception { kind: thrown, message, .. }) => {
                assert_eq!(thrown, kind);
                assert_eq!(message, None);
            }
            other => panic!("expected {kind}, got {other:?}"),
        }
    }
}

#[test]
fn plain_trap_is_not_mistaken_for_a_report() {
    let wasm = build(|m| {
        Function::<(), ()>::build(m, "trap", |m, _| m.emit_unreachable()).export(m);
    });
    let mut instance = Instance::new(&wasm).expect("instantiation failed");
    assert!(matches!(instance.call::<(), ()>("trap", ()), Err(InterpError::Trap(_))));
}

#[test]
fn missing_export_is_an_error() {
    let wasm = build(|_| {});
    let mut instance = Instance::new(&wasm).expect("instantiation failed");
    assert!(matches!(
        instance.call::<(), ()>("nope", ()),
        Err(InterpError::MissingExport(name)) if name == "nope"
    ));
}

#[test]
fn memory_is_shared_with_the_host() {
    let wasm = build(|m| {
        Function::<(), u32>::build(m, "load", |m, f| {
            let value = PtrExpr::<u32>::new(PrimitiveExpr::new(128u32)).load();
            f.emit_return(m, value);
        })
        .export(m);
    });
    let mut instance = Instance::new(&wasm).expect("instantiation failed");
    instance.write_memory(128, &0xDEAD_BEEFu32.to_le_bytes()).unwrap();
    let value: i32 = instance.call("load", ()).expect("load trapped");
    assert_eq!(value as u32, 0xDEAD_BEEF);
    assert_eq!(instance.read_u32(128).unwrap(), 0xDEAD_BEEF);

    let len = instance.memory_len().unwrap();
    assert!(matches!(
        instance.read_memory(len - 2, 4),
        Err(InterpError::MemoryAccess { len: 4, .. })
    ));
}

#[test]
fn memory_is_found_under_its_configured_name() {
    let config = ModuleConfig {
        memory_export: Some("heap".into()),
        ..ModuleConfig::default()
    };
    let mut m = Module::with_config(config).expect("module already active");
    Function::<(), u32>::build(&mut m, "load", |m, f| {
        let value = PtrExpr::<u32>::new(PrimitiveExpr::new(64u32)).load();
        f.emit_return(m, value);
    })
    .export(&mut m);
    let wasm = m.binary().expect("serialization failed");
    m.dispose();

    assert_eq!(memory_export(&wasm).unwrap().as_deref(), Some("heap"));
    let mut instance = Instance::new(&wasm).expect("instantiation failed");
    instance.write_memory(64, &7u32.to_le_bytes()).unwrap();
    let value: i32 = instance.call("load", ()).expect("load trapped");
    assert_eq!(value, 7);
    assert_eq!(instance.memory_len().unwrap(), 65_536);
}

#[test]
fn private_memory_is_not_accessible() {
    let config = ModuleConfig {
        memory_export: None,
        ..ModuleConfig::default()
    };
    let mut m = Module::with_config(config).expect("module already active");
    let wasm = m.binary().expect("serialization failed");
    m.dispose();
    assert_eq!(memory_export(&wasm).unwrap(), None);
    let instance = Instance::new(&wasm).expect("instantiation failed");
    assert!(matches!(instance.read_memory(0, 1), Err(InterpError::MissingExport(_))));
}

#[test]
fn error_messages_include_location() {
    let err = InterpError::Insist {
        file: "gen.rs".into(),
        line: 7,
        message: Some("x must be positive".into()),
    };
    assert_eq!(err.to_string(), "insist failed at gen.rs:7: x must be positive");
    let err = InterpError::Exception {
        kind: ExceptionKind::OutOfBounds,
        file: "gen.rs".into(),
        line: 9,
        message: None,
    };
    assert_eq!(err.to_string(), "out of bounds thrown at gen.rs:9");
}
