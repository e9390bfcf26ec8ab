//! End-to-end tests: generate modules with the DSL, validate them with
//! wasmparser and execute them in wasmi.

use qwasm_dsl::allocator::Allocator;
use qwasm_dsl::{
    select, wasm_insist, wasm_throw, BumpAllocator, DoWhile, DslError, ExceptionKind, Expr, Function, FunctionProxy,
    Global, If, Loop, Module, ModuleConfig, NullableVar, PrimitiveExpr, PtrExpr, Var, While,
};
use qwasm_interp::{Instance, InterpError};

// ══════════════════════════════════════════════════════════════════════════════
// Helpers
// ══════════════════════════════════════════════════════════════════════════════

fn build_with(config: ModuleConfig, generate: impl FnOnce(&mut Module)) -> Vec<u8> {
    let mut m = Module::with_config(config).expect("module already active");
    generate(&mut m);
    let wasm = m.binary().expect("serialization failed");
    m.dispose();
    wasmparser::validate(&wasm).expect("generated module is invalid");
    wasm
}

fn build(generate: impl FnOnce(&mut Module)) -> Vec<u8> {
    build_with(ModuleConfig::default(), generate)
}

fn run(generate: impl FnOnce(&mut Module)) -> Instance {
    Instance::new(&build(generate)).expect("instantiation failed")
}

fn checked() -> ModuleConfig {
    ModuleConfig {
        debug_checks: true,
        ..ModuleConfig::default()
    }
}

/// 0 = false, 1 = true, 2 = NULL
fn decode(code: PrimitiveExpr<i32>) -> Expr<bool> {
    Expr::with_null(code.clone().eq(1), code.eq(2))
}

fn encode(value: Expr<bool>) -> PrimitiveExpr<i32> {
    let (value, is_null) = value.split();
    let known = select(value, PrimitiveExpr::new(1), PrimitiveExpr::new(0));
    select(is_null, PrimitiveExpr::new(2), known)
}

// ══════════════════════════════════════════════════════════════════════════════
// Functions and expressions
// ══════════════════════════════════════════════════════════════════════════════

#[test]
fn add_two_parameters() {
    let mut instance = run(|m| {
        Function::<(i32, i32), i32>::build(m, "add", |m, f| {
            let (a, b) = f.parameters();
            f.emit_return(m, a.val() + b.val());
        })
        .export(m);
    });
    let sum: i32 = instance.call("add", (2, 3)).expect("add trapped");
    assert_eq!(sum, 5);
}

#[test]
fn recursive_factorial_through_proxy() {
    let mut instance = run(|m| {
        let fact = FunctionProxy::<(u64,), u64>::new("fact");
        fact.define(m, |m, f| {
            let (n,) = f.parameters();
            If::new(m, n.val().le(1u64))
                .then(|m| f.emit_return(m, 1u64))
                .emit(m);
            let rest = f.proxy().call(m, (n.val() - 1u64,));
            f.emit_return(m, n.val() * rest);
        });
        fact.export(m);
    });
    let result: i64 = instance.call("fact", 10i64).expect("fact trapped");
    assert_eq!(result, 3_628_800);
}

#[test]
fn void_function_call_is_a_statement() {
    let mut instance = run(|m| {
        let counter = Global::<i32>::named(m, "counter", 0);
        let bump = Function::<(), ()>::build(m, "bump", |m, _| {
            counter.update(m, |c| c + 1);
        });
        Function::<(), i32>::build(m, "bump_twice", |m, f| {
            bump.call(m, ());
            bump.call(m, ());
            f.emit_return(m, counter.val());
        })
        .export(m);
    });
    let value: i32 = instance.call("bump_twice", ()).expect("bump_twice trapped");
    assert_eq!(value, 2);
}

#[test]
fn integer_conversions_round_trip() {
    let mut instance = run(|m| {
        Function::<(i32,), i32>::build(m, "via_i8", |m, f| {
            let (x,) = f.parameters();
            f.emit_return(m, x.val().to::<i8>().to::<i32>());
        })
        .export(m);
        Function::<(i32,), u32>::build(m, "via_u8", |m, f| {
            let (x,) = f.parameters();
            f.emit_return(m, x.val().make_unsigned().to::<u8>().to::<u32>());
        })
        .export(m);
        Function::<(f64,), i64>::build(m, "truncate", |m, f| {
            let (x,) = f.parameters();
            f.emit_return(m, x.val().to::<i64>());
        })
        .export(m);
    });
    for value in [-128, -1, 0, 1, 127] {
        let back: i32 = instance.call("via_i8", value).expect("via_i8 trapped");
        assert_eq!(back, value);
    }
    let wrapped: i32 = instance.call("via_i8", 300).expect("via_i8 trapped");
    assert_eq!(wrapped, 44);
    let unsigned: i32 = instance.call("via_u8", -1).expect("via_u8 trapped");
    assert_eq!(unsigned, 255);
    let truncated: i64 = instance.call("truncate", 3.7f64).expect("truncate trapped");
    assert_eq!(truncated, 3);
}

#[test]
fn sub_word_arithmetic_wraps() {
    let mut instance = run(|m| {
        Function::<(i32,), i32>::build(m, "inc_i8", |m, f| {
            let (x,) = f.parameters();
            let narrow = Var::<i8>::with(m, x.val().to::<i8>());
            narrow.update(m, |v| v + 1i8);
            f.emit_return(m, narrow.val().to::<i32>());
        })
        .export(m);
    });
    let wrapped: i32 = instance.call("inc_i8", 127).expect("inc_i8 trapped");
    assert_eq!(wrapped, -128);
}

#[test]
fn sub_word_bit_counts_use_the_type_width() {
    let mut instance = run(|m| {
        Function::<(u8,), u8>::build(m, "clz8", |m, f| {
            let (x,) = f.parameters();
            f.emit_return(m, x.val().clz());
        })
        .export(m);
        Function::<(u8,), u8>::build(m, "ctz8", |m, f| {
            let (x,) = f.parameters();
            f.emit_return(m, x.val().ctz());
        })
        .export(m);
        Function::<(u16,), u16>::build(m, "clz16", |m, f| {
            let (x,) = f.parameters();
            f.emit_return(m, x.val().clz());
        })
        .export(m);
        Function::<(u16,), u16>::build(m, "ctz16", |m, f| {
            let (x,) = f.parameters();
            f.emit_return(m, x.val().ctz());
        })
        .export(m);
    });
    let cases: [(&str, i32, i32); 10] = [
        ("clz8", 0, 8),
        ("clz8", 1, 7),
        ("clz8", 0xFF, 0),
        ("clz16", 0, 16),
        ("clz16", 1, 15),
        ("clz16", 0xFFFF, 0),
        ("ctz8", 0, 8),
        ("ctz8", 0x80, 7),
        ("ctz16", 0, 16),
        ("ctz16", 0x8000, 15),
    ];
    for (name, input, expected) in cases {
        let count: i32 = instance.call(name, input).expect("bit count trapped");
        assert_eq!(count, expected, "{name}({input:#x})");
    }
}

// ══════════════════════════════════════════════════════════════════════════════
// Three-valued logic
// ══════════════════════════════════════════════════════════════════════════════

#[test]
fn null_plus_five_is_null() {
    let mut instance = run(|m| {
        Function::<(), bool>::build(m, "null_plus_five", |m, f| {
            let x = NullableVar::<i32>::new(m);
            let is_null = (x.val() + 5).is_null(m);
            f.emit_return(m, is_null);
        })
        .export(m);
        Function::<(), i32>::build(m, "seven_plus_five", |m, f| {
            let x = NullableVar::<i32>::with(m, 7);
            let sum = (x.val() + 5).insist_not_null(m);
            f.emit_return(m, sum);
        })
        .export(m);
    });
    let is_null: i32 = instance.call("null_plus_five", ()).expect("null_plus_five trapped");
    assert_eq!(is_null, 1);
    let sum: i32 = instance.call("seven_plus_five", ()).expect("seven_plus_five trapped");
    assert_eq!(sum, 12);
}

#[test]
fn sum_of_two_nullable_operands_is_null_if_either_is() {
    let mut instance = run(|m| {
        Function::<(i32, bool, i32, bool), i32>::build(m, "sum", |m, f| {
            let (x, x_null, y, y_null) = f.parameters();
            let lhs = Expr::with_null(x.val(), x_null.val());
            let rhs = Expr::with_null(y.val(), y_null.val());
            let (value, is_null) = (lhs + rhs).split();
            f.emit_return(m, select(is_null, PrimitiveExpr::new(-1), value));
        })
        .export(m);
    });
    for (x_null, y_null, expected) in [(0, 0, 7), (0, 1, -1), (1, 0, -1), (1, 1, -1)] {
        let sum: i32 = instance.call("sum", (3, x_null, 4, y_null)).expect("sum trapped");
        assert_eq!(sum, expected, "x_null = {x_null}, y_null = {y_null}");
    }
}

#[test]
fn kleene_truth_tables() {
    let mut instance = run(|m| {
        Function::<(i32, i32), i32>::build(m, "and", |m, f| {
            let (a, b) = f.parameters();
            f.emit_return(m, encode(decode(a.val()).and(decode(b.val()))));
        })
        .export(m);
        Function::<(i32, i32), i32>::build(m, "or", |m, f| {
            let (a, b) = f.parameters();
            f.emit_return(m, encode(decode(a.val()).or(decode(b.val()))));
        })
        .export(m);
        Function::<(i32,), i32>::build(m, "not", |m, f| {
            let (a,) = f.parameters();
            f.emit_return(m, encode(!decode(a.val())));
        })
        .export(m);
    });

    const F: i32 = 0;
    const T: i32 = 1;
    const N: i32 = 2;
    let and = [
        (T, T, T), (T, F, F), (T, N, N),
        (F, T, F), (F, F, F), (F, N, F),
        (N, T, N), (N, F, F), (N, N, N),
    ];
    let or = [
        (T, T, T), (T, F, T), (T, N, T),
        (F, T, T), (F, F, F), (F, N, N),
        (N, T, T), (N, F, N), (N, N, N),
    ];
    for (a, b, expected) in and {
        let result: i32 = instance.call("and", (a, b)).expect("and trapped");
        assert_eq!(result, expected, "{a} AND {b}");
    }
    for (a, b, expected) in or {
        let result: i32 = instance.call("or", (a, b)).expect("or trapped");
        assert_eq!(result, expected, "{a} OR {b}");
    }
    for (a, expected) in [(T, F), (F, T), (N, N)] {
        let result: i32 = instance.call("not", a).expect("not trapped");
        assert_eq!(result, expected, "NOT {a}");
    }
}

#[test]
fn null_propagates_through_comparisons() {
    let mut instance = run(|m| {
        Function::<(i32, i32), i32>::build(m, "less", |m, f| {
            let (a, null) = f.parameters();
            let lhs = Expr::with_null(a.val(), null.val().ne(0));
            f.emit_return(m, encode(lhs.lt(10)));
        })
        .export(m);
    });
    let lt: i32 = instance.call("less", (3, 0)).expect("less trapped");
    assert_eq!(lt, 1);
    let ge: i32 = instance.call("less", (30, 0)).expect("less trapped");
    assert_eq!(ge, 0);
    let null: i32 = instance.call("less", (3, 1)).expect("less trapped");
    assert_eq!(null, 2);
}

#[test]
fn hash_of_null_is_reserved() {
    let mut instance = run(|m| {
        Function::<(), u64>::build(m, "hash_null", |m, f| {
            let x = NullableVar::<i32>::new(m);
            f.emit_return(m, x.val().hash());
        })
        .export(m);
    });
    let hash: i64 = instance.call("hash_null", ()).expect("hash_null trapped");
    assert_eq!(hash as u64, qwasm_dsl::expr::NULL_HASH);
}

#[test]
fn select_over_nullable_chooses_null_flag() {
    let mut instance = run(|m| {
        Function::<(i32,), i32>::build(m, "pick", |m, f| {
            let (c,) = f.parameters();
            let chosen = select(c.val().ne(0), Expr::<bool>::null(), Expr::new(PrimitiveExpr::new(true)));
            f.emit_return(m, encode(chosen));
        })
        .export(m);
    });
    let null: i32 = instance.call("pick", 1).expect("pick trapped");
    assert_eq!(null, 2);
    let value: i32 = instance.call("pick", 0).expect("pick trapped");
    assert_eq!(value, 1);
}

// ══════════════════════════════════════════════════════════════════════════════
// Control flow
// ══════════════════════════════════════════════════════════════════════════════

#[test]
fn loop_without_continue_runs_once() {
    let mut instance = run(|m| {
        Function::<(), i32>::build(m, "loop_once", |m, f| {
            let n = Var::<i32>::new(m);
            Loop::new(m, "loop").body(m, |m| n.update(m, |v| v + 1));
            f.emit_return(m, n.val());
        })
        .export(m);
    });
    let count: i32 = instance.call("loop_once", ()).expect("loop_once trapped");
    assert_eq!(count, 1);
}

#[test]
fn do_while_tests_at_the_bottom() {
    let mut instance = run(|m| {
        Function::<(), i32>::build(m, "do_once", |m, f| {
            let n = Var::<i32>::new(m);
            DoWhile::new(m, "do", n.val().lt(1)).body(m, |m| n.update(m, |v| v + 1));
            f.emit_return(m, n.val());
        })
        .export(m);
        Function::<(), i32>::build(m, "do_ten", |m, f| {
            let n = Var::<i32>::new(m);
            DoWhile::new(m, "do", n.val().lt(10)).body(m, |m| n.update(m, |v| v + 1));
            f.emit_return(m, n.val());
        })
        .export(m);
    });
    let once: i32 = instance.call("do_once", ()).expect("do_once trapped");
    assert_eq!(once, 1);
    let ten: i32 = instance.call("do_ten", ()).expect("do_ten trapped");
    assert_eq!(ten, 10);
}

#[test]
fn while_may_run_zero_times() {
    let mut instance = run(|m| {
        Function::<(i32,), i32>::build(m, "count_down", |m, f| {
            let (start,) = f.parameters();
            let n = Var::<i32>::with(m, start.val());
            let steps = Var::<i32>::new(m);
            While::new(m, "while", n.val().gt(0)).body(m, |m| {
                n.update(m, |v| v - 1);
                steps.update(m, |s| s + 1);
            });
            f.emit_return(m, steps.val());
        })
        .export(m);
    });
    let none: i32 = instance.call("count_down", 0).expect("count_down trapped");
    assert_eq!(none, 0);
    let five: i32 = instance.call("count_down", 5).expect("count_down trapped");
    assert_eq!(five, 5);
}

#[test]
fn nested_break_and_continue_reach_outer_loop() {
    let mut instance = run(|m| {
        Function::<(), i32>::build(m, "nested", |m, f| {
            let i = Var::<i32>::new(m);
            let total = Var::<i32>::new(m);
            While::new(m, "outer", i.val().lt(5)).body(m, |m| {
                i.update(m, |v| v + 1);
                Loop::new(m, "inner").body(m, |m| {
                    m.emit_continue_if(i.val().eq(2), 2);
                    m.emit_break_if(i.val().eq(4), 2);
                    total.update(m, |t| t + i.val());
                });
            });
            f.emit_return(m, total.val() * 10 + i.val());
        })
        .export(m);
    });
    // i = 1 adds 1, i = 2 continues, i = 3 adds 3, i = 4 leaves both loops
    let result: i32 = instance.call("nested", ()).expect("nested trapped");
    assert_eq!(result, 44);
}

#[test]
fn if_else_selects_branch() {
    let mut instance = run(|m| {
        Function::<(i32,), i32>::build(m, "sign", |m, f| {
            let (x,) = f.parameters();
            let sign = Var::<i32>::new(m);
            If::new(m, x.val().lt(0))
                .then(|m| sign.set(m, -1))
                .otherwise(|m| {
                    If::new(m, x.val().gt(0)).then(|m| sign.set(m, 1)).emit(m);
                })
                .emit(m);
            f.emit_return(m, sign.val());
        })
        .export(m);
    });
    for (x, expected) in [(-7, -1), (0, 0), (9, 1)] {
        let sign: i32 = instance.call("sign", x).expect("sign trapped");
        assert_eq!(sign, expected);
    }
}

#[test]
fn detached_blocks_attach_later() {
    let mut instance = run(|m| {
        Function::<(), i32>::build(m, "blocks", |m, f| {
            let x = Var::<i32>::new(m);
            let first = m.new_block("first");
            let second = m.new_block("second");
            let second = m.with_block(second, |m| x.update(m, |v| v * 10));
            let first = m.with_block(first, |m| x.set(m, 4));
            m.attach(first);
            m.attach(second);
            f.emit_return(m, x.val());
        })
        .export(m);
    });
    let value: i32 = instance.call("blocks", ()).expect("blocks trapped");
    assert_eq!(value, 40);
}

// ══════════════════════════════════════════════════════════════════════════════
// Local bits
// ══════════════════════════════════════════════════════════════════════════════

#[test]
fn sixty_five_booleans_use_two_bitmaps() {
    let mut instance = run(|m| {
        Function::<(), i32>::build(m, "bits", |m, f| {
            let flags: Vec<Var<bool>> = (0..65).map(|i| Var::with(m, i % 2 == 0)).collect();
            let stats = m.bitmap_stats().expect("no active function");
            assert_eq!(stats.bitmaps, 2);
            assert_eq!(stats.allocated_bits, 65);

            let count = Var::<i32>::new(m);
            for flag in &flags {
                count.update(m, |c| c + select(flag.val(), PrimitiveExpr::new(1), PrimitiveExpr::new(0)));
            }
            f.emit_return(m, count.val());
        })
        .export(m);
    });
    let count: i32 = instance.call("bits", ()).expect("bits trapped");
    assert_eq!(count, 33);
}

#[test]
fn freed_bit_makes_exhausted_bitmap_discoverable() {
    build(|m| {
        Function::<(), ()>::build(m, "reuse", |m, _| {
            let mut flags: Vec<Var<bool>> = (0..64).map(|_| Var::new(m)).collect();
            assert_eq!(m.bitmap_stats().map(|s| s.discoverable), Some(0));

            drop(flags.swap_remove(17));
            assert_eq!(m.bitmap_stats().map(|s| s.discoverable), Some(1));

            flags.push(Var::new(m));
            let stats = m.bitmap_stats().expect("no active function");
            assert_eq!((stats.bitmaps, stats.allocated_bits), (1, 64));

            flags.push(Var::new(m));
            assert_eq!(m.bitmap_stats().map(|s| s.bitmaps), Some(2));
        });
    });
}

#[test]
fn boolean_assignment_copies_bits() {
    let mut instance = run(|m| {
        Function::<(i32,), bool>::build(m, "copy", |m, f| {
            let (x,) = f.parameters();
            let a = Var::<bool>::with(m, x.val().ne(0));
            let b = Var::<bool>::with(m, true);
            b.assign(m, &a);
            f.emit_return(m, b.val());
        })
        .export(m);
    });
    let unset: i32 = instance.call("copy", 0).expect("copy trapped");
    assert_eq!(unset, 0);
    let set: i32 = instance.call("copy", 5).expect("copy trapped");
    assert_eq!(set, 1);
}

// ══════════════════════════════════════════════════════════════════════════════
// Memory
// ══════════════════════════════════════════════════════════════════════════════

#[test]
fn pointer_difference_counts_elements() {
    let mut instance = run(|m| {
        Function::<(), i32>::build(m, "diff", |m, f| {
            let p = PtrExpr::<i32>::new(PrimitiveExpr::new(64u32));
            let q = p.clone() + 3;
            f.emit_return(m, q - p);
        })
        .export(m);
        Function::<(i32,), i32>::build(m, "dynamic_diff", |m, f| {
            let (n,) = f.parameters();
            let p = PtrExpr::<u64>::new(PrimitiveExpr::new(64u32));
            let q = p.clone() + n.val();
            f.emit_return(m, q - p);
        })
        .export(m);
    });
    let diff: i32 = instance.call("diff", ()).expect("diff trapped");
    assert_eq!(diff, 3);
    let dynamic: i32 = instance.call("dynamic_diff", 5).expect("dynamic_diff trapped");
    assert_eq!(dynamic, 5);
}

#[test]
fn bump_allocator_stores_and_reclaims() {
    let mut instance = run(|m| {
        let mut alloc = BumpAllocator::new(m);
        let table = alloc.pre_malloc::<u32>(4).expect("pre_malloc failed");
        alloc.perform_pre_allocations(m).expect("pre-allocation failed");

        Function::<(), ()>::build(m, "fill_table", |m, _| {
            (table.clone() + 2).store(m, 7u32);
            table.discard(m);
        })
        .export(m);
        Function::<(u32,), u32>::build(m, "round_trip", |m, f| {
            let (x,) = f.parameters();
            let p = alloc.malloc::<u32>(m, 2u32);
            p.val().store(m, x.val());
            (p.val() + 1).store(m, x.val() * 2u32);
            let sum = p.val().load() + (p.val() + 1).load();
            let result = Var::<u32>::with(m, sum);
            alloc.free(m, p.val(), 2u32);
            f.emit_return(m, result.val());
        })
        .export(m);
        let heap = alloc.heap().clone();
        Function::<(), u32>::build(m, "heap", |m, f| f.emit_return(m, heap.val())).export(m);
    });

    let _: () = instance.call("fill_table", ()).expect("fill_table trapped");
    assert_eq!(instance.read_u32(BumpAllocator::BASE as usize + 8).unwrap(), 7);

    let before: i32 = instance.call("heap", ()).expect("heap trapped");
    let sum: i32 = instance.call("round_trip", 21).expect("round_trip trapped");
    assert_eq!(sum, 63);
    let after: i32 = instance.call("heap", ()).expect("heap trapped");
    assert_eq!(before, after);
    assert_eq!(before, 24);
}

#[test]
fn allocation_grows_memory() {
    let mut instance = run(|m| {
        let mut alloc = BumpAllocator::new(m);
        alloc.perform_pre_allocations(m).expect("pre-allocation failed");
        Function::<(), u32>::build(m, "big", |m, f| {
            let p = alloc.allocate(m, PrimitiveExpr::new(100_000u32), 8);
            f.emit_return(m, p.val().to_u32());
        })
        .export(m);
    });
    assert_eq!(instance.memory_len().unwrap(), 65_536);
    let addr: i32 = instance.call("big", ()).expect("big trapped");
    assert_eq!(addr, 8);
    assert_eq!(instance.memory_len().unwrap(), 131_072);
}

#[test]
fn pre_allocations_beyond_the_first_page_are_accessible() {
    let mut instance = run(|m| {
        let mut alloc = BumpAllocator::new(m);
        let table = alloc.pre_malloc::<u64>(10_000).expect("pre_malloc failed");
        alloc.perform_pre_allocations(m).expect("pre-allocation failed");
        Function::<(), u64>::build(m, "last", |m, f| {
            (table.clone() + 9_999).store(m, 42u64);
            let value = (table + 9_999).load();
            f.emit_return(m, value);
        })
        .export(m);
    });
    assert_eq!(instance.memory_len().unwrap(), 131_072);
    let value: i64 = instance.call("last", ()).expect("last trapped");
    assert_eq!(value, 42);
    let last = BumpAllocator::BASE as usize + 9_999 * 8;
    assert_eq!(instance.read_memory(last, 8).unwrap(), 42u64.to_le_bytes());
}

#[test]
fn references_update_in_place() {
    let mut instance = run(|m| {
        Function::<(i32,), i32>::build(m, "triple", |m, f| {
            let (x,) = f.parameters();
            let p = PtrExpr::<i32>::new(PrimitiveExpr::new(32u32));
            p.clone().store(m, x.val());
            p.clone().deref(m).update(m, |v| v * 3);
            let result = p.deref_const(m).load();
            f.emit_return(m, result);
        })
        .export(m);
    });
    let tripled: i32 = instance.call("triple", 14).expect("triple trapped");
    assert_eq!(tripled, 42);
}

// ══════════════════════════════════════════════════════════════════════════════
// Globals, imports and runtime errors
// ══════════════════════════════════════════════════════════════════════════════

#[test]
fn globals_keep_state_between_calls() {
    let mut instance = run(|m| {
        let counter = Global::<i32>::named(m, "counter", 10);
        counter.init(m, 100);
        assert!(m.get_global::<i32>("counter").is_some());
        assert!(m.get_global::<i32>("missing").is_none());
        Function::<(), i32>::build(m, "next", |m, f| {
            counter.update(m, |c| c + 1);
            f.emit_return(m, counter.val());
        })
        .export(m);
    });
    let first: i32 = instance.call("next", ()).expect("next trapped");
    let second: i32 = instance.call("next", ()).expect("next trapped");
    assert_eq!((first, second), (101, 102));
}

#[test]
fn imported_global_and_function() {
    let wasm = build(|m| {
        let offset = Global::<i64>::import(m, "offset");
        let square = m.emit_function_import::<(i64,), i64>("square");
        Function::<(i64,), i64>::build(m, "apply", |m, f| {
            let (x,) = f.parameters();
            let squared = square.call(m, (x.val(),));
            f.emit_return(m, squared + offset.val());
        })
        .export(m);
    });
    let mut instance = Instance::with_imports(&wasm, |store, linker| {
        let offset = wasmi::Global::new(&mut *store, wasmi::Val::I64(1), wasmi::Mutability::Var);
        linker
            .define("imports", "offset", offset)
            .map_err(|e| InterpError::Link(e.to_string()))?;
        linker
            .func_wrap("imports", "square", |x: i64| x * x)
            .map_err(|e| InterpError::Link(e.to_string()))?;
        Ok(())
    })
    .expect("instantiation failed");
    let result: i64 = instance.call("apply", 7i64).expect("apply trapped");
    assert_eq!(result, 50);
}

#[test]
fn imported_global_takes_its_own_name() {
    let wasm = build(|m| {
        let base = Global::<i32>::import_as(m, "heap_base", "base");
        assert_eq!(base.name(), "base");
        assert!(m.get_global::<i32>("base").is_some());
        assert!(m.get_global::<i32>("heap_base").is_none());
        Function::<(), i32>::build(m, "base", |m, f| f.emit_return(m, base.val())).export(m);
    });
    let mut instance = Instance::with_imports(&wasm, |store, linker| {
        let base = wasmi::Global::new(&mut *store, wasmi::Val::I32(4096), wasmi::Mutability::Var);
        linker
            .define("imports", "heap_base", base)
            .map_err(|e| InterpError::Link(e.to_string()))?;
        Ok(())
    })
    .expect("instantiation failed");
    let base: i32 = instance.call("base", ()).expect("base trapped");
    assert_eq!(base, 4096);
}

#[test]
fn failed_insist_reports_location_and_message() {
    let expected_line = line!() + 4;
    let wasm = build_with(checked(), |m| {
        Function::<(i32,), i32>::build(m, "positive", |m, f| {
            let (x,) = f.parameters();
            wasm_insist!(m, x.val().gt(0), "x must be positive");
            f.emit_return(m, x.val());
        })
        .export(m);
    });
    let mut instance = Instance::new(&wasm).expect("instantiation failed");
    let ok: i32 = instance.call("positive", 3).expect("positive trapped");
    assert_eq!(ok, 3);
    match instance.call::<i32, i32>("positive", -1) {
        Err(InterpError::Insist { file, line, message }) => {
            assert!(file.ends_with("dsl_tests.rs"), "unexpected file {file}");
            assert_eq!(line, expected_line);
            assert_eq!(message.as_deref(), Some("x must be positive"));
        }
        other => panic!("expected an insist failure, got {other:?}"),
    }
}

#[test]
fn insist_is_skipped_without_debug_checks() {
    let config = ModuleConfig {
        debug_checks: false,
        ..ModuleConfig::default()
    };
    let wasm = build_with(config, |m| {
        Function::<(i32,), i32>::build(m, "unchecked", |m, f| {
            let (x,) = f.parameters();
            wasm_insist!(m, x.val().gt(0));
            f.emit_return(m, x.val());
        })
        .export(m);
    });
    let mut instance = Instance::new(&wasm).expect("instantiation failed");
    assert!(instance.messages().is_empty());
    let value: i32 = instance.call("unchecked", -1).expect("unchecked trapped");
    assert_eq!(value, -1);
}

#[test]
fn null_check_reports_insist() {
    let wasm = build_with(checked(), |m| {
        Function::<(), i32>::build(m, "deref_null", |m, f| {
            let x = NullableVar::<i32>::new(m);
            let value = x.val().insist_not_null(m);
            f.emit_return(m, value);
        })
        .export(m);
    });
    let mut instance = Instance::new(&wasm).expect("instantiation failed");
    match instance.call::<(), i32>("deref_null", ()) {
        Err(InterpError::Insist { message, .. }) => {
            assert_eq!(message.as_deref(), Some("value must not be NULL"));
        }
        other => panic!("expected an insist failure, got {other:?}"),
    }
}

#[test]
fn returning_null_reports_insist_at_the_return() {
    let return_line = line!() + 5;
    let wasm = build_with(checked(), |m| {
        Function::<(i32, bool), i32>::build(m, "value_or_null", |m, f| {
            let (x, x_null) = f.parameters();
            let value = Expr::with_null(x.val(), x_null.val());
            f.emit_return_expr(m, value);
        })
        .export(m);
    });
    let mut instance = Instance::new(&wasm).expect("instantiation failed");
    let value: i32 = instance.call("value_or_null", (5, 0)).expect("value_or_null trapped");
    assert_eq!(value, 5);
    match instance.call::<(i32, i32), i32>("value_or_null", (5, 1)) {
        Err(InterpError::Insist { file, line, message }) => {
            assert!(file.ends_with("dsl_tests.rs"), "unexpected file {file}");
            assert_eq!(line, return_line);
            assert_eq!(message.as_deref(), Some("value must not be NULL"));
        }
        other => panic!("expected an insist failure, got {other:?}"),
    }
}

#[test]
fn thrown_exception_carries_kind() {
    let mut instance = run(|m| {
        Function::<(i32,), i32>::build(m, "index", |m, f| {
            let (i,) = f.parameters();
            If::new(m, i.val().lt(0))
                .then(|m| wasm_throw!(m, ExceptionKind::OutOfBounds, "negative index"))
                .emit(m);
            f.emit_return(m, i.val());
        })
        .export(m);
    });
    let fine: i32 = instance.call("index", 2).expect("index trapped");
    assert_eq!(fine, 2);
    match instance.call::<i32, i32>("index", -5) {
        Err(InterpError::Exception { kind, message, .. }) => {
            assert_eq!(kind, ExceptionKind::OutOfBounds);
            assert_eq!(message.as_deref(), Some("negative index"));
        }
        other => panic!("expected an exception, got {other:?}"),
    }
}

// ══════════════════════════════════════════════════════════════════════════════
// Module lifecycle and output
// ══════════════════════════════════════════════════════════════════════════════

#[test]
fn second_module_on_same_thread_fails() {
    let m = Module::new().expect("first module");
    assert!(matches!(Module::new(), Err(DslError::ModuleAlreadyActive)));
    m.dispose();
    assert!(Module::new().is_ok());
}

#[test]
fn optimized_module_behaves_the_same() {
    let mut m = Module::new().expect("module");
    Function::<(i32,), i32>::build(&mut m, "folded", |m, f| {
        let (x,) = f.parameters();
        let k = PrimitiveExpr::new(6i32) * 7;
        f.emit_return(m, x.val() + k);
    })
    .export(&mut m);
    m.optimize(2);
    assert!(m.validate());
    let wasm = m.binary().expect("serialization failed");
    m.dispose();

    let mut instance = Instance::new(&wasm).expect("instantiation failed");
    let result: i32 = instance.call("folded", 0).expect("folded trapped");
    assert_eq!(result, 42);
}

#[test]
fn unique_names_do_not_collide_across_functions() {
    let mut instance = run(|m| {
        for name in ["first", "second"] {
            Function::<(), i32>::build(m, name, |m, f| {
                let n = Var::<i32>::new(m);
                Loop::new(m, "loop").body(m, |m| n.set(m, 3));
                f.emit_return(m, n.val());
            })
            .export(m);
        }
    });
    let first: i32 = instance.call("first", ()).expect("first trapped");
    let second: i32 = instance.call("second", ()).expect("second trapped");
    assert_eq!(first + second, 6);
}
