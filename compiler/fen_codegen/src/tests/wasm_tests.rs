//! End-to-end tests for the bytecode target.

use fen_ir::{Choice, Decider, Expr, Node, Path, Test};
use pretty_assertions::assert_eq;

use crate::{Mode, Target};

use super::{call, count, function, int, let_value, local, TestProgram};

#[test]
fn test_integer_literal_payload_layout() {
    let mut program = TestProgram::new();
    let a = program.global("Main", "a");
    program.define(a, int(42), &[]);
    program.define_main(Expr::VarGlobal(a), &[a]);

    let out = program.generate(Target::Wasm, Mode::Prod).code;
    // [tag=4][42] little-endian at the first data slot (offset 8).
    assert!(out.contains("(data (i32.const 8) \"\\04\\00\\00\\00*\\00\\00\\00\")"));
}

#[test]
fn test_shared_integer_emitted_once_across_globals() {
    let mut program = TestProgram::new();
    let a = program.global("Main", "a");
    let b = program.global("Main", "b");
    program.define(a, int(42), &[]);
    program.define(b, int(42), &[]);
    program.define_main(Expr::VarGlobal(a), &[a, b]);

    let out = program.generate(Target::Wasm, Mode::Prod).code;
    // One data segment for the literal; both initializers reference its
    // address.
    assert_eq!(count(&out, "\\04\\00\\00\\00*\\00\\00\\00"), 1);
    assert_eq!(count(&out, "i32.const 8\n"), 2);
}

#[test]
fn test_identity_closure_is_twelve_bytes() {
    let mut program = TestProgram::new();
    let x = program.name("x");
    program.define_main(function(vec![x], local(x)), &[]);

    let out = program.generate(Target::Wasm, Mode::Prod).code;
    // Construction allocates header + one slot.
    assert!(out.contains("i32.const 12\n    call $fen_alloc"));
    // Destructuring loads offset 8 into x.
    assert!(out.contains("i32.load offset=8\n    local.set $x_x"));
    // Arity word: filled = 0, max = 1.
    assert!(out.contains(&format!("i32.const {}", 1 << 16)));
}

#[test]
fn test_full_call_invokes_exactly_once() {
    let mut program = TestProgram::new();
    let f = program.global("Main", "f");
    let a = program.name("a");
    let b = program.name("b");
    program.define(f, function(vec![a, b], local(a)), &[]);
    program.define_main(call(Expr::VarGlobal(f), vec![int(1), int(2)]), &[f]);

    let out = program.generate(Target::Wasm, Mode::Prod).code;
    // The two-argument call dispatches through the table exactly once; the
    // partial branch yields the copy instead.
    assert_eq!(count(&out, "call_indirect (type $evalfn)"), 1);
    assert!(out.contains("call $fen_shallow_copy"));
    // Fill count is re-read and bumped by 2.
    assert!(out.contains("i32.load16_u offset=4"));
    assert!(out.contains("i32.store16 offset=4"));
}

#[test]
fn test_argument_slots_stored_high_to_low() {
    let mut program = TestProgram::new();
    let f = program.global("Main", "f");
    let a = program.name("a");
    let b = program.name("b");
    program.define(f, function(vec![a, b], local(a)), &[]);
    program.define_main(call(Expr::VarGlobal(f), vec![int(1), int(2)]), &[f]);

    let out = program.generate(Target::Wasm, Mode::Prod).code;
    let high = out.find("i32.store offset=12").expect("second slot store");
    let low = out.find("i32.store offset=8\n").expect("first slot store");
    assert!(high < low, "stores must walk from high offset to low");
}

#[test]
fn test_capture_passes_through_middle_closure() {
    let mut program = TestProgram::new();
    let v = program.name("v");
    let x = program.name("x");
    let y = program.name("y");
    program.define_main(
        function(vec![v], function(vec![x], function(vec![y], local(v)))),
        &[],
    );

    let out = program.generate(Target::Wasm, Mode::Prod).code;
    // v is bound in all three evaluators: parameter in the outermost,
    // capture slot in both nested ones.
    assert_eq!(count(&out, "local.set $x_v"), 3);
    // Three lifted evaluators share the table.
    assert!(out.contains("(table (export \"table\") 3 funcref)"));
}

#[test]
fn test_case_lowers_to_nested_blocks() {
    let mut program = TestProgram::new();
    let s = program.name("s");
    let case = Expr::Case {
        label: program.name("k"),
        root: s,
        decider: Box::new(Decider::Chain {
            test_chain: vec![(Path::Root(s), Test::IsNil)],
            success: Box::new(Decider::Leaf(Choice::Inline(int(0)))),
            failure: Box::new(Decider::Leaf(Choice::Jump(0))),
        }),
        jumps: vec![(0, int(1))],
    };
    program.define_main(let_value(s, int(3), case), &[]);

    let out = program.generate(Target::Wasm, Mode::Prod).code;
    // The nil test reads the tag.
    assert!(out.contains("i32.load offset=0"));
    // Structured dispatch: blocks with branches out.
    assert!(out.contains("block"));
    assert!(count(&out, "br ") >= 2);
}

#[test]
fn test_self_referential_cycle_terminates_generation() {
    let mut program = TestProgram::new();
    let tick = program.global("Main", "tick");
    let tick_name = program.name("tick");
    let mut deps = rustc_hash::FxHashSet::default();
    deps.insert(tick);
    program.graph.nodes.insert(
        tick,
        Node::Cycle {
            names: vec![tick_name],
            values: vec![(tick_name, int(1))],
            functions: vec![],
            deps,
        },
    );
    program.define_main(Expr::VarCycle(tick), &[tick]);

    let out = program.generate(Target::Wasm, Mode::Prod).code;
    assert!(out.contains("(func $cyc_Main__tick (result i32)"));
    assert!(out.contains("(global $cyc_Main__tick_cell (mut i32) (i32.const 0))"));
    assert!(out.contains("call $cyc_Main__tick"));
}

#[test]
fn test_main_runs_initializers_in_order_and_short_circuits() {
    let mut program = TestProgram::new();
    let dep = program.global("Basics", "base");
    program.define(dep, int(1), &[]);
    program.define_main(Expr::VarGlobal(dep), &[dep]);

    let out = program.generate(Target::Wasm, Mode::Prod).code;
    let dep_pos = out.find("call $init_g_Basics__base").unwrap();
    let main_pos = out.find("call $init_g_Main__main").unwrap();
    assert!(dep_pos < main_pos);
    // Failure propagates.
    assert!(out.contains("local.get $status\n      return"));
    assert!(out.contains("(func $main (export \"main\") (result i32)"));
}

#[test]
fn test_string_payload_escapes_specials() {
    let mut program = TestProgram::new();
    let s = program.name("a\"b\\c\n");
    program.define_main(Expr::Str(s), &[]);

    let out = program.generate(Target::Wasm, Mode::Prod).code;
    // [tag=7][len=6] then the escaped bytes.
    assert!(out.contains("\\07\\00\\00\\00\\06\\00\\00\\00a\\\"b\\\\c\\0a"));
}

#[test]
fn test_float_payload_is_little_endian_double() {
    let mut program = TestProgram::new();
    program.define_main(Expr::Float(1.5f64.to_bits()), &[]);

    let out = program.generate(Target::Wasm, Mode::Prod).code;
    // 1.5 = 0x3FF8000000000000, little-endian after the tag word.
    assert!(out.contains("\\05\\00\\00\\00\\00\\00\\00\\00\\00\\00\\f8?"));
}

#[test]
fn test_kernel_value_becomes_import() {
    let mut program = TestProgram::new();
    let kernel = program.global("Fen.Kernel.Utils", "compare");
    program.graph.nodes.insert(
        kernel,
        Node::Kernel {
            chunks: vec![],
            deps: rustc_hash::FxHashSet::default(),
        },
    );
    program.define_main(Expr::VarKernel(kernel), &[kernel]);

    let out = program.generate(Target::Wasm, Mode::Prod).code;
    assert!(out.contains(
        "(import \"kernel\" \"Fen_Kernel_Utils__compare\" (global $fk_Fen_Kernel_Utils__compare i32))"
    ));
    assert!(out.contains(";; kernel table: 0 = Fen.Kernel.Utils.compare"));
}

#[test]
fn test_heap_base_points_past_static_data() {
    let mut program = TestProgram::new();
    program.define_main(int(7), &[]);

    let out = program.generate(Target::Wasm, Mode::Prod).code;
    // One 8-byte literal starting at 8: heap begins at 16.
    assert!(out.contains("(global $heap_base (export \"heap_base\") i32 (i32.const 16))"));
}
