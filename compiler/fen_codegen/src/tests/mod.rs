//! End-to-end codegen tests.
//!
//! Build a small global graph by hand, run a full `generate`, and assert on
//! the serialized output of each target.

mod wasm_tests;

use fen_ir::{
    Def, Expr, Global, GlobalGraph, ModuleName, Name, Node, StringInterner,
};

use crate::{generate, GeneratedCode, Mode, ScriptBuffer, Target};

/// A graph under construction plus the interner it resolves against.
pub(crate) struct TestProgram {
    pub interner: StringInterner,
    pub graph: GlobalGraph,
    pub root: ModuleName,
}

impl TestProgram {
    pub fn new() -> Self {
        let interner = StringInterner::new();
        let root = ModuleName(interner.intern("Main"));
        TestProgram {
            interner,
            graph: GlobalGraph::new(),
            root,
        }
    }

    pub fn name(&self, s: &str) -> Name {
        self.interner.intern(s)
    }

    pub fn global(&self, module: &str, name: &str) -> Global {
        Global::new(ModuleName(self.interner.intern(module)), self.interner.intern(name))
    }

    /// Insert a plain definition with explicit dependencies.
    pub fn define(&mut self, global: Global, expr: Expr, deps: &[Global]) {
        self.graph.nodes.insert(
            global,
            Node::Define {
                expr: Box::new(expr),
                deps: deps.iter().copied().collect(),
            },
        );
    }

    pub fn define_main(&mut self, expr: Expr, deps: &[Global]) {
        let main = self.global("Main", "main");
        self.define(main, expr, deps);
    }

    pub fn generate(&self, target: Target, mode: Mode) -> GeneratedCode {
        let mut script = ScriptBuffer::new();
        generate(&self.interner, &self.graph, &[self.root], target, mode, &mut script)
            .expect("generation failed")
    }

    pub fn generate_with_script(&self, target: Target, mode: Mode) -> (GeneratedCode, ScriptBuffer) {
        let mut script = ScriptBuffer::new();
        let code = generate(&self.interner, &self.graph, &[self.root], target, mode, &mut script)
            .expect("generation failed");
        (code, script)
    }
}

/// Shorthand expression builders.
pub(crate) fn int(i: i64) -> Expr {
    Expr::Int(i)
}

pub(crate) fn local(name: Name) -> Expr {
    Expr::VarLocal(name)
}

pub(crate) fn function(params: Vec<Name>, body: Expr) -> Expr {
    Expr::Function {
        params,
        body: Box::new(body),
    }
}

pub(crate) fn call(func: Expr, args: Vec<Expr>) -> Expr {
    Expr::Call {
        func: Box::new(func),
        args,
    }
}

pub(crate) fn let_value(name: Name, value: Expr, body: Expr) -> Expr {
    Expr::Let {
        def: Box::new(Def::Value {
            name,
            expr: Box::new(value),
        }),
        body: Box::new(body),
    }
}

/// Count non-overlapping occurrences of `needle`.
pub(crate) fn count(haystack: &str, needle: &str) -> usize {
    haystack.matches(needle).count()
}

#[test]
fn test_missing_main_aborts() {
    let program = TestProgram::new();
    let mut script = ScriptBuffer::new();
    let err = generate(
        &program.interner,
        &program.graph,
        &[program.root],
        Target::C,
        Mode::Prod,
        &mut script,
    )
    .unwrap_err();
    assert_eq!(err, crate::CodegenError::MissingMain("Main".to_string()));
}

#[test]
fn test_missing_dependency_aborts_whole_generation() {
    let mut program = TestProgram::new();
    let ghost = program.global("Gone", "ghost");
    program.define_main(Expr::VarGlobal(ghost), &[ghost]);

    let mut script = ScriptBuffer::new();
    let err = generate(
        &program.interner,
        &program.graph,
        &[program.root],
        Target::C,
        Mode::Prod,
        &mut script,
    )
    .unwrap_err();
    assert_eq!(err, crate::CodegenError::MissingGlobal("Gone.ghost".to_string()));
}
