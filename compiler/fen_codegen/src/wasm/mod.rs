//! Bytecode target.
//!
//! Lowers the global graph to a linear-memory stack-machine module: one
//! evaluator function per lifted closure body, a function table for
//! indirect closure dispatch, a data segment holding every shared literal as
//! `[tag:4B][payload...]` (little-endian numerics), mutable cell globals for
//! top-level values, and an exported `main` that runs every initializer in
//! dependency order.

mod expr;
mod instr;
mod module;

pub use instr::Instr;
pub use module::{escape_bytes, DataSegment, WasmFunc, WasmModule};

use fen_ir::{Def, Expr, Global, GlobalGraph, KernelChunk, Name, StringInterner};
use rustc_hash::{FxHashMap, FxHashSet};
use tracing::debug;

use crate::graph::{NodeBackend, Walker};
use crate::repr::{arity_word, ValueTag};
use crate::scope::Scope;
use crate::script::{PortDirection, ScriptBackend};
use crate::shared::{SharedDef, SharedDefs};
use crate::{names, CodegenError, GeneratedCode, Mode};

/// Generate the bytecode module for `mains` and everything reachable.
pub fn generate(
    interner: &StringInterner,
    graph: &GlobalGraph,
    mains: &[Global],
    mode: Mode,
    script: &mut dyn ScriptBackend,
) -> Result<GeneratedCode, CodegenError> {
    let mut backend = WasmBackend::new(interner, mode, script);
    backend.shared.seed_fields(interner, &graph.field_frequencies);

    let mut walker = Walker::new(graph, interner);
    for &main in mains {
        walker.add_global(&mut backend, main)?;
    }
    let order = walker.into_order();
    debug!(globals = order.len(), "assembling bytecode output");

    backend.emit_main(&order);
    let comments = backend.table_comments();
    Ok(GeneratedCode {
        code: backend.module.to_wat(&comments),
    })
}

/// Per-function lowering state: scope bookkeeping, declared locals, and the
/// label distance back to the enclosing tail-loop head (when inside one).
pub(crate) struct FnCtx {
    pub(crate) scope: Scope,
    locals: Vec<String>,
    local_set: FxHashSet<String>,
    pub(crate) tail_depth: Option<u32>,
}

impl FnCtx {
    fn for_function(interner: &StringInterner, params: &[Name]) -> Self {
        let mut ctx = FnCtx {
            scope: Scope::for_function(params),
            locals: Vec::new(),
            local_set: FxHashSet::default(),
            tail_depth: None,
        };
        for &param in params {
            ctx.declare_local(names::local_name(interner, param));
        }
        ctx
    }

    fn top_level() -> Self {
        FnCtx {
            scope: Scope::top_level(),
            locals: Vec::new(),
            local_set: FxHashSet::default(),
            tail_depth: None,
        }
    }

    pub(crate) fn declare_local(&mut self, name: String) -> String {
        if self.local_set.insert(name.clone()) {
            self.locals.push(name.clone());
        }
        name
    }
}

/// The bytecode compilation state, threaded through one whole traversal.
pub(crate) struct WasmBackend<'a> {
    pub(crate) interner: &'a StringInterner,
    pub(crate) mode: Mode,
    script: &'a mut dyn ScriptBackend,
    pub(crate) shared: SharedDefs,
    pub(crate) module: WasmModule,
    /// Data address of each emitted shared definition, by table id.
    lit_addrs: FxHashMap<u32, u32>,
    inits: FxHashSet<Global>,
    ev_counter: u32,
    tmp_counter: u32,
}

impl<'a> WasmBackend<'a> {
    fn new(interner: &'a StringInterner, mode: Mode, script: &'a mut dyn ScriptBackend) -> Self {
        WasmBackend {
            interner,
            mode,
            script,
            shared: SharedDefs::new(),
            module: WasmModule::new(),
            lit_addrs: FxHashMap::default(),
            inits: FxHashSet::default(),
            ev_counter: 0,
            tmp_counter: 0,
        }
    }

    pub(crate) fn next_tmp(&mut self) -> String {
        let n = self.tmp_counter;
        self.tmp_counter += 1;
        names::tmp_name(n)
    }

    pub(crate) fn next_evaluator(&mut self) -> String {
        let n = self.ev_counter;
        self.ev_counter += 1;
        names::evaluator_name(n)
    }

    /// Instructions that put a shared value on the stack: a data address for
    /// emitted literals, an imported-global read for foreign thunks.
    pub(crate) fn shared_value_instrs(&mut self, def: SharedDef) -> Vec<Instr> {
        if let SharedDef::ForeignThunk(global) = &def {
            self.shared.kernel_id(*global);
            self.shared.intern(def.clone());
            let symbol = names::kernel_name(self.interner, global);
            let field = format!(
                "{}__{}",
                self.interner.lookup(global.home.0).replace('.', "_"),
                self.interner.lookup(global.name)
            );
            self.module.import_global("kernel", field, symbol.clone());
            return vec![Instr::GlobalGet(symbol)];
        }
        let addr = self.shared_addr(def);
        vec![Instr::I32Const(addr as i32)]
    }

    /// Data address of a shared definition, emitting its payload (and, for
    /// accessors, its evaluator and table entry) on first sight.
    pub(crate) fn shared_addr(&mut self, def: SharedDef) -> u32 {
        let id = self.shared.intern(def.clone());
        if let Some(&addr) = self.lit_addrs.get(&id) {
            return addr;
        }
        let addr = match &def {
            SharedDef::Int(i) => {
                let mut bytes = ValueTag::Int.value().to_le_bytes().to_vec();
                bytes.extend_from_slice(&(*i as i32).to_le_bytes());
                self.module.add_data(bytes)
            }
            SharedDef::Float(bits) => {
                let mut bytes = ValueTag::Float.value().to_le_bytes().to_vec();
                bytes.extend_from_slice(&bits.to_le_bytes());
                self.module.add_data(bytes)
            }
            SharedDef::Chr(content) => {
                let codepoint = self
                    .interner
                    .lookup(*content)
                    .chars()
                    .next()
                    .map_or(0, u32::from);
                let mut bytes = ValueTag::Char.value().to_le_bytes().to_vec();
                bytes.extend_from_slice(&codepoint.to_le_bytes());
                self.module.add_data(bytes)
            }
            SharedDef::Str(content) => {
                let text = self.interner.lookup(*content);
                let mut bytes = ValueTag::String.value().to_le_bytes().to_vec();
                bytes.extend_from_slice(&(text.len() as u32).to_le_bytes());
                bytes.extend_from_slice(text.as_bytes());
                self.module.add_data(bytes)
            }
            SharedDef::FieldGroup(fields) => {
                let mut bytes = ValueTag::FieldGroup.value().to_le_bytes().to_vec();
                bytes.extend_from_slice(&(fields.len() as u32).to_le_bytes());
                for &field in fields {
                    bytes.extend_from_slice(&self.shared.fields.id(field).to_le_bytes());
                }
                self.module.add_data(bytes)
            }
            SharedDef::Accessor(field) => {
                let field_id = self.shared.fields.id(*field);
                let func = format!("ev_access_{}", self.interner.lookup(*field));
                self.module.add_func(WasmFunc {
                    name: func.clone(),
                    params: vec!["c".to_string()],
                    result: true,
                    locals: vec![],
                    body: vec![
                        Instr::LocalGet("c".to_string()),
                        Instr::I32Load { offset: 8 },
                        Instr::I32Const(field_id as i32),
                        Instr::Call("fen_record_field".to_string()),
                    ],
                    evaluator: true,
                    export: None,
                });
                let table_index = self.module.add_table_entry(func);
                let mut bytes = table_index.to_le_bytes().to_vec();
                bytes.extend_from_slice(&arity_word(0, 1).to_le_bytes());
                bytes.extend_from_slice(&[0; 4]); // empty argument slot
                self.module.add_data(bytes)
            }
            SharedDef::ForeignThunk(_) => unreachable!("foreign thunks are imported, not emitted"),
        };
        self.lit_addrs.insert(id, addr);
        addr
    }

    /// Initializer epilogue: store the value, report zero-cell as failure.
    fn finish_init(&mut self, global: &Global, mut body: Vec<Instr>, ctx: FnCtx) {
        let sym = names::global_name(self.interner, global);
        self.module.add_global(sym.clone());
        body.push(Instr::GlobalSet(sym.clone()));
        body.push(Instr::GlobalGet(sym));
        body.push(Instr::I32Eqz);
        self.module.add_func(WasmFunc {
            name: names::init_name(self.interner, global),
            params: vec![],
            result: true,
            locals: ctx.locals,
            body,
            evaluator: false,
            export: None,
        });
        self.inits.insert(*global);
    }

    fn emit_ctor_like(&mut self, global: &Global, index: u32, arity: u32) {
        self.shared.ctors.id(global.name);
        let addr = if arity == 0 {
            let mut bytes = ValueTag::Custom.value().to_le_bytes().to_vec();
            bytes.extend_from_slice(&index.to_le_bytes());
            bytes.extend_from_slice(&0u32.to_le_bytes());
            self.module.add_data(bytes)
        } else {
            let sym = names::global_name(self.interner, global);
            let func = format!("ev_ctor_{sym}");
            let mut body = vec![
                Instr::I32Const((12 + 4 * arity) as i32),
                Instr::Call("fen_alloc".to_string()),
                Instr::LocalSet("v".to_string()),
                Instr::LocalGet("v".to_string()),
                Instr::I32Const(ValueTag::Custom.value() as i32),
                Instr::I32Store { offset: 0 },
                Instr::LocalGet("v".to_string()),
                Instr::I32Const(index as i32),
                Instr::I32Store { offset: 4 },
                Instr::LocalGet("v".to_string()),
                Instr::I32Const(arity as i32),
                Instr::I32Store { offset: 8 },
            ];
            for i in 0..arity {
                body.push(Instr::LocalGet("v".to_string()));
                body.push(Instr::LocalGet("c".to_string()));
                body.push(Instr::I32Load { offset: 8 + 4 * i });
                body.push(Instr::I32Store { offset: 12 + 4 * i });
            }
            body.push(Instr::LocalGet("v".to_string()));
            self.module.add_func(WasmFunc {
                name: func.clone(),
                params: vec!["c".to_string()],
                result: true,
                locals: vec!["v".to_string()],
                body,
                evaluator: true,
                export: None,
            });
            let table_index = self.module.add_table_entry(func);
            let mut bytes = table_index.to_le_bytes().to_vec();
            bytes.extend_from_slice(&arity_word(0, arity as u16).to_le_bytes());
            bytes.extend_from_slice(&vec![0u8; 4 * arity as usize]);
            self.module.add_data(bytes)
        };
        self.finish_init(global, vec![Instr::I32Const(addr as i32)], FnCtx::top_level());
    }

    fn emit_main(&mut self, order: &[Global]) {
        let mut body = Vec::new();
        for global in order {
            if self.inits.contains(global) {
                body.push(Instr::Call(names::init_name(self.interner, global)));
                body.push(Instr::LocalSet("status".to_string()));
                body.push(Instr::LocalGet("status".to_string()));
                body.push(Instr::If {
                    result: false,
                    then: vec![Instr::LocalGet("status".to_string()), Instr::Return],
                    else_: vec![],
                });
            }
        }
        let group_addrs: Vec<u32> = self
            .shared
            .iter()
            .filter(|(_, def)| matches!(def, SharedDef::FieldGroup(_)))
            .filter_map(|(id, _)| self.lit_addrs.get(&id).copied())
            .collect();
        for addr in group_addrs {
            body.push(Instr::I32Const(addr as i32));
            body.push(Instr::Call("fen_fields_register".to_string()));
        }
        body.push(Instr::I32Const(0));
        self.module.add_func(WasmFunc {
            name: "main".to_string(),
            params: vec![],
            result: true,
            locals: vec!["status".to_string()],
            body,
            evaluator: false,
            export: Some("main".to_string()),
        });
    }

    /// The integer-tag tables, as header comments of the text module.
    fn table_comments(&self) -> Vec<String> {
        let mut lines = Vec::new();
        if !self.shared.fields.is_empty() {
            let entries: Vec<String> = self
                .shared
                .fields
                .iter()
                .map(|(id, name)| format!("{id} = {}", self.interner.lookup(name)))
                .collect();
            lines.push(format!("field table: {}", entries.join(", ")));
        }
        if !self.shared.ctors.is_empty() {
            let entries: Vec<String> = self
                .shared
                .ctors
                .iter()
                .map(|(id, name)| format!("{id} = {}", self.interner.lookup(name)))
                .collect();
            lines.push(format!("ctor table: {}", entries.join(", ")));
        }
        let kernels: Vec<String> = self
            .shared
            .kernels()
            .map(|(id, global)| {
                format!(
                    "{id} = {}.{}",
                    self.interner.lookup(global.home.0),
                    self.interner.lookup(global.name)
                )
            })
            .collect();
        if !kernels.is_empty() {
            lines.push(format!("kernel table: {}", kernels.join(", ")));
        }
        lines
    }
}

impl NodeBackend for WasmBackend<'_> {
    fn define(&mut self, global: &Global, expr: &Expr) -> Result<(), CodegenError> {
        let mut ctx = FnCtx::top_level();
        let mut body = Vec::new();
        self.lower_expr(&mut ctx, expr, &mut body)?;
        assert!(
            ctx.scope.captured().is_empty(),
            "local variable referenced outside any scope while lowering a top-level value"
        );
        self.finish_init(global, body, ctx);
        Ok(())
    }

    fn define_tail_func(
        &mut self,
        global: &Global,
        params: &[Name],
        expr: &Expr,
    ) -> Result<(), CodegenError> {
        let mut ctx = FnCtx::top_level();
        let construction = self.lower_closure(&mut ctx, params, expr, true)?;
        assert!(
            ctx.scope.captured().is_empty(),
            "top-level tail function captured a local"
        );
        self.finish_init(global, construction, ctx);
        Ok(())
    }

    fn ctor(&mut self, global: &Global, index: u32, arity: u32) -> Result<(), CodegenError> {
        self.emit_ctor_like(global, index, arity);
        Ok(())
    }

    fn enum_tag(&mut self, global: &Global, index: u32) -> Result<(), CodegenError> {
        self.emit_ctor_like(global, index, 0);
        Ok(())
    }

    fn boxed(&mut self, global: &Global) -> Result<(), CodegenError> {
        self.emit_ctor_like(global, 0, 1);
        Ok(())
    }

    fn link(&mut self, global: &Global, target: &Global) -> Result<(), CodegenError> {
        let target_sym = names::global_name(self.interner, target);
        self.finish_init(
            global,
            vec![Instr::GlobalGet(target_sym)],
            FnCtx::top_level(),
        );
        Ok(())
    }

    fn cycle(
        &mut self,
        global: &Global,
        names_: &[Name],
        values: &[(Name, Expr)],
        functions: &[Def],
    ) -> Result<(), CodegenError> {
        for &name in names_ {
            let member = Global::new(global.home, name);
            let cell = format!("{}_cell", names::cycle_name(self.interner, &member));
            self.module.add_global(cell);
        }

        let emit_thunk =
            |backend: &mut Self, name: Name, compute: Vec<Instr>, locals: Vec<String>| {
                let member = Global::new(global.home, name);
                let thunk = names::cycle_name(backend.interner, &member);
                let cell = format!("{thunk}_cell");
                let mut else_ = compute;
                else_.push(Instr::GlobalSet(cell.clone()));
                else_.push(Instr::GlobalGet(cell.clone()));
                let body = vec![
                    Instr::GlobalGet(cell.clone()),
                    Instr::If {
                        result: true,
                        then: vec![Instr::GlobalGet(cell)],
                        else_,
                    },
                ];
                backend.module.add_func(WasmFunc {
                    name: thunk,
                    params: vec![],
                    result: true,
                    locals,
                    body,
                    evaluator: false,
                    export: None,
                });
            };

        for (name, expr) in values {
            let mut ctx = FnCtx::top_level();
            let mut compute = Vec::new();
            self.lower_expr(&mut ctx, expr, &mut compute)?;
            assert!(ctx.scope.captured().is_empty(), "cyclic value captured a local");
            emit_thunk(self, *name, compute, ctx.locals);
        }
        for def in functions {
            match def {
                Def::Value { name, expr } => {
                    let mut ctx = FnCtx::top_level();
                    let mut compute = Vec::new();
                    self.lower_expr(&mut ctx, expr, &mut compute)?;
                    assert!(ctx.scope.captured().is_empty(), "cyclic value captured a local");
                    emit_thunk(self, *name, compute, ctx.locals);
                }
                Def::TailFunc { name, params, expr } => {
                    let mut ctx = FnCtx::top_level();
                    let compute = self.lower_closure(&mut ctx, params, expr, true)?;
                    assert!(
                        ctx.scope.captured().is_empty(),
                        "cyclic tail function captured a local"
                    );
                    emit_thunk(self, *name, compute, ctx.locals);
                }
            }
        }

        // Force every member at this slot in the recorded order.
        let mut body = Vec::new();
        for &name in names_ {
            let member = Global::new(global.home, name);
            body.push(Instr::Call(names::cycle_name(self.interner, &member)));
            body.push(Instr::Drop);
        }
        body.push(Instr::I32Const(0));
        self.module.add_func(WasmFunc {
            name: names::init_name(self.interner, global),
            params: vec![],
            result: true,
            locals: vec![],
            body,
            evaluator: false,
            export: None,
        });
        self.inits.insert(*global);
        Ok(())
    }

    fn kernel(&mut self, global: &Global, chunks: &[KernelChunk]) -> Result<(), CodegenError> {
        self.script.kernel(self.interner, global, chunks);
        Ok(())
    }

    fn manager(&mut self, global: &Global) -> Result<(), CodegenError> {
        let sym = names::global_name(self.interner, global);
        self.module.import_global("script", sym.clone(), sym);
        self.script.manager(self.interner, global);
        Ok(())
    }

    fn port(&mut self, global: &Global, direction: PortDirection) -> Result<(), CodegenError> {
        let sym = names::global_name(self.interner, global);
        self.module.import_global("script", sym.clone(), sym);
        self.script.port(self.interner, global, direction);
        Ok(())
    }
}
