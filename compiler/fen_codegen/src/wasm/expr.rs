//! Expression lowering for the bytecode target.
//!
//! Lowering pushes instructions into the current function's accumulator and
//! leaves each expression's value on the operand stack. Structured control
//! flow means branch targets are label depths; the only branches that cross
//! expression boundaries are tail-call restarts and case jumps, so the
//! context tracks how many labels separate the current emission point from
//! the enclosing loop head, and case lowering computes its own depths from
//! its block nesting.

use fen_ir::{Choice, Decider, Def, Expr, Name, Path, Test};
use rustc_hash::FxHashMap;

use crate::repr::{ClosureLayout, ValueTag};
use crate::scope::Scope;
use crate::shared::SharedDef;
use crate::{names, CodegenError, Mode};

use super::{FnCtx, Instr, WasmBackend, WasmFunc};

impl WasmBackend<'_> {
    /// Reference a local, classifying it in the scope as a side effect.
    fn local_ref(&self, ctx: &mut FnCtx, name: Name) -> String {
        ctx.scope.reference(name);
        names::local_name(self.interner, name)
    }

    /// Lower a sub-expression that sits `levels` labels deeper than the
    /// current point (inside `if`/`block`/`loop` bodies), keeping tail-call
    /// branch depths honest.
    fn lower_nested<F>(&mut self, ctx: &mut FnCtx, levels: u32, f: F) -> Result<Vec<Instr>, CodegenError>
    where
        F: FnOnce(&mut Self, &mut FnCtx, &mut Vec<Instr>) -> Result<(), CodegenError>,
    {
        if let Some(depth) = ctx.tail_depth.as_mut() {
            *depth += levels;
        }
        let mut out = Vec::new();
        let result = f(self, ctx, &mut out);
        if let Some(depth) = ctx.tail_depth.as_mut() {
            *depth -= levels;
        }
        result.map(|()| out)
    }

    /// Lower one expression, leaving its value on the stack.
    pub(crate) fn lower_expr(
        &mut self,
        ctx: &mut FnCtx,
        expr: &Expr,
        out: &mut Vec<Instr>,
    ) -> Result<(), CodegenError> {
        match expr {
            Expr::Bool(true) => out.push(Instr::GlobalGet("fen_true".to_string())),
            Expr::Bool(false) => out.push(Instr::GlobalGet("fen_false".to_string())),
            Expr::Unit => out.push(Instr::GlobalGet("fen_unit".to_string())),
            Expr::Int(i) => out.extend(self.shared_value_instrs(SharedDef::Int(*i))),
            Expr::Float(bits) => out.extend(self.shared_value_instrs(SharedDef::Float(*bits))),
            Expr::Chr(c) => out.extend(self.shared_value_instrs(SharedDef::Chr(*c))),
            Expr::Str(s) => out.extend(self.shared_value_instrs(SharedDef::Str(*s))),
            Expr::Shader(src) => out.extend(self.shared_value_instrs(SharedDef::Str(*src))),

            Expr::VarLocal(name) => {
                let local = self.local_ref(ctx, *name);
                out.push(Instr::LocalGet(local));
            }
            Expr::VarGlobal(global) | Expr::VarEnum(global, _) | Expr::VarBox(global) => {
                out.push(Instr::GlobalGet(names::global_name(self.interner, global)));
            }
            Expr::VarCycle(global) => {
                out.push(Instr::Call(names::cycle_name(self.interner, global)));
            }
            Expr::VarKernel(global) => {
                out.extend(self.shared_value_instrs(SharedDef::ForeignThunk(*global)));
            }

            Expr::Function { params, body } => {
                let construction = self.lower_closure(ctx, params, body, false)?;
                out.extend(construction);
            }

            Expr::Call { func, args } => self.lower_call(ctx, func, args, out)?,
            Expr::TailCall { args, .. } => self.lower_tail_call(ctx, args, out)?,

            Expr::If {
                branches,
                final_branch,
            } => self.lower_if(ctx, branches, final_branch, out)?,

            Expr::Let { def, body } => {
                match def.as_ref() {
                    Def::Value { name, expr } => {
                        self.lower_expr(ctx, expr, out)?;
                        ctx.scope.bind_local(*name);
                        let local = ctx.declare_local(names::local_name(self.interner, *name));
                        out.push(Instr::LocalSet(local));
                    }
                    Def::TailFunc { name, params, expr } => {
                        let construction = self.lower_closure(ctx, params, expr, true)?;
                        out.extend(construction);
                        ctx.scope.bind_local(*name);
                        let local = ctx.declare_local(names::local_name(self.interner, *name));
                        out.push(Instr::LocalSet(local));
                    }
                }
                self.lower_expr(ctx, body, out)?;
            }

            Expr::Destruct { destructor, body } => {
                self.lower_path(ctx, &destructor.path, out);
                ctx.scope.bind_local(destructor.name);
                let local = ctx.declare_local(names::local_name(self.interner, destructor.name));
                out.push(Instr::LocalSet(local));
                self.lower_expr(ctx, body, out)?;
            }

            Expr::Case {
                root,
                decider,
                jumps,
                ..
            } => self.lower_case(ctx, *root, decider, jumps, out)?,

            Expr::Accessor(field) => {
                self.shared.fields.id(*field);
                out.extend(self.shared_value_instrs(SharedDef::Accessor(*field)));
            }

            Expr::Access { record, field } => {
                let field_id = self.shared.fields.id(*field);
                self.lower_expr(ctx, record, out)?;
                out.push(Instr::I32Const(field_id as i32));
                out.push(Instr::Call("fen_record_field".to_string()));
            }

            Expr::Update { record, fields } => {
                self.lower_expr(ctx, record, out)?;
                out.push(Instr::Call("fen_shallow_copy".to_string()));
                let t = ctx.declare_local(self.next_tmp());
                out.push(Instr::LocalSet(t.clone()));
                for (field, value) in fields {
                    let field_id = self.shared.fields.id(*field);
                    out.push(Instr::LocalGet(t.clone()));
                    out.push(Instr::I32Const(field_id as i32));
                    self.lower_expr(ctx, value, out)?;
                    out.push(Instr::Call("fen_record_set".to_string()));
                }
                out.push(Instr::LocalGet(t));
            }

            Expr::Record(fields) => {
                let mut sorted: Vec<Name> = fields.iter().map(|(f, _)| *f).collect();
                sorted.sort_by_key(|&f| self.interner.lookup(f));
                for &f in &sorted {
                    self.shared.fields.id(f);
                }
                let group_addr = self.shared_addr(SharedDef::FieldGroup(sorted));
                out.push(Instr::I32Const(group_addr as i32));
                out.push(Instr::Call("fen_record_alloc".to_string()));
                let t = ctx.declare_local(self.next_tmp());
                out.push(Instr::LocalSet(t.clone()));
                for (field, value) in fields {
                    let field_id = self.shared.fields.id(*field);
                    out.push(Instr::LocalGet(t.clone()));
                    out.push(Instr::I32Const(field_id as i32));
                    self.lower_expr(ctx, value, out)?;
                    out.push(Instr::Call("fen_record_set".to_string()));
                }
                out.push(Instr::LocalGet(t));
            }

            Expr::Tuple { a, b, c } => {
                let (tag, bytes) = match c {
                    None => (ValueTag::Tuple2, 12),
                    Some(_) => (ValueTag::Tuple3, 16),
                };
                let t = ctx.declare_local(self.next_tmp());
                out.push(Instr::I32Const(bytes));
                out.push(Instr::Call("fen_alloc".to_string()));
                out.push(Instr::LocalSet(t.clone()));
                out.push(Instr::LocalGet(t.clone()));
                out.push(Instr::I32Const(tag.value() as i32));
                out.push(Instr::I32Store { offset: 0 });
                out.push(Instr::LocalGet(t.clone()));
                self.lower_expr(ctx, a, out)?;
                out.push(Instr::I32Store { offset: 4 });
                out.push(Instr::LocalGet(t.clone()));
                self.lower_expr(ctx, b, out)?;
                out.push(Instr::I32Store { offset: 8 });
                if let Some(c) = c {
                    out.push(Instr::LocalGet(t.clone()));
                    self.lower_expr(ctx, c, out)?;
                    out.push(Instr::I32Store { offset: 12 });
                }
                out.push(Instr::LocalGet(t));
            }

            Expr::DebugLog { tag, value } => match self.mode {
                Mode::Dev => {
                    out.extend(self.shared_value_instrs(SharedDef::Str(*tag)));
                    self.lower_expr(ctx, value, out)?;
                    out.push(Instr::Call("fen_debug_log".to_string()));
                }
                Mode::Prod => self.lower_expr(ctx, value, out)?,
            },
        }
        Ok(())
    }

    /// The uniform call protocol: shallow-copy, fill slots from high offset
    /// to low, bump the fill count, then one conditional — invoke through
    /// the table when exactly full, otherwise the copy is the result.
    fn lower_call(
        &mut self,
        ctx: &mut FnCtx,
        func: &Expr,
        args: &[Expr],
        out: &mut Vec<Instr>,
    ) -> Result<(), CodegenError> {
        let k = args.len() as u32;
        self.lower_expr(ctx, func, out)?;
        out.push(Instr::Call("fen_shallow_copy".to_string()));
        let c = ctx.declare_local(self.next_tmp());
        out.push(Instr::LocalSet(c.clone()));

        // filled count before this call
        let n = ctx.declare_local(self.next_tmp());
        out.push(Instr::LocalGet(c.clone()));
        out.push(Instr::I32Load16U { offset: 4 });
        out.push(Instr::LocalSet(n.clone()));

        // Arguments evaluate in source order into temporaries...
        let mut arg_tmps = Vec::with_capacity(args.len());
        for arg in args {
            self.lower_expr(ctx, arg, out)?;
            let t = ctx.declare_local(self.next_tmp());
            out.push(Instr::LocalSet(t.clone()));
            arg_tmps.push(t);
        }
        // ...and the stores walk the slots from high offset to low. The
        // slot address is copy + 4*filled, plus the static slot offset.
        for (j, t) in arg_tmps.iter().enumerate().rev() {
            out.push(Instr::LocalGet(c.clone()));
            out.push(Instr::LocalGet(n.clone()));
            out.push(Instr::I32Const(2));
            out.push(Instr::I32Shl);
            out.push(Instr::I32Add);
            out.push(Instr::LocalGet(t.clone()));
            out.push(Instr::I32Store {
                offset: 8 + 4 * j as u32,
            });
        }

        // new filled count
        out.push(Instr::LocalGet(c.clone()));
        out.push(Instr::LocalGet(n.clone()));
        out.push(Instr::I32Const(k as i32));
        out.push(Instr::I32Add);
        out.push(Instr::I32Store16 { offset: 4 });

        // One conditional, no intermediate state: partial application never
        // reaches the evaluator.
        out.push(Instr::LocalGet(n));
        out.push(Instr::I32Const(k as i32));
        out.push(Instr::I32Add);
        out.push(Instr::LocalGet(c.clone()));
        out.push(Instr::I32Load16U { offset: 6 });
        out.push(Instr::I32Eq);
        out.push(Instr::If {
            result: true,
            then: vec![
                Instr::LocalGet(c.clone()),
                Instr::LocalGet(c.clone()),
                Instr::I32Load { offset: 0 },
                Instr::CallIndirect,
            ],
            else_: vec![Instr::LocalGet(c)],
        });
        Ok(())
    }

    /// Re-bind the loop parameters and branch back to the loop head. All
    /// argument values are computed before any parameter changes.
    fn lower_tail_call(
        &mut self,
        ctx: &mut FnCtx,
        args: &[(Name, Expr)],
        out: &mut Vec<Instr>,
    ) -> Result<(), CodegenError> {
        let depth = ctx
            .tail_depth
            .expect("tail call outside any tail-recursive function");
        let mut tmps = Vec::with_capacity(args.len());
        for (_, value) in args {
            self.lower_expr(ctx, value, out)?;
            let t = ctx.declare_local(self.next_tmp());
            out.push(Instr::LocalSet(t.clone()));
            tmps.push(t);
        }
        for ((param, _), t) in args.iter().zip(&tmps) {
            out.push(Instr::LocalGet(t.clone()));
            out.push(Instr::LocalSet(names::local_name(self.interner, *param)));
        }
        out.push(Instr::Br(depth));
        Ok(())
    }

    fn lower_if(
        &mut self,
        ctx: &mut FnCtx,
        branches: &[(Expr, Expr)],
        final_branch: &Expr,
        out: &mut Vec<Instr>,
    ) -> Result<(), CodegenError> {
        let Some(((cond, branch), rest)) = branches.split_first() else {
            return self.lower_expr(ctx, final_branch, out);
        };
        self.lower_expr(ctx, cond, out)?;
        out.push(Instr::GlobalGet("fen_true".to_string()));
        out.push(Instr::I32Eq);
        let then = self.lower_nested(ctx, 1, |s, ctx, out| s.lower_expr(ctx, branch, out))?;
        let else_ =
            self.lower_nested(ctx, 1, |s, ctx, out| s.lower_if(ctx, rest, final_branch, out))?;
        out.push(Instr::If {
            result: true,
            then,
            else_,
        });
        Ok(())
    }

    /// Lower a function body into a lifted evaluator plus inline
    /// construction code for the definition site.
    ///
    /// The evaluator prologue and the construction stores both come from the
    /// same [`ClosureLayout`] walk, so their byte offsets agree for every
    /// slot.
    pub(crate) fn lower_closure(
        &mut self,
        outer: &mut FnCtx,
        params: &[Name],
        body: &Expr,
        tail: bool,
    ) -> Result<Vec<Instr>, CodegenError> {
        let mut inner = FnCtx::for_function(self.interner, params);
        if tail {
            inner.tail_depth = Some(0);
        }
        let mut body_instrs = Vec::new();
        self.lower_expr(&mut inner, body, &mut body_instrs)?;

        let captures = inner.scope.sorted_captures(self.interner);
        let layout = ClosureLayout::new(params, &captures);
        let ev = self.next_evaluator();

        let mut instrs = Vec::new();
        for slot in layout.destructuring_slots() {
            let local = inner.declare_local(names::local_name(self.interner, slot.name));
            instrs.push(Instr::LocalGet("c".to_string()));
            instrs.push(Instr::I32Load {
                offset: slot.offset,
            });
            instrs.push(Instr::LocalSet(local));
        }
        if tail {
            instrs.push(Instr::Loop {
                result: true,
                body: body_instrs,
            });
        } else {
            instrs.extend(body_instrs);
        }

        let table_index = self.module.add_table_entry(ev.clone());
        self.module.add_func(WasmFunc {
            name: ev,
            params: vec!["c".to_string()],
            result: true,
            locals: inner.locals,
            body: instrs,
            evaluator: true,
            export: None,
        });

        outer.scope.absorb_nested(&inner.scope);

        // Construction: allocate, store the table index and arity word,
        // store captures in canonical order, leave the record pointer.
        let t = outer.declare_local(self.next_tmp());
        let mut construction = vec![
            Instr::I32Const(layout.total_bytes() as i32),
            Instr::Call("fen_alloc".to_string()),
            Instr::LocalSet(t.clone()),
            Instr::LocalGet(t.clone()),
            Instr::I32Const(table_index as i32),
            Instr::I32Store { offset: 0 },
            Instr::LocalGet(t.clone()),
            Instr::I32Const(layout.initial_arity_word() as i32),
            Instr::I32Store { offset: 4 },
        ];
        for slot in layout.construction_slots() {
            construction.push(Instr::LocalGet(t.clone()));
            construction.push(Instr::LocalGet(names::local_name(self.interner, slot.name)));
            construction.push(Instr::I32Store {
                offset: slot.offset,
            });
        }
        construction.push(Instr::LocalGet(t));
        Ok(construction)
    }

    fn lower_path(&mut self, ctx: &mut FnCtx, path: &Path, out: &mut Vec<Instr>) {
        match path {
            Path::Root(name) => {
                let local = self.local_ref(ctx, *name);
                out.push(Instr::LocalGet(local));
            }
            Path::Field(field, rest) => {
                let field_id = self.shared.fields.id(*field);
                self.lower_path(ctx, rest, out);
                out.push(Instr::I32Const(field_id as i32));
                out.push(Instr::Call("fen_record_field".to_string()));
            }
            Path::Index(index, rest) => {
                self.lower_path(ctx, rest, out);
                out.push(Instr::I32Const(*index as i32));
                out.push(Instr::Call("fen_child".to_string()));
            }
            Path::Unbox(rest) => {
                self.lower_path(ctx, rest, out);
                out.push(Instr::I32Const(0));
                out.push(Instr::Call("fen_child".to_string()));
            }
        }
    }

    /// Lower a compiled case.
    ///
    /// The decider sits in the innermost of a stack of blocks, one per
    /// jump-table entry plus one for the whole case: branching out of block
    /// `p` lands at the start of jump body `p`, each body stores the result
    /// and branches to the end, and leaves that inline a branch body do the
    /// same from inside the decider.
    fn lower_case(
        &mut self,
        ctx: &mut FnCtx,
        root: Name,
        decider: &Decider<Choice>,
        jumps: &[(u32, Expr)],
        out: &mut Vec<Instr>,
    ) -> Result<(), CodegenError> {
        // Touch the root so scope bookkeeping sees the scrutinee.
        let _ = self.local_ref(ctx, root);
        let result = ctx.declare_local(self.next_tmp());

        let n = jumps.len() as u32;
        let jump_pos: FxHashMap<u32, u32> = jumps
            .iter()
            .enumerate()
            .map(|(p, (key, _))| (*key, p as u32))
            .collect();

        // Decider sits under every jump block plus the done block.
        let mut inner = self.lower_nested(ctx, n + 1, |s, ctx, out| {
            s.lower_decider(ctx, decider, &result, &jump_pos, n, 0, out)
        })?;

        for (p, (_, jump_body)) in jumps.iter().enumerate() {
            let p = p as u32;
            let body_instrs = self.lower_nested(ctx, n - p, |s, ctx, out| {
                s.lower_expr(ctx, jump_body, out)
            })?;
            let mut wrapped = vec![Instr::Block { body: inner }];
            wrapped.extend(body_instrs);
            wrapped.push(Instr::LocalSet(result.clone()));
            wrapped.push(Instr::Br(n - 1 - p));
            inner = wrapped;
        }

        out.push(Instr::Block { body: inner });
        out.push(Instr::LocalGet(result));
        Ok(())
    }

    /// `extra` counts the labels this decider fragment sits under beyond the
    /// case's own blocks (each nested `if` arm adds one).
    fn lower_decider(
        &mut self,
        ctx: &mut FnCtx,
        decider: &Decider<Choice>,
        result: &str,
        jump_pos: &FxHashMap<u32, u32>,
        n: u32,
        extra: u32,
        out: &mut Vec<Instr>,
    ) -> Result<(), CodegenError> {
        match decider {
            Decider::Leaf(Choice::Inline(expr)) => {
                self.lower_expr(ctx, expr, out)?;
                out.push(Instr::LocalSet(result.to_string()));
                out.push(Instr::Br(extra + n));
                Ok(())
            }
            Decider::Leaf(Choice::Jump(key)) => {
                let position = *jump_pos
                    .get(key)
                    .unwrap_or_else(|| panic!("case jump {key} has no jump-table entry"));
                out.push(Instr::Br(extra + position));
                Ok(())
            }
            Decider::Chain {
                test_chain,
                success,
                failure,
            } => {
                self.chain_condition(ctx, test_chain, out);
                let then = self.lower_nested(ctx, 1, |s, ctx, out| {
                    s.lower_decider(ctx, success, result, jump_pos, n, extra + 1, out)
                })?;
                let else_ = self.lower_nested(ctx, 1, |s, ctx, out| {
                    s.lower_decider(ctx, failure, result, jump_pos, n, extra + 1, out)
                })?;
                out.push(Instr::If {
                    result: false,
                    then,
                    else_,
                });
                Ok(())
            }
            Decider::FanOut {
                path,
                tests,
                fallback,
            } => {
                let mut value = Vec::new();
                self.lower_path(ctx, path, &mut value);
                let t = ctx.declare_local(self.next_tmp());
                out.extend(value);
                out.push(Instr::LocalSet(t.clone()));
                self.lower_fanout(ctx, &t, tests, fallback, result, jump_pos, n, extra, out)
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn lower_fanout(
        &mut self,
        ctx: &mut FnCtx,
        scrutinee: &str,
        tests: &[(Test, Decider<Choice>)],
        fallback: &Decider<Choice>,
        result: &str,
        jump_pos: &FxHashMap<u32, u32>,
        n: u32,
        extra: u32,
        out: &mut Vec<Instr>,
    ) -> Result<(), CodegenError> {
        let Some(((test, sub), rest)) = tests.split_first() else {
            return self.lower_decider(ctx, fallback, result, jump_pos, n, extra, out);
        };
        let value = vec![Instr::LocalGet(scrutinee.to_string())];
        self.test_condition(&value, test, out);
        let then = self.lower_nested(ctx, 1, |s, ctx, out| {
            s.lower_decider(ctx, sub, result, jump_pos, n, extra + 1, out)
        })?;
        let else_ = self.lower_nested(ctx, 1, |s, ctx, out| {
            s.lower_fanout(ctx, scrutinee, rest, fallback, result, jump_pos, n, extra + 1, out)
        })?;
        out.push(Instr::If {
            result: false,
            then,
            else_,
        });
        Ok(())
    }

    /// Short-circuit conjunction of a chain's tests: later tests only run
    /// when every earlier test passed, since their paths may only be valid
    /// then.
    fn chain_condition(
        &mut self,
        ctx: &mut FnCtx,
        tests: &[(Path, Test)],
        out: &mut Vec<Instr>,
    ) {
        let Some(((path, test), rest)) = tests.split_first() else {
            out.push(Instr::I32Const(1));
            return;
        };
        let mut value = Vec::new();
        self.lower_path(ctx, path, &mut value);
        self.test_condition(&value, test, out);
        if !rest.is_empty() {
            let mut then = Vec::new();
            self.chain_condition(ctx, rest, &mut then);
            out.push(Instr::If {
                result: true,
                then,
                else_: vec![Instr::I32Const(0)],
            });
        }
    }

    /// Emit `value-test` as an i32 condition. `value` must be branch-free.
    fn test_condition(&mut self, value: &[Instr], test: &Test, out: &mut Vec<Instr>) {
        match test {
            Test::Ctor { tag, index } => {
                self.shared.ctors.id(*tag);
                out.extend_from_slice(value);
                out.push(Instr::I32Load { offset: 4 });
                out.push(Instr::I32Const(*index as i32));
                out.push(Instr::I32Eq);
            }
            Test::Int(i) => {
                out.extend_from_slice(value);
                out.push(Instr::I32Load { offset: 4 });
                out.push(Instr::I32Const(*i as i32));
                out.push(Instr::I32Eq);
            }
            Test::Bool(b) => {
                out.extend_from_slice(value);
                out.push(Instr::GlobalGet(
                    if *b { "fen_true" } else { "fen_false" }.to_string(),
                ));
                out.push(Instr::I32Eq);
            }
            Test::Chr(c) => {
                let lit = self.shared_value_instrs(SharedDef::Chr(*c));
                out.extend_from_slice(value);
                out.extend(lit);
                out.push(Instr::Call("fen_value_eq".to_string()));
            }
            Test::Str(s) => {
                let lit = self.shared_value_instrs(SharedDef::Str(*s));
                out.extend_from_slice(value);
                out.extend(lit);
                out.push(Instr::Call("fen_value_eq".to_string()));
            }
            Test::IsCons => {
                out.extend_from_slice(value);
                out.push(Instr::I32Load { offset: 0 });
                out.push(Instr::I32Const(ValueTag::Cons.value() as i32));
                out.push(Instr::I32Eq);
            }
            Test::IsNil => {
                out.extend_from_slice(value);
                out.push(Instr::I32Load { offset: 0 });
                out.push(Instr::I32Const(ValueTag::Nil.value() as i32));
                out.push(Instr::I32Eq);
            }
            Test::IsTuple => {
                out.extend_from_slice(value);
                out.push(Instr::I32Load { offset: 0 });
                out.push(Instr::I32Const(ValueTag::Tuple2.value() as i32));
                out.push(Instr::I32Eq);
                out.extend_from_slice(value);
                out.push(Instr::I32Load { offset: 0 });
                out.push(Instr::I32Const(ValueTag::Tuple3.value() as i32));
                out.push(Instr::I32Eq);
                out.push(Instr::I32Or);
            }
        }
    }
}
