//! Expression lowering for the C target.
//!
//! Every expression becomes one C expression string. Binding and branching
//! forms use GNU statement expressions (`({ ... })`), which keeps lowering a
//! single recursive pass: sub-expressions slot into their parents with no
//! separate statement accumulator to merge.

use fen_ir::{Choice, Decider, Def, Expr, Name, Path, Test};

use crate::repr::ClosureLayout;
use crate::scope::Scope;
use crate::shared::SharedDef;
use crate::{names, CodegenError, Mode};

use super::{c_escape, CBackend};

impl CBackend<'_> {
    /// Reference a local, classifying it in the scope as a side effect.
    fn local_ref(&self, scope: &mut Scope, name: Name) -> String {
        scope.reference(name);
        names::local_name(self.interner, name)
    }

    /// Reference a shared definition, interning it on first sight.
    pub(crate) fn shared_ref(&mut self, def: SharedDef) -> String {
        let id = self.shared.intern(def.clone());
        let sym = self.shared.symbol(self.interner, id, &def);
        match def {
            // Foreign thunks are extern cells, referenced by value.
            SharedDef::ForeignThunk(_) => sym,
            _ => format!("(void*)&{sym}"),
        }
    }

    /// Lower one expression to a C expression string.
    pub(crate) fn lower_expr(
        &mut self,
        scope: &mut Scope,
        expr: &Expr,
    ) -> Result<String, CodegenError> {
        match expr {
            Expr::Bool(true) => Ok("fen_true".to_string()),
            Expr::Bool(false) => Ok("fen_false".to_string()),
            Expr::Unit => Ok("fen_unit".to_string()),
            Expr::Int(i) => Ok(self.shared_ref(SharedDef::Int(*i))),
            Expr::Float(bits) => Ok(self.shared_ref(SharedDef::Float(*bits))),
            Expr::Chr(c) => Ok(self.shared_ref(SharedDef::Chr(*c))),
            Expr::Str(s) => Ok(self.shared_ref(SharedDef::Str(*s))),
            Expr::Shader(src) => Ok(self.shared_ref(SharedDef::Str(*src))),

            Expr::VarLocal(name) => Ok(self.local_ref(scope, *name)),
            Expr::VarGlobal(global) | Expr::VarEnum(global, _) | Expr::VarBox(global) => {
                Ok(names::global_name(self.interner, global))
            }
            Expr::VarCycle(global) => {
                Ok(format!("{}()", names::cycle_name(self.interner, global)))
            }
            Expr::VarKernel(global) => {
                self.shared.kernel_id(*global);
                Ok(self.shared_ref(SharedDef::ForeignThunk(*global)))
            }

            Expr::Function { params, body } => {
                let (construction, inner) = self.emit_evaluator(params, body, false)?;
                scope.absorb_nested(&inner);
                Ok(construction)
            }

            Expr::Call { func, args } => self.lower_call(scope, func, args),
            Expr::TailCall { args, .. } => self.lower_tail_call(scope, args),

            Expr::If {
                branches,
                final_branch,
            } => {
                let mut code = String::from("(");
                for (cond, branch) in branches {
                    let c = self.lower_expr(scope, cond)?;
                    let b = self.lower_expr(scope, branch)?;
                    code.push_str(&format!("({c} == fen_true) ? {b} : "));
                }
                code.push_str(&self.lower_expr(scope, final_branch)?);
                code.push(')');
                Ok(code)
            }

            Expr::Let { def, body } => {
                let binding = match def.as_ref() {
                    Def::Value { name, expr } => {
                        let value = self.lower_expr(scope, expr)?;
                        scope.bind_local(*name);
                        format!("void* {} = {value};", names::local_name(self.interner, *name))
                    }
                    Def::TailFunc { name, params, expr } => {
                        let (construction, inner) = self.emit_evaluator(params, expr, true)?;
                        scope.absorb_nested(&inner);
                        scope.bind_local(*name);
                        format!(
                            "void* {} = {construction};",
                            names::local_name(self.interner, *name)
                        )
                    }
                };
                let body_code = self.lower_expr(scope, body)?;
                Ok(format!("({{ {binding} {body_code}; }})"))
            }

            Expr::Destruct { destructor, body } => {
                let value = self.lower_path(scope, &destructor.path);
                scope.bind_local(destructor.name);
                let name = names::local_name(self.interner, destructor.name);
                let body_code = self.lower_expr(scope, body)?;
                Ok(format!("({{ void* {name} = {value}; {body_code}; }})"))
            }

            Expr::Case {
                root,
                decider,
                jumps,
                ..
            } => self.lower_case(scope, *root, decider, jumps),

            Expr::Accessor(field) => {
                self.shared.fields.id(*field);
                Ok(self.shared_ref(SharedDef::Accessor(*field)))
            }

            Expr::Access { record, field } => {
                self.shared.fields.id(*field);
                let record_code = self.lower_expr(scope, record)?;
                Ok(format!(
                    "fen_record_field({record_code}, {})",
                    names::field_const(self.interner, *field)
                ))
            }

            Expr::Update { record, fields } => {
                let record_code = self.lower_expr(scope, record)?;
                let t = self.next_tmp();
                let mut code =
                    format!("({{ void* {t} = fen_gc_shallow_copy({record_code}); ");
                for (field, value) in fields {
                    self.shared.fields.id(*field);
                    let value_code = self.lower_expr(scope, value)?;
                    code.push_str(&format!(
                        "fen_record_set({t}, {}, {value_code}); ",
                        names::field_const(self.interner, *field)
                    ));
                }
                code.push_str(&format!("{t}; }})"));
                Ok(code)
            }

            Expr::Record(fields) => {
                let mut sorted: Vec<Name> = fields.iter().map(|(f, _)| *f).collect();
                sorted.sort_by_key(|&f| self.interner.lookup(f));
                for &f in &sorted {
                    self.shared.fields.id(f);
                }
                let group = self.shared_ref(SharedDef::FieldGroup(sorted));
                let t = self.next_tmp();
                let mut code = format!(
                    "({{ void* {t} = fen_record_alloc((const fen_field_group_t*){group}); "
                );
                for (field, value) in fields {
                    let value_code = self.lower_expr(scope, value)?;
                    code.push_str(&format!(
                        "fen_record_set({t}, {}, {value_code}); ",
                        names::field_const(self.interner, *field)
                    ));
                }
                code.push_str(&format!("{t}; }})"));
                Ok(code)
            }

            Expr::Tuple { a, b, c } => {
                let a_code = self.lower_expr(scope, a)?;
                let b_code = self.lower_expr(scope, b)?;
                let t = self.next_tmp();
                match c {
                    None => Ok(format!(
                        "({{ fen_tuple2_t* {t} = (fen_tuple2_t*)fen_gc_alloc((uint32_t)sizeof(fen_tuple2_t)); \
                         {t}->tag = FEN_TAG_TUPLE2; {t}->a = {a_code}; {t}->b = {b_code}; (void*){t}; }})"
                    )),
                    Some(c) => {
                        let c_code = self.lower_expr(scope, c)?;
                        Ok(format!(
                            "({{ fen_tuple3_t* {t} = (fen_tuple3_t*)fen_gc_alloc((uint32_t)sizeof(fen_tuple3_t)); \
                             {t}->tag = FEN_TAG_TUPLE3; {t}->a = {a_code}; {t}->b = {b_code}; {t}->c = {c_code}; (void*){t}; }})"
                        ))
                    }
                }
            }

            Expr::DebugLog { tag, value } => {
                let value_code = self.lower_expr(scope, value)?;
                match self.mode {
                    Mode::Dev => Ok(format!(
                        "fen_debug_log(\"{}\", {value_code})",
                        c_escape(self.interner.lookup(*tag))
                    )),
                    Mode::Prod => Ok(value_code),
                }
            }
        }
    }

    /// The uniform call protocol: shallow-copy the callee, fill slots from
    /// high offset to low, and either invoke (exactly full) or yield the
    /// partially-filled copy. Over-application arrives as nested `Call`
    /// nodes, so those are the only two cases.
    fn lower_call(
        &mut self,
        scope: &mut Scope,
        func: &Expr,
        args: &[Expr],
    ) -> Result<String, CodegenError> {
        let callee = self.lower_expr(scope, func)?;
        let c = self.next_tmp();
        let n = self.next_tmp();
        let mut code = format!(
            "({{ fen_closure_t* {c} = (fen_closure_t*)fen_gc_shallow_copy({callee}); \
             uint16_t {n} = {c}->n_values; "
        );

        // Arguments evaluate in source order into temporaries; the stores
        // then walk the slots from high offset to low.
        let mut arg_tmps = Vec::with_capacity(args.len());
        for arg in args {
            let arg_code = self.lower_expr(scope, arg)?;
            let t = self.next_tmp();
            code.push_str(&format!("void* {t} = {arg_code}; "));
            arg_tmps.push(t);
        }
        for (j, t) in arg_tmps.iter().enumerate().rev() {
            code.push_str(&format!("{c}->values[{n} + {j}] = {t}; "));
        }

        code.push_str(&format!("{c}->n_values = (uint16_t)({n} + {}); ", args.len()));
        // One conditional, no intermediate state: partial application never
        // reaches the evaluator.
        code.push_str(&format!(
            "({c}->n_values == {c}->max_values) ? {c}->evaluator({c}) : (void*){c}; }})"
        ));
        Ok(code)
    }

    /// Re-bind the tail function's parameters and jump back to its loop
    /// head. All argument values are computed before any parameter changes.
    fn lower_tail_call(
        &mut self,
        scope: &mut Scope,
        args: &[(Name, Expr)],
    ) -> Result<String, CodegenError> {
        let mut code = String::from("({ ");
        let mut tmps = Vec::with_capacity(args.len());
        for (_, value) in args {
            let value_code = self.lower_expr(scope, value)?;
            let t = self.next_tmp();
            code.push_str(&format!("void* {t} = {value_code}; "));
            tmps.push(t);
        }
        for ((param, _), t) in args.iter().zip(&tmps) {
            code.push_str(&format!("{} = {t}; ", names::local_name(self.interner, *param)));
        }
        code.push_str("goto tail_loop; fen_unit; })");
        Ok(code)
    }

    /// Lower a function body into a lifted evaluator, returning the
    /// construction code for the definition site and the body's scope (for
    /// capture propagation or top-level capture checks).
    ///
    /// The evaluator prologue and the construction stores both come from the
    /// same [`ClosureLayout`] walk, so their slot positions agree by
    /// construction.
    pub(crate) fn emit_evaluator(
        &mut self,
        params: &[Name],
        body: &Expr,
        tail: bool,
    ) -> Result<(String, Scope), CodegenError> {
        let mut inner = Scope::for_function(params);
        let body_code = self.lower_expr(&mut inner, body)?;

        let captures = inner.sorted_captures(self.interner);
        let layout = ClosureLayout::new(params, &captures);
        let ev = self.next_evaluator();

        let mut f = format!("static void* {ev}(fen_closure_t* c) {{\n");
        for slot in layout.destructuring_slots() {
            f.push_str(&format!(
                "    void* {} = c->values[{}];\n",
                names::local_name(self.interner, slot.name),
                slot.index
            ));
        }
        if tail {
            f.push_str("    tail_loop:;\n");
        }
        f.push_str(&format!("    return {body_code};\n}}\n\n"));
        self.defs.push_str(&f);

        let t = self.next_tmp();
        let mut con = format!(
            "({{ fen_closure_t* {t} = (fen_closure_t*)fen_gc_alloc(FEN_CLOSURE_BYTES({})); ",
            layout.max_values()
        );
        con.push_str(&format!(
            "{t}->n_values = {}; {t}->max_values = {}; {t}->evaluator = &{ev}; ",
            layout.initial_filled(),
            layout.max_values()
        ));
        for slot in layout.construction_slots() {
            con.push_str(&format!(
                "{t}->values[{}] = {}; ",
                slot.index,
                names::local_name(self.interner, slot.name)
            ));
        }
        con.push_str(&format!("(void*){t}; }})"));
        Ok((con, inner))
    }

    fn lower_path(&mut self, scope: &mut Scope, path: &Path) -> String {
        match path {
            Path::Root(name) => self.local_ref(scope, *name),
            Path::Field(field, rest) => {
                self.shared.fields.id(*field);
                let rest_code = self.lower_path(scope, rest);
                format!(
                    "fen_record_field({rest_code}, {})",
                    names::field_const(self.interner, *field)
                )
            }
            Path::Index(index, rest) => {
                let rest_code = self.lower_path(scope, rest);
                format!("fen_child({rest_code}, {index}u)")
            }
            Path::Unbox(rest) => {
                let rest_code = self.lower_path(scope, rest);
                format!("fen_child({rest_code}, 0u)")
            }
        }
    }

    /// Lower a compiled case. The decider runs inside a `do {{ ... }}`; leaf
    /// bodies assign the result and break out, jump leaves `goto` into the
    /// jump-table bodies, which are emitted exactly once each.
    fn lower_case(
        &mut self,
        scope: &mut Scope,
        root: Name,
        decider: &Decider<Choice>,
        jumps: &[(u32, Expr)],
    ) -> Result<String, CodegenError> {
        let result = self.next_tmp();
        let prefix = self.next_tmp();
        // Touch the root so scope bookkeeping sees the scrutinee.
        let _root_ref = self.local_ref(scope, root);

        let mut body = String::new();
        self.lower_decider(scope, decider, &result, &prefix, &mut body)?;

        let mut code = format!("({{ void* {result}; do {{ {body}}} while (0); ");
        if !jumps.is_empty() {
            code.push_str(&format!("goto {prefix}_done; "));
            for (index, jump_body) in jumps {
                let jump_code = self.lower_expr(scope, jump_body)?;
                code.push_str(&format!(
                    "{prefix}_j{index}: {result} = {jump_code}; goto {prefix}_done; "
                ));
            }
            code.push_str(&format!("{prefix}_done:; "));
        }
        code.push_str(&format!("{result}; }})"));
        Ok(code)
    }

    fn lower_decider(
        &mut self,
        scope: &mut Scope,
        decider: &Decider<Choice>,
        result: &str,
        prefix: &str,
        out: &mut String,
    ) -> Result<(), CodegenError> {
        match decider {
            Decider::Leaf(Choice::Inline(expr)) => {
                let code = self.lower_expr(scope, expr)?;
                out.push_str(&format!("{result} = {code}; break; "));
                Ok(())
            }
            Decider::Leaf(Choice::Jump(index)) => {
                out.push_str(&format!("goto {prefix}_j{index}; "));
                Ok(())
            }
            Decider::Chain {
                test_chain,
                success,
                failure,
            } => {
                if test_chain.is_empty() {
                    return self.lower_decider(scope, success, result, prefix, out);
                }
                let conds: Vec<String> = test_chain
                    .iter()
                    .map(|(path, test)| {
                        let value = self.lower_path(scope, path);
                        self.lower_test(&value, test)
                    })
                    .collect();
                out.push_str(&format!("if ({}) {{ ", conds.join(" && ")));
                self.lower_decider(scope, success, result, prefix, out)?;
                out.push_str("} else { ");
                self.lower_decider(scope, failure, result, prefix, out)?;
                out.push_str("} ");
                Ok(())
            }
            Decider::FanOut {
                path,
                tests,
                fallback,
            } => {
                if tests.is_empty() {
                    return self.lower_decider(scope, fallback, result, prefix, out);
                }
                let value = self.lower_path(scope, path);
                let t = self.next_tmp();
                out.push_str(&format!("void* {t} = {value}; "));
                for (i, (test, sub)) in tests.iter().enumerate() {
                    let cond = self.lower_test(&t, test);
                    let keyword = if i == 0 { "if" } else { "} else if" };
                    out.push_str(&format!("{keyword} ({cond}) {{ "));
                    self.lower_decider(scope, sub, result, prefix, out)?;
                }
                out.push_str("} else { ");
                self.lower_decider(scope, fallback, result, prefix, out)?;
                out.push_str("} ");
                Ok(())
            }
        }
    }

    fn lower_test(&mut self, value: &str, test: &Test) -> String {
        match test {
            Test::Ctor { tag, index } => {
                self.shared.ctors.id(*tag);
                format!("(((const fen_custom_t*){value})->ctor == {index}u)")
            }
            Test::Int(i) => format!("(((const fen_int_t*){value})->value == {})", *i as i32),
            Test::Bool(true) => format!("({value} == fen_true)"),
            Test::Bool(false) => format!("({value} == fen_false)"),
            Test::Chr(c) => {
                let lit = self.shared_ref(SharedDef::Chr(*c));
                format!("fen_value_eq({value}, {lit})")
            }
            Test::Str(s) => {
                let lit = self.shared_ref(SharedDef::Str(*s));
                format!("fen_value_eq({value}, {lit})")
            }
            Test::IsCons => format!("(FEN_TAG_OF({value}) == FEN_TAG_CONS)"),
            Test::IsNil => format!("(FEN_TAG_OF({value}) == FEN_TAG_NIL)"),
            Test::IsTuple => format!(
                "(FEN_TAG_OF({value}) == FEN_TAG_TUPLE2 || FEN_TAG_OF({value}) == FEN_TAG_TUPLE3)"
            ),
        }
    }
}
