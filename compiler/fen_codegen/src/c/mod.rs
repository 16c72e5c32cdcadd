//! Native C target.
//!
//! Lowers the global graph to one translation unit: runtime typedefs, the
//! integer-tag tables, one declaration per shared literal, one cell plus
//! initializer per lowered global, and a `main` that runs every initializer
//! in dependency order.
//!
//! Expressions lower to C expression strings; binding and branching forms
//! use GNU statement expressions so lowering stays a single recursive pass
//! with no statement hoisting.

mod expr;
mod runtime;

use fen_ir::{Def, Expr, Global, GlobalGraph, KernelChunk, Name, StringInterner};
use rustc_hash::FxHashSet;
use tracing::debug;

use crate::graph::{NodeBackend, Walker};
use crate::repr::ValueTag;
use crate::scope::Scope;
use crate::script::{PortDirection, ScriptBackend};
use crate::shared::{SharedDef, SharedDefs};
use crate::{names, CodegenError, GeneratedCode, Mode};

use runtime::CRuntime;

/// Generate the C program for `mains` and everything reachable from them.
pub fn generate(
    interner: &StringInterner,
    graph: &GlobalGraph,
    mains: &[Global],
    mode: Mode,
    script: &mut dyn ScriptBackend,
) -> Result<GeneratedCode, CodegenError> {
    let mut backend = CBackend::new(interner, mode, script);
    backend.shared.seed_fields(interner, &graph.field_frequencies);

    let mut walker = Walker::new(graph, interner);
    for &main in mains {
        walker.add_global(&mut backend, main)?;
    }
    let order = walker.into_order();
    debug!(globals = order.len(), "assembling C output");
    Ok(GeneratedCode {
        code: backend.assemble(&order),
    })
}

/// Output buffer with indentation bookkeeping.
pub(crate) struct CWriter {
    out: String,
    indent: usize,
}

impl CWriter {
    pub(crate) fn new() -> Self {
        CWriter {
            out: String::with_capacity(4096),
            indent: 0,
        }
    }

    pub(crate) fn indent(&mut self) {
        self.indent += 1;
    }

    pub(crate) fn dedent(&mut self) {
        debug_assert!(self.indent > 0, "dedent called with zero indent");
        self.indent = self.indent.saturating_sub(1);
    }

    pub(crate) fn writeln(&mut self, s: &str) {
        for _ in 0..self.indent {
            self.out.push_str("    ");
        }
        self.out.push_str(s);
        self.out.push('\n');
    }

    pub(crate) fn newline(&mut self) {
        self.out.push('\n');
    }

    pub(crate) fn write_raw(&mut self, s: &str) {
        self.out.push_str(s);
    }

    pub(crate) fn take_output(&mut self) -> String {
        std::mem::take(&mut self.out)
    }
}

/// The C compilation state, threaded through one whole traversal.
pub(crate) struct CBackend<'a> {
    pub(crate) interner: &'a StringInterner,
    pub(crate) mode: Mode,
    script: &'a mut dyn ScriptBackend,
    pub(crate) shared: SharedDefs,
    /// Cells owned by the scripting side, referenced from here.
    extern_cells: String,
    /// Cell definitions and cycle-thunk forward declarations.
    fwd: String,
    /// Evaluators, thunks, and initializers, in emission order.
    pub(crate) defs: String,
    /// Globals that contributed an initializer.
    inits: FxHashSet<Global>,
    ev_counter: u32,
    tmp_counter: u32,
}

impl<'a> CBackend<'a> {
    fn new(interner: &'a StringInterner, mode: Mode, script: &'a mut dyn ScriptBackend) -> Self {
        CBackend {
            interner,
            mode,
            script,
            shared: SharedDefs::new(),
            extern_cells: String::new(),
            fwd: String::new(),
            defs: String::new(),
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

    fn cycle_thunk(&self, global: &Global) -> String {
        names::cycle_name(self.interner, global)
    }

    /// Emit cell + initializer for one lowered top-level value.
    fn emit_value_global(&mut self, global: &Global, value_code: &str) {
        let sym = names::global_name(self.interner, global);
        let init = names::init_name(self.interner, global);
        self.fwd.push_str(&format!("void* {sym};\n"));
        self.defs.push_str(&format!(
            "static int {init}(void) {{\n    {sym} = {value_code};\n    return {sym} == NULL;\n}}\n\n"
        ));
        self.inits.insert(*global);
    }

    fn emit_ctor_like(&mut self, global: &Global, index: u32, arity: u32) {
        self.shared.ctors.id(global.name);
        let sym = names::global_name(self.interner, global);
        if arity == 0 {
            self.defs.push_str(&format!(
                "static const fen_custom_t cv_{sym} = {{ FEN_TAG_CUSTOM, {index}u, 0u }};\n\n"
            ));
            self.emit_value_global(global, &format!("(void*)&cv_{sym}"));
            return;
        }

        // Constructors are closures: applying all arguments allocates the
        // tagged value.
        let mut f = format!("static void* ev_ctor_{sym}(fen_closure_t* c) {{\n");
        f.push_str(&format!(
            "    fen_custom_t* v = (fen_custom_t*)fen_gc_alloc(FEN_CUSTOM_BYTES({arity}));\n"
        ));
        f.push_str(&format!(
            "    v->tag = FEN_TAG_CUSTOM;\n    v->ctor = {index}u;\n    v->arity = {arity}u;\n"
        ));
        for i in 0..arity {
            f.push_str(&format!("    v->values[{i}] = c->values[{i}];\n"));
        }
        f.push_str("    return (void*)v;\n}\n");
        f.push_str(&format!(
            "static fen_closure_t cv_{sym} = {{ 0, {arity}, &ev_ctor_{sym} }};\n\n"
        ));
        self.defs.push_str(&f);
        self.emit_value_global(global, &format!("(void*)&cv_{sym}"));
    }

    fn emit_tables(&self, w: &mut CWriter) {
        if !self.shared.fields.is_empty() {
            w.writeln("// Record field ids, most-frequent first.");
            w.writeln("enum {");
            w.indent();
            for (id, name) in self.shared.fields.iter() {
                w.writeln(&format!("{} = {id},", names::field_const(self.interner, name)));
            }
            w.dedent();
            w.writeln("};");
            w.newline();
        }
        if !self.shared.ctors.is_empty() {
            w.writeln("// Constructor tag names.");
            w.writeln("enum {");
            w.indent();
            for (id, name) in self.shared.ctors.iter() {
                w.writeln(&format!("{} = {id},", names::ctor_const(self.interner, name)));
            }
            w.dedent();
            w.writeln("};");
            w.newline();
        }
        let kernels: Vec<_> = self.shared.kernels().collect();
        if !kernels.is_empty() {
            w.writeln("// Foreign kernel value ids.");
            w.writeln("enum {");
            w.indent();
            for (id, global) in kernels {
                w.writeln(&format!("{} = {id},", names::kernel_const(self.interner, global)));
            }
            w.dedent();
            w.writeln("};");
            w.newline();
        }
    }

    fn emit_shared(&self, w: &mut CWriter) {
        for (id, def) in self.shared.iter() {
            let sym = self.shared.symbol(self.interner, id, def);
            match def {
                SharedDef::Int(i) => {
                    w.writeln(&format!(
                        "static const fen_int_t {sym} = {{ FEN_TAG_INT, {} }};",
                        *i as i32
                    ));
                }
                SharedDef::Float(bits) => {
                    w.writeln(&format!(
                        "static const fen_float_t {sym} = {{ FEN_TAG_FLOAT, {} }};",
                        format_double(*bits)
                    ));
                }
                SharedDef::Chr(content) => {
                    let codepoint = self
                        .interner
                        .lookup(*content)
                        .chars()
                        .next()
                        .map_or(0, u32::from);
                    w.writeln(&format!(
                        "static const fen_char_t {sym} = {{ FEN_TAG_CHAR, {codepoint}u }};"
                    ));
                }
                SharedDef::Str(content) => {
                    let text = self.interner.lookup(*content);
                    w.writeln(&format!(
                        "static const fen_string_t {sym} = {{ FEN_TAG_STRING, {}u, \"{}\" }};",
                        text.len(),
                        c_escape(text)
                    ));
                }
                SharedDef::FieldGroup(fields) => {
                    let ids: Vec<String> = fields
                        .iter()
                        .map(|&f| names::field_const(self.interner, f))
                        .collect();
                    w.writeln(&format!(
                        "static const uint32_t {sym}_ids[] = {{ {} }};",
                        ids.join(", ")
                    ));
                    w.writeln(&format!(
                        "static const fen_field_group_t {sym} = {{ {}, {}u, {sym}_ids }};",
                        ValueTag::FieldGroup.const_name(),
                        fields.len()
                    ));
                }
                SharedDef::Accessor(field) => {
                    let field_id = names::field_const(self.interner, *field);
                    w.writeln(&format!("static void* ev_{sym}(fen_closure_t* c) {{"));
                    w.indent();
                    w.writeln(&format!("return fen_record_field(c->values[0], {field_id});"));
                    w.dedent();
                    w.writeln("}");
                    w.writeln(&format!("static fen_closure_t {sym} = {{ 0, 1, &ev_{sym} }};"));
                }
                SharedDef::ForeignThunk(global) => {
                    w.writeln(&format!(
                        "extern void* {};",
                        names::kernel_name(self.interner, global)
                    ));
                }
            }
        }
        if !self.shared.is_empty() {
            w.newline();
        }
    }

    fn emit_main(&self, w: &mut CWriter, order: &[Global]) {
        w.writeln("int main(void) {");
        w.indent();
        let has_inits = order.iter().any(|g| self.inits.contains(g));
        if has_inits {
            w.writeln("int status;");
            for global in order {
                if self.inits.contains(global) {
                    let init = names::init_name(self.interner, global);
                    w.writeln(&format!("if ((status = {init}())) {{ return status; }}"));
                }
            }
        }
        for (id, def) in self.shared.iter() {
            if matches!(def, SharedDef::FieldGroup(_)) {
                let sym = self.shared.symbol(self.interner, id, def);
                w.writeln(&format!("fen_fields_register(&{sym});"));
            }
        }
        w.writeln("return 0;");
        w.dedent();
        w.writeln("}");
    }

    fn assemble(&mut self, order: &[Global]) -> String {
        let mut w = CWriter::new();
        CRuntime::emit_prelude(&mut w);
        self.emit_tables(&mut w);
        self.emit_shared(&mut w);
        w.write_raw(&self.extern_cells);
        w.write_raw(&self.fwd);
        w.newline();
        w.write_raw(&self.defs);
        self.emit_main(&mut w, order);
        w.take_output()
    }
}

impl NodeBackend for CBackend<'_> {
    fn define(&mut self, global: &Global, expr: &Expr) -> Result<(), CodegenError> {
        let mut scope = Scope::top_level();
        let code = self.lower_expr(&mut scope, expr)?;
        assert!(
            scope.captured().is_empty(),
            "local variable referenced outside any scope while lowering a top-level value"
        );
        self.emit_value_global(global, &code);
        Ok(())
    }

    fn define_tail_func(
        &mut self,
        global: &Global,
        params: &[Name],
        expr: &Expr,
    ) -> Result<(), CodegenError> {
        let (construction, inner) = self.emit_evaluator(params, expr, true)?;
        assert!(
            inner.captured().is_empty(),
            "top-level tail function captured a local"
        );
        self.emit_value_global(global, &construction);
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
        self.emit_value_global(global, &target_sym);
        Ok(())
    }

    fn cycle(
        &mut self,
        global: &Global,
        names_: &[Name],
        values: &[(Name, Expr)],
        functions: &[Def],
    ) -> Result<(), CodegenError> {
        // Every member gets a pre-declared lazy thunk; references through
        // VarCycle always call the thunk, so first use during mutual
        // recursion initializes on demand.
        for &name in names_ {
            let member = Global::new(global.home, name);
            let thunk = self.cycle_thunk(&member);
            self.fwd
                .push_str(&format!("static void* {thunk}_cell;\nstatic void* {thunk}(void);\n"));
        }

        let emit_thunk = |backend: &mut Self, name: Name, code: String| {
            let member = Global::new(global.home, name);
            let thunk = backend.cycle_thunk(&member);
            backend.defs.push_str(&format!(
                "static void* {thunk}(void) {{\n    if ({thunk}_cell == NULL) {{\n        {thunk}_cell = {code};\n    }}\n    return {thunk}_cell;\n}}\n\n"
            ));
        };

        for (name, expr) in values {
            let mut scope = Scope::top_level();
            let code = self.lower_expr(&mut scope, expr)?;
            assert!(
                scope.captured().is_empty(),
                "cyclic value captured a local"
            );
            emit_thunk(self, *name, code);
        }
        for def in functions {
            match def {
                Def::Value { name, expr } => {
                    let mut scope = Scope::top_level();
                    let code = self.lower_expr(&mut scope, expr)?;
                    assert!(scope.captured().is_empty(), "cyclic value captured a local");
                    emit_thunk(self, *name, code);
                }
                Def::TailFunc { name, params, expr } => {
                    let (construction, inner) = self.emit_evaluator(params, expr, true)?;
                    assert!(
                        inner.captured().is_empty(),
                        "cyclic tail function captured a local"
                    );
                    emit_thunk(self, *name, construction);
                }
            }
        }

        // The cycle's initializer forces every member at its slot in the
        // recorded order, so startup evaluation order stays well-defined.
        let init = names::init_name(self.interner, global);
        let mut body = String::new();
        for &name in names_ {
            let member = Global::new(global.home, name);
            body.push_str(&format!("    {}();\n", self.cycle_thunk(&member)));
        }
        self.defs
            .push_str(&format!("static int {init}(void) {{\n{body}    return 0;\n}}\n\n"));
        self.inits.insert(*global);
        Ok(())
    }

    fn kernel(&mut self, global: &Global, chunks: &[KernelChunk]) -> Result<(), CodegenError> {
        self.script.kernel(self.interner, global, chunks);
        Ok(())
    }

    fn manager(&mut self, global: &Global) -> Result<(), CodegenError> {
        let sym = names::global_name(self.interner, global);
        self.extern_cells.push_str(&format!("extern void* {sym};\n"));
        self.script.manager(self.interner, global);
        Ok(())
    }

    fn port(&mut self, global: &Global, direction: PortDirection) -> Result<(), CodegenError> {
        let sym = names::global_name(self.interner, global);
        self.extern_cells.push_str(&format!("extern void* {sym};\n"));
        self.script.port(self.interner, global, direction);
        Ok(())
    }
}

/// Escape a string for a C string literal. Control characters use 3-digit
/// octal escapes so a following digit can never extend the escape.
pub(crate) fn c_escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if (c as u32) < 0x20 => out.push_str(&format!("\\{:03o}", c as u32)),
            c => out.push(c),
        }
    }
    out
}

/// Spell a double from its bit pattern, preserving value exactly.
pub(crate) fn format_double(bits: u64) -> String {
    let f = f64::from_bits(bits);
    if f.is_nan() {
        "NAN".to_string()
    } else if f.is_infinite() {
        if f.is_sign_positive() { "INFINITY" } else { "-INFINITY" }.to_string()
    } else {
        format!("{f:?}")
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_c_escape() {
        assert_eq!(c_escape("plain"), "plain");
        assert_eq!(c_escape("say \"hi\"\n"), "say \\\"hi\\\"\\n");
        assert_eq!(c_escape("\u{1}x"), "\\001x");
        assert_eq!(c_escape("back\\slash"), "back\\\\slash");
    }

    #[test]
    fn test_format_double() {
        assert_eq!(format_double(1.5f64.to_bits()), "1.5");
        assert_eq!(format_double(f64::NAN.to_bits()), "NAN");
        assert_eq!(format_double(f64::NEG_INFINITY.to_bits()), "-INFINITY");
    }
}
