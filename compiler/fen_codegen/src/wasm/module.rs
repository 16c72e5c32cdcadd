//! Linear-memory module assembly.
//!
//! Owns everything the traversal grows: the function registry, the function
//! table closures dispatch through, the data segment with its monotonically
//! increasing offset cursor, imports, and mutable cell globals. Serialized
//! once at the end as module text.

use std::fmt::Write as _;

use super::instr::Instr;

/// One defined function.
#[derive(Debug)]
pub struct WasmFunc {
    pub name: String,
    /// Parameter names; every parameter and result is i32.
    pub params: Vec<String>,
    pub result: bool,
    pub locals: Vec<String>,
    pub body: Vec<Instr>,
    /// Whether the function uses the shared evaluator type (so it can be
    /// called through the table).
    pub evaluator: bool,
    pub export: Option<String>,
}

/// One data segment: literal payload bytes at a fixed offset.
#[derive(Debug)]
pub struct DataSegment {
    pub offset: u32,
    pub bytes: Vec<u8>,
}

/// An imported function signature.
#[derive(Debug)]
struct ImportFunc {
    name: &'static str,
    params: u32,
    result: bool,
}

/// The growing module.
#[derive(Debug)]
pub struct WasmModule {
    funcs: Vec<WasmFunc>,
    table: Vec<String>,
    data: Vec<DataSegment>,
    cursor: u32,
    /// Mutable i32 cells, zero-initialized.
    globals: Vec<String>,
    /// Imported immutable i32 globals, as (module, field, symbol).
    global_imports: Vec<(&'static str, String, String)>,
}

/// Fixed runtime imports: the memory primitives plus the kernel helpers the
/// lowering calls into.
const RUNTIME_FUNCS: &[ImportFunc] = &[
    ImportFunc { name: "alloc", params: 1, result: true },
    ImportFunc { name: "shallow_copy", params: 1, result: true },
    ImportFunc { name: "child", params: 2, result: true },
    ImportFunc { name: "record_alloc", params: 1, result: true },
    ImportFunc { name: "record_field", params: 2, result: true },
    ImportFunc { name: "record_set", params: 3, result: false },
    ImportFunc { name: "fields_register", params: 1, result: false },
    ImportFunc { name: "value_eq", params: 2, result: true },
    ImportFunc { name: "debug_log", params: 2, result: true },
];

const RUNTIME_GLOBALS: &[&str] = &["unit", "true", "false", "nil"];

impl WasmModule {
    pub fn new() -> Self {
        WasmModule {
            funcs: Vec::new(),
            table: Vec::new(),
            data: Vec::new(),
            // Offset 0 is reserved so a zero word always means "no value"
            // (cycle cells test against it).
            cursor: 8,
            globals: Vec::new(),
            global_imports: Vec::new(),
        }
    }

    /// Append a literal payload, returning its address. The cursor stays
    /// 4-byte aligned.
    pub fn add_data(&mut self, bytes: Vec<u8>) -> u32 {
        let offset = self.cursor;
        let len = bytes.len() as u32;
        self.data.push(DataSegment { offset, bytes });
        self.cursor += (len + 3) & !3;
        offset
    }

    /// Register a function in the call table, returning its index.
    pub fn add_table_entry(&mut self, func: String) -> u32 {
        let index = self.table.len() as u32;
        self.table.push(func);
        index
    }

    pub fn add_func(&mut self, func: WasmFunc) {
        self.funcs.push(func);
    }

    /// Declare a mutable, zero-initialized cell.
    pub fn add_global(&mut self, name: String) {
        self.globals.push(name);
    }

    /// Import an immutable i32 global (kernel values, script-owned cells).
    pub fn import_global(&mut self, module: &'static str, field: String, symbol: String) {
        if self.global_imports.iter().any(|(_, _, s)| *s == symbol) {
            return;
        }
        self.global_imports.push((module, field, symbol));
    }

    /// First address past the static data (the runtime heap starts here).
    pub fn heap_base(&self) -> u32 {
        self.cursor
    }

    /// Serialize the whole module as text.
    pub fn to_wat(&self, header_comments: &[String]) -> String {
        let mut out = String::with_capacity(4096);
        for line in header_comments {
            let _ = writeln!(out, ";; {line}");
        }
        out.push_str("(module\n");
        out.push_str("  (type $evalfn (func (param i32) (result i32)))\n");

        for import in RUNTIME_FUNCS {
            let params = "(param i32) ".repeat(import.params as usize).trim_end().to_string();
            let result = if import.result { " (result i32)" } else { "" };
            let _ = writeln!(
                out,
                "  (import \"fen\" \"{0}\" (func $fen_{0} {1}{2}))",
                import.name, params, result
            );
        }
        for name in RUNTIME_GLOBALS {
            let _ = writeln!(out, "  (import \"fen\" \"{name}\" (global $fen_{name} i32))");
        }
        for (module, field, symbol) in &self.global_imports {
            let _ = writeln!(out, "  (import \"{module}\" \"{field}\" (global ${symbol} i32))");
        }

        let pages = (u64::from(self.cursor) + 0xFFFF) / 0x1_0000;
        let _ = writeln!(out, "  (memory (export \"memory\") {})", pages.max(1));

        let _ = writeln!(out, "  (table (export \"table\") {} funcref)", self.table.len());
        if !self.table.is_empty() {
            let entries: Vec<String> = self.table.iter().map(|f| format!("${f}")).collect();
            let _ = writeln!(out, "  (elem (i32.const 0) {})", entries.join(" "));
        }

        for name in &self.globals {
            let _ = writeln!(out, "  (global ${name} (mut i32) (i32.const 0))");
        }
        let _ = writeln!(
            out,
            "  (global $heap_base (export \"heap_base\") i32 (i32.const {}))",
            self.heap_base()
        );

        for segment in &self.data {
            let _ = writeln!(
                out,
                "  (data (i32.const {}) \"{}\")",
                segment.offset,
                escape_bytes(&segment.bytes)
            );
        }

        for func in &self.funcs {
            let _ = write!(out, "  (func ${}", func.name);
            if let Some(export) = &func.export {
                let _ = write!(out, " (export \"{export}\")");
            }
            if func.evaluator {
                let _ = write!(out, " (type $evalfn)");
            }
            for param in &func.params {
                let _ = write!(out, " (param ${param} i32)");
            }
            if func.result {
                let _ = write!(out, " (result i32)");
            }
            out.push('\n');
            for local in &func.locals {
                let _ = writeln!(out, "    (local ${local} i32)");
            }
            for instr in &func.body {
                instr.push_wat(&mut out, 2);
            }
            out.push_str("  )\n");
        }

        out.push_str(")\n");
        out
    }
}

impl Default for WasmModule {
    fn default() -> Self {
        Self::new()
    }
}

/// Escape data-segment bytes for the textual form: printable ASCII stays
/// raw, but control characters, backslash, double quote, and non-ASCII
/// bytes become `\hh` hex escapes.
pub fn escape_bytes(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len());
    for &b in bytes {
        match b {
            b'\\' => out.push_str("\\\\"),
            b'"' => out.push_str("\\\""),
            0x20..=0x7E => out.push(b as char),
            _ => { let _ = write!(out, "\\{b:02x}"); }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_data_cursor_stays_aligned() {
        let mut module = WasmModule::new();
        let a = module.add_data(vec![1, 2, 3, 4, 5]); // 5 bytes, padded to 8
        let b = module.add_data(vec![9]);
        assert_eq!(a, 8);
        assert_eq!(b, 16);
        assert_eq!(module.heap_base(), 20);
    }

    #[test]
    fn test_escape_bytes() {
        assert_eq!(escape_bytes(b"abc"), "abc");
        assert_eq!(escape_bytes(&[0x00, 0x07]), "\\00\\07");
        assert_eq!(escape_bytes(b"a\"b\\c"), "a\\\"b\\\\c");
        assert_eq!(escape_bytes(&[0xFF]), "\\ff");
    }

    #[test]
    fn test_table_indices_are_dense() {
        let mut module = WasmModule::new();
        assert_eq!(module.add_table_entry("ev_0".to_string()), 0);
        assert_eq!(module.add_table_entry("ev_1".to_string()), 1);
    }

    #[test]
    fn test_serialized_module_shape() {
        let mut module = WasmModule::new();
        module.add_global("g_Main__main".to_string());
        module.add_func(WasmFunc {
            name: "init_g_Main__main".to_string(),
            params: vec![],
            result: true,
            locals: vec![],
            body: vec![Instr::I32Const(0)],
            evaluator: false,
            export: None,
        });
        let wat = module.to_wat(&[]);
        assert!(wat.contains("(import \"fen\" \"alloc\" (func $fen_alloc (param i32) (result i32)))"));
        assert!(wat.contains("(global $g_Main__main (mut i32) (i32.const 0))"));
        assert!(wat.contains("(func $init_g_Main__main (result i32)"));
    }
}
