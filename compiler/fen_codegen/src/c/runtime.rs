//! C Runtime Declarations
//!
//! The fixed prelude of every generated program: value-shape typedefs, tag
//! constants, the two intentionally-unimplemented memory primitives, and the
//! kernel-provided helpers. Nothing here depends on the program being
//! compiled.

use crate::repr::ValueTag;

use super::CWriter;

/// C prelude generator.
pub(crate) struct CRuntime;

impl CRuntime {
    /// Emit the complete prelude: includes, tags, types, externs.
    pub(crate) fn emit_prelude(w: &mut CWriter) {
        w.writeln("#include <stdint.h>");
        w.writeln("#include <stddef.h>");
        w.writeln("#include <math.h>");
        w.newline();

        Self::emit_tags(w);
        Self::emit_types(w);
        Self::emit_externs(w);
    }

    fn emit_tags(w: &mut CWriter) {
        w.writeln("// Value tags. Comparable container types use 0-7 so runtime");
        w.writeln("// equality and ordering dispatch on a single tag read.");
        for tag in ValueTag::ALL {
            w.writeln(&format!("#define {} {}u", tag.const_name(), tag.value()));
        }
        w.writeln("#define FEN_TAG_OF(v) (*(const uint32_t*)(v))");
        w.newline();
    }

    fn emit_types(w: &mut CWriter) {
        w.writeln("typedef struct { uint32_t tag; int32_t value; } fen_int_t;");
        w.writeln("typedef struct { uint32_t tag; double value; } fen_float_t;");
        w.writeln("typedef struct { uint32_t tag; uint32_t codepoint; } fen_char_t;");
        w.writeln("typedef struct { uint32_t tag; uint32_t len; const char* bytes; } fen_string_t;");
        w.writeln("typedef struct { uint32_t tag; void* head; void* tail; } fen_cons_t;");
        w.writeln("typedef struct { uint32_t tag; void* a; void* b; } fen_tuple2_t;");
        w.writeln("typedef struct { uint32_t tag; void* a; void* b; void* c; } fen_tuple3_t;");
        w.writeln("typedef struct { uint32_t tag; uint32_t ctor; uint32_t arity; void* values[]; } fen_custom_t;");
        w.writeln("typedef struct { uint32_t tag; uint32_t size; const uint32_t* fields; } fen_field_group_t;");
        w.writeln("typedef struct { uint32_t tag; const fen_field_group_t* fields; void* values[]; } fen_record_t;");
        w.newline();

        w.writeln("// Closure records carry no tag: the first word is the evaluator");
        w.writeln("// reference, then the packed fill/arity counts, then the slots.");
        w.writeln("typedef struct fen_closure {");
        w.indent();
        w.writeln("uint16_t n_values;");
        w.writeln("uint16_t max_values;");
        w.writeln("void* (*evaluator)(struct fen_closure*);");
        w.writeln("void* values[];");
        w.dedent();
        w.writeln("} fen_closure_t;");
        w.newline();

        w.writeln("#define FEN_CLOSURE_BYTES(n) ((uint32_t)(sizeof(fen_closure_t) + (size_t)(n) * sizeof(void*)))");
        w.writeln("#define FEN_CUSTOM_BYTES(n) ((uint32_t)(sizeof(fen_custom_t) + (size_t)(n) * sizeof(void*)))");
        w.newline();
    }

    fn emit_externs(w: &mut CWriter) {
        w.writeln("// Memory primitives. Declared with a fixed contract and no body:");
        w.writeln("// linking resolves them against the runtime, and a build without");
        w.writeln("// one fails at link time, not at run time.");
        w.writeln("extern void* fen_gc_alloc(uint32_t bytes);");
        w.writeln("extern void* fen_gc_shallow_copy(void* value);");
        w.newline();

        w.writeln("// Kernel-provided helpers and canonical singletons.");
        w.writeln("extern void* const fen_unit;");
        w.writeln("extern void* const fen_true;");
        w.writeln("extern void* const fen_false;");
        w.writeln("extern void* fen_child(void* value, uint32_t index);");
        w.writeln("extern void* fen_record_alloc(const fen_field_group_t* fields);");
        w.writeln("extern void* fen_record_field(void* record, uint32_t field_id);");
        w.writeln("extern void fen_record_set(void* record, uint32_t field_id, void* value);");
        w.writeln("extern void fen_fields_register(const fen_field_group_t* fields);");
        w.writeln("extern int fen_value_eq(const void* a, const void* b);");
        w.writeln("extern void* fen_debug_log(const char* tag, void* value);");
        w.newline();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prelude_declares_memory_primitives() {
        let mut w = CWriter::new();
        CRuntime::emit_prelude(&mut w);
        let out = w.take_output();
        assert!(out.contains("extern void* fen_gc_alloc(uint32_t bytes);"));
        assert!(out.contains("extern void* fen_gc_shallow_copy(void* value);"));
        assert!(out.contains("#define FEN_TAG_INT 4u"));
        assert!(out.contains("#define FEN_TAG_STRING 7u"));
    }
}
