//! Code Generation Backends for Fen
//!
//! Lowers the optimized whole-program graph (`fen_ir`) into one of two
//! low-level targets:
//!
//! 1. **Bytecode** — a linear-memory stack-machine module (WebAssembly-style
//!    text form; the binary encoder is an external output sink)
//! 2. **Native** — C struct/function declarations plus a `main` entry point
//!
//! # Architecture
//!
//! ```text
//! GlobalGraph + roots
//!        ↓
//!     Walker            (depth-first, at-most-once, init order recorded)
//!        ↓ NodeBackend
//! WasmBackend / CBackend  (expression lowering, closure layout, interning)
//!        ↓
//!   GeneratedCode        (serialized program + scripting-target fallback)
//! ```
//!
//! Both backends share the name mapping, scope tracking, closure layout, and
//! shared-literal machinery; only the instruction/statement emission differs.
//! The compilation state lives once per `generate` call inside the chosen
//! backend value and is threaded by exclusive borrow — single writer, no
//! ambient mutability, nothing persists across calls.

// Codegen-specific lint posture: byte offsets and slot counts move between
// u16/u32/usize constantly, and lowering dispatch tables are long by nature.
#![allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_possible_wrap,
    clippy::too_many_lines,
    clippy::missing_panics_doc,
    clippy::missing_errors_doc
)]

pub mod c;
pub mod graph;
pub mod names;
pub mod repr;
pub mod scope;
pub mod script;
pub mod shared;
pub mod wasm;

#[cfg(test)]
mod tests;

use fen_ir::{Global, GlobalGraph, ModuleName, StringInterner};
use thiserror::Error;

pub use graph::{NodeBackend, Walker};
pub use script::{PortDirection, ScriptBackend, ScriptBuffer};

/// Which low-level target to emit.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Target {
    /// Linear-memory stack-machine module.
    Wasm,
    /// Native struct/function declarations.
    C,
}

/// Development builds honor debug-only expression variants; optimized builds
/// strip them.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Mode {
    Dev,
    Prod,
}

/// A fully generated program. Nothing partial: on error, no output.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GeneratedCode {
    pub code: String,
}

/// Fatal generation failures.
///
/// These indicate inconsistent input, not user-facing conditions — earlier
/// compiler stages own diagnostics. Invariant violations inside lowering
/// (a local reference outside every scope, an operand demanded from an empty
/// accumulator) panic instead: they are bugs in an upstream stage.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum CodegenError {
    #[error("global `{0}` is referenced but missing from the program graph")]
    MissingGlobal(String),

    #[error("root module `{0}` has no `main` definition")]
    MissingMain(String),
}

/// Generate a complete program for `target`.
///
/// `roots` lists the modules whose `main` must be reachable; everything not
/// reachable from a root is dead code and never emitted.
pub fn generate(
    interner: &StringInterner,
    graph: &GlobalGraph,
    roots: &[ModuleName],
    target: Target,
    mode: Mode,
    script: &mut dyn ScriptBackend,
) -> Result<GeneratedCode, CodegenError> {
    let main = interner.intern("main");
    let mut mains = Vec::with_capacity(roots.len());
    for &root in roots {
        let global = Global::new(root, main);
        if graph.node(&global).is_none() {
            return Err(CodegenError::MissingMain(interner.lookup(root.0).to_string()));
        }
        mains.push(global);
    }

    match target {
        Target::C => c::generate(interner, graph, &mains, mode, script),
        Target::Wasm => wasm::generate(interner, graph, &mains, mode, script),
    }
}
