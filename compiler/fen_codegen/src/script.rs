//! Scripting-target fallback interface.
//!
//! Foreign kernel code, effect managers, and ports are not lowered natively;
//! they are delegated to the external scripting backend through this narrow
//! trait. The core calls it for exactly those node kinds and nothing else.

use fen_ir::{Global, KernelChunk, StringInterner};

use crate::names;

/// Port direction, from the graph node kind.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum PortDirection {
    Incoming,
    Outgoing,
}

/// The external scripting backend, seen from the core.
pub trait ScriptBackend {
    /// A foreign kernel definition: verbatim source chunks interleaved with
    /// references back into generated globals.
    fn kernel(&mut self, interner: &StringInterner, global: &Global, chunks: &[KernelChunk]);

    /// An effect-manager marker.
    fn manager(&mut self, interner: &StringInterner, global: &Global);

    /// A port definition.
    fn port(&mut self, interner: &StringInterner, global: &Global, direction: PortDirection);
}

/// Buffering implementation for tests and simple drivers: splices kernel
/// chunks and records manager/port registrations as plain program text.
#[derive(Debug, Default)]
pub struct ScriptBuffer {
    pub code: String,
}

impl ScriptBuffer {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ScriptBackend for ScriptBuffer {
    fn kernel(&mut self, interner: &StringInterner, _global: &Global, chunks: &[KernelChunk]) {
        for chunk in chunks {
            match chunk {
                KernelChunk::Source(src) => self.code.push_str(interner.lookup(*src)),
                KernelChunk::Ref(target) => {
                    self.code.push_str(&names::global_name(interner, target));
                }
            }
        }
        self.code.push('\n');
    }

    fn manager(&mut self, interner: &StringInterner, global: &Global) {
        let symbol = names::global_name(interner, global);
        self.code.push_str(&format!("registerManager({symbol});\n"));
    }

    fn port(&mut self, interner: &StringInterner, global: &Global, direction: PortDirection) {
        let symbol = names::global_name(interner, global);
        let dir = match direction {
            PortDirection::Incoming => "incoming",
            PortDirection::Outgoing => "outgoing",
        };
        self.code.push_str(&format!("registerPort({symbol}, \"{dir}\");\n"));
    }
}

#[cfg(test)]
mod tests {
    use fen_ir::ModuleName;
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_kernel_chunks_splice_refs() {
        let interner = StringInterner::new();
        let global = Global::new(
            ModuleName(interner.intern("Fen.Kernel.List")),
            interner.intern("sortBy"),
        );
        let target = Global::new(ModuleName(interner.intern("Basics")), interner.intern("compare"));

        let mut buffer = ScriptBuffer::new();
        buffer.kernel(
            &interner,
            &global,
            &[
                KernelChunk::Source(interner.intern("var sortBy = wrap(")),
                KernelChunk::Ref(target),
                KernelChunk::Source(interner.intern(");")),
            ],
        );
        assert_eq!(buffer.code, "var sortBy = wrap(g_Basics__compare);\n");
    }
}
