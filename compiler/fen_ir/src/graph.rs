//! Whole-program global graph.
//!
//! The input to code generation: a mapping from `(module, name)` to the node
//! defining it, plus the field-access frequency map used for field-id
//! assignment ordering. The graph is read-only during generation; many
//! recursive lowering calls read from it, none mutate it.

use rustc_hash::{FxHashMap, FxHashSet};

use crate::expr::{Def, Expr, KernelChunk};
use crate::Name;

/// A dotted module path (`Main`, `Data.List`), interned as one string.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct ModuleName(pub Name);

/// Identity of one top-level definition.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Global {
    pub home: ModuleName,
    pub name: Name,
}

impl Global {
    pub const fn new(home: ModuleName, name: Name) -> Self {
        Global { home, name }
    }
}

/// One node of the global graph.
///
/// The dependency relation may contain cycles (mutual recursion); those
/// arrive pre-grouped as [`Node::Cycle`], which backends must lower through
/// one level of runtime indirection instead of an eager initialization order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Node {
    Define {
        expr: Box<Expr>,
        deps: FxHashSet<Global>,
    },
    /// Top-level tail-recursive function; self-calls in `expr` appear as
    /// [`Expr::TailCall`].
    DefineTailFunc {
        params: Vec<Name>,
        expr: Box<Expr>,
        deps: FxHashSet<Global>,
    },
    /// Custom-type constructor with its runtime discriminant and arity.
    Ctor { index: u32, arity: u32 },
    /// Nullary constructor of an enumeration-only custom type.
    Enum { index: u32 },
    /// Single-field wrapper constructor.
    Box,
    /// Alias for another global.
    Link { target: Global },
    /// Mutually-recursive definition group: plain values plus the functions
    /// that close the cycle.
    Cycle {
        names: Vec<Name>,
        values: Vec<(Name, Expr)>,
        functions: Vec<Def>,
        deps: FxHashSet<Global>,
    },
    /// Effect-manager marker; lowered by the scripting backend only.
    Manager,
    /// Foreign kernel definition; lowered by the scripting backend only.
    Kernel {
        chunks: Vec<KernelChunk>,
        deps: FxHashSet<Global>,
    },
    PortIncoming { deps: FxHashSet<Global> },
    PortOutgoing { deps: FxHashSet<Global> },
}

/// The whole-program graph handed to `generate`.
#[derive(Debug, Default)]
pub struct GlobalGraph {
    pub nodes: FxHashMap<Global, Node>,
    /// How often each record field is accessed anywhere in the program.
    /// Consulted only to order field-id assignment (stability, not
    /// semantics).
    pub field_frequencies: FxHashMap<Name, u32>,
}

impl GlobalGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up the node defining `global`, if present.
    pub fn node(&self, global: &Global) -> Option<&Node> {
        self.nodes.get(global)
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_graph_lookup() {
        let mut graph = GlobalGraph::new();
        let global = Global::new(ModuleName(Name::from_raw(1)), Name::from_raw(2));
        graph.nodes.insert(global, Node::Enum { index: 3 });

        assert_eq!(graph.node(&global), Some(&Node::Enum { index: 3 }));
        let other = Global::new(ModuleName(Name::from_raw(1)), Name::from_raw(9));
        assert_eq!(graph.node(&other), None);
    }

    #[test]
    fn test_global_identity() {
        let a = Global::new(ModuleName(Name::from_raw(1)), Name::from_raw(2));
        let b = Global::new(ModuleName(Name::from_raw(1)), Name::from_raw(2));
        assert_eq!(a, b);
    }
}
