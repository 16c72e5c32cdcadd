//! Global dependency graph traversal.
//!
//! A one-time, order-preserving depth-first walk over the whole-program
//! graph: dependencies are walked before the depender's own code is emitted,
//! every reachable global is emitted at most once, and the resulting linear
//! order is a valid initialization order. Cycles terminate because a global
//! is marked visited *before* its dependencies are expanded; the runtime
//! indirection for mutually-recursive groups is the backend's job.
//!
//! Node kinds route through [`NodeBackend`] — one lowering contract, two
//! target implementations sharing the layout/name/shared-table machinery.

use fen_ir::{Def, Expr, Global, GlobalGraph, KernelChunk, Name, Node, StringInterner};
use rustc_hash::FxHashSet;
use tracing::trace;

use crate::script::PortDirection;
use crate::CodegenError;

/// Target-specific lowering of each node kind.
pub trait NodeBackend {
    fn define(&mut self, global: &Global, expr: &Expr) -> Result<(), CodegenError>;

    fn define_tail_func(
        &mut self,
        global: &Global,
        params: &[Name],
        expr: &Expr,
    ) -> Result<(), CodegenError>;

    fn ctor(&mut self, global: &Global, index: u32, arity: u32) -> Result<(), CodegenError>;

    fn enum_tag(&mut self, global: &Global, index: u32) -> Result<(), CodegenError>;

    fn boxed(&mut self, global: &Global) -> Result<(), CodegenError>;

    fn link(&mut self, global: &Global, target: &Global) -> Result<(), CodegenError>;

    fn cycle(
        &mut self,
        global: &Global,
        names: &[Name],
        values: &[(Name, Expr)],
        functions: &[Def],
    ) -> Result<(), CodegenError>;

    fn kernel(&mut self, global: &Global, chunks: &[KernelChunk]) -> Result<(), CodegenError>;

    fn manager(&mut self, global: &Global) -> Result<(), CodegenError>;

    fn port(&mut self, global: &Global, direction: PortDirection) -> Result<(), CodegenError>;
}

/// The traversal state: visited set plus recorded emission order.
pub struct Walker<'a> {
    graph: &'a GlobalGraph,
    interner: &'a StringInterner,
    visited: FxHashSet<Global>,
    order: Vec<Global>,
}

impl<'a> Walker<'a> {
    pub fn new(graph: &'a GlobalGraph, interner: &'a StringInterner) -> Self {
        Walker {
            graph,
            interner,
            visited: FxHashSet::default(),
            order: Vec::new(),
        }
    }

    /// Emit `global` and everything it depends on, exactly once each.
    pub fn add_global<B: NodeBackend>(
        &mut self,
        backend: &mut B,
        global: Global,
    ) -> Result<(), CodegenError> {
        if !self.visited.insert(global) {
            return Ok(());
        }

        let node = self.graph.node(&global).ok_or_else(|| {
            CodegenError::MissingGlobal(self.pretty(&global))
        })?;

        // Dependencies first, in a deterministic (lexicographic) order so
        // the recorded initialization order is reproducible.
        for dep in self.sorted_deps(node) {
            self.add_global(backend, dep)?;
        }

        trace!(global = %self.pretty(&global), "emitting global");

        match node {
            Node::Define { expr, .. } => backend.define(&global, expr)?,
            Node::DefineTailFunc { params, expr, .. } => {
                backend.define_tail_func(&global, params, expr)?;
            }
            Node::Ctor { index, arity } => backend.ctor(&global, *index, *arity)?,
            Node::Enum { index } => backend.enum_tag(&global, *index)?,
            Node::Box => backend.boxed(&global)?,
            Node::Link { target } => backend.link(&global, target)?,
            Node::Cycle {
                names,
                values,
                functions,
                ..
            } => backend.cycle(&global, names, values, functions)?,
            Node::Kernel { chunks, .. } => backend.kernel(&global, chunks)?,
            Node::Manager => backend.manager(&global)?,
            Node::PortIncoming { .. } => backend.port(&global, PortDirection::Incoming)?,
            Node::PortOutgoing { .. } => backend.port(&global, PortDirection::Outgoing)?,
        }

        self.order.push(global);
        Ok(())
    }

    fn sorted_deps(&self, node: &Node) -> Vec<Global> {
        let deps = match node {
            Node::Define { deps, .. }
            | Node::DefineTailFunc { deps, .. }
            | Node::Cycle { deps, .. }
            | Node::Kernel { deps, .. }
            | Node::PortIncoming { deps }
            | Node::PortOutgoing { deps } => deps,
            // A link depends on exactly its target.
            Node::Link { target } => return vec![*target],
            Node::Ctor { .. } | Node::Enum { .. } | Node::Box | Node::Manager => return Vec::new(),
        };
        let mut sorted: Vec<Global> = deps.iter().copied().collect();
        sorted.sort_by_key(|g| {
            (
                self.interner.lookup(g.home.0),
                self.interner.lookup(g.name),
            )
        });
        sorted
    }

    fn pretty(&self, global: &Global) -> String {
        format!(
            "{}.{}",
            self.interner.lookup(global.home.0),
            self.interner.lookup(global.name)
        )
    }

    /// The recorded dependency-respecting emission order.
    pub fn into_order(self) -> Vec<Global> {
        self.order
    }
}

#[cfg(test)]
mod tests {
    use fen_ir::ModuleName;
    use pretty_assertions::assert_eq;
    use rustc_hash::FxHashSet;

    use super::*;

    /// Backend that just records the hooks it sees.
    #[derive(Default)]
    struct Recorder {
        seen: Vec<Global>,
    }

    impl NodeBackend for Recorder {
        fn define(&mut self, global: &Global, _expr: &Expr) -> Result<(), CodegenError> {
            self.seen.push(*global);
            Ok(())
        }
        fn define_tail_func(
            &mut self,
            global: &Global,
            _params: &[Name],
            _expr: &Expr,
        ) -> Result<(), CodegenError> {
            self.seen.push(*global);
            Ok(())
        }
        fn ctor(&mut self, global: &Global, _index: u32, _arity: u32) -> Result<(), CodegenError> {
            self.seen.push(*global);
            Ok(())
        }
        fn enum_tag(&mut self, global: &Global, _index: u32) -> Result<(), CodegenError> {
            self.seen.push(*global);
            Ok(())
        }
        fn boxed(&mut self, global: &Global) -> Result<(), CodegenError> {
            self.seen.push(*global);
            Ok(())
        }
        fn link(&mut self, global: &Global, _target: &Global) -> Result<(), CodegenError> {
            self.seen.push(*global);
            Ok(())
        }
        fn cycle(
            &mut self,
            global: &Global,
            _names: &[Name],
            _values: &[(Name, Expr)],
            _functions: &[Def],
        ) -> Result<(), CodegenError> {
            self.seen.push(*global);
            Ok(())
        }
        fn kernel(&mut self, global: &Global, _chunks: &[KernelChunk]) -> Result<(), CodegenError> {
            self.seen.push(*global);
            Ok(())
        }
        fn manager(&mut self, global: &Global) -> Result<(), CodegenError> {
            self.seen.push(*global);
            Ok(())
        }
        fn port(&mut self, global: &Global, _direction: PortDirection) -> Result<(), CodegenError> {
            self.seen.push(*global);
            Ok(())
        }
    }

    fn global(interner: &StringInterner, module: &str, name: &str) -> Global {
        Global::new(ModuleName(interner.intern(module)), interner.intern(name))
    }

    fn define(expr: Expr, deps: &[Global]) -> Node {
        Node::Define {
            expr: Box::new(expr),
            deps: deps.iter().copied().collect(),
        }
    }

    #[test]
    fn test_at_most_once_emission() {
        let interner = StringInterner::new();
        let shared = global(&interner, "Util", "shared");
        let a = global(&interner, "Main", "a");
        let b = global(&interner, "Main", "b");
        let main = global(&interner, "Main", "main");

        let mut graph = GlobalGraph::new();
        graph.nodes.insert(shared, define(Expr::Int(1), &[]));
        graph.nodes.insert(a, define(Expr::VarGlobal(shared), &[shared]));
        graph.nodes.insert(b, define(Expr::VarGlobal(shared), &[shared]));
        graph.nodes.insert(main, define(Expr::Unit, &[a, b]));

        let mut walker = Walker::new(&graph, &interner);
        let mut backend = Recorder::default();
        walker.add_global(&mut backend, main).unwrap();

        // `shared` is reached through both a and b but emitted once.
        assert_eq!(backend.seen.iter().filter(|g| **g == shared).count(), 1);
        assert_eq!(backend.seen.len(), 4);
    }

    #[test]
    fn test_dependencies_precede_dependers() {
        let interner = StringInterner::new();
        let dep = global(&interner, "Basics", "add");
        let main = global(&interner, "Main", "main");

        let mut graph = GlobalGraph::new();
        graph.nodes.insert(dep, define(Expr::Int(0), &[]));
        graph.nodes.insert(main, define(Expr::VarGlobal(dep), &[dep]));

        let mut walker = Walker::new(&graph, &interner);
        let mut backend = Recorder::default();
        walker.add_global(&mut backend, main).unwrap();

        let order = walker.into_order();
        assert_eq!(order, vec![dep, main]);
    }

    #[test]
    fn test_self_cycle_terminates() {
        let interner = StringInterner::new();
        let looped = global(&interner, "Main", "tick");
        let main = global(&interner, "Main", "main");

        let mut deps = FxHashSet::default();
        deps.insert(looped); // the cycle depends on itself
        let mut graph = GlobalGraph::new();
        graph.nodes.insert(
            looped,
            Node::Cycle {
                names: vec![interner.intern("tick")],
                values: vec![],
                functions: vec![],
                deps,
            },
        );
        graph.nodes.insert(main, define(Expr::VarCycle(looped), &[looped]));

        let mut walker = Walker::new(&graph, &interner);
        let mut backend = Recorder::default();
        walker.add_global(&mut backend, main).unwrap();
        assert_eq!(walker.into_order(), vec![looped, main]);
    }

    #[test]
    fn test_missing_dependency_aborts() {
        let interner = StringInterner::new();
        let ghost = global(&interner, "Gone", "ghost");
        let main = global(&interner, "Main", "main");

        let mut graph = GlobalGraph::new();
        graph.nodes.insert(main, define(Expr::VarGlobal(ghost), &[ghost]));

        let mut walker = Walker::new(&graph, &interner);
        let mut backend = Recorder::default();
        let err = walker.add_global(&mut backend, main).unwrap_err();
        assert_eq!(err, CodegenError::MissingGlobal("Gone.ghost".to_string()));
    }
}
