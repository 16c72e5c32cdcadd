//! Lexical scope tracking during lowering.
//!
//! Each function body is lowered inside one [`Scope`] that classifies every
//! referenced name into exactly one of three disjoint sets: *arguments*
//! (bound by the function itself), *locals* (bound by lets, destructuring,
//! or generated bindings), and *captured* (referenced but bound in an
//! enclosing scope, so it must travel in the closure record).
//!
//! Classification happens as a side effect of lowering — the first reference
//! decides, and once a name is captured it stays captured for the scope's
//! lifetime. When a nested function captures a name the surrounding scope
//! does not bind either, [`Scope::absorb_nested`] re-references it so the
//! capture propagates outward through every intermediate scope.

use fen_ir::{Name, StringInterner};
use rustc_hash::FxHashSet;

/// Where a referenced name resolved.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Resolved {
    Arg,
    Local,
    Captured,
}

/// One function's name-classification state.
#[derive(Debug, Default)]
pub struct Scope {
    args: FxHashSet<Name>,
    locals: FxHashSet<Name>,
    captured: FxHashSet<Name>,
}

impl Scope {
    /// Scope for a function body, seeded with its parameter set.
    pub fn for_function(params: &[Name]) -> Self {
        Scope {
            args: params.iter().copied().collect(),
            locals: FxHashSet::default(),
            captured: FxHashSet::default(),
        }
    }

    /// Scope for a top-level initializer expression (no arguments).
    pub fn top_level() -> Self {
        Scope::default()
    }

    /// Record a let/destructuring binding.
    pub fn bind_local(&mut self, name: Name) {
        self.locals.insert(name);
    }

    /// Classify a reference. Unknown names become captured.
    pub fn reference(&mut self, name: Name) -> Resolved {
        if self.args.contains(&name) {
            Resolved::Arg
        } else if self.locals.contains(&name) {
            Resolved::Local
        } else {
            self.captured.insert(name);
            Resolved::Captured
        }
    }

    /// Whether `name` is bound by this scope itself (argument or local).
    pub fn binds(&self, name: Name) -> bool {
        self.args.contains(&name) || self.locals.contains(&name)
    }

    /// Propagate a nested function's captures through this scope.
    ///
    /// Names the nested scope captured but this scope does not bind are
    /// re-referenced here, becoming captures of this scope too — this is
    /// what makes arbitrarily deep nesting capture correctly.
    pub fn absorb_nested(&mut self, inner: &Scope) {
        for &name in &inner.captured {
            self.reference(name);
        }
    }

    pub fn captured(&self) -> &FxHashSet<Name> {
        &self.captured
    }

    /// Captured names in canonical slot order: lexicographic by resolved
    /// string. Slot assignment must never depend on hash iteration order.
    pub fn sorted_captures(&self, interner: &StringInterner) -> Vec<Name> {
        let mut names: Vec<Name> = self.captured.iter().copied().collect();
        names.sort_by_key(|&n| interner.lookup(n));
        names
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_classification_is_disjoint() {
        let interner = StringInterner::new();
        let a = interner.intern("a");
        let b = interner.intern("b");
        let free = interner.intern("free");

        let mut scope = Scope::for_function(&[a]);
        scope.bind_local(b);

        assert_eq!(scope.reference(a), Resolved::Arg);
        assert_eq!(scope.reference(b), Resolved::Local);
        assert_eq!(scope.reference(free), Resolved::Captured);
        // Once captured, stays captured.
        assert_eq!(scope.reference(free), Resolved::Captured);
        assert_eq!(scope.captured().len(), 1);
    }

    #[test]
    fn test_pass_through_propagation() {
        let interner = StringInterner::new();
        let outer_bound = interner.intern("v");
        let x = interner.intern("x");
        let y = interner.intern("y");

        // outer binds v; middle binds x; inner binds y and references v.
        let mut outer = Scope::for_function(&[outer_bound]);
        let mut middle = Scope::for_function(&[x]);
        let mut inner = Scope::for_function(&[y]);

        assert_eq!(inner.reference(outer_bound), Resolved::Captured);

        // v is free in middle too, even though middle never references it.
        middle.absorb_nested(&inner);
        assert!(middle.captured().contains(&outer_bound));

        // outer binds v, so propagation stops there.
        outer.absorb_nested(&middle);
        assert!(outer.captured().is_empty());
    }

    #[test]
    fn test_sorted_captures_are_lexicographic() {
        let interner = StringInterner::new();
        // Intern in an order that differs from lexicographic order.
        let zeta = interner.intern("zeta");
        let alpha = interner.intern("alpha");
        let mid = interner.intern("mid");

        let mut scope = Scope::for_function(&[]);
        scope.reference(zeta);
        scope.reference(alpha);
        scope.reference(mid);

        assert_eq!(scope.sorted_captures(&interner), vec![alpha, mid, zeta]);
    }
}
