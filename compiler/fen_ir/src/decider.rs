//! Compiled pattern-match decision trees.
//!
//! Decision trees arrive already built — the pattern-match compiler is an
//! upstream stage. Code generation walks them and emits conditionals; it
//! never re-derives or re-balances them.

use crate::expr::{Expr, Path};
use crate::Name;

/// A decision tree node, parameterized over the leaf payload.
///
/// In practice `T` is [`Choice`]: either an inline branch body or a jump
/// into the enclosing case's shared jump table.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Decider<T> {
    Leaf(T),
    /// Run `test_chain` in order; all tests pass → `success`, any test
    /// fails → `failure`.
    Chain {
        test_chain: Vec<(Path, Test)>,
        success: Box<Decider<T>>,
        failure: Box<Decider<T>>,
    },
    /// Dispatch on the value at `path`: first matching test wins, otherwise
    /// `fallback`.
    FanOut {
        path: Path,
        tests: Vec<(Test, Decider<T>)>,
        fallback: Box<Decider<T>>,
    },
}

/// Leaf payload of a compiled case expression.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Choice {
    Inline(Expr),
    /// Index into the enclosing [`Case`](crate::Expr::Case) jump table.
    Jump(u32),
}

/// A single runtime test against a scrutinee sub-value.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Test {
    /// Constructor tag check. `tag` is the source name (for the shared
    /// constructor string table); `index` is the runtime discriminant.
    Ctor { tag: Name, index: u32 },
    Int(i64),
    Chr(Name),
    Str(Name),
    Bool(bool),
    IsCons,
    IsNil,
    IsTuple,
}
