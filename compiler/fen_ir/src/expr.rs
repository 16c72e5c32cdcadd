//! Optimized expression IR.
//!
//! The tree the optimizer hands to code generation: already type-checked,
//! already optimized, with pattern matches compiled down to decision trees.
//! Code generation consumes this tree read-only and never constructs it.
//!
//! Every variant is a closed sum — backends match exhaustively, so adding a
//! variant is a compile error in every backend until it is handled.
//!
//! Strings are interned [`Name`]s; floats are carried as IEEE-754 bit
//! patterns so expressions can derive `Eq` and `Hash`.

use crate::decider::{Choice, Decider};
use crate::{Global, Name};

/// One optimized expression.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Expr {
    Bool(bool),
    /// Character literal (interned, may be multi-byte).
    Chr(Name),
    Str(Name),
    Int(i64),
    /// Float literal as raw bits (`f64::to_bits`).
    Float(u64),
    /// Reference to a name bound by an enclosing function, let, or pattern.
    VarLocal(Name),
    /// Reference to a plain top-level definition.
    VarGlobal(Global),
    /// Reference to a nullary constructor compiled to a bare tag value.
    VarEnum(Global, u32),
    /// Reference to a single-field wrapper constructor.
    VarBox(Global),
    /// Reference into a mutually-recursive definition group. The target may
    /// not be initialized yet at first reference, so backends must go through
    /// the group's lazy-init thunk rather than load the cell directly.
    VarCycle(Global),
    /// Opaque reference into foreign kernel code.
    VarKernel(Global),
    /// Function literal. Lowered to a lifted evaluator plus a closure record
    /// capturing every free variable of `body`.
    Function { params: Vec<Name>, body: Box<Expr> },
    /// Application. Arity mismatches are legal: under-application yields a
    /// partially-filled closure, over-application is resolved by the call
    /// protocol at the call site.
    Call { func: Box<Expr>, args: Vec<Expr> },
    /// Self-call in tail position of a tail-recursive definition; `args` are
    /// keyed by parameter name.
    TailCall { name: Global, args: Vec<(Name, Expr)> },
    /// Multi-way conditional: ordered (condition, branch) pairs and a
    /// required final branch.
    If {
        branches: Vec<(Expr, Expr)>,
        final_branch: Box<Expr>,
    },
    Let { def: Box<Def>, body: Box<Expr> },
    /// Bind one name to a sub-value of an existing binding.
    Destruct {
        destructor: Destructor,
        body: Box<Expr>,
    },
    /// Pattern match over an externally-compiled decision tree. `root` is
    /// the local holding the scrutinee; `jumps` are the shared branch bodies
    /// addressed by `Choice::Jump`.
    Case {
        label: Name,
        root: Name,
        decider: Box<Decider<Choice>>,
        jumps: Vec<(u32, Expr)>,
    },
    /// Field-access function (`.field` used as a value).
    Accessor(Name),
    Access { record: Box<Expr>, field: Name },
    /// Functional record update: unchanged fields come from `record`.
    Update {
        record: Box<Expr>,
        fields: Vec<(Name, Expr)>,
    },
    Record(Vec<(Name, Expr)>),
    Unit,
    /// 2- or 3-element tuple.
    Tuple {
        a: Box<Expr>,
        b: Box<Expr>,
        c: Option<Box<Expr>>,
    },
    /// GPU shader source blob, passed through verbatim.
    Shader(Name),
    /// Debug-only logging wrapper around `value`; honored in development
    /// builds, stripped to `value` in optimized builds.
    DebugLog { tag: Name, value: Box<Expr> },
}

/// A let-bound definition.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Def {
    Value {
        name: Name,
        expr: Box<Expr>,
    },
    /// Tail-recursive local function; its self-calls appear as
    /// [`Expr::TailCall`].
    TailFunc {
        name: Name,
        params: Vec<Name>,
        expr: Box<Expr>,
    },
}

impl Def {
    /// The bound name, for either definition form.
    pub fn name(&self) -> Name {
        match self {
            Def::Value { name, .. } | Def::TailFunc { name, .. } => *name,
        }
    }
}

/// Binds `name` to the sub-value reached by walking `path`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Destructor {
    pub name: Name,
    pub path: Path,
}

/// A path from an existing binding down into a structured value.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Path {
    /// Positional child of a constructor or tuple.
    Index(u32, Box<Path>),
    /// Named record field.
    Field(Name, Box<Path>),
    /// Sole payload of a single-field wrapper constructor.
    Unbox(Box<Path>),
    /// The binding the walk starts from.
    Root(Name),
}

impl Path {
    /// The name at the root of this path.
    pub fn root(&self) -> Name {
        match self {
            Path::Index(_, rest) | Path::Field(_, rest) | Path::Unbox(rest) => rest.root(),
            Path::Root(name) => *name,
        }
    }
}

/// One piece of a foreign kernel definition: verbatim source, or a reference
/// back into generated globals that the source splices in.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum KernelChunk {
    Source(Name),
    Ref(Global),
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::ModuleName;

    #[test]
    fn test_path_root_walks_to_bottom() {
        let root = Name::from_raw(7);
        let path = Path::Index(0, Box::new(Path::Field(Name::from_raw(3), Box::new(Path::Root(root)))));
        assert_eq!(path.root(), root);
    }

    #[test]
    fn test_def_name() {
        let name = Name::from_raw(1);
        let def = Def::Value {
            name,
            expr: Box::new(Expr::Unit),
        };
        assert_eq!(def.name(), name);
    }

    #[test]
    fn test_float_literals_compare_by_bits() {
        let a = Expr::Float(1.5f64.to_bits());
        let b = Expr::Float(1.5f64.to_bits());
        assert_eq!(a, b);
    }

    #[test]
    fn test_expr_is_a_closed_sum() {
        // A call expression holds its pieces structurally.
        let global = Global::new(ModuleName(Name::from_raw(1)), Name::from_raw(2));
        let call = Expr::Call {
            func: Box::new(Expr::VarGlobal(global)),
            args: vec![Expr::Int(1), Expr::Unit],
        };
        match call {
            Expr::Call { args, .. } => assert_eq!(args.len(), 2),
            _ => unreachable!(),
        }
    }
}
