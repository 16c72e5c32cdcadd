//! Fen IR — Optimized Intermediate Representation
//!
//! This crate contains the data structures handed to the Fen code
//! generators:
//!
//! - Interned [`Name`]s and the [`StringInterner`]
//! - The optimized expression tree ([`Expr`]) with let-defs, destructor
//!   paths, and foreign kernel chunks
//! - Compiled pattern-match decision trees ([`Decider`], consumed, never
//!   built, by the backends)
//! - The whole-program [`GlobalGraph`] mapping `(module, name)` to nodes
//!
//! # Design Philosophy
//!
//! - **Intern everything**: strings → `Name(u32)`, resolved through one
//!   shared interner; floats stored as `u64` bit patterns so every type can
//!   derive `Eq` and `Hash`.
//! - **Closed sums**: every union is a Rust enum matched exhaustively, so an
//!   unhandled case is a backend compile error, never a runtime fallthrough.
//! - **Read-only input**: the graph and every expression in it are immutable
//!   during generation; the backends own all mutable state.

mod decider;
mod expr;
mod graph;
mod interner;
mod name;

pub use decider::{Choice, Decider, Test};
pub use expr::{Def, Destructor, Expr, KernelChunk, Path};
pub use graph::{Global, GlobalGraph, ModuleName, Node};
pub use interner::{StringInterner, StringLookup};
pub use name::Name;
