//! Shared-value deduplication.
//!
//! Every literal, field-group descriptor, accessor thunk, and foreign-kernel
//! thunk is emitted exactly once no matter how many call sites reference it.
//! The table is keyed by structural identity (value equality, floats by bit
//! pattern) and keeps first-insertion order, which also assigns the stable
//! small-integer ids of the up-front string tables.

use fen_ir::{Global, Name, StringInterner};
use rustc_hash::FxHashMap;

use crate::names;

/// One deduplicated definition.
///
/// Floats are keyed by bit pattern; strings and characters by their interned
/// name, which is itself content-keyed.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum SharedDef {
    Int(i64),
    Float(u64),
    Chr(Name),
    Str(Name),
    /// Field set of one record shape, in canonical (lexicographic) order.
    FieldGroup(Vec<Name>),
    /// Single-field accessor closure (`.field` as a value).
    Accessor(Name),
    /// Reference to a foreign kernel value.
    ForeignThunk(Global),
}

/// Insertion-ordered table of names with stable small-integer ids.
#[derive(Debug, Default)]
pub struct StringTable {
    names: Vec<Name>,
    index: FxHashMap<Name, u32>,
}

impl StringTable {
    /// Id for `name`, registering it on first sight.
    pub fn id(&mut self, name: Name) -> u32 {
        if let Some(&id) = self.index.get(&name) {
            return id;
        }
        let id = self.names.len() as u32;
        self.names.push(name);
        self.index.insert(name, id);
        id
    }

    /// Entries in id order.
    pub fn iter(&self) -> impl Iterator<Item = (u32, Name)> + '_ {
        self.names.iter().enumerate().map(|(i, &n)| (i as u32, n))
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

/// The open shared-definitions set, plus the three string tables consumed at
/// final assembly.
#[derive(Debug, Default)]
pub struct SharedDefs {
    defs: Vec<SharedDef>,
    index: FxHashMap<SharedDef, u32>,
    /// Record field names. Seeded most-frequent-first (see `seed_fields`).
    pub fields: StringTable,
    /// Constructor tag names, in first-reference order.
    pub ctors: StringTable,
    /// Foreign kernel values, in first-reference order.
    kernels: Vec<Global>,
    kernel_index: FxHashMap<Global, u32>,
}

impl SharedDefs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed field ids from the whole-program access-frequency map:
    /// most-frequent first, ties broken lexicographically. Purely a
    /// stability concern — ids are semantics-free — but it keeps hot fields
    /// at small ids and output deterministic.
    pub fn seed_fields(&mut self, interner: &StringInterner, frequencies: &FxHashMap<Name, u32>) {
        let mut ordered: Vec<(Name, u32)> = frequencies.iter().map(|(&n, &c)| (n, c)).collect();
        ordered.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| interner.lookup(a.0).cmp(interner.lookup(b.0))));
        for (name, _) in ordered {
            self.fields.id(name);
        }
    }

    /// Intern a definition, returning its stable id. Interning a
    /// structurally equal definition twice returns the same id.
    pub fn intern(&mut self, def: SharedDef) -> u32 {
        if let Some(&id) = self.index.get(&def) {
            return id;
        }
        let id = self.defs.len() as u32;
        self.index.insert(def.clone(), id);
        self.defs.push(def);
        id
    }

    /// Whether `def` is already interned.
    pub fn contains(&self, def: &SharedDef) -> bool {
        self.index.contains_key(def)
    }

    /// Register a foreign kernel value for the kernel string table.
    pub fn kernel_id(&mut self, global: Global) -> u32 {
        if let Some(&id) = self.kernel_index.get(&global) {
            return id;
        }
        let id = self.kernels.len() as u32;
        self.kernels.push(global);
        self.kernel_index.insert(global, id);
        id
    }

    /// Kernel table entries in id order.
    pub fn kernels(&self) -> impl Iterator<Item = (u32, &Global)> {
        self.kernels.iter().enumerate().map(|(i, g)| (i as u32, g))
    }

    /// Definitions in id (insertion) order.
    pub fn iter(&self) -> impl Iterator<Item = (u32, &SharedDef)> {
        self.defs.iter().enumerate().map(|(i, d)| (i as u32, d))
    }

    pub fn len(&self) -> usize {
        self.defs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.defs.is_empty()
    }

    /// Symbol naming one emitted definition. Content-derived where the
    /// content is identifier-safe, table-id-derived otherwise.
    pub fn symbol(&self, interner: &StringInterner, id: u32, def: &SharedDef) -> String {
        match def {
            SharedDef::Int(i) if *i < 0 => format!("lit_int_m{}", i.unsigned_abs()),
            SharedDef::Int(i) => format!("lit_int_{i}"),
            SharedDef::Float(bits) => format!("lit_float_{bits:016x}"),
            SharedDef::Chr(_) => format!("lit_chr_{id}"),
            SharedDef::Str(_) => format!("lit_str_{id}"),
            SharedDef::FieldGroup(_) => format!("lit_fg_{id}"),
            SharedDef::Accessor(field) => format!("lit_access_{}", interner.lookup(*field)),
            SharedDef::ForeignThunk(global) => names::kernel_name(interner, global),
        }
    }
}

#[cfg(test)]
mod tests {
    use fen_ir::ModuleName;
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_structural_dedup() {
        let mut defs = SharedDefs::new();
        let a = defs.intern(SharedDef::Int(42));
        let b = defs.intern(SharedDef::Int(42));
        let c = defs.intern(SharedDef::Int(43));
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(defs.len(), 2);
    }

    #[test]
    fn test_floats_dedup_by_bits() {
        let mut defs = SharedDefs::new();
        let a = defs.intern(SharedDef::Float(1.5f64.to_bits()));
        let b = defs.intern(SharedDef::Float(1.5f64.to_bits()));
        assert_eq!(a, b);
    }

    #[test]
    fn test_iteration_order_is_insertion_order() {
        let mut defs = SharedDefs::new();
        defs.intern(SharedDef::Int(7));
        defs.intern(SharedDef::Int(1));
        defs.intern(SharedDef::Int(7));
        let order: Vec<_> = defs.iter().map(|(_, d)| d.clone()).collect();
        assert_eq!(order, vec![SharedDef::Int(7), SharedDef::Int(1)]);
    }

    #[test]
    fn test_symbols() {
        let interner = StringInterner::new();
        let mut defs = SharedDefs::new();
        let id = defs.intern(SharedDef::Int(-3));
        assert_eq!(defs.symbol(&interner, id, &SharedDef::Int(-3)), "lit_int_m3");

        let field = interner.intern("name");
        let id = defs.intern(SharedDef::Accessor(field));
        assert_eq!(
            defs.symbol(&interner, id, &SharedDef::Accessor(field)),
            "lit_access_name"
        );
    }

    #[test]
    fn test_field_seeding_orders_by_frequency_then_name() {
        let interner = StringInterner::new();
        let x = interner.intern("x");
        let y = interner.intern("y");
        let radius = interner.intern("radius");

        let mut freqs = FxHashMap::default();
        freqs.insert(x, 10);
        freqs.insert(y, 10);
        freqs.insert(radius, 2);

        let mut defs = SharedDefs::new();
        defs.seed_fields(&interner, &freqs);

        let order: Vec<Name> = defs.fields.iter().map(|(_, n)| n).collect();
        assert_eq!(order, vec![x, y, radius]);
    }

    #[test]
    fn test_kernel_table() {
        let interner = StringInterner::new();
        let g = Global::new(ModuleName(interner.intern("Fen.Kernel.List")), interner.intern("sortBy"));
        let mut defs = SharedDefs::new();
        assert_eq!(defs.kernel_id(g), 0);
        assert_eq!(defs.kernel_id(g), 0);
    }
}
