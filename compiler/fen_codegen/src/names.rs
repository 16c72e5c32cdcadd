//! Symbol name mapping.
//!
//! Deterministic, collision-free translation from source-level names (plus
//! module qualifiers) to target-level symbols. Every function here is pure;
//! the same inputs always produce the same symbol.
//!
//! Injectivity rests on the source grammar: module segments match
//! `[A-Z][A-Za-z0-9]*` (no underscores) joined by dots, and value identifiers
//! start with a lowercase letter. Module dots become single underscores, so
//! the `__` separating module from name is always the first double
//! underscore in a global symbol. Generated temporaries use the reserved
//! `t<n>` shape, which cannot collide with user locals because those always
//! carry the `x_` prefix.

use fen_ir::{Global, ModuleName, Name, StringInterner};

fn module_part(interner: &StringInterner, module: ModuleName) -> String {
    interner.lookup(module.0).replace('.', "_")
}

/// Symbol for a top-level definition: `g_Data_List__map`.
pub fn global_name(interner: &StringInterner, global: &Global) -> String {
    format!(
        "g_{}__{}",
        module_part(interner, global.home),
        interner.lookup(global.name)
    )
}

/// Symbol for the initializer of a top-level definition.
pub fn init_name(interner: &StringInterner, global: &Global) -> String {
    format!("init_{}", global_name(interner, global))
}

/// Symbol for the lazy-init thunk of a mutually-recursive definition.
pub fn cycle_name(interner: &StringInterner, global: &Global) -> String {
    format!(
        "cyc_{}__{}",
        module_part(interner, global.home),
        interner.lookup(global.name)
    )
}

/// Symbol for a foreign kernel value: `fk_Json_Decode__succeed`.
pub fn kernel_name(interner: &StringInterner, global: &Global) -> String {
    format!(
        "fk_{}__{}",
        module_part(interner, global.home),
        interner.lookup(global.name)
    )
}

/// Symbol for a local binding: `x_foo`.
pub fn local_name(interner: &StringInterner, name: Name) -> String {
    format!("x_{}", interner.lookup(name))
}

/// Symbol for a generated temporary. Reserved shape, see module docs.
pub fn tmp_name(n: u32) -> String {
    format!("t{n}")
}

/// Symbol for a lifted function-literal evaluator.
pub fn evaluator_name(n: u32) -> String {
    format!("ev_{n}")
}

/// Integer-tag table entry for a record field: `FIELD_x`.
pub fn field_const(interner: &StringInterner, name: Name) -> String {
    format!("FIELD_{}", interner.lookup(name))
}

/// Integer-tag table entry for a constructor: `CTOR_Just`.
pub fn ctor_const(interner: &StringInterner, name: Name) -> String {
    format!("CTOR_{}", interner.lookup(name))
}

/// Integer-tag table entry for a foreign kernel value.
pub fn kernel_const(interner: &StringInterner, global: &Global) -> String {
    format!(
        "KERNEL_{}__{}",
        module_part(interner, global.home),
        interner.lookup(global.name)
    )
}

#[cfg(test)]
mod tests {
    use fen_ir::{Global, ModuleName, StringInterner};
    use pretty_assertions::assert_eq;

    use super::*;

    fn global(interner: &StringInterner, module: &str, name: &str) -> Global {
        Global::new(ModuleName(interner.intern(module)), interner.intern(name))
    }

    #[test]
    fn test_global_name_replaces_dots() {
        let interner = StringInterner::new();
        let g = global(&interner, "Data.List", "map");
        assert_eq!(global_name(&interner, &g), "g_Data_List__map");
    }

    #[test]
    fn test_qualified_names_stay_distinct() {
        let interner = StringInterner::new();
        let a = global(&interner, "Data.List", "map");
        let b = global(&interner, "Data", "listMap");
        assert_ne!(global_name(&interner, &a), global_name(&interner, &b));
    }

    #[test]
    fn test_locals_cannot_collide_with_temporaries() {
        let interner = StringInterner::new();
        // A user local named like a temporary still gets the x_ prefix.
        let shadow = interner.intern("t0");
        assert_eq!(local_name(&interner, shadow), "x_t0");
        assert_eq!(tmp_name(0), "t0");
    }

    #[test]
    fn test_derived_symbols() {
        let interner = StringInterner::new();
        let g = global(&interner, "Main", "main");
        assert_eq!(init_name(&interner, &g), "init_g_Main__main");
        assert_eq!(cycle_name(&interner, &g), "cyc_Main__main");
        assert_eq!(kernel_name(&interner, &g), "fk_Main__main");
        assert_eq!(kernel_const(&interner, &g), "KERNEL_Main__main");
    }

    #[test]
    fn test_table_constants() {
        let interner = StringInterner::new();
        assert_eq!(field_const(&interner, interner.intern("x")), "FIELD_x");
        assert_eq!(ctor_const(&interner, interner.intern("Just")), "CTOR_Just");
    }
}
