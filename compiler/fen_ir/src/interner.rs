//! String interner for identifier storage.
//!
//! Provides O(1) interning and lookup. Interned strings are leaked to obtain
//! `'static` lifetimes, so lookups never borrow the interner's lock guard.
//!
//! Code generation is single-threaded (one traversal, one writer), so a
//! single table behind one `RwLock` is enough; the lock exists so the
//! interner can be shared immutably across the lowering call tree.

use parking_lot::RwLock;
use rustc_hash::FxHashMap;

use crate::Name;

struct InternTable {
    /// Map from string content to index.
    map: FxHashMap<&'static str, u32>,
    /// Storage for string contents, indexed by `Name::index`.
    strings: Vec<&'static str>,
}

impl InternTable {
    fn with_empty() -> Self {
        let mut table = InternTable {
            map: FxHashMap::default(),
            strings: Vec::with_capacity(256),
        };
        // Pre-intern the empty string at index 0 so Name::EMPTY resolves.
        let empty: &'static str = "";
        table.map.insert(empty, 0);
        table.strings.push(empty);
        table
    }
}

/// String interner with interior locking.
///
/// Provides O(1) lookup and equality comparison for interned strings. The
/// backend resolves `Name`s through a shared `&StringInterner` — the caller
/// owns the interner and codegen just needs read access.
pub struct StringInterner {
    table: RwLock<InternTable>,
}

impl StringInterner {
    /// Create a new interner with the empty string pre-interned.
    pub fn new() -> Self {
        StringInterner {
            table: RwLock::new(InternTable::with_empty()),
        }
    }

    /// Intern a string, returning its [`Name`].
    ///
    /// Interning the same content twice returns the same `Name`.
    ///
    /// # Panics
    /// Panics if more than `u32::MAX` distinct strings are interned.
    pub fn intern(&self, s: &str) -> Name {
        // Fast path: already interned.
        {
            let guard = self.table.read();
            if let Some(&index) = guard.map.get(s) {
                return Name::from_raw(index);
            }
        }

        let mut guard = self.table.write();

        // Double-check after acquiring the write lock.
        if let Some(&index) = guard.map.get(s) {
            return Name::from_raw(index);
        }

        // Leak the string to get a 'static lifetime.
        let leaked: &'static str = Box::leak(s.to_owned().into_boxed_str());

        let index = u32::try_from(guard.strings.len())
            .unwrap_or_else(|_| panic!("interner exceeded capacity at {} strings", guard.strings.len()));
        guard.strings.push(leaked);
        guard.map.insert(leaked, index);
        Name::from_raw(index)
    }

    /// Intern an owned `String`, avoiding the extra copy `intern(&s)` would
    /// perform when the content is new.
    pub fn intern_owned(&self, s: String) -> Name {
        {
            let guard = self.table.read();
            if let Some(&index) = guard.map.get(s.as_str()) {
                return Name::from_raw(index);
            }
        }

        let mut guard = self.table.write();

        if let Some(&index) = guard.map.get(s.as_str()) {
            return Name::from_raw(index);
        }

        let leaked: &'static str = Box::leak(s.into_boxed_str());

        let index = u32::try_from(guard.strings.len())
            .unwrap_or_else(|_| panic!("interner exceeded capacity at {} strings", guard.strings.len()));
        guard.strings.push(leaked);
        guard.map.insert(leaked, index);
        Name::from_raw(index)
    }

    /// Look up the string for a `Name`.
    ///
    /// All interned strings are leaked, so the returned reference is
    /// `'static` and never borrows the internal lock.
    pub fn lookup(&self, name: Name) -> &'static str {
        let guard = self.table.read();
        guard.strings[name.index()]
    }

    /// Number of interned strings.
    pub fn len(&self) -> usize {
        self.table.read().strings.len()
    }

    /// Whether only the pre-interned empty string is present.
    pub fn is_empty(&self) -> bool {
        self.len() <= 1
    }
}

impl Default for StringInterner {
    fn default() -> Self {
        Self::new()
    }
}

/// Trait for looking up interned string names.
///
/// Exists to avoid tight coupling: consumers can accept any `StringLookup`
/// implementor without depending directly on `StringInterner`.
pub trait StringLookup {
    /// Look up the string for an interned name.
    fn lookup(&self, name: Name) -> &str;
}

impl StringLookup for StringInterner {
    fn lookup(&self, name: Name) -> &str {
        StringInterner::lookup(self, name)
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_intern_and_lookup() {
        let interner = StringInterner::new();

        let hello = interner.intern("hello");
        let world = interner.intern("world");
        let hello2 = interner.intern("hello");

        assert_eq!(hello, hello2);
        assert_ne!(hello, world);

        assert_eq!(interner.lookup(hello), "hello");
        assert_eq!(interner.lookup(world), "world");
    }

    #[test]
    fn test_empty_string_pre_interned() {
        let interner = StringInterner::new();
        let empty = interner.intern("");
        assert_eq!(empty, Name::EMPTY);
        assert_eq!(interner.lookup(Name::EMPTY), "");
    }

    #[test]
    fn test_intern_owned_matches_borrowed() {
        let interner = StringInterner::new();

        let name1 = interner.intern("shared");
        let name2 = interner.intern_owned(String::from("shared"));

        assert_eq!(name1, name2);
        assert_eq!(interner.lookup(name2), "shared");
    }

    #[test]
    fn test_len() {
        let interner = StringInterner::new();
        assert!(interner.is_empty());
        interner.intern("a");
        interner.intern("b");
        interner.intern("a");
        assert_eq!(interner.len(), 3); // "", "a", "b"
    }
}
