//! Runtime value representation and closure layout.
//!
//! Both targets agree on the logical shape of heap values; the bytecode
//! target additionally fixes exact byte offsets in linear memory, which is
//! what this module computes. The native target reuses the same slot
//! ordering through slot *indices* and lets the C compiler place the bytes.

use fen_ir::Name;
use smallvec::SmallVec;

/// Runtime tag discriminants.
///
/// Comparable container types use the fixed small integers 0–7 so equality
/// and ordering can dispatch on a single tag read; the remaining heap shapes
/// follow. Closure records carry no tag — their first word is the evaluator
/// reference (see [`ClosureLayout`]).
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(u32)]
pub enum ValueTag {
    Nil = 0,
    Cons = 1,
    Tuple2 = 2,
    Tuple3 = 3,
    Int = 4,
    Float = 5,
    Char = 6,
    String = 7,
    Record = 9,
    FieldGroup = 10,
    Custom = 11,
}

impl ValueTag {
    /// All tags, in discriminant order (for emitting tag tables).
    pub const ALL: [ValueTag; 11] = [
        ValueTag::Nil,
        ValueTag::Cons,
        ValueTag::Tuple2,
        ValueTag::Tuple3,
        ValueTag::Int,
        ValueTag::Float,
        ValueTag::Char,
        ValueTag::String,
        ValueTag::Record,
        ValueTag::FieldGroup,
        ValueTag::Custom,
    ];

    pub const fn value(self) -> u32 {
        self as u32
    }

    /// Spelling used in generated code (`FEN_TAG_INT`, ...).
    pub const fn const_name(self) -> &'static str {
        match self {
            ValueTag::Nil => "FEN_TAG_NIL",
            ValueTag::Cons => "FEN_TAG_CONS",
            ValueTag::Tuple2 => "FEN_TAG_TUPLE2",
            ValueTag::Tuple3 => "FEN_TAG_TUPLE3",
            ValueTag::Int => "FEN_TAG_INT",
            ValueTag::Float => "FEN_TAG_FLOAT",
            ValueTag::Char => "FEN_TAG_CHAR",
            ValueTag::String => "FEN_TAG_STRING",
            ValueTag::Record => "FEN_TAG_RECORD",
            ValueTag::FieldGroup => "FEN_TAG_FIELDGROUP",
            ValueTag::Custom => "FEN_TAG_CUSTOM",
        }
    }
}

/// Closure record header: evaluator word at offset 0, arity word at 4.
pub const CLOSURE_HEADER_BYTES: u32 = 8;
/// Each capture/argument slot is one 4-byte pointer in linear memory.
pub const SLOT_BYTES: u32 = 4;
/// Offset of the evaluator word (function-table index on the bytecode
/// target, evaluator pointer on the native target).
pub const OFFSET_EVALUATOR: u32 = 0;
/// Offset of the packed arity word: `filled: u16` in the low half,
/// `max: u16` in the high half (little-endian: filled at 4, max at 6).
pub const OFFSET_ARITY: u32 = 4;

/// Pack the arity word.
pub const fn arity_word(filled: u16, max: u16) -> u32 {
    (max as u32) << 16 | filled as u32
}

/// Whether a slot holds a captured value or an argument.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SlotKind {
    Capture,
    Param,
}

/// One closure slot, with its position fixed by the layout walk.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Slot {
    pub name: Name,
    pub kind: SlotKind,
    /// Position in the slot array (0-based).
    pub index: u16,
    /// Byte offset in linear memory.
    pub offset: u32,
}

/// Fixed layout of one closure record.
///
/// Built from **one** ordered walk — captures in canonical order first, then
/// parameters in declaration order — and both the construction view and the
/// destructuring view are derived from that same walk, so their offsets can
/// never disagree. A function with no parameters and no captures still gets
/// a valid 8-byte record (a zero-arity thunk).
#[derive(Debug)]
pub struct ClosureLayout {
    slots: SmallVec<[Slot; 8]>,
    captures: u16,
}

impl ClosureLayout {
    /// Lay out a closure for `params` and `captures`.
    ///
    /// `captures` must already be in canonical (lexicographic) order — see
    /// [`Scope::sorted_captures`](crate::scope::Scope::sorted_captures).
    pub fn new(params: &[Name], captures: &[Name]) -> Self {
        let mut slots = SmallVec::with_capacity(captures.len() + params.len());
        let push = |name: Name, kind: SlotKind, slots: &mut SmallVec<[Slot; 8]>| {
            let index = u16::try_from(slots.len()).expect("closure slot count exceeds u16");
            slots.push(Slot {
                name,
                kind,
                index,
                offset: CLOSURE_HEADER_BYTES + SLOT_BYTES * u32::from(index),
            });
        };
        for &name in captures {
            push(name, SlotKind::Capture, &mut slots);
        }
        for &name in params {
            push(name, SlotKind::Param, &mut slots);
        }
        ClosureLayout {
            slots,
            captures: captures.len() as u16,
        }
    }

    /// Total record size in linear-memory bytes.
    pub fn total_bytes(&self) -> u32 {
        CLOSURE_HEADER_BYTES + SLOT_BYTES * self.slots.len() as u32
    }

    /// Slot count a full invocation requires (captures + parameters).
    pub fn max_values(&self) -> u16 {
        self.slots.len() as u16
    }

    /// Slots filled at construction time (the captures).
    pub fn initial_filled(&self) -> u16 {
        self.captures
    }

    /// Arity word stored at construction: captures filled, all slots needed.
    pub fn initial_arity_word(&self) -> u32 {
        arity_word(self.initial_filled(), self.max_values())
    }

    /// Slots the construction site must store, in slot order.
    pub fn construction_slots(&self) -> &[Slot] {
        &self.slots[..self.captures as usize]
    }

    /// Slots the function-entry prologue must load: parameters in
    /// declaration order, then captures in canonical order. Same slots,
    /// same offsets, different traversal order.
    pub fn destructuring_slots(&self) -> impl Iterator<Item = &Slot> {
        let (captures, params) = self.slots.split_at(self.captures as usize);
        params.iter().chain(captures.iter())
    }

    /// All slots in storage order.
    pub fn slots(&self) -> &[Slot] {
        &self.slots
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_identity_function_layout() {
        // \x -> x: 8-byte header + one 4-byte slot.
        let x = Name::from_raw(1);
        let layout = ClosureLayout::new(&[x], &[]);
        assert_eq!(layout.total_bytes(), 12);
        assert_eq!(layout.max_values(), 1);
        assert_eq!(layout.initial_filled(), 0);

        let entry: Vec<_> = layout.destructuring_slots().collect();
        assert_eq!(entry.len(), 1);
        assert_eq!(entry[0].offset, 8);
        assert_eq!(entry[0].name, x);
    }

    #[test]
    fn test_zero_arity_thunk_is_valid() {
        let layout = ClosureLayout::new(&[], &[]);
        assert_eq!(layout.total_bytes(), 8);
        assert_eq!(layout.max_values(), 0);
        assert_eq!(layout.destructuring_slots().count(), 0);
    }

    #[test]
    fn test_construction_and_destructuring_offsets_agree() {
        let params = [Name::from_raw(10), Name::from_raw(11)];
        let captures = [Name::from_raw(20), Name::from_raw(21), Name::from_raw(22)];
        let layout = ClosureLayout::new(&params, &captures);

        assert_eq!(layout.total_bytes(), 8 + 4 * 5);
        assert_eq!(layout.initial_filled(), 3);
        assert_eq!(layout.max_values(), 5);

        // Every logical slot resolves to exactly one offset, shared by both
        // views.
        for slot in layout.construction_slots() {
            let via_entry = layout
                .destructuring_slots()
                .find(|s| s.name == slot.name)
                .unwrap();
            assert_eq!(via_entry.offset, slot.offset);
        }
        // Captures occupy the low slots, params follow.
        assert_eq!(layout.slots()[0].kind, SlotKind::Capture);
        assert_eq!(layout.slots()[0].offset, 8);
        assert_eq!(layout.slots()[3].kind, SlotKind::Param);
        assert_eq!(layout.slots()[3].offset, 8 + 4 * 3);
    }

    #[test]
    fn test_arity_word_packing() {
        assert_eq!(arity_word(1, 2), 0x0002_0001);
        assert_eq!(arity_word(0, 0), 0);
    }

    #[test]
    fn test_comparable_tags_are_fixed() {
        assert_eq!(ValueTag::Nil.value(), 0);
        assert_eq!(ValueTag::Cons.value(), 1);
        assert_eq!(ValueTag::Tuple2.value(), 2);
        assert_eq!(ValueTag::Tuple3.value(), 3);
        assert_eq!(ValueTag::Int.value(), 4);
        assert_eq!(ValueTag::Float.value(), 5);
        assert_eq!(ValueTag::Char.value(), 6);
        assert_eq!(ValueTag::String.value(), 7);
    }
}
