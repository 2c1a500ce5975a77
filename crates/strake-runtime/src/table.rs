//! The `call_indirect` function table.
//!
//! Transpiled functions have heterogeneous Rust signatures, so table entries
//! are type-erased [`FuncRef`]s: a canonical type index for the signature
//! check plus the function's index in the module's function index space.
//! The compiler generates a `match` over `func_index` at every
//! `call_indirect` site to reach the concrete function.

use crate::{ConstructionError, Trap, WasmResult};

/// One table entry: a function reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FuncRef {
    /// Canonical type-section index used for the `call_indirect` signature
    /// check. Structurally identical signatures share a canonical index.
    pub type_index: u32,
    /// Index in the module's function index space (imports included).
    pub func_index: u32,
}

/// Function table with a compile-time maximum size.
///
/// `None` entries are uninitialized slots; calling through one traps with
/// `UndefinedElement`.
pub struct Table<const MAX_SIZE: usize> {
    entries: [Option<FuncRef>; MAX_SIZE],
    size: usize,
}

impl<const MAX_SIZE: usize> Table<MAX_SIZE> {
    /// Create a table with `initial_size` empty slots.
    pub fn try_new(initial_size: usize) -> Result<Self, ConstructionError> {
        if initial_size > MAX_SIZE {
            return Err(ConstructionError::InitialTableSizeExceedsMax {
                initial: initial_size,
                max: MAX_SIZE,
            });
        }
        Ok(Self {
            entries: [None; MAX_SIZE],
            size: initial_size,
        })
    }

    /// Current table size.
    #[inline(always)]
    pub fn size(&self) -> usize {
        self.size
    }

    /// Install a function reference during instance construction
    /// (element segment application).
    pub fn set(&mut self, index: usize, r: FuncRef) -> Result<(), ConstructionError> {
        if index >= self.size {
            return Err(ConstructionError::SegmentOutOfRange);
        }
        self.entries[index] = Some(r);
        Ok(())
    }

    /// Look up an entry for `call_indirect`.
    ///
    /// Traps with `TableOutOfBounds` past the current size and
    /// `UndefinedElement` on an empty slot.
    #[inline]
    pub fn get(&self, index: u32) -> WasmResult<FuncRef> {
        let idx = index as usize;
        if idx >= self.size {
            return Err(Trap::TableOutOfBounds);
        }
        self.entries
            .get(idx)
            .copied()
            .flatten()
            .ok_or(Trap::UndefinedElement)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_slot_is_undefined_element() {
        let t = Table::<4>::try_new(4).unwrap();
        assert_eq!(t.get(0), Err(Trap::UndefinedElement));
    }

    #[test]
    fn out_of_bounds_index_traps() {
        let t = Table::<4>::try_new(2).unwrap();
        assert_eq!(t.get(2), Err(Trap::TableOutOfBounds));
        assert_eq!(t.get(u32::MAX), Err(Trap::TableOutOfBounds));
    }

    #[test]
    fn set_then_get() {
        let mut t = Table::<4>::try_new(4).unwrap();
        let r = FuncRef {
            type_index: 1,
            func_index: 3,
        };
        t.set(2, r).unwrap();
        assert_eq!(t.get(2), Ok(r));
    }

    #[test]
    fn set_past_size_is_rejected() {
        let mut t = Table::<4>::try_new(1).unwrap();
        let r = FuncRef {
            type_index: 0,
            func_index: 0,
        };
        assert_eq!(t.set(1, r), Err(ConstructionError::SegmentOutOfRange));
    }

    #[test]
    fn try_new_rejects_oversized_initial() {
        assert!(Table::<2>::try_new(3).is_err());
    }
}
