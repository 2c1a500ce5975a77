//! `strake-runtime` — support crate for strake-generated Rust code.
//!
//! Generated functions never panic on WebAssembly-visible conditions; every
//! fault path is a [`Trap`] value propagated with `?`. This crate provides:
//!
//! - [`LinearMemory`] — bounds-checked WebAssembly linear memory
//! - [`Table`] / [`FuncRef`] — the `call_indirect` function table
//! - [`Trap`] / [`WasmResult`] — the trap model
//! - numeric helpers in [`ops`] for semantics Rust operators don't give
//!   directly (trapping integer division, IEEE-754 min/max with
//!   WebAssembly NaN and signed-zero rules)

#![no_std]

/// WebAssembly page size: 64 KiB.
pub const PAGE_SIZE: usize = 65536;

mod memory;
pub use memory::LinearMemory;

mod table;
pub use table::{FuncRef, Table};

pub mod ops;
pub use ops::{
    fmax_f32, fmax_f64, fmin_f32, fmin_f64, i32_div_s, i32_div_u, i32_rem_s, i32_rem_u, i64_div_s,
    i64_div_u, i64_rem_s, i64_rem_u,
};

/// WebAssembly execution traps — no panics, no unwinding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trap {
    /// Linear memory access out of bounds.
    OutOfBounds,
    /// Integer division or remainder by zero.
    DivisionByZero,
    /// Signed division overflow (`i32::MIN / -1` and the i64 analog).
    IntegerOverflow,
    /// The `unreachable` instruction was executed.
    UnreachableExecuted,
    /// `call_indirect` signature check failed.
    IndirectCallTypeMismatch,
    /// Table access out of bounds.
    TableOutOfBounds,
    /// `call_indirect` hit an uninitialized table slot.
    UndefinedElement,
}

/// Result type for generated code and runtime helpers.
pub type WasmResult<T> = Result<T, Trap>;

/// Errors raised while constructing memories and tables.
///
/// These indicate a malformed module or a bad `--max-pages` override, not a
/// runtime trap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConstructionError {
    /// Declared initial pages exceed the compile-time maximum.
    InitialPagesExceedMax { initial: usize, max: usize },
    /// Declared initial table size exceeds the compile-time maximum.
    InitialTableSizeExceedsMax { initial: usize, max: usize },
    /// A data or element segment does not fit its target.
    SegmentOutOfRange,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trap_is_copy_and_comparable() {
        let t = Trap::DivisionByZero;
        let u = t;
        assert_eq!(t, u);
        assert_ne!(t, Trap::OutOfBounds);
    }

    #[test]
    fn wasm_result_roundtrip() {
        let ok: WasmResult<i64> = Ok(-1);
        let err: WasmResult<i64> = Err(Trap::UndefinedElement);
        assert_eq!(ok, Ok(-1));
        assert_eq!(err, Err(Trap::UndefinedElement));
    }
}
