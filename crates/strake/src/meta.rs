//! Per-opcode metadata.
//!
//! `OP_FLAGS` packs one 16-bit flag word per opcode byte. A non-zero entry
//! with [`SIMPLE`] set means the decoder's table-driven path handles the
//! opcode completely: pop count, result push, immediates to read, operand
//! coercions, and comparison widening all come from the flags. A zero entry
//! means the opcode needs explicit handling (control flow, calls, constants,
//! memory management, the `0xFC` prefix).
//!
//! Internal opcode tags live in encoding space the WebAssembly MVP leaves
//! unused (`0xE0..=0xF1`); they never appear in module bytes and exist only
//! inside the packed AST.

/// Bits 0-1: number of operands popped (0..=3).
pub const POP_MASK: u16 = 0b11;
/// Bit 2: pushes one result slot.
pub const PUSH: u16 = 1 << 2;
/// Bit 3: fully handled by the table-driven decoder path.
pub const SIMPLE: u16 = 1 << 3;
/// Bit 4: trailing unsigned-LEB immediate (local/global index, or the
/// static offset of a memory access).
pub const IMM_LEB: u16 = 1 << 4;
/// Bit 5: alignment immediate to consume before the offset.
pub const ALIGN: u16 = 1 << 5;
/// Bit 6: result is a boolean; widen with a `BoolToInt` node.
pub const BOOL_RESULT: u16 = 1 << 6;
/// Bit 7: reinterpret operands as unsigned 32-bit (`ToU32` nodes).
pub const COERCE_U32: u16 = 1 << 7;
/// Bit 8: reinterpret operands as unsigned 64-bit (`ToU64` nodes).
pub const COERCE_U64: u16 = 1 << 8;
/// Bit 9: emit no node (drop / nop); operands are popped, nothing else.
pub const OMIT: u16 = 1 << 9;
/// Bit 10: AND the second operand with 63 (64-bit shifts and rotates).
pub const MASK63: u16 = 1 << 10;

/// Operands popped by a flagged opcode.
#[inline]
pub fn pop_count(flags: u16) -> usize {
    (flags & POP_MASK) as usize
}

// ── Internal opcode tags ─────────────────────────────────────────────────

/// Coerce an integer expression to a boolean test (`!= 0`).
pub const OP_BOOL: u8 = 0xE0;
/// Negated boolean test (`== 0`).
pub const OP_BOOL_NOT: u8 = 0xE1;
/// Widen a boolean expression to i32 (`as i32`).
pub const OP_BOOL_TO_INT: u8 = 0xE2;
/// Reinterpret the low 32 bits as unsigned (`as u32`).
pub const OP_TO_U32: u8 = 0xE3;
/// Reinterpret 64 bits as unsigned (`as u64`).
pub const OP_TO_U64: u8 = 0xE4;
/// `i32.load8_u` rewritten to direct single-byte indexing.
pub const OP_BYTE_LOAD_32: u8 = 0xE5;
/// `i64.load8_u` rewritten to direct single-byte indexing.
pub const OP_BYTE_LOAD_64: u8 = 0xE6;
/// `0xFC 0..=7` saturating truncations, lowered to `OP_TRUNC_SAT_BASE + n`.
pub const OP_TRUNC_SAT_BASE: u8 = 0xE8;
/// `0xFC 10` memory.copy.
pub const OP_MEMORY_COPY: u8 = 0xF0;
/// `0xFC 11` memory.fill.
pub const OP_MEMORY_FILL: u8 = 0xF1;

// ── Public opcode bytes the decoder matches explicitly ───────────────────

pub const OP_UNREACHABLE: u8 = 0x00;
pub const OP_NOP: u8 = 0x01;
pub const OP_BLOCK: u8 = 0x02;
pub const OP_LOOP: u8 = 0x03;
pub const OP_IF: u8 = 0x04;
pub const OP_ELSE: u8 = 0x05;
pub const OP_END: u8 = 0x0B;
pub const OP_BR: u8 = 0x0C;
pub const OP_BR_IF: u8 = 0x0D;
pub const OP_BR_TABLE: u8 = 0x0E;
pub const OP_RETURN: u8 = 0x0F;
pub const OP_CALL: u8 = 0x10;
pub const OP_CALL_INDIRECT: u8 = 0x11;
pub const OP_DROP: u8 = 0x1A;
pub const OP_SELECT: u8 = 0x1B;
pub const OP_LOCAL_GET: u8 = 0x20;
pub const OP_LOCAL_SET: u8 = 0x21;
pub const OP_LOCAL_TEE: u8 = 0x22;
pub const OP_GLOBAL_GET: u8 = 0x23;
pub const OP_GLOBAL_SET: u8 = 0x24;
pub const OP_MEMORY_SIZE: u8 = 0x3F;
pub const OP_MEMORY_GROW: u8 = 0x40;
pub const OP_I32_CONST: u8 = 0x41;
pub const OP_I64_CONST: u8 = 0x42;
pub const OP_F32_CONST: u8 = 0x43;
pub const OP_F64_CONST: u8 = 0x44;
pub const OP_FC_PREFIX: u8 = 0xFC;

/// The 256-entry metadata table.
pub static OP_FLAGS: [u16; 256] = build_flags();

const fn build_flags() -> [u16; 256] {
    let mut t = [0u16; 256];

    t[OP_NOP as usize] = SIMPLE | OMIT;
    t[OP_DROP as usize] = SIMPLE | OMIT | 1;

    t[OP_LOCAL_GET as usize] = SIMPLE | PUSH | IMM_LEB;
    t[OP_LOCAL_SET as usize] = SIMPLE | IMM_LEB | 1;
    t[OP_LOCAL_TEE as usize] = SIMPLE | PUSH | IMM_LEB | 1;
    t[OP_GLOBAL_GET as usize] = SIMPLE | PUSH | IMM_LEB;
    t[OP_GLOBAL_SET as usize] = SIMPLE | IMM_LEB | 1;

    // Loads 0x28..=0x35: pop address, push value, align + offset immediates.
    let mut op = 0x28;
    while op <= 0x35 {
        t[op] = SIMPLE | PUSH | ALIGN | IMM_LEB | 1;
        op += 1;
    }
    // Stores 0x36..=0x3E: pop address and value.
    let mut op = 0x36;
    while op <= 0x3E {
        t[op] = SIMPLE | ALIGN | IMM_LEB | 2;
        op += 1;
    }

    // i32 comparisons.
    t[0x45] = SIMPLE | PUSH | BOOL_RESULT | 1; // i32.eqz
    let mut op = 0x46;
    while op <= 0x4F {
        t[op] = SIMPLE | PUSH | BOOL_RESULT | 2;
        op += 1;
    }
    t[0x49] |= COERCE_U32; // lt_u
    t[0x4B] |= COERCE_U32; // gt_u
    t[0x4D] |= COERCE_U32; // le_u
    t[0x4F] |= COERCE_U32; // ge_u

    // i64 comparisons.
    t[0x50] = SIMPLE | PUSH | BOOL_RESULT | 1; // i64.eqz
    let mut op = 0x51;
    while op <= 0x5A {
        t[op] = SIMPLE | PUSH | BOOL_RESULT | 2;
        op += 1;
    }
    t[0x54] |= COERCE_U64; // lt_u
    t[0x56] |= COERCE_U64; // gt_u
    t[0x58] |= COERCE_U64; // le_u
    t[0x5A] |= COERCE_U64; // ge_u

    // f32 / f64 comparisons 0x5B..=0x66.
    let mut op = 0x5B;
    while op <= 0x66 {
        t[op] = SIMPLE | PUSH | BOOL_RESULT | 2;
        op += 1;
    }

    // i32 arithmetic: clz/ctz/popcnt unary, the rest binary.
    let mut op = 0x67;
    while op <= 0x69 {
        t[op] = SIMPLE | PUSH | 1;
        op += 1;
    }
    let mut op = 0x6A;
    while op <= 0x78 {
        t[op] = SIMPLE | PUSH | 2;
        op += 1;
    }
    t[0x6E] |= COERCE_U32; // div_u
    t[0x70] |= COERCE_U32; // rem_u
    t[0x76] |= COERCE_U32; // shr_u

    // i64 arithmetic.
    let mut op = 0x79;
    while op <= 0x7B {
        t[op] = SIMPLE | PUSH | 1;
        op += 1;
    }
    let mut op = 0x7C;
    while op <= 0x8A {
        t[op] = SIMPLE | PUSH | 2;
        op += 1;
    }
    t[0x80] |= COERCE_U64; // div_u
    t[0x82] |= COERCE_U64; // rem_u
    t[0x86] |= MASK63; // shl
    t[0x87] |= MASK63; // shr_s
    t[0x88] |= COERCE_U64 | MASK63; // shr_u
    t[0x89] |= MASK63; // rotl
    t[0x8A] |= MASK63; // rotr

    // f32: unary 0x8B..=0x91, binary 0x92..=0x98.
    let mut op = 0x8B;
    while op <= 0x91 {
        t[op] = SIMPLE | PUSH | 1;
        op += 1;
    }
    let mut op = 0x92;
    while op <= 0x98 {
        t[op] = SIMPLE | PUSH | 2;
        op += 1;
    }

    // f64: unary 0x99..=0x9F, binary 0xA0..=0xA6.
    let mut op = 0x99;
    while op <= 0x9F {
        t[op] = SIMPLE | PUSH | 1;
        op += 1;
    }
    let mut op = 0xA0;
    while op <= 0xA6 {
        t[op] = SIMPLE | PUSH | 2;
        op += 1;
    }

    // Conversions and sign extensions 0xA7..=0xC4, all unary.
    let mut op = 0xA7;
    while op <= 0xC4 {
        t[op] = SIMPLE | PUSH | 1;
        op += 1;
    }

    t
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn control_and_const_opcodes_are_explicit() {
        for op in [
            OP_UNREACHABLE,
            OP_BLOCK,
            OP_LOOP,
            OP_IF,
            OP_ELSE,
            OP_END,
            OP_BR,
            OP_BR_TABLE,
            OP_CALL,
            OP_CALL_INDIRECT,
            OP_SELECT,
            OP_MEMORY_SIZE,
            OP_MEMORY_GROW,
            OP_I32_CONST,
            OP_F64_CONST,
            OP_FC_PREFIX,
        ] {
            assert_eq!(OP_FLAGS[op as usize], 0, "opcode {op:#x} must not be SIMPLE");
        }
    }

    #[test]
    fn binary_arithmetic_pops_two_pushes_one() {
        let add = OP_FLAGS[0x6A]; // i32.add
        assert_eq!(pop_count(add), 2);
        assert_ne!(add & PUSH, 0);
        assert_ne!(add & SIMPLE, 0);
        assert_eq!(add & (BOOL_RESULT | COERCE_U32 | COERCE_U64), 0);
    }

    #[test]
    fn drop_and_nop_are_omitted() {
        assert_eq!(pop_count(OP_FLAGS[OP_DROP as usize]), 1);
        assert_ne!(OP_FLAGS[OP_DROP as usize] & OMIT, 0);
        assert_eq!(pop_count(OP_FLAGS[OP_NOP as usize]), 0);
        assert_ne!(OP_FLAGS[OP_NOP as usize] & OMIT, 0);
    }

    #[test]
    fn unsigned_comparisons_carry_coercions() {
        assert_ne!(OP_FLAGS[0x49] & COERCE_U32, 0); // i32.lt_u
        assert_eq!(OP_FLAGS[0x48] & COERCE_U32, 0); // i32.lt_s
        assert_ne!(OP_FLAGS[0x54] & COERCE_U64, 0); // i64.lt_u
        assert_ne!(OP_FLAGS[0x49] & BOOL_RESULT, 0);
    }

    #[test]
    fn sixty_four_bit_shifts_mask_the_amount() {
        for op in 0x86..=0x8A {
            assert_ne!(OP_FLAGS[op] & MASK63, 0, "opcode {op:#x}");
        }
        // 32-bit shifts rely on wrapping_shl/shr masking instead.
        assert_eq!(OP_FLAGS[0x74] & MASK63, 0);
    }

    #[test]
    fn memory_accesses_read_align_and_offset() {
        let load = OP_FLAGS[0x28]; // i32.load
        assert_eq!(pop_count(load), 1);
        assert_ne!(load & (ALIGN | IMM_LEB | PUSH), 0);
        let store = OP_FLAGS[0x3E]; // i64.store32
        assert_eq!(pop_count(store), 2);
        assert_eq!(store & PUSH, 0);
        assert_ne!(store & ALIGN, 0);
    }

    #[test]
    fn locals_and_globals_have_index_immediates() {
        assert_ne!(OP_FLAGS[OP_LOCAL_GET as usize] & IMM_LEB, 0);
        assert_eq!(pop_count(OP_FLAGS[OP_LOCAL_TEE as usize]), 1);
        assert_ne!(OP_FLAGS[OP_LOCAL_TEE as usize] & PUSH, 0);
        assert_eq!(pop_count(OP_FLAGS[OP_GLOBAL_SET as usize]), 1);
        assert_eq!(OP_FLAGS[OP_GLOBAL_SET as usize] & PUSH, 0);
    }

    #[test]
    fn every_simple_entry_has_the_simple_bit() {
        for (op, &flags) in OP_FLAGS.iter().enumerate() {
            if flags != 0 {
                assert_ne!(flags & SIMPLE, 0, "opcode {op:#x} has flags but not SIMPLE");
            }
        }
    }
}
