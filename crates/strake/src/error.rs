//! Compile-time error kinds.
//!
//! Every variant aborts the current function compilation; partial output is
//! discarded. The pipeline wraps these with `anyhow::Context` naming the
//! function, so callers see e.g. `compiling function 3: operand stack
//! exceeds 255 live slots`.

use std::fmt;

/// Reasons a single function can fail to compile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompileError {
    /// Unknown opcode. For `0xFC`-prefixed instructions the sub-opcode is in
    /// the high byte (`sub << 8 | 0xFC`).
    UnsupportedInstruction(u16),
    /// A memory instruction named a memory other than memory 0.
    UnsupportedMemoryIndex(u32),
    /// `call_indirect` named a table other than table 0.
    UnsupportedTableIndex(u32),
    /// More than 255 operand stack slots live at once.
    DeepStack,
    /// A single basic block's expression forest overflowed the AST arena.
    OversizedBlock,
    /// Invariant violation; should never fire for well-formed input.
    Internal(&'static str),
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompileError::UnsupportedInstruction(op) => {
                if op & 0xFF == 0xFC {
                    write!(f, "unsupported instruction 0xFC {:#x}", op >> 8)
                } else {
                    write!(f, "unsupported instruction {op:#04x}")
                }
            }
            CompileError::UnsupportedMemoryIndex(idx) => {
                write!(f, "memory index {idx} (only memory 0 is supported)")
            }
            CompileError::UnsupportedTableIndex(idx) => {
                write!(f, "table index {idx} (only table 0 is supported)")
            }
            CompileError::DeepStack => write!(f, "operand stack exceeds 255 live slots"),
            CompileError::OversizedBlock => {
                write!(f, "basic block expression forest exceeds the AST arena")
            }
            CompileError::Internal(msg) => write!(f, "internal compiler error: {msg}"),
        }
    }
}

impl std::error::Error for CompileError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_plain_opcode() {
        let e = CompileError::UnsupportedInstruction(0xD0);
        assert_eq!(e.to_string(), "unsupported instruction 0xd0");
    }

    #[test]
    fn display_fc_sub_opcode() {
        let e = CompileError::UnsupportedInstruction(9 << 8 | 0xFC);
        assert_eq!(e.to_string(), "unsupported instruction 0xFC 0x9");
    }

    #[test]
    fn display_limits() {
        assert!(CompileError::DeepStack.to_string().contains("255"));
        assert!(CompileError::UnsupportedMemoryIndex(1)
            .to_string()
            .contains("memory 0"));
    }
}
