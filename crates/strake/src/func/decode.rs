//! Bytecode streaming.
//!
//! The decoder reads a function body byte-by-byte with its own LEB128
//! readers. The metadata table ([`crate::meta::OP_FLAGS`]) fully drives
//! ~150 "simple" opcodes; control flow, calls, constants, memory management
//! and the `0xFC` prefix are handled explicitly.
//!
//! While the current block is dead (after an unconditional transfer),
//! opcodes still consume their immediates so decoding stays in sync, but no
//! nodes are created and the virtual stack is untouched.

use crate::error::CompileError;
use crate::meta::*;

use super::{BlockKind, FuncCompiler, ValTy};

impl FuncCompiler<'_> {
    /// Main decode loop. Consumes the body through its final `end`.
    pub(crate) fn run(&mut self) -> Result<(), CompileError> {
        while !self.frames.is_empty() {
            if self.pos >= self.code.len() {
                return Err(CompileError::Internal("bytecode ended inside a block"));
            }
            let op = self.read_u8()?;
            let flags = OP_FLAGS[op as usize];
            if flags & SIMPLE != 0 {
                self.simple_op(op, flags)?;
            } else {
                self.explicit_op(op)?;
            }
        }
        Ok(())
    }

    // ── Byte readers ─────────────────────────────────────────────────────

    pub(crate) fn read_u8(&mut self) -> Result<u8, CompileError> {
        let b = *self
            .code
            .get(self.pos)
            .ok_or(CompileError::Internal("unexpected end of bytecode"))?;
        self.pos += 1;
        Ok(b)
    }

    pub(crate) fn read_leb_u32(&mut self) -> Result<u32, CompileError> {
        let mut value: u32 = 0;
        let mut shift = 0u32;
        loop {
            let byte = self.read_u8()?;
            value |= ((byte & 0x7F) as u32) << shift;
            if byte & 0x80 == 0 {
                return Ok(value);
            }
            shift += 7;
            if shift >= 35 {
                return Err(CompileError::Internal("unterminated LEB128 value"));
            }
        }
    }

    pub(crate) fn read_leb_i32(&mut self) -> Result<i32, CompileError> {
        Ok(self.read_leb_signed(32)? as i32)
    }

    pub(crate) fn read_leb_i64(&mut self) -> Result<i64, CompileError> {
        self.read_leb_signed(64)
    }

    fn read_leb_signed(&mut self, bits: u32) -> Result<i64, CompileError> {
        let mut value: i64 = 0;
        let mut shift = 0u32;
        loop {
            let byte = self.read_u8()?;
            value |= ((byte & 0x7F) as i64) << shift;
            shift += 7;
            if byte & 0x80 == 0 {
                if shift < 64 && byte & 0x40 != 0 {
                    value |= -1i64 << shift;
                }
                return Ok(value);
            }
            if shift >= bits {
                return Err(CompileError::Internal("unterminated signed LEB128 value"));
            }
        }
    }

    /// Block type: empty, one value type, or a type-section index.
    fn read_block_type(&mut self) -> Result<(Vec<ValTy>, Vec<ValTy>), CompileError> {
        let b = *self
            .code
            .get(self.pos)
            .ok_or(CompileError::Internal("unexpected end of bytecode"))?;
        match b {
            0x40 => {
                self.pos += 1;
                Ok((Vec::new(), Vec::new()))
            }
            0x7F => {
                self.pos += 1;
                Ok((Vec::new(), vec![ValTy::I32]))
            }
            0x7E => {
                self.pos += 1;
                Ok((Vec::new(), vec![ValTy::I64]))
            }
            0x7D => {
                self.pos += 1;
                Ok((Vec::new(), vec![ValTy::F32]))
            }
            0x7C => {
                self.pos += 1;
                Ok((Vec::new(), vec![ValTy::F64]))
            }
            _ => {
                let idx = self.read_leb_signed(33)?;
                if idx < 0 {
                    return Err(CompileError::Internal("negative block type index"));
                }
                let sig = self
                    .ctx
                    .signatures
                    .get(idx as usize)
                    .ok_or(CompileError::Internal("block type index out of range"))?;
                Ok((sig.params.clone(), sig.results.clone()))
            }
        }
    }

    // ── Table-driven path ────────────────────────────────────────────────

    fn simple_op(&mut self, op: u8, flags: u16) -> Result<(), CompileError> {
        if flags & ALIGN != 0 {
            self.read_leb_u32()?; // alignment hint, unused
        }
        let imm = if flags & IMM_LEB != 0 {
            Some(self.read_leb_u32()?)
        } else {
            None
        };

        if self.is_dead() {
            return Ok(());
        }

        let pops = pop_count(flags);
        if flags & OMIT != 0 {
            for _ in 0..pops {
                self.pop_slot()?;
            }
            return Ok(());
        }

        let mut operand_slots = vec![0usize; pops];
        let mut operand_tys = vec![ValTy::I32; pops];
        for i in (0..pops).rev() {
            let (slot, ty) = self.pop_slot()?;
            operand_slots[i] = slot;
            operand_tys[i] = ty;
        }

        // Children: slot references, wrapped by mask and coercion nodes
        // where the flags ask for them. Wrappers are direct pointer children
        // from birth; the inliner treats them as transparent.
        let mut children = Vec::with_capacity(pops);
        for i in 0..pops {
            let mut child = -(operand_slots[i] as i32);
            if flags & MASK63 != 0 && i == 1 {
                let cidx = self.push_const64(63);
                let cnode = self.ast.alloc(OP_I64_CONST, 0, &[], &[cidx])?;
                self.record_meta(cnode, Some(ValTy::I64), Vec::new());
                let masked = self.ast.alloc(0x83, 0, &[child, cnode], &[])?; // i64.and
                self.record_meta(masked, Some(ValTy::I64), vec![operand_tys[i], ValTy::I64]);
                child = masked;
            }
            if flags & COERCE_U32 != 0 {
                let c = self.ast.alloc(OP_TO_U32, 0, &[child], &[])?;
                self.record_meta(c, Some(ValTy::I32), vec![operand_tys[i]]);
                child = c;
            }
            if flags & COERCE_U64 != 0 {
                let c = self.ast.alloc(OP_TO_U64, 0, &[child], &[])?;
                self.record_meta(c, Some(ValTy::I64), vec![operand_tys[i]]);
                child = c;
            }
            children.push(child);
        }

        let imm_words: Vec<i32> = imm.map(|v| v as i32).into_iter().collect();
        let result_ty = self.simple_result_ty(op, imm)?;

        if flags & BOOL_RESULT != 0 {
            let inner = self.ast.alloc(op, 0, &children, &imm_words)?;
            self.record_meta(inner, Some(ValTy::I32), operand_tys);
            let slot = self.push_slot(ValTy::I32)?;
            let widened = self.ast.alloc(OP_BOOL_TO_INT, slot as u8, &[inner], &[])?;
            self.record_meta(widened, Some(ValTy::I32), vec![ValTy::I32]);
            self.ast_ptrs.push(widened);
        } else if flags & PUSH != 0 {
            let ty = result_ty.ok_or(CompileError::Internal("pushing opcode without result type"))?;
            let slot = self.push_slot(ty)?;
            let node = self.ast.alloc(op, slot as u8, &children, &imm_words)?;
            self.record_meta(node, Some(ty), operand_tys);
            self.ast_ptrs.push(node);
        } else {
            let node = self.ast.alloc(op, 0, &children, &imm_words)?;
            self.record_meta(node, None, operand_tys);
            self.ast_ptrs.push(node);
        }
        Ok(())
    }

    /// Result type of a table-driven opcode, `None` for pure statements.
    fn simple_result_ty(&self, op: u8, imm: Option<u32>) -> Result<Option<ValTy>, CompileError> {
        use ValTy::*;
        let ty = match op {
            OP_LOCAL_GET | OP_LOCAL_TEE => {
                let idx = imm.ok_or(CompileError::Internal("local opcode without index"))? as usize;
                *self
                    .locals
                    .get(idx)
                    .ok_or(CompileError::Internal("local index out of range"))?
            }
            OP_LOCAL_SET | OP_GLOBAL_SET => return Ok(None),
            OP_GLOBAL_GET => {
                let idx = imm.ok_or(CompileError::Internal("global opcode without index"))? as usize;
                self.ctx
                    .globals
                    .get(idx)
                    .ok_or(CompileError::Internal("global index out of range"))?
                    .ty
            }
            0x28 | 0x2C..=0x2F => I32,
            0x29 | 0x30..=0x35 => I64,
            0x2A => F32,
            0x2B => F64,
            0x36..=0x3E => return Ok(None),
            0x45..=0x66 => I32, // comparisons (widened separately)
            0x67..=0x78 => I32,
            0x79..=0x8A => I64,
            0x8B..=0x98 => F32,
            0x99..=0xA6 => F64,
            0xA7..=0xAB => I32,
            0xAC..=0xB1 => I64,
            0xB2..=0xB6 => F32,
            0xB7..=0xBB => F64,
            0xBC => I32,
            0xBD => I64,
            0xBE => F32,
            0xBF => F64,
            0xC0 | 0xC1 => I32,
            0xC2..=0xC4 => I64,
            _ => return Err(CompileError::Internal("no result type rule for opcode")),
        };
        Ok(Some(ty))
    }

    // ── Explicit opcodes ─────────────────────────────────────────────────

    fn explicit_op(&mut self, op: u8) -> Result<(), CompileError> {
        match op {
            OP_UNREACHABLE => {
                if self.is_dead() {
                    return Ok(());
                }
                self.finalize_block(false)?;
                self.push_line("return Err(Trap::UnreachableExecuted);");
                self.set_dead();
            }

            OP_BLOCK | OP_LOOP => {
                let (params, results) = self.read_block_type()?;
                if self.is_dead() {
                    self.push_dead_frame();
                    return Ok(());
                }
                self.finalize_block(false)?;
                let kind = if op == OP_BLOCK {
                    BlockKind::Normal
                } else {
                    BlockKind::Loop
                };
                self.push_frame(kind, params, results, None)?;
            }

            OP_IF => {
                let (params, results) = self.read_block_type()?;
                if self.is_dead() {
                    self.push_dead_frame();
                    return Ok(());
                }
                let cond = self
                    .finalize_block(true)?
                    .ok_or(CompileError::Internal("if without a condition"))?;
                self.push_frame(BlockKind::IfElse, params, results, Some(cond.cond))?;
            }

            OP_ELSE => self.else_marker()?,
            OP_END => self.end_marker()?,

            OP_BR => {
                let depth = self.read_leb_u32()?;
                if self.is_dead() {
                    return Ok(());
                }
                self.finalize_block(false)?;
                let stmt = self.jump(depth)?;
                self.push_line(&stmt);
                self.set_dead();
            }

            OP_BR_IF => {
                let depth = self.read_leb_u32()?;
                if self.is_dead() {
                    return Ok(());
                }
                let cond = self
                    .finalize_block(true)?
                    .ok_or(CompileError::Internal("br_if without a condition"))?;
                let stmt = self.jump(depth)?;
                self.push_line(&format!("if {} {{ {} }}", cond.cond, stmt));
            }

            OP_BR_TABLE => {
                let count = self.read_leb_u32()?;
                let mut depths = Vec::with_capacity(count as usize);
                for _ in 0..count {
                    depths.push(self.read_leb_u32()?);
                }
                let default = self.read_leb_u32()?;
                if self.is_dead() {
                    return Ok(());
                }
                let index = self
                    .finalize_block(true)?
                    .ok_or(CompileError::Internal("br_table without an index"))?;
                self.push_line(&format!("match ({}) as u32 {{", index.expr));
                for (i, d) in depths.iter().enumerate() {
                    let stmt = self.jump(*d)?;
                    self.push_line(&format!("    {i} => {{ {stmt} }}"));
                }
                let stmt = self.jump(default)?;
                self.push_line(&format!("    _ => {{ {stmt} }}"));
                self.push_line("}");
                self.set_dead();
            }

            OP_RETURN => {
                if self.is_dead() {
                    return Ok(());
                }
                self.finalize_block(false)?;
                let stmt = self.return_stmt()?;
                self.push_line(&stmt);
                self.set_dead();
            }

            OP_CALL => self.call_op()?,
            OP_CALL_INDIRECT => self.call_indirect_op()?,

            OP_SELECT => {
                if self.is_dead() {
                    return Ok(());
                }
                let (cond_slot, _) = self.pop_slot()?;
                let (v2_slot, v2_ty) = self.pop_slot()?;
                let (v1_slot, v1_ty) = self.pop_slot()?;
                let cond = self.ast.alloc(OP_BOOL, 0, &[-(cond_slot as i32)], &[])?;
                self.record_meta(cond, Some(ValTy::I32), vec![ValTy::I32]);
                let slot = self.push_slot(v1_ty)?;
                // Condition first: the if/else rendering tests it before
                // either value operand.
                let node = self.ast.alloc(
                    OP_SELECT,
                    slot as u8,
                    &[cond, -(v1_slot as i32), -(v2_slot as i32)],
                    &[],
                )?;
                self.record_meta(node, Some(v1_ty), vec![ValTy::I32, v1_ty, v2_ty]);
                self.ast_ptrs.push(node);
            }

            OP_MEMORY_SIZE => {
                let mem = self.read_leb_u32()?;
                if mem != 0 {
                    return Err(CompileError::UnsupportedMemoryIndex(mem));
                }
                if self.is_dead() {
                    return Ok(());
                }
                let slot = self.push_slot(ValTy::I32)?;
                let node = self.ast.alloc(OP_MEMORY_SIZE, slot as u8, &[], &[])?;
                self.record_meta(node, Some(ValTy::I32), Vec::new());
                self.ast_ptrs.push(node);
            }

            OP_MEMORY_GROW => {
                let mem = self.read_leb_u32()?;
                if mem != 0 {
                    return Err(CompileError::UnsupportedMemoryIndex(mem));
                }
                if self.is_dead() {
                    return Ok(());
                }
                let (delta_slot, delta_ty) = self.pop_slot()?;
                let slot = self.push_slot(ValTy::I32)?;
                let node = self
                    .ast
                    .alloc(OP_MEMORY_GROW, slot as u8, &[-(delta_slot as i32)], &[])?;
                self.record_meta(node, Some(ValTy::I32), vec![delta_ty]);
                self.ast_ptrs.push(node);
            }

            OP_I32_CONST => {
                let v = self.read_leb_i32()?;
                if self.is_dead() {
                    return Ok(());
                }
                let slot = self.push_slot(ValTy::I32)?;
                let node = self.ast.alloc(OP_I32_CONST, slot as u8, &[], &[v])?;
                self.record_meta(node, Some(ValTy::I32), Vec::new());
                self.ast_ptrs.push(node);
            }

            OP_I64_CONST => {
                let v = self.read_leb_i64()?;
                if self.is_dead() {
                    return Ok(());
                }
                let idx = self.push_const64(v);
                let slot = self.push_slot(ValTy::I64)?;
                let node = self.ast.alloc(OP_I64_CONST, slot as u8, &[], &[idx])?;
                self.record_meta(node, Some(ValTy::I64), Vec::new());
                self.ast_ptrs.push(node);
            }

            OP_F32_CONST => {
                let offset = self.pos;
                if self.pos + 4 > self.code.len() {
                    return Err(CompileError::Internal("truncated f32 constant"));
                }
                self.pos += 4;
                if self.is_dead() {
                    return Ok(());
                }
                let slot = self.push_slot(ValTy::F32)?;
                let node = self
                    .ast
                    .alloc(OP_F32_CONST, slot as u8, &[], &[offset as i32])?;
                self.record_meta(node, Some(ValTy::F32), Vec::new());
                self.ast_ptrs.push(node);
            }

            OP_F64_CONST => {
                let offset = self.pos;
                if self.pos + 8 > self.code.len() {
                    return Err(CompileError::Internal("truncated f64 constant"));
                }
                self.pos += 8;
                if self.is_dead() {
                    return Ok(());
                }
                let slot = self.push_slot(ValTy::F64)?;
                let node = self
                    .ast
                    .alloc(OP_F64_CONST, slot as u8, &[], &[offset as i32])?;
                self.record_meta(node, Some(ValTy::F64), Vec::new());
                self.ast_ptrs.push(node);
            }

            OP_FC_PREFIX => self.fc_op()?,

            _ => return Err(CompileError::UnsupportedInstruction(op as u16)),
        }
        Ok(())
    }

    fn fc_op(&mut self) -> Result<(), CompileError> {
        let sub = self.read_leb_u32()?;
        match sub {
            // Saturating truncations: i32/i64 from f32/f64, signed/unsigned.
            0..=7 => {
                if self.is_dead() {
                    return Ok(());
                }
                let (slot_in, in_ty) = self.pop_slot()?;
                let result = if sub < 4 { ValTy::I32 } else { ValTy::I64 };
                let slot = self.push_slot(result)?;
                let node = self.ast.alloc(
                    OP_TRUNC_SAT_BASE + sub as u8,
                    slot as u8,
                    &[-(slot_in as i32)],
                    &[],
                )?;
                self.record_meta(node, Some(result), vec![in_ty]);
                self.ast_ptrs.push(node);
            }

            10 => {
                // memory.copy dst_mem src_mem
                let dst_mem = self.read_leb_u32()?;
                let src_mem = self.read_leb_u32()?;
                if dst_mem != 0 || src_mem != 0 {
                    return Err(CompileError::UnsupportedMemoryIndex(dst_mem.max(src_mem)));
                }
                if self.is_dead() {
                    return Ok(());
                }
                let (n_slot, _) = self.pop_slot()?;
                let (s_slot, _) = self.pop_slot()?;
                let (d_slot, _) = self.pop_slot()?;
                let node = self.ast.alloc(
                    OP_MEMORY_COPY,
                    0,
                    &[-(d_slot as i32), -(s_slot as i32), -(n_slot as i32)],
                    &[],
                )?;
                self.record_meta(node, None, vec![ValTy::I32, ValTy::I32, ValTy::I32]);
                self.ast_ptrs.push(node);
            }

            11 => {
                // memory.fill mem
                let mem = self.read_leb_u32()?;
                if mem != 0 {
                    return Err(CompileError::UnsupportedMemoryIndex(mem));
                }
                if self.is_dead() {
                    return Ok(());
                }
                let (n_slot, _) = self.pop_slot()?;
                let (v_slot, _) = self.pop_slot()?;
                let (d_slot, _) = self.pop_slot()?;
                // Fill value ahead of the count, matching left-to-right
                // evaluation of the filled range.
                let node = self.ast.alloc(
                    OP_MEMORY_FILL,
                    0,
                    &[-(d_slot as i32), -(v_slot as i32), -(n_slot as i32)],
                    &[],
                )?;
                self.record_meta(node, None, vec![ValTy::I32, ValTy::I32, ValTy::I32]);
                self.ast_ptrs.push(node);
            }

            other => {
                return Err(CompileError::UnsupportedInstruction(
                    ((other & 0xFF) as u16) << 8 | 0xFC,
                ))
            }
        }
        Ok(())
    }

    fn call_op(&mut self) -> Result<(), CompileError> {
        let fidx = self.read_leb_u32()?;
        if self.is_dead() {
            return Ok(());
        }
        let sig = self
            .ctx
            .signature_of_func(fidx)
            .ok_or(CompileError::Internal("call target out of range"))?
            .clone();

        let argc = sig.params.len();
        let mut children = vec![0i32; argc];
        let mut operand_tys = vec![ValTy::I32; argc];
        for i in (0..argc).rev() {
            let (slot, ty) = self.pop_slot()?;
            children[i] = -(slot as i32);
            operand_tys[i] = ty;
        }

        match sig.results.len() {
            0 => {
                let node = self.ast.alloc(OP_CALL, 0, &children, &[fidx as i32])?;
                self.record_meta(node, None, operand_tys);
                self.ast_ptrs.push(node);
            }
            1 => {
                let ty = sig.results[0];
                let slot = self.push_slot(ty)?;
                let node = self
                    .ast
                    .alloc(OP_CALL, slot as u8, &children, &[fidx as i32])?;
                self.record_meta(node, Some(ty), operand_tys);
                self.ast_ptrs.push(node);
            }
            _ => {
                // Multi-value: results land in consecutive slots starting
                // just above the popped arguments; the emitter produces a
                // destructuring assignment.
                let start = self.stack_top + 1;
                for &ty in &sig.results {
                    self.push_slot(ty)?;
                }
                let node = self
                    .ast
                    .alloc(OP_CALL, 0, &children, &[fidx as i32, start as i32])?;
                self.record_meta(node, None, operand_tys);
                self.ast_ptrs.push(node);
            }
        }
        Ok(())
    }

    fn call_indirect_op(&mut self) -> Result<(), CompileError> {
        let type_idx = self.read_leb_u32()?;
        let table = self.read_leb_u32()?;
        if table != 0 {
            return Err(CompileError::UnsupportedTableIndex(table));
        }
        if self.is_dead() {
            return Ok(());
        }
        let sig = self
            .ctx
            .signatures
            .get(type_idx as usize)
            .ok_or(CompileError::Internal("call_indirect type index out of range"))?
            .clone();

        let (idx_slot, idx_ty) = self.pop_slot()?;
        let argc = sig.params.len();
        let mut children = vec![0i32; argc + 1];
        let mut operand_tys = vec![ValTy::I32; argc + 1];
        for i in (0..argc).rev() {
            let (slot, ty) = self.pop_slot()?;
            children[i] = -(slot as i32);
            operand_tys[i] = ty;
        }
        children[argc] = -(idx_slot as i32);
        operand_tys[argc] = idx_ty;

        match sig.results.len() {
            0 => {
                let node = self
                    .ast
                    .alloc(OP_CALL_INDIRECT, 0, &children, &[type_idx as i32])?;
                self.record_meta(node, None, operand_tys);
                self.ast_ptrs.push(node);
            }
            1 => {
                let ty = sig.results[0];
                let slot = self.push_slot(ty)?;
                let node =
                    self.ast
                        .alloc(OP_CALL_INDIRECT, slot as u8, &children, &[type_idx as i32])?;
                self.record_meta(node, Some(ty), operand_tys);
                self.ast_ptrs.push(node);
            }
            _ => {
                let start = self.stack_top + 1;
                for &ty in &sig.results {
                    self.push_slot(ty)?;
                }
                let node = self.ast.alloc(
                    OP_CALL_INDIRECT,
                    0,
                    &children,
                    &[type_idx as i32, start as i32],
                )?;
                self.record_meta(node, None, operand_tys);
                self.ast_ptrs.push(node);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::func::{FuncSig, ModuleCtx};

    fn compiler_for<'a>(ctx: &'a ModuleCtx, code: &'a [u8]) -> FuncCompiler<'a> {
        let mut fc = FuncCompiler::new(ctx, code, Vec::new(), 0);
        fc.frames.push(crate::func::BlockFrame {
            kind: BlockKind::Normal,
            param_tys: Vec::new(),
            result_tys: Vec::new(),
            parent_stack_top: 0,
            is_dead: false,
            born_dead: false,
            else_seen: false,
            label_break: -1,
            label_cont_or_else: -1,
            nested_label: 0,
            opens_dispatch: false,
        });
        fc
    }

    #[test]
    fn leb_u32_single_and_multi_byte() {
        let ctx = ModuleCtx::default();
        let mut fc = compiler_for(&ctx, &[0x7F, 0xE5, 0x8E, 0x26]);
        assert_eq!(fc.read_leb_u32().unwrap(), 127);
        assert_eq!(fc.read_leb_u32().unwrap(), 624485);
    }

    #[test]
    fn leb_i32_negative() {
        let ctx = ModuleCtx::default();
        // -1 is 0x7F; -123456 is 0xC0 0xBB 0x78.
        let mut fc = compiler_for(&ctx, &[0x7F, 0xC0, 0xBB, 0x78]);
        assert_eq!(fc.read_leb_i32().unwrap(), -1);
        assert_eq!(fc.read_leb_i32().unwrap(), -123456);
    }

    #[test]
    fn leb_i64_min() {
        let ctx = ModuleCtx::default();
        // i64::MIN = 0x80 x9, 0x7F.
        let mut fc = compiler_for(
            &ctx,
            &[0x80, 0x80, 0x80, 0x80, 0x80, 0x80, 0x80, 0x80, 0x80, 0x7F],
        );
        assert_eq!(fc.read_leb_i64().unwrap(), i64::MIN);
    }

    #[test]
    fn nonzero_memory_index_is_rejected() {
        let ctx = ModuleCtx {
            has_memory: true,
            ..Default::default()
        };
        // memory.size with memory index 1, then end.
        let mut fc = compiler_for(&ctx, &[0x3F, 0x01, 0x0B]);
        assert_eq!(fc.run(), Err(CompileError::UnsupportedMemoryIndex(1)));
    }

    #[test]
    fn nonzero_table_index_is_rejected() {
        let ctx = ModuleCtx {
            signatures: vec![FuncSig::default()],
            has_table: true,
            ..Default::default()
        };
        // i32.const 0; call_indirect type 0 table 1; end.
        let mut fc = compiler_for(&ctx, &[0x41, 0x00, 0x11, 0x00, 0x01, 0x0B]);
        assert_eq!(fc.run(), Err(CompileError::UnsupportedTableIndex(1)));
    }

    #[test]
    fn unknown_opcode_is_unsupported() {
        let ctx = ModuleCtx::default();
        let mut fc = compiler_for(&ctx, &[0xD3, 0x0B]);
        assert_eq!(fc.run(), Err(CompileError::UnsupportedInstruction(0xD3)));
    }

    #[test]
    fn unknown_fc_sub_opcode_is_unsupported() {
        let ctx = ModuleCtx::default();
        let mut fc = compiler_for(&ctx, &[0xFC, 0x09, 0x0B]);
        assert_eq!(
            fc.run(),
            Err(CompileError::UnsupportedInstruction(0x09 << 8 | 0xFC))
        );
    }

    #[test]
    fn deep_stack_overflows_at_256() {
        let ctx = ModuleCtx::default();
        // 256 × i32.const 0, then enough drops and an end (never reached).
        let mut code = Vec::new();
        for _ in 0..256 {
            code.extend_from_slice(&[0x41, 0x00]);
        }
        code.push(0x0B);
        let mut fc = compiler_for(&ctx, &code);
        assert_eq!(fc.run(), Err(CompileError::DeepStack));
    }

    #[test]
    fn exactly_255_slots_is_accepted() {
        let ctx = ModuleCtx::default();
        let mut code = Vec::new();
        for _ in 0..255 {
            code.extend_from_slice(&[0x41, 0x00]);
        }
        for _ in 0..255 {
            code.push(0x1A); // drop
        }
        code.push(0x0B);
        let mut fc = compiler_for(&ctx, &code);
        assert!(fc.run().is_ok());
        assert_eq!(fc.stack_limit, 255);
    }
}
