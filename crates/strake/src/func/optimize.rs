//! Basic-block finalization: child inlining, peephole rewriting, emission.
//!
//! `finalize_block` runs at every control boundary. The inliner scans the
//! block's top-level nodes in reverse, folding each consumer's stack-slot
//! references onto their nearest producers; an inlined producer's top-level
//! entry is nulled so it is not emitted twice. Coercion and mask wrappers
//! are pointer children from birth, so the search simply descends through
//! them.
//!
//! Inlining moves a producer's evaluation point to its consumer, so it is
//! only legal when nothing the producer observes changes in between:
//!
//! - memory-access consumers take only integer constants and `local.get`
//!   across (aliasing barrier);
//! - producers rooted at calls, `memory.grow`, or `local.tee` never move
//!   (observable effects; assignment is not an expression in Rust; nested
//!   `&mut` borrows of the context parameters do not compile);
//! - call consumers reject producers touching memory or globals (the
//!   callee already borrows those parameters mutably);
//! - the walk tracks intervening writes to memory, locals, globals, and
//!   slots, and rejects producers that read anything written in between.
//!
//! The peephole pass then rewrites surviving nodes: integer constant
//! folding, algebraic identities, and the single-byte-load variant swap.

use crate::error::CompileError;
use crate::meta::*;

use super::{FuncCompiler, ValTy};

/// Result of extracting the top-of-stack producer at a control boundary.
pub(crate) struct Extracted {
    /// The value as an i32 expression (`br_table` index).
    pub expr: String,
    /// The value as a boolean test (`if` / `br_if` / `select` conditions).
    pub cond: String,
}

#[derive(Default, Clone)]
struct Effects {
    mem_write: bool,
    calls: bool,
    slots_written: Vec<u8>,
    locals_written: Vec<u32>,
    globals_written: Vec<u32>,
}

#[derive(Default)]
struct TreeProps {
    reads_mem: bool,
    touches_mem_or_globals: bool,
    slot_reads: Vec<u8>,
    local_reads: Vec<u32>,
    global_reads: Vec<u32>,
}

fn is_memory_access(op: u8) -> bool {
    matches!(op, 0x28..=0x3E | OP_BYTE_LOAD_32 | OP_BYTE_LOAD_64 | OP_MEMORY_COPY | OP_MEMORY_FILL)
}

impl FuncCompiler<'_> {
    /// Optimize the accumulated block, flush its statements into the body,
    /// and reset the per-block state. With `extract` set, the top-of-stack
    /// producer is popped and returned as a free-standing expression instead
    /// of being assigned to its slot.
    pub(crate) fn finalize_block(
        &mut self,
        extract: bool,
    ) -> Result<Option<Extracted>, CompileError> {
        self.inline_pass();
        self.peephole_pass()?;

        let mut extract_pos = None;
        if extract {
            // Only the last live node is safe to relocate past the block's
            // remaining statements.
            if let Some(last) = self.ast_ptrs.iter().rposition(|&p| p >= 0) {
                let ptr = self.ast_ptrs[last];
                if self.ast.out_slot(ptr) as usize == self.stack_top && self.stack_top > 0 {
                    extract_pos = Some(last);
                }
            }
        }

        for i in 0..self.ast_ptrs.len() {
            if Some(i) == extract_pos {
                continue;
            }
            let ptr = self.ast_ptrs[i];
            if ptr < 0 {
                continue;
            }
            let stmt = self.emit_statement(ptr)?;
            self.body.push_str(&stmt);
        }

        let result = if extract {
            let extracted = match extract_pos {
                Some(i) => {
                    let ptr = self.ast_ptrs[i];
                    let expr = self.emit_expr(ptr)?;
                    let cond = if self.ast.opcode(ptr) == OP_BOOL_TO_INT {
                        self.emit_expr(self.ast.child(ptr, 0))?
                    } else {
                        format!("({expr} != 0)")
                    };
                    Extracted { expr, cond }
                }
                None => {
                    let ty = *self
                        .type_stack
                        .last()
                        .ok_or(CompileError::Internal("extraction from empty stack"))?;
                    let var = self.slot_var(self.stack_top, ty);
                    Extracted {
                        cond: format!("({var} != 0)"),
                        expr: var,
                    }
                }
            };
            self.pop_slot()?;
            Some(extracted)
        } else {
            None
        };

        self.ast.reset();
        self.ast_ptrs.clear();
        self.consts64.clear();
        self.node_meta.clear();
        Ok(result)
    }

    // ── Inlining ─────────────────────────────────────────────────────────

    fn inline_pass(&mut self) {
        for pi in (0..self.ast_ptrs.len()).rev() {
            let p = self.ast_ptrs[pi];
            if p < 0 {
                continue;
            }
            let fresh = Effects::default();
            self.inline_children(p, pi, &fresh);
        }
    }

    /// Resolve `node`'s slot-reference children against producers appearing
    /// before `start_pos`, carrying the effects already crossed.
    fn inline_children(&mut self, node: i32, start_pos: usize, inherited: &Effects) {
        let node_op = self.ast.opcode(node);
        for ci in 0..self.ast.child_count(node) {
            let child = self.ast.child(node, ci);
            if child >= 0 {
                // Wrapper created at decode time, evaluated at this node's
                // position; descend transparently.
                self.inline_children(child, start_pos, inherited);
                continue;
            }
            let slot = (-child) as u8;
            let mut eff = inherited.clone();
            let mut qi = start_pos;
            while qi > 0 {
                qi -= 1;
                let q = self.ast_ptrs[qi];
                if q < 0 {
                    continue; // already inlined elsewhere; evaluates later
                }
                if self.ast.out_slot(q) == slot {
                    if self.can_inline(node_op, q, &eff) {
                        self.ast.set_child(node, ci, q);
                        self.ast_ptrs[qi] = -1;
                        self.inline_children(q, qi, &eff);
                    }
                    break; // nearest producer decides, inlined or not
                }
                self.accumulate_effects(q, &mut eff);
            }
        }
    }

    fn accumulate_effects(&self, q: i32, eff: &mut Effects) {
        let out = self.ast.out_slot(q);
        if out > 0 {
            eff.slots_written.push(out);
        }
        match self.ast.opcode(q) {
            0x36..=0x3E | OP_MEMORY_COPY | OP_MEMORY_FILL | OP_MEMORY_GROW => {
                eff.mem_write = true;
            }
            OP_CALL | OP_CALL_INDIRECT => eff.calls = true,
            OP_LOCAL_SET | OP_LOCAL_TEE => {
                eff.locals_written.push(self.ast.imm(q, 0) as u32);
            }
            OP_GLOBAL_SET => eff.globals_written.push(self.ast.imm(q, 0) as u32),
            _ => {}
        }
    }

    fn collect_props(&self, ptr: i32, props: &mut TreeProps) {
        match self.ast.opcode(ptr) {
            0x28..=0x3E | OP_BYTE_LOAD_32 | OP_BYTE_LOAD_64 | OP_MEMORY_SIZE
            | OP_MEMORY_GROW | OP_MEMORY_COPY | OP_MEMORY_FILL => {
                props.reads_mem = true;
                props.touches_mem_or_globals = true;
            }
            OP_GLOBAL_GET => {
                props.global_reads.push(self.ast.imm(ptr, 0) as u32);
                props.touches_mem_or_globals = true;
            }
            OP_GLOBAL_SET => props.touches_mem_or_globals = true,
            OP_LOCAL_GET => props.local_reads.push(self.ast.imm(ptr, 0) as u32),
            OP_CALL | OP_CALL_INDIRECT => {
                props.reads_mem = true;
                props.touches_mem_or_globals = true;
            }
            _ => {}
        }
        for ci in 0..self.ast.child_count(ptr) {
            let c = self.ast.child(ptr, ci);
            if c >= 0 {
                self.collect_props(c, props);
            } else {
                props.slot_reads.push((-c) as u8);
            }
        }
    }

    fn can_inline(&self, parent_op: u8, q: i32, eff: &Effects) -> bool {
        let qop = self.ast.opcode(q);
        // Immovable producers.
        if matches!(qop, OP_CALL | OP_CALL_INDIRECT | OP_MEMORY_GROW | OP_LOCAL_TEE) {
            return false;
        }
        // Aliasing barrier: memory-access consumers accept only integer
        // constants and local.get.
        if is_memory_access(parent_op)
            && !matches!(qop, OP_I32_CONST | OP_I64_CONST | OP_LOCAL_GET)
        {
            return false;
        }
        let mut props = TreeProps::default();
        self.collect_props(q, &mut props);
        // Call arguments cannot alias the mutably borrowed context.
        if matches!(parent_op, OP_CALL | OP_CALL_INDIRECT) && props.touches_mem_or_globals {
            return false;
        }
        if props.slot_reads.iter().any(|s| eff.slots_written.contains(s)) {
            return false;
        }
        if props.reads_mem && (eff.mem_write || eff.calls) {
            return false;
        }
        if props.local_reads.iter().any(|l| eff.locals_written.contains(l)) {
            return false;
        }
        if !props.global_reads.is_empty()
            && (eff.calls || props.global_reads.iter().any(|g| eff.globals_written.contains(g)))
        {
            return false;
        }
        true
    }

    // ── Peephole ─────────────────────────────────────────────────────────

    fn peephole_pass(&mut self) -> Result<(), CompileError> {
        for i in 0..self.ast_ptrs.len() {
            let p = self.ast_ptrs[i];
            if p < 0 {
                continue;
            }
            let w = self.peephole_node(p, false)?;
            if w == p {
                continue;
            }
            if w < 0 {
                // The statement reduced to a bare read of its own slot.
                if self.ast.out_slot(p) as i32 == -w {
                    self.ast_ptrs[i] = -1;
                }
            } else {
                self.ast.set_out_slot(w, self.ast.out_slot(p));
                self.ast_ptrs[i] = w;
            }
        }
        Ok(())
    }

    /// Rewrite one node bottom-up. Returns a replacement word: the same
    /// pointer, a new pointer, or (when `allow_slot`) a bare slot
    /// reference the node reduced to.
    fn peephole_node(&mut self, ptr: i32, allow_slot: bool) -> Result<i32, CompileError> {
        for ci in 0..self.ast.child_count(ptr) {
            let c = self.ast.child(ptr, ci);
            if c >= 0 {
                let w = self.peephole_node(c, true)?;
                if w != c {
                    self.ast.set_child(ptr, ci, w);
                }
            }
        }

        match self.ast.opcode(ptr) {
            0x2D => self.ast.set_opcode(ptr, OP_BYTE_LOAD_32), // i32.load8_u
            0x31 => self.ast.set_opcode(ptr, OP_BYTE_LOAD_64), // i64.load8_u
            _ => {}
        }

        if let Some(folded) = self.try_fold(ptr)? {
            return Ok(folded);
        }
        if let Some(word) = self.try_identity(ptr) {
            if word < 0 && !allow_slot {
                return Ok(ptr);
            }
            return Ok(word);
        }
        Ok(ptr)
    }

    fn const_i32_of(&self, word: i32) -> Option<i32> {
        if word >= 0 && self.ast.opcode(word) == OP_I32_CONST {
            Some(self.ast.imm(word, 0))
        } else {
            None
        }
    }

    fn const_i64_of(&self, word: i32) -> Option<i64> {
        if word >= 0 && self.ast.opcode(word) == OP_I64_CONST {
            self.consts64.get(self.ast.imm(word, 0) as usize).copied()
        } else {
            None
        }
    }

    /// Fold integer arithmetic over constant operands. Operations that can
    /// trap (division, remainder) are never folded.
    fn try_fold(&mut self, ptr: i32) -> Result<Option<i32>, CompileError> {
        let op = self.ast.opcode(ptr);
        let out = self.ast.out_slot(ptr);
        match op {
            // i32 binary
            0x6A | 0x6B | 0x6C | 0x71 | 0x72 | 0x73 => {
                let (a, b) = (self.ast.child(ptr, 0), self.ast.child(ptr, 1));
                if let (Some(x), Some(y)) = (self.const_i32_of(a), self.const_i32_of(b)) {
                    let v = match op {
                        0x6A => x.wrapping_add(y),
                        0x6B => x.wrapping_sub(y),
                        0x6C => x.wrapping_mul(y),
                        0x71 => x & y,
                        0x72 => x | y,
                        _ => x ^ y,
                    };
                    let node = self.ast.alloc(OP_I32_CONST, out, &[], &[v])?;
                    self.record_meta(node, Some(ValTy::I32), Vec::new());
                    return Ok(Some(node));
                }
            }
            // i32 unary bit counts
            0x67 | 0x68 | 0x69 => {
                if let Some(x) = self.const_i32_of(self.ast.child(ptr, 0)) {
                    let v = match op {
                        0x67 => x.leading_zeros() as i32,
                        0x68 => x.trailing_zeros() as i32,
                        _ => x.count_ones() as i32,
                    };
                    let node = self.ast.alloc(OP_I32_CONST, out, &[], &[v])?;
                    self.record_meta(node, Some(ValTy::I32), Vec::new());
                    return Ok(Some(node));
                }
            }
            // i64 binary
            0x7C | 0x7D | 0x7E | 0x83 | 0x84 | 0x85 => {
                let (a, b) = (self.ast.child(ptr, 0), self.ast.child(ptr, 1));
                if let (Some(x), Some(y)) = (self.const_i64_of(a), self.const_i64_of(b)) {
                    let v = match op {
                        0x7C => x.wrapping_add(y),
                        0x7D => x.wrapping_sub(y),
                        0x7E => x.wrapping_mul(y),
                        0x83 => x & y,
                        0x84 => x | y,
                        _ => x ^ y,
                    };
                    let idx = self.push_const64(v);
                    let node = self.ast.alloc(OP_I64_CONST, out, &[], &[idx])?;
                    self.record_meta(node, Some(ValTy::I64), Vec::new());
                    return Ok(Some(node));
                }
            }
            _ => {}
        }
        Ok(None)
    }

    /// Algebraic identities that reduce a node to one of its children.
    fn try_identity(&self, ptr: i32) -> Option<i32> {
        let op = self.ast.opcode(ptr);
        let a = || self.ast.child(ptr, 0);
        let b = || self.ast.child(ptr, 1);
        match op {
            // x + 0, x | 0, x ^ 0 (both sides); x - 0.
            0x6A | 0x72 | 0x73 => {
                if self.const_i32_of(b()) == Some(0) {
                    return Some(a());
                }
                if self.const_i32_of(a()) == Some(0) {
                    return Some(b());
                }
            }
            0x6B => {
                if self.const_i32_of(b()) == Some(0) {
                    return Some(a());
                }
            }
            // x * 1.
            0x6C => {
                if self.const_i32_of(b()) == Some(1) {
                    return Some(a());
                }
                if self.const_i32_of(a()) == Some(1) {
                    return Some(b());
                }
            }
            // x & -1.
            0x71 => {
                if self.const_i32_of(b()) == Some(-1) {
                    return Some(a());
                }
                if self.const_i32_of(a()) == Some(-1) {
                    return Some(b());
                }
            }
            // Shift by zero.
            0x74 | 0x75 => {
                if self.const_i32_of(b()) == Some(0) {
                    return Some(a());
                }
            }
            // i64 counterparts.
            0x7C | 0x84 | 0x85 => {
                if self.const_i64_of(b()) == Some(0) {
                    return Some(a());
                }
                if self.const_i64_of(a()) == Some(0) {
                    return Some(b());
                }
            }
            0x7D => {
                if self.const_i64_of(b()) == Some(0) {
                    return Some(a());
                }
            }
            0x7E => {
                if self.const_i64_of(b()) == Some(1) {
                    return Some(a());
                }
                if self.const_i64_of(a()) == Some(1) {
                    return Some(b());
                }
            }
            0x83 => {
                if self.const_i64_of(b()) == Some(-1) {
                    return Some(a());
                }
                if self.const_i64_of(a()) == Some(-1) {
                    return Some(b());
                }
            }
            _ => {}
        }
        None
    }
}
