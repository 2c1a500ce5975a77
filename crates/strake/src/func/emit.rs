//! Node-to-Rust rendering.
//!
//! Every AST node maps to one Rust expression; top-level nodes become
//! statements, prefixed with an assignment to their output slot when they
//! have one. The renditions follow the host substrate: wrapping arithmetic
//! for integer add/sub/mul, runtime helpers for trapping division and
//! NaN-correct float min/max, `as` casts for the coercion pseudo-ops and
//! all float→int truncations (saturating by construction), and
//! `LinearMemory` calls for loads and stores.

use crate::error::CompileError;
use crate::meta::*;

use super::{FuncCompiler, ValTy};

fn line(s: &str) -> String {
    format!("    {s}\n")
}

fn fmt_i32(v: i32) -> String {
    if v == i32::MIN {
        "i32::MIN".to_string()
    } else {
        format!("{v}i32")
    }
}

fn fmt_i64(v: i64) -> String {
    if v == i64::MIN {
        "i64::MIN".to_string()
    } else {
        format!("{v}i64")
    }
}

fn fmt_f32(v: f32) -> String {
    if v.is_finite() {
        format!("{v}f32")
    } else {
        format!("f32::from_bits({:#010x}u32)", v.to_bits())
    }
}

fn fmt_f64(v: f64) -> String {
    if v.is_finite() {
        format!("{v}f64")
    } else {
        format!("f64::from_bits({:#018x}u64)", v.to_bits())
    }
}

impl FuncCompiler<'_> {
    /// Render child `i` of `ptr`: a slot variable or a nested expression.
    fn child_expr(&self, ptr: i32, i: usize) -> Result<String, CompileError> {
        let word = self.ast.child(ptr, i);
        if word >= 0 {
            return self.emit_expr(word);
        }
        let slot = (-word) as usize;
        let ty = self
            .node_meta
            .get(&ptr)
            .and_then(|m| m.operands.get(i))
            .copied()
            .ok_or(CompileError::Internal("missing operand type for slot reference"))?;
        Ok(self.slot_var(slot, ty))
    }

    /// Effective address: wasm address operand (unsigned) plus static offset.
    fn addr_expr(&self, ptr: i32) -> Result<String, CompileError> {
        let offset = self.ast.imm(ptr, 0) as u32;
        // Constant addresses fold into the offset.
        let base = self.ast.child(ptr, 0);
        if base >= 0 && self.ast.opcode(base) == OP_I32_CONST {
            let c = self.ast.imm(base, 0);
            if c >= 0 {
                if let Some(total) = (c as u32).checked_add(offset) {
                    return Ok(format!("{total}usize"));
                }
            }
        }
        let a = self.child_expr(ptr, 0)?;
        if offset == 0 {
            Ok(format!("(({a}) as u32 as usize)"))
        } else {
            Ok(format!("((({a}) as u32 as usize) + {offset})"))
        }
    }

    fn result_ty_of(&self, ptr: i32) -> Result<ValTy, CompileError> {
        self.node_meta
            .get(&ptr)
            .and_then(|m| m.result)
            .ok_or(CompileError::Internal("missing result type for node"))
    }

    fn call_text(&self, ptr: i32, argc: usize) -> Result<String, CompileError> {
        let fidx = self.ast.imm(ptr, 0) as u32;
        let mut args = Vec::with_capacity(argc + 4);
        for i in 0..argc {
            args.push(self.child_expr(ptr, i)?);
        }
        if (fidx as usize) < self.ctx.num_imports {
            let method = self
                .ctx
                .import_methods
                .get(fidx as usize)
                .ok_or(CompileError::Internal("import method name missing"))?;
            Ok(format!("host.{}({})?", method, args.join(", ")))
        } else {
            for name in self.ctx.ctx_arg_list() {
                args.push(name.to_string());
            }
            Ok(format!(
                "func_{}({})?",
                fidx as usize - self.ctx.num_imports,
                args.join(", ")
            ))
        }
    }

    /// Render a top-level node as one or more statements.
    pub(crate) fn emit_statement(&mut self, ptr: i32) -> Result<String, CompileError> {
        let op = self.ast.opcode(ptr);
        match op {
            // Stores.
            0x36..=0x3E => {
                let addr = self.addr_expr(ptr)?;
                let v = self.child_expr(ptr, 1)?;
                let call = match op {
                    0x36 => format!("m.store_i32({addr}, {v})?"),
                    0x37 => format!("m.store_i64({addr}, {v})?"),
                    0x38 => format!("m.store_f32({addr}, {v})?"),
                    0x39 => format!("m.store_f64({addr}, {v})?"),
                    0x3A | 0x3C => format!("m.store_u8({addr}, ({v}) as u8)?"),
                    0x3B | 0x3D => format!("m.store_u16({addr}, ({v}) as u16)?"),
                    _ => format!("m.store_i32({addr}, ({v}) as i32)?"), // i64.store32
                };
                Ok(line(&format!("{call};")))
            }

            OP_MEMORY_COPY => {
                let d = self.child_expr(ptr, 0)?;
                let s = self.child_expr(ptr, 1)?;
                let n = self.child_expr(ptr, 2)?;
                Ok(line(&format!(
                    "m.copy(({d}) as u32, ({s}) as u32, ({n}) as u32)?;"
                )))
            }

            OP_MEMORY_FILL => {
                let d = self.child_expr(ptr, 0)?;
                let v = self.child_expr(ptr, 1)?;
                let n = self.child_expr(ptr, 2)?;
                Ok(line(&format!(
                    "m.fill(({d}) as u32, ({v}) as u8, ({n}) as u32)?;"
                )))
            }

            OP_LOCAL_SET => {
                let idx = self.ast.imm(ptr, 0);
                let v = self.child_expr(ptr, 0)?;
                Ok(line(&format!("l{idx} = {v};")))
            }

            OP_LOCAL_TEE => {
                let idx = self.ast.imm(ptr, 0);
                let slot = self.ast.out_slot(ptr) as usize;
                let ty = self.result_ty_of(ptr)?;
                let var = self.slot_var(slot, ty);
                let v = self.child_expr(ptr, 0)?;
                Ok(line(&format!("{var} = {v}; l{idx} = {var};")))
            }

            OP_GLOBAL_SET => {
                let idx = self.ast.imm(ptr, 0) as usize;
                let v = self.child_expr(ptr, 0)?;
                Ok(line(&format!("g.g{idx} = {v};")))
            }

            OP_CALL => {
                let fidx = self.ast.imm(ptr, 0) as u32;
                let sig = self
                    .ctx
                    .signature_of_func(fidx)
                    .ok_or(CompileError::Internal("call target signature missing"))?
                    .clone();
                let argc = self.ast.child_count(ptr);
                match sig.results.len() {
                    0 => {
                        let call = self.call_text(ptr, argc)?;
                        Ok(line(&format!("{call};")))
                    }
                    1 => {
                        let slot = self.ast.out_slot(ptr) as usize;
                        let var = self.slot_var(slot, sig.results[0]);
                        let call = self.call_text(ptr, argc)?;
                        Ok(line(&format!("{var} = {call};")))
                    }
                    _ => {
                        let start = self.ast.imm(ptr, 1) as usize;
                        let dests: Vec<String> = sig
                            .results
                            .iter()
                            .enumerate()
                            .map(|(i, &ty)| self.slot_var(start + i, ty))
                            .collect();
                        let call = self.call_text(ptr, argc)?;
                        Ok(line(&format!("({}) = {call};", dests.join(", "))))
                    }
                }
            }

            OP_CALL_INDIRECT => self.emit_call_indirect(ptr),

            _ => {
                let expr = self.emit_expr(ptr)?;
                let slot = self.ast.out_slot(ptr) as usize;
                if slot > 0 {
                    let ty = self.result_ty_of(ptr)?;
                    let var = self.slot_var(slot, ty);
                    Ok(line(&format!("{var} = {expr};")))
                } else {
                    Ok(line(&format!("{expr};")))
                }
            }
        }
    }

    fn emit_call_indirect(&mut self, ptr: i32) -> Result<String, CompileError> {
        let type_idx = self.ast.imm(ptr, 0) as u32;
        let canon = *self
            .ctx
            .canonical_type
            .get(type_idx as usize)
            .ok_or(CompileError::Internal("call_indirect type index missing"))?;
        let sig = self
            .ctx
            .signatures
            .get(type_idx as usize)
            .ok_or(CompileError::Internal("call_indirect signature missing"))?
            .clone();
        let argc = self.ast.child_count(ptr) - 1;
        let idx = self.child_expr(ptr, argc)?;

        let mut args = Vec::with_capacity(argc + 4);
        for i in 0..argc {
            args.push(self.child_expr(ptr, i)?);
        }
        for name in self.ctx.ctx_arg_list() {
            args.push(name.to_string());
        }
        let args = args.join(", ");

        let mut out = String::new();
        out.push_str(&line(&format!("let target = t.get(({idx}) as u32)?;")));
        out.push_str(&line(&format!(
            "if target.type_index != {canon} {{ return Err(Trap::IndirectCallTypeMismatch); }}"
        )));

        let head = match sig.results.len() {
            0 => "match target.func_index {".to_string(),
            1 => {
                let slot = self.ast.out_slot(ptr) as usize;
                format!(
                    "{} = match target.func_index {{",
                    self.slot_var(slot, sig.results[0])
                )
            }
            _ => {
                let start = self.ast.imm(ptr, 1) as usize;
                let dests: Vec<String> = sig
                    .results
                    .iter()
                    .enumerate()
                    .map(|(i, &ty)| self.slot_var(start + i, ty))
                    .collect();
                format!("({}) = match target.func_index {{", dests.join(", "))
            }
        };
        out.push_str(&line(&head));
        for (gidx, lidx) in self.ctx.dispatch_targets(canon) {
            if sig.results.is_empty() {
                out.push_str(&line(&format!("    {gidx} => {{ func_{lidx}({args})?; }}")));
            } else {
                out.push_str(&line(&format!("    {gidx} => func_{lidx}({args})?,")));
            }
        }
        out.push_str(&line("    _ => return Err(Trap::UndefinedElement),"));
        out.push_str(&line("};"));
        Ok(out)
    }

    /// Render a node as a Rust expression.
    pub(crate) fn emit_expr(&self, ptr: i32) -> Result<String, CompileError> {
        let op = self.ast.opcode(ptr);
        let c = |i: usize| self.child_expr(ptr, i);

        Ok(match op {
            // ── Constants ────────────────────────────────────────────────
            OP_I32_CONST => fmt_i32(self.ast.imm(ptr, 0)),
            OP_I64_CONST => {
                let idx = self.ast.imm(ptr, 0) as usize;
                let v = *self
                    .consts64
                    .get(idx)
                    .ok_or(CompileError::Internal("i64 sidecar index out of range"))?;
                fmt_i64(v)
            }
            OP_F32_CONST => {
                let at = self.ast.imm(ptr, 0) as usize;
                let bytes: [u8; 4] = self.code[at..at + 4]
                    .try_into()
                    .map_err(|_| CompileError::Internal("f32 constant out of range"))?;
                fmt_f32(f32::from_le_bytes(bytes))
            }
            OP_F64_CONST => {
                let at = self.ast.imm(ptr, 0) as usize;
                let bytes: [u8; 8] = self.code[at..at + 8]
                    .try_into()
                    .map_err(|_| CompileError::Internal("f64 constant out of range"))?;
                fmt_f64(f64::from_le_bytes(bytes))
            }

            // ── Variables ────────────────────────────────────────────────
            OP_LOCAL_GET => format!("l{}", self.ast.imm(ptr, 0)),
            OP_GLOBAL_GET => {
                let idx = self.ast.imm(ptr, 0) as usize;
                let mutable = self
                    .ctx
                    .globals
                    .get(idx)
                    .ok_or(CompileError::Internal("global index out of range"))?
                    .mutable;
                if mutable {
                    format!("g.g{idx}")
                } else {
                    format!("G{idx}")
                }
            }

            // ── Loads ────────────────────────────────────────────────────
            0x28 => format!("m.load_i32({})?", self.addr_expr(ptr)?),
            0x29 => format!("m.load_i64({})?", self.addr_expr(ptr)?),
            0x2A => format!("m.load_f32({})?", self.addr_expr(ptr)?),
            0x2B => format!("m.load_f64({})?", self.addr_expr(ptr)?),
            0x2C => format!("((m.load_u8({})? as i8) as i32)", self.addr_expr(ptr)?),
            0x2D => format!("(m.load_u8({})? as i32)", self.addr_expr(ptr)?),
            0x2E => format!("((m.load_u16({})? as i16) as i32)", self.addr_expr(ptr)?),
            0x2F => format!("(m.load_u16({})? as i32)", self.addr_expr(ptr)?),
            0x30 => format!("((m.load_u8({})? as i8) as i64)", self.addr_expr(ptr)?),
            0x31 => format!("(m.load_u8({})? as i64)", self.addr_expr(ptr)?),
            0x32 => format!("((m.load_u16({})? as i16) as i64)", self.addr_expr(ptr)?),
            0x33 => format!("(m.load_u16({})? as i64)", self.addr_expr(ptr)?),
            0x34 => format!("(m.load_i32({})? as i64)", self.addr_expr(ptr)?),
            0x35 => format!("((m.load_i32({})? as u32) as i64)", self.addr_expr(ptr)?),
            OP_BYTE_LOAD_32 => format!("(m.byte({})? as i32)", self.addr_expr(ptr)?),
            OP_BYTE_LOAD_64 => format!("(m.byte({})? as i64)", self.addr_expr(ptr)?),

            // ── i32 comparisons (booleans; BoolToInt widens) ─────────────
            0x45 => format!("({} == 0)", c(0)?),
            0x46 => format!("({} == {})", c(0)?, c(1)?),
            0x47 => format!("({} != {})", c(0)?, c(1)?),
            0x48 | 0x49 => format!("({} < {})", c(0)?, c(1)?),
            0x4A | 0x4B => format!("({} > {})", c(0)?, c(1)?),
            0x4C | 0x4D => format!("({} <= {})", c(0)?, c(1)?),
            0x4E | 0x4F => format!("({} >= {})", c(0)?, c(1)?),

            // ── i64 comparisons ──────────────────────────────────────────
            0x50 => format!("({} == 0)", c(0)?),
            0x51 => format!("({} == {})", c(0)?, c(1)?),
            0x52 => format!("({} != {})", c(0)?, c(1)?),
            0x53 | 0x54 => format!("({} < {})", c(0)?, c(1)?),
            0x55 | 0x56 => format!("({} > {})", c(0)?, c(1)?),
            0x57 | 0x58 => format!("({} <= {})", c(0)?, c(1)?),
            0x59 | 0x5A => format!("({} >= {})", c(0)?, c(1)?),

            // ── float comparisons ────────────────────────────────────────
            0x5B | 0x61 => format!("({} == {})", c(0)?, c(1)?),
            0x5C | 0x62 => format!("({} != {})", c(0)?, c(1)?),
            0x5D | 0x63 => format!("({} < {})", c(0)?, c(1)?),
            0x5E | 0x64 => format!("({} > {})", c(0)?, c(1)?),
            0x5F | 0x65 => format!("({} <= {})", c(0)?, c(1)?),
            0x60 | 0x66 => format!("({} >= {})", c(0)?, c(1)?),

            // ── i32 arithmetic ───────────────────────────────────────────
            0x67 => format!("({}.leading_zeros() as i32)", c(0)?),
            0x68 => format!("({}.trailing_zeros() as i32)", c(0)?),
            0x69 => format!("({}.count_ones() as i32)", c(0)?),
            0x6A => format!("({}.wrapping_add({}))", c(0)?, c(1)?),
            0x6B => format!("({}.wrapping_sub({}))", c(0)?, c(1)?),
            0x6C => format!("({}.wrapping_mul({}))", c(0)?, c(1)?),
            0x6D => format!("rt::i32_div_s({}, {})?", c(0)?, c(1)?),
            0x6E => format!("rt::i32_div_u({}, {})?", c(0)?, c(1)?),
            0x6F => format!("rt::i32_rem_s({}, {})?", c(0)?, c(1)?),
            0x70 => format!("rt::i32_rem_u({}, {})?", c(0)?, c(1)?),
            0x71 => format!("({} & {})", c(0)?, c(1)?),
            0x72 => format!("({} | {})", c(0)?, c(1)?),
            0x73 => format!("({} ^ {})", c(0)?, c(1)?),
            0x74 => format!("({}.wrapping_shl(({}) as u32))", c(0)?, c(1)?),
            0x75 => format!("({}.wrapping_shr(({}) as u32))", c(0)?, c(1)?),
            0x76 => format!("(({}.wrapping_shr({})) as i32)", c(0)?, c(1)?),
            0x77 => format!("({}.rotate_left(({}) as u32))", c(0)?, c(1)?),
            0x78 => format!("({}.rotate_right(({}) as u32))", c(0)?, c(1)?),

            // ── i64 arithmetic ───────────────────────────────────────────
            0x79 => format!("({}.leading_zeros() as i64)", c(0)?),
            0x7A => format!("({}.trailing_zeros() as i64)", c(0)?),
            0x7B => format!("({}.count_ones() as i64)", c(0)?),
            0x7C => format!("({}.wrapping_add({}))", c(0)?, c(1)?),
            0x7D => format!("({}.wrapping_sub({}))", c(0)?, c(1)?),
            0x7E => format!("({}.wrapping_mul({}))", c(0)?, c(1)?),
            0x7F => format!("rt::i64_div_s({}, {})?", c(0)?, c(1)?),
            0x80 => format!("rt::i64_div_u({}, {})?", c(0)?, c(1)?),
            0x81 => format!("rt::i64_rem_s({}, {})?", c(0)?, c(1)?),
            0x82 => format!("rt::i64_rem_u({}, {})?", c(0)?, c(1)?),
            0x83 => format!("({} & {})", c(0)?, c(1)?),
            0x84 => format!("({} | {})", c(0)?, c(1)?),
            0x85 => format!("({} ^ {})", c(0)?, c(1)?),
            // The second operand arrives masked with 63 by the decoder.
            0x86 => format!("({}.wrapping_shl(({}) as u32))", c(0)?, c(1)?),
            0x87 => format!("({}.wrapping_shr(({}) as u32))", c(0)?, c(1)?),
            0x88 => format!("(({}.wrapping_shr(({}) as u32)) as i64)", c(0)?, c(1)?),
            0x89 => format!("({}.rotate_left(({}) as u32))", c(0)?, c(1)?),
            0x8A => format!("({}.rotate_right(({}) as u32))", c(0)?, c(1)?),

            // ── f32 ──────────────────────────────────────────────────────
            0x8B => format!("({}.abs())", c(0)?),
            0x8C => format!("(-{})", c(0)?),
            0x8D => format!("({}.ceil())", c(0)?),
            0x8E => format!("({}.floor())", c(0)?),
            0x8F => format!("({}.trunc())", c(0)?),
            0x90 => format!("({}.round_ties_even())", c(0)?),
            0x91 => format!("({}.sqrt())", c(0)?),
            0x92 => format!("({} + {})", c(0)?, c(1)?),
            0x93 => format!("({} - {})", c(0)?, c(1)?),
            0x94 => format!("({} * {})", c(0)?, c(1)?),
            0x95 => format!("({} / {})", c(0)?, c(1)?),
            0x96 => format!("rt::fmin_f32({}, {})", c(0)?, c(1)?),
            0x97 => format!("rt::fmax_f32({}, {})", c(0)?, c(1)?),
            0x98 => format!("({}.copysign({}))", c(0)?, c(1)?),

            // ── f64 ──────────────────────────────────────────────────────
            0x99 => format!("({}.abs())", c(0)?),
            0x9A => format!("(-{})", c(0)?),
            0x9B => format!("({}.ceil())", c(0)?),
            0x9C => format!("({}.floor())", c(0)?),
            0x9D => format!("({}.trunc())", c(0)?),
            0x9E => format!("({}.round_ties_even())", c(0)?),
            0x9F => format!("({}.sqrt())", c(0)?),
            0xA0 => format!("({} + {})", c(0)?, c(1)?),
            0xA1 => format!("({} - {})", c(0)?, c(1)?),
            0xA2 => format!("({} * {})", c(0)?, c(1)?),
            0xA3 => format!("({} / {})", c(0)?, c(1)?),
            0xA4 => format!("rt::fmin_f64({}, {})", c(0)?, c(1)?),
            0xA5 => format!("rt::fmax_f64({}, {})", c(0)?, c(1)?),
            0xA6 => format!("({}.copysign({}))", c(0)?, c(1)?),

            // ── Conversions (float→int casts saturate, by design of the
            //    modeled non-trapping truncation) ──────────────────────────
            0xA7 => format!("(({}) as i32)", c(0)?),
            0xA8 | 0xAA => format!("(({}) as i32)", c(0)?),
            0xA9 | 0xAB => format!("((({}) as u32) as i32)", c(0)?),
            0xAC => format!("(({}) as i64)", c(0)?),
            0xAD => format!("((({}) as u32) as i64)", c(0)?),
            0xAE | 0xB0 => format!("(({}) as i64)", c(0)?),
            0xAF | 0xB1 => format!("((({}) as u64) as i64)", c(0)?),
            0xB2 | 0xB4 => format!("(({}) as f32)", c(0)?),
            0xB3 => format!("((({}) as u32) as f32)", c(0)?),
            0xB5 => format!("((({}) as u64) as f32)", c(0)?),
            0xB6 => format!("(({}) as f32)", c(0)?),
            0xB7 | 0xB9 => format!("(({}) as f64)", c(0)?),
            0xB8 => format!("((({}) as u32) as f64)", c(0)?),
            0xBA => format!("((({}) as u64) as f64)", c(0)?),
            0xBB => format!("(({}) as f64)", c(0)?),
            0xBC => format!("(({}).to_bits() as i32)", c(0)?),
            0xBD => format!("(({}).to_bits() as i64)", c(0)?),
            0xBE => format!("f32::from_bits(({}) as u32)", c(0)?),
            0xBF => format!("f64::from_bits(({}) as u64)", c(0)?),
            0xC0 => format!("((({}) as i8) as i32)", c(0)?),
            0xC1 => format!("((({}) as i16) as i32)", c(0)?),
            0xC2 => format!("((({}) as i8) as i64)", c(0)?),
            0xC3 => format!("((({}) as i16) as i64)", c(0)?),
            0xC4 => format!("((({}) as i32) as i64)", c(0)?),

            // ── Saturating truncations (0xFC 0..=7) ──────────────────────
            op if (OP_TRUNC_SAT_BASE..OP_TRUNC_SAT_BASE + 8).contains(&op) => {
                match op - OP_TRUNC_SAT_BASE {
                    0 | 2 => format!("(({}) as i32)", c(0)?),
                    1 | 3 => format!("((({}) as u32) as i32)", c(0)?),
                    4 | 6 => format!("(({}) as i64)", c(0)?),
                    _ => format!("((({}) as u64) as i64)", c(0)?),
                }
            }

            // ── Memory management ────────────────────────────────────────
            OP_MEMORY_SIZE => "m.size()".to_string(),
            OP_MEMORY_GROW => format!("m.grow(({}) as u32)", c(0)?),

            // ── Calls (single result, possibly a statement's right side) ─
            OP_CALL => self.call_text(ptr, self.ast.child_count(ptr))?,

            // ── Select ───────────────────────────────────────────────────
            OP_SELECT => {
                let cond = self.emit_expr(self.ast.child(ptr, 0))?;
                format!("(if {cond} {{ {} }} else {{ {} }})", c(1)?, c(2)?)
            }

            // ── Pseudo-ops ───────────────────────────────────────────────
            OP_BOOL => {
                let inner = self.ast.child(ptr, 0);
                if inner >= 0 && self.ast.opcode(inner) == OP_BOOL_TO_INT {
                    self.emit_expr(self.ast.child(inner, 0))?
                } else {
                    format!("({} != 0)", c(0)?)
                }
            }
            OP_BOOL_NOT => {
                let inner = self.ast.child(ptr, 0);
                if inner >= 0 && self.ast.opcode(inner) == OP_BOOL_TO_INT {
                    format!("(!{})", self.emit_expr(self.ast.child(inner, 0))?)
                } else {
                    format!("({} == 0)", c(0)?)
                }
            }
            OP_BOOL_TO_INT => format!("(({}) as i32)", c(0)?),
            OP_TO_U32 => format!("(({}) as u32)", c(0)?),
            OP_TO_U64 => format!("(({}) as u64)", c(0)?),

            _ => return Err(CompileError::Internal("unknown node opcode during emission")),
        })
    }
}
