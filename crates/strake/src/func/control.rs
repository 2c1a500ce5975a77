//! Structured control-flow lowering.
//!
//! Two strategies, selected per block by nesting depth:
//!
//! - **Nested mode** (depth < [`MAX_BLOCK_DEPTH`]): native Rust labels.
//!   `block` opens `'b{n}: {`, `loop` opens `'b{n}: loop {`, `if` opens a
//!   labeled block around a plain `if`. Branches are `break 'b{n}` /
//!   `continue 'b{n}`.
//! - **Dispatch mode** (depth ≥ limit): one `'d{n}: loop { match l{n} { .. } }`
//!   region. Every label point closes the current match arm with an explicit
//!   `l{n} = next;` (Rust `match` has no fallthrough) and opens the next
//!   arm; branches assign `l{n}` and `continue 'd{n};`. The wildcard arm
//!   breaks the loop, which also serves as the region-closing frame's break
//!   target.
//!
//! Branches consult the *target* frame's own label fields, so branches from
//! a dispatch-mode block to an enclosing nested-mode block come out as plain
//! labeled breaks.
//!
//! Jumping to frame 0 returns from the function: nothing, the top slot, or
//! a tuple of the top slots depending on return arity. Branches to a loop
//! re-seed its parameter slots, forward branches copy block results into the
//! target's result slots, and copies where source and destination coincide
//! are elided.

use crate::error::CompileError;

use super::{BlockFrame, BlockKind, DispatchRegion, FuncCompiler, ValTy, MAX_BLOCK_DEPTH};

impl FuncCompiler<'_> {
    fn next_case(&mut self) -> Result<u32, CompileError> {
        let region = self
            .dispatch
            .as_mut()
            .ok_or(CompileError::Internal("case label outside dispatch region"))?;
        let c = region.next_case;
        region.next_case += 1;
        Ok(c)
    }

    /// Push a frame for a block decoded inside dead code. It tracks nesting
    /// only; nothing is emitted and the stack is untouched.
    pub(crate) fn push_dead_frame(&mut self) {
        self.frames.push(BlockFrame {
            kind: BlockKind::Normal,
            param_tys: Vec::new(),
            result_tys: Vec::new(),
            parent_stack_top: self.stack_top,
            is_dead: true,
            born_dead: true,
            else_seen: false,
            label_break: -1,
            label_cont_or_else: -1,
            nested_label: 0,
            opens_dispatch: false,
        });
    }

    /// Open a live block and emit its opening syntax. `cond` is the already
    /// rendered boolean test for `if` blocks.
    pub(crate) fn push_frame(
        &mut self,
        kind: BlockKind,
        param_tys: Vec<ValTy>,
        result_tys: Vec<ValTy>,
        cond: Option<String>,
    ) -> Result<(), CompileError> {
        let parent_stack_top = self
            .stack_top
            .checked_sub(param_tys.len())
            .ok_or(CompileError::Internal("block parameters exceed stack depth"))?;

        let mut frame = BlockFrame {
            kind,
            param_tys,
            result_tys,
            parent_stack_top,
            is_dead: false,
            born_dead: false,
            else_seen: false,
            label_break: -1,
            label_cont_or_else: -1,
            nested_label: 0,
            opens_dispatch: false,
        };

        // The implicit outer frame does not count toward the nesting limit.
        if self.frames.len() - 1 < MAX_BLOCK_DEPTH {
            let n = self.label_seq;
            self.label_seq += 1;
            frame.nested_label = n;
            match kind {
                BlockKind::Normal => self.push_line(&format!("'b{n}: {{")),
                BlockKind::Loop => self.push_line(&format!("'b{n}: loop {{")),
                BlockKind::IfElse => {
                    let cond =
                        cond.ok_or(CompileError::Internal("if block without a condition"))?;
                    self.push_line(&format!("'b{n}: {{"));
                    self.push_line(&format!("if {cond} {{"));
                }
            }
        } else {
            // The exact boundary starts the single dispatch region.
            if self.dispatch.is_none() {
                let id = self.label_seq;
                self.label_seq += 1;
                self.dispatch = Some(DispatchRegion { id, next_case: 1 });
                let entry = self.next_case()?;
                self.push_line(&format!("let mut l{id}: u32 = {entry};"));
                self.push_line(&format!("'d{id}: loop {{ match l{id} {{ {entry} => {{"));
                frame.opens_dispatch = true;
            }
            let d = self
                .dispatch
                .as_ref()
                .ok_or(CompileError::Internal("dispatch region missing"))?
                .id;
            match kind {
                BlockKind::Normal => {
                    frame.label_break = self.next_case()? as i32;
                }
                BlockKind::Loop => {
                    let cont = self.next_case()?;
                    frame.label_cont_or_else = cont as i32;
                    frame.label_break = self.next_case()? as i32;
                    // Arm boundary at the loop head so backward branches can
                    // re-enter it.
                    self.push_line(&format!("l{d} = {cont};"));
                    self.push_line(&format!("}} {cont} => {{"));
                }
                BlockKind::IfElse => {
                    let cond =
                        cond.ok_or(CompileError::Internal("if block without a condition"))?;
                    let else_case = self.next_case()?;
                    frame.label_cont_or_else = else_case as i32;
                    frame.label_break = self.next_case()? as i32;
                    self.push_line(&format!(
                        "if !{cond} {{ l{d} = {else_case}; continue 'd{d}; }}"
                    ));
                }
            }
        }

        self.frames.push(frame);
        Ok(())
    }

    /// Handle `else`.
    pub(crate) fn else_marker(&mut self) -> Result<(), CompileError> {
        let fi = self
            .frames
            .len()
            .checked_sub(1)
            .ok_or(CompileError::Internal("else outside any block"))?;
        if self.frames[fi].born_dead {
            self.frames[fi].else_seen = true;
            return Ok(());
        }
        if self.frames[fi].kind != BlockKind::IfElse {
            return Err(CompileError::Internal("else outside an if block"));
        }
        self.finalize_block(false)?;

        let (label_break, label_else) = (
            self.frames[fi].label_break,
            self.frames[fi].label_cont_or_else,
        );
        if label_break == -1 {
            self.push_line("} else {");
        } else {
            let d = self
                .dispatch
                .as_ref()
                .ok_or(CompileError::Internal("dispatch else without region"))?
                .id;
            self.push_line(&format!("l{d} = {label_break};"));
            self.push_line(&format!("}} {label_else} => {{"));
        }

        let frame = &mut self.frames[fi];
        frame.else_seen = true;
        frame.is_dead = false;
        let parent = frame.parent_stack_top;
        let params = frame.param_tys.clone();
        self.truncate_stack(parent);
        for ty in params {
            self.push_slot(ty)?;
        }
        Ok(())
    }

    /// Handle `end`: finalize, emit branch-target labels, pop the frame,
    /// reset the stack to `parent + results`.
    pub(crate) fn end_marker(&mut self) -> Result<(), CompileError> {
        if self.frames.is_empty() {
            return Err(CompileError::Internal("end outside any block"));
        }

        // Function-level end.
        if self.frames.len() == 1 {
            self.finalize_block(false)?;
            if !self.frames[0].is_dead {
                let stmt = self.return_stmt()?;
                self.push_line(&stmt);
            }
            self.frames.pop();
            return Ok(());
        }

        let fi = self.frames.len() - 1;
        if self.frames[fi].born_dead {
            self.frames.pop();
            return Ok(());
        }

        self.finalize_block(false)?;
        let frame = self
            .frames
            .pop()
            .ok_or(CompileError::Internal("missing block frame"))?;

        if frame.label_break == -1 {
            match frame.kind {
                BlockKind::Normal => self.push_line("}"),
                BlockKind::Loop => {
                    self.push_line(&format!("break 'b{};", frame.nested_label));
                    self.push_line("}");
                }
                BlockKind::IfElse => {
                    self.push_line("}");
                    self.push_line("}");
                }
            }
        } else {
            let d = self
                .dispatch
                .as_ref()
                .ok_or(CompileError::Internal("dispatch end without region"))?
                .id;
            let cb = frame.label_break;
            self.push_line(&format!("l{d} = {cb};"));
            if frame.kind == BlockKind::IfElse && !frame.else_seen {
                // The condition's false edge lands here and proceeds
                // straight to the end label.
                self.push_line(&format!("}} {} => {{", frame.label_cont_or_else));
                self.push_line(&format!("l{d} = {cb};"));
            }
            if frame.opens_dispatch {
                self.push_line(&format!("}} _ => break 'd{d}, }} }}"));
                self.dispatch = None;
            } else {
                self.push_line(&format!("}} {cb} => {{"));
            }
        }

        self.truncate_stack(frame.parent_stack_top);
        for &ty in &frame.result_tys {
            self.push_slot(ty)?;
        }
        Ok(())
    }

    /// Render a branch to relative depth `d`: result/parameter slot copies
    /// followed by the transfer itself, on one line.
    pub(crate) fn jump(&mut self, rel_depth: u32) -> Result<String, CompileError> {
        let fi = self
            .frames
            .len()
            .checked_sub(1 + rel_depth as usize)
            .ok_or(CompileError::Internal("branch depth out of range"))?;
        if fi == 0 {
            return self.return_stmt();
        }

        let (kind, tys, parent, label_break, label_cont, nested) = {
            let f = &self.frames[fi];
            let tys = if f.kind == BlockKind::Loop {
                f.param_tys.clone()
            } else {
                f.result_tys.clone()
            };
            (
                f.kind,
                tys,
                f.parent_stack_top,
                f.label_break,
                f.label_cont_or_else,
                f.nested_label,
            )
        };

        let n = tys.len();
        if self.stack_top < n {
            return Err(CompileError::Internal("branch with too few operands"));
        }
        let mut stmt = String::new();
        for (i, &ty) in tys.iter().enumerate() {
            let src = self.stack_top - n + 1 + i;
            let dst = parent + 1 + i;
            if src != dst {
                self.slot_decls.insert((dst as u8, ty));
                stmt.push_str(&format!(
                    "{} = {}; ",
                    self.slot_var(dst, ty),
                    self.slot_var(src, ty)
                ));
            }
        }

        if label_break == -1 {
            if kind == BlockKind::Loop {
                stmt.push_str(&format!("continue 'b{nested};"));
            } else {
                stmt.push_str(&format!("break 'b{nested};"));
            }
        } else {
            let d = self
                .dispatch
                .as_ref()
                .ok_or(CompileError::Internal("dispatch branch without region"))?
                .id;
            let case = if kind == BlockKind::Loop {
                label_cont
            } else {
                label_break
            };
            stmt.push_str(&format!("l{d} = {case}; continue 'd{d};"));
        }
        Ok(stmt)
    }

    /// Return statement for the function's arity, reading the top slots.
    pub(crate) fn return_stmt(&self) -> Result<String, CompileError> {
        let tys = &self.frames[0].result_tys;
        let n = tys.len();
        if self.stack_top < n {
            return Err(CompileError::Internal("return with too few operands"));
        }
        Ok(match n {
            0 => "return Ok(());".to_string(),
            1 => format!("return Ok({});", self.slot_var(self.stack_top, tys[0])),
            _ => {
                let vals: Vec<String> = tys
                    .iter()
                    .enumerate()
                    .map(|(i, &ty)| self.slot_var(self.stack_top - n + 1 + i, ty))
                    .collect();
                format!("return Ok(({}));", vals.join(", "))
            }
        })
    }
}
