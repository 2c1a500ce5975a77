//! The per-function compiler.
//!
//! One [`FuncCompiler`] is created per code body. It streams the body's raw
//! bytecode ([`decode`]), accumulates basic blocks of packed expression
//! trees, optimizes and flushes each block at control boundaries
//! ([`optimize`]), lowers structured control flow to Rust labels or a
//! dispatch loop ([`control`]), and renders nodes to Rust expression text
//! ([`emit`]). All state is per-compilation; nothing is shared between
//! functions.
//!
//! The operand stack is modeled by numbered slots. Slot `k` at type `ty`
//! becomes the local variable `s{k}_{ty}` in the generated function — the
//! type split exists because a WebAssembly stack position can hold values of
//! different types over the function's lifetime, and Rust variables cannot.

pub mod control;
pub mod decode;
pub mod emit;
pub mod optimize;

use std::collections::{BTreeSet, HashMap};

use crate::ast::AstStore;
use crate::error::CompileError;
use crate::parser::FuncBody;

/// Operand stack slots live at once. The packed node header stores the
/// output slot in one byte, so compilation fails beyond this.
pub const MAX_STACK_SLOTS: usize = 255;
/// Block nesting depth at which lowering switches from native Rust labels
/// to a dispatch loop.
pub const MAX_BLOCK_DEPTH: usize = 256;

/// WebAssembly value types the compiler models.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ValTy {
    I32,
    I64,
    F32,
    F64,
}

impl ValTy {
    pub fn from_wasm(vt: wasmparser::ValType) -> Result<Self, CompileError> {
        use wasmparser::ValType;
        match vt {
            ValType::I32 => Ok(ValTy::I32),
            ValType::I64 => Ok(ValTy::I64),
            ValType::F32 => Ok(ValTy::F32),
            ValType::F64 => Ok(ValTy::F64),
            _ => Err(CompileError::Internal("reference and vector types are not supported")),
        }
    }

    /// Suffix used in slot variable names (`s3_i32`).
    pub fn suffix(self) -> &'static str {
        match self {
            ValTy::I32 => "i32",
            ValTy::I64 => "i64",
            ValTy::F32 => "f32",
            ValTy::F64 => "f64",
        }
    }

    /// Rust type name.
    pub fn rust(self) -> &'static str {
        self.suffix()
    }

    /// Zero literal for declarations.
    pub fn zero(self) -> &'static str {
        match self {
            ValTy::I32 => "0i32",
            ValTy::I64 => "0i64",
            ValTy::F32 => "0.0f32",
            ValTy::F64 => "0.0f64",
        }
    }
}

/// A resolved function signature.
#[derive(Debug, Clone, Default)]
pub struct FuncSig {
    pub params: Vec<ValTy>,
    pub results: Vec<ValTy>,
}

/// A module global as the emitter sees it.
#[derive(Debug, Clone, Copy)]
pub struct GlobalInfo {
    pub ty: ValTy,
    pub mutable: bool,
}

/// Module-wide context shared by every function compilation.
#[derive(Debug, Clone, Default)]
pub struct ModuleCtx {
    /// Signatures per type-section index.
    pub signatures: Vec<FuncSig>,
    /// Type index per function-index-space entry (imports first).
    pub func_type_idx: Vec<u32>,
    /// Smallest structurally-equal type index, per type index.
    pub canonical_type: Vec<u32>,
    pub num_imports: usize,
    /// Rust method name on the `Host` trait per imported function.
    pub import_methods: Vec<String>,
    pub globals: Vec<GlobalInfo>,
    pub has_memory: bool,
    pub has_table: bool,
    pub has_mut_globals: bool,
    pub has_imports: bool,
}

impl ModuleCtx {
    /// Signature of a function by function-index-space index.
    pub fn signature_of_func(&self, func_index: u32) -> Option<&FuncSig> {
        let type_idx = *self.func_type_idx.get(func_index as usize)?;
        self.signatures.get(type_idx as usize)
    }

    /// Local functions dispatchable through `call_indirect` for a canonical
    /// type index: (function-index-space index, local index).
    pub fn dispatch_targets(&self, canon: u32) -> Vec<(u32, usize)> {
        let mut targets = Vec::new();
        for (fidx, &ty) in self.func_type_idx.iter().enumerate().skip(self.num_imports) {
            if self.canonical_type.get(ty as usize) == Some(&canon) {
                targets.push((fidx as u32, fidx - self.num_imports));
            }
        }
        targets
    }

    /// Context parameters appended to every generated signature.
    pub fn ctx_params(&self) -> Vec<String> {
        let mut p = Vec::new();
        if self.has_imports {
            p.push("host: &mut H".to_string());
        }
        if self.has_mut_globals {
            p.push("g: &mut Globals".to_string());
        }
        if self.has_memory {
            p.push("m: &mut LinearMemory<MAX_PAGES>".to_string());
        }
        if self.has_table {
            p.push("t: &Table<TABLE_MAX>".to_string());
        }
        p
    }

    /// Context argument names in signature order.
    pub fn ctx_arg_list(&self) -> Vec<&'static str> {
        let mut v = Vec::new();
        if self.has_imports {
            v.push("host");
        }
        if self.has_mut_globals {
            v.push("g");
        }
        if self.has_memory {
            v.push("m");
        }
        if self.has_table {
            v.push("t");
        }
        v
    }

    /// Matching argument list text for call sites (leading comma).
    pub fn ctx_args(&self) -> String {
        self.ctx_arg_list()
            .iter()
            .map(|a| format!(", {a}"))
            .collect()
    }

    /// `WasmResult<..>` return type text for a signature.
    pub fn return_type(sig: &FuncSig) -> String {
        match sig.results.len() {
            0 => "WasmResult<()>".to_string(),
            1 => format!("WasmResult<{}>", sig.results[0].rust()),
            _ => {
                let tys: Vec<&str> = sig.results.iter().map(|t| t.rust()).collect();
                format!("WasmResult<({})>", tys.join(", "))
            }
        }
    }
}

/// Structured control-flow region kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockKind {
    Normal,
    Loop,
    IfElse,
}

/// One entry on the compile-time block stack.
#[derive(Debug, Clone)]
pub struct BlockFrame {
    pub kind: BlockKind,
    pub param_tys: Vec<ValTy>,
    pub result_tys: Vec<ValTy>,
    /// Stack depth just below the block's arguments.
    pub parent_stack_top: usize,
    /// Set after an unconditional transfer, cleared at `else`/`end`.
    pub is_dead: bool,
    /// The frame was pushed inside dead code; it emits nothing at all.
    pub born_dead: bool,
    pub else_seen: bool,
    /// -1: branch with the native label `'b{nested_label}`. Positive:
    /// dispatch case value for the end-of-block target.
    pub label_break: i32,
    /// Loop continue target or if-else target, same encoding.
    pub label_cont_or_else: i32,
    pub nested_label: u32,
    /// This frame opened the dispatch region; popping it closes the region.
    pub opens_dispatch: bool,
}

/// An open dispatch region (block depth beyond [`MAX_BLOCK_DEPTH`]).
#[derive(Debug, Clone, Copy)]
pub struct DispatchRegion {
    pub id: u32,
    pub next_case: u32,
}

/// Result/operand types of a node, kept beside the packed AST because the
/// Rust backend needs types where the reference backend needed none.
/// Cleared at block finalization along with the arena.
#[derive(Debug, Clone)]
pub struct NodeMeta {
    pub result: Option<ValTy>,
    pub operands: Vec<ValTy>,
}

/// Per-function compilation state.
pub struct FuncCompiler<'m> {
    pub(crate) ctx: &'m ModuleCtx,
    /// Raw body bytecode (float constants are re-read from here at emission).
    pub(crate) code: &'m [u8],
    pub(crate) pos: usize,

    pub(crate) ast: AstStore,
    /// Top-level node pointers of the current basic block; -1 suppresses an
    /// entry whose node was inlined into a consumer.
    pub(crate) ast_ptrs: Vec<i32>,
    /// Sidecar for `i64.const` payloads (one word can't hold them).
    pub(crate) consts64: Vec<i64>,
    pub(crate) node_meta: HashMap<i32, NodeMeta>,

    pub(crate) stack_top: usize,
    pub(crate) stack_limit: usize,
    pub(crate) type_stack: Vec<ValTy>,
    /// Every (slot, type) pair that must be declared.
    pub(crate) slot_decls: BTreeSet<(u8, ValTy)>,

    pub(crate) frames: Vec<BlockFrame>,
    pub(crate) dispatch: Option<DispatchRegion>,
    pub(crate) label_seq: u32,

    pub(crate) locals: Vec<ValTy>,
    pub(crate) num_params: usize,

    pub(crate) body: String,
}

impl<'m> FuncCompiler<'m> {
    pub(crate) fn new(ctx: &'m ModuleCtx, code: &'m [u8], locals: Vec<ValTy>, num_params: usize) -> Self {
        Self {
            ctx,
            code,
            pos: 0,
            ast: AstStore::new(),
            ast_ptrs: Vec::new(),
            consts64: Vec::new(),
            node_meta: HashMap::new(),
            stack_top: 0,
            stack_limit: 0,
            type_stack: Vec::new(),
            slot_decls: BTreeSet::new(),
            frames: Vec::new(),
            dispatch: None,
            label_seq: 0,
            locals,
            num_params,
            body: String::new(),
        }
    }

    /// Push a value slot; fails with `DeepStack` past 255 live slots.
    pub(crate) fn push_slot(&mut self, ty: ValTy) -> Result<usize, CompileError> {
        self.stack_top += 1;
        self.stack_limit = self.stack_limit.max(self.stack_top);
        if self.stack_limit > MAX_STACK_SLOTS {
            return Err(CompileError::DeepStack);
        }
        self.type_stack.push(ty);
        self.slot_decls.insert((self.stack_top as u8, ty));
        Ok(self.stack_top)
    }

    pub(crate) fn pop_slot(&mut self) -> Result<(usize, ValTy), CompileError> {
        let ty = self
            .type_stack
            .pop()
            .ok_or(CompileError::Internal("operand stack underflow"))?;
        let slot = self.stack_top;
        self.stack_top -= 1;
        Ok((slot, ty))
    }

    pub(crate) fn truncate_stack(&mut self, depth: usize) {
        self.type_stack.truncate(depth);
        self.stack_top = depth;
    }

    pub(crate) fn is_dead(&self) -> bool {
        self.frames.last().is_some_and(|f| f.is_dead)
    }

    pub(crate) fn set_dead(&mut self) {
        if let Some(f) = self.frames.last_mut() {
            f.is_dead = true;
        }
    }

    /// Append one indented statement line to the body.
    pub(crate) fn push_line(&mut self, line: &str) {
        self.body.push_str("    ");
        self.body.push_str(line);
        self.body.push('\n');
    }

    pub(crate) fn push_const64(&mut self, v: i64) -> i32 {
        self.consts64.push(v);
        (self.consts64.len() - 1) as i32
    }

    pub(crate) fn record_meta(&mut self, ptr: i32, result: Option<ValTy>, operands: Vec<ValTy>) {
        self.node_meta.insert(ptr, NodeMeta { result, operands });
    }

    /// Variable name of slot `k` holding type `ty`.
    pub(crate) fn slot_var(&self, slot: usize, ty: ValTy) -> String {
        format!("s{}_{}", slot, ty.suffix())
    }
}

/// Compile one function body into a complete Rust `fn` item.
pub fn compile_function(
    ctx: &ModuleCtx,
    local_idx: usize,
    body: &FuncBody,
    debug_name: Option<&str>,
) -> Result<String, CompileError> {
    let sig = ctx
        .signatures
        .get(body.type_idx as usize)
        .ok_or(CompileError::Internal("function type index out of range"))?
        .clone();

    let mut locals = sig.params.clone();
    for vt in &body.locals {
        locals.push(ValTy::from_wasm(*vt)?);
    }
    let num_params = sig.params.len();

    let mut fc = FuncCompiler::new(ctx, &body.code, locals, num_params);

    // Result slots must exist even on paths that only return early.
    for (i, &ty) in sig.results.iter().enumerate() {
        fc.slot_decls.insert(((i + 1) as u8, ty));
    }

    // Implicit outer block; jumping to it returns from the function.
    fc.frames.push(BlockFrame {
        kind: BlockKind::Normal,
        param_tys: Vec::new(),
        result_tys: sig.results.clone(),
        parent_stack_top: 0,
        is_dead: false,
        born_dead: false,
        else_seen: false,
        label_break: -1,
        label_cont_or_else: -1,
        nested_label: 0,
        opens_dispatch: false,
    });

    fc.run()?;

    // ── Assemble the item ────────────────────────────────────────────────

    let mut out = String::new();
    out.push_str(
        "#[allow(unused_mut, unused_variables, unused_assignments, unused_parens, \
         unreachable_code, unused_labels)]\n",
    );
    match debug_name {
        Some(name) => out.push_str(&format!("/// wasm:{name}\n")),
        None => out.push_str(&format!(
            "/// wasm:function[{}]\n",
            ctx.num_imports + local_idx
        )),
    }

    let generics = if ctx.has_imports { "<H: Host>" } else { "" };
    let mut params: Vec<String> = sig
        .params
        .iter()
        .enumerate()
        .map(|(i, ty)| format!("l{}: {}", i, ty.rust()))
        .collect();
    params.extend(ctx.ctx_params());
    out.push_str(&format!(
        "pub fn func_{local_idx}{generics}({}) -> {} {{\n",
        params.join(", "),
        ModuleCtx::return_type(&sig)
    ));

    for (i, ty) in fc.locals.iter().enumerate().skip(num_params) {
        out.push_str(&format!("    let mut l{}: {} = {};\n", i, ty.rust(), ty.zero()));
    }
    for &(slot, ty) in &fc.slot_decls {
        out.push_str(&format!(
            "    let mut s{}_{}: {} = {};\n",
            slot,
            ty.suffix(),
            ty.rust(),
            ty.zero()
        ));
    }

    out.push_str(&fc.body);
    out.push_str("}\n");
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valty_names() {
        assert_eq!(ValTy::I32.suffix(), "i32");
        assert_eq!(ValTy::F64.zero(), "0.0f64");
        assert_eq!(ValTy::I64.rust(), "i64");
    }

    #[test]
    fn valty_from_wasm_rejects_vectors() {
        assert!(ValTy::from_wasm(wasmparser::ValType::V128).is_err());
        assert_eq!(ValTy::from_wasm(wasmparser::ValType::F32), Ok(ValTy::F32));
    }

    #[test]
    fn return_type_text() {
        let sig = FuncSig {
            params: vec![],
            results: vec![],
        };
        assert_eq!(ModuleCtx::return_type(&sig), "WasmResult<()>");
        let sig = FuncSig {
            params: vec![],
            results: vec![ValTy::I64],
        };
        assert_eq!(ModuleCtx::return_type(&sig), "WasmResult<i64>");
        let sig = FuncSig {
            params: vec![],
            results: vec![ValTy::I32, ValTy::F32],
        };
        assert_eq!(ModuleCtx::return_type(&sig), "WasmResult<(i32, f32)>");
    }

    #[test]
    fn dispatch_targets_respect_canonical_types() {
        let ctx = ModuleCtx {
            signatures: vec![FuncSig::default(), FuncSig::default()],
            func_type_idx: vec![0, 1, 0],
            canonical_type: vec![0, 0],
            num_imports: 1,
            ..Default::default()
        };
        // Imports are excluded; both local functions canonicalize to type 0.
        assert_eq!(ctx.dispatch_targets(0), vec![(1, 0), (2, 1)]);
        assert!(ctx.dispatch_targets(1).is_empty());
    }

    #[test]
    fn ctx_args_follow_flags() {
        let ctx = ModuleCtx {
            has_memory: true,
            has_mut_globals: true,
            ..Default::default()
        };
        assert_eq!(ctx.ctx_args(), ", g, m");
        assert_eq!(ctx.ctx_params(), vec!["g: &mut Globals", "m: &mut LinearMemory<MAX_PAGES>"]);
    }
}
