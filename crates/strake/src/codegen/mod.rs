//! Module assembly — emits one complete Rust source file.
//!
//! The generated file contains: a preamble importing `strake-runtime`,
//! limit constants, a `Host` trait when the module imports functions,
//! globals (const items for immutable ones, a `Globals` struct for mutable
//! ones), `create_memory`/`create_table` constructors that apply the
//! module's data and element segments, one `func_{i}` item per code body
//! (produced by the per-function compiler), and a `pub` wrapper per export.

use anyhow::{Context, Result};
use std::collections::HashSet;

use crate::func::{compile_function, FuncSig, GlobalInfo, ModuleCtx, ValTy};
use crate::parser::{ConstValue, WasmModule};
use crate::CompileOptions;

/// Map an arbitrary export/import name onto a Rust identifier.
pub(crate) fn sanitize_ident(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for ch in name.chars() {
        if ch.is_ascii_alphanumeric() || ch == '_' {
            out.push(ch);
        } else {
            out.push('_');
        }
    }
    if out.is_empty() || out.chars().next().is_some_and(|c| c.is_ascii_digit()) {
        out.insert(0, '_');
    }
    const KEYWORDS: &[&str] = &[
        "as", "break", "const", "continue", "crate", "dyn", "else", "enum", "extern", "false",
        "fn", "for", "if", "impl", "in", "let", "loop", "match", "mod", "move", "mut", "pub",
        "ref", "return", "self", "static", "struct", "super", "trait", "true", "type", "unsafe",
        "use", "where", "while", "async", "await",
    ];
    if KEYWORDS.contains(&out.as_str()) {
        out.push('_');
    }
    out
}

/// Render data-segment bytes as a Rust byte-string literal.
fn escape_bytes(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() + 3);
    out.push_str("b\"");
    for &b in bytes {
        match b {
            b'"' => out.push_str("\\\""),
            b'\\' => out.push_str("\\\\"),
            0x20..=0x7E => out.push(b as char),
            _ => out.push_str(&format!("\\x{b:02x}")),
        }
    }
    out.push('"');
    out
}

/// Rust literal for a constant initializer.
fn const_literal(v: ConstValue) -> (&'static str, String) {
    match v {
        ConstValue::I32(x) if x == i32::MIN => ("i32", "i32::MIN".to_string()),
        ConstValue::I32(x) => ("i32", format!("{x}i32")),
        ConstValue::I64(x) if x == i64::MIN => ("i64", "i64::MIN".to_string()),
        ConstValue::I64(x) => ("i64", format!("{x}i64")),
        ConstValue::F32(x) if x.is_finite() => ("f32", format!("{x}f32")),
        ConstValue::F32(x) => ("f32", format!("f32::from_bits({:#010x}u32)", x.to_bits())),
        ConstValue::F64(x) if x.is_finite() => ("f64", format!("{x}f64")),
        ConstValue::F64(x) => ("f64", format!("f64::from_bits({:#018x}u64)", x.to_bits())),
    }
}

fn const_ty(v: ConstValue) -> ValTy {
    match v {
        ConstValue::I32(_) => ValTy::I32,
        ConstValue::I64(_) => ValTy::I64,
        ConstValue::F32(_) => ValTy::F32,
        ConstValue::F64(_) => ValTy::F64,
    }
}

/// Smallest structurally-equal type index, per type index.
fn canonical_types(signatures: &[FuncSig]) -> Vec<u32> {
    let mut canon = Vec::with_capacity(signatures.len());
    for (i, sig) in signatures.iter().enumerate() {
        let mut c = i;
        for (j, prior) in signatures[..i].iter().enumerate() {
            if prior.params == sig.params && prior.results == sig.results {
                c = j;
                break;
            }
        }
        canon.push(c as u32);
    }
    canon
}

/// Unique Rust method names for the `Host` trait, in import order.
fn import_method_names(module: &WasmModule) -> Vec<String> {
    let mut used: HashSet<String> = HashSet::new();
    let mut methods = Vec::with_capacity(module.imports.len());
    for imp in &module.imports {
        let mut base = sanitize_ident(&imp.name);
        if used.contains(&base) {
            base = sanitize_ident(&format!("{}_{}", imp.module, imp.name));
        }
        let mut name = base.clone();
        let mut k = 2;
        while used.contains(&name) {
            name = format!("{base}_{k}");
            k += 1;
        }
        used.insert(name.clone());
        methods.push(name);
    }
    methods
}

fn build_ctx(module: &WasmModule) -> Result<ModuleCtx> {
    let mut signatures = Vec::with_capacity(module.types.len());
    for (i, ft) in module.types.iter().enumerate() {
        let params = ft
            .params()
            .iter()
            .map(|&vt| ValTy::from_wasm(vt))
            .collect::<Result<Vec<_>, _>>()
            .with_context(|| format!("type {i}"))?;
        let results = ft
            .results()
            .iter()
            .map(|&vt| ValTy::from_wasm(vt))
            .collect::<Result<Vec<_>, _>>()
            .with_context(|| format!("type {i}"))?;
        signatures.push(FuncSig { params, results });
    }

    let mut func_type_idx: Vec<u32> = module.imports.iter().map(|i| i.type_idx).collect();
    func_type_idx.extend(module.bodies.iter().map(|b| b.type_idx));

    let globals = module
        .globals
        .iter()
        .map(|g| GlobalInfo {
            ty: const_ty(g.init),
            mutable: g.mutable,
        })
        .collect();

    let canonical_type = canonical_types(&signatures);
    Ok(ModuleCtx {
        canonical_type,
        func_type_idx,
        num_imports: module.imports.len(),
        import_methods: import_method_names(module),
        globals,
        has_memory: module.memory.is_some(),
        has_table: module.table.is_some(),
        has_mut_globals: module.globals.iter().any(|g| g.mutable),
        has_imports: !module.imports.is_empty(),
        signatures,
    })
}

fn generate_host_trait(module: &WasmModule, ctx: &ModuleCtx) -> Result<String> {
    let mut out = String::new();
    out.push_str("/// Imported functions, implemented by the embedder.\n");
    out.push_str("pub trait Host {\n");
    for (i, imp) in module.imports.iter().enumerate() {
        let sig = ctx
            .signatures
            .get(imp.type_idx as usize)
            .with_context(|| format!("import {}.{} has no type", imp.module, imp.name))?;
        let mut params = vec!["&mut self".to_string()];
        for (j, ty) in sig.params.iter().enumerate() {
            params.push(format!("arg{j}: {}", ty.rust()));
        }
        out.push_str(&format!("    /// `{}.{}`\n", imp.module, imp.name));
        out.push_str(&format!(
            "    fn {}({}) -> {};\n",
            ctx.import_methods[i],
            params.join(", "),
            ModuleCtx::return_type(sig)
        ));
    }
    out.push_str("}\n\n");
    Ok(out)
}

fn generate_globals(module: &WasmModule) -> String {
    let mut out = String::new();
    for (i, g) in module.globals.iter().enumerate() {
        if !g.mutable {
            let (ty, lit) = const_literal(g.init);
            out.push_str(&format!("pub const G{i}: {ty} = {lit};\n"));
        }
    }
    if module.globals.iter().any(|g| !g.mutable) {
        out.push('\n');
    }

    if module.globals.iter().any(|g| g.mutable) {
        out.push_str("/// Mutable module globals.\n");
        out.push_str("pub struct Globals {\n");
        for (i, g) in module.globals.iter().enumerate() {
            if g.mutable {
                let (ty, _) = const_literal(g.init);
                out.push_str(&format!("    pub g{i}: {ty},\n"));
            }
        }
        out.push_str("}\n\n");
        out.push_str("impl Globals {\n    pub fn new() -> Self {\n        Globals {\n");
        for (i, g) in module.globals.iter().enumerate() {
            if g.mutable {
                let (_, lit) = const_literal(g.init);
                out.push_str(&format!("            g{i}: {lit},\n"));
            }
        }
        out.push_str("        }\n    }\n}\n\n");
        out.push_str(
            "impl Default for Globals {\n    fn default() -> Self {\n        Self::new()\n    }\n}\n\n",
        );
    }
    out
}

fn generate_memory_ctor(module: &WasmModule) -> String {
    let mut out = String::new();
    out.push_str("/// Build the module's linear memory with its data segments applied.\n");
    out.push_str(
        "pub fn create_memory() -> Result<LinearMemory<MAX_PAGES>, rt::ConstructionError> {\n",
    );
    if module.data.is_empty() {
        out.push_str("    LinearMemory::try_new(INITIAL_PAGES)\n");
    } else {
        out.push_str("    let mut m = LinearMemory::try_new(INITIAL_PAGES)?;\n");
        for seg in &module.data {
            out.push_str(&format!(
                "    m.init_data({}, {})\n        .map_err(|_| rt::ConstructionError::SegmentOutOfRange)?;\n",
                seg.offset,
                escape_bytes(&seg.bytes)
            ));
        }
        out.push_str("    Ok(m)\n");
    }
    out.push_str("}\n\n");
    out
}

fn generate_table_ctor(module: &WasmModule, ctx: &ModuleCtx, initial: u32) -> String {
    let mut out = String::new();
    out.push_str("/// Build the indirect-call table with its element segments applied.\n");
    out.push_str("pub fn create_table() -> Result<Table<TABLE_MAX>, rt::ConstructionError> {\n");
    out.push_str(&format!("    let mut t = Table::try_new({initial})?;\n"));
    for seg in &module.elements {
        for (k, &fidx) in seg.func_indices.iter().enumerate() {
            let type_idx = ctx.func_type_idx.get(fidx as usize).copied().unwrap_or(0);
            let canon = ctx
                .canonical_type
                .get(type_idx as usize)
                .copied()
                .unwrap_or(type_idx);
            out.push_str(&format!(
                "    t.set({}, FuncRef {{ type_index: {}, func_index: {} }})?;\n",
                seg.offset as usize + k,
                canon,
                fidx
            ));
        }
    }
    out.push_str("    Ok(t)\n}\n\n");
    out
}

fn generate_exports(module: &WasmModule, ctx: &ModuleCtx) -> String {
    let mut out = String::new();
    let mut used: HashSet<String> = (0..module.bodies.len())
        .map(|i| format!("func_{i}"))
        .collect();
    used.insert("create_memory".to_string());
    used.insert("create_table".to_string());

    for exp in &module.func_exports {
        let fidx = exp.func_index as usize;
        if fidx < ctx.num_imports {
            continue; // re-exported import; the embedder already has it
        }
        let local = fidx - ctx.num_imports;
        let Some(sig) = ctx.signature_of_func(exp.func_index) else {
            continue;
        };
        let sig = sig.clone();
        let name = sanitize_ident(&exp.name);
        if used.contains(&name) {
            continue;
        }
        used.insert(name.clone());

        let generics = if ctx.has_imports { "<H: Host>" } else { "" };
        let mut params: Vec<String> = sig
            .params
            .iter()
            .enumerate()
            .map(|(i, ty)| format!("l{}: {}", i, ty.rust()))
            .collect();
        params.extend(ctx.ctx_params());
        let mut args: Vec<String> = (0..sig.params.len()).map(|i| format!("l{i}")).collect();
        args.extend(ctx.ctx_arg_list().iter().map(|a| a.to_string()));

        out.push_str(&format!("/// Export `{}`.\n", exp.name));
        out.push_str(&format!(
            "pub fn {name}{generics}({}) -> {} {{\n    func_{local}({})\n}}\n\n",
            params.join(", "),
            ModuleCtx::return_type(&sig),
            args.join(", ")
        ));
    }
    out
}

/// Generate the complete Rust source for a parsed module.
pub fn generate_module(module: &WasmModule, options: &CompileOptions) -> Result<String> {
    let ctx = build_ctx(module)?;

    let mut out = String::new();
    out.push_str("// Generated by strake\n// DO NOT EDIT\n\n");
    out.push_str("#[allow(unused_imports)]\n");
    out.push_str("use strake_runtime::{FuncRef, LinearMemory, Table, Trap, WasmResult};\n");
    out.push_str("#[allow(unused_imports)]\n");
    out.push_str("use strake_runtime as rt;\n\n");

    if let Some(mem) = &module.memory {
        let max = mem
            .maximum_pages
            .unwrap_or(options.max_pages as u32)
            .max(mem.initial_pages);
        out.push_str(&format!("pub const MAX_PAGES: usize = {max};\n"));
        out.push_str(&format!(
            "pub const INITIAL_PAGES: usize = {};\n",
            mem.initial_pages
        ));
    }
    if let Some(table) = &module.table {
        let max = table.maximum_size.unwrap_or(table.initial_size);
        out.push_str(&format!("pub const TABLE_MAX: usize = {max};\n"));
    }
    if module.memory.is_some() || module.table.is_some() {
        out.push('\n');
    }

    if ctx.has_imports {
        out.push_str(&generate_host_trait(module, &ctx)?);
    }
    out.push_str(&generate_globals(module));
    if ctx.has_memory {
        out.push_str(&generate_memory_ctor(module));
    }
    if let Some(table) = &module.table {
        out.push_str(&generate_table_ctor(module, &ctx, table.initial_size));
    }

    for (i, body) in module.bodies.iter().enumerate() {
        let debug_name = module
            .func_names
            .get(&((ctx.num_imports + i) as u32))
            .map(String::as_str);
        let code = compile_function(&ctx, i, body, debug_name)
            .with_context(|| format!("compiling function {}", ctx.num_imports + i))?;
        out.push_str(&code);
        out.push('\n');
    }

    out.push_str(&generate_exports(module, &ctx));
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::func::ValTy;

    #[test]
    fn sanitize_passthrough_and_mangling() {
        assert_eq!(sanitize_ident("add"), "add");
        assert_eq!(sanitize_ident("two-words"), "two_words");
        assert_eq!(sanitize_ident("3d"), "_3d");
        assert_eq!(sanitize_ident(""), "_");
        assert_eq!(sanitize_ident("loop"), "loop_");
    }

    #[test]
    fn escape_bytes_mixes_text_and_hex() {
        assert_eq!(escape_bytes(b"Hi"), "b\"Hi\"");
        assert_eq!(escape_bytes(&[0, b'A', 0xFF]), "b\"\\x00A\\xff\"");
        assert_eq!(escape_bytes(b"a\"b\\c"), "b\"a\\\"b\\\\c\"");
    }

    #[test]
    fn canonical_types_unify_structural_duplicates() {
        let sigs = vec![
            FuncSig {
                params: vec![ValTy::I32],
                results: vec![],
            },
            FuncSig {
                params: vec![],
                results: vec![ValTy::I64],
            },
            FuncSig {
                params: vec![ValTy::I32],
                results: vec![],
            },
        ];
        assert_eq!(canonical_types(&sigs), vec![0, 1, 0]);
    }

    #[test]
    fn import_names_dedupe_across_modules() {
        let wat = r#"(module
            (import "env" "log" (func))
            (import "sys" "log" (func))
            (import "env" "if" (func)))"#;
        let module = crate::parser::parse_module(&wat::parse_str(wat).unwrap()).unwrap();
        let names = import_method_names(&module);
        assert_eq!(names[0], "log");
        assert_eq!(names[1], "sys_log");
        assert_eq!(names[2], "if_");
    }
}
