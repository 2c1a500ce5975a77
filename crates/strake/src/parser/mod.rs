//! WebAssembly module parsing.
//!
//! Wraps `wasmparser` to pull the sections the compiler consumes out of a
//! `.wasm` binary: type signatures, function bodies as raw bytecode, memory
//! and table declarations, globals with their constant initializers, element
//! and data segments, exports, function imports, and the `name` custom
//! section. Function bodies are deliberately kept as byte ranges — the
//! per-function compiler streams them with its own LEB128 readers.

use anyhow::{bail, Context, Result};
use std::collections::HashMap;
use wasmparser::{
    BinaryReader, ExternalKind, FuncType, Name, NameSectionReader, Parser, Payload, TypeRef,
    ValType,
};

/// A function body: locals plus raw bytecode.
#[derive(Debug, Clone)]
pub struct FuncBody {
    /// Index into the type section.
    pub type_idx: u32,
    /// Declared locals, expanded from the (count, type) groups.
    pub locals: Vec<ValType>,
    /// Raw body bytecode, terminated by the function's closing `end`.
    pub code: Vec<u8>,
}

/// Linear memory declaration.
#[derive(Debug, Clone, Copy)]
pub struct MemoryDecl {
    pub initial_pages: u32,
    pub maximum_pages: Option<u32>,
}

/// Table declaration (funcref, table 0).
#[derive(Debug, Clone, Copy)]
pub struct TableDecl {
    pub initial_size: u32,
    pub maximum_size: Option<u32>,
}

/// A global together with its constant initializer.
#[derive(Debug, Clone, Copy)]
pub struct GlobalDecl {
    pub mutable: bool,
    pub init: ConstValue,
}

/// Value of a constant initializer expression.
#[derive(Debug, Clone, Copy)]
pub enum ConstValue {
    I32(i32),
    I64(i64),
    F32(f32),
    F64(f64),
}

/// An active element segment (table initialization).
#[derive(Debug, Clone)]
pub struct ElementSegment {
    pub offset: u32,
    /// Function indices in the module's function index space.
    pub func_indices: Vec<u32>,
}

/// An active data segment (memory initialization).
#[derive(Debug, Clone)]
pub struct DataSegment {
    pub offset: u32,
    pub bytes: Vec<u8>,
}

/// An exported function.
#[derive(Debug, Clone)]
pub struct FuncExport {
    pub name: String,
    /// Index in the function index space (imports included).
    pub func_index: u32,
}

/// An imported function.
#[derive(Debug, Clone)]
pub struct FuncImport {
    pub module: String,
    pub name: String,
    pub type_idx: u32,
}

/// Everything the compiler needs from a parsed module.
#[derive(Debug, Clone, Default)]
pub struct WasmModule {
    /// Type section signatures.
    pub types: Vec<FuncType>,
    /// Imported functions, in declaration order. These occupy indices
    /// `0..imports.len()` of the function index space.
    pub imports: Vec<FuncImport>,
    /// Locally defined function bodies, after the imports in index space.
    pub bodies: Vec<FuncBody>,
    pub memory: Option<MemoryDecl>,
    pub table: Option<TableDecl>,
    pub globals: Vec<GlobalDecl>,
    pub elements: Vec<ElementSegment>,
    pub data: Vec<DataSegment>,
    pub func_exports: Vec<FuncExport>,
    /// Debug names from the `name` custom section, keyed by function index.
    pub func_names: HashMap<u32, String>,
}

impl WasmModule {
    /// Signature of a function by its index in the function index space.
    pub fn signature_of(&self, func_index: u32) -> Option<&FuncType> {
        let type_idx = if (func_index as usize) < self.imports.len() {
            self.imports[func_index as usize].type_idx
        } else {
            self.bodies.get(func_index as usize - self.imports.len())?.type_idx
        };
        self.types.get(type_idx as usize)
    }
}

fn eval_const_expr(expr: wasmparser::ConstExpr) -> Result<ConstValue> {
    let mut ops = expr.get_operators_reader();
    let op = ops.read().context("reading constant initializer")?;
    match op {
        wasmparser::Operator::I32Const { value } => Ok(ConstValue::I32(value)),
        wasmparser::Operator::I64Const { value } => Ok(ConstValue::I64(value)),
        wasmparser::Operator::F32Const { value } => Ok(ConstValue::F32(f32::from_bits(value.bits()))),
        wasmparser::Operator::F64Const { value } => Ok(ConstValue::F64(f64::from_bits(value.bits()))),
        other => bail!("unsupported constant initializer: {other:?}"),
    }
}

fn parse_body(body: wasmparser::FunctionBody, type_idx: u32) -> Result<FuncBody> {
    let mut locals = Vec::new();
    for group in body.get_locals_reader().context("locals reader")? {
        let (count, ty) = group.context("reading local group")?;
        for _ in 0..count {
            locals.push(ty);
        }
    }

    let ops = body.get_operators_reader().context("operators reader")?;
    let mut raw = ops.get_binary_reader();
    let len = raw.bytes_remaining();
    let code = raw.read_bytes(len).context("reading body bytes")?.to_vec();

    Ok(FuncBody {
        type_idx,
        locals,
        code,
    })
}

fn parse_element(elem: wasmparser::Element) -> Result<Option<ElementSegment>> {
    match elem.kind {
        wasmparser::ElementKind::Active {
            table_index,
            offset_expr,
        } => {
            let table_index = table_index.unwrap_or(0);
            if table_index != 0 {
                bail!("element segment targets table {table_index}; only table 0 is supported");
            }
            let offset = match eval_const_expr(offset_expr)? {
                ConstValue::I32(v) => v as u32,
                other => bail!("element segment offset must be i32, got {other:?}"),
            };
            let mut func_indices = Vec::new();
            match elem.items {
                wasmparser::ElementItems::Functions(items) => {
                    for idx in items {
                        func_indices.push(idx.context("reading element function index")?);
                    }
                }
                wasmparser::ElementItems::Expressions(..) => {
                    bail!("expression element segments are not supported");
                }
            }
            Ok(Some(ElementSegment {
                offset,
                func_indices,
            }))
        }
        // Passive and declared segments only matter for table.init/ref.func,
        // which are outside the modeled subset.
        wasmparser::ElementKind::Passive | wasmparser::ElementKind::Declared => Ok(None),
    }
}

fn parse_data(data: wasmparser::Data) -> Result<Option<DataSegment>> {
    match data.kind {
        wasmparser::DataKind::Active {
            memory_index: 0,
            offset_expr,
        } => {
            let offset = match eval_const_expr(offset_expr)? {
                ConstValue::I32(v) => v as u32,
                other => bail!("data segment offset must be i32, got {other:?}"),
            };
            Ok(Some(DataSegment {
                offset,
                bytes: data.data.to_vec(),
            }))
        }
        wasmparser::DataKind::Passive => Ok(None),
        wasmparser::DataKind::Active { memory_index, .. } => {
            bail!("data segment targets memory {memory_index}; only memory 0 is supported")
        }
    }
}

fn parse_names(data: &[u8], offset: usize, out: &mut HashMap<u32, String>) -> Result<()> {
    let reader = NameSectionReader::new(BinaryReader::new(data, offset));
    for subsection in reader {
        let subsection = subsection.context("reading name subsection")?;
        if let Name::Function(map) = subsection {
            for naming in map {
                let naming = naming.context("reading function name")?;
                out.insert(naming.index, naming.name.to_string());
            }
        }
    }
    Ok(())
}

/// Parse a WebAssembly binary into the sections the compiler consumes.
pub fn parse_module(wasm: &[u8]) -> Result<WasmModule> {
    let mut module = WasmModule::default();
    let mut function_types: Vec<u32> = Vec::new();

    for payload in Parser::new(0).parse_all(wasm) {
        match payload.context("reading module payload")? {
            Payload::TypeSection(reader) => {
                for group in reader {
                    let group = group.context("reading type group")?;
                    for sub in group.types() {
                        match &sub.composite_type.inner {
                            wasmparser::CompositeInnerType::Func(f) => {
                                module.types.push(f.clone());
                            }
                            // GC-proposal types play no role in the MVP
                            // subset; skip them.
                            _ => {}
                        }
                    }
                }
            }

            Payload::ImportSection(reader) => {
                for import in reader {
                    let import = import.context("reading import")?;
                    match import.ty {
                        TypeRef::Func(type_idx) => module.imports.push(FuncImport {
                            module: import.module.to_string(),
                            name: import.name.to_string(),
                            type_idx,
                        }),
                        other => bail!(
                            "import {}.{} is {:?}; only function imports are supported",
                            import.module,
                            import.name,
                            other
                        ),
                    }
                }
            }

            Payload::FunctionSection(reader) => {
                for type_idx in reader {
                    function_types.push(type_idx.context("reading function type index")?);
                }
            }

            Payload::CodeSectionEntry(body) => {
                let idx = module.bodies.len();
                let type_idx = *function_types
                    .get(idx)
                    .context("code entry without function section entry")?;
                module.bodies.push(parse_body(body, type_idx)?);
            }

            Payload::MemorySection(reader) => {
                // MVP: at most one memory.
                if let Some(mem) = reader.into_iter().next() {
                    let mem = mem.context("reading memory type")?;
                    module.memory = Some(MemoryDecl {
                        initial_pages: mem.initial as u32,
                        maximum_pages: mem.maximum.map(|m| m as u32),
                    });
                }
            }

            Payload::TableSection(reader) => {
                if let Some(table) = reader.into_iter().next() {
                    let table = table.context("reading table type")?;
                    module.table = Some(TableDecl {
                        initial_size: table.ty.initial as u32,
                        maximum_size: table.ty.maximum.map(|m| m as u32),
                    });
                }
            }

            Payload::GlobalSection(reader) => {
                for global in reader {
                    let global = global.context("reading global")?;
                    module.globals.push(GlobalDecl {
                        mutable: global.ty.mutable,
                        init: eval_const_expr(global.init_expr)?,
                    });
                }
            }

            Payload::ElementSection(reader) => {
                for elem in reader {
                    if let Some(seg) = parse_element(elem.context("reading element segment")?)? {
                        module.elements.push(seg);
                    }
                }
            }

            Payload::DataSection(reader) => {
                for data in reader {
                    if let Some(seg) = parse_data(data.context("reading data segment")?)? {
                        module.data.push(seg);
                    }
                }
            }

            Payload::ExportSection(reader) => {
                for export in reader {
                    let export = export.context("reading export")?;
                    if export.kind == ExternalKind::Func {
                        module.func_exports.push(FuncExport {
                            name: export.name.to_string(),
                            func_index: export.index,
                        });
                    }
                }
            }

            Payload::CustomSection(custom) if custom.name() == "name" => {
                parse_names(custom.data(), custom.data_offset(), &mut module.func_names)
                    .context("reading name section")?;
            }

            _ => {}
        }
    }

    Ok(module)
}
