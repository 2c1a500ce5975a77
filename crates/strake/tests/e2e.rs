//! End-to-end tests: WAT → wasm → generated Rust source.
//!
//! These inspect the generated text rather than executing it; the runtime
//! crate's own tests cover execution semantics of the helpers the generated
//! code calls.

use anyhow::{Context, Result};
use strake::{transpile, CompileError, CompileOptions};

fn transpile_wat(wat_source: &str) -> Result<String> {
    let wasm = wat::parse_str(wat_source).context("failed to parse WAT")?;
    transpile(&wasm, &CompileOptions::default())
}

// ── Arithmetic and inlining ──────────────────────────────────────────────

#[test]
fn add_two_parameters() -> Result<()> {
    let code = transpile_wat(
        r#"(module (func (param i32 i32) (result i32)
            local.get 0 local.get 1 i32.add))"#,
    )?;
    assert!(code.contains("pub fn func_0(l0: i32, l1: i32) -> WasmResult<i32>"));
    assert!(code.contains("(l0.wrapping_add(l1))"));
    assert!(code.contains("return Ok(s1_i32);"));
    Ok(())
}

#[test]
fn i32_overflow_uses_wrapping() -> Result<()> {
    let code = transpile_wat(
        r#"(module (func (param i32) (result i32)
            local.get 0 i32.const 1 i32.add))"#,
    )?;
    assert!(code.contains("wrapping_add(1i32)"));
    Ok(())
}

#[test]
fn constant_arithmetic_folds() -> Result<()> {
    let code = transpile_wat(
        r#"(module (func (result i32)
            i32.const 10 i32.const 20 i32.add))"#,
    )?;
    assert!(code.contains("s1_i32 = 30i32;"));
    assert!(!code.contains("wrapping_add"));
    Ok(())
}

#[test]
fn add_zero_identity_is_elided() -> Result<()> {
    let code = transpile_wat(
        r#"(module (func (param i32) (result i32)
            local.get 0 i32.const 0 i32.add))"#,
    )?;
    assert!(!code.contains("wrapping_add"));
    assert!(code.contains("s1_i32 = l0;"));
    Ok(())
}

#[test]
fn signed_division_uses_runtime_helper() -> Result<()> {
    let code = transpile_wat(
        r#"(module (func (param i32 i32) (result i32)
            local.get 0 local.get 1 i32.div_s))"#,
    )?;
    assert!(code.contains("rt::i32_div_s(l0, l1)?"));
    Ok(())
}

#[test]
fn unsigned_comparison_coerces_operands() -> Result<()> {
    let code = transpile_wat(
        r#"(module (func (param i32 i32) (result i32)
            local.get 0 local.get 1 i32.lt_u))"#,
    )?;
    assert!(code.contains("((l0) as u32)"));
    assert!(code.contains("((l1) as u32)"));
    assert!(code.contains("as i32")); // widened comparison result
    Ok(())
}

#[test]
fn rotl64_masks_the_shift_amount() -> Result<()> {
    let code = transpile_wat(
        r#"(module (func (param i64 i64) (result i64)
            local.get 0 local.get 1 i64.rotl))"#,
    )?;
    assert!(code.contains("rotate_left"));
    assert!(code.contains("& 63i64"));
    Ok(())
}

#[test]
fn float_min_uses_runtime_helper() -> Result<()> {
    let code = transpile_wat(
        r#"(module (func (param f32 f32) (result f32)
            local.get 0 local.get 1 f32.min))"#,
    )?;
    assert!(code.contains("rt::fmin_f32(l0, l1)"));
    Ok(())
}

#[test]
fn nearest_rounds_ties_to_even() -> Result<()> {
    let code = transpile_wat(
        r#"(module (func (param f64) (result f64)
            local.get 0 f64.nearest))"#,
    )?;
    assert!(code.contains("round_ties_even"));
    Ok(())
}

#[test]
fn saturating_truncation_is_a_cast() -> Result<()> {
    let code = transpile_wat(
        r#"(module (func (param f32) (result i32)
            local.get 0 i32.trunc_sat_f32_s))"#,
    )?;
    assert!(code.contains("s1_i32 = ((l0) as i32);"));
    Ok(())
}

#[test]
fn reinterpret_uses_bit_casts() -> Result<()> {
    let code = transpile_wat(
        r#"(module
            (func (param f64) (result i64) local.get 0 i64.reinterpret_f64)
            (func (param i32) (result f32) local.get 0 f32.reinterpret_i32))"#,
    )?;
    assert!(code.contains("to_bits() as i64"));
    assert!(code.contains("f32::from_bits((l0) as u32)"));
    Ok(())
}

#[test]
fn select_renders_condition_first() -> Result<()> {
    let code = transpile_wat(
        r#"(module (func (param i32 i32 i32) (result i32)
            local.get 0 local.get 1 local.get 2 select))"#,
    )?;
    assert!(code.contains("(if (l2 != 0) { l0 } else { l1 })"));
    Ok(())
}

// ── Constants ────────────────────────────────────────────────────────────

#[test]
fn extreme_integer_constants() -> Result<()> {
    let code = transpile_wat(
        r#"(module
            (func (result i32) i32.const -2147483648)
            (func (result i64) i64.const -9223372036854775808)
            (func (result i64) i64.const 81985529216486895))"#,
    )?;
    assert!(code.contains("i32::MIN"));
    assert!(code.contains("i64::MIN"));
    assert!(code.contains("81985529216486895i64"));
    Ok(())
}

#[test]
fn float_constants_preserve_bits() -> Result<()> {
    let code = transpile_wat(
        r#"(module
            (func (result f32) f32.const nan:0x200000)
            (func (result f64) f64.const -0.0)
            (func (result f32) f32.const inf))"#,
    )?;
    assert!(code.contains("f32::from_bits(0x7fa00000u32)"));
    assert!(code.contains("-0f64"));
    assert!(code.contains("f32::from_bits(0x7f800000u32)"));
    Ok(())
}

// ── Control flow ─────────────────────────────────────────────────────────

#[test]
fn fib_uses_if_else_and_recursion() -> Result<()> {
    let code = transpile_wat(
        r#"(module (func $fib (param i32) (result i32)
            local.get 0 i32.const 2 i32.lt_s
            if (result i32)
                local.get 0
            else
                local.get 0 i32.const 1 i32.sub call $fib
                local.get 0 i32.const 2 i32.sub call $fib
                i32.add
            end))"#,
    )?;
    assert!(code.contains("/// wasm:fib"));
    assert!(code.contains("if (l0 < 2i32) {"));
    assert!(code.contains("} else {"));
    assert!(code.contains("func_0((l0.wrapping_sub(1i32)))?"));
    assert!(code.contains("func_0((l0.wrapping_sub(2i32)))?"));
    Ok(())
}

#[test]
fn loop_lowering_breaks_and_continues() -> Result<()> {
    let code = transpile_wat(
        r#"(module (func (param i32) (result i32) (local i32)
            (block
                (loop
                    local.get 0
                    i32.eqz
                    br_if 1
                    local.get 1 local.get 0 i32.add local.set 1
                    local.get 0 i32.const 1 i32.sub local.set 0
                    br 0))
            local.get 1))"#,
    )?;
    assert!(code.contains("'b0: {"));
    assert!(code.contains("'b1: loop {"));
    assert!(code.contains("if (l0 == 0) { break 'b0; }"));
    assert!(code.contains("continue 'b1;"));
    assert!(code.contains("break 'b1;")); // loop fallthrough terminator
    Ok(())
}

#[test]
fn br_table_dispatches_on_the_index() -> Result<()> {
    let code = transpile_wat(
        r#"(module (func (param i32) (result i32)
            (block (block (block
                local.get 0
                br_table 0 1 2)
                i32.const 1 return)
                i32.const 2 return)
            i32.const 3))"#,
    )?;
    assert!(code.contains("match (l0) as u32 {"));
    assert!(code.contains("0 => { break 'b2; }"));
    assert!(code.contains("1 => { break 'b1; }"));
    assert!(code.contains("_ => { break 'b0; }"));
    Ok(())
}

#[test]
fn branch_with_result_copies_the_slot() -> Result<()> {
    let code = transpile_wat(
        r#"(module (func (result i32)
            (block (result i32) i32.const 7 i32.const 5 br 0)))"#,
    )?;
    assert!(code.contains("s1_i32 = s2_i32; break 'b0;"));
    Ok(())
}

#[test]
fn unreachable_is_a_trap() -> Result<()> {
    let code = transpile_wat(r#"(module (func unreachable))"#)?;
    assert!(code.contains("return Err(Trap::UnreachableExecuted);"));
    Ok(())
}

#[test]
fn code_after_return_is_not_emitted() -> Result<()> {
    let code = transpile_wat(
        r#"(module (func (result i32)
            i32.const 1 return i32.const 99))"#,
    )?;
    assert!(code.contains("return Ok(s1_i32);"));
    assert!(!code.contains("99i32"));
    Ok(())
}

#[test]
fn multi_value_return_is_a_tuple() -> Result<()> {
    let code = transpile_wat(
        r#"(module (func (result i32 i64)
            i32.const 1 i64.const 2))"#,
    )?;
    assert!(code.contains("-> WasmResult<(i32, i64)>"));
    assert!(code.contains("return Ok((s1_i32, s2_i64));"));
    Ok(())
}

#[test]
fn multi_value_call_destructures() -> Result<()> {
    let code = transpile_wat(
        r#"(module
            (func $mv (result i32 i32) i32.const 1 i32.const 2)
            (func (result i32) call $mv i32.add))"#,
    )?;
    assert!(code.contains("(s1_i32, s2_i32) = func_0()?;"));
    assert!(code.contains("(s1_i32.wrapping_add(s2_i32))"));
    Ok(())
}

// ── Block depth boundary ─────────────────────────────────────────────────

fn nested_blocks_wat(n: usize) -> String {
    let mut src = String::from("(module (func (param i32) ");
    for _ in 0..n {
        src.push_str("(block local.get 0 br_if 0 ");
    }
    for _ in 0..n {
        src.push(')');
    }
    src.push_str("))");
    src
}

#[test]
fn depth_256_stays_in_nested_form() -> Result<()> {
    let code = transpile_wat(&nested_blocks_wat(256))?;
    assert!(!code.contains("match l"));
    assert!(code.contains("'b255: {"));
    Ok(())
}

#[test]
fn depth_257_opens_one_dispatch_region() -> Result<()> {
    let code = transpile_wat(&nested_blocks_wat(257))?;
    assert!(code.contains("'d256: loop { match l256 {"));
    assert_eq!(code.matches("_ => break 'd").count(), 1);
    Ok(())
}

#[test]
fn deep_nesting_compiles_with_mixed_modes() -> Result<()> {
    let code = transpile_wat(&nested_blocks_wat(300))?;
    // Outer levels keep native labels.
    assert!(code.contains("'b10: {"));
    assert!(code.contains("break 'b10;"));
    // Inner levels run through the dispatch loop.
    assert!(code.contains("continue 'd256;"));
    assert_eq!(code.matches("_ => break 'd").count(), 1);
    Ok(())
}

#[test]
fn thousand_deep_nesting_compiles() -> Result<()> {
    let code = transpile_wat(&nested_blocks_wat(1000))?;
    assert!(code.contains("'d256: loop"));
    Ok(())
}

// ── Stack depth boundary ─────────────────────────────────────────────────

fn deep_stack_wat(n: usize) -> String {
    let mut src = String::from("(module (func ");
    for _ in 0..n {
        src.push_str("(i32.const 0) ");
    }
    for _ in 0..n {
        src.push_str("drop ");
    }
    src.push_str("))");
    src
}

#[test]
fn stack_of_255_slots_compiles() -> Result<()> {
    let code = transpile_wat(&deep_stack_wat(255))?;
    assert!(code.contains("let mut s255_i32"));
    Ok(())
}

#[test]
fn stack_of_256_slots_is_deep_stack() {
    let err = transpile_wat(&deep_stack_wat(256)).unwrap_err();
    assert_eq!(
        err.root_cause().downcast_ref::<CompileError>(),
        Some(&CompileError::DeepStack)
    );
}

// ── Memory ───────────────────────────────────────────────────────────────

#[test]
fn memcpy_uses_memory_copy() -> Result<()> {
    let code = transpile_wat(
        r#"(module (memory 1)
            (func (param i32 i32 i32)
                local.get 0 local.get 1 local.get 2 memory.copy))"#,
    )?;
    assert!(code.contains("m.copy((l0) as u32, (l1) as u32, (l2) as u32)?;"));
    assert!(code.contains("m: &mut LinearMemory<MAX_PAGES>"));
    Ok(())
}

#[test]
fn memory_fill_places_value_before_count() -> Result<()> {
    let code = transpile_wat(
        r#"(module (memory 1)
            (func (param i32 i32 i32)
                local.get 0 local.get 1 local.get 2 memory.fill))"#,
    )?;
    assert!(code.contains("m.fill((l0) as u32, (l1) as u8, (l2) as u32)?;"));
    Ok(())
}

#[test]
fn grow_then_store_reaches_the_new_page() -> Result<()> {
    let code = transpile_wat(
        r#"(module (memory 1)
            (func (param i32) (result i32)
                local.get 0 memory.grow drop
                i32.const 65536 i32.const 7 i32.store8
                i32.const 65536 i32.load8_u))"#,
    )?;
    assert!(code.contains("m.grow((l0) as u32)"));
    assert!(code.contains("m.store_u8(65536usize, (7i32) as u8)?;"));
    // load8_u is rewritten to the direct byte read.
    assert!(code.contains("m.byte(65536usize)?"));
    Ok(())
}

#[test]
fn loads_carry_their_static_offset() -> Result<()> {
    let code = transpile_wat(
        r#"(module (memory 1)
            (func (param i32) (result i64)
                local.get 0 i64.load offset=16))"#,
    )?;
    assert!(code.contains("m.load_i64((((l0) as u32 as usize) + 16))?"));
    Ok(())
}

#[test]
fn sub_width_loads_sign_extend() -> Result<()> {
    let code = transpile_wat(
        r#"(module (memory 1)
            (func (param i32) (result i32)
                local.get 0 i32.load16_s))"#,
    )?;
    assert!(code.contains("(m.load_u16(((l0) as u32 as usize))? as i16) as i32"));
    Ok(())
}

#[test]
fn memory_size_reads_page_count() -> Result<()> {
    let code = transpile_wat(r#"(module (memory 2) (func (result i32) memory.size))"#)?;
    assert!(code.contains("m.size()"));
    assert!(code.contains("pub const INITIAL_PAGES: usize = 2;"));
    Ok(())
}

#[test]
fn data_segments_initialize_memory() -> Result<()> {
    let code = transpile_wat(
        r#"(module (memory 1) (data (i32.const 16) "Hi\00"))"#,
    )?;
    assert!(code.contains("pub fn create_memory()"));
    assert!(code.contains("m.init_data(16, b\"Hi\\x00\")"));
    Ok(())
}

// ── Globals, imports, exports, tables ────────────────────────────────────

#[test]
fn globals_split_const_and_struct() -> Result<()> {
    let code = transpile_wat(
        r#"(module
            (global $m (mut i32) (i32.const 100))
            (global $c i64 (i64.const -9))
            (func (result i32) global.get $m)
            (func (param i32) local.get 0 global.set $m)
            (func (result i64) global.get $c))"#,
    )?;
    assert!(code.contains("pub struct Globals {"));
    assert!(code.contains("pub g0: i32,"));
    assert!(code.contains("g0: 100i32,"));
    assert!(code.contains("pub const G1: i64 = -9i64;"));
    assert!(code.contains("s1_i32 = g.g0;"));
    assert!(code.contains("g.g0 = l0;"));
    assert!(code.contains("s1_i64 = G1;"));
    Ok(())
}

#[test]
fn imports_become_a_host_trait() -> Result<()> {
    let code = transpile_wat(
        r#"(module
            (import "env" "log" (func $log (param i32)))
            (func (param i32) local.get 0 call $log))"#,
    )?;
    assert!(code.contains("pub trait Host {"));
    assert!(code.contains("fn log(&mut self, arg0: i32) -> WasmResult<()>;"));
    assert!(code.contains("pub fn func_0<H: Host>(l0: i32, host: &mut H) -> WasmResult<()>"));
    assert!(code.contains("host.log(l0)?;"));
    Ok(())
}

#[test]
fn exports_get_named_wrappers() -> Result<()> {
    let code = transpile_wat(
        r#"(module
            (func (param i32 i32) (result i32)
                local.get 0 local.get 1 i32.add)
            (export "add" (func 0)))"#,
    )?;
    assert!(code.contains("/// Export `add`."));
    assert!(code.contains("pub fn add(l0: i32, l1: i32) -> WasmResult<i32> {"));
    assert!(code.contains("func_0(l0, l1)"));
    Ok(())
}

#[test]
fn call_indirect_checks_type_then_dispatches() -> Result<()> {
    let code = transpile_wat(
        r#"(module
            (type $t (func (result i32)))
            (table 2 funcref)
            (func $a (type $t) i32.const 1)
            (func $b (type $t) i32.const 2)
            (elem (i32.const 0) $a $b)
            (func (param i32) (result i32)
                local.get 0 call_indirect (type $t)))"#,
    )?;
    assert!(code.contains("let target = t.get((l0) as u32)?;"));
    assert!(code.contains("if target.type_index != 0 { return Err(Trap::IndirectCallTypeMismatch); }"));
    assert!(code.contains("0 => func_0(t)?,"));
    assert!(code.contains("1 => func_1(t)?,"));
    assert!(code.contains("_ => return Err(Trap::UndefinedElement),"));
    assert!(code.contains("pub fn create_table()"));
    assert!(code.contains("t.set(0, FuncRef { type_index: 0, func_index: 0 })?;"));
    Ok(())
}

// ── Whole-pipeline properties ────────────────────────────────────────────

#[test]
fn compilation_is_deterministic() -> Result<()> {
    let wat = r#"(module (memory 1)
        (func $f (param i32) (result i32)
            (block (result i32)
                local.get 0 i32.const 3 i32.mul
                local.get 0 br_if 0
                i32.const 1 i32.add)))"#;
    let first = transpile_wat(wat)?;
    let second = transpile_wat(wat)?;
    assert_eq!(first, second);
    Ok(())
}

#[test]
fn local_tee_assigns_both_slot_and_local() -> Result<()> {
    let code = transpile_wat(
        r#"(module (func (param i32) (result i32) (local i32)
            local.get 0 local.tee 1))"#,
    )?;
    assert!(code.contains("s1_i32 = l0; l1 = s1_i32;"));
    Ok(())
}

#[test]
fn loads_do_not_move_across_stores() -> Result<()> {
    // The i32.load result is consumed after an intervening store; the load
    // must stay a separate statement ordered before the store.
    let code = transpile_wat(
        r#"(module (memory 1)
            (func (param i32) (result i32)
                i32.const 4 i32.load
                i32.const 4 i32.const 42 i32.store
                local.get 0 i32.add))"#,
    )?;
    let load_at = code
        .find("s1_i32 = m.load_i32(4usize)?;")
        .expect("load stays a statement");
    let store_at = code
        .find("m.store_i32(4usize, 42i32)?;")
        .expect("store statement");
    assert!(load_at < store_at);
    Ok(())
}
