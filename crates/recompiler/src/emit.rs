//! Native source emission.
//!
//! Lowers every discovered function to one Rust source file over the
//! runtime primitives, plus a dispatch table, a program entry point, and a
//! build manifest. The output directory is a complete Cargo binary project
//! that links against the runtime crate by path.
//!
//! Generated functions encode their blocks as a `loop { match block { .. } }`
//! state machine: same-function branches assign the next block index,
//! anything else synchronizes `ctx.pc` and returns to the dispatcher.
//! Calls nest through `ctx.dispatch`, mirroring the machine stack on the
//! native stack, with a PC guard so a manipulated return address falls back
//! to the dispatcher instead of resuming the wrong continuation.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};

use runtime_core::decoder::{Cond, Instruction, Reg16, Reg8};
use runtime_core::Cartridge;

use crate::analysis::{Analysis, BankAddr, Block, Function};
use crate::errors::TranslateError;
use crate::ir::{AccRot, Alu16, Alu8, IntCtl, IrOp, Rot};
use crate::lower;

/// Emitter configuration.
#[derive(Debug, Clone)]
pub struct EmitOptions {
    /// Path written into the generated manifest for the runtime dependency.
    pub runtime_core_path: PathBuf,
}

impl Default for EmitOptions {
    fn default() -> Self {
        let runtime = Path::new(env!("CARGO_MANIFEST_DIR"))
            .parent()
            .map_or_else(|| PathBuf::from("../runtime-core"), Path::to_path_buf)
            .join("runtime-core");
        Self {
            runtime_core_path: runtime,
        }
    }
}

/// Counts reported after a successful emission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EmitSummary {
    /// Number of generated native functions.
    pub functions: usize,
    /// Number of files written, manifest and ROM copy included.
    pub files: usize,
}

/// Writes the complete output project.
///
/// # Errors
///
/// Returns [`TranslateError::Io`] when the output directory cannot be
/// populated.
pub fn emit_project(
    cart: &Cartridge,
    analysis: &Analysis,
    out_dir: &Path,
    opts: &EmitOptions,
) -> Result<EmitSummary, TranslateError> {
    let src_dir = out_dir.join("src");
    let funcs_dir = src_dir.join("funcs");
    fs::create_dir_all(&funcs_dir)?;

    let mut files = 0;

    fs::write(out_dir.join("rom.gb"), &cart.bytes)?;
    files += 1;
    fs::write(
        out_dir.join("Cargo.toml"),
        manifest_source(&package_name(cart), &opts.runtime_core_path),
    )?;
    files += 1;
    fs::write(src_dir.join("main.rs"), main_source(cart))?;
    files += 1;
    fs::write(src_dir.join("dispatch.rs"), dispatch_source(analysis))?;
    files += 1;
    fs::write(funcs_dir.join("mod.rs"), funcs_mod_source(analysis))?;
    files += 1;

    for function in analysis.functions.values() {
        let symbol = function.symbol();
        fs::write(
            funcs_dir.join(format!("{symbol}.rs")),
            function_source(function, analysis),
        )?;
        files += 1;
    }

    Ok(EmitSummary {
        functions: analysis.functions.len(),
        files,
    })
}

/// Cargo package name derived from the cartridge title.
#[must_use]
pub fn package_name(cart: &Cartridge) -> String {
    let name: String = cart
        .title
        .to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect();
    let name = name.trim_matches('-').to_string();
    if name.is_empty() {
        "translated-gb".to_string()
    } else {
        name
    }
}

/// The generated build manifest.
#[must_use]
pub fn manifest_source(name: &str, runtime_core_path: &Path) -> String {
    let runtime = runtime_core_path.display();
    format!(
        "# Generated by gbrecomp; do not edit.\n\
         [package]\n\
         name = \"{name}\"\n\
         version = \"0.1.0\"\n\
         edition = \"2021\"\n\
         \n\
         [[bin]]\n\
         name = \"{name}\"\n\
         path = \"src/main.rs\"\n\
         \n\
         [dependencies]\n\
         runtime-core = {{ path = \"{runtime}\" }}\n"
    )
}

/// The generated program entry point.
#[must_use]
pub fn main_source(cart: &Cartridge) -> String {
    format!(
        "//! Generated by gbrecomp from \"{title}\"; do not edit.\n\
         \n\
         mod dispatch;\n\
         mod funcs;\n\
         \n\
         use runtime_core::{{Cartridge, Context}};\n\
         \n\
         static ROM: &[u8] = include_bytes!(\"../rom.gb\");\n\
         \n\
         fn main() {{\n\
         {i}let cart = match Cartridge::load(ROM.to_vec()) {{\n\
         {i}{i}Ok(cart) => cart,\n\
         {i}{i}Err(error) => {{\n\
         {i}{i}{i}eprintln!(\"error: {{error}}\");\n\
         {i}{i}{i}std::process::exit(1);\n\
         {i}{i}}}\n\
         {i}}};\n\
         {i}let mut ctx = Context::new(cart);\n\
         {i}ctx.dispatch = dispatch::dispatch;\n\
         {i}runtime_core::run(&mut ctx);\n\
         }}\n",
        title = cart.title,
        i = "    "
    )
}

/// The generated dispatch table: a jump table over entry addresses, with a
/// bank check for entries in the switchable window and the interpreter as
/// the default arm.
#[must_use]
pub fn dispatch_source(analysis: &Analysis) -> String {
    let mut by_addr: BTreeMap<u16, Vec<&Function>> = BTreeMap::new();
    for function in analysis.functions.values() {
        by_addr.entry(function.entry).or_default().push(function);
    }

    let mut out = String::new();
    out.push_str("//! Generated by gbrecomp; do not edit.\n\n");
    out.push_str("use runtime_core::{interp, Context};\n\n");
    out.push_str("use crate::funcs;\n\n");
    out.push_str("pub fn dispatch(ctx: &mut Context, addr: u16) {\n");
    out.push_str("    match addr {\n");

    for (addr, functions) in &by_addr {
        if *addr < 0x4000 {
            // Fixed-region entries are bank-unambiguous.
            let symbol = functions[0].symbol();
            let _ = writeln!(out, "        0x{addr:04x} => funcs::{symbol}(ctx),");
        } else {
            let _ = writeln!(out, "        0x{addr:04x} => match ctx.rom_bank {{");
            for function in functions {
                let _ = writeln!(
                    out,
                    "            0x{:02x} => funcs::{}(ctx),",
                    function.bank,
                    function.symbol()
                );
            }
            out.push_str("            _ => interp::enter(ctx, addr),\n");
            out.push_str("        },\n");
        }
    }

    out.push_str("        _ => interp::enter(ctx, addr),\n");
    out.push_str("    }\n");
    out.push_str("}\n");
    out
}

/// The generated `funcs` module root.
#[must_use]
pub fn funcs_mod_source(analysis: &Analysis) -> String {
    let mut out = String::from("//! Generated by gbrecomp; do not edit.\n\n");
    for function in analysis.functions.values() {
        let symbol = function.symbol();
        let _ = writeln!(out, "pub mod {symbol};");
        let _ = writeln!(out, "pub use {symbol}::{symbol};");
    }
    out
}

/// Emits one native function.
#[must_use]
pub fn function_source(function: &Function, analysis: &Analysis) -> String {
    FunctionEmitter::new(function, analysis).emit()
}

/// Translation-time operand. Literals fold through address arithmetic so
/// the generated source reads like hand-written constants.
#[derive(Debug, Clone)]
enum Operand {
    Lit8(u8),
    Lit16(u16),
    Expr(String),
}

impl Operand {
    fn render(&self) -> String {
        match self {
            Self::Lit8(v) => format!("0x{v:02x}"),
            Self::Lit16(v) => format!("0x{v:04x}"),
            Self::Expr(e) => e.clone(),
        }
    }
}

struct FunctionEmitter<'a> {
    function: &'a Function,
    analysis: &'a Analysis,
    /// Block key to state-machine index.
    indices: BTreeMap<BankAddr, usize>,
    out: String,
    indent: usize,
    stack: Vec<Operand>,
    temp: usize,
}

impl<'a> FunctionEmitter<'a> {
    fn new(function: &'a Function, analysis: &'a Analysis) -> Self {
        let indices = function
            .blocks
            .iter()
            .enumerate()
            .map(|(index, key)| (*key, index))
            .collect();
        Self {
            function,
            analysis,
            indices,
            out: String::new(),
            indent: 0,
            stack: Vec::new(),
            temp: 0,
        }
    }

    fn emit(mut self) -> String {
        let symbol = self.function.symbol();
        self.line("//! Generated by gbrecomp; do not edit.");
        self.line("#![allow(unused_mut, clippy::all)]");
        self.line("");
        self.line("use runtime_core::ops;");
        self.line("use runtime_core::Context;");
        self.line("");
        self.line(&format!("pub fn {symbol}(ctx: &mut Context) {{"));
        self.indent += 1;

        let entry_index = self
            .indices
            .get(&(self.function.bank, self.function.entry))
            .copied()
            .unwrap_or(0);
        self.line(&format!("let mut block: usize = {entry_index};"));
        self.line("loop {");
        self.indent += 1;
        self.line("if ctx.stopped {");
        self.line("    return;");
        self.line("}");
        self.line("match block {");
        self.indent += 1;

        let analysis = self.analysis;
        for (key, index) in self.indices.clone() {
            let Some(block) = analysis.blocks.get(&key) else {
                continue;
            };
            self.line(&format!("// {:02x}:{:04x}", key.0, key.1));
            self.line(&format!("{index} => {{"));
            self.indent += 1;
            self.emit_block(block);
            self.indent -= 1;
            self.line("}");
        }

        self.line("_ => return,");
        self.indent -= 1;
        self.line("}");
        self.indent -= 1;
        self.line("}");
        self.indent -= 1;
        self.line("}");
        self.out
    }

    fn emit_block(&mut self, block: &Block) {
        let count = block.instructions.len();
        for (position, instr) in block.instructions.iter().enumerate() {
            let last = position + 1 == count;
            self.line(&format!("// {:04x}: {}", instr.addr, instr.op));
            let ops = lower::lower(instr);
            for op in &ops {
                self.emit_op(block, instr, op);
            }
            debug_assert!(self.stack.is_empty(), "unbalanced lowering at {:04x}", instr.addr);
            self.stack.clear();
            if last && !instr.flow.terminates_block() {
                // Block was cut short because the next address is already a
                // block entry; hand over explicitly.
                let next = block.resolve_continuation(instr.next_addr());
                self.goto(next, instr.next_addr());
            }
        }
    }

    /// Emits a transfer to a block key: a state-machine step when the key
    /// belongs to this function, a dispatcher exit otherwise.
    fn goto(&mut self, key: BankAddr, addr: u16) {
        if let Some(index) = self.indices.get(&key).copied() {
            self.line(&format!("block = {index};"));
        } else {
            self.line(&format!("ctx.pc = 0x{addr:04x};"));
            self.line("return;");
        }
    }

    #[allow(clippy::too_many_lines)]
    fn emit_op(&mut self, block: &Block, instr: &Instruction, op: &IrOp) {
        match op {
            IrOp::LoadReg8(r) => self.stack.push(Operand::Expr(reg8_expr(*r).to_string())),
            IrOp::StoreReg8(r) => {
                let value = self.pop();
                self.line(&format!("{} = {};", reg8_expr(*r), value.render()));
            }
            IrOp::LoadReg16(rr) => self.stack.push(Operand::Expr(reg16_load(*rr).to_string())),
            IrOp::StoreReg16(rr) => {
                let value = self.pop();
                self.line(&reg16_store(*rr, &value.render()));
            }
            IrOp::LoadImm8(v) => self.stack.push(Operand::Lit8(*v)),
            IrOp::LoadImm16(v) => self.stack.push(Operand::Lit16(*v)),
            IrOp::LoadMem8 => {
                let addr = self.pop();
                let temp = self.temp_name();
                self.line(&format!(
                    "let {temp} = ops::read8(ctx, {});",
                    addr.render()
                ));
                self.stack.push(Operand::Expr(temp));
            }
            IrOp::StoreMem8 => {
                let value = self.pop();
                let addr = self.pop();
                self.line(&format!(
                    "ops::write8(ctx, {}, {});",
                    addr.render(),
                    value.render()
                ));
            }
            IrOp::LoadMem16 => {
                let addr = self.pop();
                let temp = self.temp_name();
                self.line(&format!(
                    "let {temp} = ops::read16(ctx, {});",
                    addr.render()
                ));
                self.stack.push(Operand::Expr(temp));
            }
            IrOp::StoreMem16 => {
                let value = self.pop();
                let addr = self.pop();
                self.line(&format!(
                    "ops::write16(ctx, {}, {});",
                    addr.render(),
                    value.render()
                ));
            }
            IrOp::Dup => {
                let top = self.pop();
                self.stack.push(top.clone());
                self.stack.push(top);
            }
            IrOp::HighAddr => {
                let offset = self.pop();
                let folded = match offset {
                    Operand::Lit8(v) => Operand::Lit16(0xFF00 | u16::from(v)),
                    other => Operand::Expr(format!("0xFF00 | u16::from({})", other.render())),
                };
                self.stack.push(folded);
            }
            IrOp::Push16 => {
                let value = self.pop();
                self.line(&format!("ops::push16(ctx, {});", value.render()));
            }
            IrOp::Pop16 => {
                let temp = self.temp_name();
                self.line(&format!("let {temp} = ops::pop16(ctx);"));
                self.stack.push(Operand::Expr(temp));
            }
            IrOp::Alu8(alu) => self.emit_alu8(*alu),
            IrOp::Alu16(alu) => self.emit_alu16(*alu),
            IrOp::Rot(rot) => self.emit_rot(*rot),
            IrOp::AccRot(rot) => {
                let name = match rot {
                    AccRot::Rlca => "rlca",
                    AccRot::Rla => "rla",
                    AccRot::Rrca => "rrca",
                    AccRot::Rra => "rra",
                };
                self.line(&format!("ops::{name}(ctx);"));
            }
            IrOp::Daa => self.line("ops::daa(ctx);"),
            IrOp::Cpl => self.line("ops::cpl(ctx);"),
            IrOp::Scf => self.line("ops::scf(ctx);"),
            IrOp::Ccf => self.line("ops::ccf(ctx);"),
            IrOp::Tick(cycles) => self.line(&format!("ops::tick(ctx, {cycles});")),

            IrOp::Branch { target, cond } => self.emit_branch(block, instr, *target, *cond),
            IrOp::JumpDynamic => {
                let target = self.pop();
                self.line(&format!("ctx.pc = {};", target.render()));
                self.line(&format!("ops::tick(ctx, {});", instr.cycles));
                self.line("return;");
            }
            IrOp::Call { target, ret } => self.emit_call(block, instr, *target, *ret),
            IrOp::Ret { cond } => self.emit_ret(block, instr, *cond),
            IrOp::Rst { vector, ret } => self.emit_rst(block, instr, *vector, *ret),
            IrOp::Interrupt(ctl) => match ctl {
                IntCtl::Disable => {
                    self.line("ctx.ime = false;");
                    self.line("ctx.ime_pending = false;");
                }
                IntCtl::Enable => self.line("ctx.ime = true;"),
                IntCtl::EnableDelayed => self.line("ctx.ime_pending = true;"),
                IntCtl::RetAndEnable => {
                    self.line("ops::reti(ctx);");
                    self.line(&format!("ops::tick(ctx, {});", instr.cycles));
                    self.line("return;");
                }
            },
            IrOp::Halt => {
                // PC names the resume point so an interrupt taken during
                // the spin pushes the correct continuation.
                self.line(&format!("ctx.pc = 0x{:04x};", instr.next_addr()));
                self.line("ops::halt(ctx);");
                self.line("if ctx.stopped || ctx.halted {");
                self.line("    return;");
                self.line("}");
                let next = block.resolve_continuation(instr.next_addr());
                self.goto(next, instr.next_addr());
            }
            IrOp::Stop => {
                self.line(&format!("ctx.pc = 0x{:04x};", instr.next_addr()));
                self.line("ops::stop(ctx);");
                self.line("return;");
            }
            IrOp::Trap(opcode) => {
                self.line(&format!(
                    "ops::trap(ctx, 0x{:04x}, 0x{opcode:02x});",
                    instr.addr
                ));
                self.line("return;");
            }
        }
    }

    fn emit_alu8(&mut self, alu: Alu8) {
        match alu {
            Alu8::Inc | Alu8::Dec => {
                let value = self.pop();
                let name = if alu == Alu8::Inc { "inc8" } else { "dec8" };
                let temp = self.temp_name();
                self.line(&format!(
                    "let {temp} = ops::{name}(ctx, {});",
                    value.render()
                ));
                self.stack.push(Operand::Expr(temp));
            }
            _ => {
                let value = self.pop();
                let name = match alu {
                    Alu8::Add => "add8",
                    Alu8::Adc => "adc8",
                    Alu8::Sub => "sub8",
                    Alu8::Sbc => "sbc8",
                    Alu8::And => "and8",
                    Alu8::Or => "or8",
                    Alu8::Xor => "xor8",
                    Alu8::Cp => "cp8",
                    Alu8::Inc | Alu8::Dec => unreachable!(),
                };
                self.line(&format!("ops::{name}(ctx, {});", value.render()));
            }
        }
    }

    fn emit_alu16(&mut self, alu: Alu16) {
        match alu {
            Alu16::AddHl => {
                let value = self.pop();
                self.line(&format!("ops::add16_hl(ctx, {});", value.render()));
            }
            Alu16::AddSp(offset) => {
                let temp = self.temp_name();
                self.line(&format!("let {temp} = ops::add_sp_offset(ctx, {offset});"));
                self.stack.push(Operand::Expr(temp));
            }
            Alu16::Inc => {
                let value = self.pop();
                let folded = match value {
                    Operand::Lit16(v) => Operand::Lit16(v.wrapping_add(1)),
                    other => Operand::Expr(format!("{}.wrapping_add(1)", other.render())),
                };
                self.stack.push(folded);
            }
            Alu16::Dec => {
                let value = self.pop();
                let folded = match value {
                    Operand::Lit16(v) => Operand::Lit16(v.wrapping_sub(1)),
                    other => Operand::Expr(format!("{}.wrapping_sub(1)", other.render())),
                };
                self.stack.push(folded);
            }
        }
    }

    fn emit_rot(&mut self, rot: Rot) {
        match rot {
            Rot::Bit(n) => {
                let value = self.pop();
                self.line(&format!("ops::bit(ctx, {n}, {});", value.render()));
            }
            Rot::Res(n) => {
                let value = self.pop();
                self.stack
                    .push(Operand::Expr(format!("ops::res({n}, {})", value.render())));
            }
            Rot::Set(n) => {
                let value = self.pop();
                self.stack
                    .push(Operand::Expr(format!("ops::set({n}, {})", value.render())));
            }
            _ => {
                let value = self.pop();
                let name = match rot {
                    Rot::Rlc => "rlc",
                    Rot::Rrc => "rrc",
                    Rot::Rl => "rl",
                    Rot::Rr => "rr",
                    Rot::Sla => "sla",
                    Rot::Sra => "sra",
                    Rot::Srl => "srl",
                    Rot::Swap => "swap",
                    Rot::Bit(_) | Rot::Res(_) | Rot::Set(_) => unreachable!(),
                };
                let temp = self.temp_name();
                self.line(&format!(
                    "let {temp} = ops::{name}(ctx, {});",
                    value.render()
                ));
                self.stack.push(Operand::Expr(temp));
            }
        }
    }

    fn emit_branch(&mut self, block: &Block, instr: &Instruction, target: u16, cond: Option<Cond>) {
        let resolved = block.resolve_target(target);
        match cond {
            None => {
                self.emit_goto_or_exit(resolved, target, u32::from(instr.cycles));
            }
            Some(cond) => {
                let fall = instr.next_addr();
                let fall_key = block.resolve_continuation(fall);
                self.line(&format!("if {} {{", cond_expr(cond)));
                self.indent += 1;
                self.emit_goto_or_exit(resolved, target, u32::from(instr.cycles_taken));
                self.indent -= 1;
                self.line("} else {");
                self.indent += 1;
                self.emit_goto_or_exit(Some(fall_key), fall, u32::from(instr.cycles));
                self.indent -= 1;
                self.line("}");
            }
        }
    }

    /// Transfer plus its tick: the PC (or block index) moves first so an
    /// interrupt taken inside the tick observes the completed transfer.
    fn emit_goto_or_exit(&mut self, key: Option<BankAddr>, addr: u16, cycles: u32) {
        match key.and_then(|k| self.indices.get(&k).copied()) {
            Some(index) => {
                self.line(&format!("block = {index};"));
                self.line(&format!("ops::tick(ctx, {cycles});"));
            }
            None => {
                self.line(&format!("ctx.pc = 0x{addr:04x};"));
                self.line(&format!("ops::tick(ctx, {cycles});"));
                self.line("return;");
            }
        }
    }

    fn emit_call(&mut self, block: &Block, instr: &Instruction, target: u16, ret: u16) {
        let cond = match instr.op {
            runtime_core::decoder::Op::CallCond(cond, _) => Some(cond),
            _ => None,
        };

        match cond {
            Some(cond) => {
                self.line(&format!("if {} {{", cond_expr(cond)));
                self.indent += 1;
                self.emit_call_body(target, ret, u32::from(instr.cycles_taken));
                self.indent -= 1;
                self.line("} else {");
                self.indent += 1;
                self.line(&format!("ops::tick(ctx, {});", instr.cycles));
                self.indent -= 1;
                self.line("}");
            }
            None => self.emit_call_body(target, ret, u32::from(instr.cycles)),
        }

        let ret_key = block.resolve_continuation(ret);
        self.goto(ret_key, ret);
    }

    fn emit_call_body(&mut self, target: u16, ret: u16, cycles: u32) {
        self.line(&format!("ops::push16(ctx, 0x{ret:04x});"));
        self.line(&format!("ctx.pc = 0x{target:04x};"));
        self.line(&format!("ops::tick(ctx, {cycles});"));
        self.line(&format!("(ctx.dispatch)(ctx, 0x{target:04x});"));
        self.line(&format!("if ctx.pc != 0x{ret:04x} || ctx.stopped {{"));
        self.line("    return;");
        self.line("}");
    }

    fn emit_ret(&mut self, block: &Block, instr: &Instruction, cond: Option<Cond>) {
        match cond {
            None => {
                self.line("ops::ret(ctx);");
                self.line(&format!("ops::tick(ctx, {});", instr.cycles));
                self.line("return;");
            }
            Some(cond) => {
                let fall = instr.next_addr();
                let fall_key = block.resolve_continuation(fall);
                self.line(&format!("if {} {{", cond_expr(cond)));
                self.indent += 1;
                self.line("ops::ret(ctx);");
                self.line(&format!("ops::tick(ctx, {});", instr.cycles_taken));
                self.line("return;");
                self.indent -= 1;
                self.line("}");
                self.line(&format!("ops::tick(ctx, {});", instr.cycles));
                self.goto(fall_key, fall);
            }
        }
    }

    fn emit_rst(&mut self, block: &Block, instr: &Instruction, vector: u16, ret: u16) {
        self.line(&format!("ops::push16(ctx, 0x{ret:04x});"));
        self.line(&format!("ctx.pc = 0x{vector:04x};"));
        self.line(&format!("ops::tick(ctx, {});", instr.cycles));
        self.line(&format!("(ctx.dispatch)(ctx, 0x{vector:04x});"));
        self.line(&format!("if ctx.pc != 0x{ret:04x} || ctx.stopped {{"));
        self.line("    return;");
        self.line("}");
        let ret_key = block.resolve_continuation(ret);
        self.goto(ret_key, ret);
    }

    fn pop(&mut self) -> Operand {
        self.stack.pop().unwrap_or_else(|| {
            debug_assert!(false, "operand stack underflow");
            Operand::Lit8(0)
        })
    }

    fn temp_name(&mut self) -> String {
        let name = format!("t{}", self.temp);
        self.temp += 1;
        name
    }

    fn line(&mut self, text: &str) {
        if text.is_empty() {
            self.out.push('\n');
            return;
        }
        for _ in 0..self.indent {
            self.out.push_str("    ");
        }
        self.out.push_str(text);
        self.out.push('\n');
    }
}

const fn reg8_expr(reg: Reg8) -> &'static str {
    match reg {
        Reg8::A => "ctx.a",
        Reg8::B => "ctx.b",
        Reg8::C => "ctx.c",
        Reg8::D => "ctx.d",
        Reg8::E => "ctx.e",
        Reg8::H => "ctx.h",
        Reg8::L => "ctx.l",
    }
}

const fn reg16_load(reg: Reg16) -> &'static str {
    match reg {
        Reg16::BC => "ctx.bc()",
        Reg16::DE => "ctx.de()",
        Reg16::HL => "ctx.hl()",
        Reg16::SP => "ctx.sp",
        Reg16::AF => "ctx.af()",
    }
}

fn reg16_store(reg: Reg16, value: &str) -> String {
    match reg {
        Reg16::BC => format!("ctx.set_bc({value});"),
        Reg16::DE => format!("ctx.set_de({value});"),
        Reg16::HL => format!("ctx.set_hl({value});"),
        Reg16::SP => format!("ctx.sp = {value};"),
        Reg16::AF => format!("ctx.set_af({value});"),
    }
}

const fn cond_expr(cond: Cond) -> &'static str {
    match cond {
        Cond::Nz => "!ctx.f_z",
        Cond::Z => "ctx.f_z",
        Cond::Nc => "!ctx.f_c",
        Cond::C => "ctx.f_c",
    }
}

#[cfg(test)]
mod tests {
    use super::{dispatch_source, function_source, manifest_source, package_name};
    use crate::analysis::{analyze, AnalyzerOptions};
    use runtime_core::Cartridge;
    use std::path::Path;

    fn analyzed(program: &[u8]) -> (Cartridge, crate::analysis::Analysis) {
        let mut bytes = vec![0u8; 0x8000];
        bytes[0x147] = 0x00;
        for vector in crate::analysis::RST_VECTORS
            .into_iter()
            .chain(crate::analysis::INTERRUPT_VECTORS)
        {
            bytes[vector as usize] = 0xC9;
        }
        bytes[0x100..0x100 + program.len()].copy_from_slice(program);
        let cart = Cartridge::load(bytes).expect("test cartridge");
        let analysis = analyze(&cart, &AnalyzerOptions::default()).expect("analysis");
        (cart, analysis)
    }

    #[test]
    fn function_body_uses_shared_primitives() {
        // LD A, 0x3A; ADD A, 0xC6; RET
        let (_, analysis) = analyzed(&[0x3E, 0x3A, 0xC6, 0xC6, 0xC9]);
        let function = &analysis.functions[&(0, 0x0100)];
        let source = function_source(function, &analysis);

        assert!(source.contains("pub fn func_00_0100(ctx: &mut Context)"));
        assert!(source.contains("ctx.a = 0x3a;"));
        assert!(source.contains("ops::add8(ctx, 0xc6);"));
        assert!(source.contains("ops::ret(ctx);"));
        // Each instruction ticks its cost.
        assert!(source.contains("ops::tick(ctx, 8);"));
        assert!(source.contains("ops::tick(ctx, 16);"));
    }

    #[test]
    fn conditional_branch_splits_cycles() {
        // JR NZ, +2; STOP; target: RET
        let (_, analysis) = analyzed(&[0x20, 0x02, 0x10, 0x00, 0xC9]);
        let function = &analysis.functions[&(0, 0x0100)];
        let source = function_source(function, &analysis);

        assert!(source.contains("if !ctx.f_z {"));
        assert!(source.contains("ops::tick(ctx, 12);"));
        assert!(source.contains("ops::tick(ctx, 8);"));
    }

    #[test]
    fn call_goes_through_dispatcher_with_pc_guard() {
        // CALL 0x0040; STOP
        let (_, analysis) = analyzed(&[0xCD, 0x40, 0x00, 0x10, 0x00]);
        let function = &analysis.functions[&(0, 0x0100)];
        let source = function_source(function, &analysis);

        assert!(source.contains("ops::push16(ctx, 0x0103);"));
        assert!(source.contains("(ctx.dispatch)(ctx, 0x0040);"));
        assert!(source.contains("if ctx.pc != 0x0103 || ctx.stopped {"));
    }

    #[test]
    fn dispatch_table_maps_entries_and_falls_back() {
        let (_, analysis) = analyzed(&[0xC9]);
        let source = dispatch_source(&analysis);

        assert!(source.contains("0x0100 => funcs::func_00_0100(ctx),"));
        assert!(source.contains("0x0040 => funcs::func_00_0040(ctx),"));
        assert!(source.contains("_ => interp::enter(ctx, addr),"));
    }

    #[test]
    fn undefined_terminator_emits_trap() {
        let (_, analysis) = analyzed(&[0xD3]);
        let function = &analysis.functions[&(0, 0x0100)];
        let source = function_source(function, &analysis);
        assert!(source.contains("ops::trap(ctx, 0x0100, 0xd3);"));
    }

    #[test]
    fn manifest_names_runtime_dependency() {
        let manifest = manifest_source("demo", Path::new("/tmp/runtime-core"));
        assert!(manifest.contains("name = \"demo\""));
        assert!(manifest.contains("runtime-core = { path = \"/tmp/runtime-core\" }"));
    }

    #[test]
    fn package_name_sanitizes_title() {
        let mut bytes = vec![0u8; 0x8000];
        bytes[0x147] = 0x00;
        bytes[0x134..0x134 + 7].copy_from_slice(b"MY GAME");
        let cart = Cartridge::load(bytes).expect("test cartridge");
        assert_eq!(package_name(&cart), "my-game");

        let blank = Cartridge::load({
            let mut b = vec![0u8; 0x8000];
            b[0x147] = 0x00;
            b
        })
        .expect("test cartridge");
        assert_eq!(package_name(&blank), "translated-gb");
    }
}
