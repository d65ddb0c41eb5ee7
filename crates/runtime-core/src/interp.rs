//! Fallback interpreter.
//!
//! The smart dispatcher routes any address without a translated function
//! here. One call decodes a single instruction at the live PC through the
//! bus (ROM, WRAM, and HRAM-resident code all take the same path), executes
//! it with the shared ALU and bus primitives, ticks its cycle cost, and
//! returns so the outer loop can re-consult the dispatcher.

use crate::alu;
use crate::bus;
use crate::context::Context;
use crate::decoder::{self, AluOp, Op, Reg8, RotOp, Src8, Target8};
use crate::timing;

/// How many dispatch misses are reported before the counter goes quiet.
const MISS_REPORT_CAP: u32 = 20;

/// Dispatch fallback entry point. Also the default value of `ctx.dispatch`,
/// which makes a context fully interpretable before any table is installed.
pub fn enter(ctx: &mut Context, addr: u16) {
    ctx.pc = addr;

    if (0xFF80..=0xFFFE).contains(&addr) && try_hram_dma_trampoline(ctx, addr) {
        return;
    }

    if ctx.dispatch_miss_count < MISS_REPORT_CAP {
        ctx.dispatch_miss_count += 1;
        log::debug!(
            "no translated function for {addr:#06x} (bank {}); interpreting",
            ctx.rom_bank
        );
    }

    step(ctx);
}

/// Recognizes the canonical OAM-DMA trampolines games copy into HRAM and
/// short-circuits them: the DMA store happens immediately and the routine
/// returns. The busy-wait between the store and the `RET` is skipped;
/// translated timing is not cycle-exact. The generic decode path reproduces
/// the same architectural effects when the pattern does not match.
fn try_hram_dma_trampoline(ctx: &mut Context, addr: u16) -> bool {
    let b0 = bus::read8(ctx, addr);
    let b1 = bus::read8(ctx, addr.wrapping_add(1));

    // LDH (0xFF46), A
    if b0 == 0xE0 && b1 == 0x46 {
        bus::write8(ctx, 0xFF46, ctx.a);
        bus::ret(ctx);
        timing::tick(ctx, 28);
        return true;
    }

    // LD A, n; LDH (0xFF46), A; ...; RET
    let b2 = bus::read8(ctx, addr.wrapping_add(2));
    let b3 = bus::read8(ctx, addr.wrapping_add(3));
    if b0 == 0x3E && b2 == 0xE0 && b3 == 0x46 {
        ctx.a = b1;
        bus::write8(ctx, 0xFF46, ctx.a);
        bus::ret(ctx);
        timing::tick(ctx, 36);
        return true;
    }

    false
}

/// Executes exactly one instruction at the current PC.
#[allow(clippy::too_many_lines)]
pub fn step(ctx: &mut Context) {
    if ctx.stopped {
        return;
    }

    let pc = ctx.pc;
    let instr = decoder::decode(|addr| bus::read8(ctx, addr), pc);

    // PC points past the instruction before it executes; CALL and RST push
    // this continuation, and branch targets overwrite it below.
    ctx.pc = pc.wrapping_add(u16::from(instr.len));
    let mut cycles = u32::from(instr.cycles);

    match instr.op {
        Op::Nop => {}
        Op::Stop => {
            timing::tick(ctx, cycles);
            timing::stop(ctx);
            return;
        }
        Op::Halt => {
            // The halt spin owns this instruction's tick.
            timing::halt(ctx);
            return;
        }
        Op::Di => {
            ctx.ime = false;
            ctx.ime_pending = false;
        }
        Op::Ei => {
            // The pending enable is staged after this instruction's tick so
            // the promotion lands one full instruction later.
            timing::tick(ctx, cycles);
            ctx.ime_pending = true;
            return;
        }

        Op::LdRR(dst, src) => {
            let value = read_reg8(ctx, src);
            write_reg8(ctx, dst, value);
        }
        Op::LdRImm(dst, value) => write_reg8(ctx, dst, value),
        Op::LdRMemHl(dst) => {
            let value = bus::read8(ctx, ctx.hl());
            write_reg8(ctx, dst, value);
        }
        Op::LdMemHlR(src) => {
            let value = read_reg8(ctx, src);
            bus::write8(ctx, ctx.hl(), value);
        }
        Op::LdMemHlImm(value) => bus::write8(ctx, ctx.hl(), value),
        Op::LdAMemBc => ctx.a = bus::read8(ctx, ctx.bc()),
        Op::LdAMemDe => ctx.a = bus::read8(ctx, ctx.de()),
        Op::LdMemBcA => bus::write8(ctx, ctx.bc(), ctx.a),
        Op::LdMemDeA => bus::write8(ctx, ctx.de(), ctx.a),
        Op::LdAMemImm(addr) => ctx.a = bus::read8(ctx, addr),
        Op::LdMemImmA(addr) => bus::write8(ctx, addr, ctx.a),
        Op::LdhAImm(offset) => ctx.a = bus::read8(ctx, 0xFF00 | u16::from(offset)),
        Op::LdhImmA(offset) => bus::write8(ctx, 0xFF00 | u16::from(offset), ctx.a),
        Op::LdhAC => ctx.a = bus::read8(ctx, 0xFF00 | u16::from(ctx.c)),
        Op::LdhCA => bus::write8(ctx, 0xFF00 | u16::from(ctx.c), ctx.a),
        Op::LdAMemHlInc => {
            let hl = ctx.hl();
            ctx.a = bus::read8(ctx, hl);
            ctx.set_hl(hl.wrapping_add(1));
        }
        Op::LdAMemHlDec => {
            let hl = ctx.hl();
            ctx.a = bus::read8(ctx, hl);
            ctx.set_hl(hl.wrapping_sub(1));
        }
        Op::LdMemHlIncA => {
            let hl = ctx.hl();
            bus::write8(ctx, hl, ctx.a);
            ctx.set_hl(hl.wrapping_add(1));
        }
        Op::LdMemHlDecA => {
            let hl = ctx.hl();
            bus::write8(ctx, hl, ctx.a);
            ctx.set_hl(hl.wrapping_sub(1));
        }

        Op::LdRrImm(rr, value) => write_reg16(ctx, rr, value),
        Op::LdMemImmSp(addr) => bus::write16(ctx, addr, ctx.sp),
        Op::LdSpHl => ctx.sp = ctx.hl(),
        Op::LdHlSpOff(offset) => {
            let value = alu::add_sp_offset(ctx, offset);
            ctx.set_hl(value);
        }
        Op::Push(rr) => {
            let value = read_reg16(ctx, rr);
            bus::push16(ctx, value);
        }
        Op::Pop(rr) => {
            let value = bus::pop16(ctx);
            write_reg16(ctx, rr, value);
        }

        Op::Alu(op, src) => {
            let value = read_src8(ctx, src);
            match op {
                AluOp::Add => alu::add8(ctx, value),
                AluOp::Adc => alu::adc8(ctx, value),
                AluOp::Sub => alu::sub8(ctx, value),
                AluOp::Sbc => alu::sbc8(ctx, value),
                AluOp::And => alu::and8(ctx, value),
                AluOp::Xor => alu::xor8(ctx, value),
                AluOp::Or => alu::or8(ctx, value),
                AluOp::Cp => alu::cp8(ctx, value),
            }
        }
        Op::IncR(r) => {
            let value = read_reg8(ctx, r);
            let result = alu::inc8(ctx, value);
            write_reg8(ctx, r, result);
        }
        Op::DecR(r) => {
            let value = read_reg8(ctx, r);
            let result = alu::dec8(ctx, value);
            write_reg8(ctx, r, result);
        }
        Op::IncMemHl => {
            let hl = ctx.hl();
            let value = bus::read8(ctx, hl);
            let result = alu::inc8(ctx, value);
            bus::write8(ctx, hl, result);
        }
        Op::DecMemHl => {
            let hl = ctx.hl();
            let value = bus::read8(ctx, hl);
            let result = alu::dec8(ctx, value);
            bus::write8(ctx, hl, result);
        }
        Op::AddHl(rr) => {
            let value = read_reg16(ctx, rr);
            alu::add16_hl(ctx, value);
        }
        Op::AddSpOff(offset) => ctx.sp = alu::add_sp_offset(ctx, offset),
        Op::IncRr(rr) => {
            let value = read_reg16(ctx, rr).wrapping_add(1);
            write_reg16(ctx, rr, value);
        }
        Op::DecRr(rr) => {
            let value = read_reg16(ctx, rr).wrapping_sub(1);
            write_reg16(ctx, rr, value);
        }
        Op::Daa => alu::daa(ctx),
        Op::Cpl => alu::cpl(ctx),
        Op::Scf => alu::scf(ctx),
        Op::Ccf => alu::ccf(ctx),

        Op::Rlca => alu::rlca(ctx),
        Op::Rla => alu::rla(ctx),
        Op::Rrca => alu::rrca(ctx),
        Op::Rra => alu::rra(ctx),
        Op::Rot(op, target) => {
            let value = read_target8(ctx, target);
            let result = match op {
                RotOp::Rlc => alu::rlc(ctx, value),
                RotOp::Rrc => alu::rrc(ctx, value),
                RotOp::Rl => alu::rl(ctx, value),
                RotOp::Rr => alu::rr(ctx, value),
                RotOp::Sla => alu::sla(ctx, value),
                RotOp::Sra => alu::sra(ctx, value),
                RotOp::Swap => alu::swap(ctx, value),
                RotOp::Srl => alu::srl(ctx, value),
            };
            write_target8(ctx, target, result);
        }
        Op::Bit(n, target) => {
            let value = read_target8(ctx, target);
            alu::bit(ctx, n, value);
        }
        Op::Res(n, target) => {
            let value = read_target8(ctx, target);
            write_target8(ctx, target, alu::res(n, value));
        }
        Op::Set(n, target) => {
            let value = read_target8(ctx, target);
            write_target8(ctx, target, alu::set(n, value));
        }

        Op::Jp(target) | Op::Jr(target) => ctx.pc = target,
        Op::JpCond(cond, target) | Op::JrCond(cond, target) => {
            if condition(ctx, cond) {
                ctx.pc = target;
                cycles = u32::from(instr.cycles_taken);
            }
        }
        Op::JpHl => ctx.pc = ctx.hl(),
        Op::Call(target) => {
            bus::push16(ctx, ctx.pc);
            ctx.pc = target;
        }
        Op::CallCond(cond, target) => {
            if condition(ctx, cond) {
                bus::push16(ctx, ctx.pc);
                ctx.pc = target;
                cycles = u32::from(instr.cycles_taken);
            }
        }
        Op::Ret => bus::ret(ctx),
        Op::RetCond(cond) => {
            if condition(ctx, cond) {
                bus::ret(ctx);
                cycles = u32::from(instr.cycles_taken);
            }
        }
        Op::Reti => bus::reti(ctx),
        Op::Rst(vector) => {
            bus::push16(ctx, ctx.pc);
            ctx.pc = u16::from(vector);
        }

        Op::Invalid(opcode) => {
            timing::trap(ctx, pc, opcode);
            return;
        }
    }

    timing::tick(ctx, cycles);
}

fn condition(ctx: &Context, cond: decoder::Cond) -> bool {
    match cond {
        decoder::Cond::Nz => !ctx.f_z,
        decoder::Cond::Z => ctx.f_z,
        decoder::Cond::Nc => !ctx.f_c,
        decoder::Cond::C => ctx.f_c,
    }
}

fn read_reg8(ctx: &Context, reg: Reg8) -> u8 {
    match reg {
        Reg8::A => ctx.a,
        Reg8::B => ctx.b,
        Reg8::C => ctx.c,
        Reg8::D => ctx.d,
        Reg8::E => ctx.e,
        Reg8::H => ctx.h,
        Reg8::L => ctx.l,
    }
}

fn write_reg8(ctx: &mut Context, reg: Reg8, value: u8) {
    match reg {
        Reg8::A => ctx.a = value,
        Reg8::B => ctx.b = value,
        Reg8::C => ctx.c = value,
        Reg8::D => ctx.d = value,
        Reg8::E => ctx.e = value,
        Reg8::H => ctx.h = value,
        Reg8::L => ctx.l = value,
    }
}

fn read_reg16(ctx: &Context, reg: decoder::Reg16) -> u16 {
    match reg {
        decoder::Reg16::BC => ctx.bc(),
        decoder::Reg16::DE => ctx.de(),
        decoder::Reg16::HL => ctx.hl(),
        decoder::Reg16::SP => ctx.sp,
        decoder::Reg16::AF => ctx.af(),
    }
}

fn write_reg16(ctx: &mut Context, reg: decoder::Reg16, value: u16) {
    match reg {
        decoder::Reg16::BC => ctx.set_bc(value),
        decoder::Reg16::DE => ctx.set_de(value),
        decoder::Reg16::HL => ctx.set_hl(value),
        decoder::Reg16::SP => ctx.sp = value,
        decoder::Reg16::AF => ctx.set_af(value),
    }
}

fn read_src8(ctx: &Context, src: Src8) -> u8 {
    match src {
        Src8::Reg(r) => read_reg8(ctx, r),
        Src8::MemHl => bus::read8(ctx, ctx.hl()),
        Src8::Imm(v) => v,
    }
}

fn read_target8(ctx: &Context, target: Target8) -> u8 {
    match target {
        Target8::Reg(r) => read_reg8(ctx, r),
        Target8::MemHl => bus::read8(ctx, ctx.hl()),
    }
}

fn write_target8(ctx: &mut Context, target: Target8, value: u8) {
    match target {
        Target8::Reg(r) => write_reg8(ctx, r, value),
        Target8::MemHl => bus::write8(ctx, ctx.hl(), value),
    }
}

#[cfg(test)]
mod tests {
    use super::step;
    use crate::bus;
    use crate::cartridge::Cartridge;
    use crate::context::Context;

    /// Builds a context whose ROM starts with `program` at 0x0100.
    fn ctx_with_program(program: &[u8]) -> Context {
        let mut bytes = vec![0u8; 0x8000];
        bytes[0x147] = 0x00;
        bytes[0x100..0x100 + program.len()].copy_from_slice(program);
        let mut ctx = Context::new(Cartridge::load(bytes).expect("flat test cartridge"));
        ctx.pc = 0x0100;
        ctx
    }

    #[test]
    fn ld_and_alu_sequence_executes() {
        // LD A, 0x3A; ADD A, 0xC6
        let mut ctx = ctx_with_program(&[0x3E, 0x3A, 0xC6, 0xC6]);
        step(&mut ctx);
        assert_eq!(ctx.a, 0x3A);
        assert_eq!(ctx.pc, 0x0102);
        step(&mut ctx);
        assert_eq!(ctx.a, 0x00);
        assert!(ctx.f_z && ctx.f_h && ctx.f_c);
        assert_eq!(ctx.cycles, 16);
    }

    #[test]
    fn call_pushes_continuation_and_ret_returns() {
        // CALL 0x0200; ... 0x0200: RET
        let mut ctx = ctx_with_program(&[0xCD, 0x00, 0x02]);
        ctx.sp = 0xFFFE;
        step(&mut ctx);
        assert_eq!(ctx.pc, 0x0200);
        assert_eq!(bus::read16(&ctx, 0xFFFC), 0x0103);

        // ROM is zero there, so stage a RET by stepping through WRAM instead.
        ctx.pc = 0xC000;
        bus::write8(&mut ctx, 0xC000, 0xC9);
        step(&mut ctx);
        assert_eq!(ctx.pc, 0x0103);
        assert_eq!(ctx.sp, 0xFFFE);
    }

    #[test]
    fn conditional_jump_cycle_split() {
        // JR NZ, +2 with Z set: 8 cycles, falls through.
        let mut ctx = ctx_with_program(&[0x20, 0x02, 0x00, 0x00]);
        ctx.f_z = true;
        step(&mut ctx);
        assert_eq!(ctx.pc, 0x0102);
        assert_eq!(ctx.cycles, 8);

        // Same encoding with Z clear: 12 cycles, taken.
        let mut ctx = ctx_with_program(&[0x20, 0x02]);
        ctx.f_z = false;
        step(&mut ctx);
        assert_eq!(ctx.pc, 0x0104);
        assert_eq!(ctx.cycles, 12);
    }

    #[test]
    fn interpreted_code_runs_from_wram() {
        let mut ctx = ctx_with_program(&[]);
        // LD B, 0x42 staged in WRAM.
        bus::write8(&mut ctx, 0xC100, 0x06);
        bus::write8(&mut ctx, 0xC101, 0x42);
        ctx.pc = 0xC100;
        step(&mut ctx);
        assert_eq!(ctx.b, 0x42);
        assert_eq!(ctx.pc, 0xC102);
    }

    #[test]
    fn ei_is_delayed_one_instruction() {
        // EI; NOP with an interrupt already pending.
        let mut ctx = ctx_with_program(&[0xFB, 0x00]);
        ctx.ie = 0x01;
        ctx.io[crate::context::IF_INDEX] = 0x01;
        ctx.sp = 0xFFFE;

        step(&mut ctx); // EI: stages the enable after its own tick
        assert!(!ctx.ime);
        assert!(ctx.ime_pending);
        assert_eq!(ctx.pc, 0x0101);

        step(&mut ctx); // NOP: promotion happens, interrupt taken after it
        assert!(!ctx.ime); // cleared again by the dispatch
        // The continuation pushed must be the address after the NOP.
        assert_eq!(bus::read16(&ctx, 0xFFFC), 0x0102);
    }

    #[test]
    fn rst_enters_vector() {
        let mut ctx = ctx_with_program(&[0xEF]); // RST 0x28
        ctx.sp = 0xFFFE;
        step(&mut ctx);
        assert_eq!(ctx.pc, 0x0028);
        assert_eq!(bus::read16(&ctx, 0xFFFC), 0x0101);
    }

    #[test]
    fn invalid_opcode_traps() {
        let mut ctx = ctx_with_program(&[0xD3]);
        step(&mut ctx);
        assert!(ctx.stopped);
        assert_eq!(ctx.pc, 0x0100);
    }

    #[test]
    fn hram_trampoline_matches_generic_path() {
        // Trampoline body: LDH (0xFF46), A; RET.
        let routine = [0xE0, 0x46, 0xC9];

        let run = |fast: bool| -> (Vec<u8>, u16, u16) {
            let mut ctx = ctx_with_program(&[]);
            for (i, byte) in routine.iter().enumerate() {
                ctx.hram[0x30 + i] = *byte;
            }
            for i in 0..0xA0u16 {
                bus::write8(&mut ctx, 0xC300 + i, (0xA0 - i) as u8);
            }
            ctx.a = 0xC3;
            ctx.sp = 0xFFF0;
            bus::push16(&mut ctx, 0x0234); // staged return address

            if fast {
                super::enter(&mut ctx, 0xFFB0);
            } else {
                ctx.pc = 0xFFB0;
                step(&mut ctx); // LDH
                step(&mut ctx); // RET
            }
            (ctx.oam.to_vec(), ctx.pc, ctx.sp)
        };

        let (fast_oam, fast_pc, fast_sp) = run(true);
        let (slow_oam, slow_pc, slow_sp) = run(false);
        assert_eq!(fast_oam, slow_oam);
        assert_eq!(fast_pc, slow_pc);
        assert_eq!(fast_sp, slow_sp);
        assert_eq!(fast_pc, 0x0234);
    }
}
