//! Lowering from decoded instructions to IR micro-ops.
//!
//! Data instructions end in an explicit `Tick` of their fixed cost.
//! Control-flow instructions lower to a single flow micro-op and leave the
//! taken/not-taken tick placement to the emitter, which knows both cycle
//! counts from the decoded record.

use runtime_core::decoder::{AluOp, Instruction, Op, Reg16, Reg8, RotOp, Src8, Target8};

use crate::ir::{AccRot, Alu16, Alu8, IntCtl, IrOp, Rot};

/// Lowers one decoded instruction.
#[must_use]
#[allow(clippy::too_many_lines)]
pub fn lower(instr: &Instruction) -> Vec<IrOp> {
    let tick = IrOp::Tick(u32::from(instr.cycles));

    let mut ops: Vec<IrOp> = match instr.op {
        Op::Nop => vec![],
        Op::Stop => return vec![IrOp::Stop],
        Op::Halt => return vec![IrOp::Halt],
        Op::Di => vec![IrOp::Interrupt(IntCtl::Disable)],
        // EI stages its enable after its own tick; the emitter orders this.
        Op::Ei => return vec![IrOp::Tick(u32::from(instr.cycles)), IrOp::Interrupt(IntCtl::EnableDelayed)],

        Op::LdRR(dst, src) => vec![IrOp::LoadReg8(src), IrOp::StoreReg8(dst)],
        Op::LdRImm(dst, value) => vec![IrOp::LoadImm8(value), IrOp::StoreReg8(dst)],
        Op::LdRMemHl(dst) => vec![
            IrOp::LoadReg16(Reg16::HL),
            IrOp::LoadMem8,
            IrOp::StoreReg8(dst),
        ],
        Op::LdMemHlR(src) => vec![
            IrOp::LoadReg16(Reg16::HL),
            IrOp::LoadReg8(src),
            IrOp::StoreMem8,
        ],
        Op::LdMemHlImm(value) => vec![
            IrOp::LoadReg16(Reg16::HL),
            IrOp::LoadImm8(value),
            IrOp::StoreMem8,
        ],
        Op::LdAMemBc => vec![
            IrOp::LoadReg16(Reg16::BC),
            IrOp::LoadMem8,
            IrOp::StoreReg8(Reg8::A),
        ],
        Op::LdAMemDe => vec![
            IrOp::LoadReg16(Reg16::DE),
            IrOp::LoadMem8,
            IrOp::StoreReg8(Reg8::A),
        ],
        Op::LdMemBcA => vec![
            IrOp::LoadReg16(Reg16::BC),
            IrOp::LoadReg8(Reg8::A),
            IrOp::StoreMem8,
        ],
        Op::LdMemDeA => vec![
            IrOp::LoadReg16(Reg16::DE),
            IrOp::LoadReg8(Reg8::A),
            IrOp::StoreMem8,
        ],
        Op::LdAMemImm(addr) => vec![
            IrOp::LoadImm16(addr),
            IrOp::LoadMem8,
            IrOp::StoreReg8(Reg8::A),
        ],
        Op::LdMemImmA(addr) => vec![
            IrOp::LoadImm16(addr),
            IrOp::LoadReg8(Reg8::A),
            IrOp::StoreMem8,
        ],
        Op::LdhAImm(offset) => vec![
            IrOp::LoadImm8(offset),
            IrOp::HighAddr,
            IrOp::LoadMem8,
            IrOp::StoreReg8(Reg8::A),
        ],
        Op::LdhImmA(offset) => vec![
            IrOp::LoadImm8(offset),
            IrOp::HighAddr,
            IrOp::LoadReg8(Reg8::A),
            IrOp::StoreMem8,
        ],
        Op::LdhAC => vec![
            IrOp::LoadReg8(Reg8::C),
            IrOp::HighAddr,
            IrOp::LoadMem8,
            IrOp::StoreReg8(Reg8::A),
        ],
        Op::LdhCA => vec![
            IrOp::LoadReg8(Reg8::C),
            IrOp::HighAddr,
            IrOp::LoadReg8(Reg8::A),
            IrOp::StoreMem8,
        ],
        Op::LdAMemHlInc => vec![
            IrOp::LoadReg16(Reg16::HL),
            IrOp::LoadMem8,
            IrOp::StoreReg8(Reg8::A),
            IrOp::LoadReg16(Reg16::HL),
            IrOp::Alu16(Alu16::Inc),
            IrOp::StoreReg16(Reg16::HL),
        ],
        Op::LdAMemHlDec => vec![
            IrOp::LoadReg16(Reg16::HL),
            IrOp::LoadMem8,
            IrOp::StoreReg8(Reg8::A),
            IrOp::LoadReg16(Reg16::HL),
            IrOp::Alu16(Alu16::Dec),
            IrOp::StoreReg16(Reg16::HL),
        ],
        Op::LdMemHlIncA => vec![
            IrOp::LoadReg16(Reg16::HL),
            IrOp::LoadReg8(Reg8::A),
            IrOp::StoreMem8,
            IrOp::LoadReg16(Reg16::HL),
            IrOp::Alu16(Alu16::Inc),
            IrOp::StoreReg16(Reg16::HL),
        ],
        Op::LdMemHlDecA => vec![
            IrOp::LoadReg16(Reg16::HL),
            IrOp::LoadReg8(Reg8::A),
            IrOp::StoreMem8,
            IrOp::LoadReg16(Reg16::HL),
            IrOp::Alu16(Alu16::Dec),
            IrOp::StoreReg16(Reg16::HL),
        ],

        Op::LdRrImm(rr, value) => vec![IrOp::LoadImm16(value), IrOp::StoreReg16(rr)],
        Op::LdMemImmSp(addr) => vec![
            IrOp::LoadImm16(addr),
            IrOp::LoadReg16(Reg16::SP),
            IrOp::StoreMem16,
        ],
        Op::LdSpHl => vec![IrOp::LoadReg16(Reg16::HL), IrOp::StoreReg16(Reg16::SP)],
        Op::LdHlSpOff(offset) => vec![
            IrOp::Alu16(Alu16::AddSp(offset)),
            IrOp::StoreReg16(Reg16::HL),
        ],
        Op::Push(rr) => vec![IrOp::LoadReg16(rr), IrOp::Push16],
        Op::Pop(rr) => vec![IrOp::Pop16, IrOp::StoreReg16(rr)],

        Op::Alu(alu, src) => {
            let mut ops = lower_src8(src);
            ops.push(IrOp::Alu8(lower_alu(alu)));
            ops
        }
        Op::IncR(r) => vec![IrOp::LoadReg8(r), IrOp::Alu8(Alu8::Inc), IrOp::StoreReg8(r)],
        Op::DecR(r) => vec![IrOp::LoadReg8(r), IrOp::Alu8(Alu8::Dec), IrOp::StoreReg8(r)],
        Op::IncMemHl => vec![
            IrOp::LoadReg16(Reg16::HL),
            IrOp::Dup,
            IrOp::LoadMem8,
            IrOp::Alu8(Alu8::Inc),
            IrOp::StoreMem8,
        ],
        Op::DecMemHl => vec![
            IrOp::LoadReg16(Reg16::HL),
            IrOp::Dup,
            IrOp::LoadMem8,
            IrOp::Alu8(Alu8::Dec),
            IrOp::StoreMem8,
        ],
        Op::AddHl(rr) => vec![IrOp::LoadReg16(rr), IrOp::Alu16(Alu16::AddHl)],
        Op::AddSpOff(offset) => vec![
            IrOp::Alu16(Alu16::AddSp(offset)),
            IrOp::StoreReg16(Reg16::SP),
        ],
        Op::IncRr(rr) => vec![
            IrOp::LoadReg16(rr),
            IrOp::Alu16(Alu16::Inc),
            IrOp::StoreReg16(rr),
        ],
        Op::DecRr(rr) => vec![
            IrOp::LoadReg16(rr),
            IrOp::Alu16(Alu16::Dec),
            IrOp::StoreReg16(rr),
        ],
        Op::Daa => vec![IrOp::Daa],
        Op::Cpl => vec![IrOp::Cpl],
        Op::Scf => vec![IrOp::Scf],
        Op::Ccf => vec![IrOp::Ccf],

        Op::Rlca => vec![IrOp::AccRot(AccRot::Rlca)],
        Op::Rla => vec![IrOp::AccRot(AccRot::Rla)],
        Op::Rrca => vec![IrOp::AccRot(AccRot::Rrca)],
        Op::Rra => vec![IrOp::AccRot(AccRot::Rra)],
        Op::Rot(rot, target) => lower_rmw(lower_rot(rot), target),
        Op::Bit(n, target) => {
            let mut ops = lower_target_load(target);
            ops.push(IrOp::Rot(Rot::Bit(n)));
            ops
        }
        Op::Res(n, target) => lower_rmw(Rot::Res(n), target),
        Op::Set(n, target) => lower_rmw(Rot::Set(n), target),

        Op::Jp(target) | Op::Jr(target) => {
            return vec![IrOp::Branch { target, cond: None }]
        }
        Op::JpCond(cond, target) | Op::JrCond(cond, target) => {
            return vec![IrOp::Branch {
                target,
                cond: Some(cond),
            }]
        }
        Op::JpHl => return vec![IrOp::LoadReg16(Reg16::HL), IrOp::JumpDynamic],
        Op::Call(target) => {
            return vec![IrOp::Call {
                target,
                ret: instr.next_addr(),
            }]
        }
        // The emitter folds the condition around the call body using the
        // decoded record.
        Op::CallCond(_, target) => {
            return vec![IrOp::Call {
                target,
                ret: instr.next_addr(),
            }]
        }
        Op::Ret => return vec![IrOp::Ret { cond: None }],
        Op::RetCond(cond) => return vec![IrOp::Ret { cond: Some(cond) }],
        Op::Reti => return vec![IrOp::Interrupt(IntCtl::RetAndEnable)],
        Op::Rst(vector) => {
            return vec![IrOp::Rst {
                vector: u16::from(vector),
                ret: instr.next_addr(),
            }]
        }

        Op::Invalid(opcode) => return vec![IrOp::Trap(opcode)],
    };

    ops.push(tick);
    ops
}

fn lower_alu(alu: AluOp) -> Alu8 {
    match alu {
        AluOp::Add => Alu8::Add,
        AluOp::Adc => Alu8::Adc,
        AluOp::Sub => Alu8::Sub,
        AluOp::Sbc => Alu8::Sbc,
        AluOp::And => Alu8::And,
        AluOp::Xor => Alu8::Xor,
        AluOp::Or => Alu8::Or,
        AluOp::Cp => Alu8::Cp,
    }
}

fn lower_rot(rot: RotOp) -> Rot {
    match rot {
        RotOp::Rlc => Rot::Rlc,
        RotOp::Rrc => Rot::Rrc,
        RotOp::Rl => Rot::Rl,
        RotOp::Rr => Rot::Rr,
        RotOp::Sla => Rot::Sla,
        RotOp::Sra => Rot::Sra,
        RotOp::Swap => Rot::Swap,
        RotOp::Srl => Rot::Srl,
    }
}

fn lower_src8(src: Src8) -> Vec<IrOp> {
    match src {
        Src8::Reg(r) => vec![IrOp::LoadReg8(r)],
        Src8::MemHl => vec![IrOp::LoadReg16(Reg16::HL), IrOp::LoadMem8],
        Src8::Imm(v) => vec![IrOp::LoadImm8(v)],
    }
}

fn lower_target_load(target: Target8) -> Vec<IrOp> {
    match target {
        Target8::Reg(r) => vec![IrOp::LoadReg8(r)],
        Target8::MemHl => vec![IrOp::LoadReg16(Reg16::HL), IrOp::LoadMem8],
    }
}

/// Read-modify-write through a CB-page micro-op.
fn lower_rmw(rot: Rot, target: Target8) -> Vec<IrOp> {
    match target {
        Target8::Reg(r) => vec![IrOp::LoadReg8(r), IrOp::Rot(rot), IrOp::StoreReg8(r)],
        Target8::MemHl => vec![
            IrOp::LoadReg16(Reg16::HL),
            IrOp::Dup,
            IrOp::LoadMem8,
            IrOp::Rot(rot),
            IrOp::StoreMem8,
        ],
    }
}

#[cfg(test)]
mod tests {
    use super::lower;
    use crate::ir::{stack_effect, Alu8, IrOp};
    use runtime_core::decoder::decode;

    fn lower_bytes(bytes: &[u8]) -> Vec<IrOp> {
        let instr = decode(|a| bytes[a as usize % bytes.len()], 0);
        lower(&instr)
    }

    /// Simulates the operand stack depth over a lowering.
    fn final_depth(ops: &[IrOp]) -> i32 {
        let mut depth = 0i32;
        for op in ops {
            let (pops, pushes) = stack_effect(op);
            depth -= i32::from(pops);
            assert!(depth >= 0, "stack underflow in {ops:?}");
            depth += i32::from(pushes);
        }
        depth
    }

    #[test]
    fn every_opcode_lowers_stack_balanced() {
        for opcode in 0u8..=0xFF {
            let ops = lower_bytes(&[opcode, 0x10, 0x20]);
            assert_eq!(final_depth(&ops), 0, "opcode {opcode:#04x}: {ops:?}");
        }
        for sub in 0u8..=0xFF {
            let ops = lower_bytes(&[0xCB, sub]);
            assert_eq!(final_depth(&ops), 0, "CB {sub:#04x}: {ops:?}");
        }
    }

    #[test]
    fn data_instructions_end_with_their_tick() {
        // LD B, 0x10
        let ops = lower_bytes(&[0x06, 0x10]);
        assert_eq!(ops.last(), Some(&IrOp::Tick(8)));

        // INC (HL)
        let ops = lower_bytes(&[0x34]);
        assert_eq!(ops.last(), Some(&IrOp::Tick(12)));
        assert!(ops.contains(&IrOp::Alu8(Alu8::Inc)));
    }

    #[test]
    fn control_flow_lowers_without_trailing_tick() {
        // JP 0x2010 — ticks are folded into the emitted branch structure.
        let ops = lower_bytes(&[0xC3, 0x10, 0x20]);
        assert!(matches!(ops.as_slice(), [IrOp::Branch { target: 0x2010, cond: None }]));

        let ops = lower_bytes(&[0xC9]);
        assert!(matches!(ops.as_slice(), [IrOp::Ret { cond: None }]));
    }

    #[test]
    fn ei_ticks_before_staging_the_enable() {
        let ops = lower_bytes(&[0xFB]);
        assert_eq!(ops.len(), 2);
        assert!(matches!(ops[0], IrOp::Tick(4)));
        assert!(matches!(
            ops[1],
            IrOp::Interrupt(crate::ir::IntCtl::EnableDelayed)
        ));
    }

    #[test]
    fn call_carries_continuation() {
        let ops = lower_bytes(&[0xCD, 0x00, 0x30]);
        assert!(matches!(
            ops.as_slice(),
            [IrOp::Call {
                target: 0x3000,
                ret: 0x0003
            }]
        ));
    }
}
