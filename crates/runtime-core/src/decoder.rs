//! SM83 instruction decoder.
//!
//! A pure function from a byte source and a starting address to a decoded
//! instruction record. The same decoder backs static analysis (reading a ROM
//! image with explicit bank arithmetic) and the runtime interpreter (reading
//! live memory through the bus); the byte source is abstracted as a closure
//! so neither caller pays for the other's memory model.
//!
//! Every record carries its exact length, base and taken cycle counts, and a
//! [`Flow`] classification the control-flow analyzer walks. The eleven
//! undefined opcodes decode to [`Op::Invalid`] and terminate a block.

use core::fmt;

/// 8-bit architectural register name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum Reg8 {
    A,
    B,
    C,
    D,
    E,
    H,
    L,
}

/// 16-bit register pair name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum Reg16 {
    BC,
    DE,
    HL,
    SP,
    AF,
}

/// Branch condition code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum Cond {
    Nz,
    Z,
    Nc,
    C,
}

/// Source operand of an accumulator ALU operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Src8 {
    /// A register operand.
    Reg(Reg8),
    /// The byte at `(HL)`.
    MemHl,
    /// An immediate operand.
    Imm(u8),
}

/// Read-modify-write operand of a CB-prefixed operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target8 {
    /// A register operand.
    Reg(Reg8),
    /// The byte at `(HL)`.
    MemHl,
}

/// Accumulator ALU operation selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum AluOp {
    Add,
    Adc,
    Sub,
    Sbc,
    And,
    Xor,
    Or,
    Cp,
}

/// CB-prefixed rotate/shift selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum RotOp {
    Rlc,
    Rrc,
    Rl,
    Rr,
    Sla,
    Sra,
    Swap,
    Srl,
}

/// Decoded operation with typed operands. Covers the full primary and
/// CB-prefixed opcode space.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(missing_docs)]
pub enum Op {
    Nop,
    Stop,
    Halt,
    Di,
    Ei,

    LdRR(Reg8, Reg8),
    LdRImm(Reg8, u8),
    LdRMemHl(Reg8),
    LdMemHlR(Reg8),
    LdMemHlImm(u8),
    LdAMemBc,
    LdAMemDe,
    LdMemBcA,
    LdMemDeA,
    LdAMemImm(u16),
    LdMemImmA(u16),
    LdhAImm(u8),
    LdhImmA(u8),
    LdhAC,
    LdhCA,
    LdAMemHlInc,
    LdAMemHlDec,
    LdMemHlIncA,
    LdMemHlDecA,

    LdRrImm(Reg16, u16),
    LdMemImmSp(u16),
    LdSpHl,
    LdHlSpOff(i8),
    Push(Reg16),
    Pop(Reg16),

    Alu(AluOp, Src8),
    IncR(Reg8),
    DecR(Reg8),
    IncMemHl,
    DecMemHl,
    AddHl(Reg16),
    AddSpOff(i8),
    IncRr(Reg16),
    DecRr(Reg16),
    Daa,
    Cpl,
    Scf,
    Ccf,

    Rlca,
    Rla,
    Rrca,
    Rra,
    Rot(RotOp, Target8),
    Bit(u8, Target8),
    Res(u8, Target8),
    Set(u8, Target8),

    Jp(u16),
    JpCond(Cond, u16),
    JpHl,
    Jr(u16),
    JrCond(Cond, u16),
    Call(u16),
    CallCond(Cond, u16),
    Ret,
    RetCond(Cond),
    Reti,
    Rst(u8),

    Invalid(u8),
}

/// Successor classification of a decoded instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    /// Execution continues at `addr + len`.
    Fallthrough,
    /// Unconditional transfer to a static target.
    Jump(u16),
    /// Conditional transfer; both edges are static.
    CondJump {
        /// Target when the condition holds.
        taken: u16,
        /// Address of the next instruction.
        fall: u16,
    },
    /// Subroutine call; `ret` is the pushed continuation.
    Call {
        /// Static callee entry.
        target: u16,
        /// Continuation address.
        ret: u16,
    },
    /// Conditional subroutine call.
    CondCall {
        /// Static callee entry.
        target: u16,
        /// Continuation address (also the not-taken edge).
        ret: u16,
    },
    /// Transfer through a register; no static target exists.
    DynamicJump,
    /// Return through the stack; no static target exists.
    Ret,
    /// Conditional return; the not-taken edge is static.
    CondRet {
        /// Address of the next instruction.
        fall: u16,
    },
    /// One-byte call to a fixed vector.
    Rst {
        /// Vector address (`0x00`, `0x08`, .., `0x38`).
        vector: u16,
        /// Continuation address.
        ret: u16,
    },
    /// CPU suspension; analysis continues at the next instruction.
    Halt,
    /// CPU stop; terminates the block.
    Stop,
    /// Undefined opcode; terminates the block.
    Invalid,
}

impl Flow {
    /// Static successor addresses of this instruction, in analysis order.
    /// Dynamic transfers contribute nothing; the interpreter owns them.
    #[must_use]
    pub fn static_targets(&self) -> Vec<u16> {
        match *self {
            Self::Fallthrough => Vec::new(),
            Self::Jump(target) => vec![target],
            Self::CondJump { taken, fall } => vec![taken, fall],
            Self::Call { target, ret } | Self::CondCall { target, ret } => vec![target, ret],
            Self::Rst { vector, ret } => vec![vector, ret],
            Self::CondRet { fall } => vec![fall],
            Self::Halt => Vec::new(),
            Self::DynamicJump | Self::Ret | Self::Stop | Self::Invalid => Vec::new(),
        }
    }

    /// Returns `true` when the instruction ends a basic block.
    #[must_use]
    pub const fn terminates_block(&self) -> bool {
        !matches!(self, Self::Fallthrough)
    }
}

/// One decoded instruction record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Instruction {
    /// Address of the first byte.
    pub addr: u16,
    /// Encoded length in bytes (1, 2, or 3).
    pub len: u8,
    /// T-cycle cost when conditional flow is not taken, or the fixed cost.
    pub cycles: u8,
    /// T-cycle cost when conditional flow is taken; equals `cycles` for
    /// unconditional instructions.
    pub cycles_taken: u8,
    /// Decoded operation.
    pub op: Op,
    /// Successor classification.
    pub flow: Flow,
}

impl Instruction {
    /// Address of the byte following this instruction.
    #[must_use]
    pub const fn next_addr(&self) -> u16 {
        self.addr.wrapping_add(self.len as u16)
    }
}

const R_TABLE: [Option<Reg8>; 8] = [
    Some(Reg8::B),
    Some(Reg8::C),
    Some(Reg8::D),
    Some(Reg8::E),
    Some(Reg8::H),
    Some(Reg8::L),
    None, // (HL)
    Some(Reg8::A),
];

const RP_TABLE: [Reg16; 4] = [Reg16::BC, Reg16::DE, Reg16::HL, Reg16::SP];
const RP2_TABLE: [Reg16; 4] = [Reg16::BC, Reg16::DE, Reg16::HL, Reg16::AF];
const COND_TABLE: [Cond; 4] = [Cond::Nz, Cond::Z, Cond::Nc, Cond::C];
const ALU_TABLE: [AluOp; 8] = [
    AluOp::Add,
    AluOp::Adc,
    AluOp::Sub,
    AluOp::Sbc,
    AluOp::And,
    AluOp::Xor,
    AluOp::Or,
    AluOp::Cp,
];
const ROT_TABLE: [RotOp; 8] = [
    RotOp::Rlc,
    RotOp::Rrc,
    RotOp::Rl,
    RotOp::Rr,
    RotOp::Sla,
    RotOp::Sra,
    RotOp::Swap,
    RotOp::Srl,
];

/// Decodes one instruction starting at `addr`.
///
/// `read` supplies bytes for `addr`, `addr + 1`, and `addr + 2` as needed;
/// addresses wrap at the 16-bit boundary, matching the CPU's fetch behavior.
pub fn decode<F: Fn(u16) -> u8>(read: F, addr: u16) -> Instruction {
    let opcode = read(addr);
    let imm8 = || read(addr.wrapping_add(1));
    let imm16 = || {
        let lo = read(addr.wrapping_add(1));
        let hi = read(addr.wrapping_add(2));
        u16::from(lo) | (u16::from(hi) << 8)
    };

    // A record under construction; fields default to the one-byte,
    // four-cycle, fallthrough shape and are overridden per opcode.
    let mut len: u8 = 1;
    let mut cycles: u8 = 4;
    let mut cycles_taken: u8 = 4;
    let mut flow = Flow::Fallthrough;

    let x = opcode >> 6;
    let y = (opcode >> 3) & 0x07;
    let z = opcode & 0x07;
    let p = y >> 1;
    let q = y & 0x01;

    let op = match (x, z) {
        // x=0, z=0: NOP / LD (nn),SP / STOP / JR / JR cc
        (0, 0) => match y {
            0 => Op::Nop,
            1 => {
                len = 3;
                cycles = 20;
                cycles_taken = 20;
                Op::LdMemImmSp(imm16())
            }
            2 => {
                len = 2;
                flow = Flow::Stop;
                Op::Stop
            }
            3 => {
                len = 2;
                cycles = 12;
                cycles_taken = 12;
                let target = addr.wrapping_add(2).wrapping_add(imm8() as i8 as u16);
                flow = Flow::Jump(target);
                Op::Jr(target)
            }
            _ => {
                len = 2;
                cycles = 8;
                cycles_taken = 12;
                let target = addr.wrapping_add(2).wrapping_add(imm8() as i8 as u16);
                flow = Flow::CondJump {
                    taken: target,
                    fall: addr.wrapping_add(2),
                };
                Op::JrCond(COND_TABLE[(y - 4) as usize], target)
            }
        },
        // x=0, z=1: LD rp,nn / ADD HL,rp
        (0, 1) => {
            if q == 0 {
                len = 3;
                cycles = 12;
                cycles_taken = 12;
                Op::LdRrImm(RP_TABLE[p as usize], imm16())
            } else {
                cycles = 8;
                cycles_taken = 8;
                Op::AddHl(RP_TABLE[p as usize])
            }
        }
        // x=0, z=2: indirect accumulator loads/stores
        (0, 2) => {
            cycles = 8;
            cycles_taken = 8;
            match (q, p) {
                (0, 0) => Op::LdMemBcA,
                (0, 1) => Op::LdMemDeA,
                (0, 2) => Op::LdMemHlIncA,
                (0, _) => Op::LdMemHlDecA,
                (_, 0) => Op::LdAMemBc,
                (_, 1) => Op::LdAMemDe,
                (_, 2) => Op::LdAMemHlInc,
                (_, _) => Op::LdAMemHlDec,
            }
        }
        // x=0, z=3: INC rp / DEC rp
        (0, 3) => {
            cycles = 8;
            cycles_taken = 8;
            if q == 0 {
                Op::IncRr(RP_TABLE[p as usize])
            } else {
                Op::DecRr(RP_TABLE[p as usize])
            }
        }
        // x=0, z=4: INC r
        (0, 4) => match R_TABLE[y as usize] {
            Some(r) => Op::IncR(r),
            None => {
                cycles = 12;
                cycles_taken = 12;
                Op::IncMemHl
            }
        },
        // x=0, z=5: DEC r
        (0, 5) => match R_TABLE[y as usize] {
            Some(r) => Op::DecR(r),
            None => {
                cycles = 12;
                cycles_taken = 12;
                Op::DecMemHl
            }
        },
        // x=0, z=6: LD r,n
        (0, 6) => {
            len = 2;
            match R_TABLE[y as usize] {
                Some(r) => {
                    cycles = 8;
                    cycles_taken = 8;
                    Op::LdRImm(r, imm8())
                }
                None => {
                    cycles = 12;
                    cycles_taken = 12;
                    Op::LdMemHlImm(imm8())
                }
            }
        }
        // x=0, z=7: accumulator rotates and flag ops
        (0, 7) => match y {
            0 => Op::Rlca,
            1 => Op::Rrca,
            2 => Op::Rla,
            3 => Op::Rra,
            4 => Op::Daa,
            5 => Op::Cpl,
            6 => Op::Scf,
            _ => Op::Ccf,
        },
        // x=1: LD r,r / HALT
        (1, _) => match (R_TABLE[y as usize], R_TABLE[z as usize]) {
            (None, None) => {
                flow = Flow::Halt;
                Op::Halt
            }
            (Some(dst), Some(src)) => Op::LdRR(dst, src),
            (Some(dst), None) => {
                cycles = 8;
                cycles_taken = 8;
                Op::LdRMemHl(dst)
            }
            (None, Some(src)) => {
                cycles = 8;
                cycles_taken = 8;
                Op::LdMemHlR(src)
            }
        },
        // x=2: ALU A, r
        (2, _) => match R_TABLE[z as usize] {
            Some(r) => Op::Alu(ALU_TABLE[y as usize], Src8::Reg(r)),
            None => {
                cycles = 8;
                cycles_taken = 8;
                Op::Alu(ALU_TABLE[y as usize], Src8::MemHl)
            }
        },
        // x=3, z=0: RET cc / LDH / ADD SP / LD HL,SP+e
        (3, 0) => match y {
            0..=3 => {
                cycles = 8;
                cycles_taken = 20;
                flow = Flow::CondRet {
                    fall: addr.wrapping_add(1),
                };
                Op::RetCond(COND_TABLE[y as usize])
            }
            4 => {
                len = 2;
                cycles = 12;
                cycles_taken = 12;
                Op::LdhImmA(imm8())
            }
            5 => {
                len = 2;
                cycles = 16;
                cycles_taken = 16;
                Op::AddSpOff(imm8() as i8)
            }
            6 => {
                len = 2;
                cycles = 12;
                cycles_taken = 12;
                Op::LdhAImm(imm8())
            }
            _ => {
                len = 2;
                cycles = 12;
                cycles_taken = 12;
                Op::LdHlSpOff(imm8() as i8)
            }
        },
        // x=3, z=1: POP / RET / RETI / JP HL / LD SP,HL
        (3, 1) => {
            if q == 0 {
                cycles = 12;
                cycles_taken = 12;
                Op::Pop(RP2_TABLE[p as usize])
            } else {
                match p {
                    0 => {
                        cycles = 16;
                        cycles_taken = 16;
                        flow = Flow::Ret;
                        Op::Ret
                    }
                    1 => {
                        cycles = 16;
                        cycles_taken = 16;
                        flow = Flow::Ret;
                        Op::Reti
                    }
                    2 => {
                        flow = Flow::DynamicJump;
                        Op::JpHl
                    }
                    _ => {
                        cycles = 8;
                        cycles_taken = 8;
                        Op::LdSpHl
                    }
                }
            }
        }
        // x=3, z=2: JP cc / high-page and direct accumulator transfers
        (3, 2) => match y {
            0..=3 => {
                len = 3;
                cycles = 12;
                cycles_taken = 16;
                let target = imm16();
                flow = Flow::CondJump {
                    taken: target,
                    fall: addr.wrapping_add(3),
                };
                Op::JpCond(COND_TABLE[y as usize], target)
            }
            4 => {
                cycles = 8;
                cycles_taken = 8;
                Op::LdhCA
            }
            5 => {
                len = 3;
                cycles = 16;
                cycles_taken = 16;
                Op::LdMemImmA(imm16())
            }
            6 => {
                cycles = 8;
                cycles_taken = 8;
                Op::LdhAC
            }
            _ => {
                len = 3;
                cycles = 16;
                cycles_taken = 16;
                Op::LdAMemImm(imm16())
            }
        },
        // x=3, z=3: JP / DI / EI / undefined
        (3, 3) => match y {
            0 => {
                len = 3;
                cycles = 16;
                cycles_taken = 16;
                let target = imm16();
                flow = Flow::Jump(target);
                Op::Jp(target)
            }
            1 => return decode_cb(read(addr.wrapping_add(1)), addr),
            6 => Op::Di,
            7 => Op::Ei,
            _ => {
                flow = Flow::Invalid;
                Op::Invalid(opcode)
            }
        },
        // x=3, z=4: CALL cc / undefined
        (3, 4) => match y {
            0..=3 => {
                len = 3;
                cycles = 12;
                cycles_taken = 24;
                let target = imm16();
                flow = Flow::CondCall {
                    target,
                    ret: addr.wrapping_add(3),
                };
                Op::CallCond(COND_TABLE[y as usize], target)
            }
            _ => {
                flow = Flow::Invalid;
                Op::Invalid(opcode)
            }
        },
        // x=3, z=5: PUSH / CALL / undefined
        (3, 5) => {
            if q == 0 {
                cycles = 16;
                cycles_taken = 16;
                Op::Push(RP2_TABLE[p as usize])
            } else if p == 0 {
                len = 3;
                cycles = 24;
                cycles_taken = 24;
                let target = imm16();
                flow = Flow::Call {
                    target,
                    ret: addr.wrapping_add(3),
                };
                Op::Call(target)
            } else {
                flow = Flow::Invalid;
                Op::Invalid(opcode)
            }
        }
        // x=3, z=6: ALU A, n
        (3, 6) => {
            len = 2;
            cycles = 8;
            cycles_taken = 8;
            Op::Alu(ALU_TABLE[y as usize], Src8::Imm(imm8()))
        }
        // x=3, z=7: RST
        _ => {
            cycles = 16;
            cycles_taken = 16;
            let vector = u16::from(y) * 8;
            flow = Flow::Rst {
                vector,
                ret: addr.wrapping_add(1),
            };
            Op::Rst(y * 8)
        }
    };

    Instruction {
        addr,
        len,
        cycles,
        cycles_taken,
        op,
        flow,
    }
}

/// Decodes the CB-prefixed page. All records are two bytes and fall through.
fn decode_cb(sub: u8, addr: u16) -> Instruction {
    let x = sub >> 6;
    let y = (sub >> 3) & 0x07;
    let z = sub & 0x07;

    let target = match R_TABLE[z as usize] {
        Some(r) => Target8::Reg(r),
        None => Target8::MemHl,
    };
    let is_mem = matches!(target, Target8::MemHl);

    let (op, cycles) = match x {
        0 => (
            Op::Rot(ROT_TABLE[y as usize], target),
            if is_mem { 16 } else { 8 },
        ),
        1 => (Op::Bit(y, target), if is_mem { 12 } else { 8 }),
        2 => (Op::Res(y, target), if is_mem { 16 } else { 8 }),
        _ => (Op::Set(y, target), if is_mem { 16 } else { 8 }),
    };

    Instruction {
        addr,
        len: 2,
        cycles,
        cycles_taken: cycles,
        op,
        flow: Flow::Fallthrough,
    }
}

impl fmt::Display for Reg8 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::A => "A",
            Self::B => "B",
            Self::C => "C",
            Self::D => "D",
            Self::E => "E",
            Self::H => "H",
            Self::L => "L",
        };
        f.write_str(name)
    }
}

impl fmt::Display for Reg16 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::BC => "BC",
            Self::DE => "DE",
            Self::HL => "HL",
            Self::SP => "SP",
            Self::AF => "AF",
        };
        f.write_str(name)
    }
}

impl fmt::Display for Cond {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Nz => "NZ",
            Self::Z => "Z",
            Self::Nc => "NC",
            Self::C => "C",
        };
        f.write_str(name)
    }
}

impl fmt::Display for Src8 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Reg(r) => write!(f, "{r}"),
            Self::MemHl => f.write_str("(HL)"),
            Self::Imm(v) => write!(f, "{v:#04X}"),
        }
    }
}

impl fmt::Display for Target8 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Reg(r) => write!(f, "{r}"),
            Self::MemHl => f.write_str("(HL)"),
        }
    }
}

impl fmt::Display for Op {
    #[allow(clippy::too_many_lines)]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Nop => f.write_str("NOP"),
            Self::Stop => f.write_str("STOP"),
            Self::Halt => f.write_str("HALT"),
            Self::Di => f.write_str("DI"),
            Self::Ei => f.write_str("EI"),
            Self::LdRR(d, s) => write!(f, "LD {d}, {s}"),
            Self::LdRImm(d, v) => write!(f, "LD {d}, {v:#04X}"),
            Self::LdRMemHl(d) => write!(f, "LD {d}, (HL)"),
            Self::LdMemHlR(s) => write!(f, "LD (HL), {s}"),
            Self::LdMemHlImm(v) => write!(f, "LD (HL), {v:#04X}"),
            Self::LdAMemBc => f.write_str("LD A, (BC)"),
            Self::LdAMemDe => f.write_str("LD A, (DE)"),
            Self::LdMemBcA => f.write_str("LD (BC), A"),
            Self::LdMemDeA => f.write_str("LD (DE), A"),
            Self::LdAMemImm(a) => write!(f, "LD A, ({a:#06X})"),
            Self::LdMemImmA(a) => write!(f, "LD ({a:#06X}), A"),
            Self::LdhAImm(n) => write!(f, "LDH A, ({n:#04X})"),
            Self::LdhImmA(n) => write!(f, "LDH ({n:#04X}), A"),
            Self::LdhAC => f.write_str("LD A, (C)"),
            Self::LdhCA => f.write_str("LD (C), A"),
            Self::LdAMemHlInc => f.write_str("LD A, (HL+)"),
            Self::LdAMemHlDec => f.write_str("LD A, (HL-)"),
            Self::LdMemHlIncA => f.write_str("LD (HL+), A"),
            Self::LdMemHlDecA => f.write_str("LD (HL-), A"),
            Self::LdRrImm(rr, v) => write!(f, "LD {rr}, {v:#06X}"),
            Self::LdMemImmSp(a) => write!(f, "LD ({a:#06X}), SP"),
            Self::LdSpHl => f.write_str("LD SP, HL"),
            Self::LdHlSpOff(e) => write!(f, "LD HL, SP{e:+}"),
            Self::Push(rr) => write!(f, "PUSH {rr}"),
            Self::Pop(rr) => write!(f, "POP {rr}"),
            Self::Alu(op, src) => {
                let name = match op {
                    AluOp::Add => "ADD A,",
                    AluOp::Adc => "ADC A,",
                    AluOp::Sub => "SUB",
                    AluOp::Sbc => "SBC A,",
                    AluOp::And => "AND",
                    AluOp::Xor => "XOR",
                    AluOp::Or => "OR",
                    AluOp::Cp => "CP",
                };
                write!(f, "{name} {src}")
            }
            Self::IncR(r) => write!(f, "INC {r}"),
            Self::DecR(r) => write!(f, "DEC {r}"),
            Self::IncMemHl => f.write_str("INC (HL)"),
            Self::DecMemHl => f.write_str("DEC (HL)"),
            Self::AddHl(rr) => write!(f, "ADD HL, {rr}"),
            Self::AddSpOff(e) => write!(f, "ADD SP, {e:+}"),
            Self::IncRr(rr) => write!(f, "INC {rr}"),
            Self::DecRr(rr) => write!(f, "DEC {rr}"),
            Self::Daa => f.write_str("DAA"),
            Self::Cpl => f.write_str("CPL"),
            Self::Scf => f.write_str("SCF"),
            Self::Ccf => f.write_str("CCF"),
            Self::Rlca => f.write_str("RLCA"),
            Self::Rla => f.write_str("RLA"),
            Self::Rrca => f.write_str("RRCA"),
            Self::Rra => f.write_str("RRA"),
            Self::Rot(op, t) => {
                let name = match op {
                    RotOp::Rlc => "RLC",
                    RotOp::Rrc => "RRC",
                    RotOp::Rl => "RL",
                    RotOp::Rr => "RR",
                    RotOp::Sla => "SLA",
                    RotOp::Sra => "SRA",
                    RotOp::Swap => "SWAP",
                    RotOp::Srl => "SRL",
                };
                write!(f, "{name} {t}")
            }
            Self::Bit(n, t) => write!(f, "BIT {n}, {t}"),
            Self::Res(n, t) => write!(f, "RES {n}, {t}"),
            Self::Set(n, t) => write!(f, "SET {n}, {t}"),
            Self::Jp(a) => write!(f, "JP {a:#06X}"),
            Self::JpCond(c, a) => write!(f, "JP {c}, {a:#06X}"),
            Self::JpHl => f.write_str("JP HL"),
            Self::Jr(a) => write!(f, "JR {a:#06X}"),
            Self::JrCond(c, a) => write!(f, "JR {c}, {a:#06X}"),
            Self::Call(a) => write!(f, "CALL {a:#06X}"),
            Self::CallCond(c, a) => write!(f, "CALL {c}, {a:#06X}"),
            Self::Ret => f.write_str("RET"),
            Self::RetCond(c) => write!(f, "RET {c}"),
            Self::Reti => f.write_str("RETI"),
            Self::Rst(v) => write!(f, "RST {v:#04X}"),
            Self::Invalid(b) => write!(f, "DB {b:#04X}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{decode, AluOp, Cond, Flow, Instruction, Op, Reg16, Reg8, RotOp, Src8, Target8};

    /// The eleven encodings left undefined by the CPU.
    const UNDEFINED: [u8; 11] = [
        0xD3, 0xDB, 0xDD, 0xE3, 0xE4, 0xEB, 0xEC, 0xED, 0xF4, 0xFC, 0xFD,
    ];

    fn decode_bytes(bytes: &[u8], addr: u16) -> Instruction {
        let base = addr;
        decode(
            |a| bytes[(a.wrapping_sub(base)) as usize % bytes.len()],
            addr,
        )
    }

    #[test]
    fn nop_is_one_byte_four_cycles() {
        let instr = decode_bytes(&[0x00], 0x0100);
        assert_eq!(instr.op, Op::Nop);
        assert_eq!(instr.len, 1);
        assert_eq!(instr.cycles, 4);
        assert_eq!(instr.flow, Flow::Fallthrough);
    }

    #[test]
    fn ld_bc_imm_reads_little_endian() {
        let instr = decode_bytes(&[0x01, 0x34, 0x12], 0x0150);
        assert_eq!(instr.op, Op::LdRrImm(Reg16::BC, 0x1234));
        assert_eq!(instr.len, 3);
        assert_eq!(instr.cycles, 12);
    }

    #[test]
    fn jr_resolves_negative_displacement() {
        // JR -2 at 0x0200 loops back onto itself.
        let instr = decode_bytes(&[0x18, 0xFE], 0x0200);
        assert_eq!(instr.op, Op::Jr(0x0200));
        assert_eq!(instr.flow, Flow::Jump(0x0200));
    }

    #[test]
    fn jr_cond_records_both_edges_and_cycle_split() {
        let instr = decode_bytes(&[0x20, 0x05], 0x0300);
        assert_eq!(instr.op, Op::JrCond(Cond::Nz, 0x0307));
        assert_eq!(instr.cycles, 8);
        assert_eq!(instr.cycles_taken, 12);
        assert_eq!(
            instr.flow,
            Flow::CondJump {
                taken: 0x0307,
                fall: 0x0302
            }
        );
    }

    #[test]
    fn call_records_continuation() {
        let instr = decode_bytes(&[0xCD, 0x00, 0x40], 0x0150);
        assert_eq!(instr.op, Op::Call(0x4000));
        assert_eq!(
            instr.flow,
            Flow::Call {
                target: 0x4000,
                ret: 0x0153
            }
        );
        assert_eq!(instr.cycles, 24);
    }

    #[test]
    fn ret_cc_has_eight_and_twenty_cycle_split() {
        let instr = decode_bytes(&[0xD8], 0x0150);
        assert_eq!(instr.op, Op::RetCond(Cond::C));
        assert_eq!(instr.cycles, 8);
        assert_eq!(instr.cycles_taken, 20);
        assert_eq!(instr.flow, Flow::CondRet { fall: 0x0151 });
    }

    #[test]
    fn jp_hl_is_dynamic() {
        let instr = decode_bytes(&[0xE9], 0x0150);
        assert_eq!(instr.op, Op::JpHl);
        assert_eq!(instr.flow, Flow::DynamicJump);
        assert!(instr.flow.static_targets().is_empty());
    }

    #[test]
    fn rst_vectors_cover_all_eight_slots() {
        for y in 0u8..8 {
            let opcode = 0xC7 | (y << 3);
            let instr = decode_bytes(&[opcode], 0x0150);
            assert_eq!(instr.op, Op::Rst(y * 8));
            assert_eq!(
                instr.flow,
                Flow::Rst {
                    vector: u16::from(y) * 8,
                    ret: 0x0151
                }
            );
        }
    }

    #[test]
    fn undefined_opcodes_decode_as_invalid_terminators() {
        for opcode in UNDEFINED {
            let instr = decode_bytes(&[opcode], 0x0150);
            assert_eq!(instr.op, Op::Invalid(opcode), "{opcode:#04x}");
            assert_eq!(instr.flow, Flow::Invalid);
            assert_eq!(instr.len, 1);
        }
    }

    #[test]
    fn no_other_primary_opcode_is_invalid() {
        for opcode in 0u8..=0xFF {
            let instr = decode_bytes(&[opcode, 0x00, 0x00], 0x0150);
            let expect_invalid = UNDEFINED.contains(&opcode);
            assert_eq!(
                matches!(instr.op, Op::Invalid(_)),
                expect_invalid,
                "{opcode:#04x}"
            );
        }
    }

    #[test]
    fn cb_page_decodes_rotates_bits_res_set() {
        // RLC B
        assert_eq!(
            decode_bytes(&[0xCB, 0x00], 0).op,
            Op::Rot(RotOp::Rlc, Target8::Reg(Reg8::B))
        );
        // SWAP A
        assert_eq!(
            decode_bytes(&[0xCB, 0x37], 0).op,
            Op::Rot(RotOp::Swap, Target8::Reg(Reg8::A))
        );
        // BIT 7, (HL)
        let bit_hl = decode_bytes(&[0xCB, 0x7E], 0);
        assert_eq!(bit_hl.op, Op::Bit(7, Target8::MemHl));
        assert_eq!(bit_hl.cycles, 12);
        // RES 0, (HL)
        let res_hl = decode_bytes(&[0xCB, 0x86], 0);
        assert_eq!(res_hl.op, Op::Res(0, Target8::MemHl));
        assert_eq!(res_hl.cycles, 16);
        // SET 3, E
        let set_e = decode_bytes(&[0xCB, 0xDB], 0);
        assert_eq!(set_e.op, Op::Set(3, Target8::Reg(Reg8::E)));
        assert_eq!(set_e.cycles, 8);
    }

    #[test]
    fn halt_is_a_block_boundary_with_continuation() {
        let instr = decode_bytes(&[0x76], 0x0150);
        assert_eq!(instr.op, Op::Halt);
        assert_eq!(instr.flow, Flow::Halt);
        assert!(instr.flow.terminates_block());
    }

    #[test]
    fn alu_immediate_forms_decode() {
        let instr = decode_bytes(&[0xC6, 0x01], 0x0150);
        assert_eq!(instr.op, Op::Alu(AluOp::Add, Src8::Imm(0x01)));
        assert_eq!(instr.cycles, 8);
        let instr = decode_bytes(&[0xFE, 0x90], 0x0150);
        assert_eq!(instr.op, Op::Alu(AluOp::Cp, Src8::Imm(0x90)));
    }

    #[test]
    fn every_opcode_has_positive_length_and_cycles() {
        for opcode in 0u8..=0xFF {
            let instr = decode_bytes(&[opcode, 0x00, 0x00], 0x4000);
            assert!(instr.len >= 1 && instr.len <= 3, "{opcode:#04x}");
            assert!(instr.cycles >= 4, "{opcode:#04x}");
            assert!(instr.cycles_taken >= instr.cycles, "{opcode:#04x}");
        }
        for sub in 0u8..=0xFF {
            let instr = decode_bytes(&[0xCB, sub], 0x4000);
            assert_eq!(instr.len, 2, "CB {sub:#04x}");
            assert!(instr.cycles >= 8, "CB {sub:#04x}");
        }
    }

    #[test]
    fn records_redecode_identically() {
        // Round-trip over the full primary page with fixed operand bytes.
        for opcode in 0u8..=0xFF {
            let bytes = [opcode, 0x21, 0x43];
            let first = decode_bytes(&bytes, 0x0200);
            let second = decode_bytes(&bytes, 0x0200);
            assert_eq!(first, second);
        }
    }
}
