//! Intermediate representation for native emission.
//!
//! Each decoded instruction lowers to a short sequence of stack-machine
//! micro-operations: loads push operands, stores and ALU operations consume
//! them. The emitter keeps the operand stack at translation time only, so
//! the generated code is plain straight-line statements over the runtime
//! primitives.
//!
//! ALU micro-ops never carry flag semantics of their own; they name one of
//! the shared runtime primitives, which are the single authority on flags
//! for both execution modes.

use runtime_core::decoder::{Cond, Reg16, Reg8};

/// Accumulator and unary 8-bit ALU selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(missing_docs)]
pub enum Alu8 {
    Add,
    Adc,
    Sub,
    Sbc,
    And,
    Or,
    Xor,
    Cp,
    Inc,
    Dec,
}

/// 16-bit ALU selector. `AddSp` carries its signed immediate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Alu16 {
    /// `ADD HL, v`: pops the operand, accumulates into HL.
    AddHl,
    /// `SP + e` with the low-byte flag quirk; pushes the sum.
    AddSp(i8),
    /// Pops, increments, pushes. No flags.
    Inc,
    /// Pops, decrements, pushes. No flags.
    Dec,
}

/// Rotate/shift/bit micro-op selector for the CB page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(missing_docs)]
pub enum Rot {
    Rlc,
    Rrc,
    Rl,
    Rr,
    Sla,
    Sra,
    Srl,
    Swap,
    /// Flags only; consumes the operand without pushing a result.
    Bit(u8),
    Res(u8),
    Set(u8),
}

/// Accumulator-form rotates (always clear Z).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(missing_docs)]
pub enum AccRot {
    Rlca,
    Rla,
    Rrca,
    Rra,
}

/// Interrupt-control micro-ops.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntCtl {
    /// `DI`.
    Disable,
    /// Immediate enable (`RETI`'s half, kept separate for symmetry).
    Enable,
    /// `EI`: staged enable that promotes at the start of the next tick.
    EnableDelayed,
    /// `RETI`: return and enable in one step.
    RetAndEnable,
}

/// One stack-machine micro-operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IrOp {
    /// Pushes an 8-bit register.
    LoadReg8(Reg8),
    /// Pops into an 8-bit register.
    StoreReg8(Reg8),
    /// Pushes a 16-bit register pair.
    LoadReg16(Reg16),
    /// Pops into a 16-bit register pair.
    StoreReg16(Reg16),
    /// Pushes an 8-bit constant.
    LoadImm8(u8),
    /// Pushes a 16-bit constant.
    LoadImm16(u16),
    /// Pops an address, pushes the byte read through the bus.
    LoadMem8,
    /// Pops a value, then an address, and writes through the bus.
    StoreMem8,
    /// Pops an address, pushes the 16-bit value read through the bus.
    LoadMem16,
    /// Pops a value, then an address, and writes 16 bits through the bus.
    StoreMem16,
    /// Duplicates the top of the operand stack.
    Dup,
    /// Pops an 8-bit offset into the high page (`0xFF00 | v`).
    HighAddr,
    /// Pops a value onto the machine stack.
    Push16,
    /// Pushes a value popped from the machine stack.
    Pop16,
    /// 8-bit ALU through the shared primitives. Binary forms pop their
    /// operand; `Inc`/`Dec` pop and push.
    Alu8(Alu8),
    /// 16-bit ALU; see [`Alu16`].
    Alu16(Alu16),
    /// CB-page rotate/shift/bit; pops, and pushes unless flags-only.
    Rot(Rot),
    /// Accumulator-form rotate.
    AccRot(AccRot),
    /// BCD adjust.
    Daa,
    /// Complement accumulator.
    Cpl,
    /// Set carry.
    Scf,
    /// Complement carry.
    Ccf,
    /// Static branch; unconditional when `cond` is `None`.
    Branch {
        /// Absolute target address.
        target: u16,
        /// Branch condition, if any.
        cond: Option<Cond>,
    },
    /// Pops a 16-bit target and leaves the function (dynamic transfer).
    JumpDynamic,
    /// Static call through the dispatcher.
    Call {
        /// Callee entry address.
        target: u16,
        /// Continuation pushed on the machine stack.
        ret: u16,
    },
    /// Return; conditional when `cond` is set.
    Ret {
        /// Return condition, if any.
        cond: Option<Cond>,
    },
    /// One-byte call to a fixed vector.
    Rst {
        /// Vector address.
        vector: u16,
        /// Continuation pushed on the machine stack.
        ret: u16,
    },
    /// IME manipulation.
    Interrupt(IntCtl),
    /// CPU suspension; owns its own tick.
    Halt,
    /// Program stop.
    Stop,
    /// Advances machine time. Control-flow lowerings fold their ticks into
    /// the emitted branch structure instead.
    Tick(u32),
    /// Undefined-opcode trap.
    Trap(u8),
}

/// Net operand-stack effect of a micro-op: (pops, pushes). Used by tests to
/// prove that every lowering leaves the stack balanced.
#[must_use]
pub const fn stack_effect(op: &IrOp) -> (u8, u8) {
    match op {
        IrOp::LoadReg8(_)
        | IrOp::LoadReg16(_)
        | IrOp::LoadImm8(_)
        | IrOp::LoadImm16(_)
        | IrOp::Pop16 => (0, 1),
        IrOp::StoreReg8(_) | IrOp::StoreReg16(_) | IrOp::Push16 | IrOp::JumpDynamic => (1, 0),
        IrOp::LoadMem8 | IrOp::LoadMem16 | IrOp::HighAddr => (1, 1),
        IrOp::StoreMem8 | IrOp::StoreMem16 => (2, 0),
        IrOp::Dup => (1, 2),
        IrOp::Alu8(alu) => match alu {
            Alu8::Inc | Alu8::Dec => (1, 1),
            _ => (1, 0),
        },
        IrOp::Alu16(alu) => match alu {
            Alu16::AddHl => (1, 0),
            Alu16::AddSp(_) => (0, 1),
            Alu16::Inc | Alu16::Dec => (1, 1),
        },
        IrOp::Rot(rot) => match rot {
            Rot::Bit(_) => (1, 0),
            _ => (1, 1),
        },
        IrOp::AccRot(_)
        | IrOp::Daa
        | IrOp::Cpl
        | IrOp::Scf
        | IrOp::Ccf
        | IrOp::Branch { .. }
        | IrOp::Call { .. }
        | IrOp::Ret { .. }
        | IrOp::Rst { .. }
        | IrOp::Interrupt(_)
        | IrOp::Halt
        | IrOp::Stop
        | IrOp::Tick(_)
        | IrOp::Trap(_) => (0, 0),
    }
}
