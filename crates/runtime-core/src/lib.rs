//! Runtime library for statically translated Game Boy programs.
//!
//! The crate is consumed from three directions: the recompiler borrows the
//! cartridge loader and decoder at translation time, emitted programs link
//! against the context, bus, ALU, and timing layers, and the interpreter
//! executes untranslated code paths over the very same primitives.

/// Cartridge image loading and MBC classification.
pub mod cartridge;
pub use cartridge::{Cartridge, CartridgeError, MbcKind, ERAM_BANK_SIZE, ROM_BANK_SIZE};

/// SM83 instruction decoder shared by the analyzer and the interpreter.
pub mod decoder;
pub use decoder::{
    decode, AluOp, Cond, Flow, Instruction, Op, Reg16, Reg8, RotOp, Src8, Target8,
};

/// The mutable execution context.
pub mod context;
pub use context::{Context, DispatchFn, CYCLES_PER_FRAME};

/// Memory bus routing and stack primitives.
pub mod bus;

/// Shared ALU primitives; the sole authority on flag semantics.
pub mod alu;

/// Timing tick, interrupt controller, and CPU suspension.
pub mod timing;

/// PPU collaborator interface.
pub mod ppu;
pub use ppu::{NullPpu, Ppu, FRAME_HEIGHT, FRAME_PIXELS, FRAME_WIDTH};

/// Platform collaborator interface.
pub mod platform;
pub use platform::{HeadlessPlatform, Platform};

/// Fallback interpreter behind the smart dispatcher.
pub mod interp;

/// Smart dispatch and the outer execution loop.
pub mod dispatch;
pub use dispatch::{run, run_bounded};

/// Flat facade over the primitives generated code calls into. Keeping the
/// emitted sources to a single `use runtime_core::ops;` makes them easier
/// to read than a per-module import list.
pub mod ops {
    pub use crate::alu::{
        adc8, add16_hl, add8, add_sp_offset, and8, bit, ccf, cp8, cpl, daa, dec8, inc8, or8, res,
        rl, rlc, rlca, rla, rr, rra, rrc, rrca, sbc8, scf, set, sla, sra, srl, sub8, swap, xor8,
    };
    pub use crate::bus::{pop16, push16, read16, read8, ret, reti, write16, write8};
    pub use crate::timing::{halt, stop, tick, trap};
}

#[cfg(test)]
use proptest as _;
#[cfg(test)]
use rstest as _;
