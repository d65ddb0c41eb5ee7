//! Timing tick, interrupt controller, and CPU suspension.
//!
//! Every instruction, translated or interpreted, ends in one [`tick`] call.
//! The tick is where pending `EI` enables are promoted, where interrupts are
//! dispatched (so they are only ever taken between instructions), where the
//! PPU advances, and where completed frames are presented.

use crate::bus;
use crate::context::{Context, CYCLES_PER_FRAME, IF_INDEX};

/// Interrupt vectors in priority order: VBlank, STAT, Timer, Serial, Joypad.
pub const INTERRUPT_VECTORS: [u16; 5] = [0x0040, 0x0048, 0x0050, 0x0058, 0x0060];

/// Advances machine time by `cycles` T-cycles.
///
/// Order within one tick: the delayed `EI` enable is promoted first, then the
/// interrupt condition is evaluated and dispatched, then the PPU runs and a
/// completed frame is presented. The PPU therefore observes register writes
/// made by the instruction that owns this tick.
pub fn tick(ctx: &mut Context, cycles: u32) {
    ctx.cycles += u64::from(cycles);
    ctx.frame_cycles += cycles;

    if ctx.ime_pending {
        ctx.ime = true;
        ctx.ime_pending = false;
    }

    if ctx.ime {
        let pending = ctx.io[IF_INDEX] & ctx.ie & 0x1F;
        if pending != 0 {
            dispatch_interrupt(ctx, pending);
        }
    }

    if let Some(mut ppu) = ctx.ppu.take() {
        ppu.tick(ctx, cycles);
        if ppu.frame_ready() {
            present_frame(ctx, ppu.as_mut());
            ppu.clear_frame_ready();
            ctx.frame_cycles = 0;
        }
        ctx.ppu = Some(ppu);
    }
}

/// Dispatches the highest-priority pending interrupt: clears IME and the IF
/// bit, wakes the CPU, pushes PC exactly as a `CALL` would, and transfers to
/// the vector through the installed dispatch entry point.
fn dispatch_interrupt(ctx: &mut Context, pending: u8) {
    let index = pending.trailing_zeros() as usize;
    let vector = INTERRUPT_VECTORS[index];

    ctx.ime = false;
    ctx.halted = false;
    ctx.io[IF_INDEX] &= !(1 << index);

    bus::push16(ctx, ctx.pc);
    ctx.pc = vector;
    (ctx.dispatch)(ctx, vector);
}

fn present_frame(ctx: &mut Context, ppu: &mut dyn crate::ppu::Ppu) {
    if let Some(mut platform) = ctx.platform.take() {
        platform.render_frame(ppu.framebuffer());
        platform.vsync();
        if !platform.poll_events(ctx) {
            ctx.stopped = true;
        }
        ctx.platform = Some(platform);
    }
}

/// `HALT`: suspends the CPU and spins the tick until an interrupt becomes
/// pending. Owns the instruction's own four-cycle tick, which may dispatch
/// an already-pending interrupt and clear `halted` before the spin starts.
/// The spin is fused at one frame of cycles so a context with no enabled
/// interrupts still makes bounded progress.
pub fn halt(ctx: &mut Context) {
    ctx.halted = true;

    let mut fuse = CYCLES_PER_FRAME;
    tick(ctx, 4);
    fuse -= 4;

    while ctx.halted && !ctx.stopped && fuse > 0 {
        if ctx.io[IF_INDEX] & ctx.ie & 0x1F != 0 {
            ctx.halted = false;
            break;
        }
        tick(ctx, 4);
        fuse = fuse.saturating_sub(4);
    }
}

/// `STOP`: the execution loop unwinds to the program exit path.
pub fn stop(ctx: &mut Context) {
    ctx.stopped = true;
}

/// Runtime trap for blocks that end on an undefined opcode. Reported once,
/// then the program stops.
pub fn trap(ctx: &mut Context, addr: u16, opcode: u8) {
    log::error!("undefined opcode {opcode:#04x} reached at {addr:#06x}; stopping");
    ctx.pc = addr;
    ctx.stopped = true;
}

#[cfg(test)]
mod tests {
    use super::{halt, tick};
    use crate::cartridge::Cartridge;
    use crate::context::{Context, CYCLES_PER_FRAME, IF_INDEX};

    fn ctx() -> Context {
        let mut bytes = vec![0u8; 0x8000];
        bytes[0x147] = 0x00;
        Context::new(Cartridge::load(bytes).expect("flat test cartridge"))
    }

    #[test]
    fn pending_enable_promotes_at_tick_start() {
        let mut ctx = ctx();
        ctx.ime_pending = true;
        tick(&mut ctx, 4);
        assert!(ctx.ime);
        assert!(!ctx.ime_pending);
    }

    #[test]
    fn interrupt_dispatch_pushes_pc_and_clears_if_bit() {
        let mut ctx = ctx();
        ctx.ime = true;
        ctx.ie = 0x01;
        ctx.io[IF_INDEX] = 0x01;
        ctx.pc = 0x1234;
        ctx.sp = 0xFFFE;

        tick(&mut ctx, 4);

        // The default dispatch interprets one instruction at the vector, so
        // PC has moved past 0x0040; the pushed continuation is what matters.
        assert!(!ctx.ime);
        assert_eq!(ctx.io[IF_INDEX] & 0x01, 0);
        assert_eq!(crate::bus::read16(&ctx, 0xFFFC), 0x1234);
    }

    #[test]
    fn vblank_outranks_later_sources() {
        let mut ctx = ctx();
        ctx.ime = true;
        ctx.ie = 0x1F;
        ctx.io[IF_INDEX] = 0x1F;
        ctx.sp = 0xFFFE;
        ctx.pc = 0x0100;

        tick(&mut ctx, 4);

        // VBlank (bit 0) must have been consumed first.
        assert_eq!(ctx.io[IF_INDEX] & 0x1F, 0x1E);
    }

    #[test]
    fn masked_interrupts_are_not_taken() {
        let mut ctx = ctx();
        ctx.ime = true;
        ctx.ie = 0x00;
        ctx.io[IF_INDEX] = 0x1F;
        let pc = ctx.pc;
        tick(&mut ctx, 4);
        assert_eq!(ctx.pc, pc);
        assert!(ctx.ime);
    }

    #[test]
    fn halt_with_no_interrupts_is_bounded_by_one_frame() {
        let mut ctx = ctx();
        ctx.ie = 0x00;
        ctx.io[IF_INDEX] = 0x00;
        let before = ctx.cycles;

        halt(&mut ctx);

        let elapsed = ctx.cycles - before;
        assert!(elapsed <= u64::from(CYCLES_PER_FRAME));
        assert!(ctx.halted);
    }

    #[test]
    fn halt_wakes_on_pending_interrupt_without_ime() {
        let mut ctx = ctx();
        ctx.ime = false;
        ctx.ie = 0x04;
        ctx.io[IF_INDEX] = 0x04;
        let before = ctx.cycles;

        halt(&mut ctx);

        assert!(!ctx.halted);
        // Woke on the first spin iteration.
        assert_eq!(ctx.cycles - before, 4);
        // Without IME the pending bit is left in place.
        assert_eq!(ctx.io[IF_INDEX] & 0x04, 0x04);
    }
}
