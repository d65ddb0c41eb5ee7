//! Smart dispatch and the outer execution loop.
//!
//! A generated program installs its address-to-function table as
//! `ctx.dispatch`; the table's default arm falls through to the interpreter,
//! so reaching an untranslated address is routing, not an error. Before any
//! table is installed the context dispatches everything to the interpreter,
//! which is a complete (if slow) execution mode on its own.

use crate::context::Context;
use crate::timing;

/// Runs the program until the platform or a `STOP` requests exit.
///
/// Each iteration either spins the clock while halted or transfers control
/// to the dispatch entry point for the current PC. Translated functions run
/// until they leave their own control-flow region; the interpreter runs one
/// instruction; either way control returns here and the PC is re-consulted.
pub fn run(ctx: &mut Context) {
    while !ctx.stopped {
        if ctx.halted {
            timing::tick(ctx, 4);
        } else {
            (ctx.dispatch)(ctx, ctx.pc);
        }
    }
}

/// Runs at most `limit` dispatch rounds. Test harness variant of [`run`].
pub fn run_bounded(ctx: &mut Context, limit: usize) {
    for _ in 0..limit {
        if ctx.stopped {
            break;
        }
        if ctx.halted {
            timing::tick(ctx, 4);
        } else {
            (ctx.dispatch)(ctx, ctx.pc);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::run_bounded;
    use crate::cartridge::Cartridge;
    use crate::context::Context;

    #[test]
    fn default_dispatch_interprets_from_reset() {
        // Program at 0x0100: LD A, 0x07; LD B, A; STOP.
        let mut bytes = vec![0u8; 0x8000];
        bytes[0x147] = 0x00;
        bytes[0x100..0x105].copy_from_slice(&[0x3E, 0x07, 0x47, 0x10, 0x00]);
        let mut ctx = Context::new(Cartridge::load(bytes).expect("flat test cartridge"));

        run_bounded(&mut ctx, 10);

        assert_eq!(ctx.a, 0x07);
        assert_eq!(ctx.b, 0x07);
        assert!(ctx.stopped);
    }

    #[test]
    fn installed_table_takes_priority_over_interpreter() {
        fn table(ctx: &mut Context, addr: u16) {
            if addr == 0x0100 {
                ctx.d = 0xDD;
                ctx.stopped = true;
            } else {
                crate::interp::enter(ctx, addr);
            }
        }

        let mut bytes = vec![0u8; 0x8000];
        bytes[0x147] = 0x00;
        let mut ctx = Context::new(Cartridge::load(bytes).expect("flat test cartridge"));
        ctx.dispatch = table;

        run_bounded(&mut ctx, 4);
        assert_eq!(ctx.d, 0xDD);
    }
}
