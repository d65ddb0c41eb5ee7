//! Platform collaborator interface.
//!
//! Windowing, input, and frame pacing live behind this trait. The runtime
//! calls it only at frame boundaries; `poll_events` is the sole cancellation
//! point and owns the joypad state bytes in the context.

use crate::context::Context;
use crate::ppu::FRAME_PIXELS;

/// Host windowing/input backend.
pub trait Platform {
    /// Pumps the host event queue and refreshes `ctx.dpad`/`ctx.buttons`
    /// (active-low nibbles). Returns `false` to request program exit.
    fn poll_events(&mut self, ctx: &mut Context) -> bool;

    /// Presents a completed frame.
    fn render_frame(&mut self, framebuffer: &[u32; FRAME_PIXELS]);

    /// Blocks until the next display refresh, up to one frame period.
    fn vsync(&mut self);
}

/// Platform stand-in for tests and headless translation runs: no window,
/// no input, never requests exit.
pub struct HeadlessPlatform;

impl Platform for HeadlessPlatform {
    fn poll_events(&mut self, _ctx: &mut Context) -> bool {
        true
    }

    fn render_frame(&mut self, _framebuffer: &[u32; FRAME_PIXELS]) {}

    fn vsync(&mut self) {}
}
