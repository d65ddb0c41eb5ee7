//! Memory bus routing and stack primitives.
//!
//! A single `read8`/`write8` pair routes every access by address range;
//! 16-bit accesses and the stack are built on top of it, so a push to HRAM
//! through SP takes the same path as any other store. Writes into the ROM
//! window are bank-register writes and never touch the image.

use crate::cartridge::MbcKind;
use crate::context::{Context, OAM_SIZE, VRAM_SIZE, WRAM_BANK_SIZE};

const VRAM_START: u16 = 0x8000;
const ERAM_START: u16 = 0xA000;
const WRAM_BANK0_START: u16 = 0xC000;
const WRAM_BANKN_START: u16 = 0xD000;
const ECHO_START: u16 = 0xE000;
const OAM_START: u16 = 0xFE00;
const IO_START: u16 = 0xFF00;
const HRAM_START: u16 = 0xFF80;

const JOYP: u16 = 0xFF00;
const DMA: u16 = 0xFF46;

/// Reads one byte at `addr` through the full address map.
///
/// Reads never fail: unusable and unmapped locations return `0xFF`.
#[must_use]
pub fn read8(ctx: &Context, addr: u16) -> u8 {
    match addr {
        0x0000..=0x3FFF => ctx.cart.read_banked(0, addr),
        0x4000..=0x7FFF => ctx.cart.read_banked(ctx.rom_bank, addr),
        0x8000..=0x9FFF => {
            let offset = (addr - VRAM_START) as usize + ctx.vram_bank as usize * (VRAM_SIZE / 2);
            ctx.vram[offset]
        }
        0xA000..=0xBFFF => {
            if ctx.ram_enabled {
                let offset =
                    ctx.eram_bank as usize * 0x2000 + (addr - ERAM_START) as usize;
                ctx.eram.get(offset).copied().unwrap_or(0xFF)
            } else {
                0xFF
            }
        }
        0xC000..=0xCFFF => ctx.wram[(addr - WRAM_BANK0_START) as usize],
        0xD000..=0xDFFF => {
            ctx.wram[(addr - WRAM_BANKN_START) as usize + ctx.wram_bank as usize * WRAM_BANK_SIZE]
        }
        0xE000..=0xFDFF => read8(ctx, addr - (ECHO_START - WRAM_BANK0_START)),
        0xFE00..=0xFE9F => ctx.oam[(addr - OAM_START) as usize],
        0xFEA0..=0xFEFF => 0xFF,
        0xFF00..=0xFF7F => read_io(ctx, addr),
        0xFF80..=0xFFFE => ctx.hram[(addr - HRAM_START) as usize],
        0xFFFF => ctx.ie,
    }
}

/// Writes one byte at `addr` through the full address map.
///
/// Writes never fail: unusable locations drop the value.
pub fn write8(ctx: &mut Context, addr: u16, value: u8) {
    match addr {
        0x0000..=0x7FFF => write_bank_register(ctx, addr, value),
        0x8000..=0x9FFF => {
            let offset = (addr - VRAM_START) as usize + ctx.vram_bank as usize * (VRAM_SIZE / 2);
            ctx.vram[offset] = value;
        }
        0xA000..=0xBFFF => {
            if ctx.ram_enabled {
                let offset =
                    ctx.eram_bank as usize * 0x2000 + (addr - ERAM_START) as usize;
                if let Some(slot) = ctx.eram.get_mut(offset) {
                    *slot = value;
                }
            }
        }
        0xC000..=0xCFFF => ctx.wram[(addr - WRAM_BANK0_START) as usize] = value,
        0xD000..=0xDFFF => {
            ctx.wram
                [(addr - WRAM_BANKN_START) as usize + ctx.wram_bank as usize * WRAM_BANK_SIZE] =
                value;
        }
        0xE000..=0xFDFF => write8(ctx, addr - (ECHO_START - WRAM_BANK0_START), value),
        0xFE00..=0xFE9F => ctx.oam[(addr - OAM_START) as usize] = value,
        0xFEA0..=0xFEFF => {}
        0xFF00..=0xFF7F => write_io(ctx, addr, value),
        0xFF80..=0xFFFE => ctx.hram[(addr - HRAM_START) as usize] = value,
        0xFFFF => ctx.ie = value,
    }
}

/// Little-endian 16-bit read built from two `read8` calls.
#[must_use]
pub fn read16(ctx: &Context, addr: u16) -> u16 {
    let lo = read8(ctx, addr);
    let hi = read8(ctx, addr.wrapping_add(1));
    u16::from(lo) | u16::from(hi) << 8
}

/// Little-endian 16-bit write built from two `write8` calls.
pub fn write16(ctx: &mut Context, addr: u16, value: u16) {
    write8(ctx, addr, value as u8);
    write8(ctx, addr.wrapping_add(1), (value >> 8) as u8);
}

/// Pushes a 16-bit value: SP is pre-decremented by two, then the value is
/// stored little-endian.
pub fn push16(ctx: &mut Context, value: u16) {
    ctx.sp = ctx.sp.wrapping_sub(2);
    write16(ctx, ctx.sp, value);
}

/// Pops a 16-bit value and post-increments SP by two.
pub fn pop16(ctx: &mut Context) -> u16 {
    let value = read16(ctx, ctx.sp);
    ctx.sp = ctx.sp.wrapping_add(2);
    value
}

/// `RET`: the continuation comes from the stack.
pub fn ret(ctx: &mut Context) {
    ctx.pc = pop16(ctx);
}

/// `RETI`: return and enable interrupts immediately.
pub fn reti(ctx: &mut Context) {
    ctx.pc = pop16(ctx);
    ctx.ime = true;
}

/// Bank-register writes for the `0x0000..=0x7FFF` window. Sub-range layout
/// is the MBC1 shape; MBC3/MBC5 share it closely enough for the registers
/// implemented here.
fn write_bank_register(ctx: &mut Context, addr: u16, value: u8) {
    match addr {
        0x0000..=0x1FFF => ctx.ram_enabled = value & 0x0F == 0x0A,
        0x2000..=0x3FFF => {
            let mask = match ctx.cart.mbc {
                MbcKind::Mbc1 => 0x1F,
                MbcKind::Mbc2 => 0x0F,
                _ => 0xFF,
            };
            let mut bank = u16::from(value & mask);
            if bank == 0 && ctx.cart.mbc != MbcKind::Mbc5 {
                bank = 1;
            }
            ctx.rom_bank = bank;
        }
        0x4000..=0x5FFF => ctx.eram_bank = value & 0x03,
        _ => ctx.mbc_mode = value & 0x01,
    }
}

fn read_io(ctx: &Context, addr: u16) -> u8 {
    if addr == JOYP {
        return read_joypad(ctx);
    }
    if addr == DMA {
        // The DMA register reads back the last written source page.
        return ctx.io[(addr - IO_START) as usize];
    }
    if (0xFF40..=0xFF4B).contains(&addr) {
        if let Some(ppu) = ctx.ppu.as_ref() {
            return ppu.read_register(addr);
        }
    }
    ctx.io[(addr - IO_START) as usize]
}

fn write_io(ctx: &mut Context, addr: u16, value: u8) {
    if addr == DMA {
        ctx.io[(addr - IO_START) as usize] = value;
        oam_dma(ctx, value);
        return;
    }
    if (0xFF40..=0xFF4B).contains(&addr) {
        if let Some(mut ppu) = ctx.ppu.take() {
            ppu.write_register(ctx, addr, value);
            ctx.ppu = Some(ppu);
            return;
        }
    }
    ctx.io[(addr - IO_START) as usize] = value;
}

/// Computes the joypad register from the selection bits and the platform's
/// active-low button state.
fn read_joypad(ctx: &Context) -> u8 {
    let select = ctx.io[0x00] & 0x30;
    let mut result = select | 0xC0 | 0x0F;
    if select & 0x10 == 0 {
        result = result & 0xF0 | ctx.dpad & 0x0F;
    }
    if select & 0x20 == 0 {
        result = result & 0xF0 | ctx.buttons & 0x0F;
    }
    result
}

/// Synchronous OAM DMA: copies 160 bytes from `value * 0x100` into OAM.
/// The source is read through the bus so banked regions resolve correctly.
fn oam_dma(ctx: &mut Context, value: u8) {
    let base = u16::from(value) << 8;
    for index in 0..OAM_SIZE as u16 {
        ctx.oam[index as usize] = read8(ctx, base.wrapping_add(index));
    }
}

#[cfg(test)]
mod tests {
    use super::{pop16, push16, read16, read8, write8};
    use crate::cartridge::Cartridge;
    use crate::context::Context;

    fn ctx_with_mbc1() -> Context {
        let mut bytes = vec![0u8; 0x4000 * 8];
        bytes[0x147] = 0x01;
        bytes[0x148] = 0x02;
        bytes[0x149] = 0x02;
        bytes[5 * 0x4000] = 0x5A;
        Context::new(Cartridge::load(bytes).expect("mbc1 test cartridge"))
    }

    #[test]
    fn rom_window_reads_selected_bank() {
        let mut ctx = ctx_with_mbc1();
        write8(&mut ctx, 0x2000, 0x05);
        assert_eq!(ctx.rom_bank, 5);
        assert_eq!(read8(&ctx, 0x4000), 0x5A);
    }

    #[test]
    fn bank_zero_select_promotes_to_one() {
        let mut ctx = ctx_with_mbc1();
        write8(&mut ctx, 0x2000, 0x00);
        assert_eq!(ctx.rom_bank, 1);
    }

    #[test]
    fn rom_writes_never_store_data() {
        let mut ctx = ctx_with_mbc1();
        write8(&mut ctx, 0x1000, 0xAB);
        assert_eq!(ctx.cart.bytes[0x1000], 0x00);
    }

    #[test]
    fn eram_is_gated_by_enable_latch() {
        let mut ctx = ctx_with_mbc1();
        write8(&mut ctx, 0xA000, 0x77);
        assert_eq!(read8(&ctx, 0xA000), 0xFF);

        write8(&mut ctx, 0x0000, 0x0A);
        write8(&mut ctx, 0xA000, 0x77);
        assert_eq!(read8(&ctx, 0xA000), 0x77);

        write8(&mut ctx, 0x0000, 0x00);
        assert_eq!(read8(&ctx, 0xA000), 0xFF);
    }

    #[test]
    fn echo_ram_mirrors_wram_both_directions() {
        let mut ctx = ctx_with_mbc1();
        write8(&mut ctx, 0xC123, 0x42);
        assert_eq!(read8(&ctx, 0xE123), 0x42);

        write8(&mut ctx, 0xE456, 0x24);
        assert_eq!(read8(&ctx, 0xC456), 0x24);
    }

    #[test]
    fn unusable_region_reads_ff_and_drops_writes() {
        let mut ctx = ctx_with_mbc1();
        write8(&mut ctx, 0xFEA0, 0x11);
        assert_eq!(read8(&ctx, 0xFEA0), 0xFF);
        assert_eq!(read8(&ctx, 0xFEFF), 0xFF);
    }

    #[test]
    fn wram_bank_window_uses_selected_bank() {
        let mut ctx = ctx_with_mbc1();
        ctx.wram_bank = 2;
        write8(&mut ctx, 0xD000, 0x99);
        assert_eq!(ctx.wram[2 * 0x1000], 0x99);
        ctx.wram_bank = 1;
        assert_eq!(read8(&ctx, 0xD000), 0x00);
    }

    #[test]
    fn ie_register_is_not_aliased_into_io() {
        let mut ctx = ctx_with_mbc1();
        write8(&mut ctx, 0xFFFF, 0x1F);
        assert_eq!(ctx.ie, 0x1F);
        assert_eq!(read8(&ctx, 0xFFFF), 0x1F);
        // The top of the I/O file must be unaffected.
        assert_eq!(ctx.io[0x7F], 0x00);
    }

    #[test]
    fn stack_round_trip_restores_sp() {
        let mut ctx = ctx_with_mbc1();
        ctx.sp = 0xFFFE;
        push16(&mut ctx, 0xBEEF);
        assert_eq!(ctx.sp, 0xFFFC);
        assert_eq!(pop16(&mut ctx), 0xBEEF);
        assert_eq!(ctx.sp, 0xFFFE);
    }

    #[test]
    fn stack_works_in_hram() {
        let mut ctx = ctx_with_mbc1();
        ctx.sp = 0xFFFE;
        push16(&mut ctx, 0x1234);
        assert_eq!(ctx.hram[0xFFFC - 0xFF80], 0x34);
        assert_eq!(ctx.hram[0xFFFD - 0xFF80], 0x12);
        assert_eq!(read16(&ctx, 0xFFFC), 0x1234);
    }

    #[test]
    fn joypad_reflects_selected_nibble() {
        let mut ctx = ctx_with_mbc1();
        ctx.dpad = 0x0E; // right pressed, active low
        ctx.buttons = 0x07; // start pressed

        write8(&mut ctx, 0xFF00, 0x20); // select dpad (bit 4 low)
        assert_eq!(read8(&ctx, 0xFF00) & 0x0F, 0x0E);

        write8(&mut ctx, 0xFF00, 0x10); // select buttons (bit 5 low)
        assert_eq!(read8(&ctx, 0xFF00) & 0x0F, 0x07);

        write8(&mut ctx, 0xFF00, 0x30); // nothing selected
        assert_eq!(read8(&ctx, 0xFF00) & 0x0F, 0x0F);
    }

    #[test]
    fn dma_write_copies_into_oam() {
        let mut ctx = ctx_with_mbc1();
        for i in 0..0xA0u16 {
            write8(&mut ctx, 0xC200 + i, i as u8);
        }
        write8(&mut ctx, 0xFF46, 0xC2);
        assert_eq!(ctx.oam[0x00], 0x00);
        assert_eq!(ctx.oam[0x5F], 0x5F);
        assert_eq!(ctx.oam[0x9F], 0x9F);
    }
}
