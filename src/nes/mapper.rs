use log::debug;

use super::banks::BankContext;
use super::cartridge::{LoadError, RomImage};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mirroring {
    OneScreenLower,
    OneScreenUpper,
    Vertical,
    Horizontal,
    FourScreen,
}

impl Mirroring {
    /// Decodes the two mirroring bits of an MMC1 control value.
    pub fn from_control_bits(bits: u8) -> Self {
        match bits & 0x03 {
            0 => Mirroring::OneScreenLower,
            1 => Mirroring::OneScreenUpper,
            2 => Mirroring::Vertical,
            _ => Mirroring::Horizontal,
        }
    }
}

/// A bank-switching chip. `write_rom` sees every CPU write to $8000-$FFFF.
pub trait Mapper {
    fn init_rom(&mut self, ctx: &mut BankContext<'_>);
    fn write_rom(&mut self, addr: u16, data: u8, ctx: &mut BankContext<'_>);
    fn debug_state(&self) -> String {
        String::new()
    }
}

pub fn mapper_name(mapper_id: u8) -> &'static str {
    match mapper_id {
        0 => "NROM",
        1 => "MMC1",
        2 => "UxROM",
        4 => "MMC3",
        _ => "Unsupported",
    }
}

#[derive(Debug, Clone)]
pub enum MapperVariant {
    Nrom(Mapper0),
    Mmc1(Mapper1),
    Unrom(Mapper2),
    Mmc3(Mapper4),
}

pub fn create_variant(rom: &RomImage) -> Result<MapperVariant, LoadError> {
    let variant = match rom.mapper_id {
        0 => MapperVariant::Nrom(Mapper0),
        1 => MapperVariant::Mmc1(Mapper1::new()),
        2 => MapperVariant::Unrom(Mapper2),
        4 => MapperVariant::Mmc3(Mapper4::new()),
        id => return Err(LoadError::UnsupportedMapper(id)),
    };
    Ok(variant)
}

impl MapperVariant {
    fn as_mapper(&mut self) -> &mut dyn Mapper {
        match self {
            MapperVariant::Nrom(mapper) => mapper,
            MapperVariant::Mmc1(mapper) => mapper,
            MapperVariant::Unrom(mapper) => mapper,
            MapperVariant::Mmc3(mapper) => mapper,
        }
    }
}

impl Mapper for MapperVariant {
    fn init_rom(&mut self, ctx: &mut BankContext<'_>) {
        self.as_mapper().init_rom(ctx);
    }

    fn write_rom(&mut self, addr: u16, data: u8, ctx: &mut BankContext<'_>) {
        self.as_mapper().write_rom(addr, data, ctx);
    }

    fn debug_state(&self) -> String {
        match self {
            MapperVariant::Nrom(mapper) => mapper.debug_state(),
            MapperVariant::Mmc1(mapper) => mapper.debug_state(),
            MapperVariant::Unrom(mapper) => mapper.debug_state(),
            MapperVariant::Mmc3(mapper) => mapper.debug_state(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Mapper0;

impl Mapper for Mapper0 {
    fn init_rom(&mut self, ctx: &mut BankContext<'_>) {
        let last = ctx.prg_bank_count() - 1;
        ctx.set_chr_bank(0, 0).set_prg_bank(1, last);
        // With a single 16KiB bank, bank 0 is also the last one and mirrors
        // into the low half.
        ctx.set_prg_bank(0, 0);
    }

    fn write_rom(&mut self, _addr: u16, _data: u8, _ctx: &mut BankContext<'_>) {}
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Mapper2;

impl Mapper for Mapper2 {
    fn init_rom(&mut self, ctx: &mut BankContext<'_>) {
        let last = ctx.prg_bank_count() - 1;
        ctx.set_prg_bank(0, 0).set_prg_bank(1, last).set_chr_bank(0, 0);
    }

    fn write_rom(&mut self, _addr: u16, data: u8, ctx: &mut BankContext<'_>) {
        ctx.set_prg_bank(0, data as usize);
    }
}

const MMC1_CHR_4K: u8 = 0x10;
const MMC1_PRG_16K: u8 = 0x08;
const MMC1_PRG_SWAP_LOW: u8 = 0x04;
const MMC1_PAGE_512K: u8 = 0x10;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct PrgPages {
    low: Option<u8>,
    high: Option<u8>,
    swap: u8,
}

#[derive(Debug, Clone)]
pub struct Mapper1 {
    shift_count: u8,
    shift_data: u8,
    control: u8,
    pages: PrgPages,
    prg_512k: bool,
}

impl Default for Mapper1 {
    fn default() -> Self {
        Self::new()
    }
}

impl Mapper1 {
    pub fn new() -> Self {
        Self {
            shift_count: 0,
            shift_data: 0,
            control: MMC1_PRG_16K | MMC1_PRG_SWAP_LOW,
            pages: PrgPages::default(),
            prg_512k: false,
        }
    }

    pub fn control(&self) -> u8 {
        self.control
    }

    pub fn shift_count(&self) -> u8 {
        self.shift_count
    }

    fn last_page(ctx: &BankContext<'_>) -> u8 {
        ((ctx.prg_bank_count() - 1) & 0x0F) as u8
    }

    /// Commits a fully shifted 5-bit value to the register selected by `addr`.
    pub fn write_register(&mut self, addr: u16, value: u8, ctx: &mut BankContext<'_>) {
        match addr {
            ..=0x9FFF => {
                self.control = value;
                ctx.set_mirroring(Mirroring::from_control_bits(value));
            }
            0xA000..=0xBFFF => {
                if self.prg_512k
                    && let (Some(low), Some(high)) = (self.pages.low, self.pages.high)
                {
                    self.select_prg_page(ctx, low, high, value & MMC1_PAGE_512K);
                }
                if (self.control & MMC1_CHR_4K) != 0 {
                    ctx.set_chr_bank(0, value as usize);
                } else {
                    ctx.set_chr_bank(0, (value & !1) as usize)
                        .set_chr_bank(1, (value | 1) as usize);
                }
            }
            0xC000..=0xDFFF => {
                if (self.control & MMC1_CHR_4K) != 0 {
                    ctx.set_chr_bank(1, value as usize);
                }
            }
            _ => {
                let swap = self.pages.swap;
                if (self.control & MMC1_PRG_16K) != 0 {
                    if (self.control & MMC1_PRG_SWAP_LOW) != 0 {
                        let last = Self::last_page(ctx);
                        self.select_prg_page(ctx, value & 0x0F, last, swap);
                    } else {
                        self.select_prg_page(ctx, 0, value & 0x0F, swap);
                    }
                } else {
                    let base = value & 0x0E;
                    self.select_prg_page(ctx, base, base | 1, swap);
                }
            }
        }
    }

    /// Rebinds only the halves whose page or 256KiB page-swap changed.
    fn select_prg_page(&mut self, ctx: &mut BankContext<'_>, low: u8, high: u8, swap: u8) {
        if self.pages.low != Some(low) || swap != self.pages.swap {
            self.pages.low = Some(low);
            ctx.set_prg_bank(0, (swap | low) as usize);
        }
        if self.pages.high != Some(high) || swap != self.pages.swap {
            self.pages.high = Some(high);
            ctx.set_prg_bank(1, (swap | high) as usize);
        }
        self.pages.swap = swap;
    }
}

impl Mapper for Mapper1 {
    fn init_rom(&mut self, ctx: &mut BankContext<'_>) {
        self.shift_count = 0;
        self.shift_data = 0;
        ctx.set_chr_slot_size(0x1000);
        self.control = MMC1_PRG_16K | MMC1_PRG_SWAP_LOW;
        self.prg_512k = ctx.prg_bank_count() > 16;
        self.pages.low = None;
        self.pages.high = None;
        let last = Self::last_page(ctx);
        self.select_prg_page(ctx, 0, last, 0);
        ctx.set_chr_bank(0, 0).set_chr_bank(1, 1);
    }

    fn write_rom(&mut self, addr: u16, data: u8, ctx: &mut BankContext<'_>) {
        if (data & 0x80) != 0 {
            self.shift_count = 0;
            self.shift_data = 0;
            self.control |= MMC1_PRG_16K | MMC1_PRG_SWAP_LOW;
            return;
        }

        self.shift_data |= (data & 0x01) << self.shift_count;
        self.shift_count += 1;
        if self.shift_count < 5 {
            return;
        }

        let value = self.shift_data;
        self.shift_data = 0;
        self.shift_count = 0;
        self.write_register(addr, value, ctx);
    }

    fn debug_state(&self) -> String {
        format!(
            "MMC1 control=${:02X} shift={}/{:05b} prg_low={:?} prg_high={:?} page=${:02X} 512k={}",
            self.control,
            self.shift_count,
            self.shift_data,
            self.pages.low,
            self.pages.high,
            self.pages.swap,
            self.prg_512k
        )
    }
}

#[derive(Debug, Clone)]
pub struct Mapper4 {
    select_mode: u8,
    even_page: u8,
    odd_page: u8,
}

impl Default for Mapper4 {
    fn default() -> Self {
        Self::new()
    }
}

impl Mapper4 {
    pub fn new() -> Self {
        Self {
            select_mode: 0,
            even_page: 0,
            odd_page: 1,
        }
    }

    pub fn select_mode(&self) -> u8 {
        self.select_mode
    }

    fn write_bank_select(&mut self, data: u8, ctx: &mut BankContext<'_>) {
        self.select_mode = data;
        let second_last = ctx.prg_bank_count().saturating_sub(2);
        let even = self.even_page as usize;
        if (data & 0x40) != 0 {
            ctx.set_prg_bank(0, second_last).set_prg_bank(2, even);
        } else {
            ctx.set_prg_bank(0, even).set_prg_bank(2, second_last);
        }
    }

    fn write_bank_data(&mut self, data: u8, ctx: &mut BankContext<'_>) {
        let mode = self.select_mode & 0x07;
        match mode {
            6 => {
                self.even_page = data;
                let slot = if (self.select_mode & 0x40) != 0 { 2 } else { 0 };
                ctx.set_prg_bank(slot, data as usize);
            }
            7 => {
                self.odd_page = data;
                ctx.set_prg_bank(1, data as usize);
            }
            _ => {
                // R0/R1 are 2KiB pairs at slots 0-3, R2-R5 are 1KiB at slots 4-7.
                let (mut slot, size) = if mode < 2 {
                    (mode as usize * 2, 2)
                } else {
                    (mode as usize + 2, 1)
                };
                if (self.select_mode & 0x80) != 0 {
                    slot ^= 4;
                }
                for i in 0..size {
                    ctx.set_chr_bank(slot + i, data as usize + i);
                }
            }
        }
    }
}

impl Mapper for Mapper4 {
    fn init_rom(&mut self, ctx: &mut BankContext<'_>) {
        self.even_page = 0;
        self.odd_page = 1;
        ctx.set_prg_slot_size(0x2000).set_chr_slot_size(0x0400);
        let count = ctx.prg_bank_count();
        ctx.set_prg_bank(0, count.saturating_sub(2))
            .set_prg_bank(1, self.odd_page as usize)
            .set_prg_bank(2, self.even_page as usize)
            .set_prg_bank(3, count - 1);
    }

    fn write_rom(&mut self, addr: u16, data: u8, ctx: &mut BankContext<'_>) {
        match addr {
            ..=0x9FFF => {
                if (addr & 1) == 0 {
                    self.write_bank_select(data, ctx);
                } else {
                    self.write_bank_data(data, ctx);
                }
            }
            0xA000..=0xBFFF => {
                if (addr & 1) == 0 && ctx.rom().mirroring != Mirroring::FourScreen {
                    let mirroring = if (data & 1) == 0 {
                        Mirroring::Vertical
                    } else {
                        Mirroring::Horizontal
                    };
                    ctx.set_mirroring(mirroring);
                }
            }
            // TODO: scanline IRQ latch/reload/enable at $C000-$FFFF once its
            // clocking source (PPU A12 or hblank) is part of the PPU interface.
            _ => debug!("MMC3 write ${addr:04X}=${data:02X} ignored"),
        }
    }

    fn debug_state(&self) -> String {
        format!(
            "MMC3 select=${:02X} prg_even=${:02X} prg_odd=${:02X}",
            self.select_mode, self.even_page, self.odd_page
        )
    }
}
