use log::trace;

use super::cartridge::{CHR_BANK_SIZE, PRG_BANK_SIZE, RomImage};
use super::devices::PpuPort;
use super::mapper::Mirroring;

pub const PRG_SUB_BANK_SIZE: usize = 0x2000;
pub const PRG_SUB_SLOTS: usize = 4;

/// A non-owning 8KiB window into one of the ROM image's PRG banks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrgWindow {
    pub bank: usize,
    pub offset: usize,
}

/// PRG window table for $8000-$FFFF plus the slot sizes variants select with.
///
/// PRG is always bound in 8KiB physical sub-slots; the logical slot size only
/// changes how `(slot, index)` pairs are turned into byte addresses.
#[derive(Debug, Clone)]
pub struct BankTables {
    prg: [Option<PrgWindow>; PRG_SUB_SLOTS],
    prg_slot_size: usize,
    chr_slot_size: usize,
}

impl Default for BankTables {
    fn default() -> Self {
        Self::new()
    }
}

impl BankTables {
    pub fn new() -> Self {
        Self {
            prg: [None; PRG_SUB_SLOTS],
            prg_slot_size: PRG_BANK_SIZE,
            chr_slot_size: CHR_BANK_SIZE,
        }
    }

    pub fn prg_slot_size(&self) -> usize {
        self.prg_slot_size
    }

    pub fn chr_slot_size(&self) -> usize {
        self.chr_slot_size
    }

    pub fn prg_window(&self, sub_slot: usize) -> Option<PrgWindow> {
        self.prg[sub_slot & (PRG_SUB_SLOTS - 1)]
    }

    pub fn read_prg(&self, rom: &RomImage, addr: u16) -> u8 {
        let addr = addr as usize;
        match self.prg[(addr >> 13) & 3] {
            Some(window) => rom.prg_bank(window.bank)[window.offset + (addr & 0x1FFF)],
            None => 0,
        }
    }

    fn set_prg_slot_size(&mut self, size: usize) {
        debug_assert!(size == 0x2000 || size == 0x4000, "PRG slot size {size:#X}");
        self.prg_slot_size = size;
    }

    fn set_chr_slot_size(&mut self, size: usize) {
        debug_assert!(
            matches!(size, 0x0400 | 0x0800 | 0x1000 | 0x2000),
            "CHR slot size {size:#X}"
        );
        self.chr_slot_size = size;
    }

    fn bind_prg(&mut self, rom: &RomImage, slot: usize, index: usize) {
        let sub_banks = rom.prg_bank_count() * (PRG_BANK_SIZE / PRG_SUB_BANK_SIZE);
        let mut addr = slot * self.prg_slot_size;
        let mut from = index * self.prg_slot_size;
        for _ in 0..self.prg_slot_size / PRG_SUB_BANK_SIZE {
            let sub_bank = (from / PRG_SUB_BANK_SIZE) % sub_banks;
            self.prg[(addr >> 13) & 3] = Some(PrgWindow {
                bank: sub_bank >> 1,
                offset: (sub_bank & 1) * PRG_SUB_BANK_SIZE,
            });
            addr += PRG_SUB_BANK_SIZE;
            from += PRG_SUB_BANK_SIZE;
        }
    }

    fn copy_chr(&self, rom: &RomImage, ppu: &mut dyn PpuPort, slot: usize, index: usize) -> bool {
        let size = self.chr_slot_size;
        let from = index * size;
        if from >= rom.chr_len() {
            return false;
        }
        let dest = slot * size;
        let start = from % CHR_BANK_SIZE;
        let bank = rom.chr_bank(from / CHR_BANK_SIZE);
        for (i, &byte) in bank[start..start + size].iter().enumerate() {
            ppu.write_video_memory(((dest + i) & 0x1FFF) as u16, byte);
        }
        true
    }
}

/// What a mapper variant may touch: the bank tables, the ROM it maps and the
/// PPU's pattern memory and mirroring.
pub struct BankContext<'a> {
    rom: &'a RomImage,
    banks: &'a mut BankTables,
    ppu: &'a mut dyn PpuPort,
}

impl<'a> BankContext<'a> {
    pub fn new(rom: &'a RomImage, banks: &'a mut BankTables, ppu: &'a mut dyn PpuPort) -> Self {
        Self { rom, banks, ppu }
    }

    pub fn rom(&self) -> &RomImage {
        self.rom
    }

    pub fn set_prg_slot_size(&mut self, size: usize) -> &mut Self {
        self.banks.set_prg_slot_size(size);
        self
    }

    pub fn set_chr_slot_size(&mut self, size: usize) -> &mut Self {
        self.banks.set_chr_slot_size(size);
        self
    }

    /// Number of selectable PRG banks at the current slot size.
    pub fn prg_bank_count(&self) -> usize {
        self.rom.prg_bank_count() * (PRG_BANK_SIZE / self.banks.prg_slot_size)
    }

    /// Number of selectable CHR banks at the current slot size.
    pub fn chr_bank_count(&self) -> usize {
        self.rom.chr_bank_count() * (CHR_BANK_SIZE / self.banks.chr_slot_size)
    }

    pub fn set_prg_bank(&mut self, slot: usize, index: usize) -> &mut Self {
        trace!("prg slot {slot} <- bank {index}");
        self.banks.bind_prg(self.rom, slot, index);
        self
    }

    /// Copies a CHR bank into pattern memory. Out-of-range banks are ignored.
    pub fn set_chr_bank(&mut self, slot: usize, index: usize) -> &mut Self {
        if self.banks.copy_chr(self.rom, &mut *self.ppu, slot, index) {
            trace!("chr slot {slot} <- bank {index}");
        } else {
            trace!("chr slot {slot} <- bank {index} ignored, beyond CHR data");
        }
        self
    }

    pub fn set_mirroring(&mut self, mirroring: Mirroring) {
        trace!("mirroring <- {mirroring:?}");
        self.ppu.set_mirroring(mirroring);
    }
}
