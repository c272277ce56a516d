use log::debug;

use super::banks::{BankContext, BankTables};
use super::battery::BatteryRam;
use super::cartridge::RomImage;
use super::controller::Controllers;
use super::debug_log::DebugLog;
use super::devices::{ApuPort, CpuMemory, PpuPort};
use super::mapper::{Mapper, MapperVariant};

pub const RAM_SIZE: usize = 0x0800;
pub const OAM_DMA_STALL_CYCLES: u32 = 513;
pub const OAM_DATA_REGISTER: u16 = 0x2004;

#[derive(Debug, Clone, Copy, Default)]
pub struct BusDebugCounters {
    pub frame_count: u64,
    pub cpu_steps: u64,
    pub cpu_reads: u64,
    pub cpu_writes: u64,
    pub cpu_reads_ram: u64,
    pub cpu_reads_ppu_regs: u64,
    pub cpu_reads_apu_io: u64,
    pub cpu_reads_cart: u64,
    pub cpu_writes_ram: u64,
    pub cpu_writes_ppu_regs: u64,
    pub cpu_writes_apu_io: u64,
    pub cpu_writes_cart: u64,
    pub dma_transfers: u64,
    pub dmc_fetches: u64,
    pub nmi_count: u64,
    pub apu_steps: u64,
    pub battery_flushes: u64,
    pub last_cpu_read_addr: u16,
    pub last_cpu_write_addr: u16,
    pub last_cpu_write_value: u8,
}

/// A loaded cartridge: the image, its bank-switching chip and the windows
/// that chip has mapped.
#[derive(Debug)]
pub struct CartridgeSlot {
    pub rom: RomImage,
    pub variant: MapperVariant,
    pub banks: BankTables,
}

impl CartridgeSlot {
    pub fn new(rom: RomImage, variant: MapperVariant) -> Self {
        Self {
            rom,
            variant,
            banks: BankTables::new(),
        }
    }
}

/// Everything the CPU can address. Split from the bus so the CPU can borrow
/// it mutably while the bus holds the CPU.
pub struct Board {
    pub(crate) ram: [u8; RAM_SIZE],
    pub(crate) ppu: Box<dyn PpuPort>,
    pub(crate) apu: Box<dyn ApuPort>,
    pub(crate) controllers: Controllers,
    pub(crate) cartridge: Option<CartridgeSlot>,
    pub(crate) battery: Option<BatteryRam>,
    /// CPU cycles owed to DMA, applied by the bus after the current access.
    pub(crate) stall_cycles: u32,
    pub(crate) debug: BusDebugCounters,
    pub(crate) log: DebugLog,
}

impl Board {
    pub fn new(ppu: Box<dyn PpuPort>, apu: Box<dyn ApuPort>) -> Self {
        Self {
            ram: [0; RAM_SIZE],
            ppu,
            apu,
            controllers: Controllers::new(),
            cartridge: None,
            battery: None,
            stall_cycles: 0,
            debug: BusDebugCounters::default(),
            log: DebugLog::default(),
        }
    }

    pub fn take_stall_cycles(&mut self) -> u32 {
        std::mem::take(&mut self.stall_cycles)
    }

    /// Pushes the header mirroring and lets the variant bind its power-on banks.
    pub(crate) fn init_rom(&mut self) {
        let Some(slot) = self.cartridge.as_mut() else {
            return;
        };
        self.ppu.set_mirroring(slot.rom.mirroring);
        let mut ctx = BankContext::new(&slot.rom, &mut slot.banks, self.ppu.as_mut());
        slot.variant.init_rom(&mut ctx);
    }

    fn oam_dma(&mut self, page: u8) {
        self.debug.dma_transfers = self.debug.dma_transfers.wrapping_add(1);
        let base = (page as u16) << 8;
        for offset in 0..=0xFFu16 {
            let value = self.read(base | offset);
            self.ppu.write_register(OAM_DATA_REGISTER, value);
        }
        self.stall_cycles = self.stall_cycles.saturating_add(OAM_DMA_STALL_CYCLES);
        self.log.record(format!(
            "OAM DMA page=${page:02X} stall_cycles={OAM_DMA_STALL_CYCLES}"
        ));
    }
}

impl CpuMemory for Board {
    fn read(&mut self, addr: u16) -> u8 {
        self.debug.cpu_reads = self.debug.cpu_reads.wrapping_add(1);
        self.debug.last_cpu_read_addr = addr;
        match addr {
            0x0000..=0x1FFF => {
                self.debug.cpu_reads_ram = self.debug.cpu_reads_ram.wrapping_add(1);
                self.ram[(addr as usize) & (RAM_SIZE - 1)]
            }
            0x2000..=0x3FFF => {
                self.debug.cpu_reads_ppu_regs = self.debug.cpu_reads_ppu_regs.wrapping_add(1);
                self.ppu.read_register(0x2000 + (addr & 0x0007))
            }
            0x4016 | 0x4017 => {
                self.debug.cpu_reads_apu_io = self.debug.cpu_reads_apu_io.wrapping_add(1);
                self.controllers.read((addr - 0x4016) as usize)
            }
            0x4000..=0x401F => {
                self.debug.cpu_reads_apu_io = self.debug.cpu_reads_apu_io.wrapping_add(1);
                self.apu.read_register(addr)
            }
            0x4020..=0x7FFF => {
                self.debug.cpu_reads_cart = self.debug.cpu_reads_cart.wrapping_add(1);
                match self.battery.as_ref() {
                    Some(battery) if addr >= 0x6000 => battery.read(addr),
                    _ => 0,
                }
            }
            0x8000..=0xFFFF => {
                self.debug.cpu_reads_cart = self.debug.cpu_reads_cart.wrapping_add(1);
                self.cartridge
                    .as_ref()
                    .map_or(0, |slot| slot.banks.read_prg(&slot.rom, addr))
            }
        }
    }

    fn write(&mut self, addr: u16, value: u8) {
        self.debug.cpu_writes = self.debug.cpu_writes.wrapping_add(1);
        self.debug.last_cpu_write_addr = addr;
        self.debug.last_cpu_write_value = value;
        match addr {
            0x0000..=0x1FFF => {
                self.debug.cpu_writes_ram = self.debug.cpu_writes_ram.wrapping_add(1);
                self.ram[(addr as usize) & (RAM_SIZE - 1)] = value;
            }
            0x2000..=0x3FFF => {
                self.debug.cpu_writes_ppu_regs = self.debug.cpu_writes_ppu_regs.wrapping_add(1);
                self.ppu.write_register(0x2000 + (addr & 0x0007), value);
            }
            0x4014 => {
                self.debug.cpu_writes_apu_io = self.debug.cpu_writes_apu_io.wrapping_add(1);
                self.oam_dma(value);
            }
            0x4016 => {
                self.debug.cpu_writes_apu_io = self.debug.cpu_writes_apu_io.wrapping_add(1);
                self.controllers.write_strobe(value);
            }
            0x4000..=0x401F => {
                self.debug.cpu_writes_apu_io = self.debug.cpu_writes_apu_io.wrapping_add(1);
                self.apu.write_register(addr, value);
            }
            0x4020..=0x7FFF => {
                self.debug.cpu_writes_cart = self.debug.cpu_writes_cart.wrapping_add(1);
                if let Some(battery) = self.battery.as_mut()
                    && addr >= 0x6000
                {
                    battery.write(addr, value);
                }
            }
            0x8000..=0xFFFF => {
                self.debug.cpu_writes_cart = self.debug.cpu_writes_cart.wrapping_add(1);
                if let Some(slot) = self.cartridge.as_mut() {
                    debug!("mapper write ${addr:04X}=${value:02X}");
                    let mut ctx = BankContext::new(&slot.rom, &mut slot.banks, self.ppu.as_mut());
                    slot.variant.write_rom(addr, value, &mut ctx);
                }
            }
        }
    }
}
