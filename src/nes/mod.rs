pub mod banks;
pub mod battery;
pub mod board;
pub mod cartridge;
pub mod controller;
pub mod debug_log;
pub mod devices;
pub mod mapper;
pub mod pacer;
#[cfg(test)]
pub(crate) mod testing;

use anyhow::{Context, Result, bail};
use log::{debug, info, warn};
use std::{sync::Arc, time::Instant};

use crate::config::BusConfig;
use battery::BatteryRam;
use board::{Board, CartridgeSlot};
use cartridge::{LoadError, RomImage};
use devices::{
    ApuPort, BatteryStore, CpuMemory, CpuPort, DisplaySink, PadInput, PpuEvent, PpuPort,
    SoundSink,
};
use mapper::{Mapper, create_variant, mapper_name};
use pacer::FramePacer;

pub use board::BusDebugCounters;

/// Cycles the CPU is held while the APU's DMC reads a sample byte.
pub const DMC_FETCH_STALL_CYCLES: u32 = 4;
const MAX_PPU_EVENTS_PER_FRAME: usize = 1_000_000;

/// The timing collaborators the bus drives.
pub struct Devices {
    pub cpu: Box<dyn CpuPort>,
    pub ppu: Box<dyn PpuPort>,
    pub apu: Box<dyn ApuPort>,
}

/// Console memory bus: address decoding, cartridge lifecycle and the
/// frame-level timing glue between CPU, PPU and APU.
pub struct Bus {
    cpu: Box<dyn CpuPort>,
    board: Board,
    display: Option<Box<dyn DisplaySink>>,
    sound: Option<Box<dyn SoundSink>>,
    store: Arc<dyn BatteryStore>,
    config: BusConfig,
    pacer: FramePacer,
    /// CPU cycles granted by the PPU but not yet run; negative after overshoot.
    cycle_budget: i64,
    powered: bool,
    playing: bool,
    mapper_name: String,
}

impl Bus {
    pub fn new(devices: Devices, store: Arc<dyn BatteryStore>, config: BusConfig) -> Result<Self> {
        config.validate().context("invalid bus config")?;
        let Devices { cpu, ppu, apu } = devices;
        Ok(Self {
            cpu,
            board: Board::new(ppu, apu),
            display: None,
            sound: None,
            store,
            pacer: FramePacer::new(&config),
            config,
            cycle_budget: 0,
            powered: false,
            playing: false,
            mapper_name: "No ROM loaded".to_string(),
        })
    }

    pub fn config(&self) -> &BusConfig {
        &self.config
    }

    pub fn mapper_name(&self) -> &str {
        &self.mapper_name
    }

    pub fn has_cartridge(&self) -> bool {
        self.board.cartridge.is_some()
    }

    pub fn is_powered(&self) -> bool {
        self.powered
    }

    pub fn content_id(&self) -> Option<&str> {
        self.board
            .cartridge
            .as_ref()
            .map(|slot| slot.rom.content_id())
    }

    pub fn battery_ram(&self) -> Option<&[u8]> {
        self.board.battery.as_ref().map(BatteryRam::data)
    }

    pub fn debug_counters(&self) -> BusDebugCounters {
        self.board.debug
    }

    /// Register dump of the active variant, or its name when it keeps no state.
    pub fn debug_mapper_state(&self) -> String {
        match self.board.cartridge.as_ref().map(|slot| slot.variant.debug_state()) {
            None => "No mapper".to_string(),
            Some(state) if state.is_empty() => self.mapper_name.clone(),
            Some(state) => state,
        }
    }

    pub fn debug_recent_events(&self, limit: usize) -> Vec<String> {
        self.board.log.recent(limit)
    }

    pub fn debug_peek_ram(&self, addr: u16) -> u8 {
        self.board.ram[(addr as usize) & (board::RAM_SIZE - 1)]
    }

    pub fn debug_controller_state(&self) -> (bool, u8, u8) {
        let controllers = &self.board.controllers;
        (
            controllers.strobe(),
            controllers.bit_index(0),
            controllers.bit_index(1),
        )
    }

    /// Attaches `pad` as player `player` (0-3); `None` unplugs it.
    pub fn set_pad(&mut self, player: usize, pad: Option<Box<dyn PadInput>>) {
        if !self.board.controllers.set_pad(player, pad) {
            warn!("ignoring pad for player {player}, only players 0-3 exist");
        }
    }

    /// Loads `rom` into the cartridge slot, powering the console off first if
    /// it is running. The bus is left untouched when the mapper is unknown.
    pub fn insert_cartridge(&mut self, rom: RomImage) -> Result<(), LoadError> {
        let mapper_id = rom.mapper_id;
        let variant = create_variant(&rom)?;
        if self.powered {
            self.power_off();
        }

        self.mapper_name = format!("{} (mapper {mapper_id})", mapper_name(mapper_id));
        info!(
            "cartridge inserted: {}, {} PRG x16KiB, {} CHR x8KiB{}",
            self.mapper_name,
            rom.prg_bank_count(),
            rom.chr_bank_count(),
            if rom.battery_backed { ", battery" } else { "" }
        );
        self.board.cartridge = Some(CartridgeSlot::new(rom, variant));
        self.board
            .log
            .record(format!("ROM loaded: {}", self.mapper_name));
        Ok(())
    }

    /// Powers the console on with the inserted cartridge. Fails while already
    /// powered; `reset` or `power_off` first.
    pub fn init(
        &mut self,
        display: Box<dyn DisplaySink>,
        sound: Option<Box<dyn SoundSink>>,
    ) -> Result<()> {
        if self.powered {
            bail!("console is already powered on");
        }
        let Some(slot) = self.board.cartridge.as_ref() else {
            bail!("cannot power on without a cartridge");
        };

        let battery = if slot.rom.battery_backed {
            let key = slot.rom.content_id();
            let mut battery = BatteryRam::new(key, self.config.battery_debounce_frames);
            let saved = self
                .store
                .load(key)
                .with_context(|| format!("failed to load battery RAM for {key}"))?;
            if let Some(saved) = saved {
                info!("restored {} bytes of battery RAM for {key}", saved.len());
                battery.hydrate(&saved);
            }
            Some(battery)
        } else {
            None
        };

        self.board.battery = battery;
        self.board.init_rom();
        self.display = Some(display);
        self.sound = sound;
        self.cycle_budget = 0;
        self.board.stall_cycles = 0;
        self.powered = true;
        self.board.log.record("Power on");
        debug!("powered on: {}", self.debug_mapper_state());
        Ok(())
    }

    pub fn reset(&mut self) {
        if !self.powered || self.board.cartridge.is_none() {
            return;
        }

        self.board.init_rom();
        self.cpu.reset();
        self.board.ppu.reset();
        self.board.apu.reset();
        self.cycle_budget = 0;
        self.board.stall_cycles = 0;
        self.board.log.clear();
        self.board.log.record("Reset");
    }

    /// Stops the console and ejects the cartridge. Battery RAM is discarded
    /// without a final flush.
    pub fn power_off(&mut self) {
        if !self.powered {
            return;
        }

        self.stop_play();
        self.cpu.power_off();
        self.board.ppu.power_off();
        self.board.apu.power_off();
        if let Some(mut display) = self.display.take() {
            display.power_off();
        }
        self.sound = None;

        if self.board.battery.take().is_some_and(|battery| battery.is_dirty()) {
            warn!("powering off with unsaved battery RAM changes");
        }
        self.board.cartridge = None;
        self.mapper_name = "No ROM loaded".to_string();
        self.cycle_budget = 0;
        self.board.stall_cycles = 0;
        self.powered = false;
        self.board.log.record("Power off");
        info!("powered off");
    }

    pub fn start_play(&mut self) {
        if !self.powered {
            warn!("start_play ignored, console is not powered");
            return;
        }
        self.pacer.reset();
        self.playing = true;
    }

    pub fn stop_play(&mut self) {
        self.playing = false;
    }

    pub fn is_playing(&self) -> bool {
        self.playing
    }

    /// Runs the frames due at `now` while playing and returns how many ran.
    pub fn pump(&mut self, now: Instant) -> u32 {
        if !self.playing {
            return 0;
        }

        let due = self.pacer.frames_due(now);
        for _ in 0..due {
            self.step_frame();
        }
        due
    }

    pub fn read_mem(&mut self, addr: u16) -> u8 {
        self.board.read(addr)
    }

    pub fn write_mem(&mut self, addr: u16, value: u8) {
        self.board.write(addr, value);
        self.apply_stall();
    }

    /// Runs the PPU until it reports a finished frame, then presents it and
    /// advances the battery write-back debounce.
    pub fn step_frame(&mut self) {
        if !self.powered {
            return;
        }

        let mut events = 0usize;
        loop {
            match self.board.ppu.step() {
                PpuEvent::CpuCycles(cycles) => self.on_cpu_cycle(cycles),
                PpuEvent::HBlank(scanline) => self.on_scanline(scanline),
                PpuEvent::VBlank => self.on_video_blank(),
                PpuEvent::FrameComplete => break,
            }

            events += 1;
            if events > MAX_PPU_EVENTS_PER_FRAME {
                self.board.log.record(format!(
                    "Frame guard tripped at {MAX_PPU_EVENTS_PER_FRAME} PPU events"
                ));
                break;
            }
        }

        if let Some(display) = self.display.as_mut() {
            let pixels = self.board.ppu.render_frame(display.is_clipped());
            display.present(&pixels);
        }
        self.board.debug.frame_count = self.board.debug.frame_count.wrapping_add(1);
        self.tick_battery();
    }

    pub fn on_video_blank(&mut self) {
        if !self.powered {
            return;
        }
        self.board.debug.nmi_count = self.board.debug.nmi_count.wrapping_add(1);
        self.cpu.trigger_nmi();
    }

    pub fn on_scanline(&mut self, scanline: u16) {
        if !self.powered || !self.config.apu_step_scanlines.contains(&scanline) {
            return;
        }

        let sample_count = self
            .sound
            .as_ref()
            .map_or(self.config.default_audio_samples, |sound| sound.samples());
        let samples = self.board.apu.step(sample_count);
        self.board.debug.apu_steps = self.board.debug.apu_steps.wrapping_add(1);
        if let Some(sound) = self.sound.as_mut() {
            sound.play(&samples);
        }
        self.service_apu();
    }

    /// Grants the CPU `cycles` more cycles and runs it until they are spent.
    pub fn on_cpu_cycle(&mut self, cycles: u32) {
        if !self.powered {
            return;
        }
        self.cycle_budget += i64::from(cycles);
        while self.powered && self.cycle_budget > 0 {
            let max_cycles = u32::try_from(self.cycle_budget).unwrap_or(u32::MAX);
            let used = self.cpu.step(max_cycles, &mut self.board);
            self.board.debug.cpu_steps = self.board.debug.cpu_steps.wrapping_add(1);
            self.apply_stall();
            self.service_apu();
            if used == 0 {
                break;
            }
            self.cycle_budget -= i64::from(used);
        }
    }

    /// Reads a DMC sample byte on behalf of the APU, holding the CPU meanwhile.
    pub fn on_dmc_fetch(&mut self, addr: u16) -> u8 {
        if !self.powered {
            return 0;
        }
        self.board.debug.dmc_fetches = self.board.debug.dmc_fetches.wrapping_add(1);
        self.cpu.skip(DMC_FETCH_STALL_CYCLES);
        self.board.read(addr)
    }

    fn apply_stall(&mut self) {
        let stall = self.board.take_stall_cycles();
        if stall > 0 {
            self.cpu.skip(stall);
        }
    }

    fn service_apu(&mut self) {
        if let Some(addr) = self.board.apu.take_dmc_request() {
            let value = self.on_dmc_fetch(addr);
            self.board.apu.complete_dmc_fetch(value);
        }
        if let Some(asserted) = self.board.apu.poll_irq() {
            self.cpu.trigger_irq(asserted);
        }
    }

    fn tick_battery(&mut self) {
        let Some(battery) = self.board.battery.as_mut() else {
            return;
        };
        let Some(snapshot) = battery.tick_frame() else {
            return;
        };
        let key = battery.key().to_string();

        info!("flushing {} bytes of battery RAM for {key}", snapshot.len());
        self.store.store(&key, snapshot);
        self.board.debug.battery_flushes = self.board.debug.battery_flushes.wrapping_add(1);
        self.board.log.record(format!("Battery flush {key}"));
    }
}
