//! Recording collaborators and ROM builders shared by the unit tests.

use anyhow::{Result, anyhow};
use std::{
    cell::RefCell,
    collections::VecDeque,
    iter::repeat_n,
    rc::Rc,
};

use super::cartridge::{HEADER_SIZE, PRG_BANK_SIZE};
use super::devices::{
    ApuPort, BatteryStore, CpuMemory, CpuPort, DisplaySink, PadButton, PadInput, PpuEvent,
    PpuPort, SoundSink,
};
use super::mapper::Mirroring;

/// Builds an iNES image whose 8KiB PRG sub-bank `k` is filled with `k + 1`
/// and whose 1KiB CHR chunk `k` is filled with `0x81 + k`.
pub fn ines_image(mapper_id: u8, prg_banks: usize, chr_banks: usize, flags6: u8) -> Vec<u8> {
    let mut image = vec![0u8; HEADER_SIZE];
    image[0..4].copy_from_slice(b"NES\x1A");
    image[4] = prg_banks as u8;
    image[5] = chr_banks as u8;
    image[6] = (flags6 & 0x0F) | (mapper_id << 4);
    image[7] = mapper_id & 0xF0;
    for sub_bank in 0..prg_banks * (PRG_BANK_SIZE / 0x2000) {
        image.extend(repeat_n((sub_bank + 1) as u8, 0x2000));
    }
    for chunk in 0..chr_banks * 8 {
        image.extend(repeat_n(0x81u8.wrapping_add(chunk as u8), 0x0400));
    }
    image
}

fn shared<T: Default>() -> Rc<RefCell<T>> {
    Rc::new(RefCell::new(T::default()))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CpuOp {
    Read(u16),
    Write(u16, u8),
}

#[derive(Debug, Default)]
pub struct CpuState {
    /// Cycles a single `step` consumes, capped by the budget. Zero stalls the CPU.
    pub cycles_per_step: u32,
    /// Bus accesses performed by successive steps, one batch per step.
    pub script: VecDeque<Vec<CpuOp>>,
    pub steps: Vec<u32>,
    pub reads: Vec<(u16, u8)>,
    pub skipped: Vec<u32>,
    pub nmi_count: usize,
    pub irq_levels: Vec<bool>,
    pub resets: usize,
    pub power_offs: usize,
}

pub struct RecordingCpu {
    state: Rc<RefCell<CpuState>>,
}

impl RecordingCpu {
    pub fn new(cycles_per_step: u32) -> (Self, Rc<RefCell<CpuState>>) {
        let state: Rc<RefCell<CpuState>> = shared();
        state.borrow_mut().cycles_per_step = cycles_per_step;
        (
            Self {
                state: Rc::clone(&state),
            },
            state,
        )
    }
}

impl CpuPort for RecordingCpu {
    fn step(&mut self, max_cycles: u32, memory: &mut dyn CpuMemory) -> u32 {
        let ops = {
            let mut state = self.state.borrow_mut();
            state.steps.push(max_cycles);
            state.script.pop_front().unwrap_or_default()
        };
        for op in ops {
            match op {
                CpuOp::Read(addr) => {
                    let value = memory.read(addr);
                    self.state.borrow_mut().reads.push((addr, value));
                }
                CpuOp::Write(addr, value) => memory.write(addr, value),
            }
        }
        self.state.borrow().cycles_per_step.min(max_cycles)
    }

    fn skip(&mut self, cycles: u32) {
        self.state.borrow_mut().skipped.push(cycles);
    }

    fn trigger_nmi(&mut self) {
        self.state.borrow_mut().nmi_count += 1;
    }

    fn trigger_irq(&mut self, asserted: bool) {
        self.state.borrow_mut().irq_levels.push(asserted);
    }

    fn reset(&mut self) {
        self.state.borrow_mut().resets += 1;
    }

    fn power_off(&mut self) {
        self.state.borrow_mut().power_offs += 1;
    }
}

#[derive(Debug)]
pub struct PpuState {
    pub vram: Vec<u8>,
    pub vram_writes: usize,
    pub register_writes: Vec<(u16, u8)>,
    pub register_reads: Vec<u16>,
    pub register_value: u8,
    pub mirroring: Option<Mirroring>,
    /// Events returned by `step`; an empty queue reports a finished frame.
    pub events: VecDeque<PpuEvent>,
    pub render_clips: Vec<bool>,
    pub resets: usize,
    pub power_offs: usize,
}

impl Default for PpuState {
    fn default() -> Self {
        Self {
            vram: vec![0; 0x2000],
            vram_writes: 0,
            register_writes: Vec::new(),
            register_reads: Vec::new(),
            register_value: 0,
            mirroring: None,
            events: VecDeque::new(),
            render_clips: Vec::new(),
            resets: 0,
            power_offs: 0,
        }
    }
}

pub struct RecordingPpu {
    state: Rc<RefCell<PpuState>>,
}

impl RecordingPpu {
    pub fn new() -> (Self, Rc<RefCell<PpuState>>) {
        let state: Rc<RefCell<PpuState>> = shared();
        (
            Self {
                state: Rc::clone(&state),
            },
            state,
        )
    }
}

impl PpuPort for RecordingPpu {
    fn read_register(&mut self, addr: u16) -> u8 {
        let mut state = self.state.borrow_mut();
        state.register_reads.push(addr);
        state.register_value
    }

    fn write_register(&mut self, addr: u16, value: u8) {
        self.state.borrow_mut().register_writes.push((addr, value));
    }

    fn write_video_memory(&mut self, addr: u16, value: u8) {
        let mut state = self.state.borrow_mut();
        state.vram[addr as usize & 0x1FFF] = value;
        state.vram_writes += 1;
    }

    fn set_mirroring(&mut self, mirroring: Mirroring) {
        self.state.borrow_mut().mirroring = Some(mirroring);
    }

    fn step(&mut self) -> PpuEvent {
        self.state
            .borrow_mut()
            .events
            .pop_front()
            .unwrap_or(PpuEvent::FrameComplete)
    }

    fn render_frame(&mut self, clip: bool) -> Vec<u8> {
        self.state.borrow_mut().render_clips.push(clip);
        let lines = if clip { 224 } else { 240 };
        vec![0x0F; 256 * lines]
    }

    fn reset(&mut self) {
        self.state.borrow_mut().resets += 1;
    }

    fn power_off(&mut self) {
        self.state.borrow_mut().power_offs += 1;
    }
}

#[derive(Debug, Default)]
pub struct ApuState {
    pub register_writes: Vec<(u16, u8)>,
    pub register_reads: Vec<u16>,
    pub steps: Vec<usize>,
    pub dmc_requests: VecDeque<u16>,
    pub dmc_values: Vec<u8>,
    pub irq_changes: VecDeque<bool>,
    pub resets: usize,
    pub power_offs: usize,
}

pub struct RecordingApu {
    state: Rc<RefCell<ApuState>>,
}

impl RecordingApu {
    pub fn new() -> (Self, Rc<RefCell<ApuState>>) {
        let state: Rc<RefCell<ApuState>> = shared();
        (
            Self {
                state: Rc::clone(&state),
            },
            state,
        )
    }
}

impl ApuPort for RecordingApu {
    fn read_register(&mut self, addr: u16) -> u8 {
        self.state.borrow_mut().register_reads.push(addr);
        0x40
    }

    fn write_register(&mut self, addr: u16, value: u8) {
        self.state.borrow_mut().register_writes.push((addr, value));
    }

    fn step(&mut self, sample_count: usize) -> Vec<u8> {
        self.state.borrow_mut().steps.push(sample_count);
        vec![0x80; sample_count]
    }

    fn take_dmc_request(&mut self) -> Option<u16> {
        self.state.borrow_mut().dmc_requests.pop_front()
    }

    fn complete_dmc_fetch(&mut self, value: u8) {
        self.state.borrow_mut().dmc_values.push(value);
    }

    fn poll_irq(&mut self) -> Option<bool> {
        self.state.borrow_mut().irq_changes.pop_front()
    }

    fn reset(&mut self) {
        self.state.borrow_mut().resets += 1;
    }

    fn power_off(&mut self) {
        self.state.borrow_mut().power_offs += 1;
    }
}

#[derive(Debug, Default)]
pub struct DisplayState {
    pub clipped: bool,
    pub frame_sizes: Vec<usize>,
    pub power_offs: usize,
}

pub struct RecordingDisplay {
    state: Rc<RefCell<DisplayState>>,
}

impl RecordingDisplay {
    pub fn new(clipped: bool) -> (Self, Rc<RefCell<DisplayState>>) {
        let state: Rc<RefCell<DisplayState>> = shared();
        state.borrow_mut().clipped = clipped;
        (
            Self {
                state: Rc::clone(&state),
            },
            state,
        )
    }
}

impl DisplaySink for RecordingDisplay {
    fn present(&mut self, pixels: &[u8]) {
        self.state.borrow_mut().frame_sizes.push(pixels.len());
    }

    fn is_clipped(&self) -> bool {
        self.state.borrow().clipped
    }

    fn power_off(&mut self) {
        self.state.borrow_mut().power_offs += 1;
    }
}

#[derive(Debug, Default)]
pub struct SoundState {
    pub samples: usize,
    pub played: Vec<usize>,
}

pub struct RecordingSound {
    state: Rc<RefCell<SoundState>>,
}

impl RecordingSound {
    pub fn new(samples: usize) -> (Self, Rc<RefCell<SoundState>>) {
        let state: Rc<RefCell<SoundState>> = shared();
        state.borrow_mut().samples = samples;
        (
            Self {
                state: Rc::clone(&state),
            },
            state,
        )
    }
}

impl SoundSink for RecordingSound {
    fn samples(&self) -> usize {
        self.state.borrow().samples
    }

    fn play(&mut self, samples: &[u8]) {
        self.state.borrow_mut().played.push(samples.len());
    }
}

/// Pad whose buttons are held according to a bitmask, bit `n` = `PadButton` n.
pub struct FixedPad(pub u8);

impl PadInput for FixedPad {
    fn button(&self, button: PadButton) -> bool {
        (self.0 >> button as u8) & 1 != 0
    }
}

pub struct FailingStore;

impl BatteryStore for FailingStore {
    fn load(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Err(anyhow!("storage offline while loading {key}"))
    }

    fn store(&self, _key: &str, _data: Vec<u8>) {}
}
