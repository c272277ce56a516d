//! Interfaces of the components the bus drives but does not implement.
//!
//! The CPU, PPU and APU are timing collaborators: they own their own state and
//! are stepped by the bus in response to frame events. Instead of registering
//! callbacks, the PPU reports what happened through [`PpuEvent`] and the APU
//! exposes its pending DMC fetch and IRQ line for the bus to poll.

use anyhow::Result;

use super::mapper::Mirroring;

/// Memory view the CPU executes against; implemented by the bus.
pub trait CpuMemory {
    fn read(&mut self, addr: u16) -> u8;
    fn write(&mut self, addr: u16, value: u8);
}

pub trait CpuPort {
    /// Runs instructions for up to `max_cycles` and returns the cycles used.
    fn step(&mut self, max_cycles: u32, memory: &mut dyn CpuMemory) -> u32;
    fn skip(&mut self, cycles: u32);
    fn trigger_nmi(&mut self);
    fn trigger_irq(&mut self, asserted: bool);
    fn reset(&mut self);
    fn power_off(&mut self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PpuEvent {
    /// The PPU advanced far enough for the CPU to run this many cycles.
    CpuCycles(u32),
    HBlank(u16),
    VBlank,
    FrameComplete,
}

pub trait PpuPort {
    fn read_register(&mut self, addr: u16) -> u8;
    fn write_register(&mut self, addr: u16, value: u8);
    fn write_video_memory(&mut self, addr: u16, value: u8);
    fn set_mirroring(&mut self, mirroring: Mirroring);
    fn step(&mut self) -> PpuEvent;
    /// Pixel buffer of the finished frame; `clip` drops the top and bottom 8 lines.
    fn render_frame(&mut self, clip: bool) -> Vec<u8>;
    fn reset(&mut self);
    fn power_off(&mut self);
}

pub trait ApuPort {
    fn read_register(&mut self, addr: u16) -> u8;
    fn write_register(&mut self, addr: u16, value: u8);
    fn step(&mut self, sample_count: usize) -> Vec<u8>;
    fn take_dmc_request(&mut self) -> Option<u16>;
    fn complete_dmc_fetch(&mut self, value: u8);
    /// IRQ line level, reported only when it changed since the last poll.
    fn poll_irq(&mut self) -> Option<bool>;
    fn reset(&mut self);
    fn power_off(&mut self);
}

/// Key/value persistence for battery RAM, keyed by ROM content id.
pub trait BatteryStore {
    fn load(&self, key: &str) -> Result<Option<Vec<u8>>>;
    /// Fire-and-forget; the store owns `data` for as long as the write takes.
    fn store(&self, key: &str, data: Vec<u8>);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PadButton {
    A = 0,
    B = 1,
    Select = 2,
    Start = 3,
    Up = 4,
    Down = 5,
    Left = 6,
    Right = 7,
}

impl PadButton {
    pub const ALL: [PadButton; 8] = [
        PadButton::A,
        PadButton::B,
        PadButton::Select,
        PadButton::Start,
        PadButton::Up,
        PadButton::Down,
        PadButton::Left,
        PadButton::Right,
    ];

    pub fn from_index(index: u8) -> Option<Self> {
        Self::ALL.get(index as usize).copied()
    }
}

pub trait PadInput {
    fn button(&self, button: PadButton) -> bool;
}

pub trait DisplaySink {
    fn present(&mut self, pixels: &[u8]);
    fn is_clipped(&self) -> bool;
    fn power_off(&mut self);
}

pub trait SoundSink {
    /// Samples wanted per APU step.
    fn samples(&self) -> usize;
    fn play(&mut self, samples: &[u8]);
}
