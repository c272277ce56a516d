use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

pub const NTSC_FRAME_RATE_HZ: f64 = 60.098_813_897_440_515;
pub const MAX_FRAMES_PER_UPDATE: u32 = 2;
pub const BATTERY_DEBOUNCE_FRAMES: u32 = 10;
pub const DEFAULT_AUDIO_SAMPLES: usize = 184;

/// Scanlines at which the APU is stepped (four times per frame, ~240Hz).
pub const APU_STEP_SCANLINES: [u16; 4] = [0, 65, 131, 196];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    /// Frames without a battery RAM write before the save is flushed.
    pub battery_debounce_frames: u32,
    pub apu_step_scanlines: Vec<u16>,
    /// Samples requested per APU step when no sound sink is attached.
    pub default_audio_samples: usize,
    pub frame_rate_hz: f64,
    pub max_frames_per_update: u32,
    pub save_dir: PathBuf,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            battery_debounce_frames: BATTERY_DEBOUNCE_FRAMES,
            apu_step_scanlines: APU_STEP_SCANLINES.to_vec(),
            default_audio_samples: DEFAULT_AUDIO_SAMPLES,
            frame_rate_hz: NTSC_FRAME_RATE_HZ,
            max_frames_per_update: MAX_FRAMES_PER_UPDATE,
            save_dir: PathBuf::from("saves"),
        }
    }
}

impl BusConfig {
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("failed to read bus config: {}", path.display()))?;
        Self::from_json(&text).with_context(|| format!("invalid bus config: {}", path.display()))
    }

    pub fn from_json(text: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(text).context("failed to parse bus config JSON")?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).context("failed to serialize bus config")
    }

    pub fn validate(&self) -> Result<()> {
        if self.battery_debounce_frames == 0 {
            bail!("battery_debounce_frames must be at least 1");
        }
        if !(self.frame_rate_hz.is_finite() && self.frame_rate_hz > 0.0) {
            bail!("frame_rate_hz must be positive, got {}", self.frame_rate_hz);
        }
        if self.max_frames_per_update == 0 {
            bail!("max_frames_per_update must be at least 1");
        }
        if let Some(line) = self.apu_step_scanlines.iter().find(|&&line| line > 261) {
            bail!("apu_step_scanlines entry {line} is outside the 0..=261 scanline range");
        }
        Ok(())
    }

    /// Falls back to the NTSC rate when `frame_rate_hz` is not a positive
    /// finite number.
    pub fn frame_interval(&self) -> Duration {
        let rate = if self.frame_rate_hz.is_finite() && self.frame_rate_hz > 0.0 {
            self.frame_rate_hz
        } else {
            NTSC_FRAME_RATE_HZ
        };
        Duration::try_from_secs_f64(1.0 / rate)
            .unwrap_or_else(|_| Duration::from_secs_f64(1.0 / NTSC_FRAME_RATE_HZ))
    }
}
