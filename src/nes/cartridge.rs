use anyhow::{Context, Result};
use sha1::{Digest, Sha1};
use std::{fs, path::Path, sync::OnceLock};
use thiserror::Error;

use super::mapper::Mirroring;

pub const HEADER_SIZE: usize = 16;
pub const TRAINER_SIZE: usize = 512;
pub const PRG_BANK_SIZE: usize = 0x4000;
pub const CHR_BANK_SIZE: usize = 0x2000;

const INES_MAGIC: &[u8; 4] = b"NES\x1A";

/// Load-time rejections. Everything past a successful load is infallible.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LoadError {
    #[error("malformed cartridge image: {0}")]
    Format(String),
    #[error("unsupported mapper {0}")]
    UnsupportedMapper(u8),
}

/// A parsed iNES image. PRG and CHR banks are views into the raw bytes.
#[derive(Debug)]
pub struct RomImage {
    pub mapper_id: u8,
    pub mirroring: Mirroring,
    pub battery_backed: bool,
    pub has_trainer: bool,
    raw: Vec<u8>,
    prg_offset: usize,
    prg_bank_count: usize,
    chr_offset: usize,
    chr_bank_count: usize,
    content_id: OnceLock<String>,
}

impl RomImage {
    pub fn from_file(path: &Path) -> Result<Self> {
        let bytes =
            fs::read(path).with_context(|| format!("failed to read ROM: {}", path.display()))?;
        Self::parse(bytes).with_context(|| format!("failed to load ROM: {}", path.display()))
    }

    pub fn parse(bytes: Vec<u8>) -> Result<Self, LoadError> {
        if bytes.len() < HEADER_SIZE {
            return Err(LoadError::Format(
                "image is too small to contain an iNES header".to_string(),
            ));
        }
        if &bytes[0..4] != INES_MAGIC {
            return Err(LoadError::Format(
                "invalid iNES header magic, expected NES<EOF>".to_string(),
            ));
        }

        let flags6 = bytes[6];
        let flags7 = bytes[7];

        let mirroring = if (flags6 & 0x08) != 0 {
            Mirroring::FourScreen
        } else if (flags6 & 0x01) != 0 {
            Mirroring::Vertical
        } else {
            Mirroring::Horizontal
        };
        let battery_backed = (flags6 & 0x02) != 0;
        let has_trainer = (flags6 & 0x04) != 0;
        let mapper_id = (flags7 & 0xF0) | (flags6 >> 4);

        let prg_bank_count = bytes[4] as usize;
        let chr_bank_count = bytes[5] as usize;
        if prg_bank_count == 0 {
            return Err(LoadError::Format(
                "header declares no PRG ROM banks".to_string(),
            ));
        }

        let prg_offset = HEADER_SIZE + if has_trainer { TRAINER_SIZE } else { 0 };
        let chr_offset = prg_offset + prg_bank_count * PRG_BANK_SIZE;
        let end = chr_offset + chr_bank_count * CHR_BANK_SIZE;

        if bytes.len() < chr_offset {
            return Err(LoadError::Format(format!(
                "image truncated: expected {} PRG bytes but only {} remain",
                prg_bank_count * PRG_BANK_SIZE,
                bytes.len().saturating_sub(prg_offset)
            )));
        }
        if bytes.len() < end {
            return Err(LoadError::Format(format!(
                "image truncated: expected {} CHR bytes but only {} remain",
                chr_bank_count * CHR_BANK_SIZE,
                bytes.len() - chr_offset
            )));
        }

        Ok(Self {
            mapper_id,
            mirroring,
            battery_backed,
            has_trainer,
            raw: bytes,
            prg_offset,
            prg_bank_count,
            chr_offset,
            chr_bank_count,
            content_id: OnceLock::new(),
        })
    }

    /// Always at least one; `parse` rejects images without PRG ROM.
    pub fn prg_bank_count(&self) -> usize {
        self.prg_bank_count
    }

    pub fn chr_bank_count(&self) -> usize {
        self.chr_bank_count
    }

    pub fn prg_bank(&self, index: usize) -> &[u8] {
        let start = self.prg_offset + index * PRG_BANK_SIZE;
        &self.raw[start..start + PRG_BANK_SIZE]
    }

    pub fn chr_bank(&self, index: usize) -> &[u8] {
        let start = self.chr_offset + index * CHR_BANK_SIZE;
        &self.raw[start..start + CHR_BANK_SIZE]
    }

    pub fn chr_len(&self) -> usize {
        self.chr_bank_count * CHR_BANK_SIZE
    }

    pub fn raw(&self) -> &[u8] {
        &self.raw
    }

    /// Lowercase hex SHA-1 of the whole image, computed on first use.
    pub fn content_id(&self) -> &str {
        self.content_id.get_or_init(|| {
            Sha1::digest(&self.raw)
                .iter()
                .map(|byte| format!("{byte:02x}"))
                .collect()
        })
    }
}
