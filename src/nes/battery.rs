use anyhow::{Context, Result};
use log::{debug, warn};
use std::{
    collections::HashMap,
    fs, io,
    path::{Path, PathBuf},
    sync::{
        Mutex, PoisonError,
        atomic::{AtomicUsize, Ordering},
        mpsc::{self, Sender},
    },
    thread::{self, JoinHandle},
};

use super::devices::BatteryStore;
use crate::config::BusConfig;

pub const BATTERY_RAM_SIZE: usize = 0x2000;

/// Cartridge work RAM at $6000-$7FFF with debounced write-back.
#[derive(Debug, Clone)]
pub struct BatteryRam {
    key: String,
    data: Vec<u8>,
    debounce_frames: u32,
    countdown: u32,
}

impl BatteryRam {
    pub fn new(key: impl Into<String>, debounce_frames: u32) -> Self {
        Self {
            key: key.into(),
            data: vec![0; BATTERY_RAM_SIZE],
            debounce_frames: debounce_frames.max(1),
            countdown: 0,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn is_dirty(&self) -> bool {
        self.countdown > 0
    }

    /// Copies saved bytes in. Short or oversized saves are copied as far as
    /// they go.
    pub fn hydrate(&mut self, saved: &[u8]) {
        if saved.len() != BATTERY_RAM_SIZE {
            warn!(
                "battery save {} is {} bytes, expected {BATTERY_RAM_SIZE}",
                self.key,
                saved.len()
            );
        }
        let len = saved.len().min(BATTERY_RAM_SIZE);
        self.data[..len].copy_from_slice(&saved[..len]);
    }

    pub fn read(&self, addr: u16) -> u8 {
        self.data[addr as usize & (BATTERY_RAM_SIZE - 1)]
    }

    pub fn write(&mut self, addr: u16, value: u8) {
        self.data[addr as usize & (BATTERY_RAM_SIZE - 1)] = value;
        self.countdown = self.debounce_frames;
    }

    /// Advances the debounce by one frame and returns the snapshot to flush
    /// when the countdown runs out.
    pub fn tick_frame(&mut self) -> Option<Vec<u8>> {
        if self.countdown == 0 {
            return None;
        }
        self.countdown -= 1;
        (self.countdown == 0).then(|| self.data.clone())
    }
}

/// Keeps saves in memory; useful for headless runs and tests.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, Vec<u8>>>,
    flushes: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entry(self, key: impl Into<String>, data: Vec<u8>) -> Self {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.into(), data);
        self
    }

    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    pub fn flush_count(&self) -> usize {
        self.flushes.load(Ordering::Relaxed)
    }
}

impl BatteryStore for MemoryStore {
    fn load(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.get(key))
    }

    fn store(&self, key: &str, data: Vec<u8>) {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_string(), data);
        self.flushes.fetch_add(1, Ordering::Relaxed);
    }
}

struct SaveJob {
    path: PathBuf,
    data: Vec<u8>,
}

/// Writes `<content id>.sav` files under a directory from a background thread.
pub struct FileStore {
    dir: PathBuf,
    sender: Option<Sender<SaveJob>>,
    worker: Option<JoinHandle<()>>,
}

impl FileStore {
    pub fn open(dir: &Path) -> Result<Self> {
        fs::create_dir_all(dir)
            .with_context(|| format!("failed to create save directory: {}", dir.display()))?;
        let (sender, receiver) = mpsc::channel::<SaveJob>();
        let worker = thread::Builder::new()
            .name("battery-writer".to_string())
            .spawn(move || {
                for job in receiver {
                    match write_atomically(&job.path, &job.data) {
                        Ok(()) => debug!("wrote {} ({} bytes)", job.path.display(), job.data.len()),
                        Err(err) => warn!("failed to write {}: {err:#}", job.path.display()),
                    }
                }
            })
            .context("failed to spawn battery writer thread")?;

        Ok(Self {
            dir: dir.to_path_buf(),
            sender: Some(sender),
            worker: Some(worker),
        })
    }

    pub fn from_config(config: &BusConfig) -> Result<Self> {
        Self::open(&config.save_dir)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn save_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.sav"))
    }
}

fn write_atomically(path: &Path, data: &[u8]) -> Result<()> {
    let tmp = path.with_extension("sav.tmp");
    fs::write(&tmp, data).with_context(|| format!("failed to write {}", tmp.display()))?;
    fs::rename(&tmp, path).with_context(|| format!("failed to replace {}", path.display()))?;
    Ok(())
}

impl BatteryStore for FileStore {
    fn load(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let path = self.save_path(key);
        match fs::read(&path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => {
                Err(err).with_context(|| format!("failed to read save: {}", path.display()))
            }
        }
    }

    fn store(&self, key: &str, data: Vec<u8>) {
        let job = SaveJob {
            path: self.save_path(key),
            data,
        };
        let Some(sender) = self.sender.as_ref() else {
            return;
        };
        if sender.send(job).is_err() {
            warn!("battery writer has stopped, dropping save for {key}");
        }
    }
}

impl Drop for FileStore {
    fn drop(&mut self) {
        // Closing the channel lets the worker drain queued saves and exit.
        self.sender.take();
        if let Some(worker) = self.worker.take()
            && worker.join().is_err()
        {
            warn!("battery writer thread panicked");
        }
    }
}
