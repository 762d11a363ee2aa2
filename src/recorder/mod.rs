//! # Trace Recorder
//!
//! Rotating JSONL record of inbound and outbound wire traffic.
//!
//! This module handles:
//! - Opening a per-device trace file named from the serial and start time
//! - Appending `TX` / `RX` / `META` entries under one write lock
//! - Size-based rotation keeping three generations
//! - Listing and deleting a device's recordings
//!
//! ## File layout
//!
//! ```text
//! yarbo_<serial tail>_<YYYYmmdd_HHMMSS>.jsonl     active
//! yarbo_<serial tail>_<YYYYmmdd_HHMMSS>.1.jsonl   previous
//! yarbo_<serial tail>_<YYYYmmdd_HHMMSS>.2.jsonl   oldest
//! ```
//!
//! Recording never fails the caller: any I/O error while appending or
//! rotating turns recording off and is logged. Async callers go through a
//! [`TraceTap`], which queues entries for a blocking writer task.

pub mod entry;
pub mod tap;

pub use entry::{Direction, TraceEntry, TracePayload};
pub use tap::TraceTap;

use chrono::Utc;
use serde_json::{json, Value};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::Result;

/// Default maximum size of the active file (10 MiB)
pub const DEFAULT_MAX_SIZE_BYTES: u64 = 10 * 1024 * 1024;

/// Number of serial characters kept in file names
const SERIAL_TAIL_LEN: usize = 8;

const FILE_PREFIX: &str = "yarbo";
const FILE_EXTENSION: &str = "jsonl";

#[derive(Debug)]
pub struct TraceRecorder {
    dir: PathBuf,
    device_id: String,
    max_size_bytes: u64,
    /// Mirrors `state.file.is_some()`; readable without the file lock
    enabled: AtomicBool,
    state: Mutex<RecorderState>,
}

#[derive(Debug, Default)]
struct RecorderState {
    file: Option<File>,
    path: Option<PathBuf>,
    /// Size of the active file
    current_size: u64,
    /// Bytes written since `start()`, across rotations
    bytes_written: u64,
}

impl TraceRecorder {
    pub fn new(dir: impl Into<PathBuf>, device_id: impl Into<String>, max_size_bytes: u64) -> Self {
        Self {
            dir: dir.into(),
            device_id: device_id.into(),
            max_size_bytes,
            enabled: AtomicBool::new(false),
            state: Mutex::new(RecorderState::default()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    /// Active trace file, if recording
    pub fn recording_path(&self) -> Option<PathBuf> {
        let state = self.lock();
        state.file.as_ref().and(state.path.clone())
    }

    /// Start recording and return the active file.
    ///
    /// Creates the directory if needed. Calling `start` while already
    /// recording returns the current file.
    ///
    /// # Errors
    ///
    /// Returns `Io` if the directory or file cannot be created.
    pub fn start(&self) -> Result<PathBuf> {
        let mut state = self.lock();
        if let (Some(_), Some(path)) = (&state.file, &state.path) {
            return Ok(path.clone());
        }

        fs::create_dir_all(&self.dir)?;
        let path = self.dir.join(format!(
            "{}.{}",
            self.base_name(&Utc::now().format("%Y%m%d_%H%M%S").to_string()),
            FILE_EXTENSION
        ));
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        let existing = file.metadata().map(|m| m.len()).unwrap_or(0);

        state.file = Some(file);
        state.path = Some(path.clone());
        state.current_size = existing;
        state.bytes_written = 0;
        self.enabled.store(true, Ordering::Release);

        let marker = json!({
            "serial": self.device_id,
            "max_size_bytes": self.max_size_bytes,
            "started_at": Utc::now(),
        });
        self.append_locked(&mut state, Direction::Meta, "recording_start", marker, None);

        info!("Trace recording started: {}", path.display());
        Ok(path)
    }

    /// Write the stop marker and close the file. No-op when not recording.
    pub fn stop(&self) {
        let mut state = self.lock();
        if state.file.is_none() {
            return;
        }

        let marker = json!({
            "stopped_at": Utc::now(),
            "bytes_written": state.bytes_written,
        });
        self.append_locked(&mut state, Direction::Meta, "recording_stop", marker, None);

        if let Some(mut file) = state.file.take() {
            if let Err(e) = file.flush() {
                warn!("Failed to flush trace file: {}", e);
            }
        }
        self.enabled.store(false, Ordering::Release);
        info!("Trace recording stopped ({} bytes)", state.bytes_written);
    }

    /// Append one entry; no-op when not recording.
    ///
    /// Performs blocking file I/O. From async code use [`TraceTap`].
    pub fn record(&self, dir: Direction, topic: &str, payload: TracePayload, raw_len: Option<u64>) {
        let mut state = self.lock();
        if state.file.is_none() {
            return;
        }
        let raw_len = raw_len.or_else(|| payload.raw_len());
        self.append_locked(&mut state, dir, topic, payload.into_value(), raw_len);
    }

    /// This device's trace files, most recent first.
    ///
    /// Within one recording the active file comes before `.1` and `.2`.
    pub fn list_recordings(&self) -> Result<Vec<PathBuf>> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let prefix = format!("{}_{}_", FILE_PREFIX, self.serial_tail());
        let mut found = Vec::new();
        for entry in entries {
            let path = entry?.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if !name.starts_with(&prefix) {
                continue;
            }
            if let Some((base, generation)) = split_generation(name) {
                found.push((base.to_string(), generation, path));
            }
        }

        found.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.cmp(&b.1)));
        Ok(found.into_iter().map(|(_, _, path)| path).collect())
    }

    /// Stop recording and delete every trace file for this device.
    ///
    /// Returns the number of files removed.
    pub fn cleanup(&self) -> Result<usize> {
        self.stop();
        let recordings = self.list_recordings()?;
        for path in &recordings {
            fs::remove_file(path)?;
        }
        info!("Removed {} trace files", recordings.len());
        Ok(recordings.len())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, RecorderState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn serial_tail(&self) -> String {
        let chars: Vec<char> = self
            .device_id
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
            .collect();
        let start = chars.len().saturating_sub(SERIAL_TAIL_LEN);
        chars[start..].iter().collect()
    }

    fn base_name(&self, stamp: &str) -> String {
        format!("{}_{}_{}", FILE_PREFIX, self.serial_tail(), stamp)
    }

    fn append_locked(
        &self,
        state: &mut RecorderState,
        dir: Direction,
        topic: &str,
        payload: Value,
        raw_len: Option<u64>,
    ) {
        let entry = TraceEntry {
            ts: Utc::now(),
            dir,
            topic: topic.to_string(),
            payload,
            raw_len,
        };
        let line = match entry.to_line() {
            Ok(line) => line,
            Err(e) => {
                debug!("Dropping unserializable trace entry on {}: {}", topic, e);
                return;
            }
        };

        if state.current_size >= self.max_size_bytes {
            if let Err(e) = self.rotate(state) {
                warn!("Trace rotation failed, recording disabled: {}", e);
                self.disable(state);
                return;
            }
        }

        let Some(file) = state.file.as_mut() else {
            return;
        };
        if let Err(e) = file.write_all(&line) {
            warn!("Trace write failed, recording disabled: {}", e);
            self.disable(state);
            return;
        }
        state.current_size += line.len() as u64;
        state.bytes_written += line.len() as u64;
    }

    fn disable(&self, state: &mut RecorderState) {
        state.file = None;
        self.enabled.store(false, Ordering::Release);
    }

    /// Shift `base -> .1 -> .2` and reopen an empty active file.
    fn rotate(&self, state: &mut RecorderState) -> io::Result<()> {
        let Some(path) = state.path.clone() else {
            return Ok(());
        };
        if let Some(mut file) = state.file.take() {
            file.flush()?;
        }

        let first = generation_path(&path, 1);
        let second = generation_path(&path, 2);
        remove_if_exists(&second)?;
        if first.exists() {
            fs::rename(&first, &second)?;
        }
        fs::rename(&path, &first)?;

        let file = OpenOptions::new().create(true).write(true).truncate(true).open(&path)?;
        state.file = Some(file);
        state.current_size = 0;
        info!("Trace rotated: {}", first.display());
        Ok(())
    }
}

impl Drop for TraceRecorder {
    fn drop(&mut self) {
        if let Ok(state) = self.state.get_mut() {
            if let Some(file) = state.file.as_mut() {
                let _ = file.flush();
            }
        }
    }
}

/// `<dir>/<base>.jsonl` -> `<dir>/<base>.<n>.jsonl`
fn generation_path(active: &Path, generation: u8) -> PathBuf {
    active.with_extension(format!("{}.{}", generation, FILE_EXTENSION))
}

/// Split a file name into recording base and generation (0 = active).
fn split_generation(name: &str) -> Option<(&str, u8)> {
    let stem = name.strip_suffix(".jsonl")?;
    match stem.rsplit_once('.') {
        Some((base, "1")) => Some((base, 1)),
        Some((base, "2")) => Some((base, 2)),
        Some(_) => None,
        None => Some((stem, 0)),
    }
}

fn remove_if_exists(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}
