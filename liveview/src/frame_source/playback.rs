//! Directory playback source.
//!
//! Replays `*.raw` files (little-endian `u16`, one or more whole frames per
//! file) from a directory in name order, looping forever. The directory can
//! be swapped while streaming with [`FrameSource::reset_dir`].

use ndarray::Array2;
use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use super::{pace, FrameSource, SourceConfig, SourceError, SourceResult};
use crate::frame::{FrameGeometry, RawFrame};

const RAW_EXTENSION: &str = "raw";

pub struct PlaybackSource {
    geometry: Option<FrameGeometry>,
    directory: Option<PathBuf>,
    files: Vec<PathBuf>,
    next_file: usize,
    pending: VecDeque<Array2<u16>>,
    frame_period: Duration,
    opened_at: Instant,
    deadline: Instant,
    sequence: u64,
}

impl PlaybackSource {
    pub fn new() -> Self {
        let now = Instant::now();
        Self {
            geometry: None,
            directory: None,
            files: Vec::new(),
            next_file: 0,
            pending: VecDeque::new(),
            frame_period: Duration::ZERO,
            opened_at: now,
            deadline: now,
            sequence: 0,
        }
    }

    /// Directory currently being replayed
    pub fn directory(&self) -> Option<&Path> {
        self.directory.as_deref()
    }

    /// Number of frame files found in the directory
    pub fn file_count(&self) -> usize {
        self.files.len()
    }

    fn scan(dir: &Path) -> SourceResult<Vec<PathBuf>> {
        let mut files = Vec::new();
        for entry in fs::read_dir(dir)? {
            let path = entry?.path();
            if path.is_file() && path.extension().and_then(|s| s.to_str()) == Some(RAW_EXTENSION)
            {
                files.push(path);
            }
        }
        files.sort();

        if files.is_empty() {
            return Err(SourceError::Config(format!(
                "no .{RAW_EXTENSION} frame files in {}",
                dir.display()
            )));
        }
        Ok(files)
    }

    fn load_next_file(&mut self, geometry: FrameGeometry) -> SourceResult<()> {
        let path = self.files[self.next_file].clone();
        self.next_file = (self.next_file + 1) % self.files.len();

        let bytes = fs::read(&path)
            .map_err(|e| SourceError::Read(format!("{}: {e}", path.display())))?;
        let frames = decode_frames(&bytes, geometry)
            .map_err(|msg| SourceError::Read(format!("{}: {msg}", path.display())))?;
        debug!("Loaded {} frames from {}", frames.len(), path.display());
        self.pending.extend(frames);
        Ok(())
    }
}

impl Default for PlaybackSource {
    fn default() -> Self {
        Self::new()
    }
}

/// Split a buffer of little-endian `u16` samples into frames.
pub fn decode_frames(bytes: &[u8], geometry: FrameGeometry) -> Result<Vec<Array2<u16>>, String> {
    let frame_bytes = geometry.pixel_count() * 2;
    if frame_bytes == 0 {
        return Err("zero-sized geometry".to_string());
    }
    if bytes.is_empty() || bytes.len() % frame_bytes != 0 {
        return Err(format!(
            "size {} is not a whole number of {}-byte frames",
            bytes.len(),
            frame_bytes
        ));
    }

    bytes
        .chunks_exact(frame_bytes)
        .map(|chunk| {
            let samples: Vec<u16> = chunk
                .chunks_exact(2)
                .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
                .collect();
            Array2::from_shape_vec(geometry.shape(), samples).map_err(|e| e.to_string())
        })
        .collect()
}

impl FrameSource for PlaybackSource {
    fn name(&self) -> &str {
        "playback"
    }

    fn open(&mut self, config: &SourceConfig) -> SourceResult<FrameGeometry> {
        let dir = config
            .directory
            .clone()
            .ok_or_else(|| SourceError::Config("playback requires a directory".to_string()))?;
        self.files = Self::scan(&dir)?;
        info!(
            "Playback source open: {} files in {}",
            self.files.len(),
            dir.display()
        );
        self.directory = Some(dir);
        self.next_file = 0;
        self.pending.clear();
        self.geometry = Some(config.geometry);
        self.frame_period = config.frame_period;
        self.opened_at = Instant::now();
        self.deadline = self.opened_at + config.frame_period;
        self.sequence = 0;
        Ok(config.geometry)
    }

    fn next_frame(&mut self) -> SourceResult<RawFrame> {
        let geometry = self.geometry.ok_or(SourceError::NotOpen)?;
        // Paced before loading so a bad file costs one period per attempt.
        pace(&mut self.deadline, self.frame_period);
        if self.pending.is_empty() {
            self.load_next_file(geometry)?;
        }

        let data = self
            .pending
            .pop_front()
            .ok_or_else(|| SourceError::Read("frame file was empty".to_string()))?;
        let frame = RawFrame::new(self.sequence, self.opened_at.elapsed(), data);
        self.sequence += 1;
        Ok(frame)
    }

    fn close(&mut self) -> SourceResult<()> {
        self.geometry = None;
        self.pending.clear();
        Ok(())
    }

    fn reset_dir(&mut self, dir: &Path) -> SourceResult<()> {
        let files = match Self::scan(dir) {
            Ok(files) => files,
            Err(e) => {
                warn!("Keeping {:?}: {e}", self.directory);
                return Err(e);
            }
        };
        info!("Playback directory reset to {} ({} files)", dir.display(), files.len());
        self.files = files;
        self.directory = Some(dir.to_path_buf());
        self.next_file = 0;
        self.pending.clear();
        Ok(())
    }
}
