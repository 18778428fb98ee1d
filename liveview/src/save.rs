//! Background saving of processed frame sequences.
//!
//! Requests queue on an unbounded channel and are serviced one at a time by a
//! worker thread. Each request reads the frame stream in order from the
//! [`FrameBuffer`], starting with the first frame produced after the request
//! is picked up, averages every `n_avgs` consecutive dark-subtracted frames
//! and writes `n_frames` averaged frames as little-endian `f32`
//! band-sequential data with an ENVI header next to it.
//!
//! Data goes to `<path>.part` first and is renamed to `<path>` only once
//! every frame is on disk.

use crossbeam_channel::{unbounded, Receiver, Sender};
use ndarray::{Array2, Zip};
use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::error::PipelineError;
use crate::events::{EventSink, PipelineEvent};
use crate::frame::FrameGeometry;
use crate::frame_buffer::{FrameBuffer, FrameCursor, OrderedFrame, ReadError};

/// How long the worker waits on the buffer before re-checking it.
const READ_POLL: Duration = Duration::from_millis(200);

#[derive(Error, Debug)]
pub enum SaveError {
    #[error("invalid save request: {0}")]
    InvalidRequest(String),
    #[error("save interrupted after {written} of {requested} frames")]
    Interrupted { written: u64, requested: u64 },
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("save worker has shut down")]
    Shutdown,
}

fn io_error(path: &Path) -> impl FnOnce(io::Error) -> SaveError + '_ {
    move |source| SaveError::Io {
        path: path.to_path_buf(),
        source,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaveRequest {
    pub path: PathBuf,
    /// Output frames to write
    pub n_frames: u64,
    /// Input frames averaged into each output frame
    pub n_avgs: u64,
}

impl SaveRequest {
    pub fn new(path: impl Into<PathBuf>, n_frames: u64, n_avgs: u64) -> Self {
        Self {
            path: path.into(),
            n_frames,
            n_avgs,
        }
    }

    pub fn validate(&self) -> Result<(), SaveError> {
        if self.n_frames == 0 {
            return Err(SaveError::InvalidRequest(
                "frame count must be at least 1".to_string(),
            ));
        }
        if self.n_avgs == 0 {
            return Err(SaveError::InvalidRequest(
                "averaging count must be at least 1".to_string(),
            ));
        }
        if self.path.as_os_str().is_empty() {
            return Err(SaveError::InvalidRequest("empty output path".to_string()));
        }
        Ok(())
    }

    /// Input frames consumed from the stream
    pub fn frames_needed(&self) -> u64 {
        self.n_frames.saturating_mul(self.n_avgs)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SaveState {
    Idle,
    Draining(SaveRequest),
}

/// Outcome of a completed save
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SaveReport {
    pub frames_written: u64,
    /// Frames the buffer overwrote before the worker reached them
    pub dropped_frames: u64,
}

/// Path of the in-progress data file for `path`
pub fn part_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".part");
    PathBuf::from(name)
}

/// Path of the ENVI header for `path`
pub fn header_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".hdr");
    PathBuf::from(name)
}

pub struct SaveCoordinator {
    sender: Option<Sender<SaveRequest>>,
    state: Arc<Mutex<SaveState>>,
    outstanding: Arc<AtomicUsize>,
    events: EventSink,
    worker: Option<JoinHandle<()>>,
}

impl SaveCoordinator {
    /// Start the save worker reading from `buffer`.
    pub fn spawn(buffer: Arc<FrameBuffer>, events: EventSink) -> Result<Self, PipelineError> {
        let (sender, receiver) = unbounded::<SaveRequest>();
        let state = Arc::new(Mutex::new(SaveState::Idle));
        let outstanding = Arc::new(AtomicUsize::new(0));

        let worker = {
            let state = state.clone();
            let outstanding = outstanding.clone();
            let events = events.clone();
            std::thread::Builder::new()
                .name("lv-save".to_string())
                .spawn(move || run_worker(receiver, buffer, state, outstanding, events))
                .map_err(|source| PipelineError::Spawn {
                    name: "save",
                    source,
                })?
        };

        Ok(Self {
            sender: Some(sender),
            state,
            outstanding,
            events,
            worker: Some(worker),
        })
    }

    /// Queue a request behind any already waiting.
    ///
    /// Invalid requests are rejected here and reported as `SaveFailed`
    /// without disturbing the queue.
    pub fn submit(&self, request: SaveRequest) -> Result<(), SaveError> {
        if let Err(e) = request.validate() {
            warn!("Rejecting save to {}: {}", request.path.display(), e);
            self.events.publish(PipelineEvent::SaveFailed {
                path: request.path,
                error: e.to_string(),
            });
            return Err(e);
        }

        let sender = self.sender.as_ref().ok_or(SaveError::Shutdown)?;
        self.outstanding.fetch_add(1, Ordering::SeqCst);
        if sender.send(request).is_err() {
            self.outstanding.fetch_sub(1, Ordering::SeqCst);
            return Err(SaveError::Shutdown);
        }
        Ok(())
    }

    pub fn state(&self) -> SaveState {
        lock_state(&self.state).clone()
    }

    /// Requests queued or in progress
    pub fn outstanding(&self) -> usize {
        self.outstanding.load(Ordering::SeqCst)
    }

    /// Stop accepting requests and wait for the worker to finish.
    ///
    /// The caller closes the frame buffer first so a request in progress
    /// fails promptly instead of waiting for frames that will never come.
    pub fn shutdown(&mut self) {
        self.sender = None;
        if let Some(worker) = self.worker.take() {
            if let Err(e) = worker.join() {
                warn!("Save worker panicked: {:?}", e);
            }
        }
    }
}

impl Drop for SaveCoordinator {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn lock_state(state: &Mutex<SaveState>) -> std::sync::MutexGuard<'_, SaveState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn run_worker(
    receiver: Receiver<SaveRequest>,
    buffer: Arc<FrameBuffer>,
    state: Arc<Mutex<SaveState>>,
    outstanding: Arc<AtomicUsize>,
    events: EventSink,
) {
    debug!("Save worker started");
    while let Ok(request) = receiver.recv() {
        *lock_state(&state) = SaveState::Draining(request.clone());
        info!(
            "Saving {} frames (averaging {}) to {}",
            request.n_frames,
            request.n_avgs,
            request.path.display()
        );
        events.publish(PipelineEvent::SaveStarted {
            path: request.path.clone(),
            n_frames: request.n_frames,
            n_avgs: request.n_avgs,
        });

        let finished = match save_sequence(&buffer, &request) {
            Ok(report) => {
                info!(
                    "Saved {} frames to {} ({} dropped)",
                    report.frames_written,
                    request.path.display(),
                    report.dropped_frames
                );
                PipelineEvent::SaveCompleted {
                    path: request.path.clone(),
                    frames_written: report.frames_written,
                    dropped_frames: report.dropped_frames,
                }
            }
            Err(e) => {
                warn!("Save to {} failed: {}", request.path.display(), e);
                PipelineEvent::SaveFailed {
                    path: request.path.clone(),
                    error: e.to_string(),
                }
            }
        };

        // Observers reacting to the completion event must already see it settled.
        *lock_state(&state) = SaveState::Idle;
        outstanding.fetch_sub(1, Ordering::SeqCst);
        events.publish(finished);
    }
    debug!("Save worker shutting down");
}

/// Service one request against `buffer`, leaving nothing at the target path
/// unless it succeeds.
pub fn save_sequence(buffer: &FrameBuffer, request: &SaveRequest) -> Result<SaveReport, SaveError> {
    request.validate()?;
    let part = part_path(&request.path);
    let header = header_path(&request.path);

    let result = write_part(buffer, request, &part).and_then(|report| {
        write_envi_header(&header, buffer.geometry(), report.frames_written)?;
        fs::rename(&part, &request.path).map_err(io_error(&request.path))?;
        Ok(report)
    });

    if result.is_err() {
        let _ = fs::remove_file(&part);
        let _ = fs::remove_file(&header);
    }
    result
}

fn write_part(
    buffer: &FrameBuffer,
    request: &SaveRequest,
    part: &Path,
) -> Result<SaveReport, SaveError> {
    // The cursor is taken before any filesystem work so the sequence starts
    // with the first frame produced after the request was picked up.
    let mut cursor = buffer.cursor_from_now();

    if let Some(parent) = part.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(io_error(parent))?;
    }
    let file = File::create(part).map_err(io_error(part))?;
    let mut writer = BufWriter::new(file);

    let geometry = buffer.geometry();
    let mut sum = Array2::<f64>::zeros(geometry.shape());
    let mut samples: Vec<u32> = Vec::with_capacity(geometry.pixel_count());
    let mut report = SaveReport {
        frames_written: 0,
        dropped_frames: 0,
    };

    for _ in 0..request.n_frames {
        sum.fill(0.0);
        for _ in 0..request.n_avgs {
            let read = next_frame(buffer, &mut cursor).map_err(|_| SaveError::Interrupted {
                written: report.frames_written,
                requested: request.n_frames,
            })?;
            report.dropped_frames += read.dropped;
            Zip::from(&mut sum)
                .and(&read.frame.dark_subtracted)
                .for_each(|s, &x| *s += x as f64);
        }

        let n = request.n_avgs as f64;
        samples.clear();
        samples.extend(sum.iter().map(|&s| ((s / n) as f32).to_bits().to_le()));
        writer
            .write_all(bytemuck::cast_slice(&samples))
            .map_err(io_error(part))?;
        report.frames_written += 1;
    }

    let file = writer
        .into_inner()
        .map_err(|e| io_error(part)(e.into_error()))?;
    file.sync_all().map_err(io_error(part))?;
    Ok(report)
}

fn next_frame(buffer: &FrameBuffer, cursor: &mut FrameCursor) -> Result<OrderedFrame, ReadError> {
    loop {
        match buffer.read_next(cursor, READ_POLL) {
            Err(ReadError::Timeout) => continue,
            other => return other,
        }
    }
}

/// Write an ENVI header describing `bands` frames of `geometry` as
/// little-endian float32 band-sequential data.
pub fn write_envi_header(path: &Path, geometry: FrameGeometry, bands: u64) -> Result<(), SaveError> {
    let contents = format!(
        "ENVI\n\
         description = {{LiveView frame sequence}}\n\
         samples = {}\n\
         lines = {}\n\
         bands = {}\n\
         header offset = 0\n\
         file type = ENVI Standard\n\
         data type = 4\n\
         interleave = bsq\n\
         byte order = 0\n",
        geometry.width, geometry.height, bands
    );
    fs::write(path, contents).map_err(io_error(path))
}
