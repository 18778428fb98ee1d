//! Notifications published by the pipeline.
//!
//! Everything the acquisition loop, the save worker and the controller want
//! an observer to know about travels over one channel as a [`PipelineEvent`].

use crossbeam_channel::{Receiver, Sender, TrySendError};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{trace, warn};

use crate::frame::{CameraType, FrameGeometry};

/// How an error affects acquisition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// One frame was skipped; acquisition continues
    Transient,
    /// Acquisition has stopped
    Fatal,
    /// A user request (mask load, directory reset, setting) was rejected
    Request,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PipelineEvent {
    Started {
        camera: CameraType,
        geometry: FrameGeometry,
    },
    /// The acquisition loop has exited
    Finished,
    FpsUpdated(f32),
    Error {
        severity: Severity,
        message: String,
    },
    SaveStarted {
        path: PathBuf,
        n_frames: u64,
        n_avgs: u64,
    },
    SaveCompleted {
        path: PathBuf,
        frames_written: u64,
        dropped_frames: u64,
    },
    SaveFailed {
        path: PathBuf,
        error: String,
    },
    MaskCollected {
        frames: u64,
        path: Option<PathBuf>,
    },
    MaskFailed {
        error: String,
    },
    CrosshairChanged {
        x: f64,
        y: f64,
    },
}

/// Events held for observers before the oldest are discarded.
pub const EVENT_CAPACITY: usize = 1024;

/// Cloneable publishing half of the event channel.
///
/// Publishing never blocks and never fails. The channel is bounded; when it
/// is full the oldest queued event is discarded to make room, so a slow or
/// absent observer costs at most [`EVENT_CAPACITY`] events of memory.
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: Sender<PipelineEvent>,
    // Held to evict the oldest event when the channel is full.
    overflow: Receiver<PipelineEvent>,
    dropped: Arc<AtomicU64>,
}

impl EventSink {
    pub fn new() -> (Self, Receiver<PipelineEvent>) {
        Self::with_capacity(EVENT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> (Self, Receiver<PipelineEvent>) {
        let (tx, rx) = crossbeam_channel::bounded(capacity.max(1));
        let sink = Self {
            tx,
            overflow: rx.clone(),
            dropped: Arc::new(AtomicU64::new(0)),
        };
        (sink, rx)
    }

    pub fn publish(&self, event: PipelineEvent) {
        trace!("event: {:?}", event);
        let mut event = event;
        loop {
            match self.tx.try_send(event) {
                Ok(()) | Err(TrySendError::Disconnected(_)) => return,
                Err(TrySendError::Full(returned)) => {
                    event = returned;
                    if self.overflow.try_recv().is_ok() {
                        let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                        if dropped == 1 || dropped % EVENT_CAPACITY as u64 == 0 {
                            warn!("Event queue full, {} events dropped so far", dropped);
                        }
                    }
                }
            }
        }
    }

    pub fn error(&self, severity: Severity, message: impl Into<String>) {
        self.publish(PipelineEvent::Error {
            severity,
            message: message.into(),
        });
    }

    /// Number of events discarded because nobody drained the channel.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}
