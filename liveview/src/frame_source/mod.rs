//! Frame source abstraction.
//!
//! The pipeline only ever talks to a [`FrameSource`]; concrete backends are
//! selected once at startup from the configured [`CameraType`].

pub mod mock;
pub mod playback;
pub mod simulated;

use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::frame::{CameraType, FrameGeometry, RawFrame};

/// Errors reported by frame sources.
#[derive(Error, Debug)]
pub enum SourceError {
    /// No frame arrived within the configured timeout
    #[error("no frame within {0:?}")]
    Timeout(Duration),
    /// A single frame could not be read
    #[error("frame read failed: {0}")]
    Read(String),
    /// The source is misconfigured and cannot deliver frames
    #[error("source configuration error: {0}")]
    Config(String),
    /// The operation is not available on this backend
    #[error("unsupported by {backend}: {operation}")]
    Unsupported {
        backend: String,
        operation: &'static str,
    },
    /// `next_frame` called before `open` or after `close`
    #[error("source is not open")]
    NotOpen,
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl SourceError {
    /// Transient errors skip one frame; everything else stops acquisition.
    pub fn is_transient(&self) -> bool {
        matches!(self, SourceError::Timeout(_) | SourceError::Read(_))
    }
}

pub type SourceResult<T> = Result<T, SourceError>;

/// Parameters handed to [`FrameSource::open`].
#[derive(Debug, Clone)]
pub struct SourceConfig {
    pub camera: CameraType,
    pub geometry: FrameGeometry,
    /// Target interval between frames for paced sources
    pub frame_period: Duration,
    /// How long `next_frame` may wait before reporting a timeout
    pub timeout: Duration,
    /// Directory of raw frame files for the playback backend
    pub directory: Option<PathBuf>,
}

impl SourceConfig {
    pub fn new(camera: CameraType, geometry: FrameGeometry) -> Self {
        Self {
            camera,
            geometry,
            frame_period: Duration::from_millis(10),
            timeout: Duration::from_millis(100),
            directory: None,
        }
    }
}

/// Contract every camera backend satisfies.
///
/// A source is opened once, polled from the acquisition thread with
/// [`next_frame`](FrameSource::next_frame) and closed when acquisition stops.
pub trait FrameSource: Send {
    /// Human-readable backend name
    fn name(&self) -> &str;

    /// Prepare the source for streaming.
    ///
    /// # Returns
    /// The geometry the source will deliver frames in.
    fn open(&mut self, config: &SourceConfig) -> SourceResult<FrameGeometry>;

    /// Block until the next frame is available.
    ///
    /// Returns [`SourceError::Timeout`] if nothing arrived within the
    /// configured timeout; the caller is expected to try again.
    fn next_frame(&mut self) -> SourceResult<RawFrame>;

    /// Release the source. Calling `close` twice is harmless.
    fn close(&mut self) -> SourceResult<()>;

    /// Point the source at a different directory of frame files.
    fn reset_dir(&mut self, _dir: &Path) -> SourceResult<()> {
        Err(SourceError::Unsupported {
            backend: self.name().to_string(),
            operation: "reset_dir",
        })
    }
}

/// Construct the backend for a camera type.
///
/// # Returns
/// * `Ok(source)` for backends implemented in this crate
/// * `Err(SourceError::Unsupported)` for hardware this crate has no driver for
pub fn backend_for(camera: CameraType) -> SourceResult<Box<dyn FrameSource>> {
    match camera {
        CameraType::Simulated => Ok(Box::new(simulated::SimulatedSource::default())),
        CameraType::Playback => Ok(Box::new(playback::PlaybackSource::new())),
        CameraType::FrameGrabber | CameraType::Accelerated => Err(SourceError::Unsupported {
            backend: camera.to_string(),
            operation: "open",
        }),
    }
}

/// Sleep until `deadline`, then advance it by `period`.
///
/// If the deadline has already passed by more than one period the schedule
/// is re-anchored on `now` so a stalled consumer does not cause a burst.
pub(crate) fn pace(deadline: &mut std::time::Instant, period: Duration) {
    let now = std::time::Instant::now();
    if *deadline > now {
        std::thread::sleep(*deadline - now);
        *deadline += period;
    } else if now - *deadline > period {
        *deadline = now + period;
    } else {
        *deadline += period;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(SourceError::Timeout(Duration::from_millis(5)).is_transient());
        assert!(SourceError::Read("crc".to_string()).is_transient());
        assert!(!SourceError::NotOpen.is_transient());
        assert!(!SourceError::Config("bad".to_string()).is_transient());
    }

    #[test]
    fn test_backend_for_unsupported_hardware() {
        assert!(matches!(
            backend_for(CameraType::FrameGrabber),
            Err(SourceError::Unsupported { .. })
        ));
        assert!(matches!(
            backend_for(CameraType::Accelerated),
            Err(SourceError::Unsupported { .. })
        ));
    }

    #[test]
    fn test_backend_for_software_sources() {
        assert_eq!(backend_for(CameraType::Simulated).unwrap().name(), "simulated");
        assert_eq!(backend_for(CameraType::Playback).unwrap().name(), "playback");
    }

    #[test]
    fn test_default_reset_dir_is_unsupported() {
        let mut source: Box<dyn FrameSource> =
            Box::new(simulated::SimulatedSource::default());
        let err = source.reset_dir(Path::new("/tmp")).unwrap_err();
        assert!(matches!(err, SourceError::Unsupported { operation: "reset_dir", .. }));
    }
}
