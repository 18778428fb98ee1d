use thiserror::Error;

use crate::config::ConfigError;
use crate::frame::{CameraType, FrameGeometry};
use crate::frame_source::SourceError;

/// Structural errors that prevent the pipeline from running.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("frame is {actual_width}x{actual_height}, configured geometry is {expected}")]
    GeometryMismatch {
        expected: FrameGeometry,
        actual_width: usize,
        actual_height: usize,
    },
    #[error("invalid frame geometry {0}")]
    InvalidGeometry(FrameGeometry),
    #[error("no backend available for camera type {0}")]
    UnsupportedBackend(CameraType),
    #[error("invalid setting: {0}")]
    InvalidSetting(String),
    #[error("acquisition is not running")]
    NotRunning,
    #[error("frame source: {0}")]
    Source(#[from] SourceError),
    #[error("configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("failed to spawn {name} thread: {source}")]
    Spawn {
        name: &'static str,
        source: std::io::Error,
    },
}

impl PipelineError {
    pub(crate) fn geometry_mismatch(expected: FrameGeometry, shape: (usize, usize)) -> Self {
        PipelineError::GeometryMismatch {
            expected,
            actual_width: shape.1,
            actual_height: shape.0,
        }
    }
}

pub type PipelineResult<T> = Result<T, PipelineError>;
