//! Live camera frame acquisition and processing.
//!
//! A single acquisition thread pulls raw frames from a [`FrameSource`],
//! runs them through the filter chain (two's-complement correction, dark
//! subtraction, standard deviation, mean) and publishes the results into a
//! bounded [`FrameBuffer`]. Displays read snapshots and derived statistics
//! through the [`PipelineController`]; frame sequences are saved to disk by a
//! background worker.

pub mod config;
pub mod error;
pub mod events;
pub mod filters;
pub mod fps;
pub mod frame;
pub mod frame_buffer;
pub mod frame_source;
pub mod pipeline;
pub mod save;
pub mod stats;

pub use config::{ConfigError, PipelineConfig};
pub use error::{PipelineError, PipelineResult};
pub use events::{EventSink, PipelineEvent, Severity};
pub use frame::{CameraType, FrameGeometry, PlotMode, ProcessedFrame, RawFrame};
pub use frame_buffer::FrameBuffer;
pub use frame_source::{FrameSource, SourceConfig, SourceError};
pub use pipeline::PipelineController;
pub use save::{SaveError, SaveRequest};
