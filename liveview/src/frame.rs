//! Frame geometry and the raw / processed frame types that flow through the pipeline.

use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use crate::filters::WindowFill;

/// Frame dimensions for a camera type.
///
/// `height` counts every row the source delivers; only the first
/// `data_height` rows carry pixel data; any rows after that are telemetry
/// and are excluded from the spectral and spatial reductions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FrameGeometry {
    /// Columns per frame (spatial axis)
    pub width: usize,
    /// Rows per frame (spectral axis), telemetry rows included
    pub height: usize,
    /// Rows holding pixel data
    pub data_height: usize,
}

impl FrameGeometry {
    /// Create a geometry whose every row is data.
    pub fn new(width: usize, height: usize) -> Self {
        Self {
            width,
            height,
            data_height: height,
        }
    }

    /// Create a geometry with trailing telemetry rows.
    pub fn with_data_height(width: usize, height: usize, data_height: usize) -> Self {
        Self {
            width,
            height,
            data_height,
        }
    }

    /// Total number of samples per frame
    pub fn pixel_count(&self) -> usize {
        self.width * self.height
    }

    /// ndarray shape `(rows, cols)`
    pub fn shape(&self) -> (usize, usize) {
        (self.height, self.width)
    }

    /// Check that the geometry is usable for processing.
    pub fn is_valid(&self) -> bool {
        self.width > 0 && self.height > 0 && self.data_height > 0 && self.data_height <= self.height
    }

    /// Check if a point lies within the data region
    pub fn contains(&self, x: usize, y: usize) -> bool {
        x < self.width && y < self.data_height
    }

    /// Center of the data region as (x, y)
    pub fn center(&self) -> (f64, f64) {
        (self.width as f64 / 2.0, self.data_height as f64 / 2.0)
    }

    /// True when `frame` has exactly this geometry's shape.
    pub fn matches<T>(&self, frame: &Array2<T>) -> bool {
        frame.dim() == self.shape()
    }
}

impl fmt::Display for FrameGeometry {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{}x{} ({} data rows)",
            self.width, self.height, self.data_height
        )
    }
}

/// Camera backends known to the pipeline.
///
/// Geometry is fixed per camera type at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CameraType {
    /// Synthetic frames generated in-process
    Simulated,
    /// Raw frame files replayed from a directory
    Playback,
    /// Camera Link frame grabber
    FrameGrabber,
    /// GPU-accelerated acquisition
    Accelerated,
}

impl CameraType {
    /// Default frame geometry for this camera type
    pub fn default_geometry(&self) -> FrameGeometry {
        match self {
            CameraType::Simulated => FrameGeometry::new(640, 480),
            CameraType::Playback => FrameGeometry::new(1280, 480),
            CameraType::FrameGrabber => FrameGeometry::with_data_height(640, 481, 480),
            CameraType::Accelerated => FrameGeometry::new(1280, 328),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            CameraType::Simulated => "simulated",
            CameraType::Playback => "playback",
            CameraType::FrameGrabber => "frame_grabber",
            CameraType::Accelerated => "accelerated",
        }
    }
}

impl fmt::Display for CameraType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Unprocessed sample grid as delivered by a frame source.
#[derive(Debug, Clone)]
pub struct RawFrame {
    /// Monotonically increasing sequence number assigned by the source
    pub sequence: u64,
    /// Capture time relative to when the source was opened
    pub timestamp: Duration,
    /// Samples, shape `(height, width)`
    pub data: Array2<u16>,
}

impl RawFrame {
    pub fn new(sequence: u64, timestamp: Duration, data: Array2<u16>) -> Self {
        Self {
            sequence,
            timestamp,
            data,
        }
    }

    pub fn width(&self) -> usize {
        self.data.ncols()
    }

    pub fn height(&self) -> usize {
        self.data.nrows()
    }
}

/// Result of one full filter-chain pass over a raw frame.
///
/// Every grid has the configured geometry. Instances living in the frame
/// buffer are pre-allocated and overwritten in place.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessedFrame {
    /// Sequence number of the raw frame this was computed from
    pub sequence: u64,
    /// Raw frame after two's-complement correction
    pub raw: Array2<f32>,
    /// Corrected frame minus the dark reference; the processed frame proper
    pub dark_subtracted: Array2<f32>,
    /// Standard deviation over the std-dev window
    pub std_dev: Array2<f32>,
    /// Running mean over the mean window
    pub mean: Array2<f32>,
    /// Fill state of the std-dev window when this frame was produced
    pub std_dev_fill: WindowFill,
}

impl ProcessedFrame {
    /// Allocate a zeroed frame for the given geometry.
    pub fn zeros(geometry: FrameGeometry) -> Self {
        let shape = geometry.shape();
        Self {
            sequence: 0,
            raw: Array2::zeros(shape),
            dark_subtracted: Array2::zeros(shape),
            std_dev: Array2::zeros(shape),
            mean: Array2::zeros(shape),
            std_dev_fill: WindowFill::Filling { seen: 0, target: 0 },
        }
    }

    /// Copy `other` into this frame, reusing the existing allocations.
    ///
    /// # Panics
    /// Panics if the two frames have different shapes.
    pub fn copy_from(&mut self, other: &ProcessedFrame) {
        self.sequence = other.sequence;
        self.raw.assign(&other.raw);
        self.dark_subtracted.assign(&other.dark_subtracted);
        self.std_dev.assign(&other.std_dev);
        self.mean.assign(&other.mean);
        self.std_dev_fill = other.std_dev_fill;
    }

    pub fn dim(&self) -> (usize, usize) {
        self.dark_subtracted.dim()
    }
}

/// Selects the region the spectral and spatial profiles are reduced over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlotMode {
    /// Average over the whole data region
    #[default]
    AllPixels,
    /// Take the column and row through the crosshair
    Crosshair,
}

impl PlotMode {
    pub(crate) fn to_u8(self) -> u8 {
        match self {
            PlotMode::AllPixels => 0,
            PlotMode::Crosshair => 1,
        }
    }

    pub(crate) fn from_u8(value: u8) -> Self {
        match value {
            1 => PlotMode::Crosshair,
            _ => PlotMode::AllPixels,
        }
    }
}
