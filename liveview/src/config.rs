//! Pipeline configuration.
//!
//! Settings load from a JSON file; every field has a default so a partial
//! file (or none at all) is valid. Geometry comes from the camera type unless
//! overridden.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::filters::{MAX_MEAN_DEPTH, MAX_STD_DEV_N};
use crate::frame::{CameraType, FrameGeometry, PlotMode};
use crate::frame_source::SourceConfig;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("{field} = {value} is out of range ({range})")]
    OutOfRange {
        field: &'static str,
        value: u64,
        range: String,
    },
    #[error("invalid frame geometry {0}")]
    Geometry(FrameGeometry),
}

fn default_std_dev_n() -> usize {
    100
}

fn default_mean_depth() -> usize {
    5
}

fn default_buffer_depth() -> usize {
    64
}

fn default_histogram_bins() -> usize {
    1024
}

fn default_fps_report_interval() -> u64 {
    10
}

fn default_frame_period_ms() -> u64 {
    10
}

fn default_timeout_ms() -> u64 {
    100
}

fn default_mask_avg_frames() -> u64 {
    100
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PipelineConfig {
    #[serde(default = "default_camera")]
    pub camera: CameraType,
    /// Replaces the camera type's default geometry
    #[serde(default)]
    pub geometry: Option<FrameGeometry>,
    /// Standard deviation window, 1..=MAX_STD_DEV_N frames
    #[serde(default = "default_std_dev_n")]
    pub std_dev_n: usize,
    /// Boxcar depth of the mean frame, 1..=MAX_MEAN_DEPTH frames
    #[serde(default = "default_mean_depth")]
    pub mean_depth: usize,
    /// Processed frames held for consumers
    #[serde(default = "default_buffer_depth")]
    pub buffer_depth: usize,
    #[serde(default = "default_histogram_bins")]
    pub histogram_bins: usize,
    /// Frames between `FpsUpdated` events
    #[serde(default = "default_fps_report_interval")]
    pub fps_report_interval: u64,
    #[serde(default = "default_frame_period_ms")]
    pub frame_period_ms: u64,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Apply the two's-complement remap to raw samples
    #[serde(default)]
    pub pix_remap: bool,
    #[serde(default)]
    pub plot_mode: PlotMode,
    /// Directory of raw frame files for the playback source
    #[serde(default)]
    pub playback_dir: Option<PathBuf>,
    /// Where collected masks are written; loaded at startup if present
    #[serde(default)]
    pub mask_file: Option<PathBuf>,
    #[serde(default = "default_mask_avg_frames")]
    pub mask_avg_frames: u64,
}

fn default_camera() -> CameraType {
    CameraType::Simulated
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self::for_camera(default_camera())
    }
}

impl PipelineConfig {
    pub fn for_camera(camera: CameraType) -> Self {
        Self {
            camera,
            geometry: None,
            std_dev_n: default_std_dev_n(),
            mean_depth: default_mean_depth(),
            buffer_depth: default_buffer_depth(),
            histogram_bins: default_histogram_bins(),
            fps_report_interval: default_fps_report_interval(),
            frame_period_ms: default_frame_period_ms(),
            timeout_ms: default_timeout_ms(),
            pix_remap: false,
            plot_mode: PlotMode::default(),
            playback_dir: None,
            mask_file: None,
            mask_avg_frames: default_mask_avg_frames(),
        }
    }

    /// Load a configuration from a JSON file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let io_err = |source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        };
        let json = serde_json::to_string_pretty(self).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        std::fs::write(path, json).map_err(io_err)
    }

    /// Effective geometry: the override if set, else the camera default.
    pub fn geometry(&self) -> FrameGeometry {
        self.geometry
            .unwrap_or_else(|| self.camera.default_geometry())
    }

    pub fn frame_period(&self) -> Duration {
        Duration::from_millis(self.frame_period_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn source_config(&self) -> SourceConfig {
        let mut config = SourceConfig::new(self.camera, self.geometry());
        config.frame_period = self.frame_period();
        config.timeout = self.timeout();
        config.directory = self.playback_dir.clone();
        config
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let geometry = self.geometry();
        if !geometry.is_valid() {
            return Err(ConfigError::Geometry(geometry));
        }
        check_range("std_dev_n", self.std_dev_n as u64, 1, MAX_STD_DEV_N as u64)?;
        check_range("mean_depth", self.mean_depth as u64, 1, MAX_MEAN_DEPTH as u64)?;
        check_range("buffer_depth", self.buffer_depth as u64, 1, u32::MAX as u64)?;
        check_range("histogram_bins", self.histogram_bins as u64, 1, u32::MAX as u64)?;
        check_range("fps_report_interval", self.fps_report_interval, 1, u64::MAX)?;
        check_range("mask_avg_frames", self.mask_avg_frames, 1, u64::MAX)?;
        Ok(())
    }
}

fn check_range(field: &'static str, value: u64, min: u64, max: u64) -> Result<(), ConfigError> {
    if value < min || value > max {
        return Err(ConfigError::OutOfRange {
            field,
            value,
            range: format!("{min}..={max}"),
        });
    }
    Ok(())
}
