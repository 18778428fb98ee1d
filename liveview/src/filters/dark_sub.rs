//! Dark reference subtraction and mask collection.
//!
//! The dark reference ("mask") is an averaged image of frames taken with no
//! illumination. It is either collected live from the stream, loaded from a
//! mask file, or absent, in which case frames pass through unchanged.
//!
//! Mask files hold `width × height` `f32` samples in host byte order with no
//! header.

use ndarray::{Array2, Zip};
use std::fs;
use std::io::Write;
use std::path::Path;
use thiserror::Error;
use tracing::{debug, info};

use super::mean::MeanFilter;

#[derive(Error, Debug)]
pub enum MaskError {
    #[error("mask collection stopped after {collected} of {required} frames")]
    InsufficientFrames { collected: u64, required: u64 },
    #[error("mask collection is not active")]
    NotCollecting,
    #[error("mask averaging requires at least one frame")]
    ZeroFrames,
    #[error("mask holds {actual} samples, frame geometry needs {expected}")]
    SizeMismatch { expected: usize, actual: usize },
    #[error("mask file I/O: {0}")]
    Io(#[from] std::io::Error),
}

/// Averages incoming frames until the requested count is reached.
#[derive(Debug, Clone)]
struct MaskCollector {
    average: MeanFilter,
    required: u64,
}

impl MaskCollector {
    fn collected(&self) -> u64 {
        self.average.frames() as u64
    }
}

#[derive(Debug, Clone)]
pub struct DarkSubtractFilter {
    shape: (usize, usize),
    reference: Option<Array2<f32>>,
    collector: Option<MaskCollector>,
}

impl DarkSubtractFilter {
    pub fn new(shape: (usize, usize)) -> Self {
        Self {
            shape,
            reference: None,
            collector: None,
        }
    }

    pub fn has_reference(&self) -> bool {
        self.reference.is_some()
    }

    pub fn reference(&self) -> Option<&Array2<f32>> {
        self.reference.as_ref()
    }

    pub fn set_reference(&mut self, reference: Array2<f32>) -> Result<(), MaskError> {
        if reference.dim() != self.shape {
            return Err(MaskError::SizeMismatch {
                expected: self.shape.0 * self.shape.1,
                actual: reference.len(),
            });
        }
        self.reference = Some(reference);
        Ok(())
    }

    pub fn clear_reference(&mut self) {
        self.reference = None;
    }

    /// Replace the reference with the contents of a mask file.
    ///
    /// On failure the existing reference is kept.
    pub fn load_mask(&mut self, path: &Path) -> Result<(), MaskError> {
        let mask = read_mask(path, self.shape)?;
        info!("Loaded dark mask from {}", path.display());
        self.reference = Some(mask);
        Ok(())
    }

    pub fn is_collecting(&self) -> bool {
        self.collector.is_some()
    }

    /// (collected, required) while a collection is in progress
    pub fn collection_progress(&self) -> Option<(u64, u64)> {
        self.collector
            .as_ref()
            .map(|c| (c.collected(), c.required))
    }

    /// Start averaging the next `avg_frames` frames into a new mask.
    ///
    /// Restarting discards any collection already in progress.
    pub fn start_collecting(&mut self, avg_frames: u64) -> Result<(), MaskError> {
        if avg_frames == 0 {
            return Err(MaskError::ZeroFrames);
        }
        let depth = usize::try_from(avg_frames).map_err(|_| MaskError::ZeroFrames)?;
        debug!("Collecting dark mask over {} frames", avg_frames);
        self.collector = Some(MaskCollector {
            average: MeanFilter::cumulative(self.shape, depth),
            required: avg_frames,
        });
        Ok(())
    }

    /// Abandon collection before it completed.
    ///
    /// The partial average is discarded and the existing reference kept.
    pub fn stop_collecting(&mut self) -> Result<(), MaskError> {
        let collector = self.collector.take().ok_or(MaskError::NotCollecting)?;
        Err(MaskError::InsufficientFrames {
            collected: collector.collected(),
            required: collector.required,
        })
    }

    /// Subtract the reference from `input` and feed any active collection.
    ///
    /// # Returns
    /// The finished mask if this frame completed a collection; it is already
    /// installed as the reference for subsequent frames.
    pub fn apply(&mut self, input: &Array2<f32>, output: &mut Array2<f32>) -> Option<Array2<f32>> {
        match &self.reference {
            Some(reference) => Zip::from(&mut *output)
                .and(input)
                .and(reference)
                .for_each(|out, &x, &dark| *out = x - dark),
            None => output.assign(input),
        }

        let collector = self.collector.as_mut()?;
        collector.average.accumulate(input);
        if !collector.average.is_full() {
            return None;
        }

        let mask = collector.average.mean();
        info!("Dark mask complete after {} frames", collector.required);
        self.collector = None;
        self.reference = Some(mask.clone());
        Some(mask)
    }
}

/// Read a mask file of the given shape.
pub fn read_mask(path: &Path, shape: (usize, usize)) -> Result<Array2<f32>, MaskError> {
    let bytes = fs::read(path)?;
    let expected = shape.0 * shape.1;
    let sample_size = std::mem::size_of::<f32>();
    if bytes.len() != expected * sample_size {
        return Err(MaskError::SizeMismatch {
            expected,
            actual: bytes.len() / sample_size,
        });
    }
    let samples: Vec<f32> = bytemuck::pod_collect_to_vec(&bytes);
    Array2::from_shape_vec(shape, samples).map_err(|_| MaskError::SizeMismatch {
        expected,
        actual: bytes.len() / sample_size,
    })
}

/// Write a mask in the format [`read_mask`] expects.
pub fn write_mask(path: &Path, mask: &Array2<f32>) -> Result<(), MaskError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let samples: Vec<f32> = mask.iter().copied().collect();
    let mut file = fs::File::create(path)?;
    file.write_all(bytemuck::cast_slice(&samples))?;
    file.sync_all()?;
    Ok(())
}
