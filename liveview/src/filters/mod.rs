//! The per-frame filter chain.
//!
//! Filters run in a fixed order on every accepted raw frame:
//! two's-complement correction, dark subtraction, standard deviation, mean.
//! Both statistical filters consume the dark-subtracted frame.

pub mod dark_sub;
pub mod mean;
pub mod std_dev;
pub mod twos_complement;
pub mod window;

pub use dark_sub::{DarkSubtractFilter, MaskError};
pub use mean::{MeanFilter, MAX_MEAN_DEPTH};
pub use std_dev::{StdDevFilter, WindowFill, MAX_STD_DEV_N};
pub use twos_complement::TwosComplementFilter;

use ndarray::Array2;

use crate::error::{PipelineError, PipelineResult};
use crate::frame::{FrameGeometry, ProcessedFrame, RawFrame};

/// Owns every filter and its accumulator state.
///
/// Only the acquisition thread touches a chain; consumers see its output
/// through copies in the frame buffer.
#[derive(Debug, Clone)]
pub struct FilterChain {
    geometry: FrameGeometry,
    pub twos: TwosComplementFilter,
    pub dark: DarkSubtractFilter,
    pub std_dev: StdDevFilter,
    pub mean: MeanFilter,
}

impl FilterChain {
    /// # Panics
    /// Panics if `std_dev_n` or `mean_depth` is zero.
    pub fn new(geometry: FrameGeometry, std_dev_n: usize, mean_depth: usize, remap: bool) -> Self {
        let shape = geometry.shape();
        Self {
            geometry,
            twos: TwosComplementFilter::new(remap),
            dark: DarkSubtractFilter::new(shape),
            std_dev: StdDevFilter::new(shape, std_dev_n),
            mean: MeanFilter::new(shape, mean_depth),
        }
    }

    pub fn geometry(&self) -> FrameGeometry {
        self.geometry
    }

    /// Run one frame through every filter, writing into `out`.
    ///
    /// `out` must have been allocated for this chain's geometry.
    ///
    /// # Returns
    /// A completed dark mask if this frame finished a mask collection.
    ///
    /// # Errors
    /// [`PipelineError::GeometryMismatch`] if the raw frame has the wrong
    /// dimensions; no filter state is touched in that case.
    pub fn apply(
        &mut self,
        raw: &RawFrame,
        out: &mut ProcessedFrame,
    ) -> PipelineResult<Option<Array2<f32>>> {
        if !self.geometry.matches(&raw.data) {
            return Err(PipelineError::geometry_mismatch(
                self.geometry,
                raw.data.dim(),
            ));
        }
        if out.dim() != self.geometry.shape() {
            return Err(PipelineError::geometry_mismatch(self.geometry, out.dim()));
        }

        self.twos.apply(&raw.data, &mut out.raw);
        let completed_mask = self.dark.apply(&out.raw, &mut out.dark_subtracted);
        out.std_dev_fill = self.std_dev.apply(&out.dark_subtracted, &mut out.std_dev);
        self.mean.apply(&out.dark_subtracted, &mut out.mean);
        out.sequence = raw.sequence;

        Ok(completed_mask)
    }

    /// Allocating form of [`apply`](Self::apply).
    pub fn process(&mut self, raw: &RawFrame) -> PipelineResult<ProcessedFrame> {
        let mut out = ProcessedFrame::zeros(self.geometry);
        self.apply(raw, &mut out)?;
        Ok(out)
    }

    /// Drop all accumulated statistics. The dark reference is kept.
    pub fn reset_statistics(&mut self) {
        self.std_dev.reset();
        self.mean.reset();
    }
}
