//! Derived products computed on demand from processed-frame snapshots.
//!
//! Axis convention: rows are spectral bands and columns are spatial
//! positions. A spectral profile therefore has one value per data row and a
//! spatial profile one value per column. Rows beyond the geometry's
//! `data_height` are telemetry and never contribute.

use ndarray::{Array1, Array2, ArrayView2, Axis, Zip};
use rustfft::num_complex::Complex32;
use rustfft::FftPlanner;
use std::sync::Mutex;

use crate::frame::{FrameGeometry, PlotMode};

/// Elementwise mean / std-dev, defined as 0 wherever std-dev is 0.
pub fn snr_frame(mean: &Array2<f32>, std_dev: &Array2<f32>) -> Array2<f32> {
    let mut snr = Array2::zeros(mean.dim());
    Zip::from(&mut snr)
        .and(mean)
        .and(std_dev)
        .for_each(|out, &m, &s| {
            *out = if s > 0.0 && s.is_finite() { m / s } else { 0.0 };
        });
    snr
}

/// Equal-width histogram over the observed range of a frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Histogram {
    pub counts: Vec<u32>,
    /// Lower edge of bin 0
    pub min: f32,
    /// Upper edge of the last bin
    pub max: f32,
}

impl Histogram {
    pub fn bin_width(&self) -> f32 {
        if self.counts.is_empty() {
            0.0
        } else {
            (self.max - self.min) / self.counts.len() as f32
        }
    }

    /// Lower edge of every bin
    pub fn bin_edges(&self) -> Vec<f32> {
        let width = self.bin_width();
        (0..self.counts.len())
            .map(|i| self.min + width * i as f32)
            .collect()
    }

    pub fn total(&self) -> u64 {
        self.counts.iter().map(|&c| c as u64).sum()
    }
}

/// Count the finite samples of `frame` into `bins` equal-width bins spanning
/// `[min, max]`. The maximum lands in the last bin; a constant frame puts
/// every sample in bin 0.
pub fn histogram(frame: ArrayView2<f32>, bins: usize) -> Histogram {
    let mut counts = vec![0u32; bins];
    let (min, max) = frame
        .iter()
        .filter(|v| v.is_finite())
        .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| {
            (lo.min(v), hi.max(v))
        });

    if bins == 0 || min > max {
        return Histogram {
            counts,
            min: 0.0,
            max: 0.0,
        };
    }

    let span = max - min;
    let last = bins - 1;
    for &v in frame.iter().filter(|v| v.is_finite()) {
        let bin = if span > 0.0 {
            (((v - min) / span * bins as f32) as usize).min(last)
        } else {
            0
        };
        counts[bin] += 1;
    }

    Histogram { counts, min, max }
}

/// Spectral profile: one value per data row.
///
/// `AllPixels` averages each row across all columns; `Crosshair` takes the
/// column through the crosshair.
pub fn spectral_mean(
    frame: &Array2<f32>,
    geometry: FrameGeometry,
    mode: PlotMode,
    crosshair: (usize, usize),
) -> Array1<f32> {
    let data = data_rows(frame, geometry);
    match mode {
        PlotMode::AllPixels => data
            .mean_axis(Axis(1))
            .unwrap_or_else(|| Array1::zeros(data.nrows())),
        PlotMode::Crosshair => {
            let col = crosshair.0.min(data.ncols().saturating_sub(1));
            data.column(col).to_owned()
        }
    }
}

/// Spatial profile: one value per column.
///
/// `AllPixels` averages each column across the data rows; `Crosshair` takes
/// the row through the crosshair.
pub fn spatial_mean(
    frame: &Array2<f32>,
    geometry: FrameGeometry,
    mode: PlotMode,
    crosshair: (usize, usize),
) -> Array1<f32> {
    let data = data_rows(frame, geometry);
    match mode {
        PlotMode::AllPixels => data
            .mean_axis(Axis(0))
            .unwrap_or_else(|| Array1::zeros(data.ncols())),
        PlotMode::Crosshair => {
            let row = crosshair.1.min(data.nrows().saturating_sub(1));
            data.row(row).to_owned()
        }
    }
}

fn data_rows(frame: &Array2<f32>, geometry: FrameGeometry) -> ArrayView2<'_, f32> {
    let rows = geometry.data_height.min(frame.nrows());
    frame.slice(ndarray::s![..rows, ..])
}

/// Computes FFTs, caching plans between queries.
///
/// Safe to share between consumer threads.
pub struct StatisticsEngine {
    planner: Mutex<FftPlanner<f32>>,
    histogram_bins: usize,
}

impl StatisticsEngine {
    pub fn new(histogram_bins: usize) -> Self {
        Self {
            planner: Mutex::new(FftPlanner::new()),
            histogram_bins,
        }
    }

    pub fn histogram_bins(&self) -> usize {
        self.histogram_bins
    }

    /// Histogram of the data rows of `frame` with the configured bin count.
    pub fn histogram(&self, frame: &Array2<f32>, geometry: FrameGeometry) -> Histogram {
        histogram(data_rows(frame, geometry), self.histogram_bins)
    }

    /// Magnitude of the 2-D DFT of `frame`, unshifted (DC at `[0, 0]`).
    pub fn fft_magnitude(&self, frame: &Array2<f32>) -> Array2<f32> {
        let (rows, cols) = frame.dim();
        if rows == 0 || cols == 0 {
            return Array2::zeros((rows, cols));
        }

        let mut data: Array2<Complex32> = frame.mapv(|v| Complex32::new(v, 0.0));
        let (row_fft, col_fft) = {
            let mut planner = self
                .planner
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            (planner.plan_fft_forward(cols), planner.plan_fft_forward(rows))
        };

        for mut row in data.rows_mut() {
            match row.as_slice_mut() {
                Some(slice) => row_fft.process(slice),
                None => {
                    let mut buf = row.to_vec();
                    row_fft.process(&mut buf);
                    row.assign(&Array1::from(buf));
                }
            }
        }

        let mut column = vec![Complex32::new(0.0, 0.0); rows];
        for mut col in data.columns_mut() {
            for (dst, src) in column.iter_mut().zip(col.iter()) {
                *dst = *src;
            }
            col_fft.process(&mut column);
            for (dst, src) in col.iter_mut().zip(column.iter()) {
                *dst = *src;
            }
        }

        data.mapv(|c| c.norm())
    }
}
