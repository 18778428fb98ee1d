use ndarray::{Array2, Zip};

use super::window::FrameWindow;
use super::WindowFill;

/// Largest boxcar depth; each unit of depth holds one frame in memory.
pub const MAX_MEAN_DEPTH: usize = 500;

#[derive(Debug, Clone)]
enum Averaging {
    /// Sliding window over the last `capacity` frames
    Boxcar(FrameWindow),
    /// Plain running average of every frame up to `target`; no history kept
    Cumulative { seen: usize, target: usize },
}

/// Per-pixel running mean.
///
/// The display path uses a sliding boxcar over the last `depth` frames.
/// Mask collection uses the cumulative form, which stores no history and is
/// full once `depth` frames have been accumulated.
#[derive(Debug, Clone)]
pub struct MeanFilter {
    averaging: Averaging,
    sum: Array2<f64>,
}

impl MeanFilter {
    /// Sliding mean over the last `depth` frames.
    ///
    /// # Panics
    /// Panics if `depth` is zero.
    pub fn new(shape: (usize, usize), depth: usize) -> Self {
        Self {
            averaging: Averaging::Boxcar(FrameWindow::new(depth)),
            sum: Array2::zeros(shape),
        }
    }

    /// Cumulative mean of the first `depth` frames.
    ///
    /// # Panics
    /// Panics if `depth` is zero.
    pub fn cumulative(shape: (usize, usize), depth: usize) -> Self {
        assert!(depth > 0, "mean depth must be at least 1 frame");
        Self {
            averaging: Averaging::Cumulative {
                seen: 0,
                target: depth,
            },
            sum: Array2::zeros(shape),
        }
    }

    pub fn depth(&self) -> usize {
        match &self.averaging {
            Averaging::Boxcar(window) => window.capacity(),
            Averaging::Cumulative { target, .. } => *target,
        }
    }

    /// Change the averaging depth. History is discarded.
    ///
    /// # Panics
    /// Panics if `depth` is zero.
    pub fn set_depth(&mut self, depth: usize) {
        assert!(depth > 0, "mean depth must be at least 1 frame");
        match &mut self.averaging {
            Averaging::Boxcar(window) => {
                window.clear();
                window.resize(depth);
            }
            Averaging::Cumulative { seen, target } => {
                *seen = 0;
                *target = depth;
            }
        }
        self.sum.fill(0.0);
    }

    /// Frames currently contributing to the mean
    pub fn frames(&self) -> usize {
        match &self.averaging {
            Averaging::Boxcar(window) => window.len(),
            Averaging::Cumulative { seen, .. } => *seen,
        }
    }

    pub fn is_full(&self) -> bool {
        self.frames() >= self.depth()
    }

    pub fn fill(&self) -> WindowFill {
        if self.is_full() {
            WindowFill::Full {
                size: self.frames(),
            }
        } else {
            WindowFill::Filling {
                seen: self.frames(),
                target: self.depth(),
            }
        }
    }

    pub fn accumulate(&mut self, input: &Array2<f32>) {
        match &mut self.averaging {
            Averaging::Boxcar(window) => {
                if let Some(oldest) = window.oldest_if_full() {
                    Zip::from(&mut self.sum)
                        .and(oldest)
                        .for_each(|s, &x| *s -= x as f64);
                }
                if window.insert(input) {
                    // rebuild on rollover so rounding never accumulates
                    self.sum.fill(0.0);
                    for frame in window.iter() {
                        Zip::from(&mut self.sum)
                            .and(frame)
                            .for_each(|s, &x| *s += x as f64);
                    }
                    return;
                }
            }
            Averaging::Cumulative { seen, target } => {
                if *seen >= *target {
                    return;
                }
                *seen += 1;
            }
        }
        Zip::from(&mut self.sum)
            .and(input)
            .for_each(|s, &x| *s += x as f64);
    }

    /// Write the mean of the contributing frames into `output`.
    pub fn mean_into(&self, output: &mut Array2<f32>) {
        let n = self.frames();
        if n == 0 {
            output.fill(0.0);
            return;
        }
        let n = n as f64;
        Zip::from(output)
            .and(&self.sum)
            .for_each(|out, &s| *out = (s / n) as f32);
    }

    pub fn mean(&self) -> Array2<f32> {
        let mut out = Array2::zeros(self.sum.dim());
        self.mean_into(&mut out);
        out
    }

    pub fn apply(&mut self, input: &Array2<f32>, output: &mut Array2<f32>) {
        self.accumulate(input);
        self.mean_into(output);
    }

    pub fn reset(&mut self) {
        let depth = self.depth();
        self.set_depth(depth);
    }
}
