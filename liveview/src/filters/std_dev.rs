use ndarray::{Array2, Zip};
use tracing::debug;

use super::window::FrameWindow;

/// Largest supported std-dev window.
pub const MAX_STD_DEV_N: usize = 500;

/// How much of a sliding window has been populated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowFill {
    /// Fewer than `target` frames seen; statistics cover the `seen` frames
    Filling { seen: usize, target: usize },
    /// Statistics cover exactly `size` frames
    Full { size: usize },
}

impl WindowFill {
    pub fn is_full(&self) -> bool {
        matches!(self, WindowFill::Full { .. })
    }

    /// Number of frames the statistic was computed from
    pub fn frames(&self) -> usize {
        match *self {
            WindowFill::Filling { seen, .. } => seen,
            WindowFill::Full { size } => size,
        }
    }
}

/// Per-pixel standard deviation over the last N frames.
///
/// Keeps running sums of x and x² in `f64`. Every rollover the sums are
/// rebuilt from the stored history so rounding error cannot accumulate over
/// an unbounded stream. A requested window size waits for the next rollover.
#[derive(Debug, Clone)]
pub struct StdDevFilter {
    window: FrameWindow,
    sum: Array2<f64>,
    sum_sq: Array2<f64>,
    pending: Option<usize>,
}

impl StdDevFilter {
    /// # Panics
    /// Panics if `n` is zero.
    pub fn new(shape: (usize, usize), n: usize) -> Self {
        Self {
            window: FrameWindow::new(n),
            sum: Array2::zeros(shape),
            sum_sq: Array2::zeros(shape),
            pending: None,
        }
    }

    /// Window size currently in effect
    pub fn window_size(&self) -> usize {
        self.window.capacity()
    }

    /// Requested window size not yet applied
    pub fn pending_window_size(&self) -> Option<usize> {
        self.pending
    }

    /// Request a new window size.
    ///
    /// Applied immediately while no history exists, otherwise at the next
    /// rollover.
    ///
    /// # Panics
    /// Panics if `n` is zero.
    pub fn set_window_size(&mut self, n: usize) {
        assert!(n > 0, "std-dev window must be at least 1 frame");
        if self.window.is_empty() {
            self.window.resize(n);
            self.pending = None;
        } else if n == self.window.capacity() {
            self.pending = None;
        } else {
            self.pending = Some(n);
        }
    }

    pub fn fill(&self) -> WindowFill {
        if self.window.is_full() {
            WindowFill::Full {
                size: self.window.len(),
            }
        } else {
            WindowFill::Filling {
                seen: self.window.len(),
                target: self.window.capacity(),
            }
        }
    }

    /// Roll `input` into the window.
    pub fn accumulate(&mut self, input: &Array2<f32>) -> WindowFill {
        if let Some(oldest) = self.window.oldest_if_full() {
            Zip::from(&mut self.sum)
                .and(&mut self.sum_sq)
                .and(oldest)
                .for_each(|s, sq, &x| {
                    let x = x as f64;
                    *s -= x;
                    *sq -= x * x;
                });
        }

        let rolled_over = self.window.insert(input);
        Zip::from(&mut self.sum)
            .and(&mut self.sum_sq)
            .and(input)
            .for_each(|s, sq, &x| {
                let x = x as f64;
                *s += x;
                *sq += x * x;
            });

        if rolled_over {
            if let Some(n) = self.pending.take() {
                debug!("std-dev window {} -> {}", self.window.capacity(), n);
                self.window.resize(n);
            }
            self.rebuild_sums();
        }

        self.fill()
    }

    /// Write the standard deviation of the current window into `output`.
    pub fn std_dev_into(&self, output: &mut Array2<f32>) {
        let n = self.window.len();
        if n == 0 {
            output.fill(0.0);
            return;
        }
        let n = n as f64;
        Zip::from(output)
            .and(&self.sum)
            .and(&self.sum_sq)
            .for_each(|out, &s, &sq| {
                let mean = s / n;
                let variance = (sq / n - mean * mean).max(0.0);
                *out = variance.sqrt() as f32;
            });
    }

    /// Accumulate and compute in one step.
    pub fn apply(&mut self, input: &Array2<f32>, output: &mut Array2<f32>) -> WindowFill {
        let fill = self.accumulate(input);
        self.std_dev_into(output);
        fill
    }

    pub fn reset(&mut self) {
        self.window.clear();
        self.sum.fill(0.0);
        self.sum_sq.fill(0.0);
        if let Some(n) = self.pending.take() {
            self.window.resize(n);
        }
    }

    fn rebuild_sums(&mut self) {
        self.sum.fill(0.0);
        self.sum_sq.fill(0.0);
        for frame in self.window.iter() {
            Zip::from(&mut self.sum)
                .and(&mut self.sum_sq)
                .and(frame)
                .for_each(|s, sq, &x| {
                    let x = x as f64;
                    *s += x;
                    *sq += x * x;
                });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn frame(value: f32) -> Array2<f32> {
        Array2::from_elem((2, 3), value)
    }

    fn run(filter: &mut StdDevFilter, value: f32) -> (WindowFill, f32) {
        let mut out = Array2::zeros((2, 3));
        let fill = filter.apply(&frame(value), &mut out);
        (fill, out[[1, 2]])
    }

    #[test]
    fn test_constant_stream_converges_to_zero() {
        let mut filter = StdDevFilter::new((2, 3), 4);
        for _ in 0..10 {
            run(&mut filter, 1234.0);
        }
        let (fill, std) = run(&mut filter, 1234.0);
        assert_eq!(fill, WindowFill::Full { size: 4 });
        assert_eq!(std, 0.0);
    }

    #[test]
    fn test_filling_uses_frames_seen() {
        let mut filter = StdDevFilter::new((2, 3), 10);
        let (fill, std) = run(&mut filter, 2.0);
        assert_eq!(fill, WindowFill::Filling { seen: 1, target: 10 });
        assert_eq!(std, 0.0);

        let (fill, std) = run(&mut filter, 4.0);
        assert_eq!(fill, WindowFill::Filling { seen: 2, target: 10 });
        assert_relative_eq!(std, 1.0, epsilon = 1e-6);
    }

    #[test]
    fn test_sliding_window_forgets_old_frames() {
        let mut filter = StdDevFilter::new((2, 3), 3);
        for v in [100.0, -100.0, 5.0, 5.0, 5.0] {
            run(&mut filter, v);
        }
        let mut out = Array2::zeros((2, 3));
        filter.std_dev_into(&mut out);
        assert_eq!(out[[0, 0]], 0.0);
    }

    #[test]
    fn test_known_population_std_dev() {
        let mut filter = StdDevFilter::new((2, 3), 8);
        let mut last = 0.0;
        for v in [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0] {
            last = run(&mut filter, v).1;
        }
        assert_relative_eq!(last, 2.0, epsilon = 1e-6);
    }

    #[test]
    fn test_resize_waits_for_rollover() {
        let mut filter = StdDevFilter::new((2, 3), 4);
        run(&mut filter, 1.0);
        filter.set_window_size(2);
        assert_eq!(filter.window_size(), 4);
        assert_eq!(filter.pending_window_size(), Some(2));

        run(&mut filter, 1.0);
        run(&mut filter, 1.0);
        assert_eq!(filter.window_size(), 4);

        // fourth frame wraps the cursor
        let (fill, _) = run(&mut filter, 1.0);
        assert_eq!(filter.window_size(), 2);
        assert_eq!(filter.pending_window_size(), None);
        assert_eq!(fill, WindowFill::Full { size: 2 });
    }

    #[test]
    fn test_shrink_keeps_newest_history() {
        let mut filter = StdDevFilter::new((2, 3), 4);
        for v in [100.0, 200.0, 3.0] {
            run(&mut filter, v);
        }
        filter.set_window_size(2);
        let (_, std) = run(&mut filter, 5.0);
        // window now holds [3, 5]
        assert_relative_eq!(std, 1.0, epsilon = 1e-6);
    }

    #[test]
    fn test_resize_on_empty_window_is_immediate() {
        let mut filter = StdDevFilter::new((2, 3), 4);
        filter.set_window_size(7);
        assert_eq!(filter.window_size(), 7);
        assert_eq!(filter.pending_window_size(), None);
    }

    #[test]
    fn test_grow_returns_to_filling() {
        let mut filter = StdDevFilter::new((2, 3), 2);
        run(&mut filter, 1.0);
        filter.set_window_size(3);
        let (fill, _) = run(&mut filter, 1.0);
        assert_eq!(fill, WindowFill::Filling { seen: 2, target: 3 });
        let (fill, _) = run(&mut filter, 1.0);
        assert_eq!(fill, WindowFill::Full { size: 3 });
    }

    #[test]
    fn test_reset_clears_history() {
        let mut filter = StdDevFilter::new((2, 3), 2);
        run(&mut filter, 1.0);
        run(&mut filter, 9.0);
        filter.reset();
        assert_eq!(filter.fill(), WindowFill::Filling { seen: 0, target: 2 });
        let mut out = Array2::from_elem((2, 3), 5.0);
        filter.std_dev_into(&mut out);
        assert!(out.iter().all(|&v| v == 0.0));
    }
}
