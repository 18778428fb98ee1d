use std::sync::Mutex;
use std::time::Instant;

/// Number of frame timestamps the rate is computed over
pub const FPS_WINDOW: usize = 5;

#[derive(Debug)]
struct Samples {
    times: [f64; FPS_WINDOW],
    next: usize,
    count: usize,
}

/// Frame rate over the last [`FPS_WINDOW`] frame arrivals.
///
/// Timestamps go into a small circular buffer guarded by its own mutex, so
/// reading the rate never contends with frame data.
#[derive(Debug)]
pub struct FrameRateMeter {
    origin: Instant,
    samples: Mutex<Samples>,
}

impl FrameRateMeter {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            samples: Mutex::new(Samples {
                times: [0.0; FPS_WINDOW],
                next: 0,
                count: 0,
            }),
        }
    }

    /// Record a frame arrival.
    pub fn record(&self, at: Instant) {
        self.record_seconds(at.saturating_duration_since(self.origin).as_secs_f64());
    }

    /// Record a frame arrival given in seconds on any monotonic clock.
    pub fn record_seconds(&self, seconds: f64) {
        let mut samples = self.lock();
        let slot = samples.next;
        samples.times[slot] = seconds;
        samples.next = (slot + 1) % FPS_WINDOW;
        samples.count = (samples.count + 1).min(FPS_WINDOW);
    }

    /// Frames per second across the recorded window, 0 until two frames
    /// have arrived.
    pub fn fps(&self) -> f32 {
        let samples = self.lock();
        let n = samples.count;
        if n < 2 {
            return 0.0;
        }
        let newest = samples.times[(samples.next + FPS_WINDOW - 1) % FPS_WINDOW];
        let oldest = samples.times[(samples.next + FPS_WINDOW - n) % FPS_WINDOW];
        let span = newest - oldest;
        if span <= 0.0 {
            return 0.0;
        }
        ((n - 1) as f64 / span) as f32
    }

    pub fn reset(&self) {
        let mut samples = self.lock();
        samples.next = 0;
        samples.count = 0;
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Samples> {
        self.samples
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for FrameRateMeter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::time::Duration;

    #[test]
    fn test_needs_two_samples() {
        let meter = FrameRateMeter::new();
        assert_eq!(meter.fps(), 0.0);
        meter.record_seconds(1.0);
        assert_eq!(meter.fps(), 0.0);
    }

    #[test]
    fn test_steady_100ms_is_10_fps() {
        let meter = FrameRateMeter::new();
        for i in 0..12 {
            meter.record_seconds(i as f64 * 0.1);
        }
        assert_relative_eq!(meter.fps(), 10.0, epsilon = 1e-4);
    }

    #[test]
    fn test_partial_window() {
        let meter = FrameRateMeter::new();
        meter.record_seconds(0.0);
        meter.record_seconds(0.5);
        meter.record_seconds(1.0);
        assert_relative_eq!(meter.fps(), 2.0, epsilon = 1e-6);
    }

    #[test]
    fn test_rate_follows_latest_window() {
        let meter = FrameRateMeter::new();
        for i in 0..5 {
            meter.record_seconds(i as f64);
        }
        assert_relative_eq!(meter.fps(), 1.0, epsilon = 1e-6);
        // five fast frames push every slow sample out
        for i in 1..=5 {
            meter.record_seconds(4.0 + i as f64 * 0.05);
        }
        assert_relative_eq!(meter.fps(), 20.0, epsilon = 1e-3);
    }

    #[test]
    fn test_non_positive_span_is_zero() {
        let meter = FrameRateMeter::new();
        meter.record_seconds(3.0);
        meter.record_seconds(3.0);
        assert_eq!(meter.fps(), 0.0);
    }

    #[test]
    fn test_record_instant() {
        let meter = FrameRateMeter::new();
        let start = Instant::now();
        meter.record(start);
        meter.record(start + Duration::from_millis(250));
        assert_relative_eq!(meter.fps(), 4.0, epsilon = 1e-3);
        meter.reset();
        assert_eq!(meter.fps(), 0.0);
    }
}
