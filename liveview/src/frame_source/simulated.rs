//! Synthetic frame generator.
//!
//! Produces a smooth spectral ramp with a drifting bright column and
//! Gaussian read noise, paced to the configured frame period. Telemetry rows
//! beyond `data_height` carry the low 16 bits of the sequence number.

use ndarray::Array2;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, StandardNormal};
use std::time::{Duration, Instant};
use tracing::info;

use super::{pace, FrameSource, SourceConfig, SourceError, SourceResult};
use crate::frame::{FrameGeometry, RawFrame};

/// Tunables for the synthetic scene.
#[derive(Debug, Clone)]
pub struct SimulatedScene {
    /// Bias level in DN
    pub bias: f64,
    /// Peak of the spectral ramp above bias
    pub ramp_amplitude: f64,
    /// Extra signal in the drifting column
    pub line_amplitude: f64,
    /// Read noise standard deviation in DN
    pub read_noise: f64,
    /// Emit samples in two's-complement encoding (sign bit flipped)
    pub signed_encoding: bool,
    pub seed: u64,
}

impl Default for SimulatedScene {
    fn default() -> Self {
        Self {
            bias: 1000.0,
            ramp_amplitude: 2000.0,
            line_amplitude: 5000.0,
            read_noise: 5.0,
            signed_encoding: false,
            seed: 7,
        }
    }
}

pub struct SimulatedSource {
    scene: SimulatedScene,
    geometry: Option<FrameGeometry>,
    rng: StdRng,
    frame_period: Duration,
    opened_at: Instant,
    deadline: Instant,
    sequence: u64,
}

impl SimulatedSource {
    pub fn new(scene: SimulatedScene) -> Self {
        let now = Instant::now();
        Self {
            rng: StdRng::seed_from_u64(scene.seed),
            scene,
            geometry: None,
            frame_period: Duration::ZERO,
            opened_at: now,
            deadline: now,
            sequence: 0,
        }
    }

    fn render(&mut self, geometry: FrameGeometry) -> Array2<u16> {
        let (rows, cols) = geometry.shape();
        let line_col = (self.sequence as usize) % cols;
        let signed = self.scene.signed_encoding;
        let telemetry = (self.sequence & 0xFFFF) as u16;
        let scene = &self.scene;
        let read_noise = scene.read_noise.max(0.0);
        let rng = &mut self.rng;

        Array2::from_shape_fn((rows, cols), |(row, col)| {
            if row >= geometry.data_height {
                return telemetry;
            }
            let ramp = scene.ramp_amplitude * row as f64 / geometry.data_height.max(1) as f64;
            let line = if col == line_col {
                scene.line_amplitude
            } else {
                0.0
            };
            let noise: f64 = StandardNormal.sample(rng);
            let value = (scene.bias + ramp + line + noise * read_noise)
                .round()
                .clamp(0.0, u16::MAX as f64) as u16;
            if signed {
                value ^ 0x8000
            } else {
                value
            }
        })
    }
}

impl Default for SimulatedSource {
    fn default() -> Self {
        Self::new(SimulatedScene::default())
    }
}

impl FrameSource for SimulatedSource {
    fn name(&self) -> &str {
        "simulated"
    }

    fn open(&mut self, config: &SourceConfig) -> SourceResult<FrameGeometry> {
        if !config.geometry.is_valid() {
            return Err(SourceError::Config(format!(
                "invalid geometry {}",
                config.geometry
            )));
        }
        self.geometry = Some(config.geometry);
        self.frame_period = config.frame_period;
        self.opened_at = Instant::now();
        self.deadline = self.opened_at + config.frame_period;
        self.sequence = 0;
        info!(
            "Simulated source open: {} every {:?}",
            config.geometry, config.frame_period
        );
        Ok(config.geometry)
    }

    fn next_frame(&mut self) -> SourceResult<RawFrame> {
        let geometry = self.geometry.ok_or(SourceError::NotOpen)?;
        pace(&mut self.deadline, self.frame_period);
        let data = self.render(geometry);
        let frame = RawFrame::new(self.sequence, self.opened_at.elapsed(), data);
        self.sequence += 1;
        Ok(frame)
    }

    fn close(&mut self) -> SourceResult<()> {
        self.geometry = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::CameraType;

    fn fast_config(geometry: FrameGeometry) -> SourceConfig {
        let mut config = SourceConfig::new(CameraType::Simulated, geometry);
        config.frame_period = Duration::ZERO;
        config
    }

    #[test]
    fn test_next_frame_before_open_fails() {
        let mut source = SimulatedSource::default();
        assert!(matches!(source.next_frame(), Err(SourceError::NotOpen)));
    }

    #[test]
    fn test_frames_have_configured_geometry_and_sequence() {
        let geometry = FrameGeometry::with_data_height(16, 9, 8);
        let mut source = SimulatedSource::default();
        assert_eq!(source.open(&fast_config(geometry)).unwrap(), geometry);

        for expected in 0..3 {
            let frame = source.next_frame().unwrap();
            assert_eq!(frame.sequence, expected);
            assert_eq!(frame.data.dim(), (9, 16));
            assert!(frame.data.row(8).iter().all(|&v| v == expected as u16));
        }
    }

    #[test]
    fn test_signed_encoding_flips_sign_bit() {
        let geometry = FrameGeometry::new(4, 4);
        let scene = SimulatedScene {
            read_noise: 0.0,
            ramp_amplitude: 0.0,
            line_amplitude: 0.0,
            signed_encoding: true,
            ..SimulatedScene::default()
        };
        let mut source = SimulatedSource::new(scene);
        source.open(&fast_config(geometry)).unwrap();
        let frame = source.next_frame().unwrap();
        assert!(frame.data.iter().all(|&v| v == 1000 ^ 0x8000));
    }

    #[test]
    fn test_invalid_geometry_rejected() {
        let mut source = SimulatedSource::default();
        let geometry = FrameGeometry::with_data_height(4, 4, 5);
        assert!(matches!(
            source.open(&fast_config(geometry)),
            Err(SourceError::Config(_))
        ));
    }

    #[test]
    fn test_close_then_read_fails() {
        let mut source = SimulatedSource::default();
        source.open(&fast_config(FrameGeometry::new(2, 2))).unwrap();
        source.close().unwrap();
        assert!(matches!(source.next_frame(), Err(SourceError::NotOpen)));
    }
}
