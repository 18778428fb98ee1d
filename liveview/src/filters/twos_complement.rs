use ndarray::{Array2, Zip};

/// Sign bit of a 16-bit sample
const SIGN_BIT: u16 = 0x8000;

/// Converts raw samples into the canonical unsigned range.
///
/// Some detectors deliver two's-complement signed samples. With remapping
/// enabled the sign bit is flipped, which maps `i16::MIN..=i16::MAX` onto
/// `0..=u16::MAX` while preserving order. With remapping disabled samples
/// pass through unchanged.
#[derive(Debug, Clone, Default)]
pub struct TwosComplementFilter {
    remap: bool,
}

impl TwosComplementFilter {
    pub fn new(remap: bool) -> Self {
        Self { remap }
    }

    pub fn set_remap(&mut self, remap: bool) {
        self.remap = remap;
    }

    pub fn is_remapping(&self) -> bool {
        self.remap
    }

    /// Convert one sample.
    #[inline]
    pub fn convert(&self, sample: u16) -> f32 {
        if self.remap {
            (sample ^ SIGN_BIT) as f32
        } else {
            sample as f32
        }
    }

    pub fn apply(&self, input: &Array2<u16>, output: &mut Array2<f32>) {
        Zip::from(output)
            .and(input)
            .for_each(|out, &sample| *out = self.convert(sample));
    }
}
