use anyhow::Result;

use crate::infer::backend::ClassifierBackend;
use crate::transform::Tensor;
use crate::{Label, NUM_CLASSES};

/// Stub backend for testing and model-less deployments.
///
/// Splits the mean intensity range [-1, 1] into `NUM_CLASSES` equal bands and
/// scores each class by closeness of the tensor mean to its band center. A
/// uniform frame at `StubBackend::gray_level(label)` is always classified as
/// `label`.
#[derive(Clone, Copy, Debug, Default)]
pub struct StubBackend;

impl StubBackend {
    pub fn new() -> Self {
        Self
    }

    /// Gray level whose uniform frame lands in the center of `label`'s band.
    ///
    /// `Unknown` has no band and maps to mid-gray.
    pub fn gray_level(label: Label) -> u8 {
        match Label::CLASSES.iter().position(|c| *c == label) {
            Some(index) => (((2 * index + 1) * 255) / (2 * NUM_CLASSES)) as u8,
            None => 128,
        }
    }

    fn band_center(index: usize) -> f32 {
        let width = 2.0 / NUM_CLASSES as f32;
        -1.0 + width * (index as f32 + 0.5)
    }
}

impl ClassifierBackend for StubBackend {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn scores(&self, input: &Tensor) -> Result<Vec<f32>> {
        let mean = input.mean();
        Ok((0..NUM_CLASSES)
            .map(|index| 1.0 - (mean - Self::band_center(index)).abs())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scores_peak_at_nearest_band() -> Result<()> {
        let backend = StubBackend::new();
        let scores = backend.scores(&Tensor::filled(-0.99))?;
        assert_eq!(scores.len(), NUM_CLASSES);
        let best = scores
            .iter()
            .enumerate()
            .fold(0, |best, (i, s)| if *s > scores[best] { i } else { best });
        assert_eq!(best, 0);

        let scores = backend.scores(&Tensor::filled(0.99))?;
        let best = scores
            .iter()
            .enumerate()
            .fold(0, |best, (i, s)| if *s > scores[best] { i } else { best });
        assert_eq!(best, NUM_CLASSES - 1);
        Ok(())
    }

    #[test]
    fn gray_levels_are_increasing() {
        let levels: Vec<u8> = Label::CLASSES.iter().map(|l| StubBackend::gray_level(*l)).collect();
        assert!(levels.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(levels[0], 15);
        assert_eq!(levels[NUM_CLASSES - 1], 239);
    }
}
