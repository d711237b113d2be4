#![cfg(feature = "backend-tract")]

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use tract_onnx::prelude::*;

use crate::infer::backend::ClassifierBackend;
use crate::transform::{Tensor as FrameTensor, RESOLUTION};

/// Tract-based backend for ONNX classifiers.
///
/// Loads a local model file once; the optimized plan is immutable and `run`
/// takes `&self`, so the backend is shared without locking. No network I/O.
pub struct TractBackend {
    model: TypedRunnableModel<TypedModel>,
}

impl TractBackend {
    /// Load an ONNX model taking a `[1, 1, RESOLUTION, RESOLUTION]` f32 input.
    pub fn new<P: AsRef<Path>>(model_path: P) -> Result<Self> {
        let model_path = model_path.as_ref();
        let model = tract_onnx::onnx()
            .model_for_path(model_path)
            .with_context(|| format!("failed to load ONNX model from {}", model_path.display()))?
            .with_input_fact(
                0,
                InferenceFact::dt_shape(f32::datum_type(), tvec!(1, 1, RESOLUTION, RESOLUTION)),
            )
            .context("failed to set input fact")?
            .into_optimized()
            .context("failed to optimize ONNX model")?
            .into_runnable()
            .context("failed to build runnable ONNX model")?;

        Ok(Self { model })
    }

    fn build_input(&self, input: &FrameTensor) -> Result<Tensor> {
        let array = tract_ndarray::Array4::from_shape_vec(
            (1, 1, RESOLUTION, RESOLUTION),
            input.as_slice().to_vec(),
        )
        .context("tensor does not match model input shape")?;
        Ok(array.into_tensor())
    }
}

impl ClassifierBackend for TractBackend {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn scores(&self, input: &FrameTensor) -> Result<Vec<f32>> {
        let input = self.build_input(input)?;
        let outputs = self
            .model
            .run(tvec!(input.into()))
            .context("ONNX inference failed")?;
        let output = outputs
            .first()
            .ok_or_else(|| anyhow!("model produced no outputs"))?;
        let scores = output
            .to_array_view::<f32>()
            .context("model output tensor was not f32")?;
        Ok(scores.iter().copied().collect())
    }

    fn warm_up(&self) -> Result<()> {
        let zeros = tract_ndarray::Array4::<f32>::zeros((1, 1, RESOLUTION, RESOLUTION));
        self.model
            .run(tvec!(zeros.into_tensor().into()))
            .context("ONNX warm-up run failed")?;
        Ok(())
    }
}
