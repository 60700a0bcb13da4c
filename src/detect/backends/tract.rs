#![cfg(feature = "backend-tract")]

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use ndarray::{ArrayD, IxDyn};
use tract_onnx::prelude::*;

use crate::detect::backend::InferenceEngine;

/// Tract-based engine for ONNX detection models.
///
/// Loads a local model whose single input is `[1, 3, S, S]` RGB in `[0, 1]`.
pub struct TractEngine {
    model: SimplePlan<TypedFact, Box<dyn TypedOp>>,
    size: u32,
    num_classes: Option<usize>,
}

impl TractEngine {
    /// Load an ONNX model from disk and prepare it for inference.
    pub fn new<P: AsRef<Path>>(model_path: P, size: u32) -> Result<Self> {
        let model_path = model_path.as_ref();
        let model = tract_onnx::onnx()
            .model_for_path(model_path)
            .with_context(|| format!("failed to load ONNX model from {}", model_path.display()))?
            .with_input_fact(
                0,
                InferenceFact::dt_shape(
                    f32::datum_type(),
                    tvec!(1, 3, size as usize, size as usize),
                ),
            )
            .context("failed to set input fact")?
            .into_optimized()
            .context("failed to optimize ONNX model")?
            .into_runnable()
            .context("failed to build runnable ONNX model")?;

        // Output rows are [cx, cy, w, h, class scores...]; a concrete last axis
        // tells us the class count.
        let num_classes = model
            .model()
            .output_fact(0)
            .ok()
            .and_then(|fact| fact.shape.as_concrete().map(|dims| dims.to_vec()))
            .and_then(|dims| dims.last().copied())
            .and_then(|columns| columns.checked_sub(4));

        Ok(Self {
            model,
            size,
            num_classes,
        })
    }

    fn build_input(&self, rgb: &[u8], size: u32) -> Result<Tensor> {
        if size != self.size {
            return Err(anyhow!(
                "crop size {} does not match model input {}",
                size,
                self.size
            ));
        }
        let side = size as usize;
        let expected_len = side
            .checked_mul(side)
            .and_then(|v| v.checked_mul(3))
            .ok_or_else(|| anyhow!("crop dimensions overflow"))?;
        if rgb.len() != expected_len {
            return Err(anyhow!(
                "expected {} RGB bytes, received {}",
                expected_len,
                rgb.len()
            ));
        }

        let input = tract_ndarray::Array4::from_shape_fn((1, 3, side, side), |(_, c, y, x)| {
            rgb[(y * side + x) * 3 + c] as f32 / 255.0
        });
        Ok(input.into_tensor())
    }
}

impl InferenceEngine for TractEngine {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn input_size(&self) -> u32 {
        self.size
    }

    fn num_classes(&self) -> Option<usize> {
        self.num_classes
    }

    fn infer(&mut self, rgb: &[u8], size: u32) -> Result<ArrayD<f32>> {
        let input = self.build_input(rgb, size)?;
        let outputs = self
            .model
            .run(tvec!(input.into()))
            .context("ONNX inference failed")?;
        let output = outputs
            .first()
            .ok_or_else(|| anyhow!("model produced no outputs"))?;
        let view = output
            .to_array_view::<f32>()
            .context("model output tensor was not f32")?;
        let shape = view.shape().to_vec();
        let data: Vec<f32> = view.iter().copied().collect();
        Ok(ArrayD::from_shape_vec(IxDyn(&shape), data)?)
    }
}
