use std::collections::VecDeque;

use anyhow::{anyhow, Result};
use ndarray::{Array, ArrayD, IxDyn};

use crate::detect::backend::InferenceEngine;
use crate::detect::decode::BOX_COLUMNS;

/// Scripted engine for tests and demos.
///
/// Queued outputs are returned in order; once the queue drains, the steady
/// output (or an empty `[1, 1, 0, 4 + C]` tensor) is returned.
pub struct StubEngine {
    input_size: u32,
    num_classes: usize,
    queued: VecDeque<ArrayD<f32>>,
    steady: Option<ArrayD<f32>>,
    calls: u64,
}

impl StubEngine {
    pub fn new(input_size: u32, num_classes: usize) -> Self {
        Self {
            input_size,
            num_classes,
            queued: VecDeque::new(),
            steady: None,
            calls: 0,
        }
    }

    /// Build a `[1, 1, N, 4 + C]` tensor from `(cx, cy, w, h, class, score)` rows.
    /// All other class scores are zero.
    pub fn tensor_from_rows(
        num_classes: usize,
        rows: &[(f32, f32, f32, f32, usize, f32)],
    ) -> Result<ArrayD<f32>> {
        let columns = BOX_COLUMNS + num_classes;
        let mut data = vec![0.0f32; rows.len() * columns];
        for (i, &(cx, cy, w, h, class, score)) in rows.iter().enumerate() {
            if class >= num_classes {
                return Err(anyhow!(
                    "row {} class {} outside {} classes",
                    i,
                    class,
                    num_classes
                ));
            }
            let row = &mut data[i * columns..(i + 1) * columns];
            row[..BOX_COLUMNS].copy_from_slice(&[cx, cy, w, h]);
            row[BOX_COLUMNS + class] = score;
        }
        Ok(Array::from_shape_vec(IxDyn(&[1, 1, rows.len(), columns]), data)?)
    }

    pub fn push_output(&mut self, output: ArrayD<f32>) {
        self.queued.push_back(output);
    }

    pub fn with_steady_output(mut self, output: ArrayD<f32>) -> Self {
        self.steady = Some(output);
        self
    }

    pub fn calls(&self) -> u64 {
        self.calls
    }

    fn empty_output(&self) -> ArrayD<f32> {
        Array::zeros(IxDyn(&[1, 1, 0, BOX_COLUMNS + self.num_classes]))
    }
}

impl InferenceEngine for StubEngine {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn input_size(&self) -> u32 {
        self.input_size
    }

    fn num_classes(&self) -> Option<usize> {
        Some(self.num_classes)
    }

    fn infer(&mut self, rgb: &[u8], size: u32) -> Result<ArrayD<f32>> {
        let expected = (size as usize) * (size as usize) * 3;
        if size != self.input_size || rgb.len() != expected {
            return Err(anyhow!(
                "expected {}x{} RGB crop ({} bytes), received {} bytes at size {}",
                self.input_size,
                self.input_size,
                expected,
                rgb.len(),
                size
            ));
        }
        self.calls += 1;
        if let Some(next) = self.queued.pop_front() {
            return Ok(next);
        }
        Ok(self.steady.clone().unwrap_or_else(|| self.empty_output()))
    }
}
