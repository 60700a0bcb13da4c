use anyhow::Result;
use ndarray::ArrayD;

/// Neural-network forward pass collaborator.
///
/// Implementations receive the square RGB crop and return the raw output
/// tensor shaped `[1, 1, N, 4 + C]`. Model loading problems belong in the
/// constructor; `infer` failures only cost the current frame.
pub trait InferenceEngine: Send {
    /// Engine identifier.
    fn name(&self) -> &'static str;

    /// Side length of the square crop the model consumes.
    fn input_size(&self) -> u32;

    /// Class count from model metadata, when the model exposes it.
    fn num_classes(&self) -> Option<usize> {
        None
    }

    /// Run one forward pass over tightly packed RGB8 pixels.
    fn infer(&mut self, rgb: &[u8], size: u32) -> Result<ArrayD<f32>>;

    /// Optional warm-up hook.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}
