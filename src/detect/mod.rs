//! Detection decoding and suppression.
//!
//! - `decode`: raw output tensor to per-row candidates
//! - `nms`: greedy overlap suppression
//! - `backend`: the inference collaborator seam
//! - `result`: box and detection value types

mod backend;
pub mod backends;
pub mod decode;
pub mod labels;
pub mod nms;
mod result;

pub use backend::InferenceEngine;
pub use backends::StubEngine;
pub use decode::CandidateDecoder;
pub use labels::{Vocabulary, DEFAULT_LABELS};
pub use nms::suppress;
pub use result::{BoundingBox, Detection, RawDetection, Rect};
