use anyhow::{anyhow, Result};
use ndarray::{ArrayViewD, Axis};

use super::labels::Vocabulary;
use super::result::{BoundingBox, RawDetection};

/// Leading box columns of every output row: cx, cy, w, h.
pub const BOX_COLUMNS: usize = 4;

/// Turns a raw `[1, 1, N, 4 + C]` output tensor into per-row candidates.
#[derive(Clone, Debug)]
pub struct CandidateDecoder {
    vocabulary: Vocabulary,
    confidence_threshold: f32,
}

impl CandidateDecoder {
    pub fn new(vocabulary: Vocabulary, confidence_threshold: f32) -> Result<Self> {
        if !(0.0..=1.0).contains(&confidence_threshold) {
            return Err(anyhow!(
                "confidence threshold {} outside [0, 1]",
                confidence_threshold
            ));
        }
        Ok(Self {
            vocabulary,
            confidence_threshold,
        })
    }

    pub fn vocabulary(&self) -> &Vocabulary {
        &self.vocabulary
    }

    pub fn confidence_threshold(&self) -> f32 {
        self.confidence_threshold
    }

    /// Number of columns an output row must carry for this vocabulary.
    pub fn expected_columns(&self) -> usize {
        BOX_COLUMNS + self.vocabulary.len()
    }

    /// Fails when a model reports a class count that disagrees with the vocabulary.
    pub fn check_class_count(&self, num_classes: usize) -> Result<()> {
        if num_classes != self.vocabulary.len() {
            return Err(anyhow!(
                "model/vocabulary mismatch: model has {} classes, vocabulary has {}",
                num_classes,
                self.vocabulary.len()
            ));
        }
        Ok(())
    }

    /// Decode one frame's output. Each row yields at most one candidate: the
    /// first class holding the maximal score, kept when that score is >= the threshold.
    pub fn decode(&self, output: ArrayViewD<'_, f32>) -> Result<Vec<RawDetection>> {
        let shape = output.shape();
        if shape.len() != 4 || shape[0] != 1 || shape[1] != 1 {
            return Err(anyhow!(
                "expected output tensor shaped [1, 1, N, {}], got {:?}",
                self.expected_columns(),
                shape
            ));
        }
        if shape[3] != self.expected_columns() {
            return Err(anyhow!(
                "model/vocabulary mismatch: rows carry {} columns, expected {}",
                shape[3],
                self.expected_columns()
            ));
        }

        let rows = output.index_axis(Axis(0), 0);
        let rows = rows.index_axis(Axis(0), 0);
        let mut candidates = Vec::new();
        for row in rows.axis_iter(Axis(0)) {
            let scores = row.slice(ndarray::s![BOX_COLUMNS..]);
            // NaN scores never win and never pass the threshold.
            let (class_index, confidence) = scores
                .iter()
                .enumerate()
                .filter(|(_, score)| !score.is_nan())
                .fold((0usize, f32::NEG_INFINITY), |best, (idx, &score)| {
                    if score > best.1 {
                        (idx, score)
                    } else {
                        best
                    }
                });
            if confidence < self.confidence_threshold {
                continue;
            }
            candidates.push(RawDetection {
                class_index,
                confidence,
                bbox: BoundingBox::new(row[0], row[1], row[2], row[3]),
            });
        }
        Ok(candidates)
    }

    /// Resolve a candidate's label. Out-of-range indices mean the model and
    /// vocabulary disagree, which is a configuration error.
    pub fn label(&self, candidate: &RawDetection) -> Result<&str> {
        self.vocabulary.label(candidate.class_index).ok_or_else(|| {
            anyhow!(
                "class index {} outside vocabulary of {} labels",
                candidate.class_index,
                self.vocabulary.len()
            )
        })
    }
}
