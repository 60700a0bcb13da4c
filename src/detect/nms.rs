use std::cmp::Ordering;

use super::result::RawDetection;

/// Greedy non-maximum suppression.
///
/// Candidates are ranked by confidence (stable, so equal scores keep decoder
/// order). A candidate survives only when its IoU with every already accepted
/// box is <= `iou_threshold`. Output is in acceptance order.
pub fn suppress(iou_threshold: f32, mut detections: Vec<RawDetection>) -> Vec<RawDetection> {
    detections.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(Ordering::Equal)
    });

    let mut accepted: Vec<RawDetection> = Vec::with_capacity(detections.len());
    for candidate in detections {
        let overlaps = accepted
            .iter()
            .any(|kept| kept.bbox.iou(&candidate.bbox) > iou_threshold);
        if !overlaps {
            accepted.push(candidate);
        }
    }
    accepted
}
