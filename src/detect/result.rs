use std::fmt;

use nalgebra::{Point3, Vector3};

use crate::localize::Direction;

/// Axis-aligned box in crop pixel coordinates.
///
/// `x`/`y` locate the box center, matching the `(cx, cy, w, h)` layout of the
/// model output rows.
#[derive(Clone, Copy, Debug, PartialEq, Default)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

/// Corner-based rectangle used for overlap computation.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Rect {
    pub x_min: f32,
    pub y_min: f32,
    pub x_max: f32,
    pub y_max: f32,
}

impl BoundingBox {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn rect(&self) -> Rect {
        let half_w = self.width / 2.0;
        let half_h = self.height / 2.0;
        Rect {
            x_min: self.x - half_w,
            y_min: self.y - half_h,
            x_max: self.x + half_w,
            y_max: self.y + half_h,
        }
    }

    pub fn area(&self) -> f32 {
        self.width * self.height
    }

    /// Intersection-over-union. Zero-area unions yield 0 so degenerate boxes
    /// never block each other.
    pub fn iou(&self, other: &BoundingBox) -> f32 {
        let a = self.rect();
        let b = other.rect();
        let overlap_w = (a.x_max.min(b.x_max) - a.x_min.max(b.x_min)).max(0.0);
        let overlap_h = (a.y_max.min(b.y_max) - a.y_min.max(b.y_min)).max(0.0);
        let intersection = overlap_w * overlap_h;
        let union = self.area() + other.area() - intersection;
        if union <= 0.0 {
            return 0.0;
        }
        intersection / union
    }

    /// Corners in top-left, bottom-left, top-right, bottom-right order.
    pub fn corners(&self) -> [(f32, f32); 4] {
        let r = self.rect();
        [
            (r.x_min, r.y_min),
            (r.x_min, r.y_max),
            (r.x_max, r.y_min),
            (r.x_max, r.y_max),
        ]
    }
}

/// Unfiltered candidate emitted by the decoder for one tensor row.
#[derive(Clone, Debug, PartialEq)]
pub struct RawDetection {
    pub class_index: usize,
    pub confidence: f32,
    pub bbox: BoundingBox,
}

/// A surviving detection anchored in world space.
///
/// Built once per surviving box per frame; nothing carries over between frames.
#[derive(Clone, Debug, PartialEq)]
pub struct Detection {
    pub class_index: usize,
    pub label: String,
    pub confidence: f32,
    pub bbox: BoundingBox,
    /// World-space center of the projected quad.
    pub center: Point3<f32>,
    /// Meters from the live camera position to `center`. Infinite when the
    /// center ray hit nothing.
    pub distance: f32,
    /// Euler angles (degrees, pitch/yaw/roll) looking from `center` toward the camera.
    pub angle: Vector3<f32>,
    pub direction: Direction,
    /// Projected quad corners: top-left, bottom-left, top-right, bottom-right.
    pub quad: [Point3<f32>; 4],
}

impl Detection {
    pub fn is_located(&self) -> bool {
        self.distance.is_finite()
    }

    /// Spoken form: label, direction, distance.
    pub fn announcement(&self) -> String {
        if self.is_located() {
            format!("{} {} {:.2} meters", self.label, self.direction, self.distance)
        } else {
            format!("{} {}", self.label, self.direction)
        }
    }
}

impl fmt::Display for Detection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{:.2}[distance:{:.2}m][direction:{}]",
            self.label, self.confidence, self.distance, self.direction
        )
    }
}
