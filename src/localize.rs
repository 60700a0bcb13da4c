//! Spatial localization of 2-D detections.
//!
//! Each surviving box is unprojected through the pose captured with its frame,
//! the center ray is raycast against the scene, and the four corners are
//! projected to the same depth so the overlay quad faces the camera.

use std::fmt;

use anyhow::{anyhow, Result};
use nalgebra::{Point3, Vector3};

use crate::detect::{Detection, RawDetection};
use crate::geometry::{look_rotation_euler, CameraPose, SpatialScene};

/// Default raycast range in meters.
pub const DEFAULT_MAX_DISTANCE: f32 = 10.0;

/// Pulled back from the hit so points land in front of the surface.
pub const DEFAULT_SURFACE_MARGIN: f32 = 0.05;

const LEFT_MAX_YAW: f32 = 150.0;
const RIGHT_MIN_YAW: f32 = 210.0;
const DOWN_MAX_PITCH: f32 = -30.0;
const UP_MIN_PITCH: f32 = 30.0;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Lateral {
    Left,
    Right,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Vertical {
    Up,
    Down,
}

/// Coarse verbal direction: optional lateral tag, "front", optional vertical tag.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Direction {
    pub lateral: Option<Lateral>,
    pub vertical: Option<Vertical>,
}

impl Direction {
    /// Classify Euler angles (degrees, x = pitch, y = yaw) with fixed thresholds.
    pub fn from_angles(angle: &Vector3<f32>) -> Self {
        let yaw = angle.y;
        let lateral = if yaw <= LEFT_MAX_YAW {
            Some(Lateral::Left)
        } else if yaw > RIGHT_MIN_YAW {
            Some(Lateral::Right)
        } else {
            None
        };

        let pitch = if angle.x <= 90.0 {
            angle.x
        } else {
            angle.x - 360.0
        };
        let vertical = if pitch <= DOWN_MAX_PITCH {
            Some(Vertical::Down)
        } else if pitch > UP_MIN_PITCH {
            Some(Vertical::Up)
        } else {
            None
        };

        Self { lateral, vertical }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.lateral {
            Some(Lateral::Left) => f.write_str("left")?,
            Some(Lateral::Right) => f.write_str("right")?,
            None => {}
        }
        f.write_str("front")?;
        match self.vertical {
            Some(Vertical::Up) => f.write_str("up"),
            Some(Vertical::Down) => f.write_str("down"),
            None => Ok(()),
        }
    }
}

/// Direction text for a pitch/yaw pair in degrees.
pub fn direction_text(pitch: f32, yaw: f32) -> String {
    Direction::from_angles(&Vector3::new(pitch, yaw, 0.0)).to_string()
}

/// Where the square model crop sits inside the full sensor frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SensorLayout {
    pub sensor_width: u32,
    pub sensor_height: u32,
    pub crop_size: u32,
}

impl SensorLayout {
    pub fn new(sensor_width: u32, sensor_height: u32, crop_size: u32) -> Result<Self> {
        if crop_size == 0 || crop_size > sensor_width || crop_size > sensor_height {
            return Err(anyhow!(
                "crop {} does not fit inside sensor {}x{}",
                crop_size,
                sensor_width,
                sensor_height
            ));
        }
        Ok(Self {
            sensor_width,
            sensor_height,
            crop_size,
        })
    }

    /// Pixel shift from crop coordinates to sensor coordinates (centered crop).
    pub fn crop_offset(&self) -> (u32, u32) {
        (
            (self.sensor_width - self.crop_size) / 2,
            (self.sensor_height - self.crop_size) / 2,
        )
    }

    pub fn resolution(&self) -> (u32, u32) {
        (self.sensor_width, self.sensor_height)
    }
}

#[derive(Clone, Copy, Debug)]
pub struct SpatialLocalizer {
    layout: SensorLayout,
    max_distance: f32,
    surface_margin: f32,
}

impl SpatialLocalizer {
    pub fn new(layout: SensorLayout) -> Self {
        Self {
            layout,
            max_distance: DEFAULT_MAX_DISTANCE,
            surface_margin: DEFAULT_SURFACE_MARGIN,
        }
    }

    pub fn with_range(mut self, max_distance: f32, surface_margin: f32) -> Self {
        self.max_distance = max_distance;
        self.surface_margin = surface_margin;
        self
    }

    pub fn layout(&self) -> &SensorLayout {
        &self.layout
    }

    /// Anchor one candidate in world space.
    ///
    /// `pose` must be the pose captured with the frame the candidate came
    /// from. A center ray that hits nothing still yields a detection: its
    /// quad is placed at the raycast range and its distance is infinite.
    pub fn localize(
        &self,
        candidate: &RawDetection,
        label: &str,
        pose: &CameraPose,
        scene: &dyn SpatialScene,
    ) -> Detection {
        let (offset_x, offset_y) = self.layout.crop_offset();
        let (offset_x, offset_y) = (offset_x as f32, offset_y as f32);
        let resolution = self.layout.resolution();
        let bbox = candidate.bbox;

        let center_ray = pose.pixel_ray((bbox.x + offset_x, bbox.y + offset_y), resolution);
        let depth = scene
            .raycast(&center_ray, self.max_distance)
            .map(|hit| (hit.distance - self.surface_margin).max(0.0));

        let project = |(px, py): (f32, f32)| -> Point3<f32> {
            let ray = pose.pixel_ray((px + offset_x, py + offset_y), resolution);
            match depth {
                Some(depth) => scene
                    .raycast(&ray, depth)
                    .map(|hit| hit.point)
                    .unwrap_or_else(|| ray.at(depth)),
                None => ray.at(self.max_distance),
            }
        };
        let corners = bbox.corners();
        let quad = [
            project(corners[0]),
            project(corners[1]),
            project(corners[2]),
            project(corners[3]),
        ];

        let center = nalgebra::center(&quad[0], &quad[3]);
        let head = scene.head_position();
        let distance = if depth.is_some() {
            nalgebra::distance(&center, &head)
        } else {
            f32::INFINITY
        };
        let angle = look_rotation_euler(head - center);

        Detection {
            class_index: candidate.class_index,
            label: label.to_string(),
            confidence: candidate.confidence,
            bbox,
            center,
            distance,
            angle,
            direction: Direction::from_angles(&angle),
            quad,
        }
    }
}
