//! Camera projection and scene raycasting.
//!
//! A `CameraPose` is captured together with the frame it describes and is
//! passed by value through the pipeline; nothing here keeps ambient pose state.

use anyhow::{anyhow, Result};
use nalgebra::{Matrix3, Matrix4, Point3, Unit, Vector3};

/// Camera-to-world and projection matrices captured with one frame.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CameraPose {
    camera_to_world: Matrix4<f32>,
    projection: Matrix4<f32>,
}

impl CameraPose {
    /// Validates that the projection carries usable focal terms.
    pub fn new(camera_to_world: Matrix4<f32>, projection: Matrix4<f32>) -> Result<Self> {
        let focal_x = projection[(0, 0)];
        let focal_y = projection[(1, 1)];
        let norm = projection[(2, 2)];
        for (name, value) in [("focal x", focal_x), ("focal y", focal_y), ("depth", norm)] {
            if !value.is_finite() || value.abs() < f32::EPSILON {
                return Err(anyhow!("projection {} term is unusable: {}", name, value));
            }
        }
        if camera_to_world.iter().any(|v| !v.is_finite()) {
            return Err(anyhow!("camera-to-world matrix has non-finite entries"));
        }
        Ok(Self {
            camera_to_world,
            projection,
        })
    }

    /// Pinhole camera at `position` with the given world rotation. Focal terms
    /// are in normalized image units; positive depth looks along camera +Z.
    pub fn pinhole(
        position: Point3<f32>,
        rotation: Matrix3<f32>,
        focal_x: f32,
        focal_y: f32,
    ) -> Result<Self> {
        let mut camera_to_world = rotation.to_homogeneous();
        camera_to_world[(0, 3)] = position.x;
        camera_to_world[(1, 3)] = position.y;
        camera_to_world[(2, 3)] = position.z;
        let mut projection = Matrix4::zeros();
        projection[(0, 0)] = focal_x;
        projection[(1, 1)] = focal_y;
        projection[(2, 2)] = 1.0;
        projection[(3, 3)] = 1.0;
        Self::new(camera_to_world, projection)
    }

    pub fn camera_to_world(&self) -> &Matrix4<f32> {
        &self.camera_to_world
    }

    pub fn projection(&self) -> &Matrix4<f32> {
        &self.projection
    }

    /// Camera origin in world space (translation column).
    pub fn position(&self) -> Point3<f32> {
        Point3::new(
            self.camera_to_world[(0, 3)],
            self.camera_to_world[(1, 3)],
            self.camera_to_world[(2, 3)],
        )
    }

    /// World-space ray through a sensor pixel (origin top-left, y down).
    pub fn pixel_ray(&self, pixel: (f32, f32), resolution: (u32, u32)) -> Ray {
        let half_w = resolution.0 as f32 / 2.0;
        let half_h = resolution.1 as f32 / 2.0;
        // Scale to [-1, 1] with y up.
        let sx = (pixel.0 - half_w) / half_w;
        let sy = -(pixel.1 - half_h) / half_h;

        let p = &self.projection;
        let norm = p[(2, 2)];
        let center_x = p[(0, 2)] / norm;
        let center_y = p[(1, 2)] / norm;
        let camera_dir = Vector3::new(
            (sx - center_x) / p[(0, 0)],
            (sy - center_y) / p[(1, 1)],
            1.0 / norm,
        );

        let rotation: Matrix3<f32> = self.camera_to_world.fixed_view::<3, 3>(0, 0).into_owned();
        Ray::new(self.position(), rotation * camera_dir)
    }
}

/// Half-line with a unit direction.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Ray {
    pub origin: Point3<f32>,
    pub direction: Unit<Vector3<f32>>,
}

impl Ray {
    /// A zero direction falls back to world +Z.
    pub fn new(origin: Point3<f32>, direction: Vector3<f32>) -> Self {
        let direction =
            Unit::try_new(direction, f32::EPSILON).unwrap_or_else(|| Vector3::z_axis());
        Self { origin, direction }
    }

    pub fn at(&self, distance: f32) -> Point3<f32> {
        self.origin + self.direction.into_inner() * distance
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RaycastHit {
    pub point: Point3<f32>,
    pub distance: f32,
}

/// Physical scene collaborator: surface raycasts and the live head position.
pub trait SpatialScene {
    /// Nearest surface hit within `max_distance`, if any.
    fn raycast(&self, ray: &Ray, max_distance: f32) -> Option<RaycastHit>;

    /// Camera position right now (not at capture time).
    fn head_position(&self) -> Point3<f32>;
}

/// Infinite plane surface.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Plane {
    pub point: Point3<f32>,
    pub normal: Unit<Vector3<f32>>,
}

impl Plane {
    pub fn new(point: Point3<f32>, normal: Vector3<f32>) -> Self {
        Self {
            point,
            normal: Unit::try_new(normal, f32::EPSILON).unwrap_or_else(|| Vector3::y_axis()),
        }
    }

    fn intersect(&self, ray: &Ray) -> Option<f32> {
        let denom = self.normal.dot(ray.direction.as_ref());
        if denom.abs() < 1e-6 {
            return None;
        }
        let t = self.normal.dot(&(self.point - ray.origin)) / denom;
        (t >= 0.0).then_some(t)
    }
}

/// Scene made of planes, used by the demo daemon and tests.
#[derive(Clone, Debug, PartialEq)]
pub struct PlaneScene {
    planes: Vec<Plane>,
    head: Point3<f32>,
}

impl PlaneScene {
    pub fn new(head: Point3<f32>) -> Self {
        Self {
            planes: Vec::new(),
            head,
        }
    }

    pub fn with_plane(mut self, plane: Plane) -> Self {
        self.planes.push(plane);
        self
    }

    pub fn set_head_position(&mut self, head: Point3<f32>) {
        self.head = head;
    }
}

impl SpatialScene for PlaneScene {
    fn raycast(&self, ray: &Ray, max_distance: f32) -> Option<RaycastHit> {
        self.planes
            .iter()
            .filter_map(|plane| plane.intersect(ray))
            .filter(|t| *t <= max_distance)
            .min_by(|a, b| a.total_cmp(b))
            .map(|distance| RaycastHit {
                point: ray.at(distance),
                distance,
            })
    }

    fn head_position(&self) -> Point3<f32> {
        self.head
    }
}

/// Euler angles in degrees (x = pitch, y = yaw, z = roll), each in [0, 360),
/// of a rotation looking along `forward` with world up +Y. Positive pitch
/// looks down.
pub fn look_rotation_euler(forward: Vector3<f32>) -> Vector3<f32> {
    let length = forward.norm();
    if length < f32::EPSILON {
        return Vector3::zeros();
    }
    let f = forward / length;
    let yaw = f.x.atan2(f.z).to_degrees();
    let pitch = (-f.y).clamp(-1.0, 1.0).asin().to_degrees();
    Vector3::new(wrap_degrees(pitch), wrap_degrees(yaw), 0.0)
}

fn wrap_degrees(angle: f32) -> f32 {
    let wrapped = angle.rem_euclid(360.0);
    // rem_euclid can round up to exactly 360 for tiny negative inputs
    if wrapped >= 360.0 {
        0.0
    } else {
        wrapped
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn forward_pose() -> CameraPose {
        CameraPose::pinhole(Point3::origin(), Matrix3::identity(), 1.0, 1.0).unwrap()
    }

    #[test]
    fn center_pixel_looks_forward() {
        let ray = forward_pose().pixel_ray((212.0, 120.0), (424, 240));
        assert!((ray.direction.into_inner() - Vector3::z()).norm() < 1e-6);
    }

    #[test]
    fn left_and_top_pixels_bend_the_ray() {
        let pose = forward_pose();
        let left = pose.pixel_ray((0.0, 120.0), (424, 240));
        assert!(left.direction.x < 0.0);
        let top = pose.pixel_ray((212.0, 0.0), (424, 240));
        assert!(top.direction.y > 0.0);
    }

    #[test]
    fn rejects_degenerate_projection() {
        let mut projection = Matrix4::identity();
        projection[(0, 0)] = 0.0;
        assert!(CameraPose::new(Matrix4::identity(), projection).is_err());
    }

    #[test]
    fn plane_scene_hits_nearest_within_range() {
        let scene = PlaneScene::new(Point3::origin())
            .with_plane(Plane::new(Point3::new(0.0, 0.0, 5.0), Vector3::z()))
            .with_plane(Plane::new(Point3::new(0.0, 0.0, 2.0), Vector3::z()));
        let ray = Ray::new(Point3::origin(), Vector3::z());
        let hit = scene.raycast(&ray, 10.0).unwrap();
        assert!((hit.distance - 2.0).abs() < 1e-6);
        assert!(scene.raycast(&ray, 1.0).is_none());
        let away = Ray::new(Point3::origin(), -Vector3::z());
        assert!(scene.raycast(&away, 10.0).is_none());
    }

    #[test]
    fn look_rotation_matches_headings() {
        let back = look_rotation_euler(-Vector3::z());
        assert!((back.y - 180.0).abs() < 1e-4);
        let right = look_rotation_euler(Vector3::x());
        assert!((right.y - 90.0).abs() < 1e-4);
        let down = look_rotation_euler(Vector3::new(0.0, -1.0, 1.0));
        assert!((down.x - 45.0).abs() < 1e-4);
        let up = look_rotation_euler(Vector3::new(0.0, 1.0, 1.0));
        assert!((up.x - 315.0).abs() < 1e-4);
        assert_eq!(look_rotation_euler(Vector3::zeros()), Vector3::zeros());
    }
}
