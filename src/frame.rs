//! Frame acquisition seam.
//!
//! A `CapturedFrame` owns its pixels together with the `CameraPose` sampled at
//! the same instant. The pair is built once by the source and never split, so
//! every detection is localized against the pose of the frame it came from.
//!
//! - `FrameSource`: pull-based source; `Ok(None)` means no frame is ready yet.
//! - `SyntheticSource`: noise frames with a slowly turning pose, used by the
//!   daemon for `stub://` cameras and by tests.

use std::io::Cursor;

use anyhow::{anyhow, Context, Result};
use nalgebra::{Matrix3, Point3, Rotation3, Vector3};
use rand::Rng;

use crate::geometry::CameraPose;
use crate::localize::SensorLayout;

/// RGB8 frame plus the pose it was captured with.
#[derive(Clone, Debug)]
pub struct CapturedFrame {
    pixels: Vec<u8>,
    width: u32,
    height: u32,
    pose: CameraPose,
}

impl CapturedFrame {
    pub fn new(pixels: Vec<u8>, width: u32, height: u32, pose: CameraPose) -> Result<Self> {
        let expected = (width as usize)
            .checked_mul(height as usize)
            .and_then(|v| v.checked_mul(3))
            .ok_or_else(|| anyhow!("frame dimensions overflow"))?;
        if pixels.len() != expected {
            return Err(anyhow!(
                "frame {}x{} needs {} RGB bytes, got {}",
                width,
                height,
                expected,
                pixels.len()
            ));
        }
        Ok(Self {
            pixels,
            width,
            height,
            pose,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    pub fn pose(&self) -> &CameraPose {
        &self.pose
    }

    /// Square crop centered in the frame, as fed to the inference engine.
    pub fn center_crop(&self, layout: &SensorLayout) -> Result<Vec<u8>> {
        if layout.sensor_width != self.width || layout.sensor_height != self.height {
            return Err(anyhow!(
                "frame is {}x{}, sensor layout expects {}x{}",
                self.width,
                self.height,
                layout.sensor_width,
                layout.sensor_height
            ));
        }
        let (offset_x, offset_y) = layout.crop_offset();
        let side = layout.crop_size as usize;
        let stride = self.width as usize * 3;
        let mut crop = Vec::with_capacity(side * side * 3);
        for row in 0..side {
            let start = (offset_y as usize + row) * stride + offset_x as usize * 3;
            crop.extend_from_slice(&self.pixels[start..start + side * 3]);
        }
        Ok(crop)
    }

    /// Full frame encoded as JPEG, for the remote recognizers.
    pub fn to_jpeg(&self) -> Result<Vec<u8>> {
        let image = image::RgbImage::from_raw(self.width, self.height, self.pixels.clone())
            .ok_or_else(|| anyhow!("frame buffer does not match its dimensions"))?;
        let mut bytes = Vec::new();
        image
            .write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Jpeg)
            .context("encode frame as jpeg")?;
        Ok(bytes)
    }
}

/// Camera plus head tracker, sampled together.
pub trait FrameSource {
    /// Next frame with its pose, or `None` when nothing new is available.
    fn next_frame(&mut self) -> Result<Option<CapturedFrame>>;
}

/// Generates noise frames. The head sits at a fixed position and yaws by a
/// constant step per frame.
pub struct SyntheticSource {
    width: u32,
    height: u32,
    position: Point3<f32>,
    focal: f32,
    yaw_step_deg: f32,
    frame_count: u64,
}

impl SyntheticSource {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            position: Point3::origin(),
            focal: 1.0,
            yaw_step_deg: 0.0,
            frame_count: 0,
        }
    }

    pub fn with_yaw_step(mut self, degrees: f32) -> Self {
        self.yaw_step_deg = degrees;
        self
    }

    pub fn with_position(mut self, position: Point3<f32>) -> Self {
        self.position = position;
        self
    }

    pub fn frames_captured(&self) -> u64 {
        self.frame_count
    }

    fn current_pose(&self) -> Result<CameraPose> {
        let yaw = (self.yaw_step_deg * self.frame_count as f32).to_radians();
        let rotation: Matrix3<f32> = Rotation3::from_axis_angle(&Vector3::y_axis(), yaw).into_inner();
        CameraPose::pinhole(self.position, rotation, self.focal, self.focal)
    }
}

impl FrameSource for SyntheticSource {
    fn next_frame(&mut self) -> Result<Option<CapturedFrame>> {
        let pose = self.current_pose()?;
        let mut pixels = vec![0u8; self.width as usize * self.height as usize * 3];
        rand::thread_rng().fill(&mut pixels[..]);
        self.frame_count += 1;
        CapturedFrame::new(pixels, self.width, self.height, pose).map(Some)
    }
}
