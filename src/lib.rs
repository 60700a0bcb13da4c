//! Sightline
//!
//! Spoken, spatially grounded scene descriptions for a head-mounted camera.
//! Each frame's detections are decoded, de-duplicated, anchored in world space
//! and turned into a short announcement ("cup leftfront 1.20 meters").
//!
//! # Architecture
//!
//! The assistant runs one cooperative pass per tick:
//!
//! 1. **Decode**: raw `[1, 1, N, 4 + C]` output rows become labeled candidates.
//! 2. **Suppress**: greedy IoU suppression keeps a non-overlapping set.
//! 3. **Localize**: boxes are unprojected with the pose captured alongside
//!    their frame, raycast against the scene and classified by direction.
//! 4. **Announce**: the announcer speaks at most one utterance at a time.
//!
//! Text and face modes replace steps 1-3 with a remote recognizer call.
//!
//! # Module Structure
//!
//! - `detect`: decoding, suppression, inference engines
//! - `geometry`, `localize`: camera rays, raycasts, direction text
//! - `frame`: frame/pose pairs and frame sources
//! - `mode`, `speech`, `navigate`, `command`: interaction state
//! - `remote`: OCR and face-emotion services
//! - `pipeline`: the per-frame driver
//! - `config`: file and environment configuration

pub mod command;
pub mod config;
pub mod detect;
pub mod frame;
pub mod geometry;
pub mod localize;
pub mod mode;
pub mod navigate;
pub mod pipeline;
pub mod remote;
pub mod speech;

pub use command::Command;
pub use config::SightlineConfig;
pub use detect::{
    suppress, BoundingBox, CandidateDecoder, Detection, InferenceEngine, RawDetection,
    StubEngine, Vocabulary, DEFAULT_LABELS,
};
pub use frame::{CapturedFrame, FrameSource, SyntheticSource};
pub use geometry::{CameraPose, Plane, PlaneScene, Ray, RaycastHit, SpatialScene};
pub use localize::{direction_text, Direction, SensorLayout, SpatialLocalizer};
pub use mode::{DetectionMode, ModeCoordinator, ModeTransition};
pub use navigate::{Dictation, Navigator};
pub use pipeline::{
    Assistant, Collaborators, LogOverlay, LogStatusDisplay, OverlaySink, PipelineSettings,
    StatusDisplay, Surface, TickReport,
};
pub use remote::{HttpRecognizer, RemoteRecognizer};
pub use speech::{Announcer, LogSpeechEngine, SpeechEngine, SpeechRate, Utterance, UtteranceDone};

#[cfg(feature = "backend-tract")]
pub use detect::backends::TractEngine;
