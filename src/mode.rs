//! Detection mode state machine.

use std::fmt;
use std::str::FromStr;

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};

/// Which per-frame routine runs.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectionMode {
    #[default]
    ObjectDetection,
    TextRecognition,
    FaceEmotion,
}

impl DetectionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            DetectionMode::ObjectDetection => "object_detection",
            DetectionMode::TextRecognition => "text_recognition",
            DetectionMode::FaceEmotion => "face_emotion",
        }
    }

    /// Human name used in confirmations and the status surface.
    pub fn spoken_name(&self) -> &'static str {
        match self {
            DetectionMode::ObjectDetection => "object detection",
            DetectionMode::TextRecognition => "text recognition",
            DetectionMode::FaceEmotion => "emotion recognition",
        }
    }
}

impl fmt::Display for DetectionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DetectionMode {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_lowercase().replace(['-', ' '], "_").as_str() {
            "object_detection" | "object" | "objects" => Ok(DetectionMode::ObjectDetection),
            "text_recognition" | "text" | "ocr" => Ok(DetectionMode::TextRecognition),
            "face_emotion" | "face" | "emotion" => Ok(DetectionMode::FaceEmotion),
            other => Err(anyhow!("unknown detection mode '{}'", other)),
        }
    }
}

/// Effects of an accepted mode switch. The caller must clear the pending
/// announcement text, speak `announcement` and show `status_text`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ModeTransition {
    pub from: DetectionMode,
    pub to: DetectionMode,
    pub announcement: String,
    pub status_text: String,
}

#[derive(Clone, Debug, Default)]
pub struct ModeCoordinator {
    current: DetectionMode,
}

impl ModeCoordinator {
    pub fn new(initial: DetectionMode) -> Self {
        Self { current: initial }
    }

    pub fn current(&self) -> DetectionMode {
        self.current
    }

    /// Switch modes. Switching to the active mode is a no-op and returns `None`.
    pub fn transition(&mut self, to: DetectionMode) -> Option<ModeTransition> {
        if to == self.current {
            return None;
        }
        let from = std::mem::replace(&mut self.current, to);
        log::info!("detection mode {} -> {}", from, to);
        Some(ModeTransition {
            from,
            to,
            announcement: format!("start {}", to.spoken_name()),
            status_text: status_text(to),
        })
    }
}

/// Text for the mode status surface.
pub fn status_text(mode: DetectionMode) -> String {
    format!("mode: {}", mode.spoken_name())
}
