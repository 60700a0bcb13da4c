//! Voice-driven target search.
//!
//! The navigator asks the user what to look for, matches the dictated
//! transcript against the vocabulary and then watches object detections for
//! that label. Once found, the target is anchored at the detection's world
//! center. Walking guidance toward the anchor is not implemented.

use anyhow::Result;
use nalgebra::Point3;

use crate::detect::{Detection, Vocabulary};

pub const PROMPT: &str = "please tell me what you are looking for";
pub const STOPPED: &str = "navigation stopped";

/// Speech-recognition collaborator used to capture the target name.
pub trait Dictation {
    fn start_recording(&mut self) -> Result<()>;
}

/// Side effects requested by the navigator. The assistant applies them in
/// field order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct NavigationStep {
    pub transcript: Option<String>,
    pub detecting: Option<bool>,
    pub switch_to_objects: bool,
    /// Announcements on/off, applied without a spoken confirmation.
    pub announcements: Option<bool>,
    pub speak: Option<String>,
    pub start_dictation: bool,
}

#[derive(Clone, Debug, Default)]
pub struct Navigator {
    vocabulary: Vocabulary,
    navigating: bool,
    target: Option<String>,
    anchor: Option<Point3<f32>>,
}

impl Navigator {
    pub fn new(vocabulary: Vocabulary) -> Self {
        Self {
            vocabulary,
            navigating: false,
            target: None,
            anchor: None,
        }
    }

    pub fn is_navigating(&self) -> bool {
        self.navigating
    }

    pub fn target(&self) -> Option<&str> {
        self.target.as_deref()
    }

    pub fn anchor(&self) -> Option<Point3<f32>> {
        self.anchor
    }

    /// Begin a search. Ignored while a search is already running.
    pub fn start(&mut self) -> Option<NavigationStep> {
        if self.navigating {
            return None;
        }
        self.navigating = true;
        log::info!("navigation started");
        Some(Self::prompt_step())
    }

    /// Partial or final transcript from dictation.
    pub fn on_dictation(&mut self, text: &str) -> NavigationStep {
        let mut step = NavigationStep {
            transcript: Some(format!("heard: {}", text)),
            ..NavigationStep::default()
        };
        let Some(target) = self.vocabulary.find_in(text).map(str::to_string) else {
            return step;
        };
        log::info!("navigation target '{}'", target);
        step.detecting = Some(true);
        step.switch_to_objects = true;
        step.announcements = Some(true);
        step.speak = Some(format!("looking for {}, please turn your head", target));
        self.navigating = true;
        self.anchor = None;
        self.target = Some(target);
        step
    }

    /// Dictation session ended. Re-prompts when no target was recognized.
    pub fn on_dictation_complete(&mut self, text: &str) -> Option<NavigationStep> {
        if self.vocabulary.find_in(text).is_some() {
            return None;
        }
        log::debug!("no target recognized in '{}', prompting again", text);
        self.navigating = true;
        Some(Self::prompt_step())
    }

    /// Look for the target among this frame's detections. Returns the
    /// announcement the first time the target is anchored.
    pub fn observe(&mut self, detections: &[Detection]) -> Option<String> {
        if self.anchor.is_some() {
            return None;
        }
        let target = self.target.as_deref()?;
        let found = detections
            .iter()
            .find(|det| det.label == target && det.is_located())?;
        self.anchor = Some(found.center);
        log::info!("navigation target '{}' anchored at {:?}", target, found.center);
        Some(format!("found {}", found.announcement()))
    }

    /// End the search. Ignored when not navigating.
    pub fn stop(&mut self) -> Option<NavigationStep> {
        if !self.navigating {
            return None;
        }
        self.navigating = false;
        self.target = None;
        self.anchor = None;
        log::info!("navigation stopped");
        Some(NavigationStep {
            detecting: Some(true),
            announcements: Some(false),
            speak: Some(STOPPED.to_string()),
            ..NavigationStep::default()
        })
    }

    fn prompt_step() -> NavigationStep {
        NavigationStep {
            detecting: Some(false),
            announcements: Some(false),
            speak: Some(PROMPT.to_string()),
            start_dictation: true,
            ..NavigationStep::default()
        }
    }
}
