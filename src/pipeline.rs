//! Frame pipeline driver.
//!
//! `Assistant::tick` is one cooperative pass: clear the overlay, pull one
//! frame/pose pair, run the routine selected by the active mode, publish the
//! pending announcement and let the announcer speak it if it is free. Nothing
//! that goes wrong inside a tick escapes it; the next tick starts clean.

use std::path::PathBuf;
use std::time::Instant;

use anyhow::{anyhow, Context, Result};

use crate::command::Command;
use crate::detect::{suppress, CandidateDecoder, Detection, InferenceEngine, Vocabulary};
use crate::frame::{CapturedFrame, FrameSource};
use crate::geometry::SpatialScene;
use crate::localize::{SensorLayout, SpatialLocalizer};
use crate::mode::{status_text, DetectionMode, ModeCoordinator};
use crate::navigate::{Dictation, NavigationStep, Navigator};
use crate::remote::RemoteRecognizer;
use crate::speech::{announcement_status, Announcer, SpeechEngine, SpeechRate};

/// Text surfaces on the device display.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Surface {
    Mode,
    Fps,
    SpeechStatus,
    SpeechRate,
    Transcript,
}

pub trait StatusDisplay {
    fn set_text(&mut self, surface: Surface, text: &str);

    /// Debug log surface. `clear` replaces the contents instead of appending.
    fn log(&mut self, message: &str, clear: bool);
}

/// Renders per-frame detection overlays.
pub trait OverlaySink {
    fn clear(&mut self);
    fn draw(&mut self, detection: &Detection);
}

/// Display that forwards surface updates to the `log` facade.
#[derive(Debug, Default)]
pub struct LogStatusDisplay;

impl StatusDisplay for LogStatusDisplay {
    fn set_text(&mut self, surface: Surface, text: &str) {
        match surface {
            Surface::Fps => log::debug!("{}", text),
            _ => log::info!("[{:?}] {}", surface, text),
        }
    }

    fn log(&mut self, message: &str, _clear: bool) {
        log::info!("{}", message);
    }
}

#[derive(Debug, Default)]
pub struct LogOverlay {
    drawn: usize,
}

impl OverlaySink for LogOverlay {
    fn clear(&mut self) {
        self.drawn = 0;
    }

    fn draw(&mut self, detection: &Detection) {
        self.drawn += 1;
        log::debug!("overlay #{} {}", self.drawn, detection);
    }
}

/// Numeric settings and initial state.
#[derive(Clone, Debug)]
pub struct PipelineSettings {
    pub layout: SensorLayout,
    pub vocabulary: Vocabulary,
    pub confidence_threshold: f32,
    pub iou_threshold: f32,
    pub max_distance: f32,
    pub surface_margin: f32,
    pub initial_mode: DetectionMode,
    pub announcements_enabled: bool,
    pub speech_rate: SpeechRate,
    /// Where the speech rate is persisted after every change.
    pub speech_prefs_path: Option<PathBuf>,
}

/// External collaborators owned by the assistant.
pub struct Collaborators {
    pub source: Box<dyn FrameSource>,
    pub engine: Box<dyn InferenceEngine>,
    pub scene: Box<dyn SpatialScene>,
    pub remote: Box<dyn RemoteRecognizer>,
    pub speech: Box<dyn SpeechEngine>,
    pub display: Box<dyn StatusDisplay>,
    pub overlay: Box<dyn OverlaySink>,
    pub dictation: Option<Box<dyn Dictation>>,
}

/// Result of one tick.
#[derive(Clone, Debug, Default)]
pub struct TickReport {
    /// A frame was available and its mode routine completed.
    pub processed: bool,
    pub detections: Vec<Detection>,
    /// Remote recognition result (text or face modes).
    pub recognized: Option<String>,
    pub fps: Option<f32>,
    /// An utterance was started this tick.
    pub spoke: bool,
}

pub struct Assistant {
    source: Box<dyn FrameSource>,
    engine: Box<dyn InferenceEngine>,
    scene: Box<dyn SpatialScene>,
    remote: Box<dyn RemoteRecognizer>,
    display: Box<dyn StatusDisplay>,
    overlay: Box<dyn OverlaySink>,
    dictation: Option<Box<dyn Dictation>>,
    decoder: CandidateDecoder,
    iou_threshold: f32,
    localizer: SpatialLocalizer,
    announcer: Announcer,
    modes: ModeCoordinator,
    navigator: Navigator,
    rate: SpeechRate,
    speech_prefs_path: Option<PathBuf>,
    detecting: bool,
    frames: u64,
}

impl Assistant {
    /// Wire the pipeline and validate the engine against the vocabulary and
    /// crop layout. Any mismatch is a configuration error.
    pub fn new(settings: PipelineSettings, parts: Collaborators) -> Result<Self> {
        let Collaborators {
            source,
            mut engine,
            scene,
            remote,
            speech,
            mut display,
            overlay,
            dictation,
        } = parts;

        if !(0.0..=1.0).contains(&settings.iou_threshold) {
            return Err(anyhow!(
                "IoU threshold {} outside [0, 1]",
                settings.iou_threshold
            ));
        }
        if engine.input_size() != settings.layout.crop_size {
            return Err(anyhow!(
                "{} engine expects {}px input, crop is {}px",
                engine.name(),
                engine.input_size(),
                settings.layout.crop_size
            ));
        }
        let decoder = CandidateDecoder::new(
            settings.vocabulary.clone(),
            settings.confidence_threshold,
        )?;
        engine.warm_up()?;
        match engine.num_classes() {
            Some(classes) => decoder.check_class_count(classes)?,
            None => {
                // Shape check on a blank crop stands in for model metadata.
                let side = settings.layout.crop_size as usize;
                let blank = vec![0u8; side * side * 3];
                let output = engine
                    .infer(&blank, settings.layout.crop_size)
                    .with_context(|| format!("{} engine startup inference", engine.name()))?;
                decoder.decode(output.view())?;
            }
        }

        let localizer = SpatialLocalizer::new(settings.layout)
            .with_range(settings.max_distance, settings.surface_margin);
        let mut announcer = Announcer::new(speech);
        announcer.set_rate(settings.speech_rate);
        announcer.set_enabled(settings.announcements_enabled, false)?;

        display.set_text(Surface::Mode, &status_text(settings.initial_mode));
        display.set_text(
            Surface::SpeechStatus,
            &announcement_status(settings.announcements_enabled),
        );
        display.set_text(Surface::SpeechRate, &settings.speech_rate.status_text());

        log::info!(
            "assistant ready: engine={} labels={} crop={} mode={}",
            engine.name(),
            settings.vocabulary.len(),
            settings.layout.crop_size,
            settings.initial_mode
        );

        Ok(Self {
            source,
            engine,
            scene,
            remote,
            display,
            overlay,
            dictation,
            decoder,
            iou_threshold: settings.iou_threshold,
            localizer,
            announcer,
            modes: ModeCoordinator::new(settings.initial_mode),
            navigator: Navigator::new(settings.vocabulary),
            rate: settings.speech_rate,
            speech_prefs_path: settings.speech_prefs_path,
            detecting: true,
            frames: 0,
        })
    }

    pub fn mode(&self) -> DetectionMode {
        self.modes.current()
    }

    pub fn is_detecting(&self) -> bool {
        self.detecting
    }

    pub fn announcer(&self) -> &Announcer {
        &self.announcer
    }

    pub fn announcer_mut(&mut self) -> &mut Announcer {
        &mut self.announcer
    }

    pub fn navigator(&self) -> &Navigator {
        &self.navigator
    }

    pub fn speech_rate(&self) -> SpeechRate {
        self.rate
    }

    pub fn frames_processed(&self) -> u64 {
        self.frames
    }

    /// Pause or resume per-frame detection. Speech keeps draining while paused.
    pub fn set_detecting(&mut self, detecting: bool) {
        if self.detecting != detecting {
            log::info!("detection {}", if detecting { "resumed" } else { "paused" });
        }
        self.detecting = detecting;
    }

    /// One pipeline pass.
    pub fn tick(&mut self) -> TickReport {
        let mut report = TickReport::default();
        self.overlay.clear();

        if self.detecting {
            match self.source.next_frame() {
                Ok(Some(frame)) => self.process(&frame, &mut report),
                Ok(None) => log::trace!("no frame available"),
                Err(e) => log::warn!("frame source error: {:#}", e),
            }
        }

        match self.announcer.pump() {
            Ok(spoke) => report.spoke = spoke,
            Err(e) => log::warn!("speech failed: {:#}", e),
        }
        report
    }

    fn process(&mut self, frame: &CapturedFrame, report: &mut TickReport) {
        let started = Instant::now();
        let outcome = match self.modes.current() {
            DetectionMode::ObjectDetection => self.detect_objects(frame).map(|detections| {
                let text = detections
                    .iter()
                    .map(Detection::announcement)
                    .collect::<Vec<_>>()
                    .join(" ");
                for detection in &detections {
                    self.overlay.draw(detection);
                }
                if let Some(found) = self.navigator.observe(&detections) {
                    self.speak(&found);
                }
                report.detections = detections;
                text
            }),
            DetectionMode::TextRecognition => frame
                .to_jpeg()
                .map(|jpeg| self.remote.recognize_text(&jpeg)),
            DetectionMode::FaceEmotion => frame
                .to_jpeg()
                .map(|jpeg| self.remote.recognize_emotion(&jpeg)),
        };

        let text = match outcome {
            Ok(text) => text,
            Err(e) => {
                log::warn!("skipping frame {}: {:#}", self.frames, e);
                return;
            }
        };
        if self.modes.current() != DetectionMode::ObjectDetection {
            if !text.is_empty() {
                self.display.log(&text, true);
            }
            report.recognized = Some(text.clone());
        }
        self.announcer.set_pending(text);
        self.frames += 1;
        report.processed = true;

        let elapsed = started.elapsed().as_secs_f32();
        if elapsed > 0.0 {
            let fps = 1.0 / elapsed;
            self.display.set_text(Surface::Fps, &format!("FPS: {:.1}", fps));
            report.fps = Some(fps);
        }
    }

    fn detect_objects(&mut self, frame: &CapturedFrame) -> Result<Vec<Detection>> {
        let layout = *self.localizer.layout();
        let crop = frame.center_crop(&layout)?;
        let output = self.engine.infer(&crop, layout.crop_size)?;
        let candidates = self.decoder.decode(output.view())?;
        let survivors = suppress(self.iou_threshold, candidates);

        let mut detections = Vec::with_capacity(survivors.len());
        for candidate in &survivors {
            let label = self.decoder.label(candidate)?;
            detections.push(self.localizer.localize(
                candidate,
                label,
                frame.pose(),
                self.scene.as_ref(),
            ));
        }
        log::debug!(
            "frame {}: {} detections kept",
            self.frames,
            detections.len()
        );
        Ok(detections)
    }

    /// Apply a voice or UI command.
    pub fn handle_command(&mut self, command: Command) {
        log::debug!("command {:?}", command);
        match command {
            Command::SwitchMode(mode) => self.switch_mode(mode, true),
            Command::AnnouncementsOn => self.set_announcements(true, true),
            Command::AnnouncementsOff => self.set_announcements(false, true),
            Command::SpeedUp => {
                if self.rate.speed_up() {
                    self.apply_rate();
                }
            }
            Command::SlowDown => {
                if self.rate.slow_down() {
                    self.apply_rate();
                }
            }
            Command::StartNavigation => {
                if let Some(step) = self.navigator.start() {
                    self.apply_navigation(step);
                }
            }
            Command::StopNavigation => {
                if let Some(step) = self.navigator.stop() {
                    self.apply_navigation(step);
                }
            }
            Command::StopSpeaking => self.announcer.stop(),
        }
    }

    /// Transcript from the dictation collaborator.
    pub fn on_dictation(&mut self, text: &str) {
        let step = self.navigator.on_dictation(text);
        self.apply_navigation(step);
    }

    /// Dictation session finished.
    pub fn on_dictation_complete(&mut self, text: &str) {
        if let Some(step) = self.navigator.on_dictation_complete(text) {
            self.apply_navigation(step);
        }
    }

    fn switch_mode(&mut self, mode: DetectionMode, announce: bool) {
        let Some(transition) = self.modes.transition(mode) else {
            return;
        };
        self.announcer.clear_pending();
        self.display.set_text(Surface::Mode, &transition.status_text);
        if announce {
            self.speak(&transition.announcement);
        }
    }

    fn set_announcements(&mut self, enabled: bool, confirm: bool) {
        match self.announcer.set_enabled(enabled, confirm) {
            Ok(status) => self.display.set_text(Surface::SpeechStatus, &status),
            Err(e) => log::warn!("announcement toggle failed: {:#}", e),
        }
    }

    fn apply_rate(&mut self) {
        self.announcer.set_rate(self.rate);
        self.display.set_text(Surface::SpeechRate, &self.rate.status_text());
        if let Some(path) = &self.speech_prefs_path {
            if let Err(e) = self.rate.save(path) {
                log::warn!("failed to persist speech rate: {:#}", e);
            }
        }
    }

    fn apply_navigation(&mut self, step: NavigationStep) {
        if let Some(transcript) = step.transcript {
            self.display.set_text(Surface::Transcript, &transcript);
        }
        if let Some(detecting) = step.detecting {
            self.set_detecting(detecting);
        }
        if step.switch_to_objects {
            self.switch_mode(DetectionMode::ObjectDetection, false);
        }
        if let Some(enabled) = step.announcements {
            self.set_announcements(enabled, false);
        }
        if let Some(text) = step.speak {
            self.speak(&text);
        }
        if step.start_dictation {
            match self.dictation.as_mut() {
                Some(dictation) => {
                    if let Err(e) = dictation.start_recording() {
                        log::warn!("dictation failed to start: {:#}", e);
                    }
                }
                None => log::warn!("no dictation engine attached"),
            }
        }
    }

    fn speak(&mut self, text: &str) {
        if let Err(e) = self.announcer.speak(text, true) {
            log::warn!("speech failed: {:#}", e);
        }
    }
}
