use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Result};
use nalgebra::{Matrix3, Point3, Rotation3, Vector3};
use ndarray::ArrayD;

use sightline::{
    Assistant, CameraPose, CapturedFrame, Collaborators, Command, Detection, DetectionMode,
    Dictation, FrameSource, InferenceEngine, OverlaySink, PipelineSettings, Plane, PlaneScene,
    RemoteRecognizer, SensorLayout, SpeechEngine, SpeechRate, StatusDisplay, StubEngine,
    Surface, Utterance, UtteranceDone, Vocabulary,
};

const WIDTH: u32 = 424;
const HEIGHT: u32 = 240;
const CROP: u32 = 160;
const CUP: usize = 7;
const CHAIR: usize = 15;
const CAT: usize = 0;

type FrameQueue = Arc<Mutex<VecDeque<Result<Option<CapturedFrame>>>>>;

struct ScriptedSource {
    frames: FrameQueue,
    pulled: Arc<AtomicUsize>,
}

impl FrameSource for ScriptedSource {
    fn next_frame(&mut self) -> Result<Option<CapturedFrame>> {
        self.pulled.fetch_add(1, Ordering::SeqCst);
        self.frames.lock().unwrap().pop_front().unwrap_or(Ok(None))
    }
}

struct SharedEngine(Arc<Mutex<StubEngine>>);

impl InferenceEngine for SharedEngine {
    fn name(&self) -> &'static str {
        "shared-stub"
    }
    fn input_size(&self) -> u32 {
        self.0.lock().unwrap().input_size()
    }
    fn num_classes(&self) -> Option<usize> {
        self.0.lock().unwrap().num_classes()
    }
    fn infer(&mut self, rgb: &[u8], size: u32) -> Result<ArrayD<f32>> {
        self.0.lock().unwrap().infer(rgb, size)
    }
}

#[derive(Default)]
struct SpeechLog {
    spoken: Vec<String>,
    stops: usize,
    rate: Option<f32>,
    handles: Vec<UtteranceDone>,
}

#[derive(Clone, Default)]
struct RecordingSpeech(Arc<Mutex<SpeechLog>>);

impl RecordingSpeech {
    fn finish_all(&self) {
        for done in self.0.lock().unwrap().handles.drain(..) {
            done.finish();
        }
    }
    fn spoken(&self) -> Vec<String> {
        self.0.lock().unwrap().spoken.clone()
    }
}

impl SpeechEngine for RecordingSpeech {
    fn start_speaking(&mut self, text: &str) -> Result<Utterance> {
        let (utterance, done) = Utterance::channel();
        let mut log = self.0.lock().unwrap();
        log.spoken.push(text.to_string());
        log.handles.push(done);
        Ok(utterance)
    }
    fn stop_speaking(&mut self) {
        let mut log = self.0.lock().unwrap();
        log.stops += 1;
        log.handles.clear();
    }
    fn is_speaking(&self) -> bool {
        !self.0.lock().unwrap().handles.is_empty()
    }
    fn set_rate(&mut self, rate: f32) {
        self.0.lock().unwrap().rate = Some(rate);
    }
}

#[derive(Default)]
struct RemoteScript {
    text: String,
    emotion: String,
    calls: usize,
}

struct FakeRemote(Arc<Mutex<RemoteScript>>);

impl RemoteRecognizer for FakeRemote {
    fn recognize_text(&mut self, jpeg: &[u8]) -> String {
        assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);
        let mut script = self.0.lock().unwrap();
        script.calls += 1;
        script.text.clone()
    }
    fn recognize_emotion(&mut self, _jpeg: &[u8]) -> String {
        let mut script = self.0.lock().unwrap();
        script.calls += 1;
        script.emotion.clone()
    }
}

#[derive(Default)]
struct DisplayLog {
    surfaces: Vec<(Surface, String)>,
    debug: Vec<String>,
}

struct RecordingDisplay(Arc<Mutex<DisplayLog>>);

impl StatusDisplay for RecordingDisplay {
    fn set_text(&mut self, surface: Surface, text: &str) {
        self.0
            .lock()
            .unwrap()
            .surfaces
            .push((surface, text.to_string()));
    }
    fn log(&mut self, message: &str, clear: bool) {
        let mut log = self.0.lock().unwrap();
        if clear {
            log.debug.clear();
        }
        log.debug.push(message.to_string());
    }
}

#[derive(Default)]
struct OverlayLog {
    clears: usize,
    drawn: Vec<String>,
}

struct RecordingOverlay(Arc<Mutex<OverlayLog>>);

impl OverlaySink for RecordingOverlay {
    fn clear(&mut self) {
        let mut log = self.0.lock().unwrap();
        log.clears += 1;
        log.drawn.clear();
    }
    fn draw(&mut self, detection: &Detection) {
        self.0.lock().unwrap().drawn.push(detection.to_string());
    }
}

struct CountingDictation(Arc<AtomicUsize>);

impl Dictation for CountingDictation {
    fn start_recording(&mut self) -> Result<()> {
        self.0.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

struct Harness {
    assistant: Assistant,
    frames: FrameQueue,
    pulled: Arc<AtomicUsize>,
    engine: Arc<Mutex<StubEngine>>,
    speech: RecordingSpeech,
    remote: Arc<Mutex<RemoteScript>>,
    display: Arc<Mutex<DisplayLog>>,
    overlay: Arc<Mutex<OverlayLog>>,
    dictation_starts: Arc<AtomicUsize>,
}

fn settings() -> PipelineSettings {
    PipelineSettings {
        layout: SensorLayout::new(WIDTH, HEIGHT, CROP).unwrap(),
        vocabulary: Vocabulary::default(),
        confidence_threshold: 0.2,
        iou_threshold: 0.5,
        max_distance: 10.0,
        surface_margin: 0.05,
        initial_mode: DetectionMode::ObjectDetection,
        announcements_enabled: true,
        speech_rate: SpeechRate::default(),
        speech_prefs_path: None,
    }
}

/// Walls two meters ahead (+Z) and three meters to the right (+X).
fn room() -> PlaneScene {
    PlaneScene::new(Point3::origin())
        .with_plane(Plane::new(Point3::new(0.0, 0.0, 2.0), -Vector3::z()))
        .with_plane(Plane::new(Point3::new(3.0, 0.0, 0.0), -Vector3::x()))
}

fn harness_with(settings: PipelineSettings) -> Result<Harness> {
    let frames: FrameQueue = Arc::new(Mutex::new(VecDeque::new()));
    let pulled = Arc::new(AtomicUsize::new(0));
    let engine = Arc::new(Mutex::new(StubEngine::new(
        settings.layout.crop_size,
        settings.vocabulary.len(),
    )));
    let speech = RecordingSpeech::default();
    let remote = Arc::new(Mutex::new(RemoteScript::default()));
    let display = Arc::new(Mutex::new(DisplayLog::default()));
    let overlay = Arc::new(Mutex::new(OverlayLog::default()));
    let dictation_starts = Arc::new(AtomicUsize::new(0));

    let assistant = Assistant::new(
        settings,
        Collaborators {
            source: Box::new(ScriptedSource {
                frames: Arc::clone(&frames),
                pulled: Arc::clone(&pulled),
            }),
            engine: Box::new(SharedEngine(Arc::clone(&engine))),
            scene: Box::new(room()),
            remote: Box::new(FakeRemote(Arc::clone(&remote))),
            speech: Box::new(speech.clone()),
            display: Box::new(RecordingDisplay(Arc::clone(&display))),
            overlay: Box::new(RecordingOverlay(Arc::clone(&overlay))),
            dictation: Some(Box::new(CountingDictation(Arc::clone(&dictation_starts)))),
        },
    )?;
    Ok(Harness {
        assistant,
        frames,
        pulled,
        engine,
        speech,
        remote,
        display,
        overlay,
        dictation_starts,
    })
}

fn harness() -> Harness {
    harness_with(settings()).expect("assistant")
}

fn forward_pose() -> CameraPose {
    CameraPose::pinhole(Point3::origin(), Matrix3::identity(), 1.0, 1.0).unwrap()
}

fn turned_right_pose() -> CameraPose {
    let rotation = Rotation3::from_axis_angle(&Vector3::y_axis(), 90f32.to_radians());
    CameraPose::pinhole(Point3::origin(), rotation.into_inner(), 1.0, 1.0).unwrap()
}

impl Harness {
    fn push_frame(&self, pose: CameraPose) {
        let frame = CapturedFrame::new(
            vec![90u8; (WIDTH * HEIGHT * 3) as usize],
            WIDTH,
            HEIGHT,
            pose,
        )
        .unwrap();
        self.frames.lock().unwrap().push_back(Ok(Some(frame)));
    }

    fn push_output(&self, rows: &[(f32, f32, f32, f32, usize, f32)]) {
        let classes = Vocabulary::default().len();
        let output = StubEngine::tensor_from_rows(classes, rows).unwrap();
        self.engine.lock().unwrap().push_output(output);
    }

    fn surface_texts(&self, surface: Surface) -> Vec<String> {
        self.display
            .lock()
            .unwrap()
            .surfaces
            .iter()
            .filter(|(s, _)| *s == surface)
            .map(|(_, text)| text.clone())
            .collect()
    }
}

#[test]
fn object_frame_is_decoded_suppressed_localized_and_announced() {
    let mut h = harness();
    h.push_frame(forward_pose());
    h.push_output(&[
        (80.0, 80.0, 20.0, 20.0, CUP, 0.9),
        // Heavy overlap with the cup, lower confidence.
        (81.0, 81.0, 20.0, 20.0, CHAIR, 0.8),
        (20.0, 80.0, 10.0, 10.0, CAT, 0.5),
        // Below the confidence threshold.
        (140.0, 140.0, 10.0, 10.0, CHAIR, 0.1),
    ]);

    let report = h.assistant.tick();
    assert!(report.processed);
    assert!(report.fps.is_some());
    let labels: Vec<&str> = report.detections.iter().map(|d| d.label.as_str()).collect();
    assert_eq!(labels, vec!["cup", "cat"]);

    let cup = &report.detections[0];
    assert!(cup.is_located());
    assert!((cup.center.z - 1.95).abs() < 0.05);
    assert_eq!(cup.direction.to_string(), "front");

    let pending = h.assistant.announcer().pending().to_string();
    assert!(pending.starts_with("cup front 1.9"), "{}", pending);
    assert!(pending.contains(" meters cat "), "{}", pending);

    // The announcer was idle, so the tick spoke the frame's text right away.
    assert!(report.spoke);
    assert_eq!(h.speech.spoken(), vec![pending]);

    let overlay = h.overlay.lock().unwrap();
    assert_eq!(overlay.clears, 1);
    assert_eq!(overlay.drawn.len(), 2);
    assert!(overlay.drawn[0].starts_with("cup:0.90[distance:1.9"));
    drop(overlay);
    assert_eq!(h.surface_texts(Surface::Fps).len(), 1);
}

#[test]
fn each_frame_is_localized_with_its_own_pose() {
    let mut h = harness();
    h.push_frame(forward_pose());
    h.push_frame(turned_right_pose());
    h.push_output(&[(80.0, 80.0, 20.0, 20.0, CUP, 0.9)]);
    h.push_output(&[(80.0, 80.0, 20.0, 20.0, CUP, 0.9)]);

    let first = h.assistant.tick();
    let second = h.assistant.tick();

    let ahead = first.detections[0].center;
    assert!((ahead.z - 1.95).abs() < 0.05 && ahead.x.abs() < 1e-3);
    let right = second.detections[0].center;
    assert!((right.x - 2.95).abs() < 0.05 && right.z.abs() < 1e-3);
    // Looking back from an object on the right faces -X: yaw 270.
    assert_eq!(second.detections[0].direction.to_string(), "rightfront");
}

#[test]
fn empty_frame_leaves_announcer_not_ready() {
    let mut h = harness();
    h.push_frame(forward_pose());
    let report = h.assistant.tick();
    assert!(report.processed);
    assert!(report.detections.is_empty());
    assert_eq!(h.assistant.announcer().pending(), "");
    assert!(!h.assistant.announcer_mut().is_ready());
    assert!(h.speech.spoken().is_empty());
}

#[test]
fn missing_or_failed_frames_skip_the_cycle() {
    let mut h = harness();
    h.assistant.announcer_mut().set_pending("stale");
    h.assistant.announcer_mut().set_enabled(false, false).unwrap();

    let report = h.assistant.tick();
    assert!(!report.processed);

    h.frames
        .lock()
        .unwrap()
        .push_back(Err(anyhow!("camera unplugged")));
    let report = h.assistant.tick();
    assert!(!report.processed);

    // Engine failure: wrong output shape for this vocabulary.
    h.push_frame(forward_pose());
    h.engine
        .lock()
        .unwrap()
        .push_output(ArrayD::zeros(ndarray::IxDyn(&[1, 1, 1, 9])));
    let report = h.assistant.tick();
    assert!(!report.processed);

    assert_eq!(h.assistant.announcer().pending(), "stale");
    assert_eq!(h.assistant.frames_processed(), 0);

    // The pipeline keeps going afterwards.
    h.push_frame(forward_pose());
    assert!(h.assistant.tick().processed);
}

#[test]
fn same_mode_switch_is_silent() {
    let mut h = harness();
    h.assistant.announcer_mut().set_pending("cup front 1.00 meters");
    let mode_updates = h.surface_texts(Surface::Mode).len();

    h.assistant
        .handle_command(Command::SwitchMode(DetectionMode::ObjectDetection));

    assert!(h.speech.spoken().is_empty());
    assert_eq!(h.assistant.announcer().pending(), "cup front 1.00 meters");
    assert_eq!(h.surface_texts(Surface::Mode).len(), mode_updates);
}

#[test]
fn switching_to_text_mode_interrupts_and_uses_remote_text() {
    let mut h = harness();
    h.push_frame(forward_pose());
    h.push_output(&[(80.0, 80.0, 20.0, 20.0, CUP, 0.9)]);
    h.assistant.tick();
    assert_eq!(h.speech.spoken().len(), 1);

    h.assistant
        .handle_command(Command::SwitchMode(DetectionMode::TextRecognition));
    assert_eq!(h.assistant.mode(), DetectionMode::TextRecognition);
    assert_eq!(h.assistant.announcer().pending(), "");
    assert_eq!(h.speech.0.lock().unwrap().stops, 1);
    assert_eq!(
        h.speech.spoken().last().map(String::as_str),
        Some("start text recognition")
    );
    assert_eq!(
        h.surface_texts(Surface::Mode).last().map(String::as_str),
        Some("mode: text recognition")
    );

    h.remote.lock().unwrap().text = "EXITdoor".to_string();
    h.push_frame(forward_pose());
    let report = h.assistant.tick();
    assert_eq!(report.recognized.as_deref(), Some("EXITdoor"));
    assert_eq!(h.assistant.announcer().pending(), "EXITdoor");
    // Confirmation still playing: the recognized text waits.
    assert!(!report.spoke);

    h.speech.finish_all();
    assert!(h.assistant.tick().spoke);
    assert_eq!(h.speech.spoken().last().map(String::as_str), Some("EXITdoor"));
    assert_eq!(h.display.lock().unwrap().debug, vec!["EXITdoor".to_string()]);
}

#[test]
fn failed_remote_call_suppresses_announcement() {
    let mut settings = settings();
    settings.initial_mode = DetectionMode::FaceEmotion;
    let mut h = harness_with(settings).unwrap();
    h.assistant.announcer_mut().set_pending("old");

    h.push_frame(forward_pose());
    let report = h.assistant.tick();
    assert!(report.processed);
    assert_eq!(report.recognized.as_deref(), Some(""));
    assert_eq!(h.assistant.announcer().pending(), "");
    assert!(h.speech.spoken().is_empty());
    assert_eq!(h.remote.lock().unwrap().calls, 1);

    h.remote.lock().unwrap().emotion = "happy".to_string();
    h.push_frame(forward_pose());
    h.assistant.tick();
    assert_eq!(h.speech.spoken(), vec!["happy"]);
}

#[test]
fn no_new_announcement_until_previous_completes() {
    let mut h = harness();
    for _ in 0..3 {
        h.push_frame(forward_pose());
    }
    h.push_output(&[(80.0, 80.0, 20.0, 20.0, CUP, 0.9)]);
    h.push_output(&[(80.0, 80.0, 20.0, 20.0, CHAIR, 0.9)]);
    h.push_output(&[(20.0, 80.0, 10.0, 10.0, CAT, 0.9)]);

    assert!(h.assistant.tick().spoke);
    assert!(!h.assistant.tick().spoke);
    h.speech.finish_all();
    assert!(h.assistant.tick().spoke);

    let spoken = h.speech.spoken();
    assert_eq!(spoken.len(), 2);
    assert!(spoken[0].starts_with("cup"));
    assert!(spoken[1].starts_with("cat"));
}

#[test]
fn announcement_toggle_and_speech_rate_commands() {
    let prefs = tempfile::NamedTempFile::new().unwrap();
    let mut settings = settings();
    settings.speech_prefs_path = Some(prefs.path().to_path_buf());
    let mut h = harness_with(settings).unwrap();

    h.assistant.handle_command(Command::AnnouncementsOff);
    assert!(!h.assistant.announcer().is_enabled());
    assert_eq!(h.speech.spoken(), vec!["announcements off"]);
    assert_eq!(
        h.surface_texts(Surface::SpeechStatus).last().map(String::as_str),
        Some("announcements: off")
    );

    h.push_frame(forward_pose());
    h.push_output(&[(80.0, 80.0, 20.0, 20.0, CUP, 0.9)]);
    h.speech.finish_all();
    assert!(!h.assistant.tick().spoke);

    h.assistant.handle_command(Command::SpeedUp);
    assert_eq!(h.assistant.speech_rate().value(), 1.75);
    assert_eq!(h.speech.0.lock().unwrap().rate, Some(1.75));
    assert_eq!(SpeechRate::load(prefs.path()).unwrap().value(), 1.75);
    assert_eq!(
        h.surface_texts(Surface::SpeechRate).last().map(String::as_str),
        Some("speech speed: x1.75")
    );

    h.assistant.handle_command(Command::AnnouncementsOn);
    assert!(h.assistant.announcer_mut().is_speaking());
    let stops = h.speech.0.lock().unwrap().stops;
    h.assistant.handle_command(Command::StopSpeaking);
    assert!(!h.assistant.announcer_mut().is_speaking());
    assert_eq!(h.speech.0.lock().unwrap().stops, stops + 1);
}

#[test]
fn navigation_pauses_detection_until_target_is_named() {
    let mut h = harness();
    h.assistant.handle_command(Command::StartNavigation);
    assert!(!h.assistant.is_detecting());
    assert_eq!(h.dictation_starts.load(Ordering::SeqCst), 1);
    assert_eq!(
        h.speech.spoken(),
        vec!["please tell me what you are looking for"]
    );

    h.push_frame(forward_pose());
    let pulled = h.pulled.load(Ordering::SeqCst);
    let report = h.assistant.tick();
    assert!(!report.processed);
    assert_eq!(h.pulled.load(Ordering::SeqCst), pulled);
    assert_eq!(h.overlay.lock().unwrap().clears, 1);

    h.assistant.on_dictation("where is my cup");
    h.assistant.on_dictation_complete("where is my cup");
    assert!(h.assistant.is_detecting());
    assert_eq!(h.assistant.navigator().target(), Some("cup"));
    assert_eq!(
        h.speech.spoken().last().map(String::as_str),
        Some("looking for cup, please turn your head")
    );
    assert_eq!(
        h.surface_texts(Surface::Transcript).last().map(String::as_str),
        Some("heard: where is my cup")
    );

    h.push_output(&[(80.0, 80.0, 20.0, 20.0, CUP, 0.9)]);
    h.assistant.tick();
    let found = h.speech.spoken().last().cloned().unwrap();
    assert!(found.starts_with("found cup front 1.9"), "{}", found);
    assert!(h.assistant.navigator().anchor().is_some());

    h.assistant.handle_command(Command::StopNavigation);
    assert_eq!(
        h.speech.spoken().last().map(String::as_str),
        Some("navigation stopped")
    );
    assert!(h.assistant.navigator().target().is_none());
}

#[test]
fn stopping_navigation_before_a_target_resumes_detection() {
    let mut h = harness();
    h.assistant.handle_command(Command::StartNavigation);
    assert!(!h.assistant.is_detecting());
    h.assistant.handle_command(Command::StopNavigation);
    assert!(h.assistant.is_detecting());
    assert_eq!(
        h.speech.spoken().last().map(String::as_str),
        Some("navigation stopped")
    );

    h.push_frame(forward_pose());
    h.push_output(&[(80.0, 80.0, 20.0, 20.0, CUP, 0.9)]);
    let processed = (0..5).any(|_| h.assistant.tick().processed);
    assert!(processed);
    assert_eq!(h.engine.lock().unwrap().calls(), 1);
}

/// Engine whose model does not expose a class count.
struct UnlabeledEngine {
    columns: usize,
}

impl InferenceEngine for UnlabeledEngine {
    fn name(&self) -> &'static str {
        "unlabeled"
    }
    fn input_size(&self) -> u32 {
        CROP
    }
    fn infer(&mut self, _rgb: &[u8], _size: u32) -> Result<ArrayD<f32>> {
        Ok(ArrayD::zeros(ndarray::IxDyn(&[1, 1, 0, self.columns])))
    }
}

fn assistant_with_engine(engine: Box<dyn InferenceEngine>) -> Result<Assistant> {
    Assistant::new(
        settings(),
        Collaborators {
            source: Box::new(ScriptedSource {
                frames: Arc::default(),
                pulled: Arc::new(AtomicUsize::new(0)),
            }),
            engine,
            scene: Box::new(room()),
            remote: Box::new(FakeRemote(Arc::default())),
            speech: Box::new(RecordingSpeech::default()),
            display: Box::new(RecordingDisplay(Arc::default())),
            overlay: Box::new(RecordingOverlay(Arc::default())),
            dictation: None,
        },
    )
}

#[test]
fn startup_checks_output_shape_when_class_count_is_unknown() {
    let err = assistant_with_engine(Box::new(UnlabeledEngine { columns: 4 + 80 }))
        .err()
        .expect("column mismatch");
    assert!(err.to_string().contains("model/vocabulary mismatch"));

    assert!(assistant_with_engine(Box::new(UnlabeledEngine { columns: 4 + 31 })).is_ok());
}

#[test]
fn startup_rejects_mismatched_engine() {
    let mut wrong_labels = settings();
    wrong_labels.vocabulary = Vocabulary::new(["cup", "chair"]).unwrap();
    let frames: FrameQueue = Arc::new(Mutex::new(VecDeque::new()));
    let result = Assistant::new(
        wrong_labels,
        Collaborators {
            source: Box::new(ScriptedSource {
                frames,
                pulled: Arc::new(AtomicUsize::new(0)),
            }),
            engine: Box::new(StubEngine::new(CROP, 31)),
            scene: Box::new(room()),
            remote: Box::new(FakeRemote(Arc::default())),
            speech: Box::new(RecordingSpeech::default()),
            display: Box::new(RecordingDisplay(Arc::default())),
            overlay: Box::new(RecordingOverlay(Arc::default())),
            dictation: None,
        },
    );
    let err = result.err().expect("class count mismatch");
    assert!(err.to_string().contains("model/vocabulary mismatch"));

    let mut wrong_crop = settings();
    wrong_crop.layout = SensorLayout::new(WIDTH, HEIGHT, 128).unwrap();
    let frames: FrameQueue = Arc::new(Mutex::new(VecDeque::new()));
    let result = Assistant::new(
        wrong_crop,
        Collaborators {
            source: Box::new(ScriptedSource {
                frames,
                pulled: Arc::new(AtomicUsize::new(0)),
            }),
            engine: Box::new(StubEngine::new(CROP, 31)),
            scene: Box::new(room()),
            remote: Box::new(FakeRemote(Arc::default())),
            speech: Box::new(RecordingSpeech::default()),
            display: Box::new(RecordingDisplay(Arc::default())),
            overlay: Box::new(RecordingOverlay(Arc::default())),
            dictation: None,
        },
    );
    assert!(result.is_err());
}
