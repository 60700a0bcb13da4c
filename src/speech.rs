//! Announcement coordination.
//!
//! The `Announcer` is the only caller of the speech engine and guarantees that
//! at most one utterance plays at a time. The pipeline writes the pending
//! announcement slot every tick; `pump()` speaks it once the previous
//! utterance has signalled completion.
//!
//! - `SpeechEngine`: text-to-speech collaborator.
//! - `Utterance`: completion signal for one started utterance.
//! - `SpeechRate`: stepped playback rate with optional JSON persistence.

use std::collections::VecDeque;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};

/// Completion signal for one utterance.
///
/// The engine keeps the paired `UtteranceDone` and fires or drops it when
/// playback ends (normally or by being stopped).
#[derive(Debug)]
pub struct Utterance {
    done: Receiver<()>,
    finished: bool,
}

/// Engine side of an `Utterance`. Dropping it also completes the utterance.
#[derive(Debug)]
pub struct UtteranceDone {
    tx: Sender<()>,
}

impl UtteranceDone {
    pub fn finish(self) {
        let _ = self.tx.send(());
    }
}

impl Utterance {
    pub fn channel() -> (Utterance, UtteranceDone) {
        let (tx, rx) = mpsc::channel();
        (
            Utterance {
                done: rx,
                finished: false,
            },
            UtteranceDone { tx },
        )
    }

    /// Non-blocking completion check.
    pub fn is_finished(&mut self) -> bool {
        if !self.finished {
            match self.done.try_recv() {
                Ok(()) | Err(TryRecvError::Disconnected) => self.finished = true,
                Err(TryRecvError::Empty) => {}
            }
        }
        self.finished
    }

    /// Block until the utterance completes or `timeout` elapses.
    pub fn wait_timeout(&mut self, timeout: Duration) -> bool {
        if !self.finished {
            match self.done.recv_timeout(timeout) {
                Ok(()) | Err(RecvTimeoutError::Disconnected) => self.finished = true,
                Err(RecvTimeoutError::Timeout) => {}
            }
        }
        self.finished
    }
}

/// Text-to-speech collaborator.
pub trait SpeechEngine: Send {
    fn start_speaking(&mut self, text: &str) -> Result<Utterance>;
    fn stop_speaking(&mut self);
    fn is_speaking(&self) -> bool;

    /// Playback rate multiplier. Engines without rate control ignore it.
    fn set_rate(&mut self, _rate: f32) {}
}

pub const MIN_SPEECH_RATE: f32 = 0.0;
pub const MAX_SPEECH_RATE: f32 = 3.0;
pub const SPEECH_RATE_STEP: f32 = 0.25;
pub const DEFAULT_SPEECH_RATE: f32 = 1.5;

#[derive(Debug, Serialize, Deserialize)]
struct SpeechPrefsFile {
    rate: f32,
}

/// Playback rate in `[0, 3]`, stepped by 0.25.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SpeechRate(f32);

impl Default for SpeechRate {
    fn default() -> Self {
        Self(DEFAULT_SPEECH_RATE)
    }
}

impl SpeechRate {
    pub fn new(rate: f32) -> Result<Self> {
        if !(MIN_SPEECH_RATE..=MAX_SPEECH_RATE).contains(&rate) {
            return Err(anyhow!(
                "speech rate {} outside [{}, {}]",
                rate,
                MIN_SPEECH_RATE,
                MAX_SPEECH_RATE
            ));
        }
        Ok(Self(rate))
    }

    pub fn value(&self) -> f32 {
        self.0
    }

    /// Returns false when already at the maximum.
    pub fn speed_up(&mut self) -> bool {
        if self.0 < MAX_SPEECH_RATE {
            self.0 = (self.0 + SPEECH_RATE_STEP).min(MAX_SPEECH_RATE);
            return true;
        }
        false
    }

    /// Returns false when already at the minimum.
    pub fn slow_down(&mut self) -> bool {
        if self.0 > MIN_SPEECH_RATE {
            self.0 = (self.0 - SPEECH_RATE_STEP).max(MIN_SPEECH_RATE);
            return true;
        }
        false
    }

    pub fn status_text(&self) -> String {
        format!("speech speed: x{}", self.0)
    }

    /// Stored rate, or the default when the file does not exist yet.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("read speech preferences {}", path.display()))?;
        let prefs: SpeechPrefsFile = serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid speech preferences {}: {}", path.display(), e))?;
        Self::new(prefs.rate)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let raw = serde_json::to_string_pretty(&SpeechPrefsFile { rate: self.0 })?;
        std::fs::write(path, raw)
            .with_context(|| format!("write speech preferences {}", path.display()))
    }
}

/// Serializes spoken output.
pub struct Announcer {
    engine: Box<dyn SpeechEngine>,
    enabled: bool,
    pending: String,
    active: Option<Utterance>,
    deferred: VecDeque<String>,
}

impl Announcer {
    pub fn new(engine: Box<dyn SpeechEngine>) -> Self {
        Self {
            engine,
            enabled: true,
            pending: String::new(),
            active: None,
            deferred: VecDeque::new(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn pending(&self) -> &str {
        &self.pending
    }

    /// Replace the pending announcement. An empty string suppresses the next one.
    pub fn set_pending(&mut self, text: impl Into<String>) {
        self.pending = text.into();
    }

    pub fn clear_pending(&mut self) {
        self.pending.clear();
    }

    /// True while an utterance started here has not signalled completion.
    pub fn is_speaking(&mut self) -> bool {
        if let Some(active) = self.active.as_mut() {
            if active.is_finished() {
                self.active = None;
            }
        }
        self.active.is_some()
    }

    pub fn is_ready(&mut self) -> bool {
        self.enabled && !self.pending.is_empty() && !self.is_speaking()
    }

    /// Speak `text`. With `interrupt` any current utterance is cut off first;
    /// without it the text waits until the current utterance completes.
    pub fn speak(&mut self, text: &str, interrupt: bool) -> Result<()> {
        if interrupt {
            self.stop();
        } else if self.is_speaking() {
            log::debug!("queueing announcement behind current utterance");
            self.deferred.push_back(text.to_string());
            return Ok(());
        }
        self.start(text)
    }

    /// Stop the current utterance and drop anything queued behind it.
    pub fn stop(&mut self) {
        self.deferred.clear();
        if self.active.take().is_some() || self.engine.is_speaking() {
            self.engine.stop_speaking();
        }
    }

    /// Advance speech by one tick: start queued text once the current
    /// utterance finishes, otherwise speak the pending announcement if ready.
    pub fn pump(&mut self) -> Result<bool> {
        if self.is_speaking() {
            return Ok(false);
        }
        if let Some(next) = self.deferred.pop_front() {
            self.start(&next)?;
            return Ok(true);
        }
        if self.is_ready() {
            let text = self.pending.clone();
            self.start(&text)?;
            return Ok(true);
        }
        Ok(false)
    }

    /// Turn announcements on or off. Returns the status text for the display.
    pub fn set_enabled(&mut self, enabled: bool, confirm: bool) -> Result<String> {
        self.enabled = enabled;
        log::info!("announcements {}", if enabled { "on" } else { "off" });
        if confirm {
            self.speak(
                if enabled {
                    "announcements on"
                } else {
                    "announcements off"
                },
                true,
            )?;
        }
        Ok(announcement_status(enabled))
    }

    pub fn set_rate(&mut self, rate: SpeechRate) {
        self.engine.set_rate(rate.value());
    }

    fn start(&mut self, text: &str) -> Result<()> {
        let utterance = self.engine.start_speaking(text)?;
        self.active = Some(utterance);
        Ok(())
    }
}

pub fn announcement_status(enabled: bool) -> String {
    format!("announcements: {}", if enabled { "on" } else { "off" })
}

/// Speech engine that writes utterances to the log and holds them for an
/// estimated playback time.
pub struct LogSpeechEngine {
    rate: f32,
    generation: Arc<AtomicU64>,
    speaking: Arc<AtomicU64>,
    cancel: Option<Sender<()>>,
}

const WORDS_PER_SECOND: f32 = 2.5;

impl Default for LogSpeechEngine {
    fn default() -> Self {
        Self {
            rate: DEFAULT_SPEECH_RATE,
            generation: Arc::new(AtomicU64::new(0)),
            speaking: Arc::new(AtomicU64::new(0)),
            cancel: None,
        }
    }
}

impl LogSpeechEngine {
    fn playback_time(&self, text: &str) -> Duration {
        let words = text.split_whitespace().count().max(1) as f32;
        let rate = self.rate.max(SPEECH_RATE_STEP);
        Duration::from_secs_f32(words / (WORDS_PER_SECOND * rate))
    }
}

impl SpeechEngine for LogSpeechEngine {
    fn start_speaking(&mut self, text: &str) -> Result<Utterance> {
        self.stop_speaking();
        log::info!("speak: {}", text);

        let id = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.speaking.store(id, Ordering::SeqCst);
        let (utterance, done) = Utterance::channel();
        let (cancel_tx, cancel_rx) = mpsc::channel::<()>();
        let speaking = Arc::clone(&self.speaking);
        let playback = self.playback_time(text);
        std::thread::Builder::new()
            .name("speech-playback".to_string())
            .spawn(move || {
                let _ = cancel_rx.recv_timeout(playback);
                // Only clear the flag if no newer utterance has started.
                let _ = speaking.compare_exchange(id, 0, Ordering::SeqCst, Ordering::SeqCst);
                done.finish();
            })
            .context("spawn speech playback thread")?;
        self.cancel = Some(cancel_tx);
        Ok(utterance)
    }

    fn stop_speaking(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            let _ = cancel.send(());
        }
        self.speaking.store(0, Ordering::SeqCst);
    }

    fn is_speaking(&self) -> bool {
        self.speaking.load(Ordering::SeqCst) != 0
    }

    fn set_rate(&mut self, rate: f32) {
        self.rate = rate;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Shared {
        spoken: Vec<String>,
        stops: usize,
        handles: Vec<UtteranceDone>,
    }

    /// Engine whose utterances finish only when the test says so.
    #[derive(Clone, Default)]
    struct ManualEngine(Arc<Mutex<Shared>>);

    impl ManualEngine {
        fn finish_current(&self) {
            if let Some(done) = self.0.lock().unwrap().handles.pop() {
                done.finish();
            }
        }
        fn spoken(&self) -> Vec<String> {
            self.0.lock().unwrap().spoken.clone()
        }
    }

    impl SpeechEngine for ManualEngine {
        fn start_speaking(&mut self, text: &str) -> Result<Utterance> {
            let (utterance, done) = Utterance::channel();
            let mut shared = self.0.lock().unwrap();
            shared.spoken.push(text.to_string());
            shared.handles.push(done);
            Ok(utterance)
        }
        fn stop_speaking(&mut self) {
            let mut shared = self.0.lock().unwrap();
            shared.stops += 1;
            shared.handles.clear();
        }
        fn is_speaking(&self) -> bool {
            !self.0.lock().unwrap().handles.is_empty()
        }
    }

    fn announcer() -> (Announcer, ManualEngine) {
        let engine = ManualEngine::default();
        (Announcer::new(Box::new(engine.clone())), engine)
    }

    #[test]
    fn not_ready_without_pending_text() {
        let (mut a, _) = announcer();
        assert!(!a.is_ready());
        a.set_pending("cat front 1.00 meters");
        assert!(a.is_ready());
        a.set_pending("");
        assert!(!a.is_ready());
    }

    #[test]
    fn not_ready_while_disabled_or_speaking() {
        let (mut a, engine) = announcer();
        a.set_pending("cup");
        a.set_enabled(false, false).unwrap();
        assert!(!a.is_ready());
        a.set_enabled(true, false).unwrap();
        assert!(a.pump().unwrap());
        assert!(!a.is_ready());
        engine.finish_current();
        assert!(a.is_ready());
    }

    #[test]
    fn interrupting_speak_stops_previous() {
        let (mut a, engine) = announcer();
        a.speak("first", true).unwrap();
        assert!(a.is_speaking());
        a.speak("second", true).unwrap();
        assert!(a.is_speaking());
        assert_eq!(engine.spoken(), vec!["first", "second"]);
        assert_eq!(engine.0.lock().unwrap().stops, 1);
    }

    #[test]
    fn non_interrupting_speak_waits_for_completion() {
        let (mut a, engine) = announcer();
        a.speak("long announcement", true).unwrap();
        a.speak("start text recognition", false).unwrap();
        assert_eq!(engine.spoken(), vec!["long announcement"]);
        assert!(!a.pump().unwrap());
        engine.finish_current();
        assert!(a.pump().unwrap());
        assert_eq!(
            engine.spoken(),
            vec!["long announcement", "start text recognition"]
        );
    }

    #[test]
    fn pending_is_not_consumed_until_utterance_completes() {
        let (mut a, engine) = announcer();
        a.set_pending("one");
        assert!(a.pump().unwrap());
        a.set_pending("two");
        assert!(!a.pump().unwrap());
        a.set_pending("three");
        engine.finish_current();
        assert!(a.pump().unwrap());
        assert_eq!(engine.spoken(), vec!["one", "three"]);
    }

    #[test]
    fn toggle_confirms_when_asked() {
        let (mut a, engine) = announcer();
        assert_eq!(a.set_enabled(false, true).unwrap(), "announcements: off");
        assert_eq!(a.set_enabled(true, false).unwrap(), "announcements: on");
        assert_eq!(engine.spoken(), vec!["announcements off"]);
    }

    #[test]
    fn rate_steps_and_clamps() {
        let mut rate = SpeechRate::default();
        assert_eq!(rate.value(), 1.5);
        for _ in 0..6 {
            rate.speed_up();
        }
        assert_eq!(rate.value(), 3.0);
        assert!(!rate.speed_up());
        let mut low = SpeechRate::new(0.25).unwrap();
        assert!(low.slow_down());
        assert!(!low.slow_down());
        assert_eq!(low.value(), 0.0);
        assert!(SpeechRate::new(3.5).is_err());
        assert_eq!(rate.status_text(), "speech speed: x3");
    }

    #[test]
    fn rate_persists_as_json() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let mut rate = SpeechRate::default();
        rate.slow_down();
        rate.save(file.path()).unwrap();
        assert_eq!(SpeechRate::load(file.path()).unwrap().value(), 1.25);
        let missing = file.path().with_extension("missing");
        assert_eq!(SpeechRate::load(&missing).unwrap(), SpeechRate::default());
    }

    #[test]
    fn log_engine_reports_speaking_until_stopped() {
        let mut engine = LogSpeechEngine::default();
        let mut utterance = engine
            .start_speaking("a fairly long sentence with many words in it")
            .unwrap();
        assert!(engine.is_speaking());
        engine.stop_speaking();
        assert!(!engine.is_speaking());
        assert!(utterance.wait_timeout(Duration::from_secs(5)));
    }
}
