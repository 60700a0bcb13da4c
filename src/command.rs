//! Voice and UI commands.

use crate::mode::DetectionMode;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Command {
    SwitchMode(DetectionMode),
    AnnouncementsOn,
    AnnouncementsOff,
    SpeedUp,
    SlowDown,
    StartNavigation,
    StopNavigation,
    StopSpeaking,
}

/// Keyword phrases, checked in order. More specific phrases come first.
const PHRASES: &[(&str, Command)] = &[
    ("stop navigation", Command::StopNavigation),
    ("stop navigating", Command::StopNavigation),
    ("start navigation", Command::StartNavigation),
    ("navigate", Command::StartNavigation),
    ("find something", Command::StartNavigation),
    ("announcements off", Command::AnnouncementsOff),
    ("turn off announcements", Command::AnnouncementsOff),
    ("close speech", Command::AnnouncementsOff),
    ("announcements on", Command::AnnouncementsOn),
    ("turn on announcements", Command::AnnouncementsOn),
    ("open speech", Command::AnnouncementsOn),
    ("stop speaking", Command::StopSpeaking),
    ("be quiet", Command::StopSpeaking),
    ("speed up", Command::SpeedUp),
    ("faster", Command::SpeedUp),
    ("slow down", Command::SlowDown),
    ("slower", Command::SlowDown),
    ("text recognition", Command::SwitchMode(DetectionMode::TextRecognition)),
    ("read text", Command::SwitchMode(DetectionMode::TextRecognition)),
    ("emotion", Command::SwitchMode(DetectionMode::FaceEmotion)),
    ("face", Command::SwitchMode(DetectionMode::FaceEmotion)),
    ("object detection", Command::SwitchMode(DetectionMode::ObjectDetection)),
    ("detect objects", Command::SwitchMode(DetectionMode::ObjectDetection)),
];

impl Command {
    /// Map a spoken or typed phrase to a command, if it contains a known keyword.
    pub fn parse(phrase: &str) -> Option<Command> {
        let normalized = phrase
            .to_lowercase()
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ");
        PHRASES
            .iter()
            .find(|(keyword, _)| normalized.contains(keyword))
            .map(|(_, command)| *command)
    }
}
