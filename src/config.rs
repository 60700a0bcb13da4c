use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

use crate::detect::Vocabulary;
use crate::localize::{SensorLayout, DEFAULT_MAX_DISTANCE, DEFAULT_SURFACE_MARGIN};
use crate::mode::DetectionMode;
use crate::pipeline::PipelineSettings;
use crate::speech::{SpeechRate, DEFAULT_SPEECH_RATE};

const DEFAULT_SENSOR_WIDTH: u32 = 424;
const DEFAULT_SENSOR_HEIGHT: u32 = 240;
const DEFAULT_CROP_SIZE: u32 = 160;
const DEFAULT_CONFIDENCE: f32 = 0.2;
const DEFAULT_IOU: f32 = 0.5;
const DEFAULT_REMOTE_URL: &str = "http://127.0.0.1:5000";
const DEFAULT_REMOTE_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, Deserialize, Default)]
struct SightlineConfigFile {
    mode: Option<DetectionMode>,
    sensor: Option<SensorConfigFile>,
    detection: Option<DetectionConfigFile>,
    localization: Option<LocalizationConfigFile>,
    remote: Option<RemoteConfigFile>,
    speech: Option<SpeechConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct SensorConfigFile {
    width: Option<u32>,
    height: Option<u32>,
    crop_size: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct DetectionConfigFile {
    confidence_threshold: Option<f32>,
    iou_threshold: Option<f32>,
    model_path: Option<PathBuf>,
    labels: Option<Vec<String>>,
}

#[derive(Debug, Deserialize, Default)]
struct LocalizationConfigFile {
    max_distance: Option<f32>,
    surface_margin: Option<f32>,
}

#[derive(Debug, Deserialize, Default)]
struct RemoteConfigFile {
    base_url: Option<String>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct SpeechConfigFile {
    rate: Option<f32>,
    announcements: Option<bool>,
    prefs_path: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct SightlineConfig {
    pub initial_mode: DetectionMode,
    pub sensor: SensorSettings,
    pub detection: DetectionSettings,
    pub localization: LocalizationSettings,
    pub remote: RemoteSettings,
    pub speech: SpeechSettings,
}

#[derive(Debug, Clone)]
pub struct SensorSettings {
    pub width: u32,
    pub height: u32,
    pub crop_size: u32,
}

#[derive(Debug, Clone)]
pub struct DetectionSettings {
    pub confidence_threshold: f32,
    pub iou_threshold: f32,
    pub model_path: Option<PathBuf>,
    pub labels: Vocabulary,
}

#[derive(Debug, Clone)]
pub struct LocalizationSettings {
    pub max_distance: f32,
    pub surface_margin: f32,
}

#[derive(Debug, Clone)]
pub struct RemoteSettings {
    pub base_url: Url,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct SpeechSettings {
    pub rate: f32,
    pub announcements: bool,
    pub prefs_path: Option<PathBuf>,
}

impl SightlineConfig {
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("SIGHTLINE_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) => Some(read_config_file(Path::new(path))?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default())?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: SightlineConfigFile) -> Result<Self> {
        let sensor = file.sensor.unwrap_or_default();
        let detection = file.detection.unwrap_or_default();
        let localization = file.localization.unwrap_or_default();
        let remote = file.remote.unwrap_or_default();
        let speech = file.speech.unwrap_or_default();

        let labels = match detection.labels {
            Some(labels) => Vocabulary::new(labels)?,
            None => Vocabulary::default(),
        };
        let base_url = parse_base_url(remote.base_url.as_deref().unwrap_or(DEFAULT_REMOTE_URL))?;

        Ok(Self {
            initial_mode: file.mode.unwrap_or_default(),
            sensor: SensorSettings {
                width: sensor.width.unwrap_or(DEFAULT_SENSOR_WIDTH),
                height: sensor.height.unwrap_or(DEFAULT_SENSOR_HEIGHT),
                crop_size: sensor.crop_size.unwrap_or(DEFAULT_CROP_SIZE),
            },
            detection: DetectionSettings {
                confidence_threshold: detection.confidence_threshold.unwrap_or(DEFAULT_CONFIDENCE),
                iou_threshold: detection.iou_threshold.unwrap_or(DEFAULT_IOU),
                model_path: detection.model_path,
                labels,
            },
            localization: LocalizationSettings {
                max_distance: localization.max_distance.unwrap_or(DEFAULT_MAX_DISTANCE),
                surface_margin: localization
                    .surface_margin
                    .unwrap_or(DEFAULT_SURFACE_MARGIN),
            },
            remote: RemoteSettings {
                base_url,
                timeout: Duration::from_secs(
                    remote.timeout_secs.unwrap_or(DEFAULT_REMOTE_TIMEOUT_SECS),
                ),
            },
            speech: SpeechSettings {
                rate: speech.rate.unwrap_or(DEFAULT_SPEECH_RATE),
                announcements: speech.announcements.unwrap_or(true),
                prefs_path: speech.prefs_path,
            },
        })
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(url) = std::env::var("SIGHTLINE_REMOTE_URL") {
            if !url.trim().is_empty() {
                self.remote.base_url = parse_base_url(url.trim())?;
            }
        }
        if let Ok(timeout) = std::env::var("SIGHTLINE_REMOTE_TIMEOUT_SECS") {
            let seconds: u64 = timeout.trim().parse().map_err(|_| {
                anyhow!("SIGHTLINE_REMOTE_TIMEOUT_SECS must be an integer number of seconds")
            })?;
            self.remote.timeout = Duration::from_secs(seconds);
        }
        if let Ok(confidence) = std::env::var("SIGHTLINE_CONFIDENCE") {
            self.detection.confidence_threshold = confidence
                .trim()
                .parse()
                .map_err(|_| anyhow!("SIGHTLINE_CONFIDENCE must be a number"))?;
        }
        if let Ok(iou) = std::env::var("SIGHTLINE_IOU") {
            self.detection.iou_threshold = iou
                .trim()
                .parse()
                .map_err(|_| anyhow!("SIGHTLINE_IOU must be a number"))?;
        }
        if let Ok(path) = std::env::var("SIGHTLINE_MODEL_PATH") {
            if !path.trim().is_empty() {
                self.detection.model_path = Some(PathBuf::from(path));
            }
        }
        Ok(())
    }

    fn validate(&mut self) -> Result<()> {
        for (name, value) in [
            ("confidence threshold", self.detection.confidence_threshold),
            ("IoU threshold", self.detection.iou_threshold),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(anyhow!("{} must be within [0, 1], got {}", name, value));
            }
        }
        SensorLayout::new(self.sensor.width, self.sensor.height, self.sensor.crop_size)?;
        if self.remote.timeout.is_zero() {
            return Err(anyhow!("remote timeout must be greater than zero"));
        }
        if !(self.localization.max_distance > 0.0) {
            return Err(anyhow!("raycast max distance must be positive"));
        }
        if !(0.0..self.localization.max_distance).contains(&self.localization.surface_margin) {
            return Err(anyhow!(
                "surface margin must be within [0, {})",
                self.localization.max_distance
            ));
        }
        SpeechRate::new(self.speech.rate)?;
        Ok(())
    }

    pub fn layout(&self) -> Result<SensorLayout> {
        SensorLayout::new(self.sensor.width, self.sensor.height, self.sensor.crop_size)
    }

    /// Stored speech rate when a preferences file exists, else the configured one.
    pub fn speech_rate(&self) -> Result<SpeechRate> {
        match &self.speech.prefs_path {
            Some(path) if path.exists() => SpeechRate::load(path),
            _ => SpeechRate::new(self.speech.rate),
        }
    }

    pub fn pipeline_settings(&self) -> Result<PipelineSettings> {
        Ok(PipelineSettings {
            layout: self.layout()?,
            vocabulary: self.detection.labels.clone(),
            confidence_threshold: self.detection.confidence_threshold,
            iou_threshold: self.detection.iou_threshold,
            max_distance: self.localization.max_distance,
            surface_margin: self.localization.surface_margin,
            initial_mode: self.initial_mode,
            announcements_enabled: self.speech.announcements,
            speech_rate: self.speech_rate()?,
            speech_prefs_path: self.speech.prefs_path.clone(),
        })
    }
}

fn parse_base_url(raw: &str) -> Result<Url> {
    let url = Url::parse(raw).map_err(|e| anyhow!("invalid remote base url '{}': {}", raw, e))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(anyhow!(
            "remote base url must be http or https, got '{}'",
            other
        )),
    }
}

fn read_config_file(path: &Path) -> Result<SightlineConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
    let cfg = if is_toml {
        toml::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}
