//! Remote OCR and face-emotion recognizers.
//!
//! Both services take `{"file": "<base64 jpeg>"}` by HTTP POST and answer
//! with JSON. Every failure (transport, non-2xx, malformed body) is logged and
//! collapses to an empty string so a bad response only silences one cycle.

use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::Deserialize;
use url::Url;

pub const OCR_ENDPOINT: &str = "ocr";
pub const FACE_EMOTION_ENDPOINT: &str = "face_emotion_recognition";

/// Remote recognition collaborator. Calls block until the service answers,
/// fails, or the recognizer's timeout expires.
pub trait RemoteRecognizer {
    /// Recognized text, or empty when nothing was read.
    fn recognize_text(&mut self, jpeg: &[u8]) -> String;

    /// Dominant emotion, or empty when no face was found.
    fn recognize_emotion(&mut self, jpeg: &[u8]) -> String;
}

#[derive(Debug, Deserialize)]
struct OcrResponse {
    data: OcrData,
}

#[derive(Debug, Deserialize)]
struct OcrData {
    #[serde(default)]
    lines: Vec<OcrLine>,
}

#[derive(Debug, Deserialize)]
#[allow(dead_code)]
struct OcrLine {
    #[serde(default)]
    confidence: f32,
    #[serde(default)]
    position: Vec<Vec<f32>>,
    #[serde(default)]
    text: String,
}

#[derive(Debug, Deserialize)]
struct FaceEmotionResponse {
    data: FaceEmotionData,
}

#[derive(Debug, Deserialize)]
struct FaceEmotionData {
    #[serde(default)]
    confidence: f32,
    #[serde(default)]
    emotion: String,
}

/// Concatenate every recognized line's text, in order.
pub fn parse_ocr_response(body: &str) -> Result<String> {
    let response: OcrResponse =
        serde_json::from_str(body).map_err(|e| anyhow!("invalid OCR response: {}", e))?;
    Ok(response
        .data
        .lines
        .into_iter()
        .map(|line| line.text)
        .collect())
}

/// The emotion label, unless the service reported zero confidence.
pub fn parse_face_emotion_response(body: &str) -> Result<String> {
    let response: FaceEmotionResponse = serde_json::from_str(body)
        .map_err(|e| anyhow!("invalid face emotion response: {}", e))?;
    if response.data.confidence == 0.0 {
        return Ok(String::new());
    }
    Ok(response.data.emotion)
}

pub fn request_body(jpeg: &[u8]) -> String {
    serde_json::json!({ "file": STANDARD.encode(jpeg) }).to_string()
}

/// Blocking HTTP client for both recognition services.
pub struct HttpRecognizer {
    agent: ureq::Agent,
    ocr_url: Url,
    face_url: Url,
}

impl HttpRecognizer {
    pub fn new(base_url: &Url, timeout: Duration) -> Result<Self> {
        let mut base = base_url.clone();
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        let ocr_url = base.join(OCR_ENDPOINT).context("build OCR endpoint url")?;
        let face_url = base
            .join(FACE_EMOTION_ENDPOINT)
            .context("build face emotion endpoint url")?;
        let agent = ureq::AgentBuilder::new().timeout(timeout).build();
        Ok(Self {
            agent,
            ocr_url,
            face_url,
        })
    }

    pub fn ocr_url(&self) -> &Url {
        &self.ocr_url
    }

    pub fn face_url(&self) -> &Url {
        &self.face_url
    }

    fn post(&self, url: &Url, jpeg: &[u8]) -> Result<String> {
        let response = self
            .agent
            .post(url.as_str())
            .set("Content-Type", "application/json")
            .send_string(&request_body(jpeg))
            .with_context(|| format!("POST {}", url))?;
        response
            .into_string()
            .with_context(|| format!("read response from {}", url))
    }
}

impl RemoteRecognizer for HttpRecognizer {
    fn recognize_text(&mut self, jpeg: &[u8]) -> String {
        match self
            .post(&self.ocr_url, jpeg)
            .and_then(|body| parse_ocr_response(&body))
        {
            Ok(text) => text,
            Err(e) => {
                log::warn!("text recognition failed: {:#}", e);
                String::new()
            }
        }
    }

    fn recognize_emotion(&mut self, jpeg: &[u8]) -> String {
        match self
            .post(&self.face_url, jpeg)
            .and_then(|body| parse_face_emotion_response(&body))
        {
            Ok(emotion) => emotion,
            Err(e) => {
                log::warn!("face emotion recognition failed: {:#}", e);
                String::new()
            }
        }
    }
}
