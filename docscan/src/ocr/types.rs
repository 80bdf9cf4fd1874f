use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::diagnostics::Diagnostics;
use crate::config::Config;
use crate::error::{Result, ScanError};

/// Which recognition backend produced (or should produce) a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineId {
    Local,
    Remote,
}

impl fmt::Display for EngineId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineId::Local => write!(f, "local"),
            EngineId::Remote => write!(f, "remote"),
        }
    }
}

impl FromStr for EngineId {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "local" => Ok(EngineId::Local),
            "remote" => Ok(EngineId::Remote),
            other => Err(format!("unknown engine '{other}', expected local or remote")),
        }
    }
}

/// Engine selection policy requested by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineMode {
    #[default]
    Auto,
    Local,
    Remote,
}

impl fmt::Display for EngineMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineMode::Auto => write!(f, "auto"),
            EngineMode::Local => write!(f, "local"),
            EngineMode::Remote => write!(f, "remote"),
        }
    }
}

impl FromStr for EngineMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "auto" | "" => Ok(EngineMode::Auto),
            "local" => Ok(EngineMode::Local),
            "remote" => Ok(EngineMode::Remote),
            other => Err(format!(
                "unknown mode '{other}', expected auto, local or remote"
            )),
        }
    }
}

/// Remote recognition model. `Accurate` is OCR engine 2, `Fast` is engine 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineVariant {
    Accurate,
    Fast,
}

impl EngineVariant {
    pub fn engine_number(&self) -> &'static str {
        match self {
            EngineVariant::Accurate => "2",
            EngineVariant::Fast => "1",
        }
    }
}

impl fmt::Display for EngineVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineVariant::Accurate => write!(f, "accurate"),
            EngineVariant::Fast => write!(f, "fast"),
        }
    }
}

impl FromStr for EngineVariant {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "accurate" | "2" => Ok(EngineVariant::Accurate),
            "fast" | "alternate" | "1" => Ok(EngineVariant::Fast),
            other => Err(format!("unknown variant '{other}', expected accurate or fast")),
        }
    }
}

/// Remote-side adjustment applied before retrying an empty result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mitigation {
    SwitchVariant,
    FlipOrientation,
}

impl fmt::Display for Mitigation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mitigation::SwitchVariant => write!(f, "variant"),
            Mitigation::FlipOrientation => write!(f, "orientation"),
        }
    }
}

impl FromStr for Mitigation {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "variant" | "switch_variant" => Ok(Mitigation::SwitchVariant),
            "orientation" | "flip_orientation" => Ok(Mitigation::FlipOrientation),
            other => Err(format!(
                "unknown mitigation '{other}', expected variant or orientation"
            )),
        }
    }
}

/// Tesseract page segmentation modes the local engine can run with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SegmentationMode {
    Auto,
    SingleColumn,
    SingleBlock,
    SingleLine,
    SparseText,
}

impl SegmentationMode {
    /// Value for the `tessedit_pageseg_mode` variable.
    pub fn psm(&self) -> u8 {
        match self {
            SegmentationMode::Auto => 3,
            SegmentationMode::SingleColumn => 4,
            SegmentationMode::SingleBlock => 6,
            SegmentationMode::SingleLine => 7,
            SegmentationMode::SparseText => 11,
        }
    }
}

impl fmt::Display for SegmentationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "psm{}", self.psm())
    }
}

impl FromStr for SegmentationMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "3" | "auto" => Ok(SegmentationMode::Auto),
            "4" | "single_column" => Ok(SegmentationMode::SingleColumn),
            "6" | "single_block" => Ok(SegmentationMode::SingleBlock),
            "7" | "single_line" => Ok(SegmentationMode::SingleLine),
            "11" | "sparse_text" => Ok(SegmentationMode::SparseText),
            other => Err(format!("unsupported page segmentation mode '{other}'")),
        }
    }
}

/// Image bytes as received from the capture/upload layer.
#[derive(Debug, Clone)]
pub struct RawImage {
    pub bytes: Vec<u8>,
    pub mime_type: Option<String>,
    pub declared_dimensions: Option<(u32, u32)>,
}

impl RawImage {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self {
            bytes,
            mime_type: None,
            declared_dimensions: None,
        }
    }

    pub fn with_mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.mime_type = Some(mime_type.into());
        self
    }

    pub fn with_dimensions(mut self, width: u32, height: u32) -> Self {
        self.declared_dimensions = Some((width, height));
        self
    }

    /// Read an image file, guessing its MIME type from the extension.
    pub async fn from_path(path: &Path) -> Result<Self> {
        let bytes = tokio::fs::read(path).await?;
        if bytes.is_empty() {
            return Err(ScanError::Validation(format!(
                "Image file is empty: {}",
                path.display()
            )));
        }

        let image = Self::new(bytes);
        Ok(match mime_guess::from_path(path).first() {
            Some(mime) => image.with_mime_type(mime.essence_str()),
            None => image,
        })
    }
}

/// Per-call preprocessing switches. Defaults favour photographed paperwork.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessingOptions {
    pub max_width: u32,
    pub max_height: u32,
    pub grayscale: bool,
    pub contrast: f32,
    pub binarize: bool,
    pub sharpen: bool,
}

impl Default for ProcessingOptions {
    fn default() -> Self {
        Self {
            max_width: 2000,
            max_height: 2000,
            grayscale: true,
            contrast: 1.2,
            binarize: false,
            sharpen: false,
        }
    }
}

/// PNG-encoded preprocessing output handed to the engines.
#[derive(Debug, Clone)]
pub struct NormalizedImage {
    pub bytes: Arc<[u8]>,
    pub width: u32,
    pub height: u32,
}

impl NormalizedImage {
    pub fn new(bytes: Vec<u8>, width: u32, height: u32) -> Self {
        Self {
            bytes: Arc::from(bytes),
            width,
            height,
        }
    }
}

/// Request-level hints forwarded to the remote engine.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteOptions {
    pub variant: EngineVariant,
    pub language: String,
    pub detect_orientation: bool,
    pub scale: bool,
    pub credential: Option<String>,
}

impl Default for RemoteOptions {
    fn default() -> Self {
        Self {
            variant: EngineVariant::Accurate,
            language: "eng".to_string(),
            detect_orientation: true,
            scale: true,
            credential: None,
        }
    }
}

/// Everything a caller can tune for a single recognition call.
#[derive(Debug, Clone, Default)]
pub struct RecognizeOptions {
    pub processing: ProcessingOptions,
    pub remote: RemoteOptions,
    /// Overrides the configured diagnostics switch when set.
    pub debug: Option<bool>,
}

impl RecognizeOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            processing: config.preprocessing.clone(),
            remote: RemoteOptions {
                variant: config.remote.variant,
                language: config.remote.language.clone(),
                detect_orientation: config.remote.detect_orientation,
                scale: config.remote.scale,
                credential: config.remote.api_key.clone(),
            },
            debug: None,
        }
    }

    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = Some(debug);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfidenceLabel {
    High,
    Medium,
    Low,
    Unknown,
}

impl ConfidenceLabel {
    /// Bucket a 0-100 engine confidence.
    pub fn from_score(score: Option<f32>) -> Self {
        match score {
            Some(s) if s >= 80.0 => ConfidenceLabel::High,
            Some(s) if s >= 50.0 => ConfidenceLabel::Medium,
            Some(_) => ConfidenceLabel::Low,
            None => ConfidenceLabel::Unknown,
        }
    }
}

/// What a single engine adapter returns.
#[derive(Debug, Clone, Serialize)]
pub struct EngineResult {
    pub text: String,
    pub engine: EngineId,
    pub confidence: ConfidenceLabel,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence_score: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_diagnostics: Option<serde_json::Value>,
}

impl EngineResult {
    pub fn new(engine: EngineId, text: impl Into<String>, confidence_score: Option<f32>) -> Self {
        Self {
            text: text.into(),
            engine,
            confidence: ConfidenceLabel::from_score(confidence_score),
            confidence_score,
            raw_diagnostics: None,
        }
    }

    pub fn with_raw_diagnostics(mut self, raw: serde_json::Value) -> Self {
        self.raw_diagnostics = Some(raw);
        self
    }

    /// True when the text is empty or only placeholder output.
    pub fn is_blank(&self) -> bool {
        !has_recognizable_text(&self.text)
    }
}

/// Engines emit placeholder output such as `"--"`, `"|"` or a form feed for
/// pages they could not read. Only text with an alphanumeric character counts.
pub fn has_recognizable_text(text: &str) -> bool {
    text.chars().any(char::is_alphanumeric)
}

/// Final answer returned to the caller of the orchestrator.
#[derive(Debug, Clone, Serialize)]
pub struct RecognitionOutcome {
    pub text: String,
    pub engine_used: EngineId,
    pub confidence: ConfidenceLabel,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence_score: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diagnostics: Option<Diagnostics>,
}
