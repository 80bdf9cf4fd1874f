use serde::Deserialize;
use std::env;
use std::str::FromStr;

use crate::ocr::{
    EngineId, EngineMode, EngineVariant, Mitigation, ProcessingOptions, SegmentationMode,
};

fn parse_env_or<T: std::str::FromStr>(var: &str, default: T) -> T
where
    T::Err: std::fmt::Display,
{
    match env::var(var) {
        Ok(val) => match val.parse() {
            Ok(parsed) => parsed,
            Err(e) => {
                tracing::warn!("Invalid value '{}' for {}: {}. Using default.", val, var, e);
                default
            }
        },
        Err(_) => default,
    }
}

fn parse_env_opt<T: std::str::FromStr>(var: &str) -> Option<T>
where
    T::Err: std::fmt::Display,
{
    match env::var(var) {
        Ok(val) => match val.parse() {
            Ok(parsed) => Some(parsed),
            Err(e) => {
                tracing::warn!("Invalid value '{}' for {}: {}. Ignoring.", val, var, e);
                None
            }
        },
        Err(_) => None,
    }
}

/// Parse a comma-separated list such as `OCR_REMOTE_BACKOFF_MS=500,1500`.
///
/// Any unparseable entry discards the whole list so a typo never yields a
/// half-applied schedule.
fn parse_env_list<T: FromStr>(var: &str, default: Vec<T>) -> Vec<T>
where
    T::Err: std::fmt::Display,
{
    let Ok(val) = env::var(var) else {
        return default;
    };

    let parsed: std::result::Result<Vec<T>, String> = val
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| s.parse::<T>().map_err(|e| format!("'{s}': {e}")))
        .collect();

    match parsed {
        Ok(list) if !list.is_empty() => list,
        Ok(_) => default,
        Err(e) => {
            tracing::warn!("Invalid entry {} in {}. Using default.", e, var);
            default
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub pipeline: PipelineConfig,
    pub preprocessing: ProcessingOptions,
    pub remote: RemoteEngineConfig,
    pub local: LocalEngineConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub max_upload_bytes: usize,
}

/// Switches read once at startup that shape how the orchestrator runs.
#[derive(Debug, Clone, Deserialize)]
pub struct PipelineConfig {
    /// When false, preprocessing transforms and fallback are skipped and every
    /// call goes to `fixed_engine`.
    pub enabled: bool,
    pub fixed_engine: EngineId,
    pub default_mode: EngineMode,
    pub diagnostics: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RemoteEngineConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub language: String,
    pub timeout_secs: u64,
    pub max_retries: u32,
    pub backoff_ms: Vec<u64>,
    pub variant: EngineVariant,
    pub detect_orientation: bool,
    pub scale: bool,
    pub mitigations: Vec<Mitigation>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LocalEngineConfig {
    pub languages: String,
    pub data_path: Option<String>,
    pub primary_mode: SegmentationMode,
    pub fallback_mode: SegmentationMode,
    /// Mean word confidence (0-100) under which the fallback mode is tried.
    pub confidence_threshold: f32,
}

pub const DEFAULT_REMOTE_URL: &str = "https://api.ocr.space/parse/image";

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            fixed_engine: EngineId::Local,
            default_mode: EngineMode::Auto,
            diagnostics: false,
        }
    }
}

impl Default for RemoteEngineConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_REMOTE_URL.to_string(),
            api_key: None,
            language: "eng".to_string(),
            timeout_secs: 15,
            max_retries: 2,
            backoff_ms: vec![500, 1500],
            variant: EngineVariant::Accurate,
            detect_orientation: true,
            scale: true,
            mitigations: vec![Mitigation::SwitchVariant, Mitigation::FlipOrientation],
        }
    }
}

impl Default for LocalEngineConfig {
    fn default() -> Self {
        Self {
            languages: "eng".to_string(),
            data_path: None,
            primary_mode: SegmentationMode::SingleBlock,
            fallback_mode: SegmentationMode::Auto,
            confidence_threshold: 30.0,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        let remote_defaults = RemoteEngineConfig::default();
        let local_defaults = LocalEngineConfig::default();
        let processing_defaults = ProcessingOptions::default();

        Self {
            server: ServerConfig {
                host: env::var("DOCSCAN_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
                port: parse_env_or("DOCSCAN_PORT", 3000),
                max_upload_bytes: parse_env_or("DOCSCAN_MAX_UPLOAD_BYTES", 20 * 1024 * 1024),
            },
            pipeline: PipelineConfig {
                enabled: parse_env_or("OCR_PIPELINE_ENABLED", true),
                fixed_engine: parse_env_or("OCR_FIXED_ENGINE", EngineId::Local),
                default_mode: parse_env_or("OCR_DEFAULT_MODE", EngineMode::Auto),
                diagnostics: parse_env_or("OCR_DEBUG", false),
            },
            preprocessing: ProcessingOptions {
                max_width: parse_env_or("OCR_MAX_WIDTH", processing_defaults.max_width),
                max_height: parse_env_or("OCR_MAX_HEIGHT", processing_defaults.max_height),
                grayscale: parse_env_or("OCR_GRAYSCALE", processing_defaults.grayscale),
                contrast: parse_env_or("OCR_CONTRAST", processing_defaults.contrast),
                binarize: parse_env_or("OCR_BINARIZE", processing_defaults.binarize),
                sharpen: parse_env_or("OCR_SHARPEN", processing_defaults.sharpen),
            },
            remote: RemoteEngineConfig {
                base_url: env::var("OCR_REMOTE_URL").unwrap_or(remote_defaults.base_url),
                api_key: env::var("OCR_REMOTE_API_KEY").ok(),
                language: env::var("OCR_LANGUAGE").unwrap_or(remote_defaults.language),
                timeout_secs: parse_env_or("OCR_REMOTE_TIMEOUT", remote_defaults.timeout_secs),
                max_retries: parse_env_or("OCR_REMOTE_MAX_RETRIES", remote_defaults.max_retries),
                backoff_ms: parse_env_list("OCR_REMOTE_BACKOFF_MS", remote_defaults.backoff_ms),
                variant: parse_env_or("OCR_REMOTE_VARIANT", remote_defaults.variant),
                detect_orientation: parse_env_or(
                    "OCR_REMOTE_DETECT_ORIENTATION",
                    remote_defaults.detect_orientation,
                ),
                scale: parse_env_or("OCR_REMOTE_SCALE", remote_defaults.scale),
                mitigations: parse_env_list("OCR_REMOTE_MITIGATIONS", remote_defaults.mitigations),
            },
            local: LocalEngineConfig {
                languages: env::var("OCR_LOCAL_LANGUAGES").unwrap_or(local_defaults.languages),
                data_path: parse_env_opt("OCR_LOCAL_DATA_PATH"),
                primary_mode: parse_env_or("OCR_LOCAL_PRIMARY_PSM", local_defaults.primary_mode),
                fallback_mode: parse_env_or(
                    "OCR_LOCAL_FALLBACK_PSM",
                    local_defaults.fallback_mode,
                ),
                confidence_threshold: parse_env_or(
                    "OCR_LOCAL_CONFIDENCE_THRESHOLD",
                    local_defaults.confidence_threshold,
                ),
            },
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        let config = Self::default();
        if config.local.primary_mode == config.local.fallback_mode {
            tracing::warn!(
                "OCR_LOCAL_FALLBACK_PSM equals the primary mode ({}); the fallback attempt will repeat the same segmentation",
                config.local.primary_mode
            );
        }
        config
    }
}
