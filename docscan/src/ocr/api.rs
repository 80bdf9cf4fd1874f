use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::{header::RETRY_AFTER, multipart, Client, StatusCode};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, warn};

use super::engine::RecognitionEngine;
use super::types::{
    has_recognizable_text, EngineId, EngineResult, EngineVariant, Mitigation, NormalizedImage,
    RecognizeOptions, RemoteOptions,
};
use crate::config::RemoteEngineConfig;
use crate::error::{Result, ScanError};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ParseResponse {
    #[serde(default)]
    parsed_results: Vec<ParsedResult>,
    #[serde(rename = "OCRExitCode", default)]
    ocr_exit_code: Option<i64>,
    #[serde(default)]
    is_errored_on_processing: bool,
    #[serde(default)]
    error_message: Option<ErrorMessage>,
    #[serde(default)]
    processing_time_in_milliseconds: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ParsedResult {
    #[serde(default)]
    parsed_text: String,
}

/// The service sends either a single message or a list of them.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ErrorMessage {
    One(String),
    Many(Vec<String>),
}

impl ErrorMessage {
    fn joined(&self) -> String {
        match self {
            ErrorMessage::One(msg) => msg.clone(),
            ErrorMessage::Many(msgs) => msgs.join("; "),
        }
    }
}

struct ParsedPage {
    text: String,
    exit_code: Option<i64>,
    processing_time_ms: Option<u64>,
}

/// Client for an OCR.space compatible `parse/image` endpoint.
#[derive(Clone, Debug)]
pub struct RemoteEngineClient {
    client: Client,
    base_url: String,
    timeout: Duration,
    max_retries: u32,
    backoff: Vec<Duration>,
    mitigations: Vec<Mitigation>,
}

impl RemoteEngineClient {
    pub fn new(config: &RemoteEngineConfig) -> Result<Self> {
        let client = Client::builder()
            .build()
            .map_err(|e| ScanError::Internal(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: config.base_url.clone(),
            timeout: Duration::from_secs(config.timeout_secs),
            max_retries: config.max_retries,
            backoff: config
                .backoff_ms
                .iter()
                .map(|ms| Duration::from_millis(*ms))
                .collect(),
            mitigations: config.mitigations.clone(),
        })
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_backoff(mut self, backoff: Vec<Duration>) -> Self {
        self.backoff = backoff;
        self
    }

    /// Delay before retry number `retry` (0-based). The last entry repeats.
    fn delay_for(&self, retry: usize) -> Duration {
        self.backoff
            .get(retry)
            .or_else(|| self.backoff.last())
            .copied()
            .unwrap_or_default()
    }

    async fn send_once(
        &self,
        image: &NormalizedImage,
        remote: &RemoteOptions,
        credential: &str,
    ) -> Result<ParsedPage> {
        let file_part = multipart::Part::bytes(image.bytes.to_vec())
            .file_name("image.png")
            .mime_str("image/png")
            .map_err(|e| ScanError::Internal(format!("Invalid MIME type: {e}")))?;

        let form = multipart::Form::new()
            .part("file", file_part)
            .text("language", remote.language.clone())
            .text("OCREngine", remote.variant.engine_number())
            .text("detectOrientation", remote.detect_orientation.to_string())
            .text("scale", remote.scale.to_string())
            .text("isOverlayRequired", "false");

        debug!(
            "Sending remote OCR request to {} (variant: {}, orientation: {})",
            self.base_url, remote.variant, remote.detect_orientation
        );

        let response = self
            .client
            .post(&self.base_url)
            .header("apikey", credential)
            .multipart(form)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<u64>().ok());
            let body = response.text().await.unwrap_or_default();
            return Err(map_http_error(status, retry_after, &body));
        }

        let body = response.text().await?;
        let parsed: ParseResponse = serde_json::from_str(&body).map_err(|e| {
            ScanError::EngineReported(format!("Malformed response from remote engine: {e}"))
        })?;

        if parsed.is_errored_on_processing {
            let message = parsed
                .error_message
                .as_ref()
                .map(ErrorMessage::joined)
                .filter(|m| !m.trim().is_empty())
                .unwrap_or_else(|| "Remote engine failed to process the image".to_string());
            return Err(ScanError::EngineReported(message));
        }

        let text = parsed
            .parsed_results
            .iter()
            .map(|r| r.parsed_text.replace("\r\n", "\n"))
            .collect::<Vec<_>>()
            .join("\n");
        let text = text.trim().to_string();

        if !has_recognizable_text(&text) {
            return Err(ScanError::EmptyResult);
        }

        Ok(ParsedPage {
            text,
            exit_code: parsed.ocr_exit_code,
            processing_time_ms: parsed
                .processing_time_in_milliseconds
                .as_ref()
                .and_then(processing_time_ms),
        })
    }
}

#[async_trait]
impl RecognitionEngine for RemoteEngineClient {
    fn id(&self) -> EngineId {
        EngineId::Remote
    }

    async fn recognize(
        &self,
        image: &NormalizedImage,
        options: &RecognizeOptions,
    ) -> Result<EngineResult> {
        let credential = options
            .remote
            .credential
            .as_deref()
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| {
                ScanError::EngineUnavailable("No credential configured for remote OCR".to_string())
            })?;

        let mut remote = options.remote.clone();
        let mut pending = self.mitigations.iter().copied();
        let mut applied: Vec<String> = Vec::new();
        let mut failures: Vec<String> = Vec::new();
        let started = Instant::now();
        let mut attempt: u32 = 0;

        loop {
            if attempt > 0 {
                let delay = self.delay_for(attempt as usize - 1);
                debug!("Remote OCR retry {} after {:?}", attempt, delay);
                tokio::time::sleep(delay).await;
            }

            let request = self.send_once(image, &remote, credential);
            let outcome = match tokio::time::timeout(self.timeout, request).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    warn!(
                        "Remote OCR attempt {} timed out after {:?}",
                        attempt + 1,
                        self.timeout
                    );
                    Err(ScanError::EngineTimeout(self.timeout))
                }
            };

            match outcome {
                Ok(page) => {
                    debug!(
                        "Remote OCR succeeded on attempt {} ({} chars)",
                        attempt + 1,
                        page.text.len()
                    );
                    let raw = json!({
                        "variant": remote.variant.to_string(),
                        "detect_orientation": remote.detect_orientation,
                        "attempts": attempt + 1,
                        "mitigations": applied,
                        "exit_code": page.exit_code,
                        "processing_time_ms": page.processing_time_ms,
                        "elapsed_ms": started.elapsed().as_millis() as u64,
                    });
                    return Ok(EngineResult::new(EngineId::Remote, page.text, None)
                        .with_raw_diagnostics(raw));
                }
                Err(e) if e.is_retryable() && attempt < self.max_retries => {
                    if let ScanError::EmptyResult = e {
                        if let Some(mitigation) = pending.next() {
                            if apply_mitigation(&mut remote, mitigation) {
                                applied.push(mitigation.to_string());
                            }
                        }
                    }
                    warn!(
                        "Remote OCR attempt {} failed (retryable): {}",
                        attempt + 1,
                        e
                    );
                    failures.push(e.to_string());
                }
                Err(e) => {
                    failures.push(e.to_string());
                    let trace = json!({
                        "variant": remote.variant.to_string(),
                        "detect_orientation": remote.detect_orientation,
                        "attempts": attempt + 1,
                        "mitigations": applied,
                        "failures": failures,
                        "elapsed_ms": started.elapsed().as_millis() as u64,
                    });
                    return Err(e.with_trace(trace));
                }
            }
            attempt += 1;
        }
    }
}

/// Returns false when the mitigation changes nothing.
fn apply_mitigation(remote: &mut RemoteOptions, mitigation: Mitigation) -> bool {
    match mitigation {
        Mitigation::SwitchVariant => {
            if remote.variant == EngineVariant::Fast {
                return false;
            }
            remote.variant = EngineVariant::Fast;
            true
        }
        Mitigation::FlipOrientation => {
            remote.detect_orientation = !remote.detect_orientation;
            true
        }
    }
}

fn map_http_error(status: StatusCode, retry_after: Option<u64>, body: &str) -> ScanError {
    match status {
        StatusCode::TOO_MANY_REQUESTS => ScanError::EngineRateLimited { retry_after },
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ScanError::EngineUnavailable(format!(
            "Remote OCR rejected the credential ({status}): {body}"
        )),
        s if s.is_server_error() => {
            ScanError::EngineReported(format!("Remote OCR server error ({status}): {body}"))
        }
        _ => ScanError::EngineUnavailable(format!("Remote OCR request failed ({status}): {body}")),
    }
}

fn processing_time_ms(value: &serde_json::Value) -> Option<u64> {
    match value {
        serde_json::Value::Number(n) => n.as_u64(),
        serde_json::Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}
