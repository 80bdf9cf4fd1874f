use std::sync::Arc;

use axum::{
    body::Body,
    extract::{Multipart, State},
    http::header,
    response::{IntoResponse, Response},
    Json,
};
use futures::StreamExt;
use serde::Serialize;
use tracing::info;

use crate::api::state::AppState;
use crate::error::{Result, ScanError};
use crate::ocr::{BatchLine, EngineMode, RawImage, RecognitionOutcome, RecognizeOptions};

fn parse_form_bool(value: &str) -> Option<bool> {
    match value.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// One uploaded `file` part.
#[derive(Debug)]
struct Upload {
    name: Option<String>,
    image: RawImage,
}

/// Fields shared by the single and batch endpoints.
#[derive(Debug, Default)]
struct OcrForm {
    files: Vec<Upload>,
    mode: Option<EngineMode>,
    debug: Option<bool>,
}

impl OcrForm {
    async fn read(multipart: &mut Multipart) -> Result<Self> {
        let mut form = OcrForm::default();

        while let Some(field) = multipart
            .next_field()
            .await
            .map_err(|e| ScanError::Validation(format!("Invalid multipart body: {e}")))?
        {
            let name = field.name().unwrap_or("").to_string();

            match name.as_str() {
                "file" => {
                    let file_name = field.file_name().map(str::to_string);
                    let content_type = field
                        .content_type()
                        .filter(|ct| *ct != "application/octet-stream")
                        .map(str::to_string)
                        .or_else(|| {
                            file_name
                                .as_deref()
                                .and_then(|n| mime_guess::from_path(n).first())
                                .map(|m| m.essence_str().to_string())
                        });

                    let bytes = field
                        .bytes()
                        .await
                        .map_err(|e| ScanError::Validation(format!("Failed to read file: {e}")))?;
                    if bytes.is_empty() {
                        return Err(ScanError::Validation(format!(
                            "Uploaded file '{}' is empty",
                            file_name.as_deref().unwrap_or("file")
                        )));
                    }

                    let image = RawImage::new(bytes.to_vec());
                    let image = match content_type {
                        Some(ct) => image.with_mime_type(ct),
                        None => image,
                    };
                    form.files.push(Upload {
                        name: file_name,
                        image,
                    });
                }
                "mode" => {
                    let raw = field
                        .text()
                        .await
                        .map_err(|e| ScanError::Validation(format!("Invalid mode value: {e}")))?;
                    form.mode = Some(raw.parse::<EngineMode>().map_err(ScanError::Validation)?);
                }
                "debug" => {
                    let raw = field
                        .text()
                        .await
                        .map_err(|e| ScanError::Validation(format!("Invalid debug value: {e}")))?;
                    form.debug = Some(parse_form_bool(&raw).ok_or_else(|| {
                        ScanError::Validation(
                            "debug must be one of true/false/1/0/yes/no".to_string(),
                        )
                    })?);
                }
                _ => {}
            }
        }

        Ok(form)
    }

    fn options(&self, state: &AppState) -> (EngineMode, RecognizeOptions) {
        let mode = self.mode.unwrap_or_else(|| state.orchestrator.default_mode());
        let options = state.orchestrator.default_options();
        let options = match self.debug {
            Some(debug) => options.with_debug(debug),
            None => options,
        };
        (mode, options)
    }
}

/// `POST /api/v1/ocr`
///
/// Multipart with one `file` part plus optional `mode` and `debug` fields.
pub async fn recognize(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<RecognitionOutcome>> {
    let mut form = OcrForm::read(&mut multipart).await?;
    let (mode, options) = form.options(&state);

    if form.files.len() > 1 {
        return Err(ScanError::Validation(
            "Expected a single 'file' field; use /ocr/batch for several images".to_string(),
        ));
    }
    let upload = form
        .files
        .pop()
        .ok_or_else(|| ScanError::Validation("Missing required 'file' field".to_string()))?;

    let outcome = state
        .orchestrator
        .recognize(upload.image, mode, &options)
        .await?;

    info!(engine = %outcome.engine_used, chars = outcome.text.len(), "OCR request completed");
    Ok(Json(outcome))
}

/// `POST /api/v1/ocr/batch`
///
/// Streams one NDJSON line per uploaded file as soon as it is recognized.
pub async fn recognize_batch(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Response> {
    let form = OcrForm::read(&mut multipart).await?;
    let (mode, options) = form.options(&state);

    if form.files.is_empty() {
        return Err(ScanError::Validation(
            "Missing required 'file' field".to_string(),
        ));
    }

    let images: Vec<(String, RawImage)> = form
        .files
        .into_iter()
        .enumerate()
        .map(|(i, upload)| {
            let name = upload.name.unwrap_or_else(|| format!("file-{i}"));
            (name, upload.image)
        })
        .collect();

    info!(count = images.len(), %mode, "Starting OCR batch");

    let lines = Arc::clone(&state.orchestrator)
        .recognize_batch(images, mode, options)
        .map(|item| {
            let mut line = serde_json::to_vec(&BatchLine::from(item))?;
            line.push(b'\n');
            Ok::<_, serde_json::Error>(line)
        });

    Ok((
        [(header::CONTENT_TYPE, "application/x-ndjson")],
        Body::from_stream(lines),
    )
        .into_response())
}

#[derive(Debug, Serialize)]
pub struct ReleaseData {
    pub released: bool,
    pub local_worker_loaded: bool,
}

/// `POST /api/v1/ocr/worker/release`
pub async fn release_worker(State(state): State<AppState>) -> Json<ReleaseData> {
    let was_loaded = state.orchestrator.local_worker_loaded();
    state.orchestrator.release_local_worker().await;

    Json(ReleaseData {
        released: was_loaded,
        local_worker_loaded: state.orchestrator.local_worker_loaded(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_form_bool_accepts_supported_values() {
        assert_eq!(parse_form_bool("true"), Some(true));
        assert_eq!(parse_form_bool(" YES "), Some(true));
        assert_eq!(parse_form_bool("off"), Some(false));
        assert_eq!(parse_form_bool("0"), Some(false));
    }

    #[test]
    fn parse_form_bool_rejects_unknown_values() {
        assert_eq!(parse_form_bool("maybe"), None);
        assert_eq!(parse_form_bool(""), None);
    }
}
