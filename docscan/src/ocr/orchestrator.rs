use std::sync::Arc;
use std::time::Instant;

use futures::Stream;
use serde::Serialize;
use tracing::{debug, info, warn};

use super::api::RemoteEngineClient;
use super::diagnostics::{Diagnostics, DiagnosticsRecorder, Stage, TransitionCause};
use super::engine::RecognitionEngine;
use super::local::LocalEngine;
use super::preprocessing::{preprocess_image, reencode_image, PreprocessOutput};
use super::types::{
    EngineId, EngineMode, EngineResult, NormalizedImage, ProcessingOptions, RawImage,
    RecognitionOutcome, RecognizeOptions,
};
use crate::config::{Config, PipelineConfig};
use crate::error::{Result, ScanError};

/// One entry of a batch run, in input order.
#[derive(Debug)]
pub struct BatchItem {
    pub index: usize,
    pub name: String,
    pub result: Result<RecognitionOutcome>,
}

/// Serializable form of [`BatchItem`], one per NDJSON line or CLI output line.
#[derive(Debug, Serialize)]
pub struct BatchLine {
    pub index: usize,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<RecognitionOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Trace of a failed item, present only when diagnostics were requested.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diagnostics: Option<Box<Diagnostics>>,
}

impl From<BatchItem> for BatchLine {
    fn from(item: BatchItem) -> Self {
        let (outcome, error, diagnostics) = match item.result {
            Ok(outcome) => (Some(outcome), None, None),
            Err(e) => {
                let message = e.to_string();
                let diagnostics = match e {
                    ScanError::AllEnginesExhausted { diagnostics } => diagnostics,
                    _ => None,
                };
                (None, Some(message), diagnostics)
            }
        };
        Self {
            index: item.index,
            name: item.name,
            outcome,
            error,
            diagnostics,
        }
    }
}

/// Runs preprocessing, picks engines by mode and applies the auto-mode fallback.
pub struct OcrOrchestrator {
    remote: Arc<dyn RecognitionEngine>,
    local: Arc<dyn RecognitionEngine>,
    pipeline: PipelineConfig,
    defaults: RecognizeOptions,
}

impl OcrOrchestrator {
    pub fn new(config: &Config) -> Result<Self> {
        let remote = RemoteEngineClient::new(&config.remote)?;
        let local = LocalEngine::new(&config.local);
        Ok(Self::with_engines(config, Arc::new(remote), Arc::new(local)))
    }

    pub fn with_engines(
        config: &Config,
        remote: Arc<dyn RecognitionEngine>,
        local: Arc<dyn RecognitionEngine>,
    ) -> Self {
        info!(
            pipeline_enabled = config.pipeline.enabled,
            default_mode = %config.pipeline.default_mode,
            "OCR orchestrator initialized"
        );
        Self {
            remote,
            local,
            pipeline: config.pipeline.clone(),
            defaults: RecognizeOptions::from_config(config),
        }
    }

    /// Options built from configuration, for callers that only override a few fields.
    pub fn default_options(&self) -> RecognizeOptions {
        self.defaults.clone()
    }

    pub fn default_mode(&self) -> EngineMode {
        self.pipeline.default_mode
    }

    fn engine(&self, id: EngineId) -> &Arc<dyn RecognitionEngine> {
        match id {
            EngineId::Local => &self.local,
            EngineId::Remote => &self.remote,
        }
    }

    /// Primary engine and optional fallback for a call.
    fn plan(&self, mode: EngineMode) -> (EngineId, Option<EngineId>) {
        if !self.pipeline.enabled {
            return (self.pipeline.fixed_engine, None);
        }
        match mode {
            EngineMode::Remote => (EngineId::Remote, None),
            EngineMode::Local => (EngineId::Local, None),
            EngineMode::Auto => (EngineId::Remote, Some(EngineId::Local)),
        }
    }

    async fn prepare(
        &self,
        raw: RawImage,
        options: &ProcessingOptions,
    ) -> Result<PreprocessOutput> {
        let enabled = self.pipeline.enabled;
        let options = options.clone();
        tokio::task::spawn_blocking(move || {
            if enabled {
                preprocess_image(&raw, &options)
            } else {
                reencode_image(&raw)
            }
        })
        .await
        .map_err(|e| ScanError::Internal(format!("Preprocessing task panicked: {e}")))
    }

    async fn attempt(
        &self,
        id: EngineId,
        image: &NormalizedImage,
        options: &RecognizeOptions,
        recorder: &mut DiagnosticsRecorder,
    ) -> Result<EngineResult> {
        let started = Instant::now();
        let result = self.engine(id).recognize(image, options).await;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        match result {
            Ok(r) if !r.is_blank() => {
                debug!(engine = %id, elapsed_ms, chars = r.text.len(), "Engine returned text");
                recorder.success(id, elapsed_ms, r.raw_diagnostics.clone());
                Ok(r)
            }
            Ok(r) => {
                warn!(engine = %id, elapsed_ms, "Engine returned no recognizable text");
                recorder.failure(id, elapsed_ms, &ScanError::EmptyResult, r.raw_diagnostics);
                Err(ScanError::EmptyResult)
            }
            Err(e) => {
                let (e, trace) = e.into_parts();
                warn!(engine = %id, elapsed_ms, "Engine attempt failed: {}", e);
                recorder.failure(id, elapsed_ms, &e, trace);
                Err(e)
            }
        }
    }

    /// Recognize text in one image.
    ///
    /// In auto mode any remote failure moves to exactly one local attempt, and
    /// running out of engines yields [`ScanError::AllEnginesExhausted`], which
    /// carries the diagnostics when they were requested. Single engine modes
    /// surface the engine error, except that a blank result is also reported
    /// as exhausted.
    pub async fn recognize(
        &self,
        raw: RawImage,
        mode: EngineMode,
        options: &RecognizeOptions,
    ) -> Result<RecognitionOutcome> {
        if raw.bytes.is_empty() {
            return Err(ScanError::Validation("Image is empty".to_string()));
        }

        let mut recorder =
            DiagnosticsRecorder::new(options.debug.unwrap_or(self.pipeline.diagnostics));

        let prepared = self.prepare(raw, &options.processing).await?;
        let image = prepared.image;
        recorder.preprocessing(
            prepared.original_dimensions,
            (image.width, image.height),
            prepared.degraded.as_deref(),
        );
        let cause = match prepared.degraded {
            Some(reason) => {
                warn!("Continuing with unprocessed image: {}", reason);
                TransitionCause::PreprocessingDegraded
            }
            None => TransitionCause::Preprocessed,
        };

        let (primary, fallback) = self.plan(mode);
        debug!(%mode, %primary, ?fallback, "Recognition plan");
        recorder.transition(Stage::Preprocess, Stage::AttemptPrimary, cause);

        let error = match self.attempt(primary, &image, options, &mut recorder).await {
            Ok(result) => {
                recorder.transition(
                    Stage::AttemptPrimary,
                    Stage::Done,
                    TransitionCause::TextFound,
                );
                return Ok(finish(result, recorder));
            }
            Err(e) => e,
        };

        let Some(fallback) = fallback else {
            recorder.transition(Stage::AttemptPrimary, Stage::Failed, failure_cause(&error));
            let diagnostics = finish_failed(recorder);
            return Err(match error {
                ScanError::EmptyResult => ScanError::AllEnginesExhausted { diagnostics },
                other => other,
            });
        };

        info!(from = %primary, to = %fallback, "Falling back after: {}", error);
        recorder.transition(
            Stage::AttemptPrimary,
            Stage::AttemptFallback,
            failure_cause(&error),
        );

        match self.attempt(fallback, &image, options, &mut recorder).await {
            Ok(result) => {
                recorder.transition(
                    Stage::AttemptFallback,
                    Stage::Done,
                    TransitionCause::TextFound,
                );
                Ok(finish(result, recorder))
            }
            Err(e) => {
                recorder.transition(Stage::AttemptFallback, Stage::Failed, failure_cause(&e));
                let diagnostics = finish_failed(recorder);
                Err(ScanError::AllEnginesExhausted { diagnostics })
            }
        }
    }

    /// Recognize several images one after another. A failure is reported in
    /// its item and never stops the rest of the batch.
    pub fn recognize_batch(
        self: Arc<Self>,
        images: Vec<(String, RawImage)>,
        mode: EngineMode,
        options: RecognizeOptions,
    ) -> impl Stream<Item = BatchItem> + Send + 'static {
        async_stream::stream! {
            for (index, (name, raw)) in images.into_iter().enumerate() {
                let result = self.recognize(raw, mode, &options).await;
                if let Err(e) = &result {
                    debug!(index, name = %name, "Batch item failed: {}", e);
                }
                yield BatchItem { index, name, result };
            }
        }
    }

    /// Free the local worker. Safe to call when none is loaded.
    pub async fn release_local_worker(&self) {
        self.local.release().await;
    }

    pub fn local_worker_loaded(&self) -> bool {
        self.local.is_loaded()
    }
}

fn failure_cause(error: &ScanError) -> TransitionCause {
    match error {
        ScanError::EmptyResult => TransitionCause::EmptyResult,
        _ => TransitionCause::EngineError,
    }
}

fn finish(result: EngineResult, recorder: DiagnosticsRecorder) -> RecognitionOutcome {
    let diagnostics = recorder.finish(&result.text);
    RecognitionOutcome {
        text: result.text,
        engine_used: result.engine,
        confidence: result.confidence,
        confidence_score: result.confidence_score,
        diagnostics,
    }
}

/// Finishes the trace of a failed call and logs it in full.
fn finish_failed(recorder: DiagnosticsRecorder) -> Option<Box<Diagnostics>> {
    let diagnostics = recorder.finish("")?;
    match serde_json::to_string(&diagnostics) {
        Ok(json) => warn!(call_id = %diagnostics.call_id, "Recognition failed: {}", json),
        Err(e) => warn!(call_id = %diagnostics.call_id, "Recognition failed ({})", e),
    }
    Some(Box::new(diagnostics))
}
