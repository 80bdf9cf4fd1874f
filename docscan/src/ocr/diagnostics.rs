use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use super::types::EngineId;
use crate::error::ScanError;

/// Orchestrator states. Every call starts in `Preprocess` and ends in
/// `Done` or `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Preprocess,
    AttemptPrimary,
    AttemptFallback,
    Done,
    Failed,
}

/// Why the orchestrator moved from one stage to the next.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionCause {
    Preprocessed,
    PreprocessingDegraded,
    TextFound,
    EmptyResult,
    EngineError,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Transition {
    pub from: Stage,
    pub to: Stage,
    pub cause: TransitionCause,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptOutcome {
    Success,
    Empty,
    Error,
}

#[derive(Debug, Clone, Serialize)]
pub struct AttemptRecord {
    pub engine: EngineId,
    pub outcome: AttemptOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<&'static str>,
    pub elapsed_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw: Option<serde_json::Value>,
}

/// Per-call trace returned to callers that asked for it.
#[derive(Debug, Clone, Serialize)]
pub struct Diagnostics {
    pub call_id: Uuid,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub original_dimensions: Option<(u32, u32)>,
    pub normalized_dimensions: (u32, u32),
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preprocessing_degraded: Option<String>,
    pub attempts: Vec<AttemptRecord>,
    pub transitions: Vec<Transition>,
    pub text_length: usize,
    pub token_count: usize,
    pub total_ms: u64,
}

/// Collects [`Diagnostics`] while a call runs. When disabled every method is
/// a no-op, so recording never changes the recognition path.
pub struct DiagnosticsRecorder {
    started: Instant,
    inner: Option<Diagnostics>,
}

impl DiagnosticsRecorder {
    pub fn new(enabled: bool) -> Self {
        let inner = enabled.then(|| Diagnostics {
            call_id: Uuid::new_v4(),
            started_at: Utc::now(),
            original_dimensions: None,
            normalized_dimensions: (0, 0),
            preprocessing_degraded: None,
            attempts: Vec::new(),
            transitions: Vec::new(),
            text_length: 0,
            token_count: 0,
            total_ms: 0,
        });
        Self {
            started: Instant::now(),
            inner,
        }
    }

    pub fn preprocessing(
        &mut self,
        original: Option<(u32, u32)>,
        normalized: (u32, u32),
        degraded: Option<&str>,
    ) {
        if let Some(d) = self.inner.as_mut() {
            d.original_dimensions = original;
            d.normalized_dimensions = normalized;
            d.preprocessing_degraded = degraded.map(str::to_string);
        }
    }

    pub fn transition(&mut self, from: Stage, to: Stage, cause: TransitionCause) {
        if let Some(d) = self.inner.as_mut() {
            d.transitions.push(Transition { from, to, cause });
        }
    }

    pub fn success(&mut self, engine: EngineId, elapsed_ms: u64, raw: Option<serde_json::Value>) {
        if let Some(d) = self.inner.as_mut() {
            d.attempts.push(AttemptRecord {
                engine,
                outcome: AttemptOutcome::Success,
                reason: None,
                error_kind: None,
                elapsed_ms,
                raw,
            });
        }
    }

    pub fn failure(
        &mut self,
        engine: EngineId,
        elapsed_ms: u64,
        error: &ScanError,
        trace: Option<serde_json::Value>,
    ) {
        if let Some(d) = self.inner.as_mut() {
            let outcome = match error {
                ScanError::EmptyResult => AttemptOutcome::Empty,
                _ => AttemptOutcome::Error,
            };
            d.attempts.push(AttemptRecord {
                engine,
                outcome,
                reason: Some(error.to_string()),
                error_kind: Some(error.kind()),
                elapsed_ms,
                raw: trace,
            });
        }
    }

    pub fn finish(mut self, text: &str) -> Option<Diagnostics> {
        let total_ms = self.started.elapsed().as_millis() as u64;
        self.inner.take().map(|mut d| {
            d.text_length = text.chars().count();
            d.token_count = text.split_whitespace().count();
            d.total_ms = total_ms;
            d
        })
    }
}
