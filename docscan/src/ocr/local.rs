use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use serde_json::json;
use tracing::{debug, warn};

use super::engine::RecognitionEngine;
use super::tesseract::TesseractFactory;
use super::types::{
    has_recognizable_text, EngineId, EngineResult, NormalizedImage, RecognizeOptions,
    SegmentationMode,
};
use super::worker::{WorkerFactory, WorkerHandle, WorkerOutput};
use crate::config::LocalEngineConfig;
use crate::error::{Result, ScanError};

/// On-device recognition through a lazily created worker.
///
/// Each call runs the primary segmentation mode, then at most one pass with
/// the fallback mode when the first pass is blank or below the confidence
/// threshold.
#[derive(Clone)]
pub struct LocalEngine {
    worker: WorkerHandle,
    primary_mode: SegmentationMode,
    fallback_mode: SegmentationMode,
    confidence_threshold: f32,
}

impl LocalEngine {
    pub fn new(config: &LocalEngineConfig) -> Self {
        Self::with_factory(config, Arc::new(TesseractFactory::new(config)))
    }

    pub fn with_factory(config: &LocalEngineConfig, factory: Arc<dyn WorkerFactory>) -> Self {
        Self {
            worker: WorkerHandle::new(factory),
            primary_mode: config.primary_mode,
            fallback_mode: config.fallback_mode,
            confidence_threshold: config.confidence_threshold,
        }
    }

    pub fn workers_created(&self) -> usize {
        self.worker.workers_created()
    }

    fn needs_fallback(&self, output: &WorkerOutput) -> bool {
        !has_recognizable_text(&output.text) || output.confidence < self.confidence_threshold
    }
}

#[async_trait]
impl RecognitionEngine for LocalEngine {
    fn id(&self) -> EngineId {
        EngineId::Local
    }

    async fn recognize(
        &self,
        image: &NormalizedImage,
        _options: &RecognizeOptions,
    ) -> Result<EngineResult> {
        let started = Instant::now();
        let primary = self
            .worker
            .recognize(Arc::clone(&image.bytes), self.primary_mode)
            .await?;

        let mut passes = vec![json!({
            "mode": self.primary_mode.to_string(),
            "confidence": primary.confidence,
            "chars": primary.text.len(),
        })];

        let best = if self.needs_fallback(&primary) {
            debug!(
                confidence = primary.confidence,
                threshold = self.confidence_threshold,
                "Primary local pass weak, retrying with {}",
                self.fallback_mode
            );
            match self
                .worker
                .recognize(Arc::clone(&image.bytes), self.fallback_mode)
                .await
            {
                Ok(fallback) => {
                    passes.push(json!({
                        "mode": self.fallback_mode.to_string(),
                        "confidence": fallback.confidence,
                        "chars": fallback.text.len(),
                    }));
                    pick_better(primary, fallback)
                }
                Err(e) => {
                    warn!("Fallback local pass failed, keeping primary result: {}", e);
                    passes.push(json!({
                        "mode": self.fallback_mode.to_string(),
                        "error": e.to_string(),
                    }));
                    primary
                }
            }
        } else {
            primary
        };

        if !has_recognizable_text(&best.text) {
            return Err(ScanError::EmptyResult);
        }

        let raw = json!({
            "passes": passes,
            "elapsed_ms": started.elapsed().as_millis() as u64,
        });

        Ok(EngineResult::new(EngineId::Local, best.text, Some(best.confidence))
            .with_raw_diagnostics(raw))
    }

    async fn release(&self) {
        self.worker.release().await;
    }

    fn is_loaded(&self) -> bool {
        self.worker.is_loaded()
    }
}

/// Longer non-empty text wins; ties keep the primary pass.
fn pick_better(primary: WorkerOutput, fallback: WorkerOutput) -> WorkerOutput {
    let primary_len = primary.text.trim().chars().count();
    let fallback_len = fallback.text.trim().chars().count();
    if fallback_len > primary_len {
        fallback
    } else {
        primary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ocr::worker::RecognitionWorker;
    use pretty_assertions::assert_eq;
    use std::sync::Mutex;

    /// Worker answering from a fixed script keyed by segmentation mode.
    struct ScriptedWorker {
        answers: Vec<(SegmentationMode, Result<WorkerOutput>)>,
        calls: Arc<Mutex<Vec<SegmentationMode>>>,
    }

    impl RecognitionWorker for ScriptedWorker {
        fn recognize(&mut self, _image: &[u8], mode: SegmentationMode) -> Result<WorkerOutput> {
            if let Ok(mut calls) = self.calls.lock() {
                calls.push(mode);
            }
            match self.answers.iter().find(|(m, _)| *m == mode) {
                Some((_, Ok(out))) => Ok(out.clone()),
                Some((_, Err(e))) => Err(ScanError::EngineReported(e.to_string())),
                None => Ok(WorkerOutput {
                    text: String::new(),
                    confidence: 0.0,
                }),
            }
        }
    }

    struct ScriptedFactory {
        answers: Vec<(SegmentationMode, (String, f32, bool))>,
        calls: Arc<Mutex<Vec<SegmentationMode>>>,
    }

    impl WorkerFactory for ScriptedFactory {
        fn create(&self) -> Result<Box<dyn RecognitionWorker>> {
            let answers = self
                .answers
                .iter()
                .map(|(mode, (text, confidence, fails))| {
                    let answer = if *fails {
                        Err(ScanError::EngineReported("segmentation failed".to_string()))
                    } else {
                        Ok(WorkerOutput {
                            text: text.clone(),
                            confidence: *confidence,
                        })
                    };
                    (*mode, answer)
                })
                .collect();
            Ok(Box::new(ScriptedWorker {
                answers,
                calls: Arc::clone(&self.calls),
            }))
        }
    }

    fn engine_with(
        answers: Vec<(SegmentationMode, (&str, f32, bool))>,
    ) -> (LocalEngine, Arc<Mutex<Vec<SegmentationMode>>>) {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let factory = ScriptedFactory {
            answers: answers
                .into_iter()
                .map(|(m, (t, c, f))| (m, (t.to_string(), c, f)))
                .collect(),
            calls: Arc::clone(&calls),
        };
        let engine = LocalEngine::with_factory(&LocalEngineConfig::default(), Arc::new(factory));
        (engine, calls)
    }

    fn image() -> NormalizedImage {
        NormalizedImage::new(vec![0u8; 16], 4, 4)
    }

    #[tokio::test]
    async fn test_confident_primary_skips_fallback() {
        let (engine, calls) =
            engine_with(vec![(SegmentationMode::SingleBlock, ("RECEIPT 42", 88.0, false))]);

        let result = engine
            .recognize(&image(), &RecognizeOptions::default())
            .await
            .unwrap();

        assert_eq!(result.text, "RECEIPT 42");
        assert_eq!(result.confidence_score, Some(88.0));
        assert_eq!(*calls.lock().unwrap(), vec![SegmentationMode::SingleBlock]);
    }

    #[tokio::test]
    async fn test_low_confidence_runs_exactly_one_fallback() {
        let (engine, calls) = engine_with(vec![
            (SegmentationMode::SingleBlock, ("RE", 12.0, false)),
            (SegmentationMode::Auto, ("RECEIPT TOTAL", 61.0, false)),
        ]);

        let result = engine
            .recognize(&image(), &RecognizeOptions::default())
            .await
            .unwrap();

        assert_eq!(result.text, "RECEIPT TOTAL");
        assert_eq!(
            *calls.lock().unwrap(),
            vec![SegmentationMode::SingleBlock, SegmentationMode::Auto]
        );
    }

    #[tokio::test]
    async fn test_shorter_fallback_keeps_primary() {
        let (engine, _) = engine_with(vec![
            (SegmentationMode::SingleBlock, ("PAID IN FULL", 20.0, false)),
            (SegmentationMode::Auto, ("PAID", 70.0, false)),
        ]);

        let result = engine
            .recognize(&image(), &RecognizeOptions::default())
            .await
            .unwrap();
        assert_eq!(result.text, "PAID IN FULL");
    }

    #[tokio::test]
    async fn test_failed_fallback_keeps_primary() {
        let (engine, _) = engine_with(vec![
            (SegmentationMode::SingleBlock, ("faint", 10.0, false)),
            (SegmentationMode::Auto, ("", 0.0, true)),
        ]);

        let result = engine
            .recognize(&image(), &RecognizeOptions::default())
            .await
            .unwrap();
        assert_eq!(result.text, "faint");
        let raw = result.raw_diagnostics.unwrap();
        assert_eq!(raw["passes"].as_array().map(Vec::len), Some(2));
    }

    #[tokio::test]
    async fn test_blank_after_both_passes_is_empty_result() {
        let (engine, calls) = engine_with(vec![]);

        let result = engine
            .recognize(&image(), &RecognizeOptions::default())
            .await;

        assert!(matches!(result, Err(ScanError::EmptyResult)));
        assert_eq!(calls.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_confident_placeholder_output_is_empty_result() {
        let (engine, calls) = engine_with(vec![
            (SegmentationMode::SingleBlock, ("|", 92.0, false)),
            (SegmentationMode::Auto, ("--", 85.0, false)),
        ]);

        let result = engine
            .recognize(&image(), &RecognizeOptions::default())
            .await;

        assert!(matches!(result, Err(ScanError::EmptyResult)));
        assert_eq!(
            *calls.lock().unwrap(),
            vec![SegmentationMode::SingleBlock, SegmentationMode::Auto]
        );
    }

    #[tokio::test]
    async fn test_release_drops_worker() {
        let (engine, _) =
            engine_with(vec![(SegmentationMode::SingleBlock, ("TOTAL", 95.0, false))]);

        assert!(!engine.is_loaded());
        engine
            .recognize(&image(), &RecognizeOptions::default())
            .await
            .unwrap();
        assert!(engine.is_loaded());

        engine.release().await;
        assert!(!engine.is_loaded());
        assert_eq!(engine.workers_created(), 1);
    }
}
