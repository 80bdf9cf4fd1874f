//! OCR (Optical Character Recognition) Module
//!
//! Turns photographed paperwork into text. A call flows through:
//!
//! 1. `preprocessing`: resize, grayscale, contrast, optional binarize/sharpen,
//!    re-encoded as PNG. Never fails; undecodable input passes through.
//! 2. `OcrOrchestrator`: picks engines by `EngineMode`. `Auto` tries the remote
//!    engine first and falls back to the local engine exactly once.
//! 3. Engines implementing `RecognitionEngine`:
//!    - `RemoteEngineClient`: OCR.space compatible HTTP API with per-attempt
//!      timeout, escalating backoff and empty-result mitigations
//!    - `LocalEngine`: Tesseract via leptess behind a lazily created worker
//!
//! # Configuration
//!
//! Read from the environment into `Config` (see `config.rs`): pipeline switches
//! under `OCR_PIPELINE_*`/`OCR_DEBUG`, preprocessing under `OCR_MAX_*` and
//! friends, remote engine under `OCR_REMOTE_*`, local engine under `OCR_LOCAL_*`.
//!
//! # Usage
//!
//! ```rust,ignore
//! let orchestrator = OcrOrchestrator::new(&config)?;
//! let options = orchestrator.default_options();
//! let outcome = orchestrator.recognize(raw, EngineMode::Auto, &options).await?;
//! ```

mod api;
mod diagnostics;
mod engine;
mod local;
mod orchestrator;
mod preprocessing;
mod tesseract;
mod types;
mod worker;

pub use api::RemoteEngineClient;
pub use diagnostics::{
    AttemptOutcome, AttemptRecord, Diagnostics, Stage, Transition, TransitionCause,
};
pub use engine::RecognitionEngine;
pub use local::LocalEngine;
pub use orchestrator::{BatchItem, BatchLine, OcrOrchestrator};
pub use preprocessing::{
    adjust_contrast, binarize, grayscale, otsu_threshold, preprocess_image, reencode_image,
    resize_to_fit, sharpen, PreprocessOutput,
};
pub use tesseract::{TesseractFactory, TesseractWorker};
pub use types::{
    ConfidenceLabel, EngineId, EngineMode, EngineResult, EngineVariant, Mitigation,
    NormalizedImage, ProcessingOptions, RawImage, RecognitionOutcome, RecognizeOptions,
    RemoteOptions, SegmentationMode,
};
pub use worker::{RecognitionWorker, WorkerFactory, WorkerHandle, WorkerOutput};
