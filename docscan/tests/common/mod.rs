#![allow(dead_code)]

use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use docscan::config::{Config, PipelineConfig, RemoteEngineConfig};
use docscan::error::Result;
use docscan::ocr::{
    LocalEngine, RawImage, RecognitionWorker, RemoteEngineClient, SegmentationMode,
    WorkerFactory, WorkerOutput,
};
use image::{ImageFormat, Rgb, RgbImage};
use wiremock::MockServer;

/// White page with dark horizontal bars standing in for lines of text.
pub fn document_png(width: u32, height: u32) -> Vec<u8> {
    let mut img = RgbImage::from_pixel(width, height, Rgb([245, 245, 240]));
    let line_height = (height / 12).max(2);
    for y in 0..height {
        let band = y / line_height;
        if band % 2 == 1 {
            for x in width / 10..width - width / 10 {
                img.put_pixel(x, y, Rgb([30, 30, 35]));
            }
        }
    }

    let mut bytes = Vec::new();
    img.write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
        .unwrap_or_else(|e| panic!("Failed to encode test image: {e}"));
    bytes
}

pub fn document_photo(width: u32, height: u32) -> RawImage {
    RawImage::new(document_png(width, height)).with_mime_type("image/png")
}

/// OCR.space style success body.
pub fn ocr_space_body(text: &str) -> serde_json::Value {
    serde_json::json!({
        "ParsedResults": [{ "ParsedText": text, "FileParseExitCode": 1, "ErrorMessage": "" }],
        "OCRExitCode": 1,
        "IsErroredOnProcessing": false,
        "ProcessingTimeInMilliseconds": "250"
    })
}

pub fn remote_config(server: &MockServer) -> RemoteEngineConfig {
    RemoteEngineConfig {
        base_url: format!("{}/parse/image", server.uri()),
        api_key: Some("integration-key".to_string()),
        timeout_secs: 5,
        backoff_ms: vec![10, 20],
        ..RemoteEngineConfig::default()
    }
}

pub fn test_config(server: &MockServer) -> Config {
    let mut config = Config::default();
    config.pipeline = PipelineConfig::default();
    config.remote = remote_config(server);
    config
}

/// Local worker that always answers with the same text and confidence.
pub struct FixedWorker {
    text: String,
    confidence: f32,
    passes: Arc<AtomicUsize>,
}

impl RecognitionWorker for FixedWorker {
    fn recognize(&mut self, _image: &[u8], _mode: SegmentationMode) -> Result<WorkerOutput> {
        self.passes.fetch_add(1, Ordering::SeqCst);
        Ok(WorkerOutput {
            text: self.text.clone(),
            confidence: self.confidence,
        })
    }
}

/// Factory for [`FixedWorker`] that counts creations and recognition passes.
#[derive(Clone)]
pub struct FixedFactory {
    text: String,
    confidence: f32,
    create_delay: Duration,
    pub created: Arc<AtomicUsize>,
    pub passes: Arc<AtomicUsize>,
}

impl FixedFactory {
    pub fn new(text: &str, confidence: f32) -> Self {
        Self {
            text: text.to_string(),
            confidence,
            create_delay: Duration::ZERO,
            created: Arc::new(AtomicUsize::new(0)),
            passes: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn with_create_delay(mut self, delay: Duration) -> Self {
        self.create_delay = delay;
        self
    }

    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    pub fn passes(&self) -> usize {
        self.passes.load(Ordering::SeqCst)
    }
}

impl WorkerFactory for FixedFactory {
    fn create(&self) -> Result<Box<dyn RecognitionWorker>> {
        std::thread::sleep(self.create_delay);
        self.created.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FixedWorker {
            text: self.text.clone(),
            confidence: self.confidence,
            passes: Arc::clone(&self.passes),
        }))
    }
}

/// Real remote client against `server` plus a local engine backed by `factory`.
pub fn engines(
    config: &Config,
    factory: &FixedFactory,
) -> (Arc<RemoteEngineClient>, Arc<LocalEngine>) {
    let remote = RemoteEngineClient::new(&config.remote)
        .unwrap_or_else(|e| panic!("Failed to build remote client: {e}"));
    let local = LocalEngine::with_factory(&config.local, Arc::new(factory.clone()));
    (Arc::new(remote), Arc::new(local))
}
