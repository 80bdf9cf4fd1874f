use leptess::{LepTess, Variable};
use tracing::info;

use super::types::SegmentationMode;
use super::worker::{RecognitionWorker, WorkerFactory, WorkerOutput};
use crate::config::LocalEngineConfig;
use crate::error::{Result, ScanError};

/// Tesseract instance loaded with the configured languages.
pub struct TesseractWorker {
    tesseract: LepTess,
}

impl RecognitionWorker for TesseractWorker {
    fn recognize(&mut self, image: &[u8], mode: SegmentationMode) -> Result<WorkerOutput> {
        self.tesseract
            .set_variable(Variable::TesseditPagesegMode, &mode.psm().to_string())
            .map_err(|e| ScanError::Internal(format!("Failed to set segmentation mode: {e}")))?;
        self.tesseract
            .set_image_from_mem(image)
            .map_err(|e| ScanError::EngineReported(format!("Failed to set image: {e}")))?;

        let text = self
            .tesseract
            .get_utf8_text()
            .map_err(|e| ScanError::EngineReported(format!("Failed to extract text: {e}")))?;
        let confidence = self.tesseract.mean_text_conf().clamp(0, 100) as f32;

        Ok(WorkerOutput {
            text: text.trim().to_string(),
            confidence,
        })
    }
}

#[derive(Debug, Clone)]
pub struct TesseractFactory {
    languages: String,
    data_path: Option<String>,
}

impl TesseractFactory {
    pub fn new(config: &LocalEngineConfig) -> Self {
        Self {
            languages: config.languages.clone(),
            data_path: config.data_path.clone(),
        }
    }
}

impl WorkerFactory for TesseractFactory {
    fn create(&self) -> Result<Box<dyn RecognitionWorker>> {
        let tesseract = LepTess::new(self.data_path.as_deref(), &self.languages)
            .map_err(|e| ScanError::EngineUnavailable(format!("Tesseract not available: {e}")))?;
        info!(languages = %self.languages, "Tesseract OCR initialized");
        Ok(Box::new(TesseractWorker { tesseract }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_factory_reports_missing_language_as_unavailable() {
        let factory = TesseractFactory::new(&LocalEngineConfig {
            languages: "zz_not_a_language".to_string(),
            data_path: Some("/nonexistent/tessdata".to_string()),
            ..LocalEngineConfig::default()
        });

        assert!(matches!(
            factory.create(),
            Err(ScanError::EngineUnavailable(_))
        ));
    }
}
