use async_trait::async_trait;

use super::types::{EngineId, EngineResult, NormalizedImage, RecognizeOptions};
use crate::error::Result;

/// A backend that turns a normalized image into text.
///
/// Implementations report blank output as [`crate::error::ScanError::EmptyResult`]
/// where they can tell; the orchestrator re-checks every result anyway.
#[async_trait]
pub trait RecognitionEngine: Send + Sync {
    fn id(&self) -> EngineId;

    async fn recognize(
        &self,
        image: &NormalizedImage,
        options: &RecognizeOptions,
    ) -> Result<EngineResult>;

    /// Drop any long-lived resources. Must be safe to call repeatedly.
    async fn release(&self) {}

    /// Whether a long-lived resource is currently held.
    fn is_loaded(&self) -> bool {
        false
    }
}
