use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, info};

use super::types::SegmentationMode;
use crate::error::{Result, ScanError};

/// Text and mean word confidence (0-100) from one local recognition pass.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkerOutput {
    pub text: String,
    pub confidence: f32,
}

/// A loaded, stateful recognizer. Calls are serialized by [`WorkerHandle`].
pub trait RecognitionWorker: Send {
    fn recognize(&mut self, image: &[u8], mode: SegmentationMode) -> Result<WorkerOutput>;
}

/// Builds a worker on first use. Creation is expensive (model data is loaded).
pub trait WorkerFactory: Send + Sync {
    fn create(&self) -> Result<Box<dyn RecognitionWorker>>;
}

/// Lazily created, shared worker.
///
/// At most one worker exists per handle. Concurrent first calls wait on the
/// slot lock and the second caller finds the worker already built.
#[derive(Clone)]
pub struct WorkerHandle {
    factory: Arc<dyn WorkerFactory>,
    slot: Arc<Mutex<Option<Box<dyn RecognitionWorker>>>>,
    loaded: Arc<AtomicBool>,
    created: Arc<AtomicUsize>,
}

impl WorkerHandle {
    pub fn new(factory: Arc<dyn WorkerFactory>) -> Self {
        Self {
            factory,
            slot: Arc::new(Mutex::new(None)),
            loaded: Arc::new(AtomicBool::new(false)),
            created: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Run one recognition pass on the blocking pool, creating the worker if needed.
    pub async fn recognize(
        &self,
        image: Arc<[u8]>,
        mode: SegmentationMode,
    ) -> Result<WorkerOutput> {
        let factory = Arc::clone(&self.factory);
        let slot = Arc::clone(&self.slot);
        let loaded = Arc::clone(&self.loaded);
        let created = Arc::clone(&self.created);

        tokio::task::spawn_blocking(move || {
            let mut guard = slot.blocking_lock();

            if guard.is_none() {
                info!("Creating local OCR worker");
                *guard = Some(factory.create()?);
                loaded.store(true, Ordering::SeqCst);
                created.fetch_add(1, Ordering::SeqCst);
            }

            let worker = guard
                .as_mut()
                .ok_or_else(|| ScanError::Internal("Local OCR worker missing".to_string()))?;

            debug!(mode = %mode, bytes = image.len(), "Running local OCR pass");
            worker.recognize(&image, mode)
        })
        .await
        .map_err(|e| ScanError::Internal(format!("Local OCR task panicked: {e}")))?
    }

    /// Drop the worker if one exists. The next call recreates it.
    pub async fn release(&self) {
        let mut guard = self.slot.lock().await;
        if guard.take().is_some() {
            self.loaded.store(false, Ordering::SeqCst);
            info!("Released local OCR worker");
        }
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded.load(Ordering::SeqCst)
    }

    /// Number of workers built over the lifetime of this handle.
    pub fn workers_created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }
}
