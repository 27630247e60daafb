//! Adapter interfaces for external systems.
//!
//! The pipeline talks to two HTTP collaborators: the ingestion endpoint that
//! receives chunks, and the results consumer that receives classifications.
//! Both sit behind a trait so loops can be driven by in-process fakes.

pub mod ingestion;
pub mod results_api;

use std::path::Path;

use async_trait::async_trait;

use crate::domain::{ChunkName, ClassificationResult};
use crate::error::Result;

pub use ingestion::IngestionClient;
pub use results_api::{PredictionPayload, ResultPublisher};

/// Receiver of staged chunks
#[async_trait]
pub trait ChunkSink: Send + Sync {
    /// Human-readable sink name
    fn name(&self) -> &str;

    /// Deliver one chunk; `Ok` only when the receiver confirmed it
    async fn deliver(&self, path: &Path, chunk: &ChunkName) -> Result<()>;
}

/// Consumer of classification results
#[async_trait]
pub trait ResultSink: Send + Sync {
    fn name(&self) -> &str;

    async fn publish(&self, result: &ClassificationResult) -> Result<()>;
}
