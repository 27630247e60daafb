//! Ingestion endpoint client.
//!
//! Endpoint: POST /receive_audio (multipart)
//! Fields: `file` (the chunk), `caller`, `timestamp`, `chunk_index`

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::StatusCode;

use super::ChunkSink;
use crate::config::DeliverySettings;
use crate::domain::{file_name_of, ChunkName};
use crate::error::{PipelineError, Result};

/// Multipart upload client for the ingestion endpoint
pub struct IngestionClient {
    endpoint: String,
    client: reqwest::Client,
}

impl IngestionClient {
    /// Create a client with a per-request timeout
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| PipelineError::Config(format!("HTTP client: {}", e)))?;

        Ok(Self {
            endpoint: endpoint.into(),
            client,
        })
    }

    pub fn from_settings(settings: &DeliverySettings) -> Result<Self> {
        Self::new(settings.endpoint.clone(), settings.request_timeout())
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl ChunkSink for IngestionClient {
    fn name(&self) -> &str {
        "ingestion endpoint"
    }

    async fn deliver(&self, path: &Path, chunk: &ChunkName) -> Result<()> {
        // Upload under the staged name, the same key the ledger records
        let filename = file_name_of(path);
        let failed = |reason: String| PipelineError::DeliveryFailed {
            filename: filename.clone(),
            reason,
        };

        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| failed(format!("read chunk: {}", e)))?;

        let file_part = Part::bytes(bytes)
            .file_name(filename.clone())
            .mime_str(mime_for(&chunk.extension))
            .map_err(|e| failed(e.to_string()))?;

        let form = Form::new()
            .text("caller", chunk.caller.clone())
            .text("timestamp", chunk.unique_id.clone())
            .text("chunk_index", chunk.index.to_string())
            .part("file", file_part);

        let response = self
            .client
            .post(&self.endpoint)
            .multipart(form)
            .send()
            .await
            .map_err(|e| failed(format!("request failed: {}", e)))?;

        let status = response.status();
        if status != StatusCode::OK {
            let text = response.text().await.unwrap_or_default();
            return Err(failed(format!("status {}: {}", status, text.trim())));
        }

        Ok(())
    }
}

fn mime_for(extension: &str) -> &'static str {
    match extension.to_ascii_lowercase().as_str() {
        "wav" => "audio/wav",
        "mp3" => "audio/mpeg",
        "flac" => "audio/flac",
        "ogg" => "audio/ogg",
        "m4a" => "audio/mp4",
        _ => "application/octet-stream",
    }
}
