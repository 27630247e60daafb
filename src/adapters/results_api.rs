//! Results consumer client.
//!
//! Endpoint: POST /api/receive-prediction (JSON)

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};

use super::ResultSink;
use crate::config::PublisherSettings;
use crate::domain::{ClassificationResult, EmotionScore};
use crate::error::{PipelineError, Result};

/// Payload for the results consumer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionPayload {
    /// Base name of the classified chunk
    pub file_name: String,
    pub top_emotion: String,
    pub timestamp: DateTime<Utc>,
    pub predictions: Vec<EmotionScore>,
    /// First `_` token of the file name (the caller)
    pub customer_name: String,
    pub user_id: String,
}

impl PredictionPayload {
    pub fn from_result(result: &ClassificationResult, user_id: &str) -> Self {
        let file_name = result.file_name();
        let customer_name = file_name
            .split('_')
            .next()
            .filter(|s| !s.is_empty())
            .unwrap_or("unknown")
            .to_string();

        Self {
            file_name,
            top_emotion: result.top_emotion.clone(),
            timestamp: result.timestamp,
            predictions: result.predictions.clone(),
            customer_name,
            user_id: user_id.to_string(),
        }
    }
}

/// Publishes each classification result once
pub struct ResultPublisher {
    url: String,
    user_id: String,
    client: reqwest::Client,
}

impl ResultPublisher {
    pub fn new(url: impl Into<String>, user_id: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| PipelineError::Config(format!("HTTP client: {}", e)))?;

        Ok(Self {
            url: url.into(),
            user_id: user_id.into(),
            client,
        })
    }

    pub fn from_settings(settings: &PublisherSettings) -> Result<Self> {
        Self::new(
            settings.url.clone(),
            settings.user_id.clone(),
            settings.request_timeout(),
        )
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl ResultSink for ResultPublisher {
    fn name(&self) -> &str {
        "results consumer"
    }

    async fn publish(&self, result: &ClassificationResult) -> Result<()> {
        let payload = PredictionPayload::from_result(result, &self.user_id);
        let failed = |reason: String| PipelineError::DeliveryFailed {
            filename: payload.file_name.clone(),
            reason,
        };

        let response = self
            .client
            .post(&self.url)
            .header("Accept", "application/json")
            .json(&payload)
            .send()
            .await
            .map_err(|e| failed(format!("results consumer unreachable: {}", e)))?;

        let status = response.status();
        if status != StatusCode::OK {
            let text = response.text().await.unwrap_or_default();
            return Err(failed(format!("results consumer returned {}: {}", status, text.trim())));
        }

        tracing::debug!("Published {} to {}", payload.file_name, self.url);
        Ok(())
    }
}
