//! Shared fixtures for integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::extract::{Multipart, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::post;
use axum::{Json, Router};
use hound::{SampleFormat, WavSpec, WavWriter};
use serde_json::Value;
use tokio::net::TcpListener;

use callwatch::adapters::ChunkSink;
use callwatch::domain::ChunkName;
use callwatch::error::{PipelineError, Result};

/// Write a mono 16-bit tone of `seconds` at `sample_rate`
pub fn write_tone(path: &Path, seconds: u32, sample_rate: u32) {
    let spec = WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };
    let mut writer = WavWriter::create(path, spec).unwrap();
    for i in 0..(seconds * sample_rate) {
        let t = i as f32 / sample_rate as f32;
        let value = (t * 440.0 * std::f32::consts::TAU).sin() * 12_000.0;
        writer.write_sample(value as i16).unwrap();
    }
    writer.finalize().unwrap();
}

/// Chunk sink that records every attempt and optionally copies accepted
/// chunks into a receive directory (write then rename, like an upload handler)
#[derive(Default)]
pub struct RecordingSink {
    pub attempts: Mutex<Vec<String>>,
    pub receive_dir: Option<PathBuf>,
}

impl RecordingSink {
    pub fn copying_to(dir: &Path) -> Self {
        Self {
            attempts: Mutex::new(Vec::new()),
            receive_dir: Some(dir.to_path_buf()),
        }
    }

    pub fn attempts(&self) -> Vec<String> {
        self.attempts.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChunkSink for RecordingSink {
    fn name(&self) -> &str {
        "recording sink"
    }

    async fn deliver(&self, path: &Path, chunk: &ChunkName) -> Result<()> {
        self.attempts.lock().unwrap().push(chunk.file_name());

        if let Some(dir) = &self.receive_dir {
            let tmp = dir.join(format!(".{}.part", chunk.file_name()));
            tokio::fs::copy(path, &tmp)
                .await
                .map_err(|e| PipelineError::DeliveryFailed {
                    filename: chunk.file_name(),
                    reason: e.to_string(),
                })?;
            tokio::fs::rename(&tmp, dir.join(chunk.file_name())).await?;
        }
        Ok(())
    }
}

/// One multipart upload received by [`Responder`]
#[derive(Debug, Clone, Default)]
pub struct Upload {
    pub file_name: Option<String>,
    pub content_type: Option<String>,
    pub file_bytes: Vec<u8>,
    pub fields: HashMap<String, String>,
}

impl Upload {
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(String::as_str)
    }
}

#[derive(Clone)]
struct ResponderState {
    status: StatusCode,
    uploads: Arc<Mutex<Vec<Upload>>>,
    predictions: Arc<Mutex<Vec<Value>>>,
}

impl ResponderState {
    fn reply(&self) -> (StatusCode, Json<Value>) {
        let body = if self.status == StatusCode::OK {
            serde_json::json!({ "status": "ok" })
        } else {
            serde_json::json!({ "error": "boom" })
        };
        (self.status, Json(body))
    }
}

/// Loopback stand-in for the ingestion endpoint and the results consumer
pub struct Responder {
    pub url: String,
    uploads: Arc<Mutex<Vec<Upload>>>,
    predictions: Arc<Mutex<Vec<Value>>>,
}

impl Responder {
    /// Answer every request with `status`
    pub async fn start(status: u16) -> Self {
        let state = ResponderState {
            status: StatusCode::from_u16(status).unwrap(),
            uploads: Arc::new(Mutex::new(Vec::new())),
            predictions: Arc::new(Mutex::new(Vec::new())),
        };

        let app = Router::new()
            .route("/receive_audio", post(receive_audio))
            .route("/api/receive-prediction", post(receive_prediction))
            .with_state(state.clone());

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            url: format!("http://{}", addr),
            uploads: state.uploads,
            predictions: state.predictions,
        }
    }

    pub fn uploads(&self) -> Vec<Upload> {
        self.uploads.lock().unwrap().clone()
    }

    pub fn upload_names(&self) -> Vec<String> {
        self.uploads()
            .into_iter()
            .filter_map(|u| u.file_name)
            .collect()
    }

    pub fn predictions(&self) -> Vec<Value> {
        self.predictions.lock().unwrap().clone()
    }
}

async fn receive_audio(State(state): State<ResponderState>, mut multipart: Multipart) -> impl IntoResponse {
    let mut upload = Upload::default();

    while let Ok(Some(field)) = multipart.next_field().await {
        let name = field.name().unwrap_or("").to_string();
        if name == "file" {
            upload.file_name = field.file_name().map(str::to_string);
            upload.content_type = field.content_type().map(str::to_string);
            upload.file_bytes = field.bytes().await.map(|b| b.to_vec()).unwrap_or_default();
        } else if let Ok(text) = field.text().await {
            upload.fields.insert(name, text);
        }
    }

    state.uploads.lock().unwrap().push(upload);
    state.reply()
}

async fn receive_prediction(State(state): State<ResponderState>, Json(payload): Json<Value>) -> impl IntoResponse {
    state.predictions.lock().unwrap().push(payload);
    state.reply()
}
