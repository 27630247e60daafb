//! Waveform loading for inference.
//!
//! Every waveform handed to a classifier is mono, 16 kHz, peak normalized
//! to [-1, 1] and at least one second long.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use hound::{SampleFormat, WavReader};
use rubato::{FftFixedIn, Resampler};
use tokio::process::Command;
use tokio::time::timeout;

use crate::error::{PipelineError, Result};
use crate::ingest::splitter::DEFAULT_FFMPEG_TIMEOUT;

/// Model input sample rate
pub const SAMPLE_RATE: u32 = 16_000;

/// Shortest clip worth classifying (one second)
pub const MIN_SAMPLES: usize = SAMPLE_RATE as usize;

const RESAMPLER_CHUNK_SIZE: usize = 1024;

/// Mono f32 samples at [`SAMPLE_RATE`]
#[derive(Debug, Clone, PartialEq)]
pub struct Waveform {
    samples: Vec<f32>,
}

impl Waveform {
    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn sample_rate(&self) -> u32 {
        SAMPLE_RATE
    }

    pub fn duration(&self) -> Duration {
        Duration::from_secs_f64(self.samples.len() as f64 / SAMPLE_RATE as f64)
    }

    /// Samples as little-endian f32 bytes
    pub fn to_le_bytes(&self) -> Vec<u8> {
        self.samples.iter().flat_map(|s| s.to_le_bytes()).collect()
    }

    /// Normalize decoded audio into a model-ready waveform
    pub fn prepare(path: &Path, interleaved: Vec<f32>, channels: u16, sample_rate: u32) -> Result<Self> {
        if channels == 0 || sample_rate == 0 {
            return Err(PipelineError::classification(path, "invalid audio header"));
        }

        let mono = downmix(interleaved, channels);
        let mut samples = resample(path, &mono, sample_rate, SAMPLE_RATE)?;

        let peak = samples.iter().fold(0.0f32, |acc, s| acc.max(s.abs()));
        if peak > 0.0 {
            for s in samples.iter_mut() {
                *s /= peak;
            }
        }

        if samples.len() < MIN_SAMPLES {
            return Err(PipelineError::classification(
                path,
                format!(
                    "audio too short ({:.2}s < 1s)",
                    samples.len() as f64 / SAMPLE_RATE as f64
                ),
            ));
        }

        Ok(Self { samples })
    }
}

/// Decodes audio files into [`Waveform`]s
#[derive(Debug, Clone)]
pub struct WaveformLoader {
    ffmpeg_path: String,
    timeout: Duration,
}

impl WaveformLoader {
    /// `ffmpeg_path` decodes anything that is not WAV
    pub fn new(ffmpeg_path: impl Into<String>) -> Self {
        Self {
            ffmpeg_path: ffmpeg_path.into(),
            timeout: DEFAULT_FFMPEG_TIMEOUT,
        }
    }

    /// Kill an ffmpeg decode that runs longer than `timeout`
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub async fn load(&self, path: &Path) -> Result<Waveform> {
        let is_wav = path
            .extension()
            .map(|e| e.eq_ignore_ascii_case("wav"))
            .unwrap_or(false);

        if is_wav {
            let owned = path.to_path_buf();
            let (samples, channels, rate) = tokio::task::spawn_blocking(move || read_wav(&owned))
                .await
                .map_err(|e| PipelineError::classification(path, e))??;
            Waveform::prepare(path, samples, channels, rate)
        } else {
            let samples = self.decode_with_ffmpeg(path).await?;
            Waveform::prepare(path, samples, 1, SAMPLE_RATE)
        }
    }

    /// Decode to mono f32le at the model rate
    async fn decode_with_ffmpeg(&self, path: &Path) -> Result<Vec<f32>> {
        let run = Command::new(&self.ffmpeg_path)
            .arg("-v")
            .arg("error")
            .arg("-i")
            .arg(path)
            .arg("-f")
            .arg("f32le")
            .arg("-ac")
            .arg("1")
            .arg("-ar")
            .arg(SAMPLE_RATE.to_string())
            .arg("-")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output();

        let output = timeout(self.timeout, run)
            .await
            .map_err(|_| PipelineError::TimedOut {
                what: format!("{} decode of {}", self.ffmpeg_path, path.display()),
                after: self.timeout,
            })?
            .map_err(|e| PipelineError::classification(path, format!("Failed to run {}: {}", self.ffmpeg_path, e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(PipelineError::classification(
                path,
                format!("decode failed: {}", stderr.trim()),
            ));
        }

        Ok(output
            .stdout
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect())
    }
}

/// Interleaved samples scaled to [-1, 1], channel count and sample rate
fn read_wav(path: &Path) -> Result<(Vec<f32>, u16, u32)> {
    let unreadable = |e: hound::Error| PipelineError::classification(path, format!("unreadable WAV: {}", e));

    let mut reader = WavReader::open(path).map_err(unreadable)?;
    let spec = reader.spec();

    let samples = match spec.sample_format {
        SampleFormat::Float => reader
            .samples::<f32>()
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(unreadable)?,
        SampleFormat::Int => {
            let scale = (1i64 << (spec.bits_per_sample.clamp(1, 32) - 1)) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 / scale))
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(unreadable)?
        }
    };

    Ok((samples, spec.channels, spec.sample_rate))
}

fn downmix(interleaved: Vec<f32>, channels: u16) -> Vec<f32> {
    if channels <= 1 {
        return interleaved;
    }
    let channels = channels as usize;
    interleaved
        .chunks_exact(channels)
        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
        .collect()
}

/// Band-limited resampling; output is `len * out_rate / in_rate` samples,
/// time-aligned with the input
fn resample(path: &Path, samples: &[f32], in_rate: u32, out_rate: u32) -> Result<Vec<f32>> {
    if samples.is_empty() || in_rate == out_rate {
        return Ok(samples.to_vec());
    }
    let failed = |e: String| PipelineError::classification(path, format!("resample failed: {}", e));

    let mut resampler = FftFixedIn::<f32>::new(in_rate as usize, out_rate as usize, RESAMPLER_CHUNK_SIZE, 1, 1)
        .map_err(|e| failed(e.to_string()))?;

    let expected = (samples.len() as f64 * out_rate as f64 / in_rate as f64).round() as usize;
    let delay = resampler.output_delay();
    let mut output = Vec::with_capacity(expected + delay + resampler.output_frames_max());
    let mut chunk = Vec::new();
    let mut pos = 0;

    // Zeros past the end of the input flush the filter delay
    while output.len() < expected + delay {
        // The resampler rounds its chunk size to whole FFT blocks
        chunk.resize(resampler.input_frames_next(), 0.0);
        let take = (samples.len() - pos).min(chunk.len());
        chunk[..take].copy_from_slice(&samples[pos..pos + take]);
        chunk[take..].fill(0.0);
        pos += take;

        let out = resampler
            .process(&[&chunk[..]], None)
            .map_err(|e| failed(e.to_string()))?;
        match out.first() {
            Some(channel) if !channel.is_empty() => output.extend_from_slice(channel),
            _ => return Err(failed("resampler produced no output".to_string())),
        }
    }

    output.drain(..delay);
    output.truncate(expected);
    Ok(output)
}
