//! Emotion classification of received chunks.
//!
//! ```text
//! received_audio/ → notify → queue → worker → Classifier → ResultsLog
//!                                                   ↓
//!                                              ResultSink(s)
//! ```

pub mod classifier;
pub mod monitor;
pub mod waveform;

pub use classifier::{Classifier, ClassifierError, CommandClassifier};
pub use monitor::{ClassificationMonitor, MonitorConfig, SweepResult};
pub use waveform::{Waveform, WaveformLoader, MIN_SAMPLES, SAMPLE_RATE};
