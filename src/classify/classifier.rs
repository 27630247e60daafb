//! Speech-emotion classifier boundary.
//!
//! The model itself runs out of process. [`CommandClassifier`] pipes the
//! waveform to a configured command as little-endian f32 on stdin and reads
//! a JSON array of `{"label", "confidence"}` objects from stdout.

use std::collections::HashSet;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::time::timeout;

use super::waveform::Waveform;
use crate::domain::LabelScore;

/// Default bound on a single classifier run
pub const DEFAULT_CLASSIFIER_TIMEOUT: Duration = Duration::from_secs(60);

/// Errors from a classifier invocation
#[derive(Debug, Error)]
pub enum ClassifierError {
    #[error("No classifier command configured")]
    NoCommand,

    #[error("Failed to run classifier: {0}")]
    Io(#[from] std::io::Error),

    #[error("Classifier exited with {status}: {stderr}")]
    Exit { status: String, stderr: String },

    #[error("Unparseable classifier output: {0}")]
    Output(#[from] serde_json::Error),

    #[error("Classifier returned unknown label: {0}")]
    UnknownLabel(String),

    #[error("Classifier returned no scores")]
    Empty,

    #[error("Classifier did not finish within {0:?}")]
    Timeout(Duration),
}

/// Scores a waveform against a closed label set
#[async_trait]
pub trait Classifier: Send + Sync {
    fn name(&self) -> &str;

    async fn classify(&self, waveform: &Waveform) -> Result<Vec<LabelScore>, ClassifierError>;
}

/// Classifier backed by an external command
pub struct CommandClassifier {
    program: String,
    args: Vec<String>,
    labels: HashSet<String>,
    timeout: Duration,
}

impl CommandClassifier {
    /// `command` is the program followed by its arguments
    pub fn new(command: &[String], labels: &[String]) -> Result<Self, ClassifierError> {
        let (program, args) = command.split_first().ok_or(ClassifierError::NoCommand)?;
        Ok(Self {
            program: program.clone(),
            args: args.to_vec(),
            labels: labels.iter().cloned().collect(),
            timeout: DEFAULT_CLASSIFIER_TIMEOUT,
        })
    }

    /// Kill the command if it runs longer than `timeout`
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl Classifier for CommandClassifier {
    fn name(&self) -> &str {
        &self.program
    }

    async fn classify(&self, waveform: &Waveform) -> Result<Vec<LabelScore>, ClassifierError> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        // stdin is fed from its own task while stdout is drained
        let writer = child.stdin.take().map(|mut stdin| {
            let bytes = waveform.to_le_bytes();
            tokio::spawn(async move {
                stdin.write_all(&bytes).await?;
                stdin.shutdown().await
            })
        });

        // Dropping the timed-out future drops the child, which kills it
        let output = timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| ClassifierError::Timeout(self.timeout))??;
        if let Some(writer) = writer {
            if let Ok(Err(e)) = writer.await {
                tracing::debug!("Classifier closed stdin early: {}", e);
            }
        }

        if !output.status.success() {
            return Err(ClassifierError::Exit {
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        let scores: Vec<LabelScore> = serde_json::from_slice(&output.stdout)?;
        validate_labels(scores, &self.labels)
    }
}

/// Reject empty output and labels outside `labels`
pub fn validate_labels(scores: Vec<LabelScore>, labels: &HashSet<String>) -> Result<Vec<LabelScore>, ClassifierError> {
    if scores.is_empty() {
        return Err(ClassifierError::Empty);
    }
    if let Some(unknown) = scores.iter().find(|s| !labels.contains(&s.label)) {
        return Err(ClassifierError::UnknownLabel(unknown.label.clone()));
    }
    Ok(scores)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::waveform::{MIN_SAMPLES, SAMPLE_RATE};
    use crate::domain::DEFAULT_LABELS;
    use std::path::Path;

    fn labels() -> Vec<String> {
        DEFAULT_LABELS.iter().map(|s| s.to_string()).collect()
    }

    fn shell(script: &str) -> Vec<String> {
        vec!["sh".to_string(), "-c".to_string(), script.to_string()]
    }

    fn waveform() -> Waveform {
        Waveform::prepare(Path::new("t.wav"), vec![0.1; MIN_SAMPLES], 1, SAMPLE_RATE).unwrap()
    }

    #[test]
    fn test_empty_command() {
        assert!(matches!(
            CommandClassifier::new(&[], &labels()),
            Err(ClassifierError::NoCommand)
        ));
    }

    #[tokio::test]
    async fn test_reads_scores_from_stdout() {
        let classifier = CommandClassifier::new(
            &shell(r#"test "$(wc -c | tr -d ' ')" -eq 64000 && echo '[{"label":"calm","confidence":0.8},{"label":"sad","confidence":0.2}]'"#),
            &labels(),
        )
        .unwrap();

        let scores = classifier.classify(&waveform()).await.unwrap();
        assert_eq!(scores, vec![LabelScore::new("calm", 0.8), LabelScore::new("sad", 0.2)]);
    }

    #[tokio::test]
    async fn test_unknown_label_is_rejected() {
        let classifier = CommandClassifier::new(
            &shell(r#"cat >/dev/null; echo '[{"label":"bored","confidence":1.0}]'"#),
            &labels(),
        )
        .unwrap();

        assert!(matches!(
            classifier.classify(&waveform()).await,
            Err(ClassifierError::UnknownLabel(label)) if label == "bored"
        ));
    }

    #[tokio::test]
    async fn test_failing_command() {
        let classifier = CommandClassifier::new(&shell("cat >/dev/null; echo boom >&2; exit 3"), &labels()).unwrap();

        match classifier.classify(&waveform()).await {
            Err(ClassifierError::Exit { stderr, .. }) => assert_eq!(stderr, "boom"),
            other => panic!("expected exit error, got {:?}", other.map(|s| s.len())),
        }
    }

    #[tokio::test]
    async fn test_hung_command_is_killed() {
        let classifier = CommandClassifier::new(&shell("cat >/dev/null; sleep 30"), &labels())
            .unwrap()
            .with_timeout(Duration::from_millis(200));

        let started = std::time::Instant::now();
        let result = classifier.classify(&waveform()).await;
        assert!(matches!(result, Err(ClassifierError::Timeout(t)) if t == Duration::from_millis(200)));
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_garbage_output() {
        let classifier = CommandClassifier::new(&shell("cat >/dev/null; echo not-json"), &labels()).unwrap();
        assert!(matches!(
            classifier.classify(&waveform()).await,
            Err(ClassifierError::Output(_))
        ));
    }
}
