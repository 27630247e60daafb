//! Emotion classification results.

use std::cmp::Ordering;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::chunk::file_name_of;

/// Number of ranked predictions kept per result
pub const TOP_K: usize = 3;

/// Closed label set of the default speech-emotion model
pub const DEFAULT_LABELS: [&str; 8] = [
    "angry", "calm", "disgust", "fearful", "happy", "neutral", "sad", "surprised",
];

/// Raw classifier output for one label
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabelScore {
    pub label: String,
    pub confidence: f64,
}

impl LabelScore {
    pub fn new(label: impl Into<String>, confidence: f64) -> Self {
        Self {
            label: label.into(),
            confidence,
        }
    }
}

/// One ranked prediction as exported to consumers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmotionScore {
    pub emotion: String,

    /// Probability in [0, 1], rounded to 4 decimals
    pub confidence: f64,

    /// Probability as a percentage, rounded to 2 decimals
    pub percentage: f64,
}

/// Classification of one audio file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationResult {
    pub file_path: PathBuf,

    /// When the classification finished (ISO 8601)
    pub timestamp: DateTime<Utc>,

    /// Sorted by descending confidence, at most [`TOP_K`] entries
    pub predictions: Vec<EmotionScore>,

    pub top_emotion: String,
}

impl ClassificationResult {
    /// Rank raw scores into a result.
    ///
    /// Returns `None` when there is nothing to rank or a confidence falls
    /// outside [0, 1].
    pub fn from_scores(file_path: &Path, mut scores: Vec<LabelScore>, top_k: usize) -> Option<Self> {
        if scores.is_empty() || top_k == 0 {
            return None;
        }
        if scores
            .iter()
            .any(|s| !s.confidence.is_finite() || !(0.0..=1.0).contains(&s.confidence))
        {
            return None;
        }

        // Stable: equal confidences keep the collaborator's order
        scores.sort_by(|a, b| b.confidence.partial_cmp(&a.confidence).unwrap_or(Ordering::Equal));
        scores.truncate(top_k);

        let predictions: Vec<EmotionScore> = scores
            .into_iter()
            .map(|s| EmotionScore {
                emotion: s.label,
                confidence: round_to(s.confidence, 4),
                percentage: round_to(s.confidence * 100.0, 2),
            })
            .collect();

        let top_emotion = predictions[0].emotion.clone();

        Some(Self {
            file_path: file_path.to_path_buf(),
            timestamp: Utc::now(),
            predictions,
            top_emotion,
        })
    }

    pub fn file_name(&self) -> String {
        file_name_of(&self.file_path)
    }

    /// Predictions sorted descending and headed by `top_emotion`
    pub fn is_ranked(&self) -> bool {
        let sorted = self
            .predictions
            .windows(2)
            .all(|w| w[0].confidence >= w[1].confidence);
        let headed = self
            .predictions
            .first()
            .map(|p| p.emotion == self.top_emotion)
            .unwrap_or(false);
        sorted && headed
    }
}

fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scores() -> Vec<LabelScore> {
        vec![
            LabelScore::new("neutral", 0.10),
            LabelScore::new("angry", 0.55123),
            LabelScore::new("sad", 0.05),
            LabelScore::new("happy", 0.25),
            LabelScore::new("calm", 0.05),
        ]
    }

    #[test]
    fn test_ranking_and_truncation() {
        let result =
            ClassificationResult::from_scores(Path::new("/rx/1_2_000.wav"), scores(), TOP_K).unwrap();

        assert_eq!(result.predictions.len(), 3);
        assert_eq!(result.top_emotion, "angry");
        assert_eq!(result.predictions[1].emotion, "happy");
        assert_eq!(result.predictions[2].emotion, "neutral");
        assert!(result.is_ranked());
    }

    #[test]
    fn test_rounding() {
        let result =
            ClassificationResult::from_scores(Path::new("a.wav"), scores(), TOP_K).unwrap();
        assert_eq!(result.predictions[0].confidence, 0.5512);
        assert_eq!(result.predictions[0].percentage, 55.12);
    }

    #[test]
    fn test_rejects_empty_and_out_of_range() {
        assert!(ClassificationResult::from_scores(Path::new("a.wav"), vec![], TOP_K).is_none());
        assert!(ClassificationResult::from_scores(
            Path::new("a.wav"),
            vec![LabelScore::new("sad", 1.5)],
            TOP_K
        )
        .is_none());
        assert!(ClassificationResult::from_scores(
            Path::new("a.wav"),
            vec![LabelScore::new("sad", f64::NAN)],
            TOP_K
        )
        .is_none());
    }

    #[test]
    fn test_serialized_shape() {
        let result =
            ClassificationResult::from_scores(Path::new("/rx/1_2_000.wav"), scores(), TOP_K).unwrap();
        let json = serde_json::to_value(&result).unwrap();

        assert_eq!(json["top_emotion"], "angry");
        assert_eq!(json["file_path"], "/rx/1_2_000.wav");
        assert!(json["timestamp"].as_str().unwrap().contains('T'));
        assert_eq!(json["predictions"][0]["emotion"], "angry");
        assert_eq!(result.file_name(), "1_2_000.wav");
    }
}
