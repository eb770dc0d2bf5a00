use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use thiserror::Error;
use tracing::info;
use uuid::Uuid;

use crate::metrics::DETECTIONS_INGESTED_TOTAL;
use crate::store::{RecordStore, StoreError};
use crate::taxonomy::{age_group_of, polarity_of, TaxonomyError};
use crate::types::{DetectionRecord, RawDetectionRecord, ValidationError};

/// Raw output of the face model for one face.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FaceDetection {
    /// Expression label to probability.
    pub expressions: BTreeMap<String, f64>,
    pub age: f64,
    pub gender: String,
    #[serde(alias = "genderProbability")]
    pub gender_confidence: f64,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub session_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum DetectionError {
    #[error("detection carries no usable expression scores")]
    NoExpressions,
    #[error(transparent)]
    Age(#[from] TaxonomyError),
    #[error(transparent)]
    Record(#[from] ValidationError),
}

#[derive(Debug, Error)]
pub enum IngestError {
    #[error(transparent)]
    Detection(#[from] DetectionError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Order in which the face model reports its expression scores.
const DETECTOR_ORDER: [&str; 7] = ["neutral", "happy", "sad", "angry", "fearful", "disgusted", "surprised"];

/// Unknown labels rank after the model's own, alphabetically.
fn detector_rank(label: &str) -> usize {
    DETECTOR_ORDER
        .iter()
        .position(|known| *known == label)
        .unwrap_or(DETECTOR_ORDER.len())
}

/// Highest-scoring expression. On equal scores the label the model reports
/// later wins.
pub fn dominant_expression(expressions: &BTreeMap<String, f64>) -> Option<(&str, f64)> {
    expressions
        .iter()
        .filter(|(_, score)| score.is_finite())
        .max_by(|a, b| {
            a.1.partial_cmp(b.1)
                .unwrap_or(Ordering::Equal)
                .then_with(|| detector_rank(a.0).cmp(&detector_rank(b.0)))
        })
        .map(|(label, score)| (label.as_str(), *score))
}

impl FaceDetection {
    /// Builds the stored record. The age group is derived from the
    /// unrounded estimate; the stored estimate is rounded.
    pub fn into_record(self, id: String, observed_at: DateTime<Utc>) -> Result<DetectionRecord, DetectionError> {
        let (emotion, emotion_confidence) = dominant_expression(&self.expressions)
            .map(|(label, score)| (label.to_string(), score))
            .ok_or(DetectionError::NoExpressions)?;
        let age_group = age_group_of(self.age)?;

        let raw = RawDetectionRecord {
            id: Some(id),
            emotion: Some(emotion),
            emotion_confidence: Some(emotion_confidence),
            age_estimate: Some(self.age.round() as i64),
            age_group: Some(age_group.to_string()),
            gender: Some(self.gender),
            gender_confidence: Some(self.gender_confidence),
            timestamp: Some(self.timestamp.unwrap_or(observed_at)),
            session_id: self.session_id,
        };
        Ok(DetectionRecord::try_from(raw)?)
    }
}

/// Converts detections into records and persists them.
pub struct DetectionIngestor {
    store: Arc<dyn RecordStore>,
    worker_id: String,
}

impl DetectionIngestor {
    pub fn new(store: Arc<dyn RecordStore>, worker_id: String) -> Self {
        Self { store, worker_id }
    }

    pub async fn ingest(&self, detection: FaceDetection) -> Result<DetectionRecord, IngestError> {
        let record = detection.into_record(Uuid::new_v4().to_string(), Utc::now())?;
        self.store.insert(&record).await?;

        let polarity = polarity_of(record.emotion());
        DETECTIONS_INGESTED_TOTAL
            .with_label_values(&[&self.worker_id, polarity.as_str()])
            .inc();
        info!(
            worker_id = %self.worker_id,
            record_id = %record.id(),
            emotion = %record.emotion(),
            age_group = %record.age_group(),
            "Detection stored"
        );
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryRecordStore;
    use crate::taxonomy::AgeGroup;
    use crate::types::fixtures::ts;
    use rstest::rstest;

    fn detection(expressions: &[(&str, f64)], age: f64) -> FaceDetection {
        FaceDetection {
            expressions: expressions
                .iter()
                .map(|(label, score)| (label.to_string(), *score))
                .collect(),
            age,
            gender: "female".to_string(),
            gender_confidence: 0.88,
            timestamp: None,
            session_id: Some("session-1".to_string()),
        }
    }

    #[test]
    fn test_dominant_expression_picks_highest() {
        let face = detection(&[("happy", 0.2), ("sad", 0.7), ("neutral", 0.1)], 30.0);
        assert_eq!(dominant_expression(&face.expressions), Some(("sad", 0.7)));
    }

    #[rstest]
    #[case(&[("angry", 0.5), ("happy", 0.5)], "angry")]
    #[case(&[("neutral", 0.4), ("surprised", 0.4), ("happy", 0.2)], "surprised")]
    #[case(&[("sad", 0.3), ("disgusted", 0.3)], "disgusted")]
    #[case(&[("happy", 0.5), ("smirk", 0.5)], "smirk")]
    fn test_dominant_expression_tie_follows_detector_order(#[case] scores: &[(&str, f64)], #[case] expected: &str) {
        let face = detection(scores, 30.0);
        assert_eq!(dominant_expression(&face.expressions).map(|(label, _)| label), Some(expected));
    }

    #[test]
    fn test_into_record_derives_group_before_rounding() {
        let face = detection(&[("happy", 0.9)], 12.4);
        let record = face.into_record("r1".to_string(), ts("2024-01-01T09:00:00")).unwrap();
        assert_eq!(record.age_group(), AgeGroup::Teen);
        assert_eq!(record.age_estimate(), Some(12));
        assert_eq!(record.emotion(), "happy");
        assert_eq!(record.session_id(), Some("session-1"));
        assert_eq!(record.timestamp(), ts("2024-01-01T09:00:00"));
    }

    #[test]
    fn test_into_record_rejects_empty_expressions() {
        let face = detection(&[], 30.0);
        let err = face.into_record("r1".to_string(), Utc::now()).unwrap_err();
        assert_eq!(err, DetectionError::NoExpressions);
    }

    #[test]
    fn test_into_record_rejects_negative_age() {
        let face = detection(&[("happy", 0.9)], -3.0);
        let err = face.into_record("r1".to_string(), Utc::now()).unwrap_err();
        assert!(matches!(err, DetectionError::Age(TaxonomyError::InvalidAge(_))));
    }

    #[test]
    fn test_deserialises_model_output() {
        let json = r#"{"expressions":{"happy":0.6,"neutral":0.4},"age":41.7,"gender":"male","genderProbability":0.97}"#;
        let face: FaceDetection = serde_json::from_str(json).unwrap();
        assert_eq!(face.gender_confidence, 0.97);
        assert_eq!(face.session_id, None);
    }

    #[tokio::test]
    async fn test_ingest_persists_record() {
        let store = Arc::new(MemoryRecordStore::new(8));
        let ingestor = DetectionIngestor::new(store.clone(), "w-test".to_string());
        let stored = ingestor
            .ingest(detection(&[("surprised", 0.8)], 67.0))
            .await
            .unwrap();
        assert_eq!(stored.age_group(), AgeGroup::Senior);

        let fetched = store.fetch_since(None).await.unwrap();
        assert_eq!(fetched, vec![stored]);
    }
}
