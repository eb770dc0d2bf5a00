use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::taxonomy::AgeGroup;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("record is missing required field `{0}`")]
    MissingField(&'static str),
    #[error("field `{field}` is out of range: {reason}")]
    OutOfRange { field: &'static str, reason: String },
}

/// Record as it arrives from the store or the wire, before validation.
/// Accepts camelCase keys as well as the snake_case column names.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawDetectionRecord {
    pub id: Option<String>,
    pub emotion: Option<String>,
    #[serde(alias = "emotion_confidence")]
    pub emotion_confidence: Option<f64>,
    #[serde(alias = "age_estimate")]
    pub age_estimate: Option<i64>,
    #[serde(alias = "age_group")]
    pub age_group: Option<String>,
    pub gender: Option<String>,
    #[serde(alias = "gender_confidence")]
    pub gender_confidence: Option<f64>,
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(alias = "session_id")]
    pub session_id: Option<String>,
}

/// One detected face at one sampling tick. Immutable once built; every
/// instance has passed validation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", try_from = "RawDetectionRecord")]
pub struct DetectionRecord {
    id: String,
    emotion: String,
    emotion_confidence: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    age_estimate: Option<u32>,
    age_group: AgeGroup,
    gender: String,
    gender_confidence: f64,
    timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    session_id: Option<String>,
}

impl DetectionRecord {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn emotion(&self) -> &str {
        &self.emotion
    }

    pub fn emotion_confidence(&self) -> f64 {
        self.emotion_confidence
    }

    pub fn age_estimate(&self) -> Option<u32> {
        self.age_estimate
    }

    pub fn age_group(&self) -> AgeGroup {
        self.age_group
    }

    pub fn gender(&self) -> &str {
        &self.gender
    }

    pub fn gender_confidence(&self) -> f64 {
        self.gender_confidence
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }
}

impl TryFrom<RawDetectionRecord> for DetectionRecord {
    type Error = ValidationError;

    fn try_from(raw: RawDetectionRecord) -> Result<Self, Self::Error> {
        let id = raw
            .id
            .filter(|id| !id.trim().is_empty())
            .ok_or(ValidationError::MissingField("id"))?;
        let emotion = raw
            .emotion
            .filter(|emotion| !emotion.is_empty())
            .ok_or(ValidationError::MissingField("emotion"))?;
        let emotion_confidence = confidence(
            "emotionConfidence",
            raw.emotion_confidence
                .ok_or(ValidationError::MissingField("emotionConfidence"))?,
        )?;
        let age_estimate = raw
            .age_estimate
            .map(|age| {
                u32::try_from(age).map_err(|_| ValidationError::OutOfRange {
                    field: "ageEstimate",
                    reason: format!("{age} is not a non-negative age"),
                })
            })
            .transpose()?;
        let age_group = raw
            .age_group
            .ok_or(ValidationError::MissingField("ageGroup"))?
            .parse::<AgeGroup>()
            .map_err(|err| ValidationError::OutOfRange {
                field: "ageGroup",
                reason: err.to_string(),
            })?;
        let gender = raw.gender.ok_or(ValidationError::MissingField("gender"))?;
        let gender_confidence = confidence(
            "genderConfidence",
            raw.gender_confidence
                .ok_or(ValidationError::MissingField("genderConfidence"))?,
        )?;
        let timestamp = raw
            .timestamp
            .ok_or(ValidationError::MissingField("timestamp"))?;

        Ok(Self {
            id,
            emotion,
            emotion_confidence,
            age_estimate,
            age_group,
            gender,
            gender_confidence,
            timestamp,
            session_id: raw.session_id,
        })
    }
}

fn confidence(field: &'static str, value: f64) -> Result<f64, ValidationError> {
    if value.is_finite() && (0.0..=1.0).contains(&value) {
        Ok(value)
    } else {
        Err(ValidationError::OutOfRange {
            field,
            reason: format!("{value} is outside [0, 1]"),
        })
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use chrono::{DateTime, Utc};

    use super::{DetectionRecord, RawDetectionRecord};

    pub fn raw(id: &str, emotion: &str, age_group: &str, gender: &str, timestamp: &str) -> RawDetectionRecord {
        RawDetectionRecord {
            id: Some(id.to_string()),
            emotion: Some(emotion.to_string()),
            emotion_confidence: Some(0.9),
            age_estimate: Some(30),
            age_group: Some(age_group.to_string()),
            gender: Some(gender.to_string()),
            gender_confidence: Some(0.8),
            timestamp: Some(ts(timestamp)),
            session_id: None,
        }
    }

    pub fn record(id: &str, emotion: &str, age_group: &str, gender: &str, timestamp: &str) -> DetectionRecord {
        DetectionRecord::try_from(raw(id, emotion, age_group, gender, timestamp))
            .expect("fixture record is valid")
    }

    /// Parses `YYYY-MM-DDTHH:MM:SS` as UTC.
    pub fn ts(value: &str) -> DateTime<Utc> {
        format!("{value}Z").parse().expect("fixture timestamp parses")
    }
}
