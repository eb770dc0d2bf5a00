use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Emotion {
    Happy,
    Sad,
    Angry,
    Neutral,
    Surprised,
    Fearful,
    Disgusted,
}

impl Emotion {
    pub const ALL: [Emotion; 7] = [
        Emotion::Happy,
        Emotion::Sad,
        Emotion::Angry,
        Emotion::Neutral,
        Emotion::Surprised,
        Emotion::Fearful,
        Emotion::Disgusted,
    ];

    /// Matches the detector vocabulary exactly; labels are lowercase.
    pub fn parse(label: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|emotion| emotion.as_str() == label)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Happy => "happy",
            Self::Sad => "sad",
            Self::Angry => "angry",
            Self::Neutral => "neutral",
            Self::Surprised => "surprised",
            Self::Fearful => "fearful",
            Self::Disgusted => "disgusted",
        }
    }

    pub fn polarity(self) -> Polarity {
        match self {
            Self::Happy | Self::Surprised => Polarity::Positive,
            Self::Sad | Self::Angry | Self::Fearful | Self::Disgusted => Polarity::Negative,
            Self::Neutral => Polarity::Neutral,
        }
    }
}

impl fmt::Display for Emotion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Polarity {
    Positive,
    Negative,
    Neutral,
}

impl Polarity {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Positive => "positive",
            Self::Negative => "negative",
            Self::Neutral => "neutral",
        }
    }
}

impl fmt::Display for Polarity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Polarity of a raw emotion label. Labels outside the detector vocabulary
/// count as neutral so a drifting upstream model cannot break aggregation.
pub fn polarity_of(label: &str) -> Polarity {
    Emotion::parse(label)
        .map(Emotion::polarity)
        .unwrap_or(Polarity::Neutral)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum AgeGroup {
    Child,
    Teen,
    Adult,
    Senior,
}

impl AgeGroup {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Child => "Child",
            Self::Teen => "Teen",
            Self::Adult => "Adult",
            Self::Senior => "Senior",
        }
    }
}

impl fmt::Display for AgeGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AgeGroup {
    type Err = TaxonomyError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "Child" => Ok(Self::Child),
            "Teen" => Ok(Self::Teen),
            "Adult" => Ok(Self::Adult),
            "Senior" => Ok(Self::Senior),
            other => Err(TaxonomyError::UnknownAgeGroup(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum TaxonomyError {
    #[error("age must be a finite, non-negative number (got {0})")]
    InvalidAge(f64),
    #[error("unknown age group `{0}`")]
    UnknownAgeGroup(String),
}

/// Buckets an age estimate. Each bucket includes its upper edge, and
/// fractional estimates fall through the same comparisons.
pub fn age_group_of(age: f64) -> Result<AgeGroup, TaxonomyError> {
    if !age.is_finite() || age < 0.0 {
        return Err(TaxonomyError::InvalidAge(age));
    }
    let group = if age <= 12.0 {
        AgeGroup::Child
    } else if age <= 19.0 {
        AgeGroup::Teen
    } else if age <= 59.0 {
        AgeGroup::Adult
    } else {
        AgeGroup::Senior
    };
    Ok(group)
}
