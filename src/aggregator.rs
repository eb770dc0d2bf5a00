use std::collections::BTreeMap;
use std::fmt::Display;

use chrono::{DateTime, Local, TimeZone, Utc};
use serde::Serialize;
use thiserror::Error;

use crate::taxonomy::{polarity_of, AgeGroup, Polarity};
use crate::types::{DetectionRecord, RawDetectionRecord, ValidationError};

pub const PEAK_HOUR_LIMIT: usize = 3;
pub const NEUTRAL_SENTIMENT: u8 = 50;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct HourlyBucket {
    pub positive: usize,
    pub negative: usize,
    pub neutral: usize,
    pub total: usize,
}

impl HourlyBucket {
    fn record(&mut self, polarity: Polarity) {
        self.total += 1;
        match polarity {
            Polarity::Positive => self.positive += 1,
            Polarity::Negative => self.negative += 1,
            Polarity::Neutral => self.neutral += 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PeakHour {
    pub hour: String,
    pub count: usize,
}

/// Derived statistics for one record set. Never patched; rebuilt by
/// [`aggregate`] whenever the set changes.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatisticsSnapshot {
    pub total: usize,
    pub emotion_counts: BTreeMap<String, usize>,
    pub age_group_counts: BTreeMap<AgeGroup, usize>,
    pub gender_counts: BTreeMap<String, usize>,
    pub sentiment_score: u8,
    pub positive: usize,
    pub negative: usize,
    pub neutral: usize,
    pub hourly_data: BTreeMap<String, HourlyBucket>,
    pub emotion_by_gender: BTreeMap<String, BTreeMap<String, usize>>,
    pub peak_unhappy_hours: Vec<PeakHour>,
}

impl StatisticsSnapshot {
    pub fn empty() -> Self {
        Self {
            total: 0,
            emotion_counts: BTreeMap::new(),
            age_group_counts: BTreeMap::new(),
            gender_counts: BTreeMap::new(),
            sentiment_score: NEUTRAL_SENTIMENT,
            positive: 0,
            negative: 0,
            neutral: 0,
            hourly_data: BTreeMap::new(),
            emotion_by_gender: BTreeMap::new(),
            peak_unhappy_hours: Vec::new(),
        }
    }
}

impl Default for StatisticsSnapshot {
    fn default() -> Self {
        Self::empty()
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
#[error("record #{index} rejected: {source}")]
pub struct AggregateError {
    pub index: usize,
    #[source]
    pub source: ValidationError,
}

/// Aggregates with hour buckets in the host's local time zone.
pub fn aggregate<'a, I>(records: I) -> StatisticsSnapshot
where
    I: IntoIterator<Item = &'a DetectionRecord>,
{
    aggregate_in(records, &Local)
}

/// Aggregates with hour buckets in `tz`. Records from different days that
/// share an hour of day land in the same bucket.
pub fn aggregate_in<'a, I, Tz>(records: I, tz: &Tz) -> StatisticsSnapshot
where
    I: IntoIterator<Item = &'a DetectionRecord>,
    Tz: TimeZone,
    Tz::Offset: Display,
{
    let mut snapshot = StatisticsSnapshot::empty();
    // Insertion order is the tie-break for peak hours.
    let mut unhappy: Vec<PeakHour> = Vec::new();

    for record in records {
        snapshot.total += 1;
        *snapshot
            .emotion_counts
            .entry(record.emotion().to_string())
            .or_default() += 1;
        *snapshot.age_group_counts.entry(record.age_group()).or_default() += 1;
        *snapshot
            .gender_counts
            .entry(record.gender().to_string())
            .or_default() += 1;

        let polarity = polarity_of(record.emotion());
        match polarity {
            Polarity::Positive => snapshot.positive += 1,
            Polarity::Negative => snapshot.negative += 1,
            Polarity::Neutral => snapshot.neutral += 1,
        }

        let hour = hour_label(record.timestamp(), tz);
        snapshot
            .hourly_data
            .entry(hour.clone())
            .or_default()
            .record(polarity);

        *snapshot
            .emotion_by_gender
            .entry(record.gender().to_string())
            .or_default()
            .entry(record.emotion().to_string())
            .or_default() += 1;

        if polarity == Polarity::Negative {
            match unhappy.iter_mut().find(|peak| peak.hour == hour) {
                Some(peak) => peak.count += 1,
                None => unhappy.push(PeakHour { hour, count: 1 }),
            }
        }
    }

    snapshot.sentiment_score = sentiment_score(snapshot.positive, snapshot.negative, snapshot.total);
    unhappy.sort_by(|a, b| b.count.cmp(&a.count));
    unhappy.truncate(PEAK_HOUR_LIMIT);
    snapshot.peak_unhappy_hours = unhappy;
    snapshot
}

/// Validates every raw record before aggregating; the first malformed
/// record aborts the whole pass.
pub fn try_aggregate<I>(raw: I) -> Result<StatisticsSnapshot, AggregateError>
where
    I: IntoIterator<Item = RawDetectionRecord>,
{
    try_aggregate_in(raw, &Local)
}

pub fn try_aggregate_in<I, Tz>(raw: I, tz: &Tz) -> Result<StatisticsSnapshot, AggregateError>
where
    I: IntoIterator<Item = RawDetectionRecord>,
    Tz: TimeZone,
    Tz::Offset: Display,
{
    let records = raw
        .into_iter()
        .enumerate()
        .map(|(index, record)| {
            DetectionRecord::try_from(record).map_err(|source| AggregateError { index, source })
        })
        .collect::<Result<Vec<_>, _>>()?;
    Ok(aggregate_in(&records, tz))
}

/// `round(((positive - negative) / total + 1) * 50)`, rounding halves up.
///
/// Evaluated in integers as `(100 * (p - n + t) + t) / (2 * t)`; the value
/// is never negative, so half-up and half-away-from-zero agree.
pub fn sentiment_score(positive: usize, negative: usize, total: usize) -> u8 {
    if total == 0 {
        return NEUTRAL_SENTIMENT;
    }
    let (p, n, t) = (positive as u64, negative as u64, total as u64);
    let numerator = 100 * (p + t).saturating_sub(n) + t;
    let score = numerator / (2 * t);
    score.min(100) as u8
}

pub fn hour_label<Tz>(timestamp: DateTime<Utc>, tz: &Tz) -> String
where
    Tz: TimeZone,
    Tz::Offset: Display,
{
    timestamp.with_timezone(tz).format("%H:00").to_string()
}
