use std::collections::{HashSet, VecDeque};
use std::fmt::Display;

use chrono::{DateTime, TimeZone, Utc};

use crate::aggregator::{aggregate_in, StatisticsSnapshot};
use crate::types::DetectionRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    Added,
    Duplicate,
    OutsideWindow,
}

impl MergeOutcome {
    pub fn label(self) -> &'static str {
        match self {
            Self::Added => "added",
            Self::Duplicate => "duplicate",
            Self::OutsideWindow => "outside_window",
        }
    }
}

/// Records currently inside the active window, newest first. Grows through
/// [`WorkingSet::merge`]; [`WorkingSet::advance_to`] prunes when the window
/// start moves forward.
#[derive(Debug, Clone, Default)]
pub struct WorkingSet {
    lower_bound: Option<DateTime<Utc>>,
    records: VecDeque<DetectionRecord>,
    ids: HashSet<String>,
}

impl WorkingSet {
    pub fn new(lower_bound: Option<DateTime<Utc>>) -> Self {
        Self {
            lower_bound,
            records: VecDeque::new(),
            ids: HashSet::new(),
        }
    }

    pub fn lower_bound(&self) -> Option<DateTime<Utc>> {
        self.lower_bound
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.ids.contains(id)
    }

    /// Adds the initial fetch result (already newest first) behind anything
    /// merged while the fetch was in flight.
    pub fn seed(&mut self, fetched: Vec<DetectionRecord>) -> usize {
        let mut added = 0;
        for record in fetched {
            if !self.admits(&record) || self.ids.contains(record.id()) {
                continue;
            }
            self.ids.insert(record.id().to_string());
            self.records.push_back(record);
            added += 1;
        }
        added
    }

    /// Merges one live notification at the front of the set.
    pub fn merge(&mut self, record: DetectionRecord) -> MergeOutcome {
        if self.ids.contains(record.id()) {
            return MergeOutcome::Duplicate;
        }
        if !self.admits(&record) {
            return MergeOutcome::OutsideWindow;
        }
        self.ids.insert(record.id().to_string());
        self.records.push_front(record);
        MergeOutcome::Added
    }

    /// Moves the window start forward and drops records that fell out.
    /// Returns the number dropped, or `None` when the set cannot follow the
    /// new bound without a re-fetch (the window widened).
    pub fn advance_to(&mut self, lower_bound: Option<DateTime<Utc>>) -> Option<usize> {
        match (self.lower_bound, lower_bound) {
            (current, next) if current == next => Some(0),
            (Some(current), Some(next)) if next > current => {
                let before = self.records.len();
                let ids = &mut self.ids;
                self.records.retain(|record| {
                    let keep = record.timestamp() >= next;
                    if !keep {
                        ids.remove(record.id());
                    }
                    keep
                });
                self.lower_bound = Some(next);
                Some(before - self.records.len())
            }
            _ => None,
        }
    }

    pub fn records(&self) -> impl Iterator<Item = &DetectionRecord> {
        self.records.iter()
    }

    pub fn snapshot_in<Tz>(&self, tz: &Tz) -> StatisticsSnapshot
    where
        Tz: TimeZone,
        Tz::Offset: Display,
    {
        aggregate_in(&self.records, tz)
    }

    fn admits(&self, record: &DetectionRecord) -> bool {
        self.lower_bound
            .map_or(true, |bound| record.timestamp() >= bound)
    }
}
