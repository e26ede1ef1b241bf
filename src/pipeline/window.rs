//! Sliding visit-interval window and frequency scoring
//!
//! Each identity keeps one flag per interval key (a fixed-width timestamp
//! bucket such as `202401010002`). The score is the number of flagged keys
//! still inside the live window, so repeated visits inside one interval only
//! count once.

use chrono::{DateTime, Duration, Months, Utc};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntervalUnit {
    Minute,
    Month,
}

impl IntervalUnit {
    pub fn as_str(&self) -> &'static str {
        match self {
            IntervalUnit::Minute => "minute",
            IntervalUnit::Month => "month",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "minute" | "minutes" => Some(IntervalUnit::Minute),
            "month" | "months" => Some(IntervalUnit::Month),
            _ => None,
        }
    }

    /// Zero-padded key format; string order equals chronological order
    fn key_format(&self) -> &'static str {
        match self {
            IntervalUnit::Minute => "%Y%m%d%H%M",
            IntervalUnit::Month => "%Y%m",
        }
    }

    pub fn interval_key(&self, at: DateTime<Utc>) -> String {
        at.format(self.key_format()).to_string()
    }

    /// `at` moved back by `units` intervals
    pub fn rewind(&self, at: DateTime<Utc>, units: u32) -> DateTime<Utc> {
        match self {
            IntervalUnit::Minute => at - Duration::minutes(i64::from(units)),
            IntervalUnit::Month => at
                .checked_sub_months(Months::new(units))
                .unwrap_or(DateTime::<Utc>::MIN_UTC),
        }
    }
}

/// Window length, granularity and classification threshold
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowPolicy {
    pub unit: IntervalUnit,
    /// Number of intervals in the live window
    pub window: u32,
    /// Minimum score for a frequent visitor
    pub threshold: u32,
}

impl WindowPolicy {
    pub fn new(unit: IntervalUnit, window: u32, threshold: u32) -> Self {
        Self {
            unit,
            window,
            threshold,
        }
    }

    /// Short minute-based window used for demos and tests
    pub fn demo() -> Self {
        Self::new(IntervalUnit::Minute, 5, 2)
    }

    /// Month-based window for real traffic
    pub fn production() -> Self {
        Self::new(IntervalUnit::Month, 12, 5)
    }
}

impl Default for WindowPolicy {
    fn default() -> Self {
        Self::demo()
    }
}

#[derive(Debug, Clone)]
pub struct VisitWindow {
    policy: WindowPolicy,
    intervals: BTreeMap<String, bool>,
    score: u32,
    frequent: bool,
}

impl VisitWindow {
    pub fn new(policy: WindowPolicy) -> Self {
        Self {
            policy,
            intervals: BTreeMap::new(),
            score: 0,
            frequent: false,
        }
    }

    /// Trim expired intervals, flag the current one and reclassify
    ///
    /// Returns the frequent-visitor status after this visit.
    pub fn record_visit(&mut self, now: DateTime<Utc>) -> bool {
        let unit = self.policy.unit;
        let current_key = unit.interval_key(now);
        let window_start_key = unit.interval_key(unit.rewind(now, self.policy.window));

        self.trim(&window_start_key);

        let flagged = self.intervals.entry(current_key).or_insert(false);
        if !*flagged {
            *flagged = true;
            self.score += 1;
        }

        self.frequent = self.score >= self.policy.threshold;

        debug_assert_eq!(
            self.score as usize,
            self.intervals.values().filter(|v| **v).count()
        );
        debug_assert!(self.score <= self.policy.window + 1);

        self.frequent
    }

    /// Drop every key strictly before `window_start_key`
    fn trim(&mut self, window_start_key: &str) {
        let mut score = self.score;
        self.intervals.retain(|key, visited| {
            if key.as_str() >= window_start_key {
                return true;
            }
            if *visited {
                score = score.saturating_sub(1);
            }
            log::debug!(
                "Interval {} left the window starting {} (score now {})",
                key,
                window_start_key,
                score
            );
            false
        });
        self.score = score;
    }

    pub fn frequency_score(&self) -> u32 {
        self.score
    }

    pub fn is_frequent_visitor(&self) -> bool {
        self.frequent
    }

    pub fn policy(&self) -> WindowPolicy {
        self.policy
    }

    /// Interval keys currently flagged as visited, oldest first
    pub fn visited_intervals(&self) -> Vec<&str> {
        self.intervals
            .iter()
            .filter(|(_, visited)| **visited)
            .map(|(key, _)| key.as_str())
            .collect()
    }
}
