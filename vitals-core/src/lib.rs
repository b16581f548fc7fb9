//! Core model for normalized vital-sign readings and their anomaly labels.

use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

pub mod classify;
pub mod config;
pub mod export;
pub mod registry;

pub use classify::{classified, classify, classify_value};
pub use config::VitalsConfig;
pub use registry::{CodeRegistry, VitalDescriptor};

/// Bounds outside which a reading is flagged. Either side may be absent.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Default)]
pub struct Thresholds {
    pub high: Option<f64>,
    pub low: Option<f64>,
}

impl Thresholds {
    pub const fn new(high: Option<f64>, low: Option<f64>) -> Self {
        Self { high, low }
    }

    /// Thresholds for a purely descriptive measurement.
    pub const fn none() -> Self {
        Self {
            high: None,
            low: None,
        }
    }
}

/// Anomaly label assigned by the classifier.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum VitalStatus {
    Normal,
    High,
    Low,
}

impl VitalStatus {
    /// Machine-facing name, matching the serialized form.
    pub fn as_str(self) -> &'static str {
        match self {
            VitalStatus::Normal => "normal",
            VitalStatus::High => "high",
            VitalStatus::Low => "low",
        }
    }

    /// Label shown next to a reading.
    pub fn label(self) -> &'static str {
        match self {
            VitalStatus::Normal => "Normal",
            VitalStatus::High => "High Anomaly",
            VitalStatus::Low => "Low Anomaly",
        }
    }

    pub fn is_anomalous(self) -> bool {
        !matches!(self, VitalStatus::Normal)
    }
}

impl fmt::Display for VitalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// One measurement value at one point in time.
///
/// Created by the normalizer with `status` unset; the classifier fills it in.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Reading {
    pub subject_id: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub vital_code: String,
    pub vital_name: String,
    pub value: f64,
    pub unit: String,
    pub thresholds: Thresholds,
    #[serde(default)]
    pub status: Option<VitalStatus>,
}

/// Orders readings most-recent-first. Ties keep their input order.
pub fn sort_most_recent_first(readings: &mut [Reading]) {
    readings.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum NoticeLevel {
    Info,
    Warning,
    Error,
}

/// Message for the user about how a result was produced. Never fatal.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Notice {
    pub level: NoticeLevel,
    pub message: String,
}

impl Notice {
    pub fn info(message: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Info,
            message: message.into(),
        }
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Warning,
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Error,
            message: message.into(),
        }
    }

    pub fn fallback_in_use(reason: &str) -> Self {
        Self::warning(format!("Using synthetic fallback data: {reason}."))
    }

    pub fn malformed_batch() -> Self {
        Self::warning("Using synthetic fallback data due to malformed FHIR observations.")
    }

    pub fn fallback_unreadable(reason: &str) -> Self {
        Self::error(format!("Error loading synthetic fallback data: {reason}"))
    }

    pub fn no_readings() -> Self {
        Self::info("No vital signs available for this patient.")
    }

    pub fn no_data_in_range() -> Self {
        Self::info("No data in selected date range.")
    }
}

/// Every reading produced for one fetch, most recent first.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ReadingSet {
    pub readings: Vec<Reading>,
    pub is_fallback: bool,
    #[serde(default)]
    pub notices: Vec<Notice>,
}

impl ReadingSet {
    pub fn new(mut readings: Vec<Reading>, is_fallback: bool) -> Self {
        sort_most_recent_first(&mut readings);
        Self {
            readings,
            is_fallback,
            notices: Vec::new(),
        }
    }

    /// The floor of the failure cascade: nothing usable, not even the fallback.
    pub fn empty_fallback() -> Self {
        Self {
            readings: Vec::new(),
            is_fallback: true,
            notices: Vec::new(),
        }
    }

    pub fn push_notice(&mut self, notice: Notice) {
        self.notices.push(notice);
    }

    pub fn with_notices(mut self, notices: impl IntoIterator<Item = Notice>) -> Self {
        self.notices.extend(notices);
        self
    }

    pub fn readings(&self) -> &[Reading] {
        &self.readings
    }

    pub fn len(&self) -> usize {
        self.readings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.readings.is_empty()
    }

    /// Distinct vital names present, sorted alphabetically.
    pub fn vital_names(&self) -> Vec<&str> {
        self.readings
            .iter()
            .map(|reading| reading.vital_name.as_str())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    pub fn for_vital(&self, name: &str) -> Vec<&Reading> {
        self.readings
            .iter()
            .filter(|reading| reading.vital_name == name)
            .collect()
    }

    /// Readings whose UTC calendar date lies in `start..=end`, any vital.
    pub fn between_dates(&self, start: NaiveDate, end: NaiveDate) -> Vec<&Reading> {
        ReadingFilter {
            vital: None,
            from: Some(start),
            to: Some(end),
        }
        .apply(self)
    }

    /// The `n` most recent readings.
    pub fn latest(&self, n: usize) -> &[Reading] {
        &self.readings[..n.min(self.readings.len())]
    }

    /// Earliest and latest calendar dates (UTC) covered by the set.
    pub fn date_bounds(&self) -> Option<(NaiveDate, NaiveDate)> {
        // Sorted descending, so the ends of the slice are the bounds.
        let latest = self.readings.first()?.timestamp.date_naive();
        let earliest = self.readings.last()?.timestamp.date_naive();
        Some((earliest, latest))
    }
}

/// Narrows a [`ReadingSet`] the way the dashboard did: by vital name and an
/// inclusive calendar-date window.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReadingFilter {
    pub vital: Option<String>,
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
}

impl ReadingFilter {
    pub fn matches(&self, reading: &Reading) -> bool {
        if let Some(vital) = &self.vital {
            if &reading.vital_name != vital {
                return false;
            }
        }

        let date = reading.timestamp.date_naive();
        if self.from.is_some_and(|from| date < from) {
            return false;
        }
        if self.to.is_some_and(|to| date > to) {
            return false;
        }
        true
    }

    /// Applies the filter, keeping order.
    pub fn apply<'a>(&self, set: &'a ReadingSet) -> Vec<&'a Reading> {
        set.readings
            .iter()
            .filter(|reading| self.matches(reading))
            .collect()
    }
}

/// Errors raised by the core model.
#[derive(Debug, thiserror::Error)]
pub enum VitalsError {
    #[error("invalid code registry: {0}")]
    InvalidRegistry(String),
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("export failed: {0}")]
    Export(String),
}
