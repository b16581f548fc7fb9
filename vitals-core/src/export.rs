//! Row-oriented (CSV) and record-oriented (JSON) serializations of readings.

use chrono::SecondsFormat;
use serde::Serialize;

use crate::{Reading, VitalsError};

const CSV_HEADER: [&str; 9] = [
    "subject_id",
    "timestamp",
    "vital_code",
    "vital_name",
    "value",
    "unit",
    "high_threshold",
    "low_threshold",
    "status",
];

#[derive(Serialize)]
struct CsvRow<'a> {
    subject_id: Option<&'a str>,
    timestamp: String,
    vital_code: &'a str,
    vital_name: &'a str,
    value: f64,
    unit: &'a str,
    high_threshold: Option<f64>,
    low_threshold: Option<f64>,
    status: Option<&'static str>,
}

impl<'a> From<&'a Reading> for CsvRow<'a> {
    fn from(reading: &'a Reading) -> Self {
        Self {
            subject_id: reading.subject_id.as_deref(),
            timestamp: reading
                .timestamp
                .to_rfc3339_opts(SecondsFormat::AutoSi, true),
            vital_code: &reading.vital_code,
            vital_name: &reading.vital_name,
            value: reading.value,
            unit: &reading.unit,
            high_threshold: reading.thresholds.high,
            low_threshold: reading.thresholds.low,
            status: reading.status.map(|status| status.as_str()),
        }
    }
}

/// CSV with a header row, even when there are no readings.
pub fn to_csv(readings: &[Reading]) -> Result<String, VitalsError> {
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(Vec::new());

    writer
        .write_record(CSV_HEADER)
        .map_err(|err| VitalsError::Export(err.to_string()))?;
    for reading in readings {
        writer
            .serialize(CsvRow::from(reading))
            .map_err(|err| VitalsError::Export(err.to_string()))?;
    }

    let bytes = writer
        .into_inner()
        .map_err(|err| VitalsError::Export(err.to_string()))?;
    String::from_utf8(bytes).map_err(|err| VitalsError::Export(err.to_string()))
}

/// JSON array with one object per reading.
pub fn to_json(readings: &[Reading]) -> Result<String, VitalsError> {
    serde_json::to_string_pretty(readings).map_err(|err| VitalsError::Export(err.to_string()))
}
