//! Threshold-based anomaly labelling.
//!
//! Memoryless: each reading is judged on its own value against the thresholds
//! it carries. Comparisons are strict, so a value sitting exactly on a
//! threshold is `Normal`.

use crate::{Reading, Thresholds, VitalStatus};

pub fn classify_value(value: f64, thresholds: &Thresholds) -> VitalStatus {
    if thresholds.high.is_some_and(|high| value > high) {
        VitalStatus::High
    } else if thresholds.low.is_some_and(|low| value < low) {
        VitalStatus::Low
    } else {
        VitalStatus::Normal
    }
}

/// Sets `status` on every reading in place.
pub fn classify(readings: &mut [Reading]) {
    for reading in readings.iter_mut() {
        reading.status = Some(classify_value(reading.value, &reading.thresholds));
    }
}

pub fn classified(mut readings: Vec<Reading>) -> Vec<Reading> {
    classify(&mut readings);
    readings
}
