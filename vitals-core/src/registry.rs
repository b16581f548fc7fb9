//! Supported vital-sign codes and their clinical thresholds.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::{Thresholds, VitalsError};

/// Static description of one supported measurement type.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VitalDescriptor {
    pub code: String,
    pub name: String,
    pub canonical_unit: String,
    pub thresholds: Thresholds,
}

impl VitalDescriptor {
    pub fn new(
        code: impl Into<String>,
        name: impl Into<String>,
        canonical_unit: impl Into<String>,
        thresholds: Thresholds,
    ) -> Self {
        Self {
            code: code.into(),
            name: name.into(),
            canonical_unit: canonical_unit.into(),
            thresholds,
        }
    }
}

/// LOINC code, display name, unit, high, low.
const STANDARD_VITALS: [(&str, &str, &str, f64, f64); 10] = [
    ("8480-6", "Systolic Blood Pressure", "mmHg", 140.0, 90.0),
    ("8462-4", "Diastolic Blood Pressure", "mmHg", 90.0, 60.0),
    ("8867-4", "Heart Rate", "/min", 100.0, 60.0),
    ("9279-1", "Respiratory Rate", "/min", 24.0, 12.0),
    ("8310-5", "Body Temperature", "Cel", 38.0, 35.0),
    ("2708-6", "Oxygen Saturation", "%", 100.0, 90.0),
    ("29463-7", "Body Weight", "kg", 150.0, 30.0),
    ("8302-1", "Body Height", "cm", 220.0, 100.0),
    ("39156-5", "Body Mass Index (BMI)", "kg/m2", 30.0, 18.5),
    ("41653-7", "Glucose", "mg/dL", 180.0, 70.0),
];

/// Lookup table from vocabulary code to descriptor.
///
/// Built once at startup and shared by reference; a code missing here is an
/// unsupported vital, not an error.
#[derive(Debug, Clone, PartialEq)]
pub struct CodeRegistry {
    descriptors: BTreeMap<String, VitalDescriptor>,
}

impl CodeRegistry {
    /// Build a registry, rejecting duplicate or empty codes and inverted thresholds.
    pub fn new(
        descriptors: impl IntoIterator<Item = VitalDescriptor>,
    ) -> Result<Self, VitalsError> {
        let mut map = BTreeMap::new();
        for descriptor in descriptors {
            if let Err(err) = check_descriptor(&descriptor, &map) {
                warn!(code = %descriptor.code, error = %err, "rejecting code registry");
                return Err(err);
            }
            map.insert(descriptor.code.clone(), descriptor);
        }
        debug!(codes = map.len(), "built code registry");
        Ok(Self { descriptors: map })
    }

    /// The curated vital-signs vocabulary.
    pub fn standard() -> Self {
        let descriptors = STANDARD_VITALS
            .iter()
            .map(|&(code, name, unit, high, low)| {
                let descriptor =
                    VitalDescriptor::new(code, name, unit, Thresholds::new(Some(high), Some(low)));
                (code.to_string(), descriptor)
            })
            .collect();
        Self { descriptors }
    }

    pub fn lookup(&self, code: &str) -> Option<&VitalDescriptor> {
        self.descriptors.get(code)
    }

    pub fn codes(&self) -> impl Iterator<Item = &str> {
        self.descriptors.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = &VitalDescriptor> {
        self.descriptors.values()
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }
}

fn check_descriptor(
    descriptor: &VitalDescriptor,
    existing: &BTreeMap<String, VitalDescriptor>,
) -> Result<(), VitalsError> {
    if descriptor.code.trim().is_empty() {
        return Err(VitalsError::InvalidRegistry(
            "descriptor code cannot be empty".into(),
        ));
    }
    if let Thresholds {
        high: Some(high),
        low: Some(low),
    } = descriptor.thresholds
    {
        if low >= high {
            return Err(VitalsError::InvalidRegistry(format!(
                "code {}: low threshold {low} must be below high threshold {high}",
                descriptor.code
            )));
        }
    }
    if existing.contains_key(&descriptor.code) {
        return Err(VitalsError::InvalidRegistry(format!(
            "duplicate code {}",
            descriptor.code
        )));
    }
    Ok(())
}

impl Default for CodeRegistry {
    fn default() -> Self {
        Self::standard()
    }
}
