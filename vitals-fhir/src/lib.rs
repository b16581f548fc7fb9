//! FHIR Observation bundles to normalized vital-sign `Reading`s.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde_json::Value;
use tracing::{debug, trace};
use vitals_core::{sort_most_recent_first, CodeRegistry, Reading, VitalDescriptor};

/// Timestamp fields in order of preference. Periods contribute their `start`.
const TIMESTAMP_FIELDS: [&str; 3] = ["effectiveDateTime", "effectiveInstant", "effectivePeriod"];

/// One `Observation` resource as received from a bundle.
#[derive(Debug, Clone, PartialEq)]
pub struct RawObservation {
    resource: Value,
    subject_hint: Option<String>,
}

impl RawObservation {
    /// Wraps a resource if it is an `Observation`.
    pub fn from_resource(resource: Value) -> Option<Self> {
        if resource.get("resourceType").and_then(Value::as_str) != Some("Observation") {
            return None;
        }
        Some(Self {
            resource,
            subject_hint: None,
        })
    }

    /// Subject the record was fetched for, used when the record itself names none.
    pub fn with_subject_hint(mut self, subject_id: impl Into<String>) -> Self {
        self.subject_hint = Some(subject_id.into());
        self
    }

    pub fn resource(&self) -> &Value {
        &self.resource
    }

    pub fn id(&self) -> Option<&str> {
        self.resource.get("id").and_then(Value::as_str)
    }

    /// Patient id from `subject.reference` (`Patient/<id>`, relative or absolute).
    pub fn patient_id(&self) -> Option<String> {
        let reference = self
            .resource
            .get("subject")
            .and_then(|subject| subject.get("reference"))
            .and_then(Value::as_str)?;
        if !reference.contains("Patient/") {
            return None;
        }
        reference
            .rsplit('/')
            .next()
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(str::to_string)
    }

    fn subject_id(&self) -> Option<String> {
        self.patient_id().or_else(|| self.subject_hint.clone())
    }

    fn label(&self) -> String {
        self.id().unwrap_or("observation-unknown").to_string()
    }
}

/// Batch-level failures. Per-record problems never surface here.
#[derive(Debug, thiserror::Error)]
pub enum NormalizeError {
    #[error("failed to parse bundle JSON: {0}")]
    Json(String),
    #[error("expected resourceType Bundle, received {0}")]
    NotABundle(String),
    #[error("observation {observation} has unparsable {field}: {value:?}")]
    MalformedTimestamp {
        observation: String,
        field: &'static str,
        value: String,
    },
}

/// Decode a bundle from a JSON string.
pub fn observations_from_bundle_str(bundle_json: &str) -> Result<Vec<RawObservation>, NormalizeError> {
    let value: Value =
        serde_json::from_str(bundle_json).map_err(|err| NormalizeError::Json(err.to_string()))?;
    observations_from_bundle_value(&value)
}

/// Pull every `Observation` out of a `Bundle`. Other resource kinds are dropped.
pub fn observations_from_bundle_value(bundle: &Value) -> Result<Vec<RawObservation>, NormalizeError> {
    let bundle_type = bundle
        .get("resourceType")
        .and_then(Value::as_str)
        .unwrap_or_default();

    if bundle_type != "Bundle" {
        return Err(NormalizeError::NotABundle(if bundle_type.is_empty() {
            "nothing".to_string()
        } else {
            bundle_type.to_string()
        }));
    }

    let Some(entries) = bundle.get("entry").and_then(Value::as_array) else {
        return Ok(Vec::new());
    };

    Ok(entries
        .iter()
        .filter_map(|entry| entry.get("resource"))
        .filter_map(|resource| RawObservation::from_resource(resource.clone()))
        .collect())
}

/// Convert observations into readings, most recent first.
///
/// Unsupported codes, missing values and missing timestamps drop the record
/// (or component) quietly. A timestamp that is present but unparsable anywhere
/// in the batch fails the whole batch, since the source can no longer be
/// trusted.
pub fn normalize(
    observations: &[RawObservation],
    registry: &CodeRegistry,
) -> Result<Vec<Reading>, NormalizeError> {
    let mut readings = Vec::new();

    for observation in observations {
        let Some(timestamp) = resolve_timestamp(observation)? else {
            debug!(observation = %observation.label(), "skipping observation without timestamp");
            continue;
        };

        readings.extend(observation_readings(observation, timestamp, registry));
    }

    sort_most_recent_first(&mut readings);
    Ok(readings)
}

/// How an observation carries its value(s).
#[derive(Debug)]
enum ObservationShape<'a> {
    /// A single `valueQuantity` under the observation's own code.
    Scalar { code: &'a Value, quantity: &'a Value },
    /// Several coded sub-measurements, e.g. a blood-pressure panel.
    Panel { components: &'a [Value] },
}

impl<'a> ObservationShape<'a> {
    fn of(resource: &'a Value) -> Option<Self> {
        if let Some(quantity) = resource.get("valueQuantity") {
            let code = resource.get("code")?;
            return Some(Self::Scalar { code, quantity });
        }

        resource
            .get("component")
            .and_then(Value::as_array)
            .map(|components| Self::Panel {
                components: components.as_slice(),
            })
    }
}

fn observation_readings(
    observation: &RawObservation,
    timestamp: DateTime<Utc>,
    registry: &CodeRegistry,
) -> Vec<Reading> {
    let Some(shape) = ObservationShape::of(observation.resource()) else {
        debug!(observation = %observation.label(), "skipping observation with no usable value shape");
        return Vec::new();
    };

    let subject_id = observation.subject_id();
    let make = |descriptor: &VitalDescriptor, value: f64, unit: Option<String>| Reading {
        subject_id: subject_id.clone(),
        timestamp,
        vital_code: descriptor.code.clone(),
        vital_name: descriptor.name.clone(),
        value,
        unit: unit.unwrap_or_else(|| descriptor.canonical_unit.clone()),
        thresholds: descriptor.thresholds,
        status: None,
    };

    match shape {
        ObservationShape::Scalar { code, quantity } => {
            let Some(descriptor) = registered_descriptor(code, registry) else {
                trace!(observation = %observation.label(), "unsupported code");
                return Vec::new();
            };
            match quantity_value(quantity) {
                Some((value, unit)) => vec![make(descriptor, value, unit)],
                None => {
                    debug!(observation = %observation.label(), "skipping non-numeric value");
                    Vec::new()
                }
            }
        }
        ObservationShape::Panel { components } => {
            let mut readings: Vec<Reading> = Vec::new();
            for component in components {
                let Some(descriptor) = component
                    .get("code")
                    .and_then(|code| registered_descriptor(code, registry))
                else {
                    trace!(observation = %observation.label(), "unsupported component code");
                    continue;
                };
                // The first component carrying a code wins.
                if readings.iter().any(|r| r.vital_code == descriptor.code) {
                    continue;
                }
                let Some((value, unit)) = component.get("valueQuantity").and_then(quantity_value)
                else {
                    debug!(
                        observation = %observation.label(),
                        code = %descriptor.code,
                        "skipping component without numeric value"
                    );
                    continue;
                };
                readings.push(make(descriptor, value, unit));
            }
            readings
        }
    }
}

/// First coding in a CodeableConcept whose code is registered.
fn registered_descriptor<'r>(concept: &Value, registry: &'r CodeRegistry) -> Option<&'r VitalDescriptor> {
    concept
        .get("coding")
        .and_then(Value::as_array)?
        .iter()
        .filter_map(|coding| coding.get("code").and_then(Value::as_str))
        .find_map(|code| registry.lookup(code.trim()))
}

fn quantity_value(quantity: &Value) -> Option<(f64, Option<String>)> {
    let value = quantity
        .get("value")
        .and_then(Value::as_f64)
        .filter(|v| v.is_finite())?;
    let unit = quantity
        .get("unit")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|unit| !unit.is_empty())
        .map(str::to_string);
    Some((value, unit))
}

/// `Ok(None)` when no timestamp field is usable; `Err` when one is present but garbage.
fn resolve_timestamp(observation: &RawObservation) -> Result<Option<DateTime<Utc>>, NormalizeError> {
    let resource = observation.resource();

    for field in TIMESTAMP_FIELDS {
        let Some(value) = resource.get(field) else {
            continue;
        };

        let text = match value {
            Value::String(text) => Some(text.as_str()),
            Value::Object(period) => period.get("start").and_then(Value::as_str),
            _ => None,
        };
        let Some(text) = text else {
            continue;
        };

        return match parse_datetime(text) {
            Some(dt) => Ok(Some(dt)),
            None => Err(NormalizeError::MalformedTimestamp {
                observation: observation.label(),
                field,
                value: text.to_string(),
            }),
        };
    }

    Ok(None)
}

/// RFC 3339, naive date-time (taken as UTC), or a bare date (midnight UTC).
fn parse_datetime(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();

    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.with_timezone(&Utc));
    }

    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(value, format) {
            return Some(naive.and_utc());
        }
    }

    parse_date(value).and_then(|date| date.and_hms_opt(0, 0, 0).map(|naive| naive.and_utc()))
}

fn parse_date(value: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d").ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn obs(resource: Value) -> RawObservation {
        RawObservation::from_resource(resource).expect("not an Observation")
    }

    fn heart_rate(id: &str, when: &str, value: f64) -> Value {
        json!({
            "resourceType": "Observation",
            "id": id,
            "subject": { "reference": "Patient/p1" },
            "code": { "coding": [{ "system": "http://loinc.org", "code": "8867-4" }] },
            "valueQuantity": { "value": value, "unit": "beats/minute" },
            "effectiveDateTime": when
        })
    }

    #[test]
    fn scalar_observation_becomes_one_reading() {
        let registry = CodeRegistry::standard();
        let readings =
            normalize(&[obs(heart_rate("hr", "2025-10-01T10:00:00Z", 72.0))], &registry).unwrap();

        assert_eq!(readings.len(), 1);
        let reading = &readings[0];
        assert_eq!(reading.vital_code, "8867-4");
        assert_eq!(reading.vital_name, "Heart Rate");
        assert_eq!(reading.value, 72.0);
        assert_eq!(reading.unit, "beats/minute");
        assert_eq!(reading.subject_id.as_deref(), Some("p1"));
        assert_eq!(reading.status, None);
        assert_eq!(
            reading.timestamp,
            Utc.with_ymd_and_hms(2025, 10, 1, 10, 0, 0).unwrap()
        );
    }

    #[test]
    fn panel_components_each_become_a_reading() {
        let registry = CodeRegistry::standard();
        let panel = json!({
            "resourceType": "Observation",
            "id": "bp",
            "code": { "coding": [{ "code": "85354-9" }] },
            "effectiveDateTime": "2025-10-01T10:00:00Z",
            "component": [
                {
                    "code": { "coding": [{ "code": "8480-6" }] },
                    "valueQuantity": { "value": 145, "unit": "mmHg" }
                },
                {
                    "code": { "coding": [{ "code": "8462-4" }] },
                    "valueQuantity": { "value": 92, "unit": "mmHg" }
                }
            ]
        });

        let readings = normalize(&[obs(panel)], &registry).unwrap();
        let pairs: Vec<_> = readings
            .iter()
            .map(|r| (r.vital_code.as_str(), r.value, r.unit.as_str()))
            .collect();
        assert_eq!(pairs, [("8480-6", 145.0, "mmHg"), ("8462-4", 92.0, "mmHg")]);
    }

    #[test]
    fn panel_skips_unknown_and_duplicate_components() {
        let registry = CodeRegistry::standard();
        let panel = json!({
            "resourceType": "Observation",
            "code": { "coding": [{ "code": "8480-6" }] },
            "effectivePeriod": { "start": "2025-10-01T08:00:00Z", "end": "2025-10-01T09:00:00Z" },
            "component": [
                { "code": { "coding": [{ "code": "0000-0" }] }, "valueQuantity": { "value": 1 } },
                { "code": { "coding": [{ "code": "8480-6" }] }, "valueQuantity": { "value": 120 } },
                { "code": { "coding": [{ "code": "8480-6" }] }, "valueQuantity": { "value": 999 } },
                { "code": { "coding": [{ "code": "8462-4" }] } },
                { "valueQuantity": { "value": 5 } }
            ]
        });

        let readings = normalize(&[obs(panel)], &registry).unwrap();
        assert_eq!(readings.len(), 1);
        assert_eq!(readings[0].value, 120.0);
        assert_eq!(readings[0].unit, "mmHg");
        assert_eq!(readings[0].subject_id, None);
        assert_eq!(
            readings[0].timestamp,
            Utc.with_ymd_and_hms(2025, 10, 1, 8, 0, 0).unwrap()
        );
    }

    #[test]
    fn picks_first_registered_coding() {
        let registry = CodeRegistry::standard();
        let resource = json!({
            "resourceType": "Observation",
            "code": { "coding": [
                { "system": "http://snomed.info/sct", "code": "364075005" },
                { "system": "http://loinc.org", "code": "8867-4" }
            ] },
            "valueQuantity": { "value": 88 },
            "effectiveDateTime": "2025-10-01"
        });

        let readings = normalize(&[obs(resource)], &registry).unwrap();
        assert_eq!(readings.len(), 1);
        assert_eq!(readings[0].unit, "/min");
        assert_eq!(
            readings[0].timestamp,
            Utc.with_ymd_and_hms(2025, 10, 1, 0, 0, 0).unwrap()
        );
    }

    #[test]
    fn unsupported_and_incomplete_records_are_dropped() {
        let registry = CodeRegistry::standard();
        let records = [
            json!({
                "resourceType": "Observation",
                "code": { "coding": [{ "code": "1234-5" }] },
                "valueQuantity": { "value": 1 },
                "effectiveDateTime": "2025-10-01T10:00:00Z"
            }),
            json!({
                "resourceType": "Observation",
                "code": { "coding": [{ "code": "8867-4" }] },
                "valueQuantity": { "value": "fast" },
                "effectiveDateTime": "2025-10-01T10:00:00Z"
            }),
            json!({
                "resourceType": "Observation",
                "code": { "coding": [{ "code": "8867-4" }] },
                "valueQuantity": { "value": 70 }
            }),
            json!({
                "resourceType": "Observation",
                "code": { "text": "Heart rate" },
                "valueQuantity": { "value": 70 },
                "effectiveDateTime": "2025-10-01T10:00:00Z"
            }),
            json!({
                "resourceType": "Observation",
                "code": { "coding": [{ "code": "8867-4" }] },
                "valueString": "normal",
                "effectiveDateTime": "2025-10-01T10:00:00Z"
            }),
            json!({
                "resourceType": "Observation",
                "code": { "coding": [{ "code": "8867-4" }] },
                "valueQuantity": { "value": 70 },
                "effectiveDateTime": 20251001
            }),
        ];

        let observations: Vec<_> = records.into_iter().map(obs).collect();
        assert!(normalize(&observations, &registry).unwrap().is_empty());
    }

    #[test]
    fn malformed_timestamp_fails_the_whole_batch() {
        let registry = CodeRegistry::standard();
        let unsupported_but_broken = json!({
            "resourceType": "Observation",
            "id": "broken",
            "code": { "coding": [{ "code": "1234-5" }] },
            "effectiveDateTime": "2025-13-45T99:00:00Z"
        });
        let observations = [
            obs(heart_rate("ok-1", "2025-10-01T10:00:00Z", 72.0)),
            obs(unsupported_but_broken),
            obs(heart_rate("ok-2", "2025-10-02T10:00:00Z", 75.0)),
        ];

        let err = normalize(&observations, &registry).unwrap_err();
        match err {
            NormalizeError::MalformedTimestamp {
                observation, field, ..
            } => {
                assert_eq!(observation, "broken");
                assert_eq!(field, "effectiveDateTime");
            }
            other => panic!("unexpected error {other}"),
        }
    }

    #[test]
    fn malformed_period_start_fails_the_batch() {
        let registry = CodeRegistry::standard();
        let resource = json!({
            "resourceType": "Observation",
            "code": { "coding": [{ "code": "8867-4" }] },
            "valueQuantity": { "value": 70 },
            "effectivePeriod": { "start": "yesterday" }
        });
        assert!(matches!(
            normalize(&[obs(resource)], &registry),
            Err(NormalizeError::MalformedTimestamp { field: "effectivePeriod", .. })
        ));
    }

    #[test]
    fn instant_supplies_the_timestamp() {
        let registry = CodeRegistry::standard();
        let resource = json!({
            "resourceType": "Observation",
            "id": "spo2-instant",
            "code": { "coding": [{ "code": "2708-6" }] },
            "valueQuantity": { "value": 97, "unit": "%" },
            "effectiveInstant": "2025-10-01T08:15:30.500+01:00"
        });

        let readings = normalize(&[obs(resource)], &registry).unwrap();
        assert_eq!(readings.len(), 1);
        assert_eq!(readings[0].vital_name, "Oxygen Saturation");
        assert_eq!(
            readings[0].timestamp,
            Utc.with_ymd_and_hms(2025, 10, 1, 7, 15, 30).unwrap()
                + chrono::Duration::milliseconds(500)
        );
    }

    #[test]
    fn date_time_takes_precedence_over_instant_and_period() {
        let registry = CodeRegistry::standard();
        let mut resource = heart_rate("hr-both", "2025-10-02T10:00:00Z", 80.0);
        resource["effectiveInstant"] = json!("2025-09-01T00:00:00Z");
        resource["effectivePeriod"] = json!({ "start": "2025-08-01T00:00:00Z" });

        let readings = normalize(&[obs(resource.clone())], &registry).unwrap();
        assert_eq!(
            readings[0].timestamp,
            Utc.with_ymd_and_hms(2025, 10, 2, 10, 0, 0).unwrap()
        );

        resource.as_object_mut().unwrap().remove("effectiveDateTime");
        let readings = normalize(&[obs(resource)], &registry).unwrap();
        assert_eq!(
            readings[0].timestamp,
            Utc.with_ymd_and_hms(2025, 9, 1, 0, 0, 0).unwrap()
        );
    }

    #[test]
    fn malformed_instant_fails_the_batch() {
        let registry = CodeRegistry::standard();
        let mut resource = heart_rate("hr-instant", "2025-10-02T10:00:00Z", 80.0);
        resource.as_object_mut().unwrap().remove("effectiveDateTime");
        resource["effectiveInstant"] = json!("at noon");

        assert!(matches!(
            normalize(&[obs(resource)], &registry),
            Err(NormalizeError::MalformedTimestamp { field: "effectiveInstant", .. })
        ));
    }

    #[test]
    fn output_is_most_recent_first_and_repeatable() {
        let registry = CodeRegistry::standard();
        let observations = [
            obs(heart_rate("a", "2025-10-01T10:00:00Z", 70.0)),
            obs(heart_rate("b", "2025-10-03T10:00:00+02:00", 71.0)),
            obs(heart_rate("c", "2025-10-02T10:00:00", 72.0)),
        ];

        let first = normalize(&observations, &registry).unwrap();
        let values: Vec<_> = first.iter().map(|r| r.value).collect();
        assert_eq!(values, [71.0, 72.0, 70.0]);
        assert!(first.windows(2).all(|w| w[0].timestamp >= w[1].timestamp));

        assert_eq!(normalize(&observations, &registry).unwrap(), first);
    }

    #[test]
    fn timestamps_are_normalized_to_utc() {
        assert_eq!(
            parse_datetime("2025-10-01T12:00:00+02:00"),
            Some(Utc.with_ymd_and_hms(2025, 10, 1, 10, 0, 0).unwrap())
        );
        assert!(parse_datetime("2025-10-01T10:00:00.250").is_some());
        assert!(parse_datetime("2025").is_none());
        assert!(parse_datetime("not a date").is_none());
    }

    #[test]
    fn bundle_decoding_keeps_only_observations() {
        let bundle = json!({
            "resourceType": "Bundle",
            "entry": [
                { "resource": heart_rate("a", "2025-10-01T10:00:00Z", 70.0) },
                { "resource": { "resourceType": "Patient", "id": "p1" } },
                { "fullUrl": "urn:uuid:missing-resource" }
            ]
        });
        let observations = observations_from_bundle_value(&bundle).unwrap();
        assert_eq!(observations.len(), 1);
        assert_eq!(observations[0].id(), Some("a"));

        let empty = observations_from_bundle_value(&json!({ "resourceType": "Bundle" })).unwrap();
        assert!(empty.is_empty());

        assert!(matches!(
            observations_from_bundle_value(&json!({ "resourceType": "Patient" })),
            Err(NormalizeError::NotABundle(_))
        ));
        assert!(matches!(
            observations_from_bundle_str("{ not json"),
            Err(NormalizeError::Json(_))
        ));
    }

    #[test]
    fn subject_falls_back_to_hint() {
        let with_reference = obs(heart_rate("a", "2025-10-01T10:00:00Z", 70.0));
        assert_eq!(with_reference.patient_id().as_deref(), Some("p1"));

        let absolute = obs(json!({
            "resourceType": "Observation",
            "subject": { "reference": "https://example.org/fhir/Patient/42" }
        }));
        assert_eq!(absolute.patient_id().as_deref(), Some("42"));

        let group = obs(json!({
            "resourceType": "Observation",
            "subject": { "reference": "Group/7" }
        }))
        .with_subject_hint("requested");
        assert_eq!(group.patient_id(), None);
        assert_eq!(group.subject_id().as_deref(), Some("requested"));
    }
}
