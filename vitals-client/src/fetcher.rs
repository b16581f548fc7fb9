//! Observation fetching with fallback substitution.

use std::collections::BTreeSet;

use tracing::{debug, error, info, warn};
use vitals_core::{CodeRegistry, Notice, VitalsConfig};
use vitals_fhir::{normalize, observations_from_bundle_value, RawObservation};

use crate::error::{FetchError, Result};
use crate::fallback::FallbackBundle;
use crate::source::{ObservationQuery, ObservationSource};

/// Raw observations for one request and where they came from.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FetchOutcome {
    pub observations: Vec<RawObservation>,
    pub is_fallback: bool,
    pub notices: Vec<Notice>,
}

/// Subjects known to have at least one usable reading.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SubjectList {
    pub subjects: Vec<String>,
    pub is_fallback: bool,
    pub notices: Vec<Notice>,
}

pub struct Fetcher<S> {
    source: S,
    config: VitalsConfig,
    fallback: FallbackBundle,
}

impl<S: ObservationSource> Fetcher<S> {
    pub fn new(source: S, config: VitalsConfig) -> Self {
        let fallback = FallbackBundle::new(config.fallback_bundle());
        Self {
            source,
            config,
            fallback,
        }
    }

    pub fn config(&self) -> &VitalsConfig {
        &self.config
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    /// Always yields something usable: live observations, or the fallback
    /// bundle when the subject is the reserved sentinel or the source fails or
    /// returns nothing.
    pub fn fetch(&self, subject_id: &str) -> FetchOutcome {
        if self.config.is_fallback_subject(subject_id) {
            info!(subject_id, "reserved subject, using fallback bundle");
            return self.load_fallback();
        }

        match self.fetch_live(subject_id) {
            Ok(observations) if !observations.is_empty() => {
                info!(subject_id, count = observations.len(), "fetched observations");
                FetchOutcome {
                    observations,
                    is_fallback: false,
                    notices: Vec::new(),
                }
            }
            Ok(_) => {
                warn!(subject_id, "source returned no observations, using fallback bundle");
                self.load_fallback_because("the FHIR server returned no observations")
            }
            Err(err) => {
                warn!(subject_id, error = %err, "source unavailable, using fallback bundle");
                self.load_fallback_because(&format!("the FHIR server could not be queried ({err})"))
            }
        }
    }

    /// Live observations for one subject, without any fallback.
    pub fn fetch_live(&self, subject_id: &str) -> Result<Vec<RawObservation>> {
        let bundle = self
            .source
            .search(&ObservationQuery::for_subject(subject_id, &self.config))?;

        let observations = observations_from_bundle_value(&bundle)
            .map_err(|err| FetchError::InvalidResponse(err.to_string()))?;

        Ok(observations
            .into_iter()
            .map(|observation| observation.with_subject_hint(subject_id))
            .collect())
    }

    /// The fallback bundle, or nothing plus an error notice if it cannot be read.
    pub fn load_fallback(&self) -> FetchOutcome {
        match self.fallback.load() {
            Ok(observations) => FetchOutcome {
                observations: observations
                    .into_iter()
                    .map(|observation| {
                        observation.with_subject_hint(self.config.fallback_subject())
                    })
                    .collect(),
                is_fallback: true,
                notices: Vec::new(),
            },
            Err(err) => {
                error!(error = %err, "fallback bundle unusable");
                FetchOutcome {
                    observations: Vec::new(),
                    is_fallback: true,
                    notices: vec![Notice::fallback_unreadable(&err.to_string())],
                }
            }
        }
    }

    fn load_fallback_because(&self, reason: &str) -> FetchOutcome {
        let mut outcome = self.load_fallback();
        outcome.notices.insert(0, Notice::fallback_in_use(reason));
        outcome
    }

    /// Subjects with at least one valid reading in their live data.
    ///
    /// Candidates come from a broad search; each one is dry-run through the
    /// normalizer and dropped if it yields nothing or its batch is rejected.
    /// When no subject qualifies the list holds only the fallback subject.
    pub fn discover_subjects(&self, registry: &CodeRegistry) -> SubjectList {
        let candidates = match self.candidate_subjects() {
            Ok(candidates) => candidates,
            Err(err) => {
                warn!(error = %err, "subject discovery failed");
                return self.fallback_subjects(Notice::error(format!(
                    "Error fetching patient list: {err}"
                )));
            }
        };

        debug!(count = candidates.len(), "checking candidate subjects");
        let subjects: Vec<String> = candidates
            .into_iter()
            .filter(|subject_id| self.has_usable_readings(subject_id, registry))
            .collect();

        if subjects.is_empty() {
            return self.fallback_subjects(Notice::warning(
                "No valid patients found on FHIR server. Using synthetic fallback.",
            ));
        }

        info!(count = subjects.len(), "found subjects with usable vital signs");
        SubjectList {
            subjects,
            is_fallback: false,
            notices: Vec::new(),
        }
    }

    fn candidate_subjects(&self) -> Result<BTreeSet<String>> {
        let bundle = self.source.search(&ObservationQuery::broad(&self.config))?;
        let observations = observations_from_bundle_value(&bundle)
            .map_err(|err| FetchError::InvalidResponse(err.to_string()))?;

        Ok(observations
            .iter()
            .filter_map(RawObservation::patient_id)
            .collect())
    }

    fn has_usable_readings(&self, subject_id: &str, registry: &CodeRegistry) -> bool {
        let observations = match self.fetch_live(subject_id) {
            Ok(observations) => observations,
            Err(err) => {
                debug!(subject_id, error = %err, "excluding subject, fetch failed");
                return false;
            }
        };

        match normalize(&observations, registry) {
            Ok(readings) => !readings.is_empty(),
            Err(err) => {
                debug!(subject_id, error = %err, "excluding subject, batch rejected");
                false
            }
        }
    }

    fn fallback_subjects(&self, notice: Notice) -> SubjectList {
        SubjectList {
            subjects: vec![self.config.fallback_subject().to_string()],
            is_fallback: true,
            notices: vec![notice],
        }
    }
}
