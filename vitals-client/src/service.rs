//! Fetch, normalize and classify in one call.

use tracing::{error, info, warn};
use vitals_core::{classified, CodeRegistry, Notice, Reading, ReadingSet, VitalsConfig};
use vitals_fhir::normalize;

use crate::error::Result;
use crate::fetcher::{FetchOutcome, Fetcher, SubjectList};
use crate::source::{FhirHttpSource, ObservationSource};

/// The whole pipeline for one subject per call.
///
/// Holds no per-request state, so concurrent callers each get their own
/// observations and readings end to end.
pub struct VitalsService<S> {
    fetcher: Fetcher<S>,
    registry: CodeRegistry,
}

impl VitalsService<FhirHttpSource> {
    /// Service talking to the configured FHIR server with the standard registry.
    pub fn from_config(config: VitalsConfig) -> Result<Self> {
        let source = FhirHttpSource::new(&config)?;
        Ok(Self::new(Fetcher::new(source, config), CodeRegistry::standard()))
    }
}

impl<S: ObservationSource> VitalsService<S> {
    pub fn new(fetcher: Fetcher<S>, registry: CodeRegistry) -> Self {
        Self { fetcher, registry }
    }

    pub fn fetcher(&self) -> &Fetcher<S> {
        &self.fetcher
    }

    pub fn discover_subjects(&self) -> SubjectList {
        self.fetcher.discover_subjects(&self.registry)
    }

    /// Classified readings for a subject, most recent first.
    ///
    /// A live batch with an unparsable timestamp is thrown away entirely and
    /// replaced by the fallback bundle. Never fails; the worst case is an
    /// empty set with an error notice.
    pub fn load(&self, subject_id: &str) -> ReadingSet {
        let FetchOutcome {
            observations,
            mut is_fallback,
            mut notices,
        } = self.fetcher.fetch(subject_id);

        let readings = match normalize(&observations, &self.registry) {
            Ok(readings) => Some(readings),
            Err(err) if !is_fallback => {
                warn!(subject_id, error = %err, "rejecting batch, substituting fallback bundle");
                notices.push(Notice::malformed_batch());
                is_fallback = true;
                self.normalize_fallback(&mut notices)
            }
            Err(err) => {
                error!(error = %err, "fallback bundle failed normalization");
                notices.push(Notice::fallback_unreadable(&err.to_string()));
                None
            }
        };

        let mut set = match readings {
            Some(readings) => ReadingSet::new(classified(readings), is_fallback),
            None => ReadingSet::empty_fallback(),
        }
        .with_notices(notices);

        info!(subject_id, count = set.len(), is_fallback = set.is_fallback, "normalized readings");

        if set.is_empty() {
            set.push_notice(Notice::no_readings());
        }
        set
    }

    /// `None` when the fallback bundle itself cannot be normalized.
    fn normalize_fallback(&self, notices: &mut Vec<Notice>) -> Option<Vec<Reading>> {
        let fallback = self.fetcher.load_fallback();
        notices.extend(fallback.notices);

        match normalize(&fallback.observations, &self.registry) {
            Ok(readings) => Some(readings),
            Err(err) => {
                error!(error = %err, "fallback bundle failed normalization");
                notices.push(Notice::fallback_unreadable(&err.to_string()));
                None
            }
        }
    }
}
