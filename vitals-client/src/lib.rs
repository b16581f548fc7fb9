//! Observation fetching for the vitals pipeline.
//!
//! Observations come from a FHIR server through an [`ObservationSource`].
//! Whenever that source is unusable (transport failure, non-success status,
//! an empty bundle, or a batch the normalizer rejects) a local fallback
//! bundle takes its place and the result is flagged `is_fallback`.
//!
//! [`VitalsService`] ties fetching, normalization and classification
//! together and never returns an error: problems become [`vitals_core::Notice`]s.

mod error;
mod fallback;
mod fetcher;
mod service;
mod source;

pub use error::{FetchError, Result};
pub use fallback::FallbackBundle;
pub use fetcher::{FetchOutcome, Fetcher, SubjectList};
pub use service::VitalsService;
pub use source::{FhirHttpSource, ObservationQuery, ObservationSource, DISCOVERY_CATEGORY};
