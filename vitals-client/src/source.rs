//! Remote observation source and its FHIR REST implementation.

use reqwest::blocking::Client;
use reqwest::header::{ACCEPT, USER_AGENT};
use serde_json::Value;
use tracing::debug;
use vitals_core::VitalsConfig;

use crate::error::{FetchError, Result};

const FHIR_JSON: &str = "application/fhir+json";

/// Category applied to discovery when none is configured, so the count cap is
/// spent on vital signs rather than arbitrary observations.
pub const DISCOVERY_CATEGORY: &str = "vital-signs";

/// Parameters of one Observation search.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObservationQuery {
    pub patient: Option<String>,
    pub category: Option<String>,
    pub count: u32,
}

impl ObservationQuery {
    /// Observations for one subject.
    pub fn for_subject(subject_id: &str, config: &VitalsConfig) -> Self {
        Self {
            patient: Some(subject_id.to_string()),
            category: config.category().map(str::to_string),
            count: config.count(),
        }
    }

    /// Observations across all subjects, used to discover candidates.
    pub fn broad(config: &VitalsConfig) -> Self {
        Self {
            patient: None,
            category: Some(config.category().unwrap_or(DISCOVERY_CATEGORY).to_string()),
            count: config.count(),
        }
    }

    /// Search parameters in FHIR REST form.
    pub fn params(&self) -> Vec<(&'static str, String)> {
        let mut params = Vec::with_capacity(3);
        if let Some(patient) = &self.patient {
            params.push(("patient", patient.clone()));
        }
        if let Some(category) = &self.category {
            params.push(("category", category.clone()));
        }
        params.push(("_count", self.count.to_string()));
        params
    }
}

/// Anything that can answer an Observation search with a bundle.
pub trait ObservationSource {
    fn search(&self, query: &ObservationQuery) -> Result<Value>;
}

/// Blocking FHIR REST client with a fixed request timeout and no retries.
pub struct FhirHttpSource {
    client: Client,
    base_url: String,
}

impl FhirHttpSource {
    pub fn new(config: &VitalsConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(FetchError::from)?;

        Ok(Self {
            client,
            base_url: config.server_url().to_string(),
        })
    }

    fn observation_url(&self) -> String {
        format!("{}/Observation", self.base_url)
    }
}

impl ObservationSource for FhirHttpSource {
    fn search(&self, query: &ObservationQuery) -> Result<Value> {
        debug!(url = %self.observation_url(), ?query, "searching observations");

        let response = self
            .client
            .get(self.observation_url())
            .query(&query.params())
            .header(ACCEPT, FHIR_JSON)
            .header(
                USER_AGENT,
                format!("vitals-client/{}", env!("CARGO_PKG_VERSION")),
            )
            .send()?;

        if !response.status().is_success() {
            return Err(FetchError::Status {
                status: response.status().as_u16(),
            });
        }

        response
            .json::<Value>()
            .map_err(|err| FetchError::InvalidResponse(err.to_string()))
    }
}
