//! Runtime configuration resolved once at startup.

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::VitalsError;

pub const DEFAULT_SERVER_URL: &str = "https://hapi.fhir.org/baseR4";
pub const DEFAULT_COUNT: u32 = 200;
pub const DEFAULT_FALLBACK_SUBJECT: &str = "synth-pat-1";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Where observations come from and how the fallback is reached.
#[derive(Debug, Clone, PartialEq)]
pub struct VitalsConfig {
    server_url: String,
    count: u32,
    fallback_subject: String,
    fallback_bundle: Option<PathBuf>,
    category: Option<String>,
    timeout: Duration,
}

impl VitalsConfig {
    pub fn new(
        server_url: impl Into<String>,
        count: u32,
        fallback_subject: impl Into<String>,
        fallback_bundle: Option<PathBuf>,
        category: Option<String>,
        timeout: Duration,
    ) -> Result<Self, VitalsError> {
        let server_url = server_url.into().trim().trim_end_matches('/').to_string();
        if server_url.is_empty() {
            return Err(VitalsError::InvalidConfig(
                "server_url cannot be empty".into(),
            ));
        }

        if count == 0 {
            return Err(VitalsError::InvalidConfig(
                "count must be greater than zero".into(),
            ));
        }

        let fallback_subject = fallback_subject.into().trim().to_string();
        if fallback_subject.is_empty() {
            return Err(VitalsError::InvalidConfig(
                "fallback_subject cannot be empty".into(),
            ));
        }

        if fallback_bundle
            .as_ref()
            .is_some_and(|path| path.as_os_str().is_empty())
        {
            return Err(VitalsError::InvalidConfig(
                "fallback_bundle cannot be empty".into(),
            ));
        }

        if timeout.is_zero() {
            return Err(VitalsError::InvalidConfig(
                "timeout must be greater than zero".into(),
            ));
        }

        let category = category
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty());

        Ok(Self {
            server_url,
            count,
            fallback_subject,
            fallback_bundle,
            category,
            timeout,
        })
    }

    /// Base address without a trailing slash.
    pub fn server_url(&self) -> &str {
        &self.server_url
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    /// Reserved subject id that always resolves to the fallback bundle.
    pub fn fallback_subject(&self) -> &str {
        &self.fallback_subject
    }

    /// Override for the fallback bundle. `None` selects the built-in bundle,
    /// so the sentinel works regardless of the working directory.
    pub fn fallback_bundle(&self) -> Option<&Path> {
        self.fallback_bundle.as_deref()
    }

    /// Optional category token added to queries. `None` fetches everything
    /// for the subject and leaves filtering to the code registry.
    pub fn category(&self) -> Option<&str> {
        self.category.as_deref()
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn is_fallback_subject(&self, subject_id: &str) -> bool {
        subject_id == self.fallback_subject
    }
}

impl Default for VitalsConfig {
    fn default() -> Self {
        Self {
            server_url: DEFAULT_SERVER_URL.to_string(),
            count: DEFAULT_COUNT,
            fallback_subject: DEFAULT_FALLBACK_SUBJECT.to_string(),
            fallback_bundle: None,
            category: None,
            timeout: DEFAULT_TIMEOUT,
        }
    }
}
