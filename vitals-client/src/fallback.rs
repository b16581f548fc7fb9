//! The local known-good bundle used when the live source cannot be trusted.

use std::path::{Path, PathBuf};

use tracing::debug;
use vitals_fhir::{observations_from_bundle_str, RawObservation};

use crate::error::{FetchError, Result};

/// Synthetic bundle compiled into the crate, used when no override path is set.
const BUILT_IN_BUNDLE: &str = include_str!("../data/synthetic_bundle.json");

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FallbackBundle {
    BuiltIn,
    File(PathBuf),
}

impl FallbackBundle {
    pub fn new(path: Option<&Path>) -> Self {
        match path {
            Some(path) => Self::File(path.to_path_buf()),
            None => Self::BuiltIn,
        }
    }

    pub fn path(&self) -> Option<&Path> {
        match self {
            Self::BuiltIn => None,
            Self::File(path) => Some(path),
        }
    }

    /// Decode the bundle. Files are read on every call; nothing is cached.
    pub fn load(&self) -> Result<Vec<RawObservation>> {
        match self {
            Self::BuiltIn => {
                debug!("loading built-in fallback bundle");
                observations_from_bundle_str(BUILT_IN_BUNDLE)
                    .map_err(|err| self.unreadable(err))
            }
            Self::File(path) => {
                debug!(path = %path.display(), "loading fallback bundle");
                let data = std::fs::read_to_string(path).map_err(|err| self.unreadable(err))?;
                observations_from_bundle_str(&data).map_err(|err| self.unreadable(err))
            }
        }
    }

    fn unreadable(&self, err: impl ToString) -> FetchError {
        FetchError::FallbackUnreadable {
            path: self
                .path()
                .map_or_else(|| PathBuf::from("<built-in>"), Path::to_path_buf),
            message: err.to_string(),
        }
    }
}
