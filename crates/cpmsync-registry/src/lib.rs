//! Package registry lookups for cpmsync.
//!
//! A registry answers one question: which versions exist for a package,
//! in the registry's own ascending order. This crate provides the
//! `VersionIndex` trait, an HTTP client for the NuGet flat-container
//! protocol, an in-memory index, and the "latest stable" / "latest any"
//! selection used by the resolver. Lookups never fail from the caller's
//! point of view: transport or decoding errors are logged and read as "no
//! data".

pub mod config;
#[cfg(any(test, feature = "fixture"))]
pub mod fixture;
pub mod http;
pub mod memory;

pub use config::{RegistryConfig, DEFAULT_REGISTRY_URL, DEFAULT_TIMEOUT_SECS};
pub use http::HttpRegistry;
pub use memory::MemoryIndex;

use cpmsync_schema::PackageId;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("registry I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("registry HTTP error: {0}")]
    Http(String),
    #[error("registry response error: {0}")]
    Serialization(String),
}

/// Source of known versions for a package, keyed by lowercase identifier.
pub trait VersionIndex: Send + Sync {
    /// All known versions, in the registry's ascending order. An unknown
    /// package is an empty list, not an error.
    fn versions(&self, lookup_key: &str) -> Result<Vec<String>, RegistryError>;
}

/// Which versions qualify as "latest".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stability {
    /// Versions without a pre-release marker.
    Stable,
    /// Any version, pre-releases included.
    Any,
}

/// Latest versions reported for one package.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LatestVersions {
    pub stable: Option<String>,
    pub any: Option<String>,
}

impl LatestVersions {
    pub fn from_list(versions: &[String]) -> Self {
        Self {
            stable: latest_stable(versions).map(str::to_owned),
            any: latest_any(versions).map(str::to_owned),
        }
    }

    pub fn get(&self, stability: Stability) -> Option<&str> {
        match stability {
            Stability::Stable => self.stable.as_deref(),
            Stability::Any => self.any.as_deref(),
        }
    }
}

/// A version carries a pre-release marker when it contains `-`.
pub fn is_prerelease(version: &str) -> bool {
    version.contains('-')
}

/// Last stable entry under the registry's own ordering.
pub fn latest_stable(versions: &[String]) -> Option<&str> {
    versions
        .iter()
        .rev()
        .find(|v| !is_prerelease(v))
        .map(String::as_str)
}

/// Last entry under the registry's own ordering.
pub fn latest_any(versions: &[String]) -> Option<&str> {
    versions.last().map(String::as_str)
}

/// Query `index` once for `id`. Any registry failure yields empty answers.
pub fn lookup(index: &dyn VersionIndex, id: &PackageId) -> LatestVersions {
    let key = id.lookup_key();
    match index.versions(&key) {
        Ok(versions) => {
            debug!("registry lists {} versions for {id}", versions.len());
            LatestVersions::from_list(&versions)
        }
        Err(e) => {
            warn!("registry lookup for {id} failed: {e}");
            LatestVersions::default()
        }
    }
}

/// Latest version of `id` at the requested stability, or `None`.
pub fn latest(index: &dyn VersionIndex, id: &PackageId, stability: Stability) -> Option<String> {
    lookup(index, id).get(stability).map(str::to_owned)
}
