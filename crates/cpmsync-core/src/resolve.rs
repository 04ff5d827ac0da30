//! Per-identifier version resolution.
//!
//! Sources are consulted in a fixed order and the first one with an answer
//! wins:
//!
//! 1. the changed set, forced to the run's prerelease version
//! 2. the overlay's existing pin, version kept as is
//! 3. the parent pin's version (opt-in)
//! 4. the stable base from a `VERSION` file (opt-in)
//! 5. the registry's latest stable version
//! 6. the registry's latest version of any stability (opt-in)
//!
//! The pin mode never comes from a source: it is `Override` exactly when the
//! parent manifest pins the identifier.

use cpmsync_registry::{lookup, LatestVersions, Stability, VersionIndex};
use cpmsync_schema::{PackageId, PinMode, VersionPin};
use rayon::prelude::*;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use tracing::debug;

/// Where a resolved version came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum VersionSource {
    Changed,
    Existing,
    Parent,
    StableBase,
    RegistryStable,
    RegistryPrerelease,
}

impl fmt::Display for VersionSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            VersionSource::Changed => "changed",
            VersionSource::Existing => "existing",
            VersionSource::Parent => "parent",
            VersionSource::StableBase => "stable-base",
            VersionSource::RegistryStable => "registry",
            VersionSource::RegistryPrerelease => "registry-prerelease",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub version: String,
    pub mode: PinMode,
    pub source: VersionSource,
}

/// No source could supply a version for `id`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Unresolved {
    pub id: PackageId,
}

impl fmt::Display for Unresolved {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "no version source for {}", self.id)
    }
}

/// Registry answers as seen by the resolver.
pub trait VersionLookup {
    fn latest(&self, id: &PackageId, stability: Stability) -> Option<String>;
}

/// Registry answers gathered ahead of resolution.
///
/// Identifiers that were never fetched answer `None`, which is also what an
/// offline run sees for every identifier.
#[derive(Debug, Clone, Default)]
pub struct RegistryAnswers {
    answers: BTreeMap<PackageId, LatestVersions>,
}

impl RegistryAnswers {
    pub fn offline() -> Self {
        Self::default()
    }

    /// Query `index` for every id in `ids`, concurrently. All lookups have
    /// finished when this returns.
    pub fn prefetch(index: &dyn VersionIndex, ids: &[PackageId]) -> Self {
        let answers = ids
            .par_iter()
            .map(|id| (id.clone(), lookup(index, id)))
            .collect();
        Self { answers }
    }

    pub fn len(&self) -> usize {
        self.answers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.answers.is_empty()
    }
}

impl VersionLookup for RegistryAnswers {
    fn latest(&self, id: &PackageId, stability: Stability) -> Option<String> {
        self.answers
            .get(id)
            .and_then(|l| l.get(stability))
            .map(str::to_owned)
    }
}

/// Run-wide inputs shared by every resolution.
#[derive(Debug, Clone, Default)]
pub struct ResolveContext {
    pub changed: BTreeSet<PackageId>,
    pub prerelease: Option<String>,
    /// Parent pins by identifier; membership decides the pin mode.
    pub parent: BTreeMap<PackageId, String>,
    pub stable_base: Option<String>,
    pub parent_versions: bool,
    pub prerelease_fallback: bool,
}

impl ResolveContext {
    #[must_use]
    pub fn with_parent_pins(mut self, pins: impl IntoIterator<Item = VersionPin>) -> Self {
        self.parent = pins.into_iter().map(|p| (p.id, p.version)).collect();
        self
    }

    pub fn parent_defines(&self, id: &PackageId) -> bool {
        self.parent.contains_key(id)
    }

    pub fn mode_for(&self, id: &PackageId) -> PinMode {
        PinMode::for_parent(self.parent_defines(id))
    }
}

pub struct Resolver<'a> {
    ctx: &'a ResolveContext,
    registry: &'a dyn VersionLookup,
}

impl<'a> Resolver<'a> {
    pub fn new(ctx: &'a ResolveContext, registry: &'a dyn VersionLookup) -> Self {
        Self { ctx, registry }
    }

    /// Resolve `id`, given the overlay's current pin for it.
    pub fn resolve(
        &self,
        id: &PackageId,
        existing: Option<&VersionPin>,
    ) -> Result<Resolution, Unresolved> {
        let found = self.local_source(id, existing).or_else(|| {
            self.registry
                .latest(id, Stability::Stable)
                .map(|v| (v, VersionSource::RegistryStable))
                .or_else(|| {
                    self.ctx
                        .prerelease_fallback
                        .then(|| self.registry.latest(id, Stability::Any))
                        .flatten()
                        .map(|v| (v, VersionSource::RegistryPrerelease))
                })
        });
        match found {
            Some((version, source)) => {
                let mode = self.ctx.mode_for(id);
                debug!("{id}: {version} ({mode}) from {source}");
                Ok(Resolution {
                    version,
                    mode,
                    source,
                })
            }
            None => Err(Unresolved { id: id.clone() }),
        }
    }

    /// Whether resolving `id` would consult the registry.
    pub fn needs_registry(&self, id: &PackageId, existing: Option<&VersionPin>) -> bool {
        self.local_source(id, existing).is_none()
    }

    fn local_source(
        &self,
        id: &PackageId,
        existing: Option<&VersionPin>,
    ) -> Option<(String, VersionSource)> {
        if self.ctx.changed.contains(id) {
            if let Some(prerelease) = &self.ctx.prerelease {
                return Some((prerelease.clone(), VersionSource::Changed));
            }
        }
        if let Some(pin) = existing.filter(|p| !p.version.trim().is_empty()) {
            return Some((pin.version.clone(), VersionSource::Existing));
        }
        if self.ctx.parent_versions {
            if let Some(version) = self.ctx.parent.get(id).filter(|v| !v.trim().is_empty()) {
                return Some((version.clone(), VersionSource::Parent));
            }
        }
        self.ctx
            .stable_base
            .clone()
            .map(|v| (v, VersionSource::StableBase))
    }
}
