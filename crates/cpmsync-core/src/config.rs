use crate::CoreError;
use cpmsync_registry::RegistryConfig;
use cpmsync_schema::PackageId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Config file picked up from the working directory when `--config` is absent.
pub const DEFAULT_CONFIG_FILE: &str = "cpmsync.toml";

pub const DEFAULT_PREFIX: &str = "Coven.";
pub const DEFAULT_ROOT: &str = "samples";
pub const DEFAULT_OVERLAY: &str = "samples/Directory.Packages.props";
pub const DEFAULT_PARENT: &str = "Directory.Packages.props";

/// How existing managed pins are treated before resolution.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Policy {
    /// Keep existing pins; only insert or update what is needed.
    #[default]
    Incremental,
    /// Drop every managed pin first, then re-emit one per needed identifier.
    CleanSlate,
}

impl fmt::Display for Policy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Policy::Incremental => f.write_str("incremental"),
            Policy::CleanSlate => f.write_str("clean-slate"),
        }
    }
}

/// Settings for one reconciliation run.
///
/// The persistent part comes from `cpmsync.toml`; `changed`, `prerelease`,
/// `offline` and `dry_run` are per-run inputs and only ever set by the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SyncConfig {
    /// Identifier prefix of internally owned packages.
    pub prefix: String,
    /// Directory scanned for client projects.
    pub root: PathBuf,
    pub overlay: PathBuf,
    pub parent: PathBuf,
    pub policy: Policy,
    /// Fall back to the latest pre-release when no stable version exists.
    pub prerelease_fallback: bool,
    /// Reuse parent pin versions before asking the registry.
    pub parent_versions: bool,
    /// `VERSION` file whose stable base is used before asking the registry.
    pub stable_base_file: Option<PathBuf>,
    pub registry: RegistryConfig,
    #[serde(skip)]
    pub changed: BTreeSet<PackageId>,
    #[serde(skip)]
    pub prerelease: Option<String>,
    #[serde(skip)]
    pub offline: bool,
    #[serde(skip)]
    pub dry_run: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            prefix: DEFAULT_PREFIX.to_owned(),
            root: PathBuf::from(DEFAULT_ROOT),
            overlay: PathBuf::from(DEFAULT_OVERLAY),
            parent: PathBuf::from(DEFAULT_PARENT),
            policy: Policy::default(),
            prerelease_fallback: false,
            parent_versions: false,
            stable_base_file: None,
            registry: RegistryConfig::default(),
            changed: BTreeSet::new(),
            prerelease: None,
            offline: false,
            dry_run: false,
        }
    }
}

impl SyncConfig {
    pub fn from_toml_str(input: &str) -> Result<Self, CoreError> {
        let mut config: Self = toml::from_str(input)?;
        config.registry = normalize_registry(config.registry);
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, CoreError> {
        let content = fs::read_to_string(path).map_err(|e| {
            CoreError::Config(format!("failed to read {}: {e}", path.display()))
        })?;
        debug!("loaded config {}", path.display());
        Self::from_toml_str(&content)
    }

    /// Load `explicit` if given, else `cpmsync.toml` in `dir` if present,
    /// else defaults.
    pub fn discover(explicit: Option<&Path>, dir: &Path) -> Result<Self, CoreError> {
        if let Some(path) = explicit {
            return Self::load(path);
        }
        let candidate = dir.join(DEFAULT_CONFIG_FILE);
        if candidate.is_file() {
            Self::load(&candidate)
        } else {
            Ok(Self::default())
        }
    }

    /// Set the changed identifiers and the version they are forced to.
    #[must_use]
    pub fn with_changed(mut self, changed: BTreeSet<PackageId>, prerelease: Option<&str>) -> Self {
        self.changed = changed;
        self.prerelease = prerelease.map(str::to_owned);
        self
    }

    pub fn validate(&self) -> Result<(), CoreError> {
        if self.prefix.trim().is_empty() {
            return Err(CoreError::Config("prefix must not be empty".to_owned()));
        }
        let has_prerelease = self
            .prerelease
            .as_deref()
            .is_some_and(|v| !v.trim().is_empty());
        if !self.changed.is_empty() && !has_prerelease {
            return Err(CoreError::Config(
                "a prerelease version is required when changed ids are given".to_owned(),
            ));
        }
        if self.registry.url.trim().is_empty() && !self.offline {
            return Err(CoreError::Config("registry url must not be empty".to_owned()));
        }
        Ok(())
    }

    /// Stable base read from `stable_base_file`, if one is configured.
    pub fn stable_base(&self) -> Result<Option<String>, CoreError> {
        let Some(path) = &self.stable_base_file else {
            return Ok(None);
        };
        let content = fs::read_to_string(path).map_err(|e| {
            CoreError::Config(format!("failed to read stable base {}: {e}", path.display()))
        })?;
        let base = stable_base_of(&content);
        if base.is_none() {
            return Err(CoreError::Config(format!(
                "stable base file {} is empty",
                path.display()
            )));
        }
        Ok(base)
    }
}

fn normalize_registry(registry: RegistryConfig) -> RegistryConfig {
    let mut normalized = RegistryConfig::new(&registry.url).with_timeout(registry.timeout_secs);
    normalized.auth_token = registry.auth_token;
    normalized
}

/// Version text with any pre-release suffix removed: `1.2.0-pre.3` -> `1.2.0`.
pub fn stable_base_of(content: &str) -> Option<String> {
    let trimmed = content.trim();
    let base = trimmed.split('-').next().unwrap_or(trimmed).trim();
    (!base.is_empty()).then(|| base.to_owned())
}

/// Parse a comma-separated identifier list. Segments are trimmed and empty
/// segments dropped.
pub fn parse_changed(csv: &str) -> BTreeSet<PackageId> {
    csv.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(PackageId::from)
        .collect()
}
