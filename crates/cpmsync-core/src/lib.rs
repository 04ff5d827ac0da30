//! Version resolution and overlay reconciliation for cpmsync.
//!
//! This crate ties the document model and the registry together: it scans
//! client projects for managed package references, decides one version per
//! identifier with a fixed precedence, and writes the decisions into the
//! overlay `Directory.Packages.props` in a single deterministic pass. It also
//! produces a read-only coverage report of references lacking a central
//! version.

pub mod config;
pub mod reconcile;
pub mod report;
pub mod resolve;
pub mod scan;

pub use config::{parse_changed, Policy, SyncConfig, DEFAULT_CONFIG_FILE};
pub use reconcile::{reconcile, sync, ChangeKind, PinChange, StructuralEdit, SyncOutcome};
pub use report::CoverageReport;
pub use resolve::{
    RegistryAnswers, ResolveContext, Resolution, Resolver, Unresolved, VersionLookup,
    VersionSource,
};
pub use scan::{scan_projects, ProjectRefs, ProjectScan};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("manifest error: {0}")]
    Schema(#[from] cpmsync_schema::SchemaError),
    #[error("config error: {0}")]
    Config(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    TomlParse(#[from] toml::de::Error),
}
