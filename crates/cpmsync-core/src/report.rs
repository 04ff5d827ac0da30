//! Central version coverage report.
//!
//! Read-only: compares the managed references found in client projects with
//! the pins of the overlay and parent manifests. A reference pinned by
//! neither fails restore with NU1010.

use crate::config::SyncConfig;
use crate::scan::{scan_projects, ProjectScan};
use crate::CoreError;
use cpmsync_schema::{ManifestDocument, PackageId};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ManifestStatus {
    pub path: PathBuf,
    pub exists: bool,
    pub central_management: bool,
    pub pins: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReferenceStatus {
    pub id: PackageId,
    pub in_overlay: bool,
    pub in_parent: bool,
    /// Effective version: the overlay's if pinned there, else the parent's.
    pub version: Option<String>,
}

impl ReferenceStatus {
    pub fn is_missing(&self) -> bool {
        !self.in_overlay && !self.in_parent
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProjectCoverage {
    pub path: PathBuf,
    pub references: Vec<ReferenceStatus>,
}

impl ProjectCoverage {
    pub fn missing(&self) -> impl Iterator<Item = &PackageId> {
        self.references
            .iter()
            .filter(|r| r.is_missing())
            .map(|r| &r.id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CoverageReport {
    pub generated_at: String,
    pub prefix: String,
    pub overlay: ManifestStatus,
    pub parent: ManifestStatus,
    pub projects: Vec<ProjectCoverage>,
    pub skipped_projects: Vec<PathBuf>,
}

impl CoverageReport {
    /// Scan projects and load both manifests as configured.
    pub fn build(config: &SyncConfig) -> Result<Self, CoreError> {
        let scan = scan_projects(&config.root, &config.prefix)?;
        let overlay = ManifestDocument::load(&config.overlay)?;
        let parent = ManifestDocument::load(&config.parent)?;
        Ok(Self::from_parts(
            &config.prefix,
            &scan,
            (&config.overlay, &overlay),
            (&config.parent, &parent),
        ))
    }

    pub fn from_parts(
        prefix: &str,
        scan: &ProjectScan,
        overlay: (&Path, &ManifestDocument),
        parent: (&Path, &ManifestDocument),
    ) -> Self {
        let overlay_pins = pin_versions(overlay.1);
        let parent_pins = pin_versions(parent.1);
        let projects = scan
            .projects
            .iter()
            .map(|project| ProjectCoverage {
                path: project.path.clone(),
                references: project
                    .ids
                    .iter()
                    .map(|id| ReferenceStatus {
                        id: id.clone(),
                        in_overlay: overlay_pins.contains_key(id),
                        in_parent: parent_pins.contains_key(id),
                        version: overlay_pins
                            .get(id)
                            .or_else(|| parent_pins.get(id))
                            .cloned(),
                    })
                    .collect(),
            })
            .collect();
        Self {
            generated_at: chrono::Utc::now().to_rfc3339(),
            prefix: prefix.to_owned(),
            overlay: status(overlay.0, overlay.1, overlay_pins.len()),
            parent: status(parent.0, parent.1, parent_pins.len()),
            projects,
            skipped_projects: scan.skipped.clone(),
        }
    }

    /// Projects with references lacking any central version.
    pub fn missing(&self) -> Vec<(&Path, Vec<&PackageId>)> {
        self.projects
            .iter()
            .filter_map(|p| {
                let ids: Vec<&PackageId> = p.missing().collect();
                (!ids.is_empty()).then_some((p.path.as_path(), ids))
            })
            .collect()
    }

    pub fn has_missing(&self) -> bool {
        self.projects.iter().any(|p| p.missing().next().is_some())
    }
}

fn pin_versions(doc: &ManifestDocument) -> BTreeMap<PackageId, String> {
    doc.pins()
        .into_iter()
        .filter(|p| !p.version.trim().is_empty())
        .map(|p| (p.id, p.version))
        .collect()
}

fn status(path: &Path, doc: &ManifestDocument, pins: usize) -> ManifestStatus {
    ManifestStatus {
        path: path.to_path_buf(),
        exists: path.is_file(),
        central_management: doc.central_management_enabled(),
        pins,
    }
}

fn yes_no(flag: bool) -> &'static str {
    if flag {
        "yes"
    } else {
        "no"
    }
}

impl fmt::Display for CoverageReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Central package management coverage ({})", self.generated_at)?;
        writeln!(f)?;
        for (label, m) in [("overlay", &self.overlay), ("parent", &self.parent)] {
            writeln!(
                f,
                "{label:<8} {}  exists: {}  central: {}  pins: {}",
                m.path.display(),
                yes_no(m.exists),
                yes_no(m.central_management),
                m.pins
            )?;
        }
        writeln!(f)?;

        if self.projects.is_empty() {
            writeln!(f, "no {}* references found", self.prefix)?;
        }
        for project in &self.projects {
            writeln!(f, "{}", project.path.display())?;
            for r in &project.references {
                let origin = match (r.in_overlay, r.in_parent) {
                    (true, true) => "overlay+parent",
                    (true, false) => "overlay",
                    (false, true) => "parent",
                    (false, false) => "MISSING",
                };
                writeln!(
                    f,
                    "  {:<40} {:<16} {}",
                    r.id.as_str(),
                    origin,
                    r.version.as_deref().unwrap_or("-")
                )?;
            }
        }
        for path in &self.skipped_projects {
            writeln!(f, "skipped (unparseable): {}", path.display())?;
        }
        writeln!(f)?;

        let missing = self.missing();
        if missing.is_empty() {
            write!(f, "all referenced packages have central versions")
        } else {
            writeln!(f, "missing central versions (restore fails with NU1010):")?;
            for (i, (path, ids)) in missing.iter().enumerate() {
                let ids: Vec<&str> = ids.iter().map(|id| id.as_str()).collect();
                write!(f, "  {}: {}", path.display(), ids.join(", "))?;
                if i + 1 < missing.len() {
                    writeln!(f)?;
                }
            }
            Ok(())
        }
    }
}
