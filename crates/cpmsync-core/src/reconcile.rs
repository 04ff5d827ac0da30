//! Reconciliation driver.
//!
//! One run loads the parent and overlay manifests, resolves a version for
//! every needed identifier in sorted order, applies the results to the
//! overlay, and writes it back at most once. Malformed manifests abort the
//! run before anything is written; registry trouble only leaves individual
//! identifiers unresolved.

use crate::config::{Policy, SyncConfig};
use crate::resolve::{RegistryAnswers, ResolveContext, Resolution, Resolver, VersionSource};
use crate::scan::scan_projects;
use crate::CoreError;
use cpmsync_registry::VersionIndex;
use cpmsync_schema::{ManifestDocument, PackageId, PinMode, VersionPin};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Added,
    Updated,
    Removed,
}

/// Net effect of a run on one overlay pin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PinChange {
    pub id: PackageId,
    pub kind: ChangeKind,
    /// New version, or the dropped version for a removal.
    pub version: String,
    pub mode: PinMode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous: Option<VersionPin>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<VersionSource>,
}

impl PinChange {
    fn between(before: Option<&VersionPin>, id: &PackageId, after: &Resolution) -> Option<Self> {
        if before.is_some_and(|p| p.version == after.version && p.mode == after.mode) {
            return None;
        }
        Some(Self {
            id: id.clone(),
            kind: if before.is_some() {
                ChangeKind::Updated
            } else {
                ChangeKind::Added
            },
            version: after.version.clone(),
            mode: after.mode,
            previous: before.cloned(),
            source: Some(after.source),
        })
    }

    fn removed(pin: &VersionPin) -> Self {
        Self {
            id: pin.id.clone(),
            kind: ChangeKind::Removed,
            version: pin.version.clone(),
            mode: pin.mode,
            previous: None,
            source: None,
        }
    }
}

/// Skeleton edits made to the overlay outside of pins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum StructuralEdit {
    ParentImport,
    CentralManagement,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncOutcome {
    pub overlay: PathBuf,
    pub policy: Policy,
    /// Number of identifiers the run had to resolve.
    pub needed: usize,
    pub changes: Vec<PinChange>,
    /// Needed identifiers left without a pin, sorted.
    pub unresolved: Vec<PackageId>,
    pub structural_edits: Vec<StructuralEdit>,
    pub skipped_projects: Vec<PathBuf>,
    /// Whether the overlay file was (re)written.
    pub written: bool,
    pub dry_run: bool,
    /// Nothing was referenced or changed; no file was read or written.
    pub noop: bool,
}

impl SyncOutcome {
    fn new(config: &SyncConfig, needed: usize) -> Self {
        Self {
            overlay: config.overlay.clone(),
            policy: config.policy,
            needed,
            changes: Vec::new(),
            unresolved: Vec::new(),
            structural_edits: Vec::new(),
            skipped_projects: Vec::new(),
            written: false,
            dry_run: config.dry_run,
            noop: false,
        }
    }

    /// No pin or skeleton change and nothing left unresolved.
    pub fn is_clean(&self) -> bool {
        self.changes.is_empty() && self.structural_edits.is_empty() && self.unresolved.is_empty()
    }

    /// Success, but some needed identifiers are still unpinned.
    pub fn has_warnings(&self) -> bool {
        !self.unresolved.is_empty()
    }
}

/// Scan the configured project root, then reconcile the overlay.
pub fn sync(config: SyncConfig, index: &dyn VersionIndex) -> Result<SyncOutcome, CoreError> {
    config.validate()?;
    let scan = scan_projects(&config.root, &config.prefix)?;
    let needed = scan.needed();
    let mut outcome = reconcile(config, needed, index)?;
    outcome.skipped_projects = scan.skipped;
    Ok(outcome)
}

/// Bring the overlay in line with `needed`.
pub fn reconcile(
    config: SyncConfig,
    needed: BTreeSet<PackageId>,
    index: &dyn VersionIndex,
) -> Result<SyncOutcome, CoreError> {
    config.validate()?;
    let mut outcome = SyncOutcome::new(&config, needed.len());
    if needed.is_empty() && config.changed.is_empty() {
        info!("no managed references and no changed ids; nothing to do");
        outcome.noop = true;
        return Ok(outcome);
    }
    for id in config.changed.difference(&needed) {
        debug!("changed id {id} is not referenced by any project; skipped");
    }

    let parent = ManifestDocument::load(&config.parent)?;
    let mut overlay = ManifestDocument::load(&config.overlay)?;
    let stable_base = config.stable_base()?;

    if overlay.ensure_parent_import() {
        outcome.structural_edits.push(StructuralEdit::ParentImport);
    }
    if overlay.ensure_central_management() {
        outcome.structural_edits.push(StructuralEdit::CentralManagement);
    }

    let original: BTreeMap<PackageId, VersionPin> = overlay
        .pins()
        .into_iter()
        .map(|p| (p.id.clone(), p))
        .collect();
    if config.policy == Policy::CleanSlate {
        let removed = overlay.remove_managed_pins(&config.prefix);
        debug!("clean slate: dropped {} managed pins", removed.len());
    }

    let ctx = ResolveContext {
        changed: config.changed,
        prerelease: config.prerelease,
        stable_base,
        parent_versions: config.parent_versions,
        prerelease_fallback: config.prerelease_fallback,
        ..ResolveContext::default()
    }
    .with_parent_pins(parent.pins());

    let registry = if config.offline {
        info!("offline: registry lookups skipped");
        RegistryAnswers::offline()
    } else {
        prefetch(&config.registry.url, &ctx, &overlay, &needed, index)
    };
    let resolver = Resolver::new(&ctx, &registry);
    let mut pinned = BTreeSet::new();
    for id in &needed {
        let existing = overlay.pin(id);
        match resolver.resolve(id, existing.as_ref()) {
            Ok(resolution) => {
                let update = overlay.upsert_pin(id, &resolution.version, resolution.mode);
                pinned.insert(id.clone());
                // Clean slate re-inserts every pin; only a net difference counts.
                if update.is_change() {
                    outcome
                        .changes
                        .extend(PinChange::between(original.get(id), id, &resolution));
                }
            }
            Err(unresolved) => {
                warn!("{unresolved}; leaving it unpinned");
                outcome.unresolved.push(id.clone());
            }
        }
    }
    for (id, pin) in &original {
        if !pinned.contains(id) && overlay.pin(id).is_none() {
            outcome.changes.push(PinChange::removed(pin));
        }
    }
    outcome.changes.sort_by(|a, b| a.id.cmp(&b.id));

    if config.dry_run {
        info!(
            "dry run: {} changes for {} not written",
            outcome.changes.len(),
            config.overlay.display()
        );
    } else {
        outcome.written = overlay.write(&config.overlay)?;
        if outcome.written {
            info!(
                "wrote {} ({} changes)",
                config.overlay.display(),
                outcome.changes.len()
            );
        }
    }
    Ok(outcome)
}

/// Fetch registry answers for the identifiers no local source can settle.
fn prefetch(
    registry_url: &str,
    ctx: &ResolveContext,
    overlay: &ManifestDocument,
    needed: &BTreeSet<PackageId>,
    index: &dyn VersionIndex,
) -> RegistryAnswers {
    let local = RegistryAnswers::offline();
    let probe = Resolver::new(ctx, &local);
    let pending: Vec<PackageId> = needed
        .iter()
        .filter(|id| probe.needs_registry(id, overlay.pin(id).as_ref()))
        .cloned()
        .collect();
    if pending.is_empty() {
        return local;
    }
    info!("querying {registry_url} for {} packages", pending.len());
    RegistryAnswers::prefetch(index, &pending)
}
