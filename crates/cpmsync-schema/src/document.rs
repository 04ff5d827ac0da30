//! `Directory.Packages.props` document model.
//!
//! A `ManifestDocument` is a view over a lossless XML tree. It exposes the
//! parent import directive and the `PackageVersion` pins held by root-level
//! `ItemGroup`s, and edits them in place so that every untouched byte of the
//! file survives a load/mutate/write cycle.

use crate::types::{PackageId, PinMode, VersionPin};
use crate::xml::{self, Element, XmlTree};
use crate::SchemaError;
use std::collections::BTreeSet;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, warn};

/// `Project` attribute of the import that chains to the next manifest up the tree.
pub const PARENT_IMPORT_PROJECT: &str =
    "$([MSBuild]::GetPathOfFileAbove(Directory.Packages.props, $(MSBuildThisFileDirectory)..))";
const PARENT_IMPORT_MARKER: &str = "GetPathOfFileAbove";
const CENTRAL_MANAGEMENT_PROPERTY: &str = "ManagePackageVersionsCentrally";
const ROOT_ELEMENT: &str = "Project";
const PIN_ELEMENT: &str = "PackageVersion";
const VERSION_ATTR: &str = "Version";

/// Effect of a single [`ManifestDocument::upsert_pin`] call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PinUpdate {
    Unchanged,
    Inserted,
    Updated { previous: VersionPin },
}

impl PinUpdate {
    pub fn is_change(&self) -> bool {
        !matches!(self, PinUpdate::Unchanged)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestDocument {
    tree: XmlTree,
}

impl Default for ManifestDocument {
    fn default() -> Self {
        Self::empty()
    }
}

impl ManifestDocument {
    /// A document with an empty `<Project>` root: no import, no pins.
    pub fn empty() -> Self {
        Self {
            tree: XmlTree::with_root(ROOT_ELEMENT),
        }
    }

    /// Load a manifest. A missing file yields an empty document.
    pub fn load(path: &Path) -> Result<Self, SchemaError> {
        match fs::read_to_string(path) {
            Ok(text) => {
                debug!("loaded manifest {} ({} bytes)", path.display(), text.len());
                Self::parse_named(&text, &path.display().to_string())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("manifest {} does not exist; starting empty", path.display());
                Ok(Self::empty())
            }
            Err(e) => Err(SchemaError::Io(e)),
        }
    }

    pub fn parse(text: &str) -> Result<Self, SchemaError> {
        Self::parse_named(text, "<input>")
    }

    fn parse_named(text: &str, name: &str) -> Result<Self, SchemaError> {
        let malformed = |reason: String| SchemaError::MalformedDocument {
            path: name.to_owned(),
            reason,
        };
        let body = text.strip_prefix('\u{feff}').unwrap_or(text);
        sxd_document::parser::parse(body).map_err(|e| malformed(format!("{e:?}")))?;
        let tree = xml::parse(text).map_err(malformed)?;
        if tree.root.local_name() != ROOT_ELEMENT {
            return Err(malformed(format!(
                "root element is <{}>, expected <{ROOT_ELEMENT}>",
                tree.root.name
            )));
        }
        Ok(Self { tree })
    }

    pub fn render(&self) -> String {
        self.tree.render()
    }

    /// Whether the root carries an import of the parent manifest.
    pub fn imports_parent(&self) -> bool {
        self.tree.root.elements().any(is_parent_import)
    }

    /// Insert the parent import as the first child element, unless present.
    pub fn ensure_parent_import(&mut self) -> bool {
        if self.imports_parent() {
            return false;
        }
        let first = self.tree.root.element_indexes(|_| true).first().copied();
        let import = Element::new("Import").with_attr("Project", PARENT_IMPORT_PROJECT);
        self.tree.root.insert_element(first, import, "");
        debug!("inserted parent import");
        true
    }

    /// Whether the first `PropertyGroup` switches central management on.
    pub fn central_management_enabled(&self) -> bool {
        self.tree
            .root
            .elements()
            .filter(|e| e.local_name() == "PropertyGroup")
            .flat_map(Element::elements)
            .any(|e| {
                e.local_name() == CENTRAL_MANAGEMENT_PROPERTY
                    && e.text().eq_ignore_ascii_case("true")
            })
    }

    /// Make the first `PropertyGroup` set `ManagePackageVersionsCentrally` to `true`.
    pub fn ensure_central_management(&mut self) -> bool {
        let root_indent = self.tree.root.child_indent("");
        let group_idx = self
            .tree
            .root
            .element_indexes(|e| e.local_name() == "PropertyGroup")
            .first()
            .copied();

        if let Some(group) = group_idx.and_then(|i| self.tree.root.element_at_mut(i)) {
            let prop_idx = group
                .element_indexes(|e| e.local_name() == CENTRAL_MANAGEMENT_PROPERTY)
                .first()
                .copied();
            return match prop_idx.and_then(|i| group.element_at_mut(i)) {
                Some(prop) if prop.text().eq_ignore_ascii_case("true") => false,
                Some(prop) => prop.set_text("true"),
                None => {
                    let prop = Element::new(CENTRAL_MANAGEMENT_PROPERTY).with_text("true");
                    group.insert_element(None, prop, &root_indent);
                    true
                }
            };
        }

        let mut group = Element::new("PropertyGroup");
        group.insert_element(
            None,
            Element::new(CENTRAL_MANAGEMENT_PROPERTY).with_text("true"),
            &root_indent,
        );
        let before = self
            .tree
            .root
            .element_indexes(|e| e.local_name() == "ItemGroup")
            .first()
            .copied();
        self.tree.root.insert_element(before, group, "");
        debug!("inserted central management property group");
        true
    }

    /// All pins in document order. A repeated identifier keeps its first pin.
    pub fn pins(&self) -> Vec<VersionPin> {
        let mut seen = BTreeSet::new();
        let mut out = Vec::new();
        for group in self.item_groups() {
            for pin in group.elements().filter_map(read_pin) {
                if seen.insert(pin.id.clone()) {
                    out.push(pin);
                } else {
                    warn!("duplicate PackageVersion for '{}' ignored", pin.id);
                }
            }
        }
        out
    }

    pub fn pin(&self, id: &PackageId) -> Option<VersionPin> {
        self.find_pin(id).and_then(|(g, p)| {
            self.tree
                .root
                .element_at(g)
                .and_then(|group| group.element_at(p))
                .and_then(read_pin)
        })
    }

    /// Identifiers pinned by this document, whatever their mode.
    pub fn pinned_ids(&self) -> BTreeSet<PackageId> {
        self.pins().into_iter().map(|p| p.id).collect()
    }

    /// Insert or update the pin for `id`. Calling it again with the same
    /// arguments reports [`PinUpdate::Unchanged`] and leaves the tree alone.
    pub fn upsert_pin(&mut self, id: &PackageId, version: &str, mode: PinMode) -> PinUpdate {
        if let Some((g, p)) = self.find_pin(id) {
            let Some(element) = self
                .tree
                .root
                .element_at_mut(g)
                .and_then(|group| group.element_at_mut(p))
            else {
                return PinUpdate::Unchanged;
            };
            let Some(previous) = read_pin(element) else {
                return PinUpdate::Unchanged;
            };
            let mut changed = false;
            if previous.mode != mode {
                changed |= element.rename_attr(previous.mode.attribute(), mode.attribute());
            }
            changed |= element.set_attr(VERSION_ATTR, version);
            return if changed {
                debug!("updated pin {id}: {} -> {version} ({mode})", previous.version);
                PinUpdate::Updated { previous }
            } else {
                PinUpdate::Unchanged
            };
        }

        let root_indent = self.tree.root.child_indent("");
        let g = self.target_group(id);
        let Some(group) = self.tree.root.element_at_mut(g) else {
            return PinUpdate::Unchanged;
        };
        let before = group
            .element_indexes(|e| read_pin(e).is_some_and(|pin| pin.id > *id))
            .first()
            .copied();
        let element = Element::new(PIN_ELEMENT)
            .with_attr(mode.attribute(), id)
            .with_attr(VERSION_ATTR, version);
        group.insert_element(before, element, &root_indent);
        debug!("inserted pin {id} = {version} ({mode})");
        PinUpdate::Inserted
    }

    /// Remove every pin whose identifier starts with `prefix`.
    pub fn remove_managed_pins(&mut self, prefix: &str) -> Vec<VersionPin> {
        let mut removed = Vec::new();
        for g in self.item_group_indexes() {
            let Some(group) = self.tree.root.element_at_mut(g) else {
                continue;
            };
            let doomed = group
                .element_indexes(|e| read_pin(e).is_some_and(|pin| pin.id.has_prefix(prefix)));
            for idx in doomed.into_iter().rev() {
                if let Some(pin) = group.remove_element(idx).as_ref().and_then(read_pin) {
                    removed.push(pin);
                }
            }
        }
        removed.sort_by(|a, b| a.id.cmp(&b.id));
        removed
    }

    /// Write the document. Returns `false` without touching the file when its
    /// current content is already identical.
    pub fn write(&self, path: &Path) -> Result<bool, SchemaError> {
        let rendered = self.render();
        if let Ok(existing) = fs::read(path) {
            if existing == rendered.as_bytes() {
                debug!("{} unchanged; skipping write", path.display());
                return Ok(false);
            }
        }
        write_atomic(path, &rendered)?;
        debug!("wrote {} ({} bytes)", path.display(), rendered.len());
        Ok(true)
    }

    fn item_group_indexes(&self) -> Vec<usize> {
        self.tree
            .root
            .element_indexes(|e| e.local_name() == "ItemGroup")
    }

    fn item_groups(&self) -> impl Iterator<Item = &Element> {
        self.tree
            .root
            .elements()
            .filter(|e| e.local_name() == "ItemGroup")
    }

    /// (group node index, pin node index) of the first pin for `id`.
    fn find_pin(&self, id: &PackageId) -> Option<(usize, usize)> {
        self.item_group_indexes().into_iter().find_map(|g| {
            let group = self.tree.root.element_at(g)?;
            group
                .element_indexes(|e| read_pin(e).is_some_and(|pin| pin.id == *id))
                .first()
                .map(|&p| (g, p))
        })
    }

    /// Group that receives a new pin: one already holding pins from the same
    /// leading namespace segment, else the first group holding any pin, else
    /// the first unconditioned group, else a new group at the end of the root.
    fn target_group(&mut self, id: &PackageId) -> usize {
        let family = leading_segment(id);
        let groups = self.item_group_indexes();
        let holds = |g: usize, pred: &dyn Fn(&VersionPin) -> bool| {
            self.tree
                .root
                .element_at(g)
                .is_some_and(|group| group.elements().filter_map(read_pin).any(|p| pred(&p)))
        };
        let found = groups
            .iter()
            .copied()
            .find(|&g| holds(g, &|p: &VersionPin| leading_segment(&p.id) == family))
            .or_else(|| groups.iter().copied().find(|&g| holds(g, &|_: &VersionPin| true)))
            .or_else(|| {
                groups.iter().copied().find(|&g| {
                    self.tree
                        .root
                        .element_at(g)
                        .is_some_and(|group| group.attr("Condition").is_none())
                })
            });
        match found {
            Some(g) => g,
            None => {
                debug!("no suitable ItemGroup; appending one");
                self.tree
                    .root
                    .insert_element(None, Element::new("ItemGroup"), "")
            }
        }
    }
}

fn is_parent_import(e: &Element) -> bool {
    e.local_name() == "Import"
        && e.attr("Project")
            .is_some_and(|p| p.contains(PARENT_IMPORT_MARKER))
}

fn read_pin(e: &Element) -> Option<VersionPin> {
    if e.local_name() != PIN_ELEMENT {
        return None;
    }
    let (id, mode) = match (e.attr("Include"), e.attr("Update")) {
        (Some(id), _) => (id, PinMode::Define),
        (None, Some(id)) => (id, PinMode::Override),
        (None, None) => return None,
    };
    Some(VersionPin {
        id: PackageId::new(id),
        version: e.attr(VERSION_ATTR).unwrap_or_default().to_owned(),
        mode,
    })
}

fn leading_segment(id: &str) -> &str {
    id.split('.').next().unwrap_or(id)
}

fn write_atomic(dest: &Path, content: &str) -> Result<(), SchemaError> {
    let dir = dest
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map_or_else(|| PathBuf::from("."), Path::to_path_buf);
    fs::create_dir_all(&dir)?;
    let mut tmp = NamedTempFile::new_in(&dir)?;
    tmp.write_all(content.as_bytes())?;
    tmp.as_file().sync_all()?;
    tmp.persist(dest).map_err(|e| SchemaError::Io(e.error))?;
    Ok(())
}
