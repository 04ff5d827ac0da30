//! Client project scanner.
//!
//! Walks a directory tree for MSBuild project files and collects the
//! `PackageReference` identifiers that carry the managed prefix.

use crate::CoreError;
use cpmsync_schema::PackageId;
use serde::Serialize;
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use sxd_document::dom::{ChildOfElement, ChildOfRoot, Element};
use tracing::{debug, warn};

const PROJECT_EXTENSIONS: &[&str] = &["csproj", "fsproj", "vbproj"];
const REFERENCE_ELEMENT: &str = "PackageReference";

/// Managed references found in one project file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProjectRefs {
    pub path: PathBuf,
    pub ids: BTreeSet<PackageId>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ProjectScan {
    /// Project files examined, parseable or not.
    pub scanned: usize,
    /// Projects with at least one managed reference, sorted by path.
    pub projects: Vec<ProjectRefs>,
    /// Projects that could not be read or parsed.
    pub skipped: Vec<PathBuf>,
}

impl ProjectScan {
    /// Union of all managed identifiers referenced by scanned projects.
    pub fn needed(&self) -> BTreeSet<PackageId> {
        self.projects
            .iter()
            .flat_map(|p| p.ids.iter().cloned())
            .collect()
    }
}

/// Scan every `*.csproj`, `*.fsproj` and `*.vbproj` below `root`.
///
/// A missing `root` scans nothing. Unreadable directories are logged and
/// passed over. Unreadable or malformed projects are logged and listed in
/// [`ProjectScan::skipped`].
pub fn scan_projects(root: &Path, prefix: &str) -> Result<ProjectScan, CoreError> {
    let mut scan = ProjectScan::default();
    for path in project_files(root)? {
        scan.scanned += 1;
        let text = match fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) => {
                warn!("skipping unreadable project {}: {e}", path.display());
                scan.skipped.push(path);
                continue;
            }
        };
        match package_references(&text, prefix) {
            Ok(ids) if ids.is_empty() => {}
            Ok(ids) => {
                debug!("{}: {} managed references", path.display(), ids.len());
                scan.projects.push(ProjectRefs { path, ids });
            }
            Err(reason) => {
                warn!("skipping malformed project {}: {reason}", path.display());
                scan.skipped.push(path);
            }
        }
    }
    debug!(
        "scanned {} projects under {}, {} reference managed packages",
        scan.scanned,
        root.display(),
        scan.projects.len()
    );
    Ok(scan)
}

fn project_files(root: &Path) -> Result<Vec<PathBuf>, CoreError> {
    let base = glob::Pattern::escape(&root.to_string_lossy());
    let mut files = BTreeSet::new();
    for ext in PROJECT_EXTENSIONS {
        let pattern = format!("{base}/**/*.{ext}");
        let entries = glob::glob(&pattern)
            .map_err(|e| CoreError::Config(format!("invalid scan root '{pattern}': {e}")))?;
        for entry in entries {
            match entry {
                Ok(path) if path.is_file() => {
                    files.insert(path);
                }
                Ok(_) => {}
                Err(e) => warn!("skipping unreadable {}: {}", e.path().display(), e.error()),
            }
        }
    }
    Ok(files.into_iter().collect())
}

/// Identifiers of `PackageReference` items (by `Include`, else `Update`)
/// starting with `prefix`, at any depth and in any namespace.
pub fn package_references(text: &str, prefix: &str) -> Result<BTreeSet<PackageId>, String> {
    let body = text.strip_prefix('\u{feff}').unwrap_or(text);
    let package = sxd_document::parser::parse(body).map_err(|e| format!("{e:?}"))?;
    let document = package.as_document();
    let mut ids = BTreeSet::new();
    for child in document.root().children() {
        if let ChildOfRoot::Element(element) = child {
            collect_references(element, prefix, &mut ids);
        }
    }
    Ok(ids)
}

fn collect_references(element: Element<'_>, prefix: &str, ids: &mut BTreeSet<PackageId>) {
    if element.name().local_part() == REFERENCE_ELEMENT {
        let id = element
            .attribute_value("Include")
            .or_else(|| element.attribute_value("Update"))
            .map(str::trim);
        if let Some(id) = id.filter(|id| id.starts_with(prefix)) {
            ids.insert(PackageId::from(id));
        }
    }
    for child in element.children() {
        if let ChildOfElement::Element(inner) = child {
            collect_references(inner, prefix, ids);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const APP: &str = r#"<Project Sdk="Microsoft.NET.Sdk">
  <ItemGroup>
    <PackageReference Include="Coven.Core" />
    <PackageReference Include="Coven.Agents.OpenAI" />
    <PackageReference Include="Newtonsoft.Json" />
  </ItemGroup>
  <ItemGroup Condition="'$(Configuration)' == 'Debug'">
    <PackageReference Update="Coven.Diagnostics" />
  </ItemGroup>
</Project>
"#;

    fn names(ids: &BTreeSet<PackageId>) -> Vec<&str> {
        ids.iter().map(PackageId::as_str).collect()
    }

    #[test]
    fn collects_prefixed_include_and_update() {
        let ids = package_references(APP, "Coven.").unwrap();
        assert_eq!(
            names(&ids),
            ["Coven.Agents.OpenAI", "Coven.Core", "Coven.Diagnostics"]
        );
    }

    #[test]
    fn ignores_namespace() {
        let text = r#"<?xml version="1.0" encoding="utf-8"?>
<Project ToolsVersion="15.0" xmlns="http://schemas.microsoft.com/developer/msbuild/2003">
  <ItemGroup>
    <PackageReference Include="Coven.Core" Version="1.0.0" />
  </ItemGroup>
</Project>"#;
        assert_eq!(names(&package_references(text, "Coven.").unwrap()), ["Coven.Core"]);
    }

    #[test]
    fn prefix_is_case_sensitive() {
        let text = r#"<Project><ItemGroup><PackageReference Include="coven.core" /></ItemGroup></Project>"#;
        assert!(package_references(text, "Coven.").unwrap().is_empty());
    }

    #[test]
    fn malformed_project_is_an_error() {
        assert!(package_references("<Project><ItemGroup>", "Coven.").is_err());
    }

    #[test]
    fn scans_tree_and_skips_broken_projects() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("samples");
        fs::create_dir_all(root.join("Chat/src")).unwrap();
        fs::create_dir_all(root.join("Broken")).unwrap();
        fs::create_dir_all(root.join("Plain")).unwrap();
        fs::write(root.join("Chat/src/Chat.csproj"), APP).unwrap();
        fs::write(
            root.join("Chat/Chat.Tests.fsproj"),
            r#"<Project><ItemGroup><PackageReference Include="Coven.Testing" /></ItemGroup></Project>"#,
        )
        .unwrap();
        fs::write(root.join("Broken/Broken.csproj"), "<Project>").unwrap();
        fs::write(
            root.join("Plain/Plain.vbproj"),
            r#"<Project><ItemGroup><PackageReference Include="Serilog" /></ItemGroup></Project>"#,
        )
        .unwrap();
        fs::write(root.join("notes.xml"), "<Project/>").unwrap();

        let scan = scan_projects(&root, "Coven.").unwrap();
        assert_eq!(scan.scanned, 4);
        assert_eq!(scan.projects.len(), 2);
        assert_eq!(scan.skipped, [root.join("Broken/Broken.csproj")]);
        assert_eq!(
            names(&scan.needed()),
            [
                "Coven.Agents.OpenAI",
                "Coven.Core",
                "Coven.Diagnostics",
                "Coven.Testing"
            ]
        );
    }

    #[cfg(unix)]
    #[test]
    fn unreadable_directory_does_not_abort_scan() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("samples");
        fs::create_dir_all(root.join("Chat")).unwrap();
        fs::create_dir_all(root.join("Locked/Inner")).unwrap();
        fs::write(root.join("Chat/Chat.csproj"), APP).unwrap();
        fs::write(root.join("Locked/Inner/Hidden.csproj"), APP).unwrap();
        let locked = root.join("Locked");
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o000)).unwrap();

        let scan = scan_projects(&root, "Coven.");
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o755)).unwrap();

        let scan = scan.unwrap();
        assert!(scan
            .projects
            .iter()
            .any(|p| p.path == root.join("Chat/Chat.csproj")));
        assert!(scan.needed().contains(&PackageId::new("Coven.Core")));
    }

    #[test]
    fn missing_root_scans_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let scan = scan_projects(&dir.path().join("absent"), "Coven.").unwrap();
        assert_eq!(scan, ProjectScan::default());
        assert!(scan.needed().is_empty());
    }
}
