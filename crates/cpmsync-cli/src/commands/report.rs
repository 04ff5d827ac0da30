use super::{json_pretty, load_config, EXIT_MISSING_VERSIONS, EXIT_SUCCESS};
use crate::ManifestArgs;
use cpmsync_core::CoverageReport;
use std::path::Path;

pub fn run(manifest: &ManifestArgs, out: Option<&Path>, json: bool) -> Result<u8, String> {
    let config = load_config(manifest, Path::new("."))?;
    let report = CoverageReport::build(&config).map_err(|e| e.to_string())?;

    let rendered = if json {
        json_pretty(&report)?
    } else {
        report.to_string()
    };
    print!("{rendered}");
    if !rendered.ends_with('\n') {
        println!();
    }

    if let Some(path) = out {
        write_report(path, &rendered)?;
        tracing::info!("report written to {}", path.display());
    }

    if report.has_missing() {
        Ok(EXIT_MISSING_VERSIONS)
    } else {
        Ok(EXIT_SUCCESS)
    }
}

fn write_report(path: &Path, rendered: &str) -> Result<(), String> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .map_err(|e| format!("failed to create {}: {e}", parent.display()))?;
    }
    std::fs::write(path, rendered).map_err(|e| format!("failed to write {}: {e}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_file_lands_in_nested_directory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out/coverage.txt");
        write_report(&path, "all clear\n").unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "all clear\n");
    }

    #[test]
    fn bare_file_name_needs_no_parent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("coverage.json");
        write_report(&path, "{}").unwrap();
        assert!(path.exists());
    }
}
