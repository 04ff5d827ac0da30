pub mod completions;
pub mod man_pages;
pub mod report;
pub mod sync;

use crate::ManifestArgs;
use cpmsync_core::{ChangeKind, SyncConfig};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::Path;
use std::time::Duration;

pub const EXIT_SUCCESS: u8 = 0;
pub const EXIT_FAILURE: u8 = 1;
pub const EXIT_MANIFEST_ERROR: u8 = 2;
/// The run succeeded but some referenced packages are still unpinned.
pub const EXIT_UNRESOLVED: u8 = 3;
/// The report found references without any central version.
pub const EXIT_MISSING_VERSIONS: u8 = 4;

pub fn json_pretty(value: &impl serde::Serialize) -> Result<String, String> {
    serde_json::to_string_pretty(value).map_err(|e| format!("JSON serialization failed: {e}"))
}

pub fn spinner(msg: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::with_template("{spinner:.cyan} {msg}")
            .expect("valid template")
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
    );
    pb.set_message(msg.to_owned());
    pb.enable_steady_tick(Duration::from_millis(80));
    pb
}

pub fn spin_ok(pb: &ProgressBar, msg: &str) {
    pb.set_style(ProgressStyle::with_template("{msg}").expect("valid template"));
    pb.finish_with_message(format!("✓ {msg}"));
}

pub fn spin_warn(pb: &ProgressBar, msg: &str) {
    pb.set_style(ProgressStyle::with_template("{msg}").expect("valid template"));
    pb.finish_with_message(format!("! {msg}"));
}

pub fn spin_fail(pb: &ProgressBar, msg: &str) {
    pb.set_style(ProgressStyle::with_template("{msg}").expect("valid template"));
    pb.finish_with_message(format!("✗ {msg}"));
}

/// One-character marker for a pin change, colored by kind.
pub fn change_marker(kind: ChangeKind) -> String {
    use console::Style;
    match kind {
        ChangeKind::Added => Style::new().green().apply_to("+").to_string(),
        ChangeKind::Updated => Style::new().yellow().apply_to("~").to_string(),
        ChangeKind::Removed => Style::new().red().apply_to("-").to_string(),
    }
}

/// Load the config file (explicit or discovered in `cwd`) and apply flag overrides.
pub fn load_config(args: &ManifestArgs, cwd: &Path) -> Result<SyncConfig, String> {
    let mut config =
        SyncConfig::discover(args.config.as_deref(), cwd).map_err(|e| e.to_string())?;
    if let Some(prefix) = &args.prefix {
        config.prefix.clone_from(prefix);
    }
    if let Some(root) = &args.root {
        config.root.clone_from(root);
    }
    if let Some(overlay) = &args.overlay {
        config.overlay.clone_from(overlay);
    }
    if let Some(parent) = &args.parent {
        config.parent.clone_from(parent);
    }
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn no_flags() -> ManifestArgs {
        ManifestArgs {
            config: None,
            prefix: None,
            root: None,
            overlay: None,
            parent: None,
        }
    }

    #[test]
    fn json_pretty_serializes_string() {
        let val = serde_json::json!({"key": "value"});
        let result = json_pretty(&val).unwrap();
        assert!(result.contains("\"key\""));
        assert!(result.contains("\"value\""));
    }

    #[test]
    fn change_markers_keep_their_symbol() {
        assert!(change_marker(ChangeKind::Added).contains('+'));
        assert!(change_marker(ChangeKind::Updated).contains('~'));
        assert!(change_marker(ChangeKind::Removed).contains('-'));
    }

    #[test]
    fn exit_codes_are_distinct() {
        let codes = [
            EXIT_SUCCESS,
            EXIT_FAILURE,
            EXIT_MANIFEST_ERROR,
            EXIT_UNRESOLVED,
            EXIT_MISSING_VERSIONS,
        ];
        for (i, a) in codes.iter().enumerate() {
            for b in &codes[i + 1..] {
                assert_ne!(a, b);
            }
        }
    }

    #[test]
    fn flags_override_config_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("cpmsync.toml"),
            "prefix = \"Acme.\"\nroot = \"clients\"\n",
        )
        .unwrap();

        let config = load_config(&no_flags(), dir.path()).unwrap();
        assert_eq!(config.prefix, "Acme.");
        assert_eq!(config.root, PathBuf::from("clients"));

        let args = ManifestArgs {
            root: Some(PathBuf::from("samples")),
            ..no_flags()
        };
        let config = load_config(&args, dir.path()).unwrap();
        assert_eq!(config.prefix, "Acme.");
        assert_eq!(config.root, PathBuf::from("samples"));
    }

    #[test]
    fn broken_config_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("cpmsync.toml"), "prefix = \n").unwrap();
        let err = load_config(&no_flags(), dir.path()).unwrap_err();
        assert!(err.contains("failed to parse config"));
    }

    #[test]
    fn spinner_creates_progress_bar() {
        let pb = spinner("testing...");
        spin_ok(&pb, "done");
    }

    #[test]
    fn spinner_fail_creates_progress_bar() {
        let pb = spinner("testing...");
        spin_fail(&pb, "failed");
    }
}
