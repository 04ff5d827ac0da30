use super::{
    change_marker, json_pretty, load_config, spin_fail, spin_ok, spin_warn, spinner,
    EXIT_SUCCESS, EXIT_UNRESOLVED,
};
use crate::ManifestArgs;
use cpmsync_core::{parse_changed, ChangeKind, Policy, SyncConfig, SyncOutcome};
use cpmsync_registry::{HttpRegistry, RegistryConfig};
use std::path::{Path, PathBuf};

/// Per-run inputs from the `sync` command line.
#[derive(Debug, Default)]
pub struct SyncOptions {
    pub ids: Option<String>,
    pub prerelease: Option<String>,
    pub policy: Option<Policy>,
    pub prerelease_fallback: bool,
    pub parent_versions: bool,
    pub stable_base_file: Option<PathBuf>,
    pub registry_url: Option<String>,
    pub timeout: Option<u64>,
    pub offline: bool,
    pub dry_run: bool,
}

impl SyncOptions {
    fn apply(&self, mut config: SyncConfig) -> SyncConfig {
        if let Some(policy) = self.policy {
            config.policy = policy;
        }
        config.prerelease_fallback |= self.prerelease_fallback;
        config.parent_versions |= self.parent_versions;
        if let Some(path) = &self.stable_base_file {
            config.stable_base_file = Some(path.clone());
        }
        if let Some(url) = &self.registry_url {
            let mut registry = RegistryConfig::new(url).with_timeout(config.registry.timeout_secs);
            registry.auth_token = config.registry.auth_token.take();
            config.registry = registry;
        }
        if let Some(secs) = self.timeout {
            config.registry.timeout_secs = secs;
        }
        config.offline = self.offline;
        config.dry_run = self.dry_run;
        let changed = parse_changed(self.ids.as_deref().unwrap_or_default());
        config.with_changed(changed, self.prerelease.as_deref())
    }
}

pub fn run(manifest: &ManifestArgs, opts: &SyncOptions, json: bool) -> Result<u8, String> {
    let config = opts.apply(load_config(manifest, Path::new("."))?);
    tracing::debug!("effective config: {config:?}");
    let registry = HttpRegistry::new(config.registry.clone());
    let overlay = config.overlay.clone();

    let pb = (!json).then(|| spinner(&format!("reconciling {}...", overlay.display())));
    let outcome = match cpmsync_core::sync(config, &registry) {
        Ok(outcome) => outcome,
        Err(e) => {
            if let Some(pb) = &pb {
                spin_fail(pb, &format!("{} not reconciled", overlay.display()));
            }
            return Err(e.to_string());
        }
    };

    if let Some(pb) = &pb {
        let summary = summary(&outcome);
        if outcome.has_warnings() {
            spin_warn(pb, &summary);
        } else {
            spin_ok(pb, &summary);
        }
    }

    if json {
        println!("{}", json_pretty(&outcome)?);
    } else {
        print_details(&outcome);
    }

    if outcome.has_warnings() {
        Ok(EXIT_UNRESOLVED)
    } else {
        Ok(EXIT_SUCCESS)
    }
}

fn summary(outcome: &SyncOutcome) -> String {
    let path = outcome.overlay.display();
    if outcome.noop {
        return "no managed package references; nothing to do".to_owned();
    }
    let changes = outcome.changes.len();
    if outcome.dry_run {
        format!("{path}: {changes} changes (dry run, not written)")
    } else if outcome.written {
        format!("{path} updated ({changes} changes)")
    } else {
        format!("{path} already up to date")
    }
}

fn print_details(outcome: &SyncOutcome) {
    for change in &outcome.changes {
        let marker = change_marker(change.kind);
        match change.kind {
            ChangeKind::Removed => println!("  {marker} {} {}", change.id, change.version),
            ChangeKind::Added | ChangeKind::Updated => {
                let from = change
                    .previous
                    .as_ref()
                    .map(|p| format!("{} -> ", p.version))
                    .unwrap_or_default();
                let source = change
                    .source
                    .map(|s| format!(", {s}"))
                    .unwrap_or_default();
                println!(
                    "  {marker} {} {from}{} ({}{source})",
                    change.id, change.version, change.mode
                );
            }
        }
    }
    for path in &outcome.skipped_projects {
        println!("  skipped unparseable project {}", path.display());
    }
    for id in &outcome.unresolved {
        eprintln!("warning: no version found for {id}; restore will fail until it is pinned");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cpmsync_schema::PackageId;

    #[test]
    fn options_override_config() {
        let opts = SyncOptions {
            ids: Some("Coven.Core, Coven.Chat".to_owned()),
            prerelease: Some("1.0.0-pre.5".to_owned()),
            policy: Some(Policy::CleanSlate),
            registry_url: Some("https://nuget.example.com/flat/".to_owned()),
            timeout: Some(3),
            offline: true,
            ..SyncOptions::default()
        };
        let config = opts.apply(SyncConfig::default());
        assert_eq!(config.policy, Policy::CleanSlate);
        assert_eq!(config.registry.url, "https://nuget.example.com/flat");
        assert_eq!(config.registry.timeout_secs, 3);
        assert!(config.offline);
        assert!(config.changed.contains(&PackageId::new("Coven.Chat")));
        assert_eq!(config.prerelease.as_deref(), Some("1.0.0-pre.5"));
    }

    #[test]
    fn boolean_flags_only_switch_on() {
        let config = SyncConfig {
            prerelease_fallback: true,
            ..SyncConfig::default()
        };
        let config = SyncOptions::default().apply(config);
        assert!(config.prerelease_fallback);
        assert!(!config.parent_versions);
    }

    #[test]
    fn registry_url_keeps_configured_token() {
        let mut config = SyncConfig::default();
        config.registry = config.registry.with_token("secret");
        let opts = SyncOptions {
            registry_url: Some("http://127.0.0.1:9".to_owned()),
            ..SyncOptions::default()
        };
        let config = opts.apply(config);
        assert_eq!(config.registry.auth_token.as_deref(), Some("secret"));
    }
}
