//! CLI subprocess integration tests.
//!
//! These tests run the `cpmsync` binary inside a scratch workspace and check
//! exit codes, the files it writes, and the JSON it prints.

use cpmsync_registry::fixture::FixtureServer;
use cpmsync_schema::{ManifestDocument, PackageId, PinMode};
use std::fs;
use std::path::Path;
use std::process::{Command, Output};

const PARENT: &str = r#"<Project>
  <PropertyGroup>
    <ManagePackageVersionsCentrally>true</ManagePackageVersionsCentrally>
  </PropertyGroup>
  <ItemGroup>
    <PackageVersion Include="Acme.Widgets" Version="1.0.0" />
  </ItemGroup>
</Project>
"#;

fn cpmsync(cwd: &Path) -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_cpmsync"));
    cmd.current_dir(cwd);
    cmd.env_remove("CPMSYNC_LOG");
    cmd.env_remove("CPMSYNC_REGISTRY_TOKEN");
    cmd
}

fn workspace() -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("Directory.Packages.props"), PARENT).unwrap();
    write_project(dir.path(), "Shop", &["Acme.Widgets", "Acme.Gadgets", "Serilog"]);
    dir
}

fn write_project(root: &Path, name: &str, refs: &[&str]) {
    let dir = root.join("samples").join(name);
    fs::create_dir_all(&dir).unwrap();
    let items: String = refs
        .iter()
        .map(|r| format!("    <PackageReference Include=\"{r}\" />\n"))
        .collect();
    fs::write(
        dir.join(format!("{name}.csproj")),
        format!("<Project Sdk=\"Microsoft.NET.Sdk\">\n  <ItemGroup>\n{items}  </ItemGroup>\n</Project>\n"),
    )
    .unwrap();
}

fn overlay_path(dir: &Path) -> std::path::PathBuf {
    dir.join("samples/Directory.Packages.props")
}

fn pin_of(dir: &Path, id: &str) -> Option<(String, PinMode)> {
    ManifestDocument::load(&overlay_path(dir))
        .unwrap()
        .pin(&PackageId::new(id))
        .map(|p| (p.version, p.mode))
}

fn stdout_json(output: &Output) -> serde_json::Value {
    let stdout = String::from_utf8_lossy(&output.stdout);
    serde_json::from_str(&stdout)
        .unwrap_or_else(|e| panic!("invalid JSON: {e}\nstdout: {stdout}"))
}

fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}

#[test]
fn cli_version_exits_zero() {
    let dir = tempfile::tempdir().unwrap();
    let output = cpmsync(dir.path()).arg("--version").output().unwrap();
    assert!(output.status.success());
    assert!(String::from_utf8_lossy(&output.stdout).contains("cpmsync"));
}

#[test]
fn cli_help_lists_subcommands() {
    let dir = tempfile::tempdir().unwrap();
    let output = cpmsync(dir.path()).arg("--help").output().unwrap();
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    for sub in ["sync", "report", "completions", "man-pages"] {
        assert!(stdout.contains(sub), "help should list {sub}");
    }
}

#[test]
fn sync_pins_changed_and_registry_versions() {
    let dir = workspace();
    let server = FixtureServer::start();
    server.publish("Acme.Gadgets", &["1.0.0", "1.4.0", "2.0.0-beta.2"]);

    let output = cpmsync(dir.path())
        .args(["--json", "sync", "--prefix", "Acme.", "--registry-url"])
        .arg(&server.url)
        .args(["--ids", "Acme.Widgets", "--version", "2.0.0-rc.1"])
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(0), "stderr: {}", stderr(&output));

    let json = stdout_json(&output);
    assert_eq!(json["written"], true);
    assert_eq!(json["needed"], 2);
    assert_eq!(json["changes"].as_array().unwrap().len(), 2);
    assert!(json["unresolved"].as_array().unwrap().is_empty());

    assert_eq!(
        pin_of(dir.path(), "Acme.Widgets"),
        Some(("2.0.0-rc.1".to_owned(), PinMode::Override))
    );
    assert_eq!(
        pin_of(dir.path(), "Acme.Gadgets"),
        Some(("1.4.0".to_owned(), PinMode::Define))
    );
    assert_eq!(pin_of(dir.path(), "Serilog"), None);
}

#[test]
fn second_sync_leaves_overlay_untouched() {
    let dir = workspace();
    let server = FixtureServer::start();
    server.publish("Acme.Widgets", &["1.0.0", "1.2.0"]);
    server.publish("Acme.Gadgets", &["1.4.0"]);
    let run = || {
        cpmsync(dir.path())
            .args(["--json", "sync", "--prefix", "Acme.", "--registry-url"])
            .arg(&server.url)
            .output()
            .unwrap()
    };

    assert_eq!(run().status.code(), Some(0));
    let before = fs::read(overlay_path(dir.path())).unwrap();
    let second = run();
    assert_eq!(second.status.code(), Some(0));
    assert_eq!(stdout_json(&second)["written"], false);
    assert_eq!(fs::read(overlay_path(dir.path())).unwrap(), before);
}

#[test]
fn offline_sync_with_unresolved_ids_exits_three() {
    let dir = workspace();
    let output = cpmsync(dir.path())
        .args(["sync", "--prefix", "Acme.", "--offline"])
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(3));
    assert!(stderr(&output).contains("Acme.Gadgets"));
    assert_eq!(
        pin_of(dir.path(), "Acme.Widgets"),
        None,
        "offline runs do not copy parent versions unless asked"
    );
}

#[test]
fn parent_versions_flag_reuses_parent_pin() {
    let dir = workspace();
    write_project(dir.path(), "Shop", &["Acme.Widgets"]);
    let output = cpmsync(dir.path())
        .args(["sync", "--prefix", "Acme.", "--offline", "--parent-versions"])
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(0), "stderr: {}", stderr(&output));
    assert_eq!(
        pin_of(dir.path(), "Acme.Widgets"),
        Some(("1.0.0".to_owned(), PinMode::Override))
    );
}

#[test]
fn malformed_overlay_exits_two() {
    let dir = workspace();
    fs::write(overlay_path(dir.path()), "<Project><ItemGroup>").unwrap();
    let output = cpmsync(dir.path())
        .args(["sync", "--prefix", "Acme.", "--offline"])
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(2));
    assert!(stderr(&output).contains("manifest error"));
    assert_eq!(
        fs::read_to_string(overlay_path(dir.path())).unwrap(),
        "<Project><ItemGroup>"
    );
}

#[test]
fn ids_without_version_is_rejected() {
    let dir = workspace();
    let output = cpmsync(dir.path())
        .args(["sync", "--prefix", "Acme.", "--offline", "--ids", "Acme.Widgets"])
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(1));
    assert!(stderr(&output).contains("config error"));
    assert!(!overlay_path(dir.path()).exists());
}

#[test]
fn dry_run_does_not_write_overlay() {
    let dir = workspace();
    let output = cpmsync(dir.path())
        .args(["--json", "sync", "--prefix", "Acme.", "--offline", "--dry-run"])
        .args(["--ids", "Acme.Widgets", "--version", "2.0.0-rc.1"])
        .output()
        .unwrap();
    // Acme.Gadgets stays unresolved offline.
    assert_eq!(output.status.code(), Some(3));
    let json = stdout_json(&output);
    assert_eq!(json["dry_run"], true);
    assert_eq!(json["written"], false);
    assert!(!overlay_path(dir.path()).exists());
}

#[test]
fn config_file_in_working_directory_is_used() {
    let dir = workspace();
    fs::write(
        dir.path().join("cpmsync.toml"),
        "prefix = \"Acme.\"\nparent_versions = true\n",
    )
    .unwrap();
    write_project(dir.path(), "Shop", &["Acme.Widgets"]);

    let output = cpmsync(dir.path())
        .args(["sync", "--offline"])
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(0), "stderr: {}", stderr(&output));
    assert_eq!(
        pin_of(dir.path(), "Acme.Widgets"),
        Some(("1.0.0".to_owned(), PinMode::Override))
    );
}

#[test]
fn broken_config_file_exits_one() {
    let dir = workspace();
    fs::write(dir.path().join("cpmsync.toml"), "prefix = \n").unwrap();
    let output = cpmsync(dir.path()).args(["sync", "--offline"]).output().unwrap();
    assert_eq!(output.status.code(), Some(1));
    assert!(stderr(&output).contains("failed to parse config"));
}

#[test]
fn report_flags_missing_versions() {
    let dir = workspace();
    let output = cpmsync(dir.path())
        .args(["--json", "report", "--prefix", "Acme."])
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(4));

    let json = stdout_json(&output);
    assert_eq!(json["prefix"], "Acme.");
    let refs = json["projects"][0]["references"].as_array().unwrap();
    assert_eq!(refs.len(), 2);
    let gadgets = refs.iter().find(|r| r["id"] == "Acme.Gadgets").unwrap();
    assert_eq!(gadgets["version"], serde_json::Value::Null);
}

#[test]
fn report_after_sync_is_clean_and_written_to_file() {
    let dir = workspace();
    let server = FixtureServer::start();
    server.publish("Acme.Widgets", &["1.0.0", "1.2.0"]);
    server.publish("Acme.Gadgets", &["1.4.0"]);
    let sync = cpmsync(dir.path())
        .args(["sync", "--prefix", "Acme.", "--registry-url"])
        .arg(&server.url)
        .output()
        .unwrap();
    assert_eq!(sync.status.code(), Some(0), "stderr: {}", stderr(&sync));

    let output = cpmsync(dir.path())
        .args(["report", "--prefix", "Acme.", "--out", "reports/coverage.txt"])
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(0));
    let written = fs::read_to_string(dir.path().join("reports/coverage.txt")).unwrap();
    assert!(written.contains("all referenced packages have central versions"));
    assert!(String::from_utf8_lossy(&output.stdout).contains("Acme.Gadgets"));
}

#[test]
fn completions_bash_mentions_binary() {
    let dir = tempfile::tempdir().unwrap();
    let output = cpmsync(dir.path())
        .args(["completions", "bash"])
        .output()
        .unwrap();
    assert!(output.status.success());
    assert!(String::from_utf8_lossy(&output.stdout).contains("cpmsync"));
}

#[test]
fn man_pages_written_per_subcommand() {
    let dir = tempfile::tempdir().unwrap();
    let output = cpmsync(dir.path())
        .args(["man-pages", "man"])
        .output()
        .unwrap();
    assert!(output.status.success());
    assert!(dir.path().join("man/cpmsync.1").exists());
    assert!(dir.path().join("man/cpmsync-sync.1").exists());
    assert!(dir.path().join("man/cpmsync-report.1").exists());
}
