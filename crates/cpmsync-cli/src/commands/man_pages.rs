use super::EXIT_SUCCESS;
use clap::CommandFactory;
use std::path::Path;

/// Render `cpmsync.1` plus one `cpmsync-<sub>.1` page per subcommand into `dir`.
pub fn run<C: CommandFactory>(dir: &Path) -> Result<u8, String> {
    std::fs::create_dir_all(dir)
        .map_err(|e| format!("failed to create {}: {e}", dir.display()))?;
    let cmd = C::command();
    write_page(dir, "cpmsync", cmd.clone())?;
    for sub in cmd.get_subcommands() {
        let name = format!("cpmsync-{}", sub.get_name());
        write_page(dir, &name, sub.clone())?;
    }
    println!("man pages written to {}", dir.display());
    Ok(EXIT_SUCCESS)
}

fn write_page(dir: &Path, name: &str, cmd: clap::Command) -> Result<(), String> {
    let mut buf = Vec::new();
    clap_mangen::Man::new(cmd)
        .render(&mut buf)
        .map_err(|e| format!("man page render failed for {name}: {e}"))?;
    let path = dir.join(format!("{name}.1"));
    std::fs::write(&path, &buf).map_err(|e| format!("failed to write {}: {e}", path.display()))
}
