mod commands;

use clap::{Args, Parser, Subcommand, ValueEnum};
use clap_complete::Shell;
use commands::{EXIT_FAILURE, EXIT_MANIFEST_ERROR};
use cpmsync_core::Policy;
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(
    name = "cpmsync",
    version,
    about = "Reconcile central package versions across layered Directory.Packages.props files"
)]
struct Cli {
    /// Output results as structured JSON.
    #[arg(long, default_value_t = false, global = true)]
    json: bool,

    /// Enable verbose (debug) logging output.
    #[arg(short, long, default_value_t = false, global = true)]
    verbose: bool,

    /// Enable trace-level logging (more detailed than --verbose).
    #[arg(long, default_value_t = false, global = true)]
    trace: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Where to find projects and manifests. Flags override the config file.
#[derive(Debug, Args)]
struct ManifestArgs {
    /// Config file (default: cpmsync.toml in the working directory, if present).
    #[arg(long)]
    config: Option<PathBuf>,
    /// Identifier prefix of internally owned packages.
    #[arg(long)]
    prefix: Option<String>,
    /// Directory scanned for client projects.
    #[arg(long)]
    root: Option<PathBuf>,
    /// Overlay manifest to reconcile.
    #[arg(long)]
    overlay: Option<PathBuf>,
    /// Parent manifest imported by the overlay.
    #[arg(long)]
    parent: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum PolicyArg {
    /// Keep existing pins; only insert or update what is needed.
    Incremental,
    /// Drop managed pins and re-emit one per referenced package.
    CleanSlate,
}

impl From<PolicyArg> for Policy {
    fn from(arg: PolicyArg) -> Self {
        match arg {
            PolicyArg::Incremental => Policy::Incremental,
            PolicyArg::CleanSlate => Policy::CleanSlate,
        }
    }
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Resolve versions for referenced packages and update the overlay manifest.
    Sync {
        #[command(flatten)]
        manifest: ManifestArgs,
        /// Comma-separated package ids forced to the prerelease version.
        #[arg(long)]
        ids: Option<String>,
        /// Prerelease version assigned to the changed ids.
        #[arg(long = "version", value_name = "PRERELEASE")]
        prerelease: Option<String>,
        /// Reconciliation policy.
        #[arg(long, value_enum)]
        policy: Option<PolicyArg>,
        /// Fall back to the latest pre-release when no stable version exists.
        #[arg(long, default_value_t = false)]
        prerelease_fallback: bool,
        /// Reuse parent pin versions before asking the registry.
        #[arg(long, default_value_t = false)]
        parent_versions: bool,
        /// VERSION file whose stable base pins unchanged packages.
        #[arg(long)]
        stable_base_file: Option<PathBuf>,
        /// Flat-container registry base URL.
        #[arg(long)]
        registry_url: Option<String>,
        /// Registry request timeout in seconds.
        #[arg(long, value_name = "SECS")]
        timeout: Option<u64>,
        /// Never contact the registry.
        #[arg(long, default_value_t = false)]
        offline: bool,
        /// Report what would change without writing the overlay.
        #[arg(long, default_value_t = false)]
        dry_run: bool,
    },
    /// Report referenced packages that lack a central version.
    Report {
        #[command(flatten)]
        manifest: ManifestArgs,
        /// Also write the report to this file.
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Generate shell completions for bash, zsh, fish, elvish, or powershell.
    Completions {
        /// Shell to generate completions for.
        shell: Shell,
    },
    /// Generate man pages in the specified directory.
    ManPages {
        /// Output directory for man pages.
        #[arg(default_value = "man")]
        dir: PathBuf,
    },
}

fn main() -> ExitCode {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        let msg = info.to_string();
        if msg.contains("Broken pipe")
            || msg.contains("broken pipe")
            || msg.contains("os error 32")
            || msg.contains("failed printing to stdout")
        {
            std::process::exit(0);
        }
        default_hook(info);
    }));

    let cli = Cli::parse();

    let default_level = if cli.trace {
        "trace"
    } else if cli.verbose {
        "debug"
    } else {
        "warn"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_env("CPMSYNC_LOG")
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .without_time()
        .init();

    let json_output = cli.json;

    let result = match cli.command {
        Commands::Sync {
            manifest,
            ids,
            prerelease,
            policy,
            prerelease_fallback,
            parent_versions,
            stable_base_file,
            registry_url,
            timeout,
            offline,
            dry_run,
        } => commands::sync::run(
            &manifest,
            &commands::sync::SyncOptions {
                ids,
                prerelease,
                policy: policy.map(Policy::from),
                prerelease_fallback,
                parent_versions,
                stable_base_file,
                registry_url,
                timeout,
                offline,
                dry_run,
            },
            json_output,
        ),
        Commands::Report { manifest, out } => {
            commands::report::run(&manifest, out.as_deref(), json_output)
        }
        Commands::Completions { shell } => commands::completions::run::<Cli>(shell),
        Commands::ManPages { dir } => commands::man_pages::run::<Cli>(&dir),
    };

    match result {
        Ok(code) => ExitCode::from(code),
        Err(msg) => {
            eprintln!("error: {msg}");
            let code = if msg.starts_with("manifest error:") {
                EXIT_MANIFEST_ERROR
            } else {
                EXIT_FAILURE
            };
            ExitCode::from(code)
        }
    }
}
