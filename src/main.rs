use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing::{error, info, warn, Level};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use git_mirror::{GitClient, IntegrityChecker, Manifest, MirrorEngine, ProviderSet};

#[derive(Parser)]
#[command(name = "git-mirror")]
#[command(about = "Mirrors git repositories to replica hosting providers")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Manifest file listing the repositories to mirror
    #[arg(short, long, global = true, default_value = "./repos.json")]
    manifest: String,

    /// Log level for console and file output
    #[arg(short = 'v', long, global = true, default_value = "info")]
    log_level: String,

    /// Log file path (rotated daily)
    #[arg(short = 'l', long, global = true, default_value = ".logs/git-mirror.log")]
    log_file: String,

    /// Announce mutating operations instead of running them
    #[arg(long, global = true)]
    dry_run: bool,

    /// Run `git pull` in the manifest's directory before reading it
    #[arg(short = 'u', long, global = true)]
    update_manifest: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Mirror every manifest entry to its replicas
    Mirror {
        /// Directory holding the local mirror clones
        #[arg(short = 'd', long, default_value = ".repos")]
        repo_dir: String,
    },

    /// Compare replica heads against their origins, read-only
    Integrity,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let guard = init_logging(&cli.log_level, &cli.log_file)?;

    info!("Starting git-mirror v{}", env!("CARGO_PKG_VERSION"));
    if cli.dry_run {
        info!("Dry-run: mutating operations are announced, not executed");
    }

    let git = GitClient::new(cli.dry_run);

    let manifest_path = expand_path(&cli.manifest)?;
    if cli.update_manifest {
        refresh_manifest(&git, &manifest_path).await;
    }

    let manifest = Manifest::load(&manifest_path)
        .with_context(|| format!("Failed to load manifest [{}]", manifest_path.display()))?;

    let errors = match cli.command {
        Commands::Mirror { repo_dir } => cmd_mirror(git, &manifest, &repo_dir).await?,
        Commands::Integrity => cmd_integrity(git, &manifest).await,
    };

    if errors == 0 {
        info!("Finished with no errors");
    } else {
        let noun = if errors == 1 { "error" } else { "errors" };
        error!("Finished with {errors} {noun}");
    }

    // Flush buffered file output before a hard exit
    drop(guard);
    if errors > 0 {
        std::process::exit(1);
    }
    Ok(())
}

/// Wire tracing to the console and to a daily-rotated log file.
///
/// The returned guard flushes buffered file output when dropped, so it
/// has to stay alive for the whole run.
fn init_logging(level: &str, log_file: &str) -> Result<WorkerGuard> {
    let level = level.parse::<Level>().unwrap_or_else(|_| {
        eprintln!("Unknown log level [{level}], using info");
        Level::INFO
    });

    // RUST_LOG takes precedence, the flag supplies the default
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.to_string()));

    let path = expand_path(log_file)?;
    let directory = parent_or_cwd(&path);
    std::fs::create_dir_all(directory)
        .with_context(|| format!("Failed to create log directory [{}]", directory.display()))?;
    let filename = path
        .file_name()
        .map(|name| name.to_os_string())
        .unwrap_or_else(|| "git-mirror.log".into());

    let file_appender = tracing_appender::rolling::daily(directory, filename);
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .with(
            fmt::layer()
                .with_writer(file_writer)
                .with_ansi(false)
                .with_file(true)
                .with_line_number(true),
        )
        .init();

    Ok(guard)
}

/// Expand `~` and environment variables the way a shell would.
fn expand_path(raw: &str) -> Result<PathBuf> {
    let expanded =
        shellexpand::full(raw).with_context(|| format!("Failed to expand path [{raw}]"))?;
    Ok(PathBuf::from(expanded.as_ref()))
}

fn parent_or_cwd(path: &Path) -> &Path {
    path.parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."))
}

/// Best-effort `git pull` in the manifest's directory. A failing pull is
/// logged and the run proceeds with the manifest as it is on disk.
async fn refresh_manifest(git: &GitClient, manifest_path: &Path) {
    let dir = parent_or_cwd(manifest_path);
    if !dir.join(".git").exists() {
        warn!(
            "Manifest directory [{}] is not a git work tree, skipping pull",
            dir.display()
        );
        return;
    }

    info!("Refreshing manifest directory [{}]", dir.display());
    if let Err(err) = git.pull(dir).await {
        warn!("Manifest refresh failed: {err:#}");
    }
}

/// Mirror every manifest entry, returning the number of failures.
async fn cmd_mirror(git: GitClient, manifest: &Manifest, repo_dir: &str) -> Result<usize> {
    let repo_dir = expand_path(repo_dir)?;
    if !git.dry_run() {
        std::fs::create_dir_all(&repo_dir).with_context(|| {
            format!(
                "Failed to create repository directory [{}]",
                repo_dir.display()
            )
        })?;
    }

    let providers = ProviderSet::from_env()
        .await
        .context("Failed to initialize provider adapters")?;

    let engine = MirrorEngine::new(git, providers, repo_dir);
    let summary = engine.run(manifest).await;
    Ok(summary.error_count())
}

/// Check every manifest entry, returning the number of findings.
async fn cmd_integrity(git: GitClient, manifest: &Manifest) -> usize {
    let checker = IntegrityChecker::new(git);
    let summary = checker.run(manifest).await;
    summary.error_count()
}
