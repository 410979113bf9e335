use anyhow::{anyhow, Context, Result};
use regex::Regex;
use std::path::Path;
use std::process::Output;
use std::time::Instant;
use tokio::process::Command as AsyncCommand;
use tracing::{debug, info};

/// Runs the git operations mirroring needs.
///
/// Mutating commands (clone, fetch, push, pull) honor dry-run: the
/// intention is logged and the subprocess never starts. Read-only queries
/// (`ls-remote`) always run. Every subprocess gets `GIT_TERMINAL_PROMPT=0`
/// so an unattended run fails on missing credentials instead of waiting
/// for input.
pub struct GitClient {
    dry_run: bool,
}

impl GitClient {
    pub fn new(dry_run: bool) -> Self {
        Self { dry_run }
    }

    pub fn dry_run(&self) -> bool {
        self.dry_run
    }

    /// `git clone --mirror <origin>` into `path`.
    pub async fn clone_mirror(&self, origin: &str, path: &Path) -> Result<()> {
        if self.dry_run {
            info!("dry-run: would clone [{origin}] into [{}]", path.display());
            return Ok(());
        }

        info!("Cloning [{origin}] into [{}]", path.display());
        let started = Instant::now();

        let output = AsyncCommand::new("git")
            .args(["clone", "--mirror", origin])
            .arg(path)
            .env("GIT_TERMINAL_PROMPT", "0")
            .output()
            .await
            .context("Failed to execute git clone")?;

        if !output.status.success() {
            return Err(anyhow!("Git clone failed: {}", stderr_of(&output)));
        }

        info!(
            "Cloned [{origin}] in {:.1}s",
            started.elapsed().as_secs_f64()
        );
        Ok(())
    }

    /// `git fetch --prune origin` inside an existing mirror clone.
    pub async fn fetch_prune(&self, path: &Path) -> Result<()> {
        if self.dry_run {
            info!("dry-run: would fetch [{}]", path.display());
            return Ok(());
        }

        debug!("Fetching [{}]", path.display());
        let started = Instant::now();

        let output = AsyncCommand::new("git")
            .args(["fetch", "--prune", "origin"])
            .current_dir(path)
            .env("GIT_TERMINAL_PROMPT", "0")
            .output()
            .await
            .context("Failed to execute git fetch")?;

        if !output.status.success() {
            return Err(anyhow!("Git fetch failed: {}", stderr_of(&output)));
        }

        info!(
            "Fetched [{}] in {:.1}s",
            path.display(),
            started.elapsed().as_secs_f64()
        );
        Ok(())
    }

    /// `git push --mirror <url>` from the clone at `path`, making the
    /// replica's ref set exactly match the clone's.
    pub async fn push_mirror(&self, path: &Path, url: &str) -> Result<()> {
        if self.dry_run {
            info!("dry-run: would push [{}] to [{url}]", path.display());
            return Ok(());
        }

        debug!("Pushing [{}] to [{url}]", path.display());
        let started = Instant::now();

        let output = AsyncCommand::new("git")
            .args(["push", "--mirror", url])
            .current_dir(path)
            .env("GIT_TERMINAL_PROMPT", "0")
            .output()
            .await
            .context("Failed to execute git push")?;

        if !output.status.success() {
            return Err(anyhow!("Git push failed: {}", stderr_of(&output)));
        }

        info!(
            "Pushed [{}] to [{url}] in {:.1}s",
            path.display(),
            started.elapsed().as_secs_f64()
        );
        Ok(())
    }

    /// Resolve `reference` of the repository at `url` via `git ls-remote`.
    ///
    /// `Ok(Some(hash))` when the reference resolves, `Ok(None)` when the
    /// remote answers but the reference yields nothing (an empty
    /// repository), `Err` when the remote cannot be queried at all.
    pub async fn ls_remote_head(&self, url: &str, reference: &str) -> Result<Option<String>> {
        debug!("Querying [{reference}] of [{url}]");

        let output = AsyncCommand::new("git")
            .args(["ls-remote", url, reference])
            .env("GIT_TERMINAL_PROMPT", "0")
            .output()
            .await
            .context("Failed to execute git ls-remote")?;

        if !output.status.success() {
            return Err(anyhow!(
                "Git ls-remote failed for [{url}]: {}",
                stderr_of(&output)
            ));
        }

        Ok(parse_ls_remote_head(&String::from_utf8_lossy(
            &output.stdout,
        )))
    }

    /// `git pull` inside `path`. Used to refresh the work tree the
    /// manifest lives in.
    pub async fn pull(&self, path: &Path) -> Result<()> {
        if self.dry_run {
            info!("dry-run: would pull [{}]", path.display());
            return Ok(());
        }

        debug!("Pulling [{}]", path.display());

        let output = AsyncCommand::new("git")
            .args(["pull"])
            .current_dir(path)
            .env("GIT_TERMINAL_PROMPT", "0")
            .output()
            .await
            .context("Failed to execute git pull")?;

        if !output.status.success() {
            return Err(anyhow!("Git pull failed: {}", stderr_of(&output)));
        }

        Ok(())
    }
}

fn stderr_of(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).trim().to_string()
}

/// First commit hash in `git ls-remote` output, if any. Lines look like
/// `<40-hex-id>\t<refname>`.
fn parse_ls_remote_head(stdout: &str) -> Option<String> {
    let line = stdout.lines().next()?;
    let pattern = Regex::new(r"^[0-9a-f]{40}").ok()?;
    pattern.find(line).map(|found| found.as_str().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_parse_ls_remote_head() {
        let hash = "a94a8fe5ccb19ba61c4c0873d391e987982fbbd3";
        let stdout = format!("{hash}\tHEAD\n");
        assert_eq!(parse_ls_remote_head(&stdout), Some(hash.to_string()));
    }

    #[test]
    fn test_parse_ls_remote_head_takes_first_line() {
        let stdout = "a94a8fe5ccb19ba61c4c0873d391e987982fbbd3\tHEAD\n\
                      b5d1a3f5ccb19ba61c4c0873d391e987982fbbd3\trefs/heads/main\n";
        assert_eq!(
            parse_ls_remote_head(stdout),
            Some("a94a8fe5ccb19ba61c4c0873d391e987982fbbd3".to_string())
        );
    }

    #[test]
    fn test_parse_ls_remote_head_empty_output() {
        assert_eq!(parse_ls_remote_head(""), None);
        assert_eq!(parse_ls_remote_head("\n"), None);
    }

    #[test]
    fn test_parse_ls_remote_head_rejects_non_hashes() {
        assert_eq!(parse_ls_remote_head("warning: something\n"), None);
        // Too short to be an object id
        assert_eq!(parse_ls_remote_head("a94a8fe\tHEAD\n"), None);
        // Git prints object ids lowercase
        assert_eq!(
            parse_ls_remote_head("A94A8FE5CCB19BA61C4C0873D391E987982FBBD3\tHEAD\n"),
            None
        );
    }

    #[tokio::test]
    async fn test_dry_run_clone_leaves_no_trace() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let target = temp_dir.path().join("mirror.git");

        let git = GitClient::new(true);
        git.clone_mirror("https://example.invalid/repo.git", &target)
            .await
            .expect("dry-run clone should succeed");

        assert!(!target.exists());
    }

    #[tokio::test]
    async fn test_dry_run_push_and_fetch_do_nothing() {
        let git = GitClient::new(true);
        let missing = Path::new("/nonexistent/mirror.git");

        git.push_mirror(missing, "https://example.invalid/repo.git")
            .await
            .expect("dry-run push should succeed");
        git.fetch_prune(missing)
            .await
            .expect("dry-run fetch should succeed");
        git.pull(missing).await.expect("dry-run pull should succeed");
    }

    #[tokio::test]
    async fn test_ls_remote_head_of_empty_repository() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let repo = temp_dir.path().join("empty");
        let status = std::process::Command::new("git")
            .args(["init", "--quiet"])
            .arg(&repo)
            .status()
            .expect("Failed to run git init");
        assert!(status.success());

        let git = GitClient::new(false);
        let head = git
            .ls_remote_head(&repo.to_string_lossy(), "HEAD")
            .await
            .expect("ls-remote should reach the repository");

        // Reachable but without commits: an empty head, not an error
        assert_eq!(head, None);
    }

    #[tokio::test]
    async fn test_ls_remote_head_of_missing_repository_fails() {
        let git = GitClient::new(false);
        let result = git
            .ls_remote_head("/nonexistent/definitely-not-a-repo", "HEAD")
            .await;
        assert!(result.is_err());
    }
}
