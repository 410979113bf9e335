//! Integrity checker - compares the head commit of every replica with
//! its origin, without mutating anything anywhere.

use crate::git::GitClient;
use crate::manifest::{Manifest, ManifestEntry};
use crate::provider::ProviderTag;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

/// How a replica's head compares to the origin's.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IntegrityStatus {
    Match,
    /// Heads differ. `None` stands for a reachable repository without
    /// any commits.
    Mismatch {
        origin: Option<String>,
        replica: Option<String>,
    },
    /// The replica answered neither for `HEAD` nor for `main`.
    Unreachable,
}

#[derive(Debug)]
pub struct ReplicaCheck {
    pub tag: ProviderTag,
    pub url: String,
    pub status: IntegrityStatus,
}

/// Terminal state of one manifest entry during an integrity pass.
#[derive(Debug)]
pub enum CheckOutcome {
    Skipped,
    /// Without the origin's head there is nothing to compare against.
    OriginUnreachable { reason: String },
    Checked {
        origin_head: Option<String>,
        replicas: Vec<ReplicaCheck>,
    },
}

#[derive(Debug)]
pub struct CheckReport {
    pub name: String,
    pub outcome: CheckOutcome,
}

impl CheckReport {
    /// True when this entry raises no finding.
    pub fn clean(&self) -> bool {
        match &self.outcome {
            CheckOutcome::Skipped => true,
            CheckOutcome::OriginUnreachable { .. } => false,
            CheckOutcome::Checked { replicas, .. } => replicas
                .iter()
                .all(|replica| replica.status == IntegrityStatus::Match),
        }
    }
}

/// Results from a complete integrity pass.
#[derive(Debug)]
pub struct IntegritySummary {
    pub total_entries: usize,
    pub consistent: usize,
    pub inconsistent: usize,
    pub skipped: usize,
    pub duration: Duration,
    pub reports: Vec<CheckReport>,
}

impl IntegritySummary {
    fn from_reports(reports: Vec<CheckReport>, duration: Duration) -> Self {
        let total_entries = reports.len();
        let mut consistent = 0;
        let mut inconsistent = 0;
        let mut skipped = 0;

        for report in &reports {
            match &report.outcome {
                CheckOutcome::Skipped => skipped += 1,
                _ if report.clean() => consistent += 1,
                _ => inconsistent += 1,
            }
        }

        Self {
            total_entries,
            consistent,
            inconsistent,
            skipped,
            duration,
            reports,
        }
    }

    /// Individual findings across all entries, for the closing log line.
    pub fn error_count(&self) -> usize {
        self.reports
            .iter()
            .map(|report| match &report.outcome {
                CheckOutcome::Skipped => 0,
                CheckOutcome::OriginUnreachable { .. } => 1,
                CheckOutcome::Checked { replicas, .. } => replicas
                    .iter()
                    .filter(|replica| replica.status != IntegrityStatus::Match)
                    .count(),
            })
            .sum()
    }
}

/// Walks manifest entries in order and compares replica heads against
/// the origin's.
pub struct IntegrityChecker {
    git: GitClient,
}

impl IntegrityChecker {
    pub fn new(git: GitClient) -> Self {
        Self { git }
    }

    /// Run a complete integrity pass over `manifest`, one entry at a
    /// time.
    pub async fn run(&self, manifest: &Manifest) -> IntegritySummary {
        let started = Instant::now();

        info!("Checking {} repositories from the manifest", manifest.len());

        let mut reports = Vec::new();
        for (name, entry) in manifest.entries() {
            reports.push(self.check_entry(name, entry).await);
        }

        let summary = IntegritySummary::from_reports(reports, started.elapsed());

        info!(
            "Integrity check finished in {:.1}s: {} consistent, {} inconsistent, {} skipped",
            summary.duration.as_secs_f64(),
            summary.consistent,
            summary.inconsistent,
            summary.skipped
        );

        summary
    }

    async fn check_entry(&self, name: &str, entry: &ManifestEntry) -> CheckReport {
        if entry.skip {
            info!("[{name}] skipped by manifest");
            return CheckReport {
                name: name.to_string(),
                outcome: CheckOutcome::Skipped,
            };
        }

        info!("[{name}] comparing replicas against [{}]", entry.origin);

        let origin_head = match self.git.ls_remote_head(&entry.origin, "HEAD").await {
            Ok(head) => head,
            Err(err) => {
                error!("[{name}] origin unreachable: {err:#}");
                return CheckReport {
                    name: name.to_string(),
                    outcome: CheckOutcome::OriginUnreachable {
                        reason: format!("{err:#}"),
                    },
                };
            }
        };

        let mut replicas = Vec::new();
        for (tag, url) in &entry.replicas {
            let status = self.check_replica(&origin_head, url).await;
            match &status {
                IntegrityStatus::Match => info!("[{name}] replica [{tag}] matches"),
                IntegrityStatus::Mismatch { origin, replica } => warn!(
                    "[{name}] replica [{tag}] diverged: origin [{}], replica [{}]",
                    display_head(origin),
                    display_head(replica)
                ),
                IntegrityStatus::Unreachable => warn!("[{name}] replica [{tag}] is unreachable"),
            }
            replicas.push(ReplicaCheck {
                tag: *tag,
                url: url.clone(),
                status,
            });
        }

        CheckReport {
            name: name.to_string(),
            outcome: CheckOutcome::Checked {
                origin_head,
                replicas,
            },
        }
    }

    /// A replica that does not answer for `HEAD` gets a second chance
    /// with its `main` branch; some hosts leave `HEAD` unset until a
    /// default branch is picked.
    async fn check_replica(&self, origin_head: &Option<String>, url: &str) -> IntegrityStatus {
        let replica_head = match self.git.ls_remote_head(url, "HEAD").await {
            Ok(Some(head)) => Some(head),
            Ok(None) | Err(_) => match self.git.ls_remote_head(url, "main").await {
                Ok(head) => head,
                Err(_) => return IntegrityStatus::Unreachable,
            },
        };

        if *origin_head == replica_head {
            IntegrityStatus::Match
        } else {
            IntegrityStatus::Mismatch {
                origin: origin_head.clone(),
                replica: replica_head,
            }
        }
    }
}

fn display_head(head: &Option<String>) -> &str {
    head.as_deref().unwrap_or("<empty>")
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use std::path::Path;
    use tempfile::TempDir;

    fn manifest_from(value: serde_json::Value) -> Manifest {
        serde_json::from_value(value).expect("Failed to build manifest")
    }

    fn git_in(dir: &Path, args: &[&str]) {
        let status = std::process::Command::new("git")
            .arg("-C")
            .arg(dir)
            .args(args)
            .status()
            .expect("Failed to run git");
        assert!(status.success(), "git {args:?} failed in {dir:?}");
    }

    fn init_repo_with_commit(repo: &Path) {
        std::fs::create_dir_all(repo).expect("Failed to create repo dir");
        git_in(repo, &["init", "--quiet"]);
        git_in(repo, &["symbolic-ref", "HEAD", "refs/heads/main"]);
        commit(repo, "initial");
    }

    fn commit(repo: &Path, message: &str) {
        git_in(
            repo,
            &[
                "-c",
                "user.name=integrity-test",
                "-c",
                "user.email=integrity-test@example.invalid",
                "commit",
                "--allow-empty",
                "--quiet",
                "-m",
                message,
            ],
        );
    }

    fn clone_bare(origin: &Path, target: &Path) {
        let status = std::process::Command::new("git")
            .args(["clone", "--quiet", "--bare"])
            .arg(origin)
            .arg(target)
            .status()
            .expect("Failed to run git clone");
        assert!(status.success());
    }

    fn single_entry_manifest(origin: &Path, replica: &Path) -> Manifest {
        manifest_from(serde_json::json!({
            "checked": {
                "origin": origin.to_string_lossy(),
                "replicas": { "gitlab": replica.to_string_lossy() }
            }
        }))
    }

    #[tokio::test]
    async fn test_matching_replica() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let origin = temp_dir.path().join("origin");
        let replica = temp_dir.path().join("replica.git");
        init_repo_with_commit(&origin);
        clone_bare(&origin, &replica);

        let checker = IntegrityChecker::new(GitClient::new(false));
        let summary = checker.run(&single_entry_manifest(&origin, &replica)).await;

        assert_eq!(summary.consistent, 1);
        assert_eq!(summary.inconsistent, 0);
        assert_eq!(summary.error_count(), 0);
        let CheckOutcome::Checked { replicas, .. } = &summary.reports[0].outcome else {
            panic!("expected a checked entry");
        };
        assert_eq!(replicas[0].status, IntegrityStatus::Match);
    }

    #[tokio::test]
    async fn test_diverged_replica() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let origin = temp_dir.path().join("origin");
        let replica = temp_dir.path().join("replica.git");
        init_repo_with_commit(&origin);
        clone_bare(&origin, &replica);
        // The origin moves on, the replica stays behind
        commit(&origin, "newer");

        let checker = IntegrityChecker::new(GitClient::new(false));
        let summary = checker.run(&single_entry_manifest(&origin, &replica)).await;

        assert_eq!(summary.inconsistent, 1);
        assert_eq!(summary.error_count(), 1);
        let CheckOutcome::Checked { replicas, .. } = &summary.reports[0].outcome else {
            panic!("expected a checked entry");
        };
        match &replicas[0].status {
            IntegrityStatus::Mismatch { origin, replica } => {
                assert!(origin.is_some());
                assert!(replica.is_some());
                assert_ne!(origin, replica);
            }
            other => panic!("expected a mismatch, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_unreachable_replica() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let origin = temp_dir.path().join("origin");
        init_repo_with_commit(&origin);
        let missing = temp_dir.path().join("missing.git");

        let checker = IntegrityChecker::new(GitClient::new(false));
        let summary = checker.run(&single_entry_manifest(&origin, &missing)).await;

        assert_eq!(summary.inconsistent, 1);
        let CheckOutcome::Checked { replicas, .. } = &summary.reports[0].outcome else {
            panic!("expected a checked entry");
        };
        assert_eq!(replicas[0].status, IntegrityStatus::Unreachable);
    }

    #[tokio::test]
    async fn test_replica_without_head_falls_back_to_main() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let origin = temp_dir.path().join("origin");
        let replica = temp_dir.path().join("replica.git");
        init_repo_with_commit(&origin);
        clone_bare(&origin, &replica);
        // Point HEAD at a branch that does not exist so `ls-remote HEAD`
        // comes back empty while `main` still resolves
        git_in(&replica, &["symbolic-ref", "HEAD", "refs/heads/ghost"]);

        let checker = IntegrityChecker::new(GitClient::new(false));
        let summary = checker.run(&single_entry_manifest(&origin, &replica)).await;

        assert_eq!(summary.consistent, 1);
        let CheckOutcome::Checked { replicas, .. } = &summary.reports[0].outcome else {
            panic!("expected a checked entry");
        };
        assert_eq!(replicas[0].status, IntegrityStatus::Match);
    }

    #[tokio::test]
    async fn test_empty_origin_and_empty_replica_match() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let origin = temp_dir.path().join("origin");
        std::fs::create_dir_all(&origin).expect("Failed to create origin dir");
        git_in(&origin, &["init", "--quiet"]);
        let replica = temp_dir.path().join("replica.git");
        std::fs::create_dir_all(&replica).expect("Failed to create replica dir");
        git_in(&replica, &["init", "--quiet", "--bare"]);

        let checker = IntegrityChecker::new(GitClient::new(false));
        let summary = checker.run(&single_entry_manifest(&origin, &replica)).await;

        // Reachable but commitless on both sides counts as matching
        assert_eq!(summary.consistent, 1);
        assert_eq!(summary.error_count(), 0);
        let CheckOutcome::Checked {
            origin_head,
            replicas,
        } = &summary.reports[0].outcome
        else {
            panic!("expected a checked entry");
        };
        assert_eq!(*origin_head, None);
        assert_eq!(replicas[0].status, IntegrityStatus::Match);
    }

    #[tokio::test]
    async fn test_unreachable_origin() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let missing_origin = temp_dir.path().join("missing-origin");
        let replica = temp_dir.path().join("replica.git");

        let checker = IntegrityChecker::new(GitClient::new(false));
        let summary = checker
            .run(&single_entry_manifest(&missing_origin, &replica))
            .await;

        assert_eq!(summary.inconsistent, 1);
        assert_eq!(summary.error_count(), 1);
        assert_matches!(
            summary.reports[0].outcome,
            CheckOutcome::OriginUnreachable { .. }
        );
    }

    #[tokio::test]
    async fn test_skipped_entries_are_not_queried() {
        let manifest = manifest_from(serde_json::json!({
            "parked": {
                "skip": true,
                "origin": "/nonexistent/origin",
                "replicas": { "github": "/nonexistent/replica" }
            }
        }));

        let checker = IntegrityChecker::new(GitClient::new(false));
        let summary = checker.run(&manifest).await;

        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.inconsistent, 0);
        assert_eq!(summary.error_count(), 0);
    }
}
