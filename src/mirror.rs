//! Mirror engine - walks manifest entries in order and drives the local
//! mirror clone plus per-replica provisioning and pushes.
//!
//! Failures stay contained: a broken replica never stops the other
//! replicas of the same entry, and a broken entry never stops the
//! entries after it. Everything that happened is handed back in a
//! [`RunSummary`] for the caller to log and turn into an exit code.

use crate::git::GitClient;
use crate::manifest::{Manifest, ManifestEntry};
use crate::provider::{repo_name, ProviderError, ProviderSet, ProviderTag};
use anyhow::Result;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{error, info};

/// Why a single replica could not be brought up to date.
#[derive(Debug, Error)]
pub enum ReplicaFailure {
    #[error("no provider adapter registered for [{0}]")]
    UnsupportedProvider(ProviderTag),

    #[error(transparent)]
    Provider(#[from] ProviderError),

    /// The provider reports the freshly created repository absent under
    /// the requested name. CodeCommit provisions `hello.world` as
    /// `hello`, which would leave the push aimed at a repository that
    /// does not exist.
    #[error("provider created [{provisioned}] instead of [{requested}]")]
    NameTruncation {
        requested: String,
        provisioned: String,
    },

    #[error("{0}")]
    Push(String),
}

/// Terminal state of one replica within a mirror pass.
#[derive(Debug)]
pub enum ReplicaOutcome {
    /// Refs pushed. `created` records whether the repository had to be
    /// provisioned first.
    Pushed { created: bool },
    /// Dry-run: read-only checks ran, mutations were only announced.
    DryRun { would_create: bool },
    Failed(ReplicaFailure),
}

#[derive(Debug)]
pub struct ReplicaReport {
    pub tag: ProviderTag,
    pub url: String,
    pub outcome: ReplicaOutcome,
}

/// Terminal state of one manifest entry.
#[derive(Debug)]
pub enum EntryOutcome {
    /// The manifest flagged the entry `skip`.
    Skipped,
    /// The local mirror could not be cloned or refreshed, so no replica
    /// was attempted.
    CloneFailed { reason: String },
    Mirrored { replicas: Vec<ReplicaReport> },
}

#[derive(Debug)]
pub struct EntryReport {
    pub name: String,
    pub outcome: EntryOutcome,
}

impl EntryReport {
    /// True when nothing about this entry failed.
    pub fn succeeded(&self) -> bool {
        match &self.outcome {
            EntryOutcome::Skipped => true,
            EntryOutcome::CloneFailed { .. } => false,
            EntryOutcome::Mirrored { replicas } => replicas
                .iter()
                .all(|replica| !matches!(replica.outcome, ReplicaOutcome::Failed(_))),
        }
    }
}

/// Results from a complete mirror pass.
#[derive(Debug)]
pub struct RunSummary {
    pub total_entries: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    pub duration: Duration,
    pub reports: Vec<EntryReport>,
}

impl RunSummary {
    fn from_reports(reports: Vec<EntryReport>, duration: Duration) -> Self {
        let total_entries = reports.len();
        let mut succeeded = 0;
        let mut failed = 0;
        let mut skipped = 0;

        for report in &reports {
            match &report.outcome {
                EntryOutcome::Skipped => skipped += 1,
                _ if report.succeeded() => succeeded += 1,
                _ => failed += 1,
            }
        }

        Self {
            total_entries,
            succeeded,
            failed,
            skipped,
            duration,
            reports,
        }
    }

    /// Individual failures across all entries, for the closing log line.
    pub fn error_count(&self) -> usize {
        self.reports
            .iter()
            .map(|report| match &report.outcome {
                EntryOutcome::Skipped => 0,
                EntryOutcome::CloneFailed { .. } => 1,
                EntryOutcome::Mirrored { replicas } => replicas
                    .iter()
                    .filter(|replica| matches!(replica.outcome, ReplicaOutcome::Failed(_)))
                    .count(),
            })
            .sum()
    }
}

/// The engine that mirrors every manifest entry to its replicas.
pub struct MirrorEngine {
    git: GitClient,
    providers: ProviderSet,
    repo_dir: PathBuf,
}

impl MirrorEngine {
    pub fn new(git: GitClient, providers: ProviderSet, repo_dir: impl Into<PathBuf>) -> Self {
        Self {
            git,
            providers,
            repo_dir: repo_dir.into(),
        }
    }

    /// Run a complete mirror pass over `manifest`, one entry at a time.
    pub async fn run(&self, manifest: &Manifest) -> RunSummary {
        let started = Instant::now();

        info!("Mirroring {} repositories from the manifest", manifest.len());

        let mut reports = Vec::new();
        for (name, entry) in manifest.entries() {
            reports.push(self.mirror_entry(name, entry).await);
        }

        let summary = RunSummary::from_reports(reports, started.elapsed());

        info!(
            "Mirror pass finished in {:.1}s: {} succeeded, {} failed, {} skipped",
            summary.duration.as_secs_f64(),
            summary.succeeded,
            summary.failed,
            summary.skipped
        );

        summary
    }

    async fn mirror_entry(&self, name: &str, entry: &ManifestEntry) -> EntryReport {
        if entry.skip {
            info!("[{name}] skipped by manifest");
            return EntryReport {
                name: name.to_string(),
                outcome: EntryOutcome::Skipped,
            };
        }

        info!("[{name}] mirroring from [{}]", entry.origin);

        let path = self.repo_dir.join(name);
        if let Err(error) = self.refresh_local_mirror(entry, &path).await {
            error!("[{name}] local mirror failed: {error:#}");
            return EntryReport {
                name: name.to_string(),
                outcome: EntryOutcome::CloneFailed {
                    reason: format!("{error:#}"),
                },
            };
        }

        let mut replicas = Vec::new();
        for (tag, url) in &entry.replicas {
            let outcome = self.mirror_replica(name, &path, *tag, url).await;
            if let ReplicaOutcome::Failed(failure) = &outcome {
                error!("[{name}] replica [{tag}] failed: {failure}");
            }
            replicas.push(ReplicaReport {
                tag: *tag,
                url: url.clone(),
                outcome,
            });
        }

        EntryReport {
            name: name.to_string(),
            outcome: EntryOutcome::Mirrored { replicas },
        }
    }

    /// Clone the origin when no local mirror exists yet, refresh it
    /// otherwise. A fresh clone is already current, so it skips the
    /// fetch.
    async fn refresh_local_mirror(&self, entry: &ManifestEntry, path: &Path) -> Result<()> {
        if path.exists() {
            self.git.fetch_prune(path).await
        } else {
            self.git.clone_mirror(&entry.origin, path).await
        }
    }

    async fn mirror_replica(
        &self,
        name: &str,
        path: &Path,
        tag: ProviderTag,
        url: &str,
    ) -> ReplicaOutcome {
        let Some(provider) = self.providers.get(tag) else {
            return ReplicaOutcome::Failed(ReplicaFailure::UnsupportedProvider(tag));
        };

        let exists = match provider.exists(url).await {
            Ok(exists) => exists,
            Err(error) => return ReplicaOutcome::Failed(error.into()),
        };

        if !exists && self.git.dry_run() {
            info!("[{name}] dry-run: would create [{url}] on [{tag}]");
            info!("[{name}] dry-run: would push to [{url}]");
            return ReplicaOutcome::DryRun { would_create: true };
        }

        let mut created = false;
        if !exists {
            info!("[{name}] creating [{url}] on [{tag}]");
            let created_url = match provider.create(url).await {
                Ok(created_url) => created_url,
                Err(error) => return ReplicaOutcome::Failed(error.into()),
            };

            // The provider may have provisioned under a different name
            // than requested. Ask again for the requested one before
            // trusting it with a push.
            match provider.exists(url).await {
                Ok(true) => {}
                Ok(false) => {
                    return ReplicaOutcome::Failed(ReplicaFailure::NameTruncation {
                        requested: repo_name(url),
                        provisioned: repo_name(&created_url),
                    });
                }
                Err(error) => return ReplicaOutcome::Failed(error.into()),
            }
            created = true;
        }

        if self.git.dry_run() {
            info!("[{name}] dry-run: would push to [{url}]");
            return ReplicaOutcome::DryRun {
                would_create: false,
            };
        }

        match self.git.push_mirror(path, url).await {
            Ok(()) => ReplicaOutcome::Pushed { created },
            Err(error) => ReplicaOutcome::Failed(ReplicaFailure::Push(format!("{error:#}"))),
        }
    }
}
