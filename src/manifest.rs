use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::provider::ProviderTag;

/// One mirrored repository: a single origin and the replicas it fans out to.
#[derive(Debug, Clone, Deserialize)]
pub struct ManifestEntry {
    /// Free-form note about the repository; carried for the operator, never
    /// interpreted.
    #[serde(default)]
    pub description: String,

    /// Leave this entry untouched in both subcommands.
    #[serde(default)]
    pub skip: bool,

    /// URL of the authoritative repository. Cloned and fetched from, never
    /// pushed to.
    pub origin: String,

    /// Replica remotes keyed by the provider hosting them.
    pub replicas: BTreeMap<ProviderTag, String>,
}

/// Errors raised while loading the manifest. Every one of them aborts the
/// run before any repository is touched.
#[derive(Debug, Error)]
pub enum ManifestError {
    /// The manifest file could not be read.
    #[error("cannot read manifest [{path}]: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The manifest file is not valid JSON or does not match the schema
    /// (wrong field types, unknown provider tags).
    #[error("cannot parse manifest [{path}]: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// The manifest parsed but an entry is unusable.
    #[error("repo [{name}]: {reason}")]
    Invalid { name: String, reason: String },
}

impl ManifestError {
    fn invalid(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Invalid {
            name: name.into(),
            reason: reason.into(),
        }
    }
}

/// The full mirror set: repository name → entry.
///
/// Backed by a `BTreeMap`, so entries always iterate in name order and each
/// entry's replicas iterate in provider-tag order. Runs over the same
/// manifest produce the same operation order and the same logs.
#[derive(Debug, Clone, Deserialize)]
#[serde(transparent)]
pub struct Manifest {
    entries: BTreeMap<String, ManifestEntry>,
}

impl Manifest {
    /// Load and validate a manifest file.
    pub fn load(path: &Path) -> Result<Self, ManifestError> {
        let content = std::fs::read_to_string(path).map_err(|source| ManifestError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        let manifest: Manifest =
            serde_json::from_str(&content).map_err(|source| ManifestError::Parse {
                path: path.to_path_buf(),
                source,
            })?;

        manifest.validate()?;

        Ok(manifest)
    }

    /// Entries in repository-name order.
    pub fn entries(&self) -> impl Iterator<Item = (&str, &ManifestEntry)> {
        self.entries.iter().map(|(name, entry)| (name.as_str(), entry))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn validate(&self) -> Result<(), ManifestError> {
        for (name, entry) in &self.entries {
            if name.trim().is_empty() {
                return Err(ManifestError::invalid(name, "repository name is empty"));
            }
            if entry.origin.trim().is_empty() {
                return Err(ManifestError::invalid(name, "origin URL is empty"));
            }
            for (tag, url) in &entry.replicas {
                if url.trim().is_empty() {
                    return Err(ManifestError::invalid(
                        name,
                        format!("replica [{tag}] URL is empty"),
                    ));
                }
            }
        }
        Ok(())
    }
}
