//! git-mirror - manifest-driven git repository mirroring
//!
//! git-mirror keeps copies of git repositories on several hosting
//! providers in sync with a single origin, driven by one small JSON
//! manifest.
//!
//! ## Core Features
//!
//! - **Manifest driven**: one JSON file declares every repository, its
//!   origin and its replicas
//! - **Provider adapters**: GitHub, GitLab and AWS CodeCommit backends
//!   with existence checks and on-demand repository creation
//! - **Mirror pushes**: local `--mirror` clones pushed verbatim, so
//!   replicas carry the complete ref set
//! - **Integrity checking**: read-only comparison of origin and replica
//!   heads
//!
//! ## Modules
//!
//! - [`manifest`]: manifest parsing and validation
//! - [`provider`]: hosting provider adapters
//! - [`mirror`]: the mirror engine
//! - [`integrity`]: the read-only integrity checker

pub mod git;
pub mod integrity;
pub mod manifest;
pub mod mirror;
pub mod provider;

pub use git::GitClient;
pub use integrity::{IntegrityChecker, IntegritySummary};
pub use manifest::{Manifest, ManifestEntry, ManifestError};
pub use mirror::{MirrorEngine, RunSummary};
pub use provider::{Provider, ProviderError, ProviderSet, ProviderTag};
