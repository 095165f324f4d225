//! Lifecycle orchestration: install, remove, update, sync, clean.
//!
//! [`Ops`] is the explicit context threaded through every operation: the
//! configuration, catalog, database, HTTP client, in-flight build table, the
//! cancellation flag, and the instance lock. Tests construct isolated
//! instances against a temporary root.

pub mod build;
mod install;
mod remove;
mod update;

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;
use thiserror::Error;

use crate::config::Config;
use crate::core::catalog::{Catalog, CatalogError};
use crate::core::definition::DefinitionError;
use crate::core::resolver::ResolveError;
use crate::io::download::DownloadError;
use crate::io::verify::VerifyError;
use crate::store::db::{Database, DbError};
use crate::store::lock::{LockError, LockFile};

use self::build::{BuildError, BuildTracker};

/// Errors surfaced by the orchestrator.
#[derive(Error, Debug)]
pub enum OpError {
    #[error("package not found: {0}")]
    NotFound(String),

    #[error("invalid package definition: {0}")]
    Parse(String),

    #[error("network failure: {0}")]
    Network(String),

    #[error(transparent)]
    Integrity(VerifyError),

    #[error("build failed: {0}")]
    Build(BuildError),

    #[error("'{package}' conflicts with installed package '{conflict}'")]
    Conflict { package: String, conflict: String },

    #[error("circular dependency involving package '{0}'")]
    Cycle(String),

    #[error("cannot remove '{package}': required by {}", .dependents.join(", "))]
    Dependency {
        package: String,
        dependents: Vec<String>,
    },

    #[error("another kiln instance is running (lock held: {0})")]
    Locked(PathBuf),

    #[error("too many builds in flight")]
    Resource,

    #[error("{} of {} package updates failed", .0.failed, .0.updated + .0.failed)]
    UpdatesFailed(UpdateSummary),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("operation cancelled")]
    Cancelled,
}

impl From<DefinitionError> for OpError {
    fn from(e: DefinitionError) -> Self {
        match e {
            DefinitionError::NotFound(name) => OpError::NotFound(name),
            DefinitionError::Parse(message) => OpError::Parse(message),
            DefinitionError::Io(e) => OpError::Io(e),
        }
    }
}

impl From<ResolveError> for OpError {
    fn from(e: ResolveError) -> Self {
        match e {
            ResolveError::Cycle(name) => OpError::Cycle(name),
            ResolveError::Definition(e) => e.into(),
        }
    }
}

impl From<BuildError> for OpError {
    fn from(e: BuildError) -> Self {
        match e {
            BuildError::Download(e) => OpError::Network(e.to_string()),
            BuildError::Integrity(e) => OpError::Integrity(e),
            BuildError::Resource => OpError::Resource,
            other => OpError::Build(other),
        }
    }
}

impl From<CatalogError> for OpError {
    fn from(e: CatalogError) -> Self {
        match e {
            CatalogError::Network { .. } => OpError::Network(e.to_string()),
            CatalogError::MissingTool(name) => OpError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("required tool not found: {name}"),
            )),
            CatalogError::Io(e) => OpError::Io(e),
        }
    }
}

impl From<DbError> for OpError {
    fn from(e: DbError) -> Self {
        match e {
            DbError::Io(e) => OpError::Io(e),
        }
    }
}

impl From<LockError> for OpError {
    fn from(e: LockError) -> Self {
        match e {
            LockError::Held(path) => OpError::Locked(path),
            LockError::Io(e) => OpError::Io(e),
        }
    }
}

impl From<DownloadError> for OpError {
    fn from(e: DownloadError) -> Self {
        OpError::Network(e.to_string())
    }
}

/// Result of an `update_all` sweep.
#[derive(Debug, Default, Clone, Copy)]
pub struct UpdateSummary {
    pub updated: usize,
    pub failed: usize,
}

/// Orchestrator context. Holds the instance lock for its lifetime.
pub struct Ops {
    pub config: Config,
    pub catalog: Catalog,
    pub db: Database,
    client: Client,
    tracker: BuildTracker,
    cancel: Arc<AtomicBool>,
    _lock: LockFile,
}

impl Ops {
    /// Acquire the instance lock and open the package database.
    pub fn new(config: Config, cancel: Arc<AtomicBool>) -> Result<Self, OpError> {
        let lock = LockFile::acquire(&config.lock_path())?;
        let db = Database::open(&config.db_path(), &config.files_dir())?;
        let catalog = Catalog::new(&config);
        let client = crate::io::download::client(Duration::from_secs(config.build_timeout))?;
        Ok(Self {
            config,
            catalog,
            db,
            client,
            tracker: BuildTracker::new(),
            cancel,
            _lock: lock,
        })
    }

    pub(crate) fn check_cancelled(&self) -> Result<(), OpError> {
        if self.cancel.load(Ordering::Relaxed) {
            Err(OpError::Cancelled)
        } else {
            Ok(())
        }
    }

    pub(crate) fn client(&self) -> &Client {
        &self.client
    }

    pub(crate) fn tracker(&self) -> &BuildTracker {
        &self.tracker
    }

    /// True while a build for `name` is in flight.
    pub fn is_running(&self, name: &str) -> bool {
        self.tracker.is_running(name)
    }

    /// Synchronize every enabled catalog repository.
    pub async fn sync(&mut self) -> Result<(), OpError> {
        self.catalog.sync().await.map_err(Into::into)
    }

    /// Remove cached source archives and build workspaces.
    pub fn clean(&self) -> Result<(), OpError> {
        for dir in [self.config.builds_dir(), self.config.sources_dir()] {
            if dir.exists() {
                std::fs::remove_dir_all(&dir)?;
            }
            std::fs::create_dir_all(&dir)?;
            tracing::info!(dir = %dir.display(), "cleaned");
        }
        Ok(())
    }
}
