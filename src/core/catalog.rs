//! Catalog store: local mirrors of the package catalog.
//!
//! Each configured repository is a git checkout holding one TOML entry per
//! package. Sync clones or fast-forwards every enabled repository through the
//! git CLI; lookups search repositories in descending priority order.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::Config;
use crate::core::definition::{self, PackageDefinition};
use crate::io::exec::{self, ExecError};

#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("repository '{repo}' sync failed: {message}")]
    Network { repo: String, message: String },

    #[error("required tool not found: {0}")]
    MissingTool(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// One configured repository plus its sync state.
#[derive(Debug, Clone)]
pub struct Repository {
    pub name: String,
    pub url: String,
    pub branch: String,
    pub local_path: PathBuf,
    pub priority: i32,
    pub enabled: bool,
    /// Seconds since epoch of the last successful sync; 0 means never.
    pub last_sync: u64,
    /// Catalog revision at the last successful sync.
    pub last_commit: String,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct SyncState {
    #[serde(default)]
    repos: HashMap<String, RepoState>,
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
struct RepoState {
    last_sync: u64,
    last_commit: String,
}

/// A search hit from the catalog.
#[derive(Debug, Clone)]
pub struct SearchHit {
    pub name: String,
    pub version: String,
    pub description: String,
    pub repository: String,
}

pub struct Catalog {
    repos: Vec<Repository>,
    state_path: PathBuf,
    sync_interval: u64,
    timeout: Duration,
}

impl Catalog {
    /// Build the catalog from the configuration, merging persisted sync state.
    pub fn new(config: &Config) -> Self {
        let state = load_state(&config.sync_state_path());
        let repo_dir = config.repo_dir();

        let mut repos: Vec<Repository> = config
            .repositories
            .iter()
            .map(|rc| {
                let persisted = state.repos.get(&rc.name).cloned().unwrap_or_default();
                Repository {
                    name: rc.name.clone(),
                    url: rc.url.clone(),
                    branch: rc.branch.clone(),
                    local_path: repo_dir.join(&rc.name),
                    priority: rc.priority,
                    enabled: rc.enabled,
                    last_sync: persisted.last_sync,
                    last_commit: persisted.last_commit,
                }
            })
            .collect();
        // Descending priority; name as the deterministic tie-breaker.
        repos.sort_by(|a, b| b.priority.cmp(&a.priority).then(a.name.cmp(&b.name)));

        Self {
            repos,
            state_path: config.sync_state_path(),
            sync_interval: config.sync_interval,
            timeout: Duration::from_secs(config.build_timeout),
        }
    }

    pub fn repositories(&self) -> &[Repository] {
        &self.repos
    }

    /// True when the repository is due for a sync.
    pub fn needs_sync(&self, repo: &Repository) -> bool {
        repo.last_sync == 0 || now().saturating_sub(repo.last_sync) > self.sync_interval
    }

    /// Sync every enabled repository. One failure does not stop the others,
    /// but the aggregate result is an error unless all succeeded.
    pub async fn sync(&mut self) -> Result<(), CatalogError> {
        exec::require_tool("git").map_err(|e| match e {
            ExecError::MissingTool(name) => CatalogError::MissingTool(name),
            other => CatalogError::Io(std::io::Error::other(other.to_string())),
        })?;

        let mut first_failure = None;
        for repo in &mut self.repos {
            if !repo.enabled {
                continue;
            }
            tracing::info!(repo = %repo.name, "syncing repository");
            match sync_repo(repo, self.timeout).await {
                Ok(()) => {
                    repo.last_sync = now();
                    repo.last_commit = commit_hash(&repo.local_path, self.timeout)
                        .await
                        .unwrap_or_default();
                    tracing::info!(repo = %repo.name, commit = %repo.last_commit, "repository synced");
                }
                Err(e) => {
                    tracing::error!(repo = %repo.name, error = %e, "repository sync failed");
                    first_failure.get_or_insert(e);
                }
            }
        }

        self.save_state()?;
        match first_failure {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Path of the catalog entry for `name`, searching enabled repositories
    /// in descending priority order.
    pub fn locate(&self, name: &str) -> Option<PathBuf> {
        self.repos
            .iter()
            .filter(|r| r.enabled)
            .map(|r| r.local_path.join(format!("{name}.toml")))
            .find(|p| p.is_file())
    }

    /// Case-insensitive substring search over entry names and descriptions.
    pub fn search(&self, pattern: &str) -> Vec<SearchHit> {
        let needle = pattern.to_lowercase();
        let mut hits = Vec::new();
        let mut seen = std::collections::HashSet::new();

        for repo in self.repos.iter().filter(|r| r.enabled) {
            let Ok(dir) = std::fs::read_dir(&repo.local_path) else {
                continue;
            };
            let mut paths: Vec<PathBuf> = dir
                .flatten()
                .map(|e| e.path())
                .filter(|p| p.extension().is_some_and(|ext| ext == "toml"))
                .collect();
            paths.sort();

            for path in paths {
                let Ok(def) = definition::load_path(&path) else {
                    tracing::debug!(path = %path.display(), "skipping unreadable catalog entry");
                    continue;
                };
                if !seen.insert(def.name.clone()) {
                    // A higher-priority repository already provided this name.
                    continue;
                }
                if def.name.to_lowercase().contains(&needle)
                    || def.description.to_lowercase().contains(&needle)
                {
                    hits.push(SearchHit {
                        name: def.name,
                        version: def.version,
                        description: def.description,
                        repository: repo.name.clone(),
                    });
                }
            }
        }
        hits
    }

    /// Load the catalog entry for `name`.
    pub fn load(&self, name: &str) -> Result<PackageDefinition, definition::DefinitionError> {
        definition::load(self, name)
    }

    fn save_state(&self) -> Result<(), CatalogError> {
        let state = SyncState {
            repos: self
                .repos
                .iter()
                .map(|r| {
                    (
                        r.name.clone(),
                        RepoState {
                            last_sync: r.last_sync,
                            last_commit: r.last_commit.clone(),
                        },
                    )
                })
                .collect(),
        };
        if let Some(parent) = self.state_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let text = toml::to_string_pretty(&state)
            .map_err(|e| CatalogError::Io(std::io::Error::other(e.to_string())))?;
        std::fs::write(&self.state_path, text)?;
        Ok(())
    }
}

fn load_state(path: &Path) -> SyncState {
    match std::fs::read_to_string(path) {
        Ok(text) => toml::from_str(&text).unwrap_or_else(|e| {
            tracing::warn!(error = %e, "discarding unreadable sync state");
            SyncState::default()
        }),
        Err(_) => SyncState::default(),
    }
}

fn now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

fn is_git_repo(path: &Path) -> bool {
    path.join(".git").exists()
}

async fn sync_repo(repo: &Repository, timeout: Duration) -> Result<(), CatalogError> {
    let net = |e: ExecError| CatalogError::Network {
        repo: repo.name.clone(),
        message: e.to_string(),
    };

    if repo.local_path.exists() {
        if is_git_repo(&repo.local_path) {
            let pull = exec::argv(["git", "pull", "--ff-only"]);
            if exec::run_checked(&pull, Some(&repo.local_path), timeout)
                .await
                .is_ok()
            {
                return Ok(());
            }
            tracing::warn!(repo = %repo.name, "fast-forward failed, resetting to origin");
            let fetch = exec::argv(["git", "fetch", "origin"]);
            exec::run_checked(&fetch, Some(&repo.local_path), timeout)
                .await
                .map_err(net)?;
            let reset = exec::argv(["git", "reset", "--hard", "origin/HEAD"]);
            exec::run_checked(&reset, Some(&repo.local_path), timeout)
                .await
                .map_err(net)?;
            return Ok(());
        }
        tracing::warn!(
            path = %repo.local_path.display(),
            "local path is not a repository, removing and re-cloning"
        );
        std::fs::remove_dir_all(&repo.local_path)?;
    }

    if let Some(parent) = repo.local_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let clone = vec![
        "git".to_string(),
        "clone".to_string(),
        "--depth=1".to_string(),
        format!("--branch={}", repo.branch),
        repo.url.clone(),
        repo.local_path.display().to_string(),
    ];
    exec::run_checked(&clone, None, timeout).await.map_err(net)?;
    Ok(())
}

async fn commit_hash(repo_path: &Path, timeout: Duration) -> Option<String> {
    let argv = exec::argv(["git", "rev-parse", "HEAD"]);
    let output = exec::run_checked(&argv, Some(repo_path), timeout).await.ok()?;
    let hash = output.stdout.trim().to_string();
    if hash.is_empty() {
        None
    } else {
        Some(hash)
    }
}
