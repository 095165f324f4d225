//! Configuration record and filesystem layout.
//!
//! The config file lives at `<root>/etc/kiln/config.toml`. Every field has a
//! default, so a missing file yields a fully usable configuration.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Catalog repository shipped with the default configuration.
pub const DEFAULT_REPO_URL: &str = "https://github.com/kiln-pkgs/catalog.git";
pub const DEFAULT_REPO_BRANCH: &str = "main";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid config file: {0}")]
    Parse(#[from] toml::de::Error),
}

/// One configured catalog repository.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepositoryConfig {
    pub name: String,
    pub url: String,
    #[serde(default = "default_branch")]
    pub branch: String,
    /// Higher priority repositories are searched first.
    #[serde(default = "default_priority")]
    pub priority: i32,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_branch() -> String {
    DEFAULT_REPO_BRANCH.to_string()
}

fn default_priority() -> i32 {
    50
}

fn default_true() -> bool {
    true
}

/// Fully populated configuration record consumed by the core.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Host root every other path is rooted at. Overridable for tests.
    pub root_dir: PathBuf,
    pub install_prefix: String,
    pub parallel_jobs: u32,
    /// Overall deadline, in seconds, for every external invocation.
    pub build_timeout: u64,
    pub debug_symbols: bool,
    /// Keep the build workspace of a failed install for post-mortem.
    pub keep_build_dir: bool,
    pub force_mode: bool,
    pub assume_yes: bool,
    pub skip_dependencies: bool,
    pub verify_checksums: bool,
    /// Seconds between automatic catalog syncs.
    pub sync_interval: u64,
    pub repositories: Vec<RepositoryConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            root_dir: PathBuf::from("/"),
            install_prefix: "/usr/local".to_string(),
            parallel_jobs: num_cpus::get() as u32,
            build_timeout: 3600,
            debug_symbols: false,
            keep_build_dir: false,
            force_mode: false,
            assume_yes: false,
            skip_dependencies: false,
            verify_checksums: true,
            sync_interval: 3600,
            repositories: vec![RepositoryConfig {
                name: "main".to_string(),
                url: DEFAULT_REPO_URL.to_string(),
                branch: DEFAULT_REPO_BRANCH.to_string(),
                priority: 100,
                enabled: true,
            }],
        }
    }
}

impl Config {
    /// Load the config file, falling back to defaults when it does not exist.
    ///
    /// `root` overrides `root_dir` both for locating the config file and in
    /// the returned record.
    pub fn load(path: Option<&Path>, root: Option<&Path>) -> Result<Self, ConfigError> {
        let root_dir = root.map(Path::to_path_buf).unwrap_or_else(|| PathBuf::from("/"));
        let config_path = match path {
            Some(p) => p.to_path_buf(),
            None => default_config_path(&root_dir),
        };

        let mut config = if config_path.is_file() {
            let text = fs::read_to_string(&config_path)?;
            toml::from_str::<Config>(&text)?
        } else {
            tracing::debug!(path = %config_path.display(), "no config file, using defaults");
            Config::default()
        };

        if root.is_some() {
            config.root_dir = root_dir;
        }
        Ok(config)
    }

    fn rooted(&self, tail: &str) -> PathBuf {
        // Path::join replaces instead of appending when handed an absolute
        // path, so the well-known tails are kept relative here.
        self.root_dir.join(tail)
    }

    pub fn etc_dir(&self) -> PathBuf {
        self.rooted("etc/kiln")
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.rooted("var/cache/kiln")
    }

    pub fn sources_dir(&self) -> PathBuf {
        self.cache_dir().join("sources")
    }

    pub fn builds_dir(&self) -> PathBuf {
        self.cache_dir().join("builds")
    }

    pub fn lib_dir(&self) -> PathBuf {
        self.rooted("var/lib/kiln")
    }

    pub fn repo_dir(&self) -> PathBuf {
        self.lib_dir().join("repo")
    }

    pub fn db_path(&self) -> PathBuf {
        self.lib_dir().join("installed.txt")
    }

    /// Directory of per-package installed file lists.
    pub fn files_dir(&self) -> PathBuf {
        self.lib_dir().join("files")
    }

    pub fn sync_state_path(&self) -> PathBuf {
        self.lib_dir().join("sync-state.toml")
    }

    pub fn lock_path(&self) -> PathBuf {
        self.lib_dir().join("kiln.lock")
    }

    pub fn log_dir(&self) -> PathBuf {
        self.rooted("var/log/kiln")
    }
}

/// Default config file location under the given root.
pub fn default_config_path(root: &Path) -> PathBuf {
    root.join("etc/kiln/config.toml")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn defaults_are_usable() {
        let config = Config::default();
        assert_eq!(config.install_prefix, "/usr/local");
        assert_eq!(config.build_timeout, 3600);
        assert!(config.verify_checksums);
        assert_eq!(config.repositories.len(), 1);
        assert!(config.repositories[0].enabled);
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let dir = tempdir().unwrap();
        let config = Config::load(None, Some(dir.path())).unwrap();
        assert_eq!(config.root_dir, dir.path());
        assert_eq!(config.sync_interval, 3600);
    }

    #[test]
    fn load_parses_and_roots_paths() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(
            &path,
            r#"
install_prefix = "/opt/kiln"
parallel_jobs = 2
keep_build_dir = true

[[repositories]]
name = "extra"
url = "https://example.org/extra.git"
priority = 10
"#,
        )
        .unwrap();

        let config = Config::load(Some(&path), Some(dir.path())).unwrap();
        assert_eq!(config.install_prefix, "/opt/kiln");
        assert_eq!(config.parallel_jobs, 2);
        assert!(config.keep_build_dir);
        assert_eq!(config.repositories.len(), 1);
        assert_eq!(config.repositories[0].branch, "main");
        assert_eq!(config.db_path(), dir.path().join("var/lib/kiln/installed.txt"));
        assert_eq!(config.sources_dir(), dir.path().join("var/cache/kiln/sources"));
    }

    #[test]
    fn config_round_trips() {
        let config = Config::default();
        let text = toml::to_string_pretty(&config).unwrap();
        let back: Config = toml::from_str(&text).unwrap();
        assert_eq!(back.install_prefix, config.install_prefix);
        assert_eq!(back.repositories.len(), config.repositories.len());
    }
}
