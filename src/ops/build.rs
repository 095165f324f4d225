//! Build runner: drives one package through fetch, extract, configure,
//! compile, and install.
//!
//! Build tools are invoked with argument vectors; catalog-supplied recipe
//! strings (`build_cmd`, `install_cmd`, and friends) are the only commands
//! that see a shell, and they run with `PREFIX`, `DESTDIR`, and `JOBS` in the
//! environment.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use reqwest::Client;
use thiserror::Error;
use walkdir::WalkDir;

use crate::config::Config;
use crate::core::definition::{BuildSystem, PackageDefinition, SourceType};
use crate::io::download::{self, DownloadError};
use crate::io::exec::{self, ExecError};
use crate::io::extract::{self, ExtractError};
use crate::io::verify::{self, VerifyError};

/// Capacity of the in-flight build table.
pub const MAX_ACTIVE_BUILDS: usize = 16;

#[derive(Error, Debug)]
pub enum BuildError {
    #[error(transparent)]
    Download(#[from] DownloadError),

    #[error(transparent)]
    Integrity(#[from] VerifyError),

    #[error(transparent)]
    Extract(#[from] ExtractError),

    #[error(transparent)]
    Command(#[from] ExecError),

    #[error("missing build dependencies: {0}")]
    MissingBuildDeps(String),

    #[error("too many builds in flight (limit {MAX_ACTIVE_BUILDS})")]
    Resource,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Lifecycle phase of one in-progress install. Transitions are monotonic
/// forward; `Failed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildStatus {
    Init,
    Downloading,
    Extracting,
    Configuring,
    Building,
    Installing,
    Complete,
    Failed,
}

impl fmt::Display for BuildStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BuildStatus::Init => "initializing",
            BuildStatus::Downloading => "downloading",
            BuildStatus::Extracting => "extracting",
            BuildStatus::Configuring => "configuring",
            BuildStatus::Building => "building",
            BuildStatus::Installing => "installing",
            BuildStatus::Complete => "complete",
            BuildStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Workspace and state for one in-progress install.
pub struct BuildContext {
    pub package: PackageDefinition,
    pub build_dir: PathBuf,
    pub source_dir: PathBuf,
    pub install_dir: PathBuf,
    pub status: BuildStatus,
    pub started_at: Option<u64>,
    pub ended_at: Option<u64>,
}

impl BuildContext {
    /// Create the per-install workspace under the builds cache.
    pub fn new(config: &Config, package: PackageDefinition) -> std::io::Result<Self> {
        let build_dir = config
            .builds_dir()
            .join(format!("{}-{}", package.name, package.version));
        let source_dir = build_dir.join("source");
        let install_dir = build_dir.join("install");
        std::fs::create_dir_all(&source_dir)?;
        std::fs::create_dir_all(&install_dir)?;
        Ok(Self {
            package,
            build_dir,
            source_dir,
            install_dir,
            status: BuildStatus::Init,
            started_at: None,
            ended_at: None,
        })
    }

    /// Remove the workspace. Failed workspaces survive when the
    /// configuration asks for post-mortem retention.
    pub fn cleanup(&self, config: &Config) {
        let failed = self.status == BuildStatus::Failed;
        if failed && config.keep_build_dir {
            tracing::info!(dir = %self.build_dir.display(), "keeping build directory for inspection");
            return;
        }
        tracing::debug!(dir = %self.build_dir.display(), "removing build directory");
        if let Err(e) = std::fs::remove_dir_all(&self.build_dir) {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(dir = %self.build_dir.display(), error = %e, "failed to remove build directory");
            }
        }
    }
}

/// Bounded table of in-progress builds.
#[derive(Default)]
pub struct BuildTracker {
    active: Mutex<Vec<String>>,
}

impl BuildTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve a slot for `name`, released when the guard drops.
    pub fn begin(&self, name: &str) -> Result<BuildSlot<'_>, BuildError> {
        let mut active = self.active.lock().unwrap_or_else(|p| p.into_inner());
        if active.len() >= MAX_ACTIVE_BUILDS {
            return Err(BuildError::Resource);
        }
        active.push(name.to_string());
        Ok(BuildSlot {
            tracker: self,
            name: name.to_string(),
        })
    }

    pub fn is_running(&self, name: &str) -> bool {
        self.active
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .iter()
            .any(|n| n == name)
    }
}

pub struct BuildSlot<'a> {
    tracker: &'a BuildTracker,
    name: String,
}

impl Drop for BuildSlot<'_> {
    fn drop(&mut self) {
        let mut active = self.tracker.active.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(pos) = active.iter().position(|n| *n == self.name) {
            active.remove(pos);
        }
    }
}

/// Probe a source tree for its build system.
pub fn detect_build_system(source_dir: &Path) -> BuildSystem {
    if source_dir.join("CMakeLists.txt").is_file() {
        BuildSystem::Cmake
    } else if source_dir.join("configure").is_file() {
        BuildSystem::Autotools
    } else if source_dir.join("Makefile").is_file() {
        BuildSystem::Make
    } else {
        BuildSystem::Autotools
    }
}

pub struct Runner<'a> {
    config: &'a Config,
    client: &'a Client,
    tracker: &'a BuildTracker,
}

impl<'a> Runner<'a> {
    pub fn new(config: &'a Config, client: &'a Client, tracker: &'a BuildTracker) -> Self {
        Self {
            config,
            client,
            tracker,
        }
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(self.config.build_timeout)
    }

    fn recipe_env(&self, ctx: &BuildContext) -> HashMap<String, String> {
        HashMap::from([
            ("PREFIX".to_string(), self.config.install_prefix.clone()),
            (
                "DESTDIR".to_string(),
                ctx.install_dir.display().to_string(),
            ),
            ("JOBS".to_string(), self.config.parallel_jobs.to_string()),
        ])
    }

    /// Walk the four build phases. On failure the context is left in
    /// `Failed`; the caller owns workspace cleanup and database state.
    pub async fn build(&self, ctx: &mut BuildContext) -> Result<(), BuildError> {
        let _slot = self.tracker.begin(&ctx.package.name)?;
        ctx.started_at = Some(now());
        tracing::info!(package = %ctx.package.name, version = %ctx.package.version, "building");

        let result = self.run_build_phases(ctx).await;
        match &result {
            Ok(()) => {
                let elapsed = now().saturating_sub(ctx.started_at.unwrap_or(0));
                tracing::info!(package = %ctx.package.name, elapsed_secs = elapsed, "build complete");
            }
            Err(e) => {
                ctx.status = BuildStatus::Failed;
                ctx.ended_at = Some(now());
                tracing::error!(package = %ctx.package.name, error = %e, "build failed");
            }
        }
        result
    }

    async fn run_build_phases(&self, ctx: &mut BuildContext) -> Result<(), BuildError> {
        self.check_build_deps(&ctx.package)?;

        ctx.status = BuildStatus::Downloading;
        let archive = self.fetch_source(ctx).await?;

        ctx.status = BuildStatus::Extracting;
        if let Some(archive) = archive {
            let source_dir = ctx.source_dir.clone();
            tokio::task::spawn_blocking(move || extract::extract(&archive, &source_dir))
                .await
                .map_err(|e| BuildError::Io(std::io::Error::other(e)))??;
        }

        ctx.status = BuildStatus::Configuring;
        self.configure(ctx).await?;

        ctx.status = BuildStatus::Building;
        self.compile(ctx).await?;
        Ok(())
    }

    fn check_build_deps(&self, package: &PackageDefinition) -> Result<(), BuildError> {
        let missing: Vec<&str> = package
            .build_dependencies
            .iter()
            .filter(|tool| which::which(tool).is_err())
            .map(String::as_str)
            .collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(BuildError::MissingBuildDeps(missing.join(", ")))
        }
    }

    /// Download the source artifact. Returns the archive path, or None for
    /// git sources, which are cloned straight into the source directory.
    async fn fetch_source(&self, ctx: &BuildContext) -> Result<Option<PathBuf>, BuildError> {
        let package = &ctx.package;
        match package.source_type {
            SourceType::Git => {
                let clone = vec![
                    "git".to_string(),
                    "clone".to_string(),
                    "--depth=1".to_string(),
                    package.source_url.clone(),
                    ctx.source_dir.display().to_string(),
                ];
                exec::run_checked(&clone, None, self.timeout()).await?;
                Ok(None)
            }
            SourceType::Tarball => {
                let basename = package
                    .source_basename()
                    .map_err(|e| BuildError::Io(std::io::Error::other(e.to_string())))?;
                let dest = self.config.sources_dir().join(basename);
                download::fetch(self.client, &package.source_url, &dest, self.timeout()).await?;
                self.verify_source(package, &dest).await?;
                Ok(Some(dest))
            }
        }
    }

    async fn verify_source(
        &self,
        package: &PackageDefinition,
        archive: &Path,
    ) -> Result<(), BuildError> {
        if !self.config.verify_checksums {
            tracing::debug!(package = %package.name, "checksum verification disabled");
            return Ok(());
        }
        let Some(expected) = package.checksum.clone() else {
            tracing::warn!(package = %package.name, "no checksum declared, skipping verification");
            return Ok(());
        };

        tracing::info!(package = %package.name, "verifying source integrity");
        let path = archive.to_path_buf();
        let result = tokio::task::spawn_blocking(move || verify::verify(&path, &expected))
            .await
            .map_err(|e| BuildError::Io(std::io::Error::other(e)))?;

        if let Err(e) = result {
            // The artifact is untrusted; never leave it in the cache.
            let _ = std::fs::remove_file(archive);
            return Err(e.into());
        }
        Ok(())
    }

    async fn configure(&self, ctx: &BuildContext) -> Result<(), BuildError> {
        let package = &ctx.package;
        let mut build_system = package.build_system;
        if build_system == BuildSystem::Autotools && package.build_cmd.is_empty() {
            build_system = detect_build_system(&ctx.source_dir);
            if build_system != package.build_system {
                tracing::info!(package = %package.name, detected = %build_system, "detected build system");
            }
        }

        match build_system {
            BuildSystem::Autotools => self.configure_autotools(ctx).await,
            BuildSystem::Cmake => self.configure_cmake(ctx).await,
            // Plain make needs no configure step; a custom recipe drives
            // everything from its build command.
            BuildSystem::Make | BuildSystem::Custom => Ok(()),
        }
    }

    async fn configure_autotools(&self, ctx: &BuildContext) -> Result<(), BuildError> {
        if !ctx.source_dir.join("configure").is_file() {
            tracing::warn!(package = %ctx.package.name, "no configure script, trying to generate one");
            for generator in [
                &["./autogen.sh"][..],
                &["autoreconf", "-fiv"][..],
                &["./bootstrap"][..],
            ] {
                let argv = exec::argv(generator.iter().copied());
                match exec::run(&argv, Some(&ctx.source_dir), self.timeout()).await {
                    Ok(output) if output.success() => break,
                    _ => continue,
                }
            }
            if !ctx.source_dir.join("configure").is_file() {
                tracing::warn!(package = %ctx.package.name, "could not generate a configure script");
            }
        }

        let mut argv = vec![
            "./configure".to_string(),
            format!("--prefix={}", self.config.install_prefix),
        ];
        argv.extend(split_args(&ctx.package.configure_args));
        exec::run_checked(&argv, Some(&ctx.source_dir), self.timeout()).await?;
        Ok(())
    }

    async fn configure_cmake(&self, ctx: &BuildContext) -> Result<(), BuildError> {
        let build_type = if self.config.debug_symbols {
            "Debug"
        } else {
            "Release"
        };
        let mut argv = vec![
            "cmake".to_string(),
            format!("-DCMAKE_BUILD_TYPE={build_type}"),
            format!("-DCMAKE_INSTALL_PREFIX={}", self.config.install_prefix),
        ];
        argv.extend(split_args(&ctx.package.configure_args));
        argv.push(".".to_string());
        exec::run_checked(&argv, Some(&ctx.source_dir), self.timeout()).await?;
        Ok(())
    }

    async fn compile(&self, ctx: &BuildContext) -> Result<(), BuildError> {
        let package = &ctx.package;
        let env = self.recipe_env(ctx);

        if !package.pre_build_cmd.is_empty() {
            tracing::info!(package = %package.name, "running pre-build command");
            exec::run_shell(&package.pre_build_cmd, &ctx.source_dir, self.timeout(), &env).await?;
        }

        if !package.build_cmd.is_empty() {
            exec::run_shell(&package.build_cmd, &ctx.source_dir, self.timeout(), &env).await?;
        } else {
            let argv = vec![
                "make".to_string(),
                format!("-j{}", self.config.parallel_jobs),
            ];
            exec::run_checked(&argv, Some(&ctx.source_dir), self.timeout()).await?;
        }
        Ok(())
    }

    /// Install the built tree: stage into the install directory, capture the
    /// file list, then copy everything to the host root.
    ///
    /// Returns the absolute destination paths and the staged size in bytes.
    pub async fn install(&self, ctx: &mut BuildContext) -> Result<(Vec<PathBuf>, u64), BuildError> {
        ctx.status = BuildStatus::Installing;
        tracing::info!(package = %ctx.package.name, "installing");

        let result = self.run_install(ctx).await;
        match &result {
            Ok(_) => ctx.status = BuildStatus::Complete,
            Err(_) => ctx.status = BuildStatus::Failed,
        }
        ctx.ended_at = Some(now());
        result
    }

    async fn run_install(&self, ctx: &BuildContext) -> Result<(Vec<PathBuf>, u64), BuildError> {
        let package = &ctx.package;

        if !package.install_cmd.is_empty() {
            let env = self.recipe_env(ctx);
            exec::run_shell(&package.install_cmd, &ctx.source_dir, self.timeout(), &env).await?;
        } else {
            let argv = vec![
                "make".to_string(),
                "install".to_string(),
                format!("DESTDIR={}", ctx.install_dir.display()),
                format!("PREFIX={}", self.config.install_prefix),
            ];
            exec::run_checked(&argv, Some(&ctx.source_dir), self.timeout()).await?;
        }

        // The staged tree is the authoritative record of what the package
        // owns; capture it before anything lands on the host.
        let install_dir = ctx.install_dir.clone();
        let root = self.config.root_dir.clone();
        let (files, size) = tokio::task::spawn_blocking(move || {
            let files = staged_file_list(&install_dir, &root)?;
            let size = dir_size(&install_dir);
            copy_tree(&install_dir, &root)?;
            Ok::<_, std::io::Error>((files, size))
        })
        .await
        .map_err(|e| BuildError::Io(std::io::Error::other(e)))??;

        tracing::info!(package = %package.name, files = files.len(), "installed to root");
        Ok((files, size))
    }
}

fn now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Whitespace-split configure arguments into argv elements.
fn split_args(args: &str) -> Vec<String> {
    args.split_whitespace().map(str::to_string).collect()
}

/// Destination paths the staged tree will occupy under `root`.
fn staged_file_list(install_dir: &Path, root: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in WalkDir::new(install_dir).into_iter().flatten() {
        if entry.file_type().is_dir() {
            continue;
        }
        if let Ok(relative) = entry.path().strip_prefix(install_dir) {
            files.push(root.join(relative));
        }
    }
    files.sort();
    Ok(files)
}

/// Total size in bytes of the regular files under `path`.
pub fn dir_size(path: &Path) -> u64 {
    WalkDir::new(path)
        .into_iter()
        .flatten()
        .filter_map(|e| e.metadata().ok())
        .filter(|m| m.is_file())
        .map(|m| m.len())
        .sum()
}

/// Recursively copy `src` into `dst`, preserving permissions and mtimes.
fn copy_tree(src: &Path, dst: &Path) -> std::io::Result<()> {
    for entry in WalkDir::new(src) {
        let entry = entry.map_err(std::io::Error::other)?;
        let relative = entry
            .path()
            .strip_prefix(src)
            .map_err(std::io::Error::other)?;
        if relative.as_os_str().is_empty() {
            continue;
        }
        let target = dst.join(relative);
        let file_type = entry.file_type();

        if file_type.is_dir() {
            std::fs::create_dir_all(&target)?;
            let perms = entry.metadata().map_err(std::io::Error::other)?.permissions();
            std::fs::set_permissions(&target, perms)?;
        } else if file_type.is_symlink() {
            let link = std::fs::read_link(entry.path())?;
            if target.exists() || target.symlink_metadata().is_ok() {
                let _ = std::fs::remove_file(&target);
            }
            #[cfg(unix)]
            std::os::unix::fs::symlink(&link, &target)?;
        } else {
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::copy(entry.path(), &target)?;
            let metadata = entry.metadata().map_err(std::io::Error::other)?;
            let mtime = filetime::FileTime::from_last_modification_time(&metadata);
            filetime::set_file_mtime(&target, mtime)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn test_config(root: &Path) -> Config {
        Config {
            root_dir: root.to_path_buf(),
            build_timeout: 30,
            ..Config::default()
        }
    }

    fn test_package(name: &str) -> PackageDefinition {
        PackageDefinition::from_toml(&format!(
            "name = \"{name}\"\nversion = \"1.0.0\"\nsource_url = \"https://example.org/{name}-1.0.0.tar.gz\"\n"
        ))
        .unwrap()
    }

    #[test]
    fn context_creates_workspace_layout() {
        let dir = tempdir().unwrap();
        let config = test_config(dir.path());
        let ctx = BuildContext::new(&config, test_package("demo")).unwrap();

        assert!(ctx.build_dir.ends_with("demo-1.0.0"));
        assert_eq!(ctx.source_dir, ctx.build_dir.join("source"));
        assert_eq!(ctx.install_dir, ctx.build_dir.join("install"));
        assert!(ctx.source_dir.is_dir());
        assert!(ctx.install_dir.is_dir());
        assert_eq!(ctx.status, BuildStatus::Init);
    }

    #[test]
    fn cleanup_removes_workspace() {
        let dir = tempdir().unwrap();
        let config = test_config(dir.path());
        let ctx = BuildContext::new(&config, test_package("demo")).unwrap();
        ctx.cleanup(&config);
        assert!(!ctx.build_dir.exists());
    }

    #[test]
    fn cleanup_keeps_failed_workspace_when_configured() {
        let dir = tempdir().unwrap();
        let mut config = test_config(dir.path());
        config.keep_build_dir = true;
        let mut ctx = BuildContext::new(&config, test_package("demo")).unwrap();

        ctx.status = BuildStatus::Failed;
        ctx.cleanup(&config);
        assert!(ctx.build_dir.exists());

        // Success is always removed, even with the flag set.
        ctx.status = BuildStatus::Complete;
        ctx.cleanup(&config);
        assert!(!ctx.build_dir.exists());
    }

    #[test]
    fn tracker_enforces_capacity() {
        let tracker = BuildTracker::new();
        let mut slots = Vec::new();
        for i in 0..MAX_ACTIVE_BUILDS {
            slots.push(tracker.begin(&format!("pkg{i}")).unwrap());
        }
        assert!(matches!(tracker.begin("overflow"), Err(BuildError::Resource)));

        slots.pop();
        let _replacement = tracker.begin("fits-now").unwrap();
    }

    #[test]
    fn tracker_reports_running_builds() {
        let tracker = BuildTracker::new();
        assert!(!tracker.is_running("zlib"));
        let slot = tracker.begin("zlib").unwrap();
        assert!(tracker.is_running("zlib"));
        drop(slot);
        assert!(!tracker.is_running("zlib"));
    }

    #[test]
    fn detects_build_systems() {
        let dir = tempdir().unwrap();
        assert_eq!(detect_build_system(dir.path()), BuildSystem::Autotools);

        fs::write(dir.path().join("Makefile"), "all:\n").unwrap();
        assert_eq!(detect_build_system(dir.path()), BuildSystem::Make);

        fs::write(dir.path().join("configure"), "#!/bin/sh\n").unwrap();
        assert_eq!(detect_build_system(dir.path()), BuildSystem::Autotools);

        fs::write(dir.path().join("CMakeLists.txt"), "project(x)\n").unwrap();
        assert_eq!(detect_build_system(dir.path()), BuildSystem::Cmake);
    }

    #[test]
    fn split_args_handles_empty_and_spaces() {
        assert!(split_args("").is_empty());
        assert_eq!(split_args("--a  --b=c"), vec!["--a", "--b=c"]);
    }

    #[test]
    fn copy_tree_preserves_content_and_layout() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("staged");
        let dst = dir.path().join("root");
        fs::create_dir_all(src.join("usr/local/bin")).unwrap();
        fs::write(src.join("usr/local/bin/tool"), b"#!/bin/sh\n").unwrap();

        copy_tree(&src, &dst).unwrap();
        assert_eq!(fs::read(dst.join("usr/local/bin/tool")).unwrap(), b"#!/bin/sh\n");
    }

    #[cfg(unix)]
    #[test]
    fn copy_tree_preserves_permissions() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempdir().unwrap();
        let src = dir.path().join("staged");
        let dst = dir.path().join("root");
        fs::create_dir_all(&src).unwrap();
        let file = src.join("tool");
        fs::write(&file, b"x").unwrap();
        fs::set_permissions(&file, fs::Permissions::from_mode(0o755)).unwrap();

        copy_tree(&src, &dst).unwrap();
        let mode = fs::metadata(dst.join("tool")).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o755);
    }

    #[test]
    fn staged_file_list_maps_to_root() {
        let dir = tempdir().unwrap();
        let staged = dir.path().join("install");
        fs::create_dir_all(staged.join("usr/local/bin")).unwrap();
        fs::write(staged.join("usr/local/bin/tool"), b"x").unwrap();
        fs::write(staged.join("usr/local/readme"), b"y").unwrap();

        let files = staged_file_list(&staged, Path::new("/")).unwrap();
        assert_eq!(
            files,
            vec![
                PathBuf::from("/usr/local/bin/tool"),
                PathBuf::from("/usr/local/readme"),
            ]
        );
    }

    #[test]
    fn dir_size_sums_regular_files() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("a"), vec![0u8; 100]).unwrap();
        fs::create_dir_all(dir.path().join("sub")).unwrap();
        fs::write(dir.path().join("sub/b"), vec![0u8; 50]).unwrap();
        assert_eq!(dir_size(dir.path()), 150);
    }
}
