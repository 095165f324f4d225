//! Package updates.

use std::path::PathBuf;

use crate::core::version::Version;
use crate::ops::{OpError, Ops, UpdateSummary};

impl Ops {
    /// Update `name` to the catalog version.
    ///
    /// A package that is not installed is simply installed. When the catalog
    /// version is not newer and force is unset, this is a no-op. Otherwise
    /// configuration files recorded under `<root>/etc` are backed up, the old
    /// version is removed, the new one installed, and the configs restored.
    pub async fn update(&mut self, name: &str) -> Result<(), OpError> {
        let Some(entry) = self.db.find(name).cloned() else {
            tracing::info!(package = name, "not installed, installing instead");
            return self.install(name).await;
        };

        let def = self.catalog.load(name)?;
        let current: Version = entry
            .version
            .parse()
            .map_err(|e: crate::core::version::VersionError| OpError::Parse(e.to_string()))?;
        let latest: Version = def
            .version
            .parse()
            .map_err(|e: crate::core::version::VersionError| OpError::Parse(e.to_string()))?;

        if latest <= current && !self.config.force_mode {
            tracing::info!(package = name, version = %entry.version, "already up to date");
            return Ok(());
        }

        tracing::info!(
            package = name,
            from = %entry.version,
            to = %def.version,
            "updating"
        );

        let backups = self.backup_config_files(name)?;
        self.remove(name)?;
        self.install(name).await?;
        self.restore_config_files(name, &backups);
        Ok(())
    }

    /// Update every installed package.
    ///
    /// Returns the aggregate counts; any single failure makes the overall
    /// result an error carrying them.
    pub async fn update_all(&mut self) -> Result<UpdateSummary, OpError> {
        let names: Vec<String> = self.db.all().iter().map(|e| e.name.clone()).collect();
        let mut summary = UpdateSummary::default();

        for name in names {
            self.check_cancelled()?;
            match self.update(&name).await {
                Ok(()) => summary.updated += 1,
                Err(OpError::Cancelled) => return Err(OpError::Cancelled),
                Err(e) => {
                    tracing::warn!(package = %name, error = %e, "update failed");
                    summary.failed += 1;
                }
            }
        }

        tracing::info!(
            updated = summary.updated,
            failed = summary.failed,
            "update sweep complete"
        );
        if summary.failed > 0 {
            return Err(OpError::UpdatesFailed(summary));
        }
        Ok(summary)
    }

    /// Copy the package's files under `<root>/etc` into the backup area.
    fn backup_config_files(&self, name: &str) -> Result<Vec<(PathBuf, PathBuf)>, OpError> {
        let etc_prefix = self.config.root_dir.join("etc");
        let backup_dir = self.config.lib_dir().join("backups").join(name);
        let mut saved = Vec::new();

        for path in self.db.read_file_list(name)? {
            if !path.starts_with(&etc_prefix) || !path.is_file() {
                continue;
            }
            let relative = match path.strip_prefix(&self.config.root_dir) {
                Ok(r) => r.to_path_buf(),
                Err(_) => continue,
            };
            let backup = backup_dir.join(&relative);
            if let Some(parent) = backup.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::copy(&path, &backup)?;
            tracing::debug!(file = %path.display(), "backed up config file");
            saved.push((path, backup));
        }
        Ok(saved)
    }

    /// Put backed-up config files back and drop the backup area.
    fn restore_config_files(&self, name: &str, backups: &[(PathBuf, PathBuf)]) {
        for (original, backup) in backups {
            if let Some(parent) = original.parent() {
                let _ = std::fs::create_dir_all(parent);
            }
            if let Err(e) = std::fs::copy(backup, original) {
                tracing::warn!(file = %original.display(), error = %e, "failed to restore config file");
            }
        }
        if !backups.is_empty() {
            let _ = std::fs::remove_dir_all(self.config.lib_dir().join("backups").join(name));
        }
    }
}
