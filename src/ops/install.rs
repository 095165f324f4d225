//! Package installation.

use std::time::{SystemTime, UNIX_EPOCH};

use crate::core::definition::PackageDefinition;
use crate::core::resolver;
use crate::io::exec;
use crate::ops::build::{BuildContext, BuildStatus, Runner};
use crate::ops::{OpError, Ops};
use crate::store::db::{InstalledEntry, PackageState};

impl Ops {
    /// Install `name` and, unless disabled, its dependency closure.
    ///
    /// Dependencies install strictly in resolver order: each one is fully
    /// recorded in the database before the next begins, and the requested
    /// package goes last.
    pub async fn install(&mut self, name: &str) -> Result<(), OpError> {
        if self.db.find(name).is_some() && !self.config.force_mode {
            tracing::warn!(package = name, "already installed");
            return Ok(());
        }

        let def = self.catalog.load(name)?;
        self.check_conflicts(&def)?;
        self.db.set_state(name, PackageState::Downloading)?;

        if !self.config.skip_dependencies {
            let order = resolver::resolve(&self.catalog, name)?;
            for dep in order.iter().take(order.len().saturating_sub(1)) {
                if self.db.find(dep).is_some() {
                    continue;
                }
                tracing::info!(package = name, dependency = %dep, "installing dependency");
                if let Err(e) = self.install_single(dep).await {
                    tracing::error!(package = name, dependency = %dep, error = %e, "dependency install failed");
                    self.db.set_state(name, PackageState::Failed)?;
                    return Err(e);
                }
            }
        }

        self.install_one(def).await
    }

    /// Install one package without touching its dependencies.
    async fn install_single(&mut self, name: &str) -> Result<(), OpError> {
        if self.db.find(name).is_some() && !self.config.force_mode {
            return Ok(());
        }
        let def = self.catalog.load(name)?;
        self.check_conflicts(&def)?;
        self.db.set_state(name, PackageState::Downloading)?;
        self.install_one(def).await
    }

    fn check_conflicts(&self, def: &PackageDefinition) -> Result<(), OpError> {
        for conflict in &def.conflicts {
            if self.db.find(conflict).is_some() {
                return Err(OpError::Conflict {
                    package: def.name.clone(),
                    conflict: conflict.clone(),
                });
            }
        }
        Ok(())
    }

    /// Drive the build/install pipeline for an already validated definition.
    async fn install_one(&mut self, def: PackageDefinition) -> Result<(), OpError> {
        let name = def.name.clone();
        let mut ctx = BuildContext::new(&self.config, def)?;

        let result = self.run_pipeline(&mut ctx).await;
        if let Err(e) = result {
            ctx.status = BuildStatus::Failed;
            ctx.cleanup(&self.config);
            self.db.set_state(&name, PackageState::Failed)?;
            return Err(e);
        }
        ctx.cleanup(&self.config);

        let package = &ctx.package;
        if !package.post_install_cmd.is_empty() {
            tracing::info!(package = %name, "running post-install command");
            let env = std::collections::HashMap::from([(
                "PREFIX".to_string(),
                self.config.install_prefix.clone(),
            )]);
            let timeout = std::time::Duration::from_secs(self.config.build_timeout);
            if let Err(e) =
                exec::run_shell(&package.post_install_cmd, &self.config.root_dir, timeout, &env)
                    .await
            {
                // Post-install failures never fail the install itself.
                tracing::warn!(package = %name, error = %e, "post-install command failed");
            }
        }

        tracing::info!(package = %name, "installed successfully");
        Ok(())
    }

    async fn run_pipeline(&mut self, ctx: &mut BuildContext) -> Result<(), OpError> {
        let name = ctx.package.name.clone();

        self.check_cancelled()?;
        self.db.set_state(&name, PackageState::Building)?;
        {
            let runner = Runner::new(&self.config, self.client(), self.tracker());
            runner.build(ctx).await?;
        }

        self.check_cancelled()?;
        self.db.set_state(&name, PackageState::Installing)?;
        let (files, size) = {
            let runner = Runner::new(&self.config, self.client(), self.tracker());
            runner.install(ctx).await?
        };

        let entry = InstalledEntry {
            name: name.clone(),
            version: ctx.package.version.clone(),
            description: ctx.package.description.clone(),
            installed_at: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs(),
            installed_size: size,
            state: PackageState::Installed,
        };
        self.db.add(entry)?;
        self.db.write_file_list(&name, &files)?;
        Ok(())
    }
}
