//! Package removal.

use crate::core::resolver;
use crate::ops::{OpError, Ops};

impl Ops {
    /// Remove an installed package and its recorded files.
    ///
    /// Unless forced, removal is refused while other installed packages
    /// declare a dependency on `name`. Files are deleted deepest first;
    /// already missing files are ignored.
    pub fn remove(&mut self, name: &str) -> Result<(), OpError> {
        if self.db.find(name).is_none() {
            tracing::warn!(package = name, "not installed");
            return Ok(());
        }

        if !self.config.force_mode {
            let dependents = resolver::find_dependents(&self.db, &self.catalog, name);
            if !dependents.is_empty() {
                return Err(OpError::Dependency {
                    package: name.to_string(),
                    dependents,
                });
            }
        }

        let files = self.db.read_file_list(name)?;
        if !files.is_empty() {
            tracing::info!(package = name, count = files.len(), "removing files");
        }
        for path in files.iter().rev() {
            match std::fs::remove_file(path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "failed to remove file");
                }
            }
        }

        self.db.remove(name)?;
        tracing::info!(package = name, "removed");
        Ok(())
    }
}
