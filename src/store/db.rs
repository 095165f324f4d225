//! Installed-packages database.
//!
//! A plain-text file, one entry per line, tab-separated:
//!
//! ```text
//! <name>\t<version>\t<description>\t<installed_at>\t<installed_size>\t<state>
//! ```
//!
//! Lines starting with `#` are comments. Load is tolerant: lines with at
//! least three fields are accepted with defaults for the remainder, malformed
//! lines are discarded with a warning. The in-memory state is persisted after
//! every mutation. Per-package installed file lists live in a sidecar
//! directory, one `<name>.list` file with one absolute path per line.

use std::fmt;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Lifecycle state of an installed package.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PackageState {
    #[default]
    Unknown,
    Available,
    Downloading,
    Building,
    Installing,
    Installed,
    Failed,
    Broken,
}

impl PackageState {
    pub fn as_u8(self) -> u8 {
        match self {
            PackageState::Unknown => 0,
            PackageState::Available => 1,
            PackageState::Downloading => 2,
            PackageState::Building => 3,
            PackageState::Installing => 4,
            PackageState::Installed => 5,
            PackageState::Failed => 6,
            PackageState::Broken => 7,
        }
    }

    pub fn from_u8(value: u8) -> Self {
        match value {
            1 => PackageState::Available,
            2 => PackageState::Downloading,
            3 => PackageState::Building,
            4 => PackageState::Installing,
            5 => PackageState::Installed,
            6 => PackageState::Failed,
            7 => PackageState::Broken,
            _ => PackageState::Unknown,
        }
    }
}

impl fmt::Display for PackageState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PackageState::Unknown => "unknown",
            PackageState::Available => "available",
            PackageState::Downloading => "downloading",
            PackageState::Building => "building",
            PackageState::Installing => "installing",
            PackageState::Installed => "installed",
            PackageState::Failed => "failed",
            PackageState::Broken => "broken",
        };
        f.write_str(s)
    }
}

/// One row of the installed-packages database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstalledEntry {
    pub name: String,
    pub version: String,
    pub description: String,
    /// Seconds since the Unix epoch.
    pub installed_at: u64,
    /// Bytes on disk, best effort.
    pub installed_size: u64,
    pub state: PackageState,
}

pub struct Database {
    path: PathBuf,
    files_dir: PathBuf,
    entries: Vec<InstalledEntry>,
}

impl Database {
    /// Open the database, loading the file if it exists. A missing file is an
    /// empty database.
    pub fn open(path: &Path, files_dir: &Path) -> Result<Self, DbError> {
        let entries = match fs::read_to_string(path) {
            Ok(text) => parse(&text),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(e.into()),
        };
        Ok(Self {
            path: path.to_path_buf(),
            files_dir: files_dir.to_path_buf(),
            entries,
        })
    }

    /// Insert an entry, overwriting any existing row with the same name.
    pub fn add(&mut self, entry: InstalledEntry) -> Result<(), DbError> {
        match self.entries.iter_mut().find(|e| e.name == entry.name) {
            Some(existing) => *existing = entry,
            None => self.entries.push(entry),
        }
        self.save()
    }

    /// Remove the row and its file list. A missing row is not an error.
    pub fn remove(&mut self, name: &str) -> Result<(), DbError> {
        let before = self.entries.len();
        self.entries.retain(|e| e.name != name);
        if self.entries.len() == before {
            return Ok(());
        }
        let _ = fs::remove_file(self.file_list_path(name));
        self.save()
    }

    pub fn find(&self, name: &str) -> Option<&InstalledEntry> {
        self.entries.iter().find(|e| e.name == name)
    }

    pub fn all(&self) -> &[InstalledEntry] {
        &self.entries
    }

    /// Update the state of an existing row. A row that does not exist yet is
    /// a no-op; the install path adds it once the package lands.
    pub fn set_state(&mut self, name: &str, state: PackageState) -> Result<(), DbError> {
        match self.entries.iter_mut().find(|e| e.name == name) {
            Some(entry) => {
                entry.state = state;
                self.save()
            }
            None => {
                tracing::debug!(package = name, state = %state, "state change for unrecorded package");
                Ok(())
            }
        }
    }

    /// Rows whose name or description contains `pattern`.
    pub fn find_matching(&self, pattern: &str) -> Vec<&InstalledEntry> {
        self.entries
            .iter()
            .filter(|e| e.name.contains(pattern) || e.description.contains(pattern))
            .collect()
    }

    fn save(&self) -> Result<(), DbError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = fs::File::create(&self.path)?;
        writeln!(file, "# kiln installed packages")?;
        writeln!(
            file,
            "# name\tversion\tdescription\tinstalled_at\tinstalled_size\tstate"
        )?;
        for entry in &self.entries {
            writeln!(
                file,
                "{}\t{}\t{}\t{}\t{}\t{}",
                entry.name,
                sanitize(&entry.version),
                sanitize(&entry.description),
                entry.installed_at,
                entry.installed_size,
                entry.state.as_u8()
            )?;
        }
        Ok(())
    }

    fn file_list_path(&self, name: &str) -> PathBuf {
        self.files_dir.join(format!("{name}.list"))
    }

    /// Persist the list of absolute paths a package placed on disk.
    pub fn write_file_list(&self, name: &str, paths: &[PathBuf]) -> Result<(), DbError> {
        fs::create_dir_all(&self.files_dir)?;
        let mut file = fs::File::create(self.file_list_path(name))?;
        for path in paths {
            writeln!(file, "{}", path.display())?;
        }
        Ok(())
    }

    /// Read a package's file list; missing list means no files recorded.
    pub fn read_file_list(&self, name: &str) -> Result<Vec<PathBuf>, DbError> {
        match fs::read_to_string(self.file_list_path(name)) {
            Ok(text) => Ok(text
                .lines()
                .filter(|l| !l.trim().is_empty())
                .map(PathBuf::from)
                .collect()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }
}

fn sanitize(field: &str) -> String {
    field.replace(['\t', '\n', '\r'], " ")
}

fn parse(text: &str) -> Vec<InstalledEntry> {
    let mut entries = Vec::new();
    for line in text.lines() {
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let fields: Vec<&str> = line.split('\t').collect();
        if fields.len() < 3 || fields[0].is_empty() {
            tracing::warn!(line, "discarding malformed database line");
            continue;
        }
        entries.push(InstalledEntry {
            name: fields[0].to_string(),
            version: fields[1].to_string(),
            description: fields[2].to_string(),
            installed_at: fields.get(3).and_then(|f| f.parse().ok()).unwrap_or(0),
            installed_size: fields.get(4).and_then(|f| f.parse().ok()).unwrap_or(0),
            state: fields
                .get(5)
                .and_then(|f| f.parse().ok())
                .map(PackageState::from_u8)
                .unwrap_or_default(),
        });
    }
    entries
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn entry(name: &str) -> InstalledEntry {
        InstalledEntry {
            name: name.to_string(),
            version: "1.0.0".to_string(),
            description: format!("the {name} package"),
            installed_at: 1_700_000_000,
            installed_size: 4096,
            state: PackageState::Installed,
        }
    }

    fn open(dir: &Path) -> Database {
        Database::open(&dir.join("installed.txt"), &dir.join("files")).unwrap()
    }

    #[test]
    fn missing_file_is_empty_database() {
        let dir = tempdir().unwrap();
        let db = open(dir.path());
        assert!(db.all().is_empty());
    }

    #[test]
    fn add_find_round_trip() {
        let dir = tempdir().unwrap();
        let mut db = open(dir.path());
        let e = entry("zlib");
        db.add(e.clone()).unwrap();
        assert_eq!(db.find("zlib"), Some(&e));
        assert!(db.find("other").is_none());
    }

    #[test]
    fn add_overwrites_same_name() {
        let dir = tempdir().unwrap();
        let mut db = open(dir.path());
        db.add(entry("zlib")).unwrap();
        let mut updated = entry("zlib");
        updated.version = "2.0.0".to_string();
        db.add(updated).unwrap();
        assert_eq!(db.all().len(), 1);
        assert_eq!(db.find("zlib").unwrap().version, "2.0.0");
    }

    #[test]
    fn remove_is_idempotent() {
        let dir = tempdir().unwrap();
        let mut db = open(dir.path());
        db.add(entry("zlib")).unwrap();
        db.remove("zlib").unwrap();
        assert!(db.find("zlib").is_none());
        db.remove("zlib").unwrap();
        db.remove("never-existed").unwrap();
    }

    #[test]
    fn persists_and_reloads_identically() {
        let dir = tempdir().unwrap();
        let mut db = open(dir.path());
        db.add(entry("zlib")).unwrap();
        db.add(entry("ncurses")).unwrap();
        db.set_state("ncurses", PackageState::Broken).unwrap();

        let reloaded = open(dir.path());
        assert_eq!(reloaded.all(), db.all());
        assert_eq!(reloaded.find("ncurses").unwrap().state, PackageState::Broken);
    }

    #[test]
    fn tolerant_load_accepts_short_lines_and_drops_garbage() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("installed.txt");
        fs::write(
            &path,
            "# header\n\
             vim\t9.1.0\tan editor\n\
             broken line without tabs\n\
             \n\
             zlib\t1.3.1\tcompression\t1700000000\t2048\t5\n",
        )
        .unwrap();

        let db = Database::open(&path, &dir.path().join("files")).unwrap();
        assert_eq!(db.all().len(), 2);
        let vim = db.find("vim").unwrap();
        assert_eq!(vim.installed_at, 0);
        assert_eq!(vim.state, PackageState::Unknown);
        assert_eq!(db.find("zlib").unwrap().state, PackageState::Installed);
    }

    #[test]
    fn set_state_on_unknown_package_is_noop() {
        let dir = tempdir().unwrap();
        let mut db = open(dir.path());
        db.set_state("ghost", PackageState::Failed).unwrap();
        assert!(db.all().is_empty());
    }

    #[test]
    fn descriptions_with_tabs_survive_round_trip() {
        let dir = tempdir().unwrap();
        let mut db = open(dir.path());
        let mut e = entry("odd");
        e.description = "tab\there".to_string();
        db.add(e).unwrap();

        let reloaded = open(dir.path());
        assert_eq!(reloaded.find("odd").unwrap().description, "tab here");
    }

    #[test]
    fn file_list_round_trip() {
        let dir = tempdir().unwrap();
        let mut db = open(dir.path());
        db.add(entry("zlib")).unwrap();
        let paths = vec![
            PathBuf::from("/usr/local/lib/libz.so"),
            PathBuf::from("/usr/local/include/zlib.h"),
        ];
        db.write_file_list("zlib", &paths).unwrap();
        assert_eq!(db.read_file_list("zlib").unwrap(), paths);

        db.remove("zlib").unwrap();
        assert!(db.read_file_list("zlib").unwrap().is_empty());
    }

    #[test]
    fn state_ordinals_are_stable() {
        for (state, ordinal) in [
            (PackageState::Unknown, 0),
            (PackageState::Available, 1),
            (PackageState::Downloading, 2),
            (PackageState::Building, 3),
            (PackageState::Installing, 4),
            (PackageState::Installed, 5),
            (PackageState::Failed, 6),
            (PackageState::Broken, 7),
        ] {
            assert_eq!(state.as_u8(), ordinal);
            assert_eq!(PackageState::from_u8(ordinal), state);
        }
    }
}
