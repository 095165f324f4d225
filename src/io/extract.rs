//! Archive extraction.
//!
//! Dispatch is by file name suffix. Every supported format strips the
//! outermost directory component so the target directory directly contains
//! the project tree.

use std::fs::{self, File};
use std::io::{self, BufReader, Read};
use std::path::{Component, Path, PathBuf};

use bzip2::read::BzDecoder;
use flate2::read::GzDecoder;
use thiserror::Error;
use xz2::read::XzDecoder;

#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("unsupported archive format: {0}")]
    UnsupportedFormat(String),

    #[error("archive error: {0}")]
    Archive(String),
}

/// Supported archive formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveFormat {
    TarGz,
    TarBz2,
    TarXz,
    Zip,
}

/// Detect the archive format from the file name suffix.
pub fn detect_format(path: &Path) -> Option<ArchiveFormat> {
    let name = path.to_string_lossy().to_lowercase();
    if name.ends_with(".tar.gz") || name.ends_with(".tgz") {
        Some(ArchiveFormat::TarGz)
    } else if name.ends_with(".tar.bz2") || name.ends_with(".tbz2") {
        Some(ArchiveFormat::TarBz2)
    } else if name.ends_with(".tar.xz") {
        Some(ArchiveFormat::TarXz)
    } else if name.ends_with(".zip") {
        Some(ArchiveFormat::Zip)
    } else {
        None
    }
}

/// Extract `archive` into `target_dir`, stripping the outer directory.
pub fn extract(archive: &Path, target_dir: &Path) -> Result<(), ExtractError> {
    let format = detect_format(archive).ok_or_else(|| {
        ExtractError::UnsupportedFormat(
            archive
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| archive.display().to_string()),
        )
    })?;

    fs::create_dir_all(target_dir)?;

    let file = File::open(archive)?;
    let reader = BufReader::new(file);
    match format {
        ArchiveFormat::TarGz => extract_tar(GzDecoder::new(reader), target_dir),
        ArchiveFormat::TarBz2 => extract_tar(BzDecoder::new(reader), target_dir),
        ArchiveFormat::TarXz => extract_tar(XzDecoder::new(reader), target_dir),
        ArchiveFormat::Zip => extract_zip(archive, target_dir),
    }
}

/// Drop the outermost path component, rejecting traversal components.
fn strip_outer(path: &Path) -> Result<Option<PathBuf>, ExtractError> {
    let mut components = path.components();
    components.next();
    let stripped: PathBuf = components
        .map(|c| match c {
            Component::Normal(part) => Ok(Path::new(part)),
            Component::CurDir => Ok(Path::new("")),
            _ => Err(ExtractError::Archive(format!(
                "unsafe path in archive: {}",
                path.display()
            ))),
        })
        .collect::<Result<PathBuf, _>>()?;
    if stripped.as_os_str().is_empty() {
        Ok(None)
    } else {
        Ok(Some(stripped))
    }
}

fn extract_tar<R: Read>(reader: R, dest_dir: &Path) -> Result<(), ExtractError> {
    let mut archive = tar::Archive::new(reader);
    archive.set_preserve_permissions(true);

    for entry in archive.entries()? {
        let mut entry = entry?;
        let entry_path = entry.path()?.into_owned();

        let Some(stripped) = strip_outer(&entry_path)? else {
            // The outer directory itself.
            continue;
        };

        let target = dest_dir.join(stripped);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        entry.unpack(&target)?;
    }

    Ok(())
}

fn extract_zip(archive_path: &Path, dest_dir: &Path) -> Result<(), ExtractError> {
    let file = File::open(archive_path)?;
    let mut archive =
        zip::ZipArchive::new(file).map_err(|e| ExtractError::Archive(e.to_string()))?;

    for index in 0..archive.len() {
        let mut entry = archive
            .by_index(index)
            .map_err(|e| ExtractError::Archive(e.to_string()))?;
        let Some(entry_path) = entry.enclosed_name().map(Path::to_path_buf) else {
            return Err(ExtractError::Archive(format!(
                "unsafe path in archive: {}",
                entry.name()
            )));
        };

        let Some(stripped) = strip_outer(&entry_path)? else {
            continue;
        };
        let target = dest_dir.join(stripped);

        if entry.is_dir() {
            fs::create_dir_all(&target)?;
            continue;
        }
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut out = File::create(&target)?;
        io::copy(&mut entry, &mut out)?;

        #[cfg(unix)]
        if let Some(mode) = entry.unix_mode() {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&target, fs::Permissions::from_mode(mode))?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::tempdir;

    fn write_tar<W: Write>(writer: W) -> tar::Builder<W> {
        let mut builder = tar::Builder::new(writer);
        append_file(&mut builder, "pkg-1.0/a/b", b"inner");
        append_file(&mut builder, "pkg-1.0/top.txt", b"top");
        builder
    }

    fn append_file<W: Write>(builder: &mut tar::Builder<W>, path: &str, data: &[u8]) {
        let mut header = tar::Header::new_gnu();
        header.set_size(data.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder.append_data(&mut header, path, data).unwrap();
    }

    fn assert_stripped_layout(dir: &Path) {
        assert_eq!(fs::read(dir.join("a/b")).unwrap(), b"inner");
        assert_eq!(fs::read(dir.join("top.txt")).unwrap(), b"top");
        assert!(!dir.join("pkg-1.0").exists());
    }

    #[test]
    fn detects_supported_suffixes() {
        assert_eq!(detect_format(Path::new("x.tar.gz")), Some(ArchiveFormat::TarGz));
        assert_eq!(detect_format(Path::new("x.tgz")), Some(ArchiveFormat::TarGz));
        assert_eq!(detect_format(Path::new("x.tar.bz2")), Some(ArchiveFormat::TarBz2));
        assert_eq!(detect_format(Path::new("x.tbz2")), Some(ArchiveFormat::TarBz2));
        assert_eq!(detect_format(Path::new("x.tar.xz")), Some(ArchiveFormat::TarXz));
        assert_eq!(detect_format(Path::new("x.zip")), Some(ArchiveFormat::Zip));
        assert_eq!(detect_format(Path::new("x.tar.zst")), None);
        assert_eq!(detect_format(Path::new("x.bin")), None);
    }

    #[test]
    fn unknown_suffix_is_rejected() {
        let dir = tempdir().unwrap();
        let archive = dir.path().join("mystery.rar");
        fs::write(&archive, b"not really").unwrap();
        let err = extract(&archive, &dir.path().join("out")).unwrap_err();
        assert!(matches!(err, ExtractError::UnsupportedFormat(_)));
    }

    #[test]
    fn tar_gz_strips_outer_directory() {
        let dir = tempdir().unwrap();
        let archive = dir.path().join("pkg.tar.gz");
        let encoder =
            flate2::write::GzEncoder::new(File::create(&archive).unwrap(), Default::default());
        write_tar(encoder).into_inner().unwrap().finish().unwrap();

        let out = dir.path().join("out");
        extract(&archive, &out).unwrap();
        assert_stripped_layout(&out);
    }

    #[test]
    fn tar_bz2_strips_outer_directory() {
        let dir = tempdir().unwrap();
        let archive = dir.path().join("pkg.tar.bz2");
        let encoder = bzip2::write::BzEncoder::new(
            File::create(&archive).unwrap(),
            bzip2::Compression::default(),
        );
        write_tar(encoder).into_inner().unwrap().finish().unwrap();

        let out = dir.path().join("out");
        extract(&archive, &out).unwrap();
        assert_stripped_layout(&out);
    }

    #[test]
    fn tar_xz_strips_outer_directory() {
        let dir = tempdir().unwrap();
        let archive = dir.path().join("pkg.tar.xz");
        let encoder = xz2::write::XzEncoder::new(File::create(&archive).unwrap(), 6);
        write_tar(encoder).into_inner().unwrap().finish().unwrap();

        let out = dir.path().join("out");
        extract(&archive, &out).unwrap();
        assert_stripped_layout(&out);
    }

    #[test]
    fn zip_strips_outer_directory() {
        let dir = tempdir().unwrap();
        let archive = dir.path().join("pkg.zip");
        let mut writer = zip::ZipWriter::new(File::create(&archive).unwrap());
        let options = zip::write::FileOptions::default();
        writer.start_file("pkg-1.0/a/b", options).unwrap();
        writer.write_all(b"inner").unwrap();
        writer.start_file("pkg-1.0/top.txt", options).unwrap();
        writer.write_all(b"top").unwrap();
        writer.finish().unwrap();

        let out = dir.path().join("out");
        extract(&archive, &out).unwrap();
        assert_stripped_layout(&out);
    }

    #[test]
    fn traversal_entries_are_rejected() {
        let dir = tempdir().unwrap();
        let archive = dir.path().join("evil.tar.gz");
        let encoder =
            flate2::write::GzEncoder::new(File::create(&archive).unwrap(), Default::default());
        let mut builder = tar::Builder::new(encoder);
        append_file(&mut builder, "pkg/../../escape", b"nope");
        builder.into_inner().unwrap().finish().unwrap();

        let err = extract(&archive, &dir.path().join("out")).unwrap_err();
        assert!(matches!(err, ExtractError::Archive(_) | ExtractError::Io(_)));
    }
}
