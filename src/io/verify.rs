//! Artifact integrity verification.
//!
//! The digest algorithm is inferred from the declared value's length:
//! 32 hex chars is MD5, 40 is SHA-1, 64 is SHA-256. Anything else falls back
//! to SHA-256. Comparison is case-insensitive; a mismatch is fatal.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use md5::Md5;
use sha1::Sha1;
use sha2::{Digest, Sha256};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum VerifyError {
    #[error("checksum mismatch for {path}: expected {expected}, got {actual}")]
    Mismatch {
        path: String,
        expected: String,
        actual: String,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChecksumKind {
    Md5,
    Sha1,
    Sha256,
}

/// Infer the digest algorithm from the declared value's length.
pub fn detect_kind(digest: &str) -> ChecksumKind {
    match digest.len() {
        32 => ChecksumKind::Md5,
        40 => ChecksumKind::Sha1,
        _ => ChecksumKind::Sha256,
    }
}

fn hash_reader<D: Digest>(reader: &mut impl Read) -> std::io::Result<String> {
    let mut hasher = D::new();
    let mut buffer = [0u8; 8192];
    loop {
        let count = reader.read(&mut buffer)?;
        if count == 0 {
            break;
        }
        hasher.update(&buffer[..count]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Compute the hex digest of a file with the given algorithm.
pub fn file_digest(path: &Path, kind: ChecksumKind) -> std::io::Result<String> {
    let mut file = File::open(path)?;
    match kind {
        ChecksumKind::Md5 => hash_reader::<Md5>(&mut file),
        ChecksumKind::Sha1 => hash_reader::<Sha1>(&mut file),
        ChecksumKind::Sha256 => hash_reader::<Sha256>(&mut file),
    }
}

/// Verify a file against its declared digest.
pub fn verify(path: &Path, expected: &str) -> Result<(), VerifyError> {
    let kind = detect_kind(expected);
    let actual = file_digest(path, kind)?;
    if actual.eq_ignore_ascii_case(expected) {
        tracing::debug!(path = %path.display(), "checksum verified");
        Ok(())
    } else {
        Err(VerifyError::Mismatch {
            path: path.display().to_string(),
            expected: expected.to_string(),
            actual,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn detects_kind_by_length() {
        assert_eq!(detect_kind(&"a".repeat(32)), ChecksumKind::Md5);
        assert_eq!(detect_kind(&"a".repeat(40)), ChecksumKind::Sha1);
        assert_eq!(detect_kind(&"a".repeat(64)), ChecksumKind::Sha256);
        assert_eq!(detect_kind("odd"), ChecksumKind::Sha256);
    }

    #[test]
    fn verifies_known_digests() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("data");
        fs::write(&path, b"abc").unwrap();

        // Standard test vectors for "abc".
        verify(&path, "900150983cd24fb0d6963f7d28e17f72").unwrap();
        verify(&path, "a9993e364706816aba3e25717850c26c9cd0d89d").unwrap();
        verify(
            &path,
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad",
        )
        .unwrap();
    }

    #[test]
    fn comparison_is_case_insensitive() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("data");
        fs::write(&path, b"abc").unwrap();
        verify(&path, "900150983CD24FB0D6963F7D28E17F72").unwrap();
    }

    #[test]
    fn digest_of_file_round_trips() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("data");
        fs::write(&path, b"round trip me").unwrap();

        let digest = file_digest(&path, ChecksumKind::Sha256).unwrap();
        verify(&path, &digest).unwrap();
    }

    #[test]
    fn flipped_nibble_is_a_mismatch() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("data");
        fs::write(&path, b"payload").unwrap();

        let digest = file_digest(&path, ChecksumKind::Sha256).unwrap();
        let mut flipped: Vec<char> = digest.chars().collect();
        flipped[0] = if flipped[0] == '0' { '1' } else { '0' };
        let flipped: String = flipped.into_iter().collect();

        let err = verify(&path, &flipped).unwrap_err();
        assert!(matches!(err, VerifyError::Mismatch { .. }));
    }

    #[test]
    fn missing_file_is_io_error() {
        let err = verify(Path::new("/nonexistent/file"), &"a".repeat(64)).unwrap_err();
        assert!(matches!(err, VerifyError::Io(_)));
    }
}
