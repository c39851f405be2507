//! Gzip tarball pack/unpack helpers.
//!
//! Directory volume payloads travel as base64-encoded gzip tar archives.
//! Unpacking verifies every entry's path stays inside the target directory
//! before anything is written; an entry that would escape (absolute path or
//! `..` component) fails the whole operation.

use crate::engine::{EngineError, Result};
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use std::path::{Component, Path};
use tracing::debug;

/// Unpack a gzip tar archive into `dest`, preserving relative paths and
/// permissions.
///
/// # Errors
///
/// Returns [`EngineError::Validation`] for a malformed archive or an entry
/// whose path escapes `dest`; [`EngineError::Io`] for filesystem failures.
pub fn unpack_archive(bytes: &[u8], dest: &Path) -> Result<()> {
    let decoder = GzDecoder::new(bytes);
    let mut archive = tar::Archive::new(decoder);
    archive.set_preserve_permissions(true);

    let entries = archive
        .entries()
        .map_err(|e| EngineError::Validation(format!("malformed archive: {}", e)))?;

    for entry in entries {
        let mut entry =
            entry.map_err(|e| EngineError::Validation(format!("malformed archive: {}", e)))?;

        let path = entry
            .path()
            .map_err(|e| EngineError::Validation(format!("malformed archive entry: {}", e)))?
            .into_owned();

        check_entry_path(&path)?;

        // unpack_in re-checks containment against the on-disk layout
        // (symlink-aware), so a skipped entry is still an escape attempt.
        let unpacked = entry.unpack_in(dest)?;
        if !unpacked {
            return Err(EngineError::Validation(format!(
                "archive entry '{}' escapes the target directory",
                path.display()
            )));
        }
    }

    debug!("Unpacked archive into {}", dest.display());
    Ok(())
}

/// Reject absolute entry paths and any `..` component.
fn check_entry_path(path: &Path) -> Result<()> {
    for component in path.components() {
        match component {
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(EngineError::Validation(format!(
                    "archive entry '{}' escapes the target directory",
                    path.display()
                )));
            }
            Component::Normal(_) | Component::CurDir => {}
        }
    }
    Ok(())
}

/// Pack a directory tree into a gzip tar archive with paths relative to
/// `dir`.
///
/// # Errors
///
/// Returns [`EngineError::Io`] if reading the tree or writing the archive
/// fails.
pub fn pack_dir(dir: &Path) -> Result<Vec<u8>> {
    let encoder = GzEncoder::new(Vec::new(), Compression::default());
    let mut builder = tar::Builder::new(encoder);
    builder.append_dir_all(".", dir)?;

    let encoder = builder.into_inner()?;
    Ok(encoder.finish()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn archive_with_entry(path: &str, contents: &[u8]) -> Vec<u8> {
        let encoder = GzEncoder::new(Vec::new(), Compression::default());
        let mut builder = tar::Builder::new(encoder);

        let mut header = tar::Header::new_gnu();
        header.set_size(contents.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder
            .append_data(&mut header, path, contents)
            .expect("append entry");

        builder.into_inner().unwrap().finish().unwrap()
    }

    #[test]
    fn test_round_trip_preserves_contents() {
        let src = tempfile::tempdir().unwrap();
        std::fs::create_dir(src.path().join("nested")).unwrap();
        std::fs::write(src.path().join("top.txt"), b"top level").unwrap();
        std::fs::write(src.path().join("nested/inner.txt"), b"inner").unwrap();

        let bytes = pack_dir(src.path()).unwrap();

        let dest = tempfile::tempdir().unwrap();
        unpack_archive(&bytes, dest.path()).unwrap();

        assert_eq!(
            std::fs::read(dest.path().join("top.txt")).unwrap(),
            b"top level"
        );
        assert_eq!(
            std::fs::read(dest.path().join("nested/inner.txt")).unwrap(),
            b"inner"
        );
    }

    #[test]
    fn test_rejects_parent_dir_entry() {
        let bytes = archive_with_entry("../../etc/passwd", b"root:x:0:0");

        let dest = tempfile::tempdir().unwrap();
        let err = unpack_archive(&bytes, dest.path()).unwrap_err();

        assert!(matches!(err, EngineError::Validation(_)));
        assert!(err.to_string().contains("escapes the target directory"));

        // Nothing may be written before the rejection
        assert_eq!(std::fs::read_dir(dest.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_rejects_garbage_bytes() {
        let dest = tempfile::tempdir().unwrap();
        let err = unpack_archive(b"definitely not gzip", dest.path()).unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
    }

    #[test]
    fn test_unpack_preserves_permissions() {
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;

            let encoder = GzEncoder::new(Vec::new(), Compression::default());
            let mut builder = tar::Builder::new(encoder);

            let mut header = tar::Header::new_gnu();
            header.set_size(5);
            header.set_mode(0o755);
            header.set_cksum();
            builder.append_data(&mut header, "run.sh", &b"exit\n"[..]).unwrap();
            let bytes = builder.into_inner().unwrap().finish().unwrap();

            let dest = tempfile::tempdir().unwrap();
            unpack_archive(&bytes, dest.path()).unwrap();

            let mode = std::fs::metadata(dest.path().join("run.sh"))
                .unwrap()
                .permissions()
                .mode();
            assert_eq!(mode & 0o777, 0o755);
        }
    }

    #[test]
    fn test_pack_empty_dir_unpacks_empty() {
        let src = tempfile::tempdir().unwrap();
        let bytes = pack_dir(src.path()).unwrap();

        let dest = tempfile::tempdir().unwrap();
        unpack_archive(&bytes, dest.path()).unwrap();
        assert_eq!(std::fs::read_dir(dest.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_garbage_after_valid_gzip_header() {
        let mut bytes = Vec::new();
        let mut encoder = GzEncoder::new(&mut bytes, Compression::default());
        encoder.write_all(b"not a tarball").unwrap();
        encoder.finish().unwrap();

        let dest = tempfile::tempdir().unwrap();
        let err = unpack_archive(&bytes, dest.path()).unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
    }
}
