//! File identity: a canonical path plus a (mtime, size) fingerprint.
//!
//! The fingerprint is read from the canonical entry itself with
//! `symlink_metadata`, so it never follows a final symlink.

use std::io;
use std::path::Path;
use std::time::UNIX_EPOCH;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileIdentity {
    /// Canonical path, empty when resolution failed.
    pub path: String,
    /// Modification time in whole seconds since the epoch.
    pub mtime: i64,
    pub size: u64,
}

impl FileIdentity {
    /// Resolves `path`; the result is invalid if the path cannot be
    /// canonicalized or its metadata cannot be read.
    pub fn resolve(path: impl AsRef<Path>) -> Self {
        Self::try_resolve(path).unwrap_or_default()
    }

    pub fn try_resolve(path: impl AsRef<Path>) -> io::Result<Self> {
        let canonical = std::fs::canonicalize(path.as_ref())?;
        let metadata = std::fs::symlink_metadata(&canonical)?;
        let mtime = match metadata.modified()?.duration_since(UNIX_EPOCH) {
            Ok(since) => since.as_secs() as i64,
            Err(before) => -(before.duration().as_secs() as i64),
        };
        Ok(Self {
            path: canonical.to_string_lossy().into_owned(),
            mtime,
            size: metadata.len(),
        })
    }

    pub fn is_valid(&self) -> bool {
        !self.path.is_empty()
    }

    /// Same path and same fingerprint.
    pub fn matches(&self, other: &FileIdentity) -> bool {
        self.path == other.path && self.mtime == other.mtime && self.size == other.size
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn canonicalization_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("a.c");
        std::fs::write(&file, "int x;\n").unwrap();

        let first = FileIdentity::resolve(&file);
        assert!(first.is_valid());
        let second = FileIdentity::resolve(&first.path);
        assert_eq!(first, second);
        assert_eq!(first.size, 7);
    }

    #[test]
    fn aliases_resolve_to_same_path() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        let file = dir.path().join("b.c");
        std::fs::write(&file, "").unwrap();

        let direct = FileIdentity::resolve(&file);
        let dotted = FileIdentity::resolve(dir.path().join("sub").join("..").join("./b.c"));
        assert!(direct.matches(&dotted));
    }

    #[cfg(unix)]
    #[test]
    fn symlink_resolves_to_target() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("target.c");
        std::fs::write(&target, "abc").unwrap();
        let link = dir.path().join("link.c");
        std::os::unix::fs::symlink(&target, &link).unwrap();

        let via_link = FileIdentity::resolve(&link);
        assert_eq!(via_link.path, FileIdentity::resolve(&target).path);
        assert_eq!(via_link.size, 3);
    }

    #[test]
    fn missing_file_is_invalid() {
        let dir = TempDir::new().unwrap();
        let identity = FileIdentity::resolve(dir.path().join("nope.c"));
        assert!(!identity.is_valid());
        assert_eq!(identity.mtime, 0);
        assert_eq!(identity.size, 0);
    }
}
