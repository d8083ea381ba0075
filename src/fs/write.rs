use std::fs::{self, File};
use std::path::{Component, Path, PathBuf};

use crate::catalog::validate_relative_path;
use crate::error::{Error, IoResultExt, Result};

/// resolve a catalog path to its destination below `root`
///
/// rejects anything that could land outside `root`.
pub fn destination_path(root: &Path, relative: &str) -> Result<PathBuf> {
    validate_relative_path(relative)?;

    let rel = Path::new(relative);
    if !rel.components().all(|c| matches!(c, Component::Normal(_))) {
        return Err(Error::InvalidEntry(relative.to_string()));
    }
    Ok(root.join(rel))
}

/// create a file for writing, replacing whatever regular file or symlink is there
///
/// parent directories are created as needed. a directory in the way is an error.
pub fn replace_file(path: &Path) -> Result<File> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).with_path(parent)?;
    }

    // remove existing
    if let Ok(meta) = path.symlink_metadata() {
        if meta.is_dir() {
            return Err(Error::Io {
                path: path.to_path_buf(),
                source: std::io::Error::new(
                    std::io::ErrorKind::AlreadyExists,
                    "a directory exists at the destination",
                ),
            });
        }
        fs::remove_file(path).with_path(path)?;
    }

    File::create(path).with_path(path)
}

/// ensure `path` is a writable directory, creating it if absent
pub fn prepare_directory(path: &Path) -> Result<()> {
    if path.exists() {
        let meta = fs::metadata(path).with_path(path)?;
        if !meta.is_dir() {
            return Err(Error::NotADirectory(path.to_path_buf()));
        }
        if meta.permissions().readonly() {
            return Err(Error::PermissionDenied(path.to_path_buf()));
        }
        return Ok(());
    }

    fs::create_dir_all(path).map_err(|e| match e.kind() {
        std::io::ErrorKind::PermissionDenied => Error::PermissionDenied(path.to_path_buf()),
        _ => Error::Io {
            path: path.to_path_buf(),
            source: e,
        },
    })
}

/// sync a directory to disk
pub fn fsync_dir(path: &Path) -> std::io::Result<()> {
    File::open(path)?.sync_all()
}

/// a temp file in the store's staging area, removed on drop unless kept
pub(crate) struct StagedFile {
    path: PathBuf,
    keep: bool,
}

impl StagedFile {
    /// create the file at `path`
    pub(crate) fn create(path: PathBuf) -> Result<(Self, File)> {
        let file = File::create(&path).with_store_path(&path)?;
        Ok((Self { path, keep: false }, file))
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }

    /// rename into place; the guard no longer owns the file afterwards
    pub(crate) fn install(mut self, dest: &Path) -> Result<()> {
        fs::rename(&self.path, dest).with_store_path(dest)?;
        self.keep = true;
        Ok(())
    }
}

impl Drop for StagedFile {
    fn drop(&mut self) {
        if !self.keep {
            let _ = fs::remove_file(&self.path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::tempdir;

    #[test]
    fn test_staged_file_removed_unless_installed() {
        let dir = tempdir().unwrap();

        let (staged, mut file) = StagedFile::create(dir.path().join("abandoned")).unwrap();
        file.write_all(b"partial").unwrap();
        drop(file);
        drop(staged);
        assert!(!dir.path().join("abandoned").exists());

        let (staged, mut file) = StagedFile::create(dir.path().join("staged")).unwrap();
        file.write_all(b"complete").unwrap();
        drop(file);
        staged.install(&dir.path().join("final")).unwrap();
        assert!(!dir.path().join("staged").exists());
        assert_eq!(fs::read(dir.path().join("final")).unwrap(), b"complete");
    }

    #[test]
    fn test_staged_file_failed_install_cleans_up() {
        let dir = tempdir().unwrap();

        let (staged, _file) = StagedFile::create(dir.path().join("staged")).unwrap();
        let err = staged
            .install(&dir.path().join("no/such/dir/final"))
            .unwrap_err();

        assert!(matches!(err, Error::StoreIo { .. }));
        assert!(!dir.path().join("staged").exists());
    }

    #[test]
    fn test_destination_path() {
        let root = Path::new("/restore");
        assert_eq!(
            destination_path(root, "a/b.txt").unwrap(),
            PathBuf::from("/restore/a/b.txt")
        );
        assert!(destination_path(root, "../etc/passwd").is_err());
        assert!(destination_path(root, "/etc/passwd").is_err());
        assert!(destination_path(root, "a/./b").is_err());
    }

    #[test]
    fn test_replace_file_overwrites() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested/dir/file.txt");

        replace_file(&path).unwrap().write_all(b"old content").unwrap();
        replace_file(&path).unwrap().write_all(b"new").unwrap();

        assert_eq!(fs::read(&path).unwrap(), b"new");
    }

    #[test]
    fn test_replace_file_refuses_directory() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("occupied");
        fs::create_dir(&path).unwrap();

        assert!(matches!(replace_file(&path), Err(Error::Io { .. })));
        assert!(path.is_dir());
    }

    #[test]
    fn test_prepare_directory() {
        let dir = tempdir().unwrap();
        let out = dir.path().join("a/b");
        prepare_directory(&out).unwrap();
        assert!(out.is_dir());
        prepare_directory(&out).unwrap();

        let file = dir.path().join("file");
        fs::write(&file, "x").unwrap();
        assert!(matches!(
            prepare_directory(&file),
            Err(Error::NotADirectory(_))
        ));
    }
}
