use crate::catalog::SnapshotId;
use crate::error::{Error, Result};
use crate::hash::Hash;
use crate::store::Store;

/// one file of a snapshot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LsEntry {
    pub path: String,
    pub hash: Hash,
    /// content size, or `None` when the blob is missing from the store
    pub size: Option<u64>,
}

/// list the files of a snapshot, sorted by path
pub fn ls(store: &Store, id: SnapshotId) -> Result<Vec<LsEntry>> {
    let entries = store.catalog().list_file_entries(id)?;

    entries
        .into_iter()
        .map(|entry| {
            let size = match store.content().size(&entry.hash) {
                Ok(size) => Some(size),
                Err(Error::ContentNotFound(_)) => None,
                Err(e) => return Err(e),
            };
            Ok(LsEntry {
                path: entry.path,
                hash: entry.hash,
                size,
            })
        })
        .collect()
}

impl std::fmt::Display for LsEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let size = match self.size {
            Some(size) => size.to_string(),
            None => "-".to_string(),
        };
        write!(f, "{} {:>10} {}", self.hash, size, self.path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::hash_bytes;
    use crate::ops::snapshot;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_ls_snapshot() {
        let dir = tempdir().unwrap();
        let mut store = Store::init(&dir.path().join("backups.db")).unwrap();

        let source = dir.path().join("source");
        fs::create_dir_all(source.join("docs")).unwrap();
        fs::write(source.join("docs/readme.md"), "# hi").unwrap();
        fs::write(source.join("main.rs"), "fn main() {}").unwrap();
        let (id, _) = snapshot(&mut store, &source).unwrap();

        let entries = ls(&store, id).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].path, "docs/readme.md");
        assert_eq!(entries[0].hash, hash_bytes(b"# hi"));
        assert_eq!(entries[0].size, Some(4));
        assert_eq!(entries[1].path, "main.rs");

        let line = entries[1].to_string();
        assert!(line.starts_with(&hash_bytes(b"fn main() {}").to_hex()));
        assert!(line.ends_with(" main.rs"));
    }

    #[test]
    fn test_ls_unknown_snapshot() {
        let dir = tempdir().unwrap();
        let store = Store::init(&dir.path().join("backups.db")).unwrap();

        assert!(matches!(
            ls(&store, SnapshotId::new(1)),
            Err(Error::SnapshotNotFound(_))
        ));
    }
}
