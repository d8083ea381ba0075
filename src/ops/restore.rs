use std::io::{BufWriter, Write};
use std::path::Path;

use tracing::{debug, info};

use crate::catalog::SnapshotId;
use crate::error::{Error, IoResultExt, Result};
use crate::fs::{destination_path, prepare_directory, replace_file};
use crate::store::Store;

/// restore statistics
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RestoreStats {
    pub files_restored: usize,
    pub bytes_written: u64,
}

/// materialize a snapshot under `output`
///
/// every blob the snapshot needs is checked before anything is written; a
/// missing one fails the whole restore with [`Error::MissingContent`].
/// existing files at colliding paths are overwritten, everything else in
/// `output` is left alone.
pub fn restore(store: &Store, id: SnapshotId, output: &Path) -> Result<RestoreStats> {
    let entries = store.catalog().list_file_entries(id)?;

    // resolve destinations and verify content up front
    let mut plan = Vec::with_capacity(entries.len());
    for entry in &entries {
        let dest = destination_path(output, &entry.path)?;
        if !store.content().exists(&entry.hash) {
            return Err(Error::MissingContent {
                hash: entry.hash,
                path: entry.path.clone(),
            });
        }
        plan.push((entry, dest));
    }

    prepare_directory(output)?;
    info!(snapshot = %id, output = %output.display(), files = plan.len(), "restoring snapshot");

    let mut stats = RestoreStats::default();
    for (entry, dest) in plan {
        let file = replace_file(&dest)?;
        let mut writer = BufWriter::new(file);
        let bytes = store.content().read_to(&entry.hash, &mut writer)?;
        writer.flush().with_path(&dest)?;

        debug!(path = %entry.path, bytes, "restored file");
        stats.files_restored += 1;
        stats.bytes_written += bytes;
    }

    info!(snapshot = %id, files = stats.files_restored, bytes = stats.bytes_written, "restore finished");
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::ops::snapshot;
    use std::collections::BTreeMap;
    use std::fs;
    use tempfile::tempdir;
    use walkdir::WalkDir;

    fn test_store() -> (tempfile::TempDir, Store) {
        let dir = tempdir().unwrap();
        let store = Store::init(&dir.path().join("backups.db")).unwrap();
        (dir, store)
    }

    /// relative path -> bytes for every regular file below `root`
    fn read_tree(root: &Path) -> BTreeMap<String, Vec<u8>> {
        WalkDir::new(root)
            .into_iter()
            .map(|e| e.unwrap())
            .filter(|e| e.file_type().is_file())
            .map(|e| {
                let rel = e.path().strip_prefix(root).unwrap();
                (rel.to_str().unwrap().to_string(), fs::read(e.path()).unwrap())
            })
            .collect()
    }

    #[test]
    fn test_roundtrip() {
        let (dir, mut store) = test_store();

        let source = dir.path().join("source");
        fs::create_dir_all(source.join("a/b/c")).unwrap();
        fs::write(source.join("top.txt"), "top level").unwrap();
        fs::write(source.join("a/b/c/deep.bin"), [0u8, 255, 1, 254, 0, 0]).unwrap();
        fs::write(source.join("a/empty"), "").unwrap();
        fs::write(
            source.join("a/large"),
            (0..200_000u32).map(|i| (i % 251) as u8).collect::<Vec<_>>(),
        )
        .unwrap();

        let (id, _) = snapshot(&mut store, &source).unwrap();

        let output = dir.path().join("restored");
        let stats = restore(&store, id, &output).unwrap();

        assert_eq!(stats.files_restored, 4);
        assert_eq!(read_tree(&output), read_tree(&source));
    }

    #[test]
    fn test_restore_special_names() {
        let (dir, mut store) = test_store();

        let source = dir.path().join("source");
        fs::create_dir_all(source.join("level1/level2")).unwrap();
        fs::write(source.join("level1/level2/special@#$%.txt"), "special").unwrap();
        fs::write(source.join("with space & ümlaut.txt"), "unicode").unwrap();

        let (id, _) = snapshot(&mut store, &source).unwrap();

        let output = dir.path().join("restored");
        restore(&store, id, &output).unwrap();

        assert_eq!(
            fs::read_to_string(output.join("level1/level2/special@#$%.txt")).unwrap(),
            "special"
        );
        assert_eq!(
            fs::read_to_string(output.join("with space & ümlaut.txt")).unwrap(),
            "unicode"
        );
    }

    #[test]
    fn test_retried_path_replaces() {
        let (dir, mut store) = test_store();

        let source = dir.path().join("source");
        fs::create_dir(&source).unwrap();
        fs::write(source.join("file.txt"), "v1").unwrap();
        let (id, _) = snapshot(&mut store, &source).unwrap();

        // a retried write to the same path supersedes the first one
        let v2 = crate::hash::hash_bytes(b"v2");
        store.content().put(&v2, b"v2").unwrap();
        let catalog = store.catalog_mut();
        catalog.add_file_entry(id, "file.txt", &v2).unwrap();
        catalog.commit().unwrap();

        assert_eq!(store.catalog().list_file_entries(id).unwrap().len(), 1);

        let output = dir.path().join("restored");
        restore(&store, id, &output).unwrap();
        assert_eq!(fs::read_to_string(output.join("file.txt")).unwrap(), "v2");
    }

    #[test]
    fn test_restore_into_existing_directory() {
        let (dir, mut store) = test_store();

        let source = dir.path().join("source");
        fs::create_dir_all(source.join("sub")).unwrap();
        fs::write(source.join("shared.txt"), "from snapshot").unwrap();
        fs::write(source.join("sub/inner.txt"), "inner").unwrap();
        let (id, _) = snapshot(&mut store, &source).unwrap();

        let output = dir.path().join("existing");
        fs::create_dir_all(output.join("sub")).unwrap();
        fs::write(output.join("shared.txt"), "stale local content that is longer").unwrap();
        fs::write(output.join("untouched.txt"), "keep me").unwrap();

        restore(&store, id, &output).unwrap();

        assert_eq!(fs::read_to_string(output.join("shared.txt")).unwrap(), "from snapshot");
        assert_eq!(fs::read_to_string(output.join("sub/inner.txt")).unwrap(), "inner");
        assert_eq!(fs::read_to_string(output.join("untouched.txt")).unwrap(), "keep me");
    }

    #[test]
    fn test_restore_unknown_snapshot() {
        let (dir, store) = test_store();

        let output = dir.path().join("restored");
        let err = restore(&store, SnapshotId::new(9), &output).unwrap_err();

        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert!(!output.exists());
    }

    #[test]
    fn test_restore_missing_content_aborts() {
        let (dir, mut store) = test_store();

        let source = dir.path().join("source");
        fs::create_dir(&source).unwrap();
        fs::write(source.join("a.txt"), "present").unwrap();
        fs::write(source.join("b.txt"), "will vanish").unwrap();
        let (id, _) = snapshot(&mut store, &source).unwrap();

        let gone = crate::hash::hash_bytes(b"will vanish");
        store.content().delete(&gone).unwrap();

        let output = dir.path().join("restored");
        let err = restore(&store, id, &output).unwrap_err();

        assert!(matches!(err, Error::MissingContent { ref path, .. } if path == "b.txt"));
        assert_eq!(err.kind(), ErrorKind::Integrity);
        // nothing was written
        assert!(!output.exists());
    }

    #[test]
    fn test_restore_output_is_file() {
        let (dir, mut store) = test_store();

        let source = dir.path().join("source");
        fs::create_dir(&source).unwrap();
        fs::write(source.join("a"), "a").unwrap();
        let (id, _) = snapshot(&mut store, &source).unwrap();

        let output = dir.path().join("occupied");
        fs::write(&output, "not a dir").unwrap();

        assert!(matches!(
            restore(&store, id, &output),
            Err(Error::NotADirectory(_))
        ));
    }
}
