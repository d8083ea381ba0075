use std::fs::{self, File};
use std::path::Path;

use tracing::{debug, info, warn};

use crate::catalog::{Catalog, SnapshotId};
use crate::content::ContentStore;
use crate::error::{Error, IoResultExt, Result};
use crate::fs::SourceWalk;
use crate::hash::{hash_reader, Hash};
use crate::store::Store;

/// snapshot options
#[derive(Clone, Debug, Default)]
pub struct SnapshotOptions {
    /// skip files larger than this; overrides the store configuration
    pub max_file_size: Option<u64>,
}

/// snapshot statistics
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SnapshotStats {
    pub files_recorded: usize,
    pub files_skipped: usize,
    pub blobs_written: usize,
    pub bytes_written: u64,
}

/// capture a directory tree as a new snapshot
pub fn snapshot(store: &mut Store, target: &Path) -> Result<(SnapshotId, SnapshotStats)> {
    snapshot_with_options(store, target, &SnapshotOptions::default())
}

/// capture a directory tree as a new snapshot, with options
///
/// unreadable and oversized files are skipped with a warning. any other
/// failure aborts the snapshot and removes its record from the catalog;
/// blobs written before the failure stay behind unreferenced.
pub fn snapshot_with_options(
    store: &mut Store,
    target: &Path,
    opts: &SnapshotOptions,
) -> Result<(SnapshotId, SnapshotStats)> {
    check_target(target)?;

    let exclude = store.config().exclude_patterns()?;
    let max_file_size = opts.max_file_size.or(store.config().max_file_size);

    info!(target = %target.display(), "starting snapshot");

    // never capture the store into itself
    let walk = SourceWalk::new(target, exclude).skip_dir(store.path());

    let (content, catalog) = store.parts_mut();
    let id = catalog.create_snapshot()?;

    let result = capture(content, catalog, id, walk, max_file_size)
        .and_then(|stats| catalog.finalize_size(id, stats.bytes_written).map(|()| stats));

    match result {
        Ok(stats) => {
            info!(
                snapshot = %id,
                files = stats.files_recorded,
                skipped = stats.files_skipped,
                new_blobs = stats.blobs_written,
                new_bytes = stats.bytes_written,
                "snapshot created"
            );
            Ok((id, stats))
        }
        Err(e) => {
            abandon(catalog, id);
            Err(e)
        }
    }
}

fn check_target(target: &Path) -> Result<()> {
    let meta = match fs::metadata(target) {
        Ok(meta) => meta,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(Error::TargetNotFound(target.to_path_buf()))
        }
        Err(e) => return Err(e).with_path(target),
    };
    if !meta.is_dir() {
        return Err(Error::NotADirectory(target.to_path_buf()));
    }

    // readable means listable
    fs::read_dir(target).map_err(|e| match e.kind() {
        std::io::ErrorKind::PermissionDenied => Error::PermissionDenied(target.to_path_buf()),
        _ => Error::Io {
            path: target.to_path_buf(),
            source: e,
        },
    })?;
    Ok(())
}

fn capture(
    content: &ContentStore,
    catalog: &mut Catalog,
    id: SnapshotId,
    walk: SourceWalk,
    max_file_size: Option<u64>,
) -> Result<SnapshotStats> {
    let mut stats = SnapshotStats::default();

    for item in walk {
        let file = match item {
            Ok(file) => file,
            Err(e) => {
                warn!(error = %e, "skipping entry");
                stats.files_skipped += 1;
                continue;
            }
        };

        match store_file(content, &file.path, max_file_size) {
            Ok((hash, written)) => {
                catalog.add_file_entry(id, &file.relative, &hash)?;
                stats.files_recorded += 1;
                if let Some(bytes) = written {
                    stats.blobs_written += 1;
                    stats.bytes_written += bytes;
                }
                debug!(path = %file.relative, hash = %hash, new = written.is_some(), "recorded file");
            }
            Err(e) if e.is_skippable() => {
                warn!(path = %file.path.display(), error = %e, "skipping file");
                stats.files_skipped += 1;
            }
            Err(e) => return Err(e),
        }
    }

    Ok(stats)
}

/// fingerprint a file and make sure the store holds its content
///
/// returns the fingerprint and, when a new blob was written, its size.
fn store_file(
    content: &ContentStore,
    path: &Path,
    max_file_size: Option<u64>,
) -> Result<(Hash, Option<u64>)> {
    if let Some(limit) = max_file_size {
        let meta = fs::metadata(path).with_path(path)?;
        if meta.len() > limit {
            return Err(Error::FileTooLarge {
                path: path.to_path_buf(),
                limit,
            });
        }
    }

    let hash = {
        let mut file = File::open(path).with_path(path)?;
        hash_reader(&mut file, path)?.0
    };
    if content.exists(&hash) {
        return Ok((hash, None));
    }

    // second pass: the blob is keyed by what was actually stored
    let mut file = File::open(path).with_path(path)?;
    let outcome = content.put_streaming(&mut file, path)?;
    if outcome.hash != hash {
        warn!(path = %path.display(), "file changed while being captured");
    }
    Ok((outcome.hash, outcome.written.then_some(outcome.size)))
}

/// drop everything a failed snapshot staged, along with its record
fn abandon(catalog: &mut Catalog, id: SnapshotId) {
    if let Err(e) = catalog.rollback() {
        warn!(snapshot = %id, error = %e, "failed to discard staged entries");
        return;
    }
    if let Err(e) = catalog.delete_snapshot(id) {
        warn!(snapshot = %id, error = %e, "failed to remove abandoned snapshot");
    }
}
