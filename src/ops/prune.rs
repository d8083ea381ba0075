use tracing::{info, warn};

use crate::catalog::SnapshotId;
use crate::error::Result;
use crate::store::Store;

/// prune statistics
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PruneStats {
    pub files_removed: usize,
    pub contents_removed: usize,
    pub bytes_freed: u64,
}

/// remove a snapshot and reclaim content no remaining snapshot references
///
/// the catalog deletion is committed first. blobs are only considered for
/// removal afterwards, against the references that survived, so a failure
/// part way through leaves orphaned blobs and never a dangling entry.
pub fn prune(store: &mut Store, id: SnapshotId) -> Result<PruneStats> {
    let candidates = store.catalog().fingerprints_of(id)?;

    let (content, catalog) = store.parts_mut();
    let files_removed = catalog.delete_snapshot(id)?;

    // mark: everything still referenced
    let reachable = catalog.all_fingerprints_in_use();

    // sweep: candidates nobody else uses
    let mut stats = PruneStats {
        files_removed,
        ..Default::default()
    };
    let mut unreferenced: Vec<_> = candidates.difference(&reachable).copied().collect();
    unreferenced.sort();

    for hash in unreferenced {
        match content.delete(&hash) {
            Ok(size) => {
                stats.contents_removed += 1;
                stats.bytes_freed += size;
            }
            Err(e) => warn!(hash = %hash, error = %e, "failed to remove unreferenced content"),
        }
    }

    info!(
        snapshot = %id,
        files = stats.files_removed,
        contents = stats.contents_removed,
        bytes = stats.bytes_freed,
        "snapshot pruned"
    );
    Ok(stats)
}
