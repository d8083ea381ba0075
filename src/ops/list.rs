//! snapshot listing with size accounting

use std::collections::HashMap;

use tracing::warn;

use crate::catalog::Snapshot;
use crate::error::{Error, Result};
use crate::hash::Hash;
use crate::store::Store;

/// one snapshot with its size figures
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotSummary {
    pub snapshot: Snapshot,
    pub file_count: usize,
    /// bytes of all distinct content the snapshot references
    pub size: u64,
    /// bytes referenced by this snapshot and no other, reclaimable by pruning it
    pub distinct_size: u64,
}

/// all snapshots plus the size of the whole content store
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Listing {
    pub snapshots: Vec<SnapshotSummary>,
    pub total_size: u64,
}

/// list snapshots, oldest first
pub fn list(store: &Store) -> Result<Listing> {
    let catalog = store.catalog();
    let counts = catalog.snapshot_counts();
    let mut sizes = BlobSizes::new(store);

    let mut listing = Listing::default();
    for snapshot in catalog.list_snapshots() {
        let file_count = catalog.list_file_entries(snapshot.id)?.len();

        let mut size = 0;
        let mut distinct_size = 0;
        for hash in catalog.fingerprints_of(snapshot.id)? {
            let blob_size = sizes.get(&hash)?;
            size += blob_size;
            if counts.get(&hash).copied() == Some(1) {
                distinct_size += blob_size;
            }
        }

        listing.snapshots.push(SnapshotSummary {
            snapshot,
            file_count,
            size,
            distinct_size,
        });
    }

    listing.total_size = store.content().total_size()?;
    Ok(listing)
}

/// memoized blob sizes; missing blobs count as empty
struct BlobSizes<'a> {
    store: &'a Store,
    cache: HashMap<Hash, u64>,
}

impl<'a> BlobSizes<'a> {
    fn new(store: &'a Store) -> Self {
        Self {
            store,
            cache: HashMap::new(),
        }
    }

    fn get(&mut self, hash: &Hash) -> Result<u64> {
        if let Some(size) = self.cache.get(hash) {
            return Ok(*size);
        }

        let size = match self.store.content().size(hash) {
            Ok(size) => size,
            Err(Error::ContentNotFound(_)) => {
                warn!(hash = %hash, "referenced content is missing from the store");
                0
            }
            Err(e) => return Err(e),
        };
        self.cache.insert(*hash, size);
        Ok(size)
    }
}
