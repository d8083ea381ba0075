use std::fs::File;

use chrono::{DateTime, Utc};
use tracing::info;

use crate::catalog::{Catalog, SnapshotId};
use crate::error::{IoResultExt, Result};
use crate::hash::{hash_reader, Hash};
use crate::store::Store;

/// integrity check report
#[derive(Debug, Default)]
pub struct CheckReport {
    /// blobs whose content was rehashed
    pub contents_checked: usize,
    /// blobs whose content no longer matches their key
    pub corrupt: Vec<CorruptContent>,
    /// fingerprints referenced by the catalog but absent from the store
    pub missing: Vec<MissingContent>,
}

impl CheckReport {
    /// true when no stored blob has a fingerprint mismatch
    pub fn all_valid(&self) -> bool {
        self.corrupt.is_empty()
    }

    /// true when nothing at all is wrong, missing content included
    pub fn is_ok(&self) -> bool {
        self.corrupt.is_empty() && self.missing.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorruptContent {
    pub stored: Hash,
    pub calculated: Hash,
    pub affected: Vec<AffectedFile>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MissingContent {
    pub hash: Hash,
    pub affected: Vec<AffectedFile>,
}

/// a snapshot file that references a damaged or missing blob
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AffectedFile {
    pub snapshot_id: SnapshotId,
    pub timestamp: DateTime<Utc>,
    pub path: String,
}

/// rehash every stored blob and cross-check the catalog against the store
///
/// read-only: nothing is repaired or removed.
pub fn check(store: &Store) -> Result<CheckReport> {
    let catalog = store.catalog();
    let content = store.content();
    let mut report = CheckReport::default();

    let stored = content.list()?;
    for hash in &stored {
        report.contents_checked += 1;

        let path = content.path_of(hash);
        let mut file = File::open(&path).with_path(&path)?;
        let (calculated, _) = hash_reader(&mut file, &path)?;

        if calculated != *hash {
            report.corrupt.push(CorruptContent {
                stored: *hash,
                calculated,
                affected: affected_files(catalog, hash),
            });
        }
    }

    let mut referenced: Vec<_> = catalog.all_fingerprints_in_use().into_iter().collect();
    referenced.sort();
    for hash in referenced {
        if stored.binary_search(&hash).is_err() {
            report.missing.push(MissingContent {
                hash,
                affected: affected_files(catalog, &hash),
            });
        }
    }

    info!(
        checked = report.contents_checked,
        corrupt = report.corrupt.len(),
        missing = report.missing.len(),
        "integrity check finished"
    );
    Ok(report)
}

fn affected_files(catalog: &Catalog, hash: &Hash) -> Vec<AffectedFile> {
    catalog
        .references_to(hash)
        .into_iter()
        .map(|r| AffectedFile {
            snapshot_id: r.snapshot.id,
            timestamp: r.snapshot.timestamp,
            path: r.path,
        })
        .collect()
}
