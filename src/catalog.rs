//! snapshot catalog: snapshot records and their path → fingerprint entries
//!
//! the whole catalog is a single CBOR document. reads are served from memory;
//! writes are staged in memory and made durable by [`Catalog::commit`], which
//! replaces the on-disk document atomically (temp file, fsync, rename). a
//! commit therefore lands every staged mutation or none of them.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::PathBuf;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{Error, IoResultExt, Result};
use crate::fs::{fsync_dir, StagedFile};
use crate::hash::Hash;

const CATALOG_VERSION: u32 = 1;

/// opaque, monotonically increasing snapshot identifier
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SnapshotId(u64);

impl SnapshotId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SnapshotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for SnapshotId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        s.trim()
            .parse::<u64>()
            .ok()
            .filter(|id| *id > 0)
            .map(SnapshotId)
            .ok_or_else(|| Error::InvalidSnapshotId(s.to_string()))
    }
}

/// a point-in-time capture of a directory tree
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Snapshot {
    pub id: SnapshotId,
    /// creation time
    pub timestamp: DateTime<Utc>,
    /// bytes of content newly written by the snapshot operation
    pub size: u64,
}

/// one captured file within a snapshot
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileEntry {
    pub snapshot_id: SnapshotId,
    /// forward-slash separated path relative to the snapshot root
    pub path: String,
    pub hash: Hash,
}

/// a file entry together with the snapshot that owns it
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileReference {
    pub snapshot: Snapshot,
    pub path: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
struct SnapshotRecord {
    timestamp: DateTime<Utc>,
    size: u64,
    files: BTreeMap<String, Hash>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
struct CatalogData {
    version: u32,
    next_id: u64,
    snapshots: BTreeMap<SnapshotId, SnapshotRecord>,
}

impl Default for CatalogData {
    fn default() -> Self {
        Self {
            version: CATALOG_VERSION,
            next_id: 1,
            snapshots: BTreeMap::new(),
        }
    }
}

/// the snapshot catalog
pub struct Catalog {
    path: PathBuf,
    tmp: PathBuf,
    data: CatalogData,
    staged: bool,
}

impl Catalog {
    /// open the catalog at `path`, creating an empty one if absent
    pub fn open(path: PathBuf, tmp: PathBuf) -> Result<Self> {
        let exists = path.exists();
        let data = if exists {
            load(&path)?
        } else {
            CatalogData::default()
        };

        let mut catalog = Self {
            path,
            tmp,
            data,
            staged: !exists,
        };
        if !exists {
            catalog.commit()?;
        }
        Ok(catalog)
    }

    /// allocate a new snapshot stamped with the current time
    ///
    /// the new record is committed before this returns.
    pub fn create_snapshot(&mut self) -> Result<SnapshotId> {
        self.create_snapshot_at(Utc::now())
    }

    /// allocate a new snapshot with an explicit timestamp
    pub fn create_snapshot_at(&mut self, timestamp: DateTime<Utc>) -> Result<SnapshotId> {
        let id = SnapshotId(self.data.next_id);
        self.data.next_id += 1;
        self.data.snapshots.insert(
            id,
            SnapshotRecord {
                timestamp,
                size: 0,
                files: BTreeMap::new(),
            },
        );
        self.staged = true;
        self.commit()?;

        debug!(snapshot = %id, "created snapshot record");
        Ok(id)
    }

    /// stage a path → fingerprint entry for a snapshot
    ///
    /// a second entry for the same path replaces the first. staged entries
    /// become durable on the next [`commit`](Self::commit).
    pub fn add_file_entry(&mut self, id: SnapshotId, path: &str, hash: &Hash) -> Result<()> {
        validate_relative_path(path)?;
        if *hash == Hash::ZERO {
            return Err(Error::InvalidEntry(format!("empty fingerprint for {}", path)));
        }

        let record = self
            .data
            .snapshots
            .get_mut(&id)
            .ok_or(Error::SnapshotNotFound(id))?;
        record.files.insert(path.to_string(), *hash);
        self.staged = true;
        Ok(())
    }

    /// all snapshots, by id ascending
    pub fn list_snapshots(&self) -> Vec<Snapshot> {
        self.data
            .snapshots
            .iter()
            .map(|(id, record)| to_snapshot(*id, record))
            .collect()
    }

    pub fn get_snapshot(&self, id: SnapshotId) -> Result<Snapshot> {
        self.data
            .snapshots
            .get(&id)
            .map(|record| to_snapshot(id, record))
            .ok_or(Error::SnapshotNotFound(id))
    }

    /// file entries of a snapshot, sorted by path
    pub fn list_file_entries(&self, id: SnapshotId) -> Result<Vec<FileEntry>> {
        let record = self
            .data
            .snapshots
            .get(&id)
            .ok_or(Error::SnapshotNotFound(id))?;

        Ok(record
            .files
            .iter()
            .map(|(path, hash)| FileEntry {
                snapshot_id: id,
                path: path.clone(),
                hash: *hash,
            })
            .collect())
    }

    /// record the final size of a snapshot and commit everything staged for it
    pub fn finalize_size(&mut self, id: SnapshotId, bytes: u64) -> Result<()> {
        let record = self
            .data
            .snapshots
            .get_mut(&id)
            .ok_or(Error::SnapshotNotFound(id))?;
        record.size = bytes;
        self.staged = true;
        self.commit()
    }

    /// remove a snapshot and all of its entries, committing immediately
    ///
    /// the content store is left alone. returns the number of entries removed.
    pub fn delete_snapshot(&mut self, id: SnapshotId) -> Result<usize> {
        let record = self
            .data
            .snapshots
            .remove(&id)
            .ok_or(Error::SnapshotNotFound(id))?;
        self.staged = true;
        self.commit()?;
        Ok(record.files.len())
    }

    /// fingerprints referenced by at least one entry of any snapshot
    pub fn all_fingerprints_in_use(&self) -> HashSet<Hash> {
        self.data
            .snapshots
            .values()
            .flat_map(|record| record.files.values().copied())
            .collect()
    }

    /// fingerprints referenced by one snapshot
    pub fn fingerprints_of(&self, id: SnapshotId) -> Result<HashSet<Hash>> {
        let record = self
            .data
            .snapshots
            .get(&id)
            .ok_or(Error::SnapshotNotFound(id))?;
        Ok(record.files.values().copied().collect())
    }

    /// for each fingerprint, the number of distinct snapshots referencing it
    pub fn snapshot_counts(&self) -> HashMap<Hash, usize> {
        let mut counts = HashMap::new();
        for record in self.data.snapshots.values() {
            let distinct: HashSet<&Hash> = record.files.values().collect();
            for hash in distinct {
                *counts.entry(*hash).or_insert(0) += 1;
            }
        }
        counts
    }

    /// every entry, across all snapshots, that references `hash`
    ///
    /// ordered by snapshot id, then path.
    pub fn references_to(&self, hash: &Hash) -> Vec<FileReference> {
        let mut refs = Vec::new();
        for (id, record) in &self.data.snapshots {
            for (path, entry_hash) in &record.files {
                if entry_hash == hash {
                    refs.push(FileReference {
                        snapshot: to_snapshot(*id, record),
                        path: path.clone(),
                    });
                }
            }
        }
        refs
    }

    /// whether there are mutations not yet committed
    pub fn has_staged(&self) -> bool {
        self.staged
    }

    /// make all staged mutations durable in one atomic replace
    ///
    /// on failure the in-memory catalog is rolled back to the last durable state.
    pub fn commit(&mut self) -> Result<()> {
        if !self.staged {
            return Ok(());
        }

        match self.persist() {
            Ok(()) => {
                self.staged = false;
                Ok(())
            }
            Err(e) => {
                if let Err(reload) = self.rollback() {
                    warn!(error = %reload, "failed to roll back catalog after commit failure");
                }
                Err(e)
            }
        }
    }

    /// discard staged mutations, returning to the last committed state
    pub fn rollback(&mut self) -> Result<()> {
        self.data = if self.path.exists() {
            load(&self.path)?
        } else {
            CatalogData::default()
        };
        self.staged = false;
        Ok(())
    }

    fn persist(&self) -> Result<()> {
        // atomic write: temp -> fsync -> rename
        let tmp_path = self.tmp.join(uuid::Uuid::new_v4().to_string());
        let (staged, tmp_file) = StagedFile::create(tmp_path)?;
        let mut writer = BufWriter::new(tmp_file);
        ciborium::into_writer(&self.data, &mut writer)?;
        writer.flush().with_store_path(staged.path())?;
        writer.get_ref().sync_all().with_store_path(staged.path())?;
        drop(writer);

        staged.install(&self.path)?;

        // fsync parent directory
        if let Some(parent) = self.path.parent() {
            fsync_dir(parent).with_store_path(parent)?;
        }

        Ok(())
    }
}

fn load(path: &std::path::Path) -> Result<CatalogData> {
    let file = File::open(path).with_path(path)?;
    let data: CatalogData = ciborium::from_reader(BufReader::new(file))?;
    if data.version != CATALOG_VERSION {
        return Err(Error::CorruptCatalog(format!(
            "unsupported catalog version {}",
            data.version
        )));
    }
    Ok(data)
}

fn to_snapshot(id: SnapshotId, record: &SnapshotRecord) -> Snapshot {
    Snapshot {
        id,
        timestamp: record.timestamp,
        size: record.size,
    }
}

/// check that a path is relative and free of empty, `.` and `..` parts
pub(crate) fn validate_relative_path(path: &str) -> Result<()> {
    if path.is_empty() {
        return Err(Error::InvalidEntry("empty path".to_string()));
    }
    if path.starts_with('/') || path.contains('\0') {
        return Err(Error::InvalidEntry(path.to_string()));
    }
    if path
        .split('/')
        .any(|part| part.is_empty() || part == "." || part == "..")
    {
        return Err(Error::InvalidEntry(path.to_string()));
    }
    Ok(())
}
