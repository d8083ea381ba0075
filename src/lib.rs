//! backuptool - content-addressed directory snapshots
//!
//! captures point-in-time copies of a directory tree, deduplicating identical
//! file content across snapshots by SHA-256 fingerprint.
//!
//! # Core concepts
//!
//! - **Content blob**: raw file bytes stored once under their fingerprint
//! - **File entry**: a relative path mapped to a fingerprint, owned by one snapshot
//! - **Snapshot**: an id, a creation time, and the bytes it newly stored
//! - **Catalog**: the CBOR document holding all snapshots and their entries
//!
//! # Store layout
//!
//! ```text
//! <store>/config.toml
//! <store>/catalog.cbor
//! <store>/contents/XX/YYYY...
//! <store>/tmp/
//! <store>/.lock
//! ```
//!
//! # Example usage
//!
//! ```no_run
//! use backuptool::{ops, Store};
//! use std::path::Path;
//!
//! let mut store = Store::open_or_init(Path::new("backups.db")).unwrap();
//!
//! // capture a directory
//! let (id, _stats) = ops::snapshot(&mut store, Path::new("/source")).unwrap();
//!
//! // bring it back somewhere else
//! ops::restore(&store, id, Path::new("/destination")).unwrap();
//! ```

mod catalog;
mod config;
mod content;
mod error;
mod hash;
mod store;

pub mod fs;
pub mod ops;

pub use catalog::{Catalog, FileEntry, FileReference, Snapshot, SnapshotId};
pub use config::Config;
pub use content::{ContentStore, PutOutcome};
pub use error::{Error, ErrorKind, Result};
pub use hash::{hash_bytes, hash_file, hash_reader, ContentHasher, Hash, CHUNK_SIZE};
pub use store::Store;
