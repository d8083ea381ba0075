//! high-level operations on a backup store

mod check;
mod list;
mod ls;
mod prune;
mod restore;
mod snapshot;

pub use check::{check, AffectedFile, CheckReport, CorruptContent, MissingContent};
pub use list::{list, Listing, SnapshotSummary};
pub use ls::{ls, LsEntry};
pub use prune::{prune, PruneStats};
pub use restore::{restore, RestoreStats};
pub use snapshot::{snapshot, snapshot_with_options, SnapshotOptions, SnapshotStats};
