pub mod walk;
pub mod write;

pub(crate) use walk::walk_error;
pub(crate) use write::StagedFile;
pub use walk::{relative_path, SourceFile, SourceWalk};
pub use write::{destination_path, fsync_dir, prepare_directory, replace_file};
