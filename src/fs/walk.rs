use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::error::{Error, Result};

/// a regular file found under a snapshot root
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFile {
    /// forward-slash separated path relative to the root
    pub relative: String,
    /// absolute path on disk
    pub path: PathBuf,
}

/// recursive iterator over the regular files below a directory
///
/// symlinks are not followed and non-regular files are passed over. entries
/// are yielded in file-name order. an `Err` item concerns one entry only; the
/// walk carries on after it.
pub struct SourceWalk {
    root: PathBuf,
    inner: walkdir::IntoIter,
    exclude: Vec<glob::Pattern>,
    skip: Option<String>,
}

impl SourceWalk {
    pub fn new(root: &Path, exclude: Vec<glob::Pattern>) -> Self {
        let inner = WalkDir::new(root)
            .min_depth(1)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter();
        Self {
            root: root.to_path_buf(),
            inner,
            exclude,
            skip: None,
        }
    }

    /// leave out `dir` and everything below it, if it lies inside the root
    ///
    /// paths are compared canonicalized, so relative and symlinked spellings
    /// of the same directory match.
    pub fn skip_dir(mut self, dir: &Path) -> Self {
        if let (Ok(root), Ok(dir)) = (self.root.canonicalize(), dir.canonicalize()) {
            self.skip = relative_path(&root, &dir).ok();
        }
        self
    }

    fn is_excluded(&self, relative: &str) -> bool {
        self.exclude.iter().any(|p| p.matches(relative))
    }
}

impl Iterator for SourceWalk {
    type Item = Result<SourceFile>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let entry = match self.inner.next()? {
                Ok(entry) => entry,
                Err(e) => return Some(Err(walk_error(&self.root, e))),
            };

            let relative = match relative_path(&self.root, entry.path()) {
                Ok(relative) => relative,
                Err(e) => {
                    if entry.file_type().is_dir() {
                        self.inner.skip_current_dir();
                    }
                    return Some(Err(e));
                }
            };

            if entry.file_type().is_dir() && self.skip.as_deref() == Some(relative.as_str()) {
                self.inner.skip_current_dir();
                continue;
            }

            if self.is_excluded(&relative) {
                if entry.file_type().is_dir() {
                    self.inner.skip_current_dir();
                }
                continue;
            }

            if !entry.file_type().is_file() {
                continue;
            }

            return Some(Ok(SourceFile {
                relative,
                path: entry.into_path(),
            }));
        }
    }
}

/// platform-neutral relative path of `path` below `root`
pub fn relative_path(root: &Path, path: &Path) -> Result<String> {
    let stripped = path
        .strip_prefix(root)
        .map_err(|_| Error::InvalidEntry(path.display().to_string()))?;

    let mut parts = Vec::new();
    for component in stripped.components() {
        let part = component
            .as_os_str()
            .to_str()
            .ok_or_else(|| Error::InvalidEntry(format!("non-utf8 name: {}", path.display())))?;
        parts.push(part);
    }

    if parts.is_empty() {
        return Err(Error::InvalidEntry(path.display().to_string()));
    }
    Ok(parts.join("/"))
}

pub(crate) fn walk_error(root: &Path, e: walkdir::Error) -> Error {
    let path = e.path().unwrap_or(root).to_path_buf();
    Error::Io {
        path,
        source: e
            .into_io_error()
            .unwrap_or_else(|| std::io::Error::new(std::io::ErrorKind::Other, "walkdir error")),
    }
}
