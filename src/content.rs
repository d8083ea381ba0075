use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::error::{Error, IoResultExt, Result};
use crate::fs::{fsync_dir, walk_error, StagedFile};
use crate::hash::{ContentHasher, Hash, CHUNK_SIZE};

/// outcome of a streaming insert
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PutOutcome {
    /// fingerprint of the bytes that were consumed
    pub hash: Hash,
    /// number of bytes consumed from the reader
    pub size: u64,
    /// true if the blob was new and actually written
    pub written: bool,
}

/// fingerprint-keyed blob storage with insert-if-absent semantics
///
/// blobs live at `contents/XX/YYYY...`. every write goes through a staged
/// temp file that is fsynced and renamed into place, so a blob is either
/// fully present or absent.
#[derive(Debug, Clone)]
pub struct ContentStore {
    root: PathBuf,
    tmp: PathBuf,
}

impl ContentStore {
    pub fn new(root: PathBuf, tmp: PathBuf) -> Self {
        Self { root, tmp }
    }

    /// get the filesystem path to a blob
    pub fn path_of(&self, hash: &Hash) -> PathBuf {
        let (dir, file) = hash.to_path_components();
        self.root.join(dir).join(file)
    }

    /// check if a blob exists
    pub fn exists(&self, hash: &Hash) -> bool {
        self.path_of(hash).is_file()
    }

    /// store `content` under `hash` unless a blob with that key is already present
    ///
    /// the key is taken as given; returns true if the blob was written.
    pub fn put(&self, hash: &Hash, content: &[u8]) -> Result<bool> {
        let blob_path = self.path_of(hash);

        // deduplication: if blob already exists, we're done
        if blob_path.exists() {
            return Ok(false);
        }

        let (staged, mut tmp_file) = StagedFile::create(self.tmp_file())?;
        tmp_file.write_all(content).with_store_path(staged.path())?;
        tmp_file.sync_all().with_store_path(staged.path())?;
        drop(tmp_file);

        self.install(staged, &blob_path)?;
        Ok(true)
    }

    /// stream a reader into the store, keyed by the hash of what was read
    ///
    /// `source` names the reader in error messages. the staged temp file is
    /// removed on every failure path.
    pub fn put_streaming<R: Read>(&self, reader: &mut R, source: &Path) -> Result<PutOutcome> {
        // for streaming, we need to write to temp first, then compute hash
        let (staged, mut tmp_file) = StagedFile::create(self.tmp_file())?;

        let mut hasher = ContentHasher::new();
        let mut size = 0u64;
        let mut buf = vec![0u8; CHUNK_SIZE];
        loop {
            let n = reader.read(&mut buf).with_path(source)?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
            tmp_file.write_all(&buf[..n]).with_store_path(staged.path())?;
            size += n as u64;
        }
        tmp_file.sync_all().with_store_path(staged.path())?;
        drop(tmp_file);

        let hash = hasher.finalize();
        let blob_path = self.path_of(&hash);

        // dedup check; dropping the guard discards the temp copy
        if blob_path.exists() {
            return Ok(PutOutcome {
                hash,
                size,
                written: false,
            });
        }

        self.install(staged, &blob_path)?;
        Ok(PutOutcome {
            hash,
            size,
            written: true,
        })
    }

    /// read blob content
    pub fn get(&self, hash: &Hash) -> Result<Vec<u8>> {
        let path = self.path_of(hash);
        fs::read(&path).map_err(|e| not_found_or_io(e, hash, path))
    }

    /// read blob content into a writer (streaming)
    pub fn read_to<W: Write>(&self, hash: &Hash, writer: &mut W) -> Result<u64> {
        let path = self.path_of(hash);
        let mut file = File::open(&path).map_err(|e| not_found_or_io(e, hash, path.clone()))?;

        let mut buf = vec![0u8; CHUNK_SIZE];
        let mut total = 0u64;
        loop {
            let n = file.read(&mut buf).with_path(&path)?;
            if n == 0 {
                break;
            }
            writer.write_all(&buf[..n]).with_path(&path)?;
            total += n as u64;
        }
        Ok(total)
    }

    /// size in bytes of a stored blob
    pub fn size(&self, hash: &Hash) -> Result<u64> {
        let path = self.path_of(hash);
        fs::metadata(&path)
            .map(|m| m.len())
            .map_err(|e| not_found_or_io(e, hash, path))
    }

    /// remove a blob, returning the number of bytes freed
    ///
    /// no reference counting happens here; the caller must know the blob is unreferenced.
    pub fn delete(&self, hash: &Hash) -> Result<u64> {
        let path = self.path_of(hash);
        let size = self.size(hash)?;
        fs::remove_file(&path).with_path(&path)?;

        // drop the shard directory once it empties
        if let Some(shard) = path.parent() {
            let empty = fs::read_dir(shard)
                .map(|mut e| e.next().is_none())
                .unwrap_or(false);
            if empty {
                let _ = fs::remove_dir(shard);
            } else {
                fsync_dir(shard).with_path(shard)?;
            }
        }

        Ok(size)
    }

    /// every fingerprint currently stored
    pub fn list(&self) -> Result<Vec<Hash>> {
        let mut hashes = Vec::new();

        if !self.root.exists() {
            return Ok(hashes);
        }

        for entry in WalkDir::new(&self.root).min_depth(2).max_depth(2) {
            let entry = entry.map_err(|e| walk_error(&self.root, e))?;

            if !entry.file_type().is_file() {
                continue;
            }

            // reconstruct hash from path: contents/XX/YYYYYY...
            let path = entry.path();
            let file_name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
            let parent_name = path
                .parent()
                .and_then(|p| p.file_name())
                .and_then(|n| n.to_str())
                .unwrap_or("");

            let hex = format!("{}{}", parent_name, file_name);
            if let Ok(hash) = Hash::from_hex(&hex) {
                hashes.push(hash);
            }
        }

        hashes.sort();
        Ok(hashes)
    }

    /// sum of all stored blob sizes
    pub fn total_size(&self) -> Result<u64> {
        let mut total = 0;
        for hash in self.list()? {
            total += self.size(&hash)?;
        }
        Ok(total)
    }

    fn tmp_file(&self) -> PathBuf {
        self.tmp.join(uuid::Uuid::new_v4().to_string())
    }

    /// rename a staged temp file to its final location
    fn install(&self, staged: StagedFile, blob_path: &Path) -> Result<()> {
        let blob_dir = blob_path.parent().unwrap_or(&self.root);

        // ensure directory exists
        fs::create_dir_all(blob_dir).with_store_path(blob_dir)?;

        staged.install(blob_path)?;
        fsync_dir(blob_dir).with_store_path(blob_dir)
    }
}

fn not_found_or_io(e: std::io::Error, hash: &Hash, path: PathBuf) -> Error {
    if e.kind() == std::io::ErrorKind::NotFound {
        Error::ContentNotFound(*hash)
    } else {
        Error::Io { path, source: e }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::hash_bytes;
    use tempfile::tempdir;

    fn test_content_store() -> (tempfile::TempDir, ContentStore) {
        let dir = tempdir().unwrap();
        let root = dir.path().join("contents");
        let tmp = dir.path().join("tmp");
        fs::create_dir_all(&root).unwrap();
        fs::create_dir_all(&tmp).unwrap();
        (dir, ContentStore::new(root, tmp))
    }

    #[test]
    fn test_put_and_get() {
        let (_dir, content) = test_content_store();

        let data = b"hello, world!";
        let hash = hash_bytes(data);
        assert!(content.put(&hash, data).unwrap());

        assert!(content.exists(&hash));
        assert_eq!(content.get(&hash).unwrap(), data);
    }

    #[test]
    fn test_put_is_idempotent() {
        let (_dir, content) = test_content_store();

        let data = b"duplicate content";
        let hash = hash_bytes(data);
        assert!(content.put(&hash, data).unwrap());
        assert!(!content.put(&hash, data).unwrap());

        assert_eq!(content.list().unwrap(), vec![hash]);
    }

    #[test]
    fn test_path_structure() {
        let (_dir, content) = test_content_store();

        let hash = hash_bytes(b"test");
        content.put(&hash, b"test").unwrap();
        let path = content.path_of(&hash);

        // path should be contents/XX/YYYY...
        let hex = hash.to_hex();
        assert!(path.ends_with(format!("{}/{}", &hex[..2], &hex[2..])));
        assert!(path.is_file());
    }

    #[test]
    fn test_get_nonexistent() {
        let (_dir, content) = test_content_store();

        let result = content.get(&Hash::ZERO);
        assert!(matches!(result, Err(Error::ContentNotFound(_))));
        assert!(matches!(content.size(&Hash::ZERO), Err(Error::ContentNotFound(_))));
    }

    #[test]
    fn test_streaming_put() {
        let (_dir, content) = test_content_store();

        let data = b"streaming content test";
        let mut cursor = std::io::Cursor::new(data.as_slice());

        let outcome = content.put_streaming(&mut cursor, Path::new("<memory>")).unwrap();
        assert_eq!(outcome.hash, hash_bytes(data));
        assert_eq!(outcome.size, data.len() as u64);
        assert!(outcome.written);

        // second insert of identical bytes is deduplicated
        let mut cursor = std::io::Cursor::new(data.as_slice());
        let again = content.put_streaming(&mut cursor, Path::new("<memory>")).unwrap();
        assert!(!again.written);
        assert_eq!(again.hash, outcome.hash);

        // the staged temp files are gone
        let leftovers = fs::read_dir(&content.tmp).unwrap().count();
        assert_eq!(leftovers, 0);
    }

    #[test]
    fn test_read_to_writer() {
        let (_dir, content) = test_content_store();

        let data = b"content to stream out";
        let hash = hash_bytes(data);
        content.put(&hash, data).unwrap();

        let mut output = Vec::new();
        let bytes_read = content.read_to(&hash, &mut output).unwrap();

        assert_eq!(bytes_read, data.len() as u64);
        assert_eq!(output, data);
    }

    #[test]
    fn test_delete() {
        let (_dir, content) = test_content_store();

        let data = b"to be removed";
        let hash = hash_bytes(data);
        content.put(&hash, data).unwrap();

        let freed = content.delete(&hash).unwrap();
        assert_eq!(freed, data.len() as u64);
        assert!(!content.exists(&hash));

        // the emptied shard directory is cleaned up too
        assert!(!content.path_of(&hash).parent().unwrap().exists());

        assert!(matches!(content.delete(&hash), Err(Error::ContentNotFound(_))));
    }

    #[test]
    fn test_total_size_and_list() {
        let (_dir, content) = test_content_store();

        assert_eq!(content.total_size().unwrap(), 0);

        for data in [&b"a"[..], b"bb", b"cccc"] {
            content.put(&hash_bytes(data), data).unwrap();
        }

        assert_eq!(content.list().unwrap().len(), 3);
        assert_eq!(content.total_size().unwrap(), 7);
    }

    #[test]
    fn test_failed_install_leaves_no_temp_file() {
        let dir = tempdir().unwrap();
        let tmp = dir.path().join("tmp");
        fs::create_dir(&tmp).unwrap();
        // a plain file where the shard directories should go
        let root = dir.path().join("contents");
        fs::write(&root, "not a directory").unwrap();
        let content = ContentStore::new(root, tmp.clone());

        let mut cursor = std::io::Cursor::new(b"payload".as_slice());
        let err = content
            .put_streaming(&mut cursor, Path::new("<memory>"))
            .unwrap_err();
        assert!(matches!(err, Error::StoreIo { .. }));
        assert!(!err.is_skippable());

        let err = content.put(&hash_bytes(b"payload"), b"payload").unwrap_err();
        assert!(matches!(err, Error::StoreIo { .. }));

        assert_eq!(fs::read_dir(&tmp).unwrap().count(), 0);
    }

    #[test]
    fn test_missing_staging_area_is_store_error() {
        let dir = tempdir().unwrap();
        let root = dir.path().join("contents");
        fs::create_dir(&root).unwrap();
        let content = ContentStore::new(root, dir.path().join("missing-tmp"));

        let mut cursor = std::io::Cursor::new(b"payload".as_slice());
        let err = content
            .put_streaming(&mut cursor, Path::new("<memory>"))
            .unwrap_err();

        assert!(matches!(err, Error::StoreIo { .. }));
        assert!(!err.is_skippable());
    }

    #[test]
    fn test_failed_read_leaves_no_temp_file() {
        struct FailingReader;
        impl Read for FailingReader {
            fn read(&mut self, _buf: &mut [u8]) -> std::io::Result<usize> {
                Err(std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"))
            }
        }

        let (_dir, content) = test_content_store();
        let err = content
            .put_streaming(&mut FailingReader, Path::new("source.txt"))
            .unwrap_err();

        // source-side failures keep their io classification
        assert!(matches!(err, Error::Io { ref path, .. } if path == Path::new("source.txt")));
        assert!(err.is_skippable());
        assert_eq!(fs::read_dir(&content.tmp).unwrap().count(), 0);
    }
}
