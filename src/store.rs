use std::fs::File;
use std::path::{Path, PathBuf};

use nix::fcntl::{Flock, FlockArg};
use tracing::debug;

use crate::catalog::Catalog;
use crate::config::Config;
use crate::content::ContentStore;
use crate::error::{Error, IoResultExt, Result};

/// an open backup store
///
/// holds an exclusive lock on the store directory for as long as it lives;
/// dropping the handle releases the lock on every exit path.
pub struct Store {
    path: PathBuf,
    config: Config,
    catalog: Catalog,
    content: ContentStore,
    _lock: StoreLock,
}

impl Store {
    /// initialize a new store at the given path
    pub fn init(path: &Path) -> Result<Self> {
        let config_path = path.join("config.toml");
        if config_path.exists() {
            return Err(Error::StoreExists(path.to_path_buf()));
        }

        std::fs::create_dir_all(path.join("contents")).with_path(path)?;
        std::fs::create_dir_all(path.join("tmp")).with_path(path)?;

        Config::default().save(&config_path)?;
        debug!(path = %path.display(), "initialized store");

        Self::open(path)
    }

    /// open an existing store
    pub fn open(path: &Path) -> Result<Self> {
        let config_path = path.join("config.toml");
        if !config_path.exists() {
            return Err(Error::NoStore(path.to_path_buf()));
        }

        let lock = StoreLock::acquire(&path.join(".lock"))?;
        let config = Config::load(&config_path)?;
        let content = ContentStore::new(path.join("contents"), path.join("tmp"));
        let catalog = Catalog::open(path.join("catalog.cbor"), path.join("tmp"))?;

        Ok(Self {
            path: path.to_path_buf(),
            config,
            catalog,
            content,
            _lock: lock,
        })
    }

    /// open the store at `path`, creating it first if nothing is there
    pub fn open_or_init(path: &Path) -> Result<Self> {
        if path.join("config.toml").exists() {
            Self::open(path)
        } else {
            Self::init(path)
        }
    }

    /// store root path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// store configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// mutable access to configuration
    pub fn config_mut(&mut self) -> &mut Config {
        &mut self.config
    }

    /// save configuration changes
    ///
    /// exclude patterns are compiled first; an invalid one leaves the file untouched.
    pub fn save_config(&self) -> Result<()> {
        self.config.exclude_patterns()?;
        self.config.save(&self.config_path())
    }

    /// path to config.toml
    fn config_path(&self) -> PathBuf {
        self.path.join("config.toml")
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn catalog_mut(&mut self) -> &mut Catalog {
        &mut self.catalog
    }

    pub fn content(&self) -> &ContentStore {
        &self.content
    }

    /// borrow the content store and the catalog together, for operations that
    /// write blobs while recording entries
    pub fn parts_mut(&mut self) -> (&ContentStore, &mut Catalog) {
        (&self.content, &mut self.catalog)
    }
}

/// guard that holds the store lock until dropped
struct StoreLock {
    #[allow(dead_code)]
    flock: Flock<File>,
}

impl StoreLock {
    fn acquire(lock_path: &Path) -> Result<Self> {
        let file = File::create(lock_path).with_path(lock_path)?;
        let flock = Flock::lock(file, FlockArg::LockExclusiveNonblock)
            .map_err(|_| Error::LockContention)?;
        Ok(Self { flock })
    }
}
