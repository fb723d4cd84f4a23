//! Previous job id cache.
//!
//! One slot per user account, not per scheduler endpoint. Clients running
//! concurrently under the same account race on this slot and the last
//! writer wins; nothing here locks.

use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::error::{Result, RpcError};
use crate::job::JobId;

/// Written to a fresh store before any job has been added.
pub const NOT_SET: &str = "notset";

/// File name of the per-user cache, relative to the home directory.
pub const CACHE_FILE_NAME: &str = ".rsched-previous-job";

/// Durable storage for the previous job id.
pub trait PreviousJobStore: Send + Sync {
    /// Returns the raw stored value, or [`NOT_SET`] if nothing was stored.
    fn load(&self) -> Result<String>;
    fn store(&self, job_id: &str) -> Result<()>;
}

/// Keeps the id in a plain text file holding just the bare id.
#[derive(Debug, Clone)]
pub struct FileStore {
    path: PathBuf,
}

impl FileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// The store at `$HOME/.rsched-previous-job`.
    pub fn user_default() -> Result<Self> {
        let home = dirs::home_dir().ok_or_else(|| {
            RpcError::storage(
                CACHE_FILE_NAME,
                std::io::Error::new(ErrorKind::NotFound, "home directory not found"),
            )
        })?;
        Ok(Self::new(home.join(CACHE_FILE_NAME)))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl PreviousJobStore for FileStore {
    fn load(&self) -> Result<String> {
        match File::open(&self.path) {
            Ok(mut file) => {
                let mut contents = String::new();
                file.read_to_string(&mut contents)
                    .map_err(|e| RpcError::storage(&self.path, e))?;
                Ok(contents)
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                // Touch the file so the next writer finds it in place.
                OpenOptions::new()
                    .write(true)
                    .create(true)
                    .truncate(false)
                    .open(&self.path)
                    .map_err(|e| RpcError::storage(&self.path, e))?;
                tracing::debug!(path = %self.path.display(), "created empty job id cache");
                Ok(NOT_SET.to_string())
            }
            Err(e) => Err(RpcError::storage(&self.path, e)),
        }
    }

    fn store(&self, job_id: &str) -> Result<()> {
        let mut file = File::create(&self.path).map_err(|e| RpcError::storage(&self.path, e))?;
        file.write_all(job_id.as_bytes())
            .map_err(|e| RpcError::storage(&self.path, e))
    }
}

/// Process-local store. Clones share the same slot, so two clients built
/// from clones behave like two clients under the same user account.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    slot: std::sync::Arc<Mutex<Option<String>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_previous(job_id: &str) -> Self {
        Self {
            slot: std::sync::Arc::new(Mutex::new(Some(job_id.to_string()))),
        }
    }
}

impl PreviousJobStore for MemoryStore {
    fn load(&self) -> Result<String> {
        let slot = self.slot.lock().unwrap_or_else(|e| e.into_inner());
        Ok(slot.clone().unwrap_or_else(|| NOT_SET.to_string()))
    }

    fn store(&self, job_id: &str) -> Result<()> {
        let mut slot = self.slot.lock().unwrap_or_else(|e| e.into_inner());
        *slot = Some(job_id.to_string());
        Ok(())
    }
}

/// Lazily loaded, eagerly written view of a [`PreviousJobStore`].
pub struct JobIdCache {
    store: Box<dyn PreviousJobStore>,
    /// `None` until the store has been read once.
    loaded: Option<String>,
}

impl JobIdCache {
    pub fn new(store: impl PreviousJobStore + 'static) -> Self {
        Self {
            store: Box::new(store),
            loaded: None,
        }
    }

    /// The previously used job id, if one was ever stored.
    ///
    /// Reads the store on first use only. Later calls see the in-memory copy.
    pub fn previous(&mut self) -> Result<Option<JobId>> {
        if self.loaded.is_none() {
            self.loaded = Some(self.store.load()?);
        }
        Ok(self
            .loaded
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty() && *id != NOT_SET)
            .map(str::to_string))
    }

    /// Writes through to the store before updating the in-memory copy.
    pub fn remember(&mut self, job_id: &str) -> Result<()> {
        self.store.store(job_id)?;
        self.loaded = Some(job_id.to_string());
        Ok(())
    }
}
