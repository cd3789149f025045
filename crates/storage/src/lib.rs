//! Persistence for protocol state.
//!
//! State is kept as named sections of serialized JSON. A commit writes every
//! changed section plus the store metadata in one atomic batch, so a reader
//! never observes half of an operation.

use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sled::{Batch, Db, Tree};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info};

/// Layout version written with every commit.
pub const SCHEMA_VERSION: u32 = 1;

const META_KEY: &[u8] = b"meta";
const SECTION_PREFIX: &str = "section:";

/// Storage errors
#[derive(thiserror::Error, Debug)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(#[from] sled::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Schema version {found} is not supported (expected {expected})")]
    SchemaMismatch { found: u32, expected: u32 },
    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

pub type Result<T> = std::result::Result<T, StorageError>;

/// Bookkeeping stored next to the sections.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreMeta {
    pub schema_version: u32,
    pub commits: u64,
}

/// Sections serialized for one commit.
#[derive(Debug, Default)]
pub struct SectionBatch {
    sections: Vec<(String, Vec<u8>)>,
}

impl SectionBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put<T: Serialize>(&mut self, name: &str, value: &T) -> Result<()> {
        self.sections
            .push((name.to_string(), serde_json::to_vec(value)?));
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.sections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sections.is_empty()
    }

    pub fn into_sections(self) -> Vec<(String, Vec<u8>)> {
        self.sections
    }
}

/// Section store interface.
pub trait StateStore {
    fn read_section(&self, name: &str) -> Result<Option<Vec<u8>>>;

    /// Write all sections atomically and bump the commit counter.
    fn commit(&self, batch: SectionBatch) -> Result<StoreMeta>;

    fn meta(&self) -> Result<StoreMeta>;

    fn section_names(&self) -> Result<Vec<String>>;

    fn flush(&self) -> Result<()> {
        Ok(())
    }

    fn load<T: DeserializeOwned>(&self, name: &str) -> Result<Option<T>>
    where
        Self: Sized,
    {
        match self.read_section(name)? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    fn is_initialized(&self) -> Result<bool> {
        Ok(self.meta()?.commits > 0)
    }
}

fn check_schema(meta: &StoreMeta) -> Result<()> {
    if meta.commits > 0 && meta.schema_version != SCHEMA_VERSION {
        return Err(StorageError::SchemaMismatch {
            found: meta.schema_version,
            expected: SCHEMA_VERSION,
        });
    }
    Ok(())
}

fn next_meta(previous: &StoreMeta) -> StoreMeta {
    StoreMeta {
        schema_version: SCHEMA_VERSION,
        commits: previous.commits + 1,
    }
}

// -----------------------------------------------------------------------------
// Sled backend
// -----------------------------------------------------------------------------

/// Sled-backed implementation
pub struct SledStateStore {
    db: Db,
    state: Tree,
}

impl SledStateStore {
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let db = sled::open(path)?;
        let state = db.open_tree("state")?;
        let store = Self { db, state };
        check_schema(&store.meta()?)?;
        Ok(store)
    }

    fn section_key(name: &str) -> Vec<u8> {
        format!("{SECTION_PREFIX}{name}").into_bytes()
    }
}

impl StateStore for SledStateStore {
    fn read_section(&self, name: &str) -> Result<Option<Vec<u8>>> {
        Ok(self
            .state
            .get(Self::section_key(name))?
            .map(|v| v.to_vec()))
    }

    fn commit(&self, batch: SectionBatch) -> Result<StoreMeta> {
        let meta = next_meta(&self.meta()?);
        let mut writes = Batch::default();
        let count = batch.len();
        for (name, bytes) in batch.into_sections() {
            writes.insert(Self::section_key(&name), bytes);
        }
        writes.insert(META_KEY, serde_json::to_vec(&meta)?);
        self.state.apply_batch(writes)?;
        debug!(target: "storage", sections = count, commits = meta.commits, "state committed");
        Ok(meta)
    }

    fn meta(&self) -> Result<StoreMeta> {
        match self.state.get(META_KEY)? {
            Some(v) => Ok(serde_json::from_slice(&v)?),
            None => Ok(StoreMeta::default()),
        }
    }

    fn section_names(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in self.state.scan_prefix(SECTION_PREFIX.as_bytes()) {
            let (key, _) = entry?;
            let key = String::from_utf8_lossy(&key);
            if let Some(name) = key.strip_prefix(SECTION_PREFIX) {
                names.push(name.to_string());
            }
        }
        Ok(names)
    }

    fn flush(&self) -> Result<()> {
        self.db.flush()?;
        info!(target: "storage", "state flushed to disk");
        Ok(())
    }
}

// -----------------------------------------------------------------------------
// Memory backend
// -----------------------------------------------------------------------------

/// In-memory backend for tests and dry runs.
#[derive(Default)]
pub struct MemoryStateStore {
    sections: RwLock<BTreeMap<String, Vec<u8>>>,
    meta: RwLock<StoreMeta>,
    fail_commits: AtomicBool,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent commits fail with [`StorageError::Unavailable`].
    pub fn fail_commits(&self, fail: bool) {
        self.fail_commits.store(fail, Ordering::SeqCst);
    }
}

impl StateStore for MemoryStateStore {
    fn read_section(&self, name: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.sections.read().get(name).cloned())
    }

    fn commit(&self, batch: SectionBatch) -> Result<StoreMeta> {
        if self.fail_commits.load(Ordering::SeqCst) {
            return Err(StorageError::Unavailable("commits disabled".into()));
        }
        let mut sections = self.sections.write();
        let mut meta = self.meta.write();
        for (name, bytes) in batch.into_sections() {
            sections.insert(name, bytes);
        }
        *meta = next_meta(&meta);
        Ok(meta.clone())
    }

    fn meta(&self) -> Result<StoreMeta> {
        Ok(self.meta.read().clone())
    }

    fn section_names(&self) -> Result<Vec<String>> {
        Ok(self.sections.read().keys().cloned().collect())
    }
}
