//! QueueManager - registry of named queues over one storage root.
//!
//! Layout:
//! ```text
//! <root>/<queue_id>/queue.json            QueueMeta
//! <root>/<queue_id>/entries/<id>.json     EntryRecord
//! ```
//!
//! The manager hands out at most one live `Queue` per name. The registry lock
//! is held across lookup-or-open, so concurrent callers asking for the same
//! name get the same `Arc`.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::{Config, ConfigError};
use crate::domain::{Payload, QueueId};
use crate::error::{QueueError, Result, StorageError};
use crate::impls::FsEntryStore;
use crate::impls::fs_store::write_atomic;
use crate::ports::EntryStore;
use crate::queue::{Queue, QueueOptions};

const META_FILE: &str = "queue.json";
const ENTRIES_DIR: &str = "entries";

/// Listed in place of the name when a queue's metadata cannot be read.
pub const UNKNOWN_NAME: &str = "?";

/// Identity of a queue directory, so queues can be listed without opening
/// them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueMeta {
    pub queue_id: QueueId,
    pub name: String,
    pub created: DateTime<Utc>,
}

pub struct QueueManager<P> {
    root: PathBuf,
    options: QueueOptions,
    queues: Mutex<HashMap<QueueId, Arc<Queue<P>>>>,
}

/// Manager over JSON payloads, the shape used by the default manager.
pub type JsonQueueManager = QueueManager<serde_json::Value>;

static DEFAULT_MANAGER: OnceLock<JsonQueueManager> = OnceLock::new();

/// Process-wide manager, built on first call from `Config::from_env()`.
///
/// Nothing is torn down implicitly; call `remove_all_queues` to wipe it.
/// Prefer passing an explicit `QueueManager` where the caller can.
pub fn default_manager() -> std::result::Result<&'static JsonQueueManager, ConfigError> {
    if let Some(manager) = DEFAULT_MANAGER.get() {
        return Ok(manager);
    }
    let config = Config::from_env()?;
    Ok(DEFAULT_MANAGER.get_or_init(|| QueueManager::from_config(&config)))
}

impl<P: Payload> QueueManager<P> {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self::with_options(root, QueueOptions::default())
    }

    /// `options` apply to every queue this manager opens; its
    /// `storage_path` is replaced per queue.
    pub fn with_options(root: impl Into<PathBuf>, options: QueueOptions) -> Self {
        Self {
            root: root.into(),
            options,
            queues: Mutex::new(HashMap::new()),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::with_options(
            config.root.clone(),
            QueueOptions::default().with_config(config.queue),
        )
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_for_queue_id(&self, queue_id: &QueueId) -> PathBuf {
        self.root.join(queue_id.as_str())
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<QueueId, Arc<Queue<P>>>> {
        self.queues.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// The live queue for `name`, opening (and creating on disk) if needed.
    pub fn queue_with_name(&self, name: &str) -> Result<Arc<Queue<P>>> {
        let mut queues = self.lock();
        self.open_locked(&mut queues, name, true)
    }

    /// Like `queue_with_name`, but never creates: a name with no queue under
    /// the root is `QueueNotFound`.
    pub fn existing_queue(&self, name: &str) -> Result<Arc<Queue<P>>> {
        let mut queues = self.lock();
        self.open_locked(&mut queues, name, false)
    }

    fn open_locked(
        &self,
        queues: &mut HashMap<QueueId, Arc<Queue<P>>>,
        name: &str,
        create: bool,
    ) -> Result<Arc<Queue<P>>> {
        let queue_id = QueueId::for_name(name);
        if let Some(queue) = queues.get(&queue_id) {
            return Ok(Arc::clone(queue));
        }

        let dir = self.path_for_queue_id(&queue_id);
        if !create && !dir.join(META_FILE).exists() {
            return Err(QueueError::QueueNotFound(name.to_string()));
        }
        fs::create_dir_all(&dir).map_err(|e| StorageError::io(&dir, e))?;
        self.ensure_meta(&dir, &queue_id, name)?;

        let store = FsEntryStore::open(dir.join(ENTRIES_DIR))?;
        let options = self.options.clone().with_storage_path(&dir);
        let queue = Arc::new(Queue::open(name, store, options)?);
        queues.insert(queue_id, Arc::clone(&queue));
        Ok(queue)
    }

    /// Write `queue.json` unless a readable one is already there. An
    /// unreadable file is replaced, so the queue shows up by name again.
    fn ensure_meta(&self, dir: &Path, queue_id: &QueueId, name: &str) -> Result<()> {
        let path = dir.join(META_FILE);
        match Self::read_meta(dir) {
            Ok(_) => return Ok(()),
            Err(StorageError::Io { source, .. }) if source.kind() == ErrorKind::NotFound => {}
            Err(e) => warn!(queue_id = %queue_id, error = %e, "rewriting unreadable queue metadata"),
        }
        let meta = QueueMeta {
            queue_id: queue_id.clone(),
            name: name.to_string(),
            created: self.options.clock.now(),
        };
        let bytes =
            serde_json::to_vec_pretty(&meta).map_err(|e| StorageError::serialization(&path, e))?;
        write_atomic(dir, &path, &bytes)?;
        Ok(())
    }

    fn read_meta(dir: &Path) -> std::result::Result<QueueMeta, StorageError> {
        let path = dir.join(META_FILE);
        let bytes = fs::read(&path).map_err(|e| StorageError::io(&path, e))?;
        serde_json::from_slice(&bytes).map_err(|e| StorageError::serialization(&path, e))
    }

    /// Delete every entry of `queue` and its directory, and evict it.
    pub fn remove_queue(&self, queue: &Queue<P>) -> Result<()> {
        let mut queues = self.lock();
        self.destroy(queue)?;
        queues.remove(queue.queue_id());
        Ok(())
    }

    fn destroy(&self, queue: &Queue<P>) -> Result<()> {
        let report = queue.remove_all_entries();
        if let Some((_, e)) = report.failed.into_iter().next() {
            return Err(e);
        }
        queue.store().destroy()?;
        Self::remove_dir(&self.path_for_queue_id(queue.queue_id()))?;
        info!(queue_id = %queue.queue_id(), name = queue.name(), "queue removed");
        Ok(())
    }

    fn remove_dir(dir: &Path) -> std::result::Result<(), StorageError> {
        match fs::remove_dir_all(dir) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::io(dir, e)),
        }
    }

    /// Remove every queue under the root, cached or not. Keeps going past
    /// failures and reports the first one.
    pub fn remove_all_queues(&self) -> Result<()> {
        let mut queues = self.lock();
        let mut first_error: Option<QueueError> = None;

        let cached: Vec<_> = queues.drain().collect();
        for (queue_id, queue) in cached {
            if let Err(e) = self.destroy(&queue) {
                warn!(queue_id = %queue_id, error = %e, "failed to remove queue");
                first_error = first_error.or(Some(e));
                queues.insert(queue_id, queue);
            }
        }

        for queue_id in self.discover()? {
            if queues.contains_key(&queue_id) {
                continue;
            }
            let dir = self.path_for_queue_id(&queue_id);
            if let Err(e) = Self::remove_dir(&dir) {
                warn!(queue_id = %queue_id, error = %e, "failed to remove queue directory");
                first_error = first_error.or(Some(e.into()));
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Drop the cached instance without touching storage. The next
    /// `queue_with_name` reloads it from disk (running recovery again).
    pub fn release_cache(&self, queue: &Queue<P>) -> bool {
        self.lock().remove(queue.queue_id()).is_some()
    }

    pub fn is_cached(&self, name: &str) -> bool {
        self.lock().contains_key(&QueueId::for_name(name))
    }

    /// Every queue under the root (`queue_id -> name`), cached or not. A
    /// queue whose metadata is unreadable is listed as `UNKNOWN_NAME`.
    pub fn queues(&self) -> Result<BTreeMap<QueueId, String>> {
        let cached = self.lock();
        let mut found: BTreeMap<QueueId, String> = cached
            .iter()
            .map(|(id, q)| (id.clone(), q.name().to_string()))
            .collect();
        drop(cached);

        for queue_id in self.discover()? {
            if found.contains_key(&queue_id) {
                continue;
            }
            let name = match Self::read_meta(&self.path_for_queue_id(&queue_id)) {
                Ok(meta) => meta.name,
                Err(e) => {
                    warn!(
                        queue_id = %queue_id,
                        error = %e,
                        "queue directory without readable metadata"
                    );
                    UNKNOWN_NAME.to_string()
                }
            };
            found.insert(queue_id, name);
        }
        Ok(found)
    }

    /// Queue ids of the directories under the root.
    fn discover(&self) -> Result<Vec<QueueId>> {
        let listing = match fs::read_dir(&self.root) {
            Ok(listing) => listing,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StorageError::io(&self.root, e).into()),
        };

        let mut ids = Vec::new();
        for dirent in listing {
            let dirent = dirent.map_err(|e| StorageError::io(&self.root, e))?;
            if !dirent.path().is_dir() {
                continue;
            }
            if let Some(queue_id) = dirent.file_name().to_str().and_then(QueueId::parse) {
                ids.push(queue_id);
            }
        }
        Ok(ids)
    }
}
