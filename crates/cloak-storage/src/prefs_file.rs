use std::{
    collections::BTreeMap,
    fs,
    io::{self, Write},
    path::{Path, PathBuf},
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use cloak_core::{
    notify::{ChangeNotifier, Listener, ListenerId},
    store::{apply_mutations, Batch, Entry, PlainStore},
};
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::{debug, instrument, warn};

#[derive(Debug, Error)]
pub enum PreferenceFileError {
    #[error("preference file i/o failed: {0}")]
    Io(#[from] io::Error),
    #[error("preference file is not valid JSON: {0}")]
    Parse(#[from] serde_json::Error),
}

/// JSON-file backed [`PlainStore`]. The whole map lives in memory and is
/// rewritten atomically on every flush; `apply` defers the write to the
/// store's notification thread.
#[derive(Debug, Clone)]
pub struct PreferenceFile {
    inner: Arc<Shared>,
}

#[derive(Debug)]
struct Shared {
    path: PathBuf,
    entries: Mutex<BTreeMap<String, Entry>>,
    write_lock: Mutex<()>,
    notifier: ChangeNotifier,
}

impl PreferenceFile {
    /// Load `path`, or start empty when it does not exist yet.
    #[instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub fn open(path: impl AsRef<Path>) -> Result<Self, PreferenceFileError> {
        let path = path.as_ref().to_path_buf();
        let entries = match fs::read(&path) {
            Ok(bytes) if bytes.iter().all(u8::is_ascii_whitespace) => BTreeMap::new(),
            Ok(bytes) => serde_json::from_slice(&bytes)?,
            Err(err) if err.kind() == io::ErrorKind::NotFound => BTreeMap::new(),
            Err(err) => return Err(err.into()),
        };
        debug!(entries = entries.len(), "loaded preference file");

        Ok(Self {
            inner: Arc::new(Shared {
                path,
                entries: Mutex::new(entries),
                write_lock: Mutex::new(()),
                notifier: ChangeNotifier::new("cloak-file-notify"),
            }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    /// Block until writes queued by `apply` (and listener deliveries) have run.
    pub fn wait_for_pending_writes(&self) {
        self.inner.notifier.wait_idle();
    }

    fn update(&self, batch: Batch) {
        let mut entries = lock(&self.inner.entries);
        let events = apply_mutations(&mut entries, batch.into_mutations());
        self.inner.notifier.publish(events);
    }
}

impl Shared {
    /// Write the current map. Snapshotting under the write lock keeps a
    /// slower writer from overwriting a newer state.
    fn persist(&self) -> Result<(), PreferenceFileError> {
        let _writing = lock(&self.write_lock);
        let json = serde_json::to_vec_pretty(&*lock(&self.entries))?;

        let parent = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        fs::create_dir_all(parent)?;

        let mut tmp = NamedTempFile::new_in(parent)?;
        tmp.write_all(&json)?;
        tmp.flush()?;
        tmp.persist(&self.path).map_err(|e| e.error)?;
        Ok(())
    }
}

impl PlainStore for PreferenceFile {
    fn entry(&self, key: &str) -> Option<Entry> {
        lock(&self.inner.entries).get(key).cloned()
    }

    fn keys(&self) -> Vec<String> {
        lock(&self.inner.entries).keys().cloned().collect()
    }

    /// Memory is updated even when the disk write fails; the result only
    /// reports durability.
    fn commit(&self, batch: Batch) -> bool {
        self.update(batch);
        match self.inner.persist() {
            Ok(()) => true,
            Err(err) => {
                warn!(path = %self.inner.path.display(), %err, "failed to write preference file");
                false
            }
        }
    }

    fn apply(&self, batch: Batch) {
        self.update(batch);
        let shared = Arc::clone(&self.inner);
        self.inner.notifier.execute(move || {
            if let Err(err) = shared.persist() {
                warn!(path = %shared.path.display(), %err, "deferred preference write failed");
            }
        });
    }

    fn add_listener(&self, listener: Listener) -> ListenerId {
        self.inner.notifier.subscribe(listener)
    }

    fn remove_listener(&self, id: ListenerId) -> bool {
        self.inner.notifier.unsubscribe(id)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
