use std::{
    collections::{BTreeMap, BTreeSet},
    sync::{Arc, Mutex, PoisonError},
};

use serde::{Deserialize, Serialize};

use crate::notify::{ChangeEvent, ChangeNotifier, Listener, ListenerId};

/// A value as held by a plain store: one string or a set of strings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Entry {
    Single(String),
    Set(BTreeSet<String>),
}

/// One queued write against a plain store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mutation {
    Put { key: String, value: String },
    PutSet { key: String, values: BTreeSet<String> },
    Remove { key: String },
    Clear,
}

/// Ordered batch of mutations, replayed in call order when flushed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Batch {
    mutations: Vec<Mutation>,
}

impl Batch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put_string(&mut self, key: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.mutations.push(Mutation::Put {
            key: key.into(),
            value: value.into(),
        });
        self
    }

    /// `None` stores "nothing", which removes the entry.
    pub fn put_string_set(
        &mut self,
        key: impl Into<String>,
        values: Option<BTreeSet<String>>,
    ) -> &mut Self {
        let key = key.into();
        let mutation = match values {
            Some(values) => Mutation::PutSet { key, values },
            None => Mutation::Remove { key },
        };
        self.mutations.push(mutation);
        self
    }

    pub fn remove(&mut self, key: impl Into<String>) -> &mut Self {
        self.mutations.push(Mutation::Remove { key: key.into() });
        self
    }

    /// Queue a clear of the whole store. Anything queued earlier in this
    /// batch is discarded.
    pub fn clear(&mut self) -> &mut Self {
        self.mutations.clear();
        self.mutations.push(Mutation::Clear);
        self
    }

    pub fn mutations(&self) -> &[Mutation] {
        &self.mutations
    }

    pub fn len(&self) -> usize {
        self.mutations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mutations.is_empty()
    }

    pub fn into_mutations(self) -> Vec<Mutation> {
        self.mutations
    }
}

/// Replay `mutations` onto `entries` in order and report what changed.
/// Each key is reported at most once; a clear is reported first.
pub fn apply_mutations(
    entries: &mut BTreeMap<String, Entry>,
    mutations: Vec<Mutation>,
) -> Vec<ChangeEvent> {
    let mut cleared = false;
    let mut changed: Vec<String> = Vec::new();

    for mutation in mutations {
        match mutation {
            Mutation::Put { key, value } => {
                let next = Entry::Single(value);
                if entries.get(&key) != Some(&next) {
                    touch(&key, &mut changed);
                    entries.insert(key, next);
                }
            }
            Mutation::PutSet { key, values } => {
                let next = Entry::Set(values);
                if entries.get(&key) != Some(&next) {
                    touch(&key, &mut changed);
                    entries.insert(key, next);
                }
            }
            Mutation::Remove { key } => {
                if entries.remove(&key).is_some() {
                    touch(&key, &mut changed);
                }
            }
            Mutation::Clear => {
                cleared = true;
                entries.clear();
            }
        }
    }

    let mut events = Vec::with_capacity(changed.len() + usize::from(cleared));
    if cleared {
        events.push(ChangeEvent::Cleared);
    }
    events.extend(changed.into_iter().map(|key| ChangeEvent::Changed { key }));
    events
}

fn touch(key: &str, changed: &mut Vec<String>) {
    if !changed.iter().any(|existing| existing == key) {
        changed.push(key.to_string());
    }
}

/// Contract for the unencrypted string store that encrypted preferences
/// are layered over.
pub trait PlainStore: Send + Sync {
    /// Current entry for `key`, if any.
    fn entry(&self, key: &str) -> Option<Entry>;

    /// All keys currently present.
    fn keys(&self) -> Vec<String>;

    /// Flush `batch` synchronously; returns whether it was persisted.
    fn commit(&self, batch: Batch) -> bool;

    /// Flush `batch` in the background. Completion is only observable
    /// through listeners.
    fn apply(&self, batch: Batch);

    fn add_listener(&self, listener: Listener) -> ListenerId;

    fn remove_listener(&self, id: ListenerId) -> bool;

    fn get(&self, key: &str) -> Option<String> {
        match self.entry(key) {
            Some(Entry::Single(value)) => Some(value),
            _ => None,
        }
    }

    fn get_set(&self, key: &str) -> Option<BTreeSet<String>> {
        match self.entry(key) {
            Some(Entry::Set(values)) => Some(values),
            _ => None,
        }
    }

    fn contains(&self, key: &str) -> bool {
        self.entry(key).is_some()
    }
}

/// In-memory plain store for tests and ephemeral sessions.
/// Both flush paths update memory immediately; listeners hear about it on
/// the store's notification thread.
#[derive(Debug, Clone)]
pub struct InMemoryPlainStore {
    inner: Arc<Shared>,
}

#[derive(Debug)]
struct Shared {
    entries: Mutex<BTreeMap<String, Entry>>,
    notifier: ChangeNotifier,
}

impl InMemoryPlainStore {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Shared {
                entries: Mutex::new(BTreeMap::new()),
                notifier: ChangeNotifier::new("cloak-memory-notify"),
            }),
        }
    }

    /// Copy of everything currently stored.
    pub fn snapshot(&self) -> BTreeMap<String, Entry> {
        self.entries().clone()
    }

    /// Block until queued listener deliveries have run.
    pub fn wait_for_listeners(&self) {
        self.inner.notifier.wait_idle();
    }

    fn entries(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, Entry>> {
        self.inner
            .entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn flush(&self, batch: Batch) {
        let mut entries = self.entries();
        let events = apply_mutations(&mut entries, batch.into_mutations());
        // Publish under the lock so concurrent flushes notify in the order they landed.
        self.inner.notifier.publish(events);
    }
}

impl Default for InMemoryPlainStore {
    fn default() -> Self {
        Self::new()
    }
}

impl PlainStore for InMemoryPlainStore {
    fn entry(&self, key: &str) -> Option<Entry> {
        self.entries().get(key).cloned()
    }

    fn keys(&self) -> Vec<String> {
        self.entries().keys().cloned().collect()
    }

    fn commit(&self, batch: Batch) -> bool {
        self.flush(batch);
        true
    }

    fn apply(&self, batch: Batch) {
        self.flush(batch);
    }

    fn add_listener(&self, listener: Listener) -> ListenerId {
        self.inner.notifier.subscribe(listener)
    }

    fn remove_listener(&self, id: ListenerId) -> bool {
        self.inner.notifier.unsubscribe(id)
    }
}
