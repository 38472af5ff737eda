//! Typed, encrypted preferences layered over a [`PlainStore`].
//!
//! Every scalar is encoded with [`Scalar`], sealed by [`CryptoCodec`] and
//! stored as one base64 token. String sets are stored as a set of tokens,
//! one per element. Writes go through a [`SecureEditor`], which encrypts
//! eagerly and hands a [`Batch`] to the store only on `commit`/`apply`.

use std::{
    collections::{BTreeMap, BTreeSet},
    fmt, mem,
    ops::Deref,
};

use cloak_core::{
    codec::{CodecError, Scalar, Value, ValueKind},
    notify::{Listener, ListenerId},
    store::{Batch, Entry, PlainStore},
};
use thiserror::Error;
use tracing::{debug, instrument};
use zeroize::Zeroizing;

use crate::{
    crypto::{CryptoCodec, CryptoError},
    key_provider::{get_or_create_key_pair, KeyError, KeyHandle, KeyStore, DEFAULT_ALIAS},
};

/// Failures surfaced by [`SecurePreferences`] and [`SecureEditor`].
/// Messages name the key and operation, never the value.
#[derive(Debug, Error)]
pub enum PrefsError {
    #[error("could not provision key pair {alias}: {source}")]
    KeyProvisioning {
        alias: String,
        #[source]
        source: KeyError,
    },
    #[error("could not {operation} preference {key}: {source}")]
    Crypto {
        operation: &'static str,
        key: String,
        #[source]
        source: CryptoError,
    },
    #[error("preference {key} holds a malformed payload: {source}")]
    MalformedPayload {
        key: String,
        #[source]
        source: CodecError,
    },
    #[error("preference {key} is not stored as a {expected}")]
    EntryKindMismatch { key: String, expected: &'static str },
    #[error("{operation} is not allowed on a read-only string set")]
    UnsupportedMutation { operation: &'static str },
    #[error("{operation} is not supported")]
    OperationNotSupported { operation: &'static str },
}

/// Read-only snapshot of a string set preference.
///
/// Derefs to the underlying `BTreeSet` for reading. The mutating methods
/// exist only to fail: a snapshot never changes and never shares state with
/// the store. Use [`StringSet::to_mutable`] for an editable copy.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StringSet {
    values: BTreeSet<String>,
}

impl StringSet {
    pub fn insert(&mut self, _value: impl Into<String>) -> Result<bool, PrefsError> {
        Err(read_only("insert"))
    }

    pub fn remove(&mut self, _value: &str) -> Result<bool, PrefsError> {
        Err(read_only("remove"))
    }

    pub fn retain<F: FnMut(&String) -> bool>(&mut self, _keep: F) -> Result<(), PrefsError> {
        Err(read_only("retain"))
    }

    pub fn clear(&mut self) -> Result<(), PrefsError> {
        Err(read_only("clear"))
    }

    /// Independent, editable copy of the values.
    pub fn to_mutable(&self) -> BTreeSet<String> {
        self.values.clone()
    }
}

fn read_only(operation: &'static str) -> PrefsError {
    PrefsError::UnsupportedMutation { operation }
}

impl Deref for StringSet {
    type Target = BTreeSet<String>;

    fn deref(&self) -> &Self::Target {
        &self.values
    }
}

impl From<BTreeSet<String>> for StringSet {
    fn from(values: BTreeSet<String>) -> Self {
        Self { values }
    }
}

impl<S: Into<String>> FromIterator<S> for StringSet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self {
            values: iter.into_iter().map(Into::into).collect(),
        }
    }
}

impl<'a> IntoIterator for &'a StringSet {
    type Item = &'a String;
    type IntoIter = std::collections::btree_set::Iter<'a, String>;

    fn into_iter(self) -> Self::IntoIter {
        self.values.iter()
    }
}

impl PartialEq<BTreeSet<String>> for StringSet {
    fn eq(&self, other: &BTreeSet<String>) -> bool {
        &self.values == other
    }
}

/// Encrypted preferences facade. Reads decrypt on demand; writes go through
/// [`SecurePreferences::edit`].
pub struct SecurePreferences<S: PlainStore> {
    store: S,
    codec: CryptoCodec,
}

impl<S: PlainStore> SecurePreferences<S> {
    /// Open over `store` with the key pair under [`DEFAULT_ALIAS`],
    /// generating it on first use.
    pub fn open<K: KeyStore + ?Sized>(store: S, key_store: &K) -> Result<Self, PrefsError> {
        Self::open_with_alias(store, key_store, DEFAULT_ALIAS)
    }

    pub fn open_with_alias<K: KeyStore + ?Sized>(
        store: S,
        key_store: &K,
        alias: &str,
    ) -> Result<Self, PrefsError> {
        let key = get_or_create_key_pair(key_store, alias).map_err(|source| {
            PrefsError::KeyProvisioning {
                alias: alias.to_string(),
                source,
            }
        })?;
        Ok(Self::with_key(store, key))
    }

    /// Use an already provisioned key pair.
    pub fn with_key(store: S, key: KeyHandle) -> Self {
        Self {
            store,
            codec: CryptoCodec::new(key),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn key(&self) -> &KeyHandle {
        self.codec.key()
    }

    pub fn crypto(&self) -> &CryptoCodec {
        &self.codec
    }

    pub fn get_string(&self, key: &str, default: &str) -> Result<String, PrefsError> {
        Ok(self
            .read_scalar::<String>(key)?
            .unwrap_or_else(|| default.to_string()))
    }

    pub fn get_int(&self, key: &str, default: i32) -> Result<i32, PrefsError> {
        Ok(self.read_scalar(key)?.unwrap_or(default))
    }

    pub fn get_long(&self, key: &str, default: i64) -> Result<i64, PrefsError> {
        Ok(self.read_scalar(key)?.unwrap_or(default))
    }

    pub fn get_float(&self, key: &str, default: f32) -> Result<f32, PrefsError> {
        Ok(self.read_scalar(key)?.unwrap_or(default))
    }

    pub fn get_boolean(&self, key: &str, default: bool) -> Result<bool, PrefsError> {
        Ok(self.read_scalar(key)?.unwrap_or(default))
    }

    /// Decrypt every element of the set under `key`, or hand back `default`
    /// when absent. Either way the result is read-only.
    pub fn get_string_set(
        &self,
        key: &str,
        default: impl Into<StringSet>,
    ) -> Result<StringSet, PrefsError> {
        match self.read_set(key)? {
            Some(values) => Ok(StringSet::from(values)),
            None => Ok(default.into()),
        }
    }

    /// Read `key` as `kind` without a default.
    pub fn get_value(&self, key: &str, kind: ValueKind) -> Result<Option<Value>, PrefsError> {
        let value = match kind {
            ValueKind::Int => self.read_scalar(key)?.map(Value::Int),
            ValueKind::Long => self.read_scalar(key)?.map(Value::Long),
            ValueKind::Float => self.read_scalar(key)?.map(Value::Float),
            ValueKind::Bool => self.read_scalar(key)?.map(Value::Bool),
            ValueKind::String => self.read_scalar(key)?.map(Value::String),
            ValueKind::StringSet => self.read_set(key)?.map(Value::StringSet),
        };
        Ok(value)
    }

    /// Presence check only; nothing is decrypted.
    pub fn contains(&self, key: &str) -> bool {
        self.store.contains(key)
    }

    /// Not supported: entries carry no type information, so there is no
    /// safe way to decode them generically.
    pub fn get_all(&self) -> Result<BTreeMap<String, Value>, PrefsError> {
        Err(PrefsError::OperationNotSupported {
            operation: "get_all",
        })
    }

    pub fn edit(&self) -> SecureEditor<'_, S> {
        SecureEditor {
            store: &self.store,
            codec: &self.codec,
            batch: Batch::new(),
        }
    }

    pub fn register_listener(&self, listener: Listener) -> ListenerId {
        self.store.add_listener(listener)
    }

    pub fn unregister_listener(&self, id: ListenerId) -> bool {
        self.store.remove_listener(id)
    }

    #[instrument(level = "debug", skip_all, fields(key = %key, kind = %T::KIND))]
    fn read_scalar<T: Scalar>(&self, key: &str) -> Result<Option<T>, PrefsError> {
        match self.store.entry(key) {
            None => Ok(None),
            Some(Entry::Single(token)) => self.open_token(key, &token).map(Some),
            Some(Entry::Set(_)) => Err(PrefsError::EntryKindMismatch {
                key: key.to_string(),
                expected: T::KIND.name(),
            }),
        }
    }

    #[instrument(level = "debug", skip_all, fields(key = %key))]
    fn read_set(&self, key: &str) -> Result<Option<BTreeSet<String>>, PrefsError> {
        match self.store.entry(key) {
            None => Ok(None),
            Some(Entry::Set(tokens)) => tokens
                .iter()
                .map(|token| self.open_token::<String>(key, token))
                .collect::<Result<BTreeSet<_>, _>>()
                .map(Some),
            Some(Entry::Single(_)) => Err(PrefsError::EntryKindMismatch {
                key: key.to_string(),
                expected: ValueKind::StringSet.name(),
            }),
        }
    }

    fn open_token<T: Scalar>(&self, key: &str, token: &str) -> Result<T, PrefsError> {
        let payload = self
            .codec
            .decrypt(token)
            .map_err(|source| PrefsError::Crypto {
                operation: "decrypt",
                key: key.to_string(),
                source,
            })?;
        T::decode(&payload).map_err(|source| PrefsError::MalformedPayload {
            key: key.to_string(),
            source,
        })
    }
}

impl<S: PlainStore> fmt::Debug for SecurePreferences<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecurePreferences")
            .field("key", self.codec.key())
            .finish_non_exhaustive()
    }
}

/// One edit session. Values are encrypted as soon as they are put; nothing
/// reaches the store until `commit` or `apply`.
pub struct SecureEditor<'a, S: PlainStore> {
    store: &'a S,
    codec: &'a CryptoCodec,
    batch: Batch,
}

impl<'a, S: PlainStore> SecureEditor<'a, S> {
    #[instrument(level = "debug", skip_all, fields(key = %key))]
    pub fn put_string(&mut self, key: &str, value: &str) -> Result<&mut Self, PrefsError> {
        let token = self.seal(key, value.as_bytes())?;
        self.batch.put_string(key, token);
        Ok(self)
    }

    #[instrument(level = "debug", skip_all, fields(key = %key))]
    pub fn put_int(&mut self, key: &str, value: i32) -> Result<&mut Self, PrefsError> {
        self.put_scalar(key, &value)
    }

    #[instrument(level = "debug", skip_all, fields(key = %key))]
    pub fn put_long(&mut self, key: &str, value: i64) -> Result<&mut Self, PrefsError> {
        self.put_scalar(key, &value)
    }

    #[instrument(level = "debug", skip_all, fields(key = %key))]
    pub fn put_float(&mut self, key: &str, value: f32) -> Result<&mut Self, PrefsError> {
        self.put_scalar(key, &value)
    }

    #[instrument(level = "debug", skip_all, fields(key = %key))]
    pub fn put_boolean(&mut self, key: &str, value: bool) -> Result<&mut Self, PrefsError> {
        self.put_scalar(key, &value)
    }

    /// Each element becomes its own token. `None` removes the entry.
    #[instrument(level = "debug", skip_all, fields(key = %key))]
    pub fn put_string_set(
        &mut self,
        key: &str,
        values: Option<&BTreeSet<String>>,
    ) -> Result<&mut Self, PrefsError> {
        let tokens = match values {
            Some(values) => Some(
                values
                    .iter()
                    .map(|value| self.seal(key, value.as_bytes()))
                    .collect::<Result<BTreeSet<_>, _>>()?,
            ),
            None => None,
        };
        self.batch.put_string_set(key, tokens);
        Ok(self)
    }

    #[instrument(level = "debug", skip_all, fields(key = %key))]
    pub fn put_value(&mut self, key: &str, value: &Value) -> Result<&mut Self, PrefsError> {
        match value {
            Value::Int(v) => self.put_int(key, *v),
            Value::Long(v) => self.put_long(key, *v),
            Value::Float(v) => self.put_float(key, *v),
            Value::Bool(v) => self.put_boolean(key, *v),
            Value::String(v) => self.put_string(key, v),
            Value::StringSet(values) => self.put_string_set(key, Some(values)),
        }
    }

    #[instrument(level = "debug", skip_all, fields(key = %key))]
    pub fn remove(&mut self, key: &str) -> &mut Self {
        self.batch.remove(key);
        self
    }

    /// Clear the whole store on flush, dropping anything queued so far in
    /// this editor.
    #[instrument(level = "debug", skip_all)]
    pub fn clear(&mut self) -> &mut Self {
        self.batch.clear();
        self
    }

    /// Number of queued operations.
    pub fn pending(&self) -> usize {
        self.batch.len()
    }

    /// Flush synchronously; returns the store's verdict.
    #[instrument(level = "debug", skip_all, fields(pending = self.batch.len()))]
    pub fn commit(&mut self) -> bool {
        let batch = mem::take(&mut self.batch);
        let queued = batch.len();
        let committed = self.store.commit(batch);
        debug!(queued, committed, "committed preference batch");
        committed
    }

    /// Hand the batch to the store's background flush.
    #[instrument(level = "debug", skip_all, fields(pending = self.batch.len()))]
    pub fn apply(&mut self) {
        let batch = mem::take(&mut self.batch);
        debug!(queued = batch.len(), "applying preference batch");
        self.store.apply(batch);
    }

    fn put_scalar<T: Scalar>(&mut self, key: &str, value: &T) -> Result<&mut Self, PrefsError> {
        let payload = Zeroizing::new(value.encode());
        let token = self.seal(key, &payload)?;
        self.batch.put_string(key, token);
        Ok(self)
    }

    fn seal(&self, key: &str, payload: &[u8]) -> Result<String, PrefsError> {
        self.codec
            .encrypt(payload)
            .map_err(|source| PrefsError::Crypto {
                operation: "encrypt",
                key: key.to_string(),
                source,
            })
    }
}

impl<S: PlainStore> fmt::Debug for SecureEditor<'_, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecureEditor")
            .field("pending", &self.batch.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use cloak_core::store::InMemoryPlainStore;

    use super::*;
    use crate::key_provider::InMemoryKeyStore;

    fn prefs() -> SecurePreferences<InMemoryPlainStore> {
        SecurePreferences::open(InMemoryPlainStore::new(), &InMemoryKeyStore::new())
            .expect("open")
    }

    fn set(values: &[&str]) -> BTreeSet<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    #[test]
    fn absent_keys_return_defaults_without_crypto() {
        let prefs = prefs();

        assert_eq!(prefs.get_string("s", "fallback").unwrap(), "fallback");
        assert_eq!(prefs.get_int("i", -1).unwrap(), -1);
        assert_eq!(prefs.get_long("l", i64::MIN).unwrap(), i64::MIN);
        assert_eq!(prefs.get_float("f", 1.5).unwrap(), 1.5);
        assert!(prefs.get_boolean("b", true).unwrap());
        assert_eq!(prefs.get_string_set("set", set(&["d"])).unwrap(), set(&["d"]));
        assert_eq!(prefs.get_value("v", ValueKind::Int).unwrap(), None);
        assert_eq!(prefs.crypto().operation_count(), 0);
    }

    #[test]
    fn typed_values_round_trip() {
        let prefs = prefs();
        prefs
            .edit()
            .put_string("s", "héllo")
            .unwrap()
            .put_int("i_min", i32::MIN)
            .unwrap()
            .put_int("i_max", i32::MAX)
            .unwrap()
            .put_long("l_min", i64::MIN)
            .unwrap()
            .put_long("l_max", i64::MAX)
            .unwrap()
            .put_float("f", f32::MAX)
            .unwrap()
            .put_boolean("t", true)
            .unwrap()
            .put_boolean("n", false)
            .unwrap()
            .put_string("empty", "")
            .unwrap()
            .commit();

        assert_eq!(prefs.get_string("s", "").unwrap(), "héllo");
        assert_eq!(prefs.get_int("i_min", 0).unwrap(), i32::MIN);
        assert_eq!(prefs.get_int("i_max", 0).unwrap(), i32::MAX);
        assert_eq!(prefs.get_long("l_min", 0).unwrap(), i64::MIN);
        assert_eq!(prefs.get_long("l_max", 0).unwrap(), i64::MAX);
        assert_eq!(prefs.get_float("f", 0.0).unwrap(), f32::MAX);
        assert!(prefs.get_boolean("t", false).unwrap());
        assert!(!prefs.get_boolean("n", true).unwrap());
        assert_eq!(prefs.get_string("empty", "default").unwrap(), "");
    }

    #[test]
    fn stored_entries_are_not_plaintext() {
        let prefs = prefs();
        prefs.edit().put_int("age", 42).unwrap().commit();

        let raw = prefs.store().get("age").expect("raw entry");
        assert_ne!(raw, "42");
        assert_ne!(raw, STANDARD.encode(42i32.to_be_bytes()));
        assert_eq!(STANDARD.decode(&raw).unwrap().len(), crate::crypto::MIN_SEALED_LEN + 4);
        assert_eq!(prefs.get_int("age", -1).unwrap(), 42);
    }

    #[test]
    fn later_put_wins_and_clear_drops_earlier_puts() {
        let prefs = prefs();
        prefs
            .edit()
            .put_int("k", 1)
            .unwrap()
            .put_int("k", 2)
            .unwrap()
            .commit();
        assert_eq!(prefs.get_int("k", 0).unwrap(), 2);

        let mut editor = prefs.edit();
        editor.put_int("other", 1).unwrap().clear();
        assert_eq!(editor.pending(), 1);
        assert!(editor.commit());
        assert!(!prefs.contains("k"));
        assert!(!prefs.contains("other"));
    }

    #[test]
    fn uncommitted_edits_are_invisible() {
        let prefs = prefs();
        let mut editor = prefs.edit();
        editor.put_string("draft", "x").unwrap();

        assert!(!prefs.contains("draft"));
        editor.commit();
        assert!(prefs.contains("draft"));
        assert_eq!(editor.pending(), 0);
        assert!(editor.commit(), "second commit forwards an empty batch");
    }

    #[test]
    fn string_sets_are_stored_element_by_element() {
        let prefs = prefs();
        let values = set(&["a", "b", "c"]);
        prefs
            .edit()
            .put_string_set("letters", Some(&values))
            .unwrap()
            .commit();

        let tokens = prefs.store().get_set("letters").expect("raw set");
        assert_eq!(tokens.len(), 3);
        for token in &tokens {
            assert!(!values.contains(token));
        }

        // Any token on its own decrypts to one element.
        let mut seen: Vec<String> = tokens
            .iter()
            .rev()
            .map(|t| String::decode(&prefs.crypto().decrypt(t).unwrap()).unwrap())
            .collect();
        seen.sort();
        assert_eq!(seen, vec!["a", "b", "c"]);

        assert_eq!(prefs.get_string_set("letters", StringSet::default()).unwrap(), values);
    }

    #[test]
    fn null_set_removes_entry() {
        let prefs = prefs();
        prefs
            .edit()
            .put_string_set("tags", Some(&set(&["x"])))
            .unwrap()
            .commit();
        assert!(prefs.contains("tags"));

        prefs.edit().put_string_set("tags", None).unwrap().commit();
        assert!(!prefs.contains("tags"));
        assert!(prefs.store().entry("tags").is_none());
    }

    #[test]
    fn returned_sets_reject_mutation() {
        let prefs = prefs();
        prefs
            .edit()
            .put_string_set("tags", Some(&set(&["x", "y"])))
            .unwrap()
            .commit();

        let mut stored = prefs.get_string_set("tags", StringSet::default()).unwrap();
        assert!(matches!(
            stored.insert("z"),
            Err(PrefsError::UnsupportedMutation { operation: "insert" })
        ));
        assert!(matches!(
            stored.remove("x"),
            Err(PrefsError::UnsupportedMutation { .. })
        ));
        assert!(matches!(
            stored.clear(),
            Err(PrefsError::UnsupportedMutation { .. })
        ));
        assert!(matches!(
            stored.retain(|_| false),
            Err(PrefsError::UnsupportedMutation { .. })
        ));

        let mut defaulted = prefs.get_string_set("missing", set(&["d"])).unwrap();
        assert!(defaulted.insert("e").is_err());

        let mut copy = stored.to_mutable();
        copy.insert("z".to_string());
        assert_eq!(stored.len(), 2);
        assert_eq!(
            prefs.get_string_set("tags", StringSet::default()).unwrap(),
            set(&["x", "y"])
        );
    }

    #[test]
    fn wrong_entry_shape_is_an_error() {
        let prefs = prefs();
        prefs
            .edit()
            .put_string("single", "v")
            .unwrap()
            .put_string_set("many", Some(&set(&["v"])))
            .unwrap()
            .commit();

        assert!(matches!(
            prefs.get_string("many", ""),
            Err(PrefsError::EntryKindMismatch { .. })
        ));
        assert!(matches!(
            prefs.get_string_set("single", StringSet::default()),
            Err(PrefsError::EntryKindMismatch { .. })
        ));
    }

    #[test]
    fn corrupted_token_is_an_error_not_a_default() {
        let prefs = prefs();
        let mut batch = Batch::new();
        batch.put_string("broken", "AAAA");
        prefs.store().commit(batch);

        let err = prefs.get_int("broken", 7).expect_err("must not fall back");
        assert!(matches!(
            err,
            PrefsError::Crypto {
                operation: "decrypt",
                ..
            }
        ));
        assert!(err.to_string().contains("broken"));
    }

    #[test]
    fn wrong_width_payload_is_malformed() {
        let prefs = prefs();
        prefs.edit().put_boolean("flag", true).unwrap().commit();

        let err = prefs.get_long("flag", 0).expect_err("1 byte is not a long");
        assert!(matches!(
            err,
            PrefsError::MalformedPayload {
                source: CodecError::Length {
                    expected: 8,
                    actual: 1,
                    ..
                },
                ..
            }
        ));
    }

    #[test]
    fn error_messages_do_not_leak_values() {
        let prefs = prefs();
        prefs
            .edit()
            .put_string("pin", "s3cr3t-value")
            .unwrap()
            .commit();

        let err = prefs.get_int("pin", 0).expect_err("width mismatch");
        let rendered = format!("{err} {err:?}");
        assert!(!rendered.contains("s3cr3t-value"));
        assert!(rendered.contains("pin"));
    }

    #[test]
    fn dynamic_values_round_trip() {
        let prefs = prefs();
        let values = [
            ("i", Value::Int(-5)),
            ("l", Value::Long(1 << 40)),
            ("f", Value::Float(0.25)),
            ("b", Value::Bool(true)),
            ("s", Value::String("txt".into())),
            ("set", Value::StringSet(set(&["p", "q"]))),
        ];

        let mut editor = prefs.edit();
        for (key, value) in &values {
            editor.put_value(key, value).unwrap();
        }
        assert!(editor.commit());

        for (key, value) in &values {
            assert_eq!(
                prefs.get_value(key, value.kind()).unwrap().as_ref(),
                Some(value)
            );
        }
    }

    #[derive(Clone, Default)]
    struct CapturedLogs(std::sync::Arc<std::sync::Mutex<Vec<u8>>>);

    impl std::io::Write for CapturedLogs {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn edits_are_traced_by_key_without_values() {
        use tracing_subscriber::fmt::format::FmtSpan;

        let logs = CapturedLogs::default();
        let writer = logs.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_ansi(false)
            .without_time()
            .with_span_events(FmtSpan::CLOSE)
            .with_writer(move || writer.clone())
            .finish();

        tracing::subscriber::with_default(subscriber, || {
            let prefs = prefs();
            prefs
                .edit()
                .put_string("pin", "s3cr3t-value")
                .unwrap()
                .put_int("attempts", 31337)
                .unwrap()
                .remove("stale")
                .commit();
            assert_eq!(prefs.get_string("pin", "").unwrap(), "s3cr3t-value");
        });

        let output = String::from_utf8(logs.0.lock().unwrap().clone()).unwrap();
        assert!(output.contains("put_string{key=pin}"));
        assert!(output.contains("put_int{key=attempts}"));
        assert!(output.contains("remove{key=stale}"));
        assert!(output.contains("commit{pending=3}"));
        assert!(!output.contains("s3cr3t-value"));
    }

    #[test]
    fn get_all_is_unsupported() {
        let prefs = prefs();
        assert!(matches!(
            prefs.get_all(),
            Err(PrefsError::OperationNotSupported { operation: "get_all" })
        ));
    }

    #[test]
    fn provisioning_failure_is_fatal() {
        struct BrokenKeyStore;

        impl KeyStore for BrokenKeyStore {
            fn has_entry(&self, _alias: &str) -> Result<bool, KeyError> {
                Err(KeyError::Keyring("service unavailable".into()))
            }

            fn generate_key_pair(
                &self,
                _alias: &str,
                _validity: crate::key_provider::ValidityWindow,
            ) -> Result<(), KeyError> {
                unreachable!("never reached when has_entry fails")
            }

            fn private_key_entry(
                &self,
                alias: &str,
            ) -> Result<crate::key_provider::PrivateKeyEntry, KeyError> {
                Err(KeyError::NotFound {
                    alias: alias.to_string(),
                })
            }
        }

        let err = SecurePreferences::open(InMemoryPlainStore::new(), &BrokenKeyStore)
            .expect_err("no key, no facade");
        assert!(matches!(
            err,
            PrefsError::KeyProvisioning {
                source: KeyError::Keyring(_),
                ..
            }
        ));
    }
}
