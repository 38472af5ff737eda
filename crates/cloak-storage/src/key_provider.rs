use std::{
    collections::HashMap,
    fmt,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex, PoisonError,
    },
};

use base64::{engine::general_purpose, Engine as _};
use chrono::{DateTime, Months, Utc};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{debug, info, instrument};
use x25519_dalek::{PublicKey, StaticSecret};
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

/// Alias the preferences key pair is provisioned under by default.
pub const DEFAULT_ALIAS: &str = "cloak-preferences-key";

const KEY_LEN: usize = 32;
const VALIDITY_MONTHS: u32 = 100 * 12;

/// Period during which a stored key pair may be used.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidityWindow {
    pub not_before: DateTime<Utc>,
    pub not_after: DateTime<Utc>,
}

impl ValidityWindow {
    /// A hundred-year window opening at `start`.
    pub fn starting_at(start: DateTime<Utc>) -> Self {
        Self {
            not_before: start,
            not_after: start
                .checked_add_months(Months::new(VALIDITY_MONTHS))
                .unwrap_or(DateTime::<Utc>::MAX_UTC),
        }
    }

    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        self.not_before <= at && at <= self.not_after
    }

    /// Only the end of the window is enforced; a clock that steps back
    /// past `not_before` must not lock the key out.
    pub fn has_expired(&self, at: DateTime<Utc>) -> bool {
        at > self.not_after
    }
}

#[derive(Debug, Error)]
pub enum KeyError {
    #[error("keyring error: {0}")]
    Keyring(String),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("generation error: {0}")]
    Generation(String),
    #[error("no key pair stored under alias {alias}")]
    NotFound { alias: String },
    #[error("a key pair already exists under alias {alias}")]
    AlreadyExists { alias: String },
    #[error("key pair {alias} expired at {not_after}")]
    Expired {
        alias: String,
        not_after: DateTime<Utc>,
    },
}

/// Key pair as handed out by a key store.
pub struct PrivateKeyEntry {
    pub secret: StaticSecret,
    pub public: PublicKey,
    pub validity: ValidityWindow,
}

impl fmt::Debug for PrivateKeyEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PrivateKeyEntry")
            .field("secret", &"[REDACTED]")
            .field("public", &fingerprint(&self.public))
            .field("validity", &self.validity)
            .finish()
    }
}

/// Platform store that generates and guards the key pair (OS keyring in
/// production; memory in tests).
pub trait KeyStore: Send + Sync {
    fn has_entry(&self, alias: &str) -> Result<bool, KeyError>;

    /// Create a pair under `alias`. Fails with `AlreadyExists` if one is
    /// present; never overwrites.
    fn generate_key_pair(&self, alias: &str, validity: ValidityWindow) -> Result<(), KeyError>;

    fn private_key_entry(&self, alias: &str) -> Result<PrivateKeyEntry, KeyError>;
}

/// Shared, read-only handle to the provisioned key pair.
#[derive(Clone)]
pub struct KeyHandle {
    inner: Arc<KeyPair>,
}

struct KeyPair {
    alias: String,
    secret: StaticSecret,
    public: PublicKey,
    validity: ValidityWindow,
}

impl KeyHandle {
    fn from_entry(alias: &str, entry: PrivateKeyEntry) -> Self {
        let PrivateKeyEntry {
            secret,
            public,
            validity,
        } = entry;
        Self {
            inner: Arc::new(KeyPair {
                alias: alias.to_string(),
                secret,
                public,
                validity,
            }),
        }
    }

    pub fn alias(&self) -> &str {
        &self.inner.alias
    }

    pub fn public_key(&self) -> &PublicKey {
        &self.inner.public
    }

    pub fn validity(&self) -> ValidityWindow {
        self.inner.validity
    }

    /// Short hex digest of the public key, safe to log.
    pub fn fingerprint(&self) -> String {
        fingerprint(&self.inner.public)
    }

    pub(crate) fn secret(&self) -> &StaticSecret {
        &self.inner.secret
    }
}

impl fmt::Debug for KeyHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyHandle")
            .field("alias", &self.inner.alias)
            .field("fingerprint", &self.fingerprint())
            .finish()
    }
}

fn fingerprint(public: &PublicKey) -> String {
    Sha256::digest(public.as_bytes())[..8]
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}

/// Return the key pair stored under `alias`, generating it first if the
/// store has none. An existing pair is never replaced.
#[instrument(skip(store))]
pub fn get_or_create_key_pair<K: KeyStore + ?Sized>(
    store: &K,
    alias: &str,
) -> Result<KeyHandle, KeyError> {
    if !store.has_entry(alias)? {
        info!(alias, "no key pair stored; generating one");
        match store.generate_key_pair(alias, ValidityWindow::starting_at(Utc::now())) {
            Ok(()) => {}
            Err(KeyError::AlreadyExists { .. }) => {
                debug!(alias, "key pair was created concurrently; reusing it");
            }
            Err(err) => return Err(err),
        }
    }

    let entry = store.private_key_entry(alias)?;
    if entry.validity.has_expired(Utc::now()) {
        return Err(KeyError::Expired {
            alias: alias.to_string(),
            not_after: entry.validity.not_after,
        });
    }

    let handle = KeyHandle::from_entry(alias, entry);
    debug!(alias, fingerprint = %handle.fingerprint(), "key pair ready");
    Ok(handle)
}

/// Serializes check-then-write provisioning across every keyring store in
/// the process.
static KEYRING_PROVISIONING: Mutex<()> = Mutex::new(());

/// OS keyring-backed key store. Uses the `keyring` crate; the alias is the
/// account name under `service`. One `keyring::Entry` is kept per alias so
/// generation and the following read go through the same credential.
pub struct KeyringKeyStore {
    service: String,
    entries: Mutex<HashMap<String, Arc<keyring::Entry>>>,
}

impl KeyringKeyStore {
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Remove the pair stored under `alias`. Returns whether one existed.
    pub fn delete_entry(&self, alias: &str) -> Result<bool, KeyError> {
        match self.entry(alias)?.delete_credential() {
            Ok(()) => Ok(true),
            Err(keyring::Error::NoEntry) => Ok(false),
            Err(err) => Err(KeyError::Keyring(err.to_string())),
        }
    }

    fn entry(&self, alias: &str) -> Result<Arc<keyring::Entry>, KeyError> {
        let mut entries = self
            .entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(entry) = entries.get(alias) {
            return Ok(Arc::clone(entry));
        }
        let entry = keyring::Entry::new(&self.service, alias)
            .map(Arc::new)
            .map_err(|e| KeyError::Keyring(e.to_string()))?;
        entries.insert(alias.to_string(), Arc::clone(&entry));
        Ok(entry)
    }

    fn read_blob(&self, alias: &str) -> Result<Option<Zeroizing<String>>, KeyError> {
        match self.entry(alias)?.get_password() {
            Ok(secret) => Ok(Some(Zeroizing::new(secret))),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(err) => Err(KeyError::Keyring(err.to_string())),
        }
    }
}

impl fmt::Debug for KeyringKeyStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyringKeyStore")
            .field("service", &self.service)
            .finish_non_exhaustive()
    }
}

impl KeyStore for KeyringKeyStore {
    fn has_entry(&self, alias: &str) -> Result<bool, KeyError> {
        Ok(self.read_blob(alias)?.is_some())
    }

    fn generate_key_pair(&self, alias: &str, validity: ValidityWindow) -> Result<(), KeyError> {
        let _provisioning = KEYRING_PROVISIONING
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if self.has_entry(alias)? {
            return Err(KeyError::AlreadyExists {
                alias: alias.to_string(),
            });
        }

        let blob = encode_pair(&generate_pair(validity))?;
        self.entry(alias)?
            .set_password(&blob)
            .map_err(|e| KeyError::Keyring(e.to_string()))
    }

    fn private_key_entry(&self, alias: &str) -> Result<PrivateKeyEntry, KeyError> {
        let blob = self.read_blob(alias)?.ok_or_else(|| KeyError::NotFound {
            alias: alias.to_string(),
        })?;
        decode_pair(&blob)
    }
}

/// In-memory key store for tests and ephemeral sessions. Clones share state.
#[derive(Default, Clone)]
pub struct InMemoryKeyStore {
    inner: Arc<Mutex<HashMap<String, Zeroizing<String>>>>,
    generated: Arc<AtomicUsize>,
}

impl InMemoryKeyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of key pairs this store has generated.
    pub fn generated_count(&self) -> usize {
        self.generated.load(Ordering::SeqCst)
    }

    pub fn delete_entry(&self, alias: &str) -> Result<bool, KeyError> {
        Ok(self.lock()?.remove(alias).is_some())
    }

    fn lock(
        &self,
    ) -> Result<std::sync::MutexGuard<'_, HashMap<String, Zeroizing<String>>>, KeyError> {
        self.inner
            .lock()
            .map_err(|err| KeyError::Generation(format!("lock poisoned: {err}")))
    }
}

impl fmt::Debug for InMemoryKeyStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let aliases: Vec<String> = self
            .lock()
            .map(|map| map.keys().cloned().collect())
            .unwrap_or_default();
        f.debug_struct("InMemoryKeyStore")
            .field("aliases", &aliases)
            .field("generated", &self.generated_count())
            .finish()
    }
}

impl KeyStore for InMemoryKeyStore {
    fn has_entry(&self, alias: &str) -> Result<bool, KeyError> {
        Ok(self.lock()?.contains_key(alias))
    }

    fn generate_key_pair(&self, alias: &str, validity: ValidityWindow) -> Result<(), KeyError> {
        let mut map = self.lock()?;
        if map.contains_key(alias) {
            return Err(KeyError::AlreadyExists {
                alias: alias.to_string(),
            });
        }

        let blob = encode_pair(&generate_pair(validity))?;
        map.insert(alias.to_string(), blob);
        self.generated.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn private_key_entry(&self, alias: &str) -> Result<PrivateKeyEntry, KeyError> {
        let map = self.lock()?;
        let blob = map.get(alias).ok_or_else(|| KeyError::NotFound {
            alias: alias.to_string(),
        })?;
        decode_pair(blob)
    }
}

/// Serialized form kept inside the key store.
#[derive(Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
struct StoredKeyPair {
    secret: String,
    public: String,
    #[zeroize(skip)]
    not_before: DateTime<Utc>,
    #[zeroize(skip)]
    not_after: DateTime<Utc>,
}

fn generate_pair(validity: ValidityWindow) -> StoredKeyPair {
    let secret = StaticSecret::random_from_rng(OsRng);
    let public = PublicKey::from(&secret);
    let secret_bytes = Zeroizing::new(secret.to_bytes());
    StoredKeyPair {
        secret: general_purpose::STANDARD.encode(secret_bytes.as_ref()),
        public: general_purpose::STANDARD.encode(public.as_bytes()),
        not_before: validity.not_before,
        not_after: validity.not_after,
    }
}

fn encode_pair(pair: &StoredKeyPair) -> Result<Zeroizing<String>, KeyError> {
    serde_json::to_string(pair)
        .map(Zeroizing::new)
        .map_err(|e| KeyError::Generation(format!("serialize key pair: {e}")))
}

fn decode_pair(blob: &str) -> Result<PrivateKeyEntry, KeyError> {
    let stored: StoredKeyPair =
        serde_json::from_str(blob).map_err(|e| KeyError::Decode(format!("key pair blob: {e}")))?;

    let secret = StaticSecret::from(*decode_key_bytes(&stored.secret, "private key")?);
    let public = PublicKey::from(*decode_key_bytes(&stored.public, "public key")?);

    if PublicKey::from(&secret) != public {
        return Err(KeyError::Decode(
            "stored public key does not match private key".to_string(),
        ));
    }

    Ok(PrivateKeyEntry {
        secret,
        public,
        validity: ValidityWindow {
            not_before: stored.not_before,
            not_after: stored.not_after,
        },
    })
}

fn decode_key_bytes(encoded: &str, what: &str) -> Result<Zeroizing<[u8; KEY_LEN]>, KeyError> {
    let bytes = Zeroizing::new(
        general_purpose::STANDARD
            .decode(encoded)
            .map_err(|e| KeyError::Decode(format!("{what}: {e}")))?,
    );

    if bytes.len() != KEY_LEN {
        return Err(KeyError::Decode(format!(
            "{what}: expected {KEY_LEN} bytes, got {}",
            bytes.len()
        )));
    }

    let mut out = Zeroizing::new([0u8; KEY_LEN]);
    out.copy_from_slice(&bytes);
    Ok(out)
}
