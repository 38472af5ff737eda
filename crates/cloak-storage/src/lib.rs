//! Encrypted preferences over a plain key-value store.
//! Values are sealed to an X25519 key pair kept in the OS keyring (or test
//! doubles) and stored as base64 tokens.

pub mod crypto;
pub mod key_provider;
pub mod prefs_file;
pub mod secure_prefs;

pub use crypto::{CryptoCodec, CryptoError};
pub use key_provider::{
    get_or_create_key_pair, InMemoryKeyStore, KeyError, KeyHandle, KeyStore, KeyringKeyStore,
    ValidityWindow, DEFAULT_ALIAS,
};
pub use prefs_file::{PreferenceFile, PreferenceFileError};
pub use secure_prefs::{PrefsError, SecureEditor, SecurePreferences, StringSet};
