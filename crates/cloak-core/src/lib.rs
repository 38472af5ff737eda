//! Core abstractions for Cloak: the typed value codec and the plain
//! key-value store contract that encrypted preferences are layered over.
//! No cryptography lives here.

pub mod codec;
pub mod notify;
pub mod store;
