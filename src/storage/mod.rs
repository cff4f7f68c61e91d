//! Key-value storage backends for the credential store.
//!
//! SYSTEM CONTEXT
//! ==============
//! The credential store only needs `localStorage`-shaped access: string keys,
//! string values, synchronous and best-effort. Backends:
//! - [`MemoryStorage`] for tests and ephemeral sessions
//! - [`FileStorage`] for native callers such as the CLI
//! - `LocalStorage` for the browser (feature `hydrate`)

mod file;
#[cfg(feature = "hydrate")]
mod local;
mod memory;

pub use file::FileStorage;
#[cfg(feature = "hydrate")]
pub use local::LocalStorage;
pub use memory::MemoryStorage;

/// Errors produced by storage backends and the credential store.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// The backing file could not be read or written.
    #[error("storage io failed: {0}")]
    Io(#[from] std::io::Error),

    /// The backing file is not a JSON object of strings.
    #[error("storage file is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// A persisted key holds a value that cannot be decoded.
    #[error("stored value for `{key}` is corrupt: {reason}")]
    Corrupt { key: &'static str, reason: String },

    /// The platform storage is missing or refused the operation.
    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

/// Synchronous string key-value storage with `localStorage` semantics.
pub trait KeyValueStorage: Send + Sync {
    /// Value stored under `key`, or `None` when absent.
    fn get_item(&self, key: &str) -> Result<Option<String>, StorageError>;

    /// Store `value` under `key`, replacing any previous value.
    fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError>;

    /// Remove `key`. Removing an absent key is not an error.
    fn remove_item(&self, key: &str) -> Result<(), StorageError>;
}
