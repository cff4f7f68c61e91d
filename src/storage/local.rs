//! Browser `localStorage` backend (hydrate builds only).
//!
//! SYSTEM CONTEXT
//! ==============
//! The storage handle is looked up per call: `web_sys::Storage` is not
//! `Send`, and the window may not expose storage at all (private mode,
//! sandboxed iframes).

use super::{KeyValueStorage, StorageError};

/// Storage backed by `window.localStorage`.
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalStorage;

fn storage() -> Result<web_sys::Storage, StorageError> {
    let window = web_sys::window().ok_or_else(|| StorageError::Unavailable("no window".to_owned()))?;
    match window.local_storage() {
        Ok(Some(storage)) => Ok(storage),
        Ok(None) => Err(StorageError::Unavailable("localStorage disabled".to_owned())),
        Err(e) => Err(StorageError::Unavailable(format!("{e:?}"))),
    }
}

fn js_error(e: &wasm_bindgen::JsValue) -> StorageError {
    StorageError::Unavailable(format!("{e:?}"))
}

impl KeyValueStorage for LocalStorage {
    fn get_item(&self, key: &str) -> Result<Option<String>, StorageError> {
        storage()?.get_item(key).map_err(|e| js_error(&e))
    }

    fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError> {
        storage()?.set_item(key, value).map_err(|e| js_error(&e))
    }

    fn remove_item(&self, key: &str) -> Result<(), StorageError> {
        storage()?.remove_item(key).map_err(|e| js_error(&e))
    }
}
