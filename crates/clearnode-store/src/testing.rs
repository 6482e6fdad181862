//! Throwaway stores for tests.

use std::ops::Deref;
use std::path::PathBuf;
use std::sync::Arc;

use crate::store::{Store, StoreOptions};

/// A store opened under the system temp directory, removed on drop.
pub struct TempStore {
    store: Option<Arc<Store>>,
    path: PathBuf,
}

impl TempStore {
    /// Open a fresh store. Panics if RocksDB cannot be opened.
    pub fn new() -> Self {
        Self::with_options(&StoreOptions::default())
    }

    pub fn with_options(options: &StoreOptions) -> Self {
        let path = std::env::temp_dir().join(format!("clearnode-test-{}", uuid::Uuid::now_v7()));
        let store = match Store::open_with(&path, options) {
            Ok(store) => store,
            Err(e) => panic!("failed to open temp store at {}: {}", path.display(), e),
        };
        Self {
            store: Some(Arc::new(store)),
            path,
        }
    }

    pub fn path(&self) -> &std::path::Path {
        &self.path
    }

    /// A shared handle for services that own their store.
    ///
    /// Drop every clone before the `TempStore` so the database closes first.
    pub fn shared(&self) -> Arc<Store> {
        match &self.store {
            Some(store) => store.clone(),
            None => unreachable!("store is only taken on drop"),
        }
    }
}

impl Default for TempStore {
    fn default() -> Self {
        Self::new()
    }
}

impl Deref for TempStore {
    type Target = Store;

    fn deref(&self) -> &Store {
        match &self.store {
            Some(store) => store.as_ref(),
            None => unreachable!("store is only taken on drop"),
        }
    }
}

impl Drop for TempStore {
    fn drop(&mut self) {
        // Close the database before removing its files.
        drop(self.store.take());
        let _ = std::fs::remove_dir_all(&self.path);
    }
}
