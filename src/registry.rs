//! Namespace registry — lazily opens one [`Store`] per subdirectory of a
//! root path.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::{Result, StoreError};
use crate::store::{Store, RAW_FILE_NAME};

/// Owns every open [`Store`], keyed by namespace name (its subdirectory
/// name under the registry root).
pub struct StoreRegistry {
    root: PathBuf,
    stores: RwLock<HashMap<String, Arc<Store>>>,
}

impl StoreRegistry {
    /// Scan `root` for subdirectories that already contain an
    /// `append.raw` and eagerly open them; namespaces with no directory
    /// yet are opened lazily by [`StoreRegistry::get_or_create`].
    pub fn open(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;

        let mut stores = HashMap::new();
        for entry in fs::read_dir(&root)? {
            let entry = entry?;
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }
            if path.join(RAW_FILE_NAME).exists() {
                if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
                    let store = Store::open(&path)?;
                    stores.insert(name.to_string(), Arc::new(store));
                }
            }
        }

        tracing::info!(root = %root.display(), namespaces = stores.len(), "registry opened");
        Ok(Self { root, stores: RwLock::new(stores) })
    }

    /// Return the store for `namespace`, opening it (and its directory)
    /// if this is the first reference. Double-checked locking: most calls
    /// only need the read lock.
    pub fn get_or_create(&self, namespace: &str) -> Result<Arc<Store>> {
        if let Some(store) = self.stores.read().get(namespace) {
            return Ok(store.clone());
        }
        let mut write = self.stores.write();
        if let Some(store) = write.get(namespace) {
            return Ok(store.clone());
        }
        let store = Arc::new(Store::open(self.root.join(namespace))?);
        write.insert(namespace.to_string(), store.clone());
        Ok(store)
    }

    /// Look up an already-open store without creating one.
    pub fn get(&self, namespace: &str) -> Result<Arc<Store>> {
        self.stores
            .read()
            .get(namespace)
            .cloned()
            .ok_or_else(|| StoreError::UnknownNamespace(namespace.to_string()))
    }

    /// Drop the in-memory handle for `namespace`. The on-disk files are
    /// untouched; a later call reopens them. Returns `Ok(())` even if the
    /// namespace was never open.
    pub fn close(&self, namespace: &str) -> Result<()> {
        if let Some(store) = self.stores.write().remove(namespace) {
            store.close();
        }
        Ok(())
    }

    /// Close and remove every file belonging to `namespace` from disk.
    pub fn delete(&self, namespace: &str) -> Result<()> {
        self.close(namespace)?;
        let dir = self.root.join(namespace);
        if dir.exists() {
            fs::remove_dir_all(dir)?;
        }
        Ok(())
    }

    /// Close every open store. Called on process shutdown.
    pub fn shutdown(&self) {
        let mut stores = self.stores.write();
        for (_, store) in stores.drain() {
            store.close();
        }
        tracing::info!("registry shut down");
    }

    pub fn namespaces(&self) -> Vec<String> {
        self.stores.read().keys().cloned().collect()
    }
}
