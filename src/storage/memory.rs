//! In-memory storage backend.
//!
//! Containers and their objects are held in a
//! `tokio::sync::RwLock<BTreeMap<...>>`.  Nothing survives the process;
//! this backend is the test double for the rest of the jukebox and the
//! cheapest way to try a configuration.
//!
//! A configurable memory limit (`max_size_bytes`) caps total stored bytes.

use bytes::Bytes;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};

use super::backend::{
    read_upload_file, valid_names, write_download, BackendFuture, StorageBackend,
};
use super::properties::PropertySet;

/// One stored object: its bytes plus optional headers.
#[derive(Debug, Clone)]
struct MemoryObject {
    data: Bytes,
    headers: Option<PropertySet>,
}

type Containers = BTreeMap<String, BTreeMap<String, MemoryObject>>;

/// In-memory storage backend.
pub struct MemoryBackend {
    /// container name (with prefix) -> object name -> object.
    containers: tokio::sync::RwLock<Containers>,
    /// Prefix prepended to every container name.
    container_prefix: String,
    /// Current total bytes stored.
    current_size: tokio::sync::RwLock<u64>,
    /// Maximum bytes allowed.  0 means unlimited.
    max_size_bytes: u64,
    /// Set by `enter`, cleared by `exit`.
    authenticated: AtomicBool,
}

impl MemoryBackend {
    /// Create an empty `MemoryBackend`.
    pub fn new(max_size_bytes: u64, container_prefix: &str) -> Self {
        Self {
            containers: tokio::sync::RwLock::new(BTreeMap::new()),
            container_prefix: container_prefix.to_string(),
            current_size: tokio::sync::RwLock::new(0),
            max_size_bytes,
            authenticated: AtomicBool::new(false),
        }
    }

    /// Whether `enter` has been called without a matching `exit`.
    pub fn is_authenticated(&self) -> bool {
        self.authenticated.load(Ordering::SeqCst)
    }

    /// Total bytes currently stored.
    pub async fn stored_bytes(&self) -> u64 {
        *self.current_size.read().await
    }

    fn key(&self, container: &str) -> String {
        format!("{}{}", self.container_prefix, container)
    }

    // ── Memory accounting ──────────────────────────────────────────

    /// Check whether adding `additional` bytes would exceed the memory limit.
    /// If the limit is 0 (unlimited), always returns Ok.
    async fn check_capacity(&self, additional: u64) -> anyhow::Result<()> {
        if self.max_size_bytes == 0 {
            return Ok(());
        }
        let current = *self.current_size.read().await;
        if current + additional > self.max_size_bytes {
            anyhow::bail!(
                "Memory limit exceeded: current={current}, additional={additional}, max={}",
                self.max_size_bytes
            );
        }
        Ok(())
    }

    /// Adjust the tracked size by a signed delta.
    async fn adjust_size(&self, delta: i64) {
        let mut size = self.current_size.write().await;
        if delta >= 0 {
            *size = size.saturating_add(delta as u64);
        } else {
            *size = size.saturating_sub((-delta) as u64);
        }
    }

    /// Shared write path for `put_object` and `put_object_from_file`.
    async fn store(
        &self,
        container: &str,
        object: &str,
        data: Bytes,
        headers: Option<PropertySet>,
    ) -> anyhow::Result<bool> {
        let key = self.key(container);
        let old_len = {
            let containers = self.containers.read().await;
            match containers.get(&key) {
                Some(objects) => objects.get(object).map(|o| o.data.len() as u64),
                None => return Ok(false),
            }
        };

        let delta = data.len() as i64 - old_len.unwrap_or(0) as i64;
        if delta > 0 {
            self.check_capacity(delta as u64).await?;
        }

        {
            let mut containers = self.containers.write().await;
            let Some(objects) = containers.get_mut(&key) else {
                return Ok(false);
            };
            objects.insert(object.to_string(), MemoryObject { data, headers });
        }

        self.adjust_size(delta).await;
        Ok(true)
    }
}

// ── StorageBackend implementation ──────────────────────────────────────

impl StorageBackend for MemoryBackend {
    fn backend_name(&self) -> &'static str {
        "memory"
    }

    fn enter(&self) -> BackendFuture<'_, bool> {
        Box::pin(async move {
            self.authenticated.store(true, Ordering::SeqCst);
            Ok(true)
        })
    }

    fn exit(&self) -> BackendFuture<'_, ()> {
        Box::pin(async move {
            self.authenticated.store(false, Ordering::SeqCst);
            Ok(())
        })
    }

    fn list_account_containers(&self) -> BackendFuture<'_, Vec<String>> {
        Box::pin(async move {
            let containers = self.containers.read().await;
            Ok(containers
                .keys()
                .filter_map(|k| k.strip_prefix(&self.container_prefix))
                .filter(|k| !k.is_empty())
                .map(str::to_string)
                .collect())
        })
    }

    fn create_container(&self, container: &str) -> BackendFuture<'_, bool> {
        let key = self.key(container);
        let empty = container.is_empty();
        Box::pin(async move {
            if empty {
                return Ok(false);
            }
            let mut containers = self.containers.write().await;
            if containers.contains_key(&key) {
                return Ok(false);
            }
            containers.insert(key, BTreeMap::new());
            Ok(true)
        })
    }

    fn delete_container(&self, container: &str) -> BackendFuture<'_, bool> {
        let key = self.key(container);
        Box::pin(async move {
            let removed = self.containers.write().await.remove(&key);
            match removed {
                Some(objects) => {
                    let freed: u64 = objects.values().map(|o| o.data.len() as u64).sum();
                    self.adjust_size(-(freed as i64)).await;
                    Ok(true)
                }
                None => Ok(false),
            }
        })
    }

    fn list_container_contents(&self, container: &str) -> BackendFuture<'_, Vec<String>> {
        let key = self.key(container);
        Box::pin(async move {
            let containers = self.containers.read().await;
            Ok(containers
                .get(&key)
                .map(|objects| objects.keys().cloned().collect())
                .unwrap_or_default())
        })
    }

    fn get_object_metadata(
        &self,
        container: &str,
        object: &str,
    ) -> BackendFuture<'_, Option<PropertySet>> {
        let key = self.key(container);
        let object = object.to_string();
        Box::pin(async move {
            let containers = self.containers.read().await;
            Ok(containers
                .get(&key)
                .and_then(|objects| objects.get(&object))
                .map(|o| o.headers.clone().unwrap_or_default()))
        })
    }

    fn put_object(
        &self,
        container: &str,
        object: &str,
        data: Bytes,
        headers: Option<&PropertySet>,
    ) -> BackendFuture<'_, bool> {
        let container = container.to_string();
        let object = object.to_string();
        let headers = headers.cloned();
        Box::pin(async move {
            if !valid_names(&container, &object) || data.is_empty() {
                return Ok(false);
            }
            self.store(&container, &object, data, headers).await
        })
    }

    fn put_object_from_file(
        &self,
        container: &str,
        object: &str,
        local_path: &Path,
        headers: Option<&PropertySet>,
    ) -> BackendFuture<'_, bool> {
        let container = container.to_string();
        let object = object.to_string();
        let local_path = local_path.to_path_buf();
        let headers = headers.cloned();
        Box::pin(async move {
            if !valid_names(&container, &object) {
                return Ok(false);
            }
            let Some(data) = read_upload_file(&local_path)? else {
                return Ok(false);
            };
            self.store(&container, &object, data, headers).await
        })
    }

    fn delete_object(&self, container: &str, object: &str) -> BackendFuture<'_, bool> {
        let key = self.key(container);
        let object = object.to_string();
        Box::pin(async move {
            let removed = {
                let mut containers = self.containers.write().await;
                containers.get_mut(&key).and_then(|objects| objects.remove(&object))
            };
            match removed {
                Some(o) => {
                    self.adjust_size(-(o.data.len() as i64)).await;
                    Ok(true)
                }
                None => Ok(false),
            }
        })
    }

    fn get_object(
        &self,
        container: &str,
        object: &str,
        local_path: &Path,
    ) -> BackendFuture<'_, u64> {
        let key = self.key(container);
        let object = object.to_string();
        let local_path = local_path.to_path_buf();
        Box::pin(async move {
            let data = {
                let containers = self.containers.read().await;
                match containers.get(&key).and_then(|objects| objects.get(&object)) {
                    Some(o) => o.data.clone(),
                    None => return Ok(0),
                }
            };
            write_download(&local_path, &data)
        })
    }
}

// ── Tests ───────────────────────────────────────────────────────────
