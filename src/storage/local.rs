//! Local filesystem storage backend.
//!
//! Each container is a directory under a configurable root directory and
//! each object is a flat file inside it.  Object headers are persisted in
//! a `<object>.meta` sidecar (see [`PropertySet::to_sidecar`]).
//!
//! All writes follow crash-only design: write to temp file, fsync, rename.

use bytes::Bytes;
use std::io::Write;
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, warn};

use super::backend::{
    read_upload_file, valid_names, write_download, BackendFuture, StorageBackend,
};
use super::properties::PropertySet;

/// Suffix of the header sidecar written next to each object.
pub const METADATA_SUFFIX: &str = ".meta";

/// Stores containers and objects on the local filesystem.
pub struct LocalBackend {
    /// Root directory for all containers.
    root: PathBuf,
    /// Prefix prepended to every container directory name.
    container_prefix: String,
    /// Set by `enter`, cleared by `exit`.
    authenticated: AtomicBool,
    /// Container names seen by the last listing or create/delete call.
    containers: tokio::sync::RwLock<Vec<String>>,
}

impl LocalBackend {
    /// Create a new `LocalBackend` rooted at `root`.
    ///
    /// The directory will be created if it does not exist.
    pub fn new(root: impl Into<PathBuf>, container_prefix: &str) -> anyhow::Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        // Also create the .tmp directory for atomic writes.
        std::fs::create_dir_all(root.join(".tmp"))?;
        Ok(Self {
            root,
            container_prefix: container_prefix.to_string(),
            authenticated: AtomicBool::new(false),
            containers: tokio::sync::RwLock::new(Vec::new()),
        })
    }

    /// Whether `enter` has been called without a matching `exit`.
    pub fn is_authenticated(&self) -> bool {
        self.authenticated.load(Ordering::SeqCst)
    }

    /// Reject names that would escape the root directory.
    fn check_name(name: &str) -> anyhow::Result<()> {
        for component in Path::new(name).components() {
            match component {
                Component::Normal(_) => {}
                _ => anyhow::bail!("Path traversal detected in name: {}", name),
            }
        }
        if name.contains('/') || name.contains('\\') {
            anyhow::bail!("Nested names are not supported: {}", name);
        }
        Ok(())
    }

    /// Directory backing `container`.
    fn container_dir(&self, container: &str) -> anyhow::Result<PathBuf> {
        Self::check_name(container)?;
        Ok(self.root.join(format!("{}{}", self.container_prefix, container)))
    }

    /// File backing `container/object`.
    fn object_path(&self, container: &str, object: &str) -> anyhow::Result<PathBuf> {
        Self::check_name(object)?;
        Ok(self.container_dir(container)?.join(object))
    }

    fn sidecar_path(object_path: &Path) -> PathBuf {
        let mut name = object_path.as_os_str().to_os_string();
        name.push(METADATA_SUFFIX);
        PathBuf::from(name)
    }

    /// Generate a temp file path under .tmp/ for atomic writes.
    fn temp_path(&self) -> PathBuf {
        let id = uuid::Uuid::new_v4();
        self.root.join(".tmp").join(format!("tmp-{}", id))
    }

    /// Write `data` to `final_path` through a temp file.
    fn atomic_write(&self, final_path: &Path, data: &[u8]) -> anyhow::Result<()> {
        let tmp_path = self.temp_path();
        if let Some(parent) = tmp_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = std::fs::File::create(&tmp_path)?;
        if let Err(e) = file.write_all(data).and_then(|_| file.sync_all()) {
            let _ = std::fs::remove_file(&tmp_path);
            return Err(e.into());
        }
        std::fs::rename(&tmp_path, final_path)?;
        Ok(())
    }

    /// Scan the root for container directories.
    fn scan_containers(&self) -> anyhow::Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in std::fs::read_dir(&self.root)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let dir_name = entry.file_name().to_string_lossy().to_string();
            if dir_name.starts_with('.') {
                continue;
            }
            if let Some(name) = dir_name.strip_prefix(&self.container_prefix) {
                if !name.is_empty() {
                    names.push(name.to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }

    /// Shared write path for `put_object` and `put_object_from_file`.
    fn store(
        &self,
        container: &str,
        object: &str,
        data: &[u8],
        headers: Option<&PropertySet>,
    ) -> anyhow::Result<bool> {
        let dir = self.container_dir(container)?;
        if !dir.is_dir() {
            warn!("local put_object: container '{}' does not exist", container);
            return Ok(false);
        }
        let final_path = self.object_path(container, object)?;
        self.atomic_write(&final_path, data)?;

        let sidecar = Self::sidecar_path(&final_path);
        match headers {
            Some(headers) if !headers.is_empty() => {
                self.atomic_write(&sidecar, headers.to_sidecar().as_bytes())?;
            }
            _ => {
                if sidecar.exists() {
                    std::fs::remove_file(&sidecar)?;
                }
            }
        }
        debug!("local put_object: {}/{} ({} bytes)", container, object, data.len());
        Ok(true)
    }
}

impl StorageBackend for LocalBackend {
    fn backend_name(&self) -> &'static str {
        "local"
    }

    fn enter(&self) -> BackendFuture<'_, bool> {
        Box::pin(async move {
            std::fs::create_dir_all(self.root.join(".tmp"))?;
            let names = self.scan_containers()?;
            *self.containers.write().await = names;
            self.authenticated.store(true, Ordering::SeqCst);
            debug!("local backend entered at {:?}", self.root);
            Ok(true)
        })
    }

    fn exit(&self) -> BackendFuture<'_, ()> {
        Box::pin(async move {
            self.authenticated.store(false, Ordering::SeqCst);
            self.containers.write().await.clear();
            Ok(())
        })
    }

    fn list_account_containers(&self) -> BackendFuture<'_, Vec<String>> {
        Box::pin(async move {
            let names = self.scan_containers()?;
            *self.containers.write().await = names.clone();
            Ok(names)
        })
    }

    fn create_container(&self, container: &str) -> BackendFuture<'_, bool> {
        let container = container.to_string();
        Box::pin(async move {
            if container.is_empty() {
                return Ok(false);
            }
            let dir = self.container_dir(&container)?;
            if dir.exists() {
                return Ok(false);
            }
            std::fs::create_dir_all(&dir)?;
            let mut known = self.containers.write().await;
            if !known.contains(&container) {
                known.push(container);
                known.sort();
            }
            Ok(true)
        })
    }

    fn delete_container(&self, container: &str) -> BackendFuture<'_, bool> {
        let container = container.to_string();
        Box::pin(async move {
            if container.is_empty() {
                return Ok(false);
            }
            let dir = self.container_dir(&container)?;
            if !dir.is_dir() {
                return Ok(false);
            }
            std::fs::remove_dir_all(&dir)?;
            self.containers.write().await.retain(|c| c != &container);
            Ok(true)
        })
    }

    fn list_container_contents(&self, container: &str) -> BackendFuture<'_, Vec<String>> {
        let container = container.to_string();
        Box::pin(async move {
            let dir = self.container_dir(&container)?;
            if !dir.is_dir() {
                return Ok(Vec::new());
            }
            let mut objects = Vec::new();
            for entry in std::fs::read_dir(&dir)? {
                let entry = entry?;
                if !entry.file_type()?.is_file() {
                    continue;
                }
                let name = entry.file_name().to_string_lossy().to_string();
                if !name.ends_with(METADATA_SUFFIX) {
                    objects.push(name);
                }
            }
            objects.sort();
            Ok(objects)
        })
    }

    fn get_object_metadata(
        &self,
        container: &str,
        object: &str,
    ) -> BackendFuture<'_, Option<PropertySet>> {
        let container = container.to_string();
        let object = object.to_string();
        Box::pin(async move {
            if !valid_names(&container, &object) {
                return Ok(None);
            }
            let path = self.object_path(&container, &object)?;
            if !path.is_file() {
                return Ok(None);
            }
            let sidecar = Self::sidecar_path(&path);
            if !sidecar.exists() {
                return Ok(Some(PropertySet::new()));
            }
            let contents = std::fs::read_to_string(&sidecar)?;
            Ok(Some(PropertySet::from_sidecar(&contents)?))
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
            self.store(&container, &object, &data, headers.as_ref())
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
            self.store(&container, &object, &data, headers.as_ref())
        })
    }

    fn delete_object(&self, container: &str, object: &str) -> BackendFuture<'_, bool> {
        let container = container.to_string();
        let object = object.to_string();
        Box::pin(async move {
            if !valid_names(&container, &object) {
                return Ok(false);
            }
            let path = self.object_path(&container, &object)?;
            if !path.is_file() {
                return Ok(false);
            }
            std::fs::remove_file(&path)?;
            let sidecar = Self::sidecar_path(&path);
            if sidecar.exists() {
                std::fs::remove_file(&sidecar)?;
            }
            Ok(true)
        })
    }

    fn get_object(
        &self,
        container: &str,
        object: &str,
        local_path: &Path,
    ) -> BackendFuture<'_, u64> {
        let container = container.to_string();
        let object = object.to_string();
        let local_path = local_path.to_path_buf();
        Box::pin(async move {
            if !valid_names(&container, &object) {
                return Ok(0);
            }
            let path = self.object_path(&container, &object)?;
            if !path.is_file() {
                return Ok(0);
            }
            let data = std::fs::read(&path)?;
            write_download(&local_path, &data)
        })
    }
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::properties::PropertyValue;

    fn test_backend() -> (tempfile::TempDir, LocalBackend) {
        let dir = tempfile::tempdir().expect("failed to create temp dir");
        let backend = LocalBackend::new(dir.path().join("store"), "").expect("failed to create backend");
        (dir, backend)
    }

    #[tokio::test]
    async fn test_enter_and_exit_toggle_session() {
        let (_dir, backend) = test_backend();
        assert!(!backend.is_authenticated());
        assert!(backend.enter().await.unwrap());
        assert!(backend.is_authenticated());
        backend.exit().await.unwrap();
        assert!(!backend.is_authenticated());
    }

    #[tokio::test]
    async fn test_create_container_twice() {
        let (_dir, backend) = test_backend();
        backend.enter().await.unwrap();

        let first = backend.create_container("x").await.unwrap();
        let second = backend.create_container("x").await.unwrap();
        assert_eq!((first, second), (true, false));

        let containers = backend.list_account_containers().await.unwrap();
        assert_eq!(containers.iter().filter(|c| *c == "x").count(), 1);
    }

    #[tokio::test]
    async fn test_container_prefix_is_hidden_from_callers() {
        let dir = tempfile::tempdir().unwrap();
        let backend = LocalBackend::new(dir.path(), "home-").unwrap();
        backend.enter().await.unwrap();
        backend.create_container("playlists").await.unwrap();
        std::fs::create_dir_all(dir.path().join("someone-else")).unwrap();

        assert!(dir.path().join("home-playlists").is_dir());
        assert_eq!(
            backend.list_account_containers().await.unwrap(),
            vec!["playlists".to_string()]
        );
    }

    #[tokio::test]
    async fn test_put_and_get_roundtrip() {
        let (dir, backend) = test_backend();
        backend.create_container("songs").await.unwrap();

        let data = Bytes::from("hello world");
        assert!(backend.put_object("songs", "a.flac", data.clone(), None).await.unwrap());

        let dest = dir.path().join("out").join("a.flac");
        let n = backend.get_object("songs", "a.flac", &dest).await.unwrap();
        assert_eq!(n, data.len() as u64);
        assert_eq!(std::fs::read(&dest).unwrap(), data.as_ref());
    }

    #[tokio::test]
    async fn test_put_rejects_empty_content_and_names() {
        let (_dir, backend) = test_backend();
        backend.create_container("songs").await.unwrap();

        assert!(!backend.put_object("songs", "a", Bytes::new(), None).await.unwrap());
        assert!(!backend.put_object("songs", "", Bytes::from("x"), None).await.unwrap());
        assert!(!backend.put_object("", "a", Bytes::from("x"), None).await.unwrap());
        assert!(backend.list_container_contents("songs").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_put_into_missing_container_fails() {
        let (_dir, backend) = test_backend();
        assert!(!backend.put_object("nope", "a", Bytes::from("x"), None).await.unwrap());
    }

    #[tokio::test]
    async fn test_put_from_file_and_sidecar() {
        let (dir, backend) = test_backend();
        backend.create_container("songs").await.unwrap();
        let src = dir.path().join("src.mp3");
        std::fs::write(&src, b"audio").unwrap();

        let mut headers = PropertySet::new();
        headers.add("artist", PropertyValue::String("Blondie".into()));
        headers.add("encrypted", PropertyValue::Bool(false));
        assert!(backend
            .put_object_from_file("songs", "s.mp3", &src, Some(&headers))
            .await
            .unwrap());

        let sidecar = dir.path().join("store").join("songs").join("s.mp3.meta");
        let text = std::fs::read_to_string(sidecar).unwrap();
        assert!(text.contains("string|artist|Blondie"));
        assert!(text.contains("bool|encrypted|false"));

        let meta = backend.get_object_metadata("songs", "s.mp3").await.unwrap().unwrap();
        assert_eq!(meta, headers);
        // Sidecars are not objects.
        assert_eq!(
            backend.list_container_contents("songs").await.unwrap(),
            vec!["s.mp3".to_string()]
        );
    }

    #[tokio::test]
    async fn test_put_from_missing_or_empty_file_fails() {
        let (dir, backend) = test_backend();
        backend.create_container("songs").await.unwrap();
        let empty = dir.path().join("empty");
        std::fs::write(&empty, b"").unwrap();

        assert!(!backend
            .put_object_from_file("songs", "a", &dir.path().join("missing"), None)
            .await
            .unwrap());
        assert!(!backend.put_object_from_file("songs", "a", &empty, None).await.unwrap());
    }

    #[tokio::test]
    async fn test_get_missing_creates_no_file() {
        let (dir, backend) = test_backend();
        backend.create_container("songs").await.unwrap();
        let dest = dir.path().join("dest");

        assert_eq!(backend.get_object("nope", "a", &dest).await.unwrap(), 0);
        assert_eq!(backend.get_object("songs", "a", &dest).await.unwrap(), 0);
        assert!(!dest.exists());
    }

    #[tokio::test]
    async fn test_delete_object_twice() {
        let (_dir, backend) = test_backend();
        backend.create_container("songs").await.unwrap();
        backend.put_object("songs", "a", Bytes::from("x"), None).await.unwrap();

        let first = backend.delete_object("songs", "a").await.unwrap();
        let second = backend.delete_object("songs", "a").await.unwrap();
        assert_eq!((first, second), (true, false));
    }

    #[tokio::test]
    async fn test_delete_container_removes_objects() {
        let (_dir, backend) = test_backend();
        backend.create_container("songs").await.unwrap();
        backend.put_object("songs", "a", Bytes::from("x"), None).await.unwrap();

        assert!(backend.delete_container("songs").await.unwrap());
        assert!(!backend.delete_container("songs").await.unwrap());
        assert!(backend.list_account_containers().await.unwrap().is_empty());
        assert!(backend.get_object_metadata("songs", "a").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_path_traversal_rejected() {
        let (dir, backend) = test_backend();
        backend.create_container("songs").await.unwrap();
        let result = backend
            .put_object("songs", "../escape", Bytes::from("x"), None)
            .await;
        assert!(result.is_err());
        assert!(!dir.path().join("store").join("escape").exists());
    }

    #[tokio::test]
    async fn test_put_overwrites_and_drops_stale_sidecar() {
        let (_dir, backend) = test_backend();
        backend.create_container("c").await.unwrap();
        let mut headers = PropertySet::new();
        headers.add("k", PropertyValue::Int(1));
        backend.put_object("c", "o", Bytes::from("v1"), Some(&headers)).await.unwrap();
        backend.put_object("c", "o", Bytes::from("v2"), None).await.unwrap();

        let meta = backend.get_object_metadata("c", "o").await.unwrap().unwrap();
        assert!(meta.is_empty());
    }
}
