//! Abstract storage backend trait.
//!
//! Every storage backend must implement [`StorageBackend`].  The trait
//! speaks in containers and objects so the jukebox never needs to know
//! whether bytes live on a local disk, in memory, or in a cloud bucket.
//!
//! Contract shared by every implementation:
//!
//! - `put_object` / `put_object_from_file` with empty content or an empty
//!   container/object name return `Ok(false)` and write nothing.
//! - `get_object` returns `Ok(0)` when the container or object does not
//!   exist, and never leaves a partial destination file behind.
//! - `create_container` on an existing name returns `Ok(false)` without
//!   side effects; `delete_object`/`delete_container` on a missing target
//!   return `Ok(false)`.
//! - `Err` is reserved for I/O failures talking to the remote system.

use bytes::Bytes;
use std::future::Future;
use std::path::Path;
use std::pin::Pin;

use super::properties::PropertySet;

/// Boxed future returned by every backend operation.
pub type BackendFuture<'a, T> = Pin<Box<dyn Future<Output = anyhow::Result<T>> + Send + 'a>>;

/// Async container/object storage contract.
pub trait StorageBackend: Send + Sync + 'static {
    /// Short name used in log lines (`local`, `memory`, `s3`, `mirror`).
    fn backend_name(&self) -> &'static str;

    /// Open a session: authenticate and load the known container list.
    fn enter(&self) -> BackendFuture<'_, bool>;

    /// Close the session.
    fn exit(&self) -> BackendFuture<'_, ()>;

    /// List all containers visible to this account (prefix stripped).
    fn list_account_containers(&self) -> BackendFuture<'_, Vec<String>>;

    /// Create a container. `Ok(false)` if it already exists.
    fn create_container(&self, container: &str) -> BackendFuture<'_, bool>;

    /// Delete a container and everything in it. `Ok(false)` if missing.
    fn delete_container(&self, container: &str) -> BackendFuture<'_, bool>;

    /// List object names stored in `container`.
    fn list_container_contents(&self, container: &str) -> BackendFuture<'_, Vec<String>>;

    /// Fetch the headers stored with an object, or `None` if it is missing.
    fn get_object_metadata(
        &self,
        container: &str,
        object: &str,
    ) -> BackendFuture<'_, Option<PropertySet>>;

    /// Store `data` as `container/object`.
    fn put_object(
        &self,
        container: &str,
        object: &str,
        data: Bytes,
        headers: Option<&PropertySet>,
    ) -> BackendFuture<'_, bool>;

    /// Store the contents of the local file at `local_path` as `container/object`.
    fn put_object_from_file(
        &self,
        container: &str,
        object: &str,
        local_path: &Path,
        headers: Option<&PropertySet>,
    ) -> BackendFuture<'_, bool>;

    /// Delete `container/object`. `Ok(false)` if it did not exist.
    fn delete_object(&self, container: &str, object: &str) -> BackendFuture<'_, bool>;

    /// Download `container/object` into `local_path`, returning the number
    /// of bytes written (0 when the object does not exist).
    fn get_object(
        &self,
        container: &str,
        object: &str,
        local_path: &Path,
    ) -> BackendFuture<'_, u64>;
}

/// Returns true when the names are usable for a write.
pub(crate) fn valid_names(container: &str, object: &str) -> bool {
    !container.is_empty() && !object.is_empty()
}

/// Read a local file for upload. Missing or empty files yield `None`.
pub(crate) fn read_upload_file(local_path: &Path) -> anyhow::Result<Option<Bytes>> {
    if !local_path.is_file() {
        return Ok(None);
    }
    let data = std::fs::read(local_path)?;
    if data.is_empty() {
        return Ok(None);
    }
    Ok(Some(Bytes::from(data)))
}

/// Write downloaded bytes to `local_path`, removing the file again if the
/// write fails part way.
pub(crate) fn write_download(local_path: &Path, data: &[u8]) -> anyhow::Result<u64> {
    if let Some(parent) = local_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    if let Err(e) = std::fs::write(local_path, data) {
        let _ = std::fs::remove_file(local_path);
        return Err(e.into());
    }
    Ok(data.len() as u64)
}
