//! Mirrored storage backend.
//!
//! [`MirrorBackend`] wraps a primary and a secondary [`StorageBackend`]
//! and is itself a `StorageBackend`, so the rest of the jukebox cannot
//! tell it apart from a single store.
//!
//! Writes are expressed as a [`MirrorOperation`] and applied to both
//! sides by [`MirrorBackend::update`], either one after the other or
//! concurrently.  Each side's outcome is tracked on its own and a write
//! is committed according to the configured [`WritePolicy`].  A side that
//! fails a write is not retried; the mirror is allowed to diverge until
//! the next successful write to that side.
//!
//! Reads go to the primary first and fall back to the secondary when the
//! primary errors or comes back empty.  If both fail the caller sees an
//! empty listing, `None` or 0 rather than an error.

use bytes::Bytes;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

use super::backend::{BackendFuture, StorageBackend};
use super::properties::PropertySet;
use crate::metrics::MIRROR_WRITES_TOTAL;

/// How many successful sides a mirrored write needs to count as committed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WritePolicy {
    /// Committed when either side succeeded.
    #[default]
    AtLeastOne,
    /// Committed only when both sides succeeded.
    Both,
}

/// Content of a mirrored object write.
#[derive(Debug, Clone)]
pub enum ObjectPayload {
    Bytes(Bytes),
    File(PathBuf),
}

/// The backend-agnostic write being mirrored.
#[derive(Debug, Clone)]
pub enum MirrorOperationKind {
    CreateContainer {
        container: String,
    },
    DeleteContainer {
        container: String,
    },
    PutObject {
        container: String,
        object: String,
        payload: ObjectPayload,
        headers: Option<PropertySet>,
    },
    DeleteObject {
        container: String,
        object: String,
    },
}

/// A write plus the run/succeed state of its most recent application.
#[derive(Debug, Clone)]
pub struct MirrorOperation {
    kind: MirrorOperationKind,
    has_run: bool,
    succeeded: bool,
}

impl MirrorOperation {
    pub fn new(kind: MirrorOperationKind) -> Self {
        Self {
            kind,
            has_run: false,
            succeeded: false,
        }
    }

    pub fn create_container(container: &str) -> Self {
        Self::new(MirrorOperationKind::CreateContainer {
            container: container.to_string(),
        })
    }

    pub fn delete_container(container: &str) -> Self {
        Self::new(MirrorOperationKind::DeleteContainer {
            container: container.to_string(),
        })
    }

    pub fn put_object(
        container: &str,
        object: &str,
        payload: ObjectPayload,
        headers: Option<&PropertySet>,
    ) -> Self {
        Self::new(MirrorOperationKind::PutObject {
            container: container.to_string(),
            object: object.to_string(),
            payload,
            headers: headers.cloned(),
        })
    }

    pub fn delete_object(container: &str, object: &str) -> Self {
        Self::new(MirrorOperationKind::DeleteObject {
            container: container.to_string(),
            object: object.to_string(),
        })
    }

    /// Operation label used in logs and metrics.
    pub fn label(&self) -> &'static str {
        match self.kind {
            MirrorOperationKind::CreateContainer { .. } => "create_container",
            MirrorOperationKind::DeleteContainer { .. } => "delete_container",
            MirrorOperationKind::PutObject { .. } => "put_object",
            MirrorOperationKind::DeleteObject { .. } => "delete_object",
        }
    }

    pub fn has_run(&self) -> bool {
        self.has_run
    }

    pub fn succeeded(&self) -> bool {
        self.has_run && self.succeeded
    }

    /// Clear the run state so the operation can be applied to another backend.
    pub fn reset(&mut self) {
        self.has_run = false;
        self.succeeded = false;
    }

    /// Apply the operation to `backend`, recording whether it succeeded.
    /// Errors are logged and count as failure.
    pub async fn run(&mut self, backend: &dyn StorageBackend) {
        let result = match &self.kind {
            MirrorOperationKind::CreateContainer { container } => {
                backend.create_container(container).await
            }
            MirrorOperationKind::DeleteContainer { container } => {
                backend.delete_container(container).await
            }
            MirrorOperationKind::PutObject {
                container,
                object,
                payload,
                headers,
            } => match payload {
                ObjectPayload::Bytes(data) => {
                    backend
                        .put_object(container, object, data.clone(), headers.as_ref())
                        .await
                }
                ObjectPayload::File(path) => {
                    backend
                        .put_object_from_file(container, object, path, headers.as_ref())
                        .await
                }
            },
            MirrorOperationKind::DeleteObject { container, object } => {
                backend.delete_object(container, object).await
            }
        };

        self.succeeded = match result {
            Ok(ok) => ok,
            Err(e) => {
                warn!(
                    "mirror {} failed on {} backend: {e:#}",
                    self.label(),
                    backend.backend_name()
                );
                false
            }
        };
        self.has_run = true;
    }
}

/// Per-side result of one mirrored write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MirrorOutcome {
    pub primary: bool,
    pub secondary: bool,
}

impl MirrorOutcome {
    /// How many of the two backends succeeded.
    pub fn succeeded_count(&self) -> usize {
        usize::from(self.primary) + usize::from(self.secondary)
    }

    /// Whether the write counts as committed under `policy`.
    pub fn committed(&self, policy: WritePolicy) -> bool {
        match policy {
            WritePolicy::AtLeastOne => self.succeeded_count() >= 1,
            WritePolicy::Both => self.succeeded_count() == 2,
        }
    }
}

/// Storage backend that writes to two backends and reads from either.
pub struct MirrorBackend {
    primary: Arc<dyn StorageBackend>,
    secondary: Arc<dyn StorageBackend>,
    /// Run both sides of a write concurrently instead of one after the other.
    parallel: bool,
    policy: WritePolicy,
}

impl MirrorBackend {
    pub fn new(
        primary: Arc<dyn StorageBackend>,
        secondary: Arc<dyn StorageBackend>,
        parallel: bool,
        policy: WritePolicy,
    ) -> Self {
        Self {
            primary,
            secondary,
            parallel,
            policy,
        }
    }

    /// Apply `op` to both backends and report each side's outcome.
    pub async fn update(&self, op: MirrorOperation) -> MirrorOutcome {
        let label = op.label();
        let outcome = if self.parallel {
            self.update_parallel(op).await
        } else {
            self.update_sequential(op).await
        };

        let result = if outcome.committed(self.policy) {
            "committed"
        } else {
            "failed"
        };
        metrics::counter!(MIRROR_WRITES_TOTAL, "operation" => label, "outcome" => result)
            .increment(1);

        if outcome.succeeded_count() == 1 {
            warn!(
                "mirror {} diverged: primary={} secondary={}",
                label, outcome.primary, outcome.secondary
            );
        } else {
            debug!(
                "mirror {}: primary={} secondary={}",
                label, outcome.primary, outcome.secondary
            );
        }
        outcome
    }

    async fn update_sequential(&self, mut op: MirrorOperation) -> MirrorOutcome {
        op.run(self.primary.as_ref()).await;
        let primary = op.succeeded();
        op.reset();
        op.run(self.secondary.as_ref()).await;
        MirrorOutcome {
            primary,
            secondary: op.succeeded(),
        }
    }

    async fn update_parallel(&self, op: MirrorOperation) -> MirrorOutcome {
        let mut secondary_op = op.clone();
        let mut primary_op = op;
        let primary = Arc::clone(&self.primary);
        let secondary = Arc::clone(&self.secondary);

        let primary_task = tokio::spawn(async move {
            primary_op.run(primary.as_ref()).await;
            primary_op
        });
        let secondary_task = tokio::spawn(async move {
            secondary_op.run(secondary.as_ref()).await;
            secondary_op
        });

        let (primary_result, secondary_result) = tokio::join!(primary_task, secondary_task);
        MirrorOutcome {
            primary: joined_success(primary_result),
            secondary: joined_success(secondary_result),
        }
    }

    async fn write(&self, op: MirrorOperation) -> anyhow::Result<bool> {
        Ok(self.update(op).await.committed(self.policy))
    }
}

fn joined_success(result: Result<MirrorOperation, tokio::task::JoinError>) -> bool {
    match result {
        Ok(op) => op.succeeded(),
        Err(e) => {
            warn!("mirror write task failed: {e}");
            false
        }
    }
}

impl StorageBackend for MirrorBackend {
    fn backend_name(&self) -> &'static str {
        "mirror"
    }

    fn enter(&self) -> BackendFuture<'_, bool> {
        Box::pin(async move {
            let primary = match self.primary.enter().await {
                Ok(ok) => ok,
                Err(e) => {
                    warn!("mirror primary ({}) enter failed: {e:#}", self.primary.backend_name());
                    false
                }
            };
            let secondary = match self.secondary.enter().await {
                Ok(ok) => ok,
                Err(e) => {
                    warn!(
                        "mirror secondary ({}) enter failed: {e:#}",
                        self.secondary.backend_name()
                    );
                    false
                }
            };
            Ok(primary || secondary)
        })
    }

    fn exit(&self) -> BackendFuture<'_, ()> {
        Box::pin(async move {
            if let Err(e) = self.primary.exit().await {
                warn!("mirror primary exit failed: {e:#}");
            }
            if let Err(e) = self.secondary.exit().await {
                warn!("mirror secondary exit failed: {e:#}");
            }
            Ok(())
        })
    }

    fn list_account_containers(&self) -> BackendFuture<'_, Vec<String>> {
        Box::pin(async move {
            match self.primary.list_account_containers().await {
                Ok(list) if !list.is_empty() => return Ok(list),
                Ok(_) => debug!("mirror primary has no containers; asking secondary"),
                Err(e) => warn!("mirror primary list_account_containers failed: {e:#}"),
            }
            match self.secondary.list_account_containers().await {
                Ok(list) => Ok(list),
                Err(e) => {
                    warn!("mirror secondary list_account_containers failed: {e:#}");
                    Ok(Vec::new())
                }
            }
        })
    }

    fn create_container(&self, container: &str) -> BackendFuture<'_, bool> {
        let op = MirrorOperation::create_container(container);
        Box::pin(self.write(op))
    }

    fn delete_container(&self, container: &str) -> BackendFuture<'_, bool> {
        let op = MirrorOperation::delete_container(container);
        Box::pin(self.write(op))
    }

    fn list_container_contents(&self, container: &str) -> BackendFuture<'_, Vec<String>> {
        let container = container.to_string();
        Box::pin(async move {
            match self.primary.list_container_contents(&container).await {
                Ok(list) if !list.is_empty() => return Ok(list),
                Ok(_) => debug!("mirror primary has no objects in '{container}'; asking secondary"),
                Err(e) => warn!("mirror primary list_container_contents failed: {e:#}"),
            }
            match self.secondary.list_container_contents(&container).await {
                Ok(list) => Ok(list),
                Err(e) => {
                    warn!("mirror secondary list_container_contents failed: {e:#}");
                    Ok(Vec::new())
                }
            }
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
            match self.primary.get_object_metadata(&container, &object).await {
                Ok(Some(headers)) => return Ok(Some(headers)),
                Ok(None) => debug!("mirror primary lacks {container}/{object}; asking secondary"),
                Err(e) => warn!("mirror primary get_object_metadata failed: {e:#}"),
            }
            match self.secondary.get_object_metadata(&container, &object).await {
                Ok(headers) => Ok(headers),
                Err(e) => {
                    warn!("mirror secondary get_object_metadata failed: {e:#}");
                    Ok(None)
                }
            }
        })
    }

    fn put_object(
        &self,
        container: &str,
        object: &str,
        data: Bytes,
        headers: Option<&PropertySet>,
    ) -> BackendFuture<'_, bool> {
        let op = MirrorOperation::put_object(container, object, ObjectPayload::Bytes(data), headers);
        Box::pin(self.write(op))
    }

    fn put_object_from_file(
        &self,
        container: &str,
        object: &str,
        local_path: &Path,
        headers: Option<&PropertySet>,
    ) -> BackendFuture<'_, bool> {
        let op = MirrorOperation::put_object(
            container,
            object,
            ObjectPayload::File(local_path.to_path_buf()),
            headers,
        );
        Box::pin(self.write(op))
    }

    fn delete_object(&self, container: &str, object: &str) -> BackendFuture<'_, bool> {
        let op = MirrorOperation::delete_object(container, object);
        Box::pin(self.write(op))
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
            match self.primary.get_object(&container, &object, &local_path).await {
                Ok(n) if n > 0 => return Ok(n),
                Ok(_) => debug!("mirror primary lacks {container}/{object}; asking secondary"),
                Err(e) => warn!("mirror primary get_object failed: {e:#}"),
            }
            match self.secondary.get_object(&container, &object, &local_path).await {
                Ok(n) => Ok(n),
                Err(e) => {
                    warn!("mirror secondary get_object failed: {e:#}");
                    Ok(0)
                }
            }
        })
    }
}

// ── Tests ───────────────────────────────────────────────────────────
