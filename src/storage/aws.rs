//! AWS S3 storage backend.
//!
//! Stores every jukebox container inside a single upstream S3 bucket.
//!
//! Key mapping:
//!   Container marker: `{prefix}{container_prefix}{container}/`
//!   Objects:          `{prefix}{container_prefix}{container}/{object}`
//!
//! A container exists when its zero-length marker key exists.  Object
//! headers travel as S3 user metadata, each value encoded as `type|value`.
//!
//! Credentials are resolved via the standard AWS credential chain
//! (env vars, `~/.aws/credentials`, IAM role, etc.) unless explicit keys
//! are configured.

use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{Delete, ObjectIdentifier};
use aws_sdk_s3::Client;
use bytes::Bytes;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info};

use super::backend::{read_upload_file, valid_names, write_download, BackendFuture, StorageBackend};
use super::properties::PropertySet;
use crate::config::S3Config;

/// Backend that keeps containers as key prefixes in one S3 bucket.
pub struct S3Backend {
    /// AWS S3 SDK client.
    client: Client,
    /// The upstream bucket holding every container.
    bucket: String,
    /// `{prefix}{container_prefix}`, prepended to every container name.
    base: String,
    authenticated: AtomicBool,
}

impl S3Backend {
    /// Create a new S3 backend.
    ///
    /// Explicit credentials in `config` take precedence over the default
    /// credential chain.
    pub async fn new(config: &S3Config, container_prefix: &str) -> anyhow::Result<Self> {
        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(aws_config::Region::new(config.region.clone()));

        if !config.endpoint_url.is_empty() {
            loader = loader.endpoint_url(&config.endpoint_url);
        }

        let (ak, sk) = (&config.access_key_id, &config.secret_access_key);
        if !ak.is_empty() && !sk.is_empty() {
            let creds = aws_sdk_s3::config::Credentials::new(ak, sk, None, None, "jukebox-config");
            loader = loader.credentials_provider(creds);
        }

        let sdk_config = loader.load().await;
        let s3_config = aws_sdk_s3::config::Builder::from(&sdk_config)
            .force_path_style(config.use_path_style)
            .build();

        let base = container_base(&config.prefix, container_prefix);
        info!(
            "S3 backend initialized: bucket={} base='{}'",
            config.bucket, base
        );

        Ok(Self {
            client: Client::from_conf(s3_config),
            bucket: config.bucket.clone(),
            base,
            authenticated: AtomicBool::new(false),
        })
    }

    pub fn is_authenticated(&self) -> bool {
        self.authenticated.load(Ordering::SeqCst)
    }

    fn marker_key(&self, container: &str) -> String {
        format!("{}{}/", self.base, container)
    }

    fn object_key(&self, container: &str, object: &str) -> String {
        object_key(&self.base, container, object)
    }

    /// Map an AWS SDK error to an anyhow error with context.
    fn map_sdk_error(context: &str, err: impl std::fmt::Display) -> anyhow::Error {
        anyhow::anyhow!("AWS S3 {context}: {err}")
    }

    async fn key_exists(&self, key: &str) -> anyhow::Result<bool> {
        match self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
        {
            Ok(_) => Ok(true),
            Err(e) => {
                let service_err = e.into_service_error();
                if service_err.is_not_found() {
                    Ok(false)
                } else {
                    Err(Self::map_sdk_error("head_object", service_err))
                }
            }
        }
    }

    /// Every key under `prefix`, following continuation tokens.
    async fn list_keys(&self, prefix: &str) -> anyhow::Result<Vec<String>> {
        let mut keys = Vec::new();
        let mut continuation_token: Option<String> = None;
        loop {
            let mut req = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket)
                .prefix(prefix);
            if let Some(ref token) = continuation_token {
                req = req.continuation_token(token);
            }
            let resp = req
                .send()
                .await
                .map_err(|e| Self::map_sdk_error("list_objects_v2", e))?;

            keys.extend(resp.contents().iter().filter_map(|o| o.key().map(str::to_string)));

            if resp.is_truncated() == Some(true) {
                continuation_token = resp.next_continuation_token().map(str::to_string);
            } else {
                break;
            }
        }
        Ok(keys)
    }

    async fn store(
        &self,
        container: &str,
        object: &str,
        data: Bytes,
        headers: Option<PropertySet>,
    ) -> anyhow::Result<bool> {
        if !self.key_exists(&self.marker_key(container)).await? {
            debug!("S3 put into missing container '{container}'");
            return Ok(false);
        }
        let key = self.object_key(container, object);
        debug!("S3 put_object: bucket={} key={}", self.bucket, key);

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(&key)
            .set_metadata(headers.map(|h| h.to_string_map()))
            .body(ByteStream::from(data))
            .send()
            .await
            .map_err(|e| Self::map_sdk_error("put_object", e))?;
        Ok(true)
    }
}

fn container_base(prefix: &str, container_prefix: &str) -> String {
    format!("{prefix}{container_prefix}")
}

fn object_key(base: &str, container: &str, object: &str) -> String {
    format!("{base}{container}/{object}")
}

/// Container name from a common prefix such as `base/songs/`.
fn container_from_common_prefix<'a>(base: &str, common_prefix: &'a str) -> Option<&'a str> {
    common_prefix
        .strip_prefix(base)
        .and_then(|rest| rest.strip_suffix('/'))
        .filter(|name| !name.is_empty() && !name.contains('/'))
}

/// Object name from a full key inside a container, skipping the marker.
fn object_from_key<'a>(container_key: &str, key: &'a str) -> Option<&'a str> {
    key.strip_prefix(container_key)
        .filter(|name| !name.is_empty() && !name.contains('/'))
}

impl StorageBackend for S3Backend {
    fn backend_name(&self) -> &'static str {
        "s3"
    }

    fn enter(&self) -> BackendFuture<'_, bool> {
        Box::pin(async move {
            self.client
                .head_bucket()
                .bucket(&self.bucket)
                .send()
                .await
                .map_err(|e| Self::map_sdk_error("head_bucket", e))?;
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
            let mut containers = Vec::new();
            let mut continuation_token: Option<String> = None;
            loop {
                let mut req = self
                    .client
                    .list_objects_v2()
                    .bucket(&self.bucket)
                    .prefix(&self.base)
                    .delimiter("/");
                if let Some(ref token) = continuation_token {
                    req = req.continuation_token(token);
                }
                let resp = req
                    .send()
                    .await
                    .map_err(|e| Self::map_sdk_error("list_objects_v2 (containers)", e))?;

                containers.extend(
                    resp.common_prefixes()
                        .iter()
                        .filter_map(|cp| cp.prefix())
                        .filter_map(|p| container_from_common_prefix(&self.base, p))
                        .map(str::to_string),
                );

                if resp.is_truncated() == Some(true) {
                    continuation_token = resp.next_continuation_token().map(str::to_string);
                } else {
                    break;
                }
            }
            containers.sort();
            Ok(containers)
        })
    }

    fn create_container(&self, container: &str) -> BackendFuture<'_, bool> {
        let container = container.to_string();
        Box::pin(async move {
            if container.is_empty() {
                return Ok(false);
            }
            let marker = self.marker_key(&container);
            if self.key_exists(&marker).await? {
                return Ok(false);
            }
            self.client
                .put_object()
                .bucket(&self.bucket)
                .key(&marker)
                .body(ByteStream::from(Bytes::new()))
                .send()
                .await
                .map_err(|e| Self::map_sdk_error("put_object (container marker)", e))?;
            debug!("S3 created container '{container}'");
            Ok(true)
        })
    }

    fn delete_container(&self, container: &str) -> BackendFuture<'_, bool> {
        let container = container.to_string();
        Box::pin(async move {
            if container.is_empty() {
                return Ok(false);
            }
            let marker = self.marker_key(&container);
            if !self.key_exists(&marker).await? {
                return Ok(false);
            }

            // Batch delete in pages of at most 1000 keys.
            let keys = self.list_keys(&marker).await?;
            for chunk in keys.chunks(1000) {
                let objects: Vec<ObjectIdentifier> = chunk
                    .iter()
                    .filter_map(|k| ObjectIdentifier::builder().key(k).build().ok())
                    .collect();
                if objects.is_empty() {
                    continue;
                }
                let delete = Delete::builder()
                    .set_objects(Some(objects))
                    .quiet(true)
                    .build()
                    .map_err(|e| Self::map_sdk_error("delete_objects build", e))?;
                self.client
                    .delete_objects()
                    .bucket(&self.bucket)
                    .delete(delete)
                    .send()
                    .await
                    .map_err(|e| Self::map_sdk_error("delete_objects", e))?;
            }
            debug!("S3 deleted container '{container}' ({} keys)", keys.len());
            Ok(true)
        })
    }

    fn list_container_contents(&self, container: &str) -> BackendFuture<'_, Vec<String>> {
        let container = container.to_string();
        Box::pin(async move {
            let container_key = self.marker_key(&container);
            let keys = self.list_keys(&container_key).await?;
            Ok(keys
                .iter()
                .filter_map(|k| object_from_key(&container_key, k))
                .map(str::to_string)
                .collect())
        })
    }

    fn get_object_metadata(
        &self,
        container: &str,
        object: &str,
    ) -> BackendFuture<'_, Option<PropertySet>> {
        let key = self.object_key(container, object);
        let usable = valid_names(container, object);
        Box::pin(async move {
            if !usable {
                return Ok(None);
            }
            match self
                .client
                .head_object()
                .bucket(&self.bucket)
                .key(&key)
                .send()
                .await
            {
                Ok(resp) => Ok(Some(
                    resp.metadata()
                        .map(PropertySet::from_string_map)
                        .unwrap_or_default(),
                )),
                Err(e) => {
                    let service_err = e.into_service_error();
                    if service_err.is_not_found() {
                        Ok(None)
                    } else {
                        Err(Self::map_sdk_error("head_object", service_err))
                    }
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
        let key = self.object_key(container, object);
        let usable = valid_names(container, object);
        Box::pin(async move {
            // S3 deletes are idempotent, so check first to report a missing object.
            if !usable || !self.key_exists(&key).await? {
                return Ok(false);
            }
            debug!("S3 delete_object: bucket={} key={}", self.bucket, key);
            self.client
                .delete_object()
                .bucket(&self.bucket)
                .key(&key)
                .send()
                .await
                .map_err(|e| Self::map_sdk_error("delete_object", e))?;
            Ok(true)
        })
    }

    fn get_object(
        &self,
        container: &str,
        object: &str,
        local_path: &Path,
    ) -> BackendFuture<'_, u64> {
        let key = self.object_key(container, object);
        let usable = valid_names(container, object);
        let local_path = local_path.to_path_buf();
        Box::pin(async move {
            if !usable {
                return Ok(0);
            }
            debug!("S3 get_object: bucket={} key={}", self.bucket, key);
            let resp = match self
                .client
                .get_object()
                .bucket(&self.bucket)
                .key(&key)
                .send()
                .await
            {
                Ok(resp) => resp,
                Err(e) => {
                    let service_err = e.into_service_error();
                    if service_err.is_no_such_key() {
                        return Ok(0);
                    }
                    return Err(Self::map_sdk_error("get_object", service_err));
                }
            };

            let body = resp
                .body
                .collect()
                .await
                .map_err(|e| Self::map_sdk_error("get_object body", e))?
                .into_bytes();
            if body.is_empty() {
                return Ok(0);
            }
            write_download(&local_path, &body)
        })
    }
}

// ── Tests ───────────────────────────────────────────────────────────
