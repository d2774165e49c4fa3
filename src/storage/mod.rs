//! Object storage backends.
//!
//! The [`backend::StorageBackend`] trait abstracts over where song bytes
//! physically live.  Implementations include local disk, an in-memory
//! store, AWS S3, and a mirror that writes to two of the others.

pub mod aws;
pub mod backend;
pub mod local;
pub mod memory;
pub mod mirror;
pub mod properties;

use std::sync::Arc;
use tracing::info;

use crate::config::StorageConfig;
use crate::errors::JukeboxError;
use backend::StorageBackend;

/// Build the storage backend named by `config.backend`.
pub async fn build_backend(
    config: &StorageConfig,
) -> Result<Arc<dyn StorageBackend>, JukeboxError> {
    if config.backend == "mirror" {
        let mirror_config = config.mirror.as_ref().ok_or_else(|| JukeboxError::InvalidConfig {
            message: "storage.backend is 'mirror' but storage.mirror section is missing"
                .to_string(),
        })?;
        let primary = build_single(&mirror_config.primary, config).await?;
        let secondary = build_single(&mirror_config.secondary, config).await?;
        info!(
            "Mirror storage backend initialized: primary={} secondary={} parallel={} policy={:?}",
            mirror_config.primary,
            mirror_config.secondary,
            mirror_config.parallel,
            mirror_config.write_policy
        );
        return Ok(Arc::new(mirror::MirrorBackend::new(
            primary,
            secondary,
            mirror_config.parallel,
            mirror_config.write_policy,
        )));
    }
    build_single(&config.backend, config).await
}

async fn build_single(
    name: &str,
    config: &StorageConfig,
) -> Result<Arc<dyn StorageBackend>, JukeboxError> {
    let prefix = config.container_prefix.as_str();
    match name {
        "local" => {
            let root = &config.local.root_dir;
            let backend = local::LocalBackend::new(root, prefix)?;
            info!("Local storage backend initialized at {}", root.display());
            Ok(Arc::new(backend))
        }
        "memory" => {
            info!(
                "Memory storage backend initialized (max_size_bytes={})",
                config.memory.max_size_bytes
            );
            Ok(Arc::new(memory::MemoryBackend::new(
                config.memory.max_size_bytes,
                prefix,
            )))
        }
        "s3" => {
            let s3_config = config.s3.as_ref().ok_or_else(|| JukeboxError::InvalidConfig {
                message: format!("storage backend '{name}' needs a storage.s3 section"),
            })?;
            Ok(Arc::new(aws::S3Backend::new(s3_config, prefix).await?))
        }
        "mirror" => Err(JukeboxError::InvalidConfig {
            message: "a mirror cannot wrap another mirror".to_string(),
        }),
        other => Err(JukeboxError::UnknownBackend {
            name: other.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MirrorConfig;
    use crate::storage::mirror::WritePolicy;

    #[tokio::test]
    async fn test_build_memory_backend() {
        let config = StorageConfig {
            backend: "memory".to_string(),
            ..StorageConfig::default()
        };
        let backend = build_backend(&config).await.unwrap();
        assert_eq!(backend.backend_name(), "memory");
    }

    #[tokio::test]
    async fn test_build_local_backend() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = StorageConfig::default();
        config.local.root_dir = dir.path().join("objects");
        let backend = build_backend(&config).await.unwrap();
        assert_eq!(backend.backend_name(), "local");
        assert!(dir.path().join("objects").is_dir());
    }

    #[tokio::test]
    async fn test_build_mirror_of_local_and_memory() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = StorageConfig {
            backend: "mirror".to_string(),
            mirror: Some(MirrorConfig {
                primary: "local".to_string(),
                secondary: "memory".to_string(),
                parallel: false,
                write_policy: WritePolicy::AtLeastOne,
            }),
            ..StorageConfig::default()
        };
        config.local.root_dir = dir.path().to_path_buf();
        let backend = build_backend(&config).await.unwrap();
        assert_eq!(backend.backend_name(), "mirror");
    }

    #[tokio::test]
    async fn test_nested_mirror_rejected() {
        let config = StorageConfig {
            backend: "mirror".to_string(),
            mirror: Some(MirrorConfig {
                primary: "mirror".to_string(),
                secondary: "memory".to_string(),
                parallel: false,
                write_policy: WritePolicy::AtLeastOne,
            }),
            ..StorageConfig::default()
        };
        assert!(matches!(
            build_backend(&config).await,
            Err(JukeboxError::InvalidConfig { .. })
        ));
    }

    #[tokio::test]
    async fn test_unknown_and_incomplete_backends() {
        let config = StorageConfig {
            backend: "swift".to_string(),
            ..StorageConfig::default()
        };
        assert!(matches!(
            build_backend(&config).await,
            Err(JukeboxError::UnknownBackend { .. })
        ));

        let config = StorageConfig {
            backend: "s3".to_string(),
            ..StorageConfig::default()
        };
        assert!(matches!(
            build_backend(&config).await,
            Err(JukeboxError::InvalidConfig { .. })
        ));
    }
}
