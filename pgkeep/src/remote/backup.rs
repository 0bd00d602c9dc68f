//! Remote backup: produce into a staging directory, then upload to the provider.

use super::{RemoteHandle, RemoteNaming};
use crate::config::RemoteProvider;
use crate::encryption::Encryptor;
use crate::process::ToolCommand;
use crate::producer::{BackupProducer, ProducerOptions};
use crate::retention::RetentionPolicy;
use crate::utils::errors::BackupError;
use crate::utils::format_bytes;
use chrono_tz::Tz;
use flate2::Compression;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, warn};

/// Outcome of an uploaded remote backup.
#[derive(Debug, Clone)]
pub struct RemoteUpload {
    pub provider: String,
    pub remote_path: String,
    pub version: Option<u32>,
    pub size: u64,
    pub duration: Duration,
}

pub struct RemoteBackup {
    provider: RemoteProvider,
    database: String,
    dump: ToolCommand,
    encryptor: Option<Encryptor>,
    timezone: Tz,
    staging_dir: PathBuf,
}

impl RemoteBackup {
    pub fn new(
        provider: RemoteProvider,
        database: impl Into<String>,
        dump: ToolCommand,
        encryptor: Option<Encryptor>,
        timezone: Tz,
    ) -> Self {
        let staging_dir = std::env::temp_dir()
            .join("pgkeep")
            .join(&provider.name);
        Self {
            provider,
            database: database.into(),
            dump,
            encryptor,
            timezone,
            staging_dir,
        }
    }

    /// Stage files somewhere other than the system temp directory.
    pub fn with_staging_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.staging_dir = dir.into();
        self
    }

    pub fn naming(&self) -> RemoteNaming {
        RemoteNaming::new(
            &self.database,
            &self.provider.path,
            self.provider.max_versions,
            self.encryptor.is_some(),
        )
    }

    /// Dump, stage and upload one artifact before `deadline`.
    ///
    /// The staged file is removed whether or not the upload succeeds.
    pub async fn run(
        &self,
        handle: &RemoteHandle,
        deadline: Instant,
    ) -> Result<RemoteUpload, BackupError> {
        let naming = self.naming();
        let clock = std::time::Instant::now();

        let version = if naming.is_versioned() {
            let existing = tokio::time::timeout_at(deadline, handle.list(&self.provider.path))
                .await
                .map_err(|_| BackupError::DeadlineExceeded)??;
            Some(naming.next_version(&existing))
        } else {
            None
        };

        let producer = BackupProducer::new(ProducerOptions {
            output_dir: self.staging_dir.clone(),
            naming: naming.artifact_name(version.unwrap_or(0)),
            dump: self.dump.clone(),
            encryptor: self.encryptor.clone(),
            retention: RetentionPolicy::None,
            database: self.database.clone(),
            timezone: self.timezone,
            compression: Compression::default(),
        });

        let artifact = producer.run(deadline).await?;
        let staged = StagedFile(artifact.path.clone());
        let remote_path = naming.remote_path(&artifact.file_name);

        info!(
            provider = %self.provider.name,
            "Uploading {} ({}) to {}",
            artifact.file_name,
            format_bytes(artifact.size),
            remote_path
        );
        tokio::time::timeout_at(deadline, handle.upload(staged.path(), &remote_path))
            .await
            .map_err(|_| BackupError::DeadlineExceeded)??;

        Ok(RemoteUpload {
            provider: self.provider.name.clone(),
            remote_path,
            version,
            size: artifact.size,
            duration: clock.elapsed(),
        })
    }
}

/// A local temporary copy removed on drop.
pub(crate) struct StagedFile(pub PathBuf);

impl StagedFile {
    pub fn path(&self) -> &Path {
        &self.0
    }
}

impl Drop for StagedFile {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.0) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!("Failed to remove staged file {}: {}", self.0.display(), e);
            }
        }
    }
}
