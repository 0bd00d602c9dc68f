//! Backup producer: dump → gzip → optional age → file, then local retention.

use crate::artifact::{ArtifactName, ENCRYPTED_SUFFIX};
use crate::codec::{self, StreamHeader};
use crate::encryption::Encryptor;
use crate::process::{self, ToolCommand};
use crate::retention::{Retention, RetentionPolicy};
use crate::utils::errors::BackupError;
use crate::utils::{format_bytes, format_duration};
use chrono::Utc;
use chrono_tz::Tz;
use flate2::Compression;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::io::SyncIoBridge;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct ProducerOptions {
    pub output_dir: PathBuf,
    pub naming: ArtifactName,
    pub dump: ToolCommand,
    pub encryptor: Option<Encryptor>,
    /// Applied to `output_dir` after each successful run
    pub retention: RetentionPolicy,
    /// Database whose backups retention considers
    pub database: String,
    pub timezone: Tz,
    pub compression: Compression,
}

/// Result of a successful run.
#[derive(Debug, Clone)]
pub struct BackupArtifact {
    pub path: PathBuf,
    pub file_name: String,
    pub size: u64,
    pub duration: Duration,
    /// Files deleted by retention after this run
    pub pruned: usize,
}

pub struct BackupProducer {
    opts: ProducerOptions,
}

impl BackupProducer {
    pub fn new(opts: ProducerOptions) -> Self {
        Self { opts }
    }

    /// Produce one artifact, terminating the dump if it outlives `deadline`.
    ///
    /// On any failure, or if this future is dropped before it completes, the
    /// partial file is removed. Retention problems after a successful dump are
    /// logged and do not fail the run.
    pub async fn run(&self, deadline: Instant) -> Result<BackupArtifact, BackupError> {
        let opts = &self.opts;
        tokio::fs::create_dir_all(&opts.output_dir)
            .await
            .map_err(|source| BackupError::OutputDir {
                path: opts.output_dir.clone(),
                source,
            })?;

        let started = Utc::now();
        let mut file_name = opts.naming.base_name(&started.with_timezone(&opts.timezone));
        if opts.encryptor.is_some() {
            file_name.push_str(ENCRYPTED_SUFFIX);
        }
        let path = opts.output_dir.join(&file_name);
        let header = StreamHeader {
            name: file_name.clone(),
            mtime: u32::try_from(started.timestamp()).unwrap_or(0),
        };

        info!("Starting backup: {}", path.display());
        let clock = std::time::Instant::now();

        // Removes the file on every exit path, including cancellation of this future.
        let partial = PartialFile::new(path.clone());
        let written = self.dump_into(&path, header, deadline).await?;

        let size = tokio::fs::metadata(&path)
            .await
            .map_err(|source| BackupError::Stat {
                path: path.clone(),
                source,
            })?
            .len();
        if written == 0 || size == 0 {
            return Err(BackupError::EmptyArtifact { path });
        }
        partial.keep();

        let duration = clock.elapsed();
        info!(
            "Backup completed: {} ({}, {})",
            file_name,
            format_bytes(size),
            format_duration(duration)
        );

        let pruned = self.apply_retention().await;

        Ok(BackupArtifact {
            path,
            file_name,
            size,
            duration,
            pruned,
        })
    }

    /// Stream the dump's stdout through the codec into `path`; returns raw dump bytes.
    async fn dump_into(
        &self,
        path: &Path,
        header: StreamHeader,
        deadline: Instant,
    ) -> Result<u64, BackupError> {
        let opts = &self.opts;
        let file = std::fs::File::create(path).map_err(|source| BackupError::CreateFile {
            path: path.to_path_buf(),
            source,
        })?;

        let tool = opts.dump.tool_name();
        let mut child = opts.dump.spawn(Stdio::null(), Stdio::piped())?;
        if let Some(stderr) = child.stderr.take() {
            process::forward_stderr(stderr, tool.clone());
        }
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| BackupError::Stream(io::Error::other("dump stdout not captured")))?;

        // The sink owns stdout; if it fails the pipe closes and the dump exits.
        let source = SyncIoBridge::new(stdout);
        let encryptor = opts.encryptor.clone();
        let level = opts.compression;
        let sink = tokio::task::spawn_blocking(move || {
            codec::encode_into(source, file, &header, encryptor.as_ref(), level)
        });

        let status = process::wait_until(&mut child, &tool, deadline).await;
        let written = sink
            .await
            .map_err(|e| BackupError::Stream(io::Error::other(e)))?;

        status?;
        written.map_err(BackupError::Stream)
    }

    async fn apply_retention(&self) -> usize {
        let opts = &self.opts;
        if !opts.retention.is_enabled() {
            return 0;
        }

        let retention = Retention::new(&opts.output_dir, &opts.database, opts.retention);
        match tokio::task::spawn_blocking(move || retention.run()).await {
            Ok(Ok(removed)) => removed.len(),
            Ok(Err(e)) => {
                warn!("Retention failed: {}", e);
                0
            }
            Err(e) => {
                warn!("Retention task failed: {}", e);
                0
            }
        }
    }
}

/// An artifact being written; deleted on drop unless kept.
struct PartialFile {
    path: Option<PathBuf>,
}

impl PartialFile {
    fn new(path: PathBuf) -> Self {
        Self { path: Some(path) }
    }

    fn keep(mut self) {
        self.path = None;
    }
}

impl Drop for PartialFile {
    fn drop(&mut self) {
        let Some(path) = self.path.take() else {
            return;
        };
        match std::fs::remove_file(&path) {
            Ok(()) => debug!("Removed partial backup {}", path.display()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!("Failed to remove partial backup {}: {}", path.display(), e),
        }
    }
}
