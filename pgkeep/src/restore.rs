//! Restore flow: hold the restore lock, resolve a backup, stream it into `pg_restore`.

use crate::artifact::BackupFile;
use crate::catalog::{Catalog, LOCAL_SOURCE};
use crate::codec;
use crate::encryption::Encryptor;
use crate::lock::RestoreLock;
use crate::process::{self, ToolCommand};
use crate::remote::backup::StagedFile;
use crate::utils::errors::RestoreError;
use crate::utils::{format_bytes, format_duration};
use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use tokio::time::Instant;
use tokio_util::io::SyncIoBridge;
use tracing::info;

/// Which backup of a source to restore.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackupSelector {
    ShortId(String),
    Latest,
}

pub struct Restore {
    catalog: Arc<Catalog>,
    lock: Arc<RestoreLock>,
    command: ToolCommand,
    encryptor: Option<Encryptor>,
    staging_dir: PathBuf,
}

impl Restore {
    pub fn new(
        catalog: Arc<Catalog>,
        lock: Arc<RestoreLock>,
        command: ToolCommand,
        encryptor: Option<Encryptor>,
    ) -> Self {
        Self {
            catalog,
            lock,
            command,
            encryptor,
            staging_dir: std::env::temp_dir(),
        }
    }

    /// Download remote backups under `dir` instead of the system temp directory
    pub fn with_staging_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.staging_dir = dir.into();
        self
    }

    /// Restore one backup of `source` before `deadline`.
    ///
    /// Scheduled backups are skipped for as long as this holds the restore lock.
    pub async fn run(
        &self,
        source: &str,
        selector: &BackupSelector,
        deadline: Instant,
    ) -> Result<BackupFile, RestoreError> {
        info!("Waiting for restore lock: {}", self.lock.path().display());
        let _guard = tokio::time::timeout_at(deadline, self.lock.hold())
            .await
            .map_err(|_| RestoreError::LockTimeout)??;

        let file = self.select(source, selector).await?;
        if file.encrypted && self.encryptor.is_none() {
            return Err(RestoreError::MissingKey(file.name));
        }

        let clock = std::time::Instant::now();
        info!(
            "Restoring {} ({}) from {}",
            file.name,
            format_bytes(file.size),
            source
        );

        if source == LOCAL_SOURCE {
            self.feed(Path::new(&file.path), file.encrypted, deadline).await?;
        } else {
            let staged = self.download(source, &file, deadline).await?;
            self.feed(staged.path(), file.encrypted, deadline).await?;
        }

        info!(
            "Restore completed: {} in {}",
            file.name,
            format_duration(clock.elapsed())
        );
        Ok(file)
    }

    async fn select(
        &self,
        source: &str,
        selector: &BackupSelector,
    ) -> Result<BackupFile, RestoreError> {
        let files = self.catalog.list(source).await?;
        match selector {
            BackupSelector::Latest => files
                .into_iter()
                .next()
                .ok_or_else(|| RestoreError::NoBackups(source.to_string())),
            BackupSelector::ShortId(id) => files
                .into_iter()
                .find(|f| f.short_id == *id)
                .ok_or_else(|| RestoreError::NotFound {
                    id: id.clone(),
                    source_name: source.to_string(),
                }),
        }
    }

    async fn download(
        &self,
        source: &str,
        file: &BackupFile,
        deadline: Instant,
    ) -> Result<StagedFile, RestoreError> {
        tokio::fs::create_dir_all(&self.staging_dir)
            .await
            .map_err(|source| RestoreError::Open {
                path: self.staging_dir.clone(),
                source,
            })?;

        let handle = self.catalog.connect(source)?;
        let staged = StagedFile(self.staging_dir.join(format!("pgkeep-restore-{}", file.name)));
        info!("Downloading {} from {}", file.path, source);
        tokio::time::timeout_at(deadline, handle.download(&file.path, staged.path()))
            .await
            .map_err(|_| RestoreError::DeadlineExceeded)?
            .map_err(RestoreError::Download)?;
        Ok(staged)
    }

    /// Decode `path` into the restore command's stdin.
    async fn feed(
        &self,
        path: &Path,
        encrypted: bool,
        deadline: Instant,
    ) -> Result<(), RestoreError> {
        let file = std::fs::File::open(path).map_err(|source| RestoreError::Open {
            path: path.to_path_buf(),
            source,
        })?;
        // Fail on a bad key before pg_restore touches the database.
        let reader = codec::decode_from(file, self.encryptor.as_ref().filter(|_| encrypted))?;

        let tool = self.command.tool_name();
        let mut child = self.command.spawn(Stdio::piped(), Stdio::null())?;
        if let Some(stderr) = child.stderr.take() {
            process::forward_stderr(stderr, tool.clone());
        }
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| RestoreError::Stream(io::Error::other("restore stdin not captured")))?;

        let feeder = tokio::task::spawn_blocking(move || {
            let mut reader = reader;
            let mut sink = SyncIoBridge::new(stdin);
            io::copy(&mut reader, &mut sink)
        });

        let status = process::wait_until(&mut child, &tool, deadline).await;
        let fed = feeder
            .await
            .map_err(|e| RestoreError::Stream(io::Error::other(e)))?;

        status?;
        fed.map(|_| ()).map_err(RestoreError::Stream)
    }
}
