//! Backup entry points shared by the scheduler, the command line and startup runs.

use crate::artifact::ArtifactName;
use crate::config::{Config, RemoteProvider};
use crate::encryption::Encryptor;
use crate::lock::RestoreLock;
use crate::notify::{MultiNotifier, Notifier};
use crate::process::ToolCommand;
use crate::producer::{BackupArtifact, BackupProducer, ProducerOptions};
use crate::remote::{RcloneConnector, RemoteBackup, RemoteConnector, RemoteUpload};
use crate::utils::errors::{BackupError, ConfigError};
use crate::utils::{format_bytes, format_duration};
use chrono_tz::Tz;
use flate2::Compression;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{error, info, warn};

/// Deadline for one scheduled local backup
pub const LOCAL_JOB_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// Name under which local backups appear in job status and logs
pub const LOCAL_JOB_NAME: &str = "local";

/// External pieces the coordinator drives.
pub struct Collaborators {
    pub lock: Arc<RestoreLock>,
    pub notifier: Arc<dyn Notifier>,
    pub connector: Arc<dyn RemoteConnector>,
    pub dump: ToolCommand,
}

impl Collaborators {
    /// Production setup: cache-dir lock, configured notifiers, rclone, pg_dump
    pub fn from_config(config: &Config) -> Self {
        Self {
            lock: Arc::new(RestoreLock::new()),
            notifier: Arc::new(MultiNotifier::from_config(&config.notification)),
            connector: Arc::new(RcloneConnector::new()),
            dump: ToolCommand::pg_dump(&config.database),
        }
    }
}

pub struct Coordinator {
    config: Config,
    lock: Arc<RestoreLock>,
    notifier: Arc<dyn Notifier>,
    connector: Arc<dyn RemoteConnector>,
    dump: ToolCommand,
    encryptor: Option<Encryptor>,
    timezone: Tz,
    local: BackupProducer,
    staging_dir: Option<PathBuf>,
    running: Mutex<usize>,
}

/// Counts one running local job until dropped.
struct RunningJob<'a>(&'a Mutex<usize>);

impl<'a> RunningJob<'a> {
    fn start(counter: &'a Mutex<usize>) -> Self {
        *lock_counter(counter) += 1;
        Self(counter)
    }
}

impl Drop for RunningJob<'_> {
    fn drop(&mut self) {
        let mut count = lock_counter(self.0);
        *count = count.saturating_sub(1);
    }
}

fn lock_counter(counter: &Mutex<usize>) -> MutexGuard<'_, usize> {
    counter.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Coordinator {
    pub fn new(config: Config, collaborators: Collaborators) -> Result<Self, ConfigError> {
        let timezone = config.timezone()?;
        let encryptor = Encryptor::from_key(config.encryption_key())
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        let retention = config
            .local
            .retention
            .policy()
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;

        let local = BackupProducer::new(ProducerOptions {
            output_dir: config.local.dir.clone(),
            naming: ArtifactName::Timestamped {
                database: config.database.name.clone(),
            },
            dump: collaborators.dump.clone(),
            encryptor: encryptor.clone(),
            retention,
            database: config.database.name.clone(),
            timezone,
            compression: Compression::default(),
        });

        Ok(Self {
            config,
            lock: collaborators.lock,
            notifier: collaborators.notifier,
            connector: collaborators.connector,
            dump: collaborators.dump,
            encryptor,
            timezone,
            local,
            staging_dir: None,
            running: Mutex::new(0),
        })
    }

    /// Stage remote uploads under `dir` instead of the system temp directory
    pub fn with_staging_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.staging_dir = Some(dir.into());
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn timezone(&self) -> Tz {
        self.timezone
    }

    /// Local backups currently running on behalf of the scheduler.
    pub fn running_jobs(&self) -> usize {
        *lock_counter(&self.running)
    }

    /// Run a local backup now. Skipped with an error while a restore holds the lock.
    pub async fn backup_local(&self, timeout: Duration) -> Result<BackupArtifact, BackupError> {
        if self.lock.probe() {
            return Err(BackupError::RestoreInProgress);
        }
        self.local.run(Instant::now() + timeout).await
    }

    /// Run a backup to one enabled provider now.
    pub async fn backup_remote(
        &self,
        provider: &str,
        timeout: Duration,
    ) -> Result<RemoteUpload, BackupError> {
        if self.lock.probe() {
            return Err(BackupError::RestoreInProgress);
        }
        let provider = self
            .config
            .provider(provider)
            .ok_or_else(|| BackupError::UnknownProvider(provider.to_string()))?;
        self.upload_to(provider, Instant::now() + timeout).await
    }

    async fn upload_to(
        &self,
        provider: &RemoteProvider,
        deadline: Instant,
    ) -> Result<RemoteUpload, BackupError> {
        let handle = self.connector.connect(provider)?;
        let mut job = RemoteBackup::new(
            provider.clone(),
            &self.config.database.name,
            self.dump.clone(),
            self.encryptor.clone(),
            self.timezone,
        );
        if let Some(dir) = &self.staging_dir {
            job = job.with_staging_dir(dir.join(&provider.name));
        }
        job.run(&handle, deadline).await
    }

    /// Scheduled local run: skip under restore, count while running, notify the outcome.
    pub(crate) async fn run_scheduled_local(&self) {
        if self.lock.probe() {
            warn!(job = LOCAL_JOB_NAME, "Restore in progress, skipping scheduled backup");
            return;
        }

        let _running = RunningJob::start(&self.running);
        info!(job = LOCAL_JOB_NAME, "Starting scheduled backup");
        match self.local.run(Instant::now() + LOCAL_JOB_TIMEOUT).await {
            Ok(artifact) => {
                let message = format!(
                    "Local backup {} ({}) completed in {}",
                    artifact.file_name,
                    format_bytes(artifact.size),
                    format_duration(artifact.duration)
                );
                info!(job = LOCAL_JOB_NAME, "{}", message);
                self.notify(Ok(message));
            }
            Err(e) => {
                error!(job = LOCAL_JOB_NAME, error = %e, "Scheduled backup failed");
                self.notify(Err(format!("Local backup failed: {}", e)));
            }
        }
    }

    /// Scheduled remote run. Remote runs are not included in `running_jobs`.
    pub(crate) async fn run_scheduled_remote(&self, provider: &RemoteProvider) {
        if self.lock.probe() {
            warn!(job = %provider.name, "Restore in progress, skipping scheduled backup");
            return;
        }

        info!(job = %provider.name, "Starting scheduled remote backup");
        match self.upload_to(provider, Instant::now() + provider.timeout()).await {
            Ok(upload) => {
                let message = format!(
                    "Remote backup to {} uploaded as {} ({}) in {}",
                    upload.provider,
                    upload.remote_path,
                    format_bytes(upload.size),
                    format_duration(upload.duration)
                );
                info!(job = %provider.name, "{}", message);
                self.notify(Ok(message));
            }
            Err(e) => {
                error!(job = %provider.name, error = %e, "Scheduled remote backup failed");
                self.notify(Err(format!("Remote backup to {} failed: {}", provider.name, e)));
            }
        }
    }

    /// One-off runs requested by `run_on_startup` / `run_remote_on_startup`
    pub async fn run_startup(&self) {
        if self.config.run_on_startup {
            self.run_scheduled_local().await;
        }
        if self.config.run_remote_on_startup {
            for provider in self.config.enabled_providers() {
                self.run_scheduled_remote(provider).await;
            }
        }
    }

    /// Send without waiting; delivery failures are only logged.
    fn notify(&self, outcome: Result<String, String>) {
        let notifier = self.notifier.clone();
        tokio::spawn(async move {
            let result = match outcome {
                Ok(message) => notifier.success(&message).await,
                Err(message) => notifier.error(&message).await,
            };
            if let Err(e) = result {
                warn!("Failed to send notification: {}", e);
            }
        });
    }
}
