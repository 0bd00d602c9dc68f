//! Remote storage: naming, provider environment, transfer backends, remote backups.

pub mod backup;
pub mod env;
pub mod naming;
pub mod rclone;

#[cfg(test)]
pub(crate) mod memory;

pub use backup::{RemoteBackup, RemoteUpload};
pub use env::ProviderEnv;
pub use naming::RemoteNaming;
pub use rclone::RcloneConnector;

use crate::config::RemoteProvider;
use crate::utils::errors::TransferError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::path::Path;

/// An object in remote storage, relative to the listed prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteEntry {
    pub name: String,
    pub size: u64,
    pub mod_time: DateTime<Utc>,
}

#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Files directly under `prefix`
    async fn list(&self, prefix: &str) -> Result<Vec<RemoteEntry>, TransferError>;

    async fn upload(&self, local: &Path, remote_path: &str) -> Result<(), TransferError>;

    async fn download(&self, remote_path: &str, local: &Path) -> Result<(), TransferError>;
}

/// Opens a session against a provider.
pub trait RemoteConnector: Send + Sync {
    fn connect(&self, provider: &RemoteProvider) -> Result<RemoteHandle, TransferError>;
}

/// A connected store. Dropping it ends the session on every exit path.
pub struct RemoteHandle {
    store: Box<dyn RemoteStore>,
}

impl RemoteHandle {
    pub fn new(store: impl RemoteStore + 'static) -> Self {
        Self {
            store: Box::new(store),
        }
    }

    pub async fn list(&self, prefix: &str) -> Result<Vec<RemoteEntry>, TransferError> {
        self.store.list(prefix).await
    }

    pub async fn upload(&self, local: &Path, remote_path: &str) -> Result<(), TransferError> {
        self.store.upload(local, remote_path).await
    }

    pub async fn download(&self, remote_path: &str, local: &Path) -> Result<(), TransferError> {
        self.store.download(remote_path, local).await
    }
}
