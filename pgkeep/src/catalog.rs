//! Catalog: enumerate backups in the local directory or in a remote provider.

use crate::artifact::{is_backup_file, BackupFile};
use crate::config::{Config, RemoteProvider};
use crate::remote::naming::join_remote_path;
use crate::remote::{RemoteConnector, RemoteHandle};
use crate::utils::errors::CatalogError;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, warn};

/// Name of the local backup directory as a catalog source
pub const LOCAL_SOURCE: &str = "local";

pub struct Catalog {
    backup_dir: PathBuf,
    providers: Vec<RemoteProvider>,
    connector: Arc<dyn RemoteConnector>,
}

impl Catalog {
    /// `providers` should only contain enabled providers.
    pub fn new(
        backup_dir: impl Into<PathBuf>,
        providers: Vec<RemoteProvider>,
        connector: Arc<dyn RemoteConnector>,
    ) -> Self {
        Self {
            backup_dir: backup_dir.into(),
            providers,
            connector,
        }
    }

    pub fn from_config(config: &Config, connector: Arc<dyn RemoteConnector>) -> Self {
        Self::new(
            config.local.dir.clone(),
            config.enabled_providers().cloned().collect(),
            connector,
        )
    }

    /// `local` followed by every enabled provider
    pub fn sources(&self) -> Vec<String> {
        std::iter::once(LOCAL_SOURCE.to_string())
            .chain(self.providers.iter().map(|p| p.name.clone()))
            .collect()
    }

    pub fn provider(&self, name: &str) -> Option<&RemoteProvider> {
        self.providers.iter().find(|p| p.name == name)
    }

    /// Open a session against a remote source
    pub fn connect(&self, source: &str) -> Result<RemoteHandle, CatalogError> {
        let provider = self
            .provider(source)
            .ok_or_else(|| CatalogError::UnknownSource(source.to_string()))?;
        self.connector
            .connect(provider)
            .map_err(|source_err| CatalogError::Remote {
                source_name: source.to_string(),
                source: source_err,
            })
    }

    /// Backups available in `source`, newest first.
    pub async fn list(&self, source: &str) -> Result<Vec<BackupFile>, CatalogError> {
        let mut files = if source == LOCAL_SOURCE {
            self.list_local().await?
        } else {
            self.list_remote(source).await?
        };
        files.sort_by(|a, b| b.mod_time.cmp(&a.mod_time).then_with(|| a.name.cmp(&b.name)));
        debug!("Catalog {}: {} backups", source, files.len());
        Ok(files)
    }

    async fn list_local(&self) -> Result<Vec<BackupFile>, CatalogError> {
        let read_err = |source| CatalogError::ReadLocal {
            path: self.backup_dir.clone(),
            source,
        };

        let mut entries = tokio::fs::read_dir(&self.backup_dir).await.map_err(read_err)?;
        let mut files = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(read_err)? {
            let name = entry.file_name().to_string_lossy().into_owned();
            if !is_backup_file(&name) {
                continue;
            }
            let metadata = match entry.metadata().await {
                Ok(m) if m.is_file() => m,
                Ok(_) => continue,
                Err(e) => {
                    warn!("Skipping {}: {}", name, e);
                    continue;
                }
            };
            let modified = match metadata.modified() {
                Ok(t) => t,
                Err(e) => {
                    warn!("Skipping {}: {}", name, e);
                    continue;
                }
            };
            files.push(BackupFile::new(
                name,
                entry.path().to_string_lossy(),
                metadata.len(),
                modified.into(),
            ));
        }
        Ok(files)
    }

    /// Remote listing, deduplicated by name keeping the newest entry.
    async fn list_remote(&self, source: &str) -> Result<Vec<BackupFile>, CatalogError> {
        let handle = self.connect(source)?;
        let provider = self
            .provider(source)
            .ok_or_else(|| CatalogError::UnknownSource(source.to_string()))?;

        let entries = handle
            .list(&provider.path)
            .await
            .map_err(|e| CatalogError::Remote {
                source_name: source.to_string(),
                source: e,
            })?;

        let mut latest: HashMap<String, BackupFile> = HashMap::new();
        for entry in entries {
            if !is_backup_file(&entry.name) {
                continue;
            }
            let file = BackupFile::new(
                entry.name.clone(),
                join_remote_path(&provider.path, &entry.name),
                entry.size,
                entry.mod_time,
            );
            match latest.get(&entry.name) {
                Some(existing) if existing.mod_time >= file.mod_time => {}
                _ => {
                    latest.insert(entry.name, file);
                }
            }
        }
        Ok(latest.into_values().collect())
    }
}
