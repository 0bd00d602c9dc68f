//! In-memory remote used by tests.

use super::{RemoteConnector, RemoteEntry, RemoteHandle, RemoteStore};
use crate::config::RemoteProvider;
use crate::utils::errors::TransferError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone)]
pub(crate) struct StoredObject {
    pub data: Vec<u8>,
    pub mod_time: DateTime<Utc>,
}

/// Objects keyed by `provider:path`; clones share storage.
#[derive(Clone, Default)]
pub(crate) struct MemoryRemote {
    objects: Arc<Mutex<BTreeMap<String, StoredObject>>>,
    /// Extra listing rows returned verbatim, for duplicate-name scenarios
    extra: Arc<Mutex<Vec<(String, RemoteEntry)>>>,
}

impl MemoryRemote {
    pub fn put(&self, provider: &str, path: &str, data: &[u8], mod_time: DateTime<Utc>) {
        self.objects.lock().unwrap().insert(
            format!("{}:{}", provider, path),
            StoredObject {
                data: data.to_vec(),
                mod_time,
            },
        );
    }

    pub fn push_listing(&self, provider: &str, prefix: &str, entry: RemoteEntry) {
        self.extra
            .lock()
            .unwrap()
            .push((format!("{}:{}", provider, prefix), entry));
    }

    pub fn get(&self, provider: &str, path: &str) -> Option<StoredObject> {
        self.objects
            .lock()
            .unwrap()
            .get(&format!("{}:{}", provider, path))
            .cloned()
    }

    pub fn paths(&self, provider: &str) -> Vec<String> {
        let prefix = format!("{}:", provider);
        self.objects
            .lock()
            .unwrap()
            .keys()
            .filter_map(|k| k.strip_prefix(&prefix).map(String::from))
            .collect()
    }
}

impl RemoteConnector for MemoryRemote {
    fn connect(&self, provider: &RemoteProvider) -> Result<RemoteHandle, TransferError> {
        Ok(RemoteHandle::new(MemoryStore {
            remote: self.clone(),
            provider: provider.name.clone(),
        }))
    }
}

struct MemoryStore {
    remote: MemoryRemote,
    provider: String,
}

impl MemoryStore {
    fn key(&self, path: &str) -> String {
        format!("{}:{}", self.provider, path)
    }
}

#[async_trait]
impl RemoteStore for MemoryStore {
    async fn list(&self, prefix: &str) -> Result<Vec<RemoteEntry>, TransferError> {
        let dir = format!("{}/", self.key(prefix.trim_end_matches('/')));
        let mut entries: Vec<RemoteEntry> = self
            .remote
            .objects
            .lock()
            .unwrap()
            .iter()
            .filter_map(|(key, object)| {
                let name = key.strip_prefix(&dir)?;
                (!name.contains('/')).then(|| RemoteEntry {
                    name: name.to_string(),
                    size: object.data.len() as u64,
                    mod_time: object.mod_time,
                })
            })
            .collect();

        let listed = self.key(prefix);
        entries.extend(
            self.remote
                .extra
                .lock()
                .unwrap()
                .iter()
                .filter(|(key, _)| *key == listed)
                .map(|(_, entry)| entry.clone()),
        );
        Ok(entries)
    }

    async fn upload(&self, local: &Path, remote_path: &str) -> Result<(), TransferError> {
        let data = tokio::fs::read(local).await?;
        self.remote.put(&self.provider, remote_path, &data, Utc::now());
        Ok(())
    }

    async fn download(&self, remote_path: &str, local: &Path) -> Result<(), TransferError> {
        let object = self
            .remote
            .get(&self.provider, remote_path)
            .ok_or_else(|| TransferError::NotFound(remote_path.to_string()))?;
        tokio::fs::write(local, object.data).await?;
        Ok(())
    }
}
