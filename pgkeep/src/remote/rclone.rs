//! Transfer backend driving the `rclone` executable.

use super::{ProviderEnv, RemoteConnector, RemoteEntry, RemoteHandle, RemoteStore};
use crate::config::RemoteProvider;
use crate::utils::errors::TransferError;
use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, Utc};
use serde::Deserialize;
use std::ffi::OsString;
use std::path::Path;
use tokio::process::Command;
use tracing::debug;

pub struct RcloneConnector {
    binary: String,
}

impl RcloneConnector {
    pub fn new() -> Self {
        Self::with_binary("rclone")
    }

    pub fn with_binary(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }
}

impl Default for RcloneConnector {
    fn default() -> Self {
        Self::new()
    }
}

impl RemoteConnector for RcloneConnector {
    fn connect(&self, provider: &RemoteProvider) -> Result<RemoteHandle, TransferError> {
        let store = RcloneStore {
            binary: self.binary.clone(),
            remote: provider.name.clone(),
            env: ProviderEnv::setup(provider)?,
        };
        Ok(RemoteHandle::new(store))
    }
}

struct RcloneStore {
    binary: String,
    remote: String,
    env: ProviderEnv,
}

/// One element of `rclone lsjson` output.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ListItem {
    path: String,
    size: i64,
    mod_time: DateTime<FixedOffset>,
    #[serde(default)]
    is_dir: bool,
}

impl RcloneStore {
    fn target(&self, path: &str) -> String {
        format!("{}:{}", self.remote, path)
    }

    async fn run(&self, operation: &str, args: Vec<OsString>) -> Result<Vec<u8>, TransferError> {
        debug!("rclone {} {:?}", operation, args);
        let output = Command::new(&self.binary)
            .args(&args)
            .envs(self.env.vars())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|source| TransferError::Command {
                program: self.binary.clone(),
                source,
            })?;

        if !output.status.success() {
            return Err(TransferError::Failed {
                operation: format!("rclone {}", operation),
                status: output.status,
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(output.stdout)
    }
}

#[async_trait]
impl RemoteStore for RcloneStore {
    async fn list(&self, prefix: &str) -> Result<Vec<RemoteEntry>, TransferError> {
        let listed = self
            .run(
                "lsjson",
                vec!["lsjson".into(), "--files-only".into(), self.target(prefix).into()],
            )
            .await;
        match listed {
            Ok(stdout) => parse_listing(&stdout),
            Err(e) if is_missing_directory(&e) => {
                debug!("{} does not exist yet, treating as empty", self.target(prefix));
                Ok(Vec::new())
            }
            Err(e) => Err(e),
        }
    }

    async fn upload(&self, local: &Path, remote_path: &str) -> Result<(), TransferError> {
        self.run(
            "copyto",
            vec![
                "copyto".into(),
                local.as_os_str().to_owned(),
                self.target(remote_path).into(),
            ],
        )
        .await?;
        Ok(())
    }

    async fn download(&self, remote_path: &str, local: &Path) -> Result<(), TransferError> {
        self.run(
            "copyto",
            vec![
                "copyto".into(),
                self.target(remote_path).into(),
                local.as_os_str().to_owned(),
            ],
        )
        .await?;
        Ok(())
    }
}

/// rclone exits with status 3 when the listed directory does not exist.
const EXIT_DIRECTORY_NOT_FOUND: i32 = 3;

fn is_missing_directory(err: &TransferError) -> bool {
    matches!(
        err,
        TransferError::Failed { status, .. } if status.code() == Some(EXIT_DIRECTORY_NOT_FOUND)
    )
}

fn parse_listing(stdout: &[u8]) -> Result<Vec<RemoteEntry>, TransferError> {
    let items: Vec<ListItem> = serde_json::from_slice(stdout)?;
    Ok(items
        .into_iter()
        .filter(|item| !item.is_dir)
        .map(|item| RemoteEntry {
            name: item.path,
            size: u64::try_from(item.size).unwrap_or(0),
            mod_time: item.mod_time.with_timezone(&Utc),
        })
        .collect())
}
