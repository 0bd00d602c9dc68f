//! Local retention: prune old backups of one database after a successful run.

use crate::artifact::{is_backup_file, BackupFile};
use crate::utils::errors::RetentionError;
use crate::utils::format_bytes;
use chrono::{DateTime, TimeDelta, Utc};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RetentionPolicy {
    /// Keep everything
    #[default]
    None,
    /// Keep the N most recent backups
    KeepLast(usize),
    /// Keep backups modified within the last N days
    KeepYoungerThan { days: u32 },
}

impl RetentionPolicy {
    /// Build a policy from the two optional config limits; setting both is an error.
    pub fn from_limits(
        max_backups: Option<usize>,
        retention_days: Option<u32>,
    ) -> Result<Self, RetentionError> {
        match (max_backups, retention_days) {
            (Some(_), Some(_)) => Err(RetentionError::ConflictingPolicy),
            (Some(n), None) => Ok(RetentionPolicy::KeepLast(n)),
            (None, Some(days)) => Ok(RetentionPolicy::KeepYoungerThan { days }),
            (None, None) => Ok(RetentionPolicy::None),
        }
    }

    pub fn is_enabled(&self) -> bool {
        !matches!(self, RetentionPolicy::None)
    }
}

#[derive(Debug, Clone)]
pub struct Retention {
    dir: PathBuf,
    database: String,
    policy: RetentionPolicy,
}

impl Retention {
    pub fn new(
        dir: impl Into<PathBuf>,
        database: impl Into<String>,
        policy: RetentionPolicy,
    ) -> Self {
        Self {
            dir: dir.into(),
            database: database.into(),
            policy,
        }
    }

    pub fn policy(&self) -> RetentionPolicy {
        self.policy
    }

    pub fn run(&self) -> Result<Vec<BackupFile>, RetentionError> {
        self.run_at(Utc::now())
    }

    /// Apply the policy as of `now`; returns the files that were removed.
    ///
    /// A file that cannot be deleted is logged and skipped.
    pub fn run_at(&self, now: DateTime<Utc>) -> Result<Vec<BackupFile>, RetentionError> {
        if !self.policy.is_enabled() {
            return Ok(Vec::new());
        }

        let candidates = self.candidates()?;
        let expired: Vec<&BackupFile> = match self.policy {
            RetentionPolicy::None => Vec::new(),
            RetentionPolicy::KeepLast(keep) => {
                let excess = candidates.len().saturating_sub(keep);
                candidates[..excess].iter().collect()
            }
            RetentionPolicy::KeepYoungerThan { days } => {
                let cutoff = now - TimeDelta::days(i64::from(days));
                candidates.iter().filter(|f| f.mod_time < cutoff).collect()
            }
        };

        let mut removed = Vec::with_capacity(expired.len());
        for file in expired {
            match std::fs::remove_file(&file.path) {
                Ok(()) => {
                    debug!("Removed old backup: {}", file.name);
                    removed.push(file.clone());
                }
                Err(e) => warn!("Failed to remove old backup {}: {}", file.name, e),
            }
        }

        if !removed.is_empty() {
            let freed: u64 = removed.iter().map(|f| f.size).sum();
            info!(
                "Retention removed {} of {} backups ({} freed)",
                removed.len(),
                candidates.len(),
                format_bytes(freed)
            );
        }

        Ok(removed)
    }

    /// Backups of this database in the directory, oldest first.
    pub fn candidates(&self) -> Result<Vec<BackupFile>, RetentionError> {
        let read_err = |source| RetentionError::ReadDir {
            path: self.dir.clone(),
            source,
        };
        let prefix = format!("{}-", self.database);

        let mut files: Vec<BackupFile> = std::fs::read_dir(&self.dir)
            .map_err(read_err)?
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().map(|t| t.is_file()).unwrap_or(false))
            .filter(|e| {
                let name = e.file_name();
                let name = name.to_string_lossy();
                name.starts_with(&prefix) && is_backup_file(&name)
            })
            .filter_map(|e| stat(&e.path()))
            .collect();

        files.sort_by(|a, b| a.mod_time.cmp(&b.mod_time).then_with(|| a.name.cmp(&b.name)));
        Ok(files)
    }
}

fn stat(path: &Path) -> Option<BackupFile> {
    match BackupFile::from_path(path) {
        Ok(file) => Some(file),
        Err(e) => {
            warn!("Skipping {}: {}", path.display(), e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::fs::File;
    use std::time::SystemTime;
    use tempfile::TempDir;

    fn now() -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000, 0).unwrap()
    }

    fn backup(dir: &TempDir, name: &str, modified: DateTime<Utc>) {
        let path = dir.path().join(name);
        std::fs::write(&path, b"dump").unwrap();
        File::options()
            .write(true)
            .open(&path)
            .unwrap()
            .set_modified(SystemTime::from(modified))
            .unwrap();
    }

    fn names(dir: &TempDir) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    fn days_ago(days: i64) -> DateTime<Utc> {
        now() - TimeDelta::days(days)
    }

    #[test]
    fn test_keep_last_removes_oldest() {
        let dir = TempDir::new().unwrap();
        for day in 1..=5 {
            backup(&dir, &format!("app-2023110{}-000000.sql.gz", day), days_ago(10 - day));
        }

        let retention = Retention::new(dir.path(), "app", RetentionPolicy::KeepLast(3));
        let removed = retention.run_at(now()).unwrap();

        let removed: Vec<&str> = removed.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(removed, vec!["app-20231101-000000.sql.gz", "app-20231102-000000.sql.gz"]);
        assert_eq!(
            names(&dir),
            vec![
                "app-20231103-000000.sql.gz",
                "app-20231104-000000.sql.gz",
                "app-20231105-000000.sql.gz",
            ]
        );
    }

    #[test]
    fn test_keep_last_orders_by_mod_time_not_name() {
        let dir = TempDir::new().unwrap();
        backup(&dir, "app-a.sql.gz", days_ago(1));
        backup(&dir, "app-b.sql.gz", days_ago(3));
        backup(&dir, "app-c.sql.gz", days_ago(2));

        let retention = Retention::new(dir.path(), "app", RetentionPolicy::KeepLast(2));
        retention.run_at(now()).unwrap();
        assert_eq!(names(&dir), vec!["app-a.sql.gz", "app-c.sql.gz"]);
    }

    #[test]
    fn test_keep_last_below_threshold_is_noop() {
        let dir = TempDir::new().unwrap();
        backup(&dir, "app-1.sql.gz", days_ago(30));
        backup(&dir, "app-2.sql.gz", days_ago(20));

        for keep in [2, 3] {
            let retention = Retention::new(dir.path(), "app", RetentionPolicy::KeepLast(keep));
            assert!(retention.run_at(now()).unwrap().is_empty());
        }
        assert_eq!(names(&dir).len(), 2);
    }

    #[test]
    fn test_age_policy_removes_strictly_older() {
        let dir = TempDir::new().unwrap();
        backup(&dir, "app-old.sql.gz", days_ago(10));
        backup(&dir, "app-boundary.sql.gz", days_ago(7));
        backup(&dir, "app-new.sql.gz.age", days_ago(1));

        let retention = Retention::new(
            dir.path(),
            "app",
            RetentionPolicy::KeepYoungerThan { days: 7 },
        );
        let removed = retention.run_at(now()).unwrap();

        assert_eq!(removed.len(), 1);
        assert_eq!(removed[0].name, "app-old.sql.gz");
        assert_eq!(names(&dir), vec!["app-boundary.sql.gz", "app-new.sql.gz.age"]);
    }

    #[test]
    fn test_only_matching_database_and_suffix_considered() {
        let dir = TempDir::new().unwrap();
        backup(&dir, "app-1.sql.gz", days_ago(40));
        backup(&dir, "other-1.sql.gz", days_ago(40));
        backup(&dir, "app-notes.txt", days_ago(40));
        backup(&dir, "application-1.sql.gz", days_ago(40));
        std::fs::create_dir(dir.path().join("app-dir.sql.gz")).unwrap();

        let retention = Retention::new(
            dir.path(),
            "app",
            RetentionPolicy::KeepYoungerThan { days: 1 },
        );
        let removed = retention.run_at(now()).unwrap();

        assert_eq!(removed.len(), 1);
        assert_eq!(removed[0].name, "app-1.sql.gz");
        assert_eq!(
            names(&dir),
            vec!["app-dir.sql.gz", "app-notes.txt", "application-1.sql.gz", "other-1.sql.gz"]
        );
    }

    #[test]
    fn test_disabled_policy_keeps_everything() {
        let dir = TempDir::new().unwrap();
        backup(&dir, "app-1.sql.gz", days_ago(400));
        let retention = Retention::new(dir.path(), "app", RetentionPolicy::None);
        assert!(retention.run_at(now()).unwrap().is_empty());
        assert_eq!(names(&dir).len(), 1);
    }

    #[test]
    fn test_missing_directory_is_an_error() {
        let dir = TempDir::new().unwrap();
        let retention =
            Retention::new(dir.path().join("gone"), "app", RetentionPolicy::KeepLast(1));
        assert!(matches!(retention.run_at(now()), Err(RetentionError::ReadDir { .. })));
    }

    #[test]
    fn test_conflicting_limits_rejected() {
        assert!(matches!(
            RetentionPolicy::from_limits(Some(3), Some(7)),
            Err(RetentionError::ConflictingPolicy)
        ));
        assert_eq!(
            RetentionPolicy::from_limits(None, None).unwrap(),
            RetentionPolicy::None
        );
    }
}
