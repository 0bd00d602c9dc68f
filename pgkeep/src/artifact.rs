//! Backup artifact naming and metadata.
//!
//! A backup is a gzip stream of the dump, optionally wrapped in age encryption.
//! File names carry the format in their suffix: `.sql.gz` or `.sql.gz.age`.

use chrono::{DateTime, TimeZone, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::path::Path;

/// Suffix of every unencrypted backup file
pub const DUMP_EXTENSION: &str = ".sql.gz";

/// Marker appended to encrypted backup files
pub const ENCRYPTED_SUFFIX: &str = ".age";

const TIMESTAMP_FORMAT: &str = "%Y%m%d-%H%M%S";

/// Number of digest bytes kept in a short ID (8 hex characters)
const SHORT_ID_BYTES: usize = 4;

/// Extension for a backup written with or without encryption
pub fn extension(encrypted: bool) -> String {
    if encrypted {
        format!("{}{}", DUMP_EXTENSION, ENCRYPTED_SUFFIX)
    } else {
        DUMP_EXTENSION.to_string()
    }
}

/// Whether a file name has one of the recognized backup suffixes
pub fn is_backup_file(name: &str) -> bool {
    name.ends_with(DUMP_EXTENSION) || name.ends_with(&extension(true))
}

pub fn is_encrypted(name: &str) -> bool {
    name.ends_with(ENCRYPTED_SUFFIX)
}

/// Stable identifier derived from a backup's name and modification time.
///
/// Two listings of an unchanged file yield the same ID; rewriting the file (new mod
/// time) yields a new one.
pub fn short_id(name: &str, mod_time: DateTime<Utc>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(name.as_bytes());
    hasher.update([0u8]);
    hasher.update(mod_time.timestamp().to_be_bytes());
    let digest = hasher.finalize();
    hex::encode(&digest[..SHORT_ID_BYTES])
}

/// How the producer names the file it writes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArtifactName {
    /// `{database}-{YYYYmmdd-HHMMSS}.sql.gz`, used for local backups
    Timestamped { database: String },
    /// `{name}-v{version}.sql.gz`, a rotating remote slot
    Versioned { name: String, version: u32 },
    /// `{name}.sql.gz`, a single remote object overwritten on each run
    Fixed { name: String },
}

impl ArtifactName {
    /// File name without the encryption marker
    pub fn base_name<Tz: TimeZone>(&self, started: &DateTime<Tz>) -> String
    where
        Tz::Offset: std::fmt::Display,
    {
        let stem = match self {
            ArtifactName::Timestamped { database } => {
                format!("{}-{}", database, started.format(TIMESTAMP_FORMAT))
            }
            ArtifactName::Versioned { name, version } => format!("{}-v{}", name, version),
            ArtifactName::Fixed { name } => name.clone(),
        };
        format!("{}{}", stem, DUMP_EXTENSION)
    }
}

/// A backup as seen by the catalog, local or remote.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BackupFile {
    pub short_id: String,
    pub name: String,
    /// Absolute local path, or path inside the remote
    pub path: String,
    pub size: u64,
    pub mod_time: DateTime<Utc>,
    pub encrypted: bool,
}

impl BackupFile {
    pub fn new(
        name: impl Into<String>,
        path: impl Into<String>,
        size: u64,
        mod_time: DateTime<Utc>,
    ) -> Self {
        let name = name.into();
        Self {
            short_id: short_id(&name, mod_time),
            encrypted: is_encrypted(&name),
            path: path.into(),
            name,
            size,
            mod_time,
        }
    }

    /// Stat a local file
    pub fn from_path(path: &Path) -> std::io::Result<Self> {
        let metadata = std::fs::metadata(path)?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Ok(Self::new(
            name,
            path.to_string_lossy(),
            metadata.len(),
            DateTime::<Utc>::from(metadata.modified()?),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_timestamped_name_uses_timezone() {
        let started = Utc.with_ymd_and_hms(2024, 3, 9, 23, 30, 5).unwrap();
        let naming = ArtifactName::Timestamped {
            database: "shop".to_string(),
        };
        assert_eq!(naming.base_name(&started), "shop-20240309-233005.sql.gz");

        let lisbon_summer = Utc
            .with_ymd_and_hms(2024, 7, 1, 1, 0, 0)
            .unwrap()
            .with_timezone(&chrono_tz::Europe::Lisbon);
        assert_eq!(naming.base_name(&lisbon_summer), "shop-20240701-020000.sql.gz");
    }

    #[test]
    fn test_versioned_and_fixed_names() {
        let now = Utc::now();
        let versioned = ArtifactName::Versioned {
            name: "shop".to_string(),
            version: 3,
        };
        assert_eq!(versioned.base_name(&now), "shop-v3.sql.gz");

        let fixed = ArtifactName::Fixed {
            name: "shop".to_string(),
        };
        assert_eq!(fixed.base_name(&now), "shop.sql.gz");
    }

    #[test]
    fn test_backup_suffixes() {
        assert!(is_backup_file("db-20240101-000000.sql.gz"));
        assert!(is_backup_file("db-v2.sql.gz.age"));
        assert!(!is_backup_file("db.sql"));
        assert!(!is_backup_file("db.sql.gz.tmp"));
        assert!(!is_backup_file("notes.age"));
        assert!(is_encrypted("db.sql.gz.age"));
        assert!(!is_encrypted("db.sql.gz"));
    }

    #[test]
    fn test_short_id_is_stable_and_sensitive_to_mod_time() {
        let t = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let a = short_id("db.sql.gz", t);
        assert_eq!(a.len(), 8);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(a, short_id("db.sql.gz", t));
        assert_ne!(a, short_id("db.sql.gz", t + chrono::TimeDelta::seconds(1)));
        assert_ne!(a, short_id("db2.sql.gz", t));
    }

    #[test]
    fn test_short_ids_distinct_across_many_files() {
        let base = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let ids: std::collections::HashSet<String> = (0..500)
            .map(|i| {
                let t = base + chrono::TimeDelta::hours(i);
                short_id(&format!("db-{}.sql.gz", t.format(TIMESTAMP_FORMAT)), t)
            })
            .collect();
        assert_eq!(ids.len(), 500);
    }

    #[test]
    fn test_backup_file_from_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("db-v1.sql.gz.age");
        std::fs::write(&path, b"payload").unwrap();

        let file = BackupFile::from_path(&path).unwrap();
        assert_eq!(file.name, "db-v1.sql.gz.age");
        assert_eq!(file.size, 7);
        assert!(file.encrypted);
        assert_eq!(file.short_id, short_id(&file.name, file.mod_time));
    }
}
