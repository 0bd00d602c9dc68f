//! Remote object names and version slot selection.
//!
//! With `max_versions == 0` a provider keeps one object, `{db}.sql.gz[.age]`, that every
//! run overwrites. Otherwise runs rotate through `{db}-v1 .. {db}-v{max}`.

use super::RemoteEntry;
use crate::artifact::{extension, ArtifactName};
use chrono::{DateTime, Utc};
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteNaming {
    database: String,
    prefix: String,
    max_versions: u32,
    encrypted: bool,
}

impl RemoteNaming {
    pub fn new(database: &str, prefix: &str, max_versions: u32, encrypted: bool) -> Self {
        Self {
            database: database.to_string(),
            prefix: prefix.to_string(),
            max_versions,
            encrypted,
        }
    }

    pub fn is_versioned(&self) -> bool {
        self.max_versions > 0
    }

    /// Object name for a slot; `version` is ignored without versioning.
    pub fn file_name(&self, version: u32) -> String {
        if self.is_versioned() {
            format!("{}-v{}{}", self.database, version, extension(self.encrypted))
        } else {
            format!("{}{}", self.database, extension(self.encrypted))
        }
    }

    /// How the producer should name the staged file for this slot
    pub fn artifact_name(&self, version: u32) -> ArtifactName {
        if self.is_versioned() {
            ArtifactName::Versioned {
                name: self.database.clone(),
                version,
            }
        } else {
            ArtifactName::Fixed {
                name: self.database.clone(),
            }
        }
    }

    pub fn remote_path(&self, file_name: &str) -> String {
        join_remote_path(&self.prefix, file_name)
    }

    /// Slot number encoded in `name`, if it is one of this database's slots.
    pub fn parse_version(&self, name: &str) -> Option<u32> {
        let rest = name.strip_prefix(&self.database)?.strip_prefix("-v")?;
        let digits = rest.strip_suffix(&extension(self.encrypted))?;
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        digits.parse().ok()
    }

    /// Pick the slot to write next: the lowest unused slot, else the oldest one.
    pub fn next_version(&self, existing: &[RemoteEntry]) -> u32 {
        if !self.is_versioned() {
            return 0;
        }

        let mut slots: HashMap<u32, DateTime<Utc>> = HashMap::new();
        for entry in existing {
            let Some(version) = self.parse_version(&entry.name) else {
                continue;
            };
            if !(1..=self.max_versions).contains(&version) {
                continue;
            }
            slots
                .entry(version)
                .and_modify(|t| *t = (*t).max(entry.mod_time))
                .or_insert(entry.mod_time);
        }

        if let Some(free) = (1..=self.max_versions).find(|v| !slots.contains_key(v)) {
            return free;
        }
        slots
            .into_iter()
            .min_by_key(|(version, modified)| (*modified, *version))
            .map(|(version, _)| version)
            .unwrap_or(1)
    }
}

/// Join a provider prefix and a file name with exactly one `/`.
pub fn join_remote_path(prefix: &str, file_name: &str) -> String {
    let prefix = prefix.trim_end_matches('/');
    if prefix.is_empty() {
        file_name.to_string()
    } else {
        format!("{}/{}", prefix, file_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn entry(name: &str, hour: u32) -> RemoteEntry {
        RemoteEntry {
            name: name.to_string(),
            size: 10,
            mod_time: Utc.with_ymd_and_hms(2024, 5, 1, hour, 0, 0).unwrap(),
        }
    }

    #[test]
    fn test_file_names() {
        let fixed = RemoteNaming::new("shop", "backups", 0, false);
        assert_eq!(fixed.file_name(7), "shop.sql.gz");

        let versioned = RemoteNaming::new("shop", "backups", 5, true);
        assert_eq!(versioned.file_name(2), "shop-v2.sql.gz.age");
    }

    #[test]
    fn test_remote_path_joins_with_single_separator() {
        for prefix in ["bucket/pg", "bucket/pg/", "bucket/pg//"] {
            let naming = RemoteNaming::new("shop", prefix, 0, false);
            assert_eq!(naming.remote_path("shop.sql.gz"), "bucket/pg/shop.sql.gz");
        }
        let root = RemoteNaming::new("shop", "", 0, false);
        assert_eq!(root.remote_path("shop.sql.gz"), "shop.sql.gz");
    }

    #[test]
    fn test_artifact_name_matches_remote_file_name() {
        let started = Utc::now();
        for (max, encrypted) in [(0, false), (0, true), (3, false), (3, true)] {
            let naming = RemoteNaming::new("shop", "p", max, encrypted);
            let mut produced = naming.artifact_name(2).base_name(&started);
            if encrypted {
                produced.push_str(crate::artifact::ENCRYPTED_SUFFIX);
            }
            assert_eq!(produced, naming.file_name(2));
        }
    }

    #[test]
    fn test_parse_version() {
        let naming = RemoteNaming::new("shop", "p", 3, false);
        assert_eq!(naming.parse_version("shop-v2.sql.gz"), Some(2));
        assert_eq!(naming.parse_version("shop-v2.sql.gz.age"), None);
        assert_eq!(naming.parse_version("shop-vx.sql.gz"), None);
        assert_eq!(naming.parse_version("shopping-v1.sql.gz"), None);
        assert_eq!(naming.parse_version("shop.sql.gz"), None);
    }

    #[test]
    fn test_next_version_fills_lowest_gap() {
        let naming = RemoteNaming::new("shop", "p", 3, false);
        assert_eq!(naming.next_version(&[]), 1);
        assert_eq!(
            naming.next_version(&[entry("shop-v1.sql.gz", 1), entry("shop-v3.sql.gz", 2)]),
            2
        );
    }

    #[test]
    fn test_next_version_overwrites_oldest_when_full() {
        let naming = RemoteNaming::new("shop", "p", 3, false);
        let existing = [
            entry("shop-v1.sql.gz", 5),
            entry("shop-v2.sql.gz", 3),
            entry("shop-v3.sql.gz", 4),
            entry("other-v1.sql.gz", 0),
            entry("shop-v9.sql.gz", 0),
        ];
        assert_eq!(naming.next_version(&existing), 2);
    }

    #[test]
    fn test_next_version_without_versioning() {
        let naming = RemoteNaming::new("shop", "p", 0, false);
        assert_eq!(naming.next_version(&[entry("shop.sql.gz", 1)]), 0);
    }
}
