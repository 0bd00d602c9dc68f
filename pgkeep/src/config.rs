//! Configuration management for the coordinator.
//!
//! Loads configuration from a TOML file, or from the process environment (after
//! reading a `.env` file when one is present). Both loaders validate before returning.

use crate::catalog::LOCAL_SOURCE;
use crate::retention::RetentionPolicy;
use crate::utils::errors::{ConfigError, RetentionError};
use base64::Engine;
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::{Component, Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use tracing::warn;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    /// IANA timezone used for schedules and artifact timestamps
    #[serde(default = "default_timezone")]
    pub timezone: String,

    pub database: DatabaseConfig,

    #[serde(default)]
    pub local: LocalBackupConfig,

    #[serde(default)]
    pub providers: Vec<RemoteProvider>,

    #[serde(default)]
    pub notification: NotificationConfig,

    /// Passphrase for age encryption; artifacts are written in clear when unset
    #[serde(default)]
    pub encryption_key: Option<String>,

    /// Run one local backup when the daemon starts
    #[serde(default)]
    pub run_on_startup: bool,

    /// Run one backup per enabled provider when the daemon starts
    #[serde(default)]
    pub run_remote_on_startup: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// HTTP listen address
    #[serde(default = "default_addr")]
    pub addr: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    pub username: String,

    #[serde(default)]
    pub password: String,

    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalBackupConfig {
    /// Directory holding local backup files
    #[serde(default = "default_backup_dir")]
    pub dir: PathBuf,

    /// Times of day (HH:MM) for local backups
    #[serde(default)]
    pub schedule: Vec<String>,

    #[serde(default)]
    pub retention: RetentionConfig,
}

/// At most one of the two limits may be set.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RetentionConfig {
    #[serde(default)]
    pub max_backups: Option<usize>,

    #[serde(default)]
    pub retention_days: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteProvider {
    /// Provider name; also the rclone remote name
    pub name: String,

    /// rclone backend type (s3, drive, dropbox, mega, ...)
    #[serde(rename = "type")]
    pub kind: String,

    #[serde(default)]
    pub enabled: bool,

    /// Times of day (HH:MM) for remote backups
    #[serde(default)]
    pub schedule: Vec<String>,

    /// Prefix inside the remote where backups are stored
    #[serde(default)]
    pub path: String,

    /// Number of rotating slots; 0 means a single fixed object
    #[serde(default)]
    pub max_versions: u32,

    /// Deadline for one remote backup, in seconds
    #[serde(default = "default_provider_timeout")]
    pub timeout: u64,

    /// Backend options handed to rclone
    #[serde(default)]
    pub config: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NotificationConfig {
    #[serde(default)]
    pub success_enabled: bool,

    #[serde(default)]
    pub error_enabled: bool,

    #[serde(default)]
    pub discord_webhook_url: Option<String>,

    #[serde(default)]
    pub telegram_bot_token: Option<String>,

    #[serde(default)]
    pub telegram_chat_id: Option<String>,
}

// Default values
fn default_timezone() -> String {
    "UTC".to_string()
}

fn default_addr() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_port() -> u16 {
    5432
}

fn default_backup_dir() -> PathBuf {
    PathBuf::from("./backups")
}

fn default_provider_timeout() -> u64 {
    7200
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: default_addr(),
        }
    }
}

impl Default for LocalBackupConfig {
    fn default() -> Self {
        Self {
            dir: default_backup_dir(),
            schedule: Vec::new(),
            retention: RetentionConfig::default(),
        }
    }
}

impl RetentionConfig {
    pub fn policy(&self) -> Result<RetentionPolicy, RetentionError> {
        RetentionPolicy::from_limits(self.max_backups, self.retention_days)
    }
}

impl RemoteProvider {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout)
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from the environment, reading `.env` first if present
    pub fn from_env() -> Result<Self, ConfigError> {
        if let Err(e) = dotenvy::dotenv() {
            if !e.not_found() {
                warn!("Failed to read .env file: {}", e);
            }
        }
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from any key/value source using the environment variable names
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = EnvSource { lookup };

        let config = Config {
            server: ServerConfig {
                addr: env.string("SERVER_ADDR", &default_addr()),
            },
            timezone: env.string("TZ", &default_timezone()),
            database: DatabaseConfig {
                host: env.required("DATABASE_HOST")?,
                port: env.parse("DATABASE_PORT", default_port())?,
                username: env.required("DATABASE_USERNAME")?,
                password: env.string("DATABASE_PASSWORD", ""),
                name: env.required("DATABASE_NAME")?,
            },
            local: LocalBackupConfig {
                dir: PathBuf::from(env.string("BACKUP_DIR", "./backups")),
                schedule: env.list("BACKUP_SCHEDULE"),
                retention: RetentionConfig {
                    max_backups: env.parse_optional("BACKUP_LIMIT")?,
                    retention_days: env.parse_optional("RETENTION_DAYS")?,
                },
            },
            providers: load_env_providers(&env)?,
            notification: NotificationConfig {
                success_enabled: env.flag("NOTIFICATION_SUCCESS_ENABLED", false)?,
                error_enabled: env.flag("NOTIFICATION_ERROR_ENABLED", false)?,
                discord_webhook_url: env.optional("DISCORD_WEBHOOK_URL"),
                telegram_bot_token: env.optional("TELEGRAM_BOT_TOKEN"),
                telegram_chat_id: env.optional("TELEGRAM_CHAT_ID"),
            },
            encryption_key: env.optional("BACKUP_ENCRYPTION_KEY"),
            run_on_startup: env.flag("RUN_ON_STARTUP", false)?,
            run_remote_on_startup: env.flag("RUN_REMOTE_ON_STARTUP", false)?,
        };

        config.validate()?;
        Ok(config)
    }

    pub fn timezone(&self) -> Result<Tz, ConfigError> {
        Tz::from_str(&self.timezone)
            .map_err(|_| ConfigError::Invalid(format!("unknown timezone '{}'", self.timezone)))
    }

    /// Configured encryption passphrase, ignoring an empty value
    pub fn encryption_key(&self) -> Option<&str> {
        self.encryption_key.as_deref().filter(|k| !k.is_empty())
    }

    pub fn enabled_providers(&self) -> impl Iterator<Item = &RemoteProvider> {
        self.providers.iter().filter(|p| p.enabled)
    }

    /// Look up an enabled provider by name
    pub fn provider(&self, name: &str) -> Option<&RemoteProvider> {
        self.enabled_providers().find(|p| p.name == name)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.validate_database()?;
        self.timezone()?;
        self.validate_local()?;
        self.validate_providers()?;
        self.validate_notification()?;
        Ok(())
    }

    fn validate_database(&self) -> Result<(), ConfigError> {
        let db = &self.database;
        if db.host.trim().is_empty() {
            return Err(invalid("database host is required"));
        }
        if db.port == 0 {
            return Err(invalid("database port must be between 1 and 65535"));
        }
        if db.username.trim().is_empty() {
            return Err(invalid("database username is required"));
        }
        if !is_valid_database_name(&db.name) {
            return Err(invalid(format!(
                "database name '{}' must start with a letter or underscore, contain only letters, digits, '_' or '-', and be at most 63 characters",
                db.name
            )));
        }
        Ok(())
    }

    fn validate_local(&self) -> Result<(), ConfigError> {
        let dir = &self.local.dir;
        if dir.as_os_str().is_empty() {
            return Err(invalid("backup directory is required"));
        }
        if dir.components().any(|c| c == Component::ParentDir) {
            return Err(invalid(format!(
                "backup directory {} must not contain '..'",
                dir.display()
            )));
        }

        for schedule in &self.local.schedule {
            if parse_schedule_time(schedule).is_none() {
                return Err(invalid(format!(
                    "invalid local schedule '{}', expected HH:MM",
                    schedule
                )));
            }
        }

        let retention = &self.local.retention;
        if retention.max_backups == Some(0) {
            return Err(invalid("max_backups must be at least 1"));
        }
        if retention.retention_days == Some(0) {
            return Err(invalid("retention_days must be at least 1"));
        }
        retention
            .policy()
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;

        Ok(())
    }

    fn validate_providers(&self) -> Result<(), ConfigError> {
        let mut names = HashSet::new();

        for (i, provider) in self.providers.iter().enumerate() {
            let name = provider.name.trim();
            if name.is_empty() {
                return Err(invalid(format!("provider[{}]: name is required", i)));
            }
            if !name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_')
            {
                return Err(invalid(format!(
                    "provider '{}': name may only contain letters, digits and '_'",
                    name
                )));
            }
            if name.eq_ignore_ascii_case(LOCAL_SOURCE) {
                return Err(invalid(format!(
                    "provider '{}': name is reserved for the local backup directory",
                    name
                )));
            }
            if !names.insert(name.to_ascii_lowercase()) {
                return Err(invalid(format!("provider '{}' is defined twice", name)));
            }
            if provider.kind.trim().is_empty() {
                return Err(invalid(format!("provider '{}': type is required", name)));
            }

            for schedule in &provider.schedule {
                if parse_schedule_time(schedule).is_none() {
                    return Err(invalid(format!(
                        "provider '{}': invalid schedule '{}', expected HH:MM",
                        name, schedule
                    )));
                }
            }

            if provider.timeout < 60 {
                return Err(invalid(format!(
                    "provider '{}': timeout must be at least 60 seconds, got {}",
                    name, provider.timeout
                )));
            }

            if !provider.enabled {
                continue;
            }
            if provider.path.trim().is_empty() {
                return Err(invalid(format!(
                    "provider '{}': path is required when enabled",
                    name
                )));
            }
            if provider.schedule.is_empty() {
                warn!("Provider '{}' is enabled but has no schedule", name);
            }
            validate_backend_options(provider)?;
        }

        Ok(())
    }

    fn validate_notification(&self) -> Result<(), ConfigError> {
        let n = &self.notification;
        if let Some(url) = &n.discord_webhook_url {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err(invalid(
                    "discord webhook url must start with http:// or https://",
                ));
            }
        }
        if n.telegram_bot_token.is_some() != n.telegram_chat_id.is_some() {
            return Err(invalid(
                "telegram bot token and chat id must be set together",
            ));
        }
        Ok(())
    }
}

/// Parse a `HH:MM` time of day into `(hour, minute)`.
pub fn parse_schedule_time(value: &str) -> Option<(u32, u32)> {
    let (hour, minute) = value.split_once(':')?;
    if hour.len() != 2 || minute.len() != 2 {
        return None;
    }
    if !hour.bytes().chain(minute.bytes()).all(|b| b.is_ascii_digit()) {
        return None;
    }
    let hour: u32 = hour.parse().ok()?;
    let minute: u32 = minute.parse().ok()?;
    (hour < 24 && minute < 60).then_some((hour, minute))
}

fn invalid(message: impl Into<String>) -> ConfigError {
    ConfigError::Invalid(message.into())
}

fn is_valid_database_name(name: &str) -> bool {
    let mut chars = name.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    name.len() <= 63
        && (first.is_ascii_alphabetic() || first == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

fn validate_backend_options(provider: &RemoteProvider) -> Result<(), ConfigError> {
    let required: &[&str] = match provider.kind.to_ascii_lowercase().as_str() {
        "s3" => &["access_key_id", "secret_access_key", "region"],
        "drive" | "dropbox" => &["token"],
        "mega" => &["user", "pass"],
        "google cloud storage" => &["service_account_credentials"],
        other => {
            warn!(
                "Provider '{}': unknown type '{}', skipping option checks",
                provider.name, other
            );
            &[]
        }
    };

    for key in required {
        let present = provider
            .config
            .get(*key)
            .is_some_and(|v| !v.trim().is_empty());
        if !present {
            return Err(invalid(format!(
                "provider '{}': {} requires '{}' in config",
                provider.name, provider.kind, key
            )));
        }
    }
    Ok(())
}

/// Environment-variable layout of a built-in provider.
struct ProviderSchema {
    name: &'static str,
    kind: &'static str,
    fields: &'static [ProviderField],
}

struct ProviderField {
    key: &'static str,
    default: &'static str,
    base64: bool,
}

const fn field(key: &'static str, default: &'static str) -> ProviderField {
    ProviderField {
        key,
        default,
        base64: false,
    }
}

const fn encoded(key: &'static str) -> ProviderField {
    ProviderField {
        key,
        default: "",
        base64: true,
    }
}

const PROVIDER_SCHEMAS: &[ProviderSchema] = &[
    ProviderSchema {
        name: "s3",
        kind: "s3",
        fields: &[
            field("provider", "AWS"),
            field("access_key_id", ""),
            field("secret_access_key", ""),
            field("region", "us-east-1"),
            field("endpoint", ""),
            field("acl", "private"),
            field("force_path_style", "false"),
            field("no_check_bucket", "true"),
        ],
    },
    ProviderSchema {
        name: "gdrive",
        kind: "drive",
        fields: &[
            encoded("token"),
            field("scope", "drive"),
            field("client_id", ""),
            field("client_secret", ""),
        ],
    },
    ProviderSchema {
        name: "dropbox",
        kind: "dropbox",
        fields: &[encoded("token")],
    },
    ProviderSchema {
        name: "mega",
        kind: "mega",
        fields: &[field("user", ""), field("pass", "")],
    },
    ProviderSchema {
        name: "gcs",
        kind: "google cloud storage",
        fields: &[
            encoded("service_account_credentials"),
            field("project_number", ""),
            field("bucket_policy_only", "false"),
            field("location", ""),
        ],
    },
];

fn load_env_providers<F>(env: &EnvSource<F>) -> Result<Vec<RemoteProvider>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let mut providers = Vec::new();

    for schema in PROVIDER_SCHEMAS {
        let prefix = format!("REMOTE_{}_", schema.name.to_ascii_uppercase());
        let var = |suffix: &str| format!("{}{}", prefix, suffix);

        if !env.flag(&var("ENABLED"), false)? {
            continue;
        }

        let mut config = BTreeMap::new();
        for field in schema.fields {
            let key = var(&field.key.to_ascii_uppercase());
            let value = if field.base64 {
                env.base64(&key)?.unwrap_or_default()
            } else {
                env.string(&key, field.default)
            };
            if !value.is_empty() {
                config.insert(field.key.to_string(), value);
            }
        }

        providers.push(RemoteProvider {
            name: schema.name.to_string(),
            kind: schema.kind.to_string(),
            enabled: true,
            schedule: env.list(&var("SCHEDULE")),
            path: env.string(&var("PATH"), ""),
            max_versions: env.parse(&var("MAX_VERSIONS"), 0)?,
            timeout: env.parse(&var("TIMEOUT"), default_provider_timeout())?,
            config,
        });
    }

    Ok(providers)
}

/// Typed accessors over a key/value lookup.
struct EnvSource<F> {
    lookup: F,
}

impl<F> EnvSource<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn optional(&self, key: &str) -> Option<String> {
        (self.lookup)(key).filter(|v| !v.trim().is_empty())
    }

    fn string(&self, key: &str, default: &str) -> String {
        self.optional(key).unwrap_or_else(|| default.to_string())
    }

    fn required(&self, key: &str) -> Result<String, ConfigError> {
        self.optional(key)
            .ok_or_else(|| ConfigError::MissingEnv(key.to_string()))
    }

    fn parse_optional<T: FromStr>(&self, key: &str) -> Result<Option<T>, ConfigError> {
        match self.optional(key) {
            Some(value) => value
                .trim()
                .parse()
                .map(Some)
                .map_err(|_| ConfigError::InvalidEnv {
                    key: key.to_string(),
                    value,
                }),
            None => Ok(None),
        }
    }

    fn parse<T: FromStr>(&self, key: &str, default: T) -> Result<T, ConfigError> {
        Ok(self.parse_optional(key)?.unwrap_or(default))
    }

    fn flag(&self, key: &str, default: bool) -> Result<bool, ConfigError> {
        let Some(value) = self.optional(key) else {
            return Ok(default);
        };
        match value.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(ConfigError::InvalidEnv {
                key: key.to_string(),
                value,
            }),
        }
    }

    fn list(&self, key: &str) -> Vec<String> {
        self.optional(key)
            .map(|v| {
                v.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default()
    }

    fn base64(&self, key: &str) -> Result<Option<String>, ConfigError> {
        let Some(value) = self.optional(key) else {
            return Ok(None);
        };
        let invalid = || ConfigError::InvalidEnv {
            key: key.to_string(),
            value: "<base64 encoded secret>".to_string(),
        };
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(value.trim())
            .map_err(|_| invalid())?;
        String::from_utf8(bytes).map(Some).map_err(|_| invalid())
    }
}
