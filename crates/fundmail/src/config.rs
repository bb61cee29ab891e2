//! Application configuration
//!
//! Loaded once at startup, in order of priority:
//! 1. JSON file given on the command line
//! 2. JSON file (~/.config/fundmail/fundmail.json)
//! 3. Environment variables, after loading `.env` from the working directory

use anyhow::{Context, Result, anyhow};
use chrono::{FixedOffset, NaiveDate, Utc};
use serde::Deserialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::IngestError;
use crate::models::{DEFAULT_LOCAL_OFFSET_HOURS, default_local_offset, local_offset};
use crate::storage::CHECKPOINT_FILE;
use crate::sync::DEFAULT_PAGE_SIZE;

/// Config filename in the fundmail config directory
pub const CONFIG_FILE: &str = "fundmail.json";

/// Seconds between the end of one cycle and the start of the next
pub const DEFAULT_INTERVAL_SECS: u64 = 300;

/// Attachment folder inside a day folder
pub const ATTACH_DIR: &str = "attach";

/// SSH port used when `sftp_port` is not set
pub const DEFAULT_SFTP_PORT: u16 = 22;

/// Folder name of a local day, e.g. `2025_06_30`
pub fn day_folder_name(date: NaiveDate) -> String {
    date.format("%Y_%m_%d").to_string()
}

/// Database file name of a local day, e.g. `fm_2025_06_30.db`
pub fn db_file_name(date: NaiveDate) -> String {
    format!("fm_{}.db", day_folder_name(date))
}

#[derive(Clone, Deserialize)]
pub struct AppConfig {
    /// Mailbox user ID or principal name
    pub mailbox: String,
    pub tenant_id: String,
    pub client_id: String,
    pub client_secret: String,
    /// Root of checkpoint, databases and attachments
    pub data_dir: PathBuf,
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    #[serde(default = "default_page_size")]
    pub page_size: usize,
    #[serde(default = "default_offset_hours")]
    pub local_offset_hours: i32,
    /// Mirror root; replication is skipped when neither this nor
    /// `sftp_host` is set
    #[serde(default)]
    pub replica_dir: Option<PathBuf>,
    /// SFTP replica host; takes precedence over `replica_dir`
    #[serde(default)]
    pub sftp_host: Option<String>,
    #[serde(default = "default_sftp_port")]
    pub sftp_port: u16,
    #[serde(default)]
    pub sftp_user: Option<String>,
    #[serde(default)]
    pub sftp_password: Option<String>,
    /// Remote directory the day folders are created in
    #[serde(default)]
    pub sftp_root: Option<String>,
}

/// Connection settings of the SFTP replica
#[derive(Clone)]
pub struct SftpSettings {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub root: String,
}

impl fmt::Debug for SftpSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SftpSettings")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .field("root", &self.root)
            .finish()
    }
}

fn default_interval_secs() -> u64 {
    DEFAULT_INTERVAL_SECS
}

fn default_page_size() -> usize {
    DEFAULT_PAGE_SIZE
}

fn default_offset_hours() -> i32 {
    DEFAULT_LOCAL_OFFSET_HOURS
}

fn default_sftp_port() -> u16 {
    DEFAULT_SFTP_PORT
}

impl fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppConfig")
            .field("mailbox", &self.mailbox)
            .field("tenant_id", &self.tenant_id)
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .field("data_dir", &self.data_dir)
            .field("interval_secs", &self.interval_secs)
            .field("page_size", &self.page_size)
            .field("local_offset_hours", &self.local_offset_hours)
            .field("replica_dir", &self.replica_dir)
            .field("sftp_host", &self.sftp_host)
            .field("sftp_port", &self.sftp_port)
            .field("sftp_user", &self.sftp_user)
            .field("sftp_password", &self.sftp_password.as_ref().map(|_| "<redacted>"))
            .field("sftp_root", &self.sftp_root)
            .finish()
    }
}

impl AppConfig {
    /// Load and validate the configuration
    pub fn load(path: Option<&Path>) -> Result<Self, IngestError> {
        let loaded = match path {
            Some(path) => config::load_json_file(path),
            None if config::config_exists(CONFIG_FILE) => config::load_json(CONFIG_FILE),
            None => config::load_dotenv(None).and_then(|_| Self::from_env()),
        };

        let config = loaded.map_err(IngestError::Config)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from `FUNDMAIL_*` environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from a variable lookup function
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let optional = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let required = |key: &str| {
            lookup(key)
                .filter(|v| !v.trim().is_empty())
                .with_context(|| format!("{} environment variable not set", key))
        };

        Ok(Self {
            mailbox: required("FUNDMAIL_MAILBOX")?,
            tenant_id: required("FUNDMAIL_TENANT_ID")?,
            client_id: required("FUNDMAIL_CLIENT_ID")?,
            client_secret: required("FUNDMAIL_CLIENT_SECRET")?,
            data_dir: PathBuf::from(required("FUNDMAIL_DATA_DIR")?),
            interval_secs: parse_or(&lookup, "FUNDMAIL_INTERVAL_SECS", DEFAULT_INTERVAL_SECS)?,
            page_size: parse_or(&lookup, "FUNDMAIL_PAGE_SIZE", DEFAULT_PAGE_SIZE)?,
            local_offset_hours: parse_or(
                &lookup,
                "FUNDMAIL_LOCAL_OFFSET_HOURS",
                DEFAULT_LOCAL_OFFSET_HOURS,
            )?,
            replica_dir: optional("FUNDMAIL_REPLICA_DIR").map(PathBuf::from),
            sftp_host: optional("FUNDMAIL_SFTP_HOST"),
            sftp_port: parse_or(&lookup, "FUNDMAIL_SFTP_PORT", DEFAULT_SFTP_PORT)?,
            sftp_user: optional("FUNDMAIL_SFTP_USER"),
            sftp_password: optional("FUNDMAIL_SFTP_PASSWORD"),
            sftp_root: optional("FUNDMAIL_SFTP_ROOT"),
        })
    }

    /// Parse a JSON document
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).context("Failed to parse config JSON")
    }

    /// Reject values no cycle could run with
    pub fn validate(&self) -> Result<(), IngestError> {
        let fail = |msg: String| Err(IngestError::Config(anyhow!(msg)));

        for (name, value) in [
            ("mailbox", &self.mailbox),
            ("tenant_id", &self.tenant_id),
            ("client_id", &self.client_id),
            ("client_secret", &self.client_secret),
        ] {
            if value.trim().is_empty() {
                return fail(format!("{} must not be empty", name));
            }
        }
        if self.data_dir.as_os_str().is_empty() {
            return fail("data_dir must not be empty".to_string());
        }
        if !(1..=DEFAULT_PAGE_SIZE).contains(&self.page_size) {
            return fail(format!(
                "page_size must be between 1 and {}, got {}",
                DEFAULT_PAGE_SIZE, self.page_size
            ));
        }
        if local_offset(self.local_offset_hours).is_none() {
            return fail(format!(
                "local_offset_hours must be between -23 and 23, got {}",
                self.local_offset_hours
            ));
        }
        if self.interval_secs == 0 {
            return fail("interval_secs must be at least 1".to_string());
        }
        if self.sftp_host.is_some() {
            if self.sftp_user.is_none() || self.sftp_password.is_none() {
                return fail("sftp_host needs sftp_user and sftp_password".to_string());
            }
            if self.sftp_port == 0 {
                return fail("sftp_port must not be 0".to_string());
            }
        }
        Ok(())
    }

    /// SFTP replica settings, `None` unless host, user and password are set
    pub fn sftp(&self) -> Option<SftpSettings> {
        Some(SftpSettings {
            host: self.sftp_host.clone()?,
            port: self.sftp_port,
            user: self.sftp_user.clone()?,
            password: self.sftp_password.clone()?,
            root: self.sftp_root.clone().unwrap_or_else(|| ".".to_string()),
        })
    }

    pub fn local_offset(&self) -> FixedOffset {
        local_offset(self.local_offset_hours).unwrap_or_else(default_local_offset)
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    /// Current calendar date at the local offset
    pub fn today(&self) -> NaiveDate {
        Utc::now().with_timezone(&self.local_offset()).date_naive()
    }

    pub fn checkpoint_path(&self) -> PathBuf {
        self.data_dir.join(CHECKPOINT_FILE)
    }

    pub fn day_dir(&self, date: NaiveDate) -> PathBuf {
        self.data_dir.join(day_folder_name(date))
    }

    pub fn db_path(&self, date: NaiveDate) -> PathBuf {
        self.day_dir(date).join(db_file_name(date))
    }

    pub fn attach_dir(&self, date: NaiveDate) -> PathBuf {
        self.day_dir(date).join(ATTACH_DIR)
    }
}

fn parse_or<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key).filter(|v| !v.trim().is_empty()) {
        Some(value) => value
            .trim()
            .parse()
            .with_context(|| format!("Invalid value for {}: {}", key, value)),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    const REQUIRED: &[(&str, &str)] = &[
        ("FUNDMAIL_MAILBOX", "fund@example.com"),
        ("FUNDMAIL_TENANT_ID", "tenant"),
        ("FUNDMAIL_CLIENT_ID", "client"),
        ("FUNDMAIL_CLIENT_SECRET", "secret"),
        ("FUNDMAIL_DATA_DIR", "/var/lib/fundmail"),
    ];

    #[test]
    fn test_from_env_defaults() {
        let config = AppConfig::from_lookup(env(REQUIRED)).unwrap();
        assert_eq!(config.mailbox, "fund@example.com");
        assert_eq!(config.interval_secs, DEFAULT_INTERVAL_SECS);
        assert_eq!(config.page_size, 1000);
        assert_eq!(config.local_offset_hours, 9);
        assert!(config.replica_dir.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_env_overrides() {
        let mut pairs = REQUIRED.to_vec();
        pairs.extend([
            ("FUNDMAIL_INTERVAL_SECS", "60"),
            ("FUNDMAIL_PAGE_SIZE", " 50 "),
            ("FUNDMAIL_LOCAL_OFFSET_HOURS", "-5"),
            ("FUNDMAIL_REPLICA_DIR", "/mnt/share"),
        ]);
        let config = AppConfig::from_lookup(env(&pairs)).unwrap();
        assert_eq!(config.interval(), Duration::from_secs(60));
        assert_eq!(config.page_size, 50);
        assert_eq!(config.local_offset().local_minus_utc(), -5 * 3600);
        assert_eq!(config.replica_dir, Some(PathBuf::from("/mnt/share")));
    }

    #[test]
    fn test_missing_required_variable() {
        let err = AppConfig::from_lookup(env(&REQUIRED[1..])).unwrap_err();
        assert!(err.to_string().contains("FUNDMAIL_MAILBOX"));
    }

    #[test]
    fn test_invalid_number() {
        let mut pairs = REQUIRED.to_vec();
        pairs.push(("FUNDMAIL_PAGE_SIZE", "lots"));
        assert!(AppConfig::from_lookup(env(&pairs)).is_err());
    }

    #[test]
    fn test_from_json_and_validate() {
        let json = r#"{
            "mailbox": "fund@example.com",
            "tenant_id": "t",
            "client_id": "c",
            "client_secret": "s",
            "data_dir": "/data",
            "page_size": 1001
        }"#;
        let config = AppConfig::from_json(json).unwrap();
        let err = config.validate().unwrap_err();
        assert_eq!(err.kind(), "config");
        assert!(err.to_string().contains("page_size"));
    }

    #[test]
    fn test_invalid_offset_rejected() {
        let mut config = AppConfig::from_lookup(env(REQUIRED)).unwrap();
        config.local_offset_hours = 30;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_derived_paths() {
        let config = AppConfig::from_lookup(env(REQUIRED)).unwrap();
        let date = NaiveDate::from_ymd_opt(2025, 6, 30).unwrap();
        assert_eq!(
            config.checkpoint_path(),
            PathBuf::from("/var/lib/fundmail/LAST_TIME.json")
        );
        assert_eq!(
            config.db_path(date),
            PathBuf::from("/var/lib/fundmail/2025_06_30/fm_2025_06_30.db")
        );
        assert_eq!(
            config.attach_dir(date),
            PathBuf::from("/var/lib/fundmail/2025_06_30/attach")
        );
    }

    #[test]
    fn test_sftp_settings_from_env() {
        let mut pairs = REQUIRED.to_vec();
        pairs.extend([
            ("FUNDMAIL_SFTP_HOST", "backup.example.com"),
            ("FUNDMAIL_SFTP_PORT", "2222"),
            ("FUNDMAIL_SFTP_USER", "fund"),
            ("FUNDMAIL_SFTP_PASSWORD", "hunter2"),
        ]);
        let config = AppConfig::from_lookup(env(&pairs)).unwrap();
        assert!(config.validate().is_ok());

        let sftp = config.sftp().unwrap();
        assert_eq!(sftp.host, "backup.example.com");
        assert_eq!(sftp.port, 2222);
        assert_eq!(sftp.user, "fund");
        assert_eq!(sftp.root, ".");
        assert!(!format!("{:?}", sftp).contains("hunter2"));
        assert!(!format!("{:?}", config).contains("hunter2"));
    }

    #[test]
    fn test_sftp_host_without_credentials_rejected() {
        let mut pairs = REQUIRED.to_vec();
        pairs.push(("FUNDMAIL_SFTP_HOST", "backup.example.com"));
        let config = AppConfig::from_lookup(env(&pairs)).unwrap();
        assert!(config.sftp().is_none());
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("sftp_user"));
    }

    #[test]
    fn test_sftp_defaults_from_json() {
        let json = r#"{
            "mailbox": "fund@example.com",
            "tenant_id": "t",
            "client_id": "c",
            "client_secret": "s",
            "data_dir": "/data",
            "sftp_host": "backup",
            "sftp_user": "fund",
            "sftp_password": "pw",
            "sftp_root": "/upload/fund"
        }"#;
        let config = AppConfig::from_json(json).unwrap();
        let sftp = config.sftp().unwrap();
        assert_eq!(sftp.port, DEFAULT_SFTP_PORT);
        assert_eq!(sftp.root, "/upload/fund");
    }

    #[test]
    fn test_debug_redacts_secret() {
        let config = AppConfig::from_lookup(env(REQUIRED)).unwrap();
        let debug = format!("{:?}", config);
        assert!(!debug.contains("secret\""));
        assert!(debug.contains("<redacted>"));
    }
}
