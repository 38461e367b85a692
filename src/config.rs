//! Runtime configuration.
//!
//! Values are layered: built-in defaults, then the JSON config file
//! (`~/.mailindex.json` unless `--config` names another), then
//! `MEILINDEX_*` environment variables. CLI flags override individual
//! fields after loading. A missing config file is written with the
//! defaults so it can be edited afterwards.

use crate::sync::DEFAULT_BATCH_SIZE;
use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

const ENV_PREFIX: &str = "MEILINDEX_";

/// File name of the config file in the home directory.
pub const CONFIG_FILE_NAME: &str = ".mailindex.json";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

fn env_key(key: &str) -> String {
    format!("{ENV_PREFIX}{key}")
}

fn env_value(key: &str) -> Option<String> {
    env::var(env_key(key)).ok()
}

fn env_flag(key: &str) -> Option<bool> {
    env_value(key).map(|value| matches!(value.to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
}

fn env_parse<T: FromStr>(key: &str) -> Option<T> {
    env_value(key).and_then(|value| value.trim().parse::<T>().ok())
}

fn env_millis(key: &str) -> Option<Duration> {
    env_parse::<u64>(key).map(Duration::from_millis)
}

fn env_optional(key: &str) -> Option<String> {
    env_value(key)
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

/// Durations are stored as whole milliseconds.
mod duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(u64::try_from(duration.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

/// Meilisearch connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    pub url: String,
    pub index: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(rename = "request_timeout_ms", with = "duration_millis")]
    pub request_timeout: Duration,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:7700".to_string(),
            index: "mail".to_string(),
            api_key: None,
            request_timeout: Duration::from_secs(10),
        }
    }
}

impl SearchConfig {
    fn apply_env(&mut self) {
        if let Some(url) = env_optional("MEILISEARCH_URL") {
            self.url = url;
        }
        if let Some(index) = env_optional("MEILISEARCH_INDEX") {
            self.index = index;
        }
        if let Some(api_key) = env_optional("MEILISEARCH_API_KEY") {
            self.api_key = Some(api_key);
        }
        if let Some(timeout) = env_millis("MEILISEARCH_TIMEOUT_MS") {
            self.request_timeout = timeout;
        }
    }
}

/// IMAP account settings.
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ImapConfig {
    pub host: String,
    pub port: u16,
    pub tls: bool,
    pub skip_tls_verification: bool,
    pub username: String,
    pub password: String,
    pub folder: String,
}

impl Default for ImapConfig {
    fn default() -> Self {
        Self {
            host: "imap.mymail.com".to_string(),
            port: 993,
            tls: true,
            skip_tls_verification: false,
            username: String::new(),
            password: String::new(),
            folder: "INBOX".to_string(),
        }
    }
}

impl ImapConfig {
    fn apply_env(&mut self) {
        if let Some(host) = env_optional("IMAP_HOST") {
            self.host = host;
        }
        if let Some(port) = env_parse("IMAP_PORT") {
            self.port = port;
        }
        if let Some(tls) = env_flag("IMAP_TLS") {
            self.tls = tls;
        }
        if let Some(skip) = env_flag("IMAP_SKIP_TLS_VERIFICATION") {
            self.skip_tls_verification = skip;
        }
        if let Some(username) = env_value("IMAP_USERNAME") {
            self.username = username;
        }
        if let Some(password) = env_value("IMAP_PASSWORD") {
            self.password = password;
        }
        if let Some(folder) = env_optional("IMAP_FOLDER") {
            self.folder = folder;
        }
    }
}

impl std::fmt::Debug for ImapConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImapConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("tls", &self.tls)
            .field("skip_tls_verification", &self.skip_tls_verification)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("folder", &self.folder)
            .finish()
    }
}

/// Local archive settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ArchiveConfig {
    pub directory: PathBuf,
    pub recursive: bool,
    pub batch_size: usize,
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            directory: home_dir().join(".mails"),
            recursive: false,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }
}

impl ArchiveConfig {
    fn apply_env(&mut self) {
        if let Some(directory) = env_optional("FILE_DIRECTORY") {
            self.directory = PathBuf::from(directory);
        }
        if let Some(recursive) = env_flag("FILE_RECURSIVE") {
            self.recursive = recursive;
        }
        if let Some(batch_size) = env_parse("FILE_BATCH_SIZE") {
            self.batch_size = batch_size;
        }
    }
}

fn home_dir() -> PathBuf {
    dirs::home_dir().unwrap_or_else(|| PathBuf::from("."))
}

/// Admission control for concurrent pushes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PushConfig {
    pub max_in_flight: usize,
    #[serde(rename = "admission_timeout_ms", with = "duration_millis")]
    pub admission_timeout: Duration,
    #[serde(rename = "poll_interval_ms", with = "duration_millis")]
    pub poll_interval: Duration,
}

impl Default for PushConfig {
    fn default() -> Self {
        Self {
            max_in_flight: num_cpus::get(),
            admission_timeout: Duration::from_secs(3600),
            poll_interval: Duration::from_millis(10),
        }
    }
}

impl PushConfig {
    fn apply_env(&mut self) {
        if let Some(max_in_flight) = env_parse("PUSH_MAX_IN_FLIGHT") {
            self.max_in_flight = max_in_flight;
        }
        if let Some(timeout) = env_millis("PUSH_TIMEOUT_MS") {
            self.admission_timeout = timeout;
        }
        if let Some(poll) = env_millis("PUSH_POLL_MS") {
            self.poll_interval = poll;
        }
    }
}

/// Everything the CLI needs, loaded once at startup.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexerConfig {
    #[serde(rename = "meilisearch")]
    pub search: SearchConfig,
    pub imap: ImapConfig,
    #[serde(rename = "file")]
    pub archive: ArchiveConfig,
    pub push: PushConfig,
}

impl IndexerConfig {
    /// Defaults overlaid with the environment, without touching any file.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env();
        config.clamp();
        config
    }

    /// `~/.mailindex.json`.
    pub fn default_path() -> PathBuf {
        home_dir().join(CONFIG_FILE_NAME)
    }

    /// Read the config file at `path` and overlay the environment.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::read_file(path)?;
        config.apply_env();
        config.clamp();
        Ok(config)
    }

    /// Read the config file at `path`. Keys missing from the file keep their
    /// defaults. A missing file is created holding the defaults; failing to
    /// create it is only logged.
    pub fn read_file(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            let config = Self::default();
            match config.write_file(path) {
                Ok(()) => log::info!("wrote default config to {}", path.display()),
                Err(err) => log::warn!("could not write default config to {}: {}", path.display(), err),
            }
            return Ok(config);
        }

        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = serde_json::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        log::debug!("loaded config from {}", path.display());
        Ok(config)
    }

    fn write_file(&self, path: &Path) -> std::io::Result<()> {
        if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)
    }

    fn apply_env(&mut self) {
        self.search.apply_env();
        self.imap.apply_env();
        self.archive.apply_env();
        self.push.apply_env();
    }

    fn clamp(&mut self) {
        self.archive.batch_size = self.archive.batch_size.max(1);
        self.push.max_in_flight = self.push.max_in_flight.max(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_without_environment() {
        // None of these keys are set in the test environment.
        let config = IndexerConfig::from_env();
        let search = config.search;
        assert_eq!(search.url, "http://localhost:7700");
        assert_eq!(search.index, "mail");
        assert_eq!(search.request_timeout, Duration::from_secs(10));

        let imap = config.imap;
        assert_eq!(imap.port, 993);
        assert_eq!(imap.folder, "INBOX");
        assert!(imap.tls);

        let push = config.push;
        assert!(push.max_in_flight >= 1);
        assert_eq!(push.admission_timeout, Duration::from_secs(3600));
        assert_eq!(push.poll_interval, Duration::from_millis(10));
    }

    #[test]
    fn test_debug_redacts_password() {
        let mut imap = ImapConfig::default();
        imap.password = "hunter2".to_string();
        let rendered = format!("{imap:?}");
        assert!(!rendered.contains("hunter2"));
        assert!(rendered.contains("<redacted>"));
    }

    #[test]
    fn test_partial_file_keeps_defaults_for_missing_keys() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{
                "meilisearch": {"url": "http://search:7700", "request_timeout_ms": 2500},
                "imap": {"host": "imap.example.com", "username": "ann"},
                "file": {"recursive": true}
            }"#,
        )
        .unwrap();

        let config = IndexerConfig::read_file(&path).unwrap();
        assert_eq!(config.search.url, "http://search:7700");
        assert_eq!(config.search.index, "mail");
        assert_eq!(config.search.request_timeout, Duration::from_millis(2500));
        assert_eq!(config.imap.host, "imap.example.com");
        assert_eq!(config.imap.username, "ann");
        assert_eq!(config.imap.port, 993);
        assert!(config.archive.recursive);
        assert_eq!(config.archive.batch_size, DEFAULT_BATCH_SIZE);
        assert_eq!(config.push.poll_interval, Duration::from_millis(10));
    }

    #[test]
    fn test_missing_file_is_written_with_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join(CONFIG_FILE_NAME);

        let first = IndexerConfig::read_file(&path).unwrap();
        assert!(path.exists());

        let written = std::fs::read_to_string(&path).unwrap();
        assert!(written.contains("\"meilisearch\""));
        assert!(written.contains("\"request_timeout_ms\": 10000"));
        assert!(written.contains("\"file\""));

        let second = IndexerConfig::read_file(&path).unwrap();
        assert_eq!(second.search.url, first.search.url);
        assert_eq!(second.imap.host, first.imap.host);
        assert_eq!(second.archive.directory, first.archive.directory);
        assert_eq!(second.push.admission_timeout, first.push.admission_timeout);
    }

    #[test]
    fn test_invalid_file_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "meilisearch: {url: nope}").unwrap();

        let err = IndexerConfig::read_file(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn test_zero_sizes_are_clamped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"file": {"batch_size": 0}, "push": {"max_in_flight": 0}}"#).unwrap();

        let config = IndexerConfig::load(&path).unwrap();
        assert_eq!(config.archive.batch_size, 1);
        assert_eq!(config.push.max_in_flight, 1);
    }
}
