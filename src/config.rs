//! Search configuration: optional TOML file, then `CSEARCH_*` environment
//! overrides (a `.env` file in the working directory is honored).

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::model::types::ContentType;

pub const CONFIG_FILE_NAME: &str = "search.toml";

/// Upper bound for `ttl_secs` (about a century).
const MAX_TTL_SECS: u64 = 3_153_600_000;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid value for {key}: {value:?} ({reason})")]
    InvalidEnv {
        key: &'static str,
        value: String,
        reason: String,
    },
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// A directory of markdown content indexed as one content type.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ContentRootConfig {
    pub path: PathBuf,
    #[serde(rename = "type")]
    pub content_type: ContentType,
    #[serde(default)]
    pub url_prefix: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SearchConfig {
    pub content_roots: Vec<ContentRootConfig>,
    pub catalog_path: Option<PathBuf>,
    /// Seconds before a generation counts as stale.
    pub ttl_secs: u64,
    /// Overall deadline for one rebuild's source scans.
    pub source_timeout_secs: u64,
    pub default_limit: usize,
    pub max_limit: usize,
    /// Blog posts newer than this get the recency boost.
    pub recency_days: i64,
    pub socket_path: Option<PathBuf>,
    pub max_connections: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            content_roots: Vec::new(),
            catalog_path: None,
            ttl_secs: 600,
            source_timeout_secs: 30,
            default_limit: 20,
            max_limit: 100,
            recency_days: 30,
            socket_path: None,
            max_connections: 16,
        }
    }
}

impl SearchConfig {
    /// Load configuration. An explicit path must exist; otherwise the
    /// platform config file is used when present. Environment overrides are
    /// applied last.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        let mut cfg = match explicit {
            Some(path) => Self::from_file(path)?,
            None => match default_config_path() {
                Some(path) if path.is_file() => Self::from_file(&path)?,
                _ => Self::default(),
            },
        };
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Parse a TOML file. Relative paths inside it resolve against the
    /// file's directory.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut cfg: SearchConfig = toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        if let Some(base) = path.parent() {
            cfg.resolve_relative(base);
        }
        Ok(cfg)
    }

    fn resolve_relative(&mut self, base: &Path) {
        for root in &mut self.content_roots {
            if root.path.is_relative() {
                root.path = base.join(&root.path);
            }
        }
        if let Some(catalog) = &self.catalog_path
            && catalog.is_relative()
        {
            self.catalog_path = Some(base.join(catalog));
        }
    }

    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        if let Some(n) = env_parse("CSEARCH_TTL_SECS")? {
            self.ttl_secs = n;
        }
        if let Some(n) = env_parse("CSEARCH_SOURCE_TIMEOUT_SECS")? {
            self.source_timeout_secs = n;
        }
        if let Some(n) = env_parse("CSEARCH_DEFAULT_LIMIT")? {
            self.default_limit = n;
        }
        if let Some(n) = env_parse("CSEARCH_MAX_LIMIT")? {
            self.max_limit = n;
        }
        if let Some(n) = env_parse("CSEARCH_RECENCY_DAYS")? {
            self.recency_days = n;
        }
        if let Some(n) = env_parse("CSEARCH_MAX_CONNECTIONS")? {
            self.max_connections = n;
        }
        if let Ok(path) = dotenvy::var("CSEARCH_CATALOG")
            && !path.trim().is_empty()
        {
            self.catalog_path = Some(PathBuf::from(path));
        }
        if let Ok(path) = dotenvy::var("CSEARCH_SOCKET")
            && !path.trim().is_empty()
        {
            self.socket_path = Some(PathBuf::from(path));
        }
        if let Ok(raw) = dotenvy::var("CSEARCH_CONTENT_ROOTS") {
            self.content_roots = parse_content_roots(&raw)?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.default_limit == 0 {
            return Err(ConfigError::Invalid("default_limit must be at least 1".into()));
        }
        if self.max_limit < self.default_limit {
            return Err(ConfigError::Invalid(format!(
                "max_limit ({}) is below default_limit ({})",
                self.max_limit, self.default_limit
            )));
        }
        if self.source_timeout_secs == 0 {
            return Err(ConfigError::Invalid("source_timeout_secs must be positive".into()));
        }
        if self.max_connections == 0 {
            return Err(ConfigError::Invalid("max_connections must be at least 1".into()));
        }
        Ok(())
    }

    pub fn ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.ttl_secs.min(MAX_TTL_SECS) as i64)
    }

    pub fn source_timeout(&self) -> Duration {
        Duration::from_secs(self.source_timeout_secs)
    }

    pub fn recency_window(&self) -> chrono::Duration {
        chrono::Duration::days(self.recency_days.clamp(0, 36_500))
    }

    pub fn socket_path(&self) -> PathBuf {
        self.socket_path
            .clone()
            .unwrap_or_else(crate::daemon::protocol::default_socket_path)
    }
}

pub fn default_config_path() -> Option<PathBuf> {
    directories::ProjectDirs::from("dev", "content-search", "content-search")
        .map(|dirs| dirs.config_dir().join(CONFIG_FILE_NAME))
}

/// `blog=./content/blog;documentation=./docs`
pub fn parse_content_roots(raw: &str) -> Result<Vec<ContentRootConfig>, ConfigError> {
    raw.split(';')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            let invalid = |reason: String| ConfigError::InvalidEnv {
                key: "CSEARCH_CONTENT_ROOTS",
                value: entry.to_string(),
                reason,
            };
            let (kind, path) = entry
                .split_once('=')
                .ok_or_else(|| invalid("expected type=path".into()))?;
            let content_type = kind
                .parse::<ContentType>()
                .map_err(|e| invalid(e.to_string()))?;
            let path = path.trim();
            if path.is_empty() {
                return Err(invalid("empty path".into()));
            }
            Ok(ContentRootConfig {
                path: PathBuf::from(path),
                content_type,
                url_prefix: None,
                category: None,
            })
        })
        .collect()
}

fn env_parse<T>(key: &'static str) -> Result<Option<T>, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match dotenvy::var(key) {
        Ok(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|e: T::Err| ConfigError::InvalidEnv {
                key,
                value,
                reason: e.to_string(),
            }),
        Err(_) => Ok(None),
    }
}
