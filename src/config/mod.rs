//! Configuration management for postdeck.
//!
//! Configuration is read from `~/.config/postdeck/config.toml` at startup.
//! If the file doesn't exist, a default configuration with comments is created.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::bulk::{
    RetryPolicy, DEFAULT_CONCURRENCY, DEFAULT_EXTERNAL_CHUNK, DEFAULT_INTERNAL_CHUNK,
    DEFAULT_MAX_RETRIES,
};
use crate::domain::{CurrentUser, Role};
use crate::engine::EngineSettings;
use crate::external::{DEFAULT_COUNT_PAGE_SIZE, DEFAULT_MAX_COUNT_PAGES};
use crate::remote::DEFAULT_FALLBACK_SCAN_BATCHES;
use crate::store::MAX_BATCH_WRITES;

/// Main configuration struct.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub user: UserConfig,
    pub external: ExternalConfig,
    pub bulk: BulkConfig,
    pub cache: CacheConfig,
    pub listing: ListingConfig,
}

/// Stand-in for the authentication layer: who is signed in.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct UserConfig {
    pub id: String,
    pub display_name: String,
    pub role: Role,
}

impl Default for UserConfig {
    fn default() -> Self {
        Self {
            id: "local-user".into(),
            display_name: "Local User".into(),
            role: Role::User,
        }
    }
}

impl UserConfig {
    pub fn to_user(&self) -> CurrentUser {
        CurrentUser::new(self.id.clone(), self.role, self.display_name.clone())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ExternalConfig {
    pub base_url: String,
    pub timeout_secs: u64,
    pub count_page_size: usize,
    pub max_count_pages: u32,
    pub request_delay_ms: u64,
}

impl Default for ExternalConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:3000/posts".into(),
            timeout_secs: 10,
            count_page_size: DEFAULT_COUNT_PAGE_SIZE,
            max_count_pages: DEFAULT_MAX_COUNT_PAGES,
            request_delay_ms: 150,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BulkConfig {
    pub internal_chunk_size: usize,
    pub external_chunk_size: usize,
    pub max_retries: u32,
    pub base_backoff_ms: u64,
    pub concurrency: usize,
}

impl Default for BulkConfig {
    fn default() -> Self {
        Self {
            internal_chunk_size: DEFAULT_INTERNAL_CHUNK,
            external_chunk_size: DEFAULT_EXTERNAL_CHUNK,
            max_retries: DEFAULT_MAX_RETRIES,
            base_backoff_ms: 200,
            concurrency: DEFAULT_CONCURRENCY,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub ttl_secs: u64,
    /// Entry cap of the cache store; unlimited when absent.
    pub max_entries: Option<usize>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_secs: 20 * 60,
            max_entries: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ListingConfig {
    pub fallback_scan_batches: usize,
}

impl Default for ListingConfig {
    fn default() -> Self {
        Self {
            fallback_scan_batches: DEFAULT_FALLBACK_SCAN_BATCHES,
        }
    }
}

impl Config {
    /// Load configuration from the default path.
    ///
    /// If the config file doesn't exist, creates a default one with comments.
    /// Missing fields in the config file will use default values.
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::default_config_path()?;
        Self::load_from(&config_path)
    }

    pub fn load_from(config_path: &Path) -> Result<Self, ConfigError> {
        if !config_path.exists() {
            Self::create_default_config(config_path)?;
            return Ok(Self::default());
        }

        let content = fs::read_to_string(config_path).map_err(|e| ConfigError::Io {
            path: config_path.to_path_buf(),
            source: e,
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: config_path.to_path_buf(),
            source: e,
        })
    }

    /// Get the default config file path: `~/.config/postdeck/config.toml`
    pub fn default_config_path() -> Result<PathBuf, ConfigError> {
        let config_dir = dirs::config_dir().ok_or(ConfigError::NoConfigDir)?;
        Ok(config_dir.join("postdeck").join("config.toml"))
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache.ttl_secs)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            base_backoff: Duration::from_millis(self.bulk.base_backoff_ms),
            request_delay: Duration::from_millis(self.external.request_delay_ms),
        }
    }

    /// Bulk settings with the internal chunk held to the atomic batch cap.
    pub fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            internal_chunk_size: self.bulk.internal_chunk_size.clamp(1, MAX_BATCH_WRITES),
            external_chunk_size: self.bulk.external_chunk_size.max(1),
            max_retries: self.bulk.max_retries,
            concurrency: self.bulk.concurrency.max(1),
        }
    }

    fn create_default_config(path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| ConfigError::Io {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        let mut file = fs::File::create(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;

        file.write_all(Self::default_config_content().as_bytes())
            .map_err(|e| ConfigError::Io {
                path: path.to_path_buf(),
                source: e,
            })?;

        Ok(())
    }

    fn default_config_content() -> &'static str {
        r##"# postdeck configuration

[user]
# Signed-in user. role is "Admin" (may modify external posts) or "User".
id = "local-user"
display_name = "Local User"
role = "User"

[external]
# REST collection of external posts
base_url = "http://localhost:3000/posts"
timeout_secs = 10

# Page walk used when the server sends no X-Total-Count header
count_page_size = 100
max_count_pages = 50

# Pause between external delete requests (milliseconds)
request_delay_ms = 150

[bulk]
# Ids per atomic batch, capped at 500
internal_chunk_size = 400
external_chunk_size = 20
max_retries = 3
base_backoff_ms = 200
# Internal batches in flight at once
concurrency = 2

[cache]
# Cached pages expire after this many seconds
ttl_secs = 1200

[listing]
# Batches scanned when searching your own posts without a title index
fallback_scan_batches = 20
"##
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Could not determine config directory")]
    NoConfigDir,

    #[error("Failed to read/write config file at {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file at {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}
