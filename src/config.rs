//! Configuration types for media-cache-dl

use serde::{Deserialize, Serialize};
use std::{path::PathBuf, time::Duration};

use crate::error::{Error, Result};

/// Local cache settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Directory holding cached data and index files (default: "./media-cache")
    #[serde(default = "default_cache_dir")]
    pub cache_dir: PathBuf,

    /// Contiguous cached prefix above which `download_to_end(0)` re-validates
    /// only that prefix instead of fetching the whole tail (default: 50 KiB)
    #[serde(default = "default_resume_prefix_threshold")]
    pub resume_prefix_threshold: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            cache_dir: default_cache_dir(),
            resume_prefix_threshold: default_resume_prefix_threshold(),
        }
    }
}

/// Background preload settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PreloadConfig {
    /// Bytes fetched from the start of each queued resource (default: 1 MiB)
    #[serde(default = "default_preload_byte_count")]
    pub preload_byte_count: u64,

    /// Free space (MiB) at or below which the whole cache is purged when a
    /// new queue is set (default: 512)
    #[serde(default = "default_min_free_space_mb")]
    pub min_free_space_mb: u64,
}

impl Default for PreloadConfig {
    fn default() -> Self {
        Self {
            preload_byte_count: default_preload_byte_count(),
            min_free_space_mb: default_min_free_space_mb(),
        }
    }
}

/// HTTP client settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HttpConfig {
    /// TCP/TLS connect timeout (default: 10 seconds)
    #[serde(default = "default_connect_timeout", with = "duration_serde")]
    pub connect_timeout: Duration,

    /// Whole-request timeout including the body; 0 disables it (default: 30 seconds)
    #[serde(default = "default_read_timeout", with = "duration_serde")]
    pub read_timeout: Duration,

    /// Custom User-Agent header
    #[serde(default)]
    pub user_agent: Option<String>,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            connect_timeout: default_connect_timeout(),
            read_timeout: default_read_timeout(),
            user_agent: None,
        }
    }
}

/// Main configuration
///
/// Sub-configs are flattened, so the serialized form is a single flat object:
///
/// ```json
/// { "cache_dir": "/var/cache/player", "preload_byte_count": 2097152 }
/// ```
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// Local cache settings
    #[serde(flatten)]
    pub cache: CacheConfig,

    /// Background preload settings
    #[serde(flatten)]
    pub preload: PreloadConfig,

    /// HTTP client settings
    #[serde(flatten)]
    pub http: HttpConfig,
}

impl Config {
    /// Cache directory
    pub fn cache_dir(&self) -> &PathBuf {
        &self.cache.cache_dir
    }

    /// Reject settings no component can work with
    pub fn validate(&self) -> Result<()> {
        if self.cache.cache_dir.as_os_str().is_empty() {
            return Err(Error::Config {
                message: "cache directory must not be empty".to_string(),
                key: Some("cache_dir".to_string()),
            });
        }
        if self.preload.preload_byte_count == 0 {
            return Err(Error::Config {
                message: "preload byte count must be greater than zero".to_string(),
                key: Some("preload_byte_count".to_string()),
            });
        }
        Ok(())
    }
}

fn default_cache_dir() -> PathBuf {
    PathBuf::from("./media-cache")
}

fn default_resume_prefix_threshold() -> u64 {
    50 * 1024
}

fn default_preload_byte_count() -> u64 {
    1024 * 1024
}

fn default_min_free_space_mb() -> u64 {
    512
}

fn default_connect_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_read_timeout() -> Duration {
    Duration::from_secs(30)
}

// Duration serialization helper
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}
