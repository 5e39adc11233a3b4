//! Configuration management.
//!
//! Supports configuration from:
//! - TOML config files
//! - Environment variables

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{LwM2mError, Result};
use crate::io::ContentFormat;

/// Main configuration struct
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Shared in/out buffer sizing
    #[serde(default)]
    pub buffers: BufferConfig,

    /// Default content-format preferences
    #[serde(default)]
    pub content: ContentConfig,

    /// Download driver defaults
    #[serde(default)]
    pub download: DownloadDefaults,
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let content = std::fs::read_to_string(&path)
            .map_err(|e| LwM2mError::Config(format!("failed to read config file: {e}")))?;

        toml::from_str(&content).map_err(Into::into)
    }

    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(val) = std::env::var("LWM2M_IN_BUFFER_SIZE") {
            if let Ok(val) = val.parse() {
                config.buffers.in_buffer_size = val;
            }
        }
        if let Ok(val) = std::env::var("LWM2M_OUT_BUFFER_SIZE") {
            if let Ok(val) = val.parse() {
                config.buffers.out_buffer_size = val;
            }
        }
        if let Ok(val) = std::env::var("LWM2M_DOWNLOAD_IDLE_TIMEOUT_SECS") {
            if let Ok(val) = val.parse() {
                config.download.idle_timeout_secs = val;
            }
        }

        config
    }

    /// Merge with another config (other takes precedence)
    pub fn merge(self, other: Self) -> Self {
        Self {
            buffers: other.buffers,
            content: other.content,
            download: other.download,
        }
    }
}

/// Sizing for the two shared in/out byte buffers acquired around every
/// codec operation. A buffer too small for one payload surfaces as
/// [`crate::error::LwM2mError::BufferTooShort`] rather than growing
/// silently — these are meant to be sized once, up front, for the target
/// device's memory budget.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BufferConfig {
    pub in_buffer_size: usize,
    pub out_buffer_size: usize,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            in_buffer_size: 4096,
            out_buffer_size: 4096,
        }
    }
}

/// Default content-format preferences used when a request doesn't pin one
/// down explicitly (e.g. no `Accept` option on a Read).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ContentConfig {
    pub default_read_format: ContentFormat,
    pub default_composite_format: ContentFormat,
}

impl Default for ContentConfig {
    fn default() -> Self {
        Self {
            default_read_format: ContentFormat::SenmlCbor,
            default_composite_format: ContentFormat::SenmlCbor,
        }
    }
}

/// Defaults handed to every download transfer unless a per-download
/// config overrides them.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DownloadDefaults {
    pub idle_timeout_secs: u64,
    /// Placeholder for the global ciphersuite list a `coaps`/`https`
    /// transfer falls back to when no per-download security config is
    /// supplied; left as names rather than a TLS-library-specific type so
    /// this crate doesn't have to pick a TLS backend on behalf of callers
    /// who don't need CoAP downloads at all.
    pub default_ciphersuites: Vec<String>,
}

impl DownloadDefaults {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }
}

impl Default for DownloadDefaults {
    fn default() -> Self {
        Self {
            idle_timeout_secs: 30,
            default_ciphersuites: vec![
                "TLS_ECDHE_ECDSA_WITH_AES_128_GCM_SHA256".to_string(),
                "TLS_ECDHE_RSA_WITH_AES_128_GCM_SHA256".to_string(),
            ],
        }
    }
}
