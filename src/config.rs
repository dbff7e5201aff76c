//! Library configuration.
//!
//! Configuration is loaded from a TOML file at:
//! 1. `$MIMESIFT_CONFIG` (environment variable)
//! 2. `~/.config/mimesift/config.toml` (Linux/macOS)
//!    `%APPDATA%\mimesift\config.toml` (Windows)
//! 3. Built-in defaults

use std::io::Read;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{MimeError, Result};
use crate::parser::boundary::{peek_depth, BoundaryReader};
use crate::parser::mediatype::MediaTypeOptions;
use crate::parser::source::{PeekReader, DEFAULT_PEEK_CAPACITY};

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// General settings.
    pub general: GeneralConfig,
    /// Streaming reader tuning.
    pub reader: ReaderConfig,
    /// Media-type parsing behavior.
    pub media_type: MediaTypeConfig,
}

/// General settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Log filter for applications embedding the library: "error", "warn",
    /// "info", "debug", "trace", or any `EnvFilter` directive.
    ///
    /// The library never installs a subscriber. Pass this value to
    /// `tracing_subscriber::EnvFilter::try_new` when setting one up.
    pub log_level: String,
}

/// Streaming reader tuning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReaderConfig {
    /// Lookahead buffer of a [`PeekReader`] in bytes (default: 4096).
    pub peek_buffer_size: usize,
}

/// Media-type parsing behavior.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MediaTypeConfig {
    /// Report bare parameter names (`; format`) instead of discarding them.
    pub record_valueless_params: bool,
}

// ── Default implementations ─────────────────────────────────────

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: "warn".to_string(),
        }
    }
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            peek_buffer_size: DEFAULT_PEEK_CAPACITY,
        }
    }
}

impl Default for MediaTypeConfig {
    fn default() -> Self {
        Self {
            record_valueless_params: true,
        }
    }
}

impl Config {
    /// Options for [`parse_media_type_with`](crate::parser::mediatype::parse_media_type_with).
    pub fn media_type_options(&self) -> MediaTypeOptions {
        MediaTypeOptions {
            record_valueless_params: self.media_type.record_valueless_params,
        }
    }
}

impl ReaderConfig {
    /// Peek capacity to use for `boundary`: the configured size, raised to
    /// what the boundary needs.
    pub fn capacity_for(&self, boundary: &str) -> usize {
        self.peek_buffer_size.max(peek_depth(boundary))
    }

    /// A boundary reader over `reader` using this configuration.
    pub fn boundary_reader<R: Read>(
        &self,
        reader: R,
        boundary: &str,
    ) -> Result<BoundaryReader<PeekReader<R>>> {
        let source = PeekReader::with_capacity(self.capacity_for(boundary), reader);
        BoundaryReader::new(source, boundary)
    }
}

// ── Load / save ─────────────────────────────────────────────────

/// Load configuration, searching standard locations.
///
/// Returns the default configuration if no file is found or on parse error.
pub fn load_config() -> Config {
    if let Some(path) = config_file_path() {
        if path.exists() {
            match load_config_from(&path) {
                Ok(cfg) => {
                    tracing::info!(path = %path.display(), "Loaded config");
                    return cfg;
                }
                Err(e) => {
                    tracing::warn!(
                        path = %path.display(),
                        error = %e,
                        "Failed to load config, using defaults"
                    );
                }
            }
        }
    }
    Config::default()
}

/// Load configuration from an explicit path.
pub fn load_config_from(path: &Path) -> Result<Config> {
    let contents = std::fs::read_to_string(path)?;
    toml::from_str::<Config>(&contents).map_err(|source| MimeError::InvalidConfig {
        path: path.to_path_buf(),
        source,
    })
}

/// Save configuration to the standard location.
pub fn save_config(config: &Config) -> anyhow::Result<()> {
    let path = config_file_path()
        .ok_or_else(|| anyhow::anyhow!("Could not determine config file path"))?;
    save_config_to(config, &path)
}

/// Save configuration to an explicit path, creating parent directories.
pub fn save_config_to(config: &Config, path: &Path) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let contents = toml::to_string_pretty(config)?;
    std::fs::write(path, contents)?;
    tracing::info!(path = %path.display(), "Saved config");
    Ok(())
}

/// Determine the config file path (checking env var first, then standard dirs).
pub fn config_file_path() -> Option<PathBuf> {
    if let Ok(env_path) = std::env::var("MIMESIFT_CONFIG") {
        return Some(PathBuf::from(env_path));
    }

    dirs::config_dir().map(|d| d.join("mimesift").join("config.toml"))
}
