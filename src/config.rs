//! Bus configuration loaded from TOML.
//!
//! ```toml
//! [bus]
//! debounce_ms = 100
//! max_delay_ms = 1000
//!
//! [init]
//! lang = "en"
//! offline = false
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::coalescer::DEFAULT_WINDOW;
use crate::fields::GlobalState;

const fn default_debounce_ms() -> u64 {
    DEFAULT_WINDOW.as_millis() as u64
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config at {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config{}: {source}", display_path(.path.as_deref()))]
    Parse {
        path: Option<PathBuf>,
        source: toml::de::Error,
    },
    #[error("debounce window must be greater than zero")]
    InvalidWindow,
}

fn display_path(path: Option<&Path>) -> String {
    path.map(|p| format!(" at {}", p.display())).unwrap_or_default()
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BusConfig {
    #[serde(default)]
    pub bus: BusSection,
    /// Starting values for the global fields.
    #[serde(default)]
    pub init: GlobalState,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BusSection {
    /// Quiet period before pending writes are flushed.
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
    /// Upper bound on how long a continuously re-armed batch is held.
    pub max_delay_ms: Option<u64>,
}

impl Default for BusSection {
    fn default() -> Self {
        Self {
            debounce_ms: default_debounce_ms(),
            max_delay_ms: None,
        }
    }
}

impl BusConfig {
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        let config: BusConfig =
            toml::from_str(raw).map_err(|source| ConfigError::Parse { path: None, source })?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: BusConfig = toml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: Some(path.to_path_buf()),
            source,
        })?;
        config.validate()?;
        tracing::debug!(path = %path.display(), debounce_ms = config.bus.debounce_ms, "loaded bus config");
        Ok(config)
    }

    /// Load `path` if it exists, falling back to defaults otherwise.
    ///
    /// A file that exists but fails to parse is still an error.
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if path.exists() {
            Self::load(path)
        } else {
            tracing::debug!(path = %path.display(), "no bus config, using defaults");
            Ok(Self::default())
        }
    }

    pub fn window(&self) -> Duration {
        Duration::from_millis(self.bus.debounce_ms)
    }

    pub fn max_delay(&self) -> Option<Duration> {
        self.bus.max_delay_ms.map(Duration::from_millis)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.bus.debounce_ms == 0 {
            return Err(ConfigError::InvalidWindow);
        }
        Ok(())
    }
}
