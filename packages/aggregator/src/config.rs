//! Run settings.
//!
//! The defaults live in `config/default.toml` and are embedded at compile
//! time. A user file is layered on top key by key, so it only has to name
//! the values it changes.

use std::path::{Path, PathBuf};

use briefkasten_places::PlacesConfig;
use briefkasten_registry::RegistryConfig;
use serde::Deserialize;

const DEFAULT_SETTINGS: &str = include_str!("../config/default.toml");

/// Most tiles a polygon of exactly `limits.max_area` may be split into.
const MAX_TILES_AT_LIMIT: f64 = 100_000.0;

/// Errors from loading settings.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The settings file could not be read.
    #[error("Failed to read {path}: {source}")]
    Io {
        /// File that was read.
        path: PathBuf,
        /// Underlying error.
        source: std::io::Error,
    },

    /// The settings are not valid TOML or do not match the schema.
    #[error("Invalid settings: {0}")]
    Toml(#[from] toml::de::Error),

    /// A value is out of range.
    #[error("Invalid setting {key}: {message}")]
    Invalid {
        /// Dotted key path.
        key: &'static str,
        /// What is wrong with it.
        message: String,
    },
}

/// Grid resolution.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TilingConfig {
    /// Upper bound on tile area in square degrees.
    pub max_tile_area: f64,
}

/// Polygon size guards, in square degrees.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct AreaLimits {
    /// Above this the run proceeds with a warning.
    pub warn_area: f64,
    /// Above this the run is refused.
    pub max_area: f64,
}

/// All settings of one aggregator.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Settings {
    /// `[tiling]`: grid resolution.
    pub tiling: TilingConfig,
    /// `[limits]`: polygon size guards.
    pub limits: AreaLimits,
    /// `[registry]`: building register endpoint and unit counting.
    pub registry: RegistryConfig,
    /// `[places]`: Overture places dataset.
    pub places: PlacesConfig,
}

impl Settings {
    /// Built-in settings.
    ///
    /// # Panics
    ///
    /// Panics if the embedded defaults are malformed (covered by tests).
    #[must_use]
    pub fn defaults() -> Self {
        toml::from_str(DEFAULT_SETTINGS)
            .unwrap_or_else(|e| panic!("Failed to parse built-in settings: {e}"))
    }

    /// Built-in settings with `overrides` (TOML text) layered on top.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if either document is invalid or a value is
    /// out of range.
    pub fn from_toml_str(overrides: &str) -> Result<Self, ConfigError> {
        let mut base: toml::Table = toml::from_str(DEFAULT_SETTINGS)?;
        let overrides: toml::Table = toml::from_str(overrides)?;
        merge_tables(&mut base, overrides);

        let settings: Self = toml::Value::Table(base).try_into()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Built-in settings with the file at `path` layered on top.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the file cannot be read or is invalid.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        log::debug!("Loading settings from {}", path.display());
        Self::from_toml_str(&text)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let positive = |key: &'static str, value: f64| {
            if value.is_finite() && value > 0.0 {
                Ok(())
            } else {
                Err(ConfigError::Invalid {
                    key,
                    message: format!("must be a positive number, got {value}"),
                })
            }
        };

        positive("tiling.max_tile_area", self.tiling.max_tile_area)?;
        positive("limits.warn_area", self.limits.warn_area)?;
        positive("limits.max_area", self.limits.max_area)?;

        if self.limits.warn_area > self.limits.max_area {
            return Err(ConfigError::Invalid {
                key: "limits.warn_area",
                message: format!(
                    "must not exceed limits.max_area ({}), got {}",
                    self.limits.max_area, self.limits.warn_area
                ),
            });
        }

        let tiles_at_limit = self.limits.max_area / self.tiling.max_tile_area;
        if tiles_at_limit > MAX_TILES_AT_LIMIT {
            return Err(ConfigError::Invalid {
                key: "tiling.max_tile_area",
                message: format!(
                    "too small: a polygon of limits.max_area ({}) would need about \
                     {tiles_at_limit:.0} tiles (limit {MAX_TILES_AT_LIMIT})",
                    self.limits.max_area
                ),
            });
        }

        if self.registry.overflow_threshold == 0 {
            return Err(ConfigError::Invalid {
                key: "registry.overflow_threshold",
                message: "must be at least 1".to_string(),
            });
        }

        Ok(())
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self::defaults()
    }
}

/// Recursively overwrites `base` with `overrides`; nested tables merge.
fn merge_tables(base: &mut toml::Table, overrides: toml::Table) {
    for (key, value) in overrides {
        match (base.get_mut(&key), value) {
            (Some(toml::Value::Table(existing)), toml::Value::Table(nested)) => {
                merge_tables(existing, nested);
            }
            (_, value) => {
                base.insert(key, value);
            }
        }
    }
}
