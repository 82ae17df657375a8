//! Engine configuration.
//!
//! Read from JSON (file or string) at startup. Every field has a default, so
//! `{}` is a valid configuration: 60 Hz, five catch-up ticks per frame, play
//! mode, no worlds.

use std::collections::BTreeSet;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::EngineError;

// ---------------------------------------------------------------------------
// LoggingConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is not set.
    pub filter: String,
    /// Colored output.
    pub ansi: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "warn".to_owned(),
            ansi: true,
        }
    }
}

// ---------------------------------------------------------------------------
// WorldConfig
// ---------------------------------------------------------------------------

/// A world created when the engine starts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorldConfig {
    pub name: String,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    #[serde(default = "default_playing")]
    pub playing: bool,
}

fn default_playing() -> bool {
    true
}

impl WorldConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tags: BTreeSet::new(),
            playing: true,
        }
    }
}

// ---------------------------------------------------------------------------
// EngineConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Seconds per simulation tick. Must be positive and finite.
    pub fixed_dt: f64,
    /// Upper bound on ticks run by one `advance` call; backlog beyond it is
    /// dropped.
    pub max_ticks_per_frame: u32,
    /// Worlds start out of play mode: only editor-enabled systems run.
    pub editor_mode: bool,
    pub logging: LoggingConfig,
    pub worlds: Vec<WorldConfig>,
}

impl Default for EngineConfig {
    /// Defaults to 60 Hz with up to five catch-up ticks.
    fn default() -> Self {
        Self {
            fixed_dt: 1.0 / 60.0,
            max_ticks_per_frame: 5,
            editor_mode: false,
            logging: LoggingConfig::default(),
            worlds: Vec::new(),
        }
    }
}

impl EngineConfig {
    /// Parse and validate a JSON configuration.
    pub fn from_json_str(json: &str) -> Result<Self, EngineError> {
        let config: Self = serde_json::from_str(json).map_err(|source| EngineError::Parse {
            what: "engine config".to_owned(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a JSON configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, EngineError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| EngineError::ConfigIo {
            path: path.display().to_string(),
            source,
        })?;
        let config = Self::from_json_str(&text)?;
        tracing::debug!(path = %path.display(), worlds = config.worlds.len(), "engine config loaded");
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        if !(self.fixed_dt > 0.0 && self.fixed_dt.is_finite()) {
            return Err(EngineError::InvalidConfig {
                reason: format!("fixed_dt must be positive and finite, got {}", self.fixed_dt),
            });
        }
        if self.max_ticks_per_frame == 0 {
            return Err(EngineError::InvalidConfig {
                reason: "max_ticks_per_frame must be at least 1".to_owned(),
            });
        }
        let mut seen = BTreeSet::new();
        for world in &self.worlds {
            if world.name.is_empty() {
                return Err(EngineError::InvalidConfig {
                    reason: "world names must not be empty".to_owned(),
                });
            }
            if !seen.insert(world.name.as_str()) {
                return Err(EngineError::InvalidConfig {
                    reason: format!("world '{}' is configured twice", world.name),
                });
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
