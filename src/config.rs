//! Configuration management for the engine bridge
//!
//! Runtime configuration loaded from JSON, so log verbosity, stream
//! batching and extra engine options can be changed without recompiling.
//! Every field has a default; a missing or broken file falls back to them.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use crate::data_source::{DATA_SOURCE_SCHEME, DEFAULT_READ_CHUNK_SIZE};
use crate::events::LogLevel;

/// Environment variable naming a config file for [`EngineConfig::load`]
pub const CONFIG_ENV_VAR: &str = "MPV_BRIDGE_CONFIG";

/// Complete engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub log: LogConfig,
    pub data_source: DataSourceConfig,
    /// Name of the thread draining the engine's event queue
    pub event_thread_name: String,
    /// Extra engine options applied at create, after the built-in ones
    pub options: BTreeMap<String, String>,
}

/// Engine log routing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Minimum level of engine log messages delivered to log observers
    pub request_level: LogLevel,
    /// Value of the engine's `msg-level` option (terminal verbosity)
    pub msg_level: String,
    /// Also emit engine log lines through `tracing` (target `mpv`)
    pub forward_to_tracing: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            // Request verbose messages; msg-level can still narrow the
            // terminal output later.
            request_level: LogLevel::Debug,
            msg_level: "all=v".to_string(),
            forward_to_tracing: true,
        }
    }
}

/// Stream protocol settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DataSourceConfig {
    /// URI scheme routed to the registered factory
    pub scheme: String,
    /// Largest single read issued to a data source
    pub read_chunk_size: usize,
}

impl Default for DataSourceConfig {
    fn default() -> Self {
        Self {
            scheme: DATA_SOURCE_SCHEME.to_string(),
            read_chunk_size: DEFAULT_READ_CHUNK_SIZE,
        }
    }
}

impl Default for EngineConfig {
    /// Default configuration values (fallback if config file not found)
    fn default() -> Self {
        Self {
            log: LogConfig::default(),
            data_source: DataSourceConfig::default(),
            event_thread_name: "mpv-event".to_string(),
            options: BTreeMap::new(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from JSON file
    ///
    /// # Arguments
    /// * `path` - Path to JSON config file
    ///
    /// # Returns
    /// The parsed configuration, or the defaults if the file cannot be
    /// read or parsed.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Self {
        match fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str(&contents) {
                Ok(config) => {
                    log::info!("[Config] Loaded configuration from {:?}", path.as_ref());
                    config
                }
                Err(err) => {
                    log::warn!(
                        "[Config] Failed to parse JSON from {:?}: {}. Using defaults.",
                        path.as_ref(),
                        err
                    );
                    Self::default()
                }
            },
            Err(err) => {
                log::warn!(
                    "[Config] Failed to read config file {:?}: {}. Using defaults.",
                    path.as_ref(),
                    err
                );
                Self::default()
            }
        }
    }

    /// Load from the file named by `MPV_BRIDGE_CONFIG`, or use defaults.
    pub fn load() -> Self {
        match std::env::var_os(CONFIG_ENV_VAR) {
            Some(path) => Self::load_from_file(path),
            None => Self::default(),
        }
    }
}
