//! # Seed Express Configuration
//!
//! ## Configuration Sources
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Configuration Priority                               │
//! │                                                                         │
//! │  1. Environment Variables (highest priority)                           │
//! │     SEED_EXPRESS_DB_PATH=/var/lib/app/app.db                           │
//! │     SEED_EXPRESS_BATCH_SIZE=500                                        │
//! │     SEED_EXPRESS_NVL_MODE=true                                         │
//! │     SEED_EXPRESS_DATETIME_OFFSET_SECS=-3600                            │
//! │                                                                         │
//! │  2. TOML Config File                                                   │
//! │     --config <path>, or                                                │
//! │     ~/.config/express/seed.toml (Linux)                                │
//! │                                                                         │
//! │  3. Default Values (lowest priority)                                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Configuration File Format
//! ```toml
//! [database]
//! path = "app.db"
//! max_connections = 5
//!
//! [sync]
//! batch_size = 1000
//! nvl_mode = false
//! datetime_offset_secs = 0
//!
//! [nvl]
//! integer = 0
//! real = 0.0
//! text = ""
//! boolean = false
//!
//! [[tables]]
//! name = "palettes"
//!
//! [[tables]]
//! name = "colors"
//! parent = "palettes"
//! foreign_key = "palette_id"
//! ```

use std::collections::HashSet;
use std::path::PathBuf;

use chrono::Duration;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use seed_core::{NvlTable, DEFAULT_BATCH_SIZE};
use seed_db::DbConfig;

use crate::engine::SyncOptions;
use crate::error::{SyncError, SyncResult};
use crate::registry::{EntityDescriptor, EntityRegistry, ParentRelation};

// =============================================================================
// Database Settings
// =============================================================================

/// Where the target database lives.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatabaseSettings {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,

    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_db_path() -> PathBuf {
    directories::ProjectDirs::from("com", "seed", "express")
        .map(|dirs| dirs.data_dir().join("seed.db"))
        .unwrap_or_else(|| PathBuf::from("seed.db"))
}

fn default_max_connections() -> u32 {
    5
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        DatabaseSettings {
            path: default_db_path(),
            max_connections: default_max_connections(),
        }
    }
}

// =============================================================================
// Sync Settings
// =============================================================================

/// Defaults applied to every sync run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncSettings {
    /// Records per write chunk and transaction.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Replace nulls with the `[nvl]` values.
    #[serde(default)]
    pub nvl_mode: bool,

    /// Seconds added to every parsed datetime. May be negative.
    #[serde(default)]
    pub datetime_offset_secs: i64,
}

fn default_batch_size() -> usize {
    DEFAULT_BATCH_SIZE
}

impl Default for SyncSettings {
    fn default() -> Self {
        SyncSettings {
            batch_size: default_batch_size(),
            nvl_mode: false,
            datetime_offset_secs: 0,
        }
    }
}

// =============================================================================
// Table Entries
// =============================================================================

/// A `[[tables]]` entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableConfig {
    pub name: String,

    /// Table referenced by this one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,

    /// Column holding the parent id. Defaults to `<singular parent>_id`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub foreign_key: Option<String>,
}

impl TableConfig {
    fn descriptor(&self) -> EntityDescriptor {
        let descriptor = EntityDescriptor::new(&self.name);
        match &self.parent {
            Some(parent) => {
                let mut relation = ParentRelation::new(parent);
                if let Some(fk) = &self.foreign_key {
                    relation = relation.with_foreign_key(fk);
                }
                descriptor.with_parent(relation)
            }
            None => descriptor,
        }
    }
}

// =============================================================================
// Main Configuration
// =============================================================================

/// Complete Seed Express configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SeedConfig {
    #[serde(default)]
    pub database: DatabaseSettings,

    #[serde(default)]
    pub sync: SyncSettings,

    #[serde(default)]
    pub nvl: NvlTable,

    #[serde(default)]
    pub tables: Vec<TableConfig>,
}

impl SeedConfig {
    /// Loads configuration from file, environment, and defaults.
    ///
    /// ## Load Order (later overrides earlier)
    /// 1. Default values
    /// 2. Config file (seed.toml)
    /// 3. Environment variables
    pub fn load(config_path: Option<PathBuf>) -> SyncResult<Self> {
        let mut config = Self::default();

        if let Some(path) = config_path.or_else(Self::default_config_path) {
            if path.exists() {
                info!(?path, "Loading seed config from file");
                let contents = std::fs::read_to_string(&path)?;
                config = toml::from_str(&contents)?;
            } else {
                debug!(?path, "Config file not found, using defaults");
            }
        }

        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    /// Saves configuration to file as pretty TOML.
    pub fn save(&self, config_path: Option<PathBuf>) -> SyncResult<()> {
        let path = config_path
            .or_else(Self::default_config_path)
            .ok_or_else(|| SyncError::ConfigSaveFailed("No config path available".into()))?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| SyncError::ConfigSaveFailed(e.to_string()))?;
        }

        let contents = toml::to_string_pretty(self)?;
        std::fs::write(&path, contents).map_err(|e| SyncError::ConfigSaveFailed(e.to_string()))?;

        info!(?path, "Seed config saved");
        Ok(())
    }

    /// Validates the configuration.
    pub fn validate(&self) -> SyncResult<()> {
        if self.sync.batch_size == 0 {
            return Err(SyncError::InvalidConfig(
                "batch_size must be greater than 0".into(),
            ));
        }

        if self.database.max_connections == 0 {
            return Err(SyncError::InvalidConfig(
                "max_connections must be greater than 0".into(),
            ));
        }

        let mut seen = HashSet::new();
        for table in &self.tables {
            if table.name.trim().is_empty() {
                return Err(SyncError::InvalidConfig("table name must not be empty".into()));
            }
            if !seen.insert(table.name.as_str()) {
                return Err(SyncError::InvalidConfig(format!(
                    "table '{}' is listed more than once",
                    table.name
                )));
            }
        }

        Ok(())
    }

    /// Applies environment variable overrides.
    fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| std::env::var(key).ok());
    }

    fn apply_overrides_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(path) = lookup("SEED_EXPRESS_DB_PATH") {
            debug!(path = %path, "Overriding database path from environment");
            self.database.path = PathBuf::from(path);
        }

        if let Some(size) = lookup("SEED_EXPRESS_BATCH_SIZE") {
            match size.parse::<usize>() {
                Ok(n) => self.sync.batch_size = n,
                Err(_) => warn!(value = %size, "Ignoring invalid SEED_EXPRESS_BATCH_SIZE"),
            }
        }

        if let Some(flag) = lookup("SEED_EXPRESS_NVL_MODE") {
            match flag.to_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => self.sync.nvl_mode = true,
                "0" | "false" | "no" | "off" => self.sync.nvl_mode = false,
                _ => warn!(value = %flag, "Ignoring invalid SEED_EXPRESS_NVL_MODE"),
            }
        }

        if let Some(secs) = lookup("SEED_EXPRESS_DATETIME_OFFSET_SECS") {
            match secs.parse::<i64>() {
                Ok(n) => self.sync.datetime_offset_secs = n,
                Err(_) => warn!(value = %secs, "Ignoring invalid SEED_EXPRESS_DATETIME_OFFSET_SECS"),
            }
        }
    }

    /// Returns the default config file path.
    pub fn default_config_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("com", "seed", "express")
            .map(|dirs| dirs.config_dir().join("seed.toml"))
    }

    // =========================================================================
    // Convenience Methods
    // =========================================================================

    /// Database pool settings for the configured file.
    pub fn db_config(&self) -> DbConfig {
        DbConfig::new(&self.database.path).max_connections(self.database.max_connections)
    }

    /// Run options seeded from `[sync]` and `[nvl]`; modes stay off.
    pub fn sync_options(&self) -> SyncOptions {
        SyncOptions {
            nvl_mode: self.sync.nvl_mode,
            datetime_offset: Duration::seconds(self.sync.datetime_offset_secs),
            batch_size: self.sync.batch_size,
            nvl: self.nvl.clone(),
            ..SyncOptions::default()
        }
    }

    /// Registry with one descriptor per `[[tables]]` entry.
    pub fn registry(&self) -> EntityRegistry {
        self.tables
            .iter()
            .fold(EntityRegistry::new(), |registry, table| registry.with(table.descriptor()))
    }
}
