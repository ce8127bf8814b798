use serde::Deserialize;
use std::collections::HashMap;
use std::path::PathBuf;

use crate::sync::diff::DeletionPolicy;
use crate::sync::mapping::MappingTable;
use crate::sync::normalize::UnitTable;
use crate::sync::retry::RetryPolicy;
use crate::sync::snapshot::SnapshotBuilder;

/// Application configuration
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub grocy: GrocyConfig,
    pub ourgroceries: OurGroceriesConfig,
    pub sync: SyncSettings,
}

/// Grocy API endpoint and credentials.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GrocyConfig {
    pub api_url: String,
    pub api_key: String,
    /// Per-request timeout in seconds.
    pub timeout_secs: u64,
}

impl Default for GrocyConfig {
    fn default() -> Self {
        Self {
            api_url: String::new(),
            api_key: String::new(),
            timeout_secs: 10,
        }
    }
}

/// OurGroceries account credentials.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct OurGroceriesConfig {
    pub username: String,
    pub password: String,
    /// Fallback category id when creating a category fails.
    pub default_category_id: Option<String>,
}

/// One source list mirrored into one destination list.
#[derive(Debug, Clone, Deserialize)]
pub struct ListPair {
    pub grocy_list_id: u32,
    pub ourgroceries_list: String,
}

/// Config-supplied additions to the unit equivalence table.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct UnitSettings {
    pub equivalents: HashMap<String, String>,
    pub plural_exempt: Vec<String>,
}

/// Everything that shapes a sync run.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SyncSettings {
    /// Minutes between scheduled runs.
    pub interval_minutes: u64,
    pub use_categories: bool,
    /// Separator between name and quantity in destination values.
    pub quantity_separator: String,
    /// Items whose mapped name equals this are never synced.
    pub ignore_sentinel: Option<String>,
    pub lists: Vec<ListPair>,
    pub name_mappings: HashMap<String, String>,
    pub category_mappings: HashMap<String, String>,
    pub units: UnitSettings,
    pub retry: RetryPolicy,
    pub deletion: DeletionPolicy,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            interval_minutes: 30,
            use_categories: true,
            quantity_separator: " : ".to_string(),
            ignore_sentinel: None,
            lists: Vec::new(),
            name_mappings: HashMap::new(),
            category_mappings: HashMap::new(),
            units: UnitSettings::default(),
            retry: RetryPolicy::default(),
            deletion: DeletionPolicy::default(),
        }
    }
}

impl Config {
    /// Load configuration with priority: env vars > config file > defaults
    pub fn load(config_path: Option<PathBuf>) -> Result<Self, ConfigError> {
        // Start with defaults
        let mut config = Self::default();

        // Try to load from config file
        let path = config_path
            .or_else(|| std::env::var("GROCY_OG_SYNC_CONFIG").ok().map(PathBuf::from))
            .unwrap_or_else(Self::default_config_path);
        if path.exists() {
            let contents = std::fs::read_to_string(&path)
                .map_err(|e| ConfigError::ReadError(path.clone(), e))?;
            config = serde_yaml::from_str(&contents)
                .map_err(|e| ConfigError::ParseError(path.clone(), e))?;
        }

        // Apply environment variable overrides
        if let Ok(url) = std::env::var("GROCY_OG_SYNC_GROCY_URL") {
            config.grocy.api_url = url;
        }
        if let Ok(key) = std::env::var("GROCY_OG_SYNC_GROCY_API_KEY") {
            config.grocy.api_key = key;
        }
        if let Ok(username) = std::env::var("GROCY_OG_SYNC_OG_USERNAME") {
            config.ourgroceries.username = username;
        }
        if let Ok(password) = std::env::var("GROCY_OG_SYNC_OG_PASSWORD") {
            config.ourgroceries.password = password;
        }

        Ok(config)
    }

    /// Default config file path: ~/.config/grocy-og-sync/config.yaml
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("grocy-og-sync")
            .join("config.yaml")
    }

    /// Rejects anything that would fail every run: missing credentials,
    /// no list pairs, a zero interval.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.grocy.api_url.trim().is_empty() {
            return Err(ConfigError::Invalid("grocy.api_url is required".into()));
        }
        if self.grocy.api_key.trim().is_empty() {
            return Err(ConfigError::Invalid("grocy.api_key is required".into()));
        }
        if self.ourgroceries.username.trim().is_empty()
            || self.ourgroceries.password.trim().is_empty()
        {
            return Err(ConfigError::Invalid(
                "ourgroceries.username and ourgroceries.password are required".into(),
            ));
        }
        if self.sync.lists.is_empty() {
            return Err(ConfigError::Invalid(
                "sync.lists needs at least one list pair".into(),
            ));
        }
        if self.sync.interval_minutes == 0 {
            return Err(ConfigError::Invalid(
                "sync.interval_minutes must be at least 1".into(),
            ));
        }
        Ok(())
    }

    pub fn mapping_table(&self) -> MappingTable {
        MappingTable::new(
            self.sync.name_mappings.clone(),
            self.sync.category_mappings.clone(),
            self.sync.ignore_sentinel.clone(),
        )
    }

    pub fn unit_table(&self) -> UnitTable {
        UnitTable::with_config(&self.sync.units.equivalents, &self.sync.units.plural_exempt)
    }

    pub fn snapshot_builder(&self) -> SnapshotBuilder {
        SnapshotBuilder::new(
            self.mapping_table(),
            self.unit_table(),
            self.sync.quantity_separator.clone(),
            self.sync.use_categories,
        )
    }
}

#[derive(Debug)]
pub enum ConfigError {
    ReadError(PathBuf, std::io::Error),
    ParseError(PathBuf, serde_yaml::Error),
    Invalid(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::ReadError(path, e) => {
                write!(f, "Failed to read config file '{}': {}", path.display(), e)
            }
            ConfigError::ParseError(path, e) => {
                write!(
                    f,
                    "Failed to parse config file '{}': {}",
                    path.display(),
                    e
                )
            }
            ConfigError::Invalid(reason) => {
                write!(f, "Invalid configuration: {reason}")
            }
        }
    }
}

impl std::error::Error for ConfigError {}
