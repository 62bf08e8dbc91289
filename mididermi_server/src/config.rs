// Server configuration.
//
// One `ServerConfig` value carries everything the reservoir and coordinator
// need at startup. It is read from a TOML file whose every key is optional:
//
//   [pool]         min_subset, max_subset        melodies per task
//   [epochs]       min, max                      epochs per task
//   [sources]      random, fractal               generated melodies at init
//                  load_database, load_files     plain boolean switches
//                  descriptor_dir, seed
//   [persistence]  store_database, store_files, database_path, midi_dir
//   [network]      bind, port
//
// A missing file is not an error (all defaults). Command-line flags in
// `main.rs` override individual values after loading. `validate` runs last.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use mididermi_protocol::DEFAULT_PORT;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PoolConfig {
    #[serde(default = "PoolConfig::default_subset")]
    pub min_subset: usize,
    #[serde(default = "PoolConfig::default_subset")]
    pub max_subset: usize,
}

impl PoolConfig {
    fn default_subset() -> usize {
        2
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min_subset: Self::default_subset(),
            max_subset: Self::default_subset(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EpochConfig {
    #[serde(default)]
    pub min: u32,
    #[serde(default = "EpochConfig::default_max")]
    pub max: u32,
}

impl EpochConfig {
    fn default_max() -> u32 {
        1
    }
}

impl Default for EpochConfig {
    fn default() -> Self {
        Self {
            min: 0,
            max: Self::default_max(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SourcesConfig {
    #[serde(default)]
    pub random: usize,
    #[serde(default)]
    pub fractal: usize,
    #[serde(default)]
    pub load_database: bool,
    #[serde(default)]
    pub load_files: bool,
    #[serde(default = "SourcesConfig::default_descriptor_dir")]
    pub descriptor_dir: PathBuf,
    /// Seed for generators and sampling. Unset means seeded from entropy.
    #[serde(default)]
    pub seed: Option<u64>,
}

impl SourcesConfig {
    fn default_descriptor_dir() -> PathBuf {
        PathBuf::from("melodies")
    }
}

impl Default for SourcesConfig {
    fn default() -> Self {
        Self {
            random: 0,
            fractal: 0,
            load_database: false,
            load_files: false,
            descriptor_dir: Self::default_descriptor_dir(),
            seed: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PersistenceConfig {
    #[serde(default)]
    pub store_database: bool,
    #[serde(default)]
    pub store_files: bool,
    #[serde(default = "PersistenceConfig::default_database_path")]
    pub database_path: PathBuf,
    #[serde(default = "PersistenceConfig::default_midi_dir")]
    pub midi_dir: PathBuf,
}

impl PersistenceConfig {
    fn default_database_path() -> PathBuf {
        PathBuf::from("mididermi.sqlite3")
    }
    fn default_midi_dir() -> PathBuf {
        PathBuf::from("midis")
    }
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            store_database: false,
            store_files: false,
            database_path: Self::default_database_path(),
            midi_dir: Self::default_midi_dir(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NetworkConfig {
    #[serde(default = "NetworkConfig::default_bind")]
    pub bind: String,
    #[serde(default = "NetworkConfig::default_port")]
    pub port: u16,
}

impl NetworkConfig {
    fn default_bind() -> String {
        "0.0.0.0".into()
    }
    fn default_port() -> u16 {
        DEFAULT_PORT
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            bind: Self::default_bind(),
            port: Self::default_port(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct ServerConfig {
    #[serde(default)]
    pub pool: PoolConfig,
    #[serde(default)]
    pub epochs: EpochConfig,
    #[serde(default)]
    pub sources: SourcesConfig,
    #[serde(default)]
    pub persistence: PersistenceConfig,
    #[serde(default)]
    pub network: NetworkConfig,
}

impl ServerConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    /// Load `path`, or defaults if it doesn't exist.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.pool.min_subset > self.pool.max_subset {
            return Err(ConfigError::Invalid(format!(
                "pool.min_subset ({}) > pool.max_subset ({})",
                self.pool.min_subset, self.pool.max_subset
            )));
        }
        if self.epochs.min > self.epochs.max {
            return Err(ConfigError::Invalid(format!(
                "epochs.min ({}) > epochs.max ({})",
                self.epochs.min, self.epochs.max
            )));
        }
        Ok(())
    }
}
