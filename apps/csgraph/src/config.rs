//! # Configuration
//!
//! Optional TOML file with defaults for the command line.
//!
//! ```toml
//! database = "csgraph.redb"
//! backend = "redb"        # or "file"
//! log_format = "json"     # or "text"
//!
//! [resolver]
//! enabled = true
//! endpoint = "https://doi.org"
//! timeout_secs = 10
//! mailto = "data@example.org"
//! ```
//!
//! Command line flags take precedence over the file.

use clap::ValueEnum;
use csgraph_core::CsGraphError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// File looked up in the working directory when `--config` is absent.
pub const DEFAULT_CONFIG_FILE: &str = "csgraph.toml";

/// Maximum accepted size of a configuration file (1 MB).
const MAX_CONFIG_FILE_SIZE: u64 = 1024 * 1024;

/// Storage backend of the database path.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// Canonical snapshot file, loaded into memory.
    File,
    /// redb database (ACID).
    #[default]
    Redb,
}

impl std::fmt::Display for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::File => "file",
            Self::Redb => "redb",
        })
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Settings of the DOI citation resolver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ResolverConfig {
    /// When false, bare DOIs in uploads are rejected.
    pub enabled: bool,
    pub endpoint: String,
    pub timeout_secs: u64,
    /// Contact address sent in the User-Agent, as DOI services ask for.
    pub mailto: Option<String>,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            endpoint: "https://doi.org".to_string(),
            timeout_secs: 10,
            mailto: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub database: Option<PathBuf>,
    pub backend: Option<Backend>,
    pub log_format: Option<LogFormat>,
    pub resolver: ResolverConfig,
}

impl Config {
    /// Parse configuration text.
    pub fn parse(text: &str) -> Result<Self, CsGraphError> {
        let config: Self = toml::from_str(text)
            .map_err(|e| CsGraphError::Validation(format!("config: {e}")))?;
        if config.resolver.timeout_secs == 0 {
            return Err(CsGraphError::Validation(
                "config: resolver.timeout_secs must be positive".to_string(),
            ));
        }
        Ok(config)
    }

    /// Read a configuration file.
    pub fn load(path: &Path) -> Result<Self, CsGraphError> {
        let metadata = std::fs::metadata(path).map_err(|e| {
            CsGraphError::Storage(format!("Cannot read config '{}': {}", path.display(), e))
        })?;
        if metadata.len() > MAX_CONFIG_FILE_SIZE {
            return Err(CsGraphError::Validation(format!(
                "Config file '{}' is larger than {} bytes",
                path.display(),
                MAX_CONFIG_FILE_SIZE
            )));
        }
        let text = std::fs::read_to_string(path)
            .map_err(|e| CsGraphError::Storage(format!("Read config: {e}")))?;
        Self::parse(&text)
    }

    /// The explicit file if given, else `csgraph.toml` when it exists, else
    /// defaults.
    pub fn discover(explicit: Option<&Path>) -> Result<Self, CsGraphError> {
        match explicit {
            Some(path) => Self::load(path),
            None => {
                let fallback = Path::new(DEFAULT_CONFIG_FILE);
                if fallback.is_file() {
                    Self::load(fallback)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
