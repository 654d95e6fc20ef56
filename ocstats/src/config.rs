//! The ocstats configuration
//!
//! Settings come from a YAML document, either the contents of the
//! `OCSTATS_CONFIG` environment variable or a file on disk, falling back to
//! built-in defaults. The `STATS_DIR` and `LOG_DIR` variables then override
//! the directories; command-line flags override last, in the binary.

use std::{
    env, fs, io,
    net::SocketAddr,
    path::{Path, PathBuf},
};

use serde::Deserialize;
use tracing::debug;

use crate::{
    classify::{DEFAULT_DOMAIN, Scheme},
    compiler::{self, DEFAULT_COUNTRY_LIMIT, DEFAULT_HARVESTED_DATA_SOURCES},
    httpd, indexed_records,
};

/// Environment variable holding a whole configuration document
pub const CONFIG_ENV: &str = "OCSTATS_CONFIG";
/// Environment variable overriding [`Config::stats_dir`]
pub const STATS_DIR_ENV: &str = "STATS_DIR";
/// Environment variable overriding [`Config::log_dir`]
pub const LOG_DIR_ENV: &str = "LOG_DIR";

#[derive(thiserror::Error, Debug)]
/// Errors produced while loading the configuration
pub enum Error {
    /// Error for a serde [`serde_yaml`].
    #[error("Failed to deserialize yaml: {0}")]
    SerdeYaml(#[from] serde_yaml::Error),
    /// Error reading the configuration file
    #[error("Failed to read config file {path}: {source}")]
    ReadFile {
        /// Path to the file that could not be read
        path: PathBuf,
        /// Underlying IO error
        #[source]
        source: Box<io::Error>,
    },
}

fn default_stats_dir() -> PathBuf {
    PathBuf::from("stats")
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("logs")
}

fn default_domain() -> String {
    DEFAULT_DOMAIN.to_string()
}

fn default_harvested_data_sources() -> u64 {
    DEFAULT_HARVESTED_DATA_SOURCES
}

fn default_country_limit() -> usize {
    DEFAULT_COUNTRY_LIMIT
}

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
#[serde(rename_all = "snake_case")]
/// Main configuration struct for this program
pub struct Config {
    /// Directory holding the `oc-YYYY-MM.prom` snapshots
    #[serde(default = "default_stats_dir")]
    pub stats_dir: PathBuf,
    /// Directory relative compile inputs are resolved against
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,
    /// Canonical host of the old addressing scheme
    #[serde(default = "default_domain")]
    pub domain: String,
    /// Value of the harvested data sources gauge
    #[serde(default = "default_harvested_data_sources")]
    pub harvested_data_sources: u64,
    /// Countries kept in the by-country family
    #[serde(default = "default_country_limit")]
    pub country_limit: usize,
    /// The indexed records lookup
    #[serde(default)]
    pub indexed_records: indexed_records::Config,
    /// The query surface
    #[serde(default)]
    pub http: httpd::Config,
    /// Self-telemetry
    #[serde(default)]
    pub telemetry: Telemetry,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            stats_dir: default_stats_dir(),
            log_dir: default_log_dir(),
            domain: default_domain(),
            harvested_data_sources: default_harvested_data_sources(),
            country_limit: default_country_limit(),
            indexed_records: indexed_records::Config::default(),
            http: httpd::Config::default(),
            telemetry: Telemetry::default(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
#[serde(rename_all = "snake_case")]
/// Self-telemetry configuration
pub struct Telemetry {
    /// Address to expose a Prometheus scrape endpoint on, off when absent
    #[serde(default)]
    pub prometheus_addr: Option<SocketAddr>,
}

impl Config {
    /// Parse a YAML document. An empty document is the default
    /// configuration.
    ///
    /// # Errors
    ///
    /// Function will error if the document is not a valid configuration.
    pub fn from_yaml(contents: &str) -> Result<Self, Error> {
        if contents.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(contents)?)
    }

    /// Load the configuration from the process environment and, failing
    /// that, `config_path`
    ///
    /// # Errors
    ///
    /// Function will error if the file cannot be read or either document is
    /// not a valid configuration.
    pub fn load(config_path: Option<&Path>) -> Result<Self, Error> {
        Self::load_with(config_path, |key| env::var(key).ok())
    }

    /// As [`Config::load`], reading variables through `lookup`
    ///
    /// # Errors
    ///
    /// Function will error if the file cannot be read or either document is
    /// not a valid configuration.
    pub fn load_with<F>(config_path: Option<&Path>, lookup: F) -> Result<Self, Error>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = if let Some(contents) = lookup(CONFIG_ENV) {
            debug!("Using config from env var '{CONFIG_ENV}'");
            Self::from_yaml(&contents)?
        } else if let Some(path) = config_path {
            debug!(
                "Attempting to open configuration file at: {}",
                path.display()
            );
            let contents = fs::read_to_string(path).map_err(|source| Error::ReadFile {
                path: path.to_path_buf(),
                source: Box::new(source),
            })?;
            Self::from_yaml(&contents)?
        } else {
            debug!("No configuration given, using defaults");
            Self::default()
        };
        config.apply_env(lookup);
        Ok(config)
    }

    /// Override the directories from `STATS_DIR` and `LOG_DIR`. Empty
    /// values are ignored.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(dir) = lookup(STATS_DIR_ENV).filter(|dir| !dir.is_empty()) {
            self.stats_dir = PathBuf::from(dir);
        }
        if let Some(dir) = lookup(LOG_DIR_ENV).filter(|dir| !dir.is_empty()) {
            self.log_dir = PathBuf::from(dir);
        }
    }

    /// Compiler settings for rows in `scheme`
    #[must_use]
    pub fn compiler_settings(&self, scheme: Scheme) -> compiler::Settings {
        compiler::Settings {
            scheme,
            domain: self.domain.clone(),
            harvested_data_sources: self.harvested_data_sources,
            country_limit: self.country_limit,
            indexed_records: self.indexed_records.clone(),
        }
    }

    /// Resolve a compile input: relative paths are taken from
    /// [`Config::log_dir`]
    #[must_use]
    pub fn resolve_input(&self, input: &Path) -> PathBuf {
        if input.is_absolute() {
            input.to_path_buf()
        } else {
            self.log_dir.join(input)
        }
    }
}
