use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::ConfigError;
use crate::extractor::ExtractionRule;

pub const DEFAULT_SOURCE_ID: &str = "useragents-me";
pub const DEFAULT_SOURCE_URL: &str = "https://www.useragents.me/";
pub const DEFAULT_TIMEOUT_SECS: u64 = 60;
pub const DEFAULT_CACHE_TTL_SECS: u64 = 3600 * 24 * 7; // 1 week
pub const DEFAULT_MIN_UA_LENGTH: usize = 10;
pub const DEFAULT_CATALOG_PATH: &str = "user_agents.txt";
pub const DEFAULT_CACHE_DIR: &str = ".ua-cache";

/// A reference page to scrape. Defined in configuration, never persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct SourcePage {
    pub id: String,
    pub url: String,
    pub rule: ExtractionRule,
}

/// Source entry as it appears in the config file, keyed by source id.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SourceSpec {
    pub url: String,
    pub rule: ExtractionRule,
}

#[derive(Debug, Deserialize)]
struct ConfigFile {
    sources: BTreeMap<String, SourceSpec>,
    #[serde(default = "default_cache_ttl_secs")]
    cache_ttl_secs: u64,
    #[serde(default = "default_min_ua_length")]
    min_ua_length: usize,
    #[serde(default = "default_timeout_secs")]
    timeout_secs: u64,
    #[serde(default)]
    require_product_token: bool,
    #[serde(default)]
    catalog_path: Option<PathBuf>,
    #[serde(default)]
    cache_dir: Option<PathBuf>,
    #[serde(default)]
    index_path: Option<PathBuf>,
}

fn default_cache_ttl_secs() -> u64 {
    DEFAULT_CACHE_TTL_SECS
}

fn default_min_ua_length() -> usize {
    DEFAULT_MIN_UA_LENGTH
}

fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

/// Everything a run needs. Passed explicitly into the pipeline entry point.
#[derive(Debug, Clone)]
pub struct Config {
    /// Sources in id order.
    pub sources: Vec<SourcePage>,
    /// Response freshness window.
    pub cache_ttl: Duration,
    /// Candidates shorter than this (in characters) are rejected.
    pub min_ua_length: usize,
    /// Per-request HTTP timeout.
    pub timeout: Duration,
    /// Enables the built-in leading `product/version` plausibility check.
    pub require_product_token: bool,
    pub catalog_path: PathBuf,
    pub cache_dir: PathBuf,
    /// Optional browser index JSON written next to the catalog.
    pub index_path: Option<PathBuf>,
}

impl Default for Config {
    /// Built-in configuration: the single useragents.me source.
    fn default() -> Self {
        Self {
            sources: vec![SourcePage {
                id: DEFAULT_SOURCE_ID.to_string(),
                url: DEFAULT_SOURCE_URL.to_string(),
                rule: ExtractionRule::UseragentsMe,
            }],
            cache_ttl: Duration::from_secs(DEFAULT_CACHE_TTL_SECS),
            min_ua_length: DEFAULT_MIN_UA_LENGTH,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            require_product_token: false,
            catalog_path: PathBuf::from(DEFAULT_CATALOG_PATH),
            cache_dir: PathBuf::from(DEFAULT_CACHE_DIR),
            index_path: None,
        }
    }
}

impl Config {
    /// Load and validate a JSON config file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&text, path)
    }

    /// Parse config text. `origin` is only used in error messages.
    pub fn from_json(text: &str, origin: &Path) -> Result<Self, ConfigError> {
        let file: ConfigFile = serde_json::from_str(text).map_err(|source| ConfigError::Parse {
            path: origin.to_path_buf(),
            source,
        })?;

        let defaults = Config::default();
        let config = Config {
            sources: file
                .sources
                .into_iter()
                .map(|(id, spec)| SourcePage {
                    id,
                    url: spec.url,
                    rule: spec.rule,
                })
                .collect(),
            cache_ttl: Duration::from_secs(file.cache_ttl_secs),
            min_ua_length: file.min_ua_length,
            timeout: Duration::from_secs(file.timeout_secs),
            require_product_token: file.require_product_token,
            catalog_path: file.catalog_path.unwrap_or(defaults.catalog_path),
            cache_dir: file.cache_dir.unwrap_or(defaults.cache_dir),
            index_path: file.index_path,
        };
        config.validate()?;
        Ok(config)
    }

    /// Apply `UA_*` environment overrides (after `dotenv` has populated the env).
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides(|name| env::var(name).ok())
    }

    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(path) = lookup("UA_CATALOG_PATH") {
            self.catalog_path = PathBuf::from(path);
        }
        if let Some(dir) = lookup("UA_CACHE_DIR") {
            self.cache_dir = PathBuf::from(dir);
        }
        if let Some(path) = lookup("UA_INDEX_PATH") {
            self.index_path = Some(PathBuf::from(path));
        }
        if let Some(ttl) = lookup("UA_CACHE_TTL_SECS") {
            let secs = ttl.trim().parse::<u64>().map_err(|_| ConfigError::InvalidEnv {
                name: "UA_CACHE_TTL_SECS",
                value: ttl.clone(),
            })?;
            self.cache_ttl = Duration::from_secs(secs);
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sources.is_empty() {
            return Err(ConfigError::NoSources);
        }
        for source in &self.sources {
            let scheme_ok = reqwest::Url::parse(&source.url)
                .map(|u| matches!(u.scheme(), "http" | "https" | "file"))
                .unwrap_or(false);
            if !scheme_ok {
                return Err(ConfigError::InvalidUrl {
                    source_id: source.id.clone(),
                    url: source.url.clone(),
                });
            }
            source
                .rule
                .validate()
                .map_err(|reason| ConfigError::InvalidRule {
                    source_id: source.id.clone(),
                    reason,
                })?;
        }
        Ok(())
    }
}
