//! Configuration models for altdata.
//!
//! All I^R (resolvable ignorance) is parameterized here.
//! The user resolves these unknowns at runtime via config file.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Top-level configuration for altdata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Which pipeline this configuration drives
    #[serde(default)]
    pub pipeline: PipelineKind,

    /// Input table settings
    pub input: InputConfig,

    /// Checkpoint settings
    #[serde(default)]
    pub checkpoint: CheckpointConfig,

    /// Tavily search API
    #[serde(default)]
    pub tavily: TavilyConfig,

    /// Bright Data bulk enrichment API
    #[serde(default)]
    pub brightdata: BrightDataConfig,

    /// Lookup worker pool
    #[serde(default)]
    pub workers: WorkerConfig,

    /// Matching of enrichment records onto pending items
    #[serde(default)]
    pub enrichment: EnrichmentConfig,

    /// Export settings
    #[serde(default)]
    pub output: OutputConfig,
}

/// Pipeline selection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PipelineKind {
    /// Startup founder geolocation
    #[default]
    Founders,
    /// Restaurant listing discovery
    Listings,
}

impl PipelineKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Founders => "founders",
            Self::Listings => "listings",
        }
    }
}

/// Input table configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputConfig {
    /// CSV file with one unit of work per row
    pub path: PathBuf,

    /// Column holding each unit's display name
    #[serde(default = "default_name_column")]
    pub name_column: String,

    /// Column holding the city (listings pipeline)
    #[serde(default = "default_city_column")]
    pub city_column: String,

    /// Column holding the state (listings pipeline)
    #[serde(default = "default_state_column")]
    pub state_column: String,

    /// Column holding the street address (listings pipeline)
    #[serde(default = "default_address_column")]
    pub address_column: String,

    /// Column holding an alternate project name (listings pipeline)
    #[serde(default = "default_project_column")]
    pub project_column: String,
}

fn default_name_column() -> String {
    "name".to_string()
}

fn default_city_column() -> String {
    "City".to_string()
}

fn default_state_column() -> String {
    "State".to_string()
}

fn default_address_column() -> String {
    "Address".to_string()
}

fn default_project_column() -> String {
    "Project Name (from Locations)".to_string()
}

/// Checkpoint configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointConfig {
    /// Checkpoint file path
    #[serde(default = "default_checkpoint_path")]
    pub path: PathBuf,
}

fn default_checkpoint_path() -> PathBuf {
    PathBuf::from("data/checkpoints/checkpoint.json")
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            path: default_checkpoint_path(),
        }
    }
}

/// Tavily search API configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TavilyConfig {
    /// API key (can also be set via TAVILY_API_KEY env var)
    #[serde(default)]
    pub api_key: Option<String>,

    /// Environment variable name for API key
    #[serde(default = "default_tavily_api_key_env")]
    pub api_key_env: String,

    /// Base URL for the search API
    #[serde(default = "default_tavily_base_url")]
    pub base_url: String,

    /// Request timeout in seconds
    #[serde(default = "default_search_timeout")]
    pub timeout_secs: u64,

    /// Maximum retries on failure
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Results requested per query
    #[serde(default = "default_max_results")]
    pub max_results: usize,

    /// Minimum spacing between requests in milliseconds
    #[serde(default = "default_min_interval_ms")]
    pub min_interval_ms: u64,
}

fn default_tavily_api_key_env() -> String {
    "TAVILY_API_KEY".to_string()
}

fn default_tavily_base_url() -> String {
    "https://api.tavily.com".to_string()
}

fn default_search_timeout() -> u64 {
    30
}

fn default_max_retries() -> u32 {
    3
}

fn default_max_results() -> usize {
    5
}

fn default_min_interval_ms() -> u64 {
    500
}

impl Default for TavilyConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_key_env: default_tavily_api_key_env(),
            base_url: default_tavily_base_url(),
            timeout_secs: default_search_timeout(),
            max_retries: default_max_retries(),
            max_results: default_max_results(),
            min_interval_ms: default_min_interval_ms(),
        }
    }
}

/// Bright Data dataset API configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrightDataConfig {
    /// API token (can also be set via BRIGHTDATA_API_KEY env var)
    #[serde(default)]
    pub api_key: Option<String>,

    /// Environment variable name for API token
    #[serde(default = "default_brightdata_api_key_env")]
    pub api_key_env: String,

    /// Base URL for the dataset API
    #[serde(default = "default_brightdata_base_url")]
    pub base_url: String,

    /// Dataset that scrapes profile pages
    #[serde(default = "default_dataset_id")]
    pub dataset_id: String,

    /// Request timeout in seconds
    #[serde(default = "default_enrichment_timeout")]
    pub timeout_secs: u64,

    /// Maximum retries per HTTP call
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Keys submitted per enrichment job
    #[serde(default = "default_enrichment_chunk")]
    pub chunk_size: usize,

    /// Number of polls before giving up on a job
    #[serde(default = "default_poll_attempts")]
    pub poll_attempts: u32,

    /// Seconds between polls
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
}

fn default_brightdata_api_key_env() -> String {
    "BRIGHTDATA_API_KEY".to_string()
}

fn default_brightdata_base_url() -> String {
    "https://api.brightdata.com/datasets/v3".to_string()
}

fn default_dataset_id() -> String {
    "gd_l1viktl72bvl7bjuj0".to_string()
}

fn default_enrichment_timeout() -> u64 {
    120
}

fn default_enrichment_chunk() -> usize {
    500
}

fn default_poll_attempts() -> u32 {
    60
}

fn default_poll_interval() -> u64 {
    30
}

impl Default for BrightDataConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_key_env: default_brightdata_api_key_env(),
            base_url: default_brightdata_base_url(),
            dataset_id: default_dataset_id(),
            timeout_secs: default_enrichment_timeout(),
            max_retries: default_max_retries(),
            chunk_size: default_enrichment_chunk(),
            poll_attempts: default_poll_attempts(),
            poll_interval_secs: default_poll_interval(),
        }
    }
}

/// Worker pool configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Number of concurrent lookups
    #[serde(default = "default_pool_size")]
    pub size: usize,

    /// Items per chunk for profile discovery; the checkpoint is saved per chunk
    #[serde(default = "default_discovery_chunk")]
    pub chunk_size: usize,
}

fn default_pool_size() -> usize {
    20
}

fn default_discovery_chunk() -> usize {
    50
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            size: default_pool_size(),
            chunk_size: default_discovery_chunk(),
        }
    }
}

/// Enrichment matching configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrichmentConfig {
    /// Dotted JSON paths tried in order to find a record's lookup key
    #[serde(default = "default_key_fields")]
    pub key_fields: Vec<String>,

    /// Fields tried in order for the resolved value; first non-empty wins
    #[serde(default = "default_value_fields")]
    pub value_fields: Vec<String>,

    /// Case-insensitive keywords that mark a resolved value as a target
    #[serde(default = "default_target_keywords")]
    pub target_keywords: Vec<String>,
}

fn default_key_fields() -> Vec<String> {
    vec!["input.url".to_string(), "url".to_string()]
}

fn default_value_fields() -> Vec<String> {
    vec![
        "city".to_string(),
        "location".to_string(),
        "country_code".to_string(),
    ]
}

/// Austin and the suburbs profiles commonly list instead.
fn default_target_keywords() -> Vec<String> {
    [
        "austin",
        "atx",
        "round rock",
        "cedar park",
        "pflugerville",
        "georgetown",
        "leander",
        "lakeway",
        "bee cave",
        "dripping springs",
        "hutto",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

impl Default for EnrichmentConfig {
    fn default() -> Self {
        Self {
            key_fields: default_key_fields(),
            value_fields: default_value_fields(),
            target_keywords: default_target_keywords(),
        }
    }
}

/// Output configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Directory for exported CSVs
    #[serde(default = "default_output_dir")]
    pub dir: PathBuf,

    /// File name prefix for exports
    #[serde(default = "default_output_prefix")]
    pub prefix: String,
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("data/output")
}

fn default_output_prefix() -> String {
    "results".to_string()
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dir: default_output_dir(),
            prefix: default_output_prefix(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file.
    ///
    /// B_i(file exists) → Result
    /// B_i(file is valid TOML) → Result
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
            path: path.to_owned(),
            source: e,
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.to_owned(),
            source: e,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Check values that serde defaults cannot guard.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.workers.size == 0 {
            return Err(ConfigError::Invalid("workers.size must be at least 1".into()));
        }
        if self.workers.chunk_size == 0 || self.brightdata.chunk_size == 0 {
            return Err(ConfigError::Invalid("chunk sizes must be at least 1".into()));
        }
        if self.brightdata.poll_attempts == 0 {
            return Err(ConfigError::Invalid(
                "brightdata.poll_attempts must be at least 1".into(),
            ));
        }
        if self.enrichment.key_fields.is_empty() || self.enrichment.value_fields.is_empty() {
            return Err(ConfigError::Invalid(
                "enrichment.key_fields and enrichment.value_fields must not be empty".into(),
            ));
        }
        Ok(())
    }

    /// Resolve the Tavily API key from config or environment.
    pub fn resolve_tavily_key(&self) -> Result<String, ConfigError> {
        resolve_key(
            "tavily",
            self.tavily.api_key.as_deref(),
            &self.tavily.api_key_env,
        )
    }

    /// Resolve the Bright Data API token from config or environment.
    pub fn resolve_brightdata_key(&self) -> Result<String, ConfigError> {
        resolve_key(
            "brightdata",
            self.brightdata.api_key.as_deref(),
            &self.brightdata.api_key_env,
        )
    }
}

fn resolve_key(endpoint: &str, explicit: Option<&str>, env_var: &str) -> Result<String, ConfigError> {
    if let Some(key) = explicit {
        return Ok(expand_env_vars(key));
    }

    std::env::var(env_var).map_err(|_| ConfigError::MissingApiKey {
        endpoint: endpoint.to_string(),
        env_var: env_var.to_string(),
    })
}

/// Expand environment variables in a string.
///
/// Supports ${VAR_NAME} syntax.
/// If the variable is not set, the placeholder is left unchanged.
pub fn expand_env_vars(s: &str) -> String {
    let mut result = s.to_string();
    let Ok(re) = regex::Regex::new(r"\$\{([^}]+)\}") else {
        return result;
    };

    for cap in re.captures_iter(s) {
        let var_name = &cap[1];
        if let Ok(value) = std::env::var(var_name) {
            result = result.replace(&cap[0], &value);
        }
    }

    result
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("Missing API key for '{endpoint}': set {env_var} env var or api_key in config")]
    MissingApiKey { endpoint: String, env_var: String },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config: Config = toml::from_str(
            r#"
[input]
path = "companies.csv"
"#,
        )
        .unwrap();

        assert_eq!(config.pipeline, PipelineKind::Founders);
        assert_eq!(config.input.name_column, "name");
        assert_eq!(config.workers.size, 20);
        assert_eq!(config.brightdata.poll_attempts, 60);
        assert_eq!(config.enrichment.target_keywords[..2], ["austin", "atx"]);
        assert!(config.enrichment.target_keywords.contains(&"round rock".to_string()));
        config.validate().unwrap();
    }

    #[test]
    fn test_listings_pipeline_parses() {
        let config: Config = toml::from_str(
            r#"
pipeline = "listings"

[input]
path = "locations.csv"
name_column = "Location Name"
"#,
        )
        .unwrap();
        assert_eq!(config.pipeline, PipelineKind::Listings);
        assert_eq!(config.input.name_column, "Location Name");
    }

    #[test]
    fn test_zero_pool_size_rejected() {
        let mut config: Config = toml::from_str("[input]\npath = \"x.csv\"\n").unwrap();
        config.workers.size = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_explicit_key_wins_over_env() {
        let mut config: Config = toml::from_str("[input]\npath = \"x.csv\"\n").unwrap();
        config.tavily.api_key = Some("tvly-literal".to_string());
        assert_eq!(config.resolve_tavily_key().unwrap(), "tvly-literal");
    }

    #[test]
    fn test_missing_key_reports_env_var() {
        let mut config: Config = toml::from_str("[input]\npath = \"x.csv\"\n").unwrap();
        config.brightdata.api_key_env = "ALTDATA_TEST_UNSET_VAR_7731".to_string();
        let err = config.resolve_brightdata_key().unwrap_err();
        assert!(err.to_string().contains("ALTDATA_TEST_UNSET_VAR_7731"));
    }
}
