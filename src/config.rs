use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub persistence: PersistenceConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StoreConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
        }
    }
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    /// Maximum number of passages returned per query.
    #[serde(default = "default_max_results")]
    pub max_results: usize,
    /// Cosine-distance cutoff; candidates above it are discarded.
    /// A precision/recall tuning knob, not a correctness boundary.
    #[serde(default = "default_distance_threshold")]
    pub distance_threshold: f64,
    /// Cap on the cumulative estimated token cost of assembled results.
    #[serde(default = "default_token_budget")]
    pub token_budget: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            max_results: default_max_results(),
            distance_threshold: default_distance_threshold(),
            token_budget: default_token_budget(),
        }
    }
}

fn default_max_results() -> usize {
    3
}
fn default_distance_threshold() -> f64 {
    0.2
}
fn default_token_budget() -> usize {
    860
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default = "default_dims")]
    pub dims: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: "disabled".to_string(),
            model: None,
            dims: default_dims(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_dims() -> usize {
    1536
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct IngestConfig {
    /// Wall-clock budget for one ingestion batch. Processing stops early once
    /// exceeded; partial completion is a normal outcome.
    #[serde(default = "default_time_budget_secs")]
    pub time_budget_secs: u64,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            time_budget_secs: default_time_budget_secs(),
        }
    }
}

fn default_time_budget_secs() -> u64 {
    50
}

#[derive(Debug, Deserialize, Clone)]
pub struct PersistenceConfig {
    /// Seconds between background snapshots.
    #[serde(default = "default_snapshot_interval_secs")]
    pub snapshot_interval_secs: u64,
    /// Day of week for the scheduled full reset (e.g. `"sun"`).
    /// Unset means the reset never fires.
    #[serde(default)]
    pub reset_weekday: Option<String>,
    /// Time of day (UTC, `HH:MM:SS`) for the scheduled reset.
    #[serde(default = "default_reset_time")]
    pub reset_time: String,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            snapshot_interval_secs: default_snapshot_interval_secs(),
            reset_weekday: None,
            reset_time: default_reset_time(),
        }
    }
}

fn default_snapshot_interval_secs() -> u64 {
    300
}
fn default_reset_time() -> String {
    "04:30:00".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:4211".to_string()
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    validate(&config)?;

    Ok(config)
}

/// Load configuration, falling back to defaults when the file is absent.
///
/// A parse failure in an *existing* file is still an error — running with
/// settings the operator did not choose is worse than refusing to start.
pub fn load_or_default(path: &Path) -> Result<Config> {
    if !path.exists() {
        tracing::warn!(path = %path.display(), "Config file not found, using defaults");
        return Ok(Config::default());
    }
    load_config(path)
}

fn validate(config: &Config) -> Result<()> {
    if config.retrieval.max_results == 0 {
        anyhow::bail!("retrieval.max_results must be >= 1");
    }

    if config.retrieval.distance_threshold < 0.0 {
        anyhow::bail!("retrieval.distance_threshold must be >= 0");
    }

    if config.embedding.dims == 0 {
        anyhow::bail!("embedding.dims must be > 0");
    }

    if config.embedding.is_enabled() && config.embedding.model.is_none() {
        anyhow::bail!(
            "embedding.model must be specified when provider is '{}'",
            config.embedding.provider
        );
    }

    match config.embedding.provider.as_str() {
        "disabled" | "openai" => {}
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be disabled or openai.",
            other
        ),
    }

    if let Some(ref weekday) = config.persistence.reset_weekday {
        if weekday.parse::<chrono::Weekday>().is_err() {
            anyhow::bail!("persistence.reset_weekday is not a weekday: '{}'", weekday);
        }
        chrono::NaiveTime::parse_from_str(&config.persistence.reset_time, "%H:%M:%S")
            .with_context(|| "persistence.reset_time must be HH:MM:SS")?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.retrieval.max_results, 3);
        assert_eq!(config.retrieval.token_budget, 860);
        assert_eq!(config.embedding.dims, 1536);
        assert_eq!(config.embedding.provider, "disabled");
        assert!(config.persistence.reset_weekday.is_none());
    }

    #[test]
    fn test_parse_full_config() {
        let toml_str = r#"
[store]
data_dir = "/var/lib/pstore"

[retrieval]
max_results = 20
distance_threshold = 0.25
token_budget = 1200

[embedding]
provider = "openai"
model = "text-embedding-3-small"
dims = 1536

[persistence]
snapshot_interval_secs = 60
reset_weekday = "sun"
reset_time = "03:15:00"

[server]
bind = "0.0.0.0:4211"
"#;
        let config: Config = toml::from_str(toml_str).unwrap();
        validate(&config).unwrap();
        assert_eq!(config.retrieval.max_results, 20);
        assert_eq!(config.persistence.reset_weekday.as_deref(), Some("sun"));
        assert_eq!(config.server.bind, "0.0.0.0:4211");
    }

    #[test]
    fn test_rejects_bad_weekday() {
        let toml_str = r#"
[persistence]
reset_weekday = "someday"
"#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_openai_requires_model() {
        let toml_str = r#"
[embedding]
provider = "openai"
"#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert!(validate(&config).is_err());
    }
}
