use std::{
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

use serde::Deserialize;

use crate::{SecretValue, TrendPulseError, optional_env, require_env};

const DEFAULT_CONFIG_PATH: &str = "trendpulse.toml";
const CONFIG_PATH_ENV: &str = "TRENDPULSE_CONFIG";

/// Markers the supervisor treats as evidence of a nonsense answer.
pub const DEFAULT_NONSENSE_MARKERS: [&str; 5] = [
    "coffee break",
    "purple unicorns",
    "made up",
    "42",
    "Who knows?",
];

/// Top-level configuration structure.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub llm: LlmConfig,
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Resolve the configured LLM secret value (from environment only).
    ///
    /// Local Ollama deployments run without a key, so an empty `api_key_env`
    /// yields `None` for that provider.
    pub fn llm_api_key(&self) -> Result<Option<SecretValue>, TrendPulseError> {
        match self.llm.provider {
            LlmProvider::OpenAi => require_env(&self.llm.api_key_env).map(Some),
            LlmProvider::Ollama => Ok(optional_env(&self.llm.api_key_env)),
        }
    }

    /// Serper key if configured; `None` selects the keyless DuckDuckGo backend.
    pub fn search_api_key(&self) -> Option<SecretValue> {
        optional_env(&self.search.api_key_env)
    }
}

/// Helper to load configuration with guard rails.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration from a provided path or discoverable defaults.
    ///
    /// Resolution order:
    /// 1. Explicit `path` argument.
    /// 2. `TRENDPULSE_CONFIG` environment variable.
    /// 3. `trendpulse.toml` in the current working directory.
    pub fn load(path: Option<PathBuf>) -> Result<Config, TrendPulseError> {
        let candidate = resolve_path(path);
        let raw = fs::read_to_string(&candidate)
            .map_err(|err| TrendPulseError::config_io(candidate.clone(), err))?;
        Self::from_toml(&raw)
    }

    /// Parse and validate configuration text.
    pub fn from_toml(raw: &str) -> Result<Config, TrendPulseError> {
        let config: Config = toml::from_str(raw)
            .map_err(|err| TrendPulseError::InvalidConfiguration(err.to_string()))?;

        Self::validate(&config)?;
        Ok(config)
    }

    fn validate(config: &Config) -> Result<(), TrendPulseError> {
        if config.llm.model.trim().is_empty() {
            return Err(TrendPulseError::InvalidConfiguration(
                "llm.model must not be empty".into(),
            ));
        }

        if config.llm.provider == LlmProvider::OpenAi {
            if config.llm.api_key_env.trim().is_empty() {
                return Err(TrendPulseError::InvalidConfiguration(
                    "llm.api_key_env must reference an environment variable".into(),
                ));
            }
            // Ensure environment variable exists at load time to discourage inline secrets.
            require_env(&config.llm.api_key_env)?;
        }

        let agent = &config.agent;
        if agent.link_ceiling == 0 || agent.max_search_steps == 0 {
            return Err(TrendPulseError::InvalidConfiguration(
                "agent.link_ceiling and agent.max_search_steps must be positive".into(),
            ));
        }
        if agent.soft_link_threshold > agent.link_ceiling {
            return Err(TrendPulseError::InvalidConfiguration(format!(
                "agent.soft_link_threshold ({}) exceeds agent.link_ceiling ({})",
                agent.soft_link_threshold, agent.link_ceiling
            )));
        }
        if config.search.results_per_search == 0 {
            return Err(TrendPulseError::InvalidConfiguration(
                "search.results_per_search must be positive".into(),
            ));
        }
        Ok(())
    }
}

fn resolve_path(path: Option<PathBuf>) -> PathBuf {
    if let Some(path) = path {
        return path;
    }

    if let Ok(from_env) = env::var(CONFIG_PATH_ENV) {
        if !from_env.trim().is_empty() {
            return PathBuf::from(from_env);
        }
    }

    Path::new(DEFAULT_CONFIG_PATH).to_path_buf()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LlmProvider {
    #[serde(alias = "openai-compatible")]
    OpenAi,
    Ollama,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LlmConfig {
    pub provider: LlmProvider,
    pub model: String,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub api_key_env: String,
    #[serde(default = "LlmConfig::default_timeout_secs")]
    pub timeout_secs: u64,
}

impl LlmConfig {
    const fn default_timeout_secs() -> u64 {
        120
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SearchConfig {
    #[serde(default = "SearchConfig::default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "SearchConfig::default_results_per_search")]
    pub results_per_search: usize,
    #[serde(default = "SearchConfig::default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "SearchConfig::default_fetch_timeout_secs")]
    pub fetch_timeout_secs: u64,
}

impl SearchConfig {
    fn default_api_key_env() -> String {
        "SERPER_API_KEY".to_string()
    }

    const fn default_results_per_search() -> usize {
        5
    }

    const fn default_timeout_secs() -> u64 {
        20
    }

    const fn default_fetch_timeout_secs() -> u64 {
        10
    }
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            api_key_env: Self::default_api_key_env(),
            results_per_search: Self::default_results_per_search(),
            timeout_secs: Self::default_timeout_secs(),
            fetch_timeout_secs: Self::default_fetch_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AgentConfig {
    #[serde(default = "AgentConfig::default_language")]
    pub language: String,
    #[serde(default = "AgentConfig::default_primary_language")]
    pub primary_language: String,
    #[serde(default = "AgentConfig::default_soft_link_threshold")]
    pub soft_link_threshold: usize,
    #[serde(default = "AgentConfig::default_link_ceiling")]
    pub link_ceiling: usize,
    #[serde(default = "AgentConfig::default_max_search_steps")]
    pub max_search_steps: usize,
    #[serde(default = "AgentConfig::default_max_supervisor_rounds")]
    pub max_supervisor_rounds: usize,
    #[serde(default = "AgentConfig::default_max_rewrite_attempts")]
    pub max_rewrite_attempts: usize,
    #[serde(default = "AgentConfig::default_nonsense_markers")]
    pub nonsense_markers: Vec<String>,
    #[serde(default = "AgentConfig::default_inter_topic_delay_secs")]
    pub inter_topic_delay_secs: u64,
}

impl AgentConfig {
    fn default_language() -> String {
        "English".to_string()
    }

    fn default_primary_language() -> String {
        "Chinese".to_string()
    }

    const fn default_soft_link_threshold() -> usize {
        6
    }

    const fn default_link_ceiling() -> usize {
        10
    }

    const fn default_max_search_steps() -> usize {
        6
    }

    const fn default_max_supervisor_rounds() -> usize {
        3
    }

    const fn default_max_rewrite_attempts() -> usize {
        2
    }

    fn default_nonsense_markers() -> Vec<String> {
        DEFAULT_NONSENSE_MARKERS
            .iter()
            .map(|marker| marker.to_string())
            .collect()
    }

    const fn default_inter_topic_delay_secs() -> u64 {
        5
    }

    pub fn inter_topic_delay(&self) -> Duration {
        Duration::from_secs(self.inter_topic_delay_secs)
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            language: Self::default_language(),
            primary_language: Self::default_primary_language(),
            soft_link_threshold: Self::default_soft_link_threshold(),
            link_ceiling: Self::default_link_ceiling(),
            max_search_steps: Self::default_max_search_steps(),
            max_supervisor_rounds: Self::default_max_supervisor_rounds(),
            max_rewrite_attempts: Self::default_max_rewrite_attempts(),
            nonsense_markers: Self::default_nonsense_markers(),
            inter_topic_delay_secs: Self::default_inter_topic_delay_secs(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "StoreConfig::default_task_root")]
    pub task_root: PathBuf,
    #[serde(default = "StoreConfig::default_rows_file")]
    pub rows_file: String,
}

impl StoreConfig {
    fn default_task_root() -> PathBuf {
        PathBuf::from("data/tasks")
    }

    fn default_rows_file() -> String {
        "topics.csv".to_string()
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            task_root: Self::default_task_root(),
            rows_file: Self::default_rows_file(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "LoggingConfig::default_level")]
    pub level: String,
    #[serde(default)]
    pub file: Option<PathBuf>,
}

impl LoggingConfig {
    fn default_level() -> String {
        "info".to_string()
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: Self::default_level(),
            file: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const OLLAMA_CONFIG: &str = r#"
[llm]
provider = "ollama"
model = "gemma3"
base_url = "http://localhost:11434"
"#;

    #[test]
    fn minimal_config_fills_defaults() {
        let config = ConfigLoader::from_toml(OLLAMA_CONFIG).expect("config should parse");

        assert_eq!(config.llm.provider, LlmProvider::Ollama);
        assert_eq!(config.llm.timeout_secs, 120);
        assert_eq!(config.agent.soft_link_threshold, 6);
        assert_eq!(config.agent.link_ceiling, 10);
        assert_eq!(config.agent.nonsense_markers.len(), 5);
        assert_eq!(config.search.results_per_search, 5);
        assert_eq!(config.store.rows_file, "topics.csv");
        assert_eq!(config.logging.level, "info");
        assert!(config.llm_api_key().expect("ollama needs no key").is_none());
    }

    #[test]
    fn openai_provider_requires_key_in_environment() {
        let raw = r#"
[llm]
provider = "openai"
model = "gpt-4o-mini"
api_key_env = "TRENDPULSE_TEST_KEY_THAT_IS_NOT_SET"
"#;
        unsafe {
            std::env::remove_var("TRENDPULSE_TEST_KEY_THAT_IS_NOT_SET");
        }
        let err = ConfigLoader::from_toml(raw).unwrap_err();
        assert!(matches!(err, TrendPulseError::MissingSecret(_)));
    }

    #[test]
    fn partial_search_section_keeps_serper_key_name() {
        let raw = format!("{OLLAMA_CONFIG}\n[search]\nresults_per_search = 3\n");
        let config = ConfigLoader::from_toml(&raw).expect("config should parse");

        assert_eq!(config.search.results_per_search, 3);
        assert_eq!(config.search.api_key_env, "SERPER_API_KEY");
        assert_eq!(config.search.timeout_secs, 20);
    }

    #[test]
    fn blank_search_key_name_opts_out_of_serper() {
        let raw = format!("{OLLAMA_CONFIG}\n[search]\napi_key_env = \"\"\n");
        let config = ConfigLoader::from_toml(&raw).expect("config should parse");

        assert!(config.search_api_key().is_none());
    }

    #[test]
    fn soft_threshold_above_ceiling_is_rejected() {
        let raw = format!("{OLLAMA_CONFIG}\n[agent]\nsoft_link_threshold = 12\nlink_ceiling = 8\n");
        let err = ConfigLoader::from_toml(&raw).unwrap_err();
        assert!(matches!(err, TrendPulseError::InvalidConfiguration(_)));
    }

    #[test]
    fn missing_file_reports_path() {
        let err = ConfigLoader::load(Some(PathBuf::from("does/not/exist.toml"))).unwrap_err();
        match err {
            TrendPulseError::ConfigIo { path, .. } => {
                assert_eq!(path, PathBuf::from("does/not/exist.toml"))
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
