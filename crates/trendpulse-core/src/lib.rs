//! TrendPulse core: trending-topic collection, the per-topic research agent,
//! narrative rewriting and the storage, logging and telemetry around them.

mod agent;
mod collector;
mod config;
mod decision;
mod error;
mod fetch;
mod llm;
mod logging;
pub mod metrics;
mod pipeline;
mod prompts;
mod rewrite;
mod search;
mod security;
mod stats;
mod store;
mod supervisor;
mod telemetry;
mod topic;
mod trace;

pub use agent::{AgentSettings, ResearchAgent, ResearchContext, RunCounters, RunOutcome, RunStatus};
pub use collector::{
    Collection, GoogleTrendsRss, TrendCollector, TrendItem, TrendSource, parse_trends_rss,
};
pub use config::{
    AgentConfig, Config, ConfigLoader, DEFAULT_NONSENSE_MARKERS, LlmConfig, LlmProvider,
    LoggingConfig, SearchConfig, StoreConfig,
};
pub use decision::{
    Decision, Draft, Highlight, PageAnalysis, extract_fenced_block, parse_model_decision,
    parse_page_analysis, parse_synthesis,
};
pub use error::{DecisionParseError, TrendPulseError};
pub use fetch::{DynPageFetcher, HttpPageFetcher, PageContent, PageFetcher, extract_page};
pub use llm::{
    DynLanguageModel, LanguageModel, LlmRequest, OllamaModel, OpenAiCompatibleModel,
    build_language_model,
};
pub use logging::{RunLog, RunLogInput, RunLogRecord};
pub use pipeline::{Pipeline, RewriteReport};
pub use rewrite::{RewriteOutcome, Script, ScriptLine, StyleRewriter};
pub use search::{
    DuckDuckGoSearch, DynWebSearch, SearchHit, SerperSearch, WebSearch, build_web_search,
    parse_duckduckgo_html, parse_serper_response,
};
pub use security::{SecretValue, optional_env, require_env};
pub use stats::RunLogStats;
pub use store::{CsvRowStore, InMemoryRowStore, RowStore, TopicRow};
pub use supervisor::{Supervisor, SupervisorVerdict, rejection_note};
pub use telemetry::{TelemetryOptions, init_telemetry};
pub use topic::{Topic, topic_dir_name, topic_name_from_dir};
pub use trace::{TraceCollector, TraceEvent, TraceStep, TraceSummary, persist_trace};
