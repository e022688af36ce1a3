use std::{fs, path::PathBuf, sync::Arc, time::Duration};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use tokio::runtime::Runtime;
use tracing::{info, warn};
use trendpulse_core::{
    AgentSettings, Config, ConfigLoader, CsvRowStore, GoogleTrendsRss, HttpPageFetcher, Pipeline,
    ResearchAgent, RewriteOutcome, RowStore, RunLog, RunLogStats, StyleRewriter, Supervisor,
    TelemetryOptions, TrendCollector, build_language_model, build_web_search, init_telemetry,
    metrics::init_metrics_from_env,
};

#[derive(Parser, Debug)]
#[command(
    name = "trendpulse",
    version,
    about = "Collect trending topics, research them and rewrite the results"
)]
struct Cli {
    /// Path to the TOML configuration (defaults to $TRENDPULSE_CONFIG or ./trendpulse.toml).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Fetch trending topics and seed one row per topic.
    Collect(CollectArgs),
    /// Research one stored topic, or every stored topic.
    Research(ResearchArgs),
    /// Rewrite researched narratives into a styled script.
    Rewrite(RewriteArgs),
    /// Summarise the run log.
    Stats(StatsArgs),
}

#[derive(Args, Debug)]
struct CollectArgs {
    /// Trends region code.
    #[arg(long, default_value = "US")]
    region: String,

    /// Maximum number of topics to keep.
    #[arg(long, default_value_t = 25)]
    limit: usize,
}

#[derive(Args, Debug)]
struct ResearchArgs {
    /// Research only this topic.
    #[arg(long, conflicts_with = "dir")]
    topic: Option<String>,

    /// Research every `<n>-<topic>` folder of a collection directory.
    #[arg(long)]
    dir: Option<PathBuf>,

    /// Print each run's trace in the given format.
    #[arg(long, value_enum)]
    trace: Option<TraceFormat>,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum TraceFormat {
    Markdown,
    Mermaid,
}

#[derive(Args, Debug)]
struct RewriteArgs {
    /// Style instructions, or a file containing them.
    #[arg(long)]
    style: String,

    /// Rewrite only this topic.
    #[arg(long)]
    topic: Option<String>,

    /// Output language (defaults to `agent.language`).
    #[arg(long)]
    language: Option<String>,
}

#[derive(Args, Debug)]
struct StatsArgs {
    /// Run log to analyse (defaults to the current month's log).
    #[arg(long)]
    log: Option<PathBuf>,
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let rt = Runtime::new()?;
    rt.block_on(async move {
        match cli.command {
            Command::Stats(args) => {
                init_telemetry(TelemetryOptions::default())?;
                stats_command(args)?
            }
            command => {
                let config = ConfigLoader::load(cli.config)?;
                init_telemetry(TelemetryOptions {
                    env_filter: Some(config.logging.level.clone()),
                    with_ansi: true,
                    log_file: config.logging.file.clone(),
                })?;
                init_metrics_from_env("trendpulse-cli");
                match command {
                    Command::Collect(args) => collect_command(&config, args).await?,
                    Command::Research(args) => research_command(&config, args).await?,
                    Command::Rewrite(args) => rewrite_command(&config, args).await?,
                    Command::Stats(_) => unreachable!("handled before configuration is loaded"),
                }
            }
        }
        Ok::<(), anyhow::Error>(())
    })?;

    Ok(())
}

fn open_store(config: &Config) -> Arc<dyn RowStore> {
    let path = config.store.task_root.join(&config.store.rows_file);
    Arc::new(CsvRowStore::new(path))
}

fn build_pipeline(config: &Config, store: Arc<dyn RowStore>) -> Result<Pipeline> {
    let model = build_language_model(config)?;
    let search = build_web_search(config)?;
    let fetcher = Arc::new(HttpPageFetcher::new(Duration::from_secs(
        config.search.fetch_timeout_secs,
    ))?);
    let supervisor = Supervisor::new(config.agent.nonsense_markers.clone());

    let agent = ResearchAgent::new(
        model.clone(),
        search,
        fetcher,
        store.clone(),
        supervisor.clone(),
        AgentSettings::from_config(config),
    );
    let rewriter = StyleRewriter::new(model, supervisor, config.agent.max_rewrite_attempts);

    Ok(Pipeline::new(agent, rewriter, store)
        .with_run_log(RunLog::from_env())
        .with_inter_topic_delay(config.agent.inter_topic_delay()))
}

async fn collect_command(config: &Config, args: CollectArgs) -> Result<()> {
    let source = Arc::new(GoogleTrendsRss::new(Duration::from_secs(
        config.search.timeout_secs,
    ))?);
    let collector = TrendCollector::new(source, open_store(config), &config.store.task_root);
    let collection = collector.collect(&args.region, args.limit).await?;

    println!(
        "Collected {} topic(s) into {}",
        collection.topics.len(),
        collection.dir.display()
    );
    for topic in &collection.topics {
        println!("  - {} ({})", topic.name, topic.describe_metrics());
    }
    Ok(())
}

async fn research_command(config: &Config, args: ResearchArgs) -> Result<()> {
    let store = open_store(config);
    let pipeline = build_pipeline(config, store.clone())?;

    let topics = match (&args.topic, &args.dir) {
        (Some(name), _) => {
            let row = store
                .get(name)?
                .with_context(|| format!("no stored row for topic `{name}`; run collect first"))?;
            vec![row.to_topic()]
        }
        (None, Some(dir)) => pipeline.topics_in_dir(dir)?,
        (None, None) => pipeline.stored_topics()?,
    };
    if topics.is_empty() {
        warn!("no topics stored; run `trendpulse collect` first");
        return Ok(());
    }

    let outcomes = pipeline.research_all(&topics).await;
    for outcome in &outcomes {
        match &outcome.failure {
            None => println!(
                "[done]   {} ({} links, {} searches)",
                outcome.topic, outcome.counters.links, outcome.counters.search_steps
            ),
            Some(reason) => println!("[failed] {}: {reason}", outcome.topic),
        }
        if let Some(format) = args.trace {
            let summary = outcome.trace.summary();
            match format {
                TraceFormat::Markdown => println!("{}", summary.render_markdown()),
                TraceFormat::Mermaid => println!("{}", summary.render_mermaid()),
            }
        }
    }
    let done = outcomes.iter().filter(|outcome| outcome.is_done()).count();
    info!(done, total = outcomes.len(), "research command finished");
    Ok(())
}

async fn rewrite_command(config: &Config, args: RewriteArgs) -> Result<()> {
    let style = read_style(&args.style)?;
    let language = args
        .language
        .unwrap_or_else(|| config.agent.language.clone());
    let pipeline = build_pipeline(config, open_store(config))?;

    match &args.topic {
        Some(topic) => match pipeline.rewrite_topic(topic, &style, &language).await? {
            RewriteOutcome::Accepted(script) => {
                let speakers = script.speakers();
                if !speakers.is_empty() {
                    println!("Speakers: {}", speakers.join(", "));
                }
                println!("{}", script.text);
            }
            RewriteOutcome::Rejected { reason, attempts } => {
                println!("[rejected] {topic} after {attempts} attempt(s): {reason}");
            }
        },
        None => {
            let report = pipeline.rewrite_all(&style, &language).await?;
            println!(
                "Rewrote {} topic(s), {} rejected, {} without narrative",
                report.accepted.len(),
                report.rejected.len(),
                report.skipped
            );
            for (topic, reason) in &report.rejected {
                println!("  [rejected] {topic}: {reason}");
            }
        }
    }
    Ok(())
}

fn read_style(style: &str) -> Result<String> {
    let path = PathBuf::from(style);
    if path.is_file() {
        return fs::read_to_string(&path)
            .with_context(|| format!("failed to read style file {}", path.display()));
    }
    Ok(style.to_string())
}

fn stats_command(args: StatsArgs) -> Result<()> {
    let path = args.log.unwrap_or_else(|| RunLog::from_env().current_path());
    let stats = RunLogStats::analyze(&path)?;
    println!("{}: {}", path.display(), stats.summary());
    for topic in &stats.failed_topics {
        println!("  [failed] {topic}");
    }
    Ok(())
}
