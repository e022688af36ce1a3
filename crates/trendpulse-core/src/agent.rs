//! The per-topic research loop.
//!
//! `ResearchAgent::run` drives an explicit state machine:
//!
//! ```text
//! DECIDE --search--> SEARCH --> DECIDE
//! DECIDE --answer--> ANSWER --> SUPERVISE --valid--> DONE
//!                                        --reject--> DECIDE
//! any parse/transport failure or exhausted budget --> FAILED
//! ```
//!
//! Steps run strictly in sequence and every counter lives in the run itself.

use std::{sync::Arc, time::Instant};

use chrono::Local;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::{
    config::Config,
    decision::{Decision, Draft, parse_model_decision, parse_page_analysis, parse_synthesis},
    fetch::DynPageFetcher,
    llm::{DynLanguageModel, LlmRequest},
    metrics::record_topic_run,
    prompts::{DecidePrompt, SynthesisPrompt, page_analysis_prompt},
    search::{DynWebSearch, SearchHit},
    store::{RowStore, TopicRow},
    supervisor::{Supervisor, SupervisorVerdict, rejection_note},
    topic::Topic,
    trace::TraceCollector,
};

/// Limits and languages for one research run.
#[derive(Debug, Clone)]
pub struct AgentSettings {
    pub language: String,
    pub primary_language: String,
    pub soft_link_threshold: usize,
    pub link_ceiling: usize,
    pub max_search_steps: usize,
    pub max_supervisor_rounds: usize,
    pub results_per_search: usize,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            language: "English".to_string(),
            primary_language: "Chinese".to_string(),
            soft_link_threshold: 6,
            link_ceiling: 10,
            max_search_steps: 6,
            max_supervisor_rounds: 3,
            results_per_search: 5,
        }
    }
}

impl AgentSettings {
    pub fn from_config(config: &Config) -> Self {
        let agent = &config.agent;
        Self {
            language: agent.language.clone(),
            primary_language: agent.primary_language.clone(),
            soft_link_threshold: agent.soft_link_threshold,
            link_ceiling: agent.link_ceiling,
            max_search_steps: agent.max_search_steps,
            max_supervisor_rounds: agent.max_supervisor_rounds,
            results_per_search: config.search.results_per_search,
        }
    }
}

/// Research notes accumulated during one run. Only ever appended to.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResearchContext {
    notes: String,
    search_history: String,
}

impl ResearchContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, text: &str) {
        self.notes.push_str(text);
    }

    pub fn record_search(&mut self, results: &str) {
        if !self.search_history.is_empty() {
            self.search_history.push_str("\n\n");
        }
        self.search_history.push_str(results);
    }

    pub fn as_str(&self) -> &str {
        &self.notes
    }

    pub fn len(&self) -> usize {
        self.notes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.notes.is_empty()
    }

    /// Raw search result blocks, without answers or supervisor notes.
    pub fn search_history(&self) -> &str {
        &self.search_history
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunCounters {
    pub decide_steps: usize,
    pub search_steps: usize,
    pub links: usize,
    pub rejections: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Done,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Done => "done",
            Self::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub run_id: String,
    pub topic: String,
    pub status: RunStatus,
    pub counters: RunCounters,
    pub draft: Option<Draft>,
    pub verdict: Option<SupervisorVerdict>,
    pub failure: Option<String>,
    pub context: ResearchContext,
    pub trace: TraceCollector,
    pub duration_ms: u64,
}

impl RunOutcome {
    pub fn is_done(&self) -> bool {
        self.status == RunStatus::Done
    }
}

#[derive(Debug)]
enum AgentState {
    Decide,
    Search(String),
    Answer,
    Supervise(Draft),
    Done,
    Failed(String),
}

#[derive(Default)]
struct RunState {
    context: ResearchContext,
    counters: RunCounters,
    trace: TraceCollector,
    draft: Option<Draft>,
    verdict: Option<SupervisorVerdict>,
}

pub struct ResearchAgent {
    model: DynLanguageModel,
    search: DynWebSearch,
    fetcher: DynPageFetcher,
    store: Arc<dyn RowStore>,
    supervisor: Supervisor,
    settings: AgentSettings,
}

impl ResearchAgent {
    pub fn new(
        model: DynLanguageModel,
        search: DynWebSearch,
        fetcher: DynPageFetcher,
        store: Arc<dyn RowStore>,
        supervisor: Supervisor,
        settings: AgentSettings,
    ) -> Self {
        Self {
            model,
            search,
            fetcher,
            store,
            supervisor,
            settings,
        }
    }

    #[instrument(name = "agent.run", skip(self, topic), fields(topic = %topic.name))]
    pub async fn run(&self, topic: &Topic) -> RunOutcome {
        let started = Instant::now();
        let run_id = Uuid::new_v4().to_string();
        let mut run = RunState::default();
        let mut state = AgentState::Decide;

        let failure = loop {
            state = match state {
                AgentState::Decide => self.decide(topic, &mut run).await,
                AgentState::Search(query) => self.search_step(&query, &mut run).await,
                AgentState::Answer => self.answer(topic, &mut run).await,
                AgentState::Supervise(draft) => self.supervise(topic, draft, &mut run),
                AgentState::Done => break None,
                AgentState::Failed(reason) => break Some(reason),
            };
        };

        let status = if failure.is_none() {
            RunStatus::Done
        } else {
            RunStatus::Failed
        };
        let duration_ms = started.elapsed().as_millis() as u64;
        record_topic_run(status.as_str(), duration_ms, run.counters.links);

        match &failure {
            None => info!(
                run_id = %run_id,
                links = run.counters.links,
                searches = run.counters.search_steps,
                rejections = run.counters.rejections,
                duration_ms,
                "topic research finished"
            ),
            Some(reason) => warn!(
                run_id = %run_id,
                links = run.counters.links,
                searches = run.counters.search_steps,
                reason = %reason,
                "topic research failed"
            ),
        }

        RunOutcome {
            run_id,
            topic: topic.name.clone(),
            status,
            counters: run.counters,
            draft: run.draft,
            verdict: run.verdict,
            failure,
            context: run.context,
            trace: run.trace,
            duration_ms,
        }
    }

    #[instrument(name = "agent.decide", skip_all, fields(step = run.counters.decide_steps + 1))]
    async fn decide(&self, topic: &Topic, run: &mut RunState) -> AgentState {
        run.counters.decide_steps += 1;

        let current_date = Local::now().format("%Y-%m-%d %H:%M:%S").to_string();
        let prompt = DecidePrompt {
            topic,
            current_date: &current_date,
            language: &self.settings.language,
            links: run.counters.links,
            soft_link_threshold: self.settings.soft_link_threshold,
            context: run.context.as_str(),
        }
        .render();

        let decision = match self.model.complete(LlmRequest::text(prompt)).await {
            Ok(response) => parse_model_decision(&response).unwrap_or_else(|err| {
                warn!(error = %err, "model decision could not be parsed");
                Decision::finish(format!("unparseable decision: {err}"))
            }),
            Err(err) => {
                warn!(error = %err, "decision call failed");
                Decision::finish(format!("decision call failed: {err}"))
            }
        };

        debug!(action = decision.label(), "decision parsed");
        match decision {
            Decision::Search { query, reason } => {
                let links = run.counters.links;
                let searches = run.counters.search_steps;
                if links >= self.settings.link_ceiling || searches >= self.settings.max_search_steps {
                    warn!(
                        links,
                        searches,
                        query = %query,
                        "search budget exhausted; forcing an answer"
                    );
                    run.trace.record(
                        "decide",
                        format!("forced answer (links={links}, searches={searches})"),
                    );
                    return AgentState::Answer;
                }
                info!(query = %query, reason = %reason, "agent decided to search");
                run.trace.record("decide", format!("search: {query}"));
                AgentState::Search(query)
            }
            Decision::Answer { text, reason } => {
                info!(reason = %reason, "agent decided to answer");
                run.context.append(&format!("\n\nAnswer notes:\n{text}"));
                run.trace.record("decide", "answer");
                AgentState::Answer
            }
            Decision::Finish { reason } => {
                run.trace.record("decide", format!("finish: {reason}"));
                AgentState::Failed(reason)
            }
        }
    }

    #[instrument(name = "agent.search", skip(self, run), fields(step = run.counters.search_steps + 1))]
    async fn search_step(&self, query: &str, run: &mut RunState) -> AgentState {
        run.counters.search_steps += 1;

        let remaining = self
            .settings
            .link_ceiling
            .saturating_sub(run.counters.links);
        let limit = self.settings.results_per_search.min(remaining);

        let hits = match self.search.search(query, limit).await {
            Ok(mut hits) => {
                // Backends may ignore the limit.
                hits.truncate(limit);
                hits
            }
            Err(err) => {
                warn!(error = %err, "web search failed");
                run.context.append(&format!(
                    "\n\nSearch query: {query}\nSearch failed: {err}"
                ));
                run.trace.record("search", format!("failed: {err}"));
                return AgentState::Decide;
            }
        };

        let mut blocks = Vec::with_capacity(hits.len());
        for hit in &hits {
            let (title, summary) = self.summarize_hit(hit).await;
            run.counters.links += 1;
            blocks.push(format!(
                "Report {}: {}\nLink: {}\nSummary-1: {}\nSummary-2: {}",
                run.counters.links, title, hit.link, summary, hit.snippet
            ));
        }

        let results = if blocks.is_empty() {
            "(no results)".to_string()
        } else {
            blocks.join("\n\n")
        };
        run.context.append(&format!(
            "\n\nSearch query: {query}\nSearch results:\n{results}"
        ));
        if !blocks.is_empty() {
            run.context.record_search(&results);
        }

        info!(hits = hits.len(), links = run.counters.links, "search results folded into context");
        run.trace.record(
            "search",
            format!("{} hit(s), links={}", hits.len(), run.counters.links),
        );
        AgentState::Decide
    }

    /// Fetch and summarise one hit. Failures are logged and yield an empty
    /// summary so the hit still counts.
    async fn summarize_hit(&self, hit: &SearchHit) -> (String, String) {
        let page = match self.fetcher.fetch(&hit.link).await {
            Ok(page) => page,
            Err(err) => {
                warn!(link = %hit.link, error = %err, "page fetch failed");
                return (hit.title.clone(), String::new());
            }
        };
        if page.text.trim().is_empty() {
            debug!(link = %hit.link, "page has no readable text");
            return (hit.title.clone(), String::new());
        }

        let prompt = page_analysis_prompt(&page, &self.settings.language);
        let analysis = match self.model.complete(LlmRequest::text(prompt)).await {
            Ok(response) => parse_page_analysis(&response),
            Err(err) => {
                warn!(link = %hit.link, error = %err, "page analysis call failed");
                return (hit.title.clone(), String::new());
            }
        };
        match analysis {
            Ok(analysis) => {
                let title = if analysis.title.is_empty() {
                    hit.title.clone()
                } else {
                    analysis.title.replace('\n', " ")
                };
                (title, analysis.summary)
            }
            Err(err) => {
                warn!(link = %hit.link, error = %err, "page analysis could not be parsed");
                (hit.title.clone(), String::new())
            }
        }
    }

    #[instrument(name = "agent.answer", skip_all)]
    async fn answer(&self, topic: &Topic, run: &mut RunState) -> AgentState {
        let current_date = Local::now().format("%Y-%m-%d %H:%M:%S").to_string();
        let prompt = SynthesisPrompt {
            topic,
            current_date: &current_date,
            language: &self.settings.language,
            primary_language: &self.settings.primary_language,
            context: run.context.as_str(),
        }
        .render();

        let response = match self.model.complete(LlmRequest::text(prompt)).await {
            Ok(response) => response,
            Err(err) => {
                warn!(error = %err, "synthesis call failed");
                run.trace.record("answer", format!("failed: {err}"));
                return AgentState::Failed(format!("synthesis call failed: {err}"));
            }
        };

        match parse_synthesis(&response) {
            Ok(draft) => {
                info!(highlights = draft.highlights.len(), "draft synthesized");
                run.trace.record(
                    "answer",
                    format!("draft with {} highlight(s)", draft.highlights.len()),
                );
                AgentState::Supervise(draft)
            }
            Err(err) => {
                warn!(error = %err, "synthesis could not be parsed");
                run.trace.record("answer", format!("unparseable draft: {err}"));
                AgentState::Failed(format!("unparseable draft: {err}"))
            }
        }
    }

    #[instrument(name = "agent.supervise", skip_all)]
    fn supervise(&self, topic: &Topic, draft: Draft, run: &mut RunState) -> AgentState {
        let verdict = self.supervisor.check(&draft.supervised_text());

        if !verdict.valid {
            run.counters.rejections += 1;
            run.context.append(&rejection_note(&verdict.reason));
            warn!(
                rejections = run.counters.rejections,
                reason = %verdict.reason,
                "supervisor rejected draft"
            );
            run.trace.record("supervise", format!("rejected: {}", verdict.reason));
            run.verdict = Some(verdict);
            if run.counters.rejections >= self.settings.max_supervisor_rounds {
                return AgentState::Failed(format!(
                    "supervisor rejected {} draft(s)",
                    run.counters.rejections
                ));
            }
            return AgentState::Decide;
        }

        let row = TopicRow::researched(topic, run.context.search_history(), &draft);
        if let Err(err) = self.store.upsert_research(row) {
            warn!(error = %err, "failed to persist topic row");
            run.trace.record("supervise", format!("store failed: {err}"));
            return AgentState::Failed(format!("store failed: {err}"));
        }

        run.trace.record("supervise", "valid; row saved");
        run.draft = Some(draft);
        run.verdict = Some(verdict);
        AgentState::Done
    }
}
