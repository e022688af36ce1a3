#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use trendpulse_core::{
    AgentSettings, DynLanguageModel, DynPageFetcher, DynWebSearch, LanguageModel, LlmRequest,
    PageContent, PageFetcher, ResearchAgent, RowStore, SearchHit, Supervisor, WebSearch,
};

pub fn search_response(query: &str) -> String {
    format!(
        "Let me look.\n```yaml\nthinking: |\n    need more facts\naction: search\nreason: not enough information\nanswer: |\nsearch_query: |\n    {query}\n```\n"
    )
}

pub fn answer_response(text: &str) -> String {
    format!(
        "```yaml\nthinking: |\n    enough\naction: answer\nreason: research is sufficient\nanswer: |\n    {text}\nsearch_query: |\n```"
    )
}

pub fn synthesis_response(narrative: &str) -> String {
    format!(
        "```yaml\nhighlights:\n  - title: Main report\n    summary: What happened.\n    link: \"https://news.example/main\"\nprimary: |\n    {narrative} (primary)\nnarrative: |\n    {narrative}\n```"
    )
}

const PAGE_ANALYSIS: &str = "```yaml\ntitle: Analysed page\nsummary: >\n    A short page summary.\ntopics:\n    - news\ncontent_type: article\n```";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptKind {
    Decide,
    Synthesis,
    PageAnalysis,
    Rewrite,
}

fn classify(prompt: &str) -> PromptKind {
    if prompt.contains("## Actions") {
        PromptKind::Decide
    } else if prompt.contains("### Your answer") {
        PromptKind::Synthesis
    } else if prompt.starts_with("Analyse the following web page") {
        PromptKind::PageAnalysis
    } else {
        PromptKind::Rewrite
    }
}

/// Language model double answering each prompt kind from its own queue.
/// An empty decide or rewrite queue is a transport failure; an empty
/// synthesis queue yields a safe default draft.
#[derive(Default)]
pub struct ScriptedModel {
    decisions: Mutex<VecDeque<Result<String, String>>>,
    syntheses: Mutex<VecDeque<Result<String, String>>>,
    rewrites: Mutex<VecDeque<String>>,
    always_search: Mutex<Option<String>>,
    prompts: Mutex<Vec<(PromptKind, String)>>,
}

impl ScriptedModel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn decide(self, response: impl Into<String>) -> Self {
        self.decisions
            .lock()
            .unwrap()
            .push_back(Ok(response.into()));
        self
    }

    pub fn decide_error(self, message: &str) -> Self {
        self.decisions
            .lock()
            .unwrap()
            .push_back(Err(message.to_string()));
        self
    }

    pub fn always_search(self, query: &str) -> Self {
        *self.always_search.lock().unwrap() = Some(query.to_string());
        self
    }

    pub fn synthesis(self, response: impl Into<String>) -> Self {
        self.syntheses
            .lock()
            .unwrap()
            .push_back(Ok(response.into()));
        self
    }

    pub fn synthesis_error(self, message: &str) -> Self {
        self.syntheses
            .lock()
            .unwrap()
            .push_back(Err(message.to_string()));
        self
    }

    pub fn rewrite(self, response: impl Into<String>) -> Self {
        self.rewrites.lock().unwrap().push_back(response.into());
        self
    }

    pub fn prompts(&self, kind: PromptKind) -> Vec<String> {
        self.prompts
            .lock()
            .unwrap()
            .iter()
            .filter(|(k, _)| *k == kind)
            .map(|(_, prompt)| prompt.clone())
            .collect()
    }

    pub fn into_dyn(self) -> (Arc<Self>, DynLanguageModel) {
        let model = Arc::new(self);
        let dyn_model: DynLanguageModel = model.clone();
        (model, dyn_model)
    }
}

#[async_trait]
impl LanguageModel for ScriptedModel {
    async fn complete(&self, request: LlmRequest) -> Result<String> {
        let kind = classify(&request.prompt);
        self.prompts
            .lock()
            .unwrap()
            .push((kind, request.prompt.clone()));
        match kind {
            PromptKind::Decide => {
                if let Some(query) = self.always_search.lock().unwrap().clone() {
                    return Ok(search_response(&query));
                }
                match self.decisions.lock().unwrap().pop_front() {
                    Some(Ok(response)) => Ok(response),
                    Some(Err(message)) => Err(anyhow!(message)),
                    None => Err(anyhow!("decision script exhausted")),
                }
            }
            PromptKind::Synthesis => match self.syntheses.lock().unwrap().pop_front() {
                Some(Ok(response)) => Ok(response),
                Some(Err(message)) => Err(anyhow!(message)),
                None => Ok(synthesis_response("Simple safe answer")),
            },
            PromptKind::PageAnalysis => Ok(PAGE_ANALYSIS.to_string()),
            PromptKind::Rewrite => self
                .rewrites
                .lock()
                .unwrap()
                .pop_front()
                .ok_or_else(|| anyhow!("rewrite script exhausted")),
        }
    }
}

/// Returns `hits_per_call` hits for every query, or fails when told to.
pub struct ScriptedSearch {
    hits_per_call: usize,
    fail: bool,
    calls: AtomicUsize,
    queries: Mutex<Vec<String>>,
}

impl ScriptedSearch {
    pub fn new(hits_per_call: usize) -> Self {
        Self {
            hits_per_call,
            fail: false,
            calls: AtomicUsize::new(0),
            queries: Mutex::new(Vec::new()),
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::new(0)
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn queries(&self) -> Vec<String> {
        self.queries.lock().unwrap().clone()
    }

    pub fn into_dyn(self) -> (Arc<Self>, DynWebSearch) {
        let search = Arc::new(self);
        let dyn_search: DynWebSearch = search.clone();
        (search, dyn_search)
    }
}

#[async_trait]
impl WebSearch for ScriptedSearch {
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<SearchHit>> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        self.queries.lock().unwrap().push(query.to_string());
        if self.fail {
            return Err(anyhow!("search backend unavailable"));
        }
        Ok((1..=self.hits_per_call.min(limit))
            .map(|i| SearchHit {
                title: format!("Result {i} for {query}"),
                snippet: format!("snippet {i}"),
                link: format!("https://example.com/c{call}/r{i}"),
            })
            .collect())
    }
}

/// Serves a page for every link except those containing `broken`.
pub struct StaticFetcher;

#[async_trait]
impl PageFetcher for StaticFetcher {
    async fn fetch(&self, url: &str) -> Result<PageContent> {
        if url.contains("broken") {
            return Err(anyhow!("connection reset"));
        }
        Ok(PageContent {
            url: url.to_string(),
            title: "Page".to_string(),
            text: "Readable article body.".to_string(),
            authors: vec![],
        })
    }
}

pub fn static_fetcher() -> DynPageFetcher {
    Arc::new(StaticFetcher)
}

pub fn agent(
    model: DynLanguageModel,
    search: DynWebSearch,
    store: Arc<dyn RowStore>,
    settings: AgentSettings,
) -> ResearchAgent {
    ResearchAgent::new(
        model,
        search,
        static_fetcher(),
        store,
        Supervisor::default(),
        settings,
    )
}

/// The research-context section of a rendered decide prompt.
pub fn context_of(decide_prompt: &str) -> String {
    let start_marker = "link(s) in total:\n\n";
    let start = decide_prompt
        .find(start_marker)
        .map(|idx| idx + start_marker.len())
        .expect("decide prompt has a context section");
    let end = decide_prompt[start..]
        .find("\n\n## Actions")
        .map(|idx| start + idx)
        .expect("decide prompt has an actions section");
    decide_prompt[start..end].to_string()
}
