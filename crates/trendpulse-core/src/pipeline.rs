//! Batch drivers over many topics: research every collected topic, then
//! rewrite every stored narrative.

use std::{
    fs,
    path::Path,
    sync::Arc,
    time::Duration,
};

use anyhow::{Context, Result};
use tracing::{info, instrument, warn};

use crate::{
    agent::{ResearchAgent, RunOutcome},
    logging::{RunLog, RunLogInput},
    rewrite::{RewriteOutcome, StyleRewriter},
    store::RowStore,
    topic::Topic,
    trace::persist_trace,
};

/// Result of rewriting the stored narratives.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RewriteReport {
    pub accepted: Vec<String>,
    pub rejected: Vec<(String, String)>,
    pub skipped: usize,
}

pub struct Pipeline {
    agent: ResearchAgent,
    rewriter: StyleRewriter,
    store: Arc<dyn RowStore>,
    run_log: Option<RunLog>,
    inter_topic_delay: Duration,
}

impl Pipeline {
    pub fn new(agent: ResearchAgent, rewriter: StyleRewriter, store: Arc<dyn RowStore>) -> Self {
        Self {
            agent,
            rewriter,
            store,
            run_log: None,
            inter_topic_delay: Duration::ZERO,
        }
    }

    pub fn with_run_log(mut self, run_log: RunLog) -> Self {
        self.run_log = Some(run_log);
        self
    }

    pub fn with_inter_topic_delay(mut self, delay: Duration) -> Self {
        self.inter_topic_delay = delay;
        self
    }

    /// Topics to research: every stored row, in store order.
    pub fn stored_topics(&self) -> Result<Vec<Topic>> {
        Ok(self.store.rows()?.iter().map(|row| row.to_topic()).collect())
    }

    /// Topics of one collection directory, one per `<n>-<topic>` folder in
    /// index order. Metrics come from the stored row when there is one.
    pub fn topics_in_dir(&self, dir: &Path) -> Result<Vec<Topic>> {
        let mut folders = Vec::new();
        let entries =
            fs::read_dir(dir).with_context(|| format!("failed to list {}", dir.display()))?;
        for entry in entries {
            let path = entry?.path();
            if path.is_dir() {
                folders.push(path);
            }
        }
        folders.sort_by_key(|path| folder_order(path));

        let mut topics = Vec::with_capacity(folders.len());
        for path in folders {
            let Some(found) = Topic::from_dir(&path) else {
                warn!(path = %path.display(), "skipping folder with a non-UTF-8 name");
                continue;
            };
            let topic = match self.store.get(&found.name)? {
                Some(row) => Topic {
                    source_path: found.source_path,
                    ..row.to_topic()
                },
                None => found,
            };
            topics.push(topic);
        }
        Ok(topics)
    }

    /// Research topics one after another. A failed topic is reported in its
    /// outcome and does not stop the batch.
    #[instrument(name = "pipeline.research_all", skip_all, fields(topics = topics.len()))]
    pub async fn research_all(&self, topics: &[Topic]) -> Vec<RunOutcome> {
        let mut outcomes = Vec::with_capacity(topics.len());
        for (index, topic) in topics.iter().enumerate() {
            if index > 0 && !self.inter_topic_delay.is_zero() {
                tokio::time::sleep(self.inter_topic_delay).await;
            }
            let outcome = self.research_topic(topic).await;
            if !outcome.is_done() {
                warn!(
                    topic = %topic.name,
                    reason = outcome.failure.as_deref().unwrap_or("unknown"),
                    "skipping failed topic"
                );
            }
            outcomes.push(outcome);
        }

        let done = outcomes.iter().filter(|outcome| outcome.is_done()).count();
        info!(done, failed = outcomes.len() - done, "research batch finished");
        outcomes
    }

    /// Run the agent for one topic, then persist its trace and run-log entry.
    pub async fn research_topic(&self, topic: &Topic) -> RunOutcome {
        let outcome = self.agent.run(topic).await;

        let trace_path = topic.source_path.as_ref().and_then(|dir| {
            persist_trace(dir, &outcome.run_id, outcome.trace.events())
                .map_err(|err| warn!(error = %err, "failed to persist run trace"))
                .ok()
        });

        if let Some(run_log) = &self.run_log {
            let input = RunLogInput {
                run_id: outcome.run_id.clone(),
                topic: outcome.topic.clone(),
                status: outcome.status.as_str().to_string(),
                counters: outcome.counters,
                duration_ms: outcome.duration_ms,
                failure: outcome.failure.clone(),
                summary: outcome
                    .draft
                    .as_ref()
                    .map(|draft| draft.narrative.clone())
                    .unwrap_or_default(),
                sources: outcome
                    .draft
                    .as_ref()
                    .map(|draft| draft.highlights.iter().map(|h| h.link.clone()).collect())
                    .unwrap_or_default(),
                trace_path: trace_path.map(|path| path.display().to_string()),
            };
            if let Err(err) = run_log.append(input) {
                warn!(error = %err, "failed to append run log");
            }
        }

        outcome
    }

    /// Rewrite every stored narrative in `style` and save accepted scripts to
    /// the `result` column.
    #[instrument(name = "pipeline.rewrite_all", skip(self, style))]
    pub async fn rewrite_all(&self, style: &str, language: &str) -> Result<RewriteReport> {
        let mut report = RewriteReport::default();
        for row in self.store.rows()? {
            if row.narrative.trim().is_empty() {
                report.skipped += 1;
                continue;
            }
            match self.rewriter.rewrite(&row.narrative, style, language).await {
                RewriteOutcome::Accepted(script) => {
                    self.store.save_result(&row.topic, &script.text)?;
                    report.accepted.push(row.topic);
                }
                RewriteOutcome::Rejected { reason, attempts } => {
                    warn!(topic = %row.topic, attempts, reason = %reason, "rewrite rejected");
                    report.rejected.push((row.topic, reason));
                }
            }
        }
        info!(
            accepted = report.accepted.len(),
            rejected = report.rejected.len(),
            skipped = report.skipped,
            "rewrite batch finished"
        );
        Ok(report)
    }

    /// Rewrite the narrative of a single stored topic.
    pub async fn rewrite_topic(
        &self,
        topic: &str,
        style: &str,
        language: &str,
    ) -> Result<RewriteOutcome> {
        let row = self
            .store
            .get(topic)?
            .ok_or_else(|| anyhow::anyhow!("no stored row for topic `{topic}`"))?;
        if row.narrative.trim().is_empty() {
            anyhow::bail!("topic `{topic}` has no narrative yet; research it first");
        }
        let outcome = self.rewriter.rewrite(&row.narrative, style, language).await;
        if let RewriteOutcome::Accepted(script) = &outcome {
            self.store.save_result(topic, &script.text)?;
        }
        Ok(outcome)
    }
}

fn folder_order(path: &Path) -> (usize, String) {
    let name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    let index = name
        .split_once('-')
        .and_then(|(prefix, _)| prefix.parse().ok())
        .unwrap_or(usize::MAX);
    (index, name)
}
