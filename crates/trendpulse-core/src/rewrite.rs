use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use crate::{
    llm::{DynLanguageModel, LlmRequest},
    prompts::rewrite_prompt,
    supervisor::{Supervisor, rejection_note},
};

/// One `speaker: line` entry. Lines without a speaker prefix keep `speaker` empty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScriptLine {
    pub speaker: Option<String>,
    pub line: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Script {
    pub text: String,
    pub lines: Vec<ScriptLine>,
}

impl Script {
    /// Split on the first ASCII or full-width colon of each non-blank line.
    pub fn parse(text: &str) -> Self {
        let lines = text
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(|line| match line.find([':', '：']) {
                Some(idx) => {
                    let speaker = line[..idx].trim();
                    let colon_len = line[idx..].chars().next().map_or(1, char::len_utf8);
                    let spoken = line[idx + colon_len..].trim();
                    ScriptLine {
                        speaker: (!speaker.is_empty()).then(|| speaker.to_string()),
                        line: spoken.to_string(),
                    }
                }
                None => ScriptLine {
                    speaker: None,
                    line: line.to_string(),
                },
            })
            .collect();
        Self {
            text: text.trim().to_string(),
            lines,
        }
    }

    pub fn speakers(&self) -> Vec<&str> {
        let mut speakers: Vec<&str> = Vec::new();
        for speaker in self.lines.iter().filter_map(|line| line.speaker.as_deref()) {
            if !speakers.contains(&speaker) {
                speakers.push(speaker);
            }
        }
        speakers
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RewriteOutcome {
    Accepted(Script),
    Rejected { reason: String, attempts: usize },
}

/// Turns a narrative into a dialogue script in a given style, re-checking
/// every attempt with the supervisor.
pub struct StyleRewriter {
    model: DynLanguageModel,
    supervisor: Supervisor,
    max_attempts: usize,
}

impl StyleRewriter {
    pub fn new(model: DynLanguageModel, supervisor: Supervisor, max_attempts: usize) -> Self {
        Self {
            model,
            supervisor,
            max_attempts: max_attempts.max(1),
        }
    }

    #[instrument(name = "rewriter.rewrite", skip_all, fields(language = %language))]
    pub async fn rewrite(&self, narrative: &str, style: &str, language: &str) -> RewriteOutcome {
        let mut draft = narrative.to_string();
        let mut last_reason = String::new();

        for attempt in 1..=self.max_attempts {
            let prompt = rewrite_prompt(style, &draft, language);
            let response = match self.model.complete(LlmRequest::text(prompt)).await {
                Ok(response) => response,
                Err(err) => {
                    warn!(attempt, error = %err, "rewrite call failed");
                    return RewriteOutcome::Rejected {
                        reason: format!("rewrite call failed: {err}"),
                        attempts: attempt,
                    };
                }
            };

            let verdict = self.supervisor.check(&response);
            if verdict.valid {
                let script = Script::parse(&response);
                info!(attempt, lines = script.lines.len(), "rewrite accepted");
                return RewriteOutcome::Accepted(script);
            }

            warn!(attempt, reason = %verdict.reason, "supervisor rejected rewrite");
            draft.push_str(&rejection_note(&verdict.reason));
            last_reason = verdict.reason;
        }

        RewriteOutcome::Rejected {
            reason: last_reason,
            attempts: self.max_attempts,
        }
    }
}
