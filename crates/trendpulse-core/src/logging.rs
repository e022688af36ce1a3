use anyhow::{Context, Result};
use chrono::{Datelike, Utc};
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs::{self, OpenOptions, create_dir_all};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tracing::warn;

use crate::agent::RunCounters;

const LOG_DIR_ENV: &str = "TRENDPULSE_LOG_DIR";
const RETENTION_ENV: &str = "TRENDPULSE_LOG_RETENTION_DAYS";
const DEFAULT_LOG_DIR: &str = "data/logs";
const DEFAULT_RETENTION_DAYS: u64 = 90;
pub const RUN_LOG_FILE: &str = "runs.jsonl";

static REDACTION_PATTERNS: Lazy<Vec<(&'static str, Regex)>> = Lazy::new(|| {
    vec![
        (
            "api_key",
            Regex::new(r"(?i)(api[_-]?key\s*[:=]\s*)([A-Za-z0-9\-_.+/]+)")
                .expect("invalid api_key regex"),
        ),
        (
            "secret",
            Regex::new(r"(?i)(secret\s*[:=]\s*)([A-Za-z0-9\-_.+/]+)")
                .expect("invalid secret regex"),
        ),
        (
            "bearer",
            Regex::new(r"(?i)(bearer\s+)([A-Za-z0-9\-_.+=/]+)").expect("invalid bearer regex"),
        ),
        (
            "sk_token",
            Regex::new(r"(sk-[A-Za-z0-9]{16,})").expect("invalid sk_token regex"),
        ),
    ]
});

/// What the pipeline reports about one finished topic run.
#[derive(Debug, Clone)]
pub struct RunLogInput {
    pub run_id: String,
    pub topic: String,
    pub status: String,
    pub counters: RunCounters,
    pub duration_ms: u64,
    pub failure: Option<String>,
    pub summary: String,
    pub sources: Vec<String>,
    pub trace_path: Option<String>,
}

/// One line of `runs.jsonl`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunLogRecord {
    pub timestamp: String,
    pub run_id: String,
    pub topic: String,
    pub status: String,
    #[serde(flatten)]
    pub counters: RunCounters,
    #[serde(default)]
    pub duration_ms: u64,
    #[serde(default)]
    pub failure: Option<String>,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub sources: Vec<String>,
    #[serde(default)]
    pub trace_path: Option<String>,
    #[serde(default)]
    pub redactions: Vec<String>,
}

#[derive(Serialize)]
struct AuditLogRecord<'a> {
    timestamp: &'a str,
    run_id: &'a str,
    redactions: &'a [String],
}

/// Append-only JSONL log of topic runs, partitioned by month.
#[derive(Debug, Clone)]
pub struct RunLog {
    base_dir: PathBuf,
    retention_days: u64,
}

impl RunLog {
    pub fn new(base_dir: impl Into<PathBuf>, retention_days: u64) -> Self {
        Self {
            base_dir: base_dir.into(),
            retention_days,
        }
    }

    /// `TRENDPULSE_LOG_DIR` / `TRENDPULSE_LOG_RETENTION_DAYS`, falling back to
    /// `data/logs` and 90 days. A retention of 0 disables pruning.
    pub fn from_env() -> Self {
        let base_dir = std::env::var(LOG_DIR_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_LOG_DIR));
        let retention_days = std::env::var(RETENTION_ENV)
            .ok()
            .and_then(|value| value.parse::<u64>().ok())
            .unwrap_or(DEFAULT_RETENTION_DAYS);
        Self::new(base_dir, retention_days)
    }

    /// Path of the current month's run log.
    pub fn current_path(&self) -> PathBuf {
        let now = Utc::now();
        self.base_dir
            .join(format!("{:04}", now.year()))
            .join(format!("{:02}", now.month()))
            .join(RUN_LOG_FILE)
    }

    pub fn append(&self, input: RunLogInput) -> Result<PathBuf> {
        let timestamp = Utc::now();
        let mut redactions = BTreeSet::new();

        let summary = sanitize_text(&input.summary, &mut redactions);
        let failure = input
            .failure
            .as_deref()
            .map(|value| sanitize_text(value, &mut redactions));
        let sources: Vec<String> = input
            .sources
            .iter()
            .map(|source| sanitize_text(source, &mut redactions))
            .collect();

        let record = RunLogRecord {
            timestamp: timestamp.to_rfc3339(),
            run_id: input.run_id,
            topic: input.topic,
            status: input.status,
            counters: input.counters,
            duration_ms: input.duration_ms,
            failure,
            summary,
            sources,
            trace_path: input.trace_path,
            redactions: redactions.into_iter().map(str::to_string).collect(),
        };

        let month_dir = self
            .base_dir
            .join(format!("{:04}", timestamp.year()))
            .join(format!("{:02}", timestamp.month()));
        let run_log_path = month_dir.join(RUN_LOG_FILE);
        append_json_line(&run_log_path, &record)?;

        if !record.redactions.is_empty() {
            let audit = AuditLogRecord {
                timestamp: &record.timestamp,
                run_id: &record.run_id,
                redactions: &record.redactions,
            };
            append_json_line(&month_dir.join("audit.jsonl"), &audit)?;
            warn!(
                run_id = %record.run_id,
                fields = ?record.redactions,
                "redacted potential secrets from run log"
            );
        }

        self.enforce_retention()?;
        Ok(run_log_path)
    }

    fn enforce_retention(&self) -> Result<()> {
        if self.retention_days == 0 || !self.base_dir.exists() {
            return Ok(());
        }
        let cutoff = SystemTime::now()
            .checked_sub(Duration::from_secs(
                self.retention_days.saturating_mul(86_400),
            ))
            .unwrap_or(SystemTime::UNIX_EPOCH);

        prune_directory(&self.base_dir, cutoff)
    }
}

fn append_json_line<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        create_dir_all(parent)
            .with_context(|| format!("failed to create log directory {}", parent.display()))?;
    }

    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("failed to open log file {}", path.display()))?;
    let mut writer = BufWriter::new(file);
    let line = serde_json::to_string(value)?;
    writeln!(writer, "{line}")
        .with_context(|| format!("failed to append log entry to {}", path.display()))?;
    writer.flush()?;
    Ok(())
}

/// Mask credentials that leaked into free text, recording which patterns fired.
pub fn sanitize_text(input: &str, redactions: &mut BTreeSet<&'static str>) -> String {
    let mut output = input.to_string();
    for (name, regex) in REDACTION_PATTERNS.iter() {
        let mut matched = false;
        output = regex
            .replace_all(&output, |caps: &Captures| {
                matched = true;
                if caps.len() > 2 {
                    format!("{}[REDACTED]", &caps[1])
                } else {
                    "[REDACTED]".to_string()
                }
            })
            .to_string();
        if matched {
            redactions.insert(name);
        }
    }
    output
}

fn prune_directory(dir: &Path, cutoff: SystemTime) -> Result<()> {
    if !dir.exists() {
        return Ok(());
    }

    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        let metadata = entry.metadata()?;
        if metadata.is_dir() {
            prune_directory(&path, cutoff)?;
            if path.read_dir()?.next().is_none() {
                fs::remove_dir(&path).ok();
            }
        } else if metadata.is_file()
            && metadata
                .modified()
                .map(|time| time < cutoff)
                .unwrap_or(false)
        {
            fs::remove_file(&path).ok();
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;
    use tempfile::TempDir;

    fn input(summary: &str) -> RunLogInput {
        RunLogInput {
            run_id: "run-1".to_string(),
            topic: "test-topic".to_string(),
            status: "done".to_string(),
            counters: RunCounters {
                decide_steps: 2,
                search_steps: 1,
                links: 5,
                rejections: 0,
            },
            duration_ms: 1200,
            failure: None,
            summary: summary.to_string(),
            sources: vec!["https://example.com/a".to_string()],
            trace_path: None,
        }
    }

    #[test]
    fn run_log_sanitizes_and_persists() -> Result<()> {
        let temp = TempDir::new().expect("temp dir");
        let log = RunLog::new(temp.path(), 0);

        let path = log.append(input("leaked api_key=abcd1234 and sk-abcdef1234567890XYZ"))?;
        assert_eq!(path, log.current_path());

        let line = fs::read_to_string(&path)?;
        let record: Value = serde_json::from_str(line.trim())?;
        assert_eq!(record["topic"], "test-topic");
        assert_eq!(record["links"], 5);
        let summary = record["summary"].as_str().expect("summary");
        assert!(summary.contains("api_key=[REDACTED]"));
        assert!(!summary.contains("abcdef1234567890"));

        let audit = path.with_file_name("audit.jsonl");
        assert!(audit.exists());
        Ok(())
    }

    #[test]
    fn clean_runs_skip_the_audit_log() -> Result<()> {
        let temp = TempDir::new().expect("temp dir");
        let log = RunLog::new(temp.path(), 0);

        let path = log.append(input("nothing sensitive here"))?;
        assert!(!path.with_file_name("audit.jsonl").exists());

        let record: RunLogRecord = serde_json::from_str(fs::read_to_string(&path)?.trim())?;
        assert!(record.redactions.is_empty());
        assert_eq!(record.counters.search_steps, 1);
        Ok(())
    }
}
