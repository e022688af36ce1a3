use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use anyhow::{Context, Result};

use crate::logging::RunLogRecord;

/// Aggregate view over a `runs.jsonl` file.
#[derive(Debug, Default, Clone)]
pub struct RunLogStats {
    pub total_runs: usize,
    pub done: usize,
    pub failed: usize,
    pub total_links: usize,
    pub total_rejections: usize,
    pub failed_topics: Vec<String>,
}

impl RunLogStats {
    pub fn analyze(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)
            .with_context(|| format!("failed to open run log {}", path.display()))?;
        let mut stats = Self::default();

        for line in BufReader::new(file).lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<RunLogRecord>(&line) {
                Ok(record) => stats.record(&record),
                Err(err) => {
                    tracing::debug!(%err, "skipping malformed run log entry");
                }
            }
        }

        Ok(stats)
    }

    pub fn record(&mut self, record: &RunLogRecord) {
        self.total_runs += 1;
        self.total_links += record.counters.links;
        self.total_rejections += record.counters.rejections;
        if record.status == "done" {
            self.done += 1;
        } else {
            self.failed += 1;
            self.failed_topics.push(record.topic.clone());
        }
    }

    pub fn average_links(&self) -> f64 {
        if self.total_runs == 0 {
            return 0.0;
        }
        self.total_links as f64 / self.total_runs as f64
    }

    pub fn summary(&self) -> String {
        format!(
            "{} run(s): {} done, {} failed; avg {:.1} links/run; {} supervisor rejection(s)",
            self.total_runs,
            self.done,
            self.failed,
            self.average_links(),
            self.total_rejections
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn stats_aggregate_runs_and_skip_garbage() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        writeln!(
            file,
            r#"{{"timestamp":"t","run_id":"a","topic":"alpha","status":"done","decide_steps":2,"search_steps":1,"links":5,"rejections":1}}"#
        )
        .unwrap();
        writeln!(file, "not json").unwrap();
        writeln!(
            file,
            r#"{{"timestamp":"t","run_id":"b","topic":"beta","status":"failed","decide_steps":1,"search_steps":0,"links":0,"rejections":0}}"#
        )
        .unwrap();
        file.flush().unwrap();

        let stats = RunLogStats::analyze(file.path()).expect("stats");

        assert_eq!(stats.total_runs, 2);
        assert_eq!(stats.done, 1);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.failed_topics, vec!["beta".to_string()]);
        assert!((stats.average_links() - 2.5).abs() < f64::EPSILON);
        assert!(stats.summary().contains("1 supervisor rejection"));
    }
}
