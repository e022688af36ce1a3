//! Persistent topic rows keyed by topic name.
//!
//! Research fields are overwritten when a topic is researched again and
//! appended when the topic is new; the `result` column is owned by the
//! rewriter and only changes through [`RowStore::save_result`].

use std::{
    fs,
    path::{Path, PathBuf},
    sync::{
        Mutex,
        atomic::{AtomicUsize, Ordering},
    },
};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{
    TrendPulseError,
    decision::{Draft, Highlight},
    topic::Topic,
};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TopicRow {
    pub topic: String,
    pub source_dir: String,
    pub search_volume: String,
    pub search_growth_rate: String,
    pub search_active_time: String,
    /// Related news titles, one per line.
    pub related_news: String,
    pub research_history: String,
    /// JSON array of highlights.
    pub highlights: String,
    pub primary_narrative: String,
    pub narrative: String,
    pub result: String,
}

impl TopicRow {
    pub fn from_topic(topic: &Topic) -> Self {
        Self {
            topic: topic.name.clone(),
            source_dir: topic
                .source_path
                .as_ref()
                .map(|path| path.display().to_string())
                .unwrap_or_default(),
            search_volume: topic.search_volume.clone(),
            search_growth_rate: topic.search_growth_rate.clone(),
            search_active_time: topic.active_time.clone(),
            related_news: topic.related_news_titles.join("\n"),
            ..Self::default()
        }
    }

    /// Row for a finished research run. `result` is left empty and is never
    /// written by [`RowStore::upsert_research`].
    pub fn researched(topic: &Topic, research_history: &str, draft: &Draft) -> Self {
        Self {
            research_history: research_history.to_string(),
            highlights: serde_json::to_string(&draft.highlights).unwrap_or_default(),
            primary_narrative: draft.primary.clone(),
            narrative: draft.narrative.clone(),
            ..Self::from_topic(topic)
        }
    }

    pub fn to_topic(&self) -> Topic {
        Topic {
            name: self.topic.clone(),
            source_path: (!self.source_dir.is_empty()).then(|| PathBuf::from(&self.source_dir)),
            search_volume: self.search_volume.clone(),
            search_growth_rate: self.search_growth_rate.clone(),
            active_time: self.search_active_time.clone(),
            related_news_titles: self
                .related_news
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .map(str::to_string)
                .collect(),
        }
    }

    pub fn highlights(&self) -> Vec<Highlight> {
        serde_json::from_str(&self.highlights).unwrap_or_default()
    }

    fn merge_research(&mut self, researched: TopicRow) {
        let result = std::mem::take(&mut self.result);
        *self = TopicRow { result, ..researched };
    }

    fn merge_topic(&mut self, seeded: TopicRow) {
        self.source_dir = seeded.source_dir;
        self.search_volume = seeded.search_volume;
        self.search_growth_rate = seeded.search_growth_rate;
        self.search_active_time = seeded.search_active_time;
        self.related_news = seeded.related_news;
    }
}

pub trait RowStore: Send + Sync {
    /// Insert or refresh the collector fields of a topic, keeping research.
    fn upsert_topic(&self, topic: &Topic) -> Result<(), TrendPulseError>;
    /// Overwrite every research field of the matching row, or append it.
    fn upsert_research(&self, row: TopicRow) -> Result<(), TrendPulseError>;
    /// Overwrite the `result` column of an existing row.
    fn save_result(&self, topic: &str, result: &str) -> Result<(), TrendPulseError>;
    fn get(&self, topic: &str) -> Result<Option<TopicRow>, TrendPulseError>;
    fn rows(&self) -> Result<Vec<TopicRow>, TrendPulseError>;
}

/// Rows kept in a CSV file. Every write goes through a temp file and a rename.
pub struct CsvRowStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl CsvRowStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_rows(&self) -> Result<Vec<TopicRow>, TrendPulseError> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let raw = fs::read_to_string(&self.path)
            .map_err(|err| TrendPulseError::store(&self.path, err))?;
        // Spreadsheet exports often start with a byte-order mark.
        let raw = raw.strip_prefix('\u{feff}').unwrap_or(&raw);
        let mut reader = csv::ReaderBuilder::new()
            .flexible(true)
            .from_reader(raw.as_bytes());
        let mut rows = Vec::new();
        for record in reader.deserialize::<TopicRow>() {
            rows.push(record?);
        }
        Ok(rows)
    }

    fn write_rows(&self, rows: &[TopicRow]) -> Result<(), TrendPulseError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|err| TrendPulseError::store(parent, err))?;
        }
        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        let written = Self::write_tmp(&tmp, rows).and_then(|()| {
            fs::rename(&tmp, &self.path).map_err(|err| TrendPulseError::store(&self.path, err))
        });
        if let Err(err) = written {
            if let Err(cleanup) = fs::remove_file(&tmp) {
                debug!(path = %tmp.display(), error = %cleanup, "temp row file not removed");
            }
            return Err(err);
        }

        debug!(path = %self.path.display(), rows = rows.len(), "row store written");
        Ok(())
    }

    fn write_tmp(tmp: &Path, rows: &[TopicRow]) -> Result<(), TrendPulseError> {
        let mut writer = csv::Writer::from_path(tmp)?;
        for row in rows {
            writer.serialize(row)?;
        }
        writer
            .flush()
            .map_err(|err| TrendPulseError::store(tmp, err))
    }

    fn modify<F>(&self, apply: F) -> Result<(), TrendPulseError>
    where
        F: FnOnce(&mut Vec<TopicRow>) -> Result<(), TrendPulseError>,
    {
        let _guard = self
            .lock
            .lock()
            .map_err(|_| TrendPulseError::store(&self.path, "row store lock poisoned"))?;
        let mut rows = self.read_rows()?;
        apply(&mut rows)?;
        self.write_rows(&rows)
    }
}

impl RowStore for CsvRowStore {
    fn upsert_topic(&self, topic: &Topic) -> Result<(), TrendPulseError> {
        let seeded = TopicRow::from_topic(topic);
        self.modify(|rows| {
            match rows.iter_mut().find(|row| row.topic == seeded.topic) {
                Some(existing) => existing.merge_topic(seeded),
                None => rows.push(seeded),
            }
            Ok(())
        })
    }

    fn upsert_research(&self, row: TopicRow) -> Result<(), TrendPulseError> {
        self.modify(|rows| {
            match rows.iter_mut().find(|existing| existing.topic == row.topic) {
                Some(existing) => existing.merge_research(row),
                None => rows.push(TopicRow {
                    result: String::new(),
                    ..row
                }),
            }
            Ok(())
        })
    }

    fn save_result(&self, topic: &str, result: &str) -> Result<(), TrendPulseError> {
        let path = self.path.clone();
        self.modify(|rows| {
            let row = rows
                .iter_mut()
                .find(|row| row.topic == topic)
                .ok_or_else(|| TrendPulseError::store(&path, format!("no row for topic `{topic}`")))?;
            row.result = result.to_string();
            Ok(())
        })
    }

    fn get(&self, topic: &str) -> Result<Option<TopicRow>, TrendPulseError> {
        Ok(self.rows()?.into_iter().find(|row| row.topic == topic))
    }

    fn rows(&self) -> Result<Vec<TopicRow>, TrendPulseError> {
        let _guard = self
            .lock
            .lock()
            .map_err(|_| TrendPulseError::store(&self.path, "row store lock poisoned"))?;
        self.read_rows()
    }
}

/// In-memory store for tests and dry runs. Rows keep insertion order.
#[derive(Default)]
pub struct InMemoryRowStore {
    rows: DashMap<String, (usize, TopicRow)>,
    next: AtomicUsize,
}

impl InMemoryRowStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn insert_new(&self, row: TopicRow) {
        let seq = self.next.fetch_add(1, Ordering::SeqCst);
        self.rows.insert(row.topic.clone(), (seq, row));
    }
}

impl RowStore for InMemoryRowStore {
    fn upsert_topic(&self, topic: &Topic) -> Result<(), TrendPulseError> {
        let seeded = TopicRow::from_topic(topic);
        match self.rows.get_mut(&seeded.topic) {
            Some(mut entry) => entry.1.merge_topic(seeded),
            None => self.insert_new(seeded),
        }
        Ok(())
    }

    fn upsert_research(&self, row: TopicRow) -> Result<(), TrendPulseError> {
        match self.rows.get_mut(&row.topic) {
            Some(mut entry) => entry.1.merge_research(row),
            None => self.insert_new(TopicRow {
                result: String::new(),
                ..row
            }),
        }
        Ok(())
    }

    fn save_result(&self, topic: &str, result: &str) -> Result<(), TrendPulseError> {
        let mut entry = self.rows.get_mut(topic).ok_or_else(|| {
            TrendPulseError::store("memory", format!("no row for topic `{topic}`"))
        })?;
        entry.1.result = result.to_string();
        Ok(())
    }

    fn get(&self, topic: &str) -> Result<Option<TopicRow>, TrendPulseError> {
        Ok(self.rows.get(topic).map(|entry| entry.1.clone()))
    }

    fn rows(&self) -> Result<Vec<TopicRow>, TrendPulseError> {
        let mut rows: Vec<(usize, TopicRow)> =
            self.rows.iter().map(|entry| entry.value().clone()).collect();
        rows.sort_by_key(|(seq, _)| *seq);
        Ok(rows.into_iter().map(|(_, row)| row).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn draft(narrative: &str) -> Draft {
        Draft {
            primary: format!("{narrative} (primary)"),
            narrative: narrative.to_string(),
            highlights: vec![Highlight {
                title: "Source".into(),
                summary: "Summary, with comma".into(),
                link: "https://example.com".into(),
            }],
            raw: String::new(),
        }
    }

    fn exercise(store: &dyn RowStore) {
        let alpha = Topic {
            related_news_titles: vec!["first".into(), "second".into()],
            search_volume: "10K+".into(),
            ..Topic::new("alpha")
        };
        store.upsert_topic(&alpha).unwrap();
        store.upsert_topic(&Topic::new("beta")).unwrap();

        store
            .upsert_research(TopicRow::researched(&alpha, "history one", &draft("v1")))
            .unwrap();
        store.save_result("alpha", "Host : hello").unwrap();
        store
            .upsert_research(TopicRow::researched(&alpha, "history two", &draft("v2")))
            .unwrap();

        let rows = store.rows().unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].topic, "alpha");
        assert_eq!(rows[1].topic, "beta");
        assert_eq!(rows[0].narrative, "v2");
        assert_eq!(rows[0].research_history, "history two");
        assert_eq!(rows[0].result, "Host : hello");
        assert_eq!(rows[0].highlights()[0].summary, "Summary, with comma");
        assert_eq!(rows[0].to_topic().related_news_titles, vec!["first", "second"]);
        assert!(rows[1].narrative.is_empty());

        store.save_result("alpha", "Host : again").unwrap();
        let alpha_row = store.get("alpha").unwrap().expect("row");
        assert_eq!(alpha_row.result, "Host : again");
        assert_eq!(alpha_row.narrative, "v2");

        assert!(store.save_result("missing", "x").is_err());
        assert!(store.get("missing").unwrap().is_none());
    }

    #[test]
    fn in_memory_store_upserts_by_topic() {
        exercise(&InMemoryRowStore::new());
    }

    #[test]
    fn csv_store_upserts_by_topic() {
        let temp = TempDir::new().expect("temp dir");
        let store = CsvRowStore::new(temp.path().join("nested/topics.csv"));
        exercise(&store);
        assert!(!temp.path().join("nested/topics.csv.tmp").exists());
    }

    #[test]
    fn failed_write_leaves_no_temp_file() {
        let temp = TempDir::new().expect("temp dir");
        let path = temp.path().join("topics.csv");
        // A non-empty directory at the target makes the final rename fail.
        fs::create_dir_all(path.join("occupied")).unwrap();

        let store = CsvRowStore::new(&path);
        let err = store
            .write_rows(&[TopicRow::from_topic(&Topic::new("alpha"))])
            .unwrap_err();

        assert!(matches!(err, TrendPulseError::Store { .. }));
        assert!(!temp.path().join("topics.csv.tmp").exists());
    }

    #[test]
    fn csv_store_reads_bom_prefixed_files_with_missing_columns() {
        let temp = TempDir::new().expect("temp dir");
        let path = temp.path().join("topics.csv");
        fs::write(&path, "\u{feff}topic,narrative\nalpha,\"multi\nline\"\n").unwrap();

        let store = CsvRowStore::new(&path);
        let rows = store.rows().unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].topic, "alpha");
        assert_eq!(rows[0].narrative, "multi\nline");
        assert!(rows[0].result.is_empty());
    }
}
