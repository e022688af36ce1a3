use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// One trending subject queued for research. Read-only once collected.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Topic {
    pub name: String,
    pub source_path: Option<PathBuf>,
    pub search_volume: String,
    pub search_growth_rate: String,
    pub active_time: String,
    pub related_news_titles: Vec<String>,
}

impl Topic {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Recover a topic from a `<n>-<topic>` working directory.
    pub fn from_dir(path: &Path) -> Option<Self> {
        let folder = path.file_name()?.to_str()?;
        Some(Self {
            name: topic_name_from_dir(folder).to_string(),
            source_path: Some(path.to_path_buf()),
            ..Self::default()
        })
    }

    /// One-line description of the trend metrics for prompts.
    pub fn describe_metrics(&self) -> String {
        let mut parts = Vec::new();
        if !self.active_time.is_empty() {
            parts.push(format!("trending since {}", self.active_time));
        }
        if !self.search_growth_rate.is_empty() {
            parts.push(format!("search growth {}", self.search_growth_rate));
        }
        if !self.search_volume.is_empty() {
            parts.push(format!("search volume {}", self.search_volume));
        }
        if parts.is_empty() {
            "no trend metrics available".to_string()
        } else {
            parts.join(", ")
        }
    }
}

/// Build the `<n>-<topic>` folder name used under a collection directory.
pub fn topic_dir_name(index: usize, name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c => c,
        })
        .collect();
    format!("{index}-{}", cleaned.trim())
}

/// Strip the numeric index prefix from a topic folder name. Names without a
/// numeric prefix are returned unchanged.
pub fn topic_name_from_dir(folder: &str) -> &str {
    match folder.split_once('-') {
        Some((prefix, rest))
            if !prefix.is_empty() && prefix.chars().all(|c| c.is_ascii_digit()) =>
        {
            rest
        }
        _ => folder,
    }
}
