use serde::{Deserialize, Serialize};

use crate::config::DEFAULT_NONSENSE_MARKERS;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SupervisorVerdict {
    pub valid: bool,
    pub reason: String,
}

/// Blacklist check gating drafts and scripts.
#[derive(Debug, Clone)]
pub struct Supervisor {
    markers: Vec<String>,
}

impl Default for Supervisor {
    fn default() -> Self {
        Self::new(DEFAULT_NONSENSE_MARKERS.iter().map(|m| m.to_string()))
    }
}

impl Supervisor {
    pub fn new(markers: impl IntoIterator<Item = String>) -> Self {
        Self {
            markers: markers
                .into_iter()
                .filter(|marker| !marker.is_empty())
                .collect(),
        }
    }

    /// Markers match as case-sensitive substrings.
    pub fn check(&self, text: &str) -> SupervisorVerdict {
        match self.markers.iter().find(|marker| text.contains(marker.as_str())) {
            Some(marker) => SupervisorVerdict {
                valid: false,
                reason: format!("answer contains nonsense marker `{marker}`"),
            },
            None => SupervisorVerdict {
                valid: true,
                reason: "answer passed the nonsense-marker check".to_string(),
            },
        }
    }
}

/// Annotation appended to research context after a rejected draft.
pub fn rejection_note(reason: &str) -> String {
    format!("\n\nNote: the previous answer attempt was rejected by the supervisor ({reason}).")
}
