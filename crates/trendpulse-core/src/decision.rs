//! Parsers for the structured blocks the model is asked to emit.
//!
//! Every model response is free text expected to contain one fenced ```yaml
//! block. Parsing never panics; each failure is a [`DecisionParseError`] that
//! callers fold into their own fallback.

use serde::{Deserialize, Serialize};
use serde_yaml::{Mapping, Value};

use crate::error::DecisionParseError;

/// Next step chosen by the model during DECIDE.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum Decision {
    Search { query: String, reason: String },
    Answer { text: String, reason: String },
    Finish { reason: String },
}

impl Decision {
    pub fn finish(reason: impl Into<String>) -> Self {
        Self::Finish {
            reason: reason.into(),
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Search { .. } => "search",
            Self::Answer { .. } => "answer",
            Self::Finish { .. } => "finish",
        }
    }
}

/// One cited source inside a synthesized draft.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Highlight {
    pub title: String,
    pub summary: String,
    pub link: String,
}

/// Bilingual narrative produced by the synthesis step.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Draft {
    pub primary: String,
    pub narrative: String,
    pub highlights: Vec<Highlight>,
    #[serde(skip)]
    pub raw: String,
}

impl Draft {
    /// Text the supervisor inspects: both narratives plus highlight titles and
    /// summaries. Links are left out.
    pub fn supervised_text(&self) -> String {
        let mut text = String::with_capacity(self.primary.len() + self.narrative.len());
        text.push_str(&self.primary);
        text.push('\n');
        text.push_str(&self.narrative);
        for highlight in &self.highlights {
            text.push('\n');
            text.push_str(&highlight.title);
            text.push('\n');
            text.push_str(&highlight.summary);
        }
        text
    }
}

/// Per-page summary produced while folding search hits into the context.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageAnalysis {
    pub title: String,
    pub summary: String,
    pub topics: Vec<String>,
    pub content_type: String,
}

/// Return the body of the first ```<lang> fence, up to the next ``` or the end
/// of the text.
pub fn extract_fenced_block<'a>(text: &'a str, lang: &str) -> Option<&'a str> {
    let fence = format!("```{lang}");
    let start = text.find(&fence)? + fence.len();
    let rest = &text[start..];
    let end = rest.find("```").unwrap_or(rest.len());
    Some(rest[..end].trim())
}

pub fn parse_model_decision(text: &str) -> Result<Decision, DecisionParseError> {
    // Quotes are dropped before parsing: models routinely emit unbalanced ones
    // inside plain scalars.
    let unquoted = text.replace(['"', '\''], "");
    let block = extract_fenced_block(&unquoted, "yaml").ok_or(DecisionParseError::MissingBlock)?;
    let map = load_mapping(block)?;

    let action = scalar(&map, "action")
        .map(|value| value.trim().to_lowercase())
        .filter(|value| !value.is_empty())
        .ok_or(DecisionParseError::MissingField("action"))?;
    let reason = scalar(&map, "reason").unwrap_or_default().trim().to_string();

    match action.as_str() {
        "search" => {
            let query = non_empty(&map, "search_query")
                .ok_or(DecisionParseError::MissingField("search_query"))?;
            Ok(Decision::Search { query, reason })
        }
        "answer" => {
            let text = non_empty(&map, "answer").ok_or(DecisionParseError::MissingField("answer"))?;
            Ok(Decision::Answer { text, reason })
        }
        "finish" => Ok(Decision::Finish { reason }),
        _ => Err(DecisionParseError::UnknownAction(action)),
    }
}

pub fn parse_synthesis(text: &str) -> Result<Draft, DecisionParseError> {
    let block = extract_fenced_block(text, "yaml").ok_or(DecisionParseError::MissingBlock)?;
    let map = load_mapping(block)?;

    let primary = non_empty(&map, "primary")
        .or_else(|| non_empty(&map, "chinese"))
        .ok_or(DecisionParseError::MissingField("primary"))?;
    let narrative = non_empty(&map, "narrative")
        .or_else(|| non_empty(&map, "output"))
        .ok_or(DecisionParseError::MissingField("narrative"))?;

    let highlights = match map.get("highlights") {
        Some(Value::Sequence(items)) => items
            .iter()
            .filter_map(Value::as_mapping)
            .map(|item| Highlight {
                title: scalar(item, "title").unwrap_or_default().trim().to_string(),
                summary: scalar(item, "summary").unwrap_or_default().trim().to_string(),
                link: scalar(item, "link").unwrap_or_default().trim().to_string(),
            })
            .collect(),
        Some(Value::Null) | None => Vec::new(),
        Some(_) => {
            return Err(DecisionParseError::Malformed(
                "highlights must be a list".to_string(),
            ));
        }
    };

    Ok(Draft {
        primary,
        narrative,
        highlights,
        raw: text.to_string(),
    })
}

pub fn parse_page_analysis(text: &str) -> Result<PageAnalysis, DecisionParseError> {
    let block = extract_fenced_block(text, "yaml").ok_or(DecisionParseError::MissingBlock)?;
    let map = load_mapping(block)?;

    let summary = non_empty(&map, "summary").ok_or(DecisionParseError::MissingField("summary"))?;
    let topics = match map.get("topics") {
        Some(Value::Sequence(items)) => items.iter().filter_map(scalar_value).collect(),
        _ => Vec::new(),
    };

    Ok(PageAnalysis {
        title: scalar(&map, "title").unwrap_or_default().trim().to_string(),
        summary: summary.replace('\n', " "),
        topics,
        content_type: scalar(&map, "content_type")
            .unwrap_or_default()
            .trim()
            .to_string(),
    })
}

fn load_mapping(block: &str) -> Result<Mapping, DecisionParseError> {
    match serde_yaml::from_str::<Value>(block) {
        Ok(Value::Mapping(map)) => Ok(map),
        Ok(other) => Err(DecisionParseError::Malformed(format!(
            "expected a mapping, found {}",
            kind_of(&other)
        ))),
        Err(err) => Err(DecisionParseError::Malformed(err.to_string())),
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Sequence(_) => "a list",
        Value::Mapping(_) => "a mapping",
        Value::Tagged(_) => "a tagged value",
    }
}

fn scalar(map: &Mapping, key: &str) -> Option<String> {
    map.get(key).and_then(scalar_value)
}

fn scalar_value(value: &Value) -> Option<String> {
    match value {
        Value::String(text) => Some(text.clone()),
        Value::Number(number) => Some(number.to_string()),
        Value::Bool(flag) => Some(flag.to_string()),
        _ => None,
    }
}

fn non_empty(map: &Mapping, key: &str) -> Option<String> {
    scalar(map, key)
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}
