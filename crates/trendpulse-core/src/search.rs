use std::{sync::Arc, time::Duration};

use anyhow::{Context, Result};
use async_trait::async_trait;
use once_cell::sync::Lazy;
use reqwest::Client;
use scraper::{Html, Selector};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{debug, info};
use url::Url;

use crate::{SecretValue, TrendPulseError, config::Config, llm::map_http_error};

const SERPER_ENDPOINT: &str = "https://google.serper.dev/search";
const DUCKDUCKGO_ENDPOINT: &str = "https://html.duckduckgo.com/html/";
pub(crate) const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchHit {
    pub title: String,
    pub snippet: String,
    pub link: String,
}

#[async_trait]
pub trait WebSearch: Send + Sync {
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<SearchHit>>;
}

pub type DynWebSearch = Arc<dyn WebSearch>;

/// Serper when a key is configured, the keyless DuckDuckGo HTML endpoint otherwise.
pub fn build_web_search(config: &Config) -> Result<DynWebSearch, TrendPulseError> {
    let timeout = Duration::from_secs(config.search.timeout_secs);
    match config.search_api_key() {
        Some(key) => {
            info!(backend = "serper", "web search configured");
            Ok(Arc::new(SerperSearch::new(key, timeout)?))
        }
        None => {
            info!(backend = "duckduckgo", "no search key set; using keyless backend");
            Ok(Arc::new(DuckDuckGoSearch::new(timeout)?))
        }
    }
}

fn search_client(timeout: Duration) -> Result<Client, TrendPulseError> {
    Client::builder()
        .timeout(timeout)
        .user_agent(BROWSER_USER_AGENT)
        .build()
        .map_err(|err| TrendPulseError::transport("search", err.to_string()))
}

pub struct SerperSearch {
    client: Client,
    api_key: SecretValue,
    endpoint: String,
}

impl SerperSearch {
    pub fn new(api_key: SecretValue, timeout: Duration) -> Result<Self, TrendPulseError> {
        Ok(Self {
            client: search_client(timeout)?,
            api_key,
            endpoint: SERPER_ENDPOINT.to_string(),
        })
    }
}

#[async_trait]
impl WebSearch for SerperSearch {
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<SearchHit>> {
        debug!(query, limit, "serper search");
        let response = self
            .client
            .post(&self.endpoint)
            .header("X-API-KEY", self.api_key.expose())
            .json(&json!({ "q": query, "num": limit }))
            .send()
            .await
            .map_err(|err| TrendPulseError::transport("serper", err.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|err| TrendPulseError::transport("serper", err.to_string()))?;
        if !status.is_success() {
            return Err(map_http_error("serper", status, &body).into());
        }

        let value: Value = serde_json::from_str(&body).context("serper returned invalid JSON")?;
        Ok(parse_serper_response(&value, limit))
    }
}

/// Map Serper's `organic` results to hits, skipping entries without a link.
pub fn parse_serper_response(body: &Value, limit: usize) -> Vec<SearchHit> {
    let field = |item: &Value, key: &str| {
        item.get(key)
            .and_then(Value::as_str)
            .unwrap_or_default()
            .trim()
            .to_string()
    };
    body.get("organic")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .map(|item| SearchHit {
                    title: field(item, "title"),
                    snippet: field(item, "snippet"),
                    link: field(item, "link"),
                })
                .filter(|hit| !hit.link.is_empty())
                .take(limit)
                .collect()
        })
        .unwrap_or_default()
}

pub struct DuckDuckGoSearch {
    client: Client,
}

impl DuckDuckGoSearch {
    pub fn new(timeout: Duration) -> Result<Self, TrendPulseError> {
        Ok(Self {
            client: search_client(timeout)?,
        })
    }
}

#[async_trait]
impl WebSearch for DuckDuckGoSearch {
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<SearchHit>> {
        debug!(query, limit, "duckduckgo search");
        let response = self
            .client
            .post(DUCKDUCKGO_ENDPOINT)
            .form(&[("q", query)])
            .send()
            .await
            .map_err(|err| TrendPulseError::transport("duckduckgo", err.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|err| TrendPulseError::transport("duckduckgo", err.to_string()))?;
        if !status.is_success() {
            return Err(map_http_error("duckduckgo", status, &body).into());
        }

        Ok(parse_duckduckgo_html(&body, limit))
    }
}

static RESULT_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse("div.result").expect("valid result selector"));
static TITLE_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse("a.result__a").expect("valid title selector"));
static SNIPPET_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse(".result__snippet").expect("valid snippet selector"));

/// Parse the DuckDuckGo HTML results page. Ads are skipped and redirect links
/// are resolved to their target.
pub fn parse_duckduckgo_html(html: &str, limit: usize) -> Vec<SearchHit> {
    let document = Html::parse_document(html);
    document
        .select(&RESULT_SELECTOR)
        .filter(|result| {
            !result
                .value()
                .classes()
                .any(|class| class == "result--ad")
        })
        .filter_map(|result| {
            let anchor = result.select(&TITLE_SELECTOR).next()?;
            let link = resolve_duckduckgo_link(anchor.value().attr("href")?)?;
            let title = collapse_whitespace(&anchor.text().collect::<String>());
            let snippet = result
                .select(&SNIPPET_SELECTOR)
                .next()
                .map(|node| collapse_whitespace(&node.text().collect::<String>()))
                .unwrap_or_default();
            Some(SearchHit {
                title,
                snippet,
                link,
            })
        })
        .take(limit)
        .collect()
}

fn resolve_duckduckgo_link(href: &str) -> Option<String> {
    let absolute = if href.starts_with("//") {
        format!("https:{href}")
    } else {
        href.to_string()
    };
    let parsed = Url::parse(&absolute).ok()?;
    if parsed.path().starts_with("/l/") {
        return parsed
            .query_pairs()
            .find(|(key, _)| key == "uddg")
            .map(|(_, target)| target.into_owned());
    }
    Some(absolute)
}

pub(crate) fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serper_organic_results_are_mapped() {
        let body = json!({
            "organic": [
                { "title": "One", "link": "https://a.example", "snippet": "first" },
                { "title": "No link" },
                { "title": "Two", "link": "https://b.example", "snippet": "second" },
                { "title": "Three", "link": "https://c.example" }
            ]
        });
        let hits = parse_serper_response(&body, 2);
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[1].title, "Two");
        assert_eq!(hits[1].snippet, "second");
        assert!(parse_serper_response(&json!({}), 5).is_empty());
    }

    #[test]
    fn duckduckgo_html_is_parsed_and_redirects_resolved() {
        let html = r#"
<html><body>
  <div class="result results_links result--ad">
    <a class="result__a" href="https://ads.example/">Sponsored</a>
  </div>
  <div class="result results_links">
    <h2><a class="result__a" href="//duckduckgo.com/l/?uddg=https%3A%2F%2Fnews.example%2Fstory%3Fid%3D7&amp;rut=abc">Big
      <b>Story</b></a></h2>
    <a class="result__snippet">What   happened today.</a>
  </div>
  <div class="result results_links">
    <a class="result__a" href="https://direct.example/page">Direct</a>
  </div>
</body></html>"#;
        let hits = parse_duckduckgo_html(html, 5);
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].link, "https://news.example/story?id=7");
        assert_eq!(hits[0].title, "Big Story");
        assert_eq!(hits[0].snippet, "What happened today.");
        assert_eq!(hits[1].link, "https://direct.example/page");
        assert_eq!(hits[1].snippet, "");

        assert_eq!(parse_duckduckgo_html(html, 1).len(), 1);
    }
}
