use std::{sync::Arc, time::Duration};

use anyhow::Result;
use async_trait::async_trait;
use once_cell::sync::Lazy;
use reqwest::{Client, header};
use scraper::{ElementRef, Html, Selector};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{TrendPulseError, search::BROWSER_USER_AGENT, search::collapse_whitespace};

/// Title, visible text and authors of one fetched page.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageContent {
    pub url: String,
    pub title: String,
    pub text: String,
    pub authors: Vec<String>,
}

#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<PageContent>;
}

pub type DynPageFetcher = Arc<dyn PageFetcher>;

pub struct HttpPageFetcher {
    client: Client,
}

impl HttpPageFetcher {
    pub fn new(timeout: Duration) -> Result<Self, TrendPulseError> {
        let mut headers = header::HeaderMap::new();
        headers.insert(
            header::ACCEPT,
            header::HeaderValue::from_static(
                "text/html,application/xhtml+xml,application/xml;q=0.9,image/webp,*/*;q=0.8",
            ),
        );
        headers.insert(
            header::ACCEPT_LANGUAGE,
            header::HeaderValue::from_static("en-US,en;q=0.5"),
        );
        headers.insert(
            header::REFERER,
            header::HeaderValue::from_static("https://www.google.com/"),
        );
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(BROWSER_USER_AGENT)
            .default_headers(headers)
            .build()
            .map_err(|err| TrendPulseError::transport("fetch", err.to_string()))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl PageFetcher for HttpPageFetcher {
    async fn fetch(&self, url: &str) -> Result<PageContent> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .and_then(|response| response.error_for_status())
            .map_err(|err| TrendPulseError::transport("fetch", err.to_string()))?;

        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .unwrap_or("text/html")
            .to_ascii_lowercase();
        if !(content_type.contains("html") || content_type.contains("xml")) {
            // Video and other binary payloads carry no readable text.
            debug!(url, content_type = %content_type, "skipping non-html page");
            return Ok(PageContent {
                url: url.to_string(),
                ..PageContent::default()
            });
        }

        let html = response
            .text()
            .await
            .map_err(|err| TrendPulseError::transport("fetch", err.to_string()))?;
        Ok(extract_page(url, &html))
    }
}

static TITLE_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse("title").expect("valid title selector"));
static BODY_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse("body").expect("valid body selector"));
static AUTHOR_SELECTOR: Lazy<Selector> = Lazy::new(|| {
    Selector::parse(r#"meta[name="author"], meta[property="article:author"]"#)
        .expect("valid author selector")
});

const HIDDEN_ELEMENTS: [&str; 5] = ["script", "style", "noscript", "template", "svg"];

/// Extract the title, visible body text (one line per text node) and authors.
pub fn extract_page(url: &str, html: &str) -> PageContent {
    let document = Html::parse_document(html);

    let title = document
        .select(&TITLE_SELECTOR)
        .next()
        .map(|node| collapse_whitespace(&node.text().collect::<String>()))
        .unwrap_or_default();

    let text = document
        .select(&BODY_SELECTOR)
        .next()
        .map(visible_text)
        .unwrap_or_default();

    let mut authors: Vec<String> = Vec::new();
    for meta in document.select(&AUTHOR_SELECTOR) {
        if let Some(name) = meta.value().attr("content").map(str::trim) {
            if !name.is_empty() && !authors.iter().any(|known| known == name) {
                authors.push(name.to_string());
            }
        }
    }

    PageContent {
        url: url.to_string(),
        title,
        text,
        authors,
    }
}

fn visible_text(body: ElementRef<'_>) -> String {
    body.descendants()
        .filter_map(|node| {
            let text = node.value().as_text()?;
            let hidden = node.ancestors().any(|ancestor| {
                ancestor
                    .value()
                    .as_element()
                    .is_some_and(|element| HIDDEN_ELEMENTS.contains(&element.name()))
            });
            if hidden {
                return None;
            }
            let line = collapse_whitespace(text);
            (!line.is_empty()).then_some(line)
        })
        .collect::<Vec<_>>()
        .join("\n")
}
