use std::{
    fs,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Local;
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::Client;
use tracing::{info, instrument};

use crate::{
    TrendPulseError,
    llm::map_http_error,
    search::BROWSER_USER_AGENT,
    store::RowStore,
    topic::{Topic, topic_dir_name},
};

const TRENDS_RSS_ENDPOINT: &str = "https://trends.google.com/trending/rss";

/// One entry of a trends feed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrendItem {
    pub title: String,
    pub approx_traffic: String,
    pub pub_date: String,
    pub news_titles: Vec<String>,
}

impl TrendItem {
    /// The feed publishes no growth rate, so it stays empty.
    pub fn into_topic(self, source_path: Option<PathBuf>) -> Topic {
        Topic {
            name: self.title,
            source_path,
            search_volume: self.approx_traffic,
            search_growth_rate: String::new(),
            active_time: self.pub_date,
            related_news_titles: self.news_titles,
        }
    }
}

#[async_trait]
pub trait TrendSource: Send + Sync {
    async fn fetch(&self, region: &str) -> Result<Vec<TrendItem>>;
}

pub struct GoogleTrendsRss {
    client: Client,
    endpoint: String,
}

impl GoogleTrendsRss {
    pub fn new(timeout: Duration) -> Result<Self, TrendPulseError> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(BROWSER_USER_AGENT)
            .build()
            .map_err(|err| TrendPulseError::transport("trends", err.to_string()))?;
        Ok(Self {
            client,
            endpoint: TRENDS_RSS_ENDPOINT.to_string(),
        })
    }
}

#[async_trait]
impl TrendSource for GoogleTrendsRss {
    async fn fetch(&self, region: &str) -> Result<Vec<TrendItem>> {
        let response = self
            .client
            .get(&self.endpoint)
            .query(&[("geo", region)])
            .send()
            .await
            .map_err(|err| TrendPulseError::transport("trends", err.to_string()))?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|err| TrendPulseError::transport("trends", err.to_string()))?;
        if !status.is_success() {
            return Err(map_http_error("trends", status, &body).into());
        }
        Ok(parse_trends_rss(&body))
    }
}

static ITEM_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)<item>(.*?)</item>").expect("invalid item regex"));
static TITLE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)<title>(.*?)</title>").expect("invalid title regex"));
static TRAFFIC_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)<ht:approx_traffic>(.*?)</ht:approx_traffic>").expect("invalid traffic regex")
});
static PUB_DATE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)<pubDate>(.*?)</pubDate>").expect("invalid pubDate regex"));
static NEWS_TITLE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)<ht:news_item_title>(.*?)</ht:news_item_title>")
        .expect("invalid news title regex")
});
static CHAR_REF_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"&#(x[0-9a-fA-F]+|[0-9]+);").expect("invalid char ref regex"));

/// Parse the trends RSS feed. Items without a title are dropped.
pub fn parse_trends_rss(xml: &str) -> Vec<TrendItem> {
    ITEM_RE
        .captures_iter(xml)
        .filter_map(|item| {
            let body = item.get(1)?.as_str();
            let title = first_capture(&TITLE_RE, body)?;
            if title.is_empty() {
                return None;
            }
            Some(TrendItem {
                title,
                approx_traffic: first_capture(&TRAFFIC_RE, body).unwrap_or_default(),
                pub_date: first_capture(&PUB_DATE_RE, body).unwrap_or_default(),
                news_titles: NEWS_TITLE_RE
                    .captures_iter(body)
                    .filter_map(|caps| caps.get(1).map(|m| decode_xml_text(m.as_str())))
                    .filter(|title| !title.is_empty())
                    .collect(),
            })
        })
        .collect()
}

fn first_capture(re: &Regex, body: &str) -> Option<String> {
    re.captures(body)
        .and_then(|caps| caps.get(1))
        .map(|m| decode_xml_text(m.as_str()))
}

fn decode_xml_text(raw: &str) -> String {
    let trimmed = raw.trim();
    let inner = trimmed
        .strip_prefix("<![CDATA[")
        .and_then(|rest| rest.strip_suffix("]]>"));
    if let Some(cdata) = inner {
        return cdata.trim().to_string();
    }

    let numeric = CHAR_REF_RE.replace_all(trimmed, |caps: &regex::Captures| {
        let code = &caps[1];
        let parsed = match code.strip_prefix('x') {
            Some(hex) => u32::from_str_radix(hex, 16).ok(),
            None => code.parse::<u32>().ok(),
        };
        parsed
            .and_then(char::from_u32)
            .map(String::from)
            .unwrap_or_default()
    });
    numeric
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

/// Topics gathered by one collection, with the directory they live under.
#[derive(Debug, Clone)]
pub struct Collection {
    pub dir: PathBuf,
    pub topics: Vec<Topic>,
}

pub struct TrendCollector {
    source: Arc<dyn TrendSource>,
    store: Arc<dyn RowStore>,
    task_root: PathBuf,
}

impl TrendCollector {
    pub fn new(
        source: Arc<dyn TrendSource>,
        store: Arc<dyn RowStore>,
        task_root: impl Into<PathBuf>,
    ) -> Self {
        Self {
            source,
            store,
            task_root: task_root.into(),
        }
    }

    /// Fetch trends for `region`, create one working directory per topic and
    /// seed a row for each.
    #[instrument(name = "collector.collect", skip(self))]
    pub async fn collect(&self, region: &str, limit: usize) -> Result<Collection> {
        let items = self
            .source
            .fetch(region)
            .await
            .with_context(|| format!("failed to fetch trends for region {region}"))?;

        let stamp = Local::now().format("%Y-%m-%d_%H%M");
        let dir = self.task_root.join(format!("{stamp}_{region}"));
        create_dir(&dir)?;

        let mut topics = Vec::new();
        for (index, item) in items.into_iter().take(limit).enumerate() {
            let topic_dir = dir.join(topic_dir_name(index + 1, &item.title));
            create_dir(&topic_dir)?;
            let topic = item.into_topic(Some(topic_dir));
            self.store.upsert_topic(&topic)?;
            topics.push(topic);
        }

        info!(dir = %dir.display(), topics = topics.len(), "trends collected");
        Ok(Collection { dir, topics })
    }
}

fn create_dir(path: &Path) -> Result<()> {
    fs::create_dir_all(path)
        .with_context(|| format!("failed to create directory {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryRowStore;

    const FEED: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<rss xmlns:ht="https://trends.google.com/trending/rss" version="2.0">
  <channel>
    <title>Daily Search Trends</title>
    <item>
      <title>solar eclipse</title>
      <ht:approx_traffic>500,000+</ht:approx_traffic>
      <pubDate>Mon, 8 Apr 2024 10:00:00 -0700</pubDate>
      <ht:news_item>
        <ht:news_item_title>Eclipse &amp; the &quot;path of totality&quot;</ht:news_item_title>
        <ht:news_item_url>https://news.example/1</ht:news_item_url>
      </ht:news_item>
      <ht:news_item>
        <ht:news_item_title><![CDATA[Where to watch <live>]]></ht:news_item_title>
      </ht:news_item>
    </item>
    <item>
      <title>caf&#233; &#x2013; prices</title>
      <ht:approx_traffic>20,000+</ht:approx_traffic>
    </item>
    <item>
      <title>   </title>
    </item>
  </channel>
</rss>"#;

    #[test]
    fn rss_items_are_extracted_and_decoded() {
        let items = parse_trends_rss(FEED);
        assert_eq!(items.len(), 2);

        assert_eq!(items[0].title, "solar eclipse");
        assert_eq!(items[0].approx_traffic, "500,000+");
        assert_eq!(items[0].pub_date, "Mon, 8 Apr 2024 10:00:00 -0700");
        assert_eq!(
            items[0].news_titles,
            vec![
                "Eclipse & the \"path of totality\"".to_string(),
                "Where to watch <live>".to_string()
            ]
        );

        assert_eq!(items[1].title, "café – prices");
        assert!(items[1].pub_date.is_empty());
        assert!(items[1].news_titles.is_empty());
    }

    struct FixedSource;

    #[async_trait]
    impl TrendSource for FixedSource {
        async fn fetch(&self, _region: &str) -> Result<Vec<TrendItem>> {
            Ok(parse_trends_rss(FEED))
        }
    }

    #[tokio::test]
    async fn collect_creates_topic_dirs_and_rows() {
        let temp = tempfile::tempdir().expect("temp dir");
        let store = Arc::new(InMemoryRowStore::new());
        let collector = TrendCollector::new(Arc::new(FixedSource), store.clone(), temp.path());

        let collection = collector.collect("US", 1).await.expect("collection");

        assert_eq!(collection.topics.len(), 1);
        let dir_name = collection
            .dir
            .file_name()
            .and_then(|name| name.to_str())
            .expect("collection dir name");
        assert!(dir_name.ends_with("_US"));
        let topic_dir = collection.topics[0].source_path.clone().expect("topic dir");
        assert!(topic_dir.is_dir());
        assert_eq!(
            Topic::from_dir(&topic_dir).map(|t| t.name),
            Some("solar eclipse".to_string())
        );

        let rows = store.rows().expect("rows");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].search_volume, "500,000+");
        assert_eq!(rows[0].to_topic().related_news_titles.len(), 2);
    }
}
