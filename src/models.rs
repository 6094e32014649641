//! Data models shared by the scrapers, the stores and the orchestrator.
//!
//! - [`Article`]: the normalized record every scraper produces
//! - [`Topic`]: a search query driving the search-engine scrapers
//! - [`FeedSource`]: an RSS/Atom feed driving the website scraper
//! - [`SaveSummary`]: what the dual-store write reported
//!
//! Article field names are serialized in the shape already stored in the
//! `News` collection (`searchKey` is camelCase there), hence the renames.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A normalized news article.
///
/// Articles are keyed by `url` in every store. `search_key` is the query that
/// found the article (search scrapers only); feed articles leave it empty.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Article {
    /// Canonical article URL, the deduplication key.
    pub url: String,
    /// Headline.
    pub title: String,
    /// Summary or excerpt text.
    pub body: String,
    /// Publication (or collection) time in UTC.
    pub date: DateTime<Utc>,
    /// Publisher name or publisher URL.
    pub source: String,
    /// The query that surfaced this article, if any.
    #[serde(rename = "searchKey")]
    pub search_key: Option<String>,
    /// Thumbnail URL, if the source provides one.
    pub image: Option<String>,
}

impl Article {
    /// Registrable part of the article host without a leading `www.`.
    ///
    /// `"https://www.reuters.com/markets/x"` -> `"reuters.com"`
    pub fn domain(&self) -> Option<String> {
        url::Url::parse(&self.url)
            .ok()
            .and_then(|u| u.host_str().map(strip_www))
    }
}

/// Remove a leading `www.` from a host name.
pub fn strip_www(host: &str) -> String {
    host.strip_prefix("www.").unwrap_or(host).to_string()
}

/// A search query used by the DuckDuckGo and Google News scrapers.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Topic {
    pub query: String,
    pub category: String,
    /// 1-10, lower runs first.
    pub priority: i32,
    pub active: bool,
    pub created: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
}

/// A registered RSS/Atom feed. Identity is the `(site, rss)` pair.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct FeedSource {
    /// Website host, e.g. `www.ft.com`.
    pub site: String,
    /// Feed URL.
    #[serde(rename = "RSS")]
    pub rss: String,
    /// Display name stored as the article `source`.
    pub source: String,
    pub active: bool,
    pub category: String,
    pub added_date: Option<DateTime<Utc>>,
    pub last_updated: Option<DateTime<Utc>>,
}

/// Per-store outcome of [`crate::storage::save_to_all_dbs`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SaveSummary {
    /// Documents upserted or modified in MongoDB.
    pub mongodb: usize,
    /// Rows inserted into ClickHouse.
    pub clickhouse: usize,
    /// Articles dropped because a store already had their URL.
    pub skipped: usize,
    /// Distinct articles persisted (the mirror duplicates the primary).
    pub total: usize,
}

impl fmt::Display for SaveSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "MongoDB: {} articles, ClickHouse: {} articles ({} skipped)",
            self.mongodb, self.clickhouse, self.skipped
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn article(url: &str) -> Article {
        Article {
            url: url.to_string(),
            title: "Fed holds rates".to_string(),
            body: "The Federal Reserve left rates unchanged".to_string(),
            date: Utc.with_ymd_and_hms(2025, 3, 19, 18, 0, 0).unwrap(),
            source: "Reuters".to_string(),
            search_key: Some("FED".to_string()),
            image: None,
        }
    }

    #[test]
    fn test_article_serializes_search_key_in_camel_case() {
        let json = serde_json::to_string(&article("https://example.com/a")).unwrap();
        assert!(json.contains("\"searchKey\":\"FED\""));
        assert!(!json.contains("search_key"));
    }

    #[test]
    fn test_article_domain_strips_www() {
        assert_eq!(
            article("https://www.reuters.com/markets/fed").domain(),
            Some("reuters.com".to_string())
        );
        assert_eq!(
            article("https://lite.cnn.com/x").domain(),
            Some("lite.cnn.com".to_string())
        );
        assert_eq!(article("not a url").domain(), None);
    }

    #[test]
    fn test_feed_source_uses_rss_key() {
        let json = r#"{
            "site": "www.ft.com",
            "RSS": "https://www.ft.com/news-feed?format=rss",
            "source": "FinancialTimes",
            "active": true,
            "category": "finance",
            "added_date": null,
            "last_updated": null
        }"#;
        let source: FeedSource = serde_json::from_str(json).unwrap();
        assert_eq!(source.rss, "https://www.ft.com/news-feed?format=rss");
        assert!(source.active);
    }

    #[test]
    fn test_save_summary_display() {
        let summary = SaveSummary {
            mongodb: 4,
            clickhouse: 3,
            skipped: 2,
            total: 4,
        };
        assert_eq!(
            summary.to_string(),
            "MongoDB: 4 articles, ClickHouse: 3 articles (2 skipped)"
        );
    }
}
