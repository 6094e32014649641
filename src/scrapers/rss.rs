//! Registered RSS/Atom feeds.

use chrono::{DateTime, Utc};
use reqwest::Client;
use std::error::Error;
use tracing::{info, instrument, warn};

use super::feed::{FeedEntry, parse_feed};
use crate::models::{Article, FeedSource};
use crate::normalize::{NO_SUMMARY, standardize_date, strip_html};

/// Download and parse one feed.
#[instrument(level = "info", skip_all, fields(source = %source.source, rss = %source.rss))]
pub async fn fetch_feed(client: &Client, source: &FeedSource) -> Result<Vec<Article>, Box<dyn Error>> {
    let xml = client
        .get(&source.rss)
        .send()
        .await?
        .error_for_status()?
        .text()
        .await?;
    let feed = parse_feed(&xml)?;
    info!(entries = feed.entries.len(), "Found entries in feed");
    Ok(to_articles(feed.entries, &source.source, Utc::now()))
}

/// Map feed entries to articles.
///
/// Entries without a link are dropped. The body is the summary, then the
/// full content, then a placeholder. Undated entries get `now`.
pub fn to_articles(entries: Vec<FeedEntry>, source_name: &str, now: DateTime<Utc>) -> Vec<Article> {
    entries
        .into_iter()
        .filter_map(|e| {
            if e.link.is_empty() {
                warn!(title = %e.title, "Entry without link; skipping");
                return None;
            }
            let body = [&e.summary, &e.content]
                .into_iter()
                .map(|s| strip_html(s))
                .find(|s| !s.is_empty())
                .unwrap_or_else(|| NO_SUMMARY.to_string());
            let date = e
                .published
                .as_deref()
                .and_then(standardize_date)
                .unwrap_or(now);
            Some(Article {
                url: e.link,
                title: strip_html(&e.title),
                body,
                date,
                source: source_name.to_string(),
                search_key: None,
                image: None,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn entry(link: &str, summary: &str, content: &str, published: Option<&str>) -> FeedEntry {
        FeedEntry {
            title: "<b>Headline</b>".to_string(),
            link: link.to_string(),
            summary: summary.to_string(),
            content: content.to_string(),
            published: published.map(str::to_string),
            ..FeedEntry::default()
        }
    }

    #[test]
    fn test_to_articles() {
        let now = Utc.with_ymd_and_hms(2025, 6, 11, 8, 0, 0).unwrap();
        let entries = vec![
            entry("https://ft.com/a", "<p>Summary</p>", "", Some("Tue, 10 Jun 2025 14:30:00 +0000")),
            entry("https://ft.com/b", "", "Full content", Some("not a date")),
            entry("https://ft.com/c", "", "", None),
            entry("", "orphan", "", None),
        ];
        let articles = to_articles(entries, "FinancialTimes", now);
        assert_eq!(articles.len(), 3);

        assert_eq!(articles[0].title, "Headline");
        assert_eq!(articles[0].body, "Summary");
        assert_eq!(articles[0].date, Utc.with_ymd_and_hms(2025, 6, 10, 14, 30, 0).unwrap());
        assert_eq!(articles[0].source, "FinancialTimes");
        assert_eq!(articles[0].search_key, None);

        assert_eq!(articles[1].body, "Full content");
        assert_eq!(articles[1].date, now);
        assert_eq!(articles[2].body, NO_SUMMARY);
    }
}
