//! Google News search through its public RSS endpoint.
//!
//! Search results carry no reliable timestamp of their own, so every article
//! is stamped with the fetch time. `source` is the publisher home page taken
//! from the item's `<source url>`.

use chrono::{DateTime, Utc};
use reqwest::Client;
use std::error::Error;
use tracing::{info, instrument};
use url::Url;

use super::feed::{FeedEntry, parse_feed};
use crate::models::Article;
use crate::normalize::strip_html;

const SEARCH_URL: &str = "https://news.google.com/rss/search";

/// Google's `when:` operator for a DuckDuckGo-style time limit.
pub fn when_operator(timelimit: &str) -> String {
    match timelimit {
        "d" => "1d".to_string(),
        "w" => "7d".to_string(),
        "m" => "30d".to_string(),
        "y" => "1y".to_string(),
        other => other.to_string(),
    }
}

/// `https://news.google.com/rss/search?q=<query> when:1d&hl=en-US&gl=US&ceid=US:en`
pub fn search_url(query: &str, timelimit: &str) -> Result<Url, url::ParseError> {
    let q = format!("{query} when:{}", when_operator(timelimit));
    Url::parse_with_params(
        SEARCH_URL,
        &[("q", q.as_str()), ("hl", "en-US"), ("gl", "US"), ("ceid", "US:en")],
    )
}

#[instrument(level = "info", skip(client))]
pub async fn search(
    client: &Client,
    query: &str,
    max_results: usize,
    timelimit: &str,
) -> Result<Vec<Article>, Box<dyn Error>> {
    let xml = client
        .get(search_url(query, timelimit)?)
        .send()
        .await?
        .error_for_status()?
        .text()
        .await?;
    let feed = parse_feed(&xml)?;
    let mut articles = to_articles(feed.entries, query, Utc::now());
    articles.truncate(max_results);
    info!(count = articles.len(), "Google News results");
    Ok(articles)
}

fn to_articles(entries: Vec<FeedEntry>, query: &str, fetched_at: DateTime<Utc>) -> Vec<Article> {
    entries
        .into_iter()
        .filter(|e| !e.link.is_empty())
        .map(|e| Article {
            url: e.link,
            title: strip_html(&e.title),
            body: strip_html(&e.summary),
            date: fetched_at,
            source: e.source_url.unwrap_or_default(),
            search_key: Some(query.to_string()),
            image: None,
        })
        .collect()
}
