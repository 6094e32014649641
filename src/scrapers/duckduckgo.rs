//! DuckDuckGo news search.
//!
//! The `news.js` endpoint needs a `vqd` token that DuckDuckGo embeds in the
//! landing page for the same query, so every search is two requests:
//!
//! 1. `GET https://duckduckgo.com/?q=<query>` and pull `vqd` out of the page
//! 2. `GET https://duckduckgo.com/news.js?q=<query>&vqd=<token>&df=<d|w|m|y>`
//!
//! Results come back as JSON, ~30 per page; the `next` field signals more.

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::Client;
use serde::Deserialize;
use std::error::Error;
use tracing::{debug, info, instrument};
use url::Url;

use crate::models::Article;
use crate::normalize::strip_html;

const LANDING_URL: &str = "https://duckduckgo.com/";
const NEWS_URL: &str = "https://duckduckgo.com/news.js";
const MAX_PAGES: usize = 5;

static VQD_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"vqd=["']?([0-9-]+)["']?"#).expect("static regex"));

#[derive(Debug, Deserialize)]
struct NewsPage {
    #[serde(default)]
    results: Vec<NewsResult>,
    next: Option<String>,
}

#[derive(Debug, Deserialize)]
struct NewsResult {
    /// Unix seconds.
    date: Option<i64>,
    #[serde(default)]
    title: String,
    #[serde(default)]
    excerpt: String,
    #[serde(default)]
    url: String,
    image: Option<String>,
    #[serde(default)]
    source: String,
}

/// Extract the `vqd` token from the landing page HTML.
pub fn extract_vqd(html: &str) -> Option<String> {
    VQD_RE.captures(html).map(|c| c[1].to_string())
}

#[instrument(level = "debug", skip(client))]
async fn fetch_vqd(client: &Client, query: &str) -> Result<String, Box<dyn Error>> {
    let html = client
        .get(LANDING_URL)
        .query(&[("q", query)])
        .send()
        .await?
        .error_for_status()?
        .text()
        .await?;
    extract_vqd(&html).ok_or_else(|| format!("no vqd token for {query:?}").into())
}

/// Search news for `query`, returning at most `max_results` articles tagged
/// with the query.
#[instrument(level = "info", skip(client))]
pub async fn search(
    client: &Client,
    query: &str,
    max_results: usize,
    timelimit: &str,
) -> Result<Vec<Article>, Box<dyn Error>> {
    let vqd = fetch_vqd(client, query).await?;
    let fetched_at = Utc::now();
    let mut articles = Vec::new();
    let mut offset = 0usize;

    for page in 0..MAX_PAGES {
        let mut url = Url::parse_with_params(
            NEWS_URL,
            &[
                ("l", "us-en"),
                ("o", "json"),
                ("noamp", "1"),
                ("q", query),
                ("vqd", vqd.as_str()),
                ("p", "-1"),
                ("df", timelimit),
            ],
        )?;
        if offset > 0 {
            url.query_pairs_mut().append_pair("s", &offset.to_string());
        }

        let body: NewsPage = client
            .get(url)
            .header("Referer", LANDING_URL)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        debug!(page, results = body.results.len(), "DuckDuckGo page");

        let page_len = body.results.len();
        articles.extend(to_articles(body.results, query, fetched_at));
        offset += page_len;
        if page_len == 0 || body.next.is_none() || articles.len() >= max_results {
            break;
        }
    }

    articles.truncate(max_results);
    info!(count = articles.len(), "DuckDuckGo results");
    Ok(articles)
}

fn to_articles(results: Vec<NewsResult>, query: &str, fetched_at: DateTime<Utc>) -> Vec<Article> {
    results
        .into_iter()
        .filter(|r| !r.url.is_empty())
        .map(|r| Article {
            url: r.url,
            title: strip_html(&r.title),
            body: strip_html(&r.excerpt),
            date: r
                .date
                .and_then(|secs| DateTime::from_timestamp(secs, 0))
                .unwrap_or(fetched_at),
            source: r.source,
            search_key: Some(query.to_string()),
            image: r.image.filter(|i| !i.is_empty()),
        })
        .collect()
}
