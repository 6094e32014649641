//! Feed discovery from the stored corpus.
//!
//! Domains that keep showing up in recent articles (as the article URL or
//! as links inside title/body) are good candidates for a direct feed. For
//! each unregistered candidate the home page is searched for feed links and
//! a list of common feed paths is probed:
//!
//! 1. `<link type="application/rss+xml|atom+xml" href>` on the home page
//! 2. `<a>` elements whose text mentions rss, feed or atom
//! 3. [`FEED_PATHS`] probed with `HEAD`, kept only when the body parses as a
//!    feed with at least one entry
//!
//! Suggestions can be registered with category `discovered`.

use itertools::Itertools;
use mongodb::Database;
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::Client;
use scraper::{Html, Selector};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::error::Error;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, error, info, instrument};
use url::Url;

use crate::catalog::sources;
use crate::models::{Article, strip_www};
use crate::scrapers::build_client;
use crate::scrapers::feed::{looks_like_feed, parse_feed};
use crate::storage::MongoStore;

pub const DISCOVERED_CATEGORY: &str = "discovered";
pub const UNTITLED_FEED: &str = "Untitled Feed";

pub const FEED_PATHS: [&str; 21] = [
    "/rss",
    "/feed",
    "/feeds",
    "/rss.xml",
    "/atom.xml",
    "/feed.xml",
    "/index.xml",
    "/feeds/posts/default",
    "/sitemap.xml",
    "/news/feed",
    "/news/rss",
    "/blog/feed",
    "/blog/rss",
    "/rss/all.xml",
    "/feed/podcast",
    "/news.rss",
    "/feed/atom",
    "/feeds/news",
    "/feeds/latest",
    "/home/feed",
    "/home/rss",
];

static URL_IN_TEXT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"https?://(?:[-\w.]|(?:%[\da-fA-F]{2}))+").expect("static regex"));

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FeedLink {
    pub url: String,
    pub title: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SuggestedSource {
    pub domain: String,
    pub feed_url: String,
    pub feed_title: String,
    /// Occurrences of the domain in recent articles.
    pub references: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoverOptions {
    pub days: i64,
    pub min_occurrence: usize,
    /// Domains checked at most.
    pub limit: usize,
    /// Pause between domains.
    pub pause: Duration,
    pub timeout: Duration,
}

impl Default for DiscoverOptions {
    fn default() -> Self {
        Self {
            days: 30,
            min_occurrence: 3,
            limit: 20,
            pause: Duration::from_secs(2),
            timeout: Duration::from_secs(10),
        }
    }
}

fn host_of(url: &str) -> Option<String> {
    Url::parse(url)
        .ok()?
        .host_str()
        .filter(|h| !h.is_empty())
        .map(strip_www)
}

/// Occurrences of every domain, from article URLs and URLs quoted in the text.
pub fn count_domains(articles: &[Article]) -> HashMap<String, usize> {
    let mut counts = HashMap::new();
    for article in articles {
        let text = format!("{} {}", article.title, article.body);
        let hosts = article
            .domain()
            .into_iter()
            .chain(URL_IN_TEXT.find_iter(&text).filter_map(|m| host_of(m.as_str())));
        for host in hosts {
            *counts.entry(host).or_insert(0) += 1;
        }
    }
    counts
}

/// Domains with at least `min_occurrence` hits that are not registered yet,
/// most referenced first.
pub fn rank_domains(
    counts: HashMap<String, usize>,
    min_occurrence: usize,
    existing: &HashSet<String>,
) -> Vec<(String, usize)> {
    counts
        .into_iter()
        .filter(|(domain, n)| *n >= min_occurrence && !existing.contains(domain))
        .sorted_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)))
        .collect()
}

/// Feed links advertised by a home page, resolved against `base`.
pub fn feed_links_in_page(html: &str, base: &Url) -> Vec<FeedLink> {
    let document = Html::parse_document(html);
    let feed_link = Selector::parse("link[type][href]").expect("static selector");
    let anchor = Selector::parse("a[href]").expect("static selector");
    let mut links = Vec::new();

    for el in document.select(&feed_link) {
        let kind = el.value().attr("type").unwrap_or_default().to_lowercase();
        if !(kind.contains("rss") || kind.contains("atom")) {
            continue;
        }
        if let Some(url) = el.value().attr("href").and_then(|h| base.join(h).ok()) {
            let title = el.value().attr("title").unwrap_or(UNTITLED_FEED);
            links.push(FeedLink {
                url: url.to_string(),
                title: title.to_string(),
            });
        }
    }

    for el in document.select(&anchor) {
        let text = el.text().collect::<String>().trim().to_string();
        let lower = text.to_lowercase();
        if !(lower.contains("rss") || lower.contains("feed") || lower.contains("atom")) {
            continue;
        }
        if let Some(url) = el.value().attr("href").and_then(|h| base.join(h).ok()) {
            links.push(FeedLink {
                url: url.to_string(),
                title: if text.is_empty() { UNTITLED_FEED.to_string() } else { text },
            });
        }
    }
    links
}

fn dedupe_links(links: Vec<FeedLink>) -> Vec<FeedLink> {
    links.into_iter().unique_by(|l| l.url.clone()).collect()
}

/// Probe `path` under `base`; returns the feed when it exists and has entries.
async fn probe_feed_path(client: &Client, base: &Url, path: &str) -> Result<Option<FeedLink>, Box<dyn Error>> {
    let url = base.join(path)?;
    if !client.head(url.clone()).send().await?.status().is_success() {
        return Ok(None);
    }
    let body = client.get(url.clone()).send().await?.text().await?;
    if !looks_like_feed(&body) {
        return Ok(None);
    }
    let feed = parse_feed(&body)?;
    if feed.entries.is_empty() {
        return Ok(None);
    }
    Ok(Some(FeedLink {
        url: url.to_string(),
        title: feed.title.unwrap_or_else(|| UNTITLED_FEED.to_string()),
    }))
}

/// All feeds found for `domain` (served from `www.<domain>`).
#[instrument(level = "info", skip(client))]
pub async fn check_rss_feeds(client: &Client, domain: &str) -> Vec<FeedLink> {
    if domain.is_empty() {
        return Vec::new();
    }
    let host = if domain.starts_with("www.") {
        domain.to_string()
    } else {
        format!("www.{domain}")
    };
    let base = match Url::parse(&format!("https://{host}")) {
        Ok(u) => u,
        Err(e) => {
            error!(error = %e, "Invalid domain");
            return Vec::new();
        }
    };

    let mut feeds = Vec::new();
    match client.get(base.clone()).send().await {
        Ok(resp) if resp.status().is_success() => match resp.text().await {
            Ok(html) => feeds.extend(feed_links_in_page(&html, &base)),
            Err(e) => debug!(error = %e, "Failed to read home page"),
        },
        Ok(resp) => debug!(status = %resp.status(), "Home page not available"),
        Err(e) => error!(error = %e, "Error checking RSS feeds"),
    }

    for path in FEED_PATHS {
        match probe_feed_path(client, &base, path).await {
            Ok(Some(feed)) => {
                info!(url = %feed.url, title = %feed.title, "Found valid RSS feed");
                feeds.push(feed);
            }
            Ok(None) => {}
            Err(e) => debug!(path, error = %e, "Error checking feed path"),
        }
    }
    dedupe_links(feeds)
}

/// Rank recent domains and look for feeds on the unregistered ones.
#[instrument(level = "info", skip(mongo))]
pub async fn suggest_new_sources(
    mongo: &MongoStore,
    opts: &DiscoverOptions,
) -> Result<Vec<SuggestedSource>, Box<dyn Error>> {
    let articles = mongo.recent_articles(opts.days).await?;
    info!(count = articles.len(), days = opts.days, "Loaded recent articles");

    let existing: HashSet<String> = sources::list_sources(mongo.database(), false, None)
        .await?
        .iter()
        .map(|s| strip_www(&s.site))
        .collect();
    let candidates = rank_domains(count_domains(&articles), opts.min_occurrence, &existing);
    info!(
        candidates = candidates.len(),
        existing = existing.len(),
        "Found new potential source domains"
    );

    let client = build_client(None, opts.timeout)?;
    let mut suggestions = Vec::new();
    for (i, (domain, references)) in candidates.into_iter().take(opts.limit).enumerate() {
        if i > 0 {
            sleep(opts.pause).await;
        }
        info!(%domain, references, "Checking domain");
        let feeds = check_rss_feeds(&client, &domain).await;
        if feeds.is_empty() {
            info!(%domain, "No RSS feeds found");
            continue;
        }
        info!(%domain, count = feeds.len(), "Found RSS feeds");
        suggestions.extend(feeds.into_iter().map(|f| SuggestedSource {
            domain: domain.clone(),
            feed_url: f.url,
            feed_title: f.title,
            references,
        }));
    }
    Ok(suggestions)
}

/// Register a suggestion as `www.<domain>`. `false` when it already exists.
pub async fn add_suggested_source(
    db: &Database,
    source: &SuggestedSource,
    category: &str,
) -> Result<bool, Box<dyn Error>> {
    let site = if source.domain.starts_with("www.") {
        source.domain.clone()
    } else {
        format!("www.{}", source.domain)
    };
    Ok(sources::add_source(db, &site, &source.feed_url, &source.feed_title, category, true).await?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn article(url: &str, body: &str) -> Article {
        Article {
            url: url.to_string(),
            title: "t".to_string(),
            body: body.to_string(),
            date: Utc::now(),
            source: "s".to_string(),
            search_key: None,
            image: None,
        }
    }

    #[test]
    fn test_count_domains_from_urls_and_text() {
        let articles = vec![
            article("https://www.reuters.com/a", "see https://www.cnbc.com/x and http://cnbc.com/y"),
            article("https://reuters.com/b", ""),
            article("not a url", "nothing"),
        ];
        let counts = count_domains(&articles);
        assert_eq!(counts["reuters.com"], 2);
        assert_eq!(counts["cnbc.com"], 2);
        assert_eq!(counts.len(), 2);
    }

    #[test]
    fn test_rank_domains_filters_and_sorts() {
        let counts = HashMap::from([
            ("reuters.com".to_string(), 9),
            ("cnbc.com".to_string(), 4),
            ("ft.com".to_string(), 12),
            ("blog.example".to_string(), 1),
        ]);
        let existing = HashSet::from(["ft.com".to_string()]);
        let ranked = rank_domains(counts, 3, &existing);
        assert_eq!(
            ranked,
            vec![("reuters.com".to_string(), 9), ("cnbc.com".to_string(), 4)]
        );
    }

    #[test]
    fn test_feed_links_in_page() {
        let html = r#"<html><head>
            <link rel="alternate" type="application/rss+xml" title="Markets" href="/rss/markets.xml">
            <link rel="alternate" type="application/atom+xml" href="https://cdn.example.com/atom">
            <link rel="stylesheet" type="text/css" href="/style.css">
        </head><body>
            <a href="/feeds/all">RSS Feeds</a>
            <a href="/about">About us</a>
        </body></html>"#;
        let base = Url::parse("https://www.example.com").unwrap();
        let links = feed_links_in_page(html, &base);
        assert_eq!(
            links,
            vec![
                FeedLink {
                    url: "https://www.example.com/rss/markets.xml".to_string(),
                    title: "Markets".to_string()
                },
                FeedLink {
                    url: "https://cdn.example.com/atom".to_string(),
                    title: UNTITLED_FEED.to_string()
                },
                FeedLink {
                    url: "https://www.example.com/feeds/all".to_string(),
                    title: "RSS Feeds".to_string()
                },
            ]
        );
    }

    #[test]
    fn test_dedupe_links_keeps_first() {
        let a = FeedLink {
            url: "https://x/rss".to_string(),
            title: "A".to_string(),
        };
        let b = FeedLink {
            url: "https://x/rss".to_string(),
            title: "B".to_string(),
        };
        assert_eq!(dedupe_links(vec![a.clone(), b]), vec![a]);
    }
}
