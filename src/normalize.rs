//! Cleaning and deduplication applied to every scraped batch before it is
//! handed to the stores.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use itertools::Itertools;
use scraper::Html;

use crate::models::Article;

/// Press-kit blurb some aggregators return instead of an article excerpt.
pub const BLOOMBERG_BOILERPLATE: &str = "Connecting decision makers to a dynamic network";

/// Body used for feed entries that carry no summary.
pub const NO_SUMMARY: &str = "No Summary Available";

/// Normalize a scraped batch.
///
/// Newest copy of each URL wins; the result is ordered oldest first and
/// boilerplate-only entries are dropped. URL is part of the full-row key, so
/// deduping on URL alone also removes exact duplicate rows.
pub fn process_articles(articles: Vec<Article>) -> Vec<Article> {
    let mut articles = articles;
    articles.sort_by(|a, b| b.date.cmp(&a.date));

    let mut news = dedupe_by_url(articles);
    news.sort_by(|a, b| a.date.cmp(&b.date));
    news.retain(|a| !a.body.contains(BLOOMBERG_BOILERPLATE));
    news
}

/// Keep the first article per URL, dropping articles with an empty URL.
pub fn dedupe_by_url(articles: Vec<Article>) -> Vec<Article> {
    articles
        .into_iter()
        .filter(|a| !a.url.trim().is_empty())
        .unique_by(|a| a.url.clone())
        .collect()
}

/// Parse the date formats seen in feeds and APIs into UTC.
///
/// Offsets are honored; naive timestamps are taken as UTC.
pub fn standardize_date(raw: &str) -> Option<DateTime<Utc>> {
    let s = raw.trim();
    if s.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc2822(s) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%d %H:%M:%S %z", "%a, %d %b %Y %H:%M:%S %z"] {
        if let Ok(dt) = DateTime::parse_from_str(s, fmt) {
            return Some(dt.with_timezone(&Utc));
        }
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(naive.and_utc());
        }
    }
    for fmt in ["%Y-%m-%d", "%d/%m/%Y", "%m/%d/%Y"] {
        if let Ok(date) = NaiveDate::parse_from_str(s, fmt) {
            return date.and_hms_opt(0, 0, 0).map(|n| n.and_utc());
        }
    }
    None
}

/// Plain text of an HTML fragment with whitespace collapsed.
pub fn strip_html(fragment: &str) -> String {
    if !fragment.contains('<') && !fragment.contains('&') {
        return fragment.split_whitespace().join(" ");
    }
    let html = Html::parse_fragment(fragment);
    html.root_element().text().collect::<String>().split_whitespace().join(" ")
}
