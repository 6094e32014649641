//! RSS/Atom feed registry (`NewsSources`).
//!
//! A feed is identified by its `(site, RSS)` pair, enforced by a unique
//! index created together with the collection.

use chrono::Utc;
use futures::TryStreamExt;
use mongodb::bson::{Document, doc};
use mongodb::options::IndexOptions;
use mongodb::{Database, IndexModel};
use tracing::{info, instrument, warn};

use super::get_datetime;
use crate::models::FeedSource;
use crate::storage::StoreError;
use crate::storage::mongo::to_bson_date;

pub const SOURCES_COLLECTION: &str = "NewsSources";

/// `(site, feed url, source name, category)` seeded into a new collection.
pub const DEFAULT_SOURCES: [(&str, &str, &str, &str); 10] = [
    ("www.ft.com", "https://www.ft.com/news-feed?format=rss", "FinancialTimes", "finance"),
    ("www.wsj.com", "https://feeds.a.dj.com/rss/RSSMarketsMain.xml", "WallStreetJournal", "finance"),
    ("www.bloomberg.com", "https://feeds.bloomberg.com/markets/news.rss", "Bloomberg", "finance"),
    ("finance.yahoo.com", "https://finance.yahoo.com/news/rssindex", "YahooFinance", "finance"),
    ("www.marketwatch.com", "https://feeds.marketwatch.com/marketwatch/topstories/", "MarketWatch", "finance"),
    ("www.zerohedge.com", "https://feeds.feedburner.com/zerohedge/feed", "ZeroHedge", "finance"),
    ("www.politico.com", "https://rss.politico.com/economy.xml", "Politico", "politics"),
    ("www.politico.com", "https://rss.politico.com/politics-news.xml", "Politico", "politics"),
    ("www.politico.eu", "https://www.politico.eu/rss", "PoliticoEurope", "politics"),
    (
        "www.nasdaq.com",
        "https://nasdaqtrader.com/rss.aspx?feed=currentheadlines&categorylist=0",
        "Nasdaq Latest Articles",
        "finance",
    ),
];

/// Create the collection with its unique index and seed
/// [`DEFAULT_SOURCES`]. Does nothing when the collection already exists.
#[instrument(level = "info", skip_all)]
pub async fn initialize_sources(db: &Database) -> Result<usize, StoreError> {
    if db
        .list_collection_names()
        .await?
        .iter()
        .any(|name| name == SOURCES_COLLECTION)
    {
        return Ok(0);
    }

    info!(collection = SOURCES_COLLECTION, "Creating collection");
    db.create_collection(SOURCES_COLLECTION).await?;
    let coll = db.collection::<Document>(SOURCES_COLLECTION);
    coll.create_index(
        IndexModel::builder()
            .keys(doc! { "site": 1, "RSS": 1 })
            .options(IndexOptions::builder().unique(true).build())
            .build(),
    )
    .await?;

    let now = to_bson_date(Utc::now());
    let defaults: Vec<Document> = DEFAULT_SOURCES
        .iter()
        .map(|(site, rss, source, category)| {
            doc! {
                "site": *site,
                "RSS": *rss,
                "source": *source,
                "active": true,
                "category": *category,
                "added_date": now,
            }
        })
        .collect();
    let result = coll.insert_many(defaults).await?;
    info!(added = result.inserted_ids.len(), "Added default sources");
    Ok(result.inserted_ids.len())
}

/// Active feeds, optionally limited to one category.
pub async fn active_sources(db: &Database, category: Option<&str>) -> Result<Vec<FeedSource>, StoreError> {
    let sources = find_sources(db, source_filter(true, category), None).await?;
    info!(count = sources.len(), category = category.unwrap_or("all"), "Retrieved active sources");
    Ok(sources)
}

/// Feeds sorted by category.
pub async fn list_sources(
    db: &Database,
    active_only: bool,
    category: Option<&str>,
) -> Result<Vec<FeedSource>, StoreError> {
    find_sources(db, source_filter(active_only, category), Some(doc! { "category": 1 })).await
}

async fn find_sources(
    db: &Database,
    filter: Document,
    sort: Option<Document>,
) -> Result<Vec<FeedSource>, StoreError> {
    let coll = db.collection::<Document>(SOURCES_COLLECTION);
    let cursor = match sort {
        Some(sort) => coll.find(filter).sort(sort).await?,
        None => coll.find(filter).await?,
    };
    let docs: Vec<Document> = cursor.try_collect().await?;
    Ok(docs.iter().filter_map(document_to_source).collect())
}

/// Register a feed. Returns `false` when the `(site, rss)` pair exists.
#[instrument(level = "info", skip(db))]
pub async fn add_source(
    db: &Database,
    site: &str,
    rss: &str,
    name: &str,
    category: &str,
    active: bool,
) -> Result<bool, StoreError> {
    let coll = db.collection::<Document>(SOURCES_COLLECTION);
    if coll.find_one(identity(site, rss)).await?.is_some() {
        warn!(site, rss, "Source already exists");
        return Ok(false);
    }
    let now = to_bson_date(Utc::now());
    coll.insert_one(doc! {
        "site": site,
        "RSS": rss,
        "source": name,
        "active": active,
        "category": category,
        "added_date": now,
        "last_updated": now,
    })
    .await?;
    info!(site, name, "Added new source");
    Ok(true)
}

/// Apply `updates` (a `$set` body) to a feed and stamp `last_updated`.
pub async fn update_source(
    db: &Database,
    site: &str,
    rss: &str,
    mut updates: Document,
) -> Result<bool, StoreError> {
    updates.insert("last_updated", to_bson_date(Utc::now()));
    let result = db
        .collection::<Document>(SOURCES_COLLECTION)
        .update_one(identity(site, rss), doc! { "$set": updates })
        .await?;
    if result.matched_count == 0 {
        warn!(site, rss, "Source not found");
    }
    Ok(result.matched_count > 0)
}

/// Flip the active flag, or set it when `active` is given. Returns the new
/// state, `None` when the feed does not exist.
pub async fn toggle_source(
    db: &Database,
    site: &str,
    rss: &str,
    active: Option<bool>,
) -> Result<Option<bool>, StoreError> {
    let coll = db.collection::<Document>(SOURCES_COLLECTION);
    let Some(current) = coll.find_one(identity(site, rss)).await? else {
        warn!(site, rss, "Source not found");
        return Ok(None);
    };
    let new_state = active.unwrap_or_else(|| !current.get_bool("active").unwrap_or(true));
    update_source(db, site, rss, doc! { "active": new_state }).await?;
    info!(site, rss, active = new_state, "Source state changed");
    Ok(Some(new_state))
}

pub async fn remove_source(db: &Database, site: &str, rss: &str) -> Result<bool, StoreError> {
    let result = db
        .collection::<Document>(SOURCES_COLLECTION)
        .delete_one(identity(site, rss))
        .await?;
    Ok(result.deleted_count > 0)
}

fn identity(site: &str, rss: &str) -> Document {
    doc! { "site": site, "RSS": rss }
}

pub fn source_filter(active_only: bool, category: Option<&str>) -> Document {
    let mut filter = Document::new();
    if active_only {
        filter.insert("active", true);
    }
    if let Some(category) = category {
        filter.insert("category", category);
    }
    filter
}

fn document_to_source(d: &Document) -> Option<FeedSource> {
    Some(FeedSource {
        site: d.get_str("site").ok()?.to_string(),
        rss: d.get_str("RSS").ok()?.to_string(),
        source: d.get_str("source").unwrap_or("Unknown").to_string(),
        active: d.get_bool("active").unwrap_or(true),
        category: d.get_str("category").unwrap_or("general").to_string(),
        added_date: get_datetime(d, "added_date"),
        last_updated: get_datetime(d, "last_updated"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_sources_are_unique() {
        let mut pairs: Vec<(&str, &str)> = DEFAULT_SOURCES.iter().map(|(s, r, _, _)| (*s, *r)).collect();
        pairs.sort();
        pairs.dedup();
        assert_eq!(pairs.len(), DEFAULT_SOURCES.len());
        assert!(DEFAULT_SOURCES.iter().all(|(_, rss, _, _)| rss.starts_with("https://")));
    }

    #[test]
    fn test_source_filter() {
        assert!(source_filter(false, None).is_empty());
        let f = source_filter(true, Some("politics"));
        assert!(f.get_bool("active").unwrap());
        assert_eq!(f.get_str("category").unwrap(), "politics");
    }

    #[test]
    fn test_document_to_source() {
        let d = doc! {
            "site": "www.politico.eu",
            "RSS": "https://www.politico.eu/rss",
            "source": "PoliticoEurope",
            "category": "politics",
        };
        let s = document_to_source(&d).unwrap();
        assert_eq!(s.rss, "https://www.politico.eu/rss");
        assert!(s.active);
        assert_eq!(s.added_date, None);
        assert!(document_to_source(&doc! { "site": "x" }).is_none());
    }
}
