//! Search topics.
//!
//! Each topic is a query string with a category and a priority (1-10, lower
//! runs first). Topics live in the `Topics` collection; every query is also
//! upserted into the older `Queries` collection, which other tooling still
//! reads.

use chrono::Utc;
use futures::TryStreamExt;
use mongodb::Database;
use mongodb::bson::{Bson, Document, doc};
use tracing::{info, instrument, warn};

use super::get_datetime;
use crate::models::Topic;
use crate::storage::StoreError;
use crate::storage::mongo::to_bson_date;

pub const TOPICS_COLLECTION: &str = "Topics";
pub const QUERIES_COLLECTION: &str = "Queries";
pub const DEFAULT_CATEGORY: &str = "general";
pub const DEFAULT_PRIORITY: i32 = 5;

/// Seed topics by category.
pub const DEFAULT_TOPICS: &[(&str, &[&str])] = &[
    (
        "markets",
        &[
            "Stock Market",
            "Bonds",
            "Futures",
            "Bond Market",
            "S&P500",
            "Nasdaq composite index",
            "DAX",
            "FTSE",
            "CAC",
            "BTP",
            "BUND",
            "Nikkei",
            "TBond",
            "BONOS",
            "Treasury",
            "OAT",
        ],
    ),
    (
        "economy",
        &[
            "Macroeconomic",
            "Fiscal Policy",
            "Monetary Policy",
            "FED",
            "ECB",
            "BOJ",
            "BoE",
            "Unemployment",
            "Inflation",
            "Economic Calendar",
            "Wages",
            "Consumer Confidence",
            "Powell",
            "Lagarde",
            "Economy",
            "Earnings",
        ],
    ),
    (
        "geopolitics",
        &["Trump", "Russia", "Putin", "China", "Xijinping", "Iran", "Israel"],
    ),
    (
        "commodities",
        &["OIL", "WTI", "Brent", "Silver", "Copper", "Gold", "Commodities"],
    ),
    (
        "currencies",
        &[
            "Exchange Rates",
            "Currencies",
            "USD",
            "EUR",
            "YEN",
            "Dollar",
            "CHF",
            "GBP",
            "CNY",
            "AUD",
            "JPY",
            "NZD",
        ],
    ),
];

/// Seed [`DEFAULT_TOPICS`] when the collection is empty. Returns how many
/// topics were added.
#[instrument(level = "info", skip_all)]
pub async fn initialize_topics(db: &Database) -> Result<usize, StoreError> {
    let coll = db.collection::<Document>(TOPICS_COLLECTION);
    if coll.count_documents(doc! {}).await? > 0 {
        return Ok(0);
    }
    info!("Initializing topics collection with defaults");
    let mut added = 0;
    for (category, queries) in DEFAULT_TOPICS {
        for query in *queries {
            if add_topic(db, query, category, DEFAULT_PRIORITY, true).await? {
                added += 1;
            }
        }
    }
    Ok(added)
}

/// Topics sorted by priority.
pub async fn list_topics(
    db: &Database,
    category: Option<&str>,
    include_inactive: bool,
) -> Result<Vec<Topic>, StoreError> {
    let cursor = db
        .collection::<Document>(TOPICS_COLLECTION)
        .find(topic_filter(!include_inactive, category))
        .sort(doc! { "priority": 1 })
        .await?;
    let docs: Vec<Document> = cursor.try_collect().await?;
    Ok(docs.iter().filter_map(document_to_topic).collect())
}

/// Query strings of active topics, highest priority first.
pub async fn active_queries(db: &Database, category: Option<&str>) -> Result<Vec<String>, StoreError> {
    Ok(list_topics(db, category, false)
        .await?
        .into_iter()
        .map(|t| t.query)
        .collect())
}

/// Insert a topic, or update category, priority and state of an existing one.
///
/// The query is trimmed; an empty query is rejected.
#[instrument(level = "info", skip(db))]
pub async fn add_topic(
    db: &Database,
    query: &str,
    category: &str,
    priority: i32,
    active: bool,
) -> Result<bool, StoreError> {
    let query = valid_query(query)?;
    let coll = db.collection::<Document>(TOPICS_COLLECTION);
    let now = to_bson_date(Utc::now());

    let stored = if coll.find_one(doc! { "query": query }).await?.is_some() {
        let result = coll
            .update_one(
                doc! { "query": query },
                doc! { "$set": {
                    "category": category,
                    "priority": priority,
                    "active": active,
                    "last_updated": now,
                } },
            )
            .await?;
        result.matched_count > 0
    } else {
        coll.insert_one(doc! {
            "query": query,
            "category": category,
            "priority": priority,
            "active": active,
            "created": now,
            "last_updated": now,
        })
        .await?;
        true
    };

    db.collection::<Document>(QUERIES_COLLECTION)
        .update_one(doc! { "Query": query }, doc! { "$set": { "Query": query } })
        .upsert(true)
        .await?;
    Ok(stored)
}

pub async fn remove_topic(db: &Database, query: &str) -> Result<bool, StoreError> {
    let query = valid_query(query)?;
    let result = db
        .collection::<Document>(TOPICS_COLLECTION)
        .delete_one(doc! { "query": query })
        .await?;
    db.collection::<Document>(QUERIES_COLLECTION)
        .delete_one(doc! { "Query": query })
        .await?;
    Ok(result.deleted_count > 0)
}

/// Flip the active flag, or set it when `active` is given. Returns the new
/// state, `None` when the topic does not exist.
pub async fn toggle_topic(
    db: &Database,
    query: &str,
    active: Option<bool>,
) -> Result<Option<bool>, StoreError> {
    let query = valid_query(query)?;
    let coll = db.collection::<Document>(TOPICS_COLLECTION);
    let Some(topic) = coll.find_one(doc! { "query": query }).await? else {
        warn!(query, "Topic not found");
        return Ok(None);
    };
    let new_state = active.unwrap_or_else(|| !topic.get_bool("active").unwrap_or(true));
    coll.update_one(
        doc! { "query": query },
        doc! { "$set": { "active": new_state, "last_updated": to_bson_date(Utc::now()) } },
    )
    .await?;
    Ok(Some(new_state))
}

pub async fn update_priority(db: &Database, query: &str, priority: i32) -> Result<bool, StoreError> {
    set_field(db, query, "priority", Bson::Int32(priority)).await
}

pub async fn update_category(db: &Database, query: &str, category: &str) -> Result<bool, StoreError> {
    set_field(db, query, "category", Bson::String(category.to_string())).await
}

async fn set_field(db: &Database, query: &str, key: &str, value: Bson) -> Result<bool, StoreError> {
    let query = valid_query(query)?;
    let mut update = doc! { "last_updated": to_bson_date(Utc::now()) };
    update.insert(key, value);
    let result = db
        .collection::<Document>(TOPICS_COLLECTION)
        .update_one(doc! { "query": query }, doc! { "$set": update })
        .await?;
    Ok(result.matched_count > 0)
}

fn valid_query(query: &str) -> Result<&str, StoreError> {
    let query = query.trim();
    if query.is_empty() {
        return Err(StoreError::Other("topic query cannot be empty".to_string()));
    }
    Ok(query)
}

pub fn topic_filter(active_only: bool, category: Option<&str>) -> Document {
    let mut filter = Document::new();
    if active_only {
        filter.insert("active", true);
    }
    if let Some(category) = category {
        filter.insert("category", category);
    }
    filter
}

fn document_to_topic(d: &Document) -> Option<Topic> {
    let created = get_datetime(d, "created").unwrap_or_default();
    Some(Topic {
        query: d.get_str("query").ok()?.to_string(),
        category: d.get_str("category").unwrap_or(DEFAULT_CATEGORY).to_string(),
        priority: match d.get("priority") {
            Some(Bson::Int32(n)) => *n,
            Some(Bson::Int64(n)) => *n as i32,
            Some(Bson::Double(n)) => *n as i32,
            _ => DEFAULT_PRIORITY,
        },
        active: d.get_bool("active").unwrap_or(true),
        created,
        last_updated: get_datetime(d, "last_updated").unwrap_or(created),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_default_topics() {
        let all: Vec<&str> = DEFAULT_TOPICS.iter().flat_map(|(_, q)| q.iter().copied()).collect();
        assert_eq!(all.len(), 58);
        assert!(all.contains(&"S&P500"));
        let categories: Vec<&str> = DEFAULT_TOPICS.iter().map(|(c, _)| *c).collect();
        assert_eq!(
            categories,
            vec!["markets", "economy", "geopolitics", "commodities", "currencies"]
        );
    }

    #[test]
    fn test_topic_filter() {
        assert!(topic_filter(false, None).is_empty());
        let f = topic_filter(true, Some("economy"));
        assert_eq!(f.get_bool("active").unwrap(), true);
        assert_eq!(f.get_str("category").unwrap(), "economy");
    }

    #[test]
    fn test_valid_query() {
        assert_eq!(valid_query("  Gold ").unwrap(), "Gold");
        assert!(valid_query("   ").is_err());
    }

    #[test]
    fn test_document_to_topic_defaults() {
        let created = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        let d = doc! {
            "query": "Gold",
            "priority": 2i64,
            "created": to_bson_date(created),
        };
        let t = document_to_topic(&d).unwrap();
        assert_eq!(t.category, "general");
        assert_eq!(t.priority, 2);
        assert!(t.active);
        assert_eq!(t.last_updated, created);
        assert!(document_to_topic(&doc! { "category": "x" }).is_none());
    }
}
