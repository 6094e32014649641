//! Article persistence: MongoDB as the primary store, ClickHouse as an
//! optional mirror, and the pipeline that writes one scraped batch to both.
//!
//! # Write pipeline
//!
//! [`save_to_all_dbs`] is the only entry point the scrapers use:
//!
//! 1. drop articles without a URL and collapse in-batch duplicates;
//! 2. when `check_across_dbs` is set, ask each store which URLs it already
//!    holds (the two reads run concurrently);
//! 3. build one write set per enabled store: articles the store lacks, or
//!    the whole batch when its existence check failed (each store has its own guard:
//!    Mongo upserts by URL, ClickHouse re-checks before inserting);
//! 4. write both sets concurrently, each store retrying on its own; a store
//!    that fails reports 0 without affecting the other.
//!
//! Articles present in every enabled store are counted as `skipped`. Concurrent
//! scraper processes may race on the same URL; Mongo resolves it as
//! last-write-wins through the upsert filter.

pub mod clickhouse;
pub mod migrate;
pub mod mongo;

use std::collections::HashSet;
use thiserror::Error;
use tracing::{error, info, instrument};

use crate::models::{Article, SaveSummary};
use crate::normalize::dedupe_by_url;

pub use self::clickhouse::ClickHouseStore;
pub use self::mongo::MongoStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("MongoDB error: {0}")]
    Mongo(#[from] mongodb::error::Error),

    #[error("ClickHouse error: {0}")]
    ClickHouse(#[from] ::clickhouse::error::Error),

    #[error("table {0} is not available for inserts")]
    TableUnavailable(String),

    #[error("document has no `{0}` field")]
    MissingField(&'static str),

    #[error("{0}")]
    Other(String),
}

/// Keyword search over stored articles.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchQuery {
    /// Matched case-insensitively against title and body.
    pub text: String,
    /// Only articles newer than this many days.
    pub days: i64,
    /// Restrict to these `source` values when non-empty.
    pub sources: Vec<String>,
    pub limit: usize,
}

impl Default for SearchQuery {
    fn default() -> Self {
        Self {
            text: String::new(),
            days: 7,
            sources: Vec::new(),
            limit: 20,
        }
    }
}

/// A store that can answer "which of these URLs do you have" and accept
/// upserts keyed by URL.
pub trait ArticleStore {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// The subset of `urls` already stored.
    async fn existing_urls(&self, urls: &[String]) -> Result<HashSet<String>, StoreError>;

    /// Persist `articles`, returning how many rows changed.
    async fn upsert_articles(&self, articles: &[Article]) -> Result<usize, StoreError>;
}

/// Write one scraped batch to the primary store and the optional mirror.
///
/// Either store may be `None` (disabled). See the module docs for the exact
/// dedup semantics.
#[instrument(level = "info", skip_all, fields(batch = articles.len(), check_across_dbs))]
pub async fn save_to_all_dbs<M, C>(
    mongo: Option<&M>,
    clickhouse: Option<&C>,
    articles: Vec<Article>,
    check_across_dbs: bool,
) -> SaveSummary
where
    M: ArticleStore,
    C: ArticleStore,
{
    let mut summary = SaveSummary::default();
    if articles.is_empty() {
        info!("No articles to save");
        return summary;
    }

    let incoming = articles.len();
    let batch = dedupe_by_url(articles);
    if batch.len() < incoming {
        info!(dropped = incoming - batch.len(), "Dropped in-batch duplicates");
    }
    if batch.is_empty() {
        return summary;
    }

    let (mongo_batch, ch_batch) = if check_across_dbs {
        let urls: Vec<String> = batch.iter().map(|a| a.url.clone()).collect();
        let (mongo_existing, ch_existing) =
            tokio::join!(existing_in(mongo, &urls), existing_in(clickhouse, &urls));

        let mongo_batch = write_set(mongo, &batch, mongo_existing.as_ref());
        let ch_batch = write_set(clickhouse, &batch, ch_existing.as_ref());

        let wanted: HashSet<&str> = mongo_batch
            .iter()
            .chain(ch_batch.iter())
            .map(|a| a.url.as_str())
            .collect();
        if mongo.is_some() || clickhouse.is_some() {
            summary.skipped = batch.len() - wanted.len();
        }
        if summary.skipped > 0 {
            info!(skipped = summary.skipped, "Skipped articles that already exist");
        }
        if wanted.is_empty() {
            info!("No new articles to save");
            return summary;
        }
        (mongo_batch, ch_batch)
    } else {
        (batch.clone(), batch)
    };

    let (mongo_count, ch_count) = tokio::join!(
        write_to(mongo, &mongo_batch),
        write_to(clickhouse, &ch_batch)
    );
    summary.mongodb = mongo_count;
    summary.clickhouse = ch_count;
    summary.total = mongo_count.max(ch_count);
    info!(%summary, "Saved batch");
    summary
}

/// URLs the store already has. `None` when the store is disabled or the
/// lookup failed.
async fn existing_in<S: ArticleStore>(
    store: Option<&S>,
    urls: &[String],
) -> Option<HashSet<String>> {
    let store = store?;
    match store.existing_urls(urls).await {
        Ok(found) => {
            info!(store = store.name(), found = found.len(), checked = urls.len(), "Checked existing URLs");
            Some(found)
        }
        Err(e) => {
            error!(store = store.name(), error = %e, "Error checking existing URLs");
            None
        }
    }
}

/// Articles to write to `store`: nothing when it is disabled, the whole
/// batch when its lookup failed, otherwise the ones it lacks.
fn write_set<S>(store: Option<&S>, batch: &[Article], existing: Option<&HashSet<String>>) -> Vec<Article> {
    if store.is_none() {
        return Vec::new();
    }
    match existing {
        Some(found) => batch
            .iter()
            .filter(|a| !found.contains(&a.url))
            .cloned()
            .collect(),
        None => batch.to_vec(),
    }
}

async fn write_to<S: ArticleStore>(store: Option<&S>, articles: &[Article]) -> usize {
    let Some(store) = store else {
        return 0;
    };
    if articles.is_empty() {
        return 0;
    }
    match store.upsert_articles(articles).await {
        Ok(n) => {
            info!(store = store.name(), saved = n, "Saved articles");
            n
        }
        Err(e) => {
            error!(store = store.name(), error = %e, "Error saving articles");
            0
        }
    }
}

/// In-memory [`ArticleStore`] for exercising the pipeline in tests.
#[cfg(test)]
pub(crate) mod memory {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Debug, Default)]
    pub struct MemoryStore {
        pub rows: Mutex<HashMap<String, Article>>,
        pub fail_reads: bool,
        pub fail_writes: bool,
        pub writes: Mutex<Vec<usize>>,
    }

    impl MemoryStore {
        pub fn with_urls(urls: &[&str]) -> Self {
            let store = Self::default();
            {
                let mut rows = store.rows.lock().unwrap();
                for url in urls {
                    rows.insert(url.to_string(), crate::storage::tests::article(url));
                }
            }
            store
        }

        pub fn len(&self) -> usize {
            self.rows.lock().unwrap().len()
        }
    }

    impl ArticleStore for MemoryStore {
        fn name(&self) -> &'static str {
            "memory"
        }

        async fn existing_urls(&self, urls: &[String]) -> Result<HashSet<String>, StoreError> {
            if self.fail_reads {
                return Err(StoreError::Other("read failed".to_string()));
            }
            let rows = self.rows.lock().unwrap();
            Ok(urls.iter().filter(|u| rows.contains_key(*u)).cloned().collect())
        }

        async fn upsert_articles(&self, articles: &[Article]) -> Result<usize, StoreError> {
            if self.fail_writes {
                return Err(StoreError::Other("write failed".to_string()));
            }
            self.writes.lock().unwrap().push(articles.len());
            let mut rows = self.rows.lock().unwrap();
            let mut changed = 0;
            for a in articles {
                if rows.get(&a.url) != Some(a) {
                    rows.insert(a.url.clone(), a.clone());
                    changed += 1;
                }
            }
            Ok(changed)
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::memory::MemoryStore;
    use super::*;
    use chrono::{TimeZone, Utc};

    pub(crate) fn article(url: &str) -> Article {
        Article {
            url: url.to_string(),
            title: format!("Title for {url}"),
            body: "Body".to_string(),
            date: Utc.with_ymd_and_hms(2025, 2, 1, 9, 0, 0).unwrap(),
            source: "Reuters".to_string(),
            search_key: Some("Inflation".to_string()),
            image: None,
        }
    }

    fn batch(urls: &[&str]) -> Vec<Article> {
        urls.iter().map(|u| article(u)).collect()
    }

    #[tokio::test]
    async fn test_empty_batch_writes_nothing() {
        let mongo = MemoryStore::default();
        let summary = save_to_all_dbs(Some(&mongo), None::<&MemoryStore>, Vec::new(), true).await;
        assert_eq!(summary, SaveSummary::default());
        assert!(mongo.writes.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_new_articles_reach_both_stores() {
        let mongo = MemoryStore::default();
        let ch = MemoryStore::default();
        let summary =
            save_to_all_dbs(Some(&mongo), Some(&ch), batch(&["u1", "u2", "u2", ""]), true).await;
        assert_eq!(summary.mongodb, 2);
        assert_eq!(summary.clickhouse, 2);
        assert_eq!(summary.total, 2);
        assert_eq!(summary.skipped, 0);
        assert_eq!(mongo.len(), 2);
        assert_eq!(ch.len(), 2);
    }

    #[tokio::test]
    async fn test_articles_in_both_stores_are_skipped() {
        let mongo = MemoryStore::with_urls(&["u1"]);
        let ch = MemoryStore::with_urls(&["u1"]);
        let summary = save_to_all_dbs(Some(&mongo), Some(&ch), batch(&["u1", "u2"]), true).await;
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.mongodb, 1);
        assert_eq!(summary.clickhouse, 1);
        assert_eq!(*mongo.writes.lock().unwrap(), vec![1]);
    }

    #[tokio::test]
    async fn test_mirror_gap_is_filled_without_rewriting_primary() {
        let mongo = MemoryStore::with_urls(&["u1", "u2"]);
        let ch = MemoryStore::with_urls(&["u2"]);
        let summary = save_to_all_dbs(Some(&mongo), Some(&ch), batch(&["u1", "u2"]), true).await;
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.mongodb, 0);
        assert_eq!(summary.clickhouse, 1);
        assert!(mongo.writes.lock().unwrap().is_empty());
        assert_eq!(ch.len(), 2);
    }

    #[tokio::test]
    async fn test_everything_known_short_circuits() {
        let mongo = MemoryStore::with_urls(&["u1", "u2"]);
        let summary =
            save_to_all_dbs(Some(&mongo), None::<&MemoryStore>, batch(&["u1", "u2"]), true).await;
        assert_eq!(summary.skipped, 2);
        assert_eq!(summary.total, 0);
        assert!(mongo.writes.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_disabled_mirror_does_not_hide_known_urls() {
        let mongo = MemoryStore::with_urls(&["u1"]);
        let summary =
            save_to_all_dbs(Some(&mongo), None::<&MemoryStore>, batch(&["u1", "u2"]), true).await;
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.mongodb, 1);
        assert_eq!(summary.clickhouse, 0);
        assert_eq!(summary.total, 1);
        assert_eq!(*mongo.writes.lock().unwrap(), vec![1]);
    }

    #[tokio::test]
    async fn test_failed_lookup_writes_full_batch_to_that_store() {
        let mongo = MemoryStore::with_urls(&["u1"]);
        let ch = MemoryStore {
            fail_reads: true,
            ..MemoryStore::default()
        };
        let summary = save_to_all_dbs(Some(&mongo), Some(&ch), batch(&["u1", "u2"]), true).await;
        assert_eq!(summary.mongodb, 1);
        assert_eq!(summary.clickhouse, 2);
        assert_eq!(summary.skipped, 0);
    }

    #[tokio::test]
    async fn test_failed_mirror_write_does_not_block_primary() {
        let mongo = MemoryStore::default();
        let ch = MemoryStore {
            fail_writes: true,
            ..MemoryStore::default()
        };
        let summary = save_to_all_dbs(Some(&mongo), Some(&ch), batch(&["u1", "u2"]), true).await;
        assert_eq!(summary.mongodb, 2);
        assert_eq!(summary.clickhouse, 0);
        assert_eq!(summary.total, 2);
    }

    #[tokio::test]
    async fn test_without_cross_check_every_store_gets_the_batch() {
        let mongo = MemoryStore::with_urls(&["u1"]);
        let summary =
            save_to_all_dbs(Some(&mongo), None::<&MemoryStore>, batch(&["u1", "u2"]), false).await;
        assert_eq!(*mongo.writes.lock().unwrap(), vec![2]);
        // u1 is stored with identical content, so only u2 changes
        assert_eq!(summary.mongodb, 1);
        assert_eq!(summary.skipped, 0);
    }

    #[tokio::test]
    async fn test_no_stores_enabled() {
        let summary = save_to_all_dbs(
            None::<&MemoryStore>,
            None::<&MemoryStore>,
            batch(&["u1"]),
            true,
        )
        .await;
        assert_eq!(summary.total, 0);
        assert_eq!(summary.skipped, 0);
    }
}
