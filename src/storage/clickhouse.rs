//! ClickHouse mirror of the article collection, over the HTTP interface.
//!
//! The table is append-only (`MergeTree`), so "upsert" here means: look up
//! which URLs are already present, then insert the rest in batches.

use chrono::{DateTime, Utc};
use clickhouse::{Client, Row};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::future::Future;
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::{error, info, instrument, warn};

use super::{ArticleStore, SearchQuery, StoreError};
use crate::config::ClickHouseConfig;
use crate::models::Article;
use crate::retry::RetryPolicy;

const LOOKUP_CHUNK: usize = 1000;
const PROBE_PREFIX: &str = "test://availability_check/";

/// One row of the `news` table as written and read by this crate.
///
/// `id` and `created_at` are filled in by column defaults.
#[derive(Debug, Clone, PartialEq, Row, Serialize, Deserialize)]
pub struct NewsRow {
    pub url: String,
    pub title: String,
    pub body: String,
    #[serde(with = "clickhouse::serde::chrono::datetime")]
    pub date: DateTime<Utc>,
    pub source: String,
    #[serde(rename = "searchKey")]
    pub search_key: Option<String>,
    pub image: Option<String>,
}

impl From<&Article> for NewsRow {
    fn from(a: &Article) -> Self {
        Self {
            url: a.url.clone(),
            title: a.title.clone(),
            body: a.body.clone(),
            date: a.date,
            source: a.source.clone(),
            search_key: a.search_key.clone(),
            image: a.image.clone(),
        }
    }
}

impl From<NewsRow> for Article {
    fn from(r: NewsRow) -> Self {
        Self {
            url: r.url,
            title: r.title,
            body: r.body,
            date: r.date,
            source: r.source,
            search_key: r.search_key,
            image: r.image,
        }
    }
}

/// Per-source article counts over a window.
#[derive(Debug, Clone, Row, Deserialize)]
pub struct SourceCount {
    pub source: String,
    pub count: u64,
    #[serde(with = "clickhouse::serde::chrono::datetime")]
    pub first_date: DateTime<Utc>,
    #[serde(with = "clickhouse::serde::chrono::datetime")]
    pub last_date: DateTime<Utc>,
}

#[derive(Debug, Row, Deserialize)]
struct UrlRow {
    url: String,
}

#[derive(Debug, Row, Deserialize)]
struct CountRow {
    count: u64,
}

pub struct ClickHouseStore {
    client: Client,
    database: String,
    table: String,
    batch_size: usize,
    retry: RetryPolicy,
    /// When set, [`ArticleStore::upsert_articles`] re-checks URLs itself.
    dedup_by_url: bool,
    ready: OnceCell<()>,
}

impl ClickHouseStore {
    pub fn new(cfg: &ClickHouseConfig) -> Self {
        let client = Client::default()
            .with_url(&cfg.url)
            .with_user(&cfg.user)
            .with_password(&cfg.password);
        Self {
            client,
            database: cfg.database.clone(),
            table: cfg.table.clone(),
            batch_size: cfg.batch_size.max(1),
            retry: RetryPolicy::new(cfg.retry_attempts, Duration::from_secs(1)),
            dedup_by_url: true,
            ready: OnceCell::new(),
        }
    }

    /// Write into `table` instead of the configured one.
    pub fn with_table(mut self, table: &str) -> Self {
        self.table = table.to_string();
        self
    }

    pub fn with_dedup(mut self, dedup_by_url: bool) -> Self {
        self.dedup_by_url = dedup_by_url;
        self
    }

    /// `database.table`
    pub fn qualified_table(&self) -> String {
        format!("{}.{}", self.database, self.table)
    }

    #[instrument(level = "info", skip(self), fields(table = %self.qualified_table()))]
    pub async fn create_table_if_not_exists(&self) -> Result<(), StoreError> {
        self.client
            .query(&format!("CREATE DATABASE IF NOT EXISTS {}", self.database))
            .execute()
            .await?;
        self.client
            .query(&create_table_sql(&self.qualified_table()))
            .execute()
            .await?;
        info!("News table ready");
        Ok(())
    }

    /// Whether the table exists and accepts an insert.
    ///
    /// A probe row is inserted and deleted again; a freshly created table can
    /// exist in `system.tables` before it accepts writes.
    #[instrument(level = "info", skip(self))]
    pub async fn check_table_availability(&self, table: &str) -> Result<bool, StoreError> {
        let exists = self
            .client
            .query("SELECT count() AS count FROM system.tables WHERE database = ? AND name = ?")
            .bind(&self.database)
            .bind(table)
            .fetch_one::<CountRow>()
            .await?;
        if exists.count == 0 {
            error!(database = %self.database, table, "Table does not exist");
            return Ok(false);
        }

        let qualified = format!("{}.{}", self.database, table);
        let probe_url = format!("{PROBE_PREFIX}{}", Utc::now().format("%Y%m%d%H%M%S"));
        let probe = NewsRow {
            url: probe_url.clone(),
            title: "Test".to_string(),
            body: "Test".to_string(),
            date: Utc::now(),
            source: "Test".to_string(),
            search_key: None,
            image: None,
        };
        let inserted = async {
            let mut insert = self.client.insert::<NewsRow>(&qualified)?;
            insert.write(&probe).await?;
            insert.end().await
        }
        .await;
        if let Err(e) = inserted {
            error!(table = %qualified, error = %e, "Probe insert failed");
            return Ok(false);
        }

        self.client
            .query(&format!("ALTER TABLE {qualified} DELETE WHERE url = ?"))
            .bind(&probe_url)
            .execute()
            .await?;
        info!(table = %qualified, "Table available for inserts");
        Ok(true)
    }

    /// Create the table and verify it once per store lifetime.
    async fn ensure_ready(&self) -> Result<(), StoreError> {
        self.ready
            .get_or_try_init(|| async {
                self.create_table_if_not_exists().await?;
                if self.check_table_availability(&self.table).await? {
                    Ok(())
                } else {
                    Err(StoreError::TableUnavailable(self.qualified_table()))
                }
            })
            .await
            .map(|_| ())
    }

    pub async fn search(&self, query: &SearchQuery) -> Result<Vec<Article>, StoreError> {
        let mut sql = format!(
            "SELECT ?fields FROM {} WHERE date >= now() - INTERVAL ? DAY",
            self.qualified_table()
        );
        let text = query.text.trim();
        if !text.is_empty() {
            sql.push_str(" AND (title ILIKE ? OR body ILIKE ?)");
        }
        if !query.sources.is_empty() {
            sql.push_str(" AND source IN ?");
        }
        sql.push_str(" ORDER BY date DESC LIMIT ?");

        let mut q = self.client.query(&sql).bind(query.days);
        if !text.is_empty() {
            let pattern = like_pattern(text);
            q = q.bind(&pattern).bind(&pattern);
        }
        if !query.sources.is_empty() {
            q = q.bind(&query.sources);
        }
        let rows = q.bind(query.limit as u64).fetch_all::<NewsRow>().await?;
        Ok(rows.into_iter().map(Article::from).collect())
    }

    pub async fn count_by_source(&self, days: i64) -> Result<Vec<SourceCount>, StoreError> {
        let sql = format!(
            "SELECT source, count() AS count, min(date) AS first_date, max(date) AS last_date \
             FROM {} WHERE date >= now() - INTERVAL ? DAY \
             GROUP BY source ORDER BY count DESC",
            self.qualified_table()
        );
        Ok(self
            .client
            .query(&sql)
            .bind(days)
            .fetch_all::<SourceCount>()
            .await?)
    }

    async fn insert_batch(&self, rows: &[NewsRow]) -> Result<usize, StoreError> {
        let qualified = self.qualified_table();
        let table = qualified.as_str();
        let client = &self.client;
        self.retry
            .run("clickhouse insert", move |_| async move {
                let mut insert = client.insert::<NewsRow>(table)?;
                for row in rows {
                    insert.write(row).await?;
                }
                insert.end().await?;
                Ok::<usize, StoreError>(rows.len())
            })
            .await
    }
}

impl ArticleStore for ClickHouseStore {
    fn name(&self) -> &'static str {
        "clickhouse"
    }

    async fn existing_urls(&self, urls: &[String]) -> Result<HashSet<String>, StoreError> {
        let sql = format!("SELECT ?fields FROM {} WHERE url IN ?", self.qualified_table());
        let mut found = HashSet::new();
        for chunk in urls.chunks(LOOKUP_CHUNK) {
            let rows = self
                .client
                .query(&sql)
                .bind(chunk)
                .fetch_all::<UrlRow>()
                .await?;
            found.extend(rows.into_iter().map(|r| r.url));
        }
        Ok(found)
    }

    /// Insert articles whose URL is not yet in the table.
    ///
    /// A batch that still fails after its retries is logged and skipped; the
    /// count covers the batches that landed.
    #[instrument(level = "info", skip_all, fields(table = %self.qualified_table(), batch = articles.len()))]
    async fn upsert_articles(&self, articles: &[Article]) -> Result<usize, StoreError> {
        if articles.is_empty() {
            return Ok(0);
        }
        self.ensure_ready().await?;

        let mut rows: Vec<NewsRow> = articles.iter().map(NewsRow::from).collect();
        if self.dedup_by_url {
            let urls: Vec<String> = rows.iter().map(|r| r.url.clone()).collect();
            drop_existing(&mut rows, self.existing_urls(&urls).await);
        }
        Ok(insert_in_batches(&rows, self.batch_size, |batch| self.insert_batch(batch)).await)
    }
}

/// Remove rows whose URL the table already holds. A failed lookup keeps
/// every row.
fn drop_existing(rows: &mut Vec<NewsRow>, existing: Result<HashSet<String>, StoreError>) {
    match existing {
        Ok(existing) if !existing.is_empty() => {
            rows.retain(|r| !existing.contains(&r.url));
            info!(existing = existing.len(), remaining = rows.len(), "Filtered existing URLs");
        }
        Ok(_) => {}
        Err(e) => warn!(error = %e, "URL lookup failed; inserting without dedup"),
    }
}

/// Feed `rows` to `insert` in chunks of `batch_size`. A chunk that fails is
/// logged and skipped; the total covers the chunks that landed.
async fn insert_in_batches<'a, T, F, Fut>(rows: &'a [T], batch_size: usize, mut insert: F) -> usize
where
    F: FnMut(&'a [T]) -> Fut,
    Fut: Future<Output = Result<usize, StoreError>>,
{
    let mut inserted = 0;
    for (i, batch) in rows.chunks(batch_size.max(1)).enumerate() {
        match insert(batch).await {
            Ok(n) => inserted += n,
            Err(e) => error!(batch = i + 1, rows = batch.len(), error = %e, "Batch failed; skipping"),
        }
    }
    inserted
}

/// DDL for the news table: bloom and token indexes for lookups by URL and
/// keyword, monthly partitions.
pub fn create_table_sql(qualified_table: &str) -> String {
    format!(
        "CREATE TABLE IF NOT EXISTS {qualified_table} (
    id UUID DEFAULT generateUUIDv4(),
    url String,
    title String,
    body String,
    date DateTime,
    source String,
    searchKey Nullable(String),
    image Nullable(String),
    created_at DateTime DEFAULT now(),
    INDEX url_idx url TYPE bloom_filter GRANULARITY 1,
    INDEX title_idx title TYPE tokenbf_v1(8, 3, 0) GRANULARITY 1,
    INDEX body_idx body TYPE tokenbf_v1(8, 3, 0) GRANULARITY 1,
    INDEX source_idx source TYPE tokenbf_v1(4, 3, 0) GRANULARITY 1
) ENGINE = MergeTree()
ORDER BY (url, date, source, id)
PARTITION BY toYYYYMM(date)
SETTINGS index_granularity = 8192"
    )
}

/// `%text%` with LIKE wildcards in `text` escaped.
pub fn like_pattern(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 2);
    out.push('%');
    for c in text.chars() {
        if matches!(c, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('%');
    out
}
