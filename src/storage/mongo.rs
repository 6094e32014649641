//! MongoDB access.
//!
//! Articles live in `News.News`, keyed by `url`. The topic and feed
//! catalogs share the same database, reached through [`MongoStore::database`].
//!
//! Documents are mapped by hand rather than through serde: the collection
//! predates this crate and still holds rows whose `date` is a string, which
//! [`MongoStore::ensure_date_format`] converts in place.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use futures::TryStreamExt;
use mongodb::bson::{Bson, DateTime as BsonDateTime, Document, doc};
use mongodb::options::ClientOptions;
use mongodb::{Collection, Cursor, Database};
use std::collections::HashSet;
use std::time::Duration;
use tracing::{debug, info, instrument};

use super::{ArticleStore, SearchQuery, StoreError};
use crate::config::MongoConfig;
use crate::models::Article;
use crate::normalize::standardize_date;
use crate::retry::RetryPolicy;

const UPSERT_CHUNK: usize = 500;
const LOOKUP_CHUNK: usize = 1000;

#[derive(Debug, Clone)]
pub struct MongoStore {
    db: Database,
    articles: Collection<Document>,
    retry: RetryPolicy,
}

impl MongoStore {
    /// Connect and verify the server answers a ping.
    #[instrument(level = "info", skip_all, fields(host = %cfg.host, port = cfg.port))]
    pub async fn connect(cfg: &MongoConfig) -> Result<Self, StoreError> {
        let mut options = ClientOptions::parse(cfg.uri()).await?;
        options.app_name = Some("newsdesk".to_string());
        options.server_selection_timeout = Some(Duration::from_secs(10));
        let client = mongodb::Client::with_options(options)?;

        let db = client.database(&cfg.database);
        db.run_command(doc! { "ping": 1 }).await?;
        debug!(database = %cfg.database, collection = %cfg.collection, "Connected to MongoDB");

        Ok(Self {
            articles: db.collection(&cfg.collection),
            db,
            retry: RetryPolicy::new(cfg.retry_attempts, Duration::from_secs(1)),
        })
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    /// Convert string `date` fields to BSON dates. Returns the number fixed.
    #[instrument(level = "info", skip_all)]
    pub async fn ensure_date_format(&self) -> Result<u64, StoreError> {
        let pipeline = vec![doc! { "$set": { "date": { "$toDate": "$date" } } }];
        let result = self
            .articles
            .update_many(doc! { "date": { "$type": "string" } }, pipeline)
            .await?;
        if result.modified_count > 0 {
            info!(fixed = result.modified_count, "Converted string dates");
        }
        Ok(result.modified_count)
    }

    pub async fn count_articles(&self) -> Result<u64, StoreError> {
        Ok(self.articles.count_documents(doc! {}).await?)
    }

    pub async fn count_unique_urls(&self) -> Result<u64, StoreError> {
        let pipeline = vec![
            doc! { "$group": { "_id": "$url" } },
            doc! { "$count": "unique_urls" },
        ];
        let mut cursor = self.articles.aggregate(pipeline).await?;
        let Some(row) = cursor.try_next().await? else {
            return Ok(0);
        };
        Ok(match row.get("unique_urls") {
            Some(Bson::Int32(n)) => *n as u64,
            Some(Bson::Int64(n)) => *n as u64,
            _ => 0,
        })
    }

    pub async fn count_where(&self, filter: Document) -> Result<u64, StoreError> {
        Ok(self.articles.count_documents(filter).await?)
    }

    /// Newest matching articles first.
    #[instrument(level = "info", skip(self), fields(text = %query.text))]
    pub async fn search(&self, query: &SearchQuery) -> Result<Vec<Article>, StoreError> {
        let cursor = self
            .articles
            .find(search_filter(query, Utc::now()))
            .sort(doc! { "date": -1 })
            .limit(query.limit as i64)
            .await?;
        let docs: Vec<Document> = cursor.try_collect().await?;
        Ok(docs
            .iter()
            .filter_map(|d| document_to_article(d).ok())
            .collect())
    }

    /// Articles from the last `days` days, for source discovery.
    pub async fn recent_articles(&self, days: i64) -> Result<Vec<Article>, StoreError> {
        let cutoff = Utc::now() - ChronoDuration::days(days);
        let cursor = self
            .articles
            .find(doc! { "date": { "$gte": to_bson_date(cutoff) } })
            .projection(doc! { "url": 1, "title": 1, "body": 1, "source": 1, "date": 1 })
            .await?;
        let docs: Vec<Document> = cursor.try_collect().await?;
        Ok(docs
            .iter()
            .filter_map(|d| document_to_article(d).ok())
            .collect())
    }

    /// Cursor over articles in a date window, oldest first.
    pub async fn articles_between(
        &self,
        filter: Document,
        batch_size: u32,
    ) -> Result<Cursor<Document>, StoreError> {
        Ok(self
            .articles
            .find(filter)
            .sort(doc! { "date": 1 })
            .batch_size(batch_size)
            .await?)
    }
}

impl ArticleStore for MongoStore {
    fn name(&self) -> &'static str {
        "mongodb"
    }

    async fn existing_urls(&self, urls: &[String]) -> Result<HashSet<String>, StoreError> {
        let mut found = HashSet::new();
        for chunk in urls.chunks(LOOKUP_CHUNK) {
            let mut cursor = self
                .articles
                .find(doc! { "url": { "$in": chunk.to_vec() } })
                .projection(doc! { "url": 1, "_id": 0 })
                .await?;
            while let Some(d) = cursor.try_next().await? {
                if let Ok(url) = d.get_str("url") {
                    found.insert(url.to_string());
                }
            }
        }
        Ok(found)
    }

    /// `update_one({url}, {$set: article}, upsert)` per article. Counts
    /// inserted plus modified documents; unchanged re-writes count zero.
    async fn upsert_articles(&self, articles: &[Article]) -> Result<usize, StoreError> {
        let mut changed = 0;
        for chunk in articles.chunks(UPSERT_CHUNK) {
            let coll = &self.articles;
            changed += self
                .retry
                .run("mongodb upsert", move |_| async move {
                    let mut n = 0usize;
                    for a in chunk {
                        let result = coll
                            .update_one(
                                doc! { "url": a.url.as_str() },
                                doc! { "$set": article_to_document(a) },
                            )
                            .upsert(true)
                            .await?;
                        n += result.modified_count as usize
                            + usize::from(result.upserted_id.is_some());
                    }
                    Ok::<usize, StoreError>(n)
                })
                .await?;
        }
        Ok(changed)
    }
}

pub fn to_bson_date(dt: DateTime<Utc>) -> BsonDateTime {
    BsonDateTime::from_millis(dt.timestamp_millis())
}

pub fn article_to_document(a: &Article) -> Document {
    doc! {
        "url": a.url.as_str(),
        "title": a.title.as_str(),
        "body": a.body.as_str(),
        "date": to_bson_date(a.date),
        "source": a.source.as_str(),
        "searchKey": a.search_key.as_deref(),
        "image": a.image.as_deref(),
    }
}

/// Map a stored document back to an [`Article`].
///
/// Only `url` is required. Legacy string dates are parsed; unparseable or
/// missing dates become the Unix epoch so the row still shows up.
pub fn document_to_article(d: &Document) -> Result<Article, StoreError> {
    let url = d
        .get_str("url")
        .map_err(|_| StoreError::MissingField("url"))?
        .to_string();
    let text = |key: &str| d.get_str(key).unwrap_or_default().to_string();
    let optional = |key: &str| d.get_str(key).ok().map(str::to_string);

    let date = match d.get("date") {
        Some(Bson::DateTime(dt)) => DateTime::from_timestamp_millis(dt.timestamp_millis()),
        Some(Bson::String(s)) => standardize_date(s),
        _ => None,
    }
    .unwrap_or_default();

    Ok(Article {
        url,
        title: text("title"),
        body: text("body"),
        date,
        source: text("source"),
        search_key: optional("searchKey"),
        image: optional("image"),
    })
}

/// `date >= now - days`, regex on title or body, optional source list.
pub fn search_filter(query: &SearchQuery, now: DateTime<Utc>) -> Document {
    let cutoff = now - ChronoDuration::days(query.days);
    let pattern = regex::escape(query.text.trim());
    let mut filter = doc! {
        "date": { "$gte": to_bson_date(cutoff) },
        "$or": [
            { "title": { "$regex": pattern.as_str(), "$options": "i" } },
            { "body": { "$regex": pattern.as_str(), "$options": "i" } },
        ],
    };
    if !query.sources.is_empty() {
        filter.insert("source", doc! { "$in": query.sources.clone() });
    }
    filter
}

/// `date` range filter; both bounds optional and inclusive.
pub fn date_window_filter(after: Option<DateTime<Utc>>, before: Option<DateTime<Utc>>) -> Document {
    let mut range = Document::new();
    if let Some(after) = after {
        range.insert("$gte", to_bson_date(after));
    }
    if let Some(before) = before {
        range.insert("$lte", to_bson_date(before));
    }
    if range.is_empty() {
        doc! {}
    } else {
        doc! { "date": range }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn article() -> Article {
        Article {
            url: "https://www.ft.com/content/abc".to_string(),
            title: "Gilts rally".to_string(),
            body: "UK borrowing costs fall".to_string(),
            date: Utc.with_ymd_and_hms(2025, 4, 2, 7, 30, 0).unwrap(),
            source: "FinancialTimes".to_string(),
            search_key: None,
            image: Some("https://img/x.jpg".to_string()),
        }
    }

    #[test]
    fn test_article_document_mapping() {
        let a = article();
        let d = article_to_document(&a);
        assert_eq!(d.get_str("url").unwrap(), a.url);
        assert!(matches!(d.get("date"), Some(Bson::DateTime(_))));
        assert_eq!(d.get("searchKey"), Some(&Bson::Null));
        assert_eq!(document_to_article(&d).unwrap(), a);
    }

    #[test]
    fn test_legacy_string_date_is_parsed() {
        let d = doc! {
            "url": "https://x.com/1",
            "title": "t",
            "date": "2025-04-02 07:30:00",
        };
        let a = document_to_article(&d).unwrap();
        assert_eq!(a.date, Utc.with_ymd_and_hms(2025, 4, 2, 7, 30, 0).unwrap());
        assert_eq!(a.body, "");
        assert_eq!(a.search_key, None);
    }

    #[test]
    fn test_document_without_url_is_rejected() {
        let err = document_to_article(&doc! { "title": "t" }).unwrap_err();
        assert!(matches!(err, StoreError::MissingField("url")));
    }

    #[test]
    fn test_search_filter_escapes_and_limits_sources() {
        let now = Utc.with_ymd_and_hms(2025, 4, 10, 0, 0, 0).unwrap();
        let query = SearchQuery {
            text: " S&P 500 (futures) ".to_string(),
            days: 3,
            sources: vec!["Reuters".to_string()],
            limit: 5,
        };
        let filter = search_filter(&query, now);

        let date = filter.get_document("date").unwrap();
        let cutoff = Utc.with_ymd_and_hms(2025, 4, 7, 0, 0, 0).unwrap();
        assert_eq!(date.get_datetime("$gte").unwrap(), &to_bson_date(cutoff));

        let ors = filter.get_array("$or").unwrap();
        let title = ors[0].as_document().unwrap().get_document("title").unwrap();
        assert_eq!(title.get_str("$regex").unwrap(), r"S\&P 500 \(futures\)");
        assert_eq!(title.get_str("$options").unwrap(), "i");

        let source = filter.get_document("source").unwrap();
        assert_eq!(source.get_array("$in").unwrap().len(), 1);
    }

    #[test]
    fn test_search_filter_without_sources() {
        let filter = search_filter(&SearchQuery::default(), Utc::now());
        assert!(!filter.contains_key("source"));
    }

    #[test]
    fn test_date_window_filter() {
        assert!(date_window_filter(None, None).is_empty());
        let after = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        let f = date_window_filter(Some(after), None);
        let range = f.get_document("date").unwrap();
        assert!(range.contains_key("$gte"));
        assert!(!range.contains_key("$lte"));
    }
}
