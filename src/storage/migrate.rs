//! Bulk copy of the MongoDB corpus into ClickHouse.

use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use std::time::Duration;
use tracing::{error, info, instrument, warn};

use super::mongo::{date_window_filter, document_to_article};
use super::{ArticleStore, ClickHouseStore, MongoStore, StoreError};
use crate::models::Article;
use crate::utils::truncate_for_log;

#[derive(Debug, Clone)]
pub struct MigrationOptions {
    pub batch_size: usize,
    pub after: Option<DateTime<Utc>>,
    pub before: Option<DateTime<Utc>>,
    /// Look up each batch in ClickHouse and skip URLs already there.
    pub skip_if_exists: bool,
    /// Count and preview without writing.
    pub test_mode: bool,
    /// Pause between batches.
    pub pause: Duration,
}

impl Default for MigrationOptions {
    fn default() -> Self {
        Self {
            batch_size: 1000,
            after: None,
            before: None,
            skip_if_exists: false,
            test_mode: false,
            pause: Duration::from_millis(100),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MigrationStats {
    pub total_processed: usize,
    pub total_migrated: usize,
    pub total_skipped: usize,
    pub batches: usize,
    pub errors: usize,
}

/// Stream articles matching the date window out of Mongo and into
/// ClickHouse, `batch_size` at a time, oldest first.
#[instrument(level = "info", skip_all, fields(batch_size = opts.batch_size, test_mode = opts.test_mode))]
pub async fn migrate_to_clickhouse(
    mongo: &MongoStore,
    clickhouse: &ClickHouseStore,
    opts: &MigrationOptions,
) -> Result<MigrationStats, StoreError> {
    let mut stats = MigrationStats::default();
    let filter = date_window_filter(opts.after, opts.before);
    let total = mongo.count_where(filter.clone()).await?;
    if total == 0 {
        warn!("No articles in MongoDB match the filters");
        return Ok(stats);
    }
    info!(total, "Starting migration");

    if !opts.test_mode {
        clickhouse.create_table_if_not_exists().await?;
    }
    let batch_size = opts.batch_size.max(1);
    let mut cursor = mongo
        .articles_between(filter, u32::try_from(batch_size).unwrap_or(u32::MAX))
        .await?;

    let mut batch: Vec<Article> = Vec::with_capacity(batch_size);
    while let Some(doc) = cursor.try_next().await? {
        match document_to_article(&doc) {
            Ok(article) => batch.push(article),
            Err(e) => warn!(error = %e, "Skipping document"),
        }
        if batch.len() >= batch_size {
            migrate_batch(&mut stats, std::mem::take(&mut batch), total, clickhouse, opts).await;
            if !opts.pause.is_zero() {
                tokio::time::sleep(opts.pause).await;
            }
        }
    }
    if !batch.is_empty() {
        migrate_batch(&mut stats, batch, total, clickhouse, opts).await;
    }

    info!(?stats, "Migration finished");
    Ok(stats)
}

/// Move one batch and fold the outcome into `stats`.
pub async fn migrate_batch<C: ArticleStore>(
    stats: &mut MigrationStats,
    mut batch: Vec<Article>,
    total: u64,
    target: &C,
    opts: &MigrationOptions,
) {
    stats.batches += 1;
    stats.total_processed += batch.len();
    let percent = stats.total_processed as f64 * 100.0 / total.max(1) as f64;
    info!(
        batch = stats.batches,
        processed = stats.total_processed,
        total,
        "Processed {percent:.1}%"
    );

    if opts.skip_if_exists {
        let urls: Vec<String> = batch.iter().map(|a| a.url.clone()).collect();
        match target.existing_urls(&urls).await {
            Ok(existing) => {
                let before = batch.len();
                batch.retain(|a| !existing.contains(&a.url));
                stats.total_skipped += before - batch.len();
            }
            Err(e) => warn!(error = %e, "Existing URL lookup failed; migrating whole batch"),
        }
        if batch.is_empty() {
            info!(batch = stats.batches, "Every article already exists; skipped");
            return;
        }
    }

    if opts.test_mode {
        info!(batch = stats.batches, count = batch.len(), "Would migrate (test mode)");
        for (i, a) in batch.iter().take(3).enumerate() {
            info!("  {}. {} [{}] {}", i + 1, truncate_for_log(&a.title, 60), a.source, a.date);
        }
        stats.total_migrated += batch.len();
        return;
    }

    match target.upsert_articles(&batch).await {
        Ok(n) => stats.total_migrated += n,
        Err(e) => {
            error!(batch = stats.batches, error = %e, "Batch migration failed");
            stats.errors += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::memory::MemoryStore;
    use crate::storage::tests::article;

    fn opts() -> MigrationOptions {
        MigrationOptions {
            pause: Duration::ZERO,
            ..MigrationOptions::default()
        }
    }

    #[tokio::test]
    async fn test_batch_is_written() {
        let target = MemoryStore::default();
        let mut stats = MigrationStats::default();
        migrate_batch(&mut stats, vec![article("a"), article("b")], 2, &target, &opts()).await;
        assert_eq!(stats.total_processed, 2);
        assert_eq!(stats.total_migrated, 2);
        assert_eq!(stats.batches, 1);
        assert_eq!(target.len(), 2);
    }

    #[tokio::test]
    async fn test_skip_existing() {
        let target = MemoryStore::with_urls(&["a"]);
        let mut stats = MigrationStats::default();
        let o = MigrationOptions {
            skip_if_exists: true,
            ..opts()
        };
        migrate_batch(&mut stats, vec![article("a"), article("b")], 4, &target, &o).await;
        migrate_batch(&mut stats, vec![article("a")], 4, &target, &o).await;
        assert_eq!(stats.total_skipped, 2);
        assert_eq!(stats.total_migrated, 1);
        assert_eq!(stats.batches, 2);
        assert_eq!(*target.writes.lock().unwrap(), vec![1]);
    }

    #[tokio::test]
    async fn test_mode_counts_without_writing() {
        let target = MemoryStore::default();
        let mut stats = MigrationStats::default();
        let o = MigrationOptions {
            test_mode: true,
            ..opts()
        };
        migrate_batch(&mut stats, vec![article("a"), article("b")], 2, &target, &o).await;
        assert_eq!(stats.total_migrated, 2);
        assert_eq!(target.len(), 0);
    }

    #[tokio::test]
    async fn test_failed_write_counts_error() {
        let target = MemoryStore {
            fail_writes: true,
            ..MemoryStore::default()
        };
        let mut stats = MigrationStats::default();
        migrate_batch(&mut stats, vec![article("a")], 1, &target, &opts()).await;
        assert_eq!(stats.errors, 1);
        assert_eq!(stats.total_migrated, 0);
    }
}
