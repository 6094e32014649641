//! The run loop shared by all scrapers.
//!
//! A pass resolves the work items (topic queries or feeds), fetches each with
//! retries, normalizes the batch and hands it to
//! [`crate::storage::save_to_all_dbs`]. Afterwards legacy string dates are
//! converted in the document store.
//!
//! `--test`, `--no-wait` and `--query` make the scraper exit after one pass
//! (exit code 1 when the pass failed). Otherwise passes repeat every
//! `interval_secs` until Ctrl-C or SIGTERM.

use rand::Rng;
use std::error::Error;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{error, info, instrument, warn};

use super::{ScraperKind, build_client, duckduckgo, gnews, rss};
use crate::catalog::{sources, topics};
use crate::config::AppConfig;
use crate::logging::{log_end, log_start};
use crate::models::Article;
use crate::normalize::process_articles;
use crate::proxy::ProxyPool;
use crate::retry::RetryPolicy;
use crate::storage::{ClickHouseStore, MongoStore, save_to_all_dbs};

/// Flags of one scraper process.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunOptions {
    /// Only the first two work items, short pauses, one pass.
    pub test_mode: bool,
    /// One pass, then exit.
    pub no_wait: bool,
    /// Search this query instead of the stored topics (search scrapers).
    pub query: Option<String>,
    /// Restrict topics or feeds to one category.
    pub category: Option<String>,
    pub no_mongodb: bool,
    pub no_clickhouse: bool,
}

/// Work items per pass in test mode.
pub const TEST_MODE_ITEMS: usize = 2;

impl RunOptions {
    pub fn one_shot(&self) -> bool {
        self.test_mode || self.no_wait || self.query.is_some()
    }

    /// The on-the-fly query, which replaces the stored topics even in test
    /// mode. Blank queries are ignored.
    pub fn fixed_queries(&self) -> Option<Vec<String>> {
        let query = self.query.as_deref()?.trim();
        (!query.is_empty()).then(|| vec![query.to_string()])
    }

    /// The first [`TEST_MODE_ITEMS`] items in test mode, all of them otherwise.
    pub fn limit_items<T>(&self, mut items: Vec<T>) -> Vec<T> {
        if self.test_mode {
            items.truncate(TEST_MODE_ITEMS);
        }
        items
    }
}

/// Everything a pass needs, built once per process.
pub struct Scraper {
    kind: ScraperKind,
    config: AppConfig,
    opts: RunOptions,
    mongo: MongoStore,
    clickhouse: Option<ClickHouseStore>,
    proxies: Option<ProxyPool>,
}

impl Scraper {
    pub async fn connect(
        kind: ScraperKind,
        config: AppConfig,
        opts: RunOptions,
    ) -> Result<Self, Box<dyn Error>> {
        // topics and feeds live in Mongo, so it is needed even with --no-mongodb
        let mongo = MongoStore::connect(&config.mongodb).await?;
        let clickhouse = (config.clickhouse.enabled && !opts.no_clickhouse)
            .then(|| ClickHouseStore::new(&config.clickhouse));
        let proxies = config
            .proxy
            .enabled
            .then(|| ProxyPool::from_torrc_dirs(&config.proxy.torrc_dirs));
        Ok(Self {
            kind,
            config,
            opts,
            mongo,
            clickhouse,
            proxies,
        })
    }

    /// Run until done (one-shot) or until a shutdown signal. Returns whether
    /// the last pass succeeded.
    pub async fn run(&self) -> bool {
        let name = self.kind.display_name();
        log_start(name, self.opts.test_mode);

        loop {
            let pass = async {
                match self.run_once().await {
                    Ok(()) => {
                        info!("{name} completed successfully");
                        true
                    }
                    Err(e) => {
                        error!(error = %e, "{name} encountered errors");
                        false
                    }
                }
            };
            let success = tokio::select! {
                ok = pass => ok,
                _ = shutdown_signal() => {
                    info!("Shutdown signal received; stopping");
                    log_end(name, false);
                    return false;
                }
            };

            if self.opts.one_shot() {
                info!("One-time run completed");
                log_end(name, success);
                return success;
            }

            let interval = Duration::from_secs(self.config.scraper.interval_secs);
            info!(secs = interval.as_secs(), "Waiting before next run");
            tokio::select! {
                _ = sleep(interval) => {}
                _ = shutdown_signal() => {
                    info!("Shutdown signal received; stopping");
                    log_end(name, success);
                    return success;
                }
            }
        }
    }

    /// One pass over every work item.
    #[instrument(level = "info", skip(self), fields(kind = %self.kind))]
    pub async fn run_once(&self) -> Result<(), Box<dyn Error>> {
        if self.kind.is_search() {
            self.search_pass().await?;
        } else {
            self.feed_pass().await?;
        }

        if !self.opts.no_mongodb {
            let fixed = self.mongo.ensure_date_format().await?;
            if fixed > 0 {
                info!(fixed, "Fixed date fields");
            }
        }
        Ok(())
    }

    async fn search_pass(&self) -> Result<(), Box<dyn Error>> {
        let queries = match self.opts.fixed_queries() {
            Some(queries) => {
                info!(query = %queries[0], "On-the-fly search");
                queries
            }
            None => {
                let all =
                    topics::active_queries(self.mongo.database(), self.opts.category.as_deref()).await?;
                let picked = self.opts.limit_items(all);
                info!(count = picked.len(), test_mode = self.opts.test_mode, "Using topics");
                picked
            }
        };

        for (i, query) in queries.iter().enumerate() {
            if i > 0 {
                sleep(self.query_pause()).await;
            }
            info!(%query, "news updating...");
            let articles = self.fetch_search(query).await;
            if articles.is_empty() {
                warn!(%query, "No results found");
                continue;
            }
            let news = process_articles(articles);
            if news.is_empty() {
                warn!(%query, "No valid articles after processing");
                continue;
            }
            let summary = self.save(news).await;
            info!(%query, %summary, "news updated");
        }
        Ok(())
    }

    async fn feed_pass(&self) -> Result<(), Box<dyn Error>> {
        let db = self.mongo.database();
        sources::initialize_sources(db).await?;
        let feeds = self
            .opts
            .limit_items(sources::active_sources(db, self.opts.category.as_deref()).await?);
        info!(
            count = feeds.len(),
            category = self.opts.category.as_deref().unwrap_or("all"),
            "Processing RSS feeds"
        );

        let policy = RetryPolicy::new(3, Duration::from_secs(1));
        let mut all = Vec::new();
        for feed in &feeds {
            info!(source = %feed.source, site = %feed.site, "Processing RSS feed");
            let fetched = policy
                .run("rss fetch", move |_| async move {
                    let client = self.client()?;
                    rss::fetch_feed(&client, feed).await
                })
                .await;
            match fetched {
                Ok(articles) if !articles.is_empty() => {
                    info!(source = %feed.source, count = articles.len(), "Added articles");
                    all.extend(articles);
                }
                Ok(_) => warn!(source = %feed.source, "No articles found"),
                Err(e) => error!(source = %feed.source, error = %e, "Error parsing RSS feed"),
            }
        }

        if all.is_empty() {
            warn!("No articles to save");
            return Ok(());
        }
        let summary = self.save(process_articles(all)).await;
        info!(%summary, "Saved articles");
        Ok(())
    }

    /// Search with retries; an empty result counts as a failed attempt.
    async fn fetch_search(&self, query: &str) -> Vec<Article> {
        let cfg = &self.config.scraper;
        let policy = cfg.fetch_policy();
        let result = policy
            .run("search", move |_| async move {
                let client = self.client()?;
                let found = match self.kind {
                    ScraperKind::Duckduckgo => {
                        duckduckgo::search(&client, query, cfg.max_results, &cfg.timelimit).await?
                    }
                    _ => gnews::search(&client, query, cfg.max_results, &cfg.timelimit).await?,
                };
                if found.is_empty() {
                    return Err(Box::<dyn Error>::from(format!("no results for {query:?}")));
                }
                info!(%query, count = found.len(), "result OK!");
                Ok(found)
            })
            .await;
        result.unwrap_or_default()
    }

    async fn save(&self, articles: Vec<Article>) -> crate::models::SaveSummary {
        let mongo = (!self.opts.no_mongodb).then_some(&self.mongo);
        save_to_all_dbs(mongo, self.clickhouse.as_ref(), articles, true).await
    }

    /// A client through a random proxy, or direct when proxies are off.
    fn client(&self) -> Result<reqwest::Client, Box<dyn Error>> {
        let proxy = self.proxies.as_ref().map(ProxyPool::random);
        let timeout = Duration::from_secs(self.config.scraper.request_timeout_secs);
        Ok(build_client(proxy.as_ref(), timeout)?)
    }

    fn query_pause(&self) -> Duration {
        if self.opts.test_mode {
            return Duration::from_secs(1);
        }
        let cfg = &self.config.scraper;
        let (lo, hi) = (cfg.query_delay_min_secs, cfg.query_delay_max_secs);
        if hi <= lo {
            return Duration::from_secs(lo);
        }
        Duration::from_secs(rand::rng().random_range(lo..hi))
    }
}

/// Resolves on Ctrl-C, or SIGTERM on Unix.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Unable to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Unable to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_one_shot_modes() {
        assert!(!RunOptions::default().one_shot());
        assert!(RunOptions { test_mode: true, ..Default::default() }.one_shot());
        assert!(RunOptions { no_wait: true, ..Default::default() }.one_shot());
        assert!(
            RunOptions {
                query: Some("Gold".to_string()),
                ..Default::default()
            }
            .one_shot()
        );
    }

    #[test]
    fn test_query_replaces_topics_even_in_test_mode() {
        let opts = RunOptions {
            test_mode: true,
            query: Some("  copper tariffs ".to_string()),
            ..Default::default()
        };
        assert_eq!(opts.fixed_queries(), Some(vec!["copper tariffs".to_string()]));

        let blank = RunOptions {
            query: Some("   ".to_string()),
            ..Default::default()
        };
        assert_eq!(blank.fixed_queries(), None);
        assert_eq!(RunOptions::default().fixed_queries(), None);
    }

    #[test]
    fn test_test_mode_keeps_first_two_items() {
        let topics = vec!["Gold", "Oil", "FED", "ECB"];
        let test = RunOptions {
            test_mode: true,
            ..Default::default()
        };
        assert_eq!(test.limit_items(topics.clone()), vec!["Gold", "Oil"]);
        assert_eq!(RunOptions::default().limit_items(topics.clone()), topics);
        assert!(test.limit_items(Vec::<&str>::new()).is_empty());
    }
}
