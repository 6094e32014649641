//! On-the-fly search: scrape one query right now, then show what landed.
//!
//! The query is registered as an `ondemand` topic and handed to the
//! DuckDuckGo and Google News scrapers, each run as a one-shot child process
//! (`scrape <kind> --query <q> --no-wait`). Both run concurrently and are
//! killed after [`CHILD_TIMEOUT`]. The search succeeds when either child
//! exits with status 0.

use std::ffi::OsString;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tokio::time::{sleep, timeout};
use tracing::{error, info, instrument, warn};

use super::search::{SEARCH_CATEGORY, search_news};
use crate::catalog::topics::{self, DEFAULT_PRIORITY};
use crate::models::Article;
use crate::scrapers::ScraperKind;
use crate::storage::{MongoStore, SearchQuery};

pub const CHILD_TIMEOUT: Duration = Duration::from_secs(90);
pub const ONDEMAND_CATEGORY: &str = "ondemand";
/// Look-back when the fresh scrape failed.
pub const FALLBACK_DAYS: i64 = 30;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlyOptions {
    pub query: String,
    /// Keep the query as a permanent `search` topic.
    pub add_topic: bool,
    /// Look-back used when the last day has no results.
    pub days: i64,
    /// Pause between the scrape and the read-back.
    pub wait: Duration,
    pub config_path: Option<PathBuf>,
}

/// What `fly` found.
#[derive(Debug, Clone, PartialEq)]
pub enum FlyOutcome {
    /// Fresh scrape succeeded; articles from the last day, or from `days`
    /// when the last day was empty.
    Fresh { articles: Vec<Article>, widened: bool },
    /// Both scrapers failed; whatever was already stored.
    Existing(Vec<Article>),
}

/// Arguments for one child scraper.
pub fn child_args(kind: ScraperKind, query: &str, config_path: Option<&PathBuf>) -> Vec<OsString> {
    let mut args = Vec::new();
    if let Some(path) = config_path {
        args.push(OsString::from("--config"));
        args.push(path.clone().into_os_string());
    }
    args.extend(["scrape", kind.name(), "--query", query, "--no-wait"].map(OsString::from));
    args
}

/// Run one child scraper to completion. `true` on exit status 0.
#[instrument(level = "info", skip(config_path))]
pub async fn run_child(kind: ScraperKind, query: &str, config_path: Option<&PathBuf>, limit: Duration) -> bool {
    let exe = match std::env::current_exe() {
        Ok(exe) => exe,
        Err(e) => {
            error!(error = %e, "Cannot locate own executable");
            return false;
        }
    };
    let spawned = Command::new(exe)
        .args(child_args(kind, query, config_path))
        .env("QUERY", query)
        .env("NO_WAIT", "1")
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .spawn();
    let mut child = match spawned {
        Ok(child) => child,
        Err(e) => {
            error!(error = %e, "Failed to start {kind} search");
            return false;
        }
    };

    match timeout(limit, child.wait()).await {
        Ok(Ok(status)) if status.success() => {
            info!("{kind} search for '{query}' completed successfully");
            true
        }
        Ok(Ok(status)) => {
            error!(code = ?status.code(), "{kind} search for '{query}' failed");
            false
        }
        Ok(Err(e)) => {
            error!(error = %e, "{kind} search for '{query}' failed");
            false
        }
        Err(_) => {
            if let Err(e) = child.kill().await {
                warn!(error = %e, "Failed to kill timed out child");
            }
            error!("{kind} search for '{query}' timed out");
            false
        }
    }
}

/// Register the query and run both search scrapers for it.
#[instrument(level = "info", skip(mongo, config_path))]
pub async fn on_the_fly_search(mongo: &MongoStore, query: &str, config_path: Option<&PathBuf>) -> bool {
    if let Err(e) = topics::add_topic(mongo.database(), query, ONDEMAND_CATEGORY, 1, true).await {
        warn!(error = %e, "Could not register on-demand topic");
    }
    let (duck, google) = tokio::join!(
        run_child(ScraperKind::Duckduckgo, query, config_path, CHILD_TIMEOUT),
        run_child(ScraperKind::Gnews, query, config_path, CHILD_TIMEOUT),
    );
    let success = duck || google;
    if success {
        info!("On-the-fly search for '{query}' completed successfully");
    } else {
        error!("On-the-fly search for '{query}' failed");
    }
    success
}

/// Scrape, wait, read back. Adds the permanent topic only after a
/// successful scrape.
pub async fn run_fly(mongo: &MongoStore, opts: &FlyOptions) -> Result<FlyOutcome, Box<dyn std::error::Error>> {
    let lookup = |days: i64| SearchQuery {
        text: opts.query.clone(),
        days,
        ..SearchQuery::default()
    };

    if !on_the_fly_search(mongo, &opts.query, opts.config_path.as_ref()).await {
        let articles = search_news(mongo, &lookup(FALLBACK_DAYS)).await?;
        return Ok(FlyOutcome::Existing(articles));
    }

    sleep(opts.wait).await;
    let mut articles = search_news(mongo, &lookup(1)).await?;
    let widened = articles.is_empty();
    if widened {
        info!(days = opts.days, "No results in the past day; widening");
        articles = search_news(mongo, &lookup(opts.days)).await?;
    }

    if opts.add_topic {
        topics::add_topic(mongo.database(), &opts.query, SEARCH_CATEGORY, DEFAULT_PRIORITY, true).await?;
        info!("Added '{}' as a permanent topic", opts.query);
    }
    Ok(FlyOutcome::Fresh { articles, widened })
}
