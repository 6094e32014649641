//! Command-line interface definitions for newsdesk.
//!
//! One binary covers the scrapers themselves (`scrape <kind>`), the process
//! orchestrator (`start`, `stop`, `restart`, `status`), search and the
//! catalog/maintenance commands. Scraper flags can also come from the
//! environment the orchestrator sets on its children.
//!
//! # Examples
//!
//! ```sh
//! # Run all scrapers in the background, then watch them
//! newsdesk start
//! newsdesk status --monitor
//!
//! # One test pass of the RSS scraper in the foreground
//! newsdesk scrape websites --test
//!
//! # Scrape a query right now and show the results
//! newsdesk fly "copper tariffs" --add-topic
//! ```

use chrono::{DateTime, NaiveDate, Utc};
use clap::builder::FalseyValueParser;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use crate::catalog::topics::{DEFAULT_CATEGORY, DEFAULT_PRIORITY};
use crate::discover::DISCOVERED_CATEGORY;
use crate::scrapers::ScraperKind;

#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Cli {
    /// Optional path to a YAML config file (default: ./newsdesk.yaml if present)
    #[arg(short, long, global = true, env = "NEWSDESK_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run one scraper in the foreground
    Scrape(ScrapeArgs),
    /// Start all scrapers in the background
    Start {
        #[arg(long)]
        test: bool,
    },
    /// Stop all scrapers
    Stop,
    /// Stop, then start all scrapers
    Restart {
        #[arg(long)]
        test: bool,
    },
    /// Show scraper, system and log status
    Status {
        /// Print the last 20 lines of every log
        #[arg(long)]
        logs: bool,
        /// Refresh every 5 seconds until Ctrl-C
        #[arg(long)]
        monitor: bool,
    },
    /// Search stored articles
    Search(SearchArgs),
    /// Scrape one query now, then show the results
    Fly(FlyArgs),
    /// Manage search topics
    Topics {
        #[command(subcommand)]
        action: TopicsAction,
    },
    /// Manage RSS feed sources
    Sources {
        #[command(subcommand)]
        action: SourcesAction,
    },
    /// MongoDB maintenance
    Db(DbArgs),
    /// ClickHouse maintenance and queries
    Clickhouse(ClickHouseArgs),
    /// Copy MongoDB articles into ClickHouse
    Migrate(MigrateArgs),
    /// Suggest new RSS sources from domains in recent articles
    Discover(DiscoverArgs),
    /// List the Tor proxies the scrapers rotate through
    Proxies,
}

#[derive(Args, Debug, Clone)]
pub struct ScrapeArgs {
    #[arg(value_enum)]
    pub kind: ScraperKind,

    /// Limited run: two work items, one pass
    #[arg(long, env = "TEST_MODE", value_parser = FalseyValueParser::new())]
    pub test: bool,

    /// Run one pass and exit
    #[arg(long, env = "NO_WAIT", value_parser = FalseyValueParser::new())]
    pub no_wait: bool,

    /// Search this query instead of the stored topics
    #[arg(long, env = "QUERY")]
    pub query: Option<String>,

    /// Only topics or feeds of this category
    #[arg(long, env = "CATEGORY")]
    pub category: Option<String>,

    /// Do not write to MongoDB
    #[arg(long)]
    pub no_mongodb: bool,

    /// Do not write to ClickHouse
    #[arg(long)]
    pub no_clickhouse: bool,
}

#[derive(Args, Debug, Clone)]
pub struct SearchArgs {
    /// Search query (prompted for when omitted)
    #[arg(long)]
    pub query: Option<String>,
    #[arg(long, default_value_t = 7)]
    pub days: i64,
    /// Comma-separated source names
    #[arg(long)]
    pub sources: Option<String>,
    #[arg(long, default_value_t = 20)]
    pub limit: usize,
    /// Also add the query as a topic
    #[arg(long)]
    pub add_topic: bool,
}

#[derive(Args, Debug, Clone)]
pub struct FlyArgs {
    pub query: String,
    /// Keep the query as a permanent topic
    #[arg(long)]
    pub add_topic: bool,
    /// Look-back when the past day has no results
    #[arg(long, default_value_t = 7)]
    pub days: i64,
    /// Seconds to wait for writes before reading back
    #[arg(long, default_value_t = 2)]
    pub wait: u64,
}

#[derive(Subcommand, Debug, Clone)]
pub enum TopicsAction {
    /// Seed the default topics if none exist
    Init,
    List {
        #[arg(long)]
        category: Option<String>,
        /// Include inactive topics
        #[arg(long)]
        all: bool,
    },
    Add {
        query: String,
        #[arg(long, default_value = DEFAULT_CATEGORY)]
        category: String,
        /// 1-10, lower runs first
        #[arg(long, default_value_t = DEFAULT_PRIORITY, value_parser = clap::value_parser!(i32).range(1..=10))]
        priority: i32,
        #[arg(long)]
        inactive: bool,
    },
    Remove {
        query: String,
    },
    Toggle {
        query: String,
        #[arg(long, conflicts_with = "disable")]
        enable: bool,
        #[arg(long)]
        disable: bool,
    },
    Priority {
        query: String,
        #[arg(value_parser = clap::value_parser!(i32).range(1..=10))]
        priority: i32,
    },
    Category {
        query: String,
        category: String,
    },
}

#[derive(Subcommand, Debug, Clone)]
pub enum SourcesAction {
    /// Create the collection and seed the default feeds
    Init,
    List {
        /// Include inactive sources
        #[arg(long)]
        all: bool,
        #[arg(long)]
        category: Option<String>,
    },
    Add {
        /// Website host, e.g. www.example.com
        #[arg(long)]
        site: String,
        #[arg(long)]
        rss: String,
        /// Display name stored as the article source
        #[arg(long)]
        name: String,
        #[arg(long, default_value = DEFAULT_CATEGORY)]
        category: String,
        #[arg(long)]
        inactive: bool,
    },
    Toggle {
        #[arg(long)]
        site: String,
        #[arg(long)]
        rss: String,
        #[arg(long, conflicts_with = "deactivate")]
        activate: bool,
        #[arg(long)]
        deactivate: bool,
    },
    Remove {
        #[arg(long)]
        site: String,
        #[arg(long)]
        rss: String,
    },
}

#[derive(Args, Debug, Clone)]
pub struct DbArgs {
    /// Convert string dates to BSON dates
    #[arg(long)]
    pub fix_dates: bool,
    /// Count articles and unique URLs
    #[arg(long)]
    pub count: bool,
    /// Duplication statistics
    #[arg(long)]
    pub stats: bool,
}

#[derive(Args, Debug, Clone)]
pub struct ClickHouseArgs {
    #[arg(long)]
    pub create_table: bool,
    /// Verify that a table accepts inserts
    #[arg(long)]
    pub check_table: Option<String>,
    #[arg(long)]
    pub count_sources: bool,
    #[arg(long)]
    pub search: Option<String>,
    #[arg(long, default_value_t = 30)]
    pub days: i64,
    #[arg(long, default_value_t = 20)]
    pub limit: usize,
    /// Table to use instead of the configured one
    #[arg(long)]
    pub table: Option<String>,
}

#[derive(Args, Debug, Clone)]
pub struct MigrateArgs {
    #[arg(long, default_value_t = 1000)]
    pub batch_size: usize,
    /// Only articles on or after this day (YYYY-MM-DD)
    #[arg(long, value_parser = parse_day)]
    pub after: Option<DateTime<Utc>>,
    /// Only articles before this day (YYYY-MM-DD)
    #[arg(long, value_parser = parse_day)]
    pub before: Option<DateTime<Utc>>,
    /// Shorthand for --after <today - N days>
    #[arg(long, conflicts_with = "after")]
    pub last_days: Option<i64>,
    /// Skip URLs already in ClickHouse
    #[arg(long)]
    pub skip_existing: bool,
    /// Count and preview without writing
    #[arg(long)]
    pub test: bool,
    /// Table to migrate into instead of the configured one
    #[arg(long)]
    pub table: Option<String>,
}

#[derive(Args, Debug, Clone)]
pub struct DiscoverArgs {
    /// Days of articles to analyze
    #[arg(long, default_value_t = 30)]
    pub days: i64,
    /// Minimum references for a domain to be considered
    #[arg(long, default_value_t = 3)]
    pub min_occurrence: usize,
    /// Maximum number of domains to check
    #[arg(long, default_value_t = 20)]
    pub limit: usize,
    /// Register the discovered feeds
    #[arg(long)]
    pub add: bool,
    #[arg(long, default_value = DISCOVERED_CATEGORY)]
    pub category: String,
}

/// `YYYY-MM-DD` as midnight UTC.
pub fn parse_day(s: &str) -> Result<DateTime<Utc>, String> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .map_err(|e| format!("invalid date {s:?} (expected YYYY-MM-DD): {e}"))?
        .and_hms_opt(0, 0, 0)
        .map(|dt| dt.and_utc())
        .ok_or_else(|| format!("invalid date {s:?}"))
}

/// `true`, `false` or `None` (flip) from a pair of opposing flags.
pub fn explicit_state(on: bool, off: bool) -> Option<bool> {
    match (on, off) {
        (true, _) => Some(true),
        (_, true) => Some(false),
        _ => None,
    }
}
