//! # newsdesk
//!
//! Scheduled financial news scrapers with MongoDB storage, an optional
//! ClickHouse mirror and a small process orchestrator.
//!
//! ## Features
//!
//! - Three scrapers: DuckDuckGo news search, Google News search and
//!   registered RSS/Atom feeds
//! - Articles normalized to one shape, deduplicated by URL and upserted into
//!   MongoDB, with new rows mirrored into ClickHouse
//! - Topics (search queries) and feed sources managed in MongoDB
//! - Orchestrator that starts, stops and monitors the scrapers as background
//!   processes and tracks them in `processes.json`
//! - Keyword search, on-the-fly scraping of a single query, feed discovery
//!   and a MongoDB to ClickHouse migration
//!
//! ## Usage
//!
//! ```sh
//! newsdesk start
//! newsdesk status --logs
//! newsdesk search --query "rate cut" --days 3
//! ```
//!
//! ## Architecture
//!
//! Every scraper pass follows the same pipeline:
//! 1. **Work items**: active topics (search scrapers) or active feeds (RSS)
//! 2. **Fetching**: per item, with retries and a random Tor proxy
//! 3. **Normalizing**: sort, dedupe, drop boilerplate
//! 4. **Saving**: each store gets the articles it lacks, written concurrently

use chrono::{Duration as ChronoDuration, Utc};
use clap::Parser;
use std::error::Error;
use std::process::ExitCode;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, error, info, instrument, warn};

mod catalog;
mod cli;
mod config;
mod discover;
mod logging;
mod models;
mod normalize;
mod orchestrator;
mod outputs;
mod proxy;
mod retry;
mod scrapers;
mod storage;
mod utils;

use catalog::{sources, topics};
use cli::{Cli, Command, SourcesAction, TopicsAction, explicit_state};
use config::AppConfig;
use orchestrator::fly::{FlyOptions, FlyOutcome, run_fly};
use orchestrator::process::Supervisor;
use orchestrator::search::{SEARCH_CATEGORY, parse_sources, prompt_query, search_news};
use orchestrator::status::update_status;
use outputs::console;
use proxy::ProxyPool;
use scrapers::runner::{RunOptions, Scraper, shutdown_signal};
use storage::migrate::{MigrationOptions, migrate_to_clickhouse};
use storage::{ClickHouseStore, MongoStore, SearchQuery};
use utils::ensure_writable_dir;

/// Lines shown per log by `status --logs`.
const LOG_DETAIL_LINES: usize = 20;
const MONITOR_INTERVAL: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> Result<ExitCode, Box<dyn Error>> {
    let args = Cli::parse();
    let config = AppConfig::load(args.config.as_deref())?;

    let component = match &args.command {
        Command::Scrape(s) => s.kind.name(),
        _ => "main",
    };
    ensure_writable_dir(&config.paths.log_dir).await?;
    logging::init(component, &config.paths.log_dir)?;
    debug!(command = ?args.command, "Parsed CLI arguments");

    let start_time = std::time::Instant::now();
    let result = dispatch(args, config).await;
    info!(elapsed_ms = start_time.elapsed().as_millis() as u64, "newsdesk finished");

    match result {
        Ok(true) => Ok(ExitCode::SUCCESS),
        Ok(false) => Ok(ExitCode::FAILURE),
        Err(e) => {
            error!(error = %e, "Command failed");
            Err(e)
        }
    }
}

/// Run one command. `Ok(false)` maps to exit status 1.
async fn dispatch(args: Cli, config: AppConfig) -> Result<bool, Box<dyn Error>> {
    let config_path = args.config.clone();
    match args.command {
        Command::Scrape(s) => {
            let opts = RunOptions {
                test_mode: s.test,
                no_wait: s.no_wait,
                query: s.query.filter(|q| !q.trim().is_empty()),
                category: s.category,
                no_mongodb: s.no_mongodb,
                no_clickhouse: s.no_clickhouse,
            };
            let scraper = Scraper::connect(s.kind, config, opts).await?;
            Ok(scraper.run().await)
        }

        Command::Start { test } => {
            logging::log_start("Main Orchestrator", test);
            let mongo = MongoStore::connect(&config.mongodb).await?;
            match topics::initialize_topics(mongo.database()).await {
                Ok(n) if n > 0 => info!(count = n, "Initialized default topics"),
                Ok(_) => {}
                Err(e) => warn!(error = %e, "Could not initialize topics"),
            }
            let mut sup = Supervisor::new(&config.paths.process_file, config_path);
            let ok = sup.start_all(test);
            refresh_status(&mut sup, &config);
            println!(
                "{}",
                if ok { "All scrapers started successfully" } else { "Error starting scrapers" }
            );
            logging::log_end("Main Orchestrator", ok);
            Ok(ok)
        }

        Command::Stop => {
            let mut sup = Supervisor::new(&config.paths.process_file, config_path);
            let ok = sup.stop_all().await;
            refresh_status(&mut sup, &config);
            println!(
                "{}",
                if ok { "All scrapers stopped successfully" } else { "Error stopping scrapers" }
            );
            Ok(ok)
        }

        Command::Restart { test } => {
            let mut sup = Supervisor::new(&config.paths.process_file, config_path);
            let ok = sup.restart_all(test).await;
            refresh_status(&mut sup, &config);
            println!(
                "{}",
                if ok { "All scrapers restarted successfully" } else { "Error restarting scrapers" }
            );
            Ok(ok)
        }

        Command::Status { logs, monitor } => {
            let mut sup = Supervisor::new(&config.paths.process_file, config_path.clone());
            if monitor {
                println!("Monitoring status (press Ctrl+C to stop)...");
                loop {
                    print!("\x1bc");
                    println!("Status at {}\n{}", Utc::now().format("%Y-%m-%d %H:%M:%S"), "-".repeat(80));
                    print_status(&mut sup, &config);
                    tokio::select! {
                        _ = sleep(MONITOR_INTERVAL) => {}
                        _ = shutdown_signal() => {
                            println!("\nStopping monitor");
                            break;
                        }
                    }
                    // pick up processes started or stopped meanwhile
                    sup = Supervisor::new(&config.paths.process_file, config_path.clone());
                }
            } else {
                print_status(&mut sup, &config);
                if logs {
                    print!("{}", console::render_log_details(&config.paths.log_dir, LOG_DETAIL_LINES));
                }
            }
            Ok(true)
        }

        Command::Search(s) => {
            let text = match s.query.filter(|q| !q.trim().is_empty()) {
                Some(q) => q,
                None => prompt_query(std::io::stdin().lock(), std::io::stdout())?,
            };
            let mongo = MongoStore::connect(&config.mongodb).await?;
            let query = SearchQuery {
                text: text.clone(),
                days: s.days,
                sources: parse_sources(s.sources.as_deref()),
                limit: s.limit,
            };
            let articles = search_news(&mongo, &query).await?;
            print!("{}", console::render_search_results(&articles));
            if s.add_topic {
                if topics::add_topic(mongo.database(), &text, SEARCH_CATEGORY, topics::DEFAULT_PRIORITY, true).await? {
                    println!("Added '{text}' as a topic");
                } else {
                    println!("Failed to add '{text}' as a topic");
                }
            }
            Ok(true)
        }

        Command::Fly(f) => {
            println!("Running on-the-fly search for '{}'...", f.query);
            let mongo = MongoStore::connect(&config.mongodb).await?;
            let opts = FlyOptions {
                query: f.query.clone(),
                add_topic: f.add_topic,
                days: f.days,
                wait: Duration::from_secs(f.wait),
                config_path,
            };
            match run_fly(&mongo, &opts).await? {
                FlyOutcome::Fresh { articles, widened } => {
                    println!("On-the-fly search for '{}' completed successfully", f.query);
                    if widened {
                        println!("No results found in the past day, searching past {} days...", f.days);
                    }
                    print!("{}", console::render_search_results(&articles));
                    if f.add_topic {
                        println!("Added '{}' as a permanent topic", f.query);
                    }
                    Ok(true)
                }
                FlyOutcome::Existing(articles) => {
                    println!("On-the-fly search for '{}' failed", f.query);
                    if articles.is_empty() {
                        println!("No existing content found for this query.");
                    } else {
                        println!("\nHere are some existing results for this query:");
                        print!("{}", console::render_search_results(&articles));
                    }
                    Ok(false)
                }
            }
        }

        Command::Topics { action } => {
            let mongo = MongoStore::connect(&config.mongodb).await?;
            run_topics(&mongo, action).await
        }

        Command::Sources { action } => {
            let mongo = MongoStore::connect(&config.mongodb).await?;
            run_sources(&mongo, action).await
        }

        Command::Db(d) => {
            let mongo = MongoStore::connect(&config.mongodb).await?;
            if d.fix_dates {
                let fixed = mongo.ensure_date_format().await?;
                println!("Fixed {fixed} date fields in MongoDB News collection");
            }
            if d.count || d.stats {
                let total = mongo.count_articles().await?;
                let unique = mongo.count_unique_urls().await?;
                if d.stats {
                    print!("{}", console::render_db_stats(total, unique));
                } else {
                    println!("Total articles: {total}");
                    println!("Unique URLs: {unique}");
                }
            }
            Ok(true)
        }

        Command::Clickhouse(c) => {
            let mut store = ClickHouseStore::new(&config.clickhouse);
            if let Some(table) = &c.table {
                store = store.with_table(table);
            }
            let mut ok = true;
            if let Some(table) = &c.check_table {
                println!("Checking availability of table {table}...");
                if store.check_table_availability(table).await? {
                    println!("Table {table} accepts inserts");
                } else {
                    println!("Table {table} does not accept inserts");
                    ok = false;
                }
            }
            if c.create_table {
                println!("Creating news table...");
                match store.create_table_if_not_exists().await {
                    Ok(()) => println!("Table {} ready", store.qualified_table()),
                    Err(e) => {
                        println!("Error creating table: {e}");
                        ok = false;
                    }
                }
            }
            if c.count_sources {
                let counts = store.count_by_source(c.days).await?;
                print!("{}", console::render_source_counts(&counts, c.days));
            }
            if let Some(text) = c.search {
                println!("Searching '{text}' over the last {} days:", c.days);
                let query = SearchQuery {
                    text,
                    days: c.days,
                    sources: Vec::new(),
                    limit: c.limit,
                };
                print!("{}", console::render_compact_results(&store.search(&query).await?));
            }
            Ok(ok)
        }

        Command::Migrate(m) => {
            let mongo = MongoStore::connect(&config.mongodb).await?;
            let mut clickhouse = ClickHouseStore::new(&config.clickhouse).with_dedup(!m.skip_existing);
            if let Some(table) = &m.table {
                clickhouse = clickhouse.with_table(table);
            }
            let after = m
                .last_days
                .map(|days| Utc::now() - ChronoDuration::days(days))
                .or(m.after);
            let opts = MigrationOptions {
                batch_size: m.batch_size.max(1),
                after,
                before: m.before,
                skip_if_exists: m.skip_existing,
                test_mode: m.test,
                ..MigrationOptions::default()
            };
            let stats = migrate_to_clickhouse(&mongo, &clickhouse, &opts).await?;
            println!("Migration summary:");
            println!("  Processed: {}", stats.total_processed);
            println!("  Migrated:  {}", stats.total_migrated);
            println!("  Skipped:   {}", stats.total_skipped);
            println!("  Batches:   {}", stats.batches);
            println!("  Errors:    {}", stats.errors);
            Ok(stats.errors == 0)
        }

        Command::Discover(d) => {
            let mongo = MongoStore::connect(&config.mongodb).await?;
            let opts = discover::DiscoverOptions {
                days: d.days,
                min_occurrence: d.min_occurrence,
                limit: d.limit,
                ..discover::DiscoverOptions::default()
            };
            let suggestions = discover::suggest_new_sources(&mongo, &opts).await?;
            print!("{}", console::render_suggestions(&suggestions));

            if d.add && !suggestions.is_empty() {
                println!("\nAutomatically adding discovered sources:");
                let mut added = 0;
                for s in &suggestions {
                    match discover::add_suggested_source(mongo.database(), s, &d.category).await {
                        Ok(true) => {
                            println!("Added: {} ({})", s.feed_title, s.domain);
                            added += 1;
                        }
                        Ok(false) => {}
                        Err(e) => warn!(feed = %s.feed_url, error = %e, "Failed to add source"),
                    }
                    sleep(Duration::from_millis(500)).await;
                }
                println!("\nAdded {added} new sources to the database");
            }
            Ok(true)
        }

        Command::Proxies => {
            let pool = ProxyPool::from_torrc_dirs(&config.proxy.torrc_dirs);
            print!("{}", console::render_proxies(pool.proxies(), &pool.random()));
            Ok(true)
        }
    }
}

#[instrument(level = "info", skip(mongo))]
async fn run_topics(mongo: &MongoStore, action: TopicsAction) -> Result<bool, Box<dyn Error>> {
    let db = mongo.database();
    match action {
        TopicsAction::Init => {
            let added = topics::initialize_topics(db).await?;
            println!("Topics initialized ({added} added)");
        }
        TopicsAction::List { category, all } => {
            let list = topics::list_topics(db, category.as_deref(), all).await?;
            print!("{}", console::render_topics(&list, category.as_deref()));
        }
        TopicsAction::Add {
            query,
            category,
            priority,
            inactive,
        } => {
            if topics::add_topic(db, &query, &category, priority, !inactive).await? {
                println!("Topic added: {query}");
            } else {
                println!("Failed to add topic: {query}");
                return Ok(false);
            }
        }
        TopicsAction::Remove { query } => {
            if topics::remove_topic(db, &query).await? {
                println!("Topic removed: {query}");
            } else {
                println!("Topic not found: {query}");
                return Ok(false);
            }
        }
        TopicsAction::Toggle { query, enable, disable } => {
            match topics::toggle_topic(db, &query, explicit_state(enable, disable)).await? {
                Some(active) => {
                    println!("Topic {query} {}", if active { "enabled" } else { "disabled" });
                }
                None => {
                    println!("Failed to update topic: {query}");
                    return Ok(false);
                }
            }
        }
        TopicsAction::Priority { query, priority } => {
            if topics::update_priority(db, &query, priority).await? {
                println!("Updated priority for {query} to {priority}");
            } else {
                println!("Failed to update topic: {query}");
                return Ok(false);
            }
        }
        TopicsAction::Category { query, category } => {
            if topics::update_category(db, &query, &category).await? {
                println!("Updated category for {query} to {category}");
            } else {
                println!("Failed to update topic: {query}");
                return Ok(false);
            }
        }
    }
    Ok(true)
}

#[instrument(level = "info", skip(mongo))]
async fn run_sources(mongo: &MongoStore, action: SourcesAction) -> Result<bool, Box<dyn Error>> {
    let db = mongo.database();
    match action {
        SourcesAction::Init => {
            let added = sources::initialize_sources(db).await?;
            println!("Sources collection initialized ({added} added)");
        }
        SourcesAction::List { all, category } => {
            let list = sources::list_sources(db, !all, category.as_deref()).await?;
            print!("{}", console::render_sources(&list));
        }
        SourcesAction::Add {
            site,
            rss,
            name,
            category,
            inactive,
        } => {
            if sources::add_source(db, &site, &rss, &name, &category, !inactive).await? {
                println!("Added new source: {name} ({site})");
            } else {
                println!("Failed to add source: {name} ({site})");
                return Ok(false);
            }
        }
        SourcesAction::Toggle {
            site,
            rss,
            activate,
            deactivate,
        } => match sources::toggle_source(db, &site, &rss, explicit_state(activate, deactivate)).await? {
            Some(active) => {
                let state = if active { "activated" } else { "deactivated" };
                println!("Source {state}: {site} - {rss}");
            }
            None => {
                println!("Failed to toggle source: {site} - {rss}");
                return Ok(false);
            }
        },
        SourcesAction::Remove { site, rss } => {
            if sources::remove_source(db, &site, &rss).await? {
                println!("Removed source: {site} - {rss}");
            } else {
                println!("Failed to remove source: {site} - {rss}");
                return Ok(false);
            }
        }
    }
    Ok(true)
}

/// Rewrite `status.json` after a start/stop.
fn refresh_status(sup: &mut Supervisor, config: &AppConfig) {
    let registry = sup.registry().clone();
    update_status(
        &registry,
        sup.system_mut(),
        &config.paths.log_dir,
        &config.paths.status_file,
    );
}

fn print_status(sup: &mut Supervisor, config: &AppConfig) {
    if sup.registry().is_empty() {
        println!("No scripts are being tracked");
        return;
    }
    let registry = sup.registry().clone();
    let report = update_status(
        &registry,
        sup.system_mut(),
        &config.paths.log_dir,
        &config.paths.status_file,
    );
    print!("{}", console::render_status(&report, Utc::now()));
}
