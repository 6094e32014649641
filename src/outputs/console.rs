//! Plain-text tables and listings printed by the CLI commands.
//!
//! Every function renders to a `String`; the command handlers print it.

use chrono::{DateTime, Utc};
use itertools::Itertools;
use std::fmt::Write;
use std::path::Path;

use crate::discover::SuggestedSource;
use crate::models::{Article, FeedSource, Topic};
use crate::orchestrator::status::StatusReport;
use crate::proxy::ProxyEndpoint;
use crate::storage::clickhouse::SourceCount;
use crate::utils::tail_lines;

fn rule() -> String {
    "-".repeat(80)
}

fn short_date(date: DateTime<Utc>) -> String {
    date.format("%Y-%m-%d %H:%M").to_string()
}

/// Host resources, the process table and one line per log file.
pub fn render_status(report: &StatusReport, now: DateTime<Utc>) -> String {
    let mut out = String::new();
    let sys = &report.system;
    let _ = writeln!(out, "System Status:");
    let _ = writeln!(out, "  CPU: {:.1}%", sys.cpu_percent);
    let _ = writeln!(
        out,
        "  Memory: {:.1}% ({} MB used of {} MB)",
        sys.memory_percent, sys.memory_used_mb, sys.memory_total_mb
    );
    let _ = writeln!(out, "  Disk: {:.1}% used\n", sys.disk_percent);

    let _ = writeln!(
        out,
        "{:<25} {:<10} {:<8} {:<8} {:<12} {:<15}",
        "SCRIPT", "STATUS", "PID", "CPU", "MEMORY", "UPTIME"
    );
    let _ = writeln!(out, "{}", rule());
    for (name, p) in &report.processes {
        let state = if p.running { "RUNNING" } else { "STOPPED" };
        let cpu = p.cpu_percent.map_or("N/A".to_string(), |c| format!("{c:.1}%"));
        let mem = p.memory_mb.map_or("N/A".to_string(), |m| format!("{m:.1} MB"));
        let uptime = p.uptime.as_deref().unwrap_or("N/A");
        let _ = writeln!(
            out,
            "{name:<25} {state:<10} {:<8} {cpu:<8} {mem:<12} {uptime:<15}",
            p.pid
        );
    }

    let _ = writeln!(out, "\nLog Status:");
    if report.logs.is_empty() {
        let _ = writeln!(out, "  No logs found");
    }
    for (name, log) in &report.logs {
        let state = if log.has_errors { "ERRORS" } else { "OK" };
        let kb = log.size as f64 / 1024.0;
        match log.last_modified {
            Some(modified) => {
                let _ = writeln!(
                    out,
                    "  {name:<23} {state:<8} {kb:.1} KB  Last update: {} ({} min ago)",
                    modified.format("%Y-%m-%d %H:%M:%S"),
                    (now - modified).num_minutes().max(0)
                );
            }
            None => {
                let _ = writeln!(out, "  {name:<23} {state:<8} {kb:.1} KB");
            }
        }
    }
    out
}

/// Last `lines` lines of every log in `log_dir`.
pub fn render_log_details(log_dir: &Path, lines: usize) -> String {
    let mut out = String::from("\nDetailed Log Analysis:\n");
    let Ok(dir) = std::fs::read_dir(log_dir) else {
        out.push_str("No logs directory found\n");
        return out;
    };
    let logs = dir
        .filter_map(Result::ok)
        .map(|e| e.path())
        .filter(|p| p.extension().is_some_and(|ext| ext == "log"))
        .sorted();
    for path in logs {
        let name = path.file_stem().and_then(|s| s.to_str()).unwrap_or_default();
        let _ = writeln!(out, "\n{name} Log:\n{}", rule());
        match tail_lines(&path, lines) {
            Ok(tail) => tail.iter().for_each(|l| {
                let _ = writeln!(out, "{}", l.trim());
            }),
            Err(e) => {
                let _ = writeln!(out, "Error reading log: {e}");
            }
        }
    }
    out
}

pub fn render_search_results(articles: &[Article]) -> String {
    if articles.is_empty() {
        return "No results found\n".to_string();
    }
    let mut out = format!("Found {} articles:\n{}\n", articles.len(), rule());
    for (i, a) in articles.iter().enumerate() {
        let title = if a.title.is_empty() { "No title" } else { &a.title };
        let _ = writeln!(out, "{}. {title}", i + 1);
        let _ = writeln!(out, "   Source: {} | Date: {}", a.source, short_date(a.date));
        let _ = writeln!(out, "   URL: {}", a.url);
        let _ = writeln!(out, "{}", rule());
    }
    out
}

pub fn render_topics(topics: &[Topic], category: Option<&str>) -> String {
    if topics.is_empty() {
        return match category {
            Some(c) => format!("No topics found in category '{c}'\n"),
            None => "No topics found\n".to_string(),
        };
    }
    let mut out = format!(
        "{:<30} {:<15} {:<10} {:<10}\n{}\n",
        "QUERY",
        "CATEGORY",
        "PRIORITY",
        "STATUS",
        "-".repeat(65)
    );
    for t in topics {
        let state = if t.active { "active" } else { "inactive" };
        let _ = writeln!(out, "{:<30} {:<15} {:<10} {state:<10}", t.query, t.category, t.priority);
    }
    out
}

/// Feeds grouped under a header per category; expects input sorted by category.
pub fn render_sources(sources: &[FeedSource]) -> String {
    if sources.is_empty() {
        return "No sources found\n".to_string();
    }
    let mut out = format!("Found {} sources:\n{}\n", sources.len(), rule());
    for (category, group) in &sources.iter().chunk_by(|s| s.category.as_str()) {
        let _ = writeln!(out, "\nCategory: {}\n{}", category.to_uppercase(), rule());
        for s in group {
            let state = if s.active { "Active" } else { "Inactive" };
            let _ = writeln!(out, "{} ({state})", s.source);
            let _ = writeln!(out, "  Site: {}", s.site);
            let _ = writeln!(out, "  RSS: {}", s.rss);
            if let Some(added) = s.added_date {
                let _ = writeln!(out, "  Added: {}", added.format("%Y-%m-%d"));
            }
            let _ = writeln!(out, "{}", rule());
        }
    }
    out
}

/// Discovery suggestions grouped by domain.
pub fn render_suggestions(suggestions: &[SuggestedSource]) -> String {
    if suggestions.is_empty() {
        return "No new sources to suggest\n".to_string();
    }
    let mut out = format!("Found {} potential new sources:\n{}\n", suggestions.len(), rule());
    for ((domain, references), group) in &suggestions.iter().chunk_by(|s| (s.domain.as_str(), s.references)) {
        let _ = writeln!(out, "\nDomain: {domain} (referenced {references} times)\n{}", rule());
        for s in group {
            let _ = writeln!(out, "  Feed: {}", s.feed_title);
            let _ = writeln!(out, "  URL: {}", s.feed_url);
            let _ = writeln!(
                out,
                "  Add command: newsdesk sources add --site www.{domain} --rss \"{}\" --name \"{}\"",
                s.feed_url, s.feed_title
            );
            let _ = writeln!(out, "{}", rule());
        }
    }
    out
}

pub fn render_source_counts(counts: &[SourceCount], days: i64) -> String {
    let mut out = format!("Articles per source over the last {days} days:\n");
    let _ = writeln!(
        out,
        "{:<30} {:<10} {:<20} {:<20}\n{}",
        "SOURCE",
        "ARTICLES",
        "FIRST ARTICLE",
        "LAST ARTICLE",
        rule()
    );
    for c in counts {
        let _ = writeln!(
            out,
            "{:<30} {:<10} {:<20} {:<20}",
            c.source,
            c.count,
            short_date(c.first_date),
            short_date(c.last_date)
        );
    }
    out
}

/// Compact one-line-per-article table for ClickHouse search results.
pub fn render_compact_results(articles: &[Article]) -> String {
    if articles.is_empty() {
        return "No results found\n".to_string();
    }
    let mut out = format!("Found {} articles:\n{:<15} {:<20} TITLE\n{}\n", articles.len(), "DATE", "SOURCE", rule());
    for a in articles {
        let source: String = a.source.chars().take(18).collect();
        let title: String = a.title.chars().take(60).collect();
        let _ = writeln!(out, "{:<15} {source:<20} {title}", a.date.format("%Y-%m-%d"));
    }
    out
}

/// Totals, unique URLs and duplication rate of the document store.
pub fn render_db_stats(total: u64, unique: u64) -> String {
    let duplicates = total.saturating_sub(unique);
    let mut out = String::from("MongoDB Database Statistics\n");
    let _ = writeln!(out, "{}", "=".repeat(40));
    let _ = writeln!(out, "Total articles: {total}");
    let _ = writeln!(out, "Unique URLs: {unique}");
    let _ = writeln!(out, "Duplicates: {duplicates}");
    if total > 0 {
        let _ = writeln!(out, "Duplication rate: {:.1}%", duplicates as f64 * 100.0 / total as f64);
        let _ = writeln!(out, "Unique rate: {:.1}%", unique as f64 * 100.0 / total as f64);
    }
    out
}

pub fn render_proxies(proxies: &[ProxyEndpoint], random: &ProxyEndpoint) -> String {
    let mut out = format!("Found {} Tor proxies:\n", proxies.len());
    for (i, p) in proxies.iter().enumerate() {
        let _ = writeln!(out, "{}. {}", i + 1, p.https);
    }
    let _ = writeln!(out, "\nRandom proxy: {}", random.https);
    out
}
