//! News scrapers.
//!
//! Three scrapers share one run loop ([`runner`]) and differ only in how a
//! work item becomes articles:
//!
//! | Kind | Module | Work item | Method |
//! |------|--------|-----------|--------|
//! | `duckduckgo` | [`duckduckgo`] | topic query | `news.js` JSON API |
//! | `gnews` | [`gnews`] | topic query | Google News RSS search |
//! | `websites` | [`rss`] | registered feed | RSS/Atom download |
//!
//! Each scraper runs as its own process (`newsdesk scrape <kind>`) and logs
//! to `<log_dir>/<kind>.log`.
//!
//! # Common Patterns
//!
//! - every request goes through [`build_client`], optionally via a random Tor
//!   SOCKS proxy picked per attempt
//! - failed or empty fetches are retried by [`crate::retry::RetryPolicy`]
//! - a failed work item is logged and skipped; the pass continues

pub mod duckduckgo;
pub mod feed;
pub mod gnews;
pub mod rss;
pub mod runner;

use clap::ValueEnum;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use crate::proxy::ProxyEndpoint;

pub const USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0 Safari/537.36";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScraperKind {
    Duckduckgo,
    Gnews,
    Websites,
}

impl ScraperKind {
    pub const ALL: [ScraperKind; 3] = [Self::Duckduckgo, Self::Gnews, Self::Websites];

    /// Process, log file and registry key.
    pub fn name(self) -> &'static str {
        match self {
            Self::Duckduckgo => "duckduckgo",
            Self::Gnews => "gnews",
            Self::Websites => "websites",
        }
    }

    pub fn display_name(self) -> &'static str {
        match self {
            Self::Duckduckgo => "DuckDuckGo News Scraper",
            Self::Gnews => "Google News Scraper",
            Self::Websites => "RSS Feed Scraper",
        }
    }

    /// Whether work items are topic queries (as opposed to feeds).
    pub fn is_search(self) -> bool {
        !matches!(self, Self::Websites)
    }
}

impl fmt::Display for ScraperKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// HTTP client with the scraper user agent, a request timeout and an
/// optional SOCKS proxy.
pub fn build_client(proxy: Option<&ProxyEndpoint>, timeout: Duration) -> Result<Client, reqwest::Error> {
    let mut builder = Client::builder().user_agent(USER_AGENT).timeout(timeout);
    if let Some(p) = proxy {
        builder = builder.proxy(reqwest::Proxy::all(&p.https)?);
    }
    builder.build()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_names_match_value_enum() {
        for kind in ScraperKind::ALL {
            assert_eq!(ScraperKind::from_str(kind.name(), false), Ok(kind));
            assert_eq!(kind.to_string(), kind.name());
        }
        assert!(ScraperKind::from_str("cnn", false).is_err());
        assert!(ScraperKind::Gnews.is_search());
        assert!(!ScraperKind::Websites.is_search());
    }

    #[test]
    fn test_build_client_with_socks_proxy() {
        let proxy = ProxyEndpoint::socks5_local(9050);
        assert!(build_client(Some(&proxy), Duration::from_secs(5)).is_ok());
        assert!(build_client(None, Duration::from_secs(5)).is_ok());
    }
}
