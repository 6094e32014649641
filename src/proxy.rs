//! Tor SOCKS proxy discovery.
//!
//! The scrapers rotate their outbound traffic across local Tor instances.
//! Ports come from the default list plus any `SocksPort` lines found in the
//! first `torrc` under the configured directories.

use rand::seq::IndexedRandom;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, error};

/// Ports used when no `torrc` adds any.
pub const DEFAULT_TOR_PORTS: [u16; 5] = [9050, 9060, 9070, 9080, 9090];

/// One proxy endpoint, per scheme.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyEndpoint {
    pub http: String,
    pub https: String,
}

impl ProxyEndpoint {
    pub fn socks5_local(port: u16) -> Self {
        let url = format!("socks5://127.0.0.1:{port}");
        Self {
            http: url.clone(),
            https: url,
        }
    }
}

/// The set of proxies a scraper picks from.
#[derive(Debug, Clone, Default)]
pub struct ProxyPool {
    proxies: Vec<ProxyEndpoint>,
}

impl ProxyPool {
    pub fn new(proxies: Vec<ProxyEndpoint>) -> Self {
        Self { proxies }
    }

    /// Pool built from the default ports plus those found in a `torrc`.
    pub fn from_torrc_dirs(dirs: &[PathBuf]) -> Self {
        let mut ports = DEFAULT_TOR_PORTS.to_vec();
        if let Some(path) = find_torrc(dirs) {
            match fs::read_to_string(&path) {
                Ok(text) => {
                    for port in parse_socks_ports(&text) {
                        if !ports.contains(&port) {
                            ports.push(port);
                        }
                    }
                    debug!(path = %path.display(), ports = ?ports, "Read torrc");
                }
                Err(e) => error!(path = %path.display(), error = %e, "Error reading torrc file"),
            }
        }
        Self::new(ports.into_iter().map(ProxyEndpoint::socks5_local).collect())
    }

    pub fn proxies(&self) -> &[ProxyEndpoint] {
        &self.proxies
    }

    /// A random proxy, or the first default port when the pool is empty.
    pub fn random(&self) -> ProxyEndpoint {
        self.proxies
            .choose(&mut rand::rng())
            .cloned()
            .unwrap_or_else(|| ProxyEndpoint::socks5_local(DEFAULT_TOR_PORTS[0]))
    }
}

/// First `torrc` directly inside one of `dirs`.
pub fn find_torrc(dirs: &[PathBuf]) -> Option<PathBuf> {
    dirs.iter()
        .map(|d| d.join("torrc"))
        .find(|p| Path::new(p).is_file())
}

/// Ports from `SocksPort` directives. Accepts `9050` and `127.0.0.1:9050`.
pub fn parse_socks_ports(torrc: &str) -> Vec<u16> {
    torrc
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| {
            let mut parts = line.split_whitespace();
            if parts.next()? != "SocksPort" {
                return None;
            }
            let value = parts.next()?;
            value.rsplit(':').next()?.parse().ok()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_socks_ports() {
        let torrc = "\
# SocksPort 9999
SocksPort 9050
SocksPort 127.0.0.1:9100
SocksPort
ControlPort 9051
  SocksPort 9110 IsolateDestAddr
SocksPort auto
";
        assert_eq!(parse_socks_ports(torrc), vec![9050, 9100, 9110]);
    }

    #[test]
    fn test_pool_from_torrc_adds_new_ports_only() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("torrc"), "SocksPort 9050\nSocksPort 9200\n").unwrap();
        let pool = ProxyPool::from_torrc_dirs(&[
            PathBuf::from("/nonexistent/tor"),
            dir.path().to_path_buf(),
        ]);
        assert_eq!(pool.proxies().len(), DEFAULT_TOR_PORTS.len() + 1);
        assert_eq!(
            pool.proxies().last().unwrap().https,
            "socks5://127.0.0.1:9200"
        );
    }

    #[test]
    fn test_pool_without_torrc_uses_defaults() {
        let pool = ProxyPool::from_torrc_dirs(&[PathBuf::from("/nonexistent/tor")]);
        assert_eq!(pool.proxies().len(), 5);
        assert!(pool.proxies().contains(&pool.random()));
    }

    #[test]
    fn test_empty_pool_falls_back() {
        let pool = ProxyPool::default();
        assert_eq!(pool.random(), ProxyEndpoint::socks5_local(9050));
    }
}
