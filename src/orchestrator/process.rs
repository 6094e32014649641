//! Scraper process lifecycle.
//!
//! Scrapers run as detached copies of this binary (`newsdesk scrape <kind>`).
//! Their PIDs are tracked in a JSON registry so that a later `stop` or
//! `status` invocation, a different process, can find them again:
//!
//! ```json
//! {
//!   "gnews": {
//!     "pid": 41532,
//!     "script": "gnews",
//!     "start_time": "2025-06-11T08:00:00+00:00",
//!     "last_active": "2025-06-11T08:00:00+00:00"
//!   }
//! }
//! ```
//!
//! A missing or unreadable registry is treated as empty.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::error::Error;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::Duration;
use sysinfo::{Pid, ProcessStatus, ProcessesToUpdate, Signal, System};
use tokio::time::sleep;
use tracing::{error, info, instrument, warn};

use crate::scrapers::ScraperKind;

/// Grace period between SIGTERM and SIGKILL.
pub const STOP_GRACE: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessInfo {
    pub pid: u32,
    pub script: String,
    /// RFC 3339.
    pub start_time: String,
    pub last_active: String,
}

/// Name -> process map persisted as JSON.
#[derive(Debug, Clone, Default)]
pub struct ProcessRegistry {
    path: PathBuf,
    entries: BTreeMap<String, ProcessInfo>,
}

impl ProcessRegistry {
    pub fn load(path: &Path) -> Self {
        let entries = match fs::read_to_string(path) {
            Ok(text) => serde_json::from_str(&text).unwrap_or_else(|e| {
                warn!(path = %path.display(), error = %e, "Corrupt process file; starting empty");
                BTreeMap::new()
            }),
            Err(_) => BTreeMap::new(),
        };
        Self {
            path: path.to_path_buf(),
            entries,
        }
    }

    pub fn save(&self) -> Result<(), Box<dyn Error>> {
        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir)?;
        }
        fs::write(&self.path, serde_json::to_string_pretty(&self.entries)?)?;
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&ProcessInfo> {
        self.entries.get(name)
    }

    pub fn insert(&mut self, name: &str, info: ProcessInfo) {
        self.entries.insert(name.to_string(), info);
    }

    pub fn remove(&mut self, name: &str) -> Option<ProcessInfo> {
        self.entries.remove(name)
    }

    pub fn entries(&self) -> &BTreeMap<String, ProcessInfo> {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Whether `pid` names a live (non-zombie) process.
pub fn is_alive(sys: &mut System, pid: u32) -> bool {
    let pid = Pid::from_u32(pid);
    sys.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
    sys.process(pid)
        .is_some_and(|p| !matches!(p.status(), ProcessStatus::Zombie | ProcessStatus::Dead))
}

/// Starts and stops scraper processes.
pub struct Supervisor {
    registry: ProcessRegistry,
    sys: System,
    /// Forwarded to children as `--config`.
    config_path: Option<PathBuf>,
}

impl Supervisor {
    pub fn new(process_file: &Path, config_path: Option<PathBuf>) -> Self {
        Self {
            registry: ProcessRegistry::load(process_file),
            sys: System::new(),
            config_path,
        }
    }

    pub fn registry(&self) -> &ProcessRegistry {
        &self.registry
    }

    pub fn system_mut(&mut self) -> &mut System {
        &mut self.sys
    }

    /// Spawn a scraper unless its tracked PID is still alive. Returns whether
    /// a process was started.
    #[instrument(level = "info", skip(self))]
    pub fn start_scraper(&mut self, kind: ScraperKind, test_mode: bool) -> Result<bool, Box<dyn Error>> {
        let name = kind.name();
        if let Some(pid) = self.registry.get(name).map(|p| p.pid) {
            if is_alive(&mut self.sys, pid) {
                warn!(pid, "{name} is already running");
                return Ok(false);
            }
            info!(pid, "Tracked process for {name} is not running; restarting");
        }

        let mut cmd = Command::new(std::env::current_exe()?);
        if let Some(path) = &self.config_path {
            cmd.arg("--config").arg(path);
        }
        cmd.args(["scrape", name])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        if test_mode {
            cmd.env("TEST_MODE", "1");
        }
        #[cfg(unix)]
        {
            // keep terminal Ctrl-C from reaching the scrapers
            use std::os::unix::process::CommandExt;
            cmd.process_group(0);
        }

        let child = cmd.spawn()?;
        let now = Utc::now().to_rfc3339();
        self.registry.insert(
            name,
            ProcessInfo {
                pid: child.id(),
                script: name.to_string(),
                start_time: now.clone(),
                last_active: now,
            },
        );
        self.registry.save()?;
        info!(pid = child.id(), "Started {name}");
        Ok(true)
    }

    /// SIGTERM, then SIGKILL after [`STOP_GRACE`], then untrack. Returns
    /// `false` when the scraper was not tracked.
    #[instrument(level = "info", skip(self))]
    pub async fn stop_scraper(&mut self, kind: ScraperKind) -> Result<bool, Box<dyn Error>> {
        let name = kind.name();
        let Some(pid) = self.registry.get(name).map(|p| p.pid) else {
            warn!("{name} is not being tracked");
            return Ok(false);
        };

        if is_alive(&mut self.sys, pid) {
            if let Some(process) = self.sys.process(Pid::from_u32(pid)) {
                if process.kill_with(Signal::Term).is_none() {
                    process.kill();
                }
            }
            sleep(STOP_GRACE).await;
            if is_alive(&mut self.sys, pid) {
                warn!(pid, "{name} didn't terminate with SIGTERM, sending SIGKILL");
                if let Some(process) = self.sys.process(Pid::from_u32(pid)) {
                    process.kill();
                }
            }
        }

        self.registry.remove(name);
        self.registry.save()?;
        info!(pid, "Stopped {name}");
        Ok(true)
    }

    /// Start every scraper; `true` only when all of them started.
    pub fn start_all(&mut self, test_mode: bool) -> bool {
        info!("Starting all scrapers");
        let mut all = true;
        for kind in ScraperKind::ALL {
            match self.start_scraper(kind, test_mode) {
                Ok(started) => all &= started,
                Err(e) => {
                    error!(scraper = %kind, error = %e, "Error starting scraper");
                    all = false;
                }
            }
        }
        all
    }

    pub async fn stop_all(&mut self) -> bool {
        info!("Stopping all scrapers");
        let mut all = true;
        for kind in ScraperKind::ALL {
            match self.stop_scraper(kind).await {
                Ok(stopped) => all &= stopped,
                Err(e) => {
                    error!(scraper = %kind, error = %e, "Error stopping scraper");
                    all = false;
                }
            }
        }
        all
    }

    pub async fn restart_all(&mut self, test_mode: bool) -> bool {
        info!("Restarting all scrapers");
        self.stop_all().await;
        sleep(STOP_GRACE).await;
        self.start_all(test_mode)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(pid: u32) -> ProcessInfo {
        ProcessInfo {
            pid,
            script: "gnews".to_string(),
            start_time: "2025-06-11T08:00:00+00:00".to_string(),
            last_active: "2025-06-11T08:00:00+00:00".to_string(),
        }
    }

    #[test]
    fn test_registry_round_trips_through_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state/processes.json");

        let mut reg = ProcessRegistry::load(&path);
        assert!(reg.is_empty());
        reg.insert("gnews", info(42));
        reg.save().unwrap();

        let reloaded = ProcessRegistry::load(&path);
        assert_eq!(reloaded.get("gnews"), Some(&info(42)));
        assert_eq!(reloaded.entries().len(), 1);
    }

    #[test]
    fn test_corrupt_registry_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("processes.json");
        fs::write(&path, "{not json").unwrap();
        assert!(ProcessRegistry::load(&path).is_empty());
    }

    #[test]
    fn test_current_process_is_alive() {
        let mut sys = System::new();
        assert!(is_alive(&mut sys, std::process::id()));
        assert!(!is_alive(&mut sys, u32::MAX - 1));
    }

    #[test]
    fn test_start_refuses_when_tracked_process_alive() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("processes.json");
        let mut reg = ProcessRegistry::load(&path);
        reg.insert("gnews", info(std::process::id()));
        reg.save().unwrap();

        let mut sup = Supervisor::new(&path, None);
        assert!(!sup.start_scraper(ScraperKind::Gnews, false).unwrap());
        assert_eq!(sup.registry().get("gnews").unwrap().pid, std::process::id());
    }

    #[tokio::test]
    async fn test_stop_untracked_returns_false() {
        let dir = tempfile::tempdir().unwrap();
        let mut sup = Supervisor::new(&dir.path().join("processes.json"), None);
        assert!(!sup.stop_scraper(ScraperKind::Websites).await.unwrap());
    }

    #[tokio::test]
    async fn test_stop_dead_process_untracks_it() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("processes.json");
        let mut reg = ProcessRegistry::load(&path);
        reg.insert("duckduckgo", info(u32::MAX - 1));
        reg.save().unwrap();

        let mut sup = Supervisor::new(&path, None);
        assert!(sup.stop_scraper(ScraperKind::Duckduckgo).await.unwrap());
        assert!(ProcessRegistry::load(&path).get("duckduckgo").is_none());
    }
}
