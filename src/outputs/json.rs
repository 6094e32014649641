//! JSON status file for external monitoring.
//!
//! `newsdesk status` (and `start`/`stop`) rewrite the whole file each time:
//!
//! ```text
//! status.json
//! {
//!   "last_update": "2025-06-11T08:00:00Z",
//!   "system":    { "cpu_percent": .., "memory_percent": .., "disk_percent": .. },
//!   "processes": { "gnews": { "pid": .., "running": true, "uptime": "1h 2m" } },
//!   "logs":      { "gnews": { "size": .., "has_errors": false, "last_lines": [..] } }
//! }
//! ```

use std::error::Error;
use std::fs;
use std::path::Path;
use tracing::{debug, instrument};

use crate::orchestrator::status::StatusReport;

/// Serialize `report` as pretty JSON to `path`, creating parent directories.
#[instrument(level = "debug", skip_all, fields(path = %path.display()))]
pub fn write_status(report: &StatusReport, path: &Path) -> Result<(), Box<dyn Error>> {
    let json = serde_json::to_string_pretty(report)?;
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        fs::create_dir_all(dir)?;
    }
    fs::write(path, json)?;
    debug!("Wrote status file");
    Ok(())
}
