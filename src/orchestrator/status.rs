//! Process, host and log status, written to `status.json` for external
//! monitoring and printed by `newsdesk status`.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::time::Duration;
use sysinfo::{Disks, Pid, ProcessStatus as SysStatus, ProcessesToUpdate, System};
use tracing::warn;

use super::process::ProcessRegistry;
use crate::utils::tail_lines;

/// Lines inspected for the error flag of a log summary.
pub const ERROR_SCAN_LINES: usize = 10;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProcessStatus {
    pub pid: u32,
    pub running: bool,
    pub start_time: String,
    pub last_active: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uptime: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cpu_percent: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory_mb: Option<f64>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub command: Vec<String>,
    /// `stopped` or `not_found` when not running.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<&'static str>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SystemStatus {
    pub cpu_percent: f32,
    pub memory_percent: f64,
    pub memory_used_mb: u64,
    pub memory_total_mb: u64,
    pub disk_percent: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogSummary {
    pub size: u64,
    pub last_modified: Option<DateTime<Utc>>,
    pub has_errors: bool,
    pub last_lines: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusReport {
    pub last_update: DateTime<Utc>,
    pub system: SystemStatus,
    pub processes: BTreeMap<String, ProcessStatus>,
    pub logs: BTreeMap<String, LogSummary>,
}

/// Take the two samples CPU usage is computed from, for the host and for
/// `pids`, with [`sysinfo::MINIMUM_CPU_UPDATE_INTERVAL`] in between.
pub fn sample_usage(sys: &mut System, pids: &[Pid]) {
    for second in [false, true] {
        if second {
            std::thread::sleep(sysinfo::MINIMUM_CPU_UPDATE_INTERVAL.max(Duration::from_millis(100)));
        }
        sys.refresh_cpu_usage();
        if !pids.is_empty() {
            sys.refresh_processes(ProcessesToUpdate::Some(pids), true);
        }
    }
}

/// Status of every tracked process. Samples CPU usage first, so host CPU
/// read from `sys` afterwards is current too.
pub fn check_status(registry: &ProcessRegistry, sys: &mut System, now: DateTime<Utc>) -> BTreeMap<String, ProcessStatus> {
    let pids: Vec<Pid> = registry.entries().values().map(|p| Pid::from_u32(p.pid)).collect();
    sample_usage(sys, &pids);

    registry
        .entries()
        .iter()
        .map(|(name, info)| {
            let mut status = ProcessStatus {
                pid: info.pid,
                running: false,
                start_time: info.start_time.clone(),
                last_active: info.last_active.clone(),
                uptime: None,
                cpu_percent: None,
                memory_mb: None,
                command: Vec::new(),
                status: None,
            };
            match sys.process(Pid::from_u32(info.pid)) {
                None => status.status = Some("not_found"),
                Some(p) if matches!(p.status(), SysStatus::Zombie | SysStatus::Dead) => {
                    status.status = Some("stopped");
                }
                Some(p) => {
                    status.running = true;
                    status.uptime = Some(format_uptime(&info.start_time, now));
                    status.cpu_percent = Some(p.cpu_usage());
                    status.memory_mb = Some(p.memory() as f64 / (1024.0 * 1024.0));
                    status.command = p.cmd().iter().map(|a| a.to_string_lossy().into_owned()).collect();
                }
            }
            (name.clone(), status)
        })
        .collect()
}

/// Host CPU, memory and root-disk usage. CPU is the figure from the last
/// [`sample_usage`].
pub fn system_status(sys: &mut System) -> SystemStatus {
    sys.refresh_memory();
    let total = sys.total_memory();
    let used = sys.used_memory();

    let disks = Disks::new_with_refreshed_list();
    let disk_percent = disks
        .list()
        .iter()
        .find(|d| d.mount_point() == Path::new("/"))
        .or_else(|| disks.list().first())
        .filter(|d| d.total_space() > 0)
        .map(|d| {
            let used = d.total_space().saturating_sub(d.available_space());
            used as f64 * 100.0 / d.total_space() as f64
        })
        .unwrap_or(0.0);

    SystemStatus {
        cpu_percent: sys.global_cpu_usage(),
        memory_percent: if total > 0 { used as f64 * 100.0 / total as f64 } else { 0.0 },
        memory_used_mb: used / (1024 * 1024),
        memory_total_mb: total / (1024 * 1024),
        disk_percent,
    }
}

/// Summaries of every `*.log` file in `log_dir`, keyed by component name.
pub fn summarize_logs(log_dir: &Path, lines: usize) -> BTreeMap<String, LogSummary> {
    let Ok(dir) = fs::read_dir(log_dir) else {
        return BTreeMap::new();
    };
    dir.filter_map(Result::ok)
        .filter_map(|entry| {
            let path = entry.path();
            let name = path.file_name()?.to_str()?.strip_suffix(".log")?.to_string();
            let meta = entry.metadata().ok()?;
            let last_lines = tail_lines(&path, lines).unwrap_or_else(|e| vec![format!("Error reading log: {e}")]);
            let has_errors = has_errors(&last_lines);
            Some((
                name,
                LogSummary {
                    size: meta.len(),
                    last_modified: meta.modified().ok().map(DateTime::<Utc>::from),
                    has_errors,
                    last_lines,
                },
            ))
        })
        .collect()
}

pub fn has_errors(lines: &[String]) -> bool {
    lines.iter().any(|l| l.contains("ERROR"))
}

/// Collect a full report and write it to `status_file`. A failed write is
/// logged; the report is returned either way.
pub fn update_status(
    registry: &ProcessRegistry,
    sys: &mut System,
    log_dir: &Path,
    status_file: &Path,
) -> StatusReport {
    let now = Utc::now();
    let processes = check_status(registry, sys, now);
    let report = StatusReport {
        last_update: now,
        system: system_status(sys),
        processes,
        logs: summarize_logs(log_dir, ERROR_SCAN_LINES),
    };
    if let Err(e) = crate::outputs::json::write_status(&report, status_file) {
        warn!(path = %status_file.display(), error = %e, "Failed to write status file");
    }
    report
}

/// `"1d 2h 3m 4s"` since `start` (RFC 3339), dropping zero units.
/// `"unknown"` when `start` does not parse.
pub fn format_uptime(start: &str, now: DateTime<Utc>) -> String {
    let Ok(start) = DateTime::parse_from_rfc3339(start) else {
        return "unknown".to_string();
    };
    let secs = (now - start.with_timezone(&Utc)).num_seconds().max(0);
    let (days, rem) = (secs / 86_400, secs % 86_400);
    let (hours, rem) = (rem / 3600, rem % 3600);
    let (minutes, seconds) = (rem / 60, rem % 60);

    let mut parts = Vec::new();
    for (value, unit) in [(days, "d"), (hours, "h"), (minutes, "m")] {
        if value > 0 {
            parts.push(format!("{value}{unit}"));
        }
    }
    if seconds > 0 || parts.is_empty() {
        parts.push(format!("{seconds}s"));
    }
    parts.join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestrator::process::ProcessInfo;
    use chrono::TimeZone;

    #[test]
    fn test_format_uptime() {
        let now = Utc.with_ymd_and_hms(2025, 6, 12, 10, 3, 4).unwrap();
        assert_eq!(format_uptime("2025-06-11T08:00:00+00:00", now), "1d 2h 3m 4s");
        assert_eq!(format_uptime("2025-06-12T10:00:04+00:00", now), "3m");
        assert_eq!(format_uptime("2025-06-12T10:03:04Z", now), "0s");
        assert_eq!(format_uptime("2025-06-12T12:03:04+02:00", now), "0s");
        assert_eq!(format_uptime("yesterday", now), "unknown");
    }

    #[test]
    fn test_summarize_logs() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("gnews.log"), "a INFO ok\nb ERROR boom\n").unwrap();
        fs::write(dir.path().join("websites.log"), "a INFO ok\n").unwrap();
        fs::write(dir.path().join("notes.txt"), "ERROR").unwrap();

        let logs = summarize_logs(dir.path(), ERROR_SCAN_LINES);
        assert_eq!(logs.len(), 2);
        assert!(logs["gnews"].has_errors);
        assert_eq!(logs["gnews"].last_lines.len(), 2);
        assert!(!logs["websites"].has_errors);
        assert!(logs["websites"].size > 0);
    }

    #[test]
    fn test_missing_log_dir_is_empty() {
        assert!(summarize_logs(Path::new("/nonexistent/newsdesk/logs"), 10).is_empty());
    }

    #[test]
    fn test_host_cpu_is_sampled_before_reading() {
        let dir = tempfile::tempdir().unwrap();
        let reg = ProcessRegistry::load(&dir.path().join("processes.json"));
        let mut sys = System::new();
        let report = update_status(&reg, &mut sys, dir.path(), &dir.path().join("status.json"));
        assert!(!sys.cpus().is_empty());
        assert!((0.0..=100.0).contains(&report.system.cpu_percent));
        assert!(report.system.memory_total_mb > 0);
        assert!(dir.path().join("status.json").exists());
    }

    #[test]
    fn test_check_status_marks_dead_pid_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let mut reg = ProcessRegistry::load(&dir.path().join("processes.json"));
        let now = Utc::now();
        reg.insert(
            "gnews",
            ProcessInfo {
                pid: u32::MAX - 1,
                script: "gnews".to_string(),
                start_time: now.to_rfc3339(),
                last_active: now.to_rfc3339(),
            },
        );
        reg.insert(
            "self",
            ProcessInfo {
                pid: std::process::id(),
                script: "self".to_string(),
                start_time: now.to_rfc3339(),
                last_active: now.to_rfc3339(),
            },
        );

        let mut sys = System::new();
        let status = check_status(&reg, &mut sys, now);
        assert!(!status["gnews"].running);
        assert_eq!(status["gnews"].status, Some("not_found"));
        assert!(status["self"].running);
        assert_eq!(status["self"].uptime.as_deref(), Some("0s"));
        assert!(status["self"].memory_mb.is_some());
    }
}
