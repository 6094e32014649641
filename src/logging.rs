//! Tracing setup: console output plus one log file per component.
//!
//! Each process (the orchestrator and every scraper) writes to
//! `<log_dir>/<component>.log`. The orchestrator reads these files back for
//! `status`, so the file layer is plain text without ANSI colors.
//!
//! Files are rotated by [`RotatingFile`] whenever a write would take them past
//! [`MAX_LOG_SIZE`], keeping [`BACKUP_COUNT`] numbered backups.

use chrono::Utc;
use std::error::Error;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::info;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, fmt as tfmt};

pub const MAX_LOG_SIZE: u64 = 10 * 1024 * 1024;
pub const BACKUP_COUNT: usize = 5;

/// Path of the log file for `component`.
pub fn log_path(log_dir: &Path, component: &str) -> PathBuf {
    log_dir.join(format!("{component}.log"))
}

/// Install the global subscriber for `component`.
pub fn init(component: &str, log_dir: &Path) -> Result<(), Box<dyn Error>> {
    fs::create_dir_all(log_dir)?;
    let file = RotatingFile::open(&log_path(log_dir, component), MAX_LOG_SIZE, BACKUP_COUNT)?;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let console = tfmt::layer()
        .with_target(true)
        .with_file(false)
        .with_line_number(false)
        .with_timer(UtcTime::rfc_3339());
    let file_layer = tfmt::layer()
        .with_ansi(false)
        .with_target(false)
        .with_timer(UtcTime::rfc_3339())
        .with_writer(file);

    tracing_subscriber::registry()
        .with(filter)
        .with(console)
        .with(file_layer)
        .try_init()?;
    Ok(())
}

/// Append-only log file that rotates itself before a write would take it
/// past `max_bytes`.
///
/// One formatted event is one write, so a record never straddles two files.
#[derive(Debug)]
pub struct RotatingFile {
    path: PathBuf,
    max_bytes: u64,
    backups: usize,
    current: Mutex<OpenLog>,
}

#[derive(Debug)]
struct OpenLog {
    file: File,
    size: u64,
}

impl OpenLog {
    fn open(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let size = file.metadata()?.len();
        Ok(Self { file, size })
    }
}

impl RotatingFile {
    /// Open `path` for appending, rotating it first when it is already too big.
    pub fn open(path: &Path, max_bytes: u64, backups: usize) -> io::Result<Self> {
        rotate_if_needed(path, max_bytes, backups)?;
        Ok(Self {
            path: path.to_path_buf(),
            max_bytes,
            backups,
            current: Mutex::new(OpenLog::open(path)?),
        })
    }

    fn append(&self, buf: &[u8]) -> io::Result<()> {
        let mut current = self
            .current
            .lock()
            .map_err(|_| io::Error::other("log file lock poisoned"))?;
        let would_be = current.size + buf.len() as u64;
        if self.backups > 0 && current.size > 0 && would_be > self.max_bytes {
            current.file.flush()?;
            shift_backups(&self.path, self.backups)?;
            *current = OpenLog::open(&self.path)?;
        }
        current.file.write_all(buf)?;
        current.size += buf.len() as u64;
        Ok(())
    }
}

impl Write for &RotatingFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.append(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.current
            .lock()
            .map_err(|_| io::Error::other("log file lock poisoned"))?
            .file
            .flush()
    }
}

impl<'a> MakeWriter<'a> for RotatingFile {
    type Writer = &'a RotatingFile;

    fn make_writer(&'a self) -> Self::Writer {
        self
    }
}

/// Shift `path` to `path.1`, `path.1` to `path.2` and so on when `path` is
/// larger than `max_bytes`. The oldest backup beyond `backups` is deleted.
pub fn rotate_if_needed(path: &Path, max_bytes: u64, backups: usize) -> io::Result<bool> {
    let size = match fs::metadata(path) {
        Ok(meta) => meta.len(),
        Err(_) => return Ok(false),
    };
    if size <= max_bytes || backups == 0 {
        return Ok(false);
    }
    shift_backups(path, backups)?;
    Ok(true)
}

fn shift_backups(path: &Path, backups: usize) -> io::Result<()> {
    let backup = |n: usize| PathBuf::from(format!("{}.{n}", path.display()));
    let oldest = backup(backups);
    if oldest.exists() {
        fs::remove_file(&oldest)?;
    }
    for n in (1..backups).rev() {
        let from = backup(n);
        if from.exists() {
            fs::rename(&from, backup(n + 1))?;
        }
    }
    fs::rename(path, backup(1))
}

/// Banner logged when a component starts.
pub fn log_start(name: &str, test_mode: bool) {
    let mode = if test_mode { "TEST MODE" } else { "PRODUCTION MODE" };
    let bar = "=".repeat(20);
    info!("{bar} STARTING {name} [{mode}] {bar}");
    info!("Start time: {}", Utc::now().format("%Y-%m-%d %H:%M:%S"));
}

/// Banner logged when a component finishes.
pub fn log_end(name: &str, success: bool) {
    let status = if success { "SUCCESSFUL" } else { "WITH ERRORS" };
    let bar = "=".repeat(20);
    info!("{bar} ENDING {name} [{status}] {bar}");
    info!("End time: {}", Utc::now().format("%Y-%m-%d %H:%M:%S"));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_path() {
        assert_eq!(
            log_path(Path::new("logs"), "gnews"),
            PathBuf::from("logs/gnews.log")
        );
    }

    #[test]
    fn test_small_file_is_not_rotated() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("main.log");
        fs::write(&path, "short").unwrap();
        assert!(!rotate_if_needed(&path, 100, 5).unwrap());
        assert!(path.exists());
    }

    #[test]
    fn test_missing_file_is_not_rotated() {
        let dir = tempfile::tempdir().unwrap();
        assert!(!rotate_if_needed(&dir.path().join("none.log"), 1, 5).unwrap());
    }

    #[test]
    fn test_rotation_shifts_backups_and_drops_oldest() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gnews.log");
        fs::write(&path, "current log contents").unwrap();
        fs::write(dir.path().join("gnews.log.1"), "one").unwrap();
        fs::write(dir.path().join("gnews.log.2"), "two").unwrap();

        assert!(rotate_if_needed(&path, 4, 2).unwrap());

        assert!(!path.exists());
        assert_eq!(
            fs::read_to_string(dir.path().join("gnews.log.1")).unwrap(),
            "current log contents"
        );
        assert_eq!(
            fs::read_to_string(dir.path().join("gnews.log.2")).unwrap(),
            "one"
        );
        assert!(!dir.path().join("gnews.log.3").exists());
    }

    #[test]
    fn test_running_writer_rotates_past_limit() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("websites.log");
        let log = RotatingFile::open(&path, 20, 2).unwrap();

        let mut w = log.make_writer();
        w.write_all(b"first record\n").unwrap();
        assert!(!dir.path().join("websites.log.1").exists());
        w.write_all(b"second record\n").unwrap();
        w.write_all(b"third record\n").unwrap();
        w.flush().unwrap();

        assert_eq!(
            fs::read_to_string(dir.path().join("websites.log.2")).unwrap(),
            "first record\n"
        );
        assert_eq!(
            fs::read_to_string(dir.path().join("websites.log.1")).unwrap(),
            "second record\n"
        );
        assert_eq!(fs::read_to_string(&path).unwrap(), "third record\n");
    }

    #[test]
    fn test_oversized_record_goes_to_empty_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("main.log");
        let log = RotatingFile::open(&path, 8, 3).unwrap();
        log.make_writer().write_all(b"longer than the limit\n").unwrap();
        assert!(!dir.path().join("main.log.1").exists());
        assert_eq!(fs::read_to_string(&path).unwrap(), "longer than the limit\n");
    }
}
