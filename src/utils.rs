//! Small helpers shared across commands: log-friendly truncation, directory
//! checks and reading the tail of a log file.

use std::error::Error;
use std::fs as stdfs;
use std::io::{BufRead, BufReader};
use std::path::Path;
use tokio::fs;
use tracing::{info, instrument};

/// Truncate a string for logging purposes.
///
/// Long strings are cut to `max` characters with an ellipsis and a byte count
/// appended. The cut always lands on a character boundary.
///
/// ```ignore
/// assert_eq!(truncate_for_log("short", 100), "short");
/// assert_eq!(truncate_for_log(&"a".repeat(500), 10), "aaaaaaaaaa…(+490 bytes)");
/// ```
pub fn truncate_for_log(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        None => s.to_string(),
        Some((cut, _)) => format!("{}…(+{} bytes)", &s[..cut], s.len() - cut),
    }
}

/// Ensure a directory exists and is writable.
///
/// Creates the directory if needed, then writes and removes a probe file.
#[instrument(level = "info", skip_all, fields(path = %path.display()))]
pub async fn ensure_writable_dir(path: &Path) -> Result<(), Box<dyn Error>> {
    fs::create_dir_all(path).await?;
    let probe_path = path.join("..__probe_write__");
    stdfs::File::create(&probe_path)?;
    let _ = stdfs::remove_file(&probe_path);
    info!("Directory is writable");
    Ok(())
}

/// Last `n` lines of a text file. Invalid UTF-8 is replaced, never skipped,
/// so one bad line cannot hide the lines after it.
pub fn tail_lines(path: &Path, n: usize) -> std::io::Result<Vec<String>> {
    let file = stdfs::File::open(path)?;
    let mut tail = std::collections::VecDeque::with_capacity(n + 1);
    for raw in BufReader::new(file).split(b'\n') {
        let raw = raw?;
        let line = String::from_utf8_lossy(raw.strip_suffix(b"\r").unwrap_or(&raw));
        tail.push_back(line.into_owned());
        if tail.len() > n {
            tail.pop_front();
        }
    }
    Ok(tail.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tail_lines_reads_past_invalid_utf8() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gnews.log");
        stdfs::write(&path, b"old 1\n\xff\xfe bad\nnew ERROR 2\r\nnew 3\n").unwrap();
        assert_eq!(tail_lines(&path, 2).unwrap(), vec!["new ERROR 2", "new 3"]);
        let all = tail_lines(&path, 10).unwrap();
        assert_eq!(all.len(), 4);
        assert!(all[1].ends_with(" bad"));
    }

    #[test]
    fn test_truncate_for_log_short_string() {
        let s = "Hello, world!";
        assert_eq!(truncate_for_log(s, 100), "Hello, world!");
    }

    #[test]
    fn test_truncate_for_log_long_string() {
        let s = "a".repeat(500);
        let result = truncate_for_log(&s, 100);
        assert!(result.starts_with(&"a".repeat(100)));
        assert!(result.contains("…(+400 bytes)"));
    }

    #[test]
    fn test_truncate_for_log_multibyte() {
        assert_eq!(truncate_for_log("€€€", 1), "€…(+6 bytes)");
    }

    #[tokio::test]
    async fn test_ensure_writable_dir_creates_nested() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("logs/nested");
        ensure_writable_dir(&nested).await.unwrap();
        assert!(nested.is_dir());
        assert!(!nested.join("..__probe_write__").exists());
    }

    #[test]
    fn test_tail_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("x.log");
        stdfs::write(&path, "1\n2\n3\n4\n").unwrap();
        assert_eq!(tail_lines(&path, 2).unwrap(), vec!["3", "4"]);
        assert_eq!(tail_lines(&path, 10).unwrap().len(), 4);
        assert!(tail_lines(&dir.path().join("missing.log"), 2).is_err());
    }
}
