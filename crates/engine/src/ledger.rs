//! Ledger module for crash-resumable completion state.
//!
//! The ledger is a plain UTF-8 text file holding one absolute source path per
//! line. It is read fully at startup to build the skip-set and afterwards only
//! ever appended to. A path is recorded once its job reached terminal success.

use std::collections::HashSet;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use thiserror::Error;

/// Errors that can occur while loading or appending to the ledger.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// Existing ledger could not be read.
    #[error("Failed to read ledger {path}: {source}")]
    Read { path: PathBuf, source: io::Error },

    /// Ledger could not be opened for appending.
    #[error("Failed to open ledger {path}: {source}")]
    Open { path: PathBuf, source: io::Error },

    /// Completion entry could not be persisted.
    #[error("Failed to append {entry} to ledger {path}: {source}")]
    Write {
        path: PathBuf,
        entry: String,
        source: io::Error,
    },
}

struct LedgerInner {
    entries: HashSet<String>,
    file: File,
}

/// Append-only record of fully processed source paths.
///
/// Appends from concurrently retiring jobs are serialized behind a mutex so
/// lines never interleave.
pub struct Ledger {
    path: PathBuf,
    inner: Mutex<LedgerInner>,
}

/// Canonical line representation of a path in the ledger.
pub fn ledger_key(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

impl Ledger {
    /// Opens the ledger at `path`, loading any existing entries.
    ///
    /// Missing files (and missing parent directories) are created.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, LedgerError> {
        let path = path.into();

        let entries = match fs::read_to_string(&path) {
            Ok(content) => parse_entries(&content),
            Err(e) if e.kind() == io::ErrorKind::NotFound => HashSet::new(),
            Err(source) => return Err(LedgerError::Read { path, source }),
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|source| LedgerError::Open {
                path: path.clone(),
                source,
            })?;
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|source| LedgerError::Open {
                path: path.clone(),
                source,
            })?;

        Ok(Self {
            path,
            inner: Mutex::new(LedgerInner { entries, file }),
        })
    }

    /// Wraps an already opened file with an empty entry set.
    #[cfg(test)]
    pub(crate) fn from_file(path: impl Into<PathBuf>, file: File) -> Self {
        Self {
            path: path.into(),
            inner: Mutex::new(LedgerInner {
                entries: HashSet::new(),
                file,
            }),
        }
    }

    /// Location of the ledger file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether `source` has already been processed.
    pub fn contains(&self, source: &Path) -> bool {
        self.lock().entries.contains(&ledger_key(source))
    }

    /// Number of distinct recorded paths.
    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    /// Whether nothing has been recorded yet.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Records `source` as done.
    ///
    /// Returns `Ok(false)` without touching the file when the path is already
    /// present. The in-memory set is only updated after the line hit the file.
    pub fn record(&self, source: &Path) -> Result<bool, LedgerError> {
        let entry = ledger_key(source);
        let mut inner = self.lock();

        if inner.entries.contains(&entry) {
            return Ok(false);
        }

        let line = format!("{}\n", entry);
        inner
            .file
            .write_all(line.as_bytes())
            .and_then(|_| inner.file.flush())
            .map_err(|source| LedgerError::Write {
                path: self.path.clone(),
                entry: entry.clone(),
                source,
            })?;

        inner.entries.insert(entry);
        Ok(true)
    }

    fn lock(&self) -> MutexGuard<'_, LedgerInner> {
        // Entries are inserted only after a successful write; poisoning is harmless.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Splits ledger content into entries, tolerating CRLF and blank lines.
fn parse_entries(content: &str) -> HashSet<String> {
    content
        .lines()
        .map(|line| line.trim_end_matches('\r'))
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tempfile::TempDir;

    #[test]
    fn test_open_missing_ledger_is_empty() {
        let temp_dir = TempDir::new().unwrap();
        let ledger = Ledger::open(temp_dir.path().join("backup.log")).unwrap();

        assert!(ledger.is_empty());
        assert!(temp_dir.path().join("backup.log").exists());
    }

    #[test]
    fn test_open_creates_parent_directories() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("state").join("nested").join("backup.log");

        let ledger = Ledger::open(&path).unwrap();
        assert!(ledger.is_empty());
        assert!(path.exists());
    }

    #[test]
    fn test_record_appends_one_line() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("backup.log");
        let ledger = Ledger::open(&path).unwrap();

        let source = Path::new("/media/Movies/film.mkv");
        assert!(ledger.record(source).unwrap());
        assert!(ledger.contains(source));

        let content = fs::read_to_string(&path).unwrap();
        assert_eq!(content, "/media/Movies/film.mkv\n");
    }

    #[test]
    fn test_record_twice_does_not_duplicate() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("backup.log");
        let ledger = Ledger::open(&path).unwrap();

        let source = Path::new("/media/Movies/film.mkv");
        assert!(ledger.record(source).unwrap());
        assert!(!ledger.record(source).unwrap());

        let content = fs::read_to_string(&path).unwrap();
        assert_eq!(content.lines().count(), 1);
        assert_eq!(ledger.len(), 1);
    }

    #[test]
    fn test_reopen_loads_existing_entries() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("backup.log");
        fs::write(&path, "/media/a.mkv\r\n\n/media/b.mkv\n").unwrap();

        let ledger = Ledger::open(&path).unwrap();
        assert_eq!(ledger.len(), 2);
        assert!(ledger.contains(Path::new("/media/a.mkv")));
        assert!(ledger.contains(Path::new("/media/b.mkv")));

        // Already present from a previous run: no new line
        assert!(!ledger.record(Path::new("/media/a.mkv")).unwrap());
        ledger.record(Path::new("/media/c.mkv")).unwrap();

        let content = fs::read_to_string(&path).unwrap();
        assert!(content.ends_with("/media/c.mkv\n"));
        assert_eq!(content.matches("/media/a.mkv").count(), 1);
    }

    #[test]
    fn test_concurrent_records_do_not_interleave() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("backup.log");
        let ledger = Arc::new(Ledger::open(&path).unwrap());

        let handles: Vec<_> = (0..8)
            .map(|t| {
                let ledger = ledger.clone();
                std::thread::spawn(move || {
                    for i in 0..50 {
                        let source = PathBuf::from(format!("/media/thread{}/file{}.mkv", t, i));
                        ledger.record(&source).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let content = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 400);
        assert!(lines
            .iter()
            .all(|l| l.starts_with("/media/thread") && l.ends_with(".mkv")));
    }
}
