//! Directory walker for discovering backup and restore work.
//!
//! The walker recursively traverses the configured top-level directories of
//! a source root and classifies every entry against the ledger:
//!
//! - Backup: oversized videos become partition work, everything else is a
//!   plain copy into the mirrored location under the backup root.
//! - Restore: `.split` directories become reassembly work (their contents are
//!   not walked), remaining files are plain copies back into the library.
//!
//! Entries already in the ledger are reported as skipped.

use crate::copy::CopyWork;
use crate::job::{PartitionWork, ReassemblyWork, WorkItem};
use crate::ledger::Ledger;
use crate::planner::needs_partition;
use crate::split::{group_identity, is_split_dir_name, split_dir_for};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};
use walkdir::WalkDir;

/// Errors that stop a walk before it starts.
#[derive(Debug, Error)]
pub enum WalkError {
    #[error("Source root {path} does not exist")]
    MissingRoot { path: PathBuf },
}

/// Direction of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Backup,
    Restore,
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Mode::Backup => write!(f, "backup"),
            Mode::Restore => write!(f, "restore"),
        }
    }
}

/// A filesystem entry seen during traversal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaEntry {
    pub path: PathBuf,
    pub size_bytes: u64,
    /// Lowercased extension without the dot.
    pub extension: Option<String>,
    pub is_dir: bool,
}

impl MediaEntry {
    fn from_dir_entry(entry: &walkdir::DirEntry) -> Self {
        let is_dir = entry.file_type().is_dir();
        let size_bytes = if is_dir {
            0
        } else {
            entry.metadata().map(|m| m.len()).unwrap_or(0)
        };
        Self {
            path: entry.path().to_path_buf(),
            size_bytes,
            extension: entry
                .path()
                .extension()
                .and_then(|e| e.to_str())
                .map(|e| e.to_lowercase()),
            is_dir,
        }
    }

    /// Whether the extension is one of `video_extensions` (case-insensitive).
    pub fn is_video(&self, video_extensions: &[String]) -> bool {
        self.extension
            .as_deref()
            .map(|ext| video_extensions.iter().any(|v| v.eq_ignore_ascii_case(ext)))
            .unwrap_or(false)
    }
}

/// Why a discovered entry produced no work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// The ledger already records it.
    AlreadyDone,
    /// A split group with the same identity takes precedence.
    ShadowedByGroup,
}

/// Classification of one discovered entry.
#[derive(Debug, Clone, PartialEq)]
pub enum Discovery {
    Work(WorkItem),
    Copy(CopyWork),
    Skipped { path: PathBuf, reason: SkipReason },
}

/// Traversal settings for one run.
#[derive(Debug, Clone)]
pub struct Walker {
    pub mode: Mode,
    /// Root being read: the library on backup, the backup medium on restore.
    pub source_root: PathBuf,
    /// Root being written.
    pub dest_root: PathBuf,
    /// Top-level directories to walk; empty walks the whole source root.
    pub directories: Vec<String>,
    pub video_extensions: Vec<String>,
    pub max_segment_bytes: u64,
    /// Paths never treated as media (ledger files, scratch space).
    pub excluded: Vec<PathBuf>,
}

impl Walker {
    /// Top-level roots that will be walked.
    pub fn roots(&self) -> Vec<PathBuf> {
        if self.directories.is_empty() {
            vec![self.source_root.clone()]
        } else {
            self.directories
                .iter()
                .map(|d| self.source_root.join(d))
                .collect()
        }
    }

    fn is_excluded(&self, path: &Path) -> bool {
        self.excluded.iter().any(|e| path == e)
    }

    /// Mirrors `path` from the source root into the destination root.
    pub fn mirror(&self, path: &Path) -> PathBuf {
        match path.strip_prefix(&self.source_root) {
            Ok(rel) => self.dest_root.join(rel),
            Err(_) => self.dest_root.join(path.file_name().unwrap_or_default()),
        }
    }

    /// Walks every root and hands each classification to `emit`.
    ///
    /// `emit` returns `false` to stop the walk early.
    pub fn walk<F>(&self, ledger: &Ledger, mut emit: F) -> Result<(), WalkError>
    where
        F: FnMut(Discovery) -> bool,
    {
        if !self.source_root.exists() {
            return Err(WalkError::MissingRoot {
                path: self.source_root.clone(),
            });
        }

        for root in self.roots() {
            if !root.exists() {
                debug!(root = %root.display(), "top-level directory missing, skipping");
                continue;
            }

            let mut entries = WalkDir::new(&root).sort_by_file_name().into_iter();
            while let Some(entry) = entries.next() {
                let entry = match entry {
                    Ok(entry) => entry,
                    Err(e) => {
                        warn!(error = %e, "unreadable entry during walk");
                        continue;
                    }
                };

                if self.is_excluded(entry.path()) {
                    if entry.file_type().is_dir() {
                        entries.skip_current_dir();
                    }
                    continue;
                }

                let media = MediaEntry::from_dir_entry(&entry);
                let discovery = if media.is_dir {
                    match self.classify_dir(&media, ledger) {
                        Some(d) => {
                            // Segments are owned by the group, never walked individually
                            entries.skip_current_dir();
                            d
                        }
                        None => continue,
                    }
                } else if entry.file_type().is_file() {
                    self.classify_file(&media, ledger)
                } else {
                    continue;
                };

                if !emit(discovery) {
                    return Ok(());
                }
            }
        }

        Ok(())
    }

    fn classify_dir(&self, media: &MediaEntry, ledger: &Ledger) -> Option<Discovery> {
        if self.mode != Mode::Restore {
            return None;
        }
        let name = media.path.file_name()?.to_str()?;
        if !is_split_dir_name(name) {
            return None;
        }
        let identity = group_identity(&media.path)?;
        if ledger.contains(&identity) {
            return Some(Discovery::Skipped {
                path: identity,
                reason: SkipReason::AlreadyDone,
            });
        }
        Some(Discovery::Work(WorkItem::Reassembly(ReassemblyWork {
            group_dir: media.path.clone(),
            destination: self.mirror(&identity),
            identity,
        })))
    }

    fn classify_file(&self, media: &MediaEntry, ledger: &Ledger) -> Discovery {
        let path = media.path.clone();

        if self.mode == Mode::Restore && split_dir_for(&path).is_dir() {
            warn!(
                path = %path.display(),
                "plain file shadowed by a split group of the same name, skipping"
            );
            return Discovery::Skipped {
                path,
                reason: SkipReason::ShadowedByGroup,
            };
        }

        if ledger.contains(&path) {
            return Discovery::Skipped {
                path,
                reason: SkipReason::AlreadyDone,
            };
        }

        let destination = self.mirror(&path);
        if self.mode == Mode::Backup
            && media.is_video(&self.video_extensions)
            && needs_partition(media.size_bytes, self.max_segment_bytes)
        {
            return Discovery::Work(WorkItem::Partition(PartitionWork {
                source: path,
                size_bytes: media.size_bytes,
                split_dir: split_dir_for(&destination),
            }));
        }

        Discovery::Copy(CopyWork {
            source: path,
            destination,
        })
    }
}
