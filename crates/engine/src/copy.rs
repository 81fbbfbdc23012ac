//! Plain copy of files that need no partitioning.
//!
//! The file is copied to a `.partial` sibling and renamed into place, so an
//! interrupted copy never leaves a destination that looks complete. The
//! ledger entry is written only after the rename.

use crate::ledger::{Ledger, LedgerError};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors from a plain copy.
#[derive(Debug, Error)]
pub enum CopyError {
    /// The copy itself failed; only this file is affected.
    #[error("Failed to copy {source_path} to {destination}: {source}")]
    Copy {
        source_path: PathBuf,
        destination: PathBuf,
        source: std::io::Error,
    },

    /// The copy succeeded but could not be recorded.
    #[error("Ledger write failed: {0}")]
    Ledger(#[from] LedgerError),
}

impl CopyError {
    /// Whether this error must stop the whole run.
    pub fn is_fatal(&self) -> bool {
        matches!(self, CopyError::Ledger(_))
    }
}

/// A file to copy unchanged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopyWork {
    pub source: PathBuf,
    pub destination: PathBuf,
}

/// In-progress name for a destination: `<name>.partial`.
pub fn partial_path(destination: &Path) -> PathBuf {
    let mut partial = destination.as_os_str().to_owned();
    partial.push(".partial");
    PathBuf::from(partial)
}

/// Copies `work.source` into place and records it in the ledger.
///
/// Returns the number of bytes copied.
pub fn copy_plain(work: &CopyWork, ledger: &Ledger) -> Result<u64, CopyError> {
    let bytes = copy_into_place(&work.source, &work.destination).map_err(|e| CopyError::Copy {
        source_path: work.source.clone(),
        destination: work.destination.clone(),
        source: e,
    })?;
    ledger.record(&work.source)?;
    Ok(bytes)
}

fn copy_into_place(source: &Path, destination: &Path) -> std::io::Result<u64> {
    if let Some(parent) = destination.parent() {
        fs::create_dir_all(parent)?;
    }
    let partial = partial_path(destination);
    let bytes = match fs::copy(source, &partial) {
        Ok(bytes) => bytes,
        Err(e) => {
            let _ = fs::remove_file(&partial);
            return Err(e);
        }
    };
    if let Err(e) = fs::rename(&partial, destination) {
        let _ = fs::remove_file(&partial);
        return Err(e);
    }
    Ok(bytes)
}
