//! Naming conventions for split groups.
//!
//! An oversized `film.mkv` is backed up as the directory `film.mkv.split`
//! holding `film.mkv - 0.mkv`, `film.mkv - 1.mkv`, ... The `.split` suffix is
//! the only signal that marks a directory as a split group, and the numeric
//! index in each segment name is the only source of ordering.

use crate::planner::PlanningError;
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};

/// Directory-name suffix marking a split group.
pub const SPLIT_MARKER: &str = ".split";

/// Split-group directory for a file: `/dir/film.mkv` -> `/dir/film.mkv.split`.
pub fn split_dir_for(file: &Path) -> PathBuf {
    let mut dir: OsString = file.as_os_str().to_owned();
    dir.push(SPLIT_MARKER);
    PathBuf::from(dir)
}

/// Whether a directory name carries the split marker (and something before it).
pub fn is_split_dir_name(name: &str) -> bool {
    name.len() > SPLIT_MARKER.len() && name.ends_with(SPLIT_MARKER)
}

/// Logical identity of a split group: its path with the marker stripped.
pub fn group_identity(dir: &Path) -> Option<PathBuf> {
    let name = dir.file_name()?.to_str()?;
    if !is_split_dir_name(name) {
        return None;
    }
    let stripped = &name[..name.len() - SPLIT_MARKER.len()];
    Some(dir.with_file_name(stripped))
}

/// Segment file name: `<original name> - <index><original extension>`.
pub fn segment_file_name(original_name: &str, index: u32) -> String {
    let extension = Path::new(original_name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| format!(".{}", e))
        .unwrap_or_default();
    format!("{} - {}{}", original_name, index, extension)
}

/// Recovers a segment's index from its file name, given the group's original name.
pub fn parse_segment_index(original_name: &str, file_name: &str) -> Option<u32> {
    let rest = file_name.strip_prefix(original_name)?.strip_prefix(" - ")?;
    let digits_end = rest
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(rest.len());
    if digits_end == 0 {
        return None;
    }
    let (digits, tail) = rest.split_at(digits_end);
    if !tail.is_empty() && !tail.starts_with('.') {
        return None;
    }
    digits.parse().ok()
}

/// A split group on disk with its segments in index order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SplitGroup {
    /// The `.split` directory.
    pub dir: PathBuf,
    /// The group path with the marker stripped.
    pub identity: PathBuf,
    /// Segment files ordered by index `0..N`.
    pub segments: Vec<PathBuf>,
}

impl SplitGroup {
    /// Reads and validates the segments inside `dir`.
    ///
    /// Files that do not follow the segment naming convention are ignored.
    /// The remaining indices must form the contiguous run `0..N`.
    pub fn load(dir: &Path) -> Result<Self, PlanningError> {
        let identity = group_identity(dir).ok_or_else(|| {
            PlanningError::IncompleteGroup(format!("{} is not a split group", dir.display()))
        })?;
        let original_name = identity
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| {
                PlanningError::IncompleteGroup(format!("{} has no usable name", dir.display()))
            })?
            .to_string();

        let entries = fs::read_dir(dir).map_err(|e| {
            PlanningError::IncompleteGroup(format!("cannot read {}: {}", dir.display(), e))
        })?;

        let mut indexed = Vec::new();
        for entry in entries.flatten() {
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            match parse_segment_index(&original_name, file_name) {
                Some(index) => indexed.push((index, path)),
                None => tracing::warn!(
                    group = %dir.display(),
                    file = %file_name,
                    "ignoring file that is not a segment of this group"
                ),
            }
        }

        if indexed.is_empty() {
            return Err(PlanningError::IncompleteGroup(format!(
                "{} contains no segments",
                dir.display()
            )));
        }

        indexed.sort_by_key(|(index, _)| *index);
        for (expected, (index, _)) in indexed.iter().enumerate() {
            if *index as usize != expected {
                return Err(PlanningError::IncompleteGroup(format!(
                    "{} is missing segment {} (found {})",
                    dir.display(),
                    expected,
                    index
                )));
            }
        }

        Ok(Self {
            dir: dir.to_path_buf(),
            identity,
            segments: indexed.into_iter().map(|(_, p)| p).collect(),
        })
    }
}
