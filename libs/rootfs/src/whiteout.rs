//! Whiteout marker resolution.
//!
//! Layers delete content from lower layers with marker files:
//! - `.wh.<name>` removes the sibling `<name>`.
//! - `.wh..wh..opq` marks its directory opaque, dropping everything lower
//!   layers put there.
//!
//! Markers are unpacked like ordinary files and consumed here, so none of them
//! survive into the merged tree.

use std::collections::BTreeSet;
use std::ffi::{OsStr, OsString};
use std::fs::{self, FileType};
use std::io;
use std::path::{Component, Path, PathBuf};

use thiserror::Error;
use tracing::{debug, trace};

/// Prefix of a per-file whiteout marker.
pub const WHITEOUT_PREFIX: &str = ".wh.";

/// Name of the opaque directory marker.
pub const OPAQUE_MARKER: &str = ".wh..wh..opq";

/// Errors from a whiteout pass. The first failure aborts the walk.
#[derive(Debug, Error)]
pub enum CleanupError {
    #[error("Whiteout target is not a directory: {}", .path.display())]
    MissingDirectory { path: PathBuf },

    #[error("Failed to list {}: {source}", .path.display())]
    ReadDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to remove {}: {source}", .path.display())]
    Remove {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Counters from a whiteout pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WhiteoutStats {
    /// Marker files consumed (both kinds).
    pub markers_removed: usize,
    /// Entries deleted because a marker targeted them.
    pub entries_removed: usize,
    /// Directories that carried an opaque marker.
    pub opaque_dirs: usize,
}

impl WhiteoutStats {
    /// Add another pass's counters to this one.
    pub fn merge(&mut self, other: WhiteoutStats) {
        self.markers_removed += other.markers_removed;
        self.entries_removed += other.entries_removed;
        self.opaque_dirs += other.opaque_dirs;
    }
}

/// Paths introduced by the layer currently being applied.
///
/// Paths are relative to the destination root. Recording a path also records
/// every ancestor directory, so a scope answers "did this layer touch this
/// directory" as well as "did this layer write this entry".
#[derive(Debug, Clone, Default)]
pub struct LayerScope {
    paths: BTreeSet<PathBuf>,
}

impl LayerScope {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an entry written by the layer.
    pub fn record(&mut self, rel: &Path) {
        let mut current = PathBuf::new();
        for component in rel.components() {
            if let Component::Normal(name) = component {
                current.push(name);
                self.paths.insert(current.clone());
            }
        }
    }

    /// Whether the layer wrote `rel` or something beneath it.
    pub fn contains(&self, rel: &Path) -> bool {
        rel.as_os_str().is_empty() || self.paths.contains(rel)
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }
}

/// Resolve every whiteout marker under `dir`.
///
/// Without layer information every entry sharing a directory with an opaque
/// marker counts as lower-layer content and is removed.
pub fn clean_whiteout_files(dir: &Path) -> Result<WhiteoutStats, CleanupError> {
    Walker::new(dir, None).run()
}

/// Resolve the markers a single layer introduced.
///
/// Only directories the layer touched are visited. Opaque markers remove
/// entries outside `scope`, including lower-layer content nested inside
/// directories the layer re-created.
pub fn resolve_layer_whiteouts(
    dir: &Path,
    scope: &LayerScope,
) -> Result<WhiteoutStats, CleanupError> {
    Walker::new(dir, Some(scope)).run()
}

/// Whether a file name is any kind of whiteout marker.
pub fn is_marker(name: &str) -> bool {
    name.starts_with(WHITEOUT_PREFIX)
}

struct Child {
    name: OsString,
    file_type: FileType,
}

struct Walker<'a> {
    root: &'a Path,
    scope: Option<&'a LayerScope>,
    stats: WhiteoutStats,
}

impl<'a> Walker<'a> {
    fn new(root: &'a Path, scope: Option<&'a LayerScope>) -> Self {
        Self {
            root,
            scope,
            stats: WhiteoutStats::default(),
        }
    }

    fn run(mut self) -> Result<WhiteoutStats, CleanupError> {
        match fs::symlink_metadata(self.root) {
            Ok(meta) if meta.is_dir() => {}
            Ok(_) => {
                return Err(CleanupError::MissingDirectory {
                    path: self.root.to_path_buf(),
                })
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(CleanupError::MissingDirectory {
                    path: self.root.to_path_buf(),
                })
            }
            Err(source) => {
                return Err(CleanupError::ReadDir {
                    path: self.root.to_path_buf(),
                    source,
                })
            }
        }

        self.walk(Path::new(""), false)?;

        debug!(
            root = %self.root.display(),
            scoped = self.scope.is_some(),
            markers_removed = self.stats.markers_removed,
            entries_removed = self.stats.entries_removed,
            opaque_dirs = self.stats.opaque_dirs,
            "Whiteout pass complete"
        );

        Ok(self.stats)
    }

    /// Entries of an opaque directory that belong to lower layers.
    fn is_lower(&self, rel: &Path) -> bool {
        match self.scope {
            Some(scope) => !scope.contains(rel),
            None => true,
        }
    }

    fn walk(&mut self, rel: &Path, inherited_opaque: bool) -> Result<(), CleanupError> {
        let dir = self.root.join(rel);
        let mut children = list_dir(&dir)?;

        let has_opaque_marker = children.iter().any(|c| c.name == OPAQUE_MARKER);
        // An opaque parent only carries over when we know which entries are new.
        let opaque = has_opaque_marker || (inherited_opaque && self.scope.is_some());

        if opaque {
            let mut kept = Vec::with_capacity(children.len());
            for child in children {
                let child_rel = rel.join(&child.name);
                if child.name == OPAQUE_MARKER {
                    remove_entry(&dir.join(&child.name), &child.file_type)?;
                    self.stats.markers_removed += 1;
                } else if self.is_lower(&child_rel) {
                    trace!(path = %child_rel.display(), "Removing entry under opaque directory");
                    remove_entry(&dir.join(&child.name), &child.file_type)?;
                    self.stats.entries_removed += 1;
                } else {
                    kept.push(child);
                }
            }
            children = kept;
            if has_opaque_marker {
                self.stats.opaque_dirs += 1;
            }
        }

        let mut removed: BTreeSet<OsString> = BTreeSet::new();
        for child in &children {
            let Some(target) = whiteout_target(&child.name) else {
                continue;
            };

            if is_plain_name(target) {
                let target_path = dir.join(target);
                match fs::symlink_metadata(&target_path) {
                    Ok(meta) => {
                        trace!(path = %rel.join(target).display(), "Whiteout removes entry");
                        remove_entry(&target_path, &meta.file_type())?;
                        self.stats.entries_removed += 1;
                        removed.insert(target.to_os_string());
                    }
                    Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                    Err(source) => {
                        return Err(CleanupError::Remove {
                            path: target_path,
                            source,
                        })
                    }
                }
            }

            remove_entry(&dir.join(&child.name), &child.file_type)?;
            self.stats.markers_removed += 1;
            removed.insert(child.name.clone());
        }

        for child in children {
            if !child.file_type.is_dir() || removed.contains(&child.name) {
                continue;
            }
            let child_rel = rel.join(&child.name);
            if let Some(scope) = self.scope {
                if !scope.contains(&child_rel) {
                    continue;
                }
            }
            self.walk(&child_rel, opaque)?;
        }

        Ok(())
    }
}

/// The name a `.wh.` marker deletes, compared on raw bytes so non-UTF-8
/// names are handled too.
#[cfg(unix)]
fn whiteout_target(name: &OsStr) -> Option<&OsStr> {
    use std::os::unix::ffi::OsStrExt;

    name.as_bytes()
        .strip_prefix(WHITEOUT_PREFIX.as_bytes())
        .map(OsStr::from_bytes)
}

#[cfg(not(unix))]
fn whiteout_target(name: &OsStr) -> Option<&OsStr> {
    name.to_str()?.strip_prefix(WHITEOUT_PREFIX).map(OsStr::new)
}

/// True for a single path component other than `.` and `..`.
fn is_plain_name(name: &OsStr) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && !name.as_encoded_bytes().contains(&b'/')
}

fn list_dir(dir: &Path) -> Result<Vec<Child>, CleanupError> {
    let read_err = |source| CleanupError::ReadDir {
        path: dir.to_path_buf(),
        source,
    };

    let mut children = Vec::new();
    for entry in fs::read_dir(dir).map_err(read_err)? {
        let entry = entry.map_err(read_err)?;
        let file_type = entry.file_type().map_err(read_err)?;
        children.push(Child {
            name: entry.file_name(),
            file_type,
        });
    }
    children.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(children)
}

/// Remove a file, symlink or directory tree. Symlinks are never followed.
fn remove_entry(path: &Path, file_type: &FileType) -> Result<(), CleanupError> {
    let result = if file_type.is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    };

    match result {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(source) => Err(CleanupError::Remove {
            path: path.to_path_buf(),
            source,
        }),
    }
}
