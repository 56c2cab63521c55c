//! Clean-whiteouts command - resolve markers in an already unpacked tree.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;

use imgroot_rootfs::clean_whiteout_files;

/// Apply and remove whiteout markers in an existing tree.
///
/// Without layer boundaries, every sibling of an opaque marker is removed.
#[derive(Debug, Args)]
pub struct CleanCommand {
    /// Root of the tree to clean.
    dir: PathBuf,
}

impl CleanCommand {
    pub fn run(self) -> Result<()> {
        let stats = clean_whiteout_files(&self.dir)
            .with_context(|| format!("Failed to clean whiteouts in {}", self.dir.display()))?;

        println!(
            "{}",
            serde_json::json!({
                "markers_removed": stats.markers_removed,
                "entries_removed": stats.entries_removed,
                "opaque_dirs": stats.opaque_dirs,
            })
        );
        Ok(())
    }
}
