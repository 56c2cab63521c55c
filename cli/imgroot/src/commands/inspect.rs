//! Inspect command - summarize a staged image.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use serde::Serialize;

use imgroot_rootfs::parse_manifest;

/// Print a summary of a staged image's manifest.
#[derive(Debug, Args)]
pub struct InspectCommand {
    /// Directory holding manifest.json and the layer blobs.
    staged_dir: PathBuf,
}

#[derive(Debug, Serialize)]
struct LayerSummary {
    digest: String,
    media_type: String,
    size: u64,
    present: bool,
}

#[derive(Debug, Serialize)]
struct InspectOutput {
    schema_version: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    media_type: Option<String>,
    total_layer_size: u64,
    layers: Vec<LayerSummary>,
}

impl InspectCommand {
    pub fn run(self) -> Result<()> {
        let manifest = parse_manifest(&self.staged_dir)
            .with_context(|| format!("Failed to inspect {}", self.staged_dir.display()))?;

        let layers = manifest
            .layers
            .iter()
            .map(|layer| LayerSummary {
                present: layer
                    .blob_candidates(&self.staged_dir)
                    .iter()
                    .any(|p| p.is_file()),
                digest: layer.digest.clone(),
                media_type: layer.media_type.clone(),
                size: layer.size,
            })
            .collect();

        let output = InspectOutput {
            schema_version: manifest.schema_version,
            total_layer_size: manifest.total_layer_size(),
            media_type: manifest.media_type,
            layers,
        };
        println!("{}", serde_json::to_string_pretty(&output)?);
        Ok(())
    }
}
