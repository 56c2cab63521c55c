//! Staged image manifest parsing.
//!
//! A staged image directory holds a `manifest.json` next to its blobs. Only
//! single-image manifests with `schemaVersion: 2` (Docker v2 schema 2 and OCI
//! image manifests) are accepted.
//!
//! Reference: https://github.com/opencontainers/image-spec/blob/main/manifest.md

use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

/// Manifest file name inside a staged image directory.
pub const MANIFEST_FILE: &str = "manifest.json";

/// The only manifest schema version this crate understands.
pub const SUPPORTED_SCHEMA_VERSION: u32 = 2;

const INDEX_MEDIA_TYPES: &[&str] = &[
    "application/vnd.oci.image.index.v1+json",
    "application/vnd.docker.distribution.manifest.list.v2+json",
];

/// Errors from reading a staged manifest.
#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("Manifest not found: {}", .path.display())]
    NotFound { path: PathBuf },

    #[error("Failed to decode manifest {}: {source}", .path.display())]
    Decode {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Unsupported manifest schema version {version} in {}", .path.display())]
    UnsupportedSchemaVersion { path: PathBuf, version: u32 },

    #[error("{} is a multi-platform index ({media_type}), expected an image manifest", .path.display())]
    IndexNotSupported { path: PathBuf, media_type: String },

    #[error("Failed to read manifest {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl ManifestError {
    /// Returns true if the staged directory or its manifest file is missing.
    pub fn is_not_found(&self) -> bool {
        matches!(self, ManifestError::NotFound { .. })
    }

    /// Returns true if the manifest exists but its content is unusable.
    pub fn is_malformed(&self) -> bool {
        matches!(
            self,
            ManifestError::Decode { .. }
                | ManifestError::UnsupportedSchemaVersion { .. }
                | ManifestError::IndexNotSupported { .. }
        )
    }
}

/// Image manifest.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    /// Schema version.
    pub schema_version: u32,
    /// Media type.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_type: Option<String>,
    /// Config descriptor.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<Descriptor>,
    /// Layer descriptors, base layer first.
    #[serde(default)]
    pub layers: Vec<Descriptor>,
}

/// Content descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Descriptor {
    /// Media type of the referenced content.
    #[serde(default)]
    pub media_type: String,
    /// Digest of the content.
    pub digest: String,
    /// Size in bytes.
    #[serde(default)]
    pub size: u64,
}

impl Manifest {
    /// Decode and validate a manifest document.
    ///
    /// `path` is only used to annotate errors.
    pub fn from_slice(bytes: &[u8], path: &Path) -> Result<Self, ManifestError> {
        let manifest: Manifest =
            serde_json::from_slice(bytes).map_err(|source| ManifestError::Decode {
                path: path.to_path_buf(),
                source,
            })?;
        manifest.validate(path)?;
        Ok(manifest)
    }

    fn validate(&self, path: &Path) -> Result<(), ManifestError> {
        if self.schema_version != SUPPORTED_SCHEMA_VERSION {
            return Err(ManifestError::UnsupportedSchemaVersion {
                path: path.to_path_buf(),
                version: self.schema_version,
            });
        }

        if let Some(media_type) = self.media_type.as_deref() {
            if INDEX_MEDIA_TYPES.contains(&media_type) {
                return Err(ManifestError::IndexNotSupported {
                    path: path.to_path_buf(),
                    media_type: media_type.to_string(),
                });
            }
        }

        Ok(())
    }

    /// Get total compressed size of all layers.
    pub fn total_layer_size(&self) -> u64 {
        self.layers.iter().map(|l| l.size).sum()
    }
}

impl Descriptor {
    /// Split the digest into its algorithm and encoded parts.
    ///
    /// Returns `None` for a digest without an algorithm prefix.
    pub fn digest_parts(&self) -> Option<(&str, &str)> {
        self.digest.split_once(':')
    }

    /// Whether the media type declares zstd compression.
    pub fn is_zstd(&self) -> bool {
        self.media_type.ends_with("+zstd") || self.media_type.ends_with(".zstd")
    }

    /// Candidate blob locations for this descriptor under `staged_dir`.
    ///
    /// Covers the skopeo `dir:` layout (`<hex>`), the OCI image layout
    /// (`blobs/<algorithm>/<hex>`) and a file named by the full digest.
    /// Returns an empty list if the digest cannot name a file safely.
    pub fn blob_candidates(&self, staged_dir: &Path) -> Vec<PathBuf> {
        let mut candidates = Vec::with_capacity(3);
        match self.digest_parts() {
            Some((algorithm, encoded)) => {
                if is_plain_file_name(algorithm) && is_plain_file_name(encoded) {
                    candidates.push(staged_dir.join(encoded));
                    candidates.push(staged_dir.join("blobs").join(algorithm).join(encoded));
                    candidates.push(staged_dir.join(&self.digest));
                }
            }
            None => {
                if is_plain_file_name(&self.digest) {
                    candidates.push(staged_dir.join(&self.digest));
                }
            }
        }
        candidates
    }
}

/// True if `name` is a single normal path component.
fn is_plain_file_name(name: &str) -> bool {
    let mut components = Path::new(name).components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    ) && !name.contains(['/', '\\'])
}

/// Read and validate the manifest of a staged image directory.
pub fn parse_manifest(staged_dir: &Path) -> Result<Manifest, ManifestError> {
    let path = staged_dir.join(MANIFEST_FILE);

    let bytes = fs::read(&path).map_err(|source| match source.kind() {
        io::ErrorKind::NotFound => ManifestError::NotFound { path: path.clone() },
        _ => ManifestError::Io {
            path: path.clone(),
            source,
        },
    })?;

    let manifest = Manifest::from_slice(&bytes, &path)?;

    debug!(
        path = %path.display(),
        layer_count = manifest.layers.len(),
        total_layer_bytes = manifest.total_layer_size(),
        "Manifest parsed"
    );

    Ok(manifest)
}
