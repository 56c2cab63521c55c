//! Layer extraction into a destination tree.
//!
//! Layers are applied in manifest order. After each layer its whiteout
//! markers are resolved against everything applied so far, before the next
//! layer is unpacked.

use std::fs::{self, File};
use std::io::{self, BufRead, BufReader, Read};
use std::path::{Component, Path, PathBuf};

use flate2::read::GzDecoder;
use tar::Archive;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::manifest::{parse_manifest, Descriptor, ManifestError};
use crate::whiteout::{resolve_layer_whiteouts, CleanupError, LayerScope, WhiteoutStats};

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];
const ZSTD_MAGIC: [u8; 4] = [0x28, 0xb5, 0x2f, 0xfd];

/// Errors from applying image layers.
#[derive(Debug, Error)]
pub enum ExtractError {
    #[error(transparent)]
    Manifest(#[from] ManifestError),

    #[error("Blob for layer {digest} not found in {}", .staged_dir.display())]
    MissingBlob { digest: String, staged_dir: PathBuf },

    #[error("Failed to extract layer {digest}: {source}")]
    Layer {
        digest: String,
        #[source]
        source: io::Error,
    },

    #[error("Layer {digest} uses unsupported compression: {compression}")]
    UnsupportedCompression { digest: String, compression: String },

    #[error("Whiteout resolution failed for layer {digest}: {source}")]
    Whiteout {
        digest: String,
        #[source]
        source: CleanupError,
    },

    #[error("Image too large at layer {digest}: {size} bytes exceeds limit of {limit} bytes")]
    TooLarge { digest: String, size: u64, limit: u64 },

    #[error("Failed to prepare destination {}: {source}", .path.display())]
    Destination {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl ExtractError {
    /// Digest of the layer that failed, if the failure belongs to one.
    pub fn layer_digest(&self) -> Option<&str> {
        match self {
            ExtractError::MissingBlob { digest, .. }
            | ExtractError::Layer { digest, .. }
            | ExtractError::UnsupportedCompression { digest, .. }
            | ExtractError::Whiteout { digest, .. }
            | ExtractError::TooLarge { digest, .. } => Some(digest),
            _ => None,
        }
    }
}

/// Summary of a completed extraction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExtractReport {
    /// Layers applied.
    pub layers_applied: usize,
    /// Tar entries written to the destination.
    pub entries_unpacked: u64,
    /// Tar entries rejected (unsafe paths).
    pub entries_skipped: u64,
    /// Uncompressed bytes of regular file content written.
    pub bytes_unpacked: u64,
    /// Whiteout counters summed over all layers.
    pub whiteouts: WhiteoutStats,
}

/// Applies the layers of a staged image to a destination tree.
///
/// Closures with the matching signature implement this trait, which keeps
/// test doubles short.
pub trait LayerExtractor: Send + Sync {
    fn extract_layers(&self, staged_dir: &Path, dest: &Path)
        -> Result<ExtractReport, ExtractError>;
}

impl<F> LayerExtractor for F
where
    F: Fn(&Path, &Path) -> Result<ExtractReport, ExtractError> + Send + Sync,
{
    fn extract_layers(
        &self,
        staged_dir: &Path,
        dest: &Path,
    ) -> Result<ExtractReport, ExtractError> {
        self(staged_dir, dest)
    }
}

/// Configuration for layer extraction.
#[derive(Debug, Clone)]
pub struct ExtractConfig {
    /// Apply permission bits recorded in the layers.
    pub preserve_permissions: bool,
    /// Apply modification times recorded in the layers.
    pub preserve_mtime: bool,
    /// Maximum uncompressed file content across all layers.
    pub max_uncompressed_size: u64,
}

impl Default for ExtractConfig {
    fn default() -> Self {
        Self {
            preserve_permissions: true,
            preserve_mtime: true,
            max_uncompressed_size: 50 * 1024 * 1024 * 1024, // 50 GiB
        }
    }
}

/// Production extractor: tar layers, optionally gzip-compressed.
#[derive(Debug, Clone, Default)]
pub struct TarLayerExtractor {
    config: ExtractConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Compression {
    Gzip,
    Zstd,
    None,
}

impl Compression {
    fn sniff(magic: &[u8]) -> Self {
        if magic.starts_with(&GZIP_MAGIC) {
            Compression::Gzip
        } else if magic.starts_with(&ZSTD_MAGIC) {
            Compression::Zstd
        } else {
            Compression::None
        }
    }
}

impl TarLayerExtractor {
    pub fn new(config: ExtractConfig) -> Self {
        Self { config }
    }

    /// Find the blob file backing a layer.
    fn locate_blob(&self, staged_dir: &Path, layer: &Descriptor) -> Result<PathBuf, ExtractError> {
        layer
            .blob_candidates(staged_dir)
            .into_iter()
            .find(|candidate| candidate.is_file())
            .ok_or_else(|| ExtractError::MissingBlob {
                digest: layer.digest.clone(),
                staged_dir: staged_dir.to_path_buf(),
            })
    }

    /// Unpack one layer and resolve its whiteouts.
    fn apply_layer(
        &self,
        blob: &Path,
        layer: &Descriptor,
        dest: &Path,
        report: &mut ExtractReport,
    ) -> Result<(), ExtractError> {
        let layer_err = |source| ExtractError::Layer {
            digest: layer.digest.clone(),
            source,
        };

        let mut reader = BufReader::new(File::open(blob).map_err(layer_err)?);
        let compression = Compression::sniff(reader.fill_buf().map_err(layer_err)?);

        if compression == Compression::Zstd || layer.is_zstd() {
            return Err(ExtractError::UnsupportedCompression {
                digest: layer.digest.clone(),
                compression: "zstd".to_string(),
            });
        }

        let scope = match compression {
            Compression::Gzip => self.unpack_stream(GzDecoder::new(reader), layer, dest, report)?,
            _ => self.unpack_stream(reader, layer, dest, report)?,
        };

        let stats = resolve_layer_whiteouts(dest, &scope).map_err(|source| {
            ExtractError::Whiteout {
                digest: layer.digest.clone(),
                source,
            }
        })?;
        report.whiteouts.merge(stats);

        Ok(())
    }

    /// Unpack a tar stream, recording which paths it wrote.
    fn unpack_stream<R: Read>(
        &self,
        reader: R,
        layer: &Descriptor,
        dest: &Path,
        report: &mut ExtractReport,
    ) -> Result<LayerScope, ExtractError> {
        let layer_err = |source| ExtractError::Layer {
            digest: layer.digest.clone(),
            source,
        };

        let mut archive = Archive::new(reader);
        archive.set_overwrite(true);
        archive.set_preserve_permissions(self.config.preserve_permissions);
        archive.set_preserve_mtime(self.config.preserve_mtime);
        archive.set_unpack_xattrs(false);

        let mut scope = LayerScope::new();

        for entry in archive.entries().map_err(layer_err)? {
            let mut entry = entry.map_err(layer_err)?;
            let raw_path = entry.path().map_err(layer_err)?.into_owned();

            let Some(rel) = normalize_entry_path(&raw_path) else {
                warn!(
                    digest = %layer.digest,
                    path = %raw_path.display(),
                    "Skipping path with parent directory"
                );
                report.entries_skipped += 1;
                continue;
            };
            if rel.as_os_str().is_empty() {
                // The archive root ("./") maps onto the destination itself.
                continue;
            }

            let entry_type = entry.header().entry_type();

            // Anything reached through a symlink may live outside `dest`.
            if !self.stays_inside(dest, &rel, &entry).map_err(layer_err)? {
                warn!(
                    digest = %layer.digest,
                    path = %raw_path.display(),
                    "Skipping entry that resolves through a symlink"
                );
                report.entries_skipped += 1;
                continue;
            }

            if entry_type.is_file() {
                let size = entry.header().size().map_err(layer_err)?;
                report.bytes_unpacked += size;
                if report.bytes_unpacked > self.config.max_uncompressed_size {
                    return Err(ExtractError::TooLarge {
                        digest: layer.digest.clone(),
                        size: report.bytes_unpacked,
                        limit: self.config.max_uncompressed_size,
                    });
                }
            }

            replace_mismatched(&dest.join(&rel), entry_type.is_dir()).map_err(layer_err)?;

            if entry.unpack_in(dest).map_err(layer_err)? {
                scope.record(&rel);
                report.entries_unpacked += 1;
            } else {
                warn!(
                    digest = %layer.digest,
                    path = %raw_path.display(),
                    "Skipping entry outside destination"
                );
                report.entries_skipped += 1;
            }
        }

        Ok(scope)
    }

    /// Whether unpacking `entry` at `rel` touches only paths under `dest`.
    ///
    /// Checks the entry's parents and, for hard links, the link target.
    fn stays_inside<R: Read>(
        &self,
        dest: &Path,
        rel: &Path,
        entry: &tar::Entry<'_, R>,
    ) -> io::Result<bool> {
        if has_symlink_ancestor(dest, rel)? {
            return Ok(false);
        }
        if entry.header().entry_type().is_hard_link() {
            let Some(target) = entry.link_name()? else {
                return Ok(false);
            };
            if target.is_absolute() {
                return Ok(false);
            }
            let Some(target) = normalize_entry_path(&target) else {
                return Ok(false);
            };
            if target.as_os_str().is_empty() || has_symlink_ancestor(dest, &target)? {
                return Ok(false);
            }
            // Linking to a symlink would resolve through it.
            if let Ok(meta) = fs::symlink_metadata(dest.join(&target)) {
                if meta.file_type().is_symlink() {
                    return Ok(false);
                }
            }
        }
        Ok(true)
    }
}

impl LayerExtractor for TarLayerExtractor {
    fn extract_layers(
        &self,
        staged_dir: &Path,
        dest: &Path,
    ) -> Result<ExtractReport, ExtractError> {
        let manifest = parse_manifest(staged_dir)?;

        fs::create_dir_all(dest).map_err(|source| ExtractError::Destination {
            path: dest.to_path_buf(),
            source,
        })?;

        info!(
            staged_dir = %staged_dir.display(),
            dest = %dest.display(),
            layer_count = manifest.layers.len(),
            "Extracting image layers"
        );

        let mut report = ExtractReport::default();

        for (i, layer) in manifest.layers.iter().enumerate() {
            let blob = self.locate_blob(staged_dir, layer)?;
            debug!(
                layer = i,
                digest = %layer.digest,
                media_type = %layer.media_type,
                path = %blob.display(),
                "Applying layer"
            );

            self.apply_layer(&blob, layer, dest, &mut report)?;
            report.layers_applied += 1;
        }

        info!(
            dest = %dest.display(),
            layers = report.layers_applied,
            entries = report.entries_unpacked,
            bytes = report.bytes_unpacked,
            whiteouts = report.whiteouts.entries_removed,
            "Image layers extracted"
        );

        Ok(report)
    }
}

/// Strip `.` and root components from a tar path.
///
/// Returns `None` if the path climbs out with `..`.
fn normalize_entry_path(path: &Path) -> Option<PathBuf> {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => normalized.push(part),
            Component::CurDir | Component::RootDir | Component::Prefix(_) => {}
            Component::ParentDir => return None,
        }
    }
    Some(normalized)
}

/// Whether any existing parent of `rel` under `dest` is a symlink.
fn has_symlink_ancestor(dest: &Path, rel: &Path) -> io::Result<bool> {
    let Some(parent) = rel.parent() else {
        return Ok(false);
    };

    let mut current = dest.to_path_buf();
    for component in parent.components() {
        current.push(component);
        match fs::symlink_metadata(&current) {
            Ok(meta) if meta.file_type().is_symlink() => return Ok(true),
            Ok(_) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(e),
        }
    }
    Ok(false)
}

/// Clear the way for an entry whose type differs from what is on disk.
///
/// A directory replaces a file; anything else replaces a directory. An
/// existing symlink is always removed so the entry never writes through it.
/// Callers must first rule out symlinks among the parents.
fn replace_mismatched(target: &Path, entry_is_dir: bool) -> io::Result<()> {
    let file_type = match fs::symlink_metadata(target) {
        Ok(meta) => meta.file_type(),
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e),
    };

    if file_type.is_symlink() {
        return fs::remove_file(target);
    }
    match (entry_is_dir, file_type.is_dir()) {
        (true, false) => fs::remove_file(target),
        (false, true) => fs::remove_dir_all(target),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{gzip_layer, stage_image, tar_layer, LayerEntry};
    use tempfile::tempdir;

    #[test]
    fn test_no_layers_manifest_leaves_destination_unchanged() {
        let staged = tempdir().unwrap();
        let dest = tempdir().unwrap();
        fs::write(
            staged.path().join("manifest.json"),
            r#"{"schemaVersion": 2, "layers": []}"#,
        )
        .unwrap();
        fs::write(dest.path().join("existing.txt"), b"keep").unwrap();

        let report = TarLayerExtractor::default()
            .extract_layers(staged.path(), dest.path())
            .unwrap();

        assert_eq!(report, ExtractReport::default());
        assert_eq!(
            fs::read_to_string(dest.path().join("existing.txt")).unwrap(),
            "keep"
        );
        assert_eq!(fs::read_dir(dest.path()).unwrap().count(), 1);
    }

    #[test]
    fn test_manifest_error_propagates() {
        let staged = tempdir().unwrap();
        let dest = tempdir().unwrap();

        let err = TarLayerExtractor::default()
            .extract_layers(staged.path(), dest.path())
            .unwrap_err();

        match err {
            ExtractError::Manifest(inner) => assert!(inner.is_not_found()),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_later_layer_overwrites_file() {
        let staged = tempdir().unwrap();
        let dest = tempdir().unwrap();
        stage_image(
            staged.path(),
            &[
                gzip_layer(&[LayerEntry::file("etc/os-release", "v1")]),
                tar_layer(&[LayerEntry::file("etc/os-release", "v2")]),
            ],
        );

        let report = TarLayerExtractor::default()
            .extract_layers(staged.path(), dest.path())
            .unwrap();

        assert_eq!(report.layers_applied, 2);
        assert_eq!(
            fs::read_to_string(dest.path().join("etc/os-release")).unwrap(),
            "v2"
        );
    }

    #[test]
    fn test_whiteout_applies_to_lower_layer_only() {
        let staged = tempdir().unwrap();
        let dest = tempdir().unwrap();
        stage_image(
            staged.path(),
            &[
                gzip_layer(&[
                    LayerEntry::file("data/a.txt", "a"),
                    LayerEntry::file("data/b.txt", "b"),
                ]),
                gzip_layer(&[LayerEntry::file("data/.wh.a.txt", "")]),
                gzip_layer(&[LayerEntry::file("data/a.txt", "restored")]),
            ],
        );

        let report = TarLayerExtractor::default()
            .extract_layers(staged.path(), dest.path())
            .unwrap();

        assert_eq!(
            fs::read_to_string(dest.path().join("data/a.txt")).unwrap(),
            "restored"
        );
        assert!(dest.path().join("data/b.txt").exists());
        assert!(!dest.path().join("data/.wh.a.txt").exists());
        assert_eq!(report.whiteouts.markers_removed, 1);
        assert_eq!(report.whiteouts.entries_removed, 1);
    }

    #[test]
    fn test_opaque_directory_keeps_same_layer_content() {
        let staged = tempdir().unwrap();
        let dest = tempdir().unwrap();
        stage_image(
            staged.path(),
            &[
                gzip_layer(&[
                    LayerEntry::dir("srv"),
                    LayerEntry::file("srv/old.conf", "old"),
                    LayerEntry::file("srv/nested/old.db", "old"),
                ]),
                gzip_layer(&[
                    // Content precedes the marker; ordering inside a layer must not matter.
                    LayerEntry::file("srv/new.conf", "new"),
                    LayerEntry::file("srv/nested/new.db", "new"),
                    LayerEntry::file("srv/.wh..wh..opq", ""),
                ]),
            ],
        );

        TarLayerExtractor::default()
            .extract_layers(staged.path(), dest.path())
            .unwrap();

        assert!(dest.path().join("srv/new.conf").exists());
        assert!(dest.path().join("srv/nested/new.db").exists());
        assert!(!dest.path().join("srv/old.conf").exists());
        assert!(!dest.path().join("srv/nested/old.db").exists());
        assert!(!dest.path().join("srv/.wh..wh..opq").exists());
    }

    #[test]
    fn test_file_replaces_directory() {
        let staged = tempdir().unwrap();
        let dest = tempdir().unwrap();
        stage_image(
            staged.path(),
            &[
                tar_layer(&[LayerEntry::file("opt/tool/bin", "x")]),
                tar_layer(&[LayerEntry::file("opt/tool", "now a file")]),
            ],
        );

        TarLayerExtractor::default()
            .extract_layers(staged.path(), dest.path())
            .unwrap();

        assert_eq!(
            fs::read_to_string(dest.path().join("opt/tool")).unwrap(),
            "now a file"
        );
    }

    #[test]
    fn test_missing_blob_reports_digest() {
        let staged = tempdir().unwrap();
        let dest = tempdir().unwrap();
        fs::write(
            staged.path().join("manifest.json"),
            r#"{"schemaVersion": 2, "layers": [{"mediaType": "application/vnd.oci.image.layer.v1.tar", "digest": "sha256:deadbeef", "size": 1}]}"#,
        )
        .unwrap();

        let err = TarLayerExtractor::default()
            .extract_layers(staged.path(), dest.path())
            .unwrap_err();

        assert!(matches!(err, ExtractError::MissingBlob { .. }));
        assert_eq!(err.layer_digest(), Some("sha256:deadbeef"));
    }

    #[test]
    fn test_corrupt_layer_reports_digest() {
        let staged = tempdir().unwrap();
        let dest = tempdir().unwrap();
        let mut corrupt = GZIP_MAGIC.to_vec();
        corrupt.extend_from_slice(b"definitely not deflate data");
        let digests = stage_image(staged.path(), &[corrupt]);

        let err = TarLayerExtractor::default()
            .extract_layers(staged.path(), dest.path())
            .unwrap_err();

        assert!(matches!(err, ExtractError::Layer { .. }));
        assert_eq!(err.layer_digest(), Some(digests[0].as_str()));
    }

    #[test]
    fn test_zstd_layer_is_rejected() {
        let staged = tempdir().unwrap();
        let dest = tempdir().unwrap();
        let mut blob = ZSTD_MAGIC.to_vec();
        blob.extend_from_slice(&[0u8; 32]);
        stage_image(staged.path(), &[blob]);

        let err = TarLayerExtractor::default()
            .extract_layers(staged.path(), dest.path())
            .unwrap_err();

        assert!(matches!(err, ExtractError::UnsupportedCompression { .. }));
    }

    #[test]
    fn test_uncompressed_budget_is_enforced() {
        let staged = tempdir().unwrap();
        let dest = tempdir().unwrap();
        let digests = stage_image(
            staged.path(),
            &[tar_layer(&[LayerEntry::file("big.bin", "0123456789")])],
        );

        let extractor = TarLayerExtractor::new(ExtractConfig {
            max_uncompressed_size: 4,
            ..Default::default()
        });
        let err = extractor
            .extract_layers(staged.path(), dest.path())
            .unwrap_err();

        assert!(matches!(err, ExtractError::TooLarge { size: 10, limit: 4, .. }));
        assert_eq!(err.layer_digest(), Some(digests[0].as_str()));
    }

    #[cfg(unix)]
    #[test]
    fn test_entries_through_symlinks_stay_inside_destination() {
        let staged = tempdir().unwrap();
        let dest = tempdir().unwrap();
        let outside = tempdir().unwrap();
        fs::create_dir_all(outside.path().join("precious/data")).unwrap();
        fs::write(outside.path().join("precious/data/file"), b"host").unwrap();
        let outside_dir = outside.path().to_str().unwrap();

        stage_image(
            staged.path(),
            &[
                tar_layer(&[LayerEntry::symlink("evil", outside_dir)]),
                tar_layer(&[
                    LayerEntry::file("evil/precious", "clobbered"),
                    // A link created earlier in the same layer is no different.
                    LayerEntry::symlink("alias", outside_dir),
                    LayerEntry::file("alias/planted", "x"),
                ]),
            ],
        );

        let report = TarLayerExtractor::default()
            .extract_layers(staged.path(), dest.path())
            .unwrap();

        assert_eq!(report.entries_skipped, 2);
        assert_eq!(
            fs::read(outside.path().join("precious/data/file")).unwrap(),
            b"host"
        );
        assert!(!outside.path().join("planted").exists());
        assert!(fs::symlink_metadata(dest.path().join("evil"))
            .unwrap()
            .file_type()
            .is_symlink());
    }

    #[cfg(unix)]
    #[test]
    fn test_hardlink_through_symlink_is_skipped() {
        let staged = tempdir().unwrap();
        let dest = tempdir().unwrap();
        let outside = tempdir().unwrap();
        fs::write(outside.path().join("secret"), b"host").unwrap();

        stage_image(
            staged.path(),
            &[
                tar_layer(&[LayerEntry::symlink("evil", outside.path().to_str().unwrap())]),
                tar_layer(&[
                    LayerEntry::hardlink("stolen", "evil/secret"),
                    LayerEntry::hardlink("via-link", "evil"),
                ]),
            ],
        );

        let report = TarLayerExtractor::default()
            .extract_layers(staged.path(), dest.path())
            .unwrap();

        assert_eq!(report.entries_skipped, 2);
        assert!(fs::symlink_metadata(dest.path().join("stolen")).is_err());
        assert!(fs::symlink_metadata(dest.path().join("via-link")).is_err());
    }

    #[cfg(unix)]
    #[test]
    fn test_file_replaces_symlink_without_following_it() {
        let staged = tempdir().unwrap();
        let dest = tempdir().unwrap();
        let outside = tempdir().unwrap();
        let host_file = outside.path().join("target.conf");
        fs::write(&host_file, b"orig").unwrap();

        stage_image(
            staged.path(),
            &[
                tar_layer(&[LayerEntry::symlink("app.conf", host_file.to_str().unwrap())]),
                tar_layer(&[LayerEntry::file("app.conf", "new")]),
            ],
        );

        TarLayerExtractor::default()
            .extract_layers(staged.path(), dest.path())
            .unwrap();

        assert_eq!(fs::read(&host_file).unwrap(), b"orig");
        let meta = fs::symlink_metadata(dest.path().join("app.conf")).unwrap();
        assert!(meta.file_type().is_file());
        assert_eq!(
            fs::read_to_string(dest.path().join("app.conf")).unwrap(),
            "new"
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_directory_replaces_symlink() {
        let staged = tempdir().unwrap();
        let dest = tempdir().unwrap();
        let outside = tempdir().unwrap();

        stage_image(
            staged.path(),
            &[
                tar_layer(&[LayerEntry::symlink("lib", outside.path().to_str().unwrap())]),
                tar_layer(&[LayerEntry::dir("lib"), LayerEntry::file("lib/libc.so", "elf")]),
            ],
        );

        TarLayerExtractor::default()
            .extract_layers(staged.path(), dest.path())
            .unwrap();

        let meta = fs::symlink_metadata(dest.path().join("lib")).unwrap();
        assert!(meta.file_type().is_dir());
        assert!(dest.path().join("lib/libc.so").is_file());
        assert_eq!(fs::read_dir(outside.path()).unwrap().count(), 0);
    }

    #[cfg(unix)]
    #[test]
    fn test_whiteout_removes_lower_layer_symlink() {
        let staged = tempdir().unwrap();
        let dest = tempdir().unwrap();

        stage_image(
            staged.path(),
            &[
                tar_layer(&[
                    LayerEntry::file("data/real.txt", "keep"),
                    LayerEntry::symlink("data/link", "real.txt"),
                ]),
                tar_layer(&[LayerEntry::file("data/.wh.link", "")]),
            ],
        );

        let report = TarLayerExtractor::default()
            .extract_layers(staged.path(), dest.path())
            .unwrap();

        assert!(fs::symlink_metadata(dest.path().join("data/link")).is_err());
        assert!(!dest.path().join("data/.wh.link").exists());
        assert_eq!(
            fs::read_to_string(dest.path().join("data/real.txt")).unwrap(),
            "keep"
        );
        assert_eq!(report.whiteouts.entries_removed, 1);
    }

    #[test]
    fn test_hardlink_within_image() {
        let staged = tempdir().unwrap();
        let dest = tempdir().unwrap();

        stage_image(
            staged.path(),
            &[tar_layer(&[
                LayerEntry::file("bin/busybox", "multicall"),
                LayerEntry::hardlink("bin/sh", "bin/busybox"),
            ])],
        );

        let report = TarLayerExtractor::default()
            .extract_layers(staged.path(), dest.path())
            .unwrap();

        assert_eq!(report.entries_unpacked, 2);
        assert_eq!(
            fs::read_to_string(dest.path().join("bin/sh")).unwrap(),
            "multicall"
        );
    }

    #[test]
    fn test_normalize_entry_path() {
        assert_eq!(
            normalize_entry_path(Path::new("./usr/bin/sh")),
            Some(PathBuf::from("usr/bin/sh"))
        );
        assert_eq!(
            normalize_entry_path(Path::new("/etc/hosts")),
            Some(PathBuf::from("etc/hosts"))
        );
        assert_eq!(normalize_entry_path(Path::new("./")), Some(PathBuf::new()));
        assert_eq!(normalize_entry_path(Path::new("../etc/shadow")), None);
    }

    #[test]
    fn test_closure_extractor() {
        let extractor = |_: &Path, _: &Path| -> Result<ExtractReport, ExtractError> {
            Ok(ExtractReport::default())
        };
        let report = extractor
            .extract_layers(Path::new("/nonexistent"), Path::new("/nonexistent"))
            .unwrap();
        assert_eq!(report.layers_applied, 0);
    }
}
