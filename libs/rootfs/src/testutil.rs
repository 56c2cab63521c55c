//! Builders for staged images used by unit tests.

use std::fs;
use std::path::Path;

use flate2::write::GzEncoder;
use flate2::Compression;
use tar::{Builder, EntryType, Header};

/// One entry in a synthetic layer.
pub enum LayerEntry {
    File { path: String, contents: Vec<u8> },
    Dir { path: String },
    Symlink { path: String, target: String },
    Hardlink { path: String, target: String },
}

impl LayerEntry {
    pub fn file(path: &str, contents: &str) -> Self {
        LayerEntry::File {
            path: path.to_string(),
            contents: contents.as_bytes().to_vec(),
        }
    }

    pub fn dir(path: &str) -> Self {
        LayerEntry::Dir {
            path: path.to_string(),
        }
    }

    pub fn symlink(path: &str, target: &str) -> Self {
        LayerEntry::Symlink {
            path: path.to_string(),
            target: target.to_string(),
        }
    }

    pub fn hardlink(path: &str, target: &str) -> Self {
        LayerEntry::Hardlink {
            path: path.to_string(),
            target: target.to_string(),
        }
    }
}

/// Build an uncompressed tar layer.
pub fn tar_layer(entries: &[LayerEntry]) -> Vec<u8> {
    let mut builder = Builder::new(Vec::new());
    for entry in entries {
        let mut header = Header::new_gnu();
        match entry {
            LayerEntry::File { path, contents } => {
                header.set_entry_type(EntryType::Regular);
                header.set_size(contents.len() as u64);
                header.set_mode(0o644);
                header.set_cksum();
                builder
                    .append_data(&mut header, path, contents.as_slice())
                    .unwrap();
            }
            LayerEntry::Dir { path } => {
                header.set_entry_type(EntryType::Directory);
                header.set_size(0);
                header.set_mode(0o755);
                header.set_cksum();
                builder
                    .append_data(&mut header, path, std::io::empty())
                    .unwrap();
            }
            LayerEntry::Symlink { path, target } => {
                header.set_entry_type(EntryType::Symlink);
                header.set_size(0);
                header.set_mode(0o777);
                builder.append_link(&mut header, path, target).unwrap();
            }
            LayerEntry::Hardlink { path, target } => {
                header.set_entry_type(EntryType::Link);
                header.set_size(0);
                header.set_mode(0o644);
                builder.append_link(&mut header, path, target).unwrap();
            }
        }
    }
    builder.into_inner().unwrap()
}

/// Build a gzip-compressed tar layer.
pub fn gzip_layer(entries: &[LayerEntry]) -> Vec<u8> {
    use std::io::Write;

    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(&tar_layer(entries)).unwrap();
    encoder.finish().unwrap()
}

/// Write blobs in skopeo `dir:` layout plus a manifest listing them in order.
///
/// Digests are synthetic (`sha256:layer<index>`); nothing here verifies them.
/// Returns the digests in manifest order.
pub fn stage_image(dir: &Path, blobs: &[Vec<u8>]) -> Vec<String> {
    let mut digests = Vec::with_capacity(blobs.len());
    let mut layers = Vec::with_capacity(blobs.len());

    for (i, blob) in blobs.iter().enumerate() {
        let encoded = format!("layer{i:04}");
        fs::write(dir.join(&encoded), blob).unwrap();

        let digest = format!("sha256:{encoded}");
        layers.push(serde_json::json!({
            "mediaType": "application/vnd.oci.image.layer.v1.tar",
            "digest": digest,
            "size": blob.len(),
        }));
        digests.push(digest);
    }

    let manifest = serde_json::json!({
        "schemaVersion": 2,
        "mediaType": "application/vnd.oci.image.manifest.v1+json",
        "layers": layers,
    });
    fs::write(
        dir.join("manifest.json"),
        serde_json::to_vec_pretty(&manifest).unwrap(),
    )
    .unwrap();

    digests
}
