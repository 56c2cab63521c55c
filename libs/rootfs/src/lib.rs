//! # imgroot-rootfs
//!
//! Turns a container image reference into a plain directory tree.
//!
//! ## Pipeline
//!
//! 1. An external copy tool stages the image (manifest plus layer blobs)
//!    in a private directory.
//! 2. The manifest is parsed and its layers are unpacked in order into the
//!    destination.
//! 3. After each layer, whiteout markers (`.wh.<name>` and `.wh..wh..opq`)
//!    are applied and removed, so the finished tree contains none.
//!
//! The fetch and extraction steps sit behind the [`Fetcher`] and
//! [`LayerExtractor`] traits so either can be replaced in tests.

pub mod config;
pub mod extract;
pub mod fetch;
pub mod manifest;
pub mod resolver;
pub mod whiteout;

#[cfg(test)]
mod testutil;

pub use config::ResolverConfig;
pub use extract::{ExtractConfig, ExtractError, ExtractReport, LayerExtractor, TarLayerExtractor};
pub use fetch::{
    Credentials, FetchError, FetchRequest, Fetcher, SkopeoConfig, SkopeoFetcher, ToolDiagnostic,
};
pub use manifest::{parse_manifest, Descriptor, Manifest, ManifestError};
pub use resolver::{ImageResolver, ResolveError, ResolveReport, ResolveRequest, Substitution};
pub use whiteout::{
    clean_whiteout_files, resolve_layer_whiteouts, CleanupError, LayerScope, WhiteoutStats,
    OPAQUE_MARKER, WHITEOUT_PREFIX,
};
