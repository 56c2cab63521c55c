//! Resolver configuration.

use std::path::PathBuf;

use crate::extract::ExtractConfig;
use crate::fetch::SkopeoConfig;

/// Top-level configuration for an [`ImageResolver`](crate::ImageResolver).
#[derive(Debug, Clone)]
pub struct ResolverConfig {
    /// Directory under which per-resolution staging directories are created.
    pub staging_root: PathBuf,

    /// Leave the staged image on disk after resolution.
    pub keep_staging: bool,

    /// Fetch tool configuration.
    pub skopeo: SkopeoConfig,

    /// Layer extraction configuration.
    pub extract: ExtractConfig,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            staging_root: std::env::temp_dir(),
            keep_staging: false,
            skopeo: SkopeoConfig::default(),
            extract: ExtractConfig::default(),
        }
    }
}

impl ResolverConfig {
    /// Load configuration from environment variables.
    ///
    /// - `IMGROOT_STAGING_DIR`: staging root
    /// - `IMGROOT_KEEP_STAGING`: `1`/`true` keeps staged images
    /// - `IMGROOT_SKOPEO_BIN`: fetch tool binary
    /// - `IMGROOT_MAX_UNCOMPRESSED_BYTES`: extraction size limit
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary key lookup. Unset or unparsable
    /// values fall back to defaults.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let staging_root = lookup("IMGROOT_STAGING_DIR")
            .filter(|s| !s.is_empty())
            .map(PathBuf::from)
            .unwrap_or(defaults.staging_root);

        let keep_staging = lookup("IMGROOT_KEEP_STAGING")
            .map(|s| matches!(s.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
            .unwrap_or(defaults.keep_staging);

        let skopeo = SkopeoConfig {
            binary: lookup("IMGROOT_SKOPEO_BIN")
                .filter(|s| !s.is_empty())
                .map(PathBuf::from)
                .unwrap_or(defaults.skopeo.binary),
        };

        let extract = ExtractConfig {
            max_uncompressed_size: lookup("IMGROOT_MAX_UNCOMPRESSED_BYTES")
                .and_then(|s| s.trim().parse().ok())
                .unwrap_or(defaults.extract.max_uncompressed_size),
            ..defaults.extract
        };

        Self {
            staging_root,
            keep_staging,
            skopeo,
            extract,
        }
    }
}
