//! Image resolution: fetch, then merge layers into a destination tree.
//!
//! The fetch and extraction steps are collaborators owned by the resolver.
//! Production code uses [`SkopeoFetcher`] and [`TarLayerExtractor`]; tests
//! swap either one for the lifetime of a [`Substitution`] guard.

use std::error::Error as StdError;
use std::ops::{Deref, DerefMut};
use std::path::{Path, PathBuf};
use std::time::Instant;

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::ResolverConfig;
use crate::extract::{ExtractError, ExtractReport, LayerExtractor, TarLayerExtractor};
use crate::fetch::{Credentials, FetchError, FetchRequest, Fetcher, SkopeoFetcher};

/// Errors from resolving an image.
#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("Failed to fetch image {reference}")]
    Fetch {
        reference: String,
        #[source]
        source: FetchError,
    },

    #[error("Failed to merge image {reference} into {}", .dest.display())]
    Extract {
        reference: String,
        dest: PathBuf,
        #[source]
        source: ExtractError,
    },

    #[error("Failed to create staging directory under {}", .root.display())]
    Staging {
        root: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl ResolveError {
    /// The innermost error in the source chain.
    ///
    /// For a failed fetch this is the copy tool's own diagnostic text.
    pub fn root_cause(&self) -> &(dyn StdError + 'static) {
        let mut current: &(dyn StdError + 'static) = self;
        while let Some(next) = current.source() {
            current = next;
        }
        current
    }
}

/// One image to resolve.
#[derive(Debug, Clone)]
pub struct ResolveRequest {
    /// Source image reference, passed through to the fetcher.
    pub source: String,
    /// Directory that receives the merged filesystem tree.
    pub destination: PathBuf,
    pub credentials: Option<Credentials>,
    pub cert_dir: Option<PathBuf>,
    pub insecure_tls: bool,
}

impl ResolveRequest {
    pub fn new(source: impl Into<String>, destination: impl Into<PathBuf>) -> Self {
        Self {
            source: source.into(),
            destination: destination.into(),
            credentials: None,
            cert_dir: None,
            insecure_tls: false,
        }
    }

    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    pub fn with_cert_dir(mut self, cert_dir: impl Into<PathBuf>) -> Self {
        self.cert_dir = Some(cert_dir.into());
        self
    }

    pub fn with_insecure_tls(mut self, insecure_tls: bool) -> Self {
        self.insecure_tls = insecure_tls;
        self
    }
}

/// Result of a successful resolution.
#[derive(Debug, Clone)]
pub struct ResolveReport {
    /// The merged tree.
    pub destination: PathBuf,

    /// Extraction counters.
    pub extract: ExtractReport,

    /// Staged image location, if it was kept.
    pub staged_at: Option<PathBuf>,

    /// Time taken for fetch and merge.
    pub duration_ms: u64,
}

/// Resolves one image into one destination tree per call.
pub struct ImageResolver {
    fetcher: Box<dyn Fetcher>,
    extractor: Box<dyn LayerExtractor>,
    config: ResolverConfig,
}

impl ImageResolver {
    /// Create a resolver with the production collaborators.
    pub fn new(config: ResolverConfig) -> Self {
        let fetcher = SkopeoFetcher::new(config.skopeo.clone());
        let extractor = TarLayerExtractor::new(config.extract.clone());
        Self::with_collaborators(config, fetcher, extractor)
    }

    /// Create a resolver with caller-supplied collaborators.
    pub fn with_collaborators(
        config: ResolverConfig,
        fetcher: impl Fetcher + 'static,
        extractor: impl LayerExtractor + 'static,
    ) -> Self {
        Self {
            fetcher: Box::new(fetcher),
            extractor: Box::new(extractor),
            config,
        }
    }

    pub fn config(&self) -> &ResolverConfig {
        &self.config
    }

    /// Temporarily replace collaborators.
    ///
    /// The originals come back when the returned guard is dropped, on every
    /// exit path including unwinding.
    pub fn substitute(&mut self) -> Substitution<'_> {
        Substitution {
            resolver: self,
            saved_fetcher: None,
            saved_extractor: None,
        }
    }

    /// Fetch `request.source` into a private staging directory and merge its
    /// layers into `request.destination`.
    ///
    /// The destination is not rolled back on failure.
    pub fn resolve(&self, request: &ResolveRequest) -> Result<ResolveReport, ResolveError> {
        let start = Instant::now();

        info!(
            source = %request.source,
            dest = %request.destination.display(),
            "Resolving image"
        );

        let staging = tempfile::Builder::new()
            .prefix("imgroot-staging-")
            .tempdir_in(&self.config.staging_root)
            .map_err(|source| ResolveError::Staging {
                root: self.config.staging_root.clone(),
                source,
            })?;

        let result = self.fetch_and_merge(request, staging.path());

        let staged_at = if self.config.keep_staging {
            let path = staging.keep();
            debug!(path = %path.display(), "Keeping staged image");
            Some(path)
        } else {
            let path = staging.path().to_path_buf();
            if let Err(e) = staging.close() {
                warn!(path = %path.display(), error = %e, "Failed to remove staging directory");
            }
            None
        };

        let extract = result?;
        let duration_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);

        info!(
            source = %request.source,
            dest = %request.destination.display(),
            layers = extract.layers_applied,
            duration_ms,
            "Image resolved"
        );

        Ok(ResolveReport {
            destination: request.destination.clone(),
            extract,
            staged_at,
            duration_ms,
        })
    }

    fn fetch_and_merge(
        &self,
        request: &ResolveRequest,
        staged_dir: &Path,
    ) -> Result<ExtractReport, ResolveError> {
        let fetch_request = FetchRequest {
            source: request.source.clone(),
            destination: staged_dir.to_path_buf(),
            credentials: request.credentials.clone(),
            cert_dir: request.cert_dir.clone(),
            insecure_tls: request.insecure_tls,
        };

        self.fetcher
            .fetch(&fetch_request)
            .map_err(|source| ResolveError::Fetch {
                reference: request.source.clone(),
                source,
            })?;

        debug!(
            source = %request.source,
            staged_dir = %staged_dir.display(),
            "Image staged, merging layers"
        );

        self.extractor
            .extract_layers(staged_dir, &request.destination)
            .map_err(|source| ResolveError::Extract {
                reference: request.source.clone(),
                dest: request.destination.clone(),
                source,
            })
    }
}

/// Scoped replacement of an [`ImageResolver`]'s collaborators.
///
/// Dereferences to the resolver, so `guard.resolve(..)` runs with the
/// substitutes in place.
pub struct Substitution<'a> {
    resolver: &'a mut ImageResolver,
    saved_fetcher: Option<Box<dyn Fetcher>>,
    saved_extractor: Option<Box<dyn LayerExtractor>>,
}

impl Substitution<'_> {
    /// Use `fetcher` until the guard is dropped.
    pub fn fetcher(mut self, fetcher: impl Fetcher + 'static) -> Self {
        let previous = std::mem::replace(&mut self.resolver.fetcher, Box::new(fetcher));
        // Keep the first original if substituted more than once.
        self.saved_fetcher.get_or_insert(previous);
        self
    }

    /// Use `extractor` until the guard is dropped.
    pub fn extractor(mut self, extractor: impl LayerExtractor + 'static) -> Self {
        let previous = std::mem::replace(&mut self.resolver.extractor, Box::new(extractor));
        self.saved_extractor.get_or_insert(previous);
        self
    }
}

impl Deref for Substitution<'_> {
    type Target = ImageResolver;

    fn deref(&self) -> &ImageResolver {
        &*self.resolver
    }
}

impl DerefMut for Substitution<'_> {
    fn deref_mut(&mut self) -> &mut ImageResolver {
        &mut *self.resolver
    }
}

impl Drop for Substitution<'_> {
    fn drop(&mut self) {
        if let Some(fetcher) = self.saved_fetcher.take() {
            self.resolver.fetcher = fetcher;
        }
        if let Some(extractor) = self.saved_extractor.take() {
            self.resolver.extractor = extractor;
        }
    }
}
