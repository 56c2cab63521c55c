//! Resolve command - fetch an image and merge its layers.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use serde::Serialize;
use tracing::info;

use imgroot_rootfs::{Credentials, ImageResolver, ResolveRequest, ResolverConfig};

/// Fetch an image and merge its layers into a directory.
#[derive(Debug, Args)]
pub struct ResolveCommand {
    /// Source image reference (e.g. docker://quay.io/org/image:tag).
    source: String,

    /// Directory that receives the merged tree. Created if missing.
    destination: PathBuf,

    /// Registry username.
    #[arg(long, env = "IMGROOT_USERNAME", requires = "password")]
    username: Option<String>,

    /// Registry password.
    #[arg(long, env = "IMGROOT_PASSWORD", requires = "username", hide_env_values = true)]
    password: Option<String>,

    /// Registry auth file, instead of username and password.
    #[arg(long, conflicts_with_all = ["username", "password"])]
    authfile: Option<PathBuf>,

    /// Directory of registry CA certificates.
    #[arg(long)]
    cert_dir: Option<PathBuf>,

    /// Skip TLS verification of the source registry.
    #[arg(long)]
    insecure: bool,

    /// Directory for temporary staging (overrides IMGROOT_STAGING_DIR).
    #[arg(long)]
    staging_dir: Option<PathBuf>,

    /// Keep the staged image after resolution.
    #[arg(long)]
    keep_staging: bool,
}

#[derive(Debug, Serialize)]
struct ResolveOutput {
    destination: PathBuf,
    layers_applied: usize,
    entries_unpacked: u64,
    bytes_unpacked: u64,
    whiteouts_removed: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    staged_at: Option<PathBuf>,
    duration_ms: u64,
}

impl ResolveCommand {
    pub fn run(self) -> Result<()> {
        let mut config = ResolverConfig::from_env();
        if let Some(dir) = self.staging_dir {
            config.staging_root = dir;
        }
        config.keep_staging |= self.keep_staging;

        let credentials = match (self.username, self.password, self.authfile) {
            (Some(username), Some(password), _) => Some(Credentials::Basic { username, password }),
            (_, _, Some(path)) => Some(Credentials::AuthFile(path)),
            _ => None,
        };

        let mut request = ResolveRequest::new(&self.source, &self.destination)
            .with_insecure_tls(self.insecure);
        if let Some(credentials) = credentials {
            request = request.with_credentials(credentials);
        }
        if let Some(cert_dir) = self.cert_dir {
            request = request.with_cert_dir(cert_dir);
        }

        let resolver = ImageResolver::new(config);
        let report = resolver.resolve(&request).with_context(|| {
            format!(
                "Failed to resolve {} into {}",
                self.source,
                self.destination.display()
            )
        })?;

        info!(
            dest = %report.destination.display(),
            layers = report.extract.layers_applied,
            "Done"
        );

        let output = ResolveOutput {
            destination: report.destination,
            layers_applied: report.extract.layers_applied,
            entries_unpacked: report.extract.entries_unpacked,
            bytes_unpacked: report.extract.bytes_unpacked,
            whiteouts_removed: report.extract.whiteouts.entries_removed,
            staged_at: report.staged_at,
            duration_ms: report.duration_ms,
        };
        println!("{}", serde_json::to_string_pretty(&output)?);

        Ok(())
    }
}
