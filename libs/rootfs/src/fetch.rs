//! Image fetch collaborator.
//!
//! Fetching is delegated to an external copy tool. The production
//! implementation runs `skopeo copy <source> dir:<staging>`; whatever the
//! tool prints on failure is kept verbatim as the root cause.

use std::ffi::OsString;
use std::fmt;
use std::path::PathBuf;
use std::process::{Command, ExitStatus};

use thiserror::Error;
use tracing::{debug, info};

/// Diagnostic text emitted by the external tool, unmodified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolDiagnostic(pub String);

impl fmt::Display for ToolDiagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for ToolDiagnostic {}

/// Errors from the fetch step.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("Failed to run {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Image copy failed (exit code {})", .code.map_or_else(|| "none".to_string(), |c| c.to_string()))]
    Tool {
        code: Option<i32>,
        #[source]
        diagnostic: ToolDiagnostic,
    },
}

impl FetchError {
    /// A failed copy carrying the tool's diagnostic text.
    pub fn tool(code: Option<i32>, diagnostic: impl Into<String>) -> Self {
        FetchError::Tool {
            code,
            diagnostic: ToolDiagnostic(diagnostic.into()),
        }
    }

    /// The tool's diagnostic text, if the tool ran and failed.
    pub fn diagnostic(&self) -> Option<&str> {
        match self {
            FetchError::Tool { diagnostic, .. } => Some(&diagnostic.0),
            FetchError::Spawn { .. } => None,
        }
    }
}

/// Registry credentials.
#[derive(Clone, PartialEq, Eq)]
pub enum Credentials {
    /// Username and password (or token) pair.
    Basic { username: String, password: String },
    /// Path to a container auth file (`auth.json`).
    AuthFile(PathBuf),
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credentials::Basic { username, .. } => f
                .debug_struct("Basic")
                .field("username", username)
                .field("password", &"<redacted>")
                .finish(),
            Credentials::AuthFile(path) => f.debug_tuple("AuthFile").field(path).finish(),
        }
    }
}

/// Everything the fetch tool needs for one copy.
#[derive(Debug, Clone)]
pub struct FetchRequest {
    /// Source image reference (e.g. `docker://quay.io/org/disk:latest`).
    pub source: String,
    /// Local directory the staged image is written to.
    pub destination: PathBuf,
    pub credentials: Option<Credentials>,
    /// Directory with client certificates for the registry.
    pub cert_dir: Option<PathBuf>,
    /// Skip TLS verification against the registry.
    pub insecure_tls: bool,
}

/// Copies an image from a registry to a local staging directory.
///
/// Closures with the matching signature implement this trait.
pub trait Fetcher: Send + Sync {
    fn fetch(&self, request: &FetchRequest) -> Result<(), FetchError>;
}

impl<F> Fetcher for F
where
    F: Fn(&FetchRequest) -> Result<(), FetchError> + Send + Sync,
{
    fn fetch(&self, request: &FetchRequest) -> Result<(), FetchError> {
        self(request)
    }
}

/// Configuration for the skopeo fetcher.
#[derive(Debug, Clone)]
pub struct SkopeoConfig {
    /// Program to run.
    pub binary: PathBuf,
}

impl Default for SkopeoConfig {
    fn default() -> Self {
        Self {
            binary: PathBuf::from("skopeo"),
        }
    }
}

/// Fetcher backed by the `skopeo` CLI.
#[derive(Debug, Clone, Default)]
pub struct SkopeoFetcher {
    config: SkopeoConfig,
}

impl SkopeoFetcher {
    pub fn new(config: SkopeoConfig) -> Self {
        Self { config }
    }

    /// Arguments for `skopeo` for the given request.
    ///
    /// Optional flags are only present when the request asks for them.
    pub fn copy_args(request: &FetchRequest) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec!["copy".into()];

        match &request.credentials {
            Some(Credentials::Basic { username, password }) => {
                args.push(format!("--src-creds={username}:{password}").into());
            }
            Some(Credentials::AuthFile(path)) => {
                let mut flag = OsString::from("--src-authfile=");
                flag.push(path);
                args.push(flag);
            }
            None => {}
        }

        if let Some(cert_dir) = request
            .cert_dir
            .as_ref()
            .filter(|dir| !dir.as_os_str().is_empty())
        {
            let mut flag = OsString::from("--src-cert-dir=");
            flag.push(cert_dir);
            args.push(flag);
        }

        if request.insecure_tls {
            args.push("--src-tls-verify=false".into());
        }

        args.push(request.source.clone().into());

        let mut dest = OsString::from("dir:");
        dest.push(&request.destination);
        args.push(dest);

        args
    }
}

impl Fetcher for SkopeoFetcher {
    fn fetch(&self, request: &FetchRequest) -> Result<(), FetchError> {
        let program = self.config.binary.display().to_string();

        info!(
            source = %request.source,
            dest = %request.destination.display(),
            authenticated = request.credentials.is_some(),
            insecure_tls = request.insecure_tls,
            "Copying image"
        );

        let output = Command::new(&self.config.binary)
            .args(Self::copy_args(request))
            .output()
            .map_err(|source| FetchError::Spawn {
                program: program.clone(),
                source,
            })?;

        if output.status.success() {
            debug!(source = %request.source, "Image copy complete");
            return Ok(());
        }

        Err(FetchError::tool(
            output.status.code(),
            diagnostic_text(output.status, &output.stdout, &output.stderr),
        ))
    }
}

/// Pick the text that explains a failed run: stderr, else stdout, else the status.
fn diagnostic_text(status: ExitStatus, stdout: &[u8], stderr: &[u8]) -> String {
    let stderr = String::from_utf8_lossy(stderr);
    if !stderr.trim().is_empty() {
        return stderr.trim_end().to_string();
    }
    let stdout = String::from_utf8_lossy(stdout);
    if !stdout.trim().is_empty() {
        return stdout.trim_end().to_string();
    }
    format!("copy tool exited with {status}")
}
