//! Error display for the CLI.

use tracing::error;

/// Print an error and its cause chain.
pub fn print_error(err: &anyhow::Error) {
    let chain: Vec<String> = err.chain().skip(1).map(|cause| cause.to_string()).collect();
    error!(error = %err, causes = ?chain, "Command failed");

    eprintln!("Error: {err}");
    for cause in &chain {
        eprintln!("  caused by: {cause}");
    }
}
