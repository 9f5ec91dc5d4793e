//! Tracing integration for debug logging.
//!
//! Logging is off by default: the wrapper owns the user's terminal, so the
//! only sensible sink is a file. The `-d <file>` flag supplies one; without
//! it no subscriber is installed and every tracing macro is a no-op.

use std::path::Path;

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::Result;

/// Initialize the logging system.
///
/// * `log_file` - Path to append debug output to, or None to disable logging.
///
/// The default filter is debug-level for the wisp crates; `RUST_LOG`
/// overrides it when set.
pub fn init_logging(log_file: Option<&Path>) -> Result<()> {
    let Some(path) = log_file else {
        return Ok(());
    };

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("wisp=debug,wisp_core=debug"));

    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)?;

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_writer(file)
                .with_ansi(false)
                .with_target(true),
        )
        .try_init()
        .map_err(|e| crate::Error::Io(std::io::Error::other(e.to_string())))?;

    Ok(())
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_without_file() {
        // No subscriber should be installed, and the call must not fail.
        init_logging(None).unwrap();
    }

    #[test]
    fn appends_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("debug.log");

        // May fail if another test installed a global subscriber first;
        // the file must exist either way.
        let _ = init_logging(Some(&path));
        assert!(path.exists());
    }
}
