//! Error types for wisp.

use thiserror::Error;

/// Main error type for wisp operations.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error from underlying system calls.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// PTY allocation, spawn, or I/O error.
    #[error("pty error: {message}")]
    Pty { message: String },

    /// Terminal setup error (raw mode entry, size query).
    #[error("terminal error: {message}")]
    Terminal { message: String },

    /// Completion engine failure (network, backend rejection, auth).
    #[error("engine error: {message}")]
    Engine { message: String },

    /// Configuration store failure.
    #[error("config error: {message}")]
    Config { message: String },

    /// Unknown colour name given on the command line.
    #[error("unknown colour: {0}")]
    UnknownColor(String),
}

impl Error {
    /// Returns true if this error should abort startup with a non-zero exit.
    ///
    /// Setup errors surface to the user before the wrapper takes over the
    /// terminal. Engine errors hit mid-session are logged and swallowed by
    /// the suggestion state machine instead.
    pub fn is_setup(&self) -> bool {
        matches!(
            self,
            Error::Pty { .. }
                | Error::Terminal { .. }
                | Error::Config { .. }
                | Error::UnknownColor(_)
        )
    }
}

/// Convenience result type for wisp operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_pty() {
        let err = Error::Pty {
            message: "openpty failed".into(),
        };
        assert_eq!(err.to_string(), "pty error: openpty failed");
    }

    #[test]
    fn error_display_unknown_color() {
        let err = Error::UnknownColor("mauve-ish".into());
        assert_eq!(err.to_string(), "unknown colour: mauve-ish");
    }

    #[test]
    fn io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "no such tty");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
    }

    #[test]
    fn setup_errors() {
        assert!(Error::Pty { message: "x".into() }.is_setup());
        assert!(Error::UnknownColor("x".into()).is_setup());
        assert!(
            !Error::Engine {
                message: "timeout".into()
            }
            .is_setup()
        );
    }
}
