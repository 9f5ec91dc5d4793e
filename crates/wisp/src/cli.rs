//! Command-line interface.
//!
//! Provides argument parsing using clap.

use std::path::PathBuf;

use clap::{Parser, ValueEnum};

/// Which completion backend to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum EngineKind {
    /// OpenAI completions API.
    #[default]
    #[clap(name = "gpt3.5")]
    Gpt35,
    /// Amazon CodeWhisperer.
    #[clap(name = "codewhisperer")]
    CodeWhisperer,
}

/// Ghost-text shell wrapper.
#[derive(Debug, Parser)]
#[command(
    name = "wisp",
    version,
    about = "Shell wrapper with inline command suggestions",
    after_help = "Everything after `--` is passed as arguments to the spawned shell."
)]
pub struct Cli {
    /// Shell to run (defaults to $SHELL, then /bin/sh)
    #[arg(short = 's', value_name = "SHELL")]
    pub shell: Option<String>,

    /// Colour name for the suggestion overlay (e.g. cyan, grey, bright-blue)
    #[arg(short = 'c', value_name = "COLOUR")]
    pub color: Option<String>,

    /// Enable debug logging to the given file
    #[arg(short = 'd', value_name = "FILE")]
    pub debug_file: Option<PathBuf>,

    /// Completion engine
    #[arg(short = 'e', value_enum, default_value_t = EngineKind::Gpt35, value_name = "ENGINE")]
    pub engine: EngineKind,

    /// Arguments passed to the spawned shell
    #[arg(last = true, value_name = "SHELL_ARGS")]
    pub shell_args: Vec<String>,
}

impl Cli {
    /// The shell to spawn: `-s`, else `$SHELL`, else `/bin/sh`.
    pub fn effective_shell(&self) -> String {
        self.shell
            .clone()
            .or_else(|| std::env::var("SHELL").ok())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| "/bin/sh".to_string())
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_defaults() {
        let cli = Cli::try_parse_from(["wisp"]).unwrap();
        assert!(cli.shell.is_none());
        assert!(cli.color.is_none());
        assert!(cli.debug_file.is_none());
        assert_eq!(cli.engine, EngineKind::Gpt35);
        assert!(cli.shell_args.is_empty());
    }

    #[test]
    fn parses_all_flags() {
        let cli = Cli::try_parse_from([
            "wisp", "-s", "/bin/zsh", "-c", "cyan", "-d", "/tmp/wisp.log", "-e",
            "codewhisperer",
        ])
        .unwrap();
        assert_eq!(cli.shell.as_deref(), Some("/bin/zsh"));
        assert_eq!(cli.color.as_deref(), Some("cyan"));
        assert_eq!(cli.debug_file.as_deref(), Some(std::path::Path::new("/tmp/wisp.log")));
        assert_eq!(cli.engine, EngineKind::CodeWhisperer);
    }

    #[test]
    fn rejects_unknown_engine() {
        assert!(Cli::try_parse_from(["wisp", "-e", "copilot"]).is_err());
    }

    #[test]
    fn trailing_args_go_to_the_shell() {
        let cli = Cli::try_parse_from(["wisp", "-s", "/bin/bash", "--", "-l", "-i"]).unwrap();
        assert_eq!(cli.shell_args, vec!["-l", "-i"]);
    }

    #[test]
    fn effective_shell_prefers_flag() {
        let cli = Cli::try_parse_from(["wisp", "-s", "/bin/fish"]).unwrap();
        assert_eq!(cli.effective_shell(), "/bin/fish");
    }
}
