//! wisp binary entry point.
//!
//! Ghost-text shell wrapper: type into your normal shell, see inline
//! suggestions after a moment of idleness, accept with TAB.

use std::io::Write;
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info};

use wisp::cli::{Cli, EngineKind};
use wisp::color;
use wisp::screen::Color;
use wisp::session::{SessionConfig, run_session};
use wisp_core::engine::{CodeWhispererEngine, OpenAiEngine};
use wisp_core::{Repository, Result, SuggestionEngine, UserPrompt};

/// Engine setup messages go straight to the user's terminal; the wrapper
/// has not taken it over yet.
struct StdoutPrompt;

impl UserPrompt for StdoutPrompt {
    fn show_message(&self, message: &str) {
        print!("{}", message);
        let _ = std::io::stdout().flush();
    }
}

fn main() {
    let cli = Cli::parse();

    if let Err(e) = wisp_core::init_logging(cli.debug_file.as_deref()) {
        eprintln!("wisp: failed to initialize logging: {}", e);
        std::process::exit(1);
    }

    // Resolve the overlay colour before touching the terminal: an unknown
    // name is a startup error.
    let suggestion_color = match cli.color.as_deref() {
        Some(name) => match color::resolve(name) {
            Ok(color) => color,
            Err(e) => {
                eprintln!("wisp: {}", e);
                std::process::exit(1);
            }
        },
        None => Color::Default,
    };

    info!(version = env!("CARGO_PKG_VERSION"), "wisp starting");

    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("wisp: failed to create runtime: {}", e);
            std::process::exit(1);
        }
    };

    let result = rt.block_on(run(&cli, suggestion_color));

    if let Err(e) = result {
        // The raw-mode guard restores the terminal on its own drop; this
        // covers paths that never reached it.
        wisp::terminal::restore_terminal();
        error!(error = %e, "session failed");
        eprintln!("wisp: {}", e);
        std::process::exit(1);
    }
}

async fn run(cli: &Cli, suggestion_color: Color) -> Result<()> {
    let repository = Repository::open_default()?;

    let engine: Arc<dyn SuggestionEngine> = match cli.engine {
        EngineKind::Gpt35 => Arc::new(OpenAiEngine::new(&repository)?),
        EngineKind::CodeWhisperer => {
            Arc::new(CodeWhispererEngine::new(repository, Arc::new(StdoutPrompt)).await?)
        }
    };

    let config = SessionConfig {
        shell: cli.effective_shell(),
        shell_args: cli.shell_args.clone(),
        suggestion_color,
    };

    run_session(config, engine).await
}
