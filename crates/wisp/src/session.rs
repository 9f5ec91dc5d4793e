//! Interactive session: the event loop and its satellite tasks.
//!
//! Wires the PTY host, the terminal mirror, the renderer, and the
//! suggestion state machine together:
//! - a parse task pumps shell output into the mirror and coalesces redraws;
//! - a stdin handler consumes mirrored keystrokes and performs the
//!   accept/discard logic before anything reaches the shell;
//! - transient fetch tasks talk to the completion engine;
//! - the single-threaded event loop arbitrates redraws, resizes, the idle
//!   timer, the modal overlay, and shutdown.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, error, info, trace, warn};

use wisp_core::{Error, Result, Suggestion, SuggestionEngine};

use crate::mirror::TerminalMirror;
use crate::mirror_tty::{InputRoute, MirrorTty};
use crate::overlay::{CompletionsOverlay, OverlayOutcome};
use crate::pty::Pty;
use crate::render::Renderer;
use crate::screen::Color;
use crate::state::{KeyAction, SuggestionState};
use crate::terminal::{RawModeGuard, StdoutWriter, WindowSize, get_terminal_size};

/// How long the shell must be quiet before a suggestion is solicited.
const IDLE_DELAY: Duration = Duration::from_secs(1);

/// PTY read buffer size.
const OUTPUT_BUF_SIZE: usize = 4096;

/// Session configuration assembled from the CLI.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Shell executable to spawn.
    pub shell: String,
    /// Arguments for the shell (everything after `--`).
    pub shell_args: Vec<String>,
    /// Foreground colour for the ghost text.
    pub suggestion_color: Color,
}

/// Run the wrapper until the shell exits.
pub async fn run_session(
    config: SessionConfig,
    engine: Arc<dyn SuggestionEngine>,
) -> Result<()> {
    let mut size = get_terminal_size()?;

    let pty = Arc::new(Pty::spawn(&config.shell, &config.shell_args, size)?);
    let mirror = Arc::new(TerminalMirror::new(size));
    let state = Arc::new(SuggestionState::new());

    let _raw_guard = RawModeGuard::enter()?;
    let (mirror_tty, mut keys) = MirrorTty::spawn()?;

    // Coalesced redraw trigger: at most one pending repaint.
    let (update_tx, mut update_rx) = mpsc::channel::<()>(1);
    // Closed/fired when the session must end (shell exit, fatal write error).
    let (end_tx, mut end_rx) = mpsc::channel::<()>(1);
    // Ctrl-O requests from the stdin handler.
    let (overlay_tx, mut overlay_rx) = mpsc::channel::<()>(1);

    tokio::spawn(parse_shell_output(
        pty.clone(),
        mirror.clone(),
        state.clone(),
        update_tx.clone(),
        end_tx.clone(),
    ));

    tokio::spawn(handle_keystrokes(
        keys.shell,
        pty.clone(),
        state.clone(),
        overlay_tx,
        end_tx,
    ));

    let mut painter = Painter {
        renderer: Renderer::new(config.suggestion_color),
        stdout: StdoutWriter::new(),
        mirror: mirror.clone(),
        state: state.clone(),
    };

    let mut sigwinch =
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::window_change()).map_err(
            |e| Error::Terminal {
                message: format!("failed to install SIGWINCH handler: {}", e),
            },
        )?;

    painter.draw().await;

    loop {
        tokio::select! {
            // Terminal resize: PTY and emulator move in the same tick, then
            // a full repaint.
            _ = sigwinch.recv() => {
                if let Ok(new_size) = get_terminal_size() {
                    debug!(cols = new_size.cols, rows = new_size.rows, "terminal resized");
                    size = new_size;
                    if let Err(e) = pty.resize(new_size) {
                        warn!(error = %e, "failed to resize pty");
                    }
                    mirror.resize(new_size);
                    painter.renderer.invalidate();
                    painter.draw().await;
                }
            }

            // Shell exited or a fatal error ended a satellite task.
            _ = end_rx.recv() => {
                debug!("session ending");
                // Leave the terminal in a sane state below the shell's last
                // output; the raw-mode guard restores the line discipline.
                let _ = painter.stdout.write(b"\x1b[0m\x1b[?25h\r\n").await;
                return Ok(());
            }

            // The grid changed; repaint.
            Some(()) = update_rx.recv() => {
                painter.draw().await;
            }

            // Ctrl-O while a suggestion is showing.
            Some(()) = overlay_rx.recv() => {
                run_overlay(
                    engine.clone(),
                    &state,
                    &mirror,
                    &mirror_tty,
                    &mut keys.overlay,
                    &mut painter.stdout,
                    size,
                )
                .await;
                painter.renderer.invalidate();
                painter.draw().await;
            }

            // Idle: the shell has been quiet for a second. Solicit a
            // suggestion if the state machine is in Normal and no keystroke
            // landed inside the window. The timer re-arms every loop
            // iteration, so any event above pushes it back.
            _ = tokio::time::sleep(IDLE_DELAY) => {
                trace!(state = ?state.state(), "shell is idle");
                if state.idle_for(IDLE_DELAY) && state.begin_fetch() {
                    let prompt = mirror.text_before_cursor();
                    if prompt.is_empty() {
                        state.abort_fetch();
                    } else {
                        spawn_fetch(engine.clone(), state.clone(), update_tx.clone(), prompt);
                    }
                }
            }
        }
    }
}

/// Owned by the event loop: turns mirror state plus the current suggestion
/// into terminal output.
struct Painter {
    renderer: Renderer,
    stdout: StdoutWriter,
    mirror: Arc<TerminalMirror>,
    state: Arc<SuggestionState>,
}

impl Painter {
    async fn draw(&mut self) {
        let snapshot = self.mirror.snapshot();
        let suggestion = self.state.shown_text();
        let frame = self.renderer.render(&snapshot, suggestion.as_deref());
        if frame.is_empty() {
            return;
        }
        if let Err(e) = self.stdout.write(frame.as_bytes()).await {
            // Renderer errors don't end the session; the end channel does.
            warn!(error = %e, "failed to paint screen");
        }
    }
}

/// Shell output parser: PTY -> mirror, plus suggestion invalidation and
/// redraw coalescing. Fires the end channel on EOF.
async fn parse_shell_output(
    pty: Arc<Pty>,
    mirror: Arc<TerminalMirror>,
    state: Arc<SuggestionState>,
    update: mpsc::Sender<()>,
    end: mpsc::Sender<()>,
) {
    let mut buf = vec![0u8; OUTPUT_BUF_SIZE];
    loop {
        match pty.read(&mut buf).await {
            Ok(Some(n)) => {
                mirror.feed(&buf[..n]);
                // The screen moved: a showing suggestion is misaligned and
                // an in-flight fetch is answering a stale prompt.
                state.invalidate();
                let _ = update.try_send(());
            }
            Ok(None) => {
                info!("shell exited");
                break;
            }
            Err(e) => {
                warn!(error = %e, "PTY read error");
                break;
            }
        }
    }
    let _ = end.send(()).await;
}

/// Stdin handler: consumes mirrored keystroke blocks and applies the
/// accept/discard decision before anything reaches the shell.
async fn handle_keystrokes(
    mut keys: mpsc::Receiver<Vec<u8>>,
    pty: Arc<Pty>,
    state: Arc<SuggestionState>,
    overlay_req: mpsc::Sender<()>,
    end: mpsc::Sender<()>,
) {
    while let Some(block) = keys.recv().await {
        trace!(len = block.len(), "user input");
        let result = match state.decide(&block) {
            KeyAction::Forward => pty.write(&block).await,
            KeyAction::Accept(text) => write_accept(&pty, &text, &block).await,
            KeyAction::OpenOverlay => {
                if overlay_req.send(()).await.is_err() {
                    return;
                }
                Ok(())
            }
        };
        if let Err(e) = result {
            // The shell's stdin is our whole job; losing it is fatal.
            error!(error = %e, "failed to write to shell");
            let _ = end.send(()).await;
            return;
        }
    }
    debug!("stdin handler finished");
}

/// The accept path: the suggestion goes in first, then whatever followed the
/// TAB in the same keystroke block.
pub async fn write_accept(pty: &Pty, suggestion: &str, block: &[u8]) -> Result<()> {
    pty.write(suggestion.as_bytes()).await?;
    if block.len() > 1 {
        pty.write(&block[1..]).await?;
    }
    Ok(())
}

/// One transient fetch task. Publishes through the state machine, which
/// drops the result if anything happened since the fetch began.
fn spawn_fetch(
    engine: Arc<dyn SuggestionEngine>,
    state: Arc<SuggestionState>,
    update: mpsc::Sender<()>,
    prompt: String,
) {
    tokio::spawn(async move {
        debug!(prompt = %prompt, "fetching suggestion");
        match engine.suggest(&prompt).await {
            Ok(Some(suggestion)) => {
                if state.publish(Arc::from(suggestion)) {
                    let _ = update.try_send(());
                }
            }
            Ok(None) => {
                state.fetch_failed();
            }
            Err(e) => {
                error!(error = %e, "error fetching suggestion");
                state.fetch_failed();
            }
        }
    });
}

/// The modal completions overlay, run inline by the event loop.
///
/// Normal rendering is suspended for the duration; keystrokes are diverted
/// to the overlay channel. On return the caller repaints the shell screen.
async fn run_overlay(
    engine: Arc<dyn SuggestionEngine>,
    state: &SuggestionState,
    mirror: &TerminalMirror,
    mirror_tty: &MirrorTty,
    overlay_keys: &mut mpsc::Receiver<Vec<u8>>,
    stdout: &mut StdoutWriter,
    size: WindowSize,
) {
    // The suggestion may have been invalidated between the Ctrl-O and now.
    let Some(current) = state.current_for_overlay() else {
        return;
    };
    let prompt = mirror.text_before_cursor();

    mirror_tty.set_route(InputRoute::Overlay);

    match engine.top_suggestions(&prompt, current.as_ref()).await {
        Ok(alternatives) if !alternatives.is_empty() => {
            let alternatives: Vec<Arc<dyn Suggestion>> =
                alternatives.into_iter().map(Arc::from).collect();
            let overlay = CompletionsOverlay::new(
                alternatives.iter().map(|s| s.text().to_string()).collect(),
            );

            let frame = overlay.render(size);
            if let Err(e) = stdout.write(frame.as_bytes()).await {
                warn!(error = %e, "failed to paint overlay");
            }

            while let Some(block) = overlay_keys.recv().await {
                match overlay.handle_key(&block) {
                    OverlayOutcome::Selected(index) => {
                        if !state.replace(alternatives[index].clone()) {
                            debug!("suggestion invalidated while overlay was open");
                        }
                        break;
                    }
                    OverlayOutcome::Dismissed => break,
                    OverlayOutcome::Pending => {}
                }
            }
        }
        Ok(_) => {
            debug!("no alternative suggestions");
        }
        Err(e) => {
            error!(error = %e, "failed to fetch alternative suggestions");
        }
    }

    mirror_tty.set_route(InputRoute::Shell);
}
