//! End-to-end exercises of the suggestion lifecycle: a scripted engine, the
//! state machine, the renderer, and (where the environment allows) a live
//! PTY on the receiving end of the accept path.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use wisp::mirror::TerminalMirror;
use wisp::overlay::{CompletionsOverlay, OverlayOutcome};
use wisp::pty::Pty;
use wisp::render::Renderer;
use wisp::screen::Color;
use wisp::session::write_accept;
use wisp::state::{KEY_TAB, KeyAction, ShellState, SuggestionState};
use wisp::terminal::WindowSize;
use wisp_core::{Result, Suggestion, SuggestionEngine};

const SIZE: WindowSize = WindowSize { cols: 40, rows: 10 };

struct Plain(String);

impl Suggestion for Plain {
    fn text(&self) -> &str {
        &self.0
    }
    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

/// Engine that replays a fixed script.
struct ScriptedEngine {
    suggestion: &'static str,
    alternatives: &'static [&'static str],
}

#[async_trait]
impl SuggestionEngine for ScriptedEngine {
    async fn suggest(&self, _prompt: &str) -> Result<Option<Box<dyn Suggestion>>> {
        Ok(Some(Box::new(Plain(self.suggestion.to_string()))))
    }

    async fn top_suggestions(
        &self,
        _prompt: &str,
        _current: &dyn Suggestion,
    ) -> Result<Vec<Box<dyn Suggestion>>> {
        Ok(self
            .alternatives
            .iter()
            .map(|t| Box::new(Plain(t.to_string())) as Box<dyn Suggestion>)
            .collect())
    }
}

fn showing(state: &SuggestionState, text: &str) {
    assert!(state.begin_fetch());
    assert!(state.publish(Arc::new(Plain(text.to_string()))));
}

/// Read from the PTY until `needle` shows up in the collected output.
async fn read_until(pty: &Pty, needle: &[u8]) -> Vec<u8> {
    let mut collected = Vec::new();
    let mut buf = [0u8; 1024];
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !collected.windows(needle.len()).any(|w| w == needle) {
        match tokio::time::timeout_at(deadline, pty.read(&mut buf)).await {
            Ok(Ok(Some(n))) => collected.extend_from_slice(&buf[..n]),
            _ => break,
        }
    }
    collected
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|w| w == needle)
}

#[tokio::test]
async fn fetch_publish_accept_lifecycle() {
    let engine = ScriptedEngine {
        suggestion: "o hello",
        alternatives: &[],
    };
    let state = SuggestionState::new();

    assert!(state.begin_fetch());
    let suggestion = engine.suggest("$ ech").await.unwrap().unwrap();
    assert!(state.publish(Arc::from(suggestion)));
    assert_eq!(state.state(), ShellState::Suggesting);
    assert_eq!(state.shown_text().as_deref(), Some("o hello"));

    let action = state.decide(&[KEY_TAB]);
    assert_eq!(action, KeyAction::Accept("o hello".to_string()));
    assert_eq!(state.state(), ShellState::Normal);
    assert!(state.shown_text().is_none());
}

#[tokio::test]
async fn accept_writes_suggestion_then_keystroke_suffix() {
    // `cat` with the tty echoing: everything written to the master comes
    // back, in write order.
    let Ok(pty) = Pty::spawn("/bin/cat", &[], SIZE) else {
        eprintln!("PTY spawn failed (may be expected in CI), skipping");
        return;
    };

    let state = SuggestionState::new();
    showing(&state, "o hello");

    // TAB with trailing bytes in the same read: suffix must survive.
    let block = [KEY_TAB, b'x'];
    match state.decide(&block) {
        KeyAction::Accept(text) => write_accept(&pty, &text, &block).await.unwrap(),
        other => panic!("expected accept, got {:?}", other),
    }

    let output = read_until(&pty, b"o hellox").await;
    assert!(
        contains(&output, b"o hellox"),
        "shell did not receive suggestion followed by suffix: {:?}",
        String::from_utf8_lossy(&output)
    );
    let _ = pty.kill();
}

#[tokio::test]
async fn discarding_keystroke_never_leaks_suggestion() {
    let Ok(pty) = Pty::spawn("/bin/cat", &[], SIZE) else {
        eprintln!("PTY spawn failed (may be expected in CI), skipping");
        return;
    };

    let state = SuggestionState::new();
    showing(&state, "o hello");

    let block = b"x".to_vec();
    match state.decide(&block) {
        KeyAction::Forward => pty.write(&block).await.unwrap(),
        other => panic!("expected forward, got {:?}", other),
    }
    // Terminate the line so there is a stable marker to wait for.
    pty.write(b"\n").await.unwrap();

    let output = read_until(&pty, b"x").await;
    assert!(contains(&output, b"x"));
    assert!(
        !contains(&output, b"o hello"),
        "suggestion leaked into the shell: {:?}",
        String::from_utf8_lossy(&output)
    );
    assert_eq!(state.state(), ShellState::Normal);
    let _ = pty.kill();
}

#[tokio::test]
async fn stale_result_stays_invisible() {
    let engine = ScriptedEngine {
        suggestion: "ho",
        alternatives: &[],
    };
    let state = SuggestionState::new();

    assert!(state.begin_fetch());
    // Keystroke lands mid-fetch.
    assert_eq!(state.decide(b"c"), KeyAction::Forward);

    let late = engine.suggest("$ e").await.unwrap().unwrap();
    assert!(!state.publish(Arc::from(late)));
    assert!(state.shown_text().is_none());
    assert_eq!(state.state(), ShellState::Normal);
}

#[tokio::test]
async fn overlay_selection_replaces_suggestion() {
    let engine = ScriptedEngine {
        suggestion: "status",
        alternatives: &["status", "stash pop", "switch main"],
    };
    let state = SuggestionState::new();
    showing(&state, "status");

    let current = state.current_for_overlay().expect("suggestion showing");
    let alternatives: Vec<Arc<dyn Suggestion>> = engine
        .top_suggestions("$ git ", current.as_ref())
        .await
        .unwrap()
        .into_iter()
        .map(Arc::from)
        .collect();

    let overlay =
        CompletionsOverlay::new(alternatives.iter().map(|s| s.text().to_string()).collect());

    // Shortcut 'b' picks the second entry.
    match overlay.handle_key(b"b") {
        OverlayOutcome::Selected(index) => {
            assert!(state.replace(alternatives[index].clone()));
        }
        other => panic!("expected selection, got {:?}", other),
    }

    assert_eq!(state.shown_text().as_deref(), Some("stash pop"));
    assert_eq!(state.state(), ShellState::Suggesting);
}

#[tokio::test]
async fn ghost_text_renders_after_mirrored_prompt() {
    let mirror = TerminalMirror::new(SIZE);
    mirror.feed(b"$ ech");
    assert_eq!(mirror.text_before_cursor(), "$ ech");

    let state = SuggestionState::new();
    showing(&state, "o hello");

    let mut renderer = Renderer::new(Color::Default);
    let frame = renderer.render(&mirror.snapshot(), state.shown_text().as_deref());

    assert!(frame.contains("$ ech"), "prompt missing from frame");
    assert!(frame.contains("o hello"), "ghost text missing from frame");
    // The ghost text is dimmed.
    assert!(frame.contains("\x1b[0;2m"), "dim rendition missing: {:?}", frame);
}

#[tokio::test]
async fn shell_output_clears_ghost_text_before_next_frame() {
    let mirror = TerminalMirror::new(SIZE);
    mirror.feed(b"$ ls");

    let state = SuggestionState::new();
    showing(&state, " -la");

    let mut renderer = Renderer::new(Color::Default);
    renderer.render(&mirror.snapshot(), state.shown_text().as_deref());

    // The user hits Enter; the shell echoes and runs the command.
    mirror.feed(b"\r\nsrc  target\r\n$ ");
    state.invalidate();

    let frame = renderer.render(&mirror.snapshot(), state.shown_text().as_deref());
    assert!(state.shown_text().is_none());
    assert!(!frame.contains("-la"), "stale ghost text still painted: {:?}", frame);
}
