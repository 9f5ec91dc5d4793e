//! Suggestion lifecycle state machine.
//!
//! Owns the shell state and the current suggestion, and arbitrates between
//! keystrokes, shell output, the idle timer, and completion arrival. All
//! fields live behind one mutex so every transition is a single short
//! critical section; the tasks touching it (stdin handler, PTY parse task,
//! fetch tasks, event loop) never observe a half-applied transition.

use std::sync::Arc;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use tracing::debug;

use wisp_core::Suggestion;

/// The accept key: TAB.
pub const KEY_TAB: u8 = 0x09;
/// Opens the completions overlay: Ctrl-O.
pub const KEY_CTRL_O: u8 = 0x0f;

/// Shell state as seen by the suggestion machinery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShellState {
    /// Nothing speculative going on.
    Normal,
    /// A completion request is in flight.
    FetchingSuggestions,
    /// A suggestion is on screen, waiting for accept or discard.
    Suggesting,
}

/// What the stdin handler should do with a keystroke block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyAction {
    /// Forward the block to the shell unchanged.
    Forward,
    /// Write the suggestion first, then the block with its leading TAB
    /// stripped.
    Accept(String),
    /// Open the completions overlay; the Ctrl-O byte is consumed.
    OpenOverlay,
}

struct CurrentSuggestion {
    /// Display/injection text: single line, right-trimmed of spaces.
    text: String,
    /// The engine's object, kept for `top_suggestions`.
    source: Arc<dyn Suggestion>,
}

struct Inner {
    state: ShellState,
    current: Option<CurrentSuggestion>,
    /// True from fetch start until its result is consumed or dropped.
    /// Outlives a state bounce back to Normal, which is what keeps a second
    /// fetch from starting while the first is still on the wire.
    fetch_in_flight: bool,
    last_keystroke: Option<Instant>,
}

/// The shared (state, suggestion) cell.
pub struct SuggestionState {
    inner: Mutex<Inner>,
}

impl SuggestionState {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                state: ShellState::Normal,
                current: None,
                fetch_in_flight: false,
                last_keystroke: None,
            }),
        }
    }

    /// Current state, for logging and tests.
    pub fn state(&self) -> ShellState {
        self.lock().state
    }

    /// True when no keystroke has been seen for at least `window`.
    pub fn idle_for(&self, window: Duration) -> bool {
        match self.lock().last_keystroke {
            Some(at) => at.elapsed() >= window,
            None => true,
        }
    }

    /// Idle tick: move Normal to FetchingSuggestions.
    ///
    /// Returns false when a suggestion is showing, a fetch is already in
    /// flight, or the state is otherwise not Normal; the caller must not
    /// start a fetch in that case.
    pub fn begin_fetch(&self) -> bool {
        let mut inner = self.lock();
        if inner.state != ShellState::Normal || inner.fetch_in_flight {
            return false;
        }
        inner.state = ShellState::FetchingSuggestions;
        inner.fetch_in_flight = true;
        true
    }

    /// Abort a fetch before it was issued (empty prompt).
    pub fn abort_fetch(&self) {
        let mut inner = self.lock();
        inner.fetch_in_flight = false;
        if inner.state == ShellState::FetchingSuggestions {
            inner.state = ShellState::Normal;
        }
    }

    /// Publish a fetch result.
    ///
    /// The result lands only if the machine is still in FetchingSuggestions —
    /// any keystroke or shell output since the fetch started has bounced the
    /// state back to Normal and the result is dropped silently. Empty text
    /// (after trimming) also reverts to Normal.
    ///
    /// Returns true when the suggestion is now showing.
    pub fn publish(&self, suggestion: Arc<dyn Suggestion>) -> bool {
        let mut inner = self.lock();
        inner.fetch_in_flight = false;

        if inner.state != ShellState::FetchingSuggestions {
            debug!("dropping stale suggestion result");
            return false;
        }

        let text = displayable_text(suggestion.text());
        if text.is_empty() {
            inner.state = ShellState::Normal;
            inner.current = None;
            return false;
        }

        inner.state = ShellState::Suggesting;
        inner.current = Some(CurrentSuggestion {
            text,
            source: suggestion,
        });
        true
    }

    /// Record a failed fetch: back to Normal, nothing to show.
    pub fn fetch_failed(&self) {
        let mut inner = self.lock();
        inner.fetch_in_flight = false;
        if inner.state == ShellState::FetchingSuggestions {
            inner.state = ShellState::Normal;
        }
        inner.current = None;
    }

    /// Shell output arrived: whatever we were showing or asking about is
    /// based on a screen that no longer exists.
    pub fn invalidate(&self) {
        let mut inner = self.lock();
        inner.state = ShellState::Normal;
        inner.current = None;
    }

    /// Decide what to do with a keystroke block. One critical section covers
    /// the whole decision, so the accept path atomically consumes the
    /// suggestion and no other task can observe it half-taken.
    pub fn decide(&self, block: &[u8]) -> KeyAction {
        let mut inner = self.lock();
        inner.last_keystroke = Some(Instant::now());

        let Some(&first) = block.first() else {
            return KeyAction::Forward;
        };

        match inner.state {
            ShellState::Suggesting => match first {
                KEY_TAB => {
                    let text = inner
                        .current
                        .take()
                        .map(|c| c.text)
                        .filter(|t| !t.is_empty());
                    inner.state = ShellState::Normal;
                    match text {
                        Some(text) => KeyAction::Accept(text),
                        None => KeyAction::Forward,
                    }
                }
                KEY_CTRL_O => KeyAction::OpenOverlay,
                _ => {
                    inner.state = ShellState::Normal;
                    inner.current = None;
                    KeyAction::Forward
                }
            },
            ShellState::FetchingSuggestions => {
                // The in-flight fetch is now answering a stale prompt; its
                // result gets dropped on arrival.
                inner.state = ShellState::Normal;
                inner.current = None;
                KeyAction::Forward
            }
            ShellState::Normal => KeyAction::Forward,
        }
    }

    /// The text to paint after the cursor, if a suggestion is showing.
    pub fn shown_text(&self) -> Option<String> {
        let inner = self.lock();
        match inner.state {
            ShellState::Suggesting => inner.current.as_ref().map(|c| c.text.clone()),
            _ => None,
        }
    }

    /// The showing suggestion and its engine object, for the overlay.
    pub fn current_for_overlay(&self) -> Option<Arc<dyn Suggestion>> {
        let inner = self.lock();
        match inner.state {
            ShellState::Suggesting => inner.current.as_ref().map(|c| c.source.clone()),
            _ => None,
        }
    }

    /// Replace the showing suggestion with an overlay selection.
    ///
    /// No-op (returning false) if the suggestion was invalidated while the
    /// overlay was open.
    pub fn replace(&self, suggestion: Arc<dyn Suggestion>) -> bool {
        let mut inner = self.lock();
        if inner.state != ShellState::Suggesting {
            return false;
        }
        let text = displayable_text(suggestion.text());
        if text.is_empty() {
            return false;
        }
        inner.current = Some(CurrentSuggestion {
            text,
            source: suggestion,
        });
        true
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().expect("suggestion state lock poisoned")
    }
}

impl Default for SuggestionState {
    fn default() -> Self {
        Self::new()
    }
}

/// Single line, right-trimmed of spaces: what actually gets shown and,
/// on accept, injected.
fn displayable_text(text: &str) -> String {
    let line = match text.find('\n') {
        Some(idx) => &text[..idx],
        None => text,
    };
    line.trim_end_matches(' ').to_string()
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed(&'static str);

    impl Suggestion for Fixed {
        fn text(&self) -> &str {
            self.0
        }
        fn as_any(&self) -> &dyn std::any::Any {
            self
        }
    }

    fn suggestion(text: &'static str) -> Arc<dyn Suggestion> {
        Arc::new(Fixed(text))
    }

    fn showing(text: &'static str) -> SuggestionState {
        let state = SuggestionState::new();
        assert!(state.begin_fetch());
        assert!(state.publish(suggestion(text)));
        state
    }

    #[test]
    fn initial_state_is_normal() {
        let state = SuggestionState::new();
        assert_eq!(state.state(), ShellState::Normal);
        assert!(state.shown_text().is_none());
    }

    #[test]
    fn publish_shows_trimmed_text() {
        let state = showing("o hello  ");
        assert_eq!(state.state(), ShellState::Suggesting);
        assert_eq!(state.shown_text().as_deref(), Some("o hello"));
    }

    #[test]
    fn publish_strips_newline_and_after() {
        let state = showing("ls -la\nrm -rf /");
        assert_eq!(state.shown_text().as_deref(), Some("ls -la"));
    }

    #[test]
    fn publish_preserves_leading_space() {
        let state = showing(" hello");
        assert_eq!(state.shown_text().as_deref(), Some(" hello"));
    }

    #[test]
    fn publish_of_empty_text_reverts_to_normal() {
        let state = SuggestionState::new();
        assert!(state.begin_fetch());
        assert!(!state.publish(suggestion("   ")));
        assert_eq!(state.state(), ShellState::Normal);
    }

    #[test]
    fn only_one_fetch_at_a_time() {
        let state = SuggestionState::new();
        assert!(state.begin_fetch());
        assert!(!state.begin_fetch());

        // A keystroke bounces the state back to Normal, but the fetch is
        // still on the wire: no new fetch may start.
        assert_eq!(state.decide(b"x"), KeyAction::Forward);
        assert_eq!(state.state(), ShellState::Normal);
        assert!(!state.begin_fetch());

        // Once the stale result lands (and is dropped), fetches may resume.
        assert!(!state.publish(suggestion("stale")));
        assert!(state.shown_text().is_none());
        assert!(state.begin_fetch());
    }

    #[test]
    fn keystroke_during_fetch_drops_result() {
        let state = SuggestionState::new();
        assert!(state.begin_fetch());
        state.decide(b"c");
        assert!(!state.publish(suggestion("ho")));
        assert_eq!(state.state(), ShellState::Normal);
        assert!(state.shown_text().is_none());
    }

    #[test]
    fn shell_output_during_fetch_drops_result() {
        let state = SuggestionState::new();
        assert!(state.begin_fetch());
        state.invalidate();
        assert!(!state.publish(suggestion("stale")));
        assert_eq!(state.state(), ShellState::Normal);
    }

    #[test]
    fn result_in_normal_state_is_dropped() {
        let state = SuggestionState::new();
        assert!(!state.publish(suggestion("uninvited")));
        assert_eq!(state.state(), ShellState::Normal);
    }

    #[test]
    fn tab_accepts_and_consumes() {
        let state = showing("o hello");
        let action = state.decide(&[KEY_TAB]);
        assert_eq!(action, KeyAction::Accept("o hello".to_string()));
        assert_eq!(state.state(), ShellState::Normal);
        assert!(state.shown_text().is_none());
    }

    #[test]
    fn other_key_discards_and_forwards() {
        let state = showing("o hello");
        assert_eq!(state.decide(b"x"), KeyAction::Forward);
        assert_eq!(state.state(), ShellState::Normal);
        assert!(state.shown_text().is_none());
    }

    #[test]
    fn ctrl_o_opens_overlay_and_keeps_suggestion() {
        let state = showing("o hello");
        assert_eq!(state.decide(&[KEY_CTRL_O]), KeyAction::OpenOverlay);
        assert_eq!(state.state(), ShellState::Suggesting);
        assert_eq!(state.shown_text().as_deref(), Some("o hello"));
    }

    #[test]
    fn tab_in_normal_state_just_forwards() {
        let state = SuggestionState::new();
        assert_eq!(state.decide(&[KEY_TAB]), KeyAction::Forward);
    }

    #[test]
    fn shell_output_discards_shown_suggestion() {
        let state = showing("o hello");
        state.invalidate();
        assert_eq!(state.state(), ShellState::Normal);
        assert!(state.shown_text().is_none());
    }

    #[test]
    fn fetch_failure_returns_to_normal() {
        let state = SuggestionState::new();
        assert!(state.begin_fetch());
        state.fetch_failed();
        assert_eq!(state.state(), ShellState::Normal);
        assert!(state.begin_fetch());
    }

    #[test]
    fn replace_swaps_showing_suggestion() {
        let state = showing("o hello");
        assert!(state.replace(suggestion("o world  ")));
        assert_eq!(state.shown_text().as_deref(), Some("o world"));
        assert_eq!(state.state(), ShellState::Suggesting);
    }

    #[test]
    fn replace_after_invalidation_is_refused() {
        let state = showing("o hello");
        state.invalidate();
        assert!(!state.replace(suggestion("o world")));
        assert!(state.shown_text().is_none());
    }

    #[test]
    fn idle_tracking_follows_keystrokes() {
        let state = SuggestionState::new();
        assert!(state.idle_for(Duration::from_secs(1)));
        state.decide(b"x");
        assert!(!state.idle_for(Duration::from_secs(1)));
        assert!(state.idle_for(Duration::ZERO));
    }
}
