//! wisp: Ghost-text shell wrapper.
//!
//! Provides:
//! - CLI argument parsing
//! - PTY hosting for the child shell
//! - Raw terminal mode handling and async stdin/stdout streams
//! - Keystroke mirroring between the user and the suggestion arbiter
//! - A terminal mirror driving the VT emulator off the shell's output
//! - A differential renderer with the ghost-text overlay
//! - The suggestion lifecycle state machine
//! - A modal overlay listing alternative suggestions
//! - The session event loop tying it all together

pub mod cli;
pub mod color;
pub mod mirror;
pub mod mirror_tty;
pub mod overlay;
pub mod pty;
pub mod render;
pub mod screen;
pub mod session;
pub mod state;
pub mod terminal;

pub use cli::{Cli, EngineKind};
pub use mirror::TerminalMirror;
pub use mirror_tty::{InputRoute, MirrorTty};
pub use pty::Pty;
pub use render::Renderer;
pub use screen::{Cell, CellAttrs, Color, Cursor, ScreenSnapshot};
pub use session::{SessionConfig, run_session};
pub use state::{KeyAction, ShellState, SuggestionState};
pub use terminal::{RawModeGuard, StdinReader, StdoutWriter, WindowSize, get_terminal_size};
