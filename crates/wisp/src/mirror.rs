//! Terminal mirror: the VT emulator driven by the shell's output.
//!
//! The mirror wraps `avt::Vt` behind a lock. The PTY parse task feeds raw
//! output bytes in; the renderer and the suggestion fetcher read the
//! reconstructed screen state out. The emulator itself is an external
//! component — this module only adapts its query surface.

use std::sync::Mutex;

use avt::Vt;

use crate::screen::{Cell, CellAttrs, Color, Cursor, ScreenSnapshot};
use crate::terminal::WindowSize;

/// Buffers incomplete trailing UTF-8 bytes across successive PTY reads.
///
/// PTY reads use fixed-size buffers that can split multi-byte characters;
/// feeding the halves separately through lossy decoding would turn both into
/// U+FFFD.
#[derive(Default)]
struct Utf8Buffer {
    partial: Vec<u8>,
}

impl Utf8Buffer {
    fn decode(&mut self, data: &[u8]) -> String {
        let mut bytes = std::mem::take(&mut self.partial);
        bytes.extend_from_slice(data);

        match std::str::from_utf8(&bytes) {
            Ok(s) => s.to_string(),
            Err(e) => {
                let valid = e.valid_up_to();
                let trailing = &bytes[valid..];
                if e.error_len().is_none() && trailing.len() < 4 {
                    // Incomplete trailing sequence: hold it for the next read.
                    self.partial = trailing.to_vec();
                    String::from_utf8_lossy(&bytes[..valid]).into_owned()
                } else {
                    String::from_utf8_lossy(&bytes).into_owned()
                }
            }
        }
    }
}

struct Inner {
    vt: Vt,
    utf8: Utf8Buffer,
    cols: u16,
    rows: u16,
}

/// Shared view of the emulated shell screen.
pub struct TerminalMirror {
    inner: Mutex<Inner>,
}

impl TerminalMirror {
    /// Create a mirror of the given size.
    pub fn new(size: WindowSize) -> Self {
        let vt = Vt::builder()
            .size(size.cols as usize, size.rows as usize)
            .build();
        Self {
            inner: Mutex::new(Inner {
                vt,
                utf8: Utf8Buffer::default(),
                cols: size.cols,
                rows: size.rows,
            }),
        }
    }

    /// Feed shell output bytes into the emulator.
    pub fn feed(&self, data: &[u8]) {
        let mut inner = self.inner.lock().expect("mirror lock poisoned");
        let text = inner.utf8.decode(data);
        if !text.is_empty() {
            inner.vt.feed_str(&text);
        }
    }

    /// Resize the emulated grid.
    pub fn resize(&self, size: WindowSize) {
        let mut inner = self.inner.lock().expect("mirror lock poisoned");
        inner.vt.resize(size.cols as usize, size.rows as usize);
        inner.cols = size.cols;
        inner.rows = size.rows;
    }

    /// Current grid dimensions.
    pub fn size(&self) -> WindowSize {
        let inner = self.inner.lock().expect("mirror lock poisoned");
        WindowSize {
            cols: inner.cols,
            rows: inner.rows,
        }
    }

    /// Take a point-in-time copy of the screen for rendering.
    pub fn snapshot(&self) -> ScreenSnapshot {
        let inner = self.inner.lock().expect("mirror lock poisoned");
        let mut snapshot = ScreenSnapshot::new(inner.cols, inner.rows);

        for (row, line) in inner.vt.view().enumerate() {
            if row >= inner.rows as usize {
                break;
            }
            for (col, cell) in line.cells().iter().enumerate() {
                if col >= inner.cols as usize {
                    break;
                }
                if let Some(target) = snapshot.get_mut(col as u16, row as u16) {
                    *target = convert_cell(cell);
                }
            }
        }

        let cursor = inner.vt.cursor();
        snapshot.cursor = Cursor {
            col: cursor.col.min(u16::MAX as usize) as u16,
            row: cursor.row.min(u16::MAX as usize) as u16,
            visible: cursor.visible,
        };

        snapshot
    }

    /// The text from the top-left of the screen to immediately before the
    /// cursor: the prompt handed to the suggestion engine.
    ///
    /// Rows are joined with `\n` and completed rows lose their blank
    /// padding. At most one trailing newline is stripped, so a cursor at
    /// column zero does not hand the engine a dangling empty line.
    pub fn text_before_cursor(&self) -> String {
        let inner = self.inner.lock().expect("mirror lock poisoned");
        let cursor = inner.vt.cursor();

        let mut text = String::new();
        for (row, line) in inner.vt.view().enumerate() {
            if row > cursor.row {
                break;
            }
            if row == cursor.row {
                for cell in line.cells().iter().take(cursor.col) {
                    text.push(cell.char());
                }
            } else {
                let end = text.len();
                for cell in line.cells() {
                    text.push(cell.char());
                }
                while text.len() > end && text.ends_with(' ') {
                    text.pop();
                }
                text.push('\n');
            }
        }

        if text.ends_with('\n') {
            text.pop();
        }
        text
    }
}

fn convert_cell(cell: &avt::Cell) -> Cell {
    let pen = cell.pen();
    Cell {
        ch: cell.char(),
        fg: convert_color(pen.foreground()),
        bg: convert_color(pen.background()),
        attrs: CellAttrs {
            bold: pen.is_bold(),
            dim: pen.is_faint(),
            italic: pen.is_italic(),
            underline: pen.is_underline(),
            blink: pen.is_blink(),
            reverse: pen.is_inverse(),
            strikethrough: pen.is_strikethrough(),
        },
    }
}

fn convert_color(color: Option<avt::Color>) -> Color {
    match color {
        None => Color::Default,
        Some(avt::Color::Indexed(n)) => Color::Indexed(n),
        Some(avt::Color::RGB(rgb)) => Color::Rgb(rgb.r, rgb.g, rgb.b),
    }
}

// =============================================================================
// Tests
// =============================================================================
