//! Differential screen renderer with the ghost-text overlay.
//!
//! Renders the mirrored shell screen to the real terminal:
//! 1. Copy the mirror snapshot
//! 2. Composite the suggestion overlay after the cursor (overlay wins)
//! 3. Diff against what is already on screen
//! 4. Emit minimal ANSI for the changes
//! 5. Park the real cursor at the shell's cursor, so the ghost text sits
//!    after it rather than under it

use std::fmt::Write;

use crate::screen::{Cell, CellAttrs, Color, ScreenSnapshot};

/// Renderer that maintains a local framebuffer of what the terminal shows.
pub struct Renderer {
    /// What we believe is currently on the terminal screen.
    local_framebuffer: Option<ScreenSnapshot>,
    /// Current cursor position we've drawn.
    cursor_x: i32,
    cursor_y: i32,
    /// Current renditions we've set.
    current_attrs: CellAttrs,
    current_fg: Color,
    current_bg: Color,
    /// Foreground colour for the suggestion overlay.
    suggestion_color: Color,
}

impl Renderer {
    /// Create a new renderer painting suggestions in the given colour.
    pub fn new(suggestion_color: Color) -> Self {
        Self {
            local_framebuffer: None,
            cursor_x: -1,
            cursor_y: -1,
            current_attrs: CellAttrs::default(),
            current_fg: Color::Default,
            current_bg: Color::Default,
            suggestion_color,
        }
    }

    /// Render the screen with the suggestion composited.
    ///
    /// Returns the ANSI byte stream that brings the terminal from its
    /// previous state to the new one.
    pub fn render(&mut self, snapshot: &ScreenSnapshot, suggestion: Option<&str>) -> String {
        let mut display = snapshot.clone();
        if let Some(text) = suggestion {
            self.apply_overlay(&mut display, text);
        }

        let output = self.new_frame(&display);
        self.local_framebuffer = Some(display);
        output
    }

    /// Paint the suggestion into the frame, starting at the cursor.
    ///
    /// A newline moves to the start of the next row; anything else lands in
    /// the next cell. Past the screen edges the text is clipped, never
    /// wrapped. The frame's cursor is left untouched.
    fn apply_overlay(&self, frame: &mut ScreenSnapshot, text: &str) {
        if text.is_empty() || !frame.cursor.visible {
            return;
        }

        let mut x = frame.cursor.col as usize;
        let mut y = frame.cursor.row as usize;
        for ch in text.chars() {
            if ch == '\n' {
                y += 1;
                x = 0;
                continue;
            }
            if let Some(cell) = frame.get_mut(x as u16, y as u16) {
                cell.ch = ch;
                cell.fg = self.suggestion_color;
                cell.bg = Color::Default;
                cell.attrs = CellAttrs {
                    dim: true,
                    ..CellAttrs::default()
                };
            }
            x += 1;
        }
    }

    /// Generate ANSI escape sequences to update the terminal from the local
    /// state to the new state.
    fn new_frame(&mut self, new_state: &ScreenSnapshot) -> String {
        let mut output = String::new();
        let (cols, rows) = (new_state.cols(), new_state.rows());

        // First frame or size change forces a full repaint
        let initialized = self
            .local_framebuffer
            .as_ref()
            .is_some_and(|local| local.cols() == cols && local.rows() == rows);

        if !initialized {
            // Reset attrs, home, clear, and hide the cursor while painting
            output.push_str("\x1b[0m\x1b[H\x1b[2J");
            output.push_str("\x1b[?25l");
            self.cursor_x = 0;
            self.cursor_y = 0;
            self.current_attrs = CellAttrs::default();
            self.current_fg = Color::Default;
            self.current_bg = Color::Default;
        }

        let old_state = self.local_framebuffer.take();
        for row in 0..rows {
            self.put_row(
                &mut output,
                new_state,
                old_state.as_ref(),
                row,
                cols,
                initialized,
            );
        }
        self.local_framebuffer = old_state;

        // Park the cursor at the shell's cursor position
        let target_row = new_state.cursor.row as i32;
        let target_col = new_state.cursor.col as i32;
        if !initialized || self.cursor_x != target_col || self.cursor_y != target_row {
            self.append_move(&mut output, target_row, target_col);
        }

        if new_state.cursor.visible {
            output.push_str("\x1b[?25h");
        } else {
            output.push_str("\x1b[?25l");
        }

        output
    }

    /// Render a single row, only outputting changed cells.
    fn put_row(
        &mut self,
        output: &mut String,
        screen: &ScreenSnapshot,
        old_screen: Option<&ScreenSnapshot>,
        row: u16,
        cols: u16,
        initialized: bool,
    ) {
        for col in 0..cols {
            let cell = screen.get(col, row).cloned().unwrap_or_default();

            if initialized
                && let Some(old) = old_screen.and_then(|s| s.get(col, row))
                && *old == cell
            {
                continue;
            }

            self.append_silent_move(output, row as i32, col as i32);
            self.update_rendition(output, &cell);

            output.push(cell.ch);
            self.cursor_x = col as i32 + 1;

            // Unknown position after a potential wrap at end of line
            if self.cursor_x >= cols as i32 {
                self.cursor_x = -1;
            }
        }
    }

    fn append_silent_move(&mut self, output: &mut String, row: i32, col: i32) {
        if self.cursor_x == col && self.cursor_y == row {
            return;
        }
        self.append_move(output, row, col);
    }

    /// Move the cursor using the shortest escape sequence.
    fn append_move(&mut self, output: &mut String, row: i32, col: i32) {
        let last_x = self.cursor_x;
        let last_y = self.cursor_y;
        self.cursor_x = col;
        self.cursor_y = row;

        if last_x != -1 && last_y != -1 {
            // CR + LF for the start of nearby following rows
            if col == 0 && row >= last_y && row - last_y < 5 {
                if last_x != 0 {
                    output.push('\r');
                }
                for _ in 0..(row - last_y) {
                    output.push('\n');
                }
                return;
            }
            // Backspaces for small leftward moves on the same row
            if row == last_y && col < last_x && last_x - col < 5 {
                for _ in 0..(last_x - col) {
                    output.push('\x08');
                }
                return;
            }
        }

        // Default: CUP (cursor position)
        let _ = write!(output, "\x1b[{};{}H", row + 1, col + 1);
    }

    /// Update terminal renditions to match the cell.
    fn update_rendition(&mut self, output: &mut String, cell: &Cell) {
        if self.current_attrs == cell.attrs
            && self.current_fg == cell.fg
            && self.current_bg == cell.bg
        {
            return;
        }

        let mut params: Vec<u8> = Vec::new();

        // Attributes can only be cleared by a full reset
        if self.current_attrs != cell.attrs {
            params.push(0);
            self.current_attrs = CellAttrs::default();
            self.current_fg = Color::Default;
            self.current_bg = Color::Default;
        }

        if cell.attrs.bold && !self.current_attrs.bold {
            params.push(1);
        }
        if cell.attrs.dim && !self.current_attrs.dim {
            params.push(2);
        }
        if cell.attrs.italic && !self.current_attrs.italic {
            params.push(3);
        }
        if cell.attrs.underline && !self.current_attrs.underline {
            params.push(4);
        }
        if cell.attrs.blink && !self.current_attrs.blink {
            params.push(5);
        }
        if cell.attrs.reverse && !self.current_attrs.reverse {
            params.push(7);
        }
        if cell.attrs.strikethrough && !self.current_attrs.strikethrough {
            params.push(9);
        }

        if !params.is_empty() {
            output.push_str("\x1b[");
            for (i, p) in params.iter().enumerate() {
                if i > 0 {
                    output.push(';');
                }
                let _ = write!(output, "{}", p);
            }
            output.push('m');
        }

        if self.current_fg != cell.fg {
            write_fg_color(output, cell.fg);
            self.current_fg = cell.fg;
        }

        if self.current_bg != cell.bg {
            write_bg_color(output, cell.bg);
            self.current_bg = cell.bg;
        }

        self.current_attrs = cell.attrs;
    }

    /// Force a full redraw on the next render.
    pub fn invalidate(&mut self) {
        self.local_framebuffer = None;
        self.cursor_x = -1;
        self.cursor_y = -1;
    }
}

fn write_fg_color(output: &mut String, color: Color) {
    match color {
        Color::Default => output.push_str("\x1b[39m"),
        Color::Indexed(n) if n < 8 => {
            let _ = write!(output, "\x1b[{}m", 30 + n);
        }
        Color::Indexed(n) if n < 16 => {
            let _ = write!(output, "\x1b[{}m", 90 + n - 8);
        }
        Color::Indexed(n) => {
            let _ = write!(output, "\x1b[38;5;{}m", n);
        }
        Color::Rgb(r, g, b) => {
            let _ = write!(output, "\x1b[38;2;{};{};{}m", r, g, b);
        }
    }
}

fn write_bg_color(output: &mut String, color: Color) {
    match color {
        Color::Default => output.push_str("\x1b[49m"),
        Color::Indexed(n) if n < 8 => {
            let _ = write!(output, "\x1b[{}m", 40 + n);
        }
        Color::Indexed(n) if n < 16 => {
            let _ = write!(output, "\x1b[{}m", 100 + n - 8);
        }
        Color::Indexed(n) => {
            let _ = write!(output, "\x1b[48;5;{}m", n);
        }
        Color::Rgb(r, g, b) => {
            let _ = write!(output, "\x1b[48;2;{};{};{}m", r, g, b);
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
