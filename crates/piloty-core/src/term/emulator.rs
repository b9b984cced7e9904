//! VT screen model over alacritty's terminal state machine.
//!
//! The emulator is purely pull-side: it owns no I/O and never blocks. The
//! ingestion worker is the single writer; everyone else reads rendered
//! snapshots through the session's lock.

use alacritty_terminal::event::{Event as TermEvent, EventListener};
use alacritty_terminal::grid::Dimensions;
use alacritty_terminal::index::Line;
use alacritty_terminal::term::cell::Flags as CellFlags;
use alacritty_terminal::term::{Config as TermConfig, Term, TermMode};
use alacritty_terminal::vte::ansi::Processor;

/// Share of visible replacement characters above which the renderer reports
/// itself unhealthy. Tripping this means the byte stream was not valid UTF-8
/// at scale, not an occasional mojibake.
const HEALTH_REPLACEMENT_RATIO: f32 = 0.25;
const HEALTH_MIN_REPLACEMENTS: usize = 16;

/// Terminal size handed to alacritty; history capacity rides on
/// `total_lines`.
struct TermSize {
    rows: usize,
    cols: usize,
    history: usize,
}

impl Dimensions for TermSize {
    fn total_lines(&self) -> usize {
        self.rows + self.history
    }

    fn screen_lines(&self) -> usize {
        self.rows
    }

    fn columns(&self) -> usize {
        self.cols
    }
}

/// The emulator consumes no terminal events.
struct VoidListener;

impl EventListener for VoidListener {
    fn send_event(&self, _event: TermEvent) {}
}

/// Rendered snapshot of the current (main or alternate) screen.
#[derive(Debug, Clone)]
pub struct ScreenView {
    /// One entry per row, trailing blanks trimmed.
    pub lines: Vec<String>,
    /// Cursor as (column, row), zero-based.
    pub cursor: (usize, usize),
    /// True when bytes were fed since the previous snapshot.
    pub dirty: bool,
}

/// In-memory VT100/ECMA-48 terminal: fixed W×H grid plus bounded scrollback.
pub struct Emulator {
    term: Term<VoidListener>,
    processor: Processor,
    rows: usize,
    cols: usize,
    dirty: bool,
}

impl Emulator {
    pub fn new(rows: u16, cols: u16, scrollback_lines: usize) -> Self {
        let size = TermSize {
            rows: rows as usize,
            cols: cols as usize,
            history: scrollback_lines,
        };
        let term = Term::new(TermConfig::default(), &size, VoidListener);
        Self {
            term,
            processor: Processor::new(),
            rows: rows as usize,
            cols: cols as usize,
            dirty: false,
        }
    }

    /// Advance the VT state machine. Escape sequences may be split across
    /// calls; the parser carries its state over.
    pub fn feed(&mut self, bytes: &[u8]) {
        if bytes.is_empty() {
            return;
        }
        for byte in bytes {
            self.processor.advance(&mut self.term, *byte);
        }
        self.dirty = true;
    }

    /// Render the visible screen and clear the dirty flag.
    pub fn screen(&mut self) -> ScreenView {
        let lines = self.visible_lines();
        let cursor = self.cursor();
        let dirty = self.dirty;
        self.dirty = false;
        ScreenView {
            lines,
            cursor,
            dirty,
        }
    }

    /// Visible screen as one string, rows joined by newlines.
    pub fn screen_text(&self) -> String {
        self.visible_lines().join("\n")
    }

    /// Up to the most recent `n` scrollback lines, oldest first.
    pub fn scrollback(&self, n: usize) -> Vec<String> {
        let grid = self.term.grid();
        let history = grid.history_size();
        let take = n.min(history);
        let mut lines = Vec::with_capacity(take);
        for i in (1..=take).rev() {
            lines.push(self.render_line(Line(-(i as i32))));
        }
        lines
    }

    /// Scrollback followed by the visible screen; the view `expect` matches
    /// against so escape bytes cannot spoof a pattern.
    pub fn rendered_text(&self) -> String {
        let mut lines = self.scrollback(self.term.grid().history_size());
        lines.extend(self.visible_lines());
        lines.join("\n")
    }

    /// Drop scrollback history; the visible screen is untouched.
    pub fn clear_scrollback(&mut self) {
        self.term.grid_mut().clear_history();
    }

    pub fn alt_screen(&self) -> bool {
        self.term.mode().contains(TermMode::ALT_SCREEN)
    }

    pub fn app_keypad(&self) -> bool {
        self.term.mode().contains(TermMode::APP_KEYPAD)
    }

    pub fn cursor(&self) -> (usize, usize) {
        let point = self.term.grid().cursor.point;
        (point.column.0, point.line.0.max(0) as usize)
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    /// Renderer health bit. False once the visible screen is dominated by
    /// replacement characters, which is what catastrophic escape-stream or
    /// encoding corruption looks like after rendering.
    pub fn is_healthy(&self) -> bool {
        let mut replacements = 0usize;
        let mut occupied = 0usize;
        for line in self.visible_lines() {
            for ch in line.chars() {
                if ch == ' ' {
                    continue;
                }
                occupied += 1;
                if ch == '\u{FFFD}' {
                    replacements += 1;
                }
            }
        }
        if replacements < HEALTH_MIN_REPLACEMENTS || occupied == 0 {
            return true;
        }
        (replacements as f32 / occupied as f32) < HEALTH_REPLACEMENT_RATIO
    }

    /// The visible rows, trailing blanks trimmed.
    pub fn visible_lines(&self) -> Vec<String> {
        let grid = self.term.grid();
        let rows = grid.screen_lines();
        let mut lines = Vec::with_capacity(rows);
        for y in 0..rows {
            let Ok(idx) = i32::try_from(y) else { break };
            lines.push(self.render_line(Line(idx)));
        }
        lines
    }

    fn render_line(&self, line: Line) -> String {
        let row = &self.term.grid()[line];
        // Wide chars occupy two cells; the second carries the spacer flag.
        let text: String = row
            .into_iter()
            .filter(|cell| !cell.flags.contains(CellFlags::WIDE_CHAR_SPACER))
            .map(|cell| cell.c)
            .collect();
        text.trim_end().to_string()
    }
}
