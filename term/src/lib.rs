//! Terminal model and escape sequence interpreter.
//!
//! `Terminal` hosts the byte-stream entry point: it decodes the pty
//! output into code points and feeds them through a flag-driven escape
//! state machine that mutates a pair of fixed-size screens (primary
//! and alternate).  The surrounding UI consumes the model through the
//! dirty-line API and feeds keystrokes back through `key_down`.

#[allow(unused_imports)]
#[macro_use]
extern crate failure;
#[macro_use]
extern crate bitflags;

use failure::Error;
use log::warn;
use std::io::Write;
use std::ops::{Deref, DerefMut};

#[macro_use]
mod debug;

pub mod color;
mod csi;
pub mod utf8;

use crate::color::ColorAttribute;
use crate::csi::{
    AnsiMode, CsiAction, CsiEscape, CsiParser, DecPrivateMode, DisplayErase, LineErase,
};

#[cfg(test)]
mod test;

/// The response we give when queried for device attributes.
/// This particular string says "we are a VT102".
pub const DEVICE_IDENT: &[u8] = b"\x1b[?6c";

#[allow(dead_code)]
pub const CSI: &[u8] = b"\x1b[";
#[allow(dead_code)]
pub const ST: &[u8] = b"\x1b\\";

/// Column interval of the default tab stops installed by a full reset.
const TAB_SPACES: usize = 5;

/// Longest string sequence payload we will buffer.
const STR_BUFFER_SIZE: usize = 512;
/// Maximum number of `;`-separated string sequence arguments.
const STR_ARG_COUNT: usize = 16;

fn clamp(value: isize, min: isize, max: isize) -> isize {
    value.max(min).min(max)
}

fn is_control_c1(rune: char) -> bool {
    (0x80..=0x9f).contains(&(rune as u32))
}

fn is_control(rune: char) -> bool {
    (rune as u32) < 0x20 || rune == '\u{7f}' || is_control_c1(rune)
}

bitflags! {
    #[derive(Default)]
    pub struct KeyModifiers: u8 {
        const CTRL = 1;
        const ALT = 2;
        const SHIFT = 4;
    }
}

/// Keys with terminal-defined byte encodings.  Everything the host UI
/// cannot map onto one of these simply never reaches the pty.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum KeyCode {
    Char(char),
    Enter,
    Tab,
    Backspace,
    Escape,
    Left,
    Up,
    Right,
    Down,
    PageUp,
    PageDown,
    Home,
    End,
    Insert,
    Delete,
}

bitflags! {
    /// Per-cell rendition flags.  WRAP, WIDE and WDUMMY are structural
    /// markers rather than renditions: WRAP tags the last cell of a
    /// soft-wrapped row, the other two are reserved for wide glyph
    /// bookkeeping.
    #[derive(Default)]
    pub struct GlyphAttrs: u16 {
        const BOLD = 1;
        const FAINT = 1 << 1;
        const ITALIC = 1 << 2;
        const UNDERLINE = 1 << 3;
        const BLINK = 1 << 4;
        const REVERSE = 1 << 5;
        const INVISIBLE = 1 << 6;
        const STRUCK = 1 << 7;
        const WRAP = 1 << 8;
        const WIDE = 1 << 9;
        const WDUMMY = 1 << 10;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cell {
    pub rune: char,
    pub attrs: GlyphAttrs,
    pub fg: ColorAttribute,
    pub bg: ColorAttribute,
}

impl Default for Cell {
    fn default() -> Cell {
        Cell {
            rune: ' ',
            attrs: GlyphAttrs::empty(),
            fg: ColorAttribute::Default,
            bg: ColorAttribute::Default,
        }
    }
}

/// One row of the grid.  Rows are the unit of scrolling: the scroll
/// primitives rotate `Line` values between slots instead of copying
/// cells, and the dirty flag travels with the row.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Line {
    pub cells: Vec<Cell>,
    dirty: bool,
}

impl Line {
    /// Create a new line with the specified number of columns.
    /// Each cell has the default attributes.
    pub fn new(cols: usize) -> Line {
        let mut cells = Vec::with_capacity(cols);
        cells.resize(cols, Cell::default());
        Line { cells, dirty: true }
    }

    /// Recompose the line into the corresponding string.
    pub fn as_str(&self) -> String {
        self.cells.iter().map(|cell| cell.rune).collect()
    }

    #[inline]
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    #[inline]
    fn set_dirty(&mut self) {
        self.dirty = true;
    }

    #[inline]
    fn set_clean(&mut self) {
        self.dirty = false;
    }
}

impl<'a> From<&'a str> for Line {
    fn from(s: &str) -> Line {
        let cells = s.chars().map(|rune| Cell { rune, ..Cell::default() }).collect();
        Line { cells, dirty: true }
    }
}

bitflags! {
    #[derive(Default)]
    pub struct CursorState: u8 {
        /// The last write filled the final column; the next printable
        /// glyph starts on a new line.
        const WRAPNEXT = 1;
        /// Absolute row addressing is relative to and clamped within
        /// the scroll region.
        const ORIGIN = 2;
    }
}

/// The cursor together with the pen: the template cell applied to
/// every newly written glyph.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cursor {
    pub pen: Cell,
    pub x: usize,
    pub y: usize,
    pub state: CursorState,
}

impl Default for Cursor {
    fn default() -> Cursor {
        Cursor { pen: Cell::default(), x: 0, y: 0, state: CursorState::default() }
    }
}

/// Describes the location of the cursor in the visible portion
/// of the screen.
#[derive(Debug, Default, Copy, Clone, Eq, PartialEq)]
pub struct CursorPosition {
    pub x: usize,
    pub y: usize,
}

bitflags! {
    #[derive(Default)]
    pub struct TerminalMode: u32 {
        const WRAP = 1;
        const INSERT = 1 << 1;
        const APPKEYPAD = 1 << 2;
        const ALTSCREEN = 1 << 3;
        const CRLF = 1 << 4;
        const MOUSEBTN = 1 << 5;
        const MOUSEMOTION = 1 << 6;
        const REVERSE = 1 << 7;
        const KBDLOCK = 1 << 8;
        const HIDE = 1 << 9;
        const ECHO = 1 << 10;
        const APPCURSOR = 1 << 11;
        const MOUSEGR = 1 << 12;
        const EIGHT_BIT = 1 << 13;
        const FOCUS = 1 << 14;
        const MOUSEX10 = 1 << 15;
        const MOUSEMANY = 1 << 16;
        const BRCKTPASTE = 1 << 17;
        const UTF8 = 1 << 18;
        const SIXEL = 1 << 19;
        /// Union of the mutually exclusive mouse reporting modes.
        const MOUSE = Self::MOUSEBTN.bits
            | Self::MOUSEMOTION.bits
            | Self::MOUSEX10.bits
            | Self::MOUSEMANY.bits;
    }
}

bitflags! {
    #[derive(Default)]
    struct EscapeState: u8 {
        const START = 1;
        const CSI = 1 << 1;
        const STR = 1 << 2;
        const ALTCHARSET = 1 << 3;
        const STR_END = 1 << 4;
        const TEST = 1 << 5;
        const UTF8 = 1 << 6;
        const DCS = 1 << 7;
    }
}

/// Holds the rows of one screen.  There are two instances per
/// terminal: the primary screen and the alternate screen used by
/// full-screen applications.
#[derive(Debug, Clone)]
pub struct Screen {
    lines: Vec<Line>,
    physical_rows: usize,
    physical_cols: usize,
}

impl Screen {
    pub fn new(physical_rows: usize, physical_cols: usize) -> Screen {
        let mut lines = Vec::with_capacity(physical_rows);
        for _ in 0..physical_rows {
            lines.push(Line::new(physical_cols));
        }
        Screen { lines, physical_rows, physical_cols }
    }

    /// Get a mutable reference to a line, marking it dirty.
    fn line_mut(&mut self, idx: usize) -> &mut Line {
        let line = &mut self.lines[idx];
        line.set_dirty();
        line
    }

    pub fn visible_lines(&self) -> &[Line] {
        &self.lines
    }
}

/// Accumulator for OSC/DCS/APC/PM payloads.
#[derive(Debug)]
struct StrEscape {
    kind: char,
    buffer: String,
}

impl Default for StrEscape {
    fn default() -> StrEscape {
        StrEscape { kind: '\0', buffer: String::new() }
    }
}

impl StrEscape {
    fn reset(&mut self, kind: char) {
        self.kind = kind;
        self.buffer.clear();
    }

    /// Append one code point, silently dropping it once the buffer is
    /// full.
    fn push(&mut self, rune: char) {
        if self.buffer.len() + rune.len_utf8() <= STR_BUFFER_SIZE {
            self.buffer.push(rune);
        }
    }

    fn args(&self) -> Vec<&str> {
        if self.buffer.is_empty() {
            Vec::new()
        } else {
            self.buffer.splitn(STR_ARG_COUNT, ';').collect()
        }
    }
}

/// When the interpreter needs to convey a response back to the caller,
/// this enum holds that response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnswerBack {
    /// Some data to send back to the application on the slave end of
    /// the pty.
    WriteToPty(Vec<u8>),
    /// The application has requested that we change the terminal
    /// title, and here it is.
    TitleChanged(String),
}

pub struct TerminalState {
    /// The primary screen.
    screen: Screen,
    /// The alternate screen used by full-screen applications.
    alt_screen: Screen,
    /// The active cursor, including the pen for the next print.
    cursor: Cursor,
    /// Saved cursor slots, one per screen, selected by the ALTSCREEN
    /// mode bit at save/restore time.
    saved_cursors: [Cursor; 2],
    /// One tab stop flag per column.
    tabs: Vec<bool>,
    /// Scroll region, 0-indexed and inclusive.  `top <= bottom` holds
    /// between any two handler invocations.
    top: usize,
    bottom: usize,
    mode: TerminalMode,
    esc_state: EscapeState,
    csi: CsiEscape,
    str_esc: StrEscape,
    /// Responses collected while parsing; drained by `advance_bytes`.
    answerback: Vec<AnswerBack>,
}

impl TerminalState {
    pub fn new(physical_rows: usize, physical_cols: usize) -> TerminalState {
        let mut state = TerminalState {
            screen: Screen::new(physical_rows, physical_cols),
            alt_screen: Screen::new(physical_rows, physical_cols),
            cursor: Cursor::default(),
            saved_cursors: [Cursor::default(); 2],
            tabs: vec![false; physical_cols],
            top: 0,
            bottom: physical_rows - 1,
            mode: TerminalMode::default(),
            esc_state: EscapeState::default(),
            csi: CsiEscape::default(),
            str_esc: StrEscape::default(),
            answerback: Vec::new(),
        };
        state.reset();
        state
    }

    fn screen(&self) -> &Screen {
        if self.mode.contains(TerminalMode::ALTSCREEN) {
            &self.alt_screen
        } else {
            &self.screen
        }
    }

    fn screen_mut(&mut self) -> &mut Screen {
        if self.mode.contains(TerminalMode::ALTSCREEN) {
            &mut self.alt_screen
        } else {
            &mut self.screen
        }
    }

    fn rows(&self) -> usize {
        self.screen().physical_rows
    }

    fn columns(&self) -> usize {
        self.screen().physical_cols
    }

    /// Full reset: default pen, tab stops at every `TAB_SPACES`
    /// column, full scroll region, wrap and UTF-8 modes, both screens
    /// cleared and both saved cursors rewritten.
    fn reset(&mut self) {
        self.cursor = Cursor::default();
        for (idx, stop) in self.tabs.iter_mut().enumerate() {
            *stop = idx != 0 && idx % TAB_SPACES == 0;
        }
        self.top = 0;
        self.bottom = self.rows() - 1;
        self.mode = TerminalMode::WRAP | TerminalMode::UTF8;
        for _ in 0..2 {
            self.move_to(0, 0);
            self.cursor_save();
            let cols = self.columns() as isize;
            let rows = self.rows() as isize;
            self.clear_region(0, 0, cols - 1, rows - 1);
            self.swap_screen();
        }
    }

    /// The current mode bits; the render layer consults HIDE and
    /// REVERSE, the input layer ECHO and the mouse/paste flags.
    pub fn mode(&self) -> TerminalMode {
        self.mode
    }

    /// Returns the 0-based cursor position relative to the top left of
    /// the visible screen.
    pub fn cursor_pos(&self) -> CursorPosition {
        CursorPosition { x: self.cursor.x, y: self.cursor.y }
    }

    /// Returns the set of visible lines that are dirty.
    pub fn get_dirty_lines(&self) -> Vec<(usize, &Line)> {
        self.screen()
            .visible_lines()
            .iter()
            .enumerate()
            .filter(|(_, line)| line.is_dirty())
            .collect()
    }

    /// Clear the dirty flag for all dirty lines.
    pub fn clean_dirty_lines(&mut self) {
        for line in self.screen_mut().lines.iter_mut() {
            line.set_clean();
        }
    }

    /// Interpret a single decoded code point.
    fn put(&mut self, rune: char) {
        // String sequence accumulation has the highest priority: while
        // STR is set every code point belongs to the payload until a
        // terminator shows up.
        if self.esc_state.contains(EscapeState::STR) {
            let terminates = rune == '\u{07}'
                || rune == '\u{18}'
                || rune == '\u{1a}'
                || rune == '\u{1b}'
                || is_control_c1(rune);
            if terminates {
                self.esc_state.remove(EscapeState::START | EscapeState::STR | EscapeState::DCS);
                if self.mode.contains(TerminalMode::SIXEL) {
                    self.mode.remove(TerminalMode::SIXEL);
                    return;
                }
                self.esc_state.insert(EscapeState::STR_END);
                // the terminator is itself a control code and is
                // dispatched below
            } else {
                if self.mode.contains(TerminalMode::SIXEL) {
                    // sixel payloads are acknowledged, not rendered
                    return;
                }
                if self.esc_state.contains(EscapeState::DCS)
                    && self.str_esc.buffer.is_empty()
                    && rune == 'q'
                {
                    self.mode.insert(TerminalMode::SIXEL);
                    return;
                }
                self.str_esc.push(rune);
                return;
            }
        }

        if is_control(rune) {
            self.control_code(rune);
            return;
        }

        if self.esc_state.contains(EscapeState::START) {
            if self.esc_state.contains(EscapeState::CSI) {
                if self.csi.push(rune as u8) {
                    self.esc_state = EscapeState::empty();
                    self.csi_handle();
                }
            } else if self.esc_state.contains(EscapeState::UTF8) {
                match rune {
                    'G' => self.mode.insert(TerminalMode::UTF8),
                    '@' => self.mode.remove(TerminalMode::UTF8),
                    _ => {}
                }
                self.esc_state = EscapeState::empty();
            } else if self.esc_state.intersects(EscapeState::ALTCHARSET | EscapeState::TEST) {
                // charset designation and the DEC alignment test are
                // consumed so the stream stays in sync, nothing more
                debug!("discarding charset/test byte {:?}", rune);
                self.esc_state = EscapeState::empty();
            } else if self.esc_handle(rune) {
                self.esc_state = EscapeState::empty();
            }
            return;
        }

        // A printable glyph.  Wrap first if the previous print armed
        // the latch, shift the tail of the row in insert mode, then
        // stamp the pen.
        if self.mode.contains(TerminalMode::WRAP)
            && self.cursor.state.contains(CursorState::WRAPNEXT)
        {
            let (x, y) = (self.cursor.x, self.cursor.y);
            self.screen_mut().line_mut(y).cells[x].attrs.insert(GlyphAttrs::WRAP);
            self.put_newline(true);
        }

        if self.mode.contains(TerminalMode::INSERT) && self.cursor.x + 1 < self.columns() {
            let (x, y) = (self.cursor.x, self.cursor.y);
            self.screen_mut().line_mut(y).cells[x..].rotate_right(1);
        }

        if self.cursor.x + 1 > self.columns() {
            self.put_newline(true);
        }

        let (x, y) = (self.cursor.x, self.cursor.y);
        self.set_glyph(rune, x, y);

        if self.cursor.x + 1 < self.columns() {
            let (x, y) = (self.cursor.x as isize, self.cursor.y as isize);
            self.move_to(x + 1, y);
        } else {
            self.cursor.state.insert(CursorState::WRAPNEXT);
        }
    }

    fn control_code(&mut self, rune: char) {
        debug!("control code {:02x}", rune as u32);
        match rune {
            // HT
            '\u{09}' => {
                self.put_tab(1);
                return;
            }
            // BS
            '\u{08}' => {
                let (x, y) = (self.cursor.x as isize, self.cursor.y as isize);
                self.move_to(x - 1, y);
                return;
            }
            // CR
            '\u{0d}' => {
                let y = self.cursor.y as isize;
                self.move_to(0, y);
                return;
            }
            // LF VT FF
            '\u{0a}' | '\u{0b}' | '\u{0c}' => {
                let first_column = self.mode.contains(TerminalMode::CRLF);
                self.put_newline(first_column);
                return;
            }
            // BEL, possibly terminating a string sequence
            '\u{07}' => {
                if self.esc_state.contains(EscapeState::STR_END) {
                    self.str_handle();
                }
            }
            // ESC
            '\u{1b}' => {
                self.csi.reset();
                self.esc_state
                    .remove(EscapeState::CSI | EscapeState::ALTCHARSET | EscapeState::TEST);
                self.esc_state.insert(EscapeState::START);
                return;
            }
            // SUB leaves a marker glyph behind, then cancels like CAN
            '\u{1a}' => {
                let (x, y) = (self.cursor.x, self.cursor.y);
                self.set_glyph('?', x, y);
                self.csi.reset();
            }
            // CAN
            '\u{18}' => {
                self.csi.reset();
            }
            // ENQ NUL XON XOFF DEL are ignored
            '\u{05}' | '\u{00}' | '\u{11}' | '\u{13}' | '\u{7f}' => return,
            // NEL
            '\u{85}' => self.put_newline(true),
            // HTS
            '\u{88}' => {
                let x = self.cursor.x;
                self.tabs[x] = true;
            }
            // DECID
            '\u{9a}' => self.push_answerback(DEVICE_IDENT),
            // DCS OSC PM APC open a string sequence
            '\u{90}' | '\u{9d}' | '\u{9e}' | '\u{9f}' => {
                self.str_sequence(rune);
                return;
            }
            // the rest of C0/C1 is recognized and ignored
            _ => {}
        }
        self.esc_state.remove(EscapeState::STR_END | EscapeState::STR);
    }

    /// Handle the character after a bare ESC.  Returns false when the
    /// character arms a longer sequence and the escape state must be
    /// kept.
    fn esc_handle(&mut self, rune: char) -> bool {
        match rune {
            '[' => {
                self.esc_state.insert(EscapeState::CSI);
                false
            }
            '#' => {
                self.esc_state.insert(EscapeState::TEST);
                false
            }
            '%' => {
                self.esc_state.insert(EscapeState::UTF8);
                false
            }
            'P' | '_' | '^' | ']' | 'k' => {
                self.str_sequence(rune);
                false
            }
            '(' | ')' | '*' | '+' => {
                self.esc_state.insert(EscapeState::ALTCHARSET);
                false
            }
            // IND
            'D' => {
                if self.cursor.y == self.bottom {
                    let top = self.top;
                    self.scroll_up(top, 1);
                } else {
                    let (x, y) = (self.cursor.x as isize, self.cursor.y as isize);
                    self.move_to(x, y + 1);
                }
                true
            }
            // NEL
            'E' => {
                self.put_newline(true);
                true
            }
            // HTS
            'H' => {
                let x = self.cursor.x;
                self.tabs[x] = true;
                true
            }
            // RI
            'M' => {
                if self.cursor.y == self.top {
                    let top = self.top;
                    self.scroll_down(top, 1);
                } else {
                    let (x, y) = (self.cursor.x as isize, self.cursor.y as isize);
                    self.move_to(x, y - 1);
                }
                true
            }
            // DECID
            'Z' => {
                self.push_answerback(DEVICE_IDENT);
                true
            }
            // RIS
            'c' => {
                self.reset();
                true
            }
            // DECKPAM / DECKPNM
            '=' => {
                self.mode.insert(TerminalMode::APPKEYPAD);
                true
            }
            '>' => {
                self.mode.remove(TerminalMode::APPKEYPAD);
                true
            }
            // DECSC / DECRC
            '7' => {
                self.cursor_save();
                true
            }
            '8' => {
                self.cursor_load();
                true
            }
            // ST, possibly terminating a string sequence
            '\\' => {
                if self.esc_state.contains(EscapeState::STR_END) {
                    self.str_handle();
                }
                true
            }
            _ => {
                warn!("unhandled sequence ESC {:?}", rune);
                true
            }
        }
    }

    fn csi_handle(&mut self) {
        self.csi.parse();
        debug!("dispatching {}", self.csi.dump());
        let actions: Vec<CsiAction> = CsiParser::new(&self.csi).collect();
        for action in actions {
            self.csi_apply(action);
        }
        self.csi.reset();
    }

    fn csi_apply(&mut self, action: CsiAction) {
        use crate::csi::CsiAction::*;
        let (x, y) = (self.cursor.x as isize, self.cursor.y as isize);
        match action {
            InsertBlanks(n) => self.insert_blanks(n as isize),
            CursorUp(n) => self.move_to(x, y - n as isize),
            CursorDown(n) => self.move_to(x, y + n as isize),
            CursorRight(n) => self.move_to(x + n as isize, y),
            CursorLeft(n) => self.move_to(x - n as isize, y),
            NextLine(n) => self.move_to(0, y + n as isize),
            PrecedingLine(n) => self.move_to(0, y - n as isize),
            SetColumn(n) => self.move_to(n as isize, y),
            SetCursor { x, y } => self.move_to_absolute(x as isize, y as isize),
            TabForward(n) => self.put_tab(n as isize),
            TabBackward(n) => self.put_tab(-(n as isize)),
            EraseInDisplay(erase) => self.erase_in_display(erase),
            EraseInLine(erase) => self.erase_in_line(erase),
            InsertLines(n) => self.insert_blank_lines(n as isize),
            DeleteLines(n) => self.delete_lines(n as isize),
            DeleteChars(n) => self.delete_chars(n as isize),
            ScrollUp(n) => {
                let top = self.top;
                self.scroll_up(top, n as isize);
            }
            ScrollDown(n) => {
                let top = self.top;
                self.scroll_down(top, n as isize);
            }
            EraseChars(n) => self.clear_region(x, y, x + n as isize - 1, y),
            RequestDeviceAttributes => self.push_answerback(DEVICE_IDENT),
            SetRow(n) => self.move_to_absolute(x, n as isize),
            ClearTabStop => {
                let x = self.cursor.x;
                self.tabs[x] = false;
            }
            ClearAllTabStops => {
                for stop in self.tabs.iter_mut() {
                    *stop = false;
                }
            }
            SetDecPrivateMode(mode, on) => self.set_dec_private_mode(mode, on),
            SetAnsiMode(mode, on) => self.set_ansi_mode(mode, on),
            SgrReset => {
                self.cursor.pen.attrs = GlyphAttrs::empty();
                self.cursor.pen.fg = ColorAttribute::Default;
                self.cursor.pen.bg = ColorAttribute::Default;
            }
            SgrSet(attrs) => self.cursor.pen.attrs.insert(attrs),
            SgrClear(attrs) => self.cursor.pen.attrs.remove(attrs),
            SetForegroundColor(color) => self.cursor.pen.fg = color,
            SetBackgroundColor(color) => self.cursor.pen.bg = color,
            ReportCursorPosition => {
                let report = format!("\x1b[{};{}R", self.cursor.y + 1, self.cursor.x + 1);
                self.answerback.push(AnswerBack::WriteToPty(report.into_bytes()));
            }
            SetScrollingRegion { top, bottom } => {
                let bottom = bottom.unwrap_or(self.rows() as i64 - 1);
                self.set_scroll_region(top as isize, bottom as isize);
                self.move_to_absolute(0, 0);
            }
            SaveCursor => self.cursor_save(),
            RestoreCursor => self.cursor_load(),
        }
    }

    fn erase_in_display(&mut self, erase: DisplayErase) {
        let (x, y) = (self.cursor.x as isize, self.cursor.y as isize);
        let cols = self.columns() as isize;
        let rows = self.rows() as isize;
        match erase {
            DisplayErase::Below => {
                self.clear_region(x, y, cols - 1, y);
                if y < rows - 1 {
                    self.clear_region(0, y + 1, cols - 1, rows - 1);
                }
            }
            DisplayErase::Above => {
                if y > 0 {
                    self.clear_region(0, 0, cols - 1, y - 1);
                }
                self.clear_region(0, y, x, y);
            }
            DisplayErase::All => self.clear_region(0, 0, cols - 1, rows - 1),
        }
    }

    fn erase_in_line(&mut self, erase: LineErase) {
        let (x, y) = (self.cursor.x as isize, self.cursor.y as isize);
        let cols = self.columns() as isize;
        match erase {
            LineErase::ToRight => self.clear_region(x, y, cols - 1, y),
            LineErase::ToLeft => self.clear_region(0, y, x, y),
            LineErase::All => self.clear_region(0, y, cols - 1, y),
        }
    }

    fn set_dec_private_mode(&mut self, mode: DecPrivateMode, on: bool) {
        use crate::csi::DecPrivateMode::*;
        match mode {
            ApplicationCursorKeys => self.mode_bit(TerminalMode::APPCURSOR, on),
            ReverseVideo => self.mode_bit(TerminalMode::REVERSE, on),
            Origin => {
                if on {
                    self.cursor.state.insert(CursorState::ORIGIN);
                } else {
                    self.cursor.state.remove(CursorState::ORIGIN);
                }
                self.move_to_absolute(0, 0);
            }
            AutoWrap => self.mode_bit(TerminalMode::WRAP, on),
            MouseX10 => self.set_mouse_mode(TerminalMode::MOUSEX10, on),
            // DECTCEM is phrased as "show", our flag as "hide"
            ShowCursor => self.mode_bit(TerminalMode::HIDE, !on),
            MouseButton => self.set_mouse_mode(TerminalMode::MOUSEBTN, on),
            MouseMotion => self.set_mouse_mode(TerminalMode::MOUSEMOTION, on),
            MouseMany => self.set_mouse_mode(TerminalMode::MOUSEMANY, on),
            FocusEvents => self.mode_bit(TerminalMode::FOCUS, on),
            SgrMouse => self.mode_bit(TerminalMode::MOUSEGR, on),
            EightBitInput => self.mode_bit(TerminalMode::EIGHT_BIT, on),
            AltScreen => self.swap_screen_for_mode(on, false),
            SaveCursor => {
                if on {
                    self.cursor_save();
                } else {
                    self.cursor_load();
                }
            }
            AltScreenAndCursor => self.swap_screen_for_mode(on, true),
            BracketedPaste => self.mode_bit(TerminalMode::BRCKTPASTE, on),
        }
    }

    fn set_ansi_mode(&mut self, mode: AnsiMode, on: bool) {
        match mode {
            AnsiMode::KeyboardLock => self.mode_bit(TerminalMode::KBDLOCK, on),
            AnsiMode::Insert => self.mode_bit(TerminalMode::INSERT, on),
            // SRM set means the terminal stops echoing locally
            AnsiMode::LocalEcho => self.mode_bit(TerminalMode::ECHO, !on),
            AnsiMode::NewLine => self.mode_bit(TerminalMode::CRLF, !on),
        }
    }

    fn mode_bit(&mut self, flag: TerminalMode, on: bool) {
        if on {
            self.mode.insert(flag);
        } else {
            self.mode.remove(flag);
        }
    }

    /// The mouse reporting modes are mutually exclusive: selecting one
    /// clears whichever was active before.
    fn set_mouse_mode(&mut self, which: TerminalMode, on: bool) {
        self.mode.remove(TerminalMode::MOUSE);
        self.mode_bit(which, on);
    }

    /// Modes 47/1047/1049: swap to or from the alternate screen.  A
    /// request for the screen that is already active is a no-op.  Mode
    /// 1049 saves the cursor before entering and restores it after
    /// leaving; the alternate screen's contents are dropped when it is
    /// left.
    fn swap_screen_for_mode(&mut self, entering: bool, with_cursor: bool) {
        let on_alt = self.mode.contains(TerminalMode::ALTSCREEN);
        if entering == on_alt {
            return;
        }
        if entering {
            if with_cursor {
                self.cursor_save();
            }
            self.swap_screen();
        } else {
            let cols = self.columns() as isize;
            let rows = self.rows() as isize;
            self.clear_region(0, 0, cols - 1, rows - 1);
            self.swap_screen();
            if with_cursor {
                self.cursor_load();
            }
        }
    }

    fn str_sequence(&mut self, kind: char) {
        let kind = match kind {
            '\u{90}' => 'P',
            '\u{9d}' => ']',
            '\u{9e}' => '^',
            '\u{9f}' => '_',
            other => other,
        };
        if kind == 'P' {
            self.esc_state.insert(EscapeState::DCS);
        }
        self.str_esc.reset(kind);
        self.esc_state.insert(EscapeState::STR);
    }

    fn str_handle(&mut self) {
        self.esc_state.remove(EscapeState::STR_END | EscapeState::STR);
        debug!("STR sequence {:?} {:?}", self.str_esc.kind, self.str_esc.buffer);
        match self.str_esc.kind {
            ']' => {
                let selector = self
                    .str_esc
                    .args()
                    .first()
                    .and_then(|arg| arg.parse::<i64>().ok())
                    .unwrap_or(0);
                match selector {
                    0 | 2 => {
                        let title = self
                            .str_esc
                            .args()
                            .get(1)
                            .map(|arg| arg.to_string())
                            .unwrap_or_default();
                        self.answerback.push(AnswerBack::TitleChanged(title));
                    }
                    1 => debug!("ignoring icon title change"),
                    52 => warn!("ignoring clipboard request {:?}", self.str_esc.buffer),
                    4 | 104 => warn!("ignoring palette request {:?}", self.str_esc.buffer),
                    _ => warn!("unhandled OSC sequence {:?}", self.str_esc.buffer),
                }
            }
            // old title set compatibility
            'k' => {
                let title = self.str_esc.buffer.clone();
                self.answerback.push(AnswerBack::TitleChanged(title));
            }
            'P' => {
                self.esc_state.insert(EscapeState::DCS);
            }
            '_' | '^' => {}
            kind => warn!("unhandled string sequence type {:?}", kind),
        }
    }

    /// Move the cursor, clamped to the grid, or to the scroll region
    /// when origin mode is active.  Clears the wrap latch.
    fn move_to(&mut self, x: isize, y: isize) {
        let (min_y, max_y) = if self.cursor.state.contains(CursorState::ORIGIN) {
            (self.top as isize, self.bottom as isize)
        } else {
            (0, self.rows() as isize - 1)
        };
        self.cursor.state.remove(CursorState::WRAPNEXT);
        self.cursor.x = clamp(x, 0, self.columns() as isize - 1) as usize;
        self.cursor.y = clamp(y, min_y, max_y) as usize;
    }

    /// Absolute motion as requested by the application: under origin
    /// mode the row is relative to the top of the scroll region.
    fn move_to_absolute(&mut self, x: isize, y: isize) {
        let y = if self.cursor.state.contains(CursorState::ORIGIN) {
            y + self.top as isize
        } else {
            y
        };
        self.move_to(x, y);
    }

    /// Stamp the pen at (x, y).  Callers are responsible for bounds.
    fn set_glyph(&mut self, rune: char, x: usize, y: usize) {
        let mut cell = self.cursor.pen;
        cell.rune = rune;
        self.screen_mut().line_mut(y).cells[x] = cell;
    }

    /// Clear a rectangle to spaces carrying the pen colors.  Inverted
    /// corners are swapped, everything is clamped to the grid.
    fn clear_region(&mut self, left: isize, top: isize, right: isize, bottom: isize) {
        let (left, right) = if left > right { (right, left) } else { (left, right) };
        let (top, bottom) = if top > bottom { (bottom, top) } else { (top, bottom) };

        let left = clamp(left, 0, self.columns() as isize - 1) as usize;
        let right = clamp(right, 0, self.columns() as isize - 1) as usize;
        let top = clamp(top, 0, self.rows() as isize - 1) as usize;
        let bottom = clamp(bottom, 0, self.rows() as isize - 1) as usize;

        let blank = Cell {
            rune: ' ',
            attrs: GlyphAttrs::empty(),
            fg: self.cursor.pen.fg,
            bg: self.cursor.pen.bg,
        };

        for y in top..=bottom {
            let line = self.screen_mut().line_mut(y);
            for cell in &mut line.cells[left..=right] {
                *cell = blank;
            }
        }
    }

    fn set_dirt(&mut self, top: isize, bottom: isize) {
        let top = clamp(top, 0, self.rows() as isize - 1) as usize;
        let bottom = clamp(bottom, 0, self.rows() as isize - 1) as usize;
        for y in top..=bottom {
            self.screen_mut().line_mut(y);
        }
    }

    fn all_dirty(&mut self) {
        let last = self.rows() as isize - 1;
        self.set_dirt(0, last);
    }

    /// Scroll rows [orig, bottom] up by n; the cleared rows come out
    /// at the bottom of the region.  Row handles rotate, cells never
    /// move.
    fn scroll_up(&mut self, orig: usize, n: isize) {
        let bottom = self.bottom;
        let n = clamp(n, 0, bottom as isize - orig as isize + 1) as usize;
        if n == 0 {
            return;
        }
        let cols = self.columns() as isize;
        self.clear_region(0, orig as isize, cols - 1, (orig + n) as isize - 1);
        self.set_dirt((orig + n) as isize, bottom as isize);
        self.screen_mut().lines[orig..=bottom].rotate_left(n);
    }

    fn scroll_down(&mut self, orig: usize, n: isize) {
        let bottom = self.bottom;
        let n = clamp(n, 0, bottom as isize - orig as isize + 1) as usize;
        if n == 0 {
            return;
        }
        let cols = self.columns() as isize;
        self.set_dirt(orig as isize, bottom as isize - n as isize);
        self.clear_region(0, bottom as isize - n as isize + 1, cols - 1, bottom as isize);
        self.screen_mut().lines[orig..=bottom].rotate_right(n);
    }

    fn insert_blank_lines(&mut self, n: isize) {
        if (self.top..=self.bottom).contains(&self.cursor.y) {
            let y = self.cursor.y;
            self.scroll_down(y, n);
        }
    }

    fn delete_lines(&mut self, n: isize) {
        if (self.top..=self.bottom).contains(&self.cursor.y) {
            let y = self.cursor.y;
            self.scroll_up(y, n);
        }
    }

    /// ICH: shift the tail of the cursor row right and blank the gap.
    fn insert_blanks(&mut self, n: isize) {
        let cols = self.columns();
        let (x, y) = (self.cursor.x, self.cursor.y);
        let n = clamp(n, 0, (cols - x) as isize) as usize;
        if n == 0 {
            return;
        }
        self.screen_mut().line_mut(y).cells[x..].rotate_right(n);
        self.clear_region(x as isize, y as isize, (x + n) as isize - 1, y as isize);
    }

    /// DCH: shift the tail of the cursor row left and blank the end.
    fn delete_chars(&mut self, n: isize) {
        let cols = self.columns();
        let (x, y) = (self.cursor.x, self.cursor.y);
        let n = clamp(n, 0, (cols - x) as isize) as usize;
        if n == 0 {
            return;
        }
        self.screen_mut().line_mut(y).cells[x..].rotate_left(n);
        self.clear_region((cols - n) as isize, y as isize, cols as isize - 1, y as isize);
    }

    /// Advance to the next row, scrolling when the cursor sits on the
    /// bottom of the scroll region.
    fn put_newline(&mut self, first_column: bool) {
        let y = if self.cursor.y == self.bottom {
            let top = self.top;
            self.scroll_up(top, 1);
            self.cursor.y
        } else {
            self.cursor.y + 1
        };
        let x = if first_column { 0 } else { self.cursor.x };
        self.move_to(x as isize, y as isize);
    }

    /// Move the cursor through `count` tab stops; negative counts step
    /// backwards.
    fn put_tab(&mut self, count: isize) {
        let cols = self.columns();
        let mut x = self.cursor.x;
        if count > 0 {
            for _ in 0..count {
                if x >= cols {
                    break;
                }
                x += 1;
                while x < cols && !self.tabs[x] {
                    x += 1;
                }
            }
        } else {
            for _ in count..0 {
                if x == 0 {
                    break;
                }
                x -= 1;
                while x > 0 && !self.tabs[x] {
                    x -= 1;
                }
            }
        }
        self.cursor.x = x.min(cols - 1);
    }

    fn cursor_save(&mut self) {
        let slot = self.mode.contains(TerminalMode::ALTSCREEN) as usize;
        self.saved_cursors[slot] = self.cursor;
    }

    fn cursor_load(&mut self) {
        let slot = self.mode.contains(TerminalMode::ALTSCREEN) as usize;
        self.cursor = self.saved_cursors[slot];
        // clamp into the grid without disturbing the restored state
        self.cursor.x = self.cursor.x.min(self.columns() - 1);
        self.cursor.y = self.cursor.y.min(self.rows() - 1);
    }

    /// Exchange the primary and alternate screens.  Everything is
    /// dirty afterwards.
    fn swap_screen(&mut self) {
        self.mode.toggle(TerminalMode::ALTSCREEN);
        self.all_dirty();
    }

    fn set_scroll_region(&mut self, top: isize, bottom: isize) {
        let top = clamp(top, 0, self.rows() as isize - 1) as usize;
        let bottom = clamp(bottom, 0, self.rows() as isize - 1) as usize;
        if top > bottom {
            self.top = bottom;
            self.bottom = top;
        } else {
            self.top = top;
            self.bottom = bottom;
        }
    }

    fn push_answerback(&mut self, buf: &[u8]) {
        self.answerback.push(AnswerBack::WriteToPty(buf.to_vec()));
    }

    /// Translate a key press into the byte sequence the child expects.
    fn encode_key(&self, key: KeyCode, mods: KeyModifiers) -> Vec<u8> {
        use crate::KeyCode::*;

        let ctrl = mods.contains(KeyModifiers::CTRL);
        let alt = mods.contains(KeyModifiers::ALT);
        let app = self.mode.contains(TerminalMode::APPCURSOR);

        let mut buf = [0u8; 4];
        let bytes: &[u8] = match key {
            // Ctrl-C arrives as 'C' with shift held or as plain 'c';
            // both translate to 0x03
            Char(c) if ctrl && c >= '@' && c <= '_' => {
                buf[0] = c as u8 - 0x40;
                &buf[..1]
            }
            Char(c) if ctrl && c >= 'a' && c <= 'z' => {
                buf[0] = c as u8 - 0x60;
                &buf[..1]
            }
            Char(c) if alt && (c as u32) < 0x80 => {
                buf[0] = c as u8 | 0x80;
                &buf[..1]
            }
            Char(c) => c.encode_utf8(&mut buf).as_bytes(),
            Enter => b"\r",
            Tab => b"\t",
            Backspace => b"\x7f",
            Escape => b"\x1b",
            Up if app => b"\x1bOA",
            Down if app => b"\x1bOB",
            Right if app => b"\x1bOC",
            Left if app => b"\x1bOD",
            Home if app => b"\x1bOH",
            End if app => b"\x1bOF",
            Up => b"\x1b[A",
            Down => b"\x1b[B",
            Right => b"\x1b[C",
            Left => b"\x1b[D",
            PageUp => b"\x1b[5~",
            PageDown => b"\x1b[6~",
            Home => b"\x1b[H",
            End => b"\x1b[F",
            Insert => b"\x1b[2~",
            Delete => b"\x1b[3~",
        };
        bytes.to_vec()
    }
}

pub struct Terminal {
    /// The terminal model/state.
    state: TerminalState,
    /// Bytes held back when a UTF-8 sequence is split across reads.
    residual: Vec<u8>,
}

impl Deref for Terminal {
    type Target = TerminalState;

    fn deref(&self) -> &TerminalState {
        &self.state
    }
}

impl DerefMut for Terminal {
    fn deref_mut(&mut self) -> &mut TerminalState {
        &mut self.state
    }
}

impl Terminal {
    pub fn new(physical_rows: usize, physical_cols: usize) -> Terminal {
        Terminal { state: TerminalState::new(physical_rows, physical_cols), residual: Vec::new() }
    }

    /// Feed the interpreter a slice of bytes of pty output.  The
    /// return value is a (most of the time empty) sequence of
    /// responses that the caller must deliver: answers to write back
    /// to the pty, or notifications for the surrounding UI.
    pub fn advance_bytes<B: AsRef<[u8]>>(&mut self, bytes: B) -> Vec<AnswerBack> {
        self.residual.extend_from_slice(bytes.as_ref());
        let mut pos = 0;
        while pos < self.residual.len() {
            if self.state.mode.contains(TerminalMode::UTF8) {
                match utf8::decode(&self.residual[pos..]) {
                    utf8::Decoded::Rune(rune, len) => {
                        self.state.put(rune);
                        pos += len;
                    }
                    // an incomplete tail waits for the next read
                    utf8::Decoded::NeedMore => break,
                    utf8::Decoded::Invalid => {
                        self.state.put('\u{fffd}');
                        pos += 1;
                    }
                }
            } else {
                self.state.put(self.residual[pos] as char);
                pos += 1;
            }
        }
        self.residual.drain(..pos);
        self.state.answerback.drain(..).collect()
    }

    /// Translate a key press into bytes for the pty and write them.
    /// With local echo enabled the bytes are additionally rendered
    /// into the model, which can itself produce responses.
    pub fn key_down<W: Write>(
        &mut self,
        key: KeyCode,
        mods: KeyModifiers,
        write: &mut W,
    ) -> Result<Vec<AnswerBack>, Error> {
        let bytes = self.state.encode_key(key, mods);
        write.write_all(&bytes)?;
        if self.state.mode.contains(TerminalMode::ECHO) {
            return Ok(self.advance_bytes(&bytes));
        }
        Ok(Vec::new())
    }
}
