//! CSI sequence accumulation, parsing and interpretation.
//!
//! `CsiEscape` collects the raw bytes of an `ESC [ ... final` sequence
//! as the state machine sees them.  Once the final byte arrives the
//! buffer is parsed into arguments and `CsiParser` turns the whole
//! sequence into a stream of `CsiAction` values for the terminal state
//! to apply.  Splitting interpretation from application keeps the grid
//! mutation code free of argument-juggling.

use crate::color::ColorAttribute;
use crate::GlyphAttrs;
use log::warn;

/// Longest CSI sequence we will accumulate before force-dispatching.
pub const CSI_BUFFER_SIZE: usize = 512;
/// Maximum number of numeric arguments retained from one sequence.
pub const CSI_ARG_COUNT: usize = 16;

/// Raw accumulator for one control sequence.
#[derive(Debug, Default)]
pub struct CsiEscape {
    buffer: Vec<u8>,
    private: bool,
    args: Vec<i64>,
    mode: [u8; 2],
}

impl CsiEscape {
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.private = false;
        self.args.clear();
        self.mode = [0, 0];
    }

    /// Append one byte.  Returns true when the sequence is complete:
    /// either a final byte (0x40..=0x7e) arrived or the buffer is full.
    pub fn push(&mut self, byte: u8) -> bool {
        self.buffer.push(byte);
        (0x40..=0x7e).contains(&byte) || self.buffer.len() >= CSI_BUFFER_SIZE
    }

    /// Parse the accumulated buffer: an optional leading `?`, then a
    /// `;`-separated list of decimal arguments, then the final byte
    /// (and at most one byte after it).  Absent arguments parse as 0;
    /// values too large for an i32 parse as -1.
    pub fn parse(&mut self) {
        self.private = false;
        self.args.clear();
        self.mode = [0, 0];

        let mut pos = 0;
        if self.buffer.first() == Some(&b'?') {
            self.private = true;
            pos = 1;
        }

        while pos < self.buffer.len() {
            let mut value: i64 = 0;
            while let Some(&b) = self.buffer.get(pos) {
                if !b.is_ascii_digit() {
                    break;
                }
                value = value.saturating_mul(10).saturating_add(i64::from(b - b'0'));
                pos += 1;
            }
            if value > i64::from(std::i32::MAX) {
                value = -1;
            }
            if self.args.len() < CSI_ARG_COUNT {
                self.args.push(value);
            }

            match self.buffer.get(pos) {
                Some(b';') => pos += 1,
                Some(&b) => {
                    self.mode[0] = b;
                    self.mode[1] = self.buffer.get(pos + 1).cloned().unwrap_or(0);
                    break;
                }
                None => break,
            }
        }
    }

    fn arg(&self, idx: usize) -> i64 {
        self.args.get(idx).cloned().unwrap_or(0)
    }

    /// Argument with the usual CSI defaulting rule: an absent or zero
    /// argument stands for `default`.
    fn arg_or(&self, idx: usize, default: i64) -> i64 {
        match self.arg(idx) {
            0 => default,
            n => n,
        }
    }

    /// Printable rendition of the raw sequence for diagnostics.
    pub fn dump(&self) -> String {
        let mut out = String::from("ESC[");
        for &b in &self.buffer {
            if (0x20..0x7f).contains(&b) {
                out.push(b as char);
            } else {
                out.push_str(&format!("\\x{:02x}", b));
            }
        }
        out
    }
}

/// Line clearing variants of EL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineErase {
    ToRight,
    ToLeft,
    All,
}

/// Display clearing variants of ED.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisplayErase {
    Below,
    Above,
    All,
}

/// DEC private modes we act on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecPrivateMode {
    ApplicationCursorKeys,
    ReverseVideo,
    Origin,
    AutoWrap,
    MouseX10,
    ShowCursor,
    MouseButton,
    MouseMotion,
    MouseMany,
    FocusEvents,
    SgrMouse,
    EightBitInput,
    /// 47/1047: plain screen swap.
    AltScreen,
    /// 1048: save or restore the cursor without swapping.
    SaveCursor,
    /// 1049: save/restore the cursor around the swap.
    AltScreenAndCursor,
    BracketedPaste,
}

/// Non-private modes we act on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnsiMode {
    KeyboardLock,
    Insert,
    /// SRM; the set state means echo is off.
    LocalEcho,
    /// LNM; the set state means bare LF stays in its column.
    NewLine,
}

/// One effect decoded from a CSI sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CsiAction {
    InsertBlanks(i64),
    CursorUp(i64),
    CursorDown(i64),
    CursorRight(i64),
    CursorLeft(i64),
    NextLine(i64),
    PrecedingLine(i64),
    /// 0-based target column.
    SetColumn(i64),
    /// 0-based coordinates; origin mode is applied by the terminal.
    SetCursor { x: i64, y: i64 },
    TabForward(i64),
    EraseInDisplay(DisplayErase),
    EraseInLine(LineErase),
    InsertLines(i64),
    DeleteLines(i64),
    DeleteChars(i64),
    ScrollUp(i64),
    ScrollDown(i64),
    EraseChars(i64),
    TabBackward(i64),
    RequestDeviceAttributes,
    /// 0-based target row; origin mode is applied by the terminal.
    SetRow(i64),
    ClearTabStop,
    ClearAllTabStops,
    SetDecPrivateMode(DecPrivateMode, bool),
    SetAnsiMode(AnsiMode, bool),
    SgrReset,
    SgrSet(GlyphAttrs),
    SgrClear(GlyphAttrs),
    SetForegroundColor(ColorAttribute),
    SetBackgroundColor(ColorAttribute),
    ReportCursorPosition,
    /// 0-based inclusive region; `None` means the last row.
    SetScrollingRegion { top: i64, bottom: Option<i64> },
    SaveCursor,
    RestoreCursor,
}

/// Private mode numbers we accept without doing anything.
const IGNORED_DEC_MODES: &[i64] = &[0, 2, 3, 4, 8, 12, 18, 19, 42, 1001, 1005, 1015];

fn dec_private_mode(arg: i64) -> Option<DecPrivateMode> {
    use self::DecPrivateMode::*;
    match arg {
        1 => Some(ApplicationCursorKeys),
        5 => Some(ReverseVideo),
        6 => Some(Origin),
        7 => Some(AutoWrap),
        9 => Some(MouseX10),
        25 => Some(ShowCursor),
        1000 => Some(MouseButton),
        1002 => Some(MouseMotion),
        1003 => Some(MouseMany),
        1004 => Some(FocusEvents),
        1006 => Some(SgrMouse),
        1034 => Some(EightBitInput),
        47 | 1047 => Some(AltScreen),
        1048 => Some(SaveCursor),
        1049 => Some(AltScreenAndCursor),
        2004 => Some(BracketedPaste),
        _ => None,
    }
}

fn ansi_mode(arg: i64) -> Option<AnsiMode> {
    use self::AnsiMode::*;
    match arg {
        2 => Some(KeyboardLock),
        4 => Some(Insert),
        12 => Some(LocalEcho),
        20 => Some(NewLine),
        _ => None,
    }
}

/// Walks a parsed `CsiEscape` and yields the actions it encodes.  Most
/// finals produce a single action; SGR and mode sequences produce one
/// action per argument.
pub struct CsiParser<'a> {
    esc: &'a CsiEscape,
    arg_index: usize,
    done: bool,
}

impl<'a> CsiParser<'a> {
    pub fn new(esc: &'a CsiEscape) -> CsiParser<'a> {
        CsiParser { esc, arg_index: 0, done: false }
    }

    fn next_sgr(&mut self) -> Option<CsiAction> {
        use self::CsiAction::*;
        while self.arg_index < self.esc.args.len() {
            let idx = self.arg_index;
            self.arg_index += 1;
            let arg = self.esc.arg(idx);
            let action = match arg {
                0 => Some(SgrReset),
                1 => Some(SgrSet(GlyphAttrs::BOLD)),
                2 => Some(SgrSet(GlyphAttrs::FAINT)),
                3 => Some(SgrSet(GlyphAttrs::ITALIC)),
                4 => Some(SgrSet(GlyphAttrs::UNDERLINE)),
                5 | 6 => Some(SgrSet(GlyphAttrs::BLINK)),
                7 => Some(SgrSet(GlyphAttrs::REVERSE)),
                8 => Some(SgrSet(GlyphAttrs::INVISIBLE)),
                9 => Some(SgrSet(GlyphAttrs::STRUCK)),
                21 => Some(SgrClear(GlyphAttrs::BOLD)),
                22 => Some(SgrClear(GlyphAttrs::BOLD | GlyphAttrs::FAINT)),
                23 => Some(SgrClear(GlyphAttrs::ITALIC)),
                24 => Some(SgrClear(GlyphAttrs::UNDERLINE)),
                25 | 26 => Some(SgrClear(GlyphAttrs::BLINK)),
                27 => Some(SgrClear(GlyphAttrs::REVERSE)),
                28 => Some(SgrClear(GlyphAttrs::INVISIBLE)),
                29 => Some(SgrClear(GlyphAttrs::STRUCK)),
                30..=37 => Some(SetForegroundColor(ColorAttribute::PaletteIndex((arg - 30) as u8))),
                39 => Some(SetForegroundColor(ColorAttribute::Default)),
                40..=47 => Some(SetBackgroundColor(ColorAttribute::PaletteIndex((arg - 40) as u8))),
                49 => Some(SetBackgroundColor(ColorAttribute::Default)),
                90..=97 => {
                    Some(SetForegroundColor(ColorAttribute::PaletteIndex((arg - 90 + 8) as u8)))
                }
                100..=107 => {
                    Some(SetBackgroundColor(ColorAttribute::PaletteIndex((arg - 100 + 8) as u8)))
                }
                38 | 48 => {
                    self.skip_extended_color(idx);
                    None
                }
                _ => {
                    warn!("unhandled SGR attribute {} in {}", arg, self.esc.dump());
                    None
                }
            };
            if action.is_some() {
                return action;
            }
        }
        None
    }

    /// SGR 38/48 select extended colors via `5;index` or `2;r;g;b`.
    /// We do not support them, but their arguments must still be
    /// consumed so the remainder of the sequence parses correctly.
    fn skip_extended_color(&mut self, idx: usize) {
        match self.esc.arg(idx + 1) {
            5 => self.arg_index = idx + 3,
            2 => self.arg_index = idx + 5,
            _ => self.arg_index = self.esc.args.len(),
        }
        warn!("ignoring extended color selector in {}", self.esc.dump());
    }

    fn next_mode(&mut self, set: bool) -> Option<CsiAction> {
        while self.arg_index < self.esc.args.len() {
            let arg = self.esc.arg(self.arg_index);
            self.arg_index += 1;
            if self.esc.private {
                if let Some(mode) = dec_private_mode(arg) {
                    return Some(CsiAction::SetDecPrivateMode(mode, set));
                }
                if IGNORED_DEC_MODES.contains(&arg) {
                    debug!("ignoring DEC private mode {}", arg);
                } else {
                    warn!("unhandled DEC private mode {} in {}", arg, self.esc.dump());
                }
            } else if let Some(mode) = ansi_mode(arg) {
                return Some(CsiAction::SetAnsiMode(mode, set));
            } else if arg == 0 {
                debug!("ignoring mode 0");
            } else {
                warn!("unhandled mode {} in {}", arg, self.esc.dump());
            }
        }
        None
    }

    fn single_action(&self) -> Option<CsiAction> {
        use self::CsiAction::*;
        let esc = self.esc;
        match esc.mode[0] {
            b'@' => Some(InsertBlanks(esc.arg_or(0, 1))),
            b'A' => Some(CursorUp(esc.arg_or(0, 1))),
            b'B' | b'e' => Some(CursorDown(esc.arg_or(0, 1))),
            b'C' | b'a' => Some(CursorRight(esc.arg_or(0, 1))),
            b'D' => Some(CursorLeft(esc.arg_or(0, 1))),
            b'E' => Some(NextLine(esc.arg_or(0, 1))),
            b'F' => Some(PrecedingLine(esc.arg_or(0, 1))),
            b'G' | b'`' => Some(SetColumn(esc.arg_or(0, 1) - 1)),
            b'H' | b'f' => Some(SetCursor { x: esc.arg_or(1, 1) - 1, y: esc.arg_or(0, 1) - 1 }),
            b'I' => Some(TabForward(esc.arg_or(0, 1))),
            b'J' => match esc.arg(0) {
                0 => Some(EraseInDisplay(DisplayErase::Below)),
                1 => Some(EraseInDisplay(DisplayErase::Above)),
                2 => Some(EraseInDisplay(DisplayErase::All)),
                arg => {
                    warn!("unhandled ED argument {} in {}", arg, esc.dump());
                    None
                }
            },
            b'K' => match esc.arg(0) {
                0 => Some(EraseInLine(LineErase::ToRight)),
                1 => Some(EraseInLine(LineErase::ToLeft)),
                2 => Some(EraseInLine(LineErase::All)),
                arg => {
                    warn!("unhandled EL argument {} in {}", arg, esc.dump());
                    None
                }
            },
            b'L' => Some(InsertLines(esc.arg_or(0, 1))),
            b'M' => Some(DeleteLines(esc.arg_or(0, 1))),
            b'P' => Some(DeleteChars(esc.arg_or(0, 1))),
            b'S' => Some(ScrollUp(esc.arg_or(0, 1))),
            b'T' => Some(ScrollDown(esc.arg_or(0, 1))),
            b'X' => Some(EraseChars(esc.arg_or(0, 1))),
            b'Z' => Some(TabBackward(esc.arg_or(0, 1))),
            b'c' => {
                if esc.arg(0) == 0 {
                    Some(RequestDeviceAttributes)
                } else {
                    warn!("unhandled device attribute request {}", esc.dump());
                    None
                }
            }
            b'd' => Some(SetRow(esc.arg_or(0, 1) - 1)),
            b'g' => match esc.arg(0) {
                0 => Some(ClearTabStop),
                3 => Some(ClearAllTabStops),
                arg => {
                    warn!("unhandled TBC argument {} in {}", arg, esc.dump());
                    None
                }
            },
            b'n' => {
                if esc.arg(0) == 6 {
                    Some(ReportCursorPosition)
                } else {
                    warn!("unhandled status report request {}", esc.dump());
                    None
                }
            }
            b'r' => {
                if esc.private {
                    warn!("unhandled private sequence {}", esc.dump());
                    None
                } else {
                    let bottom = match esc.arg(1) {
                        0 => None,
                        arg => Some(arg - 1),
                    };
                    Some(SetScrollingRegion { top: esc.arg_or(0, 1) - 1, bottom })
                }
            }
            b's' => Some(SaveCursor),
            b'u' => Some(RestoreCursor),
            _ => {
                warn!("unhandled CSI sequence {}", esc.dump());
                None
            }
        }
    }
}

impl<'a> Iterator for CsiParser<'a> {
    type Item = CsiAction;

    fn next(&mut self) -> Option<CsiAction> {
        match self.esc.mode[0] {
            b'm' => self.next_sgr(),
            b'h' => self.next_mode(true),
            b'l' => self.next_mode(false),
            _ => {
                if self.done {
                    return None;
                }
                self.done = true;
                self.single_action()
            }
        }
    }
}
